use super::types::*;
use crate::error_handling::types::ConfigError;
use log::{debug, info};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Application configuration read from a TOML file.
///
/// Holds everything the capture proxy needs at runtime: where to accept
/// connections, where to relay them, and where capture files go. Values are
/// kept as written in the file until [`Config::resolve`] parses them, so
/// command-line overrides can be applied first.
///
/// # Examples
///
/// ```
/// use pcapline::configuration::config::Config;
///
/// let dir = std::env::temp_dir();
/// let text = format!(
///     "listen_address = \"127.0.0.1:8080\"\n\
///      upstream_address = \"127.0.0.1:80\"\n\
///      output_directory = {:?}\n",
///     dir
/// );
/// let config = Config::from_toml_str(&text).unwrap();
/// assert!(!config.shared_output);
/// ```
///
/// # Fields Overview
///
/// - `listen_address`: socket the proxy accepts clients on
/// - `upstream_address`: socket every accepted connection is relayed to
/// - `output_directory`: existing directory receiving `.pcap` files
/// - `shared_output`: if `true`, all connections append to one `capture.pcap`
/// - `capture_zero_byte`: if `true`, zero-length reads are recorded too
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address to accept client connections on, e.g. `127.0.0.1:8080`
    pub listen_address: String,

    /// Address of the service being observed
    pub upstream_address: String,

    /// Directory where capture files are written. Must already exist.
    pub output_directory: PathBuf,

    /// Write every connection into a single shared capture file
    ///
    /// The file's global header is written once by the listener; sessions
    /// append records only and never close it.
    #[serde(default)]
    pub shared_output: bool,

    /// Record payload events of length zero
    #[serde(default)]
    pub capture_zero_byte: bool,
}

impl Config {
    /// Reads a configuration file.
    ///
    /// Values are only parsed here. They are checked by
    /// [`Config::apply_overrides`] or [`Config::resolve`], so a command-line
    /// override can still replace a bad file value.
    ///
    /// # Errors
    ///
    /// - `ConfigError::IoError` if the file cannot be read
    /// - `ConfigError::TomlError` if the content is not valid for this schema
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        info!("Reading configuration from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parses configuration text without checking the values.
    pub fn from_toml_str(text: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(text).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        debug!("Configuration parsed: {:?}", config);
        Ok(config)
    }

    /// Replaces file values with the ones given on the command line, then
    /// validates the result.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<(), ConfigError> {
        if let Some(listen) = overrides.listen_address {
            debug!("listen_address overridden: {}", listen);
            self.listen_address = listen;
        }
        if let Some(upstream) = overrides.upstream_address {
            debug!("upstream_address overridden: {}", upstream);
            self.upstream_address = upstream;
        }
        if let Some(dir) = overrides.output_directory {
            debug!("output_directory overridden: {}", dir.display());
            self.output_directory = dir;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve().map(|_| ())
    }

    /// Parses addresses and checks the output directory.
    pub fn resolve(&self) -> Result<ListenerSettings, ConfigError> {
        let listen_address = parse_address("listen_address", &self.listen_address)?;
        let upstream_address = parse_address("upstream_address", &self.upstream_address)?;

        if !self.output_directory.is_dir() {
            return Err(ConfigError::DirectoryDoesNotExist(format!(
                "output_directory {} does not exist or is not a directory",
                self.output_directory.display()
            )));
        }

        let output = if self.shared_output {
            CaptureOutput::Shared(self.output_directory.join(SHARED_CAPTURE_FILE))
        } else {
            CaptureOutput::PerConnection(self.output_directory.clone())
        };

        Ok(ListenerSettings {
            listen_address,
            upstream_address,
            output,
            capture_zero_byte: self.capture_zero_byte,
        })
    }
}

fn parse_address(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse::<SocketAddr>()
        .map_err(|e| ConfigError::BadAddress(format!("{} '{}': {}", field, value, e)))
}

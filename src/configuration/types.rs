use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;

/// File name used for the single capture in shared output mode.
pub const SHARED_CAPTURE_FILE: &str = "capture.pcap";

/// Environment variable overriding `output_directory`.
pub const OUTPUT_DIR_ENV: &str = "PCAPLINE_OUTPUT_DIR";

/// Command-line values that take precedence over the configuration file.
///
/// Unset fields leave the file value untouched. `--output-dir` also reads
/// [`OUTPUT_DIR_ENV`], the flag winning over the environment.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    /// Address to accept client connections on
    ///
    /// # Command Line
    /// Use `--listen <ADDR>` to set this value from the CLI
    #[arg(long = "listen")]
    pub listen_address: Option<String>,

    /// Address every accepted connection is relayed to
    ///
    /// # Command Line
    /// Use `--upstream <ADDR>` to set this value from the CLI
    #[arg(long = "upstream")]
    pub upstream_address: Option<String>,

    /// Directory receiving the capture files
    ///
    /// # Command Line
    /// Use `--output-dir <DIR>` or the `PCAPLINE_OUTPUT_DIR` environment variable
    #[arg(long = "output-dir", env = OUTPUT_DIR_ENV)]
    pub output_directory: Option<PathBuf>,
}

/// Where capture records end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutput {
    /// One `<session-uuid>.pcap` per connection in this directory.
    PerConnection(PathBuf),
    /// Every connection appends to this one file.
    Shared(PathBuf),
}

/// Validated, parsed settings the listener runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSettings {
    pub listen_address: SocketAddr,
    pub upstream_address: SocketAddr,
    pub output: CaptureOutput,
    pub capture_zero_byte: bool,
}

//! # Network Listener Module
//!
//! This module accepts client TCP connections, relays each one to the configured upstream
//! service and records the exchange as a pcap capture.
//!
//! The main component is [`NetworkListener`] which owns the listening socket, decides where each
//! connection's records go (one file per connection or one shared file) and spawns a
//! [`TcpCapture`] per accepted connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │ Incoming        │───▶│ NetworkListener  │───▶│ Upstream        │
//! │ Connections     │    │                  │    │ service         │
//! └─────────────────┘    │ - TcpCapture     │    └─────────────────┘
//!                        │ - CaptureSession │
//!                        └────────┬─────────┘
//!                                 ▼
//!                          <output>/*.pcap
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pcapline::configuration::config::Config;
//! use pcapline::network::network_listener::NetworkListener;
//! use pcapline::error_handling::types::NetworkError;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), NetworkError> {
//!     let config = Config::from_file(Path::new("pcapline.toml")).unwrap();
//!     let mut listener = NetworkListener::new(config.resolve().unwrap());
//!
//!     listener.bind().await?;
//!     listener.start_listening().await
//! }
//! ```

use crate::configuration::types::{CaptureOutput, ListenerSettings};
use crate::data_capture::{CaptureSessionBuilder, ConnectionInfo, TcpCapture};
use crate::error_handling::types::NetworkError;
use crate::pcap::{PcapSink, SharedSink, WriteSink};
use log::{debug, error, info, warn};
use std::fs::File;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use uuid::Uuid;

/// Accepts connections, relays them upstream and captures every exchange.
///
/// `NetworkListener` is responsible for:
/// - Binding the listen address from [`ListenerSettings`]
/// - Opening the shared capture file and writing its header once, in shared mode
/// - Dialing the upstream service for every accepted client
/// - Driving one [`TcpCapture`] per connection
pub struct NetworkListener {
    settings: ListenerSettings,

    /// Bound socket, `None` until [`NetworkListener::bind`] succeeds
    listener: Option<TcpListener>,

    /// Destination shared by every session in shared output mode
    shared_sink: Option<SharedSink>,
}

impl NetworkListener {
    pub fn new(settings: ListenerSettings) -> Self {
        Self {
            settings,
            listener: None,
            shared_sink: None,
        }
    }

    /// Binds the listen address and prepares the capture output.
    ///
    /// In shared mode the capture file is created (truncated) here and its
    /// global header written, since sessions never write it themselves.
    ///
    /// # Returns
    ///
    /// The address actually bound, useful when the configured port is `0`.
    ///
    /// # Errors
    ///
    /// - `NetworkError::BindError` if the socket cannot be bound
    /// - `NetworkError::SinkError` if the shared capture file cannot be created
    pub async fn bind(&mut self) -> Result<SocketAddr, NetworkError> {
        let listener = TcpListener::bind(self.settings.listen_address)
            .await
            .map_err(|e| {
                error!("[!] Bind error on {}: {:?}", self.settings.listen_address, e);
                NetworkError::BindError(e)
            })?;
        let local = listener.local_addr().map_err(NetworkError::BindError)?;

        if let CaptureOutput::Shared(path) = &self.settings.output {
            let file = File::create(path).map_err(NetworkError::SinkError)?;
            let shared = SharedSink::new(WriteSink::new(file));
            shared
                .write_global_header()
                .map_err(NetworkError::SinkError)?;
            info!("Shared capture file {}", path.display());
            self.shared_sink = Some(shared);
        }

        info!(
            "Listening on {}, relaying to {}",
            local, self.settings.upstream_address
        );
        self.listener = Some(listener);
        Ok(local)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Accepts connections until the process is stopped.
    pub async fn start_listening(&mut self) -> Result<(), NetworkError> {
        self.start_listening_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves, then waits for the
    /// connections in flight to finish and closes the shared capture file.
    ///
    /// # Errors
    ///
    /// - `NetworkError::BindError` if called before [`NetworkListener::bind`]
    /// - `NetworkError::AcceptError` if accepting fails
    pub async fn start_listening_until<F>(&mut self, shutdown: F) -> Result<(), NetworkError>
    where
        F: Future<Output = ()>,
    {
        let listener = self.listener.take().ok_or_else(|| {
            NetworkError::BindError(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "listener is not bound",
            ))
        })?;

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("[!] Accept error: {:?}", e);
                            break Err(NetworkError::AcceptError(e));
                        }
                    };
                    let settings = self.settings.clone();
                    let shared = self.shared_sink.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, settings, shared).await {
                            warn!("Connection from {} ended with error: {}", peer, e);
                        }
                    });
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {:?}", e);
                    }
                }
            }
        };

        debug!("Waiting for {} connection(s) to finish", connections.len());
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                error!("Connection task failed: {:?}", e);
            }
        }

        if let Some(shared) = self.shared_sink.take() {
            shared.close_shared().map_err(NetworkError::SinkError)?;
        }
        result
    }
}

/// Opens the sink one connection's session writes to.
fn open_sink(
    output: &CaptureOutput,
    shared: Option<SharedSink>,
    session_id: Uuid,
) -> Result<Box<dyn PcapSink>, NetworkError> {
    match (output, shared) {
        (CaptureOutput::Shared(_), Some(shared)) => Ok(Box::new(shared)),
        (CaptureOutput::Shared(path), None) => Err(NetworkError::SinkError(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            format!("shared capture file {} is not open", path.display()),
        ))),
        (CaptureOutput::PerConnection(dir), _) => {
            let path = dir.join(format!("{}.pcap", session_id));
            debug!("[{}] capture file {}", session_id, path.display());
            let file = File::create(path).map_err(NetworkError::SinkError)?;
            Ok(Box::new(WriteSink::new(file)))
        }
    }
}

async fn handle_connection(
    client: TcpStream,
    peer: SocketAddr,
    settings: ListenerSettings,
    shared: Option<SharedSink>,
) -> Result<(), NetworkError> {
    let session_id = Uuid::new_v4();
    info!("[{}] accepted connection from {}", session_id, peer);

    let upstream = TcpStream::connect(settings.upstream_address)
        .await
        .map_err(|e| {
            error!(
                "[{}] upstream {} unreachable: {:?}",
                session_id, settings.upstream_address, e
            );
            NetworkError::ConnectionFailed(e)
        })?;
    let local = client.local_addr().map_err(NetworkError::StreamError)?;

    let is_shared = matches!(settings.output, CaptureOutput::Shared(_));
    let sink = open_sink(&settings.output, shared, session_id)?;
    let session = CaptureSessionBuilder::new()
        .session_id(session_id)
        .shared_output_stream(is_shared)
        .capture_zero_byte(settings.capture_zero_byte)
        .build(sink);

    let capture = Arc::new(TcpCapture::new(session));
    capture
        .proxy_and_record(client, upstream, ConnectionInfo::tcp(local, peer, true))
        .await
}

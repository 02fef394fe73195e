use std::net::SocketAddr;

use uuid::Uuid;

use super::session::CaptureSession;
use crate::pcap::PcapSink;

/// Endpoints supplied up front instead of discovered on activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedChannel {
    Tcp {
        server: SocketAddr,
        client: SocketAddr,
        local_is_server: bool,
    },
    Udp {
        local: SocketAddr,
        remote: SocketAddr,
    },
}

/// Resolved options a [`CaptureSession`] is constructed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub session_id: Uuid,
    /// The sink belongs to someone else: no file header, never closed.
    pub shared_output_stream: bool,
    /// Record zero-length payloads instead of skipping them.
    pub capture_zero_byte: bool,
    /// Owned sinks only: write the 24-byte file header before the first record.
    pub write_pcap_global_header: bool,
    pub forced: Option<ForcedChannel>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            shared_output_stream: false,
            capture_zero_byte: false,
            write_pcap_global_header: true,
            forced: None,
        }
    }
}

/// Builder for [`CaptureSession`].
///
/// ```
/// use pcapline::data_capture::CaptureSessionBuilder;
/// use pcapline::pcap::WriteSink;
///
/// let session = CaptureSessionBuilder::new()
///     .force_tcp_channel(
///         "1.1.1.1:1234".parse().unwrap(),
///         "2.2.2.2:3456".parse().unwrap(),
///         true,
///     )
///     .build(WriteSink::new(Vec::new()));
/// assert!(!session.is_writing());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CaptureSessionBuilder {
    config: SessionConfig,
}

impl CaptureSessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(mut self, id: Uuid) -> Self {
        self.config.session_id = id;
        self
    }

    /// Treat the sink as shared. Defaults to `false`.
    pub fn shared_output_stream(mut self, shared: bool) -> Self {
        self.config.shared_output_stream = shared;
        self
    }

    pub fn capture_zero_byte(mut self, capture: bool) -> Self {
        self.config.capture_zero_byte = capture;
        self
    }

    pub fn write_pcap_global_header(mut self, write: bool) -> Self {
        self.config.write_pcap_global_header = write;
        self
    }

    /// Capture as TCP between the given endpoints without asking the
    /// transport. `is_local_server` decides which payload direction belongs
    /// to which side.
    pub fn force_tcp_channel(
        mut self,
        server_addr: SocketAddr,
        client_addr: SocketAddr,
        is_local_server: bool,
    ) -> Self {
        self.config.forced = Some(ForcedChannel::Tcp {
            server: server_addr,
            client: client_addr,
            local_is_server: is_local_server,
        });
        self
    }

    /// Capture as UDP between the given endpoints without asking the transport.
    pub fn force_udp_channel(mut self, local: SocketAddr, remote: SocketAddr) -> Self {
        self.config.forced = Some(ForcedChannel::Udp { local, remote });
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Construct the session in `Init`. Never fails.
    pub fn build<S: PcapSink + 'static>(self, sink: S) -> CaptureSession {
        CaptureSession::new(self.config, Box::new(sink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_owned_tcp_discovery() {
        let builder = CaptureSessionBuilder::new();
        let cfg = builder.config();
        assert!(!cfg.shared_output_stream);
        assert!(!cfg.capture_zero_byte);
        assert!(cfg.write_pcap_global_header);
        assert!(cfg.forced.is_none());
    }

    #[test]
    fn last_force_call_wins() {
        let local: SocketAddr = "1.1.1.1:1".parse().unwrap();
        let remote: SocketAddr = "2.2.2.2:2".parse().unwrap();
        let builder = CaptureSessionBuilder::new()
            .force_tcp_channel(local, remote, true)
            .force_udp_channel(local, remote);
        assert_eq!(
            builder.config().forced,
            Some(ForcedChannel::Udp { local, remote })
        );
    }
}

//! Classic pcap output: header encoders and the sinks records are appended to.
//!
//! Re-exports:
//! - [`PcapSink`], [`WriteSink`], [`SharedSink`]: output destinations.
//! - [`PacketRecord`]: one timestamped Ethernet frame.
//! - [`TcpFlags`], [`IpProtocol`]: header field values.

pub mod encoder;
pub mod sink;
pub mod types;

pub use encoder::PacketRecord;
pub use sink::{write_global_header, PcapSink, SharedSink, WriteSink};
pub use types::{IpProtocol, TcpFlags, MAX_TCP_PAYLOAD, MAX_UDP_PAYLOAD};

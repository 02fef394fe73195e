//! Synthetic packet capture for a single connection.
//!
//! Components:
//! - `types`: directions, sides, states and endpoint normalization.
//! - `tcp_flow`: per-flow sequence/ack counters and segment derivation.
//! - `session`: the capture state machine writing pcap records.
//! - `builder`: session options (forced endpoints, sink ownership).
//! - `tcp_capture`: tokio proxy that drives a session from live sockets.

pub mod builder;
pub mod session;
pub mod tcp_capture;
pub mod tcp_flow;
pub mod types;

pub use builder::{CaptureSessionBuilder, ForcedChannel, SessionConfig};
pub use session::CaptureSession;
pub use tcp_capture::TcpCapture;
pub use tcp_flow::TcpFlowState;
pub use types::{
    CaptureState, ConnectionInfo, DataExchange, Endpoint, FlowDirection, Segment, Side,
    SinkOwnership, Transport,
};

//! Common data types used across the data_capture subsystem.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use log::debug;

use crate::pcap::TcpFlags;

/// An IPv4 address and port. Nothing else is representable in a capture.
pub type Endpoint = SocketAddrV4;

/// Direction of payload relative to the capturing side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowDirection {
    /// Bytes written by the local side to the remote peer.
    Outbound,
    /// Bytes read by the local side from the remote peer.
    Inbound,
}

impl FlowDirection {
    pub fn opposite(self) -> Self {
        match self {
            FlowDirection::Outbound => FlowDirection::Inbound,
            FlowDirection::Inbound => FlowDirection::Outbound,
        }
    }
}

/// TCP role of one end of the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }
}

/// Lifecycle of a [`CaptureSession`](super::CaptureSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Not yet attached to a live connection.
    Init,
    /// Records are written to the sink.
    Writing,
    /// Sink writes are suppressed; counters still advance.
    Paused,
    /// Terminal.
    Closed,
}

/// Who controls the sink's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOwnership {
    /// The session writes the file header and closes the sink.
    Owned,
    /// Another owner writes the header and closes the sink.
    Shared,
}

/// Transport of the captured connection as reported on activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp { local_is_server: bool },
    Udp,
}

/// What the transport layer knows about a connection when it becomes active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub local: SocketAddr,
    /// `None` for unconnected UDP sockets.
    pub remote: Option<SocketAddr>,
    pub transport: Transport,
}

impl ConnectionInfo {
    pub fn tcp(local: SocketAddr, remote: SocketAddr, local_is_server: bool) -> Self {
        Self {
            local,
            remote: Some(remote),
            transport: Transport::Tcp { local_is_server },
        }
    }

    pub fn udp(local: SocketAddr, remote: Option<SocketAddr>) -> Self {
        Self {
            local,
            remote,
            transport: Transport::Udp,
        }
    }
}

/// Map any socket address onto an IPv4 endpoint.
///
/// IPv4-mapped IPv6 addresses are unwrapped; every other IPv6 address
/// becomes `0.0.0.0`, keeping the port.
pub fn normalize_endpoint(addr: SocketAddr) -> Endpoint {
    match addr.ip() {
        IpAddr::V4(ip) => SocketAddrV4::new(ip, addr.port()),
        IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
            Some(v4) => SocketAddrV4::new(v4, addr.port()),
            None => {
                debug!("IPv6 address {} is not capturable, using 0.0.0.0", ip);
                SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, addr.port())
            }
        },
    }
}

/// One synthetic TCP segment, ready to be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub sender: Side,
    pub src: Endpoint,
    pub dst: Endpoint,
    pub flags: TcpFlags,
    pub seq: u32,
    pub ack: u32,
}

/// Header fields produced for one observed payload: the data segment and
/// the receiver's immediate acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataExchange {
    pub data: Segment,
    pub ack: Segment,
}

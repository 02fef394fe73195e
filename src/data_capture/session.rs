//! Capture state machine for one connection.
//!
//! A [`CaptureSession`] turns lifecycle and payload notifications into pcap
//! records. It is a plain reactive object: whatever drives the connection
//! calls [`on_active`](CaptureSession::on_active),
//! [`on_payload`](CaptureSession::on_payload) and
//! [`on_close`](CaptureSession::on_close) in order, and may
//! [`pause`](CaptureSession::pause)/[`resume`](CaptureSession::resume) output
//! at any time. The session only borrows payloads; forwarding them is the
//! caller's job.
//!
//! ```text
//! Init ──on_active──▶ Writing ◀──resume── Paused
//!                        │ └────pause────────▲
//!                        ▼                   │
//!                      Closed ◀────close─────┘
//! ```

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};
use uuid::Uuid;

use super::builder::{ForcedChannel, SessionConfig};
use super::tcp_flow::TcpFlowState;
use super::types::*;
use crate::error_handling::types::CaptureError;
use crate::pcap::encoder::{encode_global_header, encode_tcp_packet, encode_udp_packet};
use crate::pcap::types::GLOBAL_HEADER_LEN;
use crate::pcap::{
    write_global_header, IpProtocol, PacketRecord, PcapSink, MAX_TCP_PAYLOAD, MAX_UDP_PAYLOAD,
};

#[derive(Debug)]
enum Channel {
    Tcp(TcpFlowState),
    Udp {
        local: Endpoint,
        remote: Option<Endpoint>,
    },
}

pub struct CaptureSession {
    id: Uuid,
    state: CaptureState,
    ownership: SinkOwnership,
    /// `None` once the session has released the sink.
    sink: Option<Box<dyn PcapSink>>,
    global_header_pending: bool,
    capture_zero_byte: bool,
    forced: Option<ForcedChannel>,
    channel: Option<Channel>,
    close_initiator: Option<Side>,
}

impl CaptureSession {
    pub(crate) fn new(config: SessionConfig, sink: Box<dyn PcapSink>) -> Self {
        let ownership = if config.shared_output_stream {
            SinkOwnership::Shared
        } else {
            SinkOwnership::Owned
        };
        debug!(
            "[{}] CaptureSession created ({:?} sink, forced endpoints: {})",
            config.session_id,
            ownership,
            config.forced.is_some()
        );
        Self {
            id: config.session_id,
            state: CaptureState::Init,
            ownership,
            sink: Some(sink),
            global_header_pending: ownership == SinkOwnership::Owned
                && config.write_pcap_global_header,
            capture_zero_byte: config.capture_zero_byte,
            forced: config.forced,
            channel: None,
            close_initiator: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_writing(&self) -> bool {
        self.state == CaptureState::Writing
    }

    pub fn ownership(&self) -> SinkOwnership {
        self.ownership
    }

    /// Resolved framing, once the session has been activated.
    pub fn protocol(&self) -> Option<IpProtocol> {
        self.channel.as_ref().map(|c| match c {
            Channel::Tcp(_) => IpProtocol::Tcp,
            Channel::Udp { .. } => IpProtocol::Udp,
        })
    }

    /// TCP counters, once a TCP session has been activated.
    pub fn flow(&self) -> Option<&TcpFlowState> {
        match self.channel.as_ref() {
            Some(Channel::Tcp(flow)) => Some(flow),
            _ => None,
        }
    }

    /// Side whose FIN opens the close sequence.
    pub fn close_initiator(&self) -> Side {
        self.close_initiator.unwrap_or(Side::Client)
    }

    /// The connection became active.
    ///
    /// Forced endpoints take precedence over `info`. Without either there is
    /// nothing to frame packets with and the session stays in `Init`. For TCP
    /// the handshake is written immediately.
    pub fn on_active(&mut self, info: Option<ConnectionInfo>) -> Result<(), CaptureError> {
        if self.state != CaptureState::Init {
            trace!("[{}] on_active ignored in state {:?}", self.id, self.state);
            return Ok(());
        }

        let channel = match (self.forced, info) {
            (Some(forced), _) => channel_from_forced(forced),
            (None, Some(info)) => channel_from_info(info),
            (None, None) => {
                warn!("[{}] activated without endpoints; capture stays idle", self.id);
                return Ok(());
            }
        };
        self.channel = Some(channel);
        self.state = CaptureState::Writing;

        let mut batch = Vec::new();
        let now = Utc::now();
        if let Some(Channel::Tcp(flow)) = self.channel.as_mut() {
            info!(
                "[{}] capturing TCP {} -> {} (local is {})",
                self.id,
                flow.client(),
                flow.server(),
                if flow.local_is_server() { "server" } else { "client" }
            );
            for segment in flow.derive_handshake() {
                encode_segment(&segment, &[], now, &mut batch);
            }
        } else {
            info!("[{}] capturing UDP", self.id);
        }

        if batch.is_empty() {
            return Ok(());
        }
        self.write_batch(batch)
    }

    /// Forced-endpoint sessions activate on their first event.
    fn ensure_active(&mut self) -> Result<(), CaptureError> {
        if self.state == CaptureState::Init && self.forced.is_some() {
            self.on_active(None)?;
        }
        Ok(())
    }

    /// `payload` travelled in `direction` on the connection.
    ///
    /// TCP counters advance whether or not output is paused; records are
    /// written only while `Writing`.
    pub fn on_payload(&mut self, direction: FlowDirection, payload: &[u8]) -> Result<(), CaptureError> {
        self.ensure_active()?;
        match self.state {
            CaptureState::Init | CaptureState::Closed => {
                trace!("[{}] payload ignored in state {:?}", self.id, self.state);
                return Ok(());
            }
            CaptureState::Writing | CaptureState::Paused => {}
        }
        if payload.is_empty() && !self.capture_zero_byte {
            return Ok(());
        }

        match self.channel {
            Some(Channel::Tcp(_)) => self.record_tcp(direction, payload),
            Some(Channel::Udp { remote, .. }) => self.record_udp(direction, payload, remote),
            None => Ok(()),
        }
    }

    /// UDP payload with an explicit peer, for unconnected sockets. The peer
    /// stands in for the remote endpoint of this datagram only.
    pub fn on_datagram(
        &mut self,
        direction: FlowDirection,
        payload: &[u8],
        peer: SocketAddr,
    ) -> Result<(), CaptureError> {
        if let Some(Channel::Tcp(_)) = self.channel {
            return self.on_payload(direction, payload);
        }
        self.ensure_active()?;
        if !matches!(self.state, CaptureState::Writing | CaptureState::Paused) {
            trace!("[{}] datagram ignored in state {:?}", self.id, self.state);
            return Ok(());
        }
        if payload.is_empty() && !self.capture_zero_byte {
            return Ok(());
        }
        self.record_udp(direction, payload, Some(normalize_endpoint(peer)))
    }

    fn record_tcp(&mut self, direction: FlowDirection, payload: &[u8]) -> Result<(), CaptureError> {
        let writing = self.is_writing();
        let flow = match self.channel.as_mut() {
            Some(Channel::Tcp(flow)) => flow,
            _ => return Ok(()),
        };

        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![payload]
        } else {
            payload.chunks(MAX_TCP_PAYLOAD).collect()
        };

        let now = Utc::now();
        let mut batch = Vec::new();
        for chunk in chunks {
            // chunk length is bounded by MAX_TCP_PAYLOAD
            let exchange = flow.observe_data_sent(direction, chunk.len() as u32);
            if writing {
                encode_segment(&exchange.data, chunk, now, &mut batch);
                encode_segment(&exchange.ack, &[], now, &mut batch);
                trace!(
                    "[{}] {:?} {} bytes seq={} ack={}",
                    self.id,
                    exchange.data.sender,
                    chunk.len(),
                    exchange.data.seq,
                    exchange.data.ack
                );
            }
        }

        if batch.is_empty() {
            return Ok(());
        }
        self.write_batch(batch)
    }

    fn record_udp(
        &mut self,
        direction: FlowDirection,
        payload: &[u8],
        remote: Option<Endpoint>,
    ) -> Result<(), CaptureError> {
        if !self.is_writing() {
            return Ok(());
        }
        let local = match self.channel {
            Some(Channel::Udp { local, .. }) => local,
            _ => return Ok(()),
        };
        let remote = match remote {
            Some(remote) => remote,
            None => {
                debug!("[{}] UDP datagram without a peer address, not recorded", self.id);
                return Ok(());
            }
        };
        if payload.len() > MAX_UDP_PAYLOAD {
            warn!(
                "[{}] UDP datagram of {} bytes exceeds {} and cannot be framed",
                self.id,
                payload.len(),
                MAX_UDP_PAYLOAD
            );
            return Ok(());
        }

        let (src, dst) = match direction {
            FlowDirection::Outbound => (local, remote),
            FlowDirection::Inbound => (remote, local),
        };
        let mut batch = Vec::new();
        PacketRecord::new(Utc::now(), encode_udp_packet(src, dst, payload)).encode_into(&mut batch);
        trace!("[{}] UDP {} -> {} {} bytes", self.id, src, dst, payload.len());
        self.write_batch(batch)
    }

    /// One side of the connection stopped sending. The first side to do so
    /// initiates the synthetic close.
    pub fn on_shutdown(&mut self, direction: FlowDirection) {
        if self.close_initiator.is_some() {
            return;
        }
        if let Some(Channel::Tcp(flow)) = self.channel.as_ref() {
            let side = flow.sender(direction);
            debug!("[{}] {:?} shut down first", self.id, side);
            self.close_initiator = Some(side);
        }
    }

    /// The transport reported an error. TCP sessions record a RST+ACK from
    /// the close initiator, then the session closes without a FIN exchange.
    pub fn on_error(&mut self) -> Result<(), CaptureError> {
        if self.state == CaptureState::Closed {
            return Ok(());
        }
        if self.is_writing() {
            let initiator = self.close_initiator();
            if let Some(Channel::Tcp(flow)) = self.channel.as_ref() {
                let mut batch = Vec::new();
                encode_segment(&flow.derive_reset(initiator), &[], Utc::now(), &mut batch);
                self.write_batch(batch)?;
            }
        }
        self.finish()
    }

    /// The connection closed.
    pub fn on_close(&mut self) -> Result<(), CaptureError> {
        self.close()
    }

    /// Suppress sink writes. Only effective while `Writing`.
    pub fn pause(&mut self) {
        if self.state == CaptureState::Writing {
            debug!("[{}] capture paused", self.id);
            self.state = CaptureState::Paused;
        } else {
            trace!("[{}] pause ignored in state {:?}", self.id, self.state);
        }
    }

    /// Resume sink writes. Only effective while `Paused`.
    pub fn resume(&mut self) {
        if self.state == CaptureState::Paused {
            debug!("[{}] capture resumed", self.id);
            self.state = CaptureState::Writing;
        } else {
            trace!("[{}] resume ignored in state {:?}", self.id, self.state);
        }
    }

    /// Close the session. Idempotent.
    ///
    /// An active TCP session first records FIN+ACK, FIN+ACK, ACK. An owned
    /// sink is then closed; a shared one is left open.
    pub fn close(&mut self) -> Result<(), CaptureError> {
        if self.state == CaptureState::Closed {
            trace!("[{}] close ignored, already closed", self.id);
            return Ok(());
        }
        if self.is_writing() {
            let initiator = self.close_initiator();
            if let Some(Channel::Tcp(flow)) = self.channel.as_mut() {
                let now = Utc::now();
                let mut batch = Vec::new();
                for segment in flow.derive_close(initiator) {
                    encode_segment(&segment, &[], now, &mut batch);
                }
                self.write_batch(batch)?;
            }
        }
        self.finish()
    }

    /// Move to `Closed` and release the sink according to ownership.
    ///
    /// An owned sink that never received a record still gets its file
    /// header, so the output is always a readable capture.
    fn finish(&mut self) -> Result<(), CaptureError> {
        self.state = CaptureState::Closed;
        let sink = self.sink.take();
        match (self.ownership, sink) {
            (SinkOwnership::Owned, Some(mut sink)) => {
                let header = if self.global_header_pending {
                    self.global_header_pending = false;
                    write_global_header(&mut *sink).and_then(|_| sink.flush())
                } else {
                    Ok(())
                };
                info!("[{}] capture closed, closing sink", self.id);
                let closed = sink.close();
                header.map_err(CaptureError::SinkWriteFailure)?;
                closed.map_err(CaptureError::SinkCloseFailure)
            }
            _ => {
                info!("[{}] capture closed", self.id);
                Ok(())
            }
        }
    }

    /// Hand one encoded batch to the sink, prefixed by the file header if it
    /// is still owed. Any failure closes the session.
    fn write_batch(&mut self, batch: Vec<u8>) -> Result<(), CaptureError> {
        let sink = match self.sink.as_mut() {
            Some(sink) => sink,
            None => return Ok(()),
        };

        let written = if self.global_header_pending {
            let mut out = Vec::with_capacity(GLOBAL_HEADER_LEN + batch.len());
            out.extend_from_slice(&encode_global_header());
            out.extend_from_slice(&batch);
            sink.write_all(&out)
        } else {
            sink.write_all(&batch)
        };
        let result = written.and_then(|_| sink.flush());

        match result {
            Ok(()) => {
                self.global_header_pending = false;
                Ok(())
            }
            Err(e) => {
                warn!("[{}] sink write failed, closing capture: {}", self.id, e);
                self.state = CaptureState::Closed;
                if let (SinkOwnership::Owned, Some(mut sink)) = (self.ownership, self.sink.take()) {
                    if let Err(close_err) = sink.close() {
                        warn!("[{}] closing failed sink: {}", self.id, close_err);
                    }
                }
                Err(CaptureError::SinkWriteFailure(e))
            }
        }
    }
}

fn encode_segment(segment: &Segment, payload: &[u8], now: DateTime<Utc>, out: &mut Vec<u8>) {
    let frame = encode_tcp_packet(
        segment.src,
        segment.dst,
        segment.seq,
        segment.ack,
        segment.flags,
        payload,
    );
    PacketRecord::new(now, frame).encode_into(out);
}

fn channel_from_forced(forced: ForcedChannel) -> Channel {
    match forced {
        ForcedChannel::Tcp {
            server,
            client,
            local_is_server,
        } => Channel::Tcp(TcpFlowState::new(
            normalize_endpoint(client),
            normalize_endpoint(server),
            local_is_server,
        )),
        ForcedChannel::Udp { local, remote } => Channel::Udp {
            local: normalize_endpoint(local),
            remote: Some(normalize_endpoint(remote)),
        },
    }
}

fn channel_from_info(info: ConnectionInfo) -> Channel {
    let local = normalize_endpoint(info.local);
    let remote = info.remote.map(normalize_endpoint);
    match info.transport {
        Transport::Tcp { local_is_server } => {
            let remote = remote.unwrap_or_else(|| SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
            let (client, server) = if local_is_server {
                (remote, local)
            } else {
                (local, remote)
            };
            Channel::Tcp(TcpFlowState::new(client, server, local_is_server))
        }
        Transport::Udp => Channel::Udp { local, remote },
    }
}

use super::types::{DataExchange, Endpoint, FlowDirection, Segment, Side};
use crate::pcap::TcpFlags;

/// Sequence bookkeeping for one synthetic TCP flow.
///
/// Each side has one counter holding the next sequence number it will send;
/// the ack a side sends is simply the other side's counter. Counters wrap
/// modulo 2^32.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpFlowState {
    client: Endpoint,
    server: Endpoint,
    local_is_server: bool,
    client_seq: u32,
    server_seq: u32,
}

impl TcpFlowState {
    pub fn new(client: Endpoint, server: Endpoint, local_is_server: bool) -> Self {
        Self {
            client,
            server,
            local_is_server,
            client_seq: 0,
            server_seq: 0,
        }
    }

    pub fn client(&self) -> Endpoint {
        self.client
    }

    pub fn server(&self) -> Endpoint {
        self.server
    }

    pub fn local_is_server(&self) -> bool {
        self.local_is_server
    }

    /// Which side sends bytes travelling in `direction`.
    pub fn sender(&self, direction: FlowDirection) -> Side {
        match (direction, self.local_is_server) {
            (FlowDirection::Outbound, true) | (FlowDirection::Inbound, false) => Side::Server,
            (FlowDirection::Outbound, false) | (FlowDirection::Inbound, true) => Side::Client,
        }
    }

    pub fn seq(&self, side: Side) -> u32 {
        match side {
            Side::Client => self.client_seq,
            Side::Server => self.server_seq,
        }
    }

    pub fn ack(&self, side: Side) -> u32 {
        self.seq(side.opposite())
    }

    fn seq_mut(&mut self, side: Side) -> &mut u32 {
        match side {
            Side::Client => &mut self.client_seq,
            Side::Server => &mut self.server_seq,
        }
    }

    fn endpoint(&self, side: Side) -> Endpoint {
        match side {
            Side::Client => self.client,
            Side::Server => self.server,
        }
    }

    fn segment(&self, sender: Side, flags: TcpFlags, seq: u32, ack: u32) -> Segment {
        Segment {
            sender,
            src: self.endpoint(sender),
            dst: self.endpoint(sender.opposite()),
            flags,
            seq,
            ack,
        }
    }

    /// Account for `length` payload bytes flowing in `direction`.
    ///
    /// Returns the data segment stamped with the sender's counter before the
    /// increment and the receiver's pure ACK covering it. Call this for every
    /// payload, captured or not, so later segments carry true offsets.
    pub fn observe_data_sent(&mut self, direction: FlowDirection, length: u32) -> DataExchange {
        let sender = self.sender(direction);
        let receiver = sender.opposite();
        let seq = self.seq(sender);
        let ack = self.seq(receiver);

        let next = seq.wrapping_add(length);
        *self.seq_mut(sender) = next;

        DataExchange {
            data: self.segment(sender, TcpFlags::ACK, seq, ack),
            ack: self.segment(receiver, TcpFlags::ACK, ack, next),
        }
    }

    /// SYN, SYN+ACK, ACK; always opened by the client. Leaves both counters at 1.
    pub fn derive_handshake(&mut self) -> [Segment; 3] {
        self.client_seq = 1;
        self.server_seq = 1;
        [
            self.segment(Side::Client, TcpFlags::SYN, 0, 0),
            self.segment(Side::Server, TcpFlags::SYN_ACK, 0, 1),
            self.segment(Side::Client, TcpFlags::ACK, 1, 1),
        ]
    }

    /// FIN+ACK from `initiator`, FIN+ACK back, final ACK from `initiator`.
    ///
    /// Each FIN consumes one sequence number, so both counters end one higher.
    pub fn derive_close(&mut self, initiator: Side) -> [Segment; 3] {
        let responder = initiator.opposite();
        let seq = self.seq(initiator);
        let ack = self.seq(responder);
        let segments = [
            self.segment(initiator, TcpFlags::FIN_ACK, seq, ack),
            self.segment(responder, TcpFlags::FIN_ACK, ack, seq),
            self.segment(
                initiator,
                TcpFlags::ACK,
                seq.wrapping_add(1),
                ack.wrapping_add(1),
            ),
        ];
        *self.seq_mut(initiator) = seq.wrapping_add(1);
        *self.seq_mut(responder) = ack.wrapping_add(1);
        segments
    }

    /// RST+ACK from `initiator` at the current offsets.
    pub fn derive_reset(&self, initiator: Side) -> Segment {
        self.segment(
            initiator,
            TcpFlags::RST_ACK,
            self.seq(initiator),
            self.ack(initiator),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(local_is_server: bool) -> TcpFlowState {
        TcpFlowState::new(
            "2.2.2.2:3456".parse().unwrap(),
            "1.1.1.1:1234".parse().unwrap(),
            local_is_server,
        )
    }

    #[test]
    fn handshake_sequence() {
        let mut f = flow(true);
        let [syn, syn_ack, ack] = f.derive_handshake();

        assert_eq!((syn.sender, syn.flags, syn.seq, syn.ack), (Side::Client, TcpFlags::SYN, 0, 0));
        assert_eq!(syn.src, f.client());
        assert_eq!(syn.dst, f.server());
        assert_eq!(
            (syn_ack.sender, syn_ack.flags, syn_ack.seq, syn_ack.ack),
            (Side::Server, TcpFlags::SYN_ACK, 0, 1)
        );
        assert_eq!((ack.sender, ack.flags, ack.seq, ack.ack), (Side::Client, TcpFlags::ACK, 1, 1));
        assert_eq!((f.seq(Side::Client), f.seq(Side::Server)), (1, 1));
    }

    #[test]
    fn handshake_is_client_first_for_either_local_role() {
        let mut f = flow(false);
        let [syn, _, _] = f.derive_handshake();
        assert_eq!(syn.sender, Side::Client);
        assert_eq!(syn.dst, f.server());
    }

    #[test]
    fn sender_follows_local_role() {
        let server_local = flow(true);
        assert_eq!(server_local.sender(FlowDirection::Inbound), Side::Client);
        assert_eq!(server_local.sender(FlowDirection::Outbound), Side::Server);

        let client_local = flow(false);
        assert_eq!(client_local.sender(FlowDirection::Inbound), Side::Server);
        assert_eq!(client_local.sender(FlowDirection::Outbound), Side::Client);
    }

    #[test]
    fn data_then_ack_offsets() {
        let mut f = flow(true);
        f.derive_handshake();

        let ex = f.observe_data_sent(FlowDirection::Inbound, 4);
        assert_eq!(ex.data.sender, Side::Client);
        assert_eq!((ex.data.seq, ex.data.ack), (1, 1));
        assert_eq!(ex.ack.sender, Side::Server);
        assert_eq!((ex.ack.seq, ex.ack.ack), (1, 5));

        let ex = f.observe_data_sent(FlowDirection::Outbound, 5);
        assert_eq!(ex.data.sender, Side::Server);
        assert_eq!((ex.data.seq, ex.data.ack), (1, 5));
        assert_eq!((ex.ack.seq, ex.ack.ack), (5, 6));
    }

    #[test]
    fn close_from_client_after_exchange() {
        // client read 4, client wrote 5
        let mut f = flow(false);
        f.derive_handshake();
        f.observe_data_sent(FlowDirection::Inbound, 4);
        f.observe_data_sent(FlowDirection::Outbound, 5);

        let [fin, fin_back, last] = f.derive_close(Side::Client);
        assert_eq!((fin.sender, fin.flags, fin.seq, fin.ack), (Side::Client, TcpFlags::FIN_ACK, 6, 5));
        assert_eq!(
            (fin_back.sender, fin_back.flags, fin_back.seq, fin_back.ack),
            (Side::Server, TcpFlags::FIN_ACK, 5, 6)
        );
        assert_eq!((last.sender, last.flags, last.seq, last.ack), (Side::Client, TcpFlags::ACK, 7, 6));
        assert_eq!((f.seq(Side::Client), f.seq(Side::Server)), (7, 6));
    }

    #[test]
    fn close_from_server_swaps_roles() {
        let mut f = flow(true);
        f.derive_handshake();
        f.observe_data_sent(FlowDirection::Outbound, 9);

        let [fin, fin_back, last] = f.derive_close(Side::Server);
        assert_eq!(fin.src, f.server());
        assert_eq!((fin.seq, fin.ack), (10, 1));
        assert_eq!(fin_back.src, f.client());
        assert_eq!((fin_back.seq, fin_back.ack), (1, 10));
        assert_eq!((last.seq, last.ack), (11, 2));
    }

    #[test]
    fn counters_wrap_modulo_2_32() {
        let mut f = flow(true);
        f.derive_handshake();

        f.observe_data_sent(FlowDirection::Inbound, u32::MAX);
        // 1 + (2^32 - 1) wraps to 0
        assert_eq!(f.seq(Side::Client), 0);

        let ex = f.observe_data_sent(FlowDirection::Inbound, 10);
        assert_eq!(ex.data.seq, 0);
        assert_eq!(ex.ack.ack, 10);
    }

    #[test]
    fn ack_of_segment_straddling_wrap() {
        let mut f = flow(true);
        f.derive_handshake();
        f.observe_data_sent(FlowDirection::Inbound, u32::MAX - 2);

        let ex = f.observe_data_sent(FlowDirection::Inbound, 8);
        assert_eq!(ex.data.seq, u32::MAX - 1);
        assert_eq!(ex.ack.ack, 6);
    }

    #[test]
    fn reset_uses_current_offsets() {
        let mut f = flow(true);
        f.derive_handshake();
        f.observe_data_sent(FlowDirection::Inbound, 3);
        let rst = f.derive_reset(Side::Client);
        assert_eq!(rst.flags, TcpFlags::RST_ACK);
        assert_eq!((rst.seq, rst.ack), (4, 1));
    }
}

//! Stateless pcap/Ethernet/IPv4/TCP/UDP serialization.
//!
//! Every function returns fully formed bytes and knows nothing about the
//! connection they describe; callers pass already-computed header fields.
//! All multi-byte fields are written big-endian (network order), including
//! the pcap headers, so the global header starts with `A1 B2 C3 D4`.
//! Callers keep payloads within [`MAX_TCP_PAYLOAD`]/[`MAX_UDP_PAYLOAD`].

use std::net::{Ipv4Addr, SocketAddrV4};

use chrono::{DateTime, Utc};

use super::types::*;

/// Build the 24-byte pcap file header (link type Ethernet).
pub fn encode_global_header() -> [u8; GLOBAL_HEADER_LEN] {
    let mut out = [0u8; GLOBAL_HEADER_LEN];
    out[0..4].copy_from_slice(&PCAP_MAGIC.to_be_bytes());
    out[4..6].copy_from_slice(&PCAP_VERSION_MAJOR.to_be_bytes());
    out[6..8].copy_from_slice(&PCAP_VERSION_MINOR.to_be_bytes());
    out[8..12].copy_from_slice(&0i32.to_be_bytes()); // thiszone
    out[12..16].copy_from_slice(&0u32.to_be_bytes()); // sigfigs
    out[16..20].copy_from_slice(&PCAP_SNAPLEN.to_be_bytes());
    out[20..24].copy_from_slice(&LINKTYPE_ETHERNET.to_be_bytes());
    out
}

/// Build a 16-byte per-record header.
pub fn encode_record_header(
    ts_sec: u32,
    ts_usec: u32,
    captured_len: u32,
    orig_len: u32,
) -> [u8; RECORD_HEADER_LEN] {
    let mut out = [0u8; RECORD_HEADER_LEN];
    out[0..4].copy_from_slice(&ts_sec.to_be_bytes());
    out[4..8].copy_from_slice(&ts_usec.to_be_bytes());
    out[8..12].copy_from_slice(&captured_len.to_be_bytes());
    out[12..16].copy_from_slice(&orig_len.to_be_bytes());
    out
}

/// Wrap `payload` (an IPv4 packet) in an Ethernet II frame.
pub fn encode_ethernet_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ETHERNET_HEADER_LEN + payload.len());
    out.extend_from_slice(&DST_MAC);
    out.extend_from_slice(&SRC_MAC);
    out.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Build a 20-byte IPv4 header. `payload_len` covers everything after it.
pub fn encode_ipv4_header(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: IpProtocol,
    payload_len: usize,
) -> [u8; IPV4_HEADER_LEN] {
    let total_len = u16::try_from(IPV4_HEADER_LEN + payload_len).unwrap_or(u16::MAX);

    let mut out = [0u8; IPV4_HEADER_LEN];
    out[0] = 0x45; // version 4, IHL 5
    out[1] = 0x00; // DSCP/ECN
    out[2..4].copy_from_slice(&total_len.to_be_bytes());
    out[4..6].copy_from_slice(&0u16.to_be_bytes()); // identification
    out[6..8].copy_from_slice(&0u16.to_be_bytes()); // flags/fragment offset
    out[8] = IPV4_TTL;
    out[9] = protocol.number();
    out[10..12].copy_from_slice(&IPV4_CHECKSUM_PLACEHOLDER.to_be_bytes());
    out[12..16].copy_from_slice(&src.octets());
    out[16..20].copy_from_slice(&dst.octets());
    out
}

/// Build an 8-byte UDP header.
pub fn encode_udp_header(src_port: u16, dst_port: u16, payload_len: usize) -> [u8; UDP_HEADER_LEN] {
    let length = u16::try_from(UDP_HEADER_LEN + payload_len).unwrap_or(u16::MAX);

    let mut out = [0u8; UDP_HEADER_LEN];
    out[0..2].copy_from_slice(&src_port.to_be_bytes());
    out[2..4].copy_from_slice(&dst_port.to_be_bytes());
    out[4..6].copy_from_slice(&length.to_be_bytes());
    out[6..8].copy_from_slice(&L4_CHECKSUM_PLACEHOLDER.to_be_bytes());
    out
}

/// Build a 20-byte TCP header without options.
pub fn encode_tcp_header(
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: TcpFlags,
) -> [u8; TCP_HEADER_LEN] {
    let mut out = [0u8; TCP_HEADER_LEN];
    out[0..2].copy_from_slice(&src_port.to_be_bytes());
    out[2..4].copy_from_slice(&dst_port.to_be_bytes());
    out[4..8].copy_from_slice(&seq.to_be_bytes());
    out[8..12].copy_from_slice(&ack.to_be_bytes());
    out[12] = TCP_DATA_OFFSET;
    out[13] = flags.bits();
    out[14..16].copy_from_slice(&TCP_WINDOW.to_be_bytes());
    out[16..18].copy_from_slice(&L4_CHECKSUM_PLACEHOLDER.to_be_bytes());
    out[18..20].copy_from_slice(&0u16.to_be_bytes()); // urgent pointer
    out
}

/// Full Ethernet frame carrying one TCP segment.
pub fn encode_tcp_packet(
    src: SocketAddrV4,
    dst: SocketAddrV4,
    seq: u32,
    ack: u32,
    flags: TcpFlags,
    payload: &[u8],
) -> Vec<u8> {
    let l4_len = TCP_HEADER_LEN + payload.len();
    let mut ip = Vec::with_capacity(IPV4_HEADER_LEN + l4_len);
    ip.extend_from_slice(&encode_ipv4_header(*src.ip(), *dst.ip(), IpProtocol::Tcp, l4_len));
    ip.extend_from_slice(&encode_tcp_header(src.port(), dst.port(), seq, ack, flags));
    ip.extend_from_slice(payload);
    encode_ethernet_frame(&ip)
}

/// Full Ethernet frame carrying one UDP datagram.
pub fn encode_udp_packet(src: SocketAddrV4, dst: SocketAddrV4, payload: &[u8]) -> Vec<u8> {
    let l4_len = UDP_HEADER_LEN + payload.len();
    let mut ip = Vec::with_capacity(IPV4_HEADER_LEN + l4_len);
    ip.extend_from_slice(&encode_ipv4_header(*src.ip(), *dst.ip(), IpProtocol::Udp, l4_len));
    ip.extend_from_slice(&encode_udp_header(src.port(), dst.port(), payload.len()));
    ip.extend_from_slice(payload);
    encode_ethernet_frame(&ip)
}

/// One captured packet: timestamp plus an Ethernet frame.
///
/// Built and serialized in one go; never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub frame: Vec<u8>,
}

impl PacketRecord {
    pub fn new(timestamp: DateTime<Utc>, frame: Vec<u8>) -> Self {
        Self {
            ts_sec: u32::try_from(timestamp.timestamp()).unwrap_or(0),
            ts_usec: timestamp.timestamp_subsec_micros().min(999_999),
            frame,
        }
    }

    /// Captured and original length; snapping is never applied.
    pub fn len(&self) -> u32 {
        u32::try_from(self.frame.len()).unwrap_or(u32::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// Append record header and frame to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let len = self.len();
        out.extend_from_slice(&encode_record_header(self.ts_sec, self.ts_usec, len, len));
        out.extend_from_slice(&self.frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn be16(b: &[u8]) -> u16 {
        u16::from_be_bytes([b[0], b[1]])
    }

    fn be32(b: &[u8]) -> u32 {
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    #[test]
    fn global_header_layout() {
        let hdr = encode_global_header();
        assert_eq!(&hdr[0..4], &[0xA1, 0xB2, 0xC3, 0xD4]);
        assert_eq!(be16(&hdr[4..]), 2);
        assert_eq!(be16(&hdr[6..]), 4);
        assert_eq!(be32(&hdr[8..]), 0);
        assert_eq!(be32(&hdr[12..]), 0);
        assert_eq!(be32(&hdr[16..]), 0xFFFF);
        assert_eq!(be32(&hdr[20..]), 1);
    }

    #[test]
    fn record_header_fields() {
        let hdr = encode_record_header(10, 20, 54, 54);
        assert_eq!(be32(&hdr[0..]), 10);
        assert_eq!(be32(&hdr[4..]), 20);
        assert_eq!(be32(&hdr[8..]), 54);
        assert_eq!(be32(&hdr[12..]), 54);
    }

    #[test]
    fn ethernet_uses_documentation_macs() {
        let frame = encode_ethernet_frame(b"xy");
        assert_eq!(frame.len(), 16);
        assert_eq!(&frame[0..6], &[0, 0, 0x5E, 0, 0x53, 0xFF]);
        assert_eq!(&frame[6..12], &[0, 0, 0x5E, 0, 0x53, 0]);
        assert_eq!(be16(&frame[12..]), 0x0800);
        assert_eq!(&frame[14..], b"xy");
    }

    #[test]
    fn ipv4_header_fields() {
        let hdr = encode_ipv4_header(
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(2, 2, 2, 2),
            IpProtocol::Udp,
            12,
        );
        assert_eq!(hdr[0], 0x45);
        assert_eq!(hdr[1], 0);
        assert_eq!(be16(&hdr[2..]), 32);
        assert_eq!(be16(&hdr[4..]), 0);
        assert_eq!(be16(&hdr[6..]), 0);
        assert_eq!(hdr[8], 0xFF);
        assert_eq!(hdr[9], 17);
        assert_eq!(be16(&hdr[10..]), 0);
        assert_eq!(&hdr[12..16], &[1, 1, 1, 1]);
        assert_eq!(&hdr[16..20], &[2, 2, 2, 2]);
    }

    #[test]
    fn tcp_header_fields() {
        let hdr = encode_tcp_header(3456, 1234, 0xDEAD_BEEF, 7, TcpFlags::FIN_ACK);
        assert_eq!(be16(&hdr[0..]), 3456);
        assert_eq!(be16(&hdr[2..]), 1234);
        assert_eq!(be32(&hdr[4..]), 0xDEAD_BEEF);
        assert_eq!(be32(&hdr[8..]), 7);
        assert_eq!(hdr[12], 0x50);
        assert_eq!(hdr[13], 0x11);
        assert_eq!(be16(&hdr[14..]), 0xFFFF);
        assert_eq!(be16(&hdr[16..]), 1);
        assert_eq!(be16(&hdr[18..]), 0);
    }

    #[test]
    fn udp_packet_is_46_bytes_for_four_byte_payload() {
        let src = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5000);
        let dst = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6000);
        let frame = encode_udp_packet(src, dst, b"Meow");
        assert_eq!(frame.len(), 46);
        assert_eq!(frame[14 + 9], 17);
        assert_eq!(be16(&frame[34..]), 5000);
        assert_eq!(be16(&frame[36..]), 6000);
        assert_eq!(be16(&frame[38..]), 12);
        assert_eq!(be16(&frame[40..]), 1);
        assert_eq!(&frame[42..], b"Meow");
    }

    #[test]
    fn record_encodes_timestamp_and_lengths() {
        let ts = Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap();
        let record = PacketRecord::new(ts, vec![0xAB; 54]);
        let mut out = Vec::new();
        record.encode_into(&mut out);
        assert_eq!(out.len(), 16 + 54);
        assert_eq!(be32(&out[0..]), 1_700_000_000);
        assert_eq!(be32(&out[4..]), 250_000);
        assert_eq!(be32(&out[8..]), 54);
        assert_eq!(be32(&out[12..]), 54);
    }
}

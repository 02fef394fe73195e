//! Wire-level constants and small value types shared by the encoder.

use std::fmt;
use std::ops::BitOr;

pub const PCAP_MAGIC: u32 = 0xA1B2_C3D4;
pub const PCAP_VERSION_MAJOR: u16 = 2;
pub const PCAP_VERSION_MINOR: u16 = 4;
pub const PCAP_SNAPLEN: u32 = 0xFFFF;
pub const LINKTYPE_ETHERNET: u32 = 1;

/// Synthetic MACs from the documentation range (RFC 7042).
pub const DST_MAC: [u8; 6] = [0x00, 0x00, 0x5E, 0x00, 0x53, 0xFF];
pub const SRC_MAC: [u8; 6] = [0x00, 0x00, 0x5E, 0x00, 0x53, 0x00];
pub const ETHERTYPE_IPV4: u16 = 0x0800;

pub const GLOBAL_HEADER_LEN: usize = 24;
pub const RECORD_HEADER_LEN: usize = 16;
pub const ETHERNET_HEADER_LEN: usize = 14;
pub const IPV4_HEADER_LEN: usize = 20;
pub const TCP_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

pub const IPV4_TTL: u8 = 0xFF;
/// IPv4 header checksum is never computed.
pub const IPV4_CHECKSUM_PLACEHOLDER: u16 = 0;
/// TCP/UDP checksum placeholder. Non-zero so it is not read as "checksum disabled".
pub const L4_CHECKSUM_PLACEHOLDER: u16 = 1;
pub const TCP_WINDOW: u16 = 0xFFFF;
/// Data offset of 5 words, no options.
pub const TCP_DATA_OFFSET: u8 = 0x50;

/// Largest payload that fits a single IPv4 packet with a TCP header.
pub const MAX_TCP_PAYLOAD: usize = 0xFFFF - (IPV4_HEADER_LEN + TCP_HEADER_LEN);
/// Largest payload that fits a single IPv4 packet with a UDP header.
pub const MAX_UDP_PAYLOAD: usize = 0xFFFF - (IPV4_HEADER_LEN + UDP_HEADER_LEN);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProtocol {
    Tcp,
    Udp,
}

impl IpProtocol {
    pub fn number(self) -> u8 {
        match self {
            IpProtocol::Tcp => 6,
            IpProtocol::Udp => 17,
        }
    }
}

/// TCP control bits as written in the flags byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const FIN: TcpFlags = TcpFlags(0x01);
    pub const SYN: TcpFlags = TcpFlags(0x02);
    pub const RST: TcpFlags = TcpFlags(0x04);
    pub const ACK: TcpFlags = TcpFlags(0x10);
    pub const SYN_ACK: TcpFlags = TcpFlags(0x12);
    pub const FIN_ACK: TcpFlags = TcpFlags(0x11);
    pub const RST_ACK: TcpFlags = TcpFlags(0x14);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        TcpFlags(bits)
    }

    pub const fn contains(self, other: TcpFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TcpFlags {
    type Output = TcpFlags;

    fn bitor(self, rhs: TcpFlags) -> TcpFlags {
        TcpFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (TcpFlags::SYN, "SYN"),
            (TcpFlags::FIN, "FIN"),
            (TcpFlags::RST, "RST"),
            (TcpFlags::ACK, "ACK"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "TcpFlags({:#04x})", self.0)
        } else {
            write!(f, "{}", set.join("+"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_flags_match_wire_values() {
        assert_eq!((TcpFlags::SYN | TcpFlags::ACK).bits(), 0x12);
        assert_eq!((TcpFlags::FIN | TcpFlags::ACK).bits(), 0x11);
        assert_eq!((TcpFlags::RST | TcpFlags::ACK).bits(), 0x14);
        assert_eq!(TcpFlags::SYN_ACK, TcpFlags::SYN | TcpFlags::ACK);
    }

    #[test]
    fn debug_lists_set_bits() {
        assert_eq!(format!("{:?}", TcpFlags::FIN_ACK), "FIN+ACK");
        assert_eq!(format!("{:?}", TcpFlags::from_bits(0)), "TcpFlags(0x00)");
    }

    #[test]
    fn payload_limits_leave_room_for_headers() {
        assert_eq!(MAX_TCP_PAYLOAD, 65495);
        assert_eq!(MAX_UDP_PAYLOAD, 65507);
    }
}

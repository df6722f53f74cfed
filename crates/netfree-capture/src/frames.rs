//! Link, network and transport header decoding
//!
//! Bounds-checked views over Ethernet II (with optional 802.1Q tag),
//! IPv4, IPv6 and TCP headers. Only the fields the scanner needs are
//! decoded; payloads are never copied.

use std::net::{Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ByteOrder};
use netfree_evasion::MacAddress;

use crate::error::{CaptureError, Result};

/// Ethernet II header length
pub const ETHERNET_HEADER_LEN: usize = 14;
/// Length of an 802.1Q tag
pub const VLAN_TAG_LEN: usize = 4;

/// IPv4 ethertype
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// ARP ethertype
pub const ETHERTYPE_ARP: u16 = 0x0806;
/// 802.1Q VLAN ethertype
pub const ETHERTYPE_VLAN: u16 = 0x8100;
/// IPv6 ethertype
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

/// IP protocol number for TCP
pub const IPPROTO_TCP: u8 = 6;
/// IP protocol number for UDP
pub const IPPROTO_UDP: u8 = 17;

const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const TCP_MIN_HEADER_LEN: usize = 20;

fn mac_at(data: &[u8], offset: usize) -> MacAddress {
    let mut bytes = [0u8; 6];
    bytes.copy_from_slice(&data[offset..offset + 6]);
    MacAddress::new(bytes)
}

fn ensure_len(data: &[u8], needed: usize, what: &str) -> Result<()> {
    if data.len() < needed {
        return Err(CaptureError::InvalidFrame(format!(
            "{} needs {} bytes, got {}",
            what,
            needed,
            data.len()
        )));
    }
    Ok(())
}

/// Ethernet II header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    /// Destination address
    pub destination: MacAddress,
    /// Source address
    pub source: MacAddress,
    /// Ethertype of the payload (after any VLAN tag)
    pub ethertype: u16,
    /// VLAN id when the frame carried an 802.1Q tag
    pub vlan: Option<u16>,
}

impl EthernetHeader {
    /// Parse an Ethernet header, returning it and the payload offset
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        ensure_len(data, ETHERNET_HEADER_LEN, "Ethernet header")?;

        let destination = mac_at(data, 0);
        let source = mac_at(data, 6);
        let mut ethertype = BigEndian::read_u16(&data[12..14]);
        let mut offset = ETHERNET_HEADER_LEN;
        let mut vlan = None;

        if ethertype == ETHERTYPE_VLAN {
            ensure_len(data, ETHERNET_HEADER_LEN + VLAN_TAG_LEN, "802.1Q tag")?;
            vlan = Some(BigEndian::read_u16(&data[14..16]) & 0x0FFF);
            ethertype = BigEndian::read_u16(&data[16..18]);
            offset += VLAN_TAG_LEN;
        }

        Ok((
            Self {
                destination,
                source,
                ethertype,
                vlan,
            },
            offset,
        ))
    }
}

/// IPv4 header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Header length in bytes (IHL * 4)
    pub header_len: usize,
    /// Total datagram length
    pub total_len: u16,
    /// Time to live
    pub ttl: u8,
    /// Payload protocol number
    pub protocol: u8,
    /// Source address
    pub source: Ipv4Addr,
    /// Destination address
    pub destination: Ipv4Addr,
}

impl Ipv4Header {
    /// Flags/fragment offset field: more fragments
    pub const MORE_FRAGMENTS: u16 = 0x2000;

    /// Parse an IPv4 header
    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, IPV4_MIN_HEADER_LEN, "IPv4 header")?;

        let version = data[0] >> 4;
        if version != 4 {
            return Err(CaptureError::InvalidFrame(format!(
                "IPv4 header with version {}",
                version
            )));
        }

        let ihl = usize::from(data[0] & 0x0F);
        if ihl < 5 {
            return Err(CaptureError::InvalidFrame(format!("IPv4 IHL {} < 5", ihl)));
        }
        let header_len = ihl * 4;
        ensure_len(data, header_len, "IPv4 options")?;

        Ok(Self {
            header_len,
            total_len: BigEndian::read_u16(&data[2..4]),
            ttl: data[8],
            protocol: data[9],
            source: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            destination: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        })
    }
}

/// IPv6 fixed header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Header {
    /// Payload length
    pub payload_len: u16,
    /// Next header (protocol of the payload when no extension headers)
    pub next_header: u8,
    /// Hop limit
    pub hop_limit: u8,
    /// Source address
    pub source: Ipv6Addr,
    /// Destination address
    pub destination: Ipv6Addr,
}

impl Ipv6Header {
    /// Parse an IPv6 fixed header
    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, IPV6_HEADER_LEN, "IPv6 header")?;

        let version = data[0] >> 4;
        if version != 6 {
            return Err(CaptureError::InvalidFrame(format!(
                "IPv6 header with version {}",
                version
            )));
        }

        let mut source = [0u8; 16];
        source.copy_from_slice(&data[8..24]);
        let mut destination = [0u8; 16];
        destination.copy_from_slice(&data[24..40]);

        Ok(Self {
            payload_len: BigEndian::read_u16(&data[4..6]),
            next_header: data[6],
            hop_limit: data[7],
            source: Ipv6Addr::from(source),
            destination: Ipv6Addr::from(destination),
        })
    }
}

/// TCP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    /// Source port
    pub source_port: u16,
    /// Destination port
    pub destination_port: u16,
    /// Sequence number
    pub sequence: u32,
    /// Acknowledgement number
    pub ack: u32,
    /// Header length in bytes (data offset * 4)
    pub header_len: usize,
    /// Flag bits (CWR..FIN)
    pub flags: u8,
    /// Receive window
    pub window: u16,
}

impl TcpHeader {
    /// FIN flag
    pub const FIN: u8 = 0x01;
    /// SYN flag
    pub const SYN: u8 = 0x02;
    /// RST flag
    pub const RST: u8 = 0x04;
    /// PSH flag
    pub const PSH: u8 = 0x08;
    /// ACK flag
    pub const ACK: u8 = 0x10;
    /// URG flag
    pub const URG: u8 = 0x20;

    /// Parse a TCP header
    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, TCP_MIN_HEADER_LEN, "TCP header")?;

        let header_len = usize::from(data[12] >> 4) * 4;
        if header_len < TCP_MIN_HEADER_LEN {
            return Err(CaptureError::InvalidFrame(format!(
                "TCP data offset {} too small",
                header_len
            )));
        }

        Ok(Self {
            source_port: BigEndian::read_u16(&data[0..2]),
            destination_port: BigEndian::read_u16(&data[2..4]),
            sequence: BigEndian::read_u32(&data[4..8]),
            ack: BigEndian::read_u32(&data[8..12]),
            header_len,
            flags: data[13],
            window: BigEndian::read_u16(&data[14..16]),
        })
    }

    /// Check a flag bit
    #[must_use]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// SYN set
    #[must_use]
    pub fn is_syn(&self) -> bool {
        self.has_flag(Self::SYN)
    }

    /// ACK set
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.has_flag(Self::ACK)
    }

    /// FIN set
    #[must_use]
    pub fn is_fin(&self) -> bool {
        self.has_flag(Self::FIN)
    }

    /// RST set
    #[must_use]
    pub fn is_rst(&self) -> bool {
        self.has_flag(Self::RST)
    }
}

/// Network layer of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkHeader {
    /// IPv4
    V4(Ipv4Header),
    /// IPv6
    V6(Ipv6Header),
}

impl NetworkHeader {
    /// Payload protocol number
    #[must_use]
    pub fn protocol(&self) -> u8 {
        match self {
            NetworkHeader::V4(h) => h.protocol,
            NetworkHeader::V6(h) => h.next_header,
        }
    }
}

/// A frame decoded as far as its headers allow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Link layer
    pub ethernet: EthernetHeader,
    /// Network layer, when IPv4 or IPv6
    pub network: Option<NetworkHeader>,
    /// TCP header, when the payload is TCP
    pub tcp: Option<TcpHeader>,
}

impl DecodedFrame {
    /// Check if the frame carries TCP over IPv4/IPv6
    #[must_use]
    pub fn is_tcp(&self) -> bool {
        self.tcp.is_some()
    }

    /// Check if the frame carries IP
    #[must_use]
    pub fn is_ip(&self) -> bool {
        self.network.is_some()
    }
}

/// Decode an Ethernet frame
///
/// The Ethernet header must be complete. A malformed network or TCP
/// header is an error; non-IP payloads decode with `network == None`.
pub fn decode_frame(data: &[u8]) -> Result<DecodedFrame> {
    let (ethernet, offset) = EthernetHeader::parse(data)?;
    let payload = &data[offset..];

    let network = match ethernet.ethertype {
        ETHERTYPE_IPV4 => Some(NetworkHeader::V4(Ipv4Header::parse(payload)?)),
        ETHERTYPE_IPV6 => Some(NetworkHeader::V6(Ipv6Header::parse(payload)?)),
        _ => None,
    };

    let tcp = match network {
        Some(NetworkHeader::V4(ip)) if ip.protocol == IPPROTO_TCP => {
            Some(TcpHeader::parse(&payload[ip.header_len..])?)
        }
        Some(NetworkHeader::V6(ip)) if ip.next_header == IPPROTO_TCP => {
            Some(TcpHeader::parse(&payload[IPV6_HEADER_LEN..])?)
        }
        _ => None,
    };

    Ok(DecodedFrame {
        ethernet,
        network,
        tcp,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const DST: [u8; 6] = [0xA4, 0x2B, 0xB0, 0x11, 0x22, 0x33];
    pub(crate) const SRC: [u8; 6] = [0x3C, 0x22, 0xFB, 0x44, 0x55, 0x66];

    pub(crate) fn ipv4_tcp_frame(flags: u8) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&DST);
        frame.extend_from_slice(&SRC);
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        // IPv4, IHL 5, total length 40, TTL 64, TCP
        frame.extend_from_slice(&[0x45, 0x00, 0x00, 0x28, 0, 0, 0x40, 0, 64, IPPROTO_TCP, 0, 0]);
        frame.extend_from_slice(&[192, 168, 1, 23]);
        frame.extend_from_slice(&[93, 184, 216, 34]);
        // TCP 51000 -> 443, data offset 5
        frame.extend_from_slice(&51000u16.to_be_bytes());
        frame.extend_from_slice(&443u16.to_be_bytes());
        frame.extend_from_slice(&1u32.to_be_bytes());
        frame.extend_from_slice(&0u32.to_be_bytes());
        frame.extend_from_slice(&[0x50, flags, 0xFF, 0xFF, 0, 0, 0, 0]);
        frame
    }

    #[test]
    fn test_decode_ipv4_tcp() {
        let decoded = decode_frame(&ipv4_tcp_frame(TcpHeader::SYN)).unwrap();
        assert_eq!(decoded.ethernet.destination, MacAddress::new(DST));
        assert_eq!(decoded.ethernet.source, MacAddress::new(SRC));
        assert_eq!(decoded.ethernet.ethertype, ETHERTYPE_IPV4);

        let Some(NetworkHeader::V4(ip)) = decoded.network else {
            panic!("expected IPv4");
        };
        assert_eq!(ip.source, Ipv4Addr::new(192, 168, 1, 23));
        assert_eq!(ip.ttl, 64);

        let tcp = decoded.tcp.unwrap();
        assert_eq!(tcp.source_port, 51000);
        assert_eq!(tcp.destination_port, 443);
        assert!(tcp.is_syn());
        assert!(!tcp.is_ack());
    }

    #[test]
    fn test_decode_vlan_tagged() {
        let plain = ipv4_tcp_frame(TcpHeader::ACK);
        let mut tagged = plain[..12].to_vec();
        tagged.extend_from_slice(&ETHERTYPE_VLAN.to_be_bytes());
        tagged.extend_from_slice(&0x0064u16.to_be_bytes());
        tagged.extend_from_slice(&plain[12..]);

        let decoded = decode_frame(&tagged).unwrap();
        assert_eq!(decoded.ethernet.vlan, Some(100));
        assert!(decoded.is_tcp());
    }

    #[test]
    fn test_decode_arp_is_not_ip() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0xFF; 6]);
        frame.extend_from_slice(&SRC);
        frame.extend_from_slice(&ETHERTYPE_ARP.to_be_bytes());
        frame.extend_from_slice(&[0u8; 28]);

        let decoded = decode_frame(&frame).unwrap();
        assert!(!decoded.is_ip());
        assert!(!decoded.is_tcp());
        assert!(decoded.ethernet.destination.is_broadcast());
    }

    #[test]
    fn test_truncated_frames_are_rejected() {
        let frame = ipv4_tcp_frame(TcpHeader::ACK);
        assert!(decode_frame(&frame[..10]).is_err());
        assert!(decode_frame(&frame[..20]).is_err());
        assert!(decode_frame(&frame[..40]).is_err());
    }

    #[test]
    fn test_bad_ihl_is_rejected() {
        let mut frame = ipv4_tcp_frame(TcpHeader::ACK);
        frame[ETHERNET_HEADER_LEN] = 0x44;
        assert!(matches!(decode_frame(&frame), Err(CaptureError::InvalidFrame(_))));
    }

    #[test]
    fn test_decode_ipv6_tcp() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&DST);
        frame.extend_from_slice(&SRC);
        frame.extend_from_slice(&ETHERTYPE_IPV6.to_be_bytes());
        frame.extend_from_slice(&[0x60, 0, 0, 0, 0x00, 0x14, IPPROTO_TCP, 64]);
        frame.extend_from_slice(&[0xFE, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        frame.extend_from_slice(&[0xFE, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
        frame.extend_from_slice(&ipv4_tcp_frame(TcpHeader::FIN)[34..]);

        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.network.unwrap().protocol(), IPPROTO_TCP);
        assert!(decoded.tcp.unwrap().is_fin());
    }
}

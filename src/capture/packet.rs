//! Manual frame decoder (§9 "Packet parsing"): Ethernet/VLAN, ARP, IPv4,
//! TCP/UDP, by fixed byte offset. No reflective packet library and no
//! IPv6/TSN/PTP support — this system only needs enough structure to feed
//! the five protocol handlers in §4.G.

use std::net::Ipv4Addr;

use pnet::util::MacAddr;

pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV4: u16 = 0x0800;

pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

pub const BROADCAST_MAC: MacAddr = MacAddr(0xff, 0xff, 0xff, 0xff, 0xff, 0xff);
pub const BROADCAST_IP: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);

#[derive(Debug, Clone, Copy)]
pub struct ArpInfo {
    pub operation: u16,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

#[derive(Debug, Clone, Copy)]
pub enum Transport<'a> {
    Tcp {
        src_port: u16,
        dst_port: u16,
        seq: u32,
        payload: &'a [u8],
    },
    Udp {
        src_port: u16,
        dst_port: u16,
        payload: &'a [u8],
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Ipv4Info<'a> {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub ttl: u8,
    pub transport: Option<Transport<'a>>,
}

#[derive(Debug, Clone, Copy)]
pub struct ParsedFrame<'a> {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub arp: Option<ArpInfo>,
    pub ipv4: Option<Ipv4Info<'a>>,
}

fn read_mac(data: &[u8], offset: usize) -> MacAddr {
    MacAddr(
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
        data[offset + 4],
        data[offset + 5],
    )
}

fn read_ipv4(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(data[offset], data[offset + 1], data[offset + 2], data[offset + 3])
}

/// Decode a captured Ethernet frame. Returns `None` for frames too short to
/// contain a full Ethernet header, or whose ethertype carries no payload we
/// care about (IEEE 802.3/LLC, IPv6, anything else).
pub fn parse(data: &[u8]) -> Option<ParsedFrame<'_>> {
    if data.len() < 14 {
        return None;
    }

    let dst_mac = read_mac(data, 0);
    let src_mac = read_mac(data, 6);

    let mut offset = 12;
    let mut ethertype = u16::from_be_bytes([data[offset], data[offset + 1]]);

    // VLAN tag: skip the 4-byte TCI, ethertype follows.
    if ethertype == 0x8100 {
        if data.len() < 18 {
            return None;
        }
        offset = 16;
        ethertype = u16::from_be_bytes([data[offset], data[offset + 1]]);
    }

    let payload_offset = offset + 2;

    match ethertype {
        ETHERTYPE_ARP => {
            let arp = parse_arp(data, payload_offset)?;
            Some(ParsedFrame {
                src_mac,
                dst_mac,
                arp: Some(arp),
                ipv4: None,
            })
        }
        ETHERTYPE_IPV4 => {
            let ipv4 = parse_ipv4(data, payload_offset)?;
            Some(ParsedFrame {
                src_mac,
                dst_mac,
                arp: None,
                ipv4: Some(ipv4),
            })
        }
        _ => None,
    }
}

fn parse_arp(data: &[u8], offset: usize) -> Option<ArpInfo> {
    if data.len() < offset + 28 {
        return None;
    }
    Some(ArpInfo {
        operation: u16::from_be_bytes([data[offset + 6], data[offset + 7]]),
        sender_mac: read_mac(data, offset + 8),
        sender_ip: read_ipv4(data, offset + 14),
        target_mac: read_mac(data, offset + 18),
        target_ip: read_ipv4(data, offset + 24),
    })
}

fn parse_ipv4(data: &[u8], offset: usize) -> Option<Ipv4Info<'_>> {
    if data.len() < offset + 20 {
        return None;
    }

    let ihl = (data[offset] & 0x0f) as usize * 4;
    if ihl < 20 || data.len() < offset + ihl {
        return None;
    }

    let ttl = data[offset + 8];
    let protocol = data[offset + 9];
    let src_ip = read_ipv4(data, offset + 12);
    let dst_ip = read_ipv4(data, offset + 16);
    let transport_offset = offset + ihl;

    let transport = match protocol {
        PROTO_TCP if data.len() >= transport_offset + 20 => Some(Transport::Tcp {
            src_port: u16::from_be_bytes([data[transport_offset], data[transport_offset + 1]]),
            dst_port: u16::from_be_bytes([data[transport_offset + 2], data[transport_offset + 3]]),
            seq: u32::from_be_bytes([
                data[transport_offset + 4],
                data[transport_offset + 5],
                data[transport_offset + 6],
                data[transport_offset + 7],
            ]),
            payload: {
                let data_offset = ((data[transport_offset + 12] >> 4) as usize) * 4;
                let payload_start = transport_offset + data_offset.max(20);
                data.get(payload_start..).unwrap_or(&[])
            },
        }),
        PROTO_UDP if data.len() >= transport_offset + 8 => Some(Transport::Udp {
            src_port: u16::from_be_bytes([data[transport_offset], data[transport_offset + 1]]),
            dst_port: u16::from_be_bytes([data[transport_offset + 2], data[transport_offset + 3]]),
            payload: data.get(transport_offset + 8..).unwrap_or(&[]),
        }),
        _ => None,
    };

    Some(Ipv4Info {
        src_ip,
        dst_ip,
        ttl,
        transport,
    })
}

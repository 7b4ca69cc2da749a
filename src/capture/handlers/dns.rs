//! DNS query/response handler (§4.G). Extracts the queried name and, for
//! responses, every A-record IPv4 address, and records a hostname row per
//! IP (or a single empty-IP sentinel row if there were no A records).

use std::net::Ipv4Addr;

use pnet::util::MacAddr;
use tracing::debug;

use crate::state::AppState;
use crate::store::{devices, hostnames};

const TYPE_A: u16 = 1;
const FLAG_QR_RESPONSE: u16 = 0x8000;

fn skip_name(data: &[u8], mut cursor: usize) -> Option<usize> {
    loop {
        let len = *data.get(cursor)?;
        if len == 0 {
            return Some(cursor + 1);
        }
        if len & 0xc0 == 0xc0 {
            // Compression pointer: 2 bytes total, no further labels follow here.
            return Some(cursor + 2);
        }
        cursor += 1 + len as usize;
    }
}

fn decode_name(data: &[u8], mut cursor: usize) -> Option<String> {
    let mut labels = Vec::new();
    loop {
        let len = *data.get(cursor)?;
        if len == 0 {
            break;
        }
        if len & 0xc0 == 0xc0 {
            let pointer = (((len & 0x3f) as usize) << 8) | (*data.get(cursor + 1)? as usize);
            if let Some(rest) = decode_name(data, pointer) {
                labels.push(rest);
            }
            return Some(labels.join("."));
        }
        let label = data.get(cursor + 1..cursor + 1 + len as usize)?;
        labels.push(String::from_utf8_lossy(label).to_string());
        cursor += 1 + len as usize;
    }
    Some(labels.join("."))
}

struct ParsedDns {
    qname: String,
    a_records: Vec<Ipv4Addr>,
}

fn parse_dns(payload: &[u8]) -> Option<ParsedDns> {
    if payload.len() < 12 {
        return None;
    }
    let flags = u16::from_be_bytes([payload[2], payload[3]]);
    let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
    let ancount = u16::from_be_bytes([payload[6], payload[7]]);

    if qdcount == 0 {
        return None;
    }

    let qname = decode_name(payload, 12)?;
    let mut cursor = skip_name(payload, 12)?;
    cursor += 4; // QTYPE + QCLASS

    let mut a_records = Vec::new();
    if flags & FLAG_QR_RESPONSE != 0 {
        for _ in 0..ancount {
            cursor = skip_name(payload, cursor)?;
            let rtype = u16::from_be_bytes([*payload.get(cursor)?, *payload.get(cursor + 1)?]);
            let rdlength =
                u16::from_be_bytes([*payload.get(cursor + 8)?, *payload.get(cursor + 9)?]) as usize;
            let rdata_start = cursor + 10;
            let rdata = payload.get(rdata_start..rdata_start + rdlength)?;

            if rtype == TYPE_A && rdlength == 4 {
                a_records.push(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]));
            }
            cursor = rdata_start + rdlength;
        }
    }

    Some(ParsedDns { qname, a_records })
}

pub async fn handle(
    state: &AppState,
    src_mac: MacAddr,
    dst_mac: MacAddr,
    udp_payload: &[u8],
    now: i64,
) -> anyhow::Result<()> {
    let network = state.network_snapshot().await;
    let device_mac = if network.host_mac == src_mac {
        dst_mac
    } else if network.host_mac == dst_mac {
        src_mac
    } else {
        return Ok(());
    };

    let Some(gateway_mac) = devices::gateway_mac(&state.store).await? else {
        return Ok(());
    };
    let device_mac_str = device_mac.to_string();
    if device_mac_str == gateway_mac {
        return Ok(());
    }

    let Some(parsed) = parse_dns(udp_payload) else {
        return Ok(());
    };

    let mut hostname = parsed.qname.to_lowercase();
    if hostname.ends_with('.') {
        hostname.pop();
    }
    if hostname.is_empty() {
        return Ok(());
    }

    let ips: Vec<String> = if parsed.a_records.is_empty() {
        vec![String::new()]
    } else {
        parsed.a_records.iter().map(|ip| ip.to_string()).collect()
    };

    for ip in &ips {
        hostnames::insert_or_ignore(&state.store, &device_mac_str, ip, &hostname, "dns", now).await?;
    }

    debug!(device = device_mac_str, hostname, ips = ?ips, "DNS hostname learned");
    Ok(())
}

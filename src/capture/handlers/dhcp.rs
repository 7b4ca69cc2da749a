//! DHCP hostname handler (§4.G). Parses the BOOTP option block out of the
//! UDP payload; full DHCP semantics (lease negotiation, etc.) are out of
//! scope — only the `hostname` option (12) is consumed.

use pnet::util::MacAddr;
use tracing::debug;

use crate::capture::packet::Transport;
use crate::state::AppState;
use crate::store::devices;

const BOOTP_FIXED_LEN: usize = 236;
const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
const OPTION_HOSTNAME: u8 = 12;
const OPTION_END: u8 = 255;
const OPTION_PAD: u8 = 0;

fn parse_hostname(udp_payload: &[u8]) -> Option<String> {
    if udp_payload.len() < BOOTP_FIXED_LEN + 4 || udp_payload[BOOTP_FIXED_LEN..BOOTP_FIXED_LEN + 4] != MAGIC_COOKIE {
        return None;
    }

    let mut cursor = BOOTP_FIXED_LEN + 4;
    while cursor < udp_payload.len() {
        let code = udp_payload[cursor];
        if code == OPTION_END {
            break;
        }
        if code == OPTION_PAD {
            cursor += 1;
            continue;
        }
        let len = *udp_payload.get(cursor + 1)? as usize;
        let value = udp_payload.get(cursor + 2..cursor + 2 + len)?;
        if code == OPTION_HOSTNAME {
            return std::str::from_utf8(value).ok().map(|s| s.to_string());
        }
        cursor += 2 + len;
    }
    None
}

pub async fn handle(
    state: &AppState,
    dst_mac: MacAddr,
    src_mac: MacAddr,
    src_ip: std::net::Ipv4Addr,
    transport: &Transport<'_>,
    now: i64,
) -> anyhow::Result<()> {
    const BROADCAST: MacAddr = MacAddr(0xff, 0xff, 0xff, 0xff, 0xff, 0xff);
    if dst_mac != BROADCAST {
        return Ok(());
    }

    let Transport::Udp { payload, .. } = transport else {
        return Ok(());
    };

    let Some(hostname) = parse_hostname(payload) else {
        return Ok(());
    };
    if hostname.is_empty() {
        return Ok(());
    }

    let network = state.network_snapshot().await;
    if src_mac == network.host_mac {
        return Ok(());
    }

    let mac = src_mac.to_string();
    let ip = src_ip.to_string();
    devices::upsert_from_dhcp(
        &state.store,
        &mac,
        &ip,
        &hostname,
        state.config.inspect_every_device_by_default,
        now,
    )
    .await?;

    debug!(mac, hostname, "DHCP hostname learned");
    Ok(())
}

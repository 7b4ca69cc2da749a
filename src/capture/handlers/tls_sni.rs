//! TLS SNI handler (§4.G). Only considered for client→server traffic
//! redirected to this host by ARP poisoning (dst_mac == host_mac).

use std::net::Ipv4Addr;

use pnet::util::MacAddr;
use tracing::debug;

use crate::capture::tls;
use crate::state::AppState;
use crate::store::hostnames;

pub async fn handle(
    state: &AppState,
    src_mac: MacAddr,
    dst_mac: MacAddr,
    dst_ip: Ipv4Addr,
    tcp_payload: &[u8],
    now: i64,
) -> anyhow::Result<()> {
    let network = state.network_snapshot().await;
    if dst_mac != network.host_mac {
        return Ok(());
    }

    let Some(sni) = tls::extract_sni(tcp_payload) else {
        return Ok(());
    };

    let mac = src_mac.to_string();
    let ip = dst_ip.to_string();
    hostnames::insert_or_ignore(&state.store, &mac, &ip, &sni, "sni", now).await?;

    debug!(mac, ip, sni, "SNI hostname learned");
    Ok(())
}

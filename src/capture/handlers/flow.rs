//! Flow aggregator handler (§4.G). Rewrites the host-impersonated side of a
//! redirected flow back to the real peer MAC before upserting.

use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;

use pnet::util::MacAddr;
use tracing::debug;

use crate::capture::packet::{BROADCAST_IP, BROADCAST_MAC};
use crate::state::AppState;
use crate::store::{devices, flows};

const HOSTNAME_BACKFILL_PERIOD_SECS: i64 = 2;

#[allow(clippy::too_many_arguments)]
pub async fn handle(
    state: &AppState,
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    protocol: &str,
    byte_len: u32,
    tcp_seq: Option<u32>,
    now: i64,
) -> anyhow::Result<()> {
    if dst_mac == BROADCAST_MAC || dst_ip == BROADCAST_IP {
        return Ok(());
    }

    let network = state.network_snapshot().await;

    let (resolved_src_mac, resolved_dst_mac) = if src_mac == network.host_mac {
        let Some(real_mac) = devices::mac_by_ip(&state.store, &src_ip.to_string()).await? else {
            return Ok(());
        };
        (real_mac, dst_mac.to_string())
    } else if dst_mac == network.host_mac {
        let Some(real_mac) = devices::mac_by_ip(&state.store, &dst_ip.to_string()).await? else {
            return Ok(());
        };
        (src_mac.to_string(), real_mac)
    } else {
        return Ok(());
    };

    let obs = flows::FlowObservation {
        timestamp: now,
        src_mac: &resolved_src_mac,
        dest_mac: &resolved_dst_mac,
        src_ip: &src_ip.to_string(),
        dest_ip: &dst_ip.to_string(),
        src_port,
        dest_port: dst_port,
        protocol,
        byte_len,
        tcp_seq,
    };
    flows::upsert(&state.store, &obs).await?;

    debug!(protocol, src_port, dst_port, byte_len, "flow recorded");

    maybe_backfill_hostnames(state, now).await?;
    Ok(())
}

async fn maybe_backfill_hostnames(state: &AppState, now: i64) -> anyhow::Result<()> {
    let last_run = state.flow_backfill_last_run.load(Ordering::SeqCst);
    if now - last_run < HOSTNAME_BACKFILL_PERIOD_SECS {
        return Ok(());
    }
    state.flow_backfill_last_run.store(now, Ordering::SeqCst);
    let affected = flows::backfill_hostnames(&state.store).await?;
    if affected > 0 {
        debug!(affected, "flow hostname backfill");
    }
    Ok(())
}

//! Packet classifier (§4.F): dispatches a decoded frame to protocol
//! handlers in first-match order. Any handler failure is caught, logged
//! with context, and the frame is discarded — never propagated back to the
//! capture loop.

use tracing::warn;

use super::handlers;
use super::packet::{self, Transport};
use crate::state::AppState;
use crate::store;

const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;
const DNS_PORT: u16 = 53;

/// Classify and dispatch one raw Ethernet frame.
pub async fn handle_frame(state: &AppState, data: &[u8]) {
    let now = store::now_ts();

    let Some(frame) = packet::parse(data) else {
        return;
    };

    if let Some(arp) = frame.arp {
        if let Err(err) = handlers::arp::handle(state, &arp, now).await {
            warn!(error = ?err, "ARP handler failed");
        }
        return;
    }

    let Some(ipv4) = frame.ipv4 else {
        return;
    };

    if let Some(Transport::Udp { dst_port, .. }) = &ipv4.transport {
        if *dst_port == DHCP_SERVER_PORT || *dst_port == DHCP_CLIENT_PORT {
            if let Err(err) = handlers::dhcp::handle(
                state,
                frame.dst_mac,
                frame.src_mac,
                ipv4.src_ip,
                ipv4.transport.as_ref().unwrap(),
                now,
            )
            .await
            {
                warn!(error = ?err, "DHCP handler failed");
            }
            return;
        }
    }

    let network = state.network_snapshot().await;
    if ipv4.src_ip == network.host_ip || ipv4.dst_ip == network.host_ip {
        return;
    }

    if let Some(Transport::Udp { src_port, dst_port, payload }) = &ipv4.transport {
        if *src_port == DNS_PORT || *dst_port == DNS_PORT {
            if let Err(err) = handlers::dns::handle(state, frame.src_mac, frame.dst_mac, payload, now).await {
                warn!(error = ?err, "DNS handler failed");
            }
            return;
        }
    }

    match ipv4.transport {
        Some(Transport::Tcp {
            src_port,
            dst_port,
            seq,
            payload,
        }) => {
            if let Err(err) =
                handlers::tls_sni::handle(state, frame.src_mac, frame.dst_mac, ipv4.dst_ip, payload, now).await
            {
                warn!(error = ?err, "TLS SNI handler failed");
            }
            if let Err(err) = handlers::flow::handle(
                state,
                frame.src_mac,
                frame.dst_mac,
                ipv4.src_ip,
                ipv4.dst_ip,
                src_port,
                dst_port,
                "tcp",
                data.len() as u32,
                Some(seq),
                now,
            )
            .await
            {
                warn!(error = ?err, "flow handler failed");
            }
        }
        Some(Transport::Udp { src_port, dst_port, .. }) => {
            if let Err(err) = handlers::flow::handle(
                state,
                frame.src_mac,
                frame.dst_mac,
                ipv4.src_ip,
                ipv4.dst_ip,
                src_port,
                dst_port,
                "udp",
                data.len() as u32,
                None,
                now,
            )
            .await
            {
                warn!(error = ?err, "flow handler failed");
            }
        }
        None => {}
    }
}

/// Continuously drain the capture queue, dispatching each frame in turn.
/// This amortizes lock acquisition cost versus one packet per wake-up (§9).
pub async fn drain_loop(state: std::sync::Arc<AppState>, queue: std::sync::Arc<super::CaptureQueue>) {
    loop {
        let frames = queue.drain().await;
        for frame in frames {
            handle_frame(&state, &frame).await;
        }
    }
}

//! ARP-learn handler (§4.G).

use std::net::Ipv4Addr;

use tracing::debug;

use crate::capture::packet::ArpInfo;
use crate::state::AppState;
use crate::store::devices;

pub async fn handle(state: &AppState, arp: &ArpInfo, now: i64) -> anyhow::Result<()> {
    if arp.operation != 1 && arp.operation != 2 {
        return Ok(());
    }

    let network = state.network_snapshot().await;
    if arp.sender_mac == network.host_mac {
        return Ok(());
    }
    if arp.sender_ip == Ipv4Addr::UNSPECIFIED {
        return Ok(());
    }

    let is_gateway = arp.sender_ip == network.gateway_ip;
    let mac = arp.sender_mac.to_string();
    let ip = arp.sender_ip.to_string();

    devices::upsert_from_arp(
        &state.store,
        &mac,
        &ip,
        is_gateway,
        state.config.inspect_every_device_by_default,
        now,
    )
    .await?;
    devices::backfill_oui_vendor(&state.store, &state.oui).await?;

    debug!(mac, ip, is_gateway, "ARP learn");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::packet::ArpInfo;
    use crate::config::AppConfig;
    use crate::oui::OuiDatabase;
    use crate::state::NetworkInfo;
    use pnet::util::MacAddr;

    fn test_network() -> NetworkInfo {
        NetworkInfo {
            host_ip: Ipv4Addr::new(192, 168, 1, 10),
            host_mac: MacAddr(0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa),
            gateway_ip: Ipv4Addr::new(192, 168, 1, 1),
            interface_name: "eth0".to_string(),
            subnet_ips: vec![],
        }
    }

    async fn test_state() -> AppState {
        let pool = crate::store::init("sqlite::memory:").await.unwrap();
        AppState::new(test_network(), pool, AppConfig::default(), OuiDatabase::parse(""))
    }

    #[tokio::test]
    async fn test_arp_learn_sets_gateway() {
        let state = test_state().await;
        let arp = ArpInfo {
            operation: 1,
            sender_mac: MacAddr(0xbb, 0xbb, 0xbb, 0, 0, 1),
            sender_ip: Ipv4Addr::new(192, 168, 1, 1),
            target_mac: MacAddr::zero(),
            target_ip: Ipv4Addr::new(192, 168, 1, 10),
        };
        handle(&state, &arp, 1000).await.unwrap();

        let gateway_mac = devices::gateway_mac(&state.store).await.unwrap();
        assert_eq!(gateway_mac.as_deref(), Some("bb:bb:bb:00:00:01"));
    }

    #[tokio::test]
    async fn test_arp_learn_ignores_own_spoofed_mac() {
        let state = test_state().await;
        let arp = ArpInfo {
            operation: 2,
            sender_mac: test_network().host_mac,
            sender_ip: Ipv4Addr::new(192, 168, 1, 1),
            target_mac: MacAddr::zero(),
            target_ip: Ipv4Addr::new(192, 168, 1, 10),
        };
        handle(&state, &arp, 1000).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM devices")
            .fetch_one(&state.store)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn test_arp_learn_ignores_zero_sender_ip() {
        let state = test_state().await;
        let arp = ArpInfo {
            operation: 1,
            sender_mac: MacAddr(0xcc, 0, 0, 0, 0, 1),
            sender_ip: Ipv4Addr::UNSPECIFIED,
            target_mac: MacAddr::zero(),
            target_ip: Ipv4Addr::new(192, 168, 1, 10),
        };
        handle(&state, &arp, 1000).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM devices")
            .fetch_one(&state.store)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }
}

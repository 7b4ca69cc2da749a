//! Passive mDNS discovery (§4.G's mDNS/SSDP enrichment contract). Browses
//! all advertised service types via a meta-query and, for each resolved
//! service, merges a `{device_name, device_properties}` entry into the
//! owning device's `metadata_json.mdns_json` — only if that key is still
//! absent (first-write-wins, §9).

use std::collections::HashSet;

use mdns_sd::{ServiceDaemon, ServiceEvent};
use tracing::{debug, info, warn};

use crate::state::AppState;
use crate::store::devices;

const META_SERVICE: &str = "_services._dns-sd._udp.local.";

pub async fn run(state: std::sync::Arc<AppState>) {
    info!("starting mDNS passive discovery");

    let daemon = match ServiceDaemon::new() {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "mDNS daemon unavailable, enrichment disabled");
            return;
        }
    };

    let receiver = match daemon.browse(META_SERVICE) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "failed to browse mDNS meta-service");
            return;
        }
    };

    let mut browsed_types: HashSet<String> = HashSet::new();

    loop {
        match receiver.recv_async().await {
            Ok(ServiceEvent::ServiceFound(_service_type, full_name)) => {
                let stype = normalize_service_type(&full_name);
                if !stype.is_empty() && browsed_types.insert(stype.clone()) {
                    if let Err(e) = daemon.browse(&stype) {
                        warn!(service_type = stype, error = %e, "failed to browse mDNS service type");
                    }
                }
            }
            Ok(ServiceEvent::ServiceResolved(info)) => {
                let hostname = info.get_hostname().trim_end_matches('.').to_string();
                let properties: serde_json::Map<String, serde_json::Value> = info
                    .get_properties()
                    .iter()
                    .map(|p| (p.key().to_string(), serde_json::Value::String(p.val_str().to_string())))
                    .collect();

                for addr in info.get_addresses() {
                    let ip = addr.to_ip_addr().to_string();
                    if let Err(e) = record_service(&state, &ip, &hostname, &properties).await {
                        warn!(ip, error = %e, "failed to record mDNS service");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "mDNS receiver error");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

fn normalize_service_type(full_name: &str) -> String {
    let trimmed = full_name.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.ends_with('.') {
        trimmed.to_string()
    } else {
        format!("{trimmed}.")
    }
}

async fn record_service(
    state: &AppState,
    ip: &str,
    hostname: &str,
    properties: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), sqlx::Error> {
    let Some(mac) = devices::mac_by_ip(&state.store, ip).await? else {
        debug!(ip, "mDNS: no known device for IP, skipping");
        return Ok(());
    };

    let entry = serde_json::json!([{
        "device_name": hostname,
        "device_properties": properties,
    }]);

    devices::patch_metadata_if_absent(&state.store, &mac, "mdns_json", &entry).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::oui::OuiDatabase;
    use crate::state::NetworkInfo;
    use pnet::util::MacAddr;
    use std::net::Ipv4Addr;

    async fn test_state() -> AppState {
        let pool = crate::store::init("sqlite::memory:").await.unwrap();
        let network = NetworkInfo {
            host_ip: Ipv4Addr::new(192, 168, 1, 10),
            host_mac: MacAddr(0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa),
            gateway_ip: Ipv4Addr::new(192, 168, 1, 1),
            interface_name: "eth0".to_string(),
            subnet_ips: vec![],
        };
        AppState::new(network, pool, AppConfig::default(), OuiDatabase::parse(""))
    }

    #[tokio::test]
    async fn test_record_service_first_write_wins() {
        let state = test_state().await;
        devices::upsert_from_arp(&state.store, "bb:bb:bb:00:00:01", "192.168.1.50", false, true, 1000)
            .await
            .unwrap();

        let props = serde_json::Map::new();
        record_service(&state, "192.168.1.50", "printer.local", &props)
            .await
            .unwrap();
        record_service(&state, "192.168.1.50", "should-not-overwrite", &props)
            .await
            .unwrap();

        let metadata: String = sqlx::query_scalar("SELECT metadata_json FROM devices WHERE mac_address = ?1")
            .bind("bb:bb:bb:00:00:01")
            .fetch_one(&state.store)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&metadata).unwrap();
        assert_eq!(value["mdns_json"][0]["device_name"], "printer.local");
    }

    #[tokio::test]
    async fn test_record_service_unknown_ip_ignored() {
        let state = test_state().await;
        let props = serde_json::Map::new();
        let result = record_service(&state, "10.0.0.99", "unknown", &props).await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_normalize_service_type_adds_trailing_dot() {
        assert_eq!(normalize_service_type("_http._tcp.local"), "_http._tcp.local.");
        assert_eq!(normalize_service_type("_http._tcp.local."), "_http._tcp.local.");
        assert_eq!(normalize_service_type(""), "");
    }
}

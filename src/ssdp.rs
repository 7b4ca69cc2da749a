//! Passive SSDP discovery, SSDP/mDNS's symmetric collaborator (§6). Sends an
//! M-SEARCH multicast probe, collects the HTTP-over-UDP responses that come
//! back for a short window, and merges a `{device_name, device_properties}`
//! entry into the responding device's `metadata_json.ssdp_json` — only if
//! that key is still absent (first-write-wins, §9). Runs on the same 5s
//! cadence as mDNS.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::state::AppState;
use crate::store::devices;

const SSDP_MULTICAST_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 1900);
const COLLECT_WINDOW: Duration = Duration::from_secs(2);
const SEARCH_TARGET: &str = "ssdp:all";

fn make_msearch_request() -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 2\r\n\
         ST: {SEARCH_TARGET}\r\n\
         \r\n"
    )
}

struct SsdpResponse {
    device_name: String,
    properties: serde_json::Map<String, serde_json::Value>,
}

fn parse_ssdp_response(buf: &[u8]) -> Option<SsdpResponse> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut resp = httparse::Response::new(&mut headers);
    resp.parse(buf).ok()?;

    let mut properties = serde_json::Map::new();
    let mut device_name = None;

    for header in resp.headers.iter() {
        if header.name.is_empty() {
            continue;
        }
        let Ok(value) = std::str::from_utf8(header.value) else {
            continue;
        };
        let name = header.name.to_uppercase();
        if name == "SERVER" {
            device_name = Some(value.to_string());
        }
        properties.insert(header.name.to_string(), serde_json::Value::String(value.to_string()));
    }

    let device_name = device_name.or_else(|| properties.get("USN").and_then(|v| v.as_str()).map(str::to_string))?;

    Some(SsdpResponse { device_name, properties })
}

async fn record_response(state: &AppState, ip: &str, response: &SsdpResponse) -> anyhow::Result<()> {
    let Some(mac) = devices::mac_by_ip(&state.store, ip).await? else {
        debug!(ip, "SSDP: no known device for IP, skipping");
        return Ok(());
    };

    let entry = serde_json::json!([{
        "device_name": response.device_name,
        "device_properties": response.properties,
    }]);

    devices::patch_metadata_if_absent(&state.store, &mac, "ssdp_json", &entry).await?;
    Ok(())
}

/// One SSDP discovery cycle: probe, then collect for `COLLECT_WINDOW`.
pub async fn tick(state: &AppState) -> anyhow::Result<()> {
    let network = state.network_snapshot().await;

    let socket = UdpSocket::bind(SocketAddr::from((network.host_ip, 0))).await?;
    socket.set_broadcast(true)?;
    socket
        .send_to(make_msearch_request().as_bytes(), SocketAddr::from(SSDP_MULTICAST_ADDR))
        .await?;

    let mut buf = [0u8; 2048];
    let deadline = tokio::time::Instant::now() + COLLECT_WINDOW;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        let recv = match timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                warn!(error = %e, "SSDP socket read error");
                break;
            }
            Err(_) => break,
        };

        let (len, from) = recv;
        let Some(response) = parse_ssdp_response(&buf[..len]) else {
            continue;
        };
        if let Err(e) = record_response(state, &from.ip().to_string(), &response).await {
            warn!(from = %from, error = %e, "failed to record SSDP response");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::oui::OuiDatabase;
    use crate::state::NetworkInfo;
    use pnet::util::MacAddr;

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

    #[test]
    fn test_parse_ssdp_response_extracts_server_header() {
        let raw = b"HTTP/1.1 200 OK\r\nSERVER: Linux/3.14 UPnP/1.0 MyDevice/1.0\r\nUSN: uuid:abc123\r\n\r\n";
        let response = parse_ssdp_response(raw).expect("should parse");
        assert_eq!(response.device_name, "Linux/3.14 UPnP/1.0 MyDevice/1.0");
        assert_eq!(response.properties["USN"], "uuid:abc123");
    }

    #[test]
    fn test_parse_ssdp_response_falls_back_to_usn() {
        let raw = b"HTTP/1.1 200 OK\r\nUSN: uuid:xyz789::upnp:rootdevice\r\n\r\n";
        let response = parse_ssdp_response(raw).expect("should parse");
        assert_eq!(response.device_name, "uuid:xyz789::upnp:rootdevice");
    }

    #[test]
    fn test_parse_ssdp_response_rejects_garbage() {
        assert!(parse_ssdp_response(b"not an http response at all, no headers").is_none());
    }

    #[tokio::test]
    async fn test_record_response_first_write_wins() {
        let state = test_state().await;
        devices::upsert_from_arp(&state.store, "cc:cc:cc:00:00:01", "192.168.1.60", false, true, 1000)
            .await
            .unwrap();

        let response = SsdpResponse {
            device_name: "router".to_string(),
            properties: serde_json::Map::new(),
        };
        record_response(&state, "192.168.1.60", &response).await.unwrap();

        let second = SsdpResponse {
            device_name: "should-not-overwrite".to_string(),
            properties: serde_json::Map::new(),
        };
        record_response(&state, "192.168.1.60", &second).await.unwrap();

        let metadata: String = sqlx::query_scalar("SELECT metadata_json FROM devices WHERE mac_address = ?1")
            .bind("cc:cc:cc:00:00:01")
            .fetch_one(&state.store)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&metadata).unwrap();
        assert_eq!(value["ssdp_json"][0]["device_name"], "router");
    }

    #[tokio::test]
    async fn test_record_response_unknown_ip_ignored() {
        let state = test_state().await;
        let response = SsdpResponse {
            device_name: "unknown".to_string(),
            properties: serde_json::Map::new(),
        };
        let result = record_response(&state, "10.0.0.99", &response).await;
        assert!(result.is_ok());
    }
}

//! Network-topology resolver (§4.A).
//!
//! Determines the host's own addresses, the active interface, the default
//! gateway, and the subnet's IP range. Called once at startup (fatal on
//! failure) and then every 60s to refresh.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use ipnetwork::Ipv4Network;
use pnet::util::MacAddr;
use tracing::{debug, warn};

use crate::error::TopologyError;
use crate::state::NetworkInfo;

const ROUTE_TABLE_RETRY_INTERVAL: Duration = Duration::from_secs(2);
const ROUTE_TABLE_RETRY_BUDGET: Duration = Duration::from_secs(30);

/// A default-route candidate read from the OS route table.
struct DefaultRoute {
    interface_name: String,
    gateway_ip: Ipv4Addr,
    metric: u32,
}

/// Identify the preferred egress IP by opening a UDP socket toward a
/// well-known external address and reading the local endpoint. No bytes are
/// actually sent — `connect` on a UDP socket only consults the routing
/// table.
fn egress_ip() -> anyhow::Result<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 80))?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(_) => anyhow::bail!("egress socket unexpectedly bound to an IPv6 address"),
    }
}

/// Read `/proc/net/route` (Linux) and return every default-route entry
/// (destination 00000000), keyed by interface, with its gateway and metric.
#[cfg(target_os = "linux")]
fn read_default_routes() -> anyhow::Result<Vec<DefaultRoute>> {
    let contents = std::fs::read_to_string("/proc/net/route")?;
    let mut routes = Vec::new();

    for line in contents.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // Iface Destination Gateway Flags RefCnt Use Metric Mask MTU Window IRTT
        if fields.len() < 8 {
            continue;
        }
        let iface = fields[0];
        let destination = fields[1];
        if destination != "00000000" {
            continue;
        }
        let gateway_hex = fields[2];
        let metric: u32 = fields[6].parse().unwrap_or(0);

        let Ok(gw_le) = u32::from_str_radix(gateway_hex, 16) else {
            continue;
        };
        // /proc/net/route stores addresses in host byte order, little-endian on disk.
        let gateway_ip = Ipv4Addr::from(gw_le.to_le_bytes());

        routes.push(DefaultRoute {
            interface_name: iface.to_string(),
            gateway_ip,
            metric,
        });
    }

    Ok(routes)
}

#[cfg(not(target_os = "linux"))]
fn read_default_routes() -> anyhow::Result<Vec<DefaultRoute>> {
    // No portable route-table API on other OSes without additional system
    // dependencies; treat as "not yet populated" so the retry loop below
    // escalates to NoConnectivity with a clear message.
    Ok(Vec::new())
}

/// Pick the default route whose interface carries the egress IP. If several
/// qualify, tie-break by lowest metric (§9 open question).
fn select_default_route(
    routes: Vec<DefaultRoute>,
    egress_ip: Ipv4Addr,
) -> Option<DefaultRoute> {
    let interfaces = pnet_datalink::interfaces();

    let mut candidates: Vec<DefaultRoute> = routes
        .into_iter()
        .filter(|route| {
            interfaces.iter().any(|iface| {
                iface.name == route.interface_name
                    && iface.ips.iter().any(|ip| match ip.ip() {
                        IpAddr::V4(v4) => v4 == egress_ip,
                        IpAddr::V6(_) => false,
                    })
            })
        })
        .collect();

    candidates.sort_by_key(|r| r.metric);
    candidates.into_iter().next()
}

/// Resolve the full network topology, retrying the route-table query for up
/// to `ROUTE_TABLE_RETRY_BUDGET` before surfacing `NoConnectivity`.
pub async fn resolve() -> anyhow::Result<NetworkInfo> {
    let egress = egress_ip()?;
    let deadline = tokio::time::Instant::now() + ROUTE_TABLE_RETRY_BUDGET;

    let route = loop {
        let routes = read_default_routes().unwrap_or_default();
        if let Some(route) = select_default_route(routes, egress) {
            break route;
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(TopologyError::NoConnectivity {
                secs: ROUTE_TABLE_RETRY_BUDGET.as_secs(),
            }
            .into());
        }

        debug!("default route not yet populated, retrying");
        tokio::time::sleep(ROUTE_TABLE_RETRY_INTERVAL).await;
    };

    let interfaces = pnet_datalink::interfaces();
    let iface = interfaces
        .iter()
        .find(|i| i.name == route.interface_name)
        .ok_or_else(|| TopologyError::NoInterfaceMac(route.interface_name.clone()))?;

    let host_mac: MacAddr = iface
        .mac
        .ok_or_else(|| TopologyError::NoInterfaceMac(route.interface_name.clone()))?;

    let ip_network = iface
        .ips
        .iter()
        .find_map(|ip| match ip {
            ipnetwork::IpNetwork::V4(v4) if v4.ip() == egress => Some(*v4),
            _ => None,
        })
        .ok_or_else(|| TopologyError::NoInterfaceIp(route.interface_name.clone()))?;

    let subnet_ips = enumerate_subnet(ip_network);

    Ok(NetworkInfo {
        host_ip: egress,
        host_mac,
        gateway_ip: route.gateway_ip,
        interface_name: route.interface_name,
        subnet_ips,
    })
}

/// Enumerate every host address in a CIDR block (excluding network and
/// broadcast addresses for prefixes shorter than /31).
fn enumerate_subnet(network: Ipv4Network) -> Vec<Ipv4Addr> {
    let prefix = network.prefix();
    if prefix >= 31 {
        return network.iter().collect();
    }
    let net_addr = network.network();
    let bcast_addr = network.broadcast();
    network
        .iter()
        .filter(|ip| *ip != net_addr && *ip != bcast_addr)
        .collect()
}

/// Run the periodic topology refresh, logging (not failing) on transient
/// errors — the previously resolved topology stays in effect until a
/// refresh succeeds.
pub async fn refresh(state: &crate::state::AppState) {
    match resolve().await {
        Ok(info) => state.update_network(info).await,
        Err(e) => warn!(error = %e, "topology refresh failed, keeping previous network info"),
    }
}

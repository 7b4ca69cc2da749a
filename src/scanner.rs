//! ARP scanner (§4.D): broadcasts a who-has request for every IP in the
//! subnet on each tick. Replies are not read here — they arrive on the
//! capture session's own `rx` and are attributed by the ARP handler in the
//! classifier (§4.G).

use pnet::datalink::{self, Channel};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::packet::Packet;
use pnet::util::MacAddr;
use tracing::{debug, warn};

use crate::state::AppState;

const ARP_REQUEST_LEN: usize = 42;

/// One who-has broadcast for `target_ip`, sourced from `host_mac`/`host_ip`
/// on `interface_name`.
fn send_arp_request(
    interface_name: &str,
    host_mac: MacAddr,
    host_ip: std::net::Ipv4Addr,
    target_ip: std::net::Ipv4Addr,
) -> anyhow::Result<()> {
    let interfaces = datalink::interfaces();
    let interface = interfaces
        .iter()
        .find(|i| i.name == interface_name)
        .ok_or_else(|| anyhow::anyhow!("interface {interface_name} not found"))?;

    let (mut tx, _rx) = match datalink::channel(interface, Default::default())? {
        Channel::Ethernet(tx, rx) => (tx, rx),
        _ => anyhow::bail!("unsupported datalink channel type on {interface_name}"),
    };

    let mut ethernet_buffer = [0u8; ARP_REQUEST_LEN];
    let mut ethernet_packet = MutableEthernetPacket::new(&mut ethernet_buffer)
        .ok_or_else(|| anyhow::anyhow!("failed to build ethernet frame"))?;
    ethernet_packet.set_destination(MacAddr::broadcast());
    ethernet_packet.set_source(host_mac);
    ethernet_packet.set_ethertype(EtherTypes::Arp);

    let mut arp_buffer = [0u8; 28];
    let mut arp_packet = MutableArpPacket::new(&mut arp_buffer)
        .ok_or_else(|| anyhow::anyhow!("failed to build ARP payload"))?;
    arp_packet.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp_packet.set_protocol_type(EtherTypes::Ipv4);
    arp_packet.set_hw_addr_len(6);
    arp_packet.set_proto_addr_len(4);
    arp_packet.set_operation(ArpOperations::Request);
    arp_packet.set_sender_hw_addr(host_mac);
    arp_packet.set_sender_proto_addr(host_ip);
    arp_packet.set_target_hw_addr(MacAddr::zero());
    arp_packet.set_target_proto_addr(target_ip);

    ethernet_packet.set_payload(arp_packet.packet());

    tx.send_to(ethernet_packet.packet(), None)
        .ok_or_else(|| anyhow::anyhow!("no send implementation for {interface_name}"))??;

    Ok(())
}

/// One scan tick: snapshot the current topology under the global lock, then
/// broadcast a who-has for every address in the subnet. The snapshot is
/// cloned out before any send syscall (§5).
pub async fn tick(state: &AppState) -> anyhow::Result<()> {
    let network = state.network_snapshot().await;

    let mut sent = 0usize;
    for target_ip in &network.subnet_ips {
        match send_arp_request(
            &network.interface_name,
            network.host_mac,
            network.host_ip,
            *target_ip,
        ) {
            Ok(()) => sent += 1,
            Err(err) => warn!(ip = %target_ip, error = %err, "ARP who-has send failed"),
        }
    }
    debug!(sent, total = network.subnet_ips.len(), "ARP scan tick complete");

    Ok(())
}

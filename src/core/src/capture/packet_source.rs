//! Live packet capture and layer decoding.
//!
//! Opens a promiscuous libpcap handle on the bridge interface with a BPF
//! filter restricted to the enabled printer ports, and decodes each frame
//! down to `(addresses, ports, flags, seq, payload)`. Frames lacking a
//! network or TCP layer decode to `None` and are silently dropped. The
//! decoder only slices into the capture buffer; nothing is copied here.

use std::net::IpAddr;

use log::info;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::{TcpFlags, TcpPacket};

use super::types::DecodedPacket;
use crate::configuration::types::CaptureConfig;
use crate::error_handling::types::CaptureError;

const ETHERNET_HEADER_LEN: usize = 14;
const IPV6_HEADER_LEN: usize = 40;

/// A live capture handle. Reads block indefinitely; the capture thread is
/// detached and dies with the process after the session table is drained.
pub struct PacketSource {
    capture: pcap::Capture<pcap::Active>,
}

impl PacketSource {
    /// Opens the interface and installs the BPF filter. Any failure here is
    /// fatal at startup.
    pub fn open(interface: &str, config: &CaptureConfig) -> Result<Self, CaptureError> {
        let filter = build_bpf_filter(config);

        let mut capture = pcap::Capture::from_device(interface)
            .map_err(|e| CaptureError::OpenDevice(interface.to_owned(), e))?
            .promisc(config.promiscuous)
            .snaplen(config.snap_len as i32)
            .buffer_size((config.buffer_size_mb * 1024 * 1024) as i32)
            .timeout(0)
            .open()
            .map_err(|e| CaptureError::OpenDevice(interface.to_owned(), e))?;

        capture
            .filter(&filter, true)
            .map_err(|e| CaptureError::SetFilter(filter.clone(), e))?;

        info!("capture started on {} with filter {:?}", interface, filter);
        Ok(Self { capture })
    }

    pub fn next_packet(&mut self) -> Result<pcap::Packet<'_>, pcap::Error> {
        self.capture.next_packet()
    }
}

/// The BPF expression for the enabled printer ports. The configuration
/// validator guarantees at least one port is enabled.
pub fn build_bpf_filter(config: &CaptureConfig) -> String {
    let mut ports = Vec::new();
    if config.port_9100_enabled {
        ports.push("(tcp port 9100)");
    }
    if config.port_515_enabled {
        ports.push("(tcp port 515)");
    }
    ports.join(" or ")
}

/// Picks a capture interface: `br0` if present, then any bridge device, then
/// `eth0`.
pub fn find_interface() -> Result<String, CaptureError> {
    let devices = pcap::Device::list().map_err(CaptureError::ListDevices)?;

    let preferences: [fn(&str) -> bool; 3] = [
        |name| name == "br0",
        |name| name.starts_with("br"),
        |name| name == "eth0",
    ];
    for preferred in preferences {
        if let Some(device) = devices.iter().find(|d| preferred(&d.name)) {
            return Ok(device.name.clone());
        }
    }

    Err(CaptureError::NoInterface)
}

/// Decodes an Ethernet frame down to its TCP segment. Returns `None` for
/// anything that is not plain IPv4/IPv6 over Ethernet carrying TCP.
pub fn decode_packet(data: &[u8]) -> Option<DecodedPacket<'_>> {
    let eth = EthernetPacket::new(data)?;
    let ethertype = eth.get_ethertype();
    let ip_bytes = data.get(ETHERNET_HEADER_LEN..)?;

    match ethertype {
        EtherTypes::Ipv4 => {
            let ip = Ipv4Packet::new(ip_bytes)?;
            if ip.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
                return None;
            }
            let header_len = ip.get_header_length() as usize * 4;
            let total_len = ip.get_total_length() as usize;
            if header_len < 20 || total_len < header_len {
                return None;
            }
            // Short Ethernet frames are padded; the IP total length bounds
            // the real segment.
            let end = total_len.min(ip_bytes.len());
            let tcp_bytes = ip_bytes.get(header_len..end)?;
            decode_tcp(
                IpAddr::V4(ip.get_source()),
                IpAddr::V4(ip.get_destination()),
                tcp_bytes,
            )
        }
        EtherTypes::Ipv6 => {
            let ip = Ipv6Packet::new(ip_bytes)?;
            // Extension headers are not walked; only direct TCP is captured.
            if ip.get_next_header() != IpNextHeaderProtocols::Tcp {
                return None;
            }
            let end = (IPV6_HEADER_LEN + ip.get_payload_length() as usize).min(ip_bytes.len());
            let tcp_bytes = ip_bytes.get(IPV6_HEADER_LEN..end)?;
            decode_tcp(
                IpAddr::V6(ip.get_source()),
                IpAddr::V6(ip.get_destination()),
                tcp_bytes,
            )
        }
        _ => None,
    }
}

fn decode_tcp<'a>(src_ip: IpAddr, dst_ip: IpAddr, tcp_bytes: &'a [u8]) -> Option<DecodedPacket<'a>> {
    let tcp = TcpPacket::new(tcp_bytes)?;
    let data_offset = tcp.get_data_offset() as usize * 4;
    if data_offset < 20 || data_offset > tcp_bytes.len() {
        return None;
    }
    let flags = tcp.get_flags();

    Some(DecodedPacket {
        src_ip,
        dst_ip,
        src_port: tcp.get_source(),
        dst_port: tcp.get_destination(),
        seq: tcp.get_sequence(),
        syn: flags & TcpFlags::SYN != 0,
        fin: flags & TcpFlags::FIN != 0,
        rst: flags & TcpFlags::RST != 0,
        payload: &tcp_bytes[data_offset..],
    })
}

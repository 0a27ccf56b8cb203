use crate::timestamp::{ticks_to_duration, ticks_to_secs, TimestampConfig};
use crate::trace::Trace;
use pnet_packet::ethernet::EthernetPacket;
use std::sync::Arc;
use std::time::Duration;

pub use pnet_base::MacAddr;

/// A captured packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Arrival time, since the Unix epoch
    pub timestamp: Duration,
    /// Value of the device counter when the packet arrived
    pub arrival_ticks: u64,
    /// Length of the packet on the wire
    pub wire_len: usize,
    /// Captured bytes (at most the capture length of the receiver)
    pub data: Vec<u8>,
    /// Send timestamp extracted from the packet, truncated to the timestamp width
    pub send_timestamp: Option<u32>,
    /// Latency in ticks, present when a send timestamp was decoded
    pub latency_ticks: Option<u64>,
}

impl Packet {
    pub fn latency(&self) -> Option<Duration> {
        self.latency_ticks.map(ticks_to_duration)
    }

    pub fn latency_secs(&self) -> Option<f64> {
        self.latency_ticks.map(ticks_to_secs)
    }

    pub fn is_truncated(&self) -> bool {
        self.data.len() < self.wire_len
    }
}

fn mac_bits(mac: MacAddr) -> u64 {
    mac.octets()
        .iter()
        .fold(0, |acc, b| (acc << 8) | *b as u64)
}

/// Destination MAC address filter. A frame passes if its destination matches the address on
/// every bit set in the mask. The default filter accepts everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacFilter {
    pub address: MacAddr,
    pub mask: MacAddr,
}

impl MacFilter {
    pub fn new(address: MacAddr, mask: MacAddr) -> Self {
        MacFilter { address, mask }
    }

    pub fn exact(address: MacAddr) -> Self {
        MacFilter::new(address, MacAddr::broadcast())
    }

    /// Frames too short for an Ethernet header only pass an accept-all filter
    pub fn matches(&self, frame: &[u8]) -> bool {
        match EthernetPacket::new(frame) {
            Some(ethernet) => {
                (mac_bits(ethernet.get_destination()) ^ mac_bits(self.address))
                    & mac_bits(self.mask)
                    == 0
            }
            None => self.mask.is_zero(),
        }
    }
}

/// Settings pushed to the device for one generator
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub interface: usize,
    pub trace: Option<Arc<Trace>>,
}

/// Settings pushed to the device for one receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceiverConfig {
    pub interface: usize,
    pub capture_enabled: bool,
    /// Maximum number of bytes stored per packet. 0 only keeps metadata.
    pub capture_length: usize,
    /// Host memory reserved for the capture, in bytes
    pub memory: u64,
    pub filter: MacFilter,
}

/// The full configuration written to the device at once
#[derive(Debug, Clone)]
pub struct HardwareConfig {
    pub generators: Vec<GeneratorConfig>,
    pub receivers: Vec<ReceiverConfig>,
    pub timestamp: TimestampConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_to(dst: &str) -> Vec<u8> {
        let mut data = vec![0u8; 64];
        data[0..6].copy_from_slice(&dst.parse::<MacAddr>().unwrap().octets());
        data
    }

    #[test]
    fn test_mac_bits() {
        assert_eq!(mac_bits(MacAddr::new(0x53, 0, 0, 0, 0, 2)), 0x5300_0000_0002);
        assert_eq!(mac_bits(MacAddr::broadcast()), 0xFFFF_FFFF_FFFF);
    }

    #[test]
    fn test_exact_filter() {
        let filter = MacFilter::exact("53:00:00:00:00:02".parse().unwrap());
        assert!(filter.matches(&frame_to("53:00:00:00:00:02")));
        assert!(!filter.matches(&frame_to("53:00:00:00:00:03")));
        assert!(!filter.matches(&frame_to("ff:ff:ff:ff:ff:ff")));
        // a destination but no full header
        assert!(!filter.matches(&[0x53, 0, 0, 0, 0, 2, 0, 0]));
    }

    #[test]
    fn test_masked_filter() {
        let filter = MacFilter::new(
            "53:00:00:00:00:00".parse().unwrap(),
            "ff:ff:ff:00:00:00".parse().unwrap(),
        );
        assert!(filter.matches(&frame_to("53:00:00:12:34:56")));
        assert!(!filter.matches(&frame_to("52:00:00:12:34:56")));
    }

    #[test]
    fn test_default_filter_accepts_all() {
        let filter = MacFilter::default();
        assert!(filter.matches(&frame_to("01:02:03:04:05:06")));
        assert!(filter.matches(&[]));
    }
}

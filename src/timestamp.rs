use crate::error::{Error, Result};
use pnet_packet::ethernet::{EtherTypes, EthernetPacket};
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Frequency of the device clock, in Hz
pub const CLOCK_FREQUENCY: u64 = 156_250_000;
/// Duration of one clock tick, in picoseconds (6.4 ns)
pub const TICK_PICOS: u64 = 6_400;

const ETHERNET_HEADER_SIZE: usize = 14;
const IPV4_CHECKSUM_OFFSET: usize = ETHERNET_HEADER_SIZE + 10;
// lower 16 bits of the 20-bit flow label
const IPV6_FLOW_LABEL_OFFSET: usize = ETHERNET_HEADER_SIZE + 2;

/// Convert a tick count into a duration, rounded to the nearest nanosecond
pub fn ticks_to_duration(ticks: u64) -> Duration {
    let picos = ticks as u128 * TICK_PICOS as u128;
    Duration::from_nanos(((picos + 500) / 1000) as u64)
}

/// Convert a tick count into seconds
pub fn ticks_to_secs(ticks: u64) -> f64 {
    ticks as f64 * TICK_PICOS as f64 * 1e-12
}

/// Convert a duration into a tick count, rounded down
pub fn duration_to_ticks(duration: Duration) -> u64 {
    (duration.as_nanos() * 1000 / TICK_PICOS as u128) as u64
}

/// Maps device counter values to wall-clock time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockEpoch {
    /// Wall-clock time (since the Unix epoch) at which the counter had the value `ticks`
    pub wall: Duration,
    pub ticks: u64,
}

impl ClockEpoch {
    /// Take the current wall-clock time as reference for the current counter value
    pub fn now(ticks: u64) -> Self {
        ClockEpoch {
            wall: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default(),
            ticks,
        }
    }

    pub fn wall_time(&self, ticks: u64) -> Duration {
        if ticks >= self.ticks {
            self.wall + ticks_to_duration(ticks - self.ticks)
        } else {
            self.wall.saturating_sub(ticks_to_duration(self.ticks - ticks))
        }
    }
}

/// How the send timestamp is embedded into outgoing packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampMode {
    /// No timestamp is inserted, no latency is measured
    #[default]
    Disabled,
    /// The timestamp is written at a fixed byte position
    #[serde(alias = "fixed")]
    FixedPosition,
    /// The timestamp replaces the IPv4 checksum or the IPv6 flow label. Non-IP packets are
    /// left untouched.
    #[serde(alias = "header")]
    HeaderField,
}

/// Width of the timestamp field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampWidth {
    #[default]
    Bits16,
    Bits24,
}

impl TimestampWidth {
    pub fn bits(&self) -> u32 {
        match self {
            TimestampWidth::Bits16 => 16,
            TimestampWidth::Bits24 => 24,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bits() as usize / 8
    }

    pub fn mask(&self) -> u64 {
        (1 << self.bits()) - 1
    }

    /// Largest latency that can be measured before the timestamp wraps around
    pub fn max_latency(&self) -> Duration {
        ticks_to_duration(1 << self.bits())
    }
}

impl TryFrom<u32> for TimestampWidth {
    type Error = Error;

    fn try_from(bits: u32) -> Result<TimestampWidth> {
        match bits {
            16 => Ok(TimestampWidth::Bits16),
            24 => Ok(TimestampWidth::Bits24),
            _ => Err(Error::Configuration(format!(
                "invalid timestamp width {bits}, must be 16 or 24 bits"
            ))),
        }
    }
}

/// Timestamping settings of a measurement session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampConfig {
    pub mode: TimestampMode,
    /// Byte offset of the timestamp (fixed position only)
    pub position: usize,
    /// Timestamp width (fixed position only, header timestamps are always 16 bits)
    pub width: TimestampWidth,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        TimestampConfig {
            mode: TimestampMode::Disabled,
            position: ETHERNET_HEADER_SIZE,
            width: TimestampWidth::Bits16,
        }
    }
}

impl TimestampConfig {
    pub fn fixed_position(position: usize, width_bits: u32) -> Result<Self> {
        Ok(TimestampConfig {
            mode: TimestampMode::FixedPosition,
            position,
            width: TimestampWidth::try_from(width_bits)?,
        })
    }

    pub fn header_field() -> Self {
        TimestampConfig {
            mode: TimestampMode::HeaderField,
            ..Default::default()
        }
    }

    /// The width actually used by the mode
    pub fn effective_width(&self) -> TimestampWidth {
        match self.mode {
            TimestampMode::FixedPosition => self.width,
            _ => TimestampWidth::Bits16,
        }
    }
}

/// Inserts send timestamps into outgoing packets and extracts them from captured ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampCodec {
    config: TimestampConfig,
}

impl TimestampCodec {
    pub fn new(config: TimestampConfig) -> Self {
        TimestampCodec { config }
    }

    pub fn config(&self) -> &TimestampConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.mode != TimestampMode::Disabled
    }

    /// Locate the timestamp field: Ok(None) when the mode does not apply to this frame
    fn field(&self, frame: &[u8]) -> Result<Option<(usize, usize)>> {
        let (offset, size) = match self.config.mode {
            TimestampMode::Disabled => return Ok(None),
            TimestampMode::FixedPosition => (self.config.position, self.config.width.bytes()),
            TimestampMode::HeaderField => {
                let Some(eth) = EthernetPacket::new(frame) else {
                    return Ok(None);
                };
                match eth.get_ethertype() {
                    EtherTypes::Ipv4 => (IPV4_CHECKSUM_OFFSET, 2),
                    EtherTypes::Ipv6 => (IPV6_FLOW_LABEL_OFFSET, 2),
                    _ => return Ok(None),
                }
            }
        };
        if offset + size > frame.len() {
            Err(Error::PacketTooShort {
                needed: offset + size,
                len: frame.len(),
            })
        } else {
            Ok(Some((offset, size)))
        }
    }

    /// Write the send timestamp (in ticks, truncated to the field width) into the frame.
    /// Returns whether a timestamp was written.
    pub fn encode(&self, frame: &mut [u8], send_ticks: u64) -> Result<bool> {
        match self.field(frame)? {
            Some((offset, size)) => {
                let bytes = send_ticks.to_le_bytes();
                frame[offset..offset + size].copy_from_slice(&bytes[..size]);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Read the (truncated) send timestamp of a frame, in ticks
    pub fn decode(&self, frame: &[u8]) -> Option<u32> {
        let (offset, size) = self.field(frame).ok()??;
        let mut bytes = [0u8; 4];
        bytes[..size].copy_from_slice(&frame[offset..offset + size]);
        Some(u32::from_le_bytes(bytes))
    }

    /// Latency in ticks between a decoded timestamp and the arrival counter value, in
    /// `1..=2^width`. An arrival on the very tick of the timestamp counts as a full wrap. No
    /// other wraparound correction is attempted.
    pub fn latency_ticks(&self, timestamp: u32, arrival_ticks: u64) -> u64 {
        let mask = self.config.effective_width().mask();
        match arrival_ticks.wrapping_sub(timestamp as u64) & mask {
            0 => mask + 1,
            ticks => ticks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ethertype: u16, len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        data[0..6].copy_from_slice(&[0x53, 0, 0, 0, 0, 2]);
        data[6..12].copy_from_slice(&[0x53, 0, 0, 0, 0, 1]);
        data[12..14].copy_from_slice(&ethertype.to_be_bytes());
        data
    }

    #[test]
    fn test_tick_conversion() {
        assert_eq!(ticks_to_duration(1), Duration::from_nanos(6));
        assert_eq!(ticks_to_duration(5), Duration::from_nanos(32));
        assert_eq!(duration_to_ticks(Duration::from_nanos(32)), 5);
        assert_eq!(duration_to_ticks(Duration::from_secs(1)), CLOCK_FREQUENCY);
        assert!((ticks_to_secs(CLOCK_FREQUENCY) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_epoch() {
        let epoch = ClockEpoch {
            wall: Duration::from_secs(1_000),
            ticks: 500,
        };
        assert_eq!(
            epoch.wall_time(500 + CLOCK_FREQUENCY),
            Duration::from_secs(1_001)
        );
        assert_eq!(epoch.wall_time(495), Duration::from_secs(1_000) - Duration::from_nanos(32));
    }

    #[test]
    fn test_max_latency() {
        let max16 = TimestampWidth::Bits16.max_latency();
        assert!(max16 > Duration::from_micros(419) && max16 < Duration::from_micros(420));
        let max24 = TimestampWidth::Bits24.max_latency();
        assert!(max24 > Duration::from_millis(107) && max24 < Duration::from_millis(108));
    }

    #[test]
    fn test_invalid_width() {
        assert!(matches!(
            TimestampConfig::fixed_position(14, 32),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_fixed_position_roundtrip() {
        for width in [16, 24] {
            let codec = TimestampCodec::new(TimestampConfig::fixed_position(14, width).unwrap());
            let mask = (1u64 << width) - 1;
            for t in [0u64, 1, 0x1234, mask, mask + 7, 0xdead_beef_cafe] {
                let mut data = frame(0x0800, 64);
                let reference = data.clone();
                assert!(codec.encode(&mut data, t).unwrap());
                assert_eq!(codec.decode(&data), Some((t & mask) as u32));
                // only the timestamp bytes changed
                let end = 14 + width as usize / 8;
                assert_eq!(data[..14], reference[..14]);
                assert_eq!(data[end..], reference[end..]);
            }
        }
    }

    #[test]
    fn test_fixed_position_little_endian() {
        let codec = TimestampCodec::new(TimestampConfig::fixed_position(20, 24).unwrap());
        let mut data = frame(0x0800, 64);
        codec.encode(&mut data, 0x00ab_cdef).unwrap();
        assert_eq!(data[20..23], [0xef, 0xcd, 0xab]);
    }

    #[test]
    fn test_fixed_position_too_short() {
        let codec = TimestampCodec::new(TimestampConfig::fixed_position(62, 24).unwrap());
        let mut data = frame(0x0800, 64);
        let reference = data.clone();
        assert!(matches!(
            codec.encode(&mut data, 42),
            Err(Error::PacketTooShort { needed: 65, len: 64 })
        ));
        assert_eq!(data, reference);
        assert_eq!(codec.decode(&data), None);
    }

    #[test]
    fn test_header_field_ipv4() {
        let codec = TimestampCodec::new(TimestampConfig::header_field());
        let mut data = frame(0x0800, 64);
        assert!(codec.encode(&mut data, 0x1_beef).unwrap());
        assert_eq!(data[24..26], [0xef, 0xbe]);
        assert_eq!(codec.decode(&data), Some(0xbeef));
    }

    #[test]
    fn test_header_field_ipv6() {
        let codec = TimestampCodec::new(TimestampConfig::header_field());
        let mut data = frame(0x86dd, 80);
        data[14] = 0x60;
        assert!(codec.encode(&mut data, 0x4321).unwrap());
        assert_eq!(data[14], 0x60);
        assert_eq!(data[16..18], [0x21, 0x43]);
        assert_eq!(codec.decode(&data), Some(0x4321));
    }

    #[test]
    fn test_header_field_non_ip_passthrough() {
        let codec = TimestampCodec::new(TimestampConfig::header_field());
        let mut data = frame(0x0806, 64);
        let reference = data.clone();
        assert!(!codec.encode(&mut data, 0x4321).unwrap());
        assert_eq!(data, reference);
        assert_eq!(codec.decode(&data), None);
    }

    #[test]
    fn test_disabled() {
        let codec = TimestampCodec::new(TimestampConfig::default());
        let mut data = frame(0x0800, 64);
        assert!(!codec.encode(&mut data, 7).unwrap());
        assert_eq!(codec.decode(&data), None);
    }

    #[test]
    fn test_latency_wraparound() {
        let codec = TimestampCodec::new(TimestampConfig::fixed_position(14, 16).unwrap());
        assert_eq!(codec.latency_ticks(0xfff0, 0x1_0010), 0x20);
        assert_eq!(codec.latency_ticks(100, 150), 50);
        // beyond the field range the result is ambiguous
        assert_eq!(codec.latency_ticks(100, 150 + 0x1_0000), 50);
        assert_eq!(codec.latency_ticks(100, 100), 0x1_0000);
        assert_eq!(codec.latency_ticks(100, 101), 1);
        let codec = TimestampCodec::new(TimestampConfig::fixed_position(14, 24).unwrap());
        assert_eq!(codec.latency_ticks(0x12_3456, 0x7712_3456), 0x100_0000);
    }
}

use crate::error::Result;
use crate::structs::Packet;
use crate::trace::{create_file, TraceWriter};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// The result of a capture run on one receiver
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capture {
    interface: usize,
    capture_length: usize,
    packets: Vec<Packet>,
    captured: u64,
    discarded: u64,
}

impl Capture {
    /// Build a capture. Packets are sorted by arrival time.
    pub fn new(
        interface: usize,
        capture_length: usize,
        mut packets: Vec<Packet>,
        captured: u64,
        discarded: u64,
    ) -> Self {
        packets.sort_by_key(|p| p.arrival_ticks);
        Capture {
            interface,
            capture_length,
            packets,
            captured,
            discarded,
        }
    }

    pub fn interface(&self) -> usize {
        self.interface
    }

    pub fn capture_length(&self) -> usize {
        self.capture_length
    }

    /// Stored packets, in arrival order
    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    /// Number of packets that passed the filter, stored or not
    pub fn captured_count(&self) -> u64 {
        self.captured
    }

    pub fn stored_count(&self) -> u64 {
        self.packets.len() as u64
    }

    /// Packets only counted because the capture memory was exhausted
    pub fn discarded_count(&self) -> u64 {
        self.discarded
    }

    pub fn latencies(&self) -> Latencies<'_> {
        Latencies {
            packets: self.packets.iter(),
        }
    }

    /// Write the latencies, one value in seconds per line. Returns the number of lines written.
    pub fn write_latencies(&self, path: impl AsRef<Path>) -> Result<usize> {
        self.latencies().write_to_file(path)
    }

    /// Save the capture in the trace container format. The gap of each record is the number of
    /// ticks until the arrival of the next packet, so the file can be replayed as a trace.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = TraceWriter::new(create_file(path.as_ref())?);
        for (i, p) in self.packets.iter().enumerate() {
            let gap = match self.packets.get(i + 1) {
                Some(next) => {
                    let gap = next.arrival_ticks - p.arrival_ticks;
                    u32::try_from(gap).unwrap_or_else(|_| {
                        log::warn!("Inter-arrival gap of {gap} ticks clamped in the capture file");
                        u32::MAX
                    })
                }
                None => 0,
            };
            writer.write_record(gap, p.wire_len, &p.data)?;
        }
        writer.finish()?;
        log::info!(
            "IF{}: {} packets saved to {}",
            self.interface,
            self.packets.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Save the capture as a pcap file
    pub fn write_pcap(&self, path: impl AsRef<Path>) -> Result<()> {
        crate::export::capture_to_pcap(self, path)
    }
}

/// Latencies of the timestamped packets of a capture, in arrival order
#[derive(Debug, Clone)]
pub struct Latencies<'a> {
    packets: std::slice::Iter<'a, Packet>,
}

impl Iterator for Latencies<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.packets.by_ref().find_map(Packet::latency)
    }
}

impl Latencies<'_> {
    /// Write the remaining latencies, one decimal value in seconds per line, down to the
    /// picosecond
    pub fn write_to_file(self, path: impl AsRef<Path>) -> Result<usize> {
        let mut file = create_file(path.as_ref())?;
        let mut count = 0;
        for secs in self.packets.filter_map(Packet::latency_secs) {
            writeln!(file, "{secs:.12}")?;
            count += 1;
        }
        file.flush()?;
        log::debug!("{count} latencies written to {}", path.as_ref().display());
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Trace;
    use std::fs;

    fn packet(arrival_ticks: u64, wire_len: usize, stored: usize, latency: Option<u64>) -> Packet {
        Packet {
            timestamp: Duration::from_secs(1),
            arrival_ticks,
            wire_len,
            data: vec![0xAB; stored],
            send_timestamp: latency.map(|l| (arrival_ticks - l) as u32),
            latency_ticks: latency,
        }
    }

    #[test]
    fn test_packets_sorted_by_arrival() {
        let capture = Capture::new(
            0,
            64,
            vec![packet(30, 64, 64, None), packet(10, 64, 64, None)],
            2,
            0,
        );
        let arrivals: Vec<u64> = capture.packets().iter().map(|p| p.arrival_ticks).collect();
        assert_eq!(arrivals, vec![10, 30]);
        assert_eq!(capture.stored_count(), 2);
    }

    #[test]
    fn test_latencies_skip_untimestamped() {
        let capture = Capture::new(
            1,
            0,
            vec![
                packet(100, 64, 0, Some(10)),
                packet(200, 64, 0, None),
                packet(300, 64, 0, Some(5)),
            ],
            3,
            0,
        );
        let latencies: Vec<Duration> = capture.latencies().collect();
        assert_eq!(
            latencies,
            vec![Duration::from_nanos(64), Duration::from_nanos(32)]
        );
    }

    #[test]
    fn test_write_latencies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latencies.txt");
        let capture = Capture::new(
            0,
            0,
            vec![packet(100, 64, 0, Some(10)), packet(200, 64, 0, Some(1))],
            2,
            0,
        );
        assert_eq!(capture.write_latencies(&path).unwrap(), 2);
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "0.000000064000\n0.000000006400\n");
        let values: Vec<f64> = content.lines().map(|l| l.parse().unwrap()).collect();
        assert!((values[0] - 64e-9).abs() < 1e-15);
        assert!((values[1] - 6.4e-9).abs() < 1e-15);
    }

    #[test]
    fn test_write_to_file_replays_as_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        let capture = Capture::new(
            0,
            16,
            vec![
                packet(1000, 64, 16, None),
                packet(1250, 100, 16, None),
                packet(1260, 60, 16, None),
            ],
            3,
            0,
        );
        capture.write_to_file(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len() % 64, 0);

        let trace = Trace::load(&path, 1).unwrap();
        let gaps: Vec<u32> = trace.entries().iter().map(|e| e.gap).collect();
        assert_eq!(gaps, vec![250, 10, 0]);
        let lens: Vec<usize> = trace.entries().iter().map(|e| e.data.len()).collect();
        assert_eq!(lens, vec![64, 100, 60]);
        assert_eq!(&trace.entries()[1].data[..16], &[0xAB; 16]);
        assert!(trace.entries()[1].data[16..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_empty_capture() {
        let capture = Capture::default();
        assert_eq!(capture.latencies().count(), 0);
        assert_eq!(capture.captured_count(), 0);
        assert!(capture.packets().is_empty());
    }
}

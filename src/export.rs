use crate::capture::Capture;
use crate::error::{Error, Result};
use crate::timestamp::ticks_to_duration;
use crate::trace::{create_file, parse_records};
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::{PcapError, TsResolution};
use std::fs;
use std::io::Write;
use std::path::Path;

fn pcap_error(e: PcapError) -> Error {
    match e {
        PcapError::IoError(e) => Error::Io(e),
        e => Error::Format(e.to_string()),
    }
}

fn write_pcap<'a>(
    path: &Path,
    packets: impl Iterator<Item = PcapPacket<'a>>,
) -> Result<usize> {
    let header = PcapHeader {
        ts_resolution: TsResolution::NanoSecond,
        ..Default::default()
    };
    let mut pcap_writer = PcapWriter::with_header(create_file(path)?, header).map_err(pcap_error)?;
    let mut count = 0;
    for packet in packets {
        pcap_writer.write_packet(&packet).map_err(pcap_error)?;
        count += 1;
    }
    pcap_writer.into_writer().flush()?;
    log::trace!("{count} packets written to {}", path.display());
    Ok(count)
}

/// Export a capture into a pcap file. Truncated packets keep their original length.
pub fn capture_to_pcap(capture: &Capture, path: impl AsRef<Path>) -> Result<()> {
    let count = write_pcap(
        path.as_ref(),
        capture
            .packets()
            .iter()
            .map(|p| PcapPacket::new(p.timestamp, p.wire_len as u32, &p.data)),
    )?;
    log::info!(
        "IF{}: {count} packets exported to {}",
        capture.interface(),
        path.as_ref().display()
    );
    Ok(())
}

/// Convert a trace or capture file into a pcap file. Packet timestamps start at zero and follow
/// the gaps of the file.
pub fn trace_to_pcap(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<usize> {
    let input = input.as_ref();
    let bytes = fs::read(input).map_err(|e| Error::from_open(e, input))?;
    let records = parse_records(&bytes)?;
    let mut send_ticks = 0u64;
    let packets = records.iter().map(|r| {
        let packet = PcapPacket::new(ticks_to_duration(send_ticks), r.wire_len as u32, r.data);
        send_ticks += r.gap as u64;
        packet
    });
    let count = write_pcap(output.as_ref(), packets)?;
    log::info!(
        "{count} packets converted from {} to {}",
        input.display(),
        output.as_ref().display()
    );
    Ok(count)
}

/// Convert a pcap file into a trace file
pub fn pcap_to_trace(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<usize> {
    let trace = crate::trace::Trace::from_pcap(input, 1)?;
    trace.write_to_file(output.as_ref())?;
    log::info!(
        "{} packets written to {}",
        trace.entry_count(),
        output.as_ref().display()
    );
    Ok(trace.entry_count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::Packet;
    use crate::trace::{Trace, TraceEntry};
    use pcap_file::pcap::PcapReader;
    use std::fs::File;
    use std::time::Duration;

    fn read_pcap(path: &Path) -> Vec<(Duration, u32, Vec<u8>)> {
        let mut reader = PcapReader::new(File::open(path).unwrap()).unwrap();
        assert_eq!(reader.header().ts_resolution, TsResolution::NanoSecond);
        let mut packets = vec![];
        while let Some(p) = reader.next_packet() {
            let p = p.unwrap();
            packets.push((p.timestamp, p.orig_len, p.data.into_owned()));
        }
        packets
    }

    #[test]
    fn test_capture_to_pcap_keeps_wire_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.pcap");
        let packet = Packet {
            timestamp: Duration::new(1_700_000_000, 123),
            arrival_ticks: 0,
            wire_len: 64,
            data: vec![1, 2, 3, 4],
            send_timestamp: None,
            latency_ticks: None,
        };
        let capture = Capture::new(0, 4, vec![packet], 1, 0);
        capture.write_pcap(&path).unwrap();
        assert_eq!(
            read_pcap(&path),
            vec![(Duration::new(1_700_000_000, 123), 64, vec![1, 2, 3, 4])]
        );
    }

    #[test]
    fn test_trace_pcap_conversions() {
        let dir = tempfile::tempdir().unwrap();
        let trace_path = dir.path().join("in.trace");
        let pcap_path = dir.path().join("out.pcap");
        let back_path = dir.path().join("back.trace");
        let entries = vec![
            TraceEntry {
                data: vec![0xAA; 60],
                gap: 1000,
            },
            TraceEntry {
                data: vec![0xBB; 1518],
                gap: 0,
            },
        ];
        Trace::new(entries.clone(), 1)
            .unwrap()
            .write_to_file(&trace_path)
            .unwrap();

        assert_eq!(trace_to_pcap(&trace_path, &pcap_path).unwrap(), 2);
        let packets = read_pcap(&pcap_path);
        assert_eq!(packets[0].0, Duration::ZERO);
        // 1000 ticks of 6.4 ns
        assert_eq!(packets[1].0, Duration::from_nanos(6400));
        assert_eq!(packets[1].1, 1518);

        assert_eq!(pcap_to_trace(&pcap_path, &back_path).unwrap(), 2);
        assert_eq!(Trace::load(&back_path, 1).unwrap().entries(), &entries[..]);
    }

    #[test]
    fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            trace_to_pcap(dir.path().join("missing"), dir.path().join("out.pcap")),
            Err(Error::NotFound { .. })
        ));
    }
}

use crate::error::{Error, Result};
use crate::timestamp::CLOCK_FREQUENCY;
use pcap_file::pcap::PcapReader;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

/// Largest frame the device can replay or capture
pub const MAX_PACKET_SIZE: usize = 1518;

const META_SIZE: usize = 8;
const META_END: u64 = u64::MAX;
const FILE_ALIGNMENT: usize = 64;

/// A packet of a trace and the number of ticks until the next one is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub data: Vec<u8>,
    pub gap: u32,
}

/// A recorded sequence of packets with their relative send times, replayed `repeat` times.
/// The repetitions are logical: the packets are stored once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    entries: Vec<TraceEntry>,
    repeat: u32,
}

/// A packet of the expanded trace, with its send time relative to the start of the replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceItem<'a> {
    pub data: &'a [u8],
    pub send_ticks: u64,
}

/// Iterates over the expanded trace. The time axis continues across repetitions.
#[derive(Debug, Clone)]
pub struct TraceIter<'a> {
    trace: &'a Trace,
    position: u64,
    send_ticks: u64,
}

impl<'a> Iterator for TraceIter<'a> {
    type Item = TraceItem<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.trace.len() {
            return None;
        }
        let entry = &self.trace.entries[(self.position % self.trace.entries.len() as u64) as usize];
        let item = TraceItem {
            data: &entry.data,
            send_ticks: self.send_ticks,
        };
        self.position += 1;
        self.send_ticks += entry.gap as u64;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.trace.len() - self.position) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TraceIter<'_> {}

/// A record of the trace container: ticks until the next packet, wire length and stored bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Record<'a> {
    pub gap: u32,
    pub wire_len: usize,
    pub data: &'a [u8],
}

fn padded(len: usize, alignment: usize) -> usize {
    len.div_ceil(alignment) * alignment
}

/// Parse the records of a trace or capture file
pub(crate) fn parse_records(bytes: &[u8]) -> Result<Vec<Record<'_>>> {
    let mut records = vec![];
    let mut offset = 0;
    while offset < bytes.len() {
        let Some(meta) = bytes
            .get(offset..offset + META_SIZE)
            .and_then(|m| <[u8; META_SIZE]>::try_from(m).ok())
        else {
            return Err(Error::Format(format!(
                "truncated metadata at byte {offset}"
            )));
        };
        let meta = u64::from_le_bytes(meta);
        if meta == META_END {
            break;
        }
        let gap = meta as u32;
        let stored = ((meta >> 32) & 0xFFFF) as usize;
        let wire_len = (meta >> 48) as usize;
        if wire_len == 0 || wire_len > MAX_PACKET_SIZE {
            return Err(Error::Format(format!(
                "record {}: invalid wire length {wire_len}",
                records.len()
            )));
        }
        if stored > wire_len {
            return Err(Error::Format(format!(
                "record {}: {stored} stored bytes exceed the wire length {wire_len}",
                records.len()
            )));
        }
        offset += META_SIZE;
        let Some(data) = bytes.get(offset..offset + stored) else {
            return Err(Error::Format(format!(
                "record {}: truncated packet data",
                records.len()
            )));
        };
        offset += padded(stored, META_SIZE);
        records.push(Record {
            gap,
            wire_len,
            data,
        });
    }
    Ok(records)
}

/// Writes records in the trace container format
pub(crate) struct TraceWriter<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> TraceWriter<W> {
    pub fn new(writer: W) -> Self {
        TraceWriter { writer, written: 0 }
    }

    pub fn write_record(&mut self, gap: u32, wire_len: usize, data: &[u8]) -> std::io::Result<()> {
        let meta = (gap as u64) | ((data.len() as u64) << 32) | ((wire_len as u64) << 48);
        self.writer.write_all(&meta.to_le_bytes())?;
        self.writer.write_all(data)?;
        let padding = padded(data.len(), META_SIZE) - data.len();
        self.writer.write_all(&[0u8; META_SIZE][..padding])?;
        self.written += META_SIZE + data.len() + padding;
        Ok(())
    }

    /// Pad the file with 0xFF to the container alignment
    pub fn finish(mut self) -> std::io::Result<W> {
        let padding = padded(self.written, FILE_ALIGNMENT) - self.written;
        self.writer.write_all(&vec![0xFF; padding])?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

pub(crate) fn create_file(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    Ok(BufWriter::new(file))
}

impl Trace {
    pub fn new(entries: Vec<TraceEntry>, repeat: u32) -> Result<Self> {
        if repeat == 0 {
            return Err(Error::Configuration(
                "the repeat count must be at least 1".into(),
            ));
        }
        if entries.is_empty() {
            return Err(Error::Format("the trace contains no packet".into()));
        }
        if let Some(i) = entries
            .iter()
            .position(|e| e.data.is_empty() || e.data.len() > MAX_PACKET_SIZE)
        {
            return Err(Error::Format(format!(
                "packet {i}: invalid length {}",
                entries[i].data.len()
            )));
        }
        Ok(Trace { entries, repeat })
    }

    /// Load a trace file, to be replayed `repeat` times
    pub fn load(path: impl AsRef<Path>, repeat: u32) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| Error::from_open(e, path))?;
        let entries = parse_records(&bytes)?
            .into_iter()
            .map(|r| {
                // the device always sends full frames
                let mut data = r.data.to_vec();
                data.resize(r.wire_len, 0);
                TraceEntry { data, gap: r.gap }
            })
            .collect();
        let trace = Trace::new(entries, repeat)?;
        log::debug!(
            "Trace {} loaded: {} packets, repeated {} times",
            path.display(),
            trace.entry_count(),
            repeat
        );
        Ok(trace)
    }

    /// Import a pcap file. Send times are rounded to the nearest clock tick relative to the first
    /// packet, so that the rounding error does not accumulate.
    pub fn from_pcap(path: impl AsRef<Path>, repeat: u32) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::from_open(e, path))?;
        let mut reader = PcapReader::new(BufReader::new(file))
            .map_err(|e| Error::Format(format!("{}: {e}", path.display())))?;

        let mut entries: Vec<TraceEntry> = vec![];
        let mut first_ts: Option<Duration> = None;
        // send time of the last packet, in ticks since the first one
        let mut scheduled: u64 = 0;
        while let Some(packet) = reader.next_packet() {
            let packet = packet.map_err(|e| Error::Format(format!("{}: {e}", path.display())))?;
            let wire_len = packet.orig_len as usize;
            if wire_len > MAX_PACKET_SIZE {
                return Err(Error::Format(format!(
                    "packet {}: length {wire_len} exceeds {MAX_PACKET_SIZE} bytes",
                    entries.len()
                )));
            }
            let first = *first_ts.get_or_insert(packet.timestamp);
            let elapsed = packet.timestamp.saturating_sub(first).as_nanos();
            let target = ((elapsed * CLOCK_FREQUENCY as u128 + 500_000_000) / 1_000_000_000) as u64;
            let index = entries.len();
            if let Some(last) = entries.last_mut() {
                last.gap = u32::try_from(target.saturating_sub(scheduled)).map_err(|_| {
                    Error::Format(format!("packet {index}: inter-packet time is too large"))
                })?;
                scheduled = scheduled.max(target);
            }
            let mut data = packet.data.into_owned();
            data.resize(wire_len.max(data.len()), 0);
            entries.push(TraceEntry { data, gap: 0 });
        }
        log::info!("{} packets imported from {}", entries.len(), path.display());
        Trace::new(entries, repeat)
    }

    /// Write the packets (once, regardless of the repeat count) in the trace format
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = TraceWriter::new(create_file(path.as_ref())?);
        for entry in self.entries.iter() {
            writer.write_record(entry.gap, entry.data.len(), &entry.data)?;
        }
        writer.finish()?;
        Ok(())
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn repeat(&self) -> u32 {
        self.repeat
    }

    /// Number of packets sent when replaying the trace
    pub fn len(&self) -> u64 {
        self.entries.len() as u64 * self.repeat as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Duration of one repetition, in ticks
    pub fn period_ticks(&self) -> u64 {
        self.entries.iter().map(|e| e.gap as u64).sum()
    }

    pub fn iter(&self) -> TraceIter<'_> {
        TraceIter {
            trace: self,
            position: 0,
            send_ticks: 0,
        }
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = TraceItem<'a>;
    type IntoIter = TraceIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

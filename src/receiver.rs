use crate::capture::Capture;
use crate::error::{Error, Result};
use crate::hardware::{FrameSink, HardwareBackend};
use crate::structs::{MacAddr, MacFilter, Packet, ReceiverConfig};
use crate::timestamp::{ClockEpoch, TimestampCodec};
use crate::trace::MAX_PACKET_SIZE;
use crate::ui::InterfaceStats;
use arc_swap::ArcSwapOption;
use crossbeam_channel::{unbounded, Receiver as PacketReceiver, Sender};
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Host memory taken by a captured packet holding `stored` bytes: the packet itself, its slot
/// in the capture queue and the stored bytes
pub fn packet_footprint(stored: usize) -> u64 {
    (mem::size_of::<Packet>() + mem::size_of::<usize>() + stored) as u64
}

#[derive(Debug, Default)]
struct CaptureCounters {
    captured: AtomicU64,
    discarded: AtomicU64,
}

/// State of a capture run, shared with the receive path while the capture is armed
struct CaptureBuffer {
    interface: usize,
    capture_length: usize,
    budget: u64,
    used: AtomicU64,
    exhausted: AtomicBool,
    filter: MacFilter,
    codec: TimestampCodec,
    epoch: ClockEpoch,
    counters: Arc<CaptureCounters>,
    tx: Sender<Packet>,
}

impl CaptureBuffer {
    fn push(&self, frame: &[u8], arrival_ticks: u64) {
        if !self.filter.matches(frame) {
            log::trace!("IF{}: frame rejected by the MAC filter", self.interface);
            return;
        }
        self.counters.captured.fetch_add(1, Ordering::Relaxed);
        let stored = frame.len().min(self.capture_length);
        if !self.reserve(packet_footprint(stored)) {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let send_timestamp = self.codec.decode(frame);
        let packet = Packet {
            timestamp: self.epoch.wall_time(arrival_ticks),
            arrival_ticks,
            wire_len: frame.len(),
            data: frame[..stored].to_vec(),
            send_timestamp,
            latency_ticks: send_timestamp.map(|ts| self.codec.latency_ticks(ts, arrival_ticks)),
        };
        // the receiving end lives as long as the run
        let _ = self.tx.send(packet);
    }

    /// Take `footprint` bytes from the memory budget. Once a packet does not fit, the capture
    /// only counts packets until the end of the run.
    fn reserve(&self, footprint: u64) -> bool {
        if self.exhausted.load(Ordering::Relaxed) {
            return false;
        }
        let reserved = self
            .used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                (used + footprint <= self.budget).then_some(used + footprint)
            })
            .is_ok();
        if !reserved && !self.exhausted.swap(true, Ordering::Relaxed) {
            log::warn!(
                "IF{}: capture memory of {} bytes exhausted, further packets are only counted",
                self.interface,
                self.budget
            );
        }
        reserved
    }
}

/// The receive path of an interface, attached to the device once and for all
pub(crate) struct RxPort {
    stats: Arc<InterfaceStats>,
    buffer: ArcSwapOption<CaptureBuffer>,
}

impl RxPort {
    pub fn new(stats: Arc<InterfaceStats>) -> Self {
        RxPort {
            stats,
            buffer: ArcSwapOption::empty(),
        }
    }
}

impl FrameSink for RxPort {
    fn deliver(&self, frame: &[u8], arrival_ticks: u64) {
        self.stats.packet_received(frame.len());
        if let Some(buffer) = &*self.buffer.load() {
            buffer.push(frame, arrival_ticks);
        }
    }
}

struct Run {
    buffer: Arc<CaptureBuffer>,
    rx: PacketReceiver<Packet>,
}

/// Capture settings and results of one interface
pub struct Receiver {
    interface: usize,
    backend: Arc<dyn HardwareBackend>,
    port: Arc<RxPort>,
    config: ReceiverConfig,
    applied: ReceiverConfig,
    run: Option<Run>,
    capture: Arc<Capture>,
}

impl Receiver {
    pub(crate) fn new(
        interface: usize,
        backend: Arc<dyn HardwareBackend>,
        port: Arc<RxPort>,
    ) -> Self {
        let config = ReceiverConfig {
            interface,
            ..Default::default()
        };
        Receiver {
            interface,
            backend,
            port,
            config,
            applied: config,
            run: None,
            capture: Arc::new(Capture::default()),
        }
    }

    pub fn interface(&self) -> usize {
        self.interface
    }

    /// Pending settings, pushed to the device by the next configuration write
    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Enable capturing, storing at most `capture_length` bytes per packet and reserving
    /// `memory` bytes of host memory for the run
    pub fn enable_capture(&mut self, capture_length: usize, memory: u64) -> Result<()> {
        if capture_length > MAX_PACKET_SIZE {
            return Err(Error::Configuration(format!(
                "capture length {capture_length} exceeds the maximum packet size {MAX_PACKET_SIZE}"
            )));
        }
        self.config.capture_enabled = true;
        self.config.capture_length = capture_length;
        self.config.memory = memory;
        Ok(())
    }

    /// Stop capturing from the next configuration write on
    pub fn disable_capture(&mut self) {
        self.config.capture_enabled = false;
    }

    /// Only capture frames whose destination matches `address` on the bits set in `mask`
    pub fn set_filter_mac_dst(&mut self, address: MacAddr, mask: MacAddr) {
        self.config.filter = MacFilter::new(address, mask);
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Number of packets accepted by the filter during the current or the last run
    pub fn packet_count_captured(&self) -> u64 {
        match &self.run {
            Some(run) => run.buffer.counters.captured.load(Ordering::Relaxed),
            None => self.capture.captured_count(),
        }
    }

    /// The result of the last completed run. Empty before the first one.
    pub fn capture(&self) -> Arc<Capture> {
        Arc::clone(&self.capture)
    }

    pub(crate) fn apply(&mut self) {
        self.applied = self.config;
    }

    /// Arm the capture with the applied settings. Does nothing if capture is not enabled.
    pub(crate) fn start(&mut self, codec: TimestampCodec, epoch: ClockEpoch) -> Result<()> {
        if !self.applied.capture_enabled {
            return Ok(());
        }
        if self.run.is_some() {
            self.stop()?;
        }
        let (tx, rx) = unbounded();
        let buffer = Arc::new(CaptureBuffer {
            interface: self.interface,
            capture_length: self.applied.capture_length,
            budget: self.applied.memory,
            used: AtomicU64::new(0),
            exhausted: AtomicBool::new(false),
            filter: self.applied.filter,
            codec,
            epoch,
            counters: Arc::default(),
            tx,
        });
        self.port.buffer.store(Some(Arc::clone(&buffer)));
        if let Err(e) = self.backend.set_capture(self.interface, true) {
            self.port.buffer.store(None);
            return Err(e.into());
        }
        log::debug!(
            "IF{}: capture armed ({} bytes per packet, {} bytes of memory, filter {}/{})",
            self.interface,
            self.applied.capture_length,
            self.applied.memory,
            self.applied.filter.address,
            self.applied.filter.mask
        );
        self.run = Some(Run { buffer, rx });
        Ok(())
    }

    /// Disarm the capture and collect the packets of the run
    pub(crate) fn stop(&mut self) -> Result<()> {
        let Some(Run { buffer, rx }) = self.run.take() else {
            return Ok(());
        };
        let disarmed = self.backend.set_capture(self.interface, false);
        self.port.buffer.store(None);
        let counters = Arc::clone(&buffer.counters);
        drop(buffer);
        // ends once the frames being delivered have released the buffer
        let mut packets = Vec::with_capacity(rx.len());
        packets.extend(rx.iter());
        let captured = counters.captured.load(Ordering::Relaxed);
        let discarded = counters.discarded.load(Ordering::Relaxed);
        log::info!(
            "IF{}: {captured} packets captured, {} stored, {discarded} only counted",
            self.interface,
            packets.len()
        );
        self.capture = Arc::new(Capture::new(
            self.interface,
            self.applied.capture_length,
            packets,
            captured,
            discarded,
        ));
        disarmed?;
        Ok(())
    }
}

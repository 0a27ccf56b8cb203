use crate::error::Result;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Packet and byte counters of a network interface. They are updated by the replay and capture
/// paths and read concurrently by the datarate reporter.
#[derive(Debug, Default)]
pub struct InterfaceStats {
    pub tx_packets: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub rx_packets: AtomicU64,
    pub rx_bytes: AtomicU64,
}

/// A consistent-enough copy of the counters of an interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
}

impl InterfaceStats {
    pub fn packet_sent(&self, bytes: usize) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn packet_received(&self, bytes: usize) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Datarates of an interface over one sampling interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatarateSample {
    pub interface: usize,
    pub elapsed: Duration,
    /// bits per second
    pub tx_bps: f64,
    pub tx_pps: f64,
    pub rx_bps: f64,
    pub rx_pps: f64,
}

impl DatarateSample {
    fn new(
        interface: usize,
        before: &CounterSnapshot,
        after: &CounterSnapshot,
        elapsed: Duration,
    ) -> Self {
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let rate = |a: u64, b: u64| a.saturating_sub(b) as f64 / secs;
        DatarateSample {
            interface,
            elapsed,
            tx_bps: 8. * rate(after.tx_bytes, before.tx_bytes),
            tx_pps: rate(after.tx_packets, before.tx_packets),
            rx_bps: 8. * rate(after.rx_bytes, before.rx_bytes),
            rx_pps: rate(after.rx_packets, before.rx_packets),
        }
    }
}

pub fn format_datarate(bps: f64) -> String {
    let mbps = bps / 1_000_000.;
    if mbps < 1. {
        format!("{:.2} kbps", mbps * 1000.)
    } else if mbps < 1000. {
        format!("{:.2} Mbps", mbps)
    } else {
        format!("{:.2} Gbps", mbps / 1000.)
    }
}

/// Background task periodically logging the TX and RX datarates of the interfaces
pub struct DatarateReporter {
    stop: Sender<()>,
    handle: JoinHandle<Vec<DatarateSample>>,
}

impl DatarateReporter {
    pub fn start(stats: Vec<Arc<InterfaceStats>>, interval: Duration) -> Result<Self> {
        let (stop, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("Datarates".into())
            .spawn(move || {
                let mut samples = vec![];
                let mut previous: Vec<CounterSnapshot> =
                    stats.iter().map(|s| s.snapshot()).collect();
                let mut last = Instant::now();
                loop {
                    // a stop request or a dropped handle both end the loop, after a last sample
                    let stopping = !matches!(
                        stop_rx.recv_timeout(interval),
                        Err(RecvTimeoutError::Timeout)
                    );
                    let now = Instant::now();
                    let elapsed = now.duration_since(last);
                    last = now;
                    for (i, s) in stats.iter().enumerate() {
                        let current = s.snapshot();
                        let sample = DatarateSample::new(i, &previous[i], &current, elapsed);
                        log::info!(
                            "IF{i}: TX {} ({:.0} pps), RX {} ({:.0} pps)",
                            format_datarate(sample.tx_bps),
                            sample.tx_pps,
                            format_datarate(sample.rx_bps),
                            sample.rx_pps
                        );
                        samples.push(sample);
                        previous[i] = current;
                    }
                    if stopping {
                        break;
                    }
                }
                samples
            })?;
        Ok(DatarateReporter { stop, handle })
    }

    /// Stop the reporter and return all the samples it took
    pub fn stop(self) -> Vec<DatarateSample> {
        let _ = self.stop.send(());
        self.handle.join().unwrap_or_default()
    }
}

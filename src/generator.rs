use crate::error::Result;
use crate::hardware::HardwareBackend;
use crate::trace::Trace;
use crate::ui::InterfaceStats;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Replays a trace on one interface
pub struct Generator {
    interface: usize,
    backend: Arc<dyn HardwareBackend>,
    stats: Arc<InterfaceStats>,
    trace: Option<Arc<Trace>>,
    applied: Option<Arc<Trace>>,
    sent: Arc<AtomicU64>,
}

impl Generator {
    pub(crate) fn new(
        interface: usize,
        backend: Arc<dyn HardwareBackend>,
        stats: Arc<InterfaceStats>,
    ) -> Self {
        Generator {
            interface,
            backend,
            stats,
            trace: None,
            applied: None,
            sent: Arc::default(),
        }
    }

    pub fn interface(&self) -> usize {
        self.interface
    }

    /// Associate a trace with this interface, replacing the previous one
    pub fn bind(&mut self, trace: Arc<Trace>) {
        self.trace = Some(trace);
    }

    pub fn unbind(&mut self) {
        self.trace = None;
    }

    pub fn trace(&self) -> Option<&Arc<Trace>> {
        self.trace.as_ref()
    }

    /// Packets sent during the current or the last replay
    pub fn packet_count_tx(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub(crate) fn apply(&mut self) {
        self.applied = self.trace.clone();
    }

    /// Start replaying the applied trace, the first packet leaving when the device counter
    /// reaches `start_ticks`. The device inserts the send timestamps. Returns None when no
    /// trace is applied.
    pub(crate) fn spawn(&self, start_ticks: u64) -> Result<Option<JoinHandle<Result<u64>>>> {
        let Some(trace) = self.applied.clone() else {
            return Ok(None);
        };
        self.sent.store(0, Ordering::Relaxed);
        let interface = self.interface;
        let backend = Arc::clone(&self.backend);
        let stats = Arc::clone(&self.stats);
        let sent = Arc::clone(&self.sent);
        let builder = thread::Builder::new().name(format!("Generator-{interface}"));
        let handle = builder.spawn(move || -> Result<u64> {
            log::debug!(
                "IF{interface}: replaying {} packets from tick {start_ticks}",
                trace.len()
            );
            let mut late = 0u64;
            for item in trace.iter() {
                let at_ticks = start_ticks + item.send_ticks;
                if backend.transmit(interface, item.data, at_ticks)? > at_ticks {
                    late += 1;
                }
                stats.packet_sent(item.data.len());
                sent.fetch_add(1, Ordering::Relaxed);
            }
            if late > 0 {
                log::warn!("IF{interface}: {late} packets left later than scheduled");
            }
            Ok(sent.load(Ordering::Relaxed))
        })?;
        Ok(Some(handle))
    }
}

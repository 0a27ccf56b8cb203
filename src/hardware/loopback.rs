use super::{FrameSink, HardwareBackend};
use crate::error::HardwareError;
use crate::structs::HardwareConfig;
use crate::timestamp::{duration_to_ticks, ticks_to_duration, TimestampCodec};
use arc_swap::ArcSwap;
use rand_core::{RngCore, SeedableRng};
use rand_pcg::Pcg32;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

/// An emulated device. Frames sent on an interface are delivered to the interfaces linked to it
/// after a fixed delay plus a uniform random jitter. Send timestamps are inserted on the tick
/// each frame leaves, following the last configuration written.
///
/// By default the device counter is virtual: it only advances with the transmissions, so
/// replays complete immediately and results are deterministic. In real-time mode the counter
/// follows the wall clock and transmissions are paced.
pub struct LoopbackBackend {
    interfaces: usize,
    links: Vec<(usize, usize)>,
    delay_ticks: u64,
    jitter_ticks: u64,
    rng: Mutex<Pcg32>,
    clock: AtomicU64,
    realtime: Option<Instant>,
    sinks: Vec<OnceLock<Arc<dyn FrameSink>>>,
    armed: Vec<AtomicBool>,
    down: Vec<AtomicBool>,
    codec: ArcSwap<TimestampCodec>,
    applied: Mutex<Option<HardwareConfig>>,
    reject_config: AtomicBool,
}

impl LoopbackBackend {
    pub fn new(interfaces: usize) -> Self {
        LoopbackBackend {
            interfaces,
            links: vec![],
            delay_ticks: 0,
            jitter_ticks: 0,
            rng: Mutex::new(Pcg32::seed_from_u64(0)),
            clock: AtomicU64::new(0),
            realtime: None,
            sinks: (0..interfaces).map(|_| OnceLock::new()).collect(),
            armed: (0..interfaces).map(|_| AtomicBool::new(false)).collect(),
            down: (0..interfaces).map(|_| AtomicBool::new(false)).collect(),
            codec: ArcSwap::from_pointee(TimestampCodec::new(Default::default())),
            applied: Mutex::new(None),
            reject_config: AtomicBool::new(false),
        }
    }

    /// Connect the transmit side of `from` to the receive side of `to`
    pub fn with_link(mut self, from: usize, to: usize) -> Self {
        self.links.push((from, to));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ticks = duration_to_ticks(delay);
        self
    }

    pub fn with_jitter(mut self, jitter: Duration, seed: u64) -> Self {
        self.jitter_ticks = duration_to_ticks(jitter);
        self.rng = Mutex::new(Pcg32::seed_from_u64(seed));
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime.then(Instant::now);
        self
    }

    /// Make the device refuse configuration writes
    pub fn reject_configuration(&self, reject: bool) {
        self.reject_config.store(reject, Ordering::Relaxed);
    }

    /// Make transmissions on `interface` fail
    pub fn set_link_down(&self, interface: usize, down: bool) {
        if let Some(d) = self.down.get(interface) {
            d.store(down, Ordering::Relaxed);
        }
    }

    /// The last configuration successfully applied
    pub fn applied_config(&self) -> Option<HardwareConfig> {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_armed(&self, interface: usize) -> bool {
        self.armed
            .get(interface)
            .is_some_and(|a| a.load(Ordering::Relaxed))
    }

    fn check_interface(&self, interface: usize) -> Result<(), HardwareError> {
        if interface < self.interfaces {
            Ok(())
        } else {
            Err(HardwareError::NoSuchInterface(interface))
        }
    }

    fn jitter(&self) -> u64 {
        if self.jitter_ticks == 0 {
            0
        } else {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.next_u64() % (self.jitter_ticks + 1)
        }
    }
}

impl HardwareBackend for LoopbackBackend {
    fn interface_count(&self) -> usize {
        self.interfaces
    }

    fn now_ticks(&self) -> u64 {
        match self.realtime {
            Some(start) => duration_to_ticks(start.elapsed()),
            None => self.clock.load(Ordering::Acquire),
        }
    }

    fn apply(&self, config: &HardwareConfig) -> Result<(), HardwareError> {
        if self.reject_config.load(Ordering::Relaxed) {
            return Err(HardwareError::Rejected(
                "configuration write refused".into(),
            ));
        }
        for interface in config
            .generators
            .iter()
            .map(|g| g.interface)
            .chain(config.receivers.iter().map(|r| r.interface))
        {
            self.check_interface(interface)?;
        }
        *self.applied.lock().unwrap_or_else(|e| e.into_inner()) = Some(config.clone());
        self.codec.store(Arc::new(TimestampCodec::new(config.timestamp)));
        log::debug!(
            "Loopback device configured: {} generators, {} receivers",
            config.generators.iter().filter(|g| g.trace.is_some()).count(),
            config.receivers.iter().filter(|r| r.capture_enabled).count()
        );
        Ok(())
    }

    fn attach(&self, interface: usize, sink: Arc<dyn FrameSink>) -> Result<(), HardwareError> {
        self.check_interface(interface)?;
        self.sinks[interface].set(sink).map_err(|_| {
            HardwareError::Rejected(format!("interface {interface} is already attached"))
        })
    }

    fn set_capture(&self, interface: usize, armed: bool) -> Result<(), HardwareError> {
        self.check_interface(interface)?;
        self.armed[interface].store(armed, Ordering::Relaxed);
        Ok(())
    }

    fn transmit(
        &self,
        interface: usize,
        frame: &[u8],
        at_ticks: u64,
    ) -> Result<u64, HardwareError> {
        self.check_interface(interface)?;
        if self.down[interface].load(Ordering::Relaxed) {
            return Err(HardwareError::Transmit {
                interface,
                reason: "link down".into(),
            });
        }
        let sent_ticks = match self.realtime {
            Some(start) => {
                let now = duration_to_ticks(start.elapsed());
                if at_ticks > now {
                    thread::sleep(ticks_to_duration(at_ticks - now));
                }
                duration_to_ticks(start.elapsed()).max(at_ticks)
            }
            None => {
                self.clock.fetch_max(at_ticks, Ordering::AcqRel);
                at_ticks
            }
        };
        let codec = self.codec.load();
        let frame = if codec.is_enabled() {
            let mut stamped = frame.to_vec();
            if let Err(e) = codec.encode(&mut stamped, sent_ticks) {
                log::trace!("IF{interface}: no timestamp inserted: {e}");
            }
            Cow::Owned(stamped)
        } else {
            Cow::Borrowed(frame)
        };
        for &(_, to) in self.links.iter().filter(|(from, _)| *from == interface) {
            if let Some(sink) = self.sinks.get(to).and_then(OnceLock::get) {
                sink.deliver(&frame, sent_ticks + self.delay_ticks + self.jitter());
            }
        }
        Ok(sent_ticks)
    }
}

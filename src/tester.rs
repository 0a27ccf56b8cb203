use crate::error::{Error, HardwareError, Result};
use crate::generator::Generator;
use crate::hardware::HardwareBackend;
use crate::receiver::{Receiver, RxPort};
use crate::structs::{GeneratorConfig, HardwareConfig};
use crate::timestamp::{duration_to_ticks, ClockEpoch, TimestampCodec, TimestampConfig};
use crate::ui::{DatarateReporter, DatarateSample, InterfaceStats};
use std::sync::Arc;
use std::time::Duration;

/// Time left between the start request and the first packet, so that all the generators
/// start on the same tick
const REPLAY_LEAD: Duration = Duration::from_micros(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The configuration was never written to the device
    Unconfigured,
    Configured,
    Capturing,
    Stopped,
}

/// Controls all the generators and receivers of a device
pub struct NetworkTester {
    backend: Arc<dyn HardwareBackend>,
    generators: Vec<Generator>,
    receivers: Vec<Receiver>,
    stats: Vec<Arc<InterfaceStats>>,
    timestamp: TimestampConfig,
    applied_timestamp: TimestampConfig,
    epoch: ClockEpoch,
    state: State,
    reporter: Option<DatarateReporter>,
}

impl NetworkTester {
    /// Create a generator and a receiver for each interface of the device and attach the
    /// receive paths
    pub fn new(backend: Arc<dyn HardwareBackend>) -> Result<Self> {
        let interfaces = backend.interface_count();
        let stats: Vec<Arc<InterfaceStats>> = (0..interfaces).map(|_| Arc::default()).collect();
        let mut generators = Vec::with_capacity(interfaces);
        let mut receivers = Vec::with_capacity(interfaces);
        for (i, s) in stats.iter().enumerate() {
            let port = Arc::new(RxPort::new(Arc::clone(s)));
            backend.attach(i, port.clone())?;
            generators.push(Generator::new(i, Arc::clone(&backend), Arc::clone(s)));
            receivers.push(Receiver::new(i, Arc::clone(&backend), port));
        }
        log::debug!("Network tester with {interfaces} interfaces");
        Ok(NetworkTester {
            backend,
            generators,
            receivers,
            stats,
            timestamp: TimestampConfig::default(),
            applied_timestamp: TimestampConfig::default(),
            epoch: ClockEpoch::default(),
            state: State::Unconfigured,
            reporter: None,
        })
    }

    pub fn interface_count(&self) -> usize {
        self.stats.len()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn generator(&mut self, interface: usize) -> Result<&mut Generator> {
        self.generators
            .get_mut(interface)
            .ok_or(Error::Hardware(HardwareError::NoSuchInterface(interface)))
    }

    pub fn receiver(&mut self, interface: usize) -> Result<&mut Receiver> {
        self.receivers
            .get_mut(interface)
            .ok_or(Error::Hardware(HardwareError::NoSuchInterface(interface)))
    }

    pub fn generators(&self) -> &[Generator] {
        &self.generators
    }

    pub fn receivers(&self) -> &[Receiver] {
        &self.receivers
    }

    pub fn interface_stats(&self, interface: usize) -> Option<&Arc<InterfaceStats>> {
        self.stats.get(interface)
    }

    /// Timestamping settings, taking effect at the next configuration write
    pub fn set_timestamp_config(&mut self, config: TimestampConfig) {
        self.timestamp = config;
    }

    pub fn timestamp_config(&self) -> &TimestampConfig {
        &self.timestamp
    }

    /// Push the settings of all generators and receivers and the timestamping settings to the
    /// device. Nothing is changed if the device rejects the configuration.
    pub fn write_config(&mut self) -> Result<()> {
        if self.state == State::Capturing {
            return Err(Error::Configuration(
                "the configuration cannot be written while capturing".into(),
            ));
        }
        let config = HardwareConfig {
            generators: self
                .generators
                .iter()
                .map(|g| GeneratorConfig {
                    interface: g.interface(),
                    trace: g.trace().cloned(),
                })
                .collect(),
            receivers: self.receivers.iter().map(|r| *r.config()).collect(),
            timestamp: self.timestamp,
        };
        self.backend.apply(&config)?;

        self.generators.iter_mut().for_each(Generator::apply);
        self.receivers.iter_mut().for_each(Receiver::apply);
        self.applied_timestamp = self.timestamp;
        self.epoch = ClockEpoch::now(self.backend.now_ticks());
        self.state = State::Configured;
        log::info!(
            "Configuration written: {} generators, {} receivers, timestamps {:?}",
            config.generators.iter().filter(|g| g.trace.is_some()).count(),
            config.receivers.iter().filter(|r| r.capture_enabled).count(),
            self.applied_timestamp.mode
        );
        Ok(())
    }

    fn check_configured(&self) -> Result<()> {
        match self.state {
            State::Unconfigured => Err(Error::NotConfigured),
            _ => Ok(()),
        }
    }

    /// Arm all receivers with capture enabled. Returns immediately.
    pub fn start_capture(&mut self) -> Result<()> {
        self.check_configured()?;
        let codec = TimestampCodec::new(self.applied_timestamp);
        for i in 0..self.receivers.len() {
            if let Err(e) = self.receivers[i].start(codec, self.epoch) {
                // leave no receiver armed
                for r in self.receivers[..i].iter_mut() {
                    let _ = r.stop();
                }
                return Err(e);
            }
        }
        self.state = State::Capturing;
        log::info!(
            "Capture started on {} interfaces",
            self.receivers.iter().filter(|r| r.is_running()).count()
        );
        Ok(())
    }

    /// Replay the traces of all bound generators and wait until every one of them is done
    pub fn start_replay(&mut self) -> Result<()> {
        self.check_configured()?;
        let start_ticks = self.backend.now_ticks() + duration_to_ticks(REPLAY_LEAD);
        let mut handles = vec![];
        let mut result = Ok(());
        for g in self.generators.iter() {
            match g.spawn(start_ticks) {
                Ok(Some(handle)) => handles.push((g.interface(), handle)),
                Ok(None) => {}
                Err(e) => {
                    // the generators already started still run to the end
                    log::error!("IF{}: replay not started: {e}", g.interface());
                    result = Err(e);
                    break;
                }
            }
        }
        log::info!("Replay started on {} interfaces", handles.len());

        let mut sent = 0;
        for (interface, handle) in handles {
            let outcome = handle.join().unwrap_or_else(|_| {
                Err(HardwareError::Transmit {
                    interface,
                    reason: "the generator thread panicked".into(),
                }
                .into())
            });
            match outcome {
                Ok(count) => sent += count,
                Err(e) => {
                    log::error!("IF{interface}: replay failed: {e}");
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        log::info!("Replay finished: {sent} packets sent");
        result
    }

    /// Disarm all receivers and collect their captures
    pub fn stop_capture(&mut self) -> Result<()> {
        if self.state != State::Capturing {
            return Ok(());
        }
        let mut result = Ok(());
        for r in self.receivers.iter_mut() {
            if let Err(e) = r.stop() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        self.state = State::Stopped;
        result
    }

    /// Start logging the datarates of all interfaces every `interval`
    pub fn print_datarates_start(&mut self, interval: Duration) -> Result<()> {
        self.print_datarates_stop();
        self.reporter = Some(DatarateReporter::start(self.stats.clone(), interval)?);
        Ok(())
    }

    /// Stop the datarate reporter and return its samples
    pub fn print_datarates_stop(&mut self) -> Vec<DatarateSample> {
        self.reporter
            .take()
            .map(DatarateReporter::stop)
            .unwrap_or_default()
    }
}

impl Drop for NetworkTester {
    fn drop(&mut self) {
        self.print_datarates_stop();
        if self.state == State::Capturing {
            let _ = self.stop_capture();
        }
    }
}

use crate::error::{Error, Result};
use crate::hardware::loopback::LoopbackBackend;
use crate::structs::{MacAddr, MacFilter};
use crate::timestamp::{TimestampConfig, TimestampMode, TimestampWidth};
use crate::trace::MAX_PACKET_SIZE;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A measurement described in a TOML file
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct MeasurementConfig {
    #[serde(default)]
    pub timestamp: TimestampSection,
    #[serde(default)]
    pub generators: Vec<GeneratorSection>,
    #[serde(default)]
    pub receivers: Vec<ReceiverSection>,
    #[serde(default)]
    pub loopback: LoopbackSection,
    #[serde(default)]
    pub datarates: DataratesSection,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct TimestampSection {
    #[serde(default)]
    pub mode: TimestampMode,
    #[serde(default = "default_position")]
    pub position: usize,
    #[serde(default = "default_width")]
    pub width: u32,
}

fn default_position() -> usize {
    14
}

fn default_width() -> u32 {
    16
}

impl Default for TimestampSection {
    fn default() -> Self {
        TimestampSection {
            mode: TimestampMode::Disabled,
            position: default_position(),
            width: default_width(),
        }
    }
}

impl TimestampSection {
    pub fn to_config(&self) -> Result<TimestampConfig> {
        Ok(TimestampConfig {
            mode: self.mode,
            position: self.position,
            width: TimestampWidth::try_from(self.width)?,
        })
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct GeneratorSection {
    pub interface: usize,
    /// Trace file, imported from pcap when its extension is "pcap"
    pub trace: PathBuf,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
}

fn default_repeat() -> u32 {
    1
}

impl GeneratorSection {
    pub fn is_pcap(&self) -> bool {
        self.trace
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pcap"))
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReceiverSection {
    pub interface: usize,
    #[serde(default = "default_capture_length")]
    pub capture_length: usize,
    /// Host memory reserved for the capture, in bytes
    #[serde(default = "default_memory")]
    pub memory: u64,
    pub filter_mac_dst: Option<MacAddr>,
    /// Defaults to an exact match when a destination is given
    pub filter_mask: Option<MacAddr>,
    pub latencies: Option<PathBuf>,
    pub capture: Option<PathBuf>,
    pub pcap: Option<PathBuf>,
}

fn default_capture_length() -> usize {
    MAX_PACKET_SIZE
}

fn default_memory() -> u64 {
    64 << 20
}

impl ReceiverSection {
    pub fn filter(&self) -> Result<MacFilter> {
        match (&self.filter_mac_dst, &self.filter_mask) {
            (None, None) => Ok(MacFilter::default()),
            (None, Some(_)) => Err(Error::Configuration(format!(
                "receiver {}: filter_mask given without filter_mac_dst",
                self.interface
            ))),
            (Some(address), None) => Ok(MacFilter::exact(*address)),
            (Some(address), Some(mask)) => Ok(MacFilter::new(*address, *mask)),
        }
    }
}

/// The emulated device the measurement runs on
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct LoopbackSection {
    #[serde(default = "default_interfaces")]
    pub interfaces: usize,
    /// (tx interface, rx interface) pairs
    #[serde(default)]
    pub links: Vec<[usize; 2]>,
    /// Propagation delay of every link
    #[serde(default = "default_delay_ns")]
    pub delay_ns: u64,
    #[serde(default)]
    pub jitter_ns: u64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub realtime: bool,
}

fn default_interfaces() -> usize {
    4
}

fn default_delay_ns() -> u64 {
    1000
}

impl Default for LoopbackSection {
    fn default() -> Self {
        LoopbackSection {
            interfaces: default_interfaces(),
            links: vec![],
            delay_ns: default_delay_ns(),
            jitter_ns: 0,
            seed: 0,
            realtime: false,
        }
    }
}

impl LoopbackSection {
    pub fn backend(&self) -> Result<LoopbackBackend> {
        let mut backend = LoopbackBackend::new(self.interfaces)
            .with_delay(Duration::from_nanos(self.delay_ns))
            .with_jitter(Duration::from_nanos(self.jitter_ns), self.seed)
            .with_realtime(self.realtime);
        for [from, to] in self.links.iter().copied() {
            if from >= self.interfaces || to >= self.interfaces {
                return Err(Error::Configuration(format!(
                    "link {from} -> {to}: the device has {} interfaces",
                    self.interfaces
                )));
            }
            backend = backend.with_link(from, to);
        }
        Ok(backend)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct DataratesSection {
    pub interval_ms: Option<u64>,
    /// How long to capture when no generator is configured
    pub capture_duration_ms: Option<u64>,
}

impl DataratesSection {
    pub fn interval(&self) -> Option<Duration> {
        self.interval_ms.map(Duration::from_millis)
    }

    pub fn capture_duration(&self) -> Option<Duration> {
        self.capture_duration_ms.map(Duration::from_millis)
    }
}

impl MeasurementConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Load a configuration file. Relative paths are relative to the directory of the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::from_open(e, path))?;
        let mut config = MeasurementConfig::parse(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        log::debug!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for g in self.generators.iter_mut() {
            g.trace = base.join(&g.trace);
        }
        for r in self.receivers.iter_mut() {
            for p in [&mut r.latencies, &mut r.capture, &mut r.pcap]
                .into_iter()
                .flatten()
            {
                *p = base.join(&*p);
            }
        }
    }
}

use crate::config::MeasurementConfig;
use crate::error::Result;
use crate::tester::NetworkTester;
use crate::trace::Trace;
use crossbeam_channel::Receiver;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Counters of one interface at the end of a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceReport {
    pub interface: usize,
    pub tx_packets: u64,
    pub captured: u64,
    pub stored: u64,
    pub discarded: u64,
    pub latencies: usize,
}

fn load_traces(config: &MeasurementConfig) -> Result<Vec<Arc<Trace>>> {
    let mut cache: HashMap<(PathBuf, u32), Arc<Trace>> = HashMap::new();
    config
        .generators
        .iter()
        .map(|g| -> Result<Arc<Trace>> {
            let key = (g.trace.clone(), g.repeat);
            if let Some(trace) = cache.get(&key) {
                return Ok(Arc::clone(trace));
            }
            let trace = Arc::new(if g.is_pcap() {
                Trace::from_pcap(&g.trace, g.repeat)?
            } else {
                Trace::load(&g.trace, g.repeat)?
            });
            cache.insert(key, Arc::clone(&trace));
            Ok(trace)
        })
        .collect()
}

/// Run the measurement described by `config` on the emulated device. Without generators, the
/// capture lasts for the configured duration or until a message arrives on `interrupt`.
pub fn run(config: &MeasurementConfig, interrupt: &Receiver<()>) -> Result<Vec<InterfaceReport>> {
    let backend = Arc::new(config.loopback.backend()?);
    let mut tester = NetworkTester::new(backend)?;

    for (g, trace) in config.generators.iter().zip(load_traces(config)?) {
        tester.generator(g.interface)?.bind(trace);
    }
    for r in config.receivers.iter() {
        let filter = r.filter()?;
        let receiver = tester.receiver(r.interface)?;
        receiver.enable_capture(r.capture_length, r.memory)?;
        receiver.set_filter_mac_dst(filter.address, filter.mask);
    }
    tester.set_timestamp_config(config.timestamp.to_config()?);
    tester.write_config()?;

    if let Some(interval) = config.datarates.interval() {
        tester.print_datarates_start(interval)?;
    }
    tester.start_capture()?;
    let replay = if config.generators.is_empty() {
        match config.datarates.capture_duration() {
            Some(duration) => {
                log::info!("Capturing for {duration:?}");
                if interrupt.recv_timeout(duration).is_ok() {
                    log::warn!("Capture interrupted");
                }
            }
            None => log::warn!("Nothing to replay and no capture duration"),
        }
        Ok(())
    } else {
        tester.start_replay()
    };
    // the captures are collected even if the replay failed
    let stopped = tester.stop_capture();
    tester.print_datarates_stop();
    replay?;
    stopped?;

    for r in config.receivers.iter() {
        let capture = tester.receivers()[r.interface].capture();
        if let Some(path) = &r.latencies {
            capture.write_latencies(path)?;
        }
        if let Some(path) = &r.capture {
            capture.write_to_file(path)?;
        }
        if let Some(path) = &r.pcap {
            capture.write_pcap(path)?;
        }
    }

    let reports: Vec<InterfaceReport> = (0..tester.interface_count())
        .map(|i| {
            let capture = tester.receivers()[i].capture();
            InterfaceReport {
                interface: i,
                tx_packets: tester.generators()[i].packet_count_tx(),
                captured: capture.captured_count(),
                stored: capture.stored_count(),
                discarded: capture.discarded_count(),
                latencies: capture.latencies().count(),
            }
        })
        .collect();
    for r in reports.iter().filter(|r| r.tx_packets > 0 || r.captured > 0) {
        log::info!(
            "IF{}: {} packets sent, {} captured ({} stored), {} latencies",
            r.interface,
            r.tx_packets,
            r.captured,
            r.stored,
            r.latencies
        );
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceEntry;
    use crossbeam_channel::bounded;
    use std::fs;

    #[test]
    fn test_run_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = vec![0u8; 64];
        data[0..6].copy_from_slice(&[0x53, 0, 0, 0, 0, 2]);
        Trace::new(vec![TraceEntry { data, gap: 500 }], 1)
            .unwrap()
            .write_to_file(dir.path().join("one.trace"))
            .unwrap();
        let config_path = dir.path().join("measurement.toml");
        fs::write(
            &config_path,
            r#"
            [timestamp]
            mode = "fixed"

            [[generators]]
            interface = 0
            trace = "one.trace"
            repeat = 7

            [[generators]]
            interface = 2
            trace = "one.trace"
            repeat = 7

            [[receivers]]
            interface = 1
            capture_length = 0
            filter_mac_dst = "53:00:00:00:00:02"
            latencies = "latencies.txt"

            [loopback]
            interfaces = 3
            links = [[0, 1], [2, 1]]
            delay_ns = 640
            "#,
        )
        .unwrap();
        let config = MeasurementConfig::load(&config_path).unwrap();
        let (_, interrupt) = bounded(1);
        let reports = run(&config, &interrupt).unwrap();
        assert_eq!(reports[0].tx_packets, 7);
        assert_eq!(reports[2].tx_packets, 7);
        assert_eq!(reports[1].captured, 14);
        assert_eq!(reports[1].latencies, 14);
        let content = fs::read_to_string(dir.path().join("latencies.txt")).unwrap();
        assert_eq!(content.lines().count(), 14);
    }

    #[test]
    fn test_capture_only_is_interruptible() {
        let config = MeasurementConfig::parse(
            r#"
            [[receivers]]
            interface = 0

            [datarates]
            capture_duration_ms = 3600000
            "#,
        )
        .unwrap();
        let (stop, interrupt) = bounded(1);
        stop.send(()).unwrap();
        let reports = run(&config, &interrupt).unwrap();
        assert_eq!(reports.len(), 4);
        assert_eq!(reports[0].captured, 0);
    }
}

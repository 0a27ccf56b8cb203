//! Host-side control of a hardware network tester: trace replay at line rate, capture, hardware
//! timestamping and latency measurement.

/// Errors of the crate
pub mod error;

/// Device clock, conversions between ticks and time, timestamp insertion and extraction
pub mod timestamp;

/// Captured packets, MAC filters and the configuration pushed to the device
pub mod structs;

/// Traces: loading, repetition and the trace container format
pub mod trace;

/// The device interface and its in-memory emulation
pub mod hardware;

/// Per-interface counters and the datarate reporter
pub mod ui;

/// Replay of a trace on an interface
pub mod generator;

/// Capture on an interface
pub mod receiver;

/// Results of a capture
pub mod capture;

/// Orchestration of all the generators and receivers of a device
pub mod tester;

/// pcap import and export
pub mod export;

/// TOML description of a measurement
pub mod config;

/// Measurement runner used by the command line tool
pub mod measurement;

pub use capture::{Capture, Latencies};
pub use error::{Error, HardwareError, Result};
pub use generator::Generator;
pub use receiver::Receiver;
pub use structs::{MacAddr, MacFilter, Packet};
pub use tester::{NetworkTester, State};
pub use timestamp::{TimestampCodec, TimestampConfig, TimestampMode, TimestampWidth};
pub use trace::Trace;

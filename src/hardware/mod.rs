//! Access to the network tester device. All device I/O of the crate goes through the
//! [`HardwareBackend`] trait, so the measurement logic can run against the in-memory
//! [`loopback::LoopbackBackend`] as well as against a real device.

use crate::error::HardwareError;
use crate::structs::HardwareConfig;
use std::sync::Arc;

pub mod loopback;

/// The receive path of an interface, fed by the device with every arriving frame
pub trait FrameSink: Send + Sync {
    /// `frame` holds the whole frame as seen on the wire, `arrival_ticks` is the value of the
    /// device counter at reception
    fn deliver(&self, frame: &[u8], arrival_ticks: u64);
}

pub trait HardwareBackend: Send + Sync {
    /// Number of network interfaces of the device
    fn interface_count(&self) -> usize;

    /// Current value of the free-running timestamp counter, in ticks
    fn now_ticks(&self) -> u64;

    /// Write the configuration of all generators, receivers and of the timestamping. Either the
    /// whole configuration is applied or nothing is.
    fn apply(&self, config: &HardwareConfig) -> Result<(), HardwareError>;

    /// Connect the receive path of an interface
    fn attach(&self, interface: usize, sink: Arc<dyn FrameSink>) -> Result<(), HardwareError>;

    /// Arm or disarm the capture logic of an interface
    fn set_capture(&self, interface: usize, armed: bool) -> Result<(), HardwareError>;

    /// Send a frame when the counter reaches `at_ticks`, or as soon as possible when it is
    /// already past. The send timestamp set up by the last [`apply`](Self::apply) is inserted
    /// with the counter value at which the frame actually leaves. Returns that value once the
    /// frame has been sent.
    fn transmit(&self, interface: usize, frame: &[u8], at_ticks: u64)
        -> Result<u64, HardwareError>;
}

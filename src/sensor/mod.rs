//! Sensor front ends.
//!
//! The peripherals themselves (ADC, lead-off comparators, optical sensor, RTC)
//! are collaborators behind small capability traits, so the sampling logic works
//! the same against the simulated devices in [`mock`] and real drivers:
//!
//! - [`AnalogChannel`]: ECG electrode voltage through the ADC
//! - [`LeadOffDetector`]: AD8232-style LO+/LO- comparators
//! - [`OpticalSensor`]: red/IR photodetector intensities over I2C
//! - [`Clock`]: real-time clock fields for the record timestamp
//!
//! [`SampleProducer`] turns readings into [`Record`](crate::record::Record)s.

pub mod clock;
pub mod mock;
mod producer;
pub mod spo2;

pub use clock::{FixedClock, RtcClock};
pub use producer::{ecg_voltage, SampleProducer};

use crate::error::AppResult;
use crate::record::Timestamp;

/// Capability: single-ended analog input
pub trait AnalogChannel: Send {
    /// Read one conversion, an integer in `[0, 2^bits - 1]`
    fn read_raw(&mut self) -> AppResult<u16>;
}

/// State of the two electrode lead-off comparators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeadStatus {
    /// LO+ electrode detached
    pub plus_off: bool,
    /// LO- electrode detached
    pub minus_off: bool,
}

impl LeadStatus {
    /// Both electrodes in contact
    pub fn attached(&self) -> bool {
        !self.plus_off && !self.minus_off
    }
}

/// Capability: electrode lead-off detection
pub trait LeadOffDetector: Send {
    /// Current comparator state
    fn leads(&mut self) -> AppResult<LeadStatus>;
}

/// One red/IR intensity pair (18-bit samples)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpticalSample {
    /// Red LED channel
    pub red: u32,
    /// Infrared LED channel
    pub ir: u32,
}

/// Capability: pulse-oximetry photodetector
pub trait OpticalSensor: Send {
    /// Read one red/IR sample pair from the device FIFO
    fn read_sample(&mut self) -> AppResult<OpticalSample>;
}

/// Capability: real-time clock
pub trait Clock: Send {
    /// Current weekday and time of day
    fn now(&self) -> AppResult<Timestamp>;
}

//! Simulated peripherals
//!
//! Stand-ins for the ECG front end and the pulse oximeter so the node runs on a
//! host without hardware attached.
//!
//! # Available Mocks
//!
//! - `MockAdc` - fixed codes, a scripted sequence, or a synthetic heartbeat
//! - `MockLeads` - lead-off comparators toggled from a shared switch
//! - `MockOximeter` - fixed or noisy red/IR intensities, with fault injection

use super::{AnalogChannel, LeadOffDetector, LeadStatus, OpticalSample, OpticalSensor};
use crate::error::{AppResult, NodeError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// =============================================================================
// MockAdc - Simulated ECG ADC channel
// =============================================================================

enum AdcSource {
    Constant(u16),
    Sequence(VecDeque<u16>),
    Heartbeat { rng: StdRng, tick: u32 },
}

/// Mock ADC channel
///
/// ```rust,ignore
/// let mut adc = MockAdc::sequence([100, 200]);
/// assert_eq!(adc.read_raw()?, 100);
/// ```
pub struct MockAdc {
    source: AdcSource,
}

impl MockAdc {
    /// Always returns `code`
    pub fn constant(code: u16) -> Self {
        Self {
            source: AdcSource::Constant(code),
        }
    }

    /// Returns the codes in order, then repeats the last one
    pub fn sequence(codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            source: AdcSource::Sequence(codes.into_iter().collect()),
        }
    }

    /// Mid-scale baseline with a QRS spike every 4 reads plus a little noise
    pub fn heartbeat(seed: u64) -> Self {
        Self {
            source: AdcSource::Heartbeat {
                rng: StdRng::seed_from_u64(seed),
                tick: 0,
            },
        }
    }
}

impl AnalogChannel for MockAdc {
    fn read_raw(&mut self) -> AppResult<u16> {
        match &mut self.source {
            AdcSource::Constant(code) => Ok(*code),
            AdcSource::Sequence(codes) => {
                let code = if codes.len() > 1 {
                    codes.pop_front()
                } else {
                    codes.front().copied()
                };
                code.ok_or_else(|| NodeError::HardwareFault("ADC sequence is empty".into()))
            }
            AdcSource::Heartbeat { rng, tick } => {
                *tick = tick.wrapping_add(1);
                let base: i32 = if *tick % 4 == 0 { 3400 } else { 2048 };
                let code = base + rng.gen_range(-24..=24);
                Ok(code.clamp(0, 4095) as u16)
            }
        }
    }
}

// =============================================================================
// MockLeads - Simulated lead-off comparators
// =============================================================================

/// Mock lead-off detector; clones share the same switches
#[derive(Clone, Default)]
pub struct MockLeads {
    plus_off: Arc<AtomicBool>,
    minus_off: Arc<AtomicBool>,
}

impl MockLeads {
    /// Both electrodes in contact
    pub fn attached() -> Self {
        Self::default()
    }

    /// Set the LO+ comparator
    pub fn detach_plus(&self, off: bool) {
        self.plus_off.store(off, Ordering::SeqCst);
    }

    /// Set the LO- comparator
    pub fn detach_minus(&self, off: bool) {
        self.minus_off.store(off, Ordering::SeqCst);
    }
}

impl LeadOffDetector for MockLeads {
    fn leads(&mut self) -> AppResult<LeadStatus> {
        Ok(LeadStatus {
            plus_off: self.plus_off.load(Ordering::SeqCst),
            minus_off: self.minus_off.load(Ordering::SeqCst),
        })
    }
}

// =============================================================================
// MockOximeter - Simulated optical sensor
// =============================================================================

/// Mock pulse oximeter; clones share the fault switch
#[derive(Clone)]
pub struct MockOximeter {
    sample: OpticalSample,
    rng: Option<Arc<parking_lot::Mutex<StdRng>>>,
    fail_next: Arc<AtomicBool>,
}

impl MockOximeter {
    /// Always returns the given intensities
    pub fn constant(red: u32, ir: u32) -> Self {
        Self {
            sample: OpticalSample { red, ir },
            rng: None,
            fail_next: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Healthy finger: ratio near 0.5, roughly 97 %
    pub fn healthy(seed: u64) -> Self {
        Self {
            sample: OpticalSample {
                red: (100 << 10) | 50,
                ir: (100 << 10) | 100,
            },
            rng: Some(Arc::new(parking_lot::Mutex::new(StdRng::seed_from_u64(seed)))),
            fail_next: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make the next read fail as if the I2C bus stopped answering
    pub fn fail_next_read(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl OpticalSensor for MockOximeter {
    fn read_sample(&mut self) -> AppResult<OpticalSample> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(NodeError::HardwareFault(
                "oximeter did not acknowledge FIFO read".into(),
            ));
        }
        let Some(rng) = &self.rng else {
            return Ok(self.sample);
        };

        let mut rng = rng.lock();
        let jitter = |rng: &mut StdRng, channel: u32| {
            let ac = (channel & 0x3FF) as i32 + rng.gen_range(-4..=4);
            (channel & !0x3FF) | ac.clamp(1, 0x3FF) as u32
        };
        Ok(OpticalSample {
            red: jitter(&mut *rng, self.sample.red),
            ir: jitter(&mut *rng, self.sample.ir),
        })
    }
}

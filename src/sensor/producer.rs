use super::spo2::Spo2Estimate;
use super::{AnalogChannel, Clock, LeadOffDetector, OpticalSensor};
use crate::config::SensorConfig;
use crate::error::{AppResult, NodeError};
use crate::record::Record;
use tracing::{debug, warn};

/// Convert an ADC code to volts: `raw * vref / 2^bits`
pub fn ecg_voltage(raw: u16, reference_volts: f32, resolution_bits: u32) -> f32 {
    raw as f32 * reference_volts / (1u32 << resolution_bits) as f32
}

struct EcgFrontEnd {
    adc: Box<dyn AnalogChannel>,
    leads: Box<dyn LeadOffDetector>,
}

/// Reads the peripherals and formats timestamped records
///
/// Channels are attached with [`with_ecg`](Self::with_ecg) and
/// [`with_spo2`](Self::with_spo2); a producer with neither yields nothing.
pub struct SampleProducer {
    clock: Box<dyn Clock>,
    ecg: Option<EcgFrontEnd>,
    oximeter: Option<Box<dyn OpticalSensor>>,
    reference_volts: f32,
    resolution_bits: u32,
}

impl SampleProducer {
    /// Producer with no channels attached
    pub fn new(clock: impl Clock + 'static, sensors: &SensorConfig) -> Self {
        Self {
            clock: Box::new(clock),
            ecg: None,
            oximeter: None,
            reference_volts: sensors.adc_reference_volts,
            resolution_bits: sensors.adc_resolution_bits,
        }
    }

    /// Attach the ECG front end
    pub fn with_ecg(
        mut self,
        adc: impl AnalogChannel + 'static,
        leads: impl LeadOffDetector + 'static,
    ) -> Self {
        self.ecg = Some(EcgFrontEnd {
            adc: Box::new(adc),
            leads: Box::new(leads),
        });
        self
    }

    /// Attach the pulse oximeter
    pub fn with_spo2(mut self, sensor: impl OpticalSensor + 'static) -> Self {
        self.oximeter = Some(Box::new(sensor));
        self
    }

    /// Sample the ECG channel
    ///
    /// A detached electrode or a code outside the ADC range yields
    /// `SensorReadInvalid`. Returns `Ok(None)` when no ECG front end is attached.
    pub fn ecg_record(&mut self) -> AppResult<Option<Record>> {
        let Some(ecg) = self.ecg.as_mut() else {
            return Ok(None);
        };

        let leads = ecg.leads.leads()?;
        if !leads.attached() {
            return Err(NodeError::sensor(
                "ecg",
                format!(
                    "lead off (LO+ {}, LO- {})",
                    leads.plus_off, leads.minus_off
                ),
            ));
        }

        let raw = ecg.adc.read_raw()?;
        let full_scale = 1u32 << self.resolution_bits;
        if u32::from(raw) >= full_scale {
            return Err(NodeError::sensor(
                "ecg",
                format!("ADC code {raw} exceeds {} bits", self.resolution_bits),
            ));
        }

        let volts = ecg_voltage(raw, self.reference_volts, self.resolution_bits);
        Ok(Some(Record::ecg(volts, self.clock.now()?)))
    }

    /// Sample the pulse oximeter
    ///
    /// Yields `SensorReadInvalid` when there is no usable signal or the
    /// unclamped estimate falls outside `[0, 100]`.
    pub fn spo2_record(&mut self) -> AppResult<Option<Record>> {
        let Some(oximeter) = self.oximeter.as_mut() else {
            return Ok(None);
        };

        let sample = oximeter.read_sample()?;
        let estimate = Spo2Estimate::from_intensities(sample.red, sample.ir).ok_or_else(|| {
            NodeError::sensor(
                "spo2",
                format!("no signal (red {:#07x}, ir {:#07x})", sample.red, sample.ir),
            )
        })?;
        if !estimate.in_range() {
            return Err(NodeError::sensor(
                "spo2",
                format!("estimate {:.2} out of range", estimate.raw),
            ));
        }

        Ok(Some(Record::spo2(estimate.percent(), self.clock.now()?)))
    }

    /// Sample every attached channel once
    ///
    /// Invalid readings are dropped with a warning; hardware faults abort the
    /// whole tick.
    pub fn produce(&mut self) -> AppResult<Vec<Record>> {
        let mut records = Vec::with_capacity(2);
        for result in [self.ecg_record(), self.spo2_record()] {
            match result {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) if err.is_recoverable() => warn!(error = %err, "Sample dropped"),
                Err(err) => return Err(err),
            }
        }
        debug!(count = records.len(), "Produced samples");
        Ok(records)
    }
}

//! Ratio-of-ratios SpO2 estimate.
//!
//! Each 18-bit photodetector sample is split into an AC part (low 10 bits) and a
//! DC part (remaining high bits). With `R = (AC_red/DC_red) / (AC_ir/DC_ir)`
//! the empirical calibration is `SpO2 = 110 - 25 R`.

/// Calibration intercept
pub const SPO2_A: f32 = 110.0;
/// Calibration slope
pub const SPO2_B: f32 = 25.0;

const SAMPLE_MASK: u32 = 0x3_FFFF;
const AC_BITS: u32 = 10;
const AC_MASK: u32 = (1 << AC_BITS) - 1;

/// AC/DC split of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Components {
    /// Pulsatile part
    pub ac: u32,
    /// Baseline part
    pub dc: u32,
}

impl Components {
    /// Split a raw 18-bit sample; bits above 18 are ignored
    pub fn split(raw: u32) -> Self {
        let raw = raw & SAMPLE_MASK;
        Self {
            ac: raw & AC_MASK,
            dc: raw >> AC_BITS,
        }
    }

    fn perfusion(&self) -> f32 {
        self.ac as f32 / self.dc as f32
    }
}

/// Unclamped estimate, kept so callers can tell a saturated reading from a real one
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spo2Estimate {
    /// Ratio of ratios
    pub ratio: f32,
    /// `SPO2_A - SPO2_B * ratio`, before clamping
    pub raw: f32,
}

impl Spo2Estimate {
    /// Compute the estimate; `None` when either DC part or the IR AC part is zero
    pub fn from_intensities(red: u32, ir: u32) -> Option<Self> {
        let red = Components::split(red);
        let ir = Components::split(ir);
        if red.dc == 0 || ir.dc == 0 || ir.ac == 0 {
            return None;
        }
        let ratio = red.perfusion() / ir.perfusion();
        Some(Self {
            ratio,
            raw: SPO2_A - SPO2_B * ratio,
        })
    }

    /// Clamped percentage
    pub fn percent(&self) -> f32 {
        self.raw.clamp(0.0, 100.0)
    }

    /// Whether the unclamped value is a plausible saturation
    pub fn in_range(&self) -> bool {
        (0.0..=100.0).contains(&self.raw)
    }
}

/// SpO2 percentage in `[0, 100]`; exactly `0.0` when there is no usable signal
pub fn spo2_percent(red: u32, ir: u32) -> f32 {
    Spo2Estimate::from_intensities(red, ir).map_or(0.0, |e| e.percent())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_split() {
        assert_eq!(
            Components::split(0x03_0400),
            Components { ac: 0, dc: 0xC1 }
        );
        assert_eq!(
            Components::split(0x03_0200),
            Components {
                ac: 0x200,
                dc: 0xC0
            }
        );
        // only 18 bits are significant
        assert_eq!(Components::split(0xFFFC_0000), Components { ac: 0, dc: 0 });
    }

    #[test]
    fn test_reference_pair_is_clamped() {
        let value = spo2_percent(0x03_0400, 0x03_0200);
        assert!((0.0..=100.0).contains(&value));
        // red AC is zero, so the raw estimate is the intercept
        let estimate = Spo2Estimate::from_intensities(0x03_0400, 0x03_0200).unwrap();
        assert_eq!(estimate.raw, SPO2_A);
        assert!(!estimate.in_range());
        assert_eq!(value, 100.0);
    }

    #[test]
    fn test_zero_dc_is_exactly_zero() {
        assert_eq!(spo2_percent(0x00_0000, 0x03_0200), 0.0);
        assert_eq!(spo2_percent(0x03_0400, 0x00_0123), 0.0);
    }

    #[test]
    fn test_typical_reading() {
        // ratio 0.5 -> 97.5 %
        let red = (100 << 10) | 50;
        let ir = (100 << 10) | 100;
        let estimate = Spo2Estimate::from_intensities(red, ir).unwrap();
        assert!((estimate.ratio - 0.5).abs() < 1e-6);
        assert!((estimate.percent() - 97.5).abs() < 1e-4);
        assert!(estimate.in_range());
    }

    proptest! {
        #[test]
        fn prop_output_within_bounds(red in 0u32..(1 << 18), ir in 0u32..(1 << 18)) {
            let value = spo2_percent(red, ir);
            prop_assert!((0.0..=100.0).contains(&value));
        }

        #[test]
        fn prop_zero_dc_gives_zero(ac_red in 0u32..1024, ir in 0u32..(1 << 18)) {
            prop_assert_eq!(spo2_percent(ac_red, ir), 0.0);
            prop_assert_eq!(spo2_percent(ir, ac_red), 0.0);
        }
    }
}

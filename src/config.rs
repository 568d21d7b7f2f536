//! Pulse generator settings and ADC calibration

use crate::{protocol::Mode, BLOCK_LEN};

/// RX gating must start at least this many clock cycles after TX starts
/// on top of the pulse width
pub const MIN_DELAY_MARGIN: u32 = 5;

/// Settings currently latched in the CPLD
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PulseConfiguration {
    /// Samples per burst, both polarizations together
    pub n_samples: u32,
    /// TX pulse width in clock cycles
    pub pulse_width: u32,
    /// TX to RX delay in clock cycles
    pub delay: u32,
    pub pol_precede: u32,
    pub adc_delay: u32,
    pub mode: Mode,
    pub atten22: (u32, u32),
    pub atten35: (u32, u32),
}

impl Default for PulseConfiguration {
    fn default() -> Self {
        Self {
            n_samples: 512,
            pulse_width: 10,
            delay: 222,
            pol_precede: 0,
            adc_delay: 1,
            mode: Mode::CoPol,
            atten22: (0, 0),
            atten35: (0, 0),
        }
    }
}

impl PulseConfiguration {
    /// Smallest delay allowed with the current pulse width
    pub fn min_delay(&self) -> u32 {
        self.pulse_width + MIN_DELAY_MARGIN
    }

    pub fn timing_is_valid(&self) -> bool {
        self.delay >= self.min_delay()
    }

    /// Samples per polarization in one burst
    pub fn samples_per_polarization(&self) -> usize {
        self.n_samples as usize / 2
    }

    /// Bytes to read for one burst (one 9 byte block per sample)
    pub fn burst_bytes(&self) -> usize {
        BLOCK_LEN * self.n_samples as usize
    }
}

/// ADC zero offsets per band and quadrature, subtracted from every sample
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CalibrationOffsets {
    pub i22: i16,
    pub q22: i16,
    pub i35: i16,
    pub q35: i16,
}

impl CalibrationOffsets {
    pub const fn zero() -> Self {
        Self {
            i22: 0,
            q22: 0,
            i35: 0,
            q35: 0,
        }
    }
}

impl Default for CalibrationOffsets {
    /// Offsets measured on the bench with the receiver inputs terminated
    fn default() -> Self {
        Self {
            i22: 7,
            q22: 11,
            i35: 4,
            q35: 9,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_satisfy_timing() {
        let conf = PulseConfiguration::default();
        assert!(conf.timing_is_valid());
        assert_eq!(conf.samples_per_polarization(), 256);
        assert_eq!(conf.burst_bytes(), 4608);
    }

    #[test]
    fn test_min_delay() {
        let conf = PulseConfiguration {
            pulse_width: 40,
            delay: 44,
            ..Default::default()
        };
        assert_eq!(conf.min_delay(), 45);
        assert!(!conf.timing_is_valid());
    }
}

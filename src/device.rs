//! The instrument handle shared between the command loop and the slow loop
//!
//! Every transport exchange goes through one [`Device`] behind a mutex, and
//! the pulse configuration lives next to the link it describes, so the two
//! can only change together.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    config::{CalibrationOffsets, PulseConfiguration, MIN_DELAY_MARGIN},
    error::DeviceError,
    protocol::{Band, Mode},
    transaction::{check_range, Link, MAX_BYTE_ARG},
    transport::Transport,
};

pub type SharedDevice<T> = Arc<Mutex<Device<T>>>;

/// Lock the device for one transaction or one slow-loop iteration.
///
/// A panic while holding the lock leaves the configuration as it was after
/// the last completed call, so a poisoned lock is still usable.
pub fn lock<T>(device: &SharedDevice<T>) -> MutexGuard<'_, Device<T>> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Device<T> {
    link: Link<T>,
    config: PulseConfiguration,
    offsets: CalibrationOffsets,
}

impl<T: Transport> Device<T> {
    pub fn new(transport: T, offsets: CalibrationOffsets) -> Self {
        Self {
            link: Link::new(transport),
            config: PulseConfiguration::default(),
            offsets,
        }
    }

    pub fn shared(self) -> SharedDevice<T> {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &PulseConfiguration {
        &self.config
    }

    pub fn offsets(&self) -> &CalibrationOffsets {
        &self.offsets
    }

    pub fn link(&mut self) -> &mut Link<T> {
        &mut self.link
    }

    pub fn set_num_samples(&mut self, n_samples: u32) -> Result<(), DeviceError> {
        self.link.set_num_samples(n_samples)?;
        self.config.n_samples = n_samples;
        Ok(())
    }

    pub fn set_pulse_width(&mut self, pulse_width: u32) -> Result<(), DeviceError> {
        check_range("pulse_width", pulse_width, MAX_BYTE_ARG, "0..=255")?;
        if self.config.delay < pulse_width + MIN_DELAY_MARGIN {
            return Err(DeviceError::DelayBeforePulseEnd {
                delay: self.config.delay,
                pulse_width,
            });
        }
        self.link.set_pulse_width(pulse_width)?;
        self.config.pulse_width = pulse_width;
        Ok(())
    }

    pub fn set_delay(&mut self, delay: u32) -> Result<(), DeviceError> {
        if delay < self.config.min_delay() {
            return Err(DeviceError::DelayBeforePulseEnd {
                delay,
                pulse_width: self.config.pulse_width,
            });
        }
        self.link.set_delay(delay)?;
        self.config.delay = delay;
        Ok(())
    }

    pub fn set_adc_delay(&mut self, adc_delay: u32) -> Result<(), DeviceError> {
        self.link.set_adc_delay(adc_delay)?;
        self.config.adc_delay = adc_delay;
        Ok(())
    }

    pub fn set_pol_precede(&mut self, pol_precede: u32) -> Result<(), DeviceError> {
        self.link.set_pol_precede(pol_precede)?;
        self.config.pol_precede = pol_precede;
        Ok(())
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<(), DeviceError> {
        self.link.set_mode(mode)?;
        self.config.mode = mode;
        Ok(())
    }

    pub fn set_attenuator(&mut self, band: Band, ch1: u32, ch2: u32) -> Result<(), DeviceError> {
        self.link.set_attenuator(band, ch1, ch2)?;
        match band {
            Band::Ghz22 => self.config.atten22 = (ch1, ch2),
            Band::Ghz35 => self.config.atten35 = (ch1, ch2),
        }
        Ok(())
    }

    /// Load the power-on configuration into the CPLD, stopping at the first
    /// failure
    pub fn apply_defaults(&mut self) -> Result<(), DeviceError> {
        let defaults = PulseConfiguration::default();
        self.set_num_samples(defaults.n_samples)?;
        // Keep delay >= pw + 5 true after every single step
        if self.config.delay >= defaults.pulse_width + MIN_DELAY_MARGIN {
            self.set_pulse_width(defaults.pulse_width)?;
            self.set_delay(defaults.delay)?;
        } else {
            self.set_delay(defaults.delay)?;
            self.set_pulse_width(defaults.pulse_width)?;
        }
        self.set_adc_delay(defaults.adc_delay)?;
        self.set_pol_precede(defaults.pol_precede)?;
        self.set_mode(defaults.mode)?;
        self.set_attenuator(Band::Ghz22, defaults.atten22.0, defaults.atten22.1)?;
        self.set_attenuator(Band::Ghz35, defaults.atten35.0, defaults.atten35.1)?;
        Ok(())
    }
}

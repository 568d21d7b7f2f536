//! Wire constants of the microcontroller command set

use std::{fmt, str::FromStr};

// CPLD settings
pub const SET_PW: u8 = 0x02;
pub const SET_DELAY: u8 = 0x04;
pub const SET_NUM_SAMPLES: u8 = 0x06;
pub const SET_MODE: u8 = 0x08;
pub const SET_ADC: u8 = 0x0A;
pub const GET_STATUS: u8 = 0x0C;
pub const SET_POL_PRECEDE: u8 = 0x12;
pub const SET_ATTEN22: u8 = 0x14;
pub const SET_ATTEN35: u8 = 0x18;
pub const GET_LOCK: u8 = 0xD0;
// Measurements
pub const START_MSRMNT: u8 = 0x1E;
pub const START_SLOW_LOOP: u8 = 0x2E;
pub const STOP_SLOW_LOOP: u8 = 0x3E;
pub const SET_LOOP_FREQ_5: u8 = 0x4E;
pub const SET_LOOP_FREQ_10: u8 = 0x5E;
pub const SET_LOOP_FREQ_20: u8 = 0x6E;
// DS1621 thermostats
pub const SET_CASE_TEMP: u8 = 0x07;
pub const GET_CASE_TEMP: u8 = 0x17;
pub const SET_BOARD_TEMP: u8 = 0x03;
pub const GET_BOARD_TEMP: u8 = 0x13;
// Microcontroller
pub const SET_RESET_COUNT: u8 = 0x09;
pub const GET_RESET_COUNT: u8 = 0x19;
pub const GET_ADC4: u8 = 0xA4;

// Status bytes returned by the microcontroller
pub const CPLD_BUSY: u8 = 0xBB;
pub const OK: u8 = 0xF0;
pub const DONE: u8 = 0xF1;

/// Reference voltage at the microcontroller's AVCC pin
pub const V_REF: f64 = 5.0;

/// Operating mode of the pulse generator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    CoPol,
    CrossPol,
    Calibrate,
    Radiometer,
}

impl Mode {
    pub fn code(self) -> u8 {
        match self {
            Mode::CoPol => 0x02,
            Mode::CrossPol => 0x04,
            Mode::Calibrate => 0x06,
            Mode::Radiometer => 0x08,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::CoPol => "COPOL",
            Mode::CrossPol => "CROSSPOL",
            Mode::Calibrate => "CALIBRATE",
            Mode::Radiometer => "RADIOMETER",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COPOL" => Ok(Mode::CoPol),
            "CROSSPOL" => Ok(Mode::CrossPol),
            "CALIBRATE" => Ok(Mode::Calibrate),
            "RADIOMETER" => Ok(Mode::Radiometer),
            other => Err(format!("unknown mode {other:?}")),
        }
    }
}

/// RF band, each digitized on its own I/Q pair
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Band {
    Ghz22,
    Ghz35,
}

impl Band {
    pub fn attenuator_opcode(self) -> u8 {
        match self {
            Band::Ghz22 => SET_ATTEN22,
            Band::Ghz35 => SET_ATTEN35,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Band::Ghz22 => "22",
            Band::Ghz35 => "35",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarization {
    H,
    V,
}

impl Polarization {
    pub fn label(self) -> &'static str {
        match self {
            Polarization::H => "H",
            Polarization::V => "V",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names_round_trip() {
        for mode in [Mode::CoPol, Mode::CrossPol, Mode::Calibrate, Mode::Radiometer] {
            assert_eq!(mode.name().parse::<Mode>().unwrap(), mode);
        }
        assert!("copol".parse::<Mode>().is_err());
    }

    #[test]
    fn test_loop_opcodes_do_not_collide() {
        let opcodes = [
            SET_PW,
            SET_DELAY,
            SET_NUM_SAMPLES,
            SET_MODE,
            SET_ADC,
            GET_STATUS,
            SET_POL_PRECEDE,
            SET_ATTEN22,
            SET_ATTEN35,
            GET_LOCK,
            START_MSRMNT,
            START_SLOW_LOOP,
            STOP_SLOW_LOOP,
            SET_LOOP_FREQ_5,
            SET_LOOP_FREQ_10,
            SET_LOOP_FREQ_20,
            SET_CASE_TEMP,
            GET_CASE_TEMP,
            SET_BOARD_TEMP,
            GET_BOARD_TEMP,
            SET_RESET_COUNT,
            GET_RESET_COUNT,
            GET_ADC4,
            GET_ADC4 + 1,
            GET_ADC4 + 2,
            GET_ADC4 + 3,
        ];
        for (i, a) in opcodes.iter().enumerate() {
            for b in &opcodes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}

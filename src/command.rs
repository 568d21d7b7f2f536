//! Parsing of the daemon's socket commands
//!
//! A client sends three fixed-length, NUL padded fields: the command name and
//! up to two arguments.

use std::str::FromStr;

use thiserror::Error;

use crate::protocol::{Band, Mode};

pub const FIELD_LEN: usize = 32;
pub const MESSAGE_LEN: usize = 3 * FIELD_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("{command}: missing argument")]
    MissingArgument { command: &'static str },
    #[error("{command}: invalid argument {value:?}")]
    InvalidArgument { command: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    SetNumSamples(u32),
    SetPulseWidth(u32),
    SetDelay(u32),
    SetAdcDelay(u32),
    SetPolPrecede(u32),
    SetMode(Mode),
    SetAttenuator { band: Band, ch1: u32, ch2: u32 },
    SetLoopFreq(u32),
    /// Reload the power-on configuration
    SetDefault,
    GetStatus,
    GetLock,
    GetAdc(u8),
    GetCaseTemp,
    SetCaseTemp(u32),
    GetBoardTemp,
    SetBoardTemp(u32),
    GetResetCount,
    SetResetCount,
    /// Single burst, saved to a file
    Start,
    /// Delay sweep
    Radar,
    StartSlowLoop,
    StopSlowLoop,
    /// List the serial ports on this machine
    GetDeviceList,
    /// Read one raw byte from the device
    Read,
    /// Write one raw byte to the device
    Write(u8),
    Purge,
    Quit,
}

fn number<T: FromStr>(command: &'static str, arg: &str) -> Result<T, CommandError> {
    if arg.is_empty() {
        return Err(CommandError::MissingArgument { command });
    }
    arg.parse().map_err(|_| CommandError::InvalidArgument {
        command,
        value: arg.to_owned(),
    })
}

impl Command {
    /// Command from its name and arguments; unused arguments are ignored
    pub fn parse(name: &str, arg1: &str, arg2: &str) -> Result<Self, CommandError> {
        use Command::*;
        Ok(match name {
            "set_num_samples" | "set_n_samples" => SetNumSamples(number("set_num_samples", arg1)?),
            "set_pw" => SetPulseWidth(number("set_pw", arg1)?),
            "set_delay" => SetDelay(number("set_delay", arg1)?),
            "set_adc_delay" => SetAdcDelay(number("set_adc_delay", arg1)?),
            "set_pol_precede" => SetPolPrecede(number("set_pol_precede", arg1)?),
            "set_mode" => {
                if arg1.is_empty() {
                    return Err(CommandError::MissingArgument { command: "set_mode" });
                }
                SetMode(arg1.parse().map_err(|_| CommandError::InvalidArgument {
                    command: "set_mode",
                    value: arg1.to_owned(),
                })?)
            }
            "set_atten22" => SetAttenuator {
                band: Band::Ghz22,
                ch1: number("set_atten22", arg1)?,
                ch2: number("set_atten22", arg2)?,
            },
            "set_atten35" => SetAttenuator {
                band: Band::Ghz35,
                ch1: number("set_atten35", arg1)?,
                ch2: number("set_atten35", arg2)?,
            },
            "set_loop_freq" => SetLoopFreq(number("set_loop_freq", arg1)?),
            "set_default" => SetDefault,
            "get_status" => GetStatus,
            "get_lock" => GetLock,
            "get_adc4" => GetAdc(4),
            "get_adc5" => GetAdc(5),
            "get_adc6" => GetAdc(6),
            "get_adc7" => GetAdc(7),
            "get_case_temp" => GetCaseTemp,
            "set_case_temp" => SetCaseTemp(number("set_case_temp", arg1)?),
            "get_board_temp" => GetBoardTemp,
            "set_board_temp" => SetBoardTemp(number("set_board_temp", arg1)?),
            "get_reset_count" => GetResetCount,
            "set_reset_count" => SetResetCount,
            "start" => Start,
            "radar" => Radar,
            "start_slow_loop" => StartSlowLoop,
            "stop_slow_loop" => StopSlowLoop,
            "get_device_list" => GetDeviceList,
            "read" => Read,
            "write" => Write(number("write", arg1)?),
            "purge" => Purge,
            "quit" => Quit,
            other => return Err(CommandError::Unknown(other.to_owned())),
        })
    }

    /// Parse a raw socket message of up to three NUL padded fields
    pub fn from_message(message: &[u8]) -> Result<Self, CommandError> {
        let [name, arg1, arg2] = split_fields(message);
        Self::parse(&name, &arg1, &arg2)
    }

    /// Whether the command changes the pulse configuration
    pub fn reconfigures(&self) -> bool {
        use Command::*;
        matches!(
            self,
            SetNumSamples(_)
                | SetPulseWidth(_)
                | SetDelay(_)
                | SetAdcDelay(_)
                | SetPolPrecede(_)
                | SetMode(_)
                | SetAttenuator { .. }
                | SetDefault
        )
    }
}

/// The three text fields of a message. Missing fields are empty and every
/// field ends at its first NUL.
pub fn split_fields(message: &[u8]) -> [String; 3] {
    let mut fields: [String; 3] = Default::default();
    for (field, chunk) in fields.iter_mut().zip(message.chunks(FIELD_LEN)) {
        let end = chunk.iter().position(|b| *b == 0).unwrap_or(chunk.len());
        *field = String::from_utf8_lossy(&chunk[..end]).trim().to_owned();
    }
    fields
}

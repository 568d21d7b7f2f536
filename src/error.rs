//! Error taxonomy for the protocol engine

use std::io;

use thiserror::Error;

/// Failures of a single command/response exchange with the microcontroller
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The echoed byte differs from the byte we sent (line corruption)
    #[error("transmission error: sent {sent:#04x}, device echoed {echoed:#04x}")]
    Transmission { sent: u8, echoed: u8 },
    /// The transport returned nothing before its read timeout expired
    #[error("no response from device while waiting for {waiting_for}")]
    NoResponse { waiting_for: &'static str },
    /// Argument outside the hardware-defined domain, rejected before any I/O
    #[error("{field} = {value} is outside the hardware domain ({domain})")]
    Argument {
        field: &'static str,
        value: u32,
        domain: &'static str,
    },
    /// The CPLD answered BUSY instead of OK
    #[error("CPLD busy after opcode {opcode:#04x}")]
    Busy { opcode: u8 },
    /// Missing or wrong OK/DONE acknowledgment
    #[error("protocol error after opcode {opcode:#04x}: expected {expected:#04x}, got {actual:#04x}")]
    Protocol { opcode: u8, expected: u8, actual: u8 },
    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Coarse outcome of one burst attempt, drives the retry/abort decisions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionStatus {
    Ok,
    TransmissionError,
    ShortRead,
    FramingError,
}

/// Why the recovered byte range could not be turned into a burst
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("too few synchronized bytes (first = {first}, last = {last})")]
    TooFewBlocks { first: usize, last: usize },
    #[error("block boundaries out of step (first = {first}, last = {last})")]
    Misaligned { first: usize, last: usize },
    #[error("decoded {decoded} samples per polarization, configuration implies {expected}")]
    SampleCount { expected: usize, decoded: usize },
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("short read: requested {requested} bytes, received {received}")]
    ShortRead { requested: usize, received: usize },
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("burst failed after {attempts} attempts, last error: {last}")]
    RetriesExhausted {
        attempts: usize,
        last: Box<AcquisitionError>,
    },
}

impl AcquisitionError {
    pub fn status(&self) -> AcquisitionStatus {
        match self {
            AcquisitionError::Transaction(_) => AcquisitionStatus::TransmissionError,
            AcquisitionError::ShortRead { .. } => AcquisitionStatus::ShortRead,
            AcquisitionError::Framing(_) => AcquisitionStatus::FramingError,
            AcquisitionError::RetriesExhausted { last, .. } => last.status(),
        }
    }
}

/// Errors from operations that keep the pulse configuration in step with hardware
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("delay {delay} must be at least pulse width {pulse_width} + 5")]
    DelayBeforePulseEnd { delay: u32, pulse_width: u32 },
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

/// A delay sweep stops at the first failing delay
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("sweep aborted at delay {delay}: could not set delay: {source}")]
    Configure { delay: u32, source: DeviceError },
    #[error("sweep aborted at delay {delay}: {source}")]
    Acquisition {
        delay: u32,
        source: AcquisitionError,
    },
    #[error("failed to write sweep row: {0}")]
    Output(#[from] io::Error),
}

impl SweepError {
    /// Delay at which the sweep was aborted, if the failure was tied to one
    pub fn delay(&self) -> Option<u32> {
        match self {
            SweepError::Configure { delay, .. } | SweepError::Acquisition { delay, .. } => {
                Some(*delay)
            }
            SweepError::Output(_) => None,
        }
    }
}

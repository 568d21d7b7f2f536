//! Protocol engine for the ATTRRAC radar/radiometer front-end.
//!
//! The instrument is a CPLD pulse generator and a four channel ADC behind a
//! USB serial bridge. This crate speaks its command/response protocol,
//! recovers sample records from the raw USB stream, runs the burst, sweep and
//! slow-loop acquisitions and reduces the samples to per-channel statistics.

pub mod acquisition;
pub mod args;
pub mod burst;
pub mod command;
pub mod config;
pub mod daemon;
pub mod decode;
pub mod device;
pub mod error;
pub mod output;
pub mod protocol;
pub mod slow_loop;
pub mod stats;
pub mod sync;
pub mod transaction;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

/// Bytes per device block: one counter byte followed by four 12 bit samples
pub const BLOCK_LEN: usize = 9;
/// Bytes per combined H/V record (two consecutive blocks)
pub const RECORD_LEN: usize = 2 * BLOCK_LEN;

//! Argument parsing for running from the command line

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

use crate::config::CalibrationOffsets;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Serial device of the instrument's USB bridge
    #[clap(short, long, default_value = "/dev/ttyUSB0")]
    pub device: String,
    /// Baud rate of the USB bridge
    #[clap(short, long, default_value_t = 3_000_000)]
    pub baud: u32,
    /// Address to accept commands on
    #[clap(short, long, default_value = "127.0.0.1:1111")]
    pub listen: SocketAddr,
    /// Directory output files are written to
    #[clap(long, default_value = ".")]
    pub data_dir: PathBuf,
    /// Directory finished output files are moved to
    #[clap(long, default_value = "data_to_send")]
    pub transfer_dir: PathBuf,
    /// Lock file guarding against a second instance
    #[clap(long, default_value = "attrracd.lock")]
    pub lock_file: PathBuf,
    /// Serial read/write timeout before the first burst is configured (ms)
    #[clap(long, default_value_t = 15_000)]
    #[clap(value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_ms: u64,
    /// ADC zero offsets as I22,Q22,I35,Q35
    #[clap(long, value_parser = valid_offsets)]
    pub adc_offsets: Option<CalibrationOffsets>,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn valid_offsets(s: &str) -> Result<CalibrationOffsets, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<i16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("Invalid offset: {e}"))?;
    match values[..] {
        [i22, q22, i35, q35] => Ok(CalibrationOffsets { i22, q22, i35, q35 }),
        _ => Err("Expected four offsets: I22,Q22,I35,Q35".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets() {
        assert_eq!(
            valid_offsets("7, 11,-4,9"),
            Ok(CalibrationOffsets {
                i22: 7,
                q22: 11,
                i35: -4,
                q35: 9
            })
        );
        assert!(valid_offsets("1,2,3").is_err());
        assert!(valid_offsets("1,2,3,x").is_err());
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["attrracd"]);
        assert_eq!(args.device, "/dev/ttyUSB0");
        assert_eq!(args.listen.port(), 1111);
        assert!(args.adc_offsets.is_none());

        let args = Args::parse_from(["attrracd", "-d", "/dev/ttyUSB1", "--adc-offsets", "0,0,0,0"]);
        assert_eq!(args.device, "/dev/ttyUSB1");
        assert_eq!(args.adc_offsets, Some(CalibrationOffsets::zero()));
    }
}

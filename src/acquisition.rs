//! Burst acquisitions: one checked burst, the retried single burst and the
//! delay sweep

use std::io;

use tracing::{debug, info, warn};

use crate::{
    burst::SampleBurst,
    device::Device,
    error::{AcquisitionError, FramingError, SweepError},
    stats,
    sync::RawFrame,
    transport::Transport,
    BLOCK_LEN,
};

/// Attempts of a single burst before giving up
pub const START_ATTEMPTS: usize = 3;
/// Samples ignored at the start of every sweep burst while the receiver settles
pub const SWEEP_SKIP: usize = 20;
/// First delay past the end of the sweep
pub const SWEEP_END: u32 = 235;
pub const SWEEP_STEP: u32 = 2;
/// The sweep starts this far behind the pulse width
pub const SWEEP_START_MARGIN: u32 = 6;
/// Fewer synchronized bytes than this between first and last counter is not a burst
const MIN_SYNC_SPAN: usize = 20;

fn read_burst<T: Transport>(device: &mut Device<T>) -> Result<SampleBurst, AcquisitionError> {
    let requested = device.config().burst_bytes();
    let expected = device.config().samples_per_polarization();
    let offsets = *device.offsets();

    let link = device.link();
    link.start_measurement()?;
    let raw = link.read_bytes(requested)?;
    if raw.len() < BLOCK_LEN || raw.len() < requested {
        return Err(AcquisitionError::ShortRead {
            requested,
            received: raw.len(),
        });
    }

    let frame = RawFrame::recover(raw);
    let (first, last) = (frame.first, frame.last);
    debug!(first, last, "Synchronized burst");
    if last < first || last - first < MIN_SYNC_SPAN {
        return Err(FramingError::TooFewBlocks { first, last }.into());
    }
    if (last - first) % BLOCK_LEN != 0 {
        return Err(FramingError::Misaligned { first, last }.into());
    }

    let burst = frame.decode(&offsets);
    if burst.len() != expected {
        return Err(FramingError::SampleCount {
            expected,
            decoded: burst.len(),
        }
        .into());
    }
    Ok(burst)
}

/// Trigger one burst and validate it. The transport is purged on any failure
/// so the next attempt starts from an empty buffer.
pub fn acquire_burst<T: Transport>(
    device: &mut Device<T>,
) -> Result<SampleBurst, AcquisitionError> {
    let result = read_burst(device);
    if let Err(e) = &result {
        warn!(status = ?e.status(), "Burst failed: {e}");
        if let Err(purge) = device.link().purge() {
            warn!("Purge after failed burst failed: {purge}");
        }
    }
    result
}

/// Single burst, retried up to [`START_ATTEMPTS`] times
pub fn start<T: Transport>(device: &mut Device<T>) -> Result<SampleBurst, AcquisitionError> {
    let mut attempt = 1;
    loop {
        debug!(attempt, "Starting burst");
        match acquire_burst(device) {
            Ok(burst) => {
                info!(attempt, samples = burst.len(), "Burst acquired");
                return Ok(burst);
            }
            Err(_) if attempt < START_ATTEMPTS => {
                warn!(attempt, "Retrying burst");
                attempt += 1;
            }
            Err(e) => {
                return Err(AcquisitionError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(e),
                })
            }
        }
    }
}

/// Summary of the burst taken at one sweep delay
#[derive(Clone, Debug, PartialEq)]
pub struct SweepRow {
    pub delay: u32,
    /// Samples per polarization
    pub n: usize,
    /// Amplitude and phase means in output column order
    pub means: [f64; 8],
    pub std_devs: [f64; 8],
}

/// Delays visited by a sweep with the given pulse width
pub fn sweep_delays(pulse_width: u32) -> impl Iterator<Item = u32> {
    (pulse_width + SWEEP_START_MARGIN..SWEEP_END).step_by(SWEEP_STEP as usize)
}

/// Range-gate sweep ("radar"). Every delay reconfigures the CPLD and takes
/// one burst; the first failure ends the sweep. Rows handed to `emit`
/// before the failure stay emitted. Returns the number of rows.
pub fn sweep<T, F>(device: &mut Device<T>, mut emit: F) -> Result<usize, SweepError>
where
    T: Transport,
    F: FnMut(&SweepRow) -> io::Result<()>,
{
    let mut rows = 0;
    for delay in sweep_delays(device.config().pulse_width) {
        device
            .set_delay(delay)
            .map_err(|source| SweepError::Configure { delay, source })?;
        let mut burst =
            acquire_burst(device).map_err(|source| SweepError::Acquisition { delay, source })?;
        stats::summarize(&mut burst, SWEEP_SKIP);
        emit(&SweepRow {
            delay,
            n: burst.len(),
            means: burst.amp_phase_means(),
            std_devs: burst.amp_phase_std_devs(),
        })?;
        rows += 1;
    }
    info!(rows, "Sweep finished");
    Ok(rows)
}

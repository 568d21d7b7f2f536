//! Continuous acquisition on its own thread
//!
//! Once started, the microcontroller streams one auxiliary record (9 bytes)
//! followed by one burst of samples per loop period without being asked.
//! Each iteration turns that into one [`LoopRow`] and hands it to the writer
//! over a channel.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::{
    device::{lock, Device, SharedDevice},
    error::TransactionError,
    stats,
    sync::RawFrame,
    transaction::{temperature_celsius, Link},
    transport::Transport,
};

/// The firmware needs far longer than a burst read to get going
pub const LOOP_TIMEOUT: Duration = Duration::from_millis(15_000);
/// Auxiliary bytes sent ahead of every burst
pub const AUX_LEN: usize = 9;

/// Housekeeping values the firmware sends ahead of each burst
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AuxReadings {
    pub case_temp: f64,
    pub board_temp: f64,
    pub accel1: i16,
    pub accel2: i16,
    pub resets: u8,
}

impl AuxReadings {
    /// Case temperature, board temperature and both accelerometer axes as
    /// lsb/msb pairs, then the reset counter. The accelerometer axes are
    /// signed.
    pub fn from_bytes(b: [u8; AUX_LEN]) -> Self {
        Self {
            case_temp: temperature_celsius(b[0], b[1]),
            board_temp: temperature_celsius(b[2], b[3]),
            accel1: i16::from_le_bytes([b[4], b[5]]),
            accel2: i16::from_le_bytes([b[6], b[7]]),
            resets: b[8],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoopRow {
    /// Mean I/Q of every channel in output column order
    Data {
        timestamp: DateTime<Utc>,
        means: [f64; 8],
        aux: AuxReadings,
    },
    /// The burst lost sync and was thrown away
    Glitch {
        timestamp: DateTime<Utc>,
        aux: AuxReadings,
    },
}

impl LoopRow {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LoopRow::Data { timestamp, .. } | LoopRow::Glitch { timestamp, .. } => *timestamp,
        }
    }
}

fn read_aux<T: Transport>(link: &mut Link<T>) -> Result<AuxReadings, TransactionError> {
    let mut bytes = [0u8; AUX_LEN];
    for b in bytes.iter_mut() {
        *b = link.read_byte()?;
    }
    Ok(AuxReadings::from_bytes(bytes))
}

fn purge_twice<T: Transport>(link: &mut Link<T>) -> Result<(), TransactionError> {
    // One purge can race the FIFO refilling the bridge
    link.purge()?;
    link.purge()
}

/// One loop period: aux record, burst, sync check, means without skip
pub fn run_iteration<T: Transport>(device: &mut Device<T>) -> Result<LoopRow, TransactionError> {
    let requested = device.config().burst_bytes();
    let aux = read_aux(device.link())?;
    let timestamp = Utc::now();
    let raw = device.link().read_bytes(requested)?;
    if raw.len() != requested {
        warn!(requested, received = raw.len(), "Slow loop read came up short");
    }

    let frame = RawFrame::recover(raw);
    if !frame.is_whole_records() {
        warn!(
            first = frame.first,
            last = frame.last,
            "Slow loop glitch, span is not a whole number of records"
        );
        purge_twice(device.link())?;
        return Ok(LoopRow::Glitch { timestamp, aux });
    }

    let mut burst = frame.decode(device.offsets());
    stats::mean(&mut burst, 0);
    Ok(LoopRow::Data {
        timestamp,
        means: burst.iq_means(),
        aux,
    })
}

fn run<T: Transport>(device: SharedDevice<T>, running: Arc<AtomicBool>, rows: Sender<LoopRow>) {
    while running.load(Ordering::Acquire) {
        let row = {
            let mut dev = lock(&device);
            match run_iteration(&mut dev) {
                Ok(row) => Some(row),
                Err(e) => {
                    warn!("Slow loop iteration failed: {e}");
                    if let Err(e) = purge_twice(dev.link()) {
                        warn!("Purge failed: {e}");
                    }
                    None
                }
            }
        };
        if let Some(row) = row {
            if rows.send(row).is_err() {
                warn!("Slow loop writer is gone, stopping");
                break;
            }
        }
    }

    stop_streaming(lock(&device).link());
    info!("Slow loop stopped");
}

/// Tell the firmware to stop and drop whatever it already sent
fn stop_streaming<T: Transport>(link: &mut Link<T>) {
    if let Err(e) = link.stop_slow_loop() {
        warn!("Could not send STOP_SLOW_LOOP: {e}");
    }
    if let Err(e) = purge_twice(link) {
        warn!("Purge failed: {e}");
    }
}

/// Handle to a running slow loop
pub struct SlowLoop {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SlowLoop {
    /// Start the firmware loop and the thread that reads it
    pub fn spawn<T>(
        device: SharedDevice<T>,
        rows: Sender<LoopRow>,
    ) -> Result<Self, TransactionError>
    where
        T: Transport + 'static,
    {
        lock(&device).link().start_slow_loop()?;
        let running = Arc::new(AtomicBool::new(true));
        match Self::start_reader(Arc::clone(&device), Arc::clone(&running), rows) {
            Ok(handle) => {
                info!("Slow loop started");
                Ok(Self {
                    running,
                    handle: Some(handle),
                })
            }
            Err(e) => {
                // The firmware is already streaming
                stop_streaming(lock(&device).link());
                Err(e)
            }
        }
    }

    fn start_reader<T>(
        device: SharedDevice<T>,
        running: Arc<AtomicBool>,
        rows: Sender<LoopRow>,
    ) -> Result<JoinHandle<()>, TransactionError>
    where
        T: Transport + 'static,
    {
        lock(&device).link().set_timeouts(LOOP_TIMEOUT)?;
        let handle = thread::Builder::new()
            .name("slow-loop".to_owned())
            .spawn(move || run(device, running, rows))?;
        Ok(handle)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Ask the loop to finish its current iteration and wait for it. Takes up
    /// to one read timeout.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            debug!("Waiting for slow loop thread");
            if handle.join().is_err() {
                warn!("Slow loop thread panicked");
            }
        }
    }
}

impl Drop for SlowLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

//! The command daemon: lock file, TCP command listener and dispatch
//!
//! Each TCP connection carries one command. The daemon answers with a single
//! line starting with `OK` or `ERR` and closes the connection.

use std::{
    fs::{self, OpenOptions},
    io::{self, Read, Write},
    net::{TcpListener, TcpStream},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    acquisition,
    command::{Command, CommandError, MESSAGE_LEN},
    device::{lock, SharedDevice},
    error::{AcquisitionError, DeviceError, SweepError, TransactionError},
    output::{self, LoopRecorder, OutputDirs, SweepWriter},
    slow_loop::SlowLoop,
    transport::{self, Transport},
};

/// Idle time between polls of the listening socket
const POLL_INTERVAL: Duration = Duration::from_millis(5);
/// How long a client gets to send its three fields
const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);
/// Slow-loop rows buffered between the reader and the file writer
const ROW_QUEUE: usize = 64;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error(transparent)]
    Sweep(#[from] SweepError),
    #[error("could not list serial ports: {0}")]
    Ports(#[from] serialport::Error),
    #[error("output failed: {0}")]
    Output(#[from] io::Error),
    #[error("not allowed while the slow loop is running")]
    SlowLoopActive,
    #[error("the slow loop is not running")]
    SlowLoopIdle,
}

/// Exclusive claim on the instrument for this process, released on drop
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn acquire(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    io::Error::new(
                        e.kind(),
                        format!("lock file {} is held by another instance", path.display()),
                    )
                } else {
                    e
                }
            })?;
        writeln!(file, "{}", std::process::id())?;
        info!(?path, "Lock file created");
        Ok(Self { path })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Could not remove lock file {}: {e}", self.path.display());
        }
    }
}

/// A running slow loop together with the thread writing its rows
struct LoopSession {
    slow: SlowLoop,
    writer: JoinHandle<()>,
}

impl LoopSession {
    fn stop(mut self) {
        // Stopping drops the row sender, which ends the writer
        self.slow.stop();
        if self.writer.join().is_err() {
            error!("Slow loop writer panicked");
        }
    }
}

pub struct Daemon<T> {
    device: SharedDevice<T>,
    dirs: OutputDirs,
    slow_loop: Option<LoopSession>,
    running: Arc<AtomicBool>,
}

impl<T: Transport + 'static> Daemon<T> {
    /// `running` is cleared by `quit` and may be cleared from outside (Ctrl-C)
    pub fn new(device: SharedDevice<T>, dirs: OutputDirs, running: Arc<AtomicBool>) -> Self {
        Self {
            device,
            dirs,
            slow_loop: None,
            running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn slow_loop_active(&self) -> bool {
        self.slow_loop.as_ref().map_or(false, |s| s.slow.is_running())
    }

    /// Run one command and describe the outcome
    pub fn execute(&mut self, command: Command) -> Result<String, DaemonError> {
        use Command::*;
        let exclusive = command.reconfigures()
            || matches!(command, Start | Radar | StartSlowLoop | Read | Write(_));
        if exclusive && self.slow_loop_active() {
            return Err(DaemonError::SlowLoopActive);
        }

        let reply = match command {
            SetNumSamples(n) => {
                lock(&self.device).set_num_samples(n)?;
                format!("n_samples = {n}")
            }
            SetPulseWidth(pw) => {
                lock(&self.device).set_pulse_width(pw)?;
                format!("pw = {pw}")
            }
            SetDelay(delay) => {
                lock(&self.device).set_delay(delay)?;
                format!("delay = {delay}")
            }
            SetAdcDelay(adc_delay) => {
                lock(&self.device).set_adc_delay(adc_delay)?;
                format!("adc_delay = {adc_delay}")
            }
            SetPolPrecede(pol_precede) => {
                lock(&self.device).set_pol_precede(pol_precede)?;
                format!("pol_precede = {pol_precede}")
            }
            SetMode(mode) => {
                lock(&self.device).set_mode(mode)?;
                format!("mode = {mode}")
            }
            SetAttenuator { band, ch1, ch2 } => {
                lock(&self.device).set_attenuator(band, ch1, ch2)?;
                format!("atten{} = {ch1} {ch2}", band.label())
            }
            SetDefault => {
                lock(&self.device).apply_defaults()?;
                "defaults loaded".to_owned()
            }
            SetLoopFreq(hz) => {
                lock(&self.device).link().set_loop_freq(hz)?;
                format!("loop_freq = {hz} Hz")
            }
            GetStatus => format!("status = {:#04x}", lock(&self.device).link().get_status()?),
            GetLock => format!("lock = {:#04x}", lock(&self.device).link().get_lock()?),
            GetAdc(channel) => format!(
                "adc{channel} = {:.3} V",
                lock(&self.device).link().get_adc(channel)?
            ),
            GetCaseTemp => format!(
                "case_temp = {:.1} C",
                lock(&self.device).link().get_case_temp()?
            ),
            SetCaseTemp(t) => {
                lock(&self.device).link().set_case_temp(t)?;
                format!("case_temp setpoint = {t} C")
            }
            GetBoardTemp => format!(
                "board_temp = {:.1} C",
                lock(&self.device).link().get_board_temp()?
            ),
            SetBoardTemp(t) => {
                lock(&self.device).link().set_board_temp(t)?;
                format!("board_temp setpoint = {t} C")
            }
            GetResetCount => format!(
                "resets = {}",
                lock(&self.device).link().get_reset_count()?
            ),
            SetResetCount => {
                lock(&self.device).link().set_reset_count()?;
                "resets cleared".to_owned()
            }
            Start => self.start()?,
            Radar => self.radar()?,
            StartSlowLoop => self.start_slow_loop()?,
            StopSlowLoop => match self.slow_loop.take() {
                Some(session) => {
                    session.stop();
                    "slow loop stopped".to_owned()
                }
                None => return Err(DaemonError::SlowLoopIdle),
            },
            GetDeviceList => {
                let ports = transport::available_ports()?;
                if ports.is_empty() {
                    "no serial ports".to_owned()
                } else {
                    ports.join(", ")
                }
            }
            Read => format!("read {:#04x}", lock(&self.device).link().read_byte()?),
            Write(byte) => {
                lock(&self.device).link().write_byte(byte)?;
                format!("wrote {byte:#04x}")
            }
            Purge => {
                lock(&self.device).link().purge()?;
                "purged".to_owned()
            }
            Quit => {
                self.running.store(false, Ordering::Release);
                "bye".to_owned()
            }
        };
        Ok(reply)
    }

    fn start(&mut self) -> Result<String, DaemonError> {
        let burst = acquisition::start(&mut *lock(&self.device))?;
        let path = output::save_burst(&self.dirs, &burst, &Utc::now())?;
        Ok(format!("{} samples saved to {}", burst.len(), path.display()))
    }

    fn radar(&mut self) -> Result<String, DaemonError> {
        let mut writer = SweepWriter::create(&self.dirs, &Utc::now())?;
        let result = acquisition::sweep(&mut *lock(&self.device), |row| writer.write_row(row));
        // Rows from before an abort are kept
        let path = writer.finish(&self.dirs)?;
        let rows = result?;
        Ok(format!("{rows} delays saved to {}", path.display()))
    }

    fn start_slow_loop(&mut self) -> Result<String, DaemonError> {
        // Reap a loop that ended on its own
        if let Some(session) = self.slow_loop.take() {
            session.stop();
        }
        let config = lock(&self.device).config().clone();
        let (tx, rx) = crossbeam_channel::bounded(ROW_QUEUE);
        let writer = output::spawn_loop_writer(LoopRecorder::new(self.dirs.clone(), config), rx)?;
        match SlowLoop::spawn(Arc::clone(&self.device), tx) {
            Ok(slow) => {
                self.slow_loop = Some(LoopSession { slow, writer });
                Ok("slow loop started".to_owned())
            }
            Err(e) => {
                // The sender is gone, so the writer finishes right away
                if writer.join().is_err() {
                    error!("Slow loop writer panicked");
                }
                Err(e.into())
            }
        }
    }

    /// Read one command from `stream`, run it and write the reply line
    pub fn handle_connection(&mut self, mut stream: TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
        let mut buf = [0u8; MESSAGE_LEN];
        let mut filled = 0;
        while filled < MESSAGE_LEN {
            match stream.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(k) => filled += k,
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    break
                }
                Err(e) => return Err(e),
            }
        }

        let outcome = Command::from_message(&buf[..filled])
            .map_err(DaemonError::from)
            .and_then(|command| {
                info!(?command, "Received command");
                self.execute(command)
            });
        let reply = match outcome {
            Ok(msg) => {
                debug!(%msg, "Command done");
                format!("OK {msg}\n")
            }
            Err(e) => {
                error!("Command failed: {e}");
                format!("ERR {e}\n")
            }
        };
        stream.write_all(reply.as_bytes())
    }

    /// Stop the slow loop if it is running
    pub fn shutdown(&mut self) {
        if let Some(session) = self.slow_loop.take() {
            info!("Stopping slow loop for shutdown");
            session.stop();
        }
    }
}

/// Accept and run commands until `quit` or the running flag is cleared
pub fn serve<T: Transport + 'static>(
    daemon: &mut Daemon<T>,
    listener: TcpListener,
) -> io::Result<()> {
    listener.set_nonblocking(true)?;
    info!(addr = ?listener.local_addr()?, "Listening for commands");
    while daemon.is_running() {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "Connection");
                if let Err(e) = daemon.handle_connection(stream) {
                    warn!(%peer, "Connection failed: {e}");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                daemon.shutdown();
                return Err(e);
            }
        }
    }
    daemon.shutdown();
    info!("Command listener stopped");
    Ok(())
}

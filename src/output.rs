//! Text output of bursts, sweeps and the slow loop
//!
//! Files are written in the data directory and moved to the transfer
//! directory once complete, where an external archiver picks them up.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    thread::{self, JoinHandle},
};

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};

use crate::{
    acquisition::SweepRow,
    burst::SampleBurst,
    config::PulseConfiguration,
    slow_loop::{AuxReadings, LoopRow},
};

pub const BURST_HEADER: &str = "# 35_H_I 35_H_Q 22_H_I 22_H_Q 35_V_I 35_V_Q 22_V_I 22_V_Q";
pub const SWEEP_HEADER: &str = "# delay 35_H_A 35_H_P 22_H_A 22_H_P 35_V_A 35_V_P 22_V_A 22_V_P";
const LOOP_FILE_TYPE: &str = "SLOW_LOOP_v2";
const LOOP_COLUMNS: &str = "time;            I_h_35;  Q_h_35;  I_h_22;  Q_h_22;  \
                            I_v_35;  Q_v_35;  I_v_22;  Q_v_22;  \
                            T_case;   T_pcb;  accel1;  accel2;  resets";
/// Stands in for the means of a burst that lost sync
const GLITCH_MARKER: &str = "9999";

pub fn burst_file_name(time: &DateTime<Utc>) -> String {
    time.format("iq_%Y%m%d_%H%M%S.dat").to_string()
}

pub fn sweep_file_name(time: &DateTime<Utc>) -> String {
    time.format("radar_%Y%m%d_%H%M_%S.dat").to_string()
}

/// One slow-loop file per wall-clock minute
pub fn loop_file_name(time: &DateTime<Utc>) -> String {
    time.format("loop_%Y%m%d_%H%M.dat").to_string()
}

/// Where files are written and where finished files are handed off
#[derive(Clone, Debug)]
pub struct OutputDirs {
    pub data: PathBuf,
    pub transfer: PathBuf,
}

impl OutputDirs {
    pub fn new(data: impl Into<PathBuf>, transfer: impl Into<PathBuf>) -> Self {
        Self {
            data: data.into(),
            transfer: transfer.into(),
        }
    }

    pub fn create(&self) -> io::Result<()> {
        fs::create_dir_all(&self.data)?;
        fs::create_dir_all(&self.transfer)
    }

    /// Move a finished file into the transfer directory
    pub fn hand_off(&self, path: &Path) -> io::Result<PathBuf> {
        let name = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not a file path"))?;
        let dest = self.transfer.join(name);
        // rename fails across filesystems
        if fs::rename(path, &dest).is_err() {
            fs::copy(path, &dest)?;
            fs::remove_file(path)?;
        }
        debug!(?dest, "Handed off output file");
        Ok(dest)
    }
}

/// Sample index followed by the eight raw I/Q values, one line per sample
pub fn write_burst<W: Write>(out: &mut W, burst: &SampleBurst) -> io::Result<()> {
    writeln!(out, "{BURST_HEADER}")?;
    for k in 0..burst.len() {
        write!(out, "{k:6}")?;
        for v in burst.iq_row(k) {
            write!(out, " {v:6}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Write a burst file and hand it off, returning where it ended up
pub fn save_burst(
    dirs: &OutputDirs,
    burst: &SampleBurst,
    time: &DateTime<Utc>,
) -> io::Result<PathBuf> {
    let path = dirs.data.join(burst_file_name(time));
    let mut out = BufWriter::new(File::create(&path)?);
    write_burst(&mut out, burst)?;
    out.flush()?;
    drop(out);
    let dest = dirs.hand_off(&path)?;
    info!(?dest, samples = burst.len(), "Saved burst");
    Ok(dest)
}

pub fn format_sweep_row(row: &SweepRow) -> String {
    let values: Vec<String> = row
        .means
        .iter()
        .chain(row.std_devs.iter())
        .map(|v| format!("{v:5.1}"))
        .collect();
    format!("{:6} {:6} {}", row.delay, row.n, values.join(" "))
}

/// Sweep file that is handed off once the sweep ends, complete or not
pub struct SweepWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl SweepWriter {
    pub fn create(dirs: &OutputDirs, time: &DateTime<Utc>) -> io::Result<Self> {
        let path = dirs.data.join(sweep_file_name(time));
        let mut out = BufWriter::new(File::create(&path)?);
        writeln!(out, "{SWEEP_HEADER}")?;
        Ok(Self { path, out })
    }

    pub fn write_row(&mut self, row: &SweepRow) -> io::Result<()> {
        writeln!(self.out, "{}", format_sweep_row(row))
    }

    pub fn finish(mut self, dirs: &OutputDirs) -> io::Result<PathBuf> {
        self.out.flush()?;
        let Self { path, out } = self;
        drop(out);
        dirs.hand_off(&path)
    }
}

pub fn write_loop_header<W: Write>(out: &mut W, conf: &PulseConfiguration) -> io::Result<()> {
    writeln!(out, "# FILE_TYPE  = {LOOP_FILE_TYPE}")?;
    writeln!(out, "# n_sample   = {}", conf.n_samples)?;
    writeln!(out, "# pw         = {}", conf.pulse_width)?;
    writeln!(out, "# delay      = {}", conf.delay)?;
    writeln!(out, "# pol_preced = {}", conf.pol_precede)?;
    writeln!(out, "# adc_delay  = {}", conf.adc_delay)?;
    writeln!(out, "# mode       = {}", conf.mode)?;
    writeln!(out, "# atten22    = {} {}", conf.atten22.0, conf.atten22.1)?;
    writeln!(out, "# atten35    = {} {}", conf.atten35.0, conf.atten35.1)?;
    writeln!(out, "#")?;
    writeln!(out, "{LOOP_COLUMNS}")
}

fn format_aux(aux: &AuxReadings) -> String {
    format!(
        "{:7.1}; {:7.1}; {:7}; {:7}; {:7}",
        aux.case_temp, aux.board_temp, aux.accel1, aux.accel2, aux.resets
    )
}

/// `secs.millis; ` then eight means (or glitch markers), then the aux values
pub fn format_loop_row(row: &LoopRow) -> String {
    let time = row.timestamp();
    let (values, aux) = match row {
        LoopRow::Data { means, aux, .. } => (means.map(|m| format!("{m:7.1}")), aux),
        LoopRow::Glitch { aux, .. } => ([GLITCH_MARKER; 8].map(str::to_owned), aux),
    };
    format!(
        "{}.{:03}; {}; {}",
        time.timestamp(),
        time.timestamp_subsec_millis(),
        values.join("; "),
        format_aux(aux)
    )
}

struct LoopFile {
    name: String,
    path: PathBuf,
    out: BufWriter<File>,
}

/// Slow-loop file writer that starts a new file every minute
pub struct LoopRecorder {
    dirs: OutputDirs,
    config: PulseConfiguration,
    current: Option<LoopFile>,
}

impl LoopRecorder {
    pub fn new(dirs: OutputDirs, config: PulseConfiguration) -> Self {
        Self {
            dirs,
            config,
            current: None,
        }
    }

    fn close_current(&mut self) -> io::Result<Option<PathBuf>> {
        match self.current.take() {
            Some(LoopFile { path, mut out, .. }) => {
                out.flush()?;
                drop(out);
                self.dirs.hand_off(&path).map(Some)
            }
            None => Ok(None),
        }
    }

    fn open(&mut self, name: String) -> io::Result<()> {
        let path = self.dirs.data.join(&name);
        let mut out = BufWriter::new(File::create(&path)?);
        write_loop_header(&mut out, &self.config)?;
        debug!(?path, "Opened slow loop file");
        self.current = Some(LoopFile { name, path, out });
        Ok(())
    }

    /// Append a row, rotating first if the row belongs to a new minute
    pub fn record(&mut self, row: &LoopRow) -> io::Result<()> {
        let name = loop_file_name(&row.timestamp());
        let rotate = match &self.current {
            Some(file) => file.name != name,
            None => true,
        };
        if rotate {
            if let Some(done) = self.close_current()? {
                info!(?done, "Rotated slow loop file");
            }
            self.open(name)?;
        }
        if let Some(file) = self.current.as_mut() {
            writeln!(file.out, "{}", format_loop_row(row))?;
            // A reader tailing the file sees every row as it arrives
            file.out.flush()?;
        }
        Ok(())
    }

    /// Close and hand off the file in progress
    pub fn finish(mut self) -> io::Result<Option<PathBuf>> {
        self.close_current()
    }
}

/// Drain `rows` into `recorder` on a new thread until every sender is gone
pub fn spawn_loop_writer(
    mut recorder: LoopRecorder,
    rows: Receiver<LoopRow>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("loop-writer".to_owned())
        .spawn(move || {
            for row in rows {
                if let Err(e) = recorder.record(&row) {
                    error!("Failed to record slow loop row: {e}");
                }
            }
            match recorder.finish() {
                Ok(Some(path)) => info!(?path, "Slow loop file handed off"),
                Ok(None) => warn!("Slow loop ended without recording a row"),
                Err(e) => error!("Failed to hand off slow loop file: {e}"),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dirs(root: &Path) -> OutputDirs {
        let dirs = OutputDirs::new(root.join("data"), root.join("send"));
        dirs.create().unwrap();
        dirs
    }

    fn aux() -> AuxReadings {
        AuxReadings {
            case_temp: 25.5,
            board_temp: -3.0,
            accel1: 512,
            accel2: -7,
            resets: 2,
        }
    }

    fn at(h: u32, m: u32, s: u32, ms: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, h, m, s).unwrap()
            + chrono::Duration::milliseconds(ms as i64)
    }

    #[test]
    fn test_file_names() {
        let t = at(7, 5, 3, 0);
        assert_eq!(burst_file_name(&t), "iq_20240309_070503.dat");
        assert_eq!(sweep_file_name(&t), "radar_20240309_0705_03.dat");
        assert_eq!(loop_file_name(&t), "loop_20240309_0705.dat");
    }

    #[test]
    fn test_burst_layout() {
        let mut burst = SampleBurst::with_capacity(2);
        for set in burst.sets_mut() {
            set.push(-12, 345);
            set.push(0, -2048);
        }
        let mut out = Vec::new();
        write_burst(&mut out, &burst).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], BURST_HEADER);
        assert_eq!(
            lines[1],
            "     0    -12    345    -12    345    -12    345    -12    345"
        );
        assert_eq!(lines[2].split_whitespace().count(), 9);
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_save_burst_hands_off() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = dirs(tmp.path());
        let mut burst = SampleBurst::with_capacity(1);
        for set in burst.sets_mut() {
            set.push(1, 2);
        }
        let dest = save_burst(&dirs, &burst, &at(1, 2, 3, 0)).unwrap();
        assert_eq!(dest, dirs.transfer.join("iq_20240309_010203.dat"));
        assert!(dest.exists());
        assert_eq!(fs::read_dir(&dirs.data).unwrap().count(), 0);
    }

    #[test]
    fn test_sweep_row_layout() {
        let row = SweepRow {
            delay: 16,
            n: 256,
            means: [1.0, 2.3, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            std_devs: [0.5; 8],
        };
        let line = format_sweep_row(&row);
        assert!(line.starts_with("    16    256   1.0   2.3"));
        assert_eq!(line.split_whitespace().count(), 18);
    }

    #[test]
    fn test_partial_sweep_file_is_handed_off() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = dirs(tmp.path());
        let mut writer = SweepWriter::create(&dirs, &at(0, 0, 0, 0)).unwrap();
        writer
            .write_row(&SweepRow {
                delay: 16,
                n: 256,
                means: [0.0; 8],
                std_devs: [0.0; 8],
            })
            .unwrap();
        let path = writer.finish(&dirs).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(text.lines().next(), Some(SWEEP_HEADER));
    }

    #[test]
    fn test_loop_rows() {
        let data = LoopRow::Data {
            timestamp: at(0, 0, 1, 42),
            means: [1.3, -2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 100.5],
            aux: aux(),
        };
        let line = format_loop_row(&data);
        assert!(line.starts_with("1709942401.042;     1.3;    -2.0; "));
        assert!(line.ends_with("   25.5;    -3.0;     512;      -7;       2"));
        assert_eq!(line.split(';').count(), 14);

        let glitch = LoopRow::Glitch {
            timestamp: at(0, 0, 1, 5),
            aux: aux(),
        };
        let line = format_loop_row(&glitch);
        assert!(line.starts_with("1709942401.005; 9999; 9999;"));
        assert_eq!(line.matches("9999").count(), 8);
        assert_eq!(line.split(';').count(), 14);
    }

    #[test]
    fn test_recorder_rotates_every_minute() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = dirs(tmp.path());
        let mut recorder = LoopRecorder::new(dirs.clone(), PulseConfiguration::default());
        for (m, s) in [(0, 10), (0, 59), (1, 0), (1, 30), (2, 0)] {
            recorder
                .record(&LoopRow::Glitch {
                    timestamp: at(12, m, s, 0),
                    aux: aux(),
                })
                .unwrap();
        }
        // Two full minutes handed off, the third still open
        let mut sent: Vec<String> = fs::read_dir(&dirs.transfer)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        sent.sort();
        assert_eq!(sent, vec!["loop_20240309_1200.dat", "loop_20240309_1201.dat"]);
        assert!(dirs.data.join("loop_20240309_1202.dat").exists());

        let first = fs::read_to_string(dirs.transfer.join("loop_20240309_1200.dat")).unwrap();
        assert!(first.starts_with("# FILE_TYPE  = SLOW_LOOP_v2\n# n_sample   = 512\n"));
        assert_eq!(first.lines().filter(|l| !l.starts_with('#')).count(), 3);

        let last = recorder.finish().unwrap().unwrap();
        assert_eq!(last, dirs.transfer.join("loop_20240309_1202.dat"));
    }

    #[test]
    fn test_writer_thread_drains_channel() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = dirs(tmp.path());
        let (tx, rx) = crossbeam_channel::bounded(4);
        let handle = spawn_loop_writer(
            LoopRecorder::new(dirs.clone(), PulseConfiguration::default()),
            rx,
        )
        .unwrap();
        tx.send(LoopRow::Glitch {
            timestamp: at(3, 4, 5, 0),
            aux: aux(),
        })
        .unwrap();
        drop(tx);
        handle.join().unwrap();
        assert!(dirs.transfer.join("loop_20240309_0304.dat").exists());
    }
}

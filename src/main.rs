use std::{
    net::TcpListener,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use attrrac::{
    args::{self, Args},
    daemon::{self, Daemon, LockFile},
    device::{lock, Device},
    output::OutputDirs,
    transport::SerialTransport,
};
use clap::Parser;
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    // Get the CLI options
    let cli = Args::parse();

    // Setup logging
    tracing_subscriber::fmt()
        .with_max_level(args::convert_filter(cli.verbose.log_level_filter()))
        .init();
    info!("Starting ATTRRAC daemon");

    // Only one process may talk to the instrument
    let _lock = LockFile::acquire(&cli.lock_file)
        .with_context(|| format!("could not acquire {}", cli.lock_file.display()))?;

    let dirs = OutputDirs::new(&cli.data_dir, &cli.transfer_dir);
    dirs.create().context("could not create output directories")?;

    // Open the instrument and bring it to its power-on configuration
    let timeout = Duration::from_millis(cli.timeout_ms);
    let transport = SerialTransport::open(&cli.device, cli.baud, timeout)
        .with_context(|| format!("could not open {}", cli.device))?;
    let device = Device::new(transport, cli.adc_offsets.unwrap_or_default()).shared();
    lock(&device)
        .apply_defaults()
        .context("could not apply the default configuration")?;
    info!(config = ?lock(&device).config(), "Instrument configured");

    // Ctrl-C stops the listener, which in turn stops a running slow loop
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        warn!("Interrupted, shutting down");
        r.store(false, Ordering::Release);
    })?;

    let listener = TcpListener::bind(cli.listen)
        .with_context(|| format!("could not bind {}", cli.listen))?;
    let mut daemon = Daemon::new(device, dirs, running);
    daemon::serve(&mut daemon, listener)?;
    info!("Daemon stopped");
    Ok(())
}

//! Timecard daemon entrypoint.
//!
//! A small single-writer service: a reader thread turns badge reader lines
//! into events, one scheduler thread owns the project store and refreshes the
//! display once per interval, and stdin lines are forwarded to the device as
//! new project names. State is in memory only and is gone on exit.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

mod clock;
mod config;
mod device;
mod error;
mod logging;
mod projector;
mod scheduler;
mod sink;
mod store;

use clock::{Clock, SystemClock};
use config::{Config, DisplayFormat};
use device::{DeviceWriter, ReaderExit, ReaderSettings, TtyDevice};
use error::TimecardError;
use scheduler::Scheduler;
use sink::{JsonLinesSink, TableSink};

const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

static SIGNALLED: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "timecard-daemon")]
#[command(about = "Badge-driven project time tracker")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.timecard/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Badge reader device, overriding the config file
    #[arg(long, value_name = "PATH", conflicts_with = "no_device")]
    device: Option<PathBuf>,

    /// Run without a device; no events will arrive
    #[arg(long)]
    no_device: bool,

    /// Display output format
    #[arg(long, value_enum)]
    format: Option<DisplayFormat>,

    /// Display refresh interval in milliseconds
    #[arg(long, value_name = "MS")]
    refresh_ms: Option<u64>,

    /// Stop once the device reaches end of input (useful for replaying transcripts)
    #[arg(long)]
    exit_on_eof: bool,
}

fn main() {
    let cli = Cli::parse();

    let (mut config, config_error) = match config::load(cli.config.as_deref()) {
        Ok(config) => (config, None),
        Err(err) => (Config::default(), Some(err)),
    };
    let _logging_guard = logging::init(
        config.logging.debug,
        config.logging.directory.as_deref(),
    );

    if let Some(err) = config_error {
        if cli.config.is_some() {
            error!(error = %err, "Failed to load config");
            std::process::exit(1);
        }
        warn!(error = %err, "Failed to load config; using defaults");
    }

    apply_overrides(&mut config, &cli);

    if let Err(err) = run(&config, &cli) {
        error!(error = %err, "Timecard daemon failed");
        std::process::exit(1);
    }
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(path) = &cli.device {
        config.device.path = path.clone();
    }
    if let Some(format) = cli.format {
        config.display.format = format;
    }
    if let Some(refresh_ms) = cli.refresh_ms {
        config.display.refresh_interval_ms = refresh_ms;
    }
}

fn run(config: &Config, cli: &Cli) -> Result<(), TimecardError> {
    install_signal_handlers();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scheduler = spawn_scheduler(config, Arc::clone(&clock)).map_err(|source| {
        TimecardError::Io {
            context: "failed to spawn scheduler thread".to_string(),
            source,
        }
    })?;
    info!(
        refresh_ms = config.display.refresh_interval_ms,
        format = ?config.display.format,
        "Timecard daemon started"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let (stop_tx, stop_rx) = mpsc::channel::<ReaderExit>();
    let writer: DeviceWriter = Arc::new(Mutex::new(None));

    let reader = if cli.no_device {
        info!("Device disabled; no events will arrive");
        None
    } else {
        match TtyDevice::open(&config.device.path) {
            Ok(tty) => {
                match tty.writer() {
                    Ok(handle) => {
                        let handle: Box<dyn Write + Send> = Box::new(handle);
                        if let Ok(mut slot) = writer.lock() {
                            *slot = Some(handle);
                        }
                    }
                    Err(err) => warn!(error = %err, "Failed to open device for writing"),
                }
                info!(path = %tty.path().display(), "Device connected");

                let settings = ReaderSettings {
                    poll_timeout: config.device.poll_timeout(),
                    max_line_bytes: config.device.max_line_bytes,
                };
                let stop = stop_tx.clone();
                let exit_on_eof = cli.exit_on_eof;
                let spawned = device::spawn_reader(
                    tty,
                    scheduler.sender(),
                    Arc::clone(&clock),
                    Arc::clone(&shutdown),
                    settings,
                    move |exit| {
                        if exit_on_eof || exit == ReaderExit::SchedulerGone {
                            let _ = stop.send(exit);
                        }
                    },
                );
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        warn!(error = %err, "Failed to spawn device reader");
                        None
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "Device unavailable; running without events");
                None
            }
        }
    };

    if reader.is_none() && cli.exit_on_eof {
        let _ = stop_tx.send(ReaderExit::DeviceClosed);
    }

    spawn_input_forwarder(Arc::clone(&writer));

    loop {
        if SIGNALLED.load(Ordering::SeqCst) {
            info!("Shutdown signal received");
            break;
        }
        match stop_rx.recv_timeout(SIGNAL_POLL_INTERVAL) {
            Ok(exit) => {
                info!(exit = ?exit, "Device input finished");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(SIGNAL_POLL_INTERVAL),
        }
    }

    shutdown.store(true, Ordering::SeqCst);
    if let Some(reader) = reader {
        if reader.join().is_err() {
            warn!("Device reader thread panicked");
        }
    }
    if let Some(rows) = scheduler.snapshot() {
        for row in rows {
            info!(
                project = %row.name,
                status = row.status.as_str(),
                total = %row.total_formatted,
                "Final project total"
            );
        }
    }
    scheduler.shutdown();
    info!("Timecard daemon stopped");
    Ok(())
}

fn spawn_scheduler(config: &Config, clock: Arc<dyn Clock>) -> io::Result<Scheduler> {
    let interval = config.display.refresh_interval();
    match config.display.format {
        DisplayFormat::Table => Scheduler::spawn(
            TableSink::new(io::stdout(), config.display.clear_screen),
            clock,
            interval,
        ),
        DisplayFormat::Json => Scheduler::spawn(JsonLinesSink::new(io::stdout()), clock, interval),
    }
}

fn spawn_input_forwarder(writer: DeviceWriter) {
    // Detached: it blocks on stdin and dies with the process.
    let spawned = thread::Builder::new()
        .name("timecard-input".to_string())
        .spawn(move || device::forward_user_input(io::stdin().lock(), &writer));
    if let Err(err) = spawned {
        warn!(error = %err, "Failed to spawn input forwarder");
    }
}

extern "C" fn on_signal(_signal: libc::c_int) {
    SIGNALLED.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    #[cfg(unix)]
    {
        // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
        unsafe {
            libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
            libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
        }
    }
}

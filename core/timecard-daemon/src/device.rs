//! Badge reader I/O.
//!
//! The reader thread polls the device with a bounded timeout so it notices a
//! shutdown request even when the device is silent, frames bytes into lines,
//! parses them and queues them for the scheduler in arrival order.

use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fs_err as fs;
use timecard_protocol::{decode_line, encode_project_name, parse_line};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::TimecardError;
use crate::scheduler::{Command, InboundLine};

const READ_CHUNK_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    Idle,
    Closed,
}

/// Byte source that can wait for data with a timeout.
pub trait DeviceSource: Send {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadOutcome>;
}

/// A character device (or any pollable file) opened read/write.
pub struct TtyDevice {
    path: PathBuf,
    file: fs::File,
}

impl TtyDevice {
    pub fn open(path: &Path) -> Result<Self, TimecardError> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| TimecardError::DeviceOpen {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Independent handle for outbound writes.
    pub fn writer(&self) -> io::Result<fs::File> {
        self.file.try_clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        use std::os::unix::io::AsRawFd;

        let mut pollfd = libc::pollfd {
            fd: self.file.file().as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        // SAFETY: pollfd points at one initialized struct for the duration of the call.
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(ready > 0)
    }

    #[cfg(not(unix))]
    fn wait_readable(&self, _timeout: Duration) -> io::Result<bool> {
        Ok(true)
    }
}

impl DeviceSource for TtyDevice {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadOutcome> {
        if !self.wait_readable(timeout)? {
            return Ok(ReadOutcome::Idle);
        }
        match self.file.read(buf) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::Idle),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(ReadOutcome::Idle),
            Err(err) => Err(err),
        }
    }
}

/// Splits a byte stream into newline-terminated lines, discarding any line
/// longer than `max_line_bytes`.
#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_line_bytes: usize,
    discarding: bool,
}

impl LineFramer {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line_bytes,
            discarding: false,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                } else {
                    lines.push(std::mem::take(&mut self.buffer));
                }
                continue;
            }
            if self.discarding {
                continue;
            }
            if self.buffer.len() >= self.max_line_bytes {
                warn!(
                    max_line_bytes = self.max_line_bytes,
                    "Device line exceeded maximum length; discarding"
                );
                self.buffer.clear();
                self.discarding = true;
                continue;
            }
            self.buffer.push(byte);
        }
        lines
    }

    /// Returns a trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.discarding || self.buffer.is_empty() {
            self.buffer.clear();
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReaderSettings {
    pub poll_timeout: Duration,
    pub max_line_bytes: usize,
}

/// Why the reader loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    Shutdown,
    DeviceClosed,
    SchedulerGone,
    ReadError,
}

pub fn run_reader<D: DeviceSource>(
    mut device: D,
    commands: Sender<Command>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<AtomicBool>,
    settings: ReaderSettings,
) -> ReaderExit {
    let mut framer = LineFramer::new(settings.max_line_bytes);
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    let exit = loop {
        if shutdown.load(Ordering::SeqCst) {
            break ReaderExit::Shutdown;
        }

        match device.read_timeout(&mut chunk, settings.poll_timeout) {
            Ok(ReadOutcome::Data(n)) => {
                for raw in framer.push(&chunk[..n]) {
                    if !forward_line(&raw, &commands, clock.as_ref()) {
                        return ReaderExit::SchedulerGone;
                    }
                }
            }
            Ok(ReadOutcome::Idle) => {}
            Ok(ReadOutcome::Closed) => break ReaderExit::DeviceClosed,
            Err(err) => {
                warn!(error = %err, "Failed to read from device");
                break ReaderExit::ReadError;
            }
        }
    };

    if let Some(raw) = framer.finish() {
        if !forward_line(&raw, &commands, clock.as_ref()) {
            return ReaderExit::SchedulerGone;
        }
    }
    exit
}

fn forward_line(raw: &[u8], commands: &Sender<Command>, clock: &dyn Clock) -> bool {
    let Some(text) = decode_line(raw) else {
        return true;
    };
    let captured_at = clock.now();
    let event = parse_line(&text, captured_at);
    commands
        .send(Command::Inbound(InboundLine {
            text,
            captured_at,
            event,
        }))
        .is_ok()
}

pub fn spawn_reader<D: DeviceSource + 'static>(
    device: D,
    commands: Sender<Command>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<AtomicBool>,
    settings: ReaderSettings,
    on_exit: impl FnOnce(ReaderExit) + Send + 'static,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("timecard-reader".to_string())
        .spawn(move || {
            let exit = run_reader(device, commands, clock, shutdown, settings);
            info!(exit = ?exit, "Device reader stopped");
            on_exit(exit);
        })
}

/// Writes a user-entered project name to the device. Returns whether anything
/// was sent.
pub fn send_project_name<W: Write + ?Sized>(writer: &mut W, input: &str) -> io::Result<bool> {
    let Some(payload) = encode_project_name(input) else {
        return Ok(false);
    };
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(true)
}

/// Shared outbound handle; `None` when no device is open.
pub type DeviceWriter = Arc<Mutex<Option<Box<dyn Write + Send>>>>;

/// Forwards each input line to the device until EOF.
pub fn forward_user_input<R: BufRead>(input: R, writer: &DeviceWriter) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "Failed to read user input");
                break;
            }
        };
        let Ok(mut guard) = writer.lock() else {
            warn!("Device writer lock poisoned");
            break;
        };
        match guard.as_mut() {
            Some(device) => match send_project_name(device.as_mut(), &line) {
                Ok(true) => info!(name = %line.trim(), "Project name sent to device"),
                Ok(false) => debug!("Empty project name ignored"),
                Err(err) => warn!(error = %err, "Failed to write project name to device"),
            },
            None => {
                if !line.trim().is_empty() {
                    warn!(name = %line.trim(), "No device connected; project name dropped");
                }
            }
        }
    }
    debug!("User input closed");
}

//! Single consumer loop that owns the project store.
//!
//! Every producer (device reader, snapshot callers, shutdown) talks to the
//! store through one `mpsc` channel, and the refresh ticker runs on the same
//! thread. Event application and projection therefore never interleave: a
//! frame always reflects whole transitions.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use timecard_protocol::DeviceEvent;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::projector::{project, ProjectRow};
use crate::sink::{DeviceLabels, DisplayFrame, DisplaySink};
use crate::store::ProjectStore;

/// One decoded device line and the event parsed from it, if any.
#[derive(Debug, Clone)]
pub struct InboundLine {
    pub text: String,
    pub captured_at: DateTime<Utc>,
    pub event: Option<DeviceEvent>,
}

pub enum Command {
    Inbound(InboundLine),
    Snapshot(Sender<Vec<ProjectRow>>),
    Shutdown,
}

/// Fixed-rate deadline tracker. Missed ticks are skipped rather than replayed.
#[derive(Debug, Clone)]
pub struct Ticker {
    interval: Duration,
    next: Instant,
}

impl Ticker {
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self {
            interval,
            next: start + interval,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.next.saturating_duration_since(now)
    }

    pub fn advance(&mut self, now: Instant) {
        self.next += self.interval;
        if self.next <= now {
            self.next = now + self.interval;
        }
    }
}

struct Consumer<S: DisplaySink> {
    store: ProjectStore,
    labels: DeviceLabels,
    sink: S,
    clock: Arc<dyn Clock>,
    applied: u64,
}

impl<S: DisplaySink> Consumer<S> {
    fn handle_inbound(&mut self, line: InboundLine) {
        if let Err(err) = self.sink.console_line(&line.text, line.captured_at) {
            warn!(error = %err, "Failed to write console line to display sink");
        }

        let Some(event) = line.event else {
            debug!(line = %line.text, "Display-only device line");
            return;
        };

        debug!(
            kind = event.kind.as_str(),
            raw = %event.raw,
            project = %event.name,
            "Applying device event"
        );
        self.labels.observe(&event);
        self.store.apply_event(&event);
        self.applied += 1;
    }

    fn rows(&self) -> Vec<ProjectRow> {
        project(self.store.records(), self.clock.now())
    }

    fn publish(&mut self) {
        let captured_at = self.clock.now();
        let frame = DisplayFrame {
            captured_at,
            rows: project(self.store.records(), captured_at),
            labels: self.labels.clone(),
        };
        if let Err(err) = self.sink.publish(&frame) {
            warn!(error = %err, "Failed to publish display frame");
        }
    }

    fn run(mut self, commands: Receiver<Command>, interval: Duration) {
        let mut ticker = Ticker::new(Instant::now(), interval);

        loop {
            let now = Instant::now();
            if ticker.is_due(now) {
                self.publish();
                ticker.advance(now);
            }

            match commands.recv_timeout(ticker.remaining(Instant::now())) {
                Ok(Command::Inbound(line)) => self.handle_inbound(line),
                Ok(Command::Snapshot(reply)) => {
                    let _ = reply.send(self.rows());
                }
                Ok(Command::Shutdown) => break,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("All scheduler senders dropped");
                    break;
                }
            }
        }

        self.publish();
        info!(
            events_applied = self.applied,
            projects = self.store.len(),
            "Scheduler stopped"
        );
    }
}

/// Handle to the running consumer thread.
pub struct Scheduler {
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn spawn<S>(sink: S, clock: Arc<dyn Clock>, interval: Duration) -> std::io::Result<Self>
    where
        S: DisplaySink + 'static,
    {
        let (commands, receiver) = mpsc::channel();
        let consumer = Consumer {
            store: ProjectStore::new(),
            labels: DeviceLabels::default(),
            sink,
            clock,
            applied: 0,
        };
        let worker = thread::Builder::new()
            .name("timecard-scheduler".to_string())
            .spawn(move || consumer.run(receiver, interval))?;

        Ok(Self {
            commands,
            worker: Some(worker),
        })
    }

    /// Sender for producers. Commands are handled in the order they arrive.
    pub fn sender(&self) -> Sender<Command> {
        self.commands.clone()
    }

    /// Projects the store at the current time, after every command queued so far.
    pub fn snapshot(&self) -> Option<Vec<ProjectRow>> {
        let (reply, rows) = mpsc::channel();
        self.commands.send(Command::Snapshot(reply)).ok()?;
        rows.recv().ok()
    }

    /// Applies everything already queued, publishes a final frame and joins.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Scheduler thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

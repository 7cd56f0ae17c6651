//! Project session store.
//!
//! Owns every project record and applies device events to them. The store is
//! not shared: the scheduler's consumer thread owns it outright, so each
//! transition below runs to completion before anything else can observe it.
//!
//! Transition rules:
//!
//! - `Added`: creates an idle record; repeated adds are no-ops.
//! - `Started`: folds every running session, then runs the target (creating it
//!   if needed). Accumulated time survives a restart.
//! - `Paused`: folds the target's session if it is running.
//! - `Deleted`: folds the target's session, then removes the record.
//! - Card events never touch the store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use timecard_protocol::{DeviceEvent, EventKind};
use tracing::{debug, info, warn};

use crate::clock::seconds_between;
use crate::projector::format_duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ProjectState {
    Idle,
    Running { since: DateTime<Utc> },
}

impl ProjectState {
    pub fn is_running(&self) -> bool {
        matches!(self, ProjectState::Running { .. })
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        match self {
            ProjectState::Running { since } => Some(*since),
            ProjectState::Idle => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectState::Idle => "idle",
            ProjectState::Running { .. } => "running",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectRecord {
    pub name: String,
    pub state: ProjectState,
    pub accumulated_secs: f64,
}

impl ProjectRecord {
    fn idle(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: ProjectState::Idle,
            accumulated_secs: 0.0,
        }
    }

    fn running(name: &str, since: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            state: ProjectState::Running { since },
            accumulated_secs: 0.0,
        }
    }

    /// Moves a running session into `accumulated_secs` and idles the record.
    /// Returns the folded duration, or `None` if nothing was running.
    fn fold(&mut self, now: DateTime<Utc>) -> Option<f64> {
        let since = self.state.since()?;
        // Clock skew can put `now` before `since`; never shrink the total.
        let elapsed = seconds_between(since, now).max(0.0);
        self.accumulated_secs += elapsed;
        self.state = ProjectState::Idle;
        Some(elapsed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoldedSession {
    pub name: String,
    pub session_secs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Added,
    AlreadyKnown,
    Started {
        created: bool,
        superseded: Vec<FoldedSession>,
    },
    Paused {
        session_secs: f64,
        total_secs: f64,
    },
    Deleted {
        total_secs: f64,
    },
    NotFound,
    AlreadyIdle,
    Ignored,
}

#[derive(Debug, Default)]
pub struct ProjectStore {
    // Insertion order is display order.
    projects: Vec<ProjectRecord>,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ProjectRecord] {
        &self.projects
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&ProjectRecord> {
        self.projects.iter().find(|record| record.name == name)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.projects.iter().position(|record| record.name == name)
    }

    pub fn apply_event(&mut self, event: &DeviceEvent) -> ApplyOutcome {
        let name = event.name.as_str();
        let now = event.captured_at;
        let outcome = match event.kind {
            EventKind::Added => self.add(name),
            EventKind::Started => self.start(name, now),
            EventKind::Paused => self.pause(name, now),
            EventKind::Deleted => self.delete(name, now),
            EventKind::CardScanned | EventKind::UnknownCard => ApplyOutcome::Ignored,
        };

        log_outcome(event, &outcome);
        if event.kind.targets_project() {
            self.log_summary();
        }
        outcome
    }

    fn add(&mut self, name: &str) -> ApplyOutcome {
        if self.position(name).is_some() {
            return ApplyOutcome::AlreadyKnown;
        }
        self.projects.push(ProjectRecord::idle(name));
        ApplyOutcome::Added
    }

    fn start(&mut self, name: &str, now: DateTime<Utc>) -> ApplyOutcome {
        let mut superseded = Vec::new();
        for record in self.projects.iter_mut() {
            if let Some(session_secs) = record.fold(now) {
                superseded.push(FoldedSession {
                    name: record.name.clone(),
                    session_secs,
                });
            }
        }

        match self.position(name) {
            Some(index) => {
                self.projects[index].state = ProjectState::Running { since: now };
                ApplyOutcome::Started {
                    created: false,
                    superseded,
                }
            }
            None => {
                self.projects.push(ProjectRecord::running(name, now));
                ApplyOutcome::Started {
                    created: true,
                    superseded,
                }
            }
        }
    }

    fn pause(&mut self, name: &str, now: DateTime<Utc>) -> ApplyOutcome {
        let Some(index) = self.position(name) else {
            return ApplyOutcome::NotFound;
        };
        let record = &mut self.projects[index];
        match record.fold(now) {
            Some(session_secs) => ApplyOutcome::Paused {
                session_secs,
                total_secs: record.accumulated_secs,
            },
            None => ApplyOutcome::AlreadyIdle,
        }
    }

    fn delete(&mut self, name: &str, now: DateTime<Utc>) -> ApplyOutcome {
        let Some(index) = self.position(name) else {
            return ApplyOutcome::NotFound;
        };
        let mut record = self.projects.remove(index);
        record.fold(now);
        ApplyOutcome::Deleted {
            total_secs: record.accumulated_secs,
        }
    }

    fn log_summary(&self) {
        if self.is_empty() {
            debug!("Project store empty");
            return;
        }
        let summary = self
            .projects
            .iter()
            .map(|record| {
                format!(
                    "{} state={} accumulated={:.1}s",
                    record.name,
                    record.state.as_str(),
                    record.accumulated_secs
                )
            })
            .collect::<Vec<_>>()
            .join(" | ");
        debug!(summary = %summary, "Project store summary");
    }
}

fn log_outcome(event: &DeviceEvent, outcome: &ApplyOutcome) {
    let project = event.name.as_str();
    match outcome {
        ApplyOutcome::Added => info!(project, "Project added"),
        ApplyOutcome::AlreadyKnown => debug!(project, "Project already known; add ignored"),
        ApplyOutcome::Started {
            created,
            superseded,
        } => {
            for folded in superseded {
                info!(
                    project = %folded.name,
                    session_secs = folded.session_secs,
                    "Project paused by start of another"
                );
            }
            info!(
                project,
                created,
                since = %event.captured_at.to_rfc3339(),
                "Project started"
            );
        }
        ApplyOutcome::Paused {
            session_secs,
            total_secs,
        } => info!(project, session_secs, total_secs, "Project paused"),
        ApplyOutcome::Deleted { total_secs } => info!(
            project,
            total = %format_duration(*total_secs),
            "Project deleted"
        ),
        ApplyOutcome::NotFound => warn!(
            project,
            kind = event.kind.as_str(),
            "Project not found; event ignored"
        ),
        ApplyOutcome::AlreadyIdle => warn!(project, "Project not running; pause ignored"),
        ApplyOutcome::Ignored => {}
    }
}

//! Point-in-time display view of the store.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::seconds_between;
use crate::store::{ProjectRecord, ProjectState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RowStatus {
    Running,
    Idle,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Running => "Running",
            RowStatus::Idle => "Idle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectRow {
    pub name: String,
    pub status: RowStatus,
    pub current_session_secs: f64,
    pub total_secs: f64,
    pub total_formatted: String,
    pub current_session_formatted: String,
}

/// Projects every record at `now`, in store order. Never mutates.
pub fn project(records: &[ProjectRecord], now: DateTime<Utc>) -> Vec<ProjectRow> {
    records
        .iter()
        .map(|record| project_record(record, now))
        .collect()
}

fn project_record(record: &ProjectRecord, now: DateTime<Utc>) -> ProjectRow {
    let (status, current_session_secs) = match record.state {
        ProjectState::Running { since } => (RowStatus::Running, seconds_between(since, now)),
        ProjectState::Idle => (RowStatus::Idle, 0.0),
    };
    let total_secs = record.accumulated_secs + current_session_secs;

    ProjectRow {
        name: record.name.clone(),
        status,
        current_session_secs,
        total_secs,
        total_formatted: format_duration(total_secs),
        current_session_formatted: format_duration(current_session_secs),
    }
}

/// Formats seconds as `HH:MM:SS`. Hours are not wrapped at 24; negative input
/// (clock skew) renders as zero.
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "00:00:00".to_string();
    }
    let whole = seconds.trunc() as u64;
    let hours = whole / 3600;
    let minutes = (whole % 3600) / 60;
    let secs = whole % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

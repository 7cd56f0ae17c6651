//! Display sinks fed by the scheduler.
//!
//! Rendering proper belongs to whatever front end consumes the frames. The
//! daemon ships two sinks: a plain text table for terminals and JSON lines
//! for a separate GUI process reading stdout.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{self, Write};
use timecard_protocol::{DeviceEvent, EventKind};

use crate::projector::ProjectRow;

const LABEL_DELETED: &str = "(gelöscht)";
const LABEL_NEW_CARD: &str = "(neu)";
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// Transient "last seen" labels. Not part of the project store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceLabels {
    pub uid: Option<String>,
    pub project: Option<String>,
}

impl DeviceLabels {
    pub fn observe(&mut self, event: &DeviceEvent) {
        match event.kind {
            EventKind::CardScanned => self.uid = Some(event.name.clone()),
            EventKind::UnknownCard => {
                self.uid = Some(event.name.clone());
                self.project = Some(LABEL_NEW_CARD.to_string());
            }
            EventKind::Started | EventKind::Paused | EventKind::Added => {
                self.project = Some(event.name.clone());
            }
            EventKind::Deleted => self.project = Some(LABEL_DELETED.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayFrame {
    pub captured_at: DateTime<Utc>,
    pub rows: Vec<ProjectRow>,
    pub labels: DeviceLabels,
}

pub trait DisplaySink: Send {
    /// Called once per refresh tick.
    fn publish(&mut self, frame: &DisplayFrame) -> io::Result<()>;

    /// Called for every line the device sends, event or not.
    fn console_line(&mut self, line: &str, captured_at: DateTime<Utc>) -> io::Result<()>;
}

pub struct TableSink<W: Write + Send> {
    out: W,
    clear_screen: bool,
}

impl<W: Write + Send> TableSink<W> {
    pub fn new(out: W, clear_screen: bool) -> Self {
        Self { out, clear_screen }
    }
}

impl<W: Write + Send> DisplaySink for TableSink<W> {
    fn publish(&mut self, frame: &DisplayFrame) -> io::Result<()> {
        if self.clear_screen {
            self.out.write_all(CLEAR_SCREEN.as_bytes())?;
        }
        self.out.write_all(render_table(frame).as_bytes())?;
        self.out.flush()
    }

    fn console_line(&mut self, line: &str, _captured_at: DateTime<Utc>) -> io::Result<()> {
        writeln!(self.out, "> {}", line)?;
        self.out.flush()
    }
}

pub fn render_table(frame: &DisplayFrame) -> String {
    let name_width = frame
        .rows
        .iter()
        .map(|row| row.name.chars().count())
        .max()
        .unwrap_or(0)
        .max("Project".len());

    let mut out = String::new();
    out.push_str(&format!(
        "{:<width$}  {:<7}  {:>8}  {:>8}\n",
        "Project",
        "Status",
        "Total",
        "Session",
        width = name_width
    ));
    for row in &frame.rows {
        out.push_str(&format!(
            "{:<width$}  {:<7}  {:>8}  {:>8}\n",
            row.name,
            row.status.as_str(),
            row.total_formatted,
            row.current_session_formatted,
            width = name_width
        ));
    }
    out.push_str(&format!(
        "UID: {} | Project: {}\n",
        frame.labels.uid.as_deref().unwrap_or("-"),
        frame.labels.project.as_deref().unwrap_or("-")
    ));
    out
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonMessage<'a> {
    Frame(&'a DisplayFrame),
    Console {
        line: &'a str,
        captured_at: DateTime<Utc>,
    },
}

pub struct JsonLinesSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn write_message(&mut self, message: &JsonMessage<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, message)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

impl<W: Write + Send> DisplaySink for JsonLinesSink<W> {
    fn publish(&mut self, frame: &DisplayFrame) -> io::Result<()> {
        self.write_message(&JsonMessage::Frame(frame))
    }

    fn console_line(&mut self, line: &str, captured_at: DateTime<Utc>) -> io::Result<()> {
        self.write_message(&JsonMessage::Console { line, captured_at })
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Sink that keeps everything it receives for later inspection.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub frames: Arc<Mutex<Vec<DisplayFrame>>>,
        pub lines: Arc<Mutex<Vec<String>>>,
    }

    impl DisplaySink for RecordingSink {
        fn publish(&mut self, frame: &DisplayFrame) -> io::Result<()> {
            self.frames.lock().expect("frames lock").push(frame.clone());
            Ok(())
        }

        fn console_line(&mut self, line: &str, _captured_at: DateTime<Utc>) -> io::Result<()> {
            self.lines.lock().expect("lines lock").push(line.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projector::RowStatus;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-31T08:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn event(kind: EventKind, name: &str) -> DeviceEvent {
        DeviceEvent {
            kind,
            raw: name.to_string(),
            name: name.to_string(),
            captured_at: t0(),
        }
    }

    fn frame() -> DisplayFrame {
        DisplayFrame {
            captured_at: t0(),
            rows: vec![ProjectRow {
                name: "Alpha".to_string(),
                status: RowStatus::Running,
                current_session_secs: 10.0,
                total_secs: 70.0,
                total_formatted: "00:01:10".to_string(),
                current_session_formatted: "00:00:10".to_string(),
            }],
            labels: DeviceLabels {
                uid: Some("74:8a:71:16".to_string()),
                project: Some("Alpha".to_string()),
            },
        }
    }

    #[test]
    fn labels_follow_device_events() {
        let mut labels = DeviceLabels::default();
        labels.observe(&event(EventKind::CardScanned, "aa:bb"));
        assert_eq!(labels.uid.as_deref(), Some("aa:bb"));
        assert_eq!(labels.project, None);

        labels.observe(&event(EventKind::Started, "Alpha"));
        assert_eq!(labels.project.as_deref(), Some("Alpha"));

        labels.observe(&event(EventKind::Deleted, "Alpha"));
        assert_eq!(labels.project.as_deref(), Some(LABEL_DELETED));

        labels.observe(&event(EventKind::UnknownCard, "cc:dd"));
        assert_eq!(labels.uid.as_deref(), Some("cc:dd"));
        assert_eq!(labels.project.as_deref(), Some(LABEL_NEW_CARD));
    }

    #[test]
    fn table_lists_rows_and_labels() {
        let rendered = render_table(&frame());
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Project"));
        assert!(lines[1].starts_with("Alpha"));
        assert!(lines[1].contains("Running"));
        assert!(lines[1].contains("00:01:10"));
        assert_eq!(lines[2], "UID: 74:8a:71:16 | Project: Alpha");
    }

    #[test]
    fn table_sink_can_clear_screen() {
        let mut sink = TableSink::new(Vec::new(), true);
        sink.publish(&frame()).expect("publish");
        let written = String::from_utf8(sink.out).expect("utf8");
        assert!(written.starts_with(CLEAR_SCREEN));
    }

    #[test]
    fn json_sink_writes_tagged_lines() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.console_line("RFID erkannt: aa:bb", t0()).expect("console");
        sink.publish(&frame()).expect("publish");

        let written = String::from_utf8(sink.out).expect("utf8");
        let messages: Vec<serde_json::Value> = written
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["type"], "console");
        assert_eq!(messages[0]["line"], "RFID erkannt: aa:bb");
        assert_eq!(messages[1]["type"], "frame");
        assert_eq!(messages[1]["rows"][0]["status"], "Running");
        assert_eq!(messages[1]["rows"][0]["total_formatted"], "00:01:10");
        assert_eq!(messages[1]["labels"]["uid"], "74:8a:71:16");
    }
}

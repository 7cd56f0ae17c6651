//! Line protocol spoken by the badge reader.
//!
//! The device writes one newline-terminated UTF-8 line per occurrence. A small
//! set of German markers identify lines that change project state; every other
//! line is console chatter and carries no event. This crate is shared by the
//! daemon and any client that wants to talk to the same device so the marker
//! table only lives in one place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MARKER_CARD_SCANNED: &str = "RFID erkannt:";
pub const MARKER_STARTED: &str = "Projekt gestartet:";
pub const MARKER_PAUSED: &str = "Projekt pausiert:";
pub const MARKER_DELETED: &str = "Projekt geloescht:";
pub const MARKER_ADDED: &str = "Projekt hinzugefügt:";
pub const MARKER_UNKNOWN_CARD: &str = "Unbekannte UID:";

/// Payload used when a marker line carries no `": "` separator.
pub const UNKNOWN_PAYLOAD: &str = "unknown";

const PAYLOAD_SEPARATOR: &str = ": ";
const UID_SUFFIX: &str = " (UID: ";
const ANNOTATION_OPEN: &str = " (";

// Checked in order; the first marker contained in the line wins.
const MARKERS: [(&str, EventKind); 6] = [
    (MARKER_CARD_SCANNED, EventKind::CardScanned),
    (MARKER_STARTED, EventKind::Started),
    (MARKER_PAUSED, EventKind::Paused),
    (MARKER_DELETED, EventKind::Deleted),
    (MARKER_ADDED, EventKind::Added),
    (MARKER_UNKNOWN_CARD, EventKind::UnknownCard),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Added,
    Started,
    Paused,
    Deleted,
    CardScanned,
    UnknownCard,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Added => "added",
            EventKind::Started => "started",
            EventKind::Paused => "paused",
            EventKind::Deleted => "deleted",
            EventKind::CardScanned => "card_scanned",
            EventKind::UnknownCard => "unknown_card",
        }
    }

    /// Whether the event names a project (as opposed to a raw card identifier).
    pub fn targets_project(&self) -> bool {
        matches!(
            self,
            EventKind::Added | EventKind::Started | EventKind::Paused | EventKind::Deleted
        )
    }
}

/// A structured device event. Values are immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub kind: EventKind,
    /// Payload exactly as the device sent it.
    pub raw: String,
    /// Normalized project name, or the raw identifier for card events.
    pub name: String,
    /// Wall-clock time the line was parsed. Session math uses this, never the
    /// time the event is applied.
    pub captured_at: DateTime<Utc>,
}

/// Parses one decoded line. Returns `None` for display-only lines.
pub fn parse_line(line: &str, captured_at: DateTime<Utc>) -> Option<DeviceEvent> {
    let kind = MARKERS
        .iter()
        .find(|(marker, _)| line.contains(marker))
        .map(|(_, kind)| *kind)?;

    let raw = extract_payload(line);
    let name = match kind {
        EventKind::Added | EventKind::Started | EventKind::Paused => normalize_name(raw),
        EventKind::Deleted => strip_duration_annotation(raw),
        EventKind::CardScanned | EventKind::UnknownCard => raw,
    };

    Some(DeviceEvent {
        kind,
        raw: raw.to_string(),
        name: name.to_string(),
        captured_at,
    })
}

/// Returns everything after the first `": "` of the line.
pub fn extract_payload(line: &str) -> &str {
    line.split_once(PAYLOAD_SEPARATOR)
        .map(|(_, rest)| rest)
        .unwrap_or(UNKNOWN_PAYLOAD)
}

/// Strips a ` (UID: ...)` suffix from a project name.
pub fn normalize_name(payload: &str) -> &str {
    match payload.find(UID_SUFFIX) {
        Some(index) => &payload[..index],
        None => payload,
    }
}

/// Strips the ` (0h 5m 23s)` annotation the device appends to deletions.
pub fn strip_duration_annotation(payload: &str) -> &str {
    match payload.find(ANNOTATION_OPEN) {
        Some(index) => &payload[..index],
        None => payload,
    }
}

/// Decodes a raw line from the device.
///
/// Undecodable bytes are dropped rather than rejected, and surrounding
/// whitespace (including the `\r` the firmware emits) is trimmed. Returns
/// `None` when nothing is left.
pub fn decode_line(bytes: &[u8]) -> Option<String> {
    let decoded: String = String::from_utf8_lossy(bytes)
        .chars()
        .filter(|ch| *ch != char::REPLACEMENT_CHARACTER)
        .collect();
    let trimmed = decoded.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Encodes a user-entered project name for the device.
///
/// The firmware reads names up to the next newline, so the name is trimmed
/// and terminated. Empty input produces no traffic.
pub fn encode_project_name(input: &str) -> Option<Vec<u8>> {
    let name = input.trim();
    if name.is_empty() {
        return None;
    }
    let mut bytes = Vec::with_capacity(name.len() + 1);
    bytes.extend_from_slice(name.as_bytes());
    bytes.push(b'\n');
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-31T08:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn normalize_strips_uid_suffix() {
        assert_eq!(normalize_name("Alpha (UID: A1B2C3D4)"), "Alpha");
        assert_eq!(normalize_name("Alpha"), "Alpha");
    }

    #[test]
    fn started_line_yields_clean_name() {
        let event = parse_line("Projekt gestartet: Alpha (UID: A1B2C3D4)", at()).expect("event");
        assert_eq!(event.kind, EventKind::Started);
        assert_eq!(event.raw, "Alpha (UID: A1B2C3D4)");
        assert_eq!(event.name, "Alpha");
        assert_eq!(event.captured_at, at());
    }

    #[test]
    fn deleted_line_strips_duration_annotation() {
        let event = parse_line("Projekt geloescht: Beta (0h 5m 23s)", at()).expect("event");
        assert_eq!(event.kind, EventKind::Deleted);
        assert_eq!(event.name, "Beta");
    }

    #[test]
    fn deleted_name_cut_at_first_parenthesis() {
        let event =
            parse_line("Projekt geloescht: Gamma (UID: 01) (1h 0m 0s)", at()).expect("event");
        assert_eq!(event.name, "Gamma");
    }

    #[test]
    fn added_line_keeps_device_uid_annotation() {
        // The firmware appends "(74:8a:71:16)" without the "UID: " prefix, which
        // only the deletion rule would strip.
        let event = parse_line("Projekt hinzugefügt: Delta (74:8a:71:16)", at()).expect("event");
        assert_eq!(event.kind, EventKind::Added);
        assert_eq!(event.name, "Delta (74:8a:71:16)");
    }

    #[test]
    fn card_events_keep_raw_identifier() {
        let scanned = parse_line("RFID erkannt: 74:8a:71:16", at()).expect("event");
        assert_eq!(scanned.kind, EventKind::CardScanned);
        assert_eq!(scanned.name, "74:8a:71:16");

        let unknown = parse_line("Unbekannte UID: de:ad:be:ef", at()).expect("event");
        assert_eq!(unknown.kind, EventKind::UnknownCard);
        assert_eq!(unknown.raw, "de:ad:be:ef");
        assert!(!unknown.kind.targets_project());
    }

    #[test]
    fn marker_without_separator_uses_placeholder() {
        let event = parse_line("Projekt pausiert:", at()).expect("event");
        assert_eq!(event.kind, EventKind::Paused);
        assert_eq!(event.name, UNKNOWN_PAYLOAD);
    }

    #[test]
    fn unrelated_lines_are_display_only() {
        assert!(parse_line("Bitte Projektnamen eingeben und bestätigen:", at()).is_none());
        assert!(parse_line("Max. Anzahl erreicht!", at()).is_none());
        assert!(parse_line("", at()).is_none());
    }

    #[test]
    fn decode_drops_invalid_bytes_and_trims() {
        let bytes = b"Projekt gestartet: Al\xffpha\r";
        assert_eq!(
            decode_line(bytes).as_deref(),
            Some("Projekt gestartet: Alpha")
        );
        assert_eq!(decode_line(b"\xfe\xff\r\n"), None);
        assert_eq!(decode_line(b"   "), None);
    }

    #[test]
    fn decode_preserves_umlauts() {
        let line = "Projekt hinzugefügt: Küche".as_bytes();
        let decoded = decode_line(line).expect("decoded");
        let event = parse_line(&decoded, at()).expect("event");
        assert_eq!(event.kind, EventKind::Added);
        assert_eq!(event.name, "Küche");
    }

    #[test]
    fn encode_trims_and_terminates() {
        assert_eq!(encode_project_name("  Alpha \n"), Some(b"Alpha\n".to_vec()));
        assert_eq!(encode_project_name("   "), None);
    }

    #[test]
    fn event_kind_serializes_snake_case() {
        let value = serde_json::to_value(EventKind::CardScanned).expect("serialize");
        assert_eq!(value, serde_json::json!("card_scanned"));
    }
}

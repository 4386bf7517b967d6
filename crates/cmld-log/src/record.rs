//! Log record model.
//!
//! The log is an ordered list of [`LogRecord`]s. Data records come from the
//! device (one per decoded [`LogFrame`]); metadata records are host-side
//! annotations such as connection status lines or user-entered events.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};

use cmld_core::error::Error;
use cmld_core::helpers::{bytes_to_ascii, bytes_to_hex};

use crate::frame::{Direction, LogCode, LogFrame};
use crate::tick::TickEncoding;

// ---------------------------------------------------------------------------
// Metadata records
// ---------------------------------------------------------------------------

/// Category tag of a host-side annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    Status,
    NewEvent,
    Error,
    Location,
    CardInfo,
    Print,
    OnClick,
    UsbStatus,
    UsbError,
    UsbResponse,
}

impl MetadataKind {
    pub fn label(self) -> &'static str {
        match self {
            MetadataKind::Status => "STATUS",
            MetadataKind::NewEvent => "NEW EVENT",
            MetadataKind::Error => "ERROR",
            MetadataKind::Location => "LOCATION",
            MetadataKind::CardInfo => "CARD INFO",
            MetadataKind::Print => "PRINT",
            MetadataKind::OnClick => "ONCLICK",
            MetadataKind::UsbStatus => "USB STATUS",
            MetadataKind::UsbError => "USB ERROR",
            MetadataKind::UsbResponse => "USB RESPONSE",
        }
    }
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MetadataKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim().to_ascii_uppercase().as_str() {
            "STATUS" => MetadataKind::Status,
            "NEW EVENT" => MetadataKind::NewEvent,
            "ERROR" => MetadataKind::Error,
            "LOCATION" => MetadataKind::Location,
            "CARD INFO" => MetadataKind::CardInfo,
            "PRINT" => MetadataKind::Print,
            "ONCLICK" => MetadataKind::OnClick,
            "USB STATUS" => MetadataKind::UsbStatus,
            "USB ERROR" => MetadataKind::UsbError,
            "USB RESPONSE" => MetadataKind::UsbResponse,
            other => {
                return Err(Error::InvalidParameter(format!(
                    "unknown metadata kind: {other}"
                )))
            }
        };
        Ok(kind)
    }
}

/// A host-generated annotation in the log stream.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub id: u32,
    pub kind: MetadataKind,
    pub annotation: String,
    pub created: DateTime<Local>,
}

impl MetadataRecord {
    pub fn new(id: u32, kind: MetadataKind, annotation: impl Into<String>) -> Self {
        MetadataRecord {
            id,
            kind,
            annotation: annotation.into(),
            created: Local::now(),
        }
    }
}

impl fmt::Display for MetadataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.created.format("%Y-%m-%d %H:%M:%S"),
            self.kind,
            self.annotation
        )
    }
}

// ---------------------------------------------------------------------------
// Data records
// ---------------------------------------------------------------------------

/// One captured device log entry plus its presentation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord {
    pub id: u32,
    pub code: LogCode,
    /// Device systick of the entry.
    pub tick: u16,
    payload: Vec<u8>,
    pub direction: Direction,
    pub selected: bool,
    /// RGB highlight colour applied by the user, if any.
    pub highlight: Option<u32>,
    /// Cached text rendering of the payload (hex pane, then ASCII pane).
    text: String,
}

impl DataRecord {
    pub fn from_frame(id: u32, frame: LogFrame) -> Self {
        let text = format!(
            "{} | {}",
            bytes_to_hex(&frame.data),
            bytes_to_ascii(&frame.data)
        );
        DataRecord {
            id,
            direction: frame.code.direction(),
            code: frame.code,
            tick: frame.tick,
            payload: frame.data,
            selected: false,
            highlight: None,
            text,
        }
    }

    /// Payload as contiguous upper-case hex, ready for `SEND`, `SEND_RAW`
    /// or `UID=` commands.
    pub fn payload_hex(&self) -> String {
        hex::encode_upper(&self.payload)
    }

    /// Raw payload bytes.
    pub fn entry_data(&self) -> &[u8] {
        &self.payload
    }

    /// The cached text rendering of the payload.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Reduce the cached rendering to the bare command bytes.
    ///
    /// Drops the ASCII pane and normalizes spacing. Idempotent.
    pub fn trim_command_text(&mut self) {
        let hex_pane = match self.text.split_once(" | ") {
            Some((hex, _)) => hex,
            None => self.text.as_str(),
        };
        self.text = hex_pane.split_whitespace().collect::<Vec<_>>().join(" ");
    }

    /// Serialize this record for the binary export.
    ///
    /// The output has device frame layout with the tick field holding the
    /// ticks elapsed since `prior_tick`.
    pub fn package_binary(&self, prior_tick: u16, encoding: &TickEncoding) -> Vec<u8> {
        let delta = encoding.delta(prior_tick, self.tick);
        LogFrame {
            code: self.code,
            tick: self.tick,
            data: self.payload.clone(),
        }
        .encode_with_tick(delta, encoding)
    }

    /// The prior tick to pass to the next record's [`package_binary`].
    ///
    /// [`package_binary`]: DataRecord::package_binary
    pub fn next_offset_time(&self, prior_tick: u16, encoding: &TickEncoding) -> u16 {
        encoding.advance(prior_tick, encoding.delta(prior_tick, self.tick))
    }
}

impl fmt::Display for DataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:06} -- {:05} [{}] {} -- {}",
            self.id, self.tick, self.code, self.direction, self.text
        )
    }
}

// ---------------------------------------------------------------------------
// LogRecord
// ---------------------------------------------------------------------------

/// An entry in the ordered log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Metadata(MetadataRecord),
    Data(DataRecord),
}

impl LogRecord {
    pub fn id(&self) -> u32 {
        match self {
            LogRecord::Metadata(m) => m.id,
            LogRecord::Data(d) => d.id,
        }
    }

    pub fn as_data(&self) -> Option<&DataRecord> {
        match self {
            LogRecord::Data(d) => Some(d),
            LogRecord::Metadata(_) => None,
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Metadata(m) => m.fmt(f),
            LogRecord::Data(d) => d.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tick: u16, data: &[u8]) -> DataRecord {
        DataRecord::from_frame(
            7,
            LogFrame {
                code: LogCode::SnifferReaderData,
                tick,
                data: data.to_vec(),
            },
        )
    }

    #[test]
    fn payload_hex_is_contiguous() {
        let r = record(0, &[0x04, 0xa1, 0xb2, 0xc3]);
        assert_eq!(r.payload_hex(), "04A1B2C3");
        assert_eq!(r.entry_data(), &[0x04, 0xa1, 0xb2, 0xc3]);
    }

    #[test]
    fn direction_from_code() {
        let r = record(0, &[0x26]);
        assert_eq!(r.direction, Direction::Incoming);
        assert!(!r.selected);
        assert_eq!(r.highlight, None);
    }

    #[test]
    fn display_line() {
        let r = record(300, &[0x30, 0x41]);
        assert_eq!(r.to_string(), "000007 -- 00300 [SNIFF READER] <-- -- 30 41 | 0A");
    }

    #[test]
    fn trim_drops_ascii_pane() {
        let mut r = record(0, &[0x30, 0x41]);
        r.trim_command_text();
        assert_eq!(r.text(), "30 41");
        r.trim_command_text();
        assert_eq!(r.text(), "30 41");
    }

    #[test]
    fn trim_keeps_payload() {
        let mut r = record(0, &[0x7C, 0x20]);
        r.trim_command_text();
        assert_eq!(r.payload_hex(), "7C20");
    }

    #[test]
    fn package_binary_uses_delta() {
        let enc = TickEncoding::default();
        let r = record(125, &[0xCC]);
        assert_eq!(r.package_binary(5, &enc), vec![0x44, 0x01, 0x00, 120, 0xCC]);
        assert_eq!(r.next_offset_time(5, &enc), 125);
    }

    #[test]
    fn package_binary_across_wrap() {
        let enc = TickEncoding::default();
        let r = record(0x0004, &[]);
        assert_eq!(r.package_binary(0xFFFE, &enc), vec![0x44, 0x00, 0x00, 0x06]);
        assert_eq!(r.next_offset_time(0xFFFE, &enc), 0x0004);
    }

    #[test]
    fn metadata_kind_parse() {
        assert_eq!("card info".parse::<MetadataKind>().unwrap(), MetadataKind::CardInfo);
        assert_eq!("NEW EVENT".parse::<MetadataKind>().unwrap(), MetadataKind::NewEvent);
        assert!("BOGUS".parse::<MetadataKind>().is_err());
    }

    #[test]
    fn metadata_display_contains_label_and_text() {
        let m = MetadataRecord::new(1, MetadataKind::UsbStatus, "Connection to device unavailable.");
        let line = m.to_string();
        assert!(line.contains("USB STATUS: Connection to device unavailable."));
        assert!(line.starts_with('['));
    }

    #[test]
    fn log_record_accessors() {
        let d = LogRecord::Data(record(1, &[0x01]));
        let m = LogRecord::Metadata(MetadataRecord::new(2, MetadataKind::Status, "x"));
        assert_eq!(d.id(), 7);
        assert_eq!(m.id(), 2);
        assert!(d.as_data().is_some());
        assert!(m.as_data().is_none());
    }
}

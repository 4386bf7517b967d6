//! Log exporters.
//!
//! Three stateless serializers walk the ordered log once, in arrival order:
//!
//! - [`export_text`] -- one human-readable line per record
//! - [`export_html`] -- a minimal HTML document, highlight colours kept
//! - [`export_binary`] -- device frame layout with tick deltas, data only
//!
//! [`write_to_dir`] picks a timestamped file name and writes one of the
//! above to disk. [`decode_binary_log`] reads a binary export back.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

use cmld_core::error::{Error, Result};

use crate::frame::{decode_frame, FrameDecode, LogCode};
use crate::record::LogRecord;
use crate::tick::TickEncoding;

const HTML_HEADER: &str =
    "<html><head><title>Chameleon Mini Live Debugger -- Logging Output</title></head><body>\n\n";
const HTML_FOOTER: &str = "</body></html>";

/// Background colour of the live log view. Highlights equal to it export
/// as white.
pub const DEFAULT_LOG_BACKGROUND: u32 = 0x23_2323;

/// Output encoding of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Text,
    Html,
    Binary,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Text => "out",
            ExportFormat::Html => "html",
            ExportFormat::Binary => "bin",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" | "out" => Ok(ExportFormat::Text),
            "html" => Ok(ExportFormat::Html),
            "binary" | "bin" => Ok(ExportFormat::Binary),
            other => Err(Error::InvalidParameter(format!(
                "unknown export format: {other}"
            ))),
        }
    }
}

/// Knobs shared by the exporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    pub tick_encoding: TickEncoding,
    pub default_background: u32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            tick_encoding: TickEncoding::default(),
            default_background: DEFAULT_LOG_BACKGROUND,
        }
    }
}

// ---------------------------------------------------------------------------
// Serializers
// ---------------------------------------------------------------------------

pub fn export_text(records: &[LogRecord]) -> String {
    let mut out = String::new();
    for record in records {
        match record {
            LogRecord::Data(d) => {
                let _ = writeln!(out, "{d}");
            }
            LogRecord::Metadata(m) => {
                let _ = writeln!(out, "\n## {m}");
            }
        }
    }
    out
}

pub fn export_html(records: &[LogRecord], options: &ExportOptions) -> String {
    let mut out = String::from(HTML_HEADER);
    for record in records {
        match record {
            LogRecord::Data(d) => {
                let color = d
                    .highlight
                    .map(|c| c & 0xFF_FFFF)
                    .filter(|c| *c != options.default_background)
                    .unwrap_or(0xFF_FFFF);
                let _ = writeln!(
                    out,
                    "<code bgcolor='#{:06X}'>{}</code><br/>",
                    color,
                    escape_html(&d.to_string())
                );
            }
            LogRecord::Metadata(m) => {
                let _ = writeln!(out, "<b><code>{}</code></b><br/>", escape_html(&m.to_string()));
            }
        }
    }
    out.push_str(HTML_FOOTER);
    out
}

/// Concatenated binary records for every data record, ticks threaded from
/// zero. Metadata records are skipped.
pub fn export_binary(records: &[LogRecord], encoding: &TickEncoding) -> Vec<u8> {
    let mut out = Vec::new();
    let mut local_ticks: u16 = 0;
    for data in records.iter().filter_map(LogRecord::as_data) {
        out.extend_from_slice(&data.package_binary(local_ticks, encoding));
        local_ticks = data.next_offset_time(local_ticks, encoding);
    }
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// `logdata-<timestamp>.<ext>`, with no colons in the timestamp.
pub fn export_file_name(format: ExportFormat, at: DateTime<Local>) -> String {
    format!(
        "logdata-{}.{}",
        at.format("%Y-%m-%d-%H%M%S"),
        format.extension()
    )
}

/// Serialize `records` and write them to a fresh file in `dir`.
///
/// Returns the path written. A failed write may leave a partial file behind.
pub fn write_to_dir(
    dir: &Path,
    records: &[LogRecord],
    format: ExportFormat,
    options: &ExportOptions,
) -> Result<PathBuf> {
    let path = dir.join(export_file_name(format, Local::now()));
    let bytes = match format {
        ExportFormat::Text => export_text(records).into_bytes(),
        ExportFormat::Html => export_html(records, options).into_bytes(),
        ExportFormat::Binary => export_binary(records, &options.tick_encoding),
    };
    std::fs::write(&path, bytes)?;
    info!("exported {} records to {}", records.len(), path.display());
    Ok(path)
}

// ---------------------------------------------------------------------------
// Reading binary exports
// ---------------------------------------------------------------------------

/// One record read back from a binary export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryEntry {
    pub code: LogCode,
    /// Ticks since the previous entry (or since zero for the first).
    pub delta: u16,
    pub data: Vec<u8>,
}

/// Parse a binary export. Fails on any byte that does not start a record.
pub fn decode_binary_log(bytes: &[u8], encoding: &TickEncoding) -> Result<Vec<BinaryEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        match decode_frame(&bytes[pos..], encoding) {
            FrameDecode::Frame { frame, consumed } => {
                entries.push(BinaryEntry {
                    code: frame.code,
                    delta: frame.tick,
                    data: frame.data,
                });
                pos += consumed;
            }
            FrameDecode::Invalid => {
                return Err(Error::Protocol(format!(
                    "invalid record header at offset {pos}"
                )))
            }
            FrameDecode::Incomplete => {
                return Err(Error::Protocol(format!(
                    "truncated record at offset {pos}"
                )))
            }
        }
    }
    Ok(entries)
}

/// Running sum of decoded deltas, giving each entry's absolute tick.
pub fn absolute_ticks(entries: &[BinaryEntry], encoding: &TickEncoding) -> Vec<u16> {
    let mut tick = 0u16;
    entries
        .iter()
        .map(|e| {
            tick = encoding.advance(tick, e.delta);
            tick
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::LogBook;
    use crate::frame::LogFrame;
    use crate::record::MetadataKind;

    fn frame(tick: u16, data: &[u8]) -> LogFrame {
        LogFrame {
            code: LogCode::SnifferReaderData,
            tick,
            data: data.to_vec(),
        }
    }

    fn sample_book() -> LogBook {
        let book = LogBook::default();
        book.append_frame(frame(5, &[0xAA]));
        book.append_metadata(MetadataKind::Location, "bench");
        book.append_frame(frame(5, &[0xBB, 0xBB]));
        book.append_frame(frame(125, &[0xCC]));
        book
    }

    #[test]
    fn binary_deltas_round_trip() {
        let enc = TickEncoding::default();
        let book = sample_book();
        let bytes = export_binary(&book.snapshot(), &enc);
        let entries = decode_binary_log(&bytes, &enc).unwrap();

        let deltas: Vec<u16> = entries.iter().map(|e| e.delta).collect();
        assert_eq!(deltas, vec![5, 0, 120]);
        let payloads: Vec<Vec<u8>> = entries.iter().map(|e| e.data.clone()).collect();
        assert_eq!(payloads, vec![vec![0xAA], vec![0xBB, 0xBB], vec![0xCC]]);
        assert_eq!(absolute_ticks(&entries, &enc), vec![5, 5, 125]);
    }

    #[test]
    fn binary_little_endian_ticks() {
        let enc = TickEncoding::new(crate::tick::ByteOrder::LittleEndian, 0x1_0000).unwrap();
        let book = LogBook::new(enc);
        book.append_frame(frame(0x0102, &[]));
        let bytes = export_binary(&book.snapshot(), &enc);
        assert_eq!(bytes, vec![0x44, 0x00, 0x02, 0x01]);
    }

    #[test]
    fn decode_binary_rejects_garbage() {
        let enc = TickEncoding::default();
        assert!(decode_binary_log(b"nope", &enc).is_err());
        assert!(decode_binary_log(&[0x44, 0x05, 0x00, 0x00, 0xAA], &enc).is_err());
        assert!(decode_binary_log(&[], &enc).unwrap().is_empty());
    }

    #[test]
    fn text_export_lines_in_order() {
        let book = sample_book();
        let text = export_text(&book.snapshot());
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("000000 -- 00005"));
        assert_eq!(lines[1], "");
        assert!(lines[2].starts_with("## ["));
        assert!(lines[2].ends_with("LOCATION: bench"));
        assert!(lines[3].starts_with("000002 -- 00005"));
        assert!(lines[4].starts_with("000003 -- 00125"));
    }

    #[test]
    fn html_export_structure() {
        let book = sample_book();
        let html = export_html(&book.snapshot(), &ExportOptions::default());
        assert!(html.starts_with(HTML_HEADER));
        assert!(html.ends_with(HTML_FOOTER));
        assert_eq!(html.matches("<code bgcolor='#FFFFFF'>").count(), 3);
        assert_eq!(html.matches("<b><code>").count(), 1);

        let first = html.find("000000 --").unwrap();
        let meta = html.find("LOCATION: bench").unwrap();
        let last = html.find("000003 --").unwrap();
        assert!(first < meta && meta < last);
    }

    #[test]
    fn html_export_highlights() {
        let book = LogBook::default();
        let a = book.append_frame(frame(1, &[0x01]));
        let b = book.append_frame(frame(2, &[0x02]));
        book.select(a, true);
        book.highlight_selected(0xFF0000);
        book.uncheck_all();
        book.select(b, true);
        book.highlight_selected(DEFAULT_LOG_BACKGROUND);

        let html = export_html(&book.snapshot(), &ExportOptions::default());
        assert!(html.contains("<code bgcolor='#FF0000'>000000"));
        assert!(html.contains("<code bgcolor='#FFFFFF'>000001"));
    }

    #[test]
    fn html_highlight_keeps_low_24_bits() {
        let book = LogBook::default();
        book.append_frame(frame(1, &[0x01]));
        book.append_frame(frame(2, &[0x02]));
        let mut records = book.snapshot();
        if let LogRecord::Data(d) = &mut records[0] {
            d.highlight = Some(0xAB12_3456);
        }
        if let LogRecord::Data(d) = &mut records[1] {
            d.highlight = Some(0xFF00_0000 | DEFAULT_LOG_BACKGROUND);
        }

        let html = export_html(&records, &ExportOptions::default());
        assert!(html.contains("<code bgcolor='#123456'>000000"));
        assert!(html.contains("<code bgcolor='#FFFFFF'>000001"));
    }

    #[test]
    fn html_escapes_markup() {
        let book = LogBook::default();
        book.append_metadata(MetadataKind::NewEvent, "<script>&");
        let html = export_html(&book.snapshot(), &ExportOptions::default());
        assert!(html.contains("&lt;script&gt;&amp;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn clear_empties_every_export() {
        let book = sample_book();
        book.clear();
        let records = book.snapshot();
        let opts = ExportOptions::default();
        assert!(export_text(&records).is_empty());
        assert_eq!(export_html(&records, &opts), format!("{HTML_HEADER}{HTML_FOOTER}"));
        assert!(export_binary(&records, &opts.tick_encoding).is_empty());
    }

    #[test]
    fn file_name_has_no_colons() {
        let name = export_file_name(ExportFormat::Html, Local::now());
        assert!(name.starts_with("logdata-"));
        assert!(name.ends_with(".html"));
        assert!(!name.contains(':'));
    }

    #[test]
    fn format_parse() {
        assert_eq!("bin".parse::<ExportFormat>().unwrap(), ExportFormat::Binary);
        assert_eq!("TEXT".parse::<ExportFormat>().unwrap(), ExportFormat::Text);
        assert!("pdf".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn write_to_dir_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let book = sample_book();
        let path = write_to_dir(
            dir.path(),
            &book.snapshot(),
            ExportFormat::Binary,
            &ExportOptions::default(),
        )
        .unwrap();
        assert_eq!(path.extension().unwrap(), "bin");
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(decode_binary_log(&bytes, &TickEncoding::default()).unwrap().len(), 3);
    }

    #[test]
    fn write_to_missing_dir_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        let err = write_to_dir(&missing, &[], ExportFormat::Text, &ExportOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}

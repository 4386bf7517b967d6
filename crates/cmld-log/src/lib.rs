//! cmld-log: Live log frames, the record model, and exporters.
//!
//! Inbound chunks that are not command responses are device log frames.
//! [`LogBook`] decodes them into [`DataRecord`]s, interleaves host-side
//! [`MetadataRecord`]s, and hands the ordered collection to the exporters in
//! [`export`].

pub mod book;
pub mod export;
pub mod frame;
pub mod record;
pub mod tick;

pub use book::{IngestOutcome, LogBook, LogObserver, NullLogObserver};
pub use export::{
    absolute_ticks, decode_binary_log, export_binary, export_file_name, export_html, export_text,
    write_to_dir, BinaryEntry, ExportFormat, ExportOptions, DEFAULT_LOG_BACKGROUND,
};
pub use frame::{decode_chunk, Direction, LogCode, LogFrame};
pub use record::{DataRecord, LogRecord, MetadataKind, MetadataRecord};
pub use tick::{ByteOrder, TickEncoding};

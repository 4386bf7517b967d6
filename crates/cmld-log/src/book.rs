//! The ordered in-memory log collection.
//!
//! [`LogBook`] is shared between the IO task, which appends device frames as
//! they arrive, and callers that annotate, select, and export records. All
//! access goes through a short-held `parking_lot` mutex; observers are
//! notified after the lock is released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::frame::{decode_chunk, Direction, LogFrame};
use crate::record::{DataRecord, LogRecord, MetadataKind, MetadataRecord};
use crate::tick::TickEncoding;

/// Receives notifications as the log grows.
///
/// Implementations must not block; they run on the IO task.
pub trait LogObserver: Send + Sync {
    /// A record was appended to the log.
    fn record_appended(&self, record: &LogRecord);

    /// Bytes were discarded because they did not decode as a log frame.
    /// `total` is the running count of discarded chunks.
    fn frame_dropped(&self, _bytes: &[u8], _total: u64) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogObserver;

impl LogObserver for NullLogObserver {
    fn record_appended(&self, _record: &LogRecord) {}
}

/// What happened to one inbound chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestOutcome {
    /// Number of data records appended.
    pub appended: usize,
    /// Number of trailing bytes that did not decode.
    pub dropped_bytes: usize,
}

#[derive(Debug, Default)]
struct Inner {
    records: Vec<LogRecord>,
    next_id: u32,
}

impl Inner {
    fn take_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }
}

/// Ordered, monotonically numbered log of device frames and annotations.
pub struct LogBook {
    inner: Mutex<Inner>,
    dropped: AtomicU64,
    encoding: TickEncoding,
    observer: Arc<dyn LogObserver>,
}

impl std::fmt::Debug for LogBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBook")
            .field("len", &self.len())
            .field("dropped", &self.dropped_frames())
            .field("encoding", &self.encoding)
            .finish()
    }
}

impl Default for LogBook {
    fn default() -> Self {
        LogBook::new(TickEncoding::default())
    }
}

impl LogBook {
    pub fn new(encoding: TickEncoding) -> Self {
        LogBook::with_observer(encoding, Arc::new(NullLogObserver))
    }

    pub fn with_observer(encoding: TickEncoding, observer: Arc<dyn LogObserver>) -> Self {
        LogBook {
            inner: Mutex::new(Inner::default()),
            dropped: AtomicU64::new(0),
            encoding,
            observer,
        }
    }

    /// Tick encoding used to decode frames and package binary exports.
    pub fn tick_encoding(&self) -> &TickEncoding {
        &self.encoding
    }

    // -----------------------------------------------------------------------
    // Appending
    // -----------------------------------------------------------------------

    /// Decode a non-response chunk and append one data record per frame.
    ///
    /// Undecodable trailing bytes are dropped and counted once per chunk.
    pub fn ingest(&self, chunk: &[u8]) -> IngestOutcome {
        let (frames, dropped_bytes) = decode_chunk(chunk, &self.encoding);
        let appended = frames.len();
        for frame in frames {
            self.append_frame(frame);
        }

        if dropped_bytes > 0 {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let tail = &chunk[chunk.len() - dropped_bytes..];
            warn!(
                "dropped {} undecodable log bytes ({} chunks so far)",
                dropped_bytes, total
            );
            self.observer.frame_dropped(tail, total);
        }

        IngestOutcome {
            appended,
            dropped_bytes,
        }
    }

    /// Append one decoded frame. Returns the new record's id.
    pub fn append_frame(&self, frame: LogFrame) -> u32 {
        let record = {
            let mut inner = self.inner.lock();
            let id = inner.take_id();
            let record = LogRecord::Data(DataRecord::from_frame(id, frame));
            inner.records.push(record.clone());
            record
        };
        debug!("log record {} appended", record.id());
        self.observer.record_appended(&record);
        record.id()
    }

    /// Append a host-side annotation. Returns the new record's id.
    pub fn append_metadata(&self, kind: MetadataKind, annotation: impl Into<String>) -> u32 {
        let record = {
            let mut inner = self.inner.lock();
            let id = inner.take_id();
            let record = LogRecord::Metadata(MetadataRecord::new(id, kind, annotation));
            inner.records.push(record.clone());
            record
        };
        self.observer.record_appended(&record);
        record.id()
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    /// Copy of every record in arrival order.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.inner.lock().records.clone()
    }

    /// Number of chunks that carried undecodable bytes.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Empty the log and restart record numbering at zero.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.records.clear();
        inner.next_id = 0;
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Set the selection flag of a data record. Returns `false` if no data
    /// record has that id.
    pub fn select(&self, id: u32, selected: bool) -> bool {
        self.with_data(id, |d| d.selected = selected)
    }

    pub fn uncheck_all(&self) {
        self.for_each_selected(|d| d.selected = false);
    }

    /// Copies of the selected data records, in log order.
    pub fn selected_data(&self) -> Vec<DataRecord> {
        self.inner
            .lock()
            .records
            .iter()
            .filter_map(LogRecord::as_data)
            .filter(|d| d.selected)
            .cloned()
            .collect()
    }

    /// Apply an RGB highlight to every selected data record.
    pub fn highlight_selected(&self, color: u32) -> usize {
        self.for_each_selected(|d| d.highlight = Some(color & 0xFF_FFFF))
    }

    /// Override the direction marker of every selected data record.
    pub fn set_direction_selected(&self, direction: Direction) -> usize {
        self.for_each_selected(|d| d.direction = direction)
    }

    /// Trim the cached rendering of every selected data record.
    pub fn trim_selected(&self) -> usize {
        self.for_each_selected(DataRecord::trim_command_text)
    }

    fn with_data(&self, id: u32, f: impl FnOnce(&mut DataRecord)) -> bool {
        let mut inner = self.inner.lock();
        let found = inner.records.iter_mut().find_map(|r| match r {
            LogRecord::Data(d) if d.id == id => Some(d),
            _ => None,
        });
        match found {
            Some(d) => {
                f(d);
                true
            }
            None => false,
        }
    }

    fn for_each_selected(&self, mut f: impl FnMut(&mut DataRecord)) -> usize {
        let mut inner = self.inner.lock();
        let mut touched = 0;
        for record in inner.records.iter_mut() {
            if let LogRecord::Data(d) = record {
                if d.selected {
                    f(d);
                    touched += 1;
                }
            }
        }
        touched
    }
}

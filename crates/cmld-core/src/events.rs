//! Asynchronous session event types.
//!
//! Events are emitted by the session through a [`tokio::sync::broadcast`]
//! channel. Front ends subscribe to them for notifications that are not tied
//! to a particular caller: replies to fire-and-forget commands, dropped
//! frames, and connection state.

use crate::response::DeviceResponse;
use crate::status::DeviceStatus;

/// An event emitted by a device session.
///
/// Delivered on a best-effort basis through a bounded broadcast channel;
/// slow consumers may miss events while the device is streaming log frames.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A command reply arrived while no query was waiting for it.
    ///
    /// This is the normal outcome of fire-and-forget commands such as
    /// `VERSION?` or `GETUID`, whose replies nobody blocks on.
    Response(DeviceResponse),

    /// A query ran out of time before the device answered.
    QueryTimedOut {
        /// The command text that was sent.
        command: String,
    },

    /// A new record was appended to the log.
    RecordAppended {
        /// The record identifier.
        id: u32,
    },

    /// An inbound chunk could not be decoded as a log frame and was dropped.
    FrameDropped {
        /// Number of bytes discarded.
        len: usize,
        /// Running total of dropped chunks since the session started.
        total: u64,
    },

    /// The cached device status was refreshed.
    StatusUpdated(DeviceStatus),

    /// The session was configured for live logging and unpaused.
    Connected,

    /// The session was paused or shut down.
    Disconnected,
}

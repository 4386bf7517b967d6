//! # cmld -- Live Debugger Core for the Chameleon Mini
//!
//! `cmld` talks to a Chameleon Mini RFID emulator over its USB serial port
//! while the device sniffs ISO 14443A traffic. It sends text commands,
//! tells their replies apart from the binary live-log frames streamed on the
//! same port, keeps an annotated log of everything that arrived, and exports
//! that log as text, HTML, or the device's own binary format.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cmld::io::{SessionBuilder, StatusCache};
//! use cmld::log::{ExportFormat, MetadataKind};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = SessionBuilder::new()
//!         .serial_port("/dev/ttyACM0")
//!         .build()
//!         .await?;
//!     session.configure_live_logging().await?;
//!
//!     let status = StatusCache::new(session.clone()).refresh().await?;
//!     println!("{}  {}", status.config, status.memory_summary());
//!
//!     session.log().append_metadata(MetadataKind::Location, "front door");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate               | Purpose                                              |
//! |---------------------|------------------------------------------------------|
//! | `cmld-core`         | [`Transport`] trait, response codes, status, errors  |
//! | `cmld-log`          | Log frames, records, [`LogBook`](log::LogBook), exporters |
//! | `cmld-io`           | IO task, [`DeviceSession`](io::DeviceSession), status cache, actions |
//! | `cmld-transport`    | Serial transport for the USB CDC port                |
//! | **`cmld`**          | This facade crate -- re-exports everything           |
//!
//! ## Events
//!
//! Sessions broadcast [`SessionEvent`]s: replies nobody waited for, new log
//! records, dropped frames, status refreshes, and connection changes.
//!
//! ```no_run
//! use cmld::SessionEvent;
//! # async fn example(session: &cmld::io::DeviceSession) {
//! let mut events = session.subscribe();
//! while let Ok(event) = events.recv().await {
//!     if let SessionEvent::Response(reply) = event {
//!         println!("{} {}", reply.code, reply.body);
//!     }
//! }
//! # }
//! ```

pub use cmld_core::*;

/// Live log model and exporters.
///
/// Provides [`LogBook`](log::LogBook), the record types, and the text, HTML,
/// and binary exporters.
pub mod log {
    pub use cmld_log::*;
}

/// Session layer: dispatcher, synchronization gate, status cache, actions.
pub mod io {
    pub use cmld_io::*;
}

/// Serial transport for the device's USB virtual COM port.
pub mod transport {
    pub use cmld_transport::*;
}

//! Live session layer for the Chameleon Mini debugger.
//!
//! The device multiplexes two kinds of traffic over one serial stream:
//! replies to text commands (`100:OK`, `101:OK WITH TEXT`, ...) and binary
//! live-log frames. This crate owns that stream and keeps the two apart.
//!
//! - **Protocol** ([`protocol`]) -- command encoding and the classifier that
//!   decides whether an inbound chunk is a reply or log data.
//! - **IO task** ([`io`]) -- one tokio task owns the transport, writes
//!   commands, polls for replies, and routes everything else to the log.
//! - **Session** ([`session`]) -- [`DeviceSession`], the dispatcher and
//!   synchronization gate: fire-and-forget commands, queries with a bounded
//!   wait, pause/resume, and the live-logging setup sequence.
//! - **Status cache** ([`status`]) -- [`StatusCache`] refreshes the device
//!   configuration fields in one guarded batch, on demand or periodically.
//! - **Actions** ([`actions`]) -- quick buttons, batch operations on selected
//!   records, peripheral assignments, and export to disk.
//! - **Prompts** ([`prompt`]) -- how actions ask the user for text.
//! - **Builder** ([`builder`]) -- [`SessionBuilder`] with smart defaults.
//!
//! # Example
//!
//! ```no_run
//! use cmld_io::{SessionBuilder, StatusCache};
//! use std::sync::Arc;
//!
//! # async fn example() -> cmld_core::Result<()> {
//! let session = SessionBuilder::new()
//!     .serial_port("/dev/ttyACM0")
//!     .build()
//!     .await?;
//! session.configure_live_logging().await?;
//!
//! let status = Arc::new(StatusCache::new(session.clone()));
//! let snapshot = status.refresh().await?;
//! println!("{} {}", snapshot.config, snapshot.uid);
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod builder;
pub mod io;
pub mod prompt;
pub mod protocol;
pub mod session;
pub mod status;

pub use actions::{ActionRunner, BatchAction, Peripheral, QuickAction};
pub use builder::SessionBuilder;
pub use io::{IoConfig, SyncState};
pub use prompt::{ChannelPrompter, NoPrompter, PendingPrompt, PromptRequest, Prompter};
pub use session::{DeviceSession, DispatchResult, Pacing, SessionConfig};
pub use status::{StatusCache, StatusObserver};

//! DeviceSession -- the command dispatcher and synchronization gate.
//!
//! A session owns the IO task, the pause flag, and the response
//! synchronization state. It starts paused; [`DeviceSession::configure_live_logging`]
//! puts the device into sniffing mode with the live log stream enabled and
//! unpauses the channel.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cmld_core::error::{Error, Result};
use cmld_core::events::SessionEvent;
use cmld_core::response::DeviceResponse;
use cmld_core::transport::Transport;
use cmld_log::{ExportOptions, LogBook, LogObserver, LogRecord, MetadataKind};

use crate::io::{self, DeviceIo, IoConfig, LinkState, Request, SyncState};
use crate::protocol;

/// Configuration for the device being sniffed in live logging mode.
pub const SNIFF_CONFIG: &str = "ISO14443A_SNIFF";

/// Configuration for reader mode.
pub const READER_CONFIG: &str = "ISO14443A_READER";

/// How long to wait before writing a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// Write immediately.
    #[default]
    Immediate,
    /// Sleep in the calling task first. Used to pace a sequence of writes.
    Delay(Duration),
}

impl Pacing {
    /// Interpret a signed millisecond value: negative values are a pre-send
    /// delay of that magnitude, anything else means no delay.
    pub fn from_millis(ms: i64) -> Self {
        if ms < 0 {
            Pacing::Delay(Duration::from_millis(ms.unsigned_abs()))
        } else {
            Pacing::Immediate
        }
    }
}

/// Outcome of [`DeviceSession::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// The command was written to the transport.
    Accepted,
    /// Nothing was written: the session is paused or has no transport.
    NoOp,
}

/// Timing and export settings of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub io: IoConfig,
    /// Bound on handing a command to the IO task, and on acquiring the
    /// serial guard (default 2s).
    pub command_timeout: Duration,
    /// Interval of the periodic status refresh (default 10s).
    pub status_interval: Duration,
    pub export: ExportOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            io: IoConfig::default(),
            command_timeout: Duration::from_millis(2000),
            status_interval: Duration::from_secs(10),
            export: ExportOptions::default(),
        }
    }
}

/// Forwards log notifications to session subscribers and an optional
/// caller-supplied observer.
pub(crate) struct EventForwarder {
    pub(crate) event_tx: broadcast::Sender<SessionEvent>,
    pub(crate) inner: Option<Arc<dyn LogObserver>>,
}

impl LogObserver for EventForwarder {
    fn record_appended(&self, record: &LogRecord) {
        let _ = self
            .event_tx
            .send(SessionEvent::RecordAppended { id: record.id() });
        if let Some(inner) = &self.inner {
            inner.record_appended(record);
        }
    }

    fn frame_dropped(&self, bytes: &[u8], total: u64) {
        let _ = self.event_tx.send(SessionEvent::FrameDropped {
            len: bytes.len(),
            total,
        });
        if let Some(inner) = &self.inner {
            inner.frame_dropped(bytes, total);
        }
    }
}

/// A live debugging session with one device.
pub struct DeviceSession {
    io: Mutex<Option<DeviceIo>>,
    link: Arc<LinkState>,
    config: SessionConfig,
    /// Held for every command written, and across multi-command sequences
    /// such as the status refresh.
    serial_guard: tokio::sync::Mutex<()>,
}

impl DeviceSession {
    /// Spawn the IO task over `transport`. The session starts paused.
    ///
    /// `book` and `event_tx` are shared with the IO task.
    pub fn spawn(
        transport: Box<dyn Transport>,
        config: SessionConfig,
        book: Arc<LogBook>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let link = Arc::new(LinkState::new(book, event_tx));
        let io = io::spawn_io_task(transport, config.io.clone(), link.clone());
        DeviceSession {
            io: Mutex::new(Some(io)),
            link,
            config,
            serial_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The session's log.
    pub fn log(&self) -> &Arc<LogBook> {
        self.link.book()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.link.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        self.link.emit(event);
    }

    /// Copy of the response synchronization state.
    pub fn sync_state(&self) -> SyncState {
        self.link.sync_state()
    }

    /// Whether the session still owns a transport.
    pub fn is_connected(&self) -> bool {
        self.io.lock().is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.link.is_paused()
    }

    /// Stop writing commands. Inbound chunks are recorded verbatim.
    pub fn pause(&self) {
        self.link.set_paused(true);
    }

    pub fn resume(&self) {
        self.link.set_paused(false);
    }

    fn sender(&self) -> Option<mpsc::Sender<Request>> {
        self.io.lock().as_ref().map(|io| io.tx.clone())
    }

    /// Acquire the serial guard, waiting at most the command timeout.
    pub async fn lock_serial(&self) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        tokio::time::timeout(self.config.command_timeout, self.serial_guard.lock())
            .await
            .map_err(|_| Error::Busy)
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Write `command` to the device without waiting for a reply.
    ///
    /// Returns [`DispatchResult::NoOp`] without touching the transport when
    /// the session is paused or shut down; the latter is also recorded as a
    /// `USB STATUS` record. The write waits for the serial guard, so it never
    /// lands in the middle of a guarded sequence such as a status refresh.
    pub async fn execute(&self, command: &str, pacing: Pacing) -> Result<DispatchResult> {
        let tx = match self.ready_sender(command) {
            Some(tx) => tx,
            None => return Ok(DispatchResult::NoOp),
        };
        if let Pacing::Delay(delay) = pacing {
            tokio::time::sleep(delay).await;
        }
        let _guard = self.lock_serial().await?;
        self.write_command(&tx, command).await
    }

    /// [`execute`](Self::execute) for callers already holding the serial guard.
    pub(crate) async fn execute_locked(&self, command: &str) -> Result<DispatchResult> {
        match self.ready_sender(command) {
            Some(tx) => self.write_command(&tx, command).await,
            None => Ok(DispatchResult::NoOp),
        }
    }

    fn ready_sender(&self, command: &str) -> Option<mpsc::Sender<Request>> {
        let Some(tx) = self.sender() else {
            self.log()
                .append_metadata(MetadataKind::UsbStatus, "Connection to device unavailable.");
            return None;
        };
        if self.is_paused() {
            debug!(command, "session paused, command not sent");
            return None;
        }
        Some(tx)
    }

    async fn write_command(
        &self,
        tx: &mpsc::Sender<Request>,
        command: &str,
    ) -> Result<DispatchResult> {
        io::execute(tx, protocol::encode_command(command), self.config.command_timeout).await?;
        debug!(command, "command sent");
        Ok(DispatchResult::Accepted)
    }

    /// Send a query and return its reply, or `None` if it timed out or the
    /// session could not send it.
    ///
    /// Waits for the serial guard like [`execute`](Self::execute).
    pub async fn query(&self, command: &str) -> Result<Option<DeviceResponse>> {
        let _guard = self.lock_serial().await?;
        self.query_locked(command).await
    }

    /// [`query`](Self::query) for callers already holding the serial guard.
    pub(crate) async fn query_locked(&self, command: &str) -> Result<Option<DeviceResponse>> {
        let tx = match self.sender() {
            Some(tx) if !self.is_paused() => tx,
            _ => return Ok(None),
        };

        let budget = self.config.io.response_budget();
        match io::query(&tx, command, budget).await {
            Ok(Some(response)) => Ok(Some(response)),
            Ok(None) | Err(Error::Timeout) => {
                info!(command, "no response from device within {:?}", budget);
                self.emit(SessionEvent::QueryTimedOut {
                    command: command.to_string(),
                });
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Send a query and return the reply body.
    ///
    /// If no reply arrives in time, or the session is paused, the body of
    /// the last reply received is returned instead. It may be stale or empty.
    pub async fn query_setting(&self, command: &str) -> Result<String> {
        match self.query(command).await? {
            Some(response) => Ok(response.body),
            None => Ok(self.link.last_body()),
        }
    }

    /// [`query_setting`](Self::query_setting) for callers already holding
    /// the serial guard.
    pub(crate) async fn query_setting_locked(&self, command: &str) -> Result<String> {
        match self.query_locked(command).await? {
            Some(response) => Ok(response.body),
            None => Ok(self.link.last_body()),
        }
    }

    /// [`query_setting`](Self::query_setting) that stops waiting when
    /// `cancel` fires, returning the last known body.
    pub async fn query_setting_cancellable(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(command, "query cancelled");
                Ok(self.link.last_body())
            }
            result = self.query_setting(command) => result,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Switch the device into sniffing mode with live logging and unpause.
    pub async fn configure_live_logging(&self) -> Result<()> {
        let _guard = self.lock_serial().await?;
        if !self.is_connected() {
            self.log()
                .append_metadata(MetadataKind::UsbStatus, "Connection to device unavailable.");
            return Err(Error::NotConnected);
        }

        self.resume();
        let configured: Result<DispatchResult> = async {
            self.execute_locked(&format!("CONFIG={SNIFF_CONFIG}")).await?;
            self.execute_locked("LOGMODE=LIVE").await
        }
        .await;

        match configured {
            Ok(DispatchResult::Accepted) => {
                self.log().append_metadata(
                    MetadataKind::UsbStatus,
                    "Successfully configured the device in passive logging mode.",
                );
                self.emit(SessionEvent::Connected);
                info!("device configured for live logging");
                Ok(())
            }
            Ok(DispatchResult::NoOp) => Err(Error::NotConnected),
            Err(e) => {
                warn!("live logging configuration failed: {e}");
                self.pause();
                self.log()
                    .append_metadata(MetadataKind::UsbError, "Unable to configure serial device.");
                Err(e)
            }
        }
    }

    /// Switch the device into reader mode.
    pub async fn configure_reader_mode(&self) -> Result<DispatchResult> {
        self.execute(&format!("CONFIG={READER_CONFIG}"), Pacing::Immediate)
            .await
    }

    /// Pause, stop the IO task and hand back the transport.
    pub async fn shutdown(&self) -> Result<Box<dyn Transport>> {
        self.pause();
        let io = self.io.lock().take().ok_or(Error::NotConnected)?;
        let transport = io.shutdown().await?;
        self.emit(SessionEvent::Disconnected);
        info!("device session shut down");
        Ok(transport)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(io) = self.io.get_mut().take() {
            io.cancel.cancel();
        }
    }
}

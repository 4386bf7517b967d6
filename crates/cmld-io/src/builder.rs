//! SessionBuilder -- fluent builder for constructing [`DeviceSession`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! serial port parameters, response polling, and export settings before
//! the IO task takes ownership of the transport.
//!
//! # Example
//!
//! ```no_run
//! use cmld_io::builder::SessionBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> cmld_core::Result<()> {
//! let session = SessionBuilder::new()
//!     .serial_port("/dev/ttyACM0")
//!     .response_attempts(20)
//!     .status_interval(Duration::from_secs(5))
//!     .build()
//!     .await?;
//! session.configure_live_logging().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use cmld_core::error::{Error, Result};
use cmld_core::transport::Transport;
use cmld_log::{ExportOptions, LogBook, LogObserver, TickEncoding};

use crate::io::IoConfig;
use crate::session::{DeviceSession, EventForwarder, SessionConfig};

/// Fluent builder for [`DeviceSession`].
///
/// Every setting has a default, so the simplest usage is:
///
/// ```ignore
/// let session = SessionBuilder::new()
///     .serial_port("/dev/ttyACM0")
///     .build()
///     .await?;
/// ```
pub struct SessionBuilder {
    serial_port: Option<String>,
    baud_rate: u32,
    config: SessionConfig,
    log_observer: Option<Arc<dyn LogObserver>>,
    event_capacity: usize,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        SessionBuilder {
            serial_port: None,
            baud_rate: cmld_transport::DEFAULT_BAUD_RATE,
            config: SessionConfig::default(),
            log_observer: None,
            event_capacity: 256,
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyACM0` or `COM4`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the default baud rate (115200).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Number of polling slices a query waits for its reply (default: 14).
    pub fn response_attempts(mut self, attempts: u32) -> Self {
        self.config.io.response_attempts = attempts;
        self
    }

    /// Length of one polling slice (default: 50ms).
    pub fn response_interval(mut self, interval: Duration) -> Self {
        self.config.io.response_interval = interval;
        self
    }

    /// Read timeout of the idle receive loop (default: 100ms).
    pub fn idle_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.io.idle_read_timeout = timeout;
        self
    }

    /// Bound on handing a command to the IO task and on acquiring the
    /// serial guard (default: 2s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Interval of the status poller (default: 10s).
    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.config.status_interval = interval;
        self
    }

    /// Tick byte order and wrap used by the binary exporter.
    pub fn tick_encoding(mut self, encoding: TickEncoding) -> Self {
        self.config.export.tick_encoding = encoding;
        self
    }

    /// Background colour treated as "no highlight" by the HTML exporter
    /// (default: `0x232323`).
    pub fn default_background(mut self, rgb: u32) -> Self {
        self.config.export.default_background = rgb & 0x00FF_FFFF;
        self
    }

    /// Also notify `observer` of every record appended to the log.
    pub fn log_observer(mut self, observer: Arc<dyn LogObserver>) -> Self {
        self.log_observer = Some(observer);
        self
    }

    /// Capacity of the session event broadcast channel (default: 256).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// The configuration the session will be built with.
    pub fn session_config(&self) -> &SessionConfig {
        &self.config
    }

    /// Build a [`DeviceSession`] with a caller-provided transport.
    ///
    /// This is the entry point for testing (pass a `MockTransport` from
    /// `cmld-test-harness`) and for callers that open the port themselves.
    /// The session starts paused.
    pub async fn build_with_transport(
        self,
        transport: Box<dyn Transport>,
    ) -> Result<Arc<DeviceSession>> {
        let io: &IoConfig = &self.config.io;
        if io.response_attempts == 0 {
            return Err(Error::InvalidParameter(
                "response_attempts must be at least 1".into(),
            ));
        }
        if io.response_interval.is_zero() {
            return Err(Error::InvalidParameter(
                "response_interval must be non-zero".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::InvalidParameter(
                "event_capacity must be at least 1".into(),
            ));
        }

        let (event_tx, _) = broadcast::channel(self.event_capacity);
        let ExportOptions { tick_encoding, .. } = self.config.export;
        let forwarder = EventForwarder {
            event_tx: event_tx.clone(),
            inner: self.log_observer,
        };
        let book = Arc::new(LogBook::with_observer(tick_encoding, Arc::new(forwarder)));

        Ok(Arc::new(DeviceSession::spawn(
            transport,
            self.config,
            book,
            event_tx,
        )))
    }

    /// Build a [`DeviceSession`] over a serial transport.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    pub async fn build(self) -> Result<Arc<DeviceSession>> {
        let port = self
            .serial_port
            .as_ref()
            .ok_or_else(|| Error::InvalidParameter("serial_port is required for build()".into()))?;

        let transport = cmld_transport::SerialTransport::open(port, self.baud_rate).await?;
        self.build_with_transport(Box::new(transport)).await
    }
}

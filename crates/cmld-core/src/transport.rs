//! Transport trait for device communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the device.
//! The real implementation is the USB CDC serial port in `cmld-transport`;
//! tests use `MockTransport` from `cmld-test-harness`.
//!
//! The IO task in `cmld-io` pulls chunks with [`Transport::receive`]. Chunk
//! boundaries are whatever the link delivers; the core makes no assumption
//! beyond "one read returns some bytes".

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to the device.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the device.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the device into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Will wait up to `timeout`
    /// for data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing arrives within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}

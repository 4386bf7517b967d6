//! Mock transport for deterministic testing of the command dispatcher.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. Each response is a list of chunks, and every
//! `receive()` call returns at most one chunk, mirroring how the device's
//! USB CDC endpoint hands data to the host.
//!
//! Chunks the device sends on its own (live log frames) are injected with
//! [`MockTransport::push_unsolicited`] or, once the transport has been moved
//! into an IO task, through an [`UnsolicitedFeed`].
//!
//! # Example
//!
//! ```
//! use cmld_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! mock.expect(b"VERSION?\n\r", b"101:OK WITH TEXT\r\nChameleonMini RevG\r\n");
//! mock.push_unsolicited(&[0x40, 0x01, 0x00, 0x10, 0x26]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cmld_core::error::{Error, Result};
use cmld_core::transport::Transport;

/// A pre-loaded request and the chunks the device answers it with.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// Chunks returned by subsequent `receive()` calls, in order.
    chunks: Vec<Vec<u8>>,
}

type ChunkQueue = Arc<Mutex<VecDeque<Vec<u8>>>>;

/// Cloneable handle for injecting unsolicited chunks into a [`MockTransport`]
/// that is owned elsewhere.
#[derive(Debug, Clone)]
pub struct UnsolicitedFeed(ChunkQueue);

impl UnsolicitedFeed {
    pub fn push(&self, chunk: &[u8]) {
        if let Ok(mut queue) = self.0.lock() {
            queue.push_back(chunk.to_vec());
        }
    }
}

/// Cloneable read-only view of everything sent through a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct SentLog(Arc<Mutex<Vec<Vec<u8>>>>);

impl SentLog {
    pub fn get(&self) -> Vec<Vec<u8>> {
        self.0.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Sent data decoded as text, one entry per `send()`.
    pub fn lines(&self) -> Vec<String> {
        self.get()
            .iter()
            .map(|d| String::from_utf8_lossy(d).into_owned())
            .collect()
    }
}

/// A mock [`Transport`] for testing without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation, whose chunks
/// are then returned by the following `receive()` calls. Unsolicited chunks
/// are returned only while no response chunks are pending.
///
/// If no expectation matches or the queue is exhausted, `send()` errors.
#[derive(Debug)]
pub struct MockTransport {
    expectations: VecDeque<Expectation>,
    /// Response chunks pending for upcoming `receive()` calls.
    pending: VecDeque<Vec<u8>>,
    /// Cursor into the front pending chunk.
    cursor: usize,
    unsolicited: ChunkQueue,
    connected: bool,
    sent_log: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            pending: VecDeque::new(),
            cursor: 0,
            unsolicited: Arc::new(Mutex::new(VecDeque::new())),
            connected: true,
            sent_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add an expected request with a single-chunk response.
    ///
    /// An empty `response` means the device stays silent.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        let chunks = if response.is_empty() {
            Vec::new()
        } else {
            vec![response.to_vec()]
        };
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            chunks,
        });
    }

    /// Add an expected request whose answer arrives as several chunks.
    pub fn expect_chunks(&mut self, request: &[u8], chunks: &[&[u8]]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            chunks: chunks.iter().map(|c| c.to_vec()).collect(),
        });
    }

    /// Queue a chunk the device sends without being asked.
    pub fn push_unsolicited(&mut self, chunk: &[u8]) {
        self.unsolicited_feed().push(chunk);
    }

    /// Handle for injecting unsolicited chunks after the mock is moved.
    pub fn unsolicited_feed(&self) -> UnsolicitedFeed {
        UnsolicitedFeed(self.unsolicited.clone())
    }

    /// Handle for inspecting sent data after the mock is moved.
    pub fn sent_log(&self) -> SentLog {
        SentLog(self.sent_log.clone())
    }

    /// All data sent through this transport, one element per `send()` call.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.sent_log().get()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    fn next_unsolicited(&self) -> Option<Vec<u8>> {
        self.unsolicited.lock().ok().and_then(|mut q| q.pop_front())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        if let Ok(mut log) = self.sent_log.lock() {
            log.push(data.to_vec());
        }

        let expectation = self
            .expectations
            .pop_front()
            .ok_or_else(|| Error::Protocol("no more expectations in mock transport".into()))?;
        if data != expectation.request.as_slice() {
            return Err(Error::Protocol(format!(
                "unexpected send data: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expectation.request),
                String::from_utf8_lossy(data)
            )));
        }
        self.pending.extend(expectation.chunks);
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        if let Some(chunk) = self.pending.front() {
            let remaining = &chunk[self.cursor..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.cursor += n;
            if self.cursor >= chunk.len() {
                self.pending.pop_front();
                self.cursor = 0;
            }
            return Ok(n);
        }

        match self.next_unsolicited() {
            Some(chunk) => {
                // Unsolicited chunks larger than the buffer are truncated.
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                Ok(n)
            }
            None => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.pending.clear();
        self.cursor = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

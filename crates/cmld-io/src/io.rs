//! IO task types and implementation for the Chameleon Mini serial link.
//!
//! One tokio task owns the transport exclusively. It processes command
//! requests one at a time, which is what guarantees that at most one
//! command/response exchange is ever outstanding, and between requests it
//! reads the unsolicited live log stream.
//!
//! Every received chunk goes through [`route_chunk`]: a reply to the query in
//! flight completes that query, a reply nobody waits for becomes a
//! [`SessionEvent::Response`], and anything else is decoded into the
//! [`LogBook`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use cmld_core::error::{Error, Result};
use cmld_core::events::SessionEvent;
use cmld_core::helpers::{bytes_to_ascii, bytes_to_hex};
use cmld_core::response::{DeviceResponse, ResponseCode};
use cmld_core::transport::Transport;
use cmld_log::{LogBook, MetadataKind};

use crate::protocol::{self, Classified};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for the IO task.
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// Number of polling slices a query waits for its reply (default 14).
    pub response_attempts: u32,
    /// Length of one polling slice (default 50ms).
    pub response_interval: Duration,
    /// Read timeout used while idle between requests (default 100ms).
    pub idle_read_timeout: Duration,
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            response_attempts: 14,
            response_interval: Duration::from_millis(50),
            idle_read_timeout: Duration::from_millis(100),
        }
    }
}

impl IoConfig {
    /// Total time a query waits for its reply.
    pub fn response_budget(&self) -> Duration {
        self.response_interval * self.response_attempts
    }
}

/// The response synchronization state shared by the IO task and callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    /// A query has been sent and its reply has not arrived yet.
    pub waiting: bool,
    /// Status code of the last reply a query received.
    pub last_code: Option<ResponseCode>,
    /// Body of the last reply a query received.
    pub last_body: String,
}

impl SyncState {
    fn begin(&mut self) {
        self.waiting = true;
    }

    /// Store a reply if a query is waiting for it. Returns whether it was.
    fn publish(&mut self, response: &DeviceResponse) -> bool {
        if !self.waiting {
            return false;
        }
        self.waiting = false;
        self.last_code = Some(response.code);
        self.last_body = response.body.clone();
        true
    }

    fn abandon(&mut self) {
        self.waiting = false;
    }
}

/// State shared between the IO task and the session that owns it.
pub struct LinkState {
    paused: AtomicBool,
    sync: Mutex<SyncState>,
    book: Arc<LogBook>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl LinkState {
    /// New link state. The link starts paused.
    pub fn new(book: Arc<LogBook>, event_tx: broadcast::Sender<SessionEvent>) -> Self {
        LinkState {
            paused: AtomicBool::new(true),
            sync: Mutex::new(SyncState::default()),
            book,
            event_tx,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.lock().clone()
    }

    /// Body of the last reply a query received, possibly stale.
    pub fn last_body(&self) -> String {
        self.sync.lock().last_body.clone()
    }

    pub fn book(&self) -> &Arc<LogBook> {
        &self.book
    }

    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }
}

/// A request sent from the session to the IO task.
pub enum Request {
    /// Write a command and return without waiting for a reply.
    Execute {
        cmd_bytes: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Write a command and wait for its reply. `None` if none arrived in time.
    Query {
        command: String,
        reply: oneshot::Sender<Result<Option<DeviceResponse>>>,
    },
    /// Graceful shutdown; returns the transport for recovery.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Handle to the IO task.
pub struct DeviceIo {
    pub tx: mpsc::Sender<Request>,
    /// Cancellation token for the task.
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

impl DeviceIo {
    /// Shut down the IO task and recover the transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(Request::Shutdown { reply: reply_tx }).await;
        let transport = reply_rx.await.map_err(|_| Error::NotConnected)?;
        let _ = self.task.await;
        Ok(transport)
    }
}

/// Write a command through the IO task.
pub async fn execute(tx: &mpsc::Sender<Request>, cmd: Vec<u8>, timeout: Duration) -> Result<()> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(Request::Execute {
        cmd_bytes: cmd,
        reply: reply_tx,
    })
    .await
    .map_err(|_| Error::NotConnected)?;

    match tokio::time::timeout(timeout + Duration::from_millis(500), reply_rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(Error::NotConnected),
        Err(_) => Err(Error::Timeout),
    }
}

/// Send a query through the IO task and wait up to `budget` for its reply.
pub async fn query(
    tx: &mpsc::Sender<Request>,
    command: &str,
    budget: Duration,
) -> Result<Option<DeviceResponse>> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(Request::Query {
        command: command.to_string(),
        reply: reply_tx,
    })
    .await
    .map_err(|_| Error::NotConnected)?;

    match tokio::time::timeout(budget + Duration::from_millis(500), reply_rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(Error::NotConnected),
        Err(_) => Err(Error::Timeout),
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the IO task. Returns the handle for sending requests.
pub fn spawn_io_task(
    transport: Box<dyn Transport>,
    config: IoConfig,
    link: Arc<LinkState>,
) -> DeviceIo {
    let (tx, rx) = mpsc::channel::<Request>(32);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(io_loop(transport, config, link, rx, cancel.clone()));
    DeviceIo { tx, cancel, task }
}

// ---------------------------------------------------------------------------
// IO Loop
// ---------------------------------------------------------------------------

/// Receive buffer size. A log frame is at most 259 bytes.
const RECV_BUF: usize = 1024;

/// The main IO loop.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Request dispatch
/// 3. Idle reading of the live log stream
async fn io_loop(
    mut transport: Box<dyn Transport>,
    config: IoConfig,
    link: Arc<LinkState>,
    mut rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("device IO task cancelled");
                break;
            }

            req = rx.recv() => {
                match req {
                    Some(Request::Shutdown { reply }) => {
                        debug!("IO task shutdown requested");
                        let _ = reply.send(transport);
                        return;
                    }
                    Some(req) => handle_request(req, &mut *transport, &config, &link).await,
                    None => {
                        debug!("request channel closed, exiting IO task");
                        break;
                    }
                }
            }

            _ = async {
                let mut buf = [0u8; RECV_BUF];
                match transport.receive(&mut buf, config.idle_read_timeout).await {
                    Ok(n) if n > 0 => {
                        route_chunk(&buf[..n], &link);
                    }
                    _ => {
                        // Timeout or error: yield briefly so the loop can
                        // check for requests or cancellation.
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            } => {}
        }
    }
}

async fn handle_request(
    req: Request,
    transport: &mut dyn Transport,
    config: &IoConfig,
    link: &LinkState,
) {
    match req {
        Request::Execute { cmd_bytes, reply } => {
            trace!(cmd = %String::from_utf8_lossy(&cmd_bytes).trim_end(), "execute");
            let _ = reply.send(transport.send(&cmd_bytes).await);
        }
        Request::Query { command, reply } => {
            let result = run_query(transport, &command, config, link).await;
            let _ = reply.send(result);
        }
        Request::Shutdown { .. } => unreachable!("Shutdown handled in io_loop"),
    }
}

/// Send `command` and read until its reply arrives or the budget runs out.
///
/// Log frames that arrive while waiting are routed as usual.
async fn run_query(
    transport: &mut dyn Transport,
    command: &str,
    config: &IoConfig,
    link: &LinkState,
) -> Result<Option<DeviceResponse>> {
    link.sync.lock().begin();
    if let Err(e) = transport.send(&protocol::encode_command(command)).await {
        link.sync.lock().abandon();
        return Err(e);
    }

    let deadline = Instant::now() + config.response_budget();
    let mut buf = [0u8; RECV_BUF];

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let slice_end = (now + config.response_interval).min(deadline);

        match transport.receive(&mut buf, slice_end - now).await {
            Ok(n) if n > 0 => {
                if let Some(response) = route_chunk(&buf[..n], link) {
                    debug!(command, code = %response.code, "query answered");
                    return Ok(Some(response));
                }
            }
            Ok(_) | Err(Error::Timeout) => {
                tokio::time::sleep_until(slice_end).await;
            }
            Err(e) => {
                link.sync.lock().abandon();
                return Err(e);
            }
        }
    }

    link.sync.lock().abandon();
    Ok(None)
}

// ---------------------------------------------------------------------------
// Chunk routing
// ---------------------------------------------------------------------------

/// Route one received chunk.
///
/// Returns the reply if a query was waiting for it. While the link is paused,
/// chunks that no query claims are recorded verbatim as `USB RESPONSE`
/// metadata instead of being decoded.
pub fn route_chunk(chunk: &[u8], link: &LinkState) -> Option<DeviceResponse> {
    let classified = protocol::classify(chunk);

    if let Classified::Response(response) = &classified {
        if link.sync.lock().publish(response) {
            return Some(response.clone());
        }
    }

    if link.is_paused() {
        link.book.append_metadata(
            MetadataKind::UsbResponse,
            format!("{} | {}", bytes_to_hex(chunk), bytes_to_ascii(chunk)),
        );
        return None;
    }

    match classified {
        Classified::Response(response) => {
            debug!(code = %response.code, "unsolicited reply");
            link.emit(SessionEvent::Response(response));
        }
        Classified::LogData => {
            link.book.ingest(chunk);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cmld_log::LogRecord;
    use cmld_test_harness::MockTransport;

    fn fast_config() -> IoConfig {
        IoConfig {
            response_attempts: 4,
            response_interval: Duration::from_millis(10),
            idle_read_timeout: Duration::from_millis(10),
        }
    }

    fn link() -> Arc<LinkState> {
        let (event_tx, _) = broadcast::channel(64);
        let link = LinkState::new(Arc::new(LogBook::default()), event_tx);
        link.set_paused(false);
        Arc::new(link)
    }

    const FRAME: [u8; 5] = [0x40, 0x01, 0x00, 0x10, 0x26];

    // =======================================================================
    // SyncState
    // =======================================================================

    #[test]
    fn publish_only_when_waiting() {
        let mut sync = SyncState::default();
        let resp = DeviceResponse {
            code: ResponseCode::OkWithText,
            body: "X".into(),
        };
        assert!(!sync.publish(&resp));
        assert_eq!(sync.last_body, "");

        sync.begin();
        assert!(sync.waiting);
        assert!(sync.publish(&resp));
        assert!(!sync.waiting);
        assert_eq!(sync.last_code, Some(ResponseCode::OkWithText));
        assert_eq!(sync.last_body, "X");
    }

    #[test]
    fn default_budget_is_700ms() {
        assert_eq!(IoConfig::default().response_budget(), Duration::from_millis(700));
    }

    // =======================================================================
    // route_chunk
    // =======================================================================

    #[test]
    fn route_log_frame_to_book() {
        let link = link();
        assert!(route_chunk(&FRAME, &link).is_none());
        assert_eq!(link.book().len(), 1);
    }

    #[test]
    fn route_unsolicited_reply_to_events() {
        let link = link();
        let mut events = link.subscribe();
        assert!(route_chunk(b"101:OK WITH TEXT\r\nRevG\r\n", &link).is_none());
        assert!(link.book().is_empty());
        match events.try_recv().unwrap() {
            SessionEvent::Response(resp) => assert_eq!(resp.body, "RevG"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(link.last_body(), "");
    }

    #[test]
    fn route_while_paused_records_usb_response() {
        let link = link();
        link.set_paused(true);
        route_chunk(b"100:OK\r\n", &link);
        let records = link.book().snapshot();
        assert_eq!(records.len(), 1);
        match &records[0] {
            LogRecord::Metadata(m) => {
                assert_eq!(m.kind, MetadataKind::UsbResponse);
                assert!(m.annotation.starts_with("31 30 30 3A 4F 4B 0D 0A | 100:OK.."));
            }
            other => panic!("unexpected record {other:?}"),
        }
        assert!(link.is_paused());
    }

    #[test]
    fn route_completes_waiting_query() {
        let link = link();
        link.sync.lock().begin();
        let resp = route_chunk(b"100:OK\r\n", &link).unwrap();
        assert_eq!(resp.code, ResponseCode::Ok);
        assert!(!link.sync_state().waiting);
    }

    // =======================================================================
    // IO task
    // =======================================================================

    #[tokio::test]
    async fn io_task_query_answered() {
        let mut mock = MockTransport::new();
        mock.expect(b"CONFIG?\n\r", b"101:OK WITH TEXT\r\nMF_CLASSIC_1K\r\n");

        let link = link();
        let io = spawn_io_task(Box::new(mock), fast_config(), link.clone());

        let resp = query(&io.tx, "CONFIG?", Duration::from_millis(40))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.code, ResponseCode::OkWithText);
        assert_eq!(resp.body, "MF_CLASSIC_1K");
        assert_eq!(link.last_body(), "MF_CLASSIC_1K");

        let _ = io.shutdown().await;
    }

    #[tokio::test]
    async fn io_task_query_with_interleaved_log_frame() {
        let mut mock = MockTransport::new();
        mock.expect_chunks(b"UID?\n\r", &[&FRAME, b"101:OK WITH TEXT\r\n04A1B2C3\r\n"]);

        let link = link();
        let io = spawn_io_task(Box::new(mock), fast_config(), link.clone());

        let resp = query(&io.tx, "UID?", Duration::from_millis(40)).await.unwrap();
        assert_eq!(resp.unwrap().body, "04A1B2C3");
        assert_eq!(link.book().len(), 1);

        let _ = io.shutdown().await;
    }

    #[tokio::test]
    async fn io_task_query_timeout_returns_none() {
        let mut mock = MockTransport::new();
        mock.expect(b"CONFIG?\n\r", b"");

        let link = link();
        let io = spawn_io_task(Box::new(mock), fast_config(), link.clone());

        let started = std::time::Instant::now();
        let resp = query(&io.tx, "CONFIG?", Duration::from_millis(40)).await.unwrap();
        assert!(resp.is_none());
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert!(!link.sync_state().waiting);

        let _ = io.shutdown().await;
    }

    #[tokio::test]
    async fn io_task_execute_writes_once() {
        let mut mock = MockTransport::new();
        mock.expect(b"LOGMODE=LIVE\n\r", b"");
        let sent = mock.sent_log();

        let io = spawn_io_task(Box::new(mock), fast_config(), link());
        execute(&io.tx, protocol::encode_command("LOGMODE=LIVE"), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(sent.lines(), vec!["LOGMODE=LIVE\n\r"]);

        let _ = io.shutdown().await;
    }

    #[tokio::test]
    async fn io_task_send_error_propagates() {
        let mut mock = MockTransport::new();
        mock.set_connected(false);

        let io = spawn_io_task(Box::new(mock), fast_config(), link());
        let result = query(&io.tx, "CONFIG?", Duration::from_millis(40)).await;
        assert!(matches!(result, Err(Error::NotConnected)));

        let _ = io.shutdown().await;
    }

    #[tokio::test]
    async fn io_task_idle_reads_log_stream() {
        let mock = MockTransport::new();
        let feed = mock.unsolicited_feed();
        let link = link();
        let io = spawn_io_task(Box::new(mock), fast_config(), link.clone());

        feed.push(&FRAME);
        feed.push(b"not a frame");
        for _ in 0..50 {
            if link.book().dropped_frames() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(link.book().len(), 1);
        assert_eq!(link.book().dropped_frames(), 1);

        let _ = io.shutdown().await;
    }

    #[tokio::test]
    async fn io_task_shutdown_recovers_transport() {
        let io = spawn_io_task(Box::new(MockTransport::new()), fast_config(), link());
        let transport = io.shutdown().await.unwrap();
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn io_handle_not_connected_after_exit() {
        let io = spawn_io_task(Box::new(MockTransport::new()), fast_config(), link());
        let tx = io.tx.clone();
        let _ = io.shutdown().await;

        let result = execute(&tx, b"X\n\r".to_vec(), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }
}

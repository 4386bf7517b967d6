//! Device status cache and periodic refresh.
//!
//! A refresh issues a fixed sequence of queries under the session's serial
//! guard and replaces the cached [`DeviceStatus`] wholesale. The poller runs
//! a refresh every [`SessionConfig::status_interval`] and pushes the result
//! to a [`StatusObserver`].
//!
//! [`SessionConfig::status_interval`]: crate::session::SessionConfig::status_interval

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use cmld_core::error::{Error, Result};
use cmld_core::events::SessionEvent;
use cmld_core::status::{format_uid, strip_annotation, DeviceStatus};

use crate::session::DeviceSession;

/// Receives refreshed status snapshots.
pub trait StatusObserver: Send + Sync {
    fn status_updated(&self, status: &DeviceStatus);
}

/// Cached device status backed by a session.
pub struct StatusCache {
    session: Arc<DeviceSession>,
    snapshot: Mutex<DeviceStatus>,
    observer: Option<Arc<dyn StatusObserver>>,
}

impl StatusCache {
    pub fn new(session: Arc<DeviceSession>) -> Self {
        StatusCache {
            session,
            snapshot: Mutex::new(DeviceStatus::default()),
            observer: None,
        }
    }

    pub fn with_observer(session: Arc<DeviceSession>, observer: Arc<dyn StatusObserver>) -> Self {
        StatusCache {
            observer: Some(observer),
            ..StatusCache::new(session)
        }
    }

    /// The last successfully refreshed status. Empty until the first refresh.
    pub fn snapshot(&self) -> DeviceStatus {
        self.snapshot.lock().clone()
    }

    /// Query every status field and replace the cached snapshot.
    pub async fn refresh(&self) -> Result<DeviceStatus> {
        self.refresh_cancellable(&CancellationToken::new()).await
    }

    /// [`refresh`](Self::refresh) that aborts with [`Error::Cancelled`] when
    /// `cancel` fires.
    ///
    /// Fails with [`Error::Busy`] if the serial guard is not free within the
    /// command timeout, with [`Error::Timeout`] if any query goes unanswered,
    /// and with [`Error::MalformedReply`] if a numeric field does not parse.
    /// The cached snapshot is left untouched on failure.
    pub async fn refresh_cancellable(&self, cancel: &CancellationToken) -> Result<DeviceStatus> {
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            guard = self.session.lock_serial() => guard?,
        };

        let config = self.ask("CONFIG?", cancel).await?;
        let uid = self.ask("UID?", cancel).await?;
        let uid_size = self.ask_number("UIDSIZE?", cancel).await?;
        let mem_size = self.ask_number("MEMSIZE?", cancel).await?;
        let log_mem = self.ask("LOGMEM?", cancel).await?;
        let log_size = parse_number("LOGMEM?", strip_annotation(&log_mem))?;
        let dip_setting = self.ask_number("SETTING?", cancel).await?;
        let field = self.ask("FIELD?", cancel).await? == "1";
        let read_only = self.ask("READONLY?", cancel).await? == "1";
        let charging = self.ask("CHARGING?", cancel).await? == "TRUE";
        let threshold = self.ask_number("THRESHOLD?", cancel).await?;
        let timeout = self.ask("TIMEOUT?", cancel).await?;

        let status = DeviceStatus {
            config,
            uid: format_uid(&uid),
            uid_size,
            mem_size,
            log_size,
            dip_setting,
            field,
            read_only,
            charging,
            threshold,
            timeout,
        };
        *self.snapshot.lock() = status.clone();
        debug!("device status refreshed: {status}");
        Ok(status)
    }

    /// Refresh, then push the snapshot to the observer and subscribers.
    pub async fn refresh_and_post(&self) -> Result<DeviceStatus> {
        let status = self.refresh().await?;
        if let Some(observer) = &self.observer {
            observer.status_updated(&status);
        }
        self.session.emit(SessionEvent::StatusUpdated(status.clone()));
        Ok(status)
    }

    /// Spawn the periodic refresh task.
    ///
    /// Cycles are skipped while the session is paused. A cycle that cannot
    /// acquire the serial guard in time is dropped silently. The poller stops
    /// once the session is shut down.
    pub fn spawn_poller(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = self.session.config().status_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if !self.session.is_connected() {
                    break;
                }
                if self.session.is_paused() {
                    continue;
                }
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = self.refresh_and_post() => result,
                };
                match result {
                    Ok(_) => {}
                    Err(Error::Busy) => debug!("status refresh skipped, serial port busy"),
                    Err(Error::NotConnected) => break,
                    Err(e) => warn!("status refresh failed: {e}"),
                }
            }
            debug!("status poller stopped");
        })
    }

    /// Only ever returns the answer to `query` itself, never a stale body.
    async fn ask(&self, query: &str, cancel: &CancellationToken) -> Result<String> {
        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            reply = self.session.query_locked(query) => reply?,
        };
        match reply {
            Some(response) => Ok(response.body),
            None => {
                debug!(query, "status query unanswered");
                Err(Error::Timeout)
            }
        }
    }

    async fn ask_number(&self, query: &str, cancel: &CancellationToken) -> Result<u32> {
        let reply = self.ask(query, cancel).await?;
        parse_number(query, &reply)
    }
}

fn parse_number(query: &str, reply: &str) -> Result<u32> {
    reply.trim().parse().map_err(|_| Error::MalformedReply {
        query: query.to_string(),
        reply: reply.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cmld_log::LogBook;
    use cmld_test_harness::MockTransport;
    use tokio::sync::broadcast;

    use crate::io::IoConfig;
    use crate::session::{DispatchResult, Pacing, SessionConfig};

    fn reply(body: &str) -> Vec<u8> {
        format!("101:OK WITH TEXT\r\n{body}\r\n").into_bytes()
    }

    fn expect_query(mock: &mut MockTransport, query: &str, body: &str) {
        mock.expect(format!("{query}\n\r").as_bytes(), &reply(body));
    }

    fn full_status(mock: &mut MockTransport) {
        expect_query(mock, "CONFIG?", "MF_CLASSIC_1K");
        expect_query(mock, "UID?", "04A1B2C3");
        expect_query(mock, "UIDSIZE?", "4");
        expect_query(mock, "MEMSIZE?", "4096");
        expect_query(mock, "LOGMEM?", "2048 (FREE)");
        expect_query(mock, "SETTING?", "1");
        expect_query(mock, "FIELD?", "1");
        expect_query(mock, "READONLY?", "0");
        expect_query(mock, "CHARGING?", "FALSE");
        expect_query(mock, "THRESHOLD?", "400");
        expect_query(mock, "TIMEOUT?", "10");
    }

    fn session(mock: MockTransport) -> Arc<DeviceSession> {
        session_with_timeout(mock, Duration::from_millis(100))
    }

    fn session_with_timeout(mock: MockTransport, command_timeout: Duration) -> Arc<DeviceSession> {
        let (event_tx, _) = broadcast::channel(64);
        let config = SessionConfig {
            io: IoConfig {
                response_attempts: 4,
                response_interval: Duration::from_millis(10),
                idle_read_timeout: Duration::from_millis(10),
            },
            command_timeout,
            status_interval: Duration::from_millis(20),
            ..SessionConfig::default()
        };
        let session =
            DeviceSession::spawn(Box::new(mock), config, Arc::new(LogBook::default()), event_tx);
        session.resume();
        Arc::new(session)
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<DeviceStatus>>);

    impl StatusObserver for Recorder {
        fn status_updated(&self, status: &DeviceStatus) {
            self.0.lock().push(status.clone());
        }
    }

    #[tokio::test]
    async fn refresh_parses_every_field() {
        let mut mock = MockTransport::new();
        full_status(&mut mock);
        let sent = mock.sent_log();
        let cache = StatusCache::new(session(mock));

        let status = cache.refresh().await.unwrap();
        assert_eq!(status.config, "MF_CLASSIC_1K");
        assert_eq!(status.uid, "04:A1:B2:C3");
        assert_eq!(status.uid_size, 4);
        assert_eq!(status.mem_size, 4096);
        assert_eq!(status.log_size, 2048);
        assert_eq!(status.dip_setting, 1);
        assert!(status.field);
        assert!(!status.read_only);
        assert!(!status.charging);
        assert_eq!(status.threshold, 400);
        assert_eq!(status.timeout, "10");
        assert_eq!(status.memory_summary(), "MEM-4K/LOG-2K/DIP#1");
        assert_eq!(cache.snapshot(), status);

        let order: Vec<String> = sent.lines().iter().map(|l| l.trim_end().to_string()).collect();
        assert_eq!(
            order,
            vec![
                "CONFIG?", "UID?", "UIDSIZE?", "MEMSIZE?", "LOGMEM?", "SETTING?", "FIELD?",
                "READONLY?", "CHARGING?", "THRESHOLD?", "TIMEOUT?"
            ]
        );
    }

    #[tokio::test]
    async fn refresh_keeps_no_uid_sentinel() {
        let mut mock = MockTransport::new();
        expect_query(&mut mock, "CONFIG?", "NONE");
        expect_query(&mut mock, "UID?", "NO UID.");
        expect_query(&mut mock, "UIDSIZE?", "0");
        expect_query(&mut mock, "MEMSIZE?", "0");
        expect_query(&mut mock, "LOGMEM?", "0");
        expect_query(&mut mock, "SETTING?", "2");
        expect_query(&mut mock, "FIELD?", "0");
        expect_query(&mut mock, "READONLY?", "1");
        expect_query(&mut mock, "CHARGING?", "TRUE");
        expect_query(&mut mock, "THRESHOLD?", "0");
        expect_query(&mut mock, "TIMEOUT?", "0");
        let cache = StatusCache::new(session(mock));

        let status = cache.refresh().await.unwrap();
        assert_eq!(status.uid, "NO UID.");
        assert!(status.read_only);
        assert!(status.charging);
        assert_eq!(status.flags_summary(), "RO/FLD-0/CHRG");
    }

    #[tokio::test]
    async fn malformed_number_fails_refresh() {
        let mut mock = MockTransport::new();
        expect_query(&mut mock, "CONFIG?", "MF_CLASSIC_1K");
        expect_query(&mut mock, "UID?", "04A1B2C3");
        expect_query(&mut mock, "UIDSIZE?", "four");
        let cache = StatusCache::new(session(mock));

        let err = cache.refresh().await.unwrap_err();
        match err {
            Error::MalformedReply { query, reply } => {
                assert_eq!(query, "UIDSIZE?");
                assert_eq!(reply, "four");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(cache.snapshot(), DeviceStatus::default());
    }

    #[tokio::test]
    async fn silent_numeric_query_is_timeout() {
        let mut mock = MockTransport::new();
        expect_query(&mut mock, "CONFIG?", "MF_CLASSIC_1K");
        expect_query(&mut mock, "UID?", "04A1B2C3");
        mock.expect(b"UIDSIZE?\n\r", b"");
        let cache = StatusCache::new(session(mock));

        assert!(matches!(cache.refresh().await, Err(Error::Timeout)));
        assert_eq!(cache.snapshot(), DeviceStatus::default());
    }

    #[tokio::test]
    async fn silent_query_never_takes_previous_answer() {
        let mut mock = MockTransport::new();
        expect_query(&mut mock, "CONFIG?", "MF_CLASSIC_1K");
        expect_query(&mut mock, "UID?", "04A1B2C3");
        expect_query(&mut mock, "UIDSIZE?", "4");
        mock.expect(b"MEMSIZE?\n\r", b"");
        let cache = StatusCache::new(session(mock));

        assert!(matches!(cache.refresh().await, Err(Error::Timeout)));
        assert_ne!(cache.snapshot().mem_size, 4);
    }

    #[tokio::test]
    async fn execute_waits_for_running_refresh() {
        let mut mock = MockTransport::new();
        full_status(&mut mock);
        mock.expect(b"VERSION?\n\r", b"");
        let sent = mock.sent_log();
        let session = session_with_timeout(mock, Duration::from_secs(5));
        let cache = StatusCache::new(session.clone());

        let (status, dispatched) = tokio::join!(cache.refresh(), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            session.execute("VERSION?", Pacing::Immediate).await
        });
        assert_eq!(status.unwrap().uid_size, 4);
        assert_eq!(dispatched.unwrap(), DispatchResult::Accepted);

        let order: Vec<String> = sent.lines().iter().map(|l| l.trim_end().to_string()).collect();
        assert_eq!(order.len(), 12);
        assert_eq!(order[10], "TIMEOUT?");
        assert_eq!(order[11], "VERSION?");
    }

    #[tokio::test]
    async fn refresh_busy_when_guard_held() {
        let session = session(MockTransport::new());
        let cache = StatusCache::new(session.clone());
        let _held = session.lock_serial().await.unwrap();
        assert!(matches!(cache.refresh().await, Err(Error::Busy)));
    }

    #[tokio::test]
    async fn cancelled_refresh_aborts() {
        let cache = StatusCache::new(session(MockTransport::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            cache.refresh_cancellable(&cancel).await,
            Err(Error::Cancelled)
        ));
    }

    #[tokio::test]
    async fn refresh_and_post_notifies() {
        let mut mock = MockTransport::new();
        full_status(&mut mock);
        let session = session(mock);
        let mut events = session.subscribe();
        let recorder = Arc::new(Recorder::default());
        let cache = StatusCache::with_observer(session, recorder.clone());

        cache.refresh_and_post().await.unwrap();
        assert_eq!(recorder.0.lock().len(), 1);
        assert_eq!(recorder.0.lock()[0].config, "MF_CLASSIC_1K");

        let mut saw_update = false;
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::StatusUpdated(status) = event {
                assert_eq!(status.threshold, 400);
                saw_update = true;
            }
        }
        assert!(saw_update);
    }

    #[tokio::test]
    async fn poller_posts_and_stops() {
        let mut mock = MockTransport::new();
        full_status(&mut mock);
        let recorder = Arc::new(Recorder::default());
        let cache = Arc::new(StatusCache::with_observer(session(mock), recorder.clone()));

        let cancel = CancellationToken::new();
        let handle = cache.clone().spawn_poller(cancel.clone());
        for _ in 0..100 {
            if !recorder.0.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(recorder.0.lock()[0].uid, "04:A1:B2:C3");
    }
}

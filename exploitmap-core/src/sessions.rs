use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use exploitmap_output::mask;
use exploitmap_rpc::{ExploitService, RpcError};
use exploitmap_types::Session;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::Clock;

/// Outcome of one expiry pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions removed from the registry, oldest first.
    pub expired: Vec<String>,
    pub stopped: usize,
    pub failed: usize,
}

/// Registry of sessions opened by successful attempts.
pub struct SessionTracker {
    service: Arc<dyn ExploitService>,
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionTracker {
    pub fn new(service: Arc<dyn ExploitService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            service,
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track a new session. Returns false if the id is already tracked.
    pub fn register(&self, session_id: &str, module_path: &str, target_ip: &str) -> bool {
        let mut sessions = self.sessions();
        if sessions.contains_key(session_id) {
            return false;
        }
        sessions.insert(
            session_id.to_string(),
            Session {
                session_id: session_id.to_string(),
                created_at: self.clock.now(),
                module_path: module_path.to_string(),
                target_ip: target_ip.to_string(),
            },
        );
        info!(session = %session_id, module = %module_path, host = %mask(target_ip), "session registered");
        true
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions().contains_key(session_id)
    }

    /// Snapshot of tracked sessions, oldest first.
    pub fn list_active(&self) -> Vec<Session> {
        let mut active: Vec<Session> = self.sessions().values().cloned().collect();
        active.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        active
    }

    /// Stop a tracked session. Returns `Ok(false)` if it was not tracked.
    /// The session leaves the registry even when the remote stop fails.
    pub async fn stop(&self, session_id: &str) -> Result<bool, RpcError> {
        if self.sessions().remove(session_id).is_none() {
            return Ok(false);
        }
        self.service.stop_session(session_id).await?;
        info!(session = %session_id, "session stopped");
        Ok(true)
    }

    /// Remove every session older than `session_timeout` at `now` and ask
    /// the service to stop it. Stop failures are counted, not raised.
    pub async fn sweep(&self, now: SystemTime, session_timeout: Duration) -> SweepReport {
        let expired: Vec<Session> = {
            let mut sessions = self.sessions();
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| s.age(now) > session_timeout)
                .map(|s| s.session_id.clone())
                .collect();
            let mut expired: Vec<Session> =
                ids.iter().filter_map(|id| sessions.remove(id)).collect();
            expired.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            expired
        };

        let mut report = SweepReport::default();
        for session in expired {
            match self.service.stop_session(&session.session_id).await {
                Ok(()) => report.stopped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(session = %session.session_id, error = %mask(&e.to_string()), "failed to stop expired session");
                }
            }
            report.expired.push(session.session_id);
        }

        if report.expired.is_empty() {
            debug!("no expired sessions");
        } else {
            info!(
                expired = report.expired.len(),
                stopped = report.stopped,
                failed = report.failed,
                "session sweep complete"
            );
        }
        report
    }

    /// Sweep every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        session_timeout: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep(self.clock.now(), session_timeout).await;
                    }
                }
            }
            debug!("session sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exploitmap_rpc::MockService;

    struct ManualClock(Mutex<SystemTime>);

    impl ManualClock {
        fn at(secs: u64) -> Arc<Self> {
            Arc::new(Self(Mutex::new(
                SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
            )))
        }

        fn advance(&self, by: Duration) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> SystemTime {
            *self.0.lock().unwrap()
        }
    }

    fn tracker(mock: &Arc<MockService>, clock: &Arc<ManualClock>) -> Arc<SessionTracker> {
        Arc::new(SessionTracker::new(mock.clone(), clock.clone()))
    }

    #[test]
    fn register_rejects_duplicates() {
        let mock = Arc::new(MockService::new());
        let clock = ManualClock::at(1_000);
        let tracker = tracker(&mock, &clock);
        assert!(tracker.register("1", "exploit/a", "10.0.0.5"));
        assert!(!tracker.register("1", "exploit/b", "10.0.0.6"));
        assert_eq!(tracker.list_active().len(), 1);
        assert_eq!(tracker.list_active()[0].module_path, "exploit/a");
    }

    #[test]
    fn list_active_is_oldest_first() {
        let mock = Arc::new(MockService::new());
        let clock = ManualClock::at(1_000);
        let tracker = tracker(&mock, &clock);
        tracker.register("9", "exploit/a", "10.0.0.5");
        clock.advance(Duration::from_secs(5));
        tracker.register("2", "exploit/a", "10.0.0.6");
        let ids: Vec<_> = tracker.list_active().into_iter().map(|s| s.session_id).collect();
        assert_eq!(ids, vec!["9", "2"]);
    }

    #[tokio::test]
    async fn sweep_expires_only_old_sessions() {
        let mock = Arc::new(MockService::new());
        mock.add_session("1", "10.0.0.5").add_session("2", "10.0.0.6");
        let clock = ManualClock::at(0);
        let tracker = tracker(&mock, &clock);
        tracker.register("1", "exploit/a", "10.0.0.5");
        clock.advance(Duration::from_secs(3000));
        tracker.register("2", "exploit/a", "10.0.0.6");
        clock.advance(Duration::from_secs(601));

        let report = tracker.sweep(clock.now(), Duration::from_secs(3600)).await;
        assert_eq!(report.expired, vec!["1".to_string()]);
        assert_eq!(report.stopped, 1);
        assert_eq!(report.failed, 0);
        assert!(!tracker.contains("1"));
        assert!(tracker.contains("2"));
        assert_eq!(mock.stopped_sessions(), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn sweep_continues_past_stop_failures() {
        let mock = Arc::new(MockService::new());
        mock.fail_stop("1");
        let clock = ManualClock::at(0);
        let tracker = tracker(&mock, &clock);
        tracker.register("1", "exploit/a", "10.0.0.5");
        tracker.register("2", "exploit/a", "10.0.0.6");
        clock.advance(Duration::from_secs(7200));

        let report = tracker.sweep(clock.now(), Duration::from_secs(3600)).await;
        assert_eq!(report.expired.len(), 2);
        assert_eq!(report.stopped, 1);
        assert_eq!(report.failed, 1);
        assert!(tracker.list_active().is_empty());
    }

    #[tokio::test]
    async fn explicit_stop() {
        let mock = Arc::new(MockService::new());
        let clock = ManualClock::at(0);
        let tracker = tracker(&mock, &clock);
        tracker.register("4", "exploit/a", "10.0.0.5");
        assert!(tracker.stop("4").await.unwrap());
        assert!(!tracker.stop("4").await.unwrap());
        assert_eq!(mock.stopped_sessions(), vec!["4".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_cancelled() {
        let mock = Arc::new(MockService::new());
        let clock = ManualClock::at(0);
        let tracker = tracker(&mock, &clock);
        tracker.register("1", "exploit/a", "10.0.0.5");
        clock.advance(Duration::from_secs(10));

        let cancel = CancellationToken::new();
        let handle = tracker.clone().spawn_sweeper(
            Duration::from_secs(60),
            Duration::from_secs(5),
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(tracker.list_active().is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}

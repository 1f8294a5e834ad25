// ---------------------------------------------------------------------------
// Session detection
// ---------------------------------------------------------------------------
//
// After a module is launched as a job, the engine waits for a session that
// the job opened. The wait is a trait so a push-based implementation can
// replace polling when the service offers one.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use exploitmap_rpc::{ExploitService, RpcError};
use exploitmap_types::config::{DEFAULT_MAX_POLLS, DEFAULT_POLL_INTERVAL_SECS};
use tracing::debug;

/// What a watch is looking for.
pub struct WatchRequest<'a> {
    /// Session ids that existed before the module was executed.
    pub known: &'a HashSet<String>,
    pub exploit_uuid: Option<&'a str>,
    pub target_ip: &'a str,
    /// Claims a session for this attempt; false if another attempt owns it.
    pub claim: &'a (dyn Fn(&str) -> bool + Send + Sync),
}

#[async_trait]
pub trait SessionWatch: Send + Sync {
    /// Wait for a new session belonging to the request and claim it.
    /// `Ok(None)` means the wait ended without one.
    async fn wait_for_session(
        &self,
        service: &dyn ExploitService,
        request: &WatchRequest<'_>,
    ) -> Result<Option<String>, RpcError>;
}

/// Lists sessions every `interval`, at most `max_polls` times.
#[derive(Debug, Clone)]
pub struct PollingWatch {
    interval: Duration,
    max_polls: u32,
}

impl PollingWatch {
    pub fn new(interval: Duration, max_polls: u32) -> Self {
        Self {
            interval,
            max_polls,
        }
    }
}

impl Default for PollingWatch {
    fn default() -> Self {
        Self::new(
            Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECS),
            DEFAULT_MAX_POLLS,
        )
    }
}

#[async_trait]
impl SessionWatch for PollingWatch {
    async fn wait_for_session(
        &self,
        service: &dyn ExploitService,
        request: &WatchRequest<'_>,
    ) -> Result<Option<String>, RpcError> {
        for poll in 1..=self.max_polls {
            tokio::time::sleep(self.interval).await;
            let sessions = service.list_sessions().await?;
            let found = sessions.iter().find(|(id, info)| {
                !request.known.contains(id.as_str())
                    && info.belongs_to(request.exploit_uuid, request.target_ip)
                    && (request.claim)(id.as_str())
            });
            if let Some((id, _)) = found {
                debug!(session = %id, poll, "session detected");
                return Ok(Some(id.clone()));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exploitmap_rpc::{MockOutcome, MockService, ModuleHandle};
    use std::sync::Mutex;

    fn accept_all(_: &str) -> bool {
        true
    }

    #[tokio::test(start_paused = true)]
    async fn finds_session_opened_by_job() {
        let mock = MockService::new();
        mock.add_session("1", "10.0.0.7").script(
            "exploit/a",
            vec![MockOutcome::SessionAfter {
                session_id: "2".into(),
                delay: Duration::from_secs(3),
            }],
        );
        let mut module = ModuleHandle::new("exploit", "exploit/a");
        module.set("RHOSTS", serde_json::json!("10.0.0.5")).unwrap();
        mock.execute(&module).await.unwrap();

        let known: HashSet<String> = ["1".to_string()].into();
        let request = WatchRequest {
            known: &known,
            exploit_uuid: Some("job-1"),
            target_ip: "10.0.0.5",
            claim: &accept_all,
        };
        let start = tokio::time::Instant::now();
        let found = PollingWatch::new(Duration::from_secs(1), 10)
            .wait_for_session(&mock, &request)
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some("2"));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_polls() {
        let mock = MockService::new();
        let known = HashSet::new();
        let request = WatchRequest {
            known: &known,
            exploit_uuid: None,
            target_ip: "10.0.0.5",
            claim: &accept_all,
        };
        let start = tokio::time::Instant::now();
        let found = PollingWatch::new(Duration::from_millis(500), 4)
            .wait_for_session(&mock, &request)
            .await
            .unwrap();
        assert_eq!(found, None);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn skips_foreign_and_claimed_sessions() {
        let mock = MockService::new();
        mock.add_session("3", "10.0.0.9")
            .add_session("4", "10.0.0.5")
            .add_session("5", "10.0.0.5");
        let claimed = Mutex::new(vec!["4".to_string()]);
        let claim = |id: &str| {
            let mut claimed = claimed.lock().unwrap();
            if claimed.iter().any(|c| c == id) {
                return false;
            }
            claimed.push(id.to_string());
            true
        };
        let known = HashSet::new();
        let request = WatchRequest {
            known: &known,
            exploit_uuid: None,
            target_ip: "10.0.0.5",
            claim: &claim,
        };
        let found = PollingWatch::new(Duration::from_secs(1), 1)
            .wait_for_session(&mock, &request)
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some("5"));
    }
}

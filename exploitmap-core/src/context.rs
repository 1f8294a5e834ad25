use std::sync::Arc;
use std::time::{Duration, SystemTime};

use exploitmap_output::ResultCollector;
use exploitmap_rpc::ExploitService;
use exploitmap_types::{ConfigError, DEFAULT_PAYLOAD, ListenerSettings, OrchestratorConfig};

use crate::sessions::SessionTracker;
use crate::watch::{PollingWatch, SessionWatch};

/// Source of wall-clock timestamps for results and session ages.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Everything an attempt needs, passed explicitly to every component.
pub struct EngineContext {
    pub service: Arc<dyn ExploitService>,
    pub listener: ListenerSettings,
    pub default_payload: String,
    /// Delay between a failed attempt and its retry.
    pub retry_backoff: Duration,
    pub clock: Arc<dyn Clock>,
    pub watch: Arc<dyn SessionWatch>,
    pub tracker: Arc<SessionTracker>,
    pub collector: Arc<ResultCollector>,
}

impl EngineContext {
    pub fn new(service: Arc<dyn ExploitService>, listener: ListenerSettings) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            tracker: Arc::new(SessionTracker::new(service.clone(), clock.clone())),
            service,
            listener,
            default_payload: DEFAULT_PAYLOAD.to_string(),
            retry_backoff: Duration::ZERO,
            clock,
            watch: Arc::new(PollingWatch::default()),
            collector: Arc::new(ResultCollector::new()),
        }
    }

    /// Build a context from loaded settings.
    pub fn from_config(
        service: Arc<dyn ExploitService>,
        config: &OrchestratorConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(service, config.listener()?)
            .with_watch(Arc::new(PollingWatch::new(
                config.poll_interval(),
                config.max_polls(),
            )))
            .with_default_payload(config.default_payload())
            .with_retry_backoff(config.retry_backoff()))
    }

    pub fn with_watch(mut self, watch: Arc<dyn SessionWatch>) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_default_payload(mut self, payload: impl Into<String>) -> Self {
        self.default_payload = payload.into();
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Replace the clock. The session tracker is rebuilt so that it shares it.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.tracker = Arc::new(SessionTracker::new(self.service.clone(), clock.clone()));
        self.clock = clock;
        self
    }
}

//! Scripted in-memory [`ExploitService`] for tests.
//!
//! Each module path owns a queue of [`MockOutcome`]s consumed one per
//! execute call. Console usage and execute concurrency are instrumented so
//! tests can assert on scheduling bounds.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::RpcError;
use crate::traits::{ExecuteResponse, ExploitService, ModuleHandle, ModuleInfo, SessionInfo};

/// What a single execute call does.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// A job starts and session `session_id` appears `delay` later.
    SessionAfter { session_id: String, delay: Duration },
    /// Execute returns the session directly.
    ImmediateSession(String),
    /// Execute reports that no session was created.
    NoSession(String),
    /// Execute raises.
    Fail(String),
    /// A job starts and nothing ever happens.
    Silent,
    /// A job starts and the console prints this text.
    ConsoleBanner(String),
    /// Execute never returns.
    Hang,
    /// Execute blocks for the duration, then behaves like the inner outcome.
    Delayed(Duration, Box<MockOutcome>),
}

struct PendingSession {
    info: SessionInfo,
    visible_at: Instant,
}

#[derive(Default)]
struct MockState {
    catalog: HashMap<String, Vec<ModuleInfo>>,
    search_error: Option<String>,
    searches: Vec<String>,
    details: HashMap<String, ModuleInfo>,
    info_requests: Vec<String>,
    payloads: HashMap<String, Vec<String>>,
    payload_error: Option<String>,
    payload_hang: bool,
    scripts: HashMap<String, VecDeque<MockOutcome>>,
    executions: Vec<ModuleHandle>,
    console_output: String,
    next_console: u64,
    active_consoles: HashSet<String>,
    consoles_created: usize,
    max_active_consoles: usize,
    in_flight: usize,
    max_in_flight: usize,
    next_job: u64,
    sessions: BTreeMap<String, PendingSession>,
    stopped: Vec<String>,
    stop_failures: HashSet<String>,
}

/// In-memory exploitation service.
#[derive(Default)]
pub struct MockService {
    state: Mutex<MockState>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register the modules returned for an exact search query.
    pub fn with_search_results(&self, query: &str, modules: Vec<ModuleInfo>) -> &Self {
        self.state().catalog.insert(query.to_string(), modules);
        self
    }

    /// Full entry returned by `module_info`. Without one, the entry from
    /// the search results is returned.
    pub fn with_module_details(&self, info: ModuleInfo) -> &Self {
        self.state().details.insert(info.fullname.clone(), info);
        self
    }

    pub fn fail_searches(&self, message: &str) -> &Self {
        self.state().search_error = Some(message.to_string());
        self
    }

    /// Compatible payloads for a module. Unlisted modules offer
    /// `generic/shell_reverse_tcp`.
    pub fn with_payloads(&self, module_path: &str, payloads: &[&str]) -> &Self {
        self.state().payloads.insert(
            module_path.to_string(),
            payloads.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    pub fn fail_payload_queries(&self, message: &str) -> &Self {
        self.state().payload_error = Some(message.to_string());
        self
    }

    /// Payload queries never return.
    pub fn hang_payload_queries(&self) -> &Self {
        self.state().payload_hang = true;
        self
    }

    /// Queue execute outcomes for a module. An exhausted queue behaves as
    /// [`MockOutcome::Silent`].
    pub fn script(&self, module_path: &str, outcomes: Vec<MockOutcome>) -> &Self {
        self.state()
            .scripts
            .entry(module_path.to_string())
            .or_default()
            .extend(outcomes);
        self
    }

    /// Add a session that is already live.
    pub fn add_session(&self, session_id: &str, target_host: &str) -> &Self {
        self.state().sessions.insert(
            session_id.to_string(),
            PendingSession {
                info: SessionInfo {
                    session_type: "shell".into(),
                    target_host: target_host.to_string(),
                    ..Default::default()
                },
                visible_at: Instant::now(),
            },
        );
        self
    }

    pub fn fail_stop(&self, session_id: &str) -> &Self {
        self.state().stop_failures.insert(session_id.to_string());
        self
    }

    pub fn searches(&self) -> Vec<String> {
        self.state().searches.clone()
    }

    /// Module paths passed to `module_info`, in call order.
    pub fn info_requests(&self) -> Vec<String> {
        self.state().info_requests.clone()
    }

    pub fn executions(&self) -> Vec<ModuleHandle> {
        self.state().executions.clone()
    }

    pub fn execute_count(&self, module_path: &str) -> usize {
        self.state()
            .executions
            .iter()
            .filter(|m| m.path == module_path)
            .count()
    }

    pub fn active_consoles(&self) -> usize {
        self.state().active_consoles.len()
    }

    pub fn consoles_created(&self) -> usize {
        self.state().consoles_created
    }

    /// Highest number of consoles held at once.
    pub fn max_active_consoles(&self) -> usize {
        self.state().max_active_consoles
    }

    /// Highest number of execute calls in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    pub fn stopped_sessions(&self) -> Vec<String> {
        self.state().stopped.clone()
    }

    fn begin_execute(&self, module: &ModuleHandle) -> MockOutcome {
        let mut state = self.state();
        state.executions.push(module.clone());
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        state
            .scripts
            .get_mut(&module.path)
            .and_then(VecDeque::pop_front)
            .unwrap_or(MockOutcome::Silent)
    }

    fn launch_job(&self, module: &ModuleHandle, outcome: MockOutcome) -> ExecuteResponse {
        let mut state = self.state();
        state.next_job += 1;
        let job_id = state.next_job;
        let uuid = format!("job-{job_id}");
        match outcome {
            MockOutcome::SessionAfter { session_id, delay } => {
                let target_host = module
                    .get("RHOSTS")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                state.sessions.insert(
                    session_id,
                    PendingSession {
                        info: SessionInfo {
                            session_type: "meterpreter".into(),
                            target_host,
                            via_exploit: module.path.clone(),
                            exploit_uuid: uuid.clone(),
                            ..Default::default()
                        },
                        visible_at: Instant::now() + delay,
                    },
                );
            }
            MockOutcome::ConsoleBanner(text) => {
                state.console_output.push_str(&text);
                state.console_output.push('\n');
            }
            _ => {}
        }
        ExecuteResponse::Job {
            job_id,
            uuid: Some(uuid),
        }
    }
}

/// Decrements the in-flight counter however the execute future ends.
struct InFlight<'a>(&'a MockService);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

#[async_trait]
impl ExploitService for MockService {
    async fn search(&self, query: &str) -> Result<Vec<ModuleInfo>, RpcError> {
        let mut state = self.state();
        state.searches.push(query.to_string());
        if let Some(ref message) = state.search_error {
            return Err(RpcError::remote("module.search", message.clone()));
        }
        Ok(state.catalog.get(query).cloned().unwrap_or_default())
    }

    async fn module_info(&self, module_path: &str) -> Result<ModuleInfo, RpcError> {
        let mut state = self.state();
        state.info_requests.push(module_path.to_string());
        if let Some(info) = state.details.get(module_path) {
            return Ok(info.clone());
        }
        state
            .catalog
            .values()
            .flatten()
            .find(|m| m.fullname == module_path)
            .cloned()
            .ok_or_else(|| RpcError::remote("module.info", "Invalid Module"))
    }

    async fn compatible_payloads(&self, module_path: &str) -> Result<Vec<String>, RpcError> {
        {
            let state = self.state();
            if let Some(ref message) = state.payload_error {
                return Err(RpcError::remote("module.compatible_payloads", message.clone()));
            }
            if !state.payload_hang {
                return Ok(state
                    .payloads
                    .get(module_path)
                    .cloned()
                    .unwrap_or_else(|| vec!["generic/shell_reverse_tcp".to_string()]));
            }
        }
        std::future::pending().await
    }

    async fn execute(&self, module: &ModuleHandle) -> Result<ExecuteResponse, RpcError> {
        let mut outcome = self.begin_execute(module);
        let _guard = InFlight(self);

        while let MockOutcome::Delayed(delay, inner) = outcome {
            tokio::time::sleep(delay).await;
            outcome = *inner;
        }

        match outcome {
            MockOutcome::ImmediateSession(session_id) => Ok(ExecuteResponse::Session { session_id }),
            MockOutcome::NoSession(message) => Ok(ExecuteResponse::NoSession { message }),
            MockOutcome::Fail(message) => Err(RpcError::remote("module.execute", message)),
            MockOutcome::Hang => std::future::pending().await,
            other => Ok(self.launch_job(module, other)),
        }
    }

    async fn console_create(&self) -> Result<String, RpcError> {
        let mut state = self.state();
        let id = state.next_console.to_string();
        state.next_console += 1;
        state.consoles_created += 1;
        state.active_consoles.insert(id.clone());
        state.max_active_consoles = state.max_active_consoles.max(state.active_consoles.len());
        Ok(id)
    }

    async fn console_read(&self, console_id: &str) -> Result<String, RpcError> {
        let mut state = self.state();
        if !state.active_consoles.contains(console_id) {
            return Err(RpcError::remote("console.read", "Console does not exist"));
        }
        Ok(std::mem::take(&mut state.console_output))
    }

    async fn console_destroy(&self, console_id: &str) -> Result<(), RpcError> {
        if self.state().active_consoles.remove(console_id) {
            Ok(())
        } else {
            Err(RpcError::remote("console.destroy", "Console does not exist"))
        }
    }

    async fn list_sessions(&self) -> Result<BTreeMap<String, SessionInfo>, RpcError> {
        let now = Instant::now();
        Ok(self
            .state()
            .sessions
            .iter()
            .filter(|(_, s)| s.visible_at <= now)
            .map(|(id, s)| (id.clone(), s.info.clone()))
            .collect())
    }

    async fn stop_session(&self, session_id: &str) -> Result<(), RpcError> {
        let mut state = self.state();
        if state.stop_failures.contains(session_id) {
            return Err(RpcError::remote("session.stop", "Session ID is not valid"));
        }
        state.sessions.remove(session_id);
        state.stopped.push(session_id.to_string());
        Ok(())
    }
}

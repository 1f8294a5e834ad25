use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use exploitmap_types::{ExploitResult, ExploitStatus};
use tracing::{info, warn};

use crate::json::JsonFormatter;
use crate::mask::mask;
use crate::report::{Report, validate_report_path};
use crate::traits::{OutputError, ReportFormatter};

/// Aggregate view of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub success: usize,
    pub failure: usize,
    pub timeout: usize,
    pub error: usize,
    /// Intermediate attempts that were retried.
    pub retried: usize,
    pub total_execution_time: Duration,
    pub average_execution_time: Duration,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total exploits: {}", self.total)?;
        writeln!(
            f,
            "  success: {}  failure: {}  timeout: {}  error: {}  (retries: {})",
            self.success, self.failure, self.timeout, self.error, self.retried
        )?;
        write!(
            f,
            "Execution time: {:.2}s total, {:.2}s average",
            self.total_execution_time.as_secs_f64(),
            self.average_execution_time.as_secs_f64()
        )
    }
}

/// Thread-safe sink for attempt results.
#[derive(Default)]
pub struct ResultCollector {
    results: Mutex<Vec<ExploitResult>>,
    retried: AtomicUsize,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the final result of one configuration.
    pub fn add(&self, result: ExploitResult) {
        info!(
            target_ip = %mask(&result.target_ip),
            port = result.target_port,
            module = %result.module_path,
            status = %result.status,
            attempts = result.attempts,
            message = %mask(&result.message),
            "exploit finished"
        );
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(result);
    }

    /// Note an intermediate attempt that is about to be retried. It is not
    /// part of the result list.
    pub fn record_retry(&self, result: &ExploitResult, attempt: u32) {
        self.retried.fetch_add(1, Ordering::Relaxed);
        warn!(
            target_ip = %mask(&result.target_ip),
            module = %result.module_path,
            attempt,
            status = %result.status,
            message = %mask(&result.message),
            "attempt failed, retrying"
        );
    }

    /// Snapshot of the collected results in insertion order.
    pub fn results(&self) -> Vec<ExploitResult> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summarize(&self) -> Summary {
        let results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        let mut summary = Summary {
            total: results.len(),
            retried: self.retried.load(Ordering::Relaxed),
            ..Default::default()
        };
        for result in results.iter() {
            match result.status {
                ExploitStatus::Success => summary.success += 1,
                ExploitStatus::Failure => summary.failure += 1,
                ExploitStatus::Timeout => summary.timeout += 1,
                ExploitStatus::Error => summary.error += 1,
            }
            summary.total_execution_time += result.execution_time;
        }
        if summary.total > 0 {
            summary.average_execution_time =
                summary.total_execution_time.div_f64(summary.total as f64);
        }
        summary
    }

    /// Build the masked report for the current results.
    pub fn report(&self) -> Report {
        Report::from_results(&self.results(), SystemTime::now())
    }

    /// Write the masked JSON report to `path`, creating parent directories.
    pub fn persist(&self, path: &Path) -> Result<Report, OutputError> {
        validate_report_path(path)?;
        let report = self.report();
        let output = JsonFormatter.format(&report)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, output).map_err(|e| {
            OutputError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to write {}: {}", path.display(), e),
            ))
        })?;

        info!(path = %path.display(), results = report.total_exploits, "report saved");
        Ok(report)
    }
}

use std::path::{Component, Path};
use std::time::SystemTime;

use exploitmap_types::{ExploitResult, ExploitStatus, format_iso8601};
use serde::{Deserialize, Serialize};

use crate::mask::{MASKED_TARGET, mask};
use crate::traits::OutputError;

/// The persisted run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub timestamp: String,
    pub total_exploits: usize,
    pub successful_exploits: usize,
    pub results: Vec<ReportEntry>,
}

/// One result as written to disk: target masked, message scrubbed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub timestamp: String,
    pub target_ip: String,
    pub target_port: u32,
    pub cve: String,
    pub module: String,
    pub status: ExploitStatus,
    pub payload: Option<String>,
    pub message: String,
    pub session_id: Option<String>,
}

impl From<&ExploitResult> for ReportEntry {
    fn from(result: &ExploitResult) -> Self {
        Self {
            timestamp: format_iso8601(result.timestamp),
            target_ip: MASKED_TARGET.to_string(),
            target_port: result.target_port,
            cve: result.cve.clone(),
            module: result.module_path.clone(),
            status: result.status,
            payload: result.payload.clone(),
            message: mask(&result.message),
            session_id: result.session_id.clone(),
        }
    }
}

impl Report {
    pub fn from_results(results: &[ExploitResult], generated_at: SystemTime) -> Self {
        let results: Vec<ReportEntry> = results.iter().map(ReportEntry::from).collect();
        Self {
            timestamp: format_iso8601(generated_at),
            total_exploits: results.len(),
            successful_exploits: results
                .iter()
                .filter(|r| r.status == ExploitStatus::Success)
                .count(),
            results,
        }
    }

    pub fn from_json(content: &str) -> Result<Self, OutputError> {
        serde_json::from_str(content)
            .map_err(|e| OutputError::FormatError(format!("invalid report: {e}")))
    }

    /// Whether the header counts agree with the result entries.
    pub fn counts_match(&self) -> bool {
        let successes = self
            .results
            .iter()
            .filter(|r| r.status == ExploitStatus::Success)
            .count();
        self.total_exploits == self.results.len() && self.successful_exploits == successes
    }
}

pub(crate) fn validate_report_path(path: &Path) -> Result<(), OutputError> {
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(OutputError::UnsafePath(path.to_path_buf()));
    }
    Ok(())
}

use std::path::PathBuf;

use crate::report::Report;

/// Renders a persisted-form report.
pub trait ReportFormatter: Send + Sync {
    fn format(&self, report: &Report) -> Result<String, OutputError>;
}

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("formatting error: {0}")]
    FormatError(String),
    #[error("report path '{}' must not contain '..' components", .0.display())]
    UnsafePath(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

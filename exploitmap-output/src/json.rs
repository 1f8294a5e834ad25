use crate::report::Report;
use crate::traits::{OutputError, ReportFormatter};

/// Pretty-printed JSON, the on-disk report format.
pub struct JsonFormatter;

impl ReportFormatter for JsonFormatter {
    fn format(&self, report: &Report) -> Result<String, OutputError> {
        serde_json::to_string_pretty(report)
            .map_err(|e| OutputError::FormatError(format!("JSON serialization error: {e}")))
    }
}

use std::fmt::Write as _;

use exploitmap_types::ExploitStatus;

use crate::report::Report;
use crate::traits::{OutputError, ReportFormatter};

/// Strip terminal control characters from service-provided text.
fn sanitize_terminal(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_control() && c != '\t' { ' ' } else { c })
        .collect()
}

/// Human-readable result table for the terminal.
pub struct TextFormatter;

impl ReportFormatter for TextFormatter {
    fn format(&self, report: &Report) -> Result<String, OutputError> {
        let mut output = String::new();
        let fmt_err = |e: std::fmt::Error| OutputError::FormatError(e.to_string());

        writeln!(output, "Exploit report {}", report.timestamp).map_err(fmt_err)?;
        if report.results.is_empty() {
            output.push_str("No exploits were attempted.\n");
            return Ok(output);
        }

        writeln!(output, "{:<6} {:<9} {:<16} {:<8} MODULE", "PORT", "STATUS", "CVE", "SESSION")
            .map_err(fmt_err)?;
        for entry in &report.results {
            writeln!(
                output,
                "{:<6} {:<9} {:<16} {:<8} {}",
                entry.target_port,
                entry.status.to_string(),
                entry.cve,
                entry.session_id.as_deref().unwrap_or("-"),
                entry.module,
            )
            .map_err(fmt_err)?;
            if entry.status != ExploitStatus::Success && !entry.message.is_empty() {
                writeln!(output, "       {}", sanitize_terminal(&entry.message)).map_err(fmt_err)?;
            }
        }

        writeln!(
            output,
            "\n{} of {} exploits opened a session",
            report.successful_exploits, report.total_exploits
        )
        .map_err(fmt_err)?;
        Ok(output)
    }
}

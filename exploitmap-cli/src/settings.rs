use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use exploitmap_types::OrchestratorConfig;

use crate::args::Args;

/// Settings file read when `--config` is not given.
pub const DEFAULT_SETTINGS_FILE: &str = "exploitmap.toml";

/// Load settings from `path`, or from [`DEFAULT_SETTINGS_FILE`] when it
/// exists. An absent default file yields empty settings; startup validation
/// then names the missing keys.
pub fn load_settings(path: Option<&Path>) -> Result<OrchestratorConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_SETTINGS_FILE);
            if !default.exists() {
                return Ok(OrchestratorConfig::default());
            }
            default
        }
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read settings '{}'", path.display()))?;
    OrchestratorConfig::from_toml_str(&content)
        .with_context(|| format!("failed to parse settings '{}'", path.display()))
}

/// Command-line flags win over file values.
pub fn apply_args(config: &mut OrchestratorConfig, args: &Args) {
    if let Some(n) = args.max_workers {
        config.max_workers = Some(usize::try_from(n).unwrap_or(usize::MAX));
    }
    if let Some(secs) = args.timeout {
        config.default_timeout = Some(secs);
    }
    if let Some(retries) = args.retries {
        config.retry_count = Some(retries);
    }
    if let Some(ref output) = args.output {
        config.report_path = Some(output.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn loads_explicit_file() {
        let path = std::env::temp_dir().join("exploitmap_cli_settings.toml");
        std::fs::write(
            &path,
            r#"
msf_host = "127.0.0.1"
msf_port = 8081
msf_password = "changeme"
lhost = "10.0.0.1"
lport = 4444
max_workers = 3
"#,
        )
        .unwrap();

        let config = load_settings(Some(&path)).unwrap();
        assert_eq!(config.msf_port, Some(8081));
        assert_eq!(config.max_workers(), 3);
        assert!(config.check().is_ok());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let path = std::env::temp_dir().join("exploitmap_cli_no_such_settings.toml");
        let _ = std::fs::remove_file(&path);
        assert!(load_settings(Some(&path)).is_err());
    }

    #[test]
    fn flags_override_file_values() {
        let mut config = OrchestratorConfig {
            max_workers: Some(5),
            default_timeout: Some(30),
            ..Default::default()
        };
        let args = Args::try_parse_from([
            "exploitmap",
            "scan.json",
            "--max-workers",
            "2",
            "--timeout",
            "90",
            "-o",
            "out/run.json",
        ])
        .unwrap();
        apply_args(&mut config, &args);
        assert_eq!(config.max_workers(), 2);
        assert_eq!(config.default_timeout().as_secs(), 90);
        assert_eq!(config.report_path(), PathBuf::from("out/run.json"));
        assert_eq!(config.retry_count(), 3);
    }
}

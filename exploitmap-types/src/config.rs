// ---------------------------------------------------------------------------
// Orchestrator configuration
// ---------------------------------------------------------------------------
//
// Every field is optional on disk so partial files and CLI overrides can be
// merged; `None` means "use the default" for tunables and "missing" for the
// host, password and listener keys, which are required.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::exploit::{DEFAULT_RETRY_COUNT, Rank};

pub const DEFAULT_MSF_USER: &str = "msf";
/// `msfrpcd -j` JSON-RPC listener. 55553 is the MessagePack listener, which
/// this client does not speak.
pub const DEFAULT_MSF_PORT: u16 = 8081;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_MAX_WORKERS: usize = 5;
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 1.0;
pub const DEFAULT_MAX_POLLS: u32 = 10;
pub const DEFAULT_PAYLOAD: &str = "generic/shell_reverse_tcp";
pub const DEFAULT_REPORT_PATH: &str = "exploit_results.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration field: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Settings recognized by the orchestrator, as loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    // --- Exploitation service ---
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msf_host: Option<String>,
    /// JSON-RPC port, [`DEFAULT_MSF_PORT`] when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msf_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msf_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msf_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msf_ssl: Option<bool>,

    // --- Listener ---
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lhost: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lport: Option<u16>,

    // --- Scheduling (seconds) ---
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_polls: Option<u32>,

    // --- Matching / output ---
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_rank: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
}

/// Connection parameters for the exploitation service.
#[derive(Clone)]
pub struct RpcSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub ssl: bool,
}

impl std::fmt::Debug for RpcSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"*****")
            .field("ssl", &self.ssl)
            .finish()
    }
}

/// Listener address handed to every module as LHOST/LPORT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSettings {
    pub lhost: String,
    pub lport: u16,
}

impl OrchestratorConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Fail fast on any missing required key or out-of-range tunable.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.rpc_settings()?;
        self.listener()?;
        if self.max_workers == Some(0) {
            return Err(ConfigError::Invalid {
                key: "max_workers",
                reason: "must be at least 1".into(),
            });
        }
        if self.default_timeout == Some(0) {
            return Err(ConfigError::Invalid {
                key: "default_timeout",
                reason: "must be positive".into(),
            });
        }
        for (key, value) in [
            ("retry_backoff", self.retry_backoff),
            ("poll_interval", self.poll_interval),
        ] {
            if let Some(v) = value
                && (!v.is_finite() || v < 0.0)
            {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("{v} is not a non-negative number of seconds"),
                });
            }
        }
        Ok(())
    }

    pub fn rpc_settings(&self) -> Result<RpcSettings, ConfigError> {
        Ok(RpcSettings {
            host: required(&self.msf_host, "msf_host")?,
            port: self.msf_port.unwrap_or(DEFAULT_MSF_PORT),
            user: self
                .msf_user
                .clone()
                .unwrap_or_else(|| DEFAULT_MSF_USER.to_string()),
            password: required(&self.msf_password, "msf_password")?,
            ssl: self.msf_ssl.unwrap_or(true),
        })
    }

    pub fn listener(&self) -> Result<ListenerSettings, ConfigError> {
        Ok(ListenerSettings {
            lhost: required(&self.lhost, "lhost")?,
            lport: self.lport.ok_or(ConfigError::Missing("lport"))?,
        })
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS))
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers.unwrap_or(DEFAULT_MAX_WORKERS).max(1)
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.unwrap_or(DEFAULT_RETRY_COUNT)
    }

    pub fn retry_backoff(&self) -> Duration {
        secs_f64(self.retry_backoff, 0.0)
    }

    pub fn poll_interval(&self) -> Duration {
        secs_f64(self.poll_interval, DEFAULT_POLL_INTERVAL_SECS)
    }

    pub fn max_polls(&self) -> u32 {
        self.max_polls.unwrap_or(DEFAULT_MAX_POLLS)
    }

    pub fn default_payload(&self) -> String {
        self.default_payload
            .clone()
            .unwrap_or_else(|| DEFAULT_PAYLOAD.to_string())
    }

    pub fn min_rank(&self) -> Rank {
        self.min_rank
            .as_deref()
            .map(Rank::from_str_loose)
            .unwrap_or(Rank::Good)
    }

    pub fn report_path(&self) -> PathBuf {
        self.report_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_PATH))
    }
}

fn required(value: &Option<String>, key: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.clone()),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn secs_f64(value: Option<f64>, default: f64) -> Duration {
    let secs = value.unwrap_or(default);
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
msf_host = "127.0.0.1"
msf_port = 8081
msf_password = "s3cret"
lhost = "192.168.56.1"
lport = 4444
max_workers = 2
retry_backoff = 0.5
"#;

    #[test]
    fn parses_full_config() {
        let config = OrchestratorConfig::from_toml_str(FULL).unwrap();
        config.check().unwrap();
        let rpc = config.rpc_settings().unwrap();
        assert_eq!(rpc.port, 8081);
        assert_eq!(rpc.user, "msf");
        assert!(rpc.ssl);
        assert_eq!(config.max_workers(), 2);
        assert_eq!(config.retry_backoff(), Duration::from_millis(500));
    }

    #[test]
    fn defaults_apply() {
        let config = OrchestratorConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.session_timeout(), Duration::from_secs(3600));
        assert_eq!(config.retry_count(), 3);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.max_polls(), 10);
        assert_eq!(config.min_rank(), Rank::Good);
        assert_eq!(config.default_payload(), "generic/shell_reverse_tcp");
        assert_eq!(config.report_path(), PathBuf::from("exploit_results.json"));
    }

    #[test]
    fn missing_required_field_is_reported() {
        let config = OrchestratorConfig::from_toml_str("msf_host = \"127.0.0.1\"").unwrap();
        let err = config.check().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("msf_password")));
        assert_eq!(err.to_string(), "missing required configuration field: msf_password");
    }

    #[test]
    fn port_defaults_to_json_rpc_listener() {
        let config = OrchestratorConfig::from_toml_str(
            "msf_host = \"127.0.0.1\"\nmsf_password = \"s3cret\"",
        )
        .unwrap();
        assert_eq!(config.rpc_settings().unwrap().port, 8081);
        assert_eq!(DEFAULT_MSF_PORT, 8081);
    }

    #[test]
    fn blank_password_counts_as_missing() {
        let mut config = OrchestratorConfig::from_toml_str(FULL).unwrap();
        config.msf_password = Some("   ".into());
        assert!(matches!(config.check(), Err(ConfigError::Missing("msf_password"))));
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = OrchestratorConfig::from_toml_str(FULL).unwrap();
        config.max_workers = Some(0);
        assert!(matches!(
            config.check(),
            Err(ConfigError::Invalid { key: "max_workers", .. })
        ));
    }

    #[test]
    fn negative_backoff_rejected() {
        let mut config = OrchestratorConfig::from_toml_str(FULL).unwrap();
        config.retry_backoff = Some(-1.0);
        assert!(config.check().is_err());
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = OrchestratorConfig::from_toml_str("msf_port = \"not a number\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn debug_hides_password() {
        let config = OrchestratorConfig::from_toml_str(FULL).unwrap();
        let rendered = format!("{:?}", config.rpc_settings().unwrap());
        assert!(!rendered.contains("s3cret"));
    }
}

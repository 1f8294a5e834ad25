use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime};

/// Retries granted to a configuration when none is specified.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Module options owned by the orchestrator; user options never override these.
pub const RESERVED_OPTIONS: &[&str] = &["RHOSTS", "RPORT", "LHOST", "LPORT"];

/// Exploit quality grade reported by the module catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Manual = 0,
    Low = 1,
    Average = 2,
    Normal = 3,
    Good = 4,
    Great = 5,
    Excellent = 6,
}

impl Rank {
    /// Parse a catalog rank: a name ("excellent") or a Metasploit numeric
    /// rank ("600"). Unknown values rank as `Manual`.
    pub fn from_str_loose(s: &str) -> Self {
        let s = s.trim();
        if let Ok(n) = s.parse::<u32>() {
            return Self::from_numeric(n);
        }
        match s.to_ascii_lowercase().as_str() {
            "excellent" => Self::Excellent,
            "great" => Self::Great,
            "good" => Self::Good,
            "normal" => Self::Normal,
            "average" => Self::Average,
            "low" => Self::Low,
            _ => Self::Manual,
        }
    }

    /// Metasploit encodes ranks as multiples of 100 (manual=0 .. excellent=600).
    pub fn from_numeric(n: u32) -> Self {
        match n {
            600..=u32::MAX => Self::Excellent,
            500..=599 => Self::Great,
            400..=499 => Self::Good,
            300..=399 => Self::Normal,
            200..=299 => Self::Average,
            100..=199 => Self::Low,
            _ => Self::Manual,
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Low => write!(f, "low"),
            Self::Average => write!(f, "average"),
            Self::Normal => write!(f, "normal"),
            Self::Good => write!(f, "good"),
            Self::Great => write!(f, "great"),
            Self::Excellent => write!(f, "excellent"),
        }
    }
}

/// A catalog module considered for a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExploitCandidate {
    pub module_path: String,
    pub rank: Rank,
    pub platform: String,
    pub description: String,
    pub references: Vec<String>,
}

/// Invariant violations of an [`ExploitConfiguration`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("target ip '{0}' is not a dotted-quad IPv4 address")]
    InvalidTargetIp(String),
    #[error("target port {0} is outside 1-65535")]
    InvalidTargetPort(u32),
    #[error("module path is empty")]
    EmptyModulePath,
    #[error("cve is empty")]
    EmptyCve,
}

/// Everything needed to attempt one module against one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExploitConfiguration {
    pub target_ip: String,
    pub target_port: u32,
    pub module_path: String,
    pub cve: String,
    /// Module platform from the catalog, used for payload preference.
    #[serde(default)]
    pub platform: Option<String>,
    /// Extra module options. Reserved target/listener keys are ignored.
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
    /// Per-attempt deadline; `None` uses the scheduler default.
    #[serde(default)]
    pub timeout: Option<Duration>,
    pub retry_count: u32,
}

impl ExploitConfiguration {
    pub fn new(
        target_ip: impl Into<String>,
        target_port: u32,
        module_path: impl Into<String>,
        cve: impl Into<String>,
    ) -> Self {
        Self {
            target_ip: target_ip.into(),
            target_port,
            module_path: module_path.into(),
            cve: cve.into(),
            platform: None,
            options: BTreeMap::new(),
            timeout: None,
            retry_count: DEFAULT_RETRY_COUNT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Check the configuration invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.target_ip.parse::<Ipv4Addr>().is_err() {
            return Err(ValidationError::InvalidTargetIp(self.target_ip.clone()));
        }
        if !(1..=65535).contains(&self.target_port) {
            return Err(ValidationError::InvalidTargetPort(self.target_port));
        }
        if self.module_path.trim().is_empty() {
            return Err(ValidationError::EmptyModulePath);
        }
        if self.cve.trim().is_empty() {
            return Err(ValidationError::EmptyCve);
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Extra options with reserved keys removed (case-insensitive).
    pub fn user_options(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.options
            .iter()
            .filter(|(k, _)| !RESERVED_OPTIONS.iter().any(|r| r.eq_ignore_ascii_case(k)))
    }

    /// Payload explicitly requested through the `PAYLOAD` option.
    pub fn requested_payload(&self) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("PAYLOAD"))
            .and_then(|(_, v)| v.as_str())
            .filter(|p| !p.is_empty())
    }
}

/// Terminal state of an exploit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExploitStatus {
    Success,
    Failure,
    Timeout,
    Error,
}

impl ExploitStatus {
    /// FAILURE and ERROR are worth another try; TIMEOUT and SUCCESS are final.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Failure | Self::Error)
    }
}

impl fmt::Display for ExploitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Timeout => write!(f, "timeout"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Outcome of one configuration after its final attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExploitResult {
    pub target_ip: String,
    pub target_port: u32,
    pub cve: String,
    pub module_path: String,
    #[serde(default)]
    pub payload: Option<String>,
    pub status: ExploitStatus,
    pub message: String,
    pub timestamp: SystemTime,
    pub execution_time: Duration,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Number of attempts made, including the final one.
    pub attempts: u32,
}

impl ExploitResult {
    /// Start a result for `config`; the caller fills in the outcome.
    pub fn for_config(
        config: &ExploitConfiguration,
        status: ExploitStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target_ip: config.target_ip.clone(),
            target_port: config.target_port,
            cve: config.cve.clone(),
            module_path: config.module_path.clone(),
            payload: None,
            status,
            message: message.into(),
            timestamp: SystemTime::now(),
            execution_time: Duration::ZERO,
            session_id: None,
            attempts: 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExploitStatus::Success
    }
}

/// A live remote session opened by a successful attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: SystemTime,
    pub module_path: String,
    pub target_ip: String,
}

impl Session {
    /// Age of the session at `now`; zero if `now` precedes creation.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.created_at).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ExploitConfiguration {
        ExploitConfiguration::new(
            "10.0.0.5",
            445,
            "exploit/windows/smb/ms17_010_eternalblue",
            "CVE-2017-0144",
        )
    }

    #[test]
    fn validate_accepts_well_formed_config() {
        assert_eq!(valid().validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_bad_ips() {
        for ip in ["", "10.0.0", "10.0.0.256", "host.local", "::1", "10.0.0.5 "] {
            let mut c = valid();
            c.target_ip = ip.into();
            assert!(
                matches!(c.validate(), Err(ValidationError::InvalidTargetIp(_))),
                "expected {ip:?} to be rejected"
            );
        }
    }

    #[test]
    fn validate_port_bounds() {
        for (port, ok) in [(0, false), (1, true), (65535, true), (65536, false)] {
            let mut c = valid();
            c.target_port = port;
            assert_eq!(c.is_valid(), ok, "port {port}");
        }
    }

    #[test]
    fn validate_rejects_empty_module_and_cve() {
        let mut c = valid();
        c.module_path = String::new();
        assert_eq!(c.validate(), Err(ValidationError::EmptyModulePath));

        let mut c = valid();
        c.cve = "  ".into();
        assert_eq!(c.validate(), Err(ValidationError::EmptyCve));
    }

    #[test]
    fn user_options_skip_reserved_keys() {
        let c = valid()
            .with_option("rhosts", serde_json::json!("1.2.3.4"))
            .with_option("LPORT", serde_json::json!(1))
            .with_option("SMBUser", serde_json::json!("guest"));
        let keys: Vec<_> = c.user_options().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["SMBUser"]);
    }

    #[test]
    fn requested_payload_reads_option() {
        let c = valid().with_option("PAYLOAD", serde_json::json!("windows/x64/shell_reverse_tcp"));
        assert_eq!(c.requested_payload(), Some("windows/x64/shell_reverse_tcp"));
        assert_eq!(valid().requested_payload(), None);
    }

    #[test]
    fn rank_parsing() {
        assert_eq!(Rank::from_str_loose("Excellent"), Rank::Excellent);
        assert_eq!(Rank::from_str_loose("good"), Rank::Good);
        assert_eq!(Rank::from_str_loose("600"), Rank::Excellent);
        assert_eq!(Rank::from_str_loose("300"), Rank::Normal);
        assert_eq!(Rank::from_str_loose("bogus"), Rank::Manual);
        assert!(Rank::Great > Rank::Good);
        assert!(Rank::Normal < Rank::Good);
    }

    #[test]
    fn retryable_statuses() {
        assert!(ExploitStatus::Failure.is_retryable());
        assert!(ExploitStatus::Error.is_retryable());
        assert!(!ExploitStatus::Timeout.is_retryable());
        assert!(!ExploitStatus::Success.is_retryable());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ExploitStatus::Timeout).unwrap(), "\"timeout\"");
    }

    #[test]
    fn session_age_saturates() {
        let now = SystemTime::now();
        let session = Session {
            session_id: "1".into(),
            created_at: now + Duration::from_secs(5),
            module_path: "exploit/x".into(),
            target_ip: "10.0.0.1".into(),
        };
        assert_eq!(session.age(now), Duration::ZERO);
        assert_eq!(session.age(now + Duration::from_secs(10)), Duration::from_secs(5));
    }
}

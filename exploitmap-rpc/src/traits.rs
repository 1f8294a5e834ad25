use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RpcError;

/// A catalog entry returned by a module search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub fullname: String,
    /// Module type ("exploit", "auxiliary", ...); empty when the catalog omits it.
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Rank name or Metasploit numeric rank, as reported.
    #[serde(default)]
    pub rank: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub references: Vec<String>,
}

/// A module selected for execution together with its datastore options.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleHandle {
    pub kind: String,
    pub path: String,
    options: BTreeMap<String, serde_json::Value>,
}

impl ModuleHandle {
    pub fn new(kind: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            path: path.into(),
            options: BTreeMap::new(),
        }
    }

    /// Set a datastore option. Only scalar values are accepted.
    pub fn set(&mut self, key: &str, value: serde_json::Value) -> Result<(), RpcError> {
        if key.trim().is_empty() {
            return Err(RpcError::InvalidOption {
                key: key.to_string(),
                reason: "empty option name".into(),
            });
        }
        if value.is_object() || value.is_array() || value.is_null() {
            return Err(RpcError::InvalidOption {
                key: key.to_string(),
                reason: format!("unsupported value {value}"),
            });
        }
        self.options.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.options.get(key)
    }

    pub fn options(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.options
    }
}

/// What the service answered to an execute request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteResponse {
    /// Module launched as a background job.
    Job { job_id: u64, uuid: Option<String> },
    /// Module ran synchronously and opened a session.
    Session { session_id: String },
    /// Module ran and reported that no session was created.
    NoSession { message: String },
}

/// Service-side metadata of a live session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(default, rename = "type")]
    pub session_type: String,
    #[serde(default)]
    pub target_host: String,
    #[serde(default)]
    pub session_host: String,
    #[serde(default)]
    pub via_exploit: String,
    #[serde(default)]
    pub exploit_uuid: String,
}

impl SessionInfo {
    /// Whether this session plausibly belongs to an attempt: the exploit uuid
    /// decides when both sides know it, otherwise the target host does, and a
    /// session carrying neither is accepted.
    pub fn belongs_to(&self, uuid: Option<&str>, target_ip: &str) -> bool {
        if let Some(uuid) = uuid
            && !self.exploit_uuid.is_empty()
        {
            return self.exploit_uuid == uuid;
        }
        let host = if self.target_host.is_empty() {
            &self.session_host
        } else {
            &self.target_host
        };
        host.is_empty() || host == target_ip
    }
}

/// The remote exploitation service: module catalog, execution, consoles and
/// sessions.
#[async_trait]
pub trait ExploitService: Send + Sync {
    /// Catalog summaries matching `query`. Platform, references and rank
    /// may be blank; [`module_info`](Self::module_info) fills them.
    async fn search(&self, query: &str) -> Result<Vec<ModuleInfo>, RpcError>;

    /// Full catalog entry for one module path.
    async fn module_info(&self, module_path: &str) -> Result<ModuleInfo, RpcError>;

    async fn compatible_payloads(&self, module_path: &str) -> Result<Vec<String>, RpcError>;

    async fn execute(&self, module: &ModuleHandle) -> Result<ExecuteResponse, RpcError>;

    async fn console_create(&self) -> Result<String, RpcError>;

    async fn console_read(&self, console_id: &str) -> Result<String, RpcError>;

    async fn console_destroy(&self, console_id: &str) -> Result<(), RpcError>;

    async fn list_sessions(&self) -> Result<BTreeMap<String, SessionInfo>, RpcError>;

    async fn stop_session(&self, session_id: &str) -> Result<(), RpcError>;
}

//! Metasploit JSON-RPC client.
//!
//! Talks to the `msfrpcd` JSON-RPC endpoint (`/api/v1/json-rpc`). A session
//! token is obtained once with `auth.login` and sent as a bearer token on
//! every later call.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use exploitmap_types::RpcSettings;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::RpcError;
use crate::traits::{ExecuteResponse, ExploitService, ModuleHandle, ModuleInfo, SessionInfo};

const RPC_PATH: &str = "/api/v1/json-rpc";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// HTTP client for a Metasploit RPC daemon.
pub struct MsfRpcClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    next_id: AtomicU64,
}

impl MsfRpcClient {
    /// Connect, authenticate and verify the service answers.
    ///
    /// Any failure here is a startup failure: the caller cannot do anything
    /// useful without the service.
    pub async fn connect(settings: &RpcSettings) -> Result<Self, RpcError> {
        let scheme = if settings.ssl { "https" } else { "http" };
        // msfrpcd ships a self-signed certificate by default.
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(settings.ssl)
            .user_agent("exploitmap/0.1")
            .build()
            .map_err(|e| RpcError::Connection(format!("failed to create HTTP client: {e}")))?;

        let mut client = Self {
            http,
            endpoint: format!("{scheme}://{}:{}{RPC_PATH}", settings.host, settings.port),
            token: String::new(),
            next_id: AtomicU64::new(1),
        };

        let login = client
            .call("auth.login", json!([settings.user, settings.password]))
            .await
            .map_err(|e| match e {
                RpcError::Remote { message, .. } => RpcError::Auth(message),
                other => other,
            })?;
        client.token = login
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Auth("login response carried no token".into()))?
            .to_string();

        let version = client.call("core.version", json!([])).await?;
        info!(
            version = version.get("version").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            "connected to exploitation service"
        );
        Ok(client)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = request_body(method, params, id);
        debug!(method, id, "rpc call");

        let mut request = self.http.post(&self.endpoint).json(&body);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                RpcError::Connection(e.to_string())
            } else {
                RpcError::Http(e)
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(RpcError::Auth(format!("{method}: {status}")));
        }
        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|e| RpcError::decode(method, e.to_string()))?;
        unwrap_envelope(method, envelope)
    }
}

fn request_body(method: &str, params: Value, id: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": id,
    })
}

fn unwrap_envelope(method: &str, envelope: RpcEnvelope) -> Result<Value, RpcError> {
    if let Some(fault) = envelope.error {
        let detail = fault
            .data
            .as_ref()
            .and_then(|d| d.get("error_message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(fault.message);
        return Err(RpcError::remote(method, detail));
    }
    let result = envelope
        .result
        .ok_or_else(|| RpcError::decode(method, "neither result nor error present"))?;
    // Legacy msgrpc-style failures arrive as a successful envelope.
    if result.get("error").and_then(Value::as_bool) == Some(true) {
        let message = result
            .get("error_message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(RpcError::remote(method, message));
    }
    Ok(result)
}

fn string_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(","),
        _ => String::new(),
    }
}

/// Flatten Metasploit reference lists (`[["CVE", "2017-0144"], ["URL", ...]]`)
/// into strings like `CVE-2017-0144`.
fn references(value: &Value) -> Vec<String> {
    let Some(items) = value.get("references").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Array(pair) => match (pair.first(), pair.get(1)) {
                (Some(Value::String(kind)), Some(Value::String(id))) if kind == "CVE" => {
                    Some(format!("CVE-{id}"))
                }
                (Some(Value::String(kind)), Some(Value::String(id))) => {
                    Some(format!("{kind}-{id}"))
                }
                _ => None,
            },
            _ => None,
        })
        .collect()
}

fn decode_module(value: &Value) -> ModuleInfo {
    ModuleInfo {
        fullname: string_field(value, "fullname"),
        kind: string_field(value, "type"),
        rank: string_field(value, "rank"),
        platform: string_field(value, "platform"),
        description: string_field(value, "description"),
        references: references(value),
    }
}

fn decode_search(result: &Value) -> Result<Vec<ModuleInfo>, RpcError> {
    let items = result
        .as_array()
        .ok_or_else(|| RpcError::decode("module.search", "expected an array"))?;
    Ok(items
        .iter()
        .map(decode_module)
        .filter(|m| !m.fullname.is_empty())
        .collect())
}

fn decode_execute(result: &Value) -> ExecuteResponse {
    if let Some(session) = result.get("session").or_else(|| result.get("session_id")) {
        let id = match session {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !id.is_empty() && id != "null" {
            return ExecuteResponse::Session { session_id: id };
        }
    }
    match result.get("job_id").and_then(Value::as_u64) {
        Some(job_id) => ExecuteResponse::Job {
            job_id,
            uuid: result.get("uuid").and_then(Value::as_str).map(str::to_string),
        },
        None => ExecuteResponse::NoSession {
            message: result
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("module completed without a job or session")
                .to_string(),
        },
    }
}

fn decode_sessions(result: &Value) -> Result<BTreeMap<String, SessionInfo>, RpcError> {
    let map = result
        .as_object()
        .ok_or_else(|| RpcError::decode("session.list", "expected an object"))?;
    Ok(map
        .iter()
        .map(|(id, info)| {
            let info = SessionInfo {
                session_type: string_field(info, "type"),
                target_host: string_field(info, "target_host"),
                session_host: string_field(info, "session_host"),
                via_exploit: string_field(info, "via_exploit"),
                exploit_uuid: string_field(info, "exploit_uuid"),
            };
            (id.clone(), info)
        })
        .collect())
}

#[async_trait]
impl ExploitService for MsfRpcClient {
    async fn search(&self, query: &str) -> Result<Vec<ModuleInfo>, RpcError> {
        let result = self.call("module.search", json!([query])).await?;
        decode_search(&result)
    }

    async fn module_info(&self, module_path: &str) -> Result<ModuleInfo, RpcError> {
        let (kind, name) = module_path.split_once('/').unwrap_or(("exploit", module_path));
        let result = self.call("module.info", json!([kind, name])).await?;
        let mut info = decode_module(&result);
        if info.fullname.is_empty() {
            info.fullname = module_path.to_string();
        }
        if info.kind.is_empty() {
            info.kind = kind.to_string();
        }
        Ok(info)
    }

    async fn compatible_payloads(&self, module_path: &str) -> Result<Vec<String>, RpcError> {
        let name = module_path.strip_prefix("exploit/").unwrap_or(module_path);
        let result = self
            .call("module.compatible_payloads", json!([name]))
            .await?;
        let payloads = result
            .get("payloads")
            .and_then(Value::as_array)
            .ok_or_else(|| RpcError::decode("module.compatible_payloads", "missing payloads"))?;
        Ok(payloads
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }

    async fn execute(&self, module: &ModuleHandle) -> Result<ExecuteResponse, RpcError> {
        let prefix = format!("{}/", module.kind);
        let name = module.path.strip_prefix(&prefix).unwrap_or(&module.path);
        let result = self
            .call(
                "module.execute",
                json!([module.kind, name, module.options()]),
            )
            .await?;
        Ok(decode_execute(&result))
    }

    async fn console_create(&self) -> Result<String, RpcError> {
        let result = self.call("console.create", json!([])).await?;
        let id = string_field(&result, "id");
        if id.is_empty() {
            return Err(RpcError::decode("console.create", "missing console id"));
        }
        Ok(id)
    }

    async fn console_read(&self, console_id: &str) -> Result<String, RpcError> {
        let result = self.call("console.read", json!([console_id])).await?;
        Ok(string_field(&result, "data"))
    }

    async fn console_destroy(&self, console_id: &str) -> Result<(), RpcError> {
        self.call("console.destroy", json!([console_id])).await?;
        Ok(())
    }

    async fn list_sessions(&self) -> Result<BTreeMap<String, SessionInfo>, RpcError> {
        let result = self.call("session.list", json!([])).await?;
        decode_sessions(&result)
    }

    async fn stop_session(&self, session_id: &str) -> Result<(), RpcError> {
        self.call("session.stop", json!([session_id])).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scan document shape
// ---------------------------------------------------------------------------
//
// The subset of a JSON scan result (host -> port -> script tree) needed to
// derive findings. Every field the parser does not use is ignored, so full
// scanner output deserializes as-is.

use crate::script::ScriptResult;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Top-level scan document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanDocument {
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

/// One scanned host with its ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    pub host: HostAddr,
    #[serde(default)]
    pub ports: Vec<PortEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostAddr {
    pub ip: IpAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// A single port of a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortEntry {
    pub number: u16,
    /// Transport protocol ("tcp", "Tcp", "udp", ...). Absent means TCP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Port state ("open", "closed", "filtered", ...). Absent means open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Service name from the port map (e.g. "microsoft-ds").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Version detection output, when version detection ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_info: Option<ServiceInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub script_results: Vec<ScriptResult>,
}

/// Service/version detection info for an open port.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl PortEntry {
    /// Whether the port is an open TCP port, the only kind exploits are
    /// launched against.
    pub fn is_open_tcp(&self) -> bool {
        let open = self
            .state
            .as_deref()
            .is_none_or(|s| s.trim().eq_ignore_ascii_case("open"));
        let tcp = self
            .protocol
            .as_deref()
            .is_none_or(|p| p.trim().eq_ignore_ascii_case("tcp"));
        open && tcp
    }

    /// Service name, preferring the detected one over the port-map guess.
    pub fn service_name(&self) -> Option<&str> {
        self.service_info
            .as_ref()
            .map(|info| info.name.as_str())
            .filter(|name| !name.is_empty())
            .or(self.service.as_deref())
    }

    pub fn product(&self) -> Option<&str> {
        self.service_info
            .as_ref()
            .and_then(|info| info.product.as_deref())
            .filter(|p| !p.trim().is_empty())
    }

    pub fn version(&self) -> Option<&str> {
        self.service_info
            .as_ref()
            .and_then(|info| info.version.as_deref())
            .filter(|v| !v.trim().is_empty())
    }
}

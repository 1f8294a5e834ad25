pub mod config;
pub mod exploit;
pub mod finding;
pub mod scan;
pub mod script;
pub mod time;

pub use config::{
    ConfigError, DEFAULT_MSF_PORT, DEFAULT_PAYLOAD, ListenerSettings, OrchestratorConfig, RpcSettings,
};
pub use exploit::{
    ExploitCandidate, ExploitConfiguration, ExploitResult, ExploitStatus, Rank, Session,
    ValidationError, DEFAULT_RETRY_COUNT, RESERVED_OPTIONS,
};
pub use finding::ScanFinding;
pub use scan::{HostAddr, HostEntry, PortEntry, ScanDocument, ServiceInfo};
pub use script::{ScriptResult, ScriptTable, ScriptValue};
pub use time::format_iso8601;

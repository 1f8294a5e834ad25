use exploitmap_output::OutputError;
use exploitmap_rpc::RpcError;
use exploitmap_types::ConfigError;
use exploitmap_vuln::ParseError;
use thiserror::Error;

/// Failures that abort a whole run. Everything that goes wrong inside a
/// single attempt is reported as result data instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("cannot reach the exploitation service: {0}")]
    Connection(#[source] RpcError),
    #[error("scan document error: {0}")]
    Parse(#[from] ParseError),
    #[error("report error: {0}")]
    Output(#[from] OutputError),
}

/// Why one attempt ended in ERROR.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("no usable payload for {module}")]
    Payload { module: String },
    #[error("exploit call failed: {0}")]
    Exploit(#[from] RpcError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_cause() {
        let err = EngineError::from(ConfigError::Missing("msf_password"));
        assert!(err.to_string().contains("msf_password"));

        let err = AttemptError::Payload {
            module: "exploit/multi/http/struts2_content_type_ognl".into(),
        };
        assert_eq!(
            err.to_string(),
            "no usable payload for exploit/multi/http/struts2_content_type_ognl"
        );

        let err = AttemptError::from(RpcError::remote("module.execute", "Invalid Module"));
        assert!(err.to_string().starts_with("exploit call failed"));
    }
}

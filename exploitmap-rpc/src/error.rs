#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("cannot reach exploitation service: {0}")]
    Connection(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("{method} failed: {message}")]
    Remote { method: String, message: String },
    #[error("malformed {method} response: {reason}")]
    Decode { method: String, reason: String },
    #[error("invalid option {key}: {reason}")]
    InvalidOption { key: String, reason: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RpcError {
    pub fn remote(method: &str, message: impl Into<String>) -> Self {
        Self::Remote {
            method: method.to_string(),
            message: message.into(),
        }
    }

    pub fn decode(method: &str, reason: impl Into<String>) -> Self {
        Self::Decode {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

/// Shared error type used across all Torbo crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Permanent upstream failure (4xx other than 429); forwarded to the
    /// client with the upstream status and a sanitized message.
    #[error("upstream {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("auth: {0}")]
    Auth(String),

    #[error("config: {0}")]
    Config(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("invalid agent id: {0}")]
    InvalidAgentId(String),

    #[error("agent already exists: {0}")]
    AgentExists(String),

    #[error("built-in agent is protected: {0}")]
    BuiltInProtected(String),

    #[error("token budget exceeded for {window} window: {used}/{limit}")]
    BudgetExceeded {
        window: String,
        used: u64,
        limit: u64,
    },

    #[error("embedding dimensionality mismatch: index={expected}, got {got}")]
    EmbeddingDim { expected: usize, got: usize },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

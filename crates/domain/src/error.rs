use serde_json::Value;

/// Shared error type used across every gridloom crate.
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

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("schema: {0}")]
    Schema(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("output did not match the agent's output schema")]
    OutputParse(OutputParseError),

    #[error("runnable shape changed since this session was persisted")]
    StructureChanged {
        stored_fingerprint: String,
        current_fingerprint: String,
    },

    #[error("resume blocked: pending call(s) {0:?} have no matching tool_input")]
    UnresolvedYield(Vec<String>),

    #[error("{0}")]
    Other(String),
}

/// Raised when a model's structured output fails to validate against the
/// agent's declared output schema, carrying enough to let a caller retry
/// with a corrective prompt.
#[derive(Debug, Clone)]
pub struct OutputParseError {
    pub raw_output: String,
    pub expected_schema: Value,
    pub errors: Vec<String>,
    pub partial_value: Option<Value>,
    pub correction_attempts: u32,
}

impl std::fmt::Display for OutputParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "output parse error after {} correction attempt(s): {}",
            self.correction_attempts,
            self.errors.join("; ")
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Validation error ({rule}): {message}")]
    Validation { rule: String, message: String },

    #[error("Join incomplete: alias '{alias}' is used without the canonical join on {table}")]
    JoinIncomplete { alias: String, table: String },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Unsupported statement: {0}")]
    UnsupportedStatement(String),

    #[error("Context error: {0}")]
    Context(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PipelineError::RateLimited(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

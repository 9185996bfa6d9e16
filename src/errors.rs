use thiserror::Error;

#[derive(Debug, Error)]
pub enum SteadyhandError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed command: {0:?}")]
    MalformedCommand(String),

    #[error("Coordinate ({x}, {y}) outside bounds {width}x{height}")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },

    #[error("Actuation failure: {0}")]
    ActuationFailure(String),

    #[error("Verification failed (confidence {confidence} < {threshold}): {info}")]
    VerificationFailure {
        confidence: u8,
        threshold: u8,
        info: String,
    },

    #[error("Regeneration exhausted after {attempts} attempts for {command:?}")]
    RegenerationExhausted { attempts: u32, command: String },

    #[error("Task {0} exhausted all retries")]
    TaskExhausted(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("SSE parsing error: {0}")]
    SseParsing(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Task handler panicked while processing {0}")]
    HandlerPanic(String),
}

impl SteadyhandError {
    /// Whether the scheduler should retry a task that failed with this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SteadyhandError::Config(_)
                | SteadyhandError::Cancelled
                | SteadyhandError::TaskExhausted(_)
                | SteadyhandError::HandlerPanic(_)
        )
    }
}

pub type SteadyhandResult<T> = Result<T, SteadyhandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_not_retried() {
        assert!(!SteadyhandError::Config("bad".into()).is_recoverable());
        assert!(!SteadyhandError::Cancelled.is_recoverable());
        assert!(!SteadyhandError::HandlerPanic("t".into()).is_recoverable());
        assert!(SteadyhandError::RegenerationExhausted {
            attempts: 3,
            command: "move to (1, 2)".into(),
        }
        .is_recoverable());
    }
}

use thiserror::Error;

use crate::scalar::Scalar;

#[derive(Error, Debug)]
pub enum EavError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Parse error: {message} (in: {sql})")]
    Parse {
        message: String,
        sql: String,
        line: Option<usize>,
        col: Option<usize>,
    },
    #[error("Validation error: {message}")]
    Validation { message: String },
    #[error(
        "Data numeric does not match name: {name} - value is numeric: {value_numeric} - {value} - name is numeric: {name_numeric}"
    )]
    TypeMismatch {
        name: String,
        value: Scalar,
        value_numeric: bool,
        name_numeric: bool,
    },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("{what} fails after {attempts} tries: {source}")]
    RetriesExhausted {
        what: String,
        attempts: u32,
        #[source]
        source: Box<EavError>,
    },
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, EavError>;

impl EavError {
    pub fn parse(message: impl Into<String>, sql: &str) -> Self {
        Self::Parse {
            message: message.into(),
            sql: sql.to_string(),
            line: None,
            col: None,
        }
    }
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
    // Store failures are the only ones a get-or-create retry can resolve.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

// Helper conversions
impl From<rusqlite::Error> for EavError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
impl From<config::ConfigError> for EavError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
impl From<tokio::task::JoinError> for EavError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Persistence(format!("store task join error: {e}"))
    }
}

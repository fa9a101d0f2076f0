use thiserror::Error;

/// Main error type for the Scout search engine
#[derive(Error, Debug)]
pub enum ScoutError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors. These are raised before any evaluation happens.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid bounds for variable {name}: lo={lo}, hi={hi}")]
    InvalidBounds { name: String, lo: f64, hi: f64 },

    #[error("Duplicate variable: {name}")]
    DuplicateVariable { name: String },

    #[error("No search variables declared")]
    NoVariables,

    #[error("No stages declared")]
    NoStages,

    #[error("Unknown method: {method}")]
    UnknownMethod { method: String },

    #[error("Pareto extraction requested with an empty objective list")]
    EmptyObjectives,

    #[error("Objective {key} needs a positive finite weight, got {weight}")]
    NonPositiveWeight { key: String, weight: f64 },

    #[error("Invalid parameter {parameter}: {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl ConfigError {
    pub fn invalid(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by a caller-supplied evaluator for a single candidate.
///
/// The engine never propagates these; they are recorded as infeasible
/// evidence and the run continues.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct OracleError {
    pub message: String,
}

impl OracleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type alias for Scout operations
pub type ScoutResult<T> = Result<T, ScoutError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::ScoutError::Config($crate::ConfigError::Other(format!($($arg)*)))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::ScoutError::Internal(format!($($arg)*))
    };
}

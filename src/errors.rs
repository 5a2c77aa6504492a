use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("MALFORMED_TIMESTAMP: {0}")]
    MalformedTimestamp(String),
    #[error("ENVELOPE_INVALID: {0}")]
    Envelope(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("TRANSPORT_FAILURE: {0}")]
    Transport(String),
    #[error("TEMPLATE_FAILURE: {0}")]
    Template(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<std::fmt::Error> for AppError {
    fn from(value: std::fmt::Error) -> Self {
        Self::Template(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

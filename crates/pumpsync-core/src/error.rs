use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Delivery rejected with status {status}: {body}")]
    Delivery { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// Configuration problems cannot be fixed by waiting for the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    /// Short label used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Authorization(_) => "authorization",
            Error::Connection(_) => "connectivity",
            Error::Query(_) => "query",
            Error::Delivery { .. } => "delivery",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Generic(_) => "generic",
        }
    }
}

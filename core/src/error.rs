use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("fetch error from {source_name}: {details}")]
    Fetch { source_name: String, details: String },

    #[error("cursor store error: {0}")]
    Store(String),

    #[error("{operation} is not allowed while the trigger is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn fetch(source_name: impl Into<String>, details: impl ToString) -> Self {
        Error::Fetch {
            source_name: source_name.into(),
            details: details.to_string(),
        }
    }

    /// Retryable errors leave the persisted marker intact, so the scheduler
    /// may simply run the next cycle from the same baseline.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Fetch { .. } | Error::Store(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::InvalidState { .. } | Error::Serialization(_)
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Store(e.to_string())
    }
}

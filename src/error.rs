use std::path::PathBuf;

use zarrs::storage::StorageError;

use crate::axes::ImageCoordinates;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    General(String),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("invalid metadata entry {key:?}: {reason}")]
    InvalidMetadata { key: String, reason: String },
    #[error("no image at {0}")]
    ImageNotFound(ImageCoordinates),
    #[error("input {0:?} contains no rows")]
    EmptyInput(PathBuf),
    #[error("viewer {program:?} could not be started: {source}")]
    ViewerUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Wrapped(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn general(message: impl Into<String>) -> Self {
        Self::General(message.into())
    }

    pub fn wrap(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Wrapped(Box::new(error))
    }

    pub(crate) fn invalid_metadata(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HttpDataError>;

#[derive(Error, Debug)]
pub enum HttpDataError {
    #[error("Missing argument: {0}")]
    InvalidArgument(&'static str),
    #[error("Out of size: {size} > {defined}")]
    OverCapacity { size: u64, defined: u64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("File too big to be loaded in memory: {0} bytes")]
    OversizedForMemory(u64),
    #[error("Incomplete copy: {copied} of {expected} bytes")]
    IncompleteCopy { copied: u64, expected: u64 },
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HttpDataError {
    pub(crate) fn over_capacity(size: u64, defined: u64) -> Self {
        Self::OverCapacity { size, defined }
    }

    /// `true` for the storage-layer failures, including a short copy
    /// during rename.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::IncompleteCopy { .. })
    }
}

impl From<std::collections::TryReserveError> for HttpDataError {
    fn from(e: std::collections::TryReserveError) -> Self {
        Self::Other(anyhow::anyhow!(e.to_string()))
    }
}

use unravel_metadata::{AnnotationKind, MetadataError};

pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced by the code cache and its persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to determine home directory for default cache path")]
    MissingHomeDir,

    /// No codec is registered for this annotation variant.
    #[error("no codec registered for {kind} annotations")]
    UnsupportedAnnotation { kind: AnnotationKind },

    /// A persisted entry could not be decoded. Never surfaced by cache reads: the entry is
    /// dropped and the read is reported as a miss.
    #[error("corrupt cache entry: {reason}")]
    CorruptEntry { reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl CacheError {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        CacheError::CorruptEntry {
            reason: reason.into(),
        }
    }
}

impl From<tempfile::PersistError> for CacheError {
    fn from(err: tempfile::PersistError) -> Self {
        CacheError::Io(err.error)
    }
}

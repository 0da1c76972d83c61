use unravel_cache::CacheError;
use unravel_config::ConfigError;
use unravel_metadata::MetadataError;

use crate::search::SearchError;

#[derive(Debug, thiserror::Error)]
pub enum DecompileError {
    #[error("failed to decompile {unit}: {message}")]
    Failed { unit: String, message: String },

    /// An annotation referred to a node handle missing from the unit's node table.
    #[error("annotation at offset {offset} refers to unknown node handle {handle}")]
    UnresolvedNode { offset: u32, handle: u32 },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("decompilation cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkbenchError {
    #[error(transparent)]
    Decompile(#[from] DecompileError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Search(#[from] SearchError),
}

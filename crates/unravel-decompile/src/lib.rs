//! Decompilation workbench: ties a [`Decompiler`] to the code cache, the background executor
//! and the navigation history.

mod decompiler;
mod error;
pub mod search;
mod workbench;

pub use decompiler::{AnnotationDraft, DecompiledUnit, Decompiler, NodeHandle};
pub use error::{DecompileError, WorkbenchError};
pub use search::{search_unit, CodeMatcher, SearchError, SearchHit, SearchMode, SearchQuery};
pub use workbench::{SearchHandle, Workbench};

pub use unravel_cache::UnitKey;
pub use unravel_scheduler::CancellationToken;

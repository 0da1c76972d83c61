//! Offset-indexed semantic metadata for generated code.
//!
//! A [`CodeMetadata`] maps character offsets of a decompiled unit's text to the [`Annotation`]
//! emitted there (declarations, references, instruction markers, comments). It is built once per
//! decompilation and never patched afterwards, so published instances can be shared across
//! threads without locking.

mod annotation;
mod comment;
mod metadata;

pub use annotation::{Annotation, AnnotationKind, CodeComment};
pub use comment::{comment_target_at, CommentTarget};
pub use metadata::{CodeMetadata, CodeMetadataBuilder, MetadataError};

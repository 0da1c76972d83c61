//! Core shared types for Unravel.
//!
//! This crate is intentionally small: it only defines the identity types that every other
//! Unravel crate agrees on (stable node references and text positions).

mod node;
mod position;

pub use node::{FieldRef, MethodRef, NodeKind, NodeRef, VarRef};
pub use position::{Position, PositionError, UNSET_USAGE_POSITION};

/// Version of the Unravel workspace, used to gate persisted artifacts.
pub const UNRAVEL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Best-effort extraction of a panic payload message.
pub fn panic_payload_to_str(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

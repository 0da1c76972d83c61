//! Two-tier cache for decompiled code.
//!
//! A [`CodeCache`] stores the generated text of a unit together with its [`CodeMetadata`] as a
//! single [`CodeEntry`], so readers can never observe text from one decompilation paired with
//! annotations from another.
//!
//! ## Tiers
//!
//! - memory: LRU bounded by entry count and approximate bytes
//! - disk (optional): one `<fingerprint>.code` file per unit version under the cache root,
//!   written atomically, with annotations encoded through a [`CodecRegistry`]
//!
//! Disk corruption and version mismatches degrade to cache misses; the bad file is deleted.
//!
//! [`CodeMetadata`]: unravel_metadata::CodeMetadata

mod cache_dir;
mod code_cache;
mod codec;
mod disk;
mod error;
mod fingerprint;
mod memory;
mod util;

pub use cache_dir::{code_cache_dir, CacheConfig};
pub use code_cache::{CodeCache, CodeCacheConfig, CodeCacheStats, CodeEntry, UnitKey};
pub use codec::{
    AnnotationCodec, CodecRegistry, CommentCodec, InsnOffsetCodec, NodeCodec,
};
pub use disk::{decode_entry, encode_entry, CODE_PAYLOAD_LIMIT_BYTES, DISK_FORMAT_VERSION};
pub use error::{CacheError, Result};
pub use fingerprint::Fingerprint;
pub use util::atomic_write;

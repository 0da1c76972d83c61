use crate::codec::CodecRegistry;
use crate::error::{CacheError, Result};
use crate::fingerprint::Fingerprint;
use crate::util::{atomic_write, read_file_limited, remove_file_best_effort, STAGED_PREFIX};
use std::path::{Path, PathBuf};
use unravel_metadata::{AnnotationKind, CodeMetadata, CodeMetadataBuilder};

/// Version byte leading every `.code` file. Files with another version are misses.
pub const DISK_FORMAT_VERSION: u8 = 1;

/// Largest `.code` file the disk tier will read.
pub const CODE_PAYLOAD_LIMIT_BYTES: usize = 128 * 1024 * 1024;

const ENTRY_EXTENSION: &str = "code";

/// Serializes one unit (big-endian):
///
/// ```text
/// [version:u8][textLen:u32][text][count:u32]{[offset:u32][tag:u8][payloadLen:u32][payload]}*
/// ```
pub fn encode_entry(
    registry: &CodecRegistry,
    text: &str,
    metadata: &CodeMetadata,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(1 + 8 + text.len() + metadata.len() * 16);
    out.push(DISK_FORMAT_VERSION);
    put_len(&mut out, text.len())?;
    out.extend_from_slice(text.as_bytes());
    put_len(&mut out, metadata.len())?;
    for (offset, annotation) in metadata.iter() {
        let (kind, payload) = registry.encode(annotation)?;
        out.extend_from_slice(&offset.to_be_bytes());
        out.push(kind.tag());
        put_len(&mut out, payload.len())?;
        out.extend_from_slice(&payload);
    }
    Ok(out)
}

/// Inverse of [`encode_entry`]. Any structural problem is reported as
/// [`CacheError::CorruptEntry`].
pub fn decode_entry(registry: &CodecRegistry, bytes: &[u8]) -> Result<(String, CodeMetadata)> {
    let mut reader = Reader { bytes, pos: 0 };

    let version = reader.u8()?;
    if version != DISK_FORMAT_VERSION {
        return Err(CacheError::corrupt(format!(
            "format version {version}, expected {DISK_FORMAT_VERSION}"
        )));
    }

    let text_len = reader.u32()? as usize;
    let text = std::str::from_utf8(reader.take(text_len)?)
        .map_err(|err| CacheError::corrupt(format!("text is not utf-8: {err}")))?
        .to_owned();

    let count = reader.u32()?;
    let mut builder = CodeMetadataBuilder::new();
    for _ in 0..count {
        let offset = reader.u32()?;
        let tag = reader.u8()?;
        let kind = AnnotationKind::from_tag(tag)
            .ok_or_else(|| CacheError::corrupt(format!("unknown annotation tag {tag}")))?;
        let payload_len = reader.u32()? as usize;
        let annotation = registry.decode(kind, reader.take(payload_len)?)?;
        builder
            .add(offset, annotation)
            .map_err(|err| CacheError::corrupt(err.to_string()))?;
    }

    if reader.pos != bytes.len() {
        return Err(CacheError::corrupt(format!(
            "{} trailing bytes",
            bytes.len() - reader.pos
        )));
    }
    Ok((text, builder.build()))
}

fn put_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| CacheError::Io(std::io::Error::other("entry section exceeds u32::MAX")))?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                CacheError::corrupt(format!(
                    "truncated: wanted {len} bytes at {}, file has {}",
                    self.pos,
                    self.bytes.len()
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let mut buf = [0_u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }
}

/// Directory of `<fingerprint>.code` files.
#[derive(Debug)]
pub(crate) struct DiskTier {
    root: PathBuf,
    registry: CodecRegistry,
}

impl DiskTier {
    pub(crate) fn new(root: impl Into<PathBuf>, registry: CodecRegistry) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, registry })
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn entry_path(&self, stamp: &Fingerprint) -> PathBuf {
        self.root
            .join(format!("{}.{ENTRY_EXTENSION}", stamp.as_str()))
    }

    /// Loads an entry; unreadable or corrupt files are deleted and read as `None`.
    pub(crate) fn load(&self, stamp: &Fingerprint) -> Option<(String, CodeMetadata)> {
        let path = self.entry_path(stamp);
        let bytes = read_file_limited(&path, CODE_PAYLOAD_LIMIT_BYTES)?;
        match decode_entry(&self.registry, &bytes) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::debug!(
                    target: "unravel.cache",
                    path = %path.display(),
                    error = %err,
                    "dropping unreadable cache entry"
                );
                remove_file_best_effort(&path, "corrupt entry");
                None
            }
        }
    }

    pub(crate) fn store(
        &self,
        stamp: &Fingerprint,
        text: &str,
        metadata: &CodeMetadata,
    ) -> Result<()> {
        let bytes = encode_entry(&self.registry, text, metadata)?;
        atomic_write(&self.entry_path(stamp), &bytes)
    }

    pub(crate) fn remove(&self, stamp: &Fingerprint) {
        remove_file_best_effort(&self.entry_path(stamp), "invalidate");
    }

    /// Deletes every entry. Returns the number of files removed.
    ///
    /// Staged files belong to writers still in flight and are left for them to rename.
    pub(crate) fn clear(&self) -> Result<usize> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else { continue };
            let staged = entry.file_name().to_string_lossy().starts_with(STAGED_PREFIX);
            if file_type.is_dir() || staged {
                continue;
            }
            if remove_file_best_effort(&path, "clear") {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

use crate::error::{CacheError, Result};
use crate::util::{bincode_deserialize, bincode_serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use unravel_core::NodeRef;
use unravel_metadata::{Annotation, AnnotationKind, CodeComment};

/// Binary encoding for one [`Annotation`] variant.
///
/// Payloads are framed (length-prefixed) by the caller, so a codec only has to round-trip its
/// own bytes.
pub trait AnnotationCodec: Send + Sync {
    fn encode(&self, annotation: &Annotation) -> Result<Vec<u8>>;
    fn decode(&self, payload: &[u8]) -> Result<Annotation>;
}

/// Per-variant codec table used by the disk tier.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<AnnotationKind, Arc<dyn AnnotationCodec>>,
}

impl CodecRegistry {
    /// Registry without any codecs; every annotation is unsupported until registered.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_codecs() -> Self {
        let mut registry = Self::new();
        registry.register(
            AnnotationKind::Declaration,
            Arc::new(NodeCodec::new(AnnotationKind::Declaration)),
        );
        registry.register(
            AnnotationKind::Reference,
            Arc::new(NodeCodec::new(AnnotationKind::Reference)),
        );
        registry.register(AnnotationKind::InsnOffset, Arc::new(InsnOffsetCodec));
        registry.register(AnnotationKind::Comment, Arc::new(CommentCodec));
        registry
    }

    /// Registers (or replaces) the codec for `kind`.
    pub fn register(&mut self, kind: AnnotationKind, codec: Arc<dyn AnnotationCodec>) {
        self.codecs.insert(kind, codec);
    }

    pub fn encode(&self, annotation: &Annotation) -> Result<(AnnotationKind, Vec<u8>)> {
        let kind = annotation.kind();
        let payload = self.codec(kind)?.encode(annotation)?;
        Ok((kind, payload))
    }

    pub fn decode(&self, kind: AnnotationKind, payload: &[u8]) -> Result<Annotation> {
        let annotation = self.codec(kind)?.decode(payload)?;
        if annotation.kind() != kind {
            return Err(CacheError::corrupt(format!(
                "{kind} codec produced a {} annotation",
                annotation.kind()
            )));
        }
        Ok(annotation)
    }

    fn codec(&self, kind: AnnotationKind) -> Result<&dyn AnnotationCodec> {
        self.codecs
            .get(&kind)
            .map(|codec| codec.as_ref())
            .ok_or(CacheError::UnsupportedAnnotation { kind })
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.codecs.keys().copied().collect();
        kinds.sort();
        f.debug_struct("CodecRegistry").field("kinds", &kinds).finish()
    }
}

/// Encodes declarations and references as the bincode form of their [`NodeRef`].
#[derive(Debug, Clone, Copy)]
pub struct NodeCodec {
    kind: AnnotationKind,
}

impl NodeCodec {
    /// `kind` must be [`AnnotationKind::Declaration`] or [`AnnotationKind::Reference`].
    pub fn new(kind: AnnotationKind) -> Self {
        Self { kind }
    }
}

impl AnnotationCodec for NodeCodec {
    fn encode(&self, annotation: &Annotation) -> Result<Vec<u8>> {
        match (self.kind, annotation) {
            (AnnotationKind::Declaration, Annotation::Declaration(node))
            | (AnnotationKind::Reference, Annotation::Reference(node)) => bincode_serialize(node),
            _ => Err(CacheError::UnsupportedAnnotation {
                kind: annotation.kind(),
            }),
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<Annotation> {
        let node: NodeRef = bincode_deserialize(payload)?;
        match self.kind {
            AnnotationKind::Declaration => Ok(Annotation::Declaration(node)),
            AnnotationKind::Reference => Ok(Annotation::Reference(node)),
            kind => Err(CacheError::UnsupportedAnnotation { kind }),
        }
    }
}

/// Raw instruction offsets as a 4-byte big-endian integer.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsnOffsetCodec;

impl AnnotationCodec for InsnOffsetCodec {
    fn encode(&self, annotation: &Annotation) -> Result<Vec<u8>> {
        match annotation {
            Annotation::InsnOffset(offset) => Ok(offset.to_be_bytes().to_vec()),
            other => Err(CacheError::UnsupportedAnnotation { kind: other.kind() }),
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<Annotation> {
        let bytes: [u8; 4] = payload.try_into().map_err(|_| {
            CacheError::corrupt(format!(
                "instruction offset payload has {} bytes, expected 4",
                payload.len()
            ))
        })?;
        Ok(Annotation::InsnOffset(u32::from_be_bytes(bytes)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommentCodec;

impl AnnotationCodec for CommentCodec {
    fn encode(&self, annotation: &Annotation) -> Result<Vec<u8>> {
        match annotation {
            Annotation::Comment(comment) => bincode_serialize(comment),
            other => Err(CacheError::UnsupportedAnnotation { kind: other.kind() }),
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<Annotation> {
        let comment: CodeComment = bincode_deserialize(payload)?;
        Ok(Annotation::Comment(comment))
    }
}

use unravel_cache::UnitKey;
use unravel_core::NodeRef;
use unravel_metadata::{Annotation, CodeComment, CodeMetadata, CodeMetadataBuilder};
use unravel_scheduler::CancellationToken;

use crate::DecompileError;

/// Index into [`DecompiledUnit::nodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub u32);

/// An annotation as emitted by a decompiler, before node handles are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationDraft {
    Declaration(NodeHandle),
    Reference(NodeHandle),
    InsnOffset(u32),
    Comment {
        node: NodeHandle,
        insn_offset: Option<u32>,
        text: String,
    },
}

/// Raw decompiler output for one unit.
#[derive(Debug, Clone, Default)]
pub struct DecompiledUnit {
    pub text: String,
    /// Node table referenced by [`NodeHandle`]s; only valid for this unit.
    pub nodes: Vec<NodeRef>,
    pub annotations: Vec<(u32, AnnotationDraft)>,
}

impl DecompiledUnit {
    /// Replaces handles with stable node references and freezes the annotation table.
    pub fn resolve(self) -> Result<(String, CodeMetadata), DecompileError> {
        let DecompiledUnit {
            text,
            nodes,
            annotations,
        } = self;

        let node = |offset: u32, handle: NodeHandle| {
            nodes
                .get(handle.0 as usize)
                .cloned()
                .ok_or(DecompileError::UnresolvedNode {
                    offset,
                    handle: handle.0,
                })
        };

        let mut builder = CodeMetadataBuilder::new();
        for (offset, draft) in annotations {
            let annotation = match draft {
                AnnotationDraft::Declaration(handle) => {
                    Annotation::Declaration(node(offset, handle)?)
                }
                AnnotationDraft::Reference(handle) => Annotation::Reference(node(offset, handle)?),
                AnnotationDraft::InsnOffset(insn) => Annotation::InsnOffset(insn),
                AnnotationDraft::Comment {
                    node: handle,
                    insn_offset,
                    text,
                } => Annotation::Comment(CodeComment {
                    node: node(offset, handle)?,
                    insn_offset,
                    text,
                }),
            };
            builder.add(offset, annotation)?;
        }
        Ok((text, builder.build()))
    }
}

/// Produces source text and annotations for a unit.
///
/// Implementations are called from worker threads and should return
/// [`DecompileError::Cancelled`] soon after `token` is cancelled.
pub trait Decompiler: Send + Sync + 'static {
    fn decompile(
        &self,
        unit: &UnitKey,
        token: &CancellationToken,
    ) -> Result<DecompiledUnit, DecompileError>;
}

use crate::{Annotation, CodeComment, CodeMetadata};
use unravel_core::NodeRef;

/// Where a new comment typed at a caret position would be attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentTarget {
    /// Comment on a class, method or field declaration.
    Node(NodeRef),
    /// Line comment inside a method body, anchored at an instruction.
    Insn { method: NodeRef, insn_offset: u32 },
}

impl CommentTarget {
    pub fn node(&self) -> &NodeRef {
        match self {
            CommentTarget::Node(node) => node,
            CommentTarget::Insn { method, .. } => method,
        }
    }

    pub fn into_comment(self, text: impl Into<String>) -> CodeComment {
        match self {
            CommentTarget::Node(node) => CodeComment::new(node, text),
            CommentTarget::Insn {
                method,
                insn_offset,
            } => CodeComment::at_insn(method, insn_offset, text),
        }
    }
}

/// Decides whether a comment can be placed at byte offset `pos` of `text`.
///
/// - a class/method/field declaration at `pos` takes a node comment;
/// - an unannotated `//` line takes a comment for the declaration below it;
/// - an instruction marker inside a method takes an instruction comment.
pub fn comment_target_at(metadata: &CodeMetadata, text: &str, pos: u32) -> Option<CommentTarget> {
    match metadata.annotation_at(pos) {
        Some(Annotation::Declaration(node)) if !node.is_variable() => {
            Some(CommentTarget::Node(node.clone()))
        }
        Some(Annotation::InsnOffset(insn_offset)) => match metadata.node_at(pos) {
            Some(method @ NodeRef::Method(_)) => Some(CommentTarget::Insn {
                method: method.clone(),
                insn_offset: *insn_offset,
            }),
            _ => None,
        },
        Some(_) => None,
        None => {
            let (_, below) = metadata.declaration_below(pos)?;
            if below.is_variable() {
                return None;
            }
            let line = line_at(text, pos as usize)?;
            line.trim_start()
                .starts_with("//")
                .then(|| CommentTarget::Node(below.clone()))
        }
    }
}

fn line_at(text: &str, pos: usize) -> Option<&str> {
    let head = text.get(..pos)?;
    let start = head.rfind('\n').map_or(0, |idx| idx + 1);
    let end = text[pos..].find('\n').map_or(text.len(), |idx| pos + idx);
    Some(&text[start..end])
}

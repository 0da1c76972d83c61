use serde::{Deserialize, Serialize};
use std::fmt;
use unravel_core::NodeRef;

/// Wire tag of an [`Annotation`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum AnnotationKind {
    Declaration = 1,
    Reference = 2,
    InsnOffset = 3,
    Comment = 4,
}

impl AnnotationKind {
    pub const ALL: [AnnotationKind; 4] = [
        AnnotationKind::Declaration,
        AnnotationKind::Reference,
        AnnotationKind::InsnOffset,
        AnnotationKind::Comment,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(AnnotationKind::Declaration),
            2 => Some(AnnotationKind::Reference),
            3 => Some(AnnotationKind::InsnOffset),
            4 => Some(AnnotationKind::Comment),
            _ => None,
        }
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnnotationKind::Declaration => "declaration",
            AnnotationKind::Reference => "reference",
            AnnotationKind::InsnOffset => "insn-offset",
            AnnotationKind::Comment => "comment",
        };
        f.write_str(name)
    }
}

/// User comment attached to a node, optionally anchored at an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeComment {
    pub node: NodeRef,
    pub insn_offset: Option<u32>,
    pub text: String,
}

impl CodeComment {
    pub fn new(node: NodeRef, text: impl Into<String>) -> Self {
        Self {
            node,
            insn_offset: None,
            text: text.into(),
        }
    }

    pub fn at_insn(node: NodeRef, insn_offset: u32, text: impl Into<String>) -> Self {
        Self {
            node,
            insn_offset: Some(insn_offset),
            text: text.into(),
        }
    }
}

/// A semantic fact attached to a single text offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Annotation {
    /// The node is declared here.
    Declaration(NodeRef),
    /// The node is used here.
    Reference(NodeRef),
    /// Code at this offset was produced by the instruction at this raw bytecode offset.
    InsnOffset(u32),
    Comment(CodeComment),
}

impl Annotation {
    pub fn kind(&self) -> AnnotationKind {
        match self {
            Annotation::Declaration(_) => AnnotationKind::Declaration,
            Annotation::Reference(_) => AnnotationKind::Reference,
            Annotation::InsnOffset(_) => AnnotationKind::InsnOffset,
            Annotation::Comment(_) => AnnotationKind::Comment,
        }
    }

    /// Node carried by this annotation, if any.
    pub fn node(&self) -> Option<&NodeRef> {
        match self {
            Annotation::Declaration(node) | Annotation::Reference(node) => Some(node),
            Annotation::Comment(comment) => Some(&comment.node),
            Annotation::InsnOffset(_) => None,
        }
    }

    pub fn declared_node(&self) -> Option<&NodeRef> {
        match self {
            Annotation::Declaration(node) => Some(node),
            _ => None,
        }
    }
}

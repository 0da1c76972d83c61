use crate::NodeRef;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Marker for "no usage position recorded".
pub const UNSET_USAGE_POSITION: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    #[error("invalid usage position {0} (must be >= -1)")]
    InvalidUsagePosition(i32),
}

/// A location in generated code.
///
/// Identity is `(line, offset)`: the attached node and usage position are metadata and do not
/// take part in equality, hashing or ordering.
#[derive(Debug, Clone)]
pub struct Position {
    line: u32,
    offset: u32,
    node: Option<NodeRef>,
    usage_position: i32,
}

impl Position {
    pub fn new(line: u32, offset: u32) -> Self {
        Self {
            line,
            offset,
            node: None,
            usage_position: UNSET_USAGE_POSITION,
        }
    }

    pub fn with_node(node: NodeRef, line: u32, offset: u32) -> Self {
        Self {
            node: Some(node),
            ..Self::new(line, offset)
        }
    }

    pub fn set_usage_position(mut self, usage_position: i32) -> Result<Self, PositionError> {
        if usage_position < UNSET_USAGE_POSITION {
            return Err(PositionError::InvalidUsagePosition(usage_position));
        }
        self.usage_position = usage_position;
        Ok(self)
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn node(&self) -> Option<&NodeRef> {
        self.node.as_ref()
    }

    /// Usage position override, or `None` when unset.
    pub fn usage_position(&self) -> Option<u32> {
        u32::try_from(self.usage_position).ok()
    }

    /// Class node owning this position, if a node is attached.
    pub fn declaring_class(&self) -> Option<NodeRef> {
        self.node.as_ref().map(NodeRef::declaring_class_node)
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.line == other.line && self.offset == other.offset
    }
}

impl Eq for Position {}

impl Hash for Position {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.line.hash(state);
        self.offset.hash(state);
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.line, self.offset).cmp(&(other.line, other.offset))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.line)?;
        if self.offset != 0 {
            write!(f, ":{}", self.offset)?;
        }
        if let Some(node) = &self.node {
            write!(f, " {node}")?;
        }
        Ok(())
    }
}

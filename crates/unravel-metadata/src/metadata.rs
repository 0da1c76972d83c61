use crate::annotation::Annotation;
use std::collections::btree_map::{BTreeMap, Entry};
use std::collections::HashMap;
use std::ops::{Bound, RangeBounds};
use std::sync::OnceLock;
use unravel_core::NodeRef;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    /// Two annotations were emitted for the same text offset. This is a decompiler bug, not a
    /// user error: the unit's build fails and the caller skips it.
    #[error("duplicate annotation at offset {offset}")]
    DuplicateOffset { offset: u32 },
}

/// Collects `(offset, annotation)` pairs before freezing them into a [`CodeMetadata`].
///
/// Offsets are normally appended in increasing order (text is generated top to bottom) but any
/// order is accepted; only duplicates are rejected.
#[derive(Debug, Default)]
pub struct CodeMetadataBuilder {
    entries: BTreeMap<u32, Annotation>,
}

impl CodeMetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, offset: u32, annotation: Annotation) -> Result<(), MetadataError> {
        match self.entries.entry(offset) {
            Entry::Vacant(slot) => {
                slot.insert(annotation);
                Ok(())
            }
            Entry::Occupied(_) => Err(MetadataError::DuplicateOffset { offset }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(self) -> CodeMetadata {
        CodeMetadata {
            entries: self.entries.into_iter().collect(),
            declarations: OnceLock::new(),
        }
    }
}

/// Immutable, offset-ordered annotation table for one decompiled unit.
#[derive(Debug, Clone, Default)]
pub struct CodeMetadata {
    // Sorted by offset, offsets unique.
    entries: Vec<(u32, Annotation)>,
    declarations: OnceLock<HashMap<NodeRef, u32>>,
}

impl CodeMetadata {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds metadata from pairs in any order, failing on the first repeated offset.
    pub fn from_annotations(
        annotations: impl IntoIterator<Item = (u32, Annotation)>,
    ) -> Result<Self, MetadataError> {
        let mut builder = CodeMetadataBuilder::new();
        for (offset, annotation) in annotations {
            builder.add(offset, annotation)?;
        }
        Ok(builder.build())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All annotations, ascending by offset.
    pub fn all_annotations(&self) -> &[(u32, Annotation)] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Annotation)> + '_ {
        self.entries.iter().map(|(offset, ann)| (*offset, ann))
    }

    pub fn annotation_at(&self, offset: u32) -> Option<&Annotation> {
        self.entries
            .binary_search_by_key(&offset, |(o, _)| *o)
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    /// Annotation with the greatest offset `<= offset`.
    pub fn annotation_at_or_below(&self, offset: u32) -> Option<(u32, &Annotation)> {
        let pivot = self.pivot(offset);
        let (found, ann) = self.entries[..pivot].last()?;
        Some((*found, ann))
    }

    pub fn annotations_in(&self, range: impl RangeBounds<u32>) -> &[(u32, Annotation)] {
        let start = match range.start_bound() {
            Bound::Included(&start) => self.entries.partition_point(|(o, _)| *o < start),
            Bound::Excluded(&start) => self.pivot(start),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&end) => self.pivot(end),
            Bound::Excluded(&end) => self.entries.partition_point(|(o, _)| *o < end),
            Bound::Unbounded => self.entries.len(),
        };
        if start >= end {
            return &[];
        }
        &self.entries[start..end]
    }

    /// Offset at which `node` is declared in this unit, or `None` for foreign nodes.
    pub fn declaration_offset_of(&self, node: &NodeRef) -> Option<u32> {
        self.declarations
            .get_or_init(|| {
                let mut map = HashMap::new();
                for (offset, ann) in &self.entries {
                    if let Annotation::Declaration(declared) = ann {
                        map.entry(declared.clone()).or_insert(*offset);
                    }
                }
                map
            })
            .get(node)
            .copied()
    }

    /// Innermost enclosing class/method/field for `offset`: the nearest non-variable
    /// declaration at or before it.
    pub fn node_at(&self, offset: u32) -> Option<&NodeRef> {
        let pivot = self.pivot(offset);
        self.entries[..pivot]
            .iter()
            .rev()
            .find_map(|(_, ann)| ann.declared_node().filter(|node| !node.is_variable()))
    }

    /// First declaration strictly after `offset` (e.g. the member below a comment line).
    pub fn declaration_below(&self, offset: u32) -> Option<(u32, &NodeRef)> {
        let pivot = self.pivot(offset);
        self.entries[pivot..]
            .iter()
            .find_map(|(o, ann)| ann.declared_node().map(|node| (*o, node)))
    }

    // Index of the first entry with offset > `offset`.
    fn pivot(&self, offset: u32) -> usize {
        self.entries.partition_point(|(o, _)| *o <= offset)
    }
}

impl PartialEq for CodeMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for CodeMetadata {}

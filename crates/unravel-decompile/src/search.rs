//! Text search over decompiled units.

use regex::{Regex, RegexBuilder};
use unravel_core::NodeRef;
use unravel_metadata::CodeMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    Literal,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub pattern: String,
    pub mode: SearchMode,
    pub ignore_case: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl SearchQuery {
    pub fn literal(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            mode: SearchMode::Literal,
            ignore_case: false,
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            mode: SearchMode::Regex,
            ignore_case: false,
        }
    }

    pub fn ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    pub fn compile(&self) -> Result<CodeMatcher, SearchError> {
        let source = match self.mode {
            SearchMode::Literal => regex::escape(&self.pattern),
            SearchMode::Regex => self.pattern.clone(),
        };
        let regex = RegexBuilder::new(&source)
            .case_insensitive(self.ignore_case)
            .build()?;
        Ok(CodeMatcher {
            regex,
            empty: self.pattern.is_empty(),
        })
    }
}

/// A compiled [`SearchQuery`].
#[derive(Debug, Clone)]
pub struct CodeMatcher {
    regex: Regex,
    empty: bool,
}

impl CodeMatcher {
    /// Finds matching lines of one unit, at most one hit per line, in text order.
    pub fn search_unit(&self, unit: &str, text: &str, metadata: &CodeMetadata) -> Vec<SearchHit> {
        let mut hits = Vec::new();
        if self.empty {
            return hits;
        }

        let mut pos = 0;
        let mut line_number = 1;
        let mut counted_to = 0;
        while pos <= text.len() {
            let Some(found) = self.regex.find_at(text, pos) else {
                break;
            };
            let offset = found.start();
            let line_start = text[..offset].rfind('\n').map_or(0, |idx| idx + 1);
            let line_end = text[offset..].find('\n').map_or(text.len(), |idx| offset + idx);

            line_number += text[counted_to..offset].matches('\n').count();
            counted_to = offset;

            // Declarations on the matched line take precedence over the one above it.
            let enclosing = metadata
                .node_at(line_end as u32)
                .cloned()
                .unwrap_or_else(|| NodeRef::class(unit));

            hits.push(SearchHit {
                unit: unit.to_owned(),
                offset: offset as u32,
                line: text[line_start..line_end].trim().to_owned(),
                line_number: line_number as u32,
                enclosing,
            });
            pos = line_end + 1;
        }
        hits
    }
}

/// A matching line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub unit: String,
    /// Byte offset of the match start.
    pub offset: u32,
    /// The matched line, trimmed.
    pub line: String,
    /// 1-based.
    pub line_number: u32,
    /// Innermost class, method or field around the line, or the unit's class.
    pub enclosing: NodeRef,
}

/// Compiles `query` and searches a single unit.
pub fn search_unit(
    unit: &str,
    text: &str,
    metadata: &CodeMetadata,
    query: &SearchQuery,
) -> Result<Vec<SearchHit>, SearchError> {
    Ok(query.compile()?.search_unit(unit, text, metadata))
}

//! Materialized-path sequences for the financial structure.
//!
//! A sequence such as `1.2.0.3` records the position of a node in the fund center
//! forest. Fund center children append one segment to their parent (`1.2.4`), cost
//! centers are nested behind the reserved `0` segment (`1.2.0.3`) so that both kinds
//! of children of the same fund center never collide.
//!
//! All comparisons are segment-wise, so `1.10` is never taken for a descendant of `1.1`.

use crate::error::{BftError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub const SEPARATOR: char = '.';
pub const RESERVED_SEGMENT: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SequencePath(Vec<u32>);

impl SequencePath {
    pub fn root(n: u32) -> Self {
        Self(vec![n])
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BftError::InvalidSequence(raw.to_string()));
        }
        let segments = trimmed
            .split(SEPARATOR)
            .map(|s| {
                s.parse::<u32>()
                    .map_err(|_| BftError::InvalidSequence(raw.to_string()))
            })
            .collect::<Result<Vec<u32>>>()?;
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[u32] {
        &self.0
    }

    /// Number of segments; this is the node level.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    pub fn last(&self) -> u32 {
        self.0.last().copied().unwrap_or_default()
    }

    /// True when a reserved segment appears anywhere past the first position.
    /// Such a path belongs to a cost center and cannot be a parent.
    pub fn has_reserved_segment(&self) -> bool {
        self.0.iter().skip(1).any(|s| *s == RESERVED_SEGMENT)
    }

    /// Fund center child: `<self>.<n>`.
    pub fn child(&self, n: u32) -> Self {
        let mut segments = self.0.clone();
        segments.push(n);
        Self(segments)
    }

    /// Cost center child: `<self>.0.<n>`.
    pub fn cost_center_child(&self, n: u32) -> Self {
        let mut segments = self.0.clone();
        segments.push(RESERVED_SEGMENT);
        segments.push(n);
        Self(segments)
    }

    fn starts_with(&self, prefix: &SequencePath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Strict descendant test. Fails when `self` would be an ambiguous parent.
    pub fn is_ancestor_of(&self, child: &SequencePath) -> Result<bool> {
        if self.has_reserved_segment() {
            return Err(BftError::AmbiguousParent(self.to_string()));
        }
        Ok(child.0.len() > self.0.len() && child.starts_with(self))
    }

    /// Direct child test. Cost centers (`<parent>.0.<n>`) count as direct children
    /// once their interior reserved segment is collapsed.
    pub fn is_parent_of(&self, child: &SequencePath) -> Result<bool> {
        if !self.is_ancestor_of(child)? {
            return Ok(false);
        }
        if !child.has_reserved_segment() {
            return Ok(child.0.len() == self.0.len() + 1);
        }
        // A trailing reserved segment is not collapsible and names no child.
        let collapsed = child.collapse_reserved();
        if collapsed == *child {
            return Ok(false);
        }
        self.is_parent_of(&collapsed)
    }

    fn collapse_reserved(&self) -> Self {
        let last = self.0.len().saturating_sub(1);
        let segments = self
            .0
            .iter()
            .enumerate()
            .filter(|(idx, s)| !(**s == RESERVED_SEGMENT && *idx > 0 && *idx < last))
            .map(|(_, s)| *s)
            .collect();
        Self(segments)
    }
}

impl fmt::Display for SequencePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl FromStr for SequencePath {
    type Err = BftError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SequencePath {
    type Error = BftError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SequencePath> for String {
    fn from(value: SequencePath) -> Self {
        value.to_string()
    }
}

/// String-level descendant test used at persistence boundaries.
pub fn is_sequence_descendant_of(parent: &str, child: &str) -> Result<bool> {
    let parent = SequencePath::parse(parent)?;
    let child = SequencePath::parse(child)?;
    parent.is_ancestor_of(&child)
}

/// String-level direct child test used at persistence boundaries.
pub fn is_sequence_child_of(parent: &str, child: &str) -> Result<bool> {
    let parent = SequencePath::parse(parent)?;
    let child = SequencePath::parse(child)?;
    parent.is_parent_of(&child)
}

fn next_segment(last: Option<u32>, after: impl FnOnce() -> String) -> Result<u32> {
    match last {
        Some(n) => n
            .checked_add(1)
            .ok_or_else(|| BftError::SequenceExhausted(after())),
        None => Ok(1),
    }
}

/// Next root sequence given every sequence currently in use.
pub fn new_root_sequence<'a>(existing: impl IntoIterator<Item = &'a SequencePath>) -> Result<SequencePath> {
    let last_root = existing
        .into_iter()
        .filter(|s| s.is_root())
        .map(|s| s.last())
        .max();
    let next = next_segment(last_root, || "root".to_string())?;
    Ok(SequencePath::root(next))
}

/// Next child sequence under `parent`, given the sequences of its existing children
/// of the same kind.
pub fn next_child_sequence<'a>(
    parent: &SequencePath,
    siblings: impl IntoIterator<Item = &'a SequencePath>,
    is_cost_center_child: bool,
) -> Result<SequencePath> {
    let last = siblings.into_iter().map(|s| s.last()).max();
    let next = next_segment(last, || parent.to_string())?;
    if is_cost_center_child {
        Ok(parent.cost_center_child(next))
    } else {
        Ok(parent.child(next))
    }
}

/// Direct children of `parent` among `family`.
pub fn direct_descendant_sequences(
    family: &BTreeSet<SequencePath>,
    parent: &SequencePath,
) -> Result<Vec<SequencePath>> {
    if !family.contains(parent) {
        return Err(BftError::ParentDoesNotExist(parent.to_string()));
    }
    let mut children = Vec::new();
    for candidate in family {
        if parent.is_parent_of(candidate)? {
            children.push(candidate.clone());
        }
    }
    Ok(children)
}

/// Every strict descendant of `parent` among `family`.
pub fn descendant_sequences(
    family: &BTreeSet<SequencePath>,
    parent: &SequencePath,
) -> Result<Vec<SequencePath>> {
    if !family.contains(parent) {
        return Err(BftError::ParentDoesNotExist(parent.to_string()));
    }
    let mut descendants = Vec::new();
    for candidate in family {
        if parent.is_ancestor_of(candidate)? {
            descendants.push(candidate.clone());
        }
    }
    Ok(descendants)
}

//! Small index newtypes shared across the fill engine. Kept as thin wrappers over `usize`
//! rather than bare aliases so entry indices and word indices can't be swapped by accident.

use std::fmt;

/// The index of a word within its length bucket in a [`crate::word_db::WordDb`]. Stable for
/// the lifetime of the database; higher index means higher score (see §3 of the spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WordId(pub u32);

impl WordId {
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for WordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The index of an entry within a [`crate::grid_model::GridModel`]. Entries are numbered
/// 0..E-1 in discovery order: all across entries first in row-major order of their start
/// cell, then all down entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub u32);

impl EntryId {
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The direction an entry runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Across,
    Down,
}

impl Direction {
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Direction::Across => 0,
            Direction::Down => 1,
        }
    }
}

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// A position in the committed log: `(index, term)`, ordered by `index`.
///
/// `(0, 0)` denotes the empty position of a pristine backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    pub index: u64,
    pub term: u64,
}

impl LogPosition {
    pub const ZERO: LogPosition = LogPosition { index: 0, term: 0 };

    pub fn new(index: u64, term: u64) -> Self {
        Self { index, term }
    }

    /// The position immediately following this one, at the given term.
    pub fn next(&self, term: u64) -> Self {
        Self {
            index: self.index + 1,
            term,
        }
    }
}

impl PartialOrd for LogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogPosition {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.term)
    }
}

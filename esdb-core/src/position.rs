use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Global log position. Monotonically increasing across the whole log.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub commit: u64,
    pub prepare: u64,
}

impl Position {
    pub const START: Position = Position { commit: 0, prepare: 0 };
    pub const END: Position = Position { commit: u64::MAX, prepare: u64::MAX };

    pub fn new(commit: u64, prepare: u64) -> Self {
        Self { commit, prepare }
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.commit
            .cmp(&other.commit)
            .then(self.prepare.cmp(&other.prepare))
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "C:{}/P:{}", self.commit, self.prepare)
    }
}

/// Where a subscription starts. `After` is exclusive: delivery resumes with the next event.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum StreamStart<T> {
    Start,
    End,
    After(T),
}

impl<T> Default for StreamStart<T> {
    fn default() -> Self {
        StreamStart::Start
    }
}

impl<T: Display> Display for StreamStart<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamStart::Start => write!(f, "Start"),
            StreamStart::End => write!(f, "End"),
            StreamStart::After(position) => write!(f, "After({})", position),
        }
    }
}

/// A resumable point a consumer can persist. The library reports it and never stores it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Checkpoint {
    Revision(u64),
    Position(Position),
}

impl Display for Checkpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Checkpoint::Revision(revision) => write!(f, "revision {}", revision),
            Checkpoint::Position(position) => write!(f, "position {}", position),
        }
    }
}

/// Optimistic-concurrency token for appends.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ExpectedRevision {
    Any,
    NoStream,
    StreamExists,
    Exact(u64),
}

impl Display for ExpectedRevision {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedRevision::Any => write!(f, "Any"),
            ExpectedRevision::NoStream => write!(f, "NoStream"),
            ExpectedRevision::StreamExists => write!(f, "StreamExists"),
            ExpectedRevision::Exact(revision) => write!(f, "{}", revision),
        }
    }
}

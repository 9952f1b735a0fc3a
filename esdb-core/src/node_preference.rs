use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Routing intent declared once per client and applied to every call.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum NodePreference {
    #[default]
    Leader,
    Follower,
    ReadOnlyReplica,
    Random,
}

impl NodePreference {
    pub fn requires_leader(&self) -> bool {
        matches!(self, NodePreference::Leader)
    }
}

impl Display for NodePreference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

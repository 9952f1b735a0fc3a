use std::fmt::{Display, Formatter};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::endpoint::Endpoint;

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ClusterMember {
    pub instance_id: Uuid,
    pub endpoint: Endpoint,
    pub state: MemberState,
    pub is_alive: bool,
}

impl ClusterMember {
    pub fn new(endpoint: Endpoint, state: MemberState) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            endpoint,
            state,
            is_alive: true,
        }
    }

    pub fn dead(mut self) -> Self {
        self.is_alive = false;
        self
    }

    pub fn is_serving(&self) -> bool {
        self.is_alive && self.state.is_serving()
    }
}

impl Display for ClusterMember {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let alive = if self.is_alive { "alive" } else { "dead" };
        write!(f, "{}({}, {})", self.endpoint, self.state, alive)
    }
}

/// Node states as reported by gossip.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum MemberState {
    Initializing,
    DiscoverLeader,
    Unknown,
    PreReplica,
    CatchingUp,
    Clone,
    Follower,
    PreLeader,
    Leader,
    Manager,
    ShuttingDown,
    Shutdown,
    ReadOnlyLeaderless,
    PreReadOnlyReplica,
    ReadOnlyReplica,
    ResigningLeader,
}

impl MemberState {
    pub fn is_serving(&self) -> bool {
        matches!(self, MemberState::Leader | MemberState::Follower | MemberState::ReadOnlyReplica)
    }
}

impl Display for MemberState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One gossip answer. Snapshots are never merged, a newer one replaces the previous one.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub members: Vec<ClusterMember>,
}

impl ClusterInfo {
    pub fn new(members: Vec<ClusterMember>) -> Self {
        Self { members }
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.members.iter().map(|m| &m.endpoint)
    }

    pub fn leader(&self) -> Option<&ClusterMember> {
        self.members
            .iter()
            .find(|m| m.is_alive && matches!(m.state, MemberState::Leader))
    }
}

impl Display for ClusterInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClusterInfo [{}]", self.members.iter().join(", "))
    }
}

impl FromIterator<ClusterMember> for ClusterInfo {
    fn from_iter<T: IntoIterator<Item = ClusterMember>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

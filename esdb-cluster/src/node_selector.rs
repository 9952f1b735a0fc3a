use rand::seq::SliceRandom;
use tracing::warn;

use esdb_core::endpoint::Endpoint;
use esdb_core::member::{ClusterInfo, ClusterMember, MemberState};
use esdb_core::node_preference::NodePreference;

/// Picks the node matching `preference` out of one gossip snapshot. Never falls back to another
/// state and never returns an endpoint absent from `info`.
pub fn select(info: &ClusterInfo, preference: NodePreference) -> Option<Endpoint> {
    let alive = info.members.iter().filter(|m| m.is_alive);
    match preference {
        NodePreference::Leader => {
            let leaders = alive
                .filter(|m| matches!(m.state, MemberState::Leader))
                .collect::<Vec<_>>();
            match leaders.as_slice() {
                [leader] => Some(leader.endpoint.clone()),
                [] => None,
                _ => {
                    warn!("gossip reports {} leaders, refuse to pick one", leaders.len());
                    None
                }
            }
        }
        NodePreference::Follower => choose(alive.filter(|m| matches!(m.state, MemberState::Follower))),
        NodePreference::ReadOnlyReplica => {
            choose(alive.filter(|m| matches!(m.state, MemberState::ReadOnlyReplica)))
        }
        NodePreference::Random => choose(alive.filter(|m| m.state.is_serving())),
    }
}

fn choose<'a>(candidates: impl Iterator<Item = &'a ClusterMember>) -> Option<Endpoint> {
    let candidates = candidates.collect::<Vec<_>>();
    candidates
        .choose(&mut rand::thread_rng())
        .map(|m| m.endpoint.clone())
}

#[derive(Debug, Copy, Clone)]
pub struct NodeSelector {
    preference: NodePreference,
}

impl NodeSelector {
    pub fn new(preference: NodePreference) -> Self {
        Self { preference }
    }

    pub fn preference(&self) -> NodePreference {
        self.preference
    }

    pub fn select(&self, info: &ClusterInfo) -> Option<Endpoint> {
        select(info, self.preference)
    }
}

#[cfg(test)]
mod tests {
    use ahash::HashSet;

    use esdb_core::endpoint::Endpoint;
    use esdb_core::member::{ClusterInfo, ClusterMember, MemberState};
    use esdb_core::node_preference::NodePreference;

    use crate::node_selector::select;

    fn endpoint(host: &str) -> Endpoint {
        Endpoint::new(host, 2113)
    }

    fn cluster(members: &[(&str, MemberState)]) -> ClusterInfo {
        members
            .iter()
            .map(|(host, state)| ClusterMember::new(endpoint(host), *state))
            .collect()
    }

    #[test]
    fn leader_is_deterministic() {
        let info = cluster(&[
            ("a", MemberState::Leader),
            ("b", MemberState::Follower),
            ("c", MemberState::Follower),
        ]);
        for _ in 0..50 {
            assert_eq!(select(&info, NodePreference::Leader), Some(endpoint("a")));
        }
    }

    #[test]
    fn no_leader_means_none() {
        let info = cluster(&[
            ("a", MemberState::PreLeader),
            ("b", MemberState::Follower),
            ("c", MemberState::Follower),
        ]);
        assert_eq!(select(&info, NodePreference::Leader), None);
        assert_eq!(select(&ClusterInfo::default(), NodePreference::Leader), None);
    }

    #[test]
    fn dead_leader_is_not_selected() {
        let info: ClusterInfo = [
            ClusterMember::new(endpoint("a"), MemberState::Leader).dead(),
            ClusterMember::new(endpoint("b"), MemberState::Follower),
        ]
        .into_iter()
        .collect();
        assert_eq!(select(&info, NodePreference::Leader), None);
    }

    #[test]
    fn two_leaders_is_ambiguous() {
        let info = cluster(&[("a", MemberState::Leader), ("b", MemberState::Leader)]);
        assert_eq!(select(&info, NodePreference::Leader), None);
    }

    #[test]
    fn follower_only_among_followers() {
        let info = cluster(&[
            ("a", MemberState::Leader),
            ("b", MemberState::Follower),
            ("c", MemberState::Follower),
            ("d", MemberState::ReadOnlyReplica),
        ]);
        let mut seen = HashSet::default();
        for _ in 0..200 {
            let selected = select(&info, NodePreference::Follower).unwrap();
            assert!(selected == endpoint("b") || selected == endpoint("c"));
            seen.insert(selected);
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn no_fallback_for_missing_state() {
        let info = cluster(&[("a", MemberState::Leader), ("b", MemberState::Follower)]);
        assert_eq!(select(&info, NodePreference::ReadOnlyReplica), None);
        let info = cluster(&[("a", MemberState::Leader)]);
        assert_eq!(select(&info, NodePreference::Follower), None);
    }

    #[test]
    fn random_excludes_non_serving_states() {
        let info = cluster(&[
            ("a", MemberState::Leader),
            ("b", MemberState::CatchingUp),
            ("c", MemberState::Manager),
            ("d", MemberState::ReadOnlyReplica),
            ("e", MemberState::ShuttingDown),
        ]);
        let mut seen = HashSet::default();
        for _ in 0..200 {
            seen.insert(select(&info, NodePreference::Random).unwrap());
        }
        let expected = [endpoint("a"), endpoint("d")].into_iter().collect::<HashSet<_>>();
        assert_eq!(seen, expected);
    }

    #[test]
    fn never_invents_endpoints() {
        let info = cluster(&[("a", MemberState::Follower), ("b", MemberState::ReadOnlyReplica)]);
        for preference in [
            NodePreference::Leader,
            NodePreference::Follower,
            NodePreference::ReadOnlyReplica,
            NodePreference::Random,
        ] {
            if let Some(selected) = select(&info, preference) {
                assert!(info.endpoints().any(|e| e == &selected));
            }
        }
    }
}

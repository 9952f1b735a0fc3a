//! In-memory stand-ins for the transport collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use esdb_core::endpoint::Endpoint;
use esdb_core::member::{ClusterInfo, ClusterMember, MemberState};
use esdb_core::status::Status;

use crate::channel::{Channel, ChannelFactory};
use crate::gossip::GossipClient;

#[derive(Debug)]
pub struct FakeChannel {
    pub id: usize,
    endpoint: Endpoint,
    disposed: AtomicBool,
}

impl FakeChannel {
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Channel for FakeChannel {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// Counts channel creations so tests can detect needless reconnects.
#[derive(Debug, Clone, Default)]
pub struct FakeChannelFactory {
    created: Arc<AtomicUsize>,
}

impl FakeChannelFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ChannelFactory<FakeChannel> for FakeChannelFactory {
    fn create(&self, endpoint: &Endpoint) -> FakeChannel {
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        FakeChannel {
            id,
            endpoint: endpoint.clone(),
            disposed: AtomicBool::new(false),
        }
    }
}

enum Reply {
    Info(ClusterInfo),
    Fail(Status),
    Hang,
}

/// Gossip client answering from a per-endpoint script. Endpoints without a script fail as
/// unavailable. The last scripted reply of an endpoint repeats forever.
#[derive(Default)]
pub struct ScriptedGossip {
    replies: Mutex<HashMap<Endpoint, VecDeque<Reply>>>,
    calls: Mutex<Vec<Endpoint>>,
}

impl ScriptedGossip {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, endpoint: &Endpoint, reply: Reply) {
        self.replies
            .lock()
            .entry(endpoint.clone())
            .or_default()
            .push_back(reply);
    }

    pub fn answer(&self, endpoint: &Endpoint, info: ClusterInfo) {
        self.push(endpoint, Reply::Info(info));
    }

    pub fn fail(&self, endpoint: &Endpoint, status: Status) {
        self.push(endpoint, Reply::Fail(status));
    }

    pub fn hang(&self, endpoint: &Endpoint) {
        self.push(endpoint, Reply::Hang);
    }

    pub fn calls(&self) -> Vec<Endpoint> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_reply(&self, endpoint: &Endpoint) -> Option<Reply> {
        let mut replies = self.replies.lock();
        let queue = replies.get_mut(endpoint)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().map(|reply| match reply {
                Reply::Info(info) => Reply::Info(info.clone()),
                Reply::Fail(status) => Reply::Fail(status.clone()),
                Reply::Hang => Reply::Hang,
            })
        }
    }
}

#[async_trait]
impl GossipClient<FakeChannel> for ScriptedGossip {
    async fn read(&self, channel: &FakeChannel) -> Result<ClusterInfo, Status> {
        let endpoint = channel.endpoint().clone();
        self.calls.lock().push(endpoint.clone());
        match self.next_reply(&endpoint) {
            Some(Reply::Info(info)) => Ok(info),
            Some(Reply::Fail(status)) => Err(status),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Status::deadline_exceeded("hung gossip"))
            }
            None => Err(Status::unavailable(format!("{} is down", endpoint))),
        }
    }
}

pub fn member(host: &str, state: MemberState) -> ClusterMember {
    ClusterMember::new(Endpoint::new(host, 2113), state)
}

pub fn cluster_info(members: &[(&str, MemberState)]) -> ClusterInfo {
    members.iter().map(|(host, state)| member(host, *state)).collect()
}

use async_trait::async_trait;

use esdb_core::member::ClusterInfo;
use esdb_core::status::Status;

/// Issues one gossip query over a channel. Implemented by the transport layer.
#[async_trait]
pub trait GossipClient<C>: Send + Sync + 'static {
    async fn read(&self, channel: &C) -> Result<ClusterInfo, Status>;
}

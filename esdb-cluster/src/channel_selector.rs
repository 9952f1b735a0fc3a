use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use esdb_core::endpoint::Endpoint;
use esdb_core::error::Result;

use crate::channel::Channel;
use crate::channel_cache::ChannelCache;

/// Resolves the channel a call should use.
#[async_trait]
pub trait ChannelSelector<C>: Send + Sync + 'static {
    /// Full resolution, running discovery when the selector needs it.
    async fn select_channel(&self, cancel: &CancellationToken) -> Result<Arc<C>>;

    /// Direct resolution when the target is already known, e.g. a reported leader.
    fn select_channel_for(&self, endpoint: &Endpoint) -> Arc<C>;
}

/// Selector for a single configured node. It never queries gossip.
#[derive(Debug)]
pub struct SingleNodeChannelSelector<C: Channel> {
    endpoint: Endpoint,
    channels: Arc<ChannelCache<C>>,
}

impl<C> SingleNodeChannelSelector<C>
where
    C: Channel,
{
    pub fn new(endpoint: Endpoint, channels: Arc<ChannelCache<C>>) -> Self {
        Self { endpoint, channels }
    }
}

#[async_trait]
impl<C> ChannelSelector<C> for SingleNodeChannelSelector<C>
where
    C: Channel,
{
    async fn select_channel(&self, _cancel: &CancellationToken) -> Result<Arc<C>> {
        Ok(self.channels.get_or_create(&self.endpoint))
    }

    fn select_channel_for(&self, endpoint: &Endpoint) -> Arc<C> {
        self.channels.get_or_create(endpoint)
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use esdb_core::endpoint::Endpoint;
use esdb_core::error::{Error, Result};
use esdb_core::node_preference::NodePreference;
use esdb_core::settings::ClientSettings;

use crate::channel::Channel;
use crate::channel_cache::ChannelCache;
use crate::channel_selector::ChannelSelector;
use crate::gossip::GossipClient;
use crate::node_selector::NodeSelector;

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub seeds: Vec<Endpoint>,
    pub node_preference: NodePreference,
    pub max_discover_attempts: usize,
    pub discovery_interval: Duration,
    pub gossip_timeout: Duration,
}

impl From<&ClientSettings> for DiscoverySettings {
    fn from(value: &ClientSettings) -> Self {
        Self {
            seeds: value.seeds.clone(),
            node_preference: value.node_preference,
            max_discover_attempts: value.max_discover_attempts,
            discovery_interval: value.discovery_interval(),
            gossip_timeout: value.gossip_timeout(),
        }
    }
}

/// Finds a node through gossip. This loop is the only place topology resolution is retried.
pub struct GossipChannelSelector<C: Channel> {
    settings: DiscoverySettings,
    channels: Arc<ChannelCache<C>>,
    gossip_client: Arc<dyn GossipClient<C>>,
    node_selector: NodeSelector,
    span: Span,
}

impl<C> GossipChannelSelector<C>
where
    C: Channel,
{
    pub fn new(
        settings: DiscoverySettings,
        channels: Arc<ChannelCache<C>>,
        gossip_client: Arc<dyn GossipClient<C>>,
    ) -> Self {
        let span = info_span!("gossip_channel_selector", preference = %settings.node_preference);
        Self::with_span(settings, channels, gossip_client, span)
    }

    pub fn with_span(
        settings: DiscoverySettings,
        channels: Arc<ChannelCache<C>>,
        gossip_client: Arc<dyn GossipClient<C>>,
        span: Span,
    ) -> Self {
        channels.reconcile(settings.seeds.iter().cloned());
        let node_selector = NodeSelector::new(settings.node_preference);
        Self {
            settings,
            channels,
            gossip_client,
            node_selector,
            span,
        }
    }

    pub fn channels(&self) -> &Arc<ChannelCache<C>> {
        &self.channels
    }

    async fn discover(&self, cancel: &CancellationToken) -> Result<Endpoint> {
        let max_attempts = self.settings.max_discover_attempts;
        for attempt in 1..=max_attempts {
            for (endpoint, channel) in self.channels.snapshot_random_order() {
                let gossip = tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    gossip = tokio::time::timeout(self.settings.gossip_timeout, self.gossip_client.read(&channel)) => gossip,
                };
                let failure = match gossip {
                    Ok(Ok(info)) => match self.node_selector.select(&info) {
                        Some(selected) => {
                            debug!("{} from {}", info, endpoint);
                            self.channels.reconcile(info.endpoints().cloned());
                            return Ok(selected);
                        }
                        None => format!("no {} node in {}", self.settings.node_preference, info),
                    },
                    Ok(Err(status)) => status.to_string(),
                    Err(_) => format!("gossip timed out after {:?}", self.settings.gossip_timeout),
                };
                let remaining = max_attempts - attempt;
                if attempt == max_attempts {
                    error!("could not discover candidate from {}: {}, attempts remaining: {}", endpoint, failure, remaining);
                } else if attempt == 1 {
                    debug!("could not discover candidate from {}: {}, attempts remaining: {}", endpoint, failure, remaining);
                } else {
                    warn!("could not discover candidate from {}: {}, attempts remaining: {}", endpoint, failure, remaining);
                }
            }
            self.channels.reconcile(self.settings.seeds.iter().cloned());
            if attempt < max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(self.settings.discovery_interval) => {}
                }
            }
        }
        error!("failed to discover candidate in {} attempts", max_attempts);
        Err(Error::Discovery { attempts: max_attempts })
    }
}

#[async_trait]
impl<C> ChannelSelector<C> for GossipChannelSelector<C>
where
    C: Channel,
{
    async fn select_channel(&self, cancel: &CancellationToken) -> Result<Arc<C>> {
        let endpoint = self.discover(cancel).instrument(self.span.clone()).await?;
        self.span.in_scope(|| info!("successfully discovered candidate at {}", endpoint));
        Ok(self.channels.get_or_create(&endpoint))
    }

    fn select_channel_for(&self, endpoint: &Endpoint) -> Arc<C> {
        self.channels.get_or_create(endpoint)
    }
}

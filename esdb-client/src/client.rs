use std::sync::Arc;

use tracing::info;
use typed_builder::TypedBuilder;

use esdb_cluster::channel::{Channel, ChannelFactory};
use esdb_cluster::channel_cache::ChannelCache;
use esdb_cluster::channel_selector::{ChannelSelector, SingleNodeChannelSelector};
use esdb_cluster::gossip::GossipClient;
use esdb_cluster::gossip_channel_selector::{DiscoverySettings, GossipChannelSelector};
use esdb_core::error::{Error, Result};
use esdb_core::settings::ClientSettings;

use crate::channel_provider::ChannelProvider;
use crate::interceptor::Interceptor;
use crate::subscription::catch_up::{
    CatchUpSubscription, SubscribeToAllOptions, SubscribeToStreamOptions, SubscriptionListener,
};
use crate::subscription::management::PersistentSubscriptions;
use crate::subscription::persistent::{
    PersistentSubscription, PersistentSubscriptionListener, SubscribeToPersistentSubscriptionOptions,
};
use crate::transport::{
    PersistentReadRequest, PersistentSubscriptionsTransport, PersistentTarget, StreamsTransport, SubscribeRequest,
    SubscribeTarget,
};

/// The RPC services the client dispatches to.
#[derive(TypedBuilder)]
pub struct ClientTransports<C> {
    pub streams: Arc<dyn StreamsTransport<C>>,
    pub persistent_subscriptions: Arc<dyn PersistentSubscriptionsTransport<C>>,
}

/// Entry point tying discovery, routing and the subscription engines together. Operations not
/// covered here go through [`EventStoreClient::interceptor`].
pub struct EventStoreClient<C: Channel> {
    settings: Arc<ClientSettings>,
    channels: Arc<ChannelCache<C>>,
    interceptor: Interceptor<C>,
    streams: Arc<dyn StreamsTransport<C>>,
    persistent_subscriptions: Arc<dyn PersistentSubscriptionsTransport<C>>,
}

impl<C> EventStoreClient<C>
where
    C: Channel,
{
    pub fn new<F>(
        settings: ClientSettings,
        channel_factory: F,
        gossip_client: Arc<dyn GossipClient<C>>,
        transports: ClientTransports<C>,
    ) -> Result<Self>
    where
        F: ChannelFactory<C>,
    {
        settings.validate()?;
        let channels = Arc::new(ChannelCache::new(channel_factory));
        let selector: Arc<dyn ChannelSelector<C>> = if settings.is_cluster() {
            info!("using gossip discovery over {} seeds", settings.seeds.len());
            let discovery = DiscoverySettings::from(&settings);
            Arc::new(GossipChannelSelector::new(discovery, channels.clone(), gossip_client))
        } else {
            let endpoint = settings
                .seeds
                .first()
                .cloned()
                .ok_or_else(|| Error::InvalidArgument("no seed endpoint configured".to_string()))?;
            info!("using single node {}", endpoint);
            Arc::new(SingleNodeChannelSelector::new(endpoint, channels.clone()))
        };
        let provider = Arc::new(ChannelProvider::new(selector));
        let interceptor = Interceptor::from_settings(&settings, provider);
        Ok(Self {
            settings: Arc::new(settings),
            channels,
            interceptor,
            streams: transports.streams,
            persistent_subscriptions: transports.persistent_subscriptions,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn channels(&self) -> &Arc<ChannelCache<C>> {
        &self.channels
    }

    pub fn interceptor(&self) -> &Interceptor<C> {
        &self.interceptor
    }

    pub fn subscribe_to_stream<L>(
        &self,
        stream: impl Into<String>,
        options: SubscribeToStreamOptions,
        listener: L,
    ) -> CatchUpSubscription
    where
        L: SubscriptionListener,
    {
        let request = SubscribeRequest {
            target: SubscribeTarget::Stream {
                stream: stream.into(),
                start: options.start,
            },
            resolve_link_tos: options.resolve_link_tos,
        };
        CatchUpSubscription::start(
            self.interceptor.clone(),
            self.streams.clone(),
            request,
            options.buffer_size,
            options.call,
            listener,
        )
    }

    /// Fails fast when the filter is invalid.
    pub fn subscribe_to_all<L>(&self, options: SubscribeToAllOptions, listener: L) -> Result<CatchUpSubscription>
    where
        L: SubscriptionListener,
    {
        if let Some(filter) = &options.filter {
            filter.validate()?;
        }
        let request = SubscribeRequest {
            target: SubscribeTarget::All {
                start: options.start,
                filter: options.filter,
            },
            resolve_link_tos: options.resolve_link_tos,
        };
        Ok(CatchUpSubscription::start(
            self.interceptor.clone(),
            self.streams.clone(),
            request,
            options.buffer_size,
            options.call,
            listener,
        ))
    }

    pub fn subscribe_to_persistent_subscription<L>(
        &self,
        stream: impl Into<String>,
        group: impl Into<String>,
        options: SubscribeToPersistentSubscriptionOptions,
        listener: L,
    ) -> PersistentSubscription
    where
        L: PersistentSubscriptionListener,
    {
        self.subscribe_persistent(PersistentTarget::Stream(stream.into()), group.into(), options, listener)
    }

    pub fn subscribe_to_persistent_subscription_to_all<L>(
        &self,
        group: impl Into<String>,
        options: SubscribeToPersistentSubscriptionOptions,
        listener: L,
    ) -> PersistentSubscription
    where
        L: PersistentSubscriptionListener,
    {
        self.subscribe_persistent(PersistentTarget::All, group.into(), options, listener)
    }

    pub fn persistent_subscriptions(&self) -> PersistentSubscriptions<C> {
        PersistentSubscriptions::new(self.interceptor.clone(), self.persistent_subscriptions.clone())
    }

    fn subscribe_persistent<L>(
        &self,
        target: PersistentTarget,
        group: String,
        options: SubscribeToPersistentSubscriptionOptions,
        listener: L,
    ) -> PersistentSubscription
    where
        L: PersistentSubscriptionListener,
    {
        let request = PersistentReadRequest {
            target,
            group,
            buffer_size: options.buffer_size,
        };
        PersistentSubscription::start(
            self.interceptor.clone(),
            self.persistent_subscriptions.clone(),
            request,
            options.call,
            listener,
        )
    }
}

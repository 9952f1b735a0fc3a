use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument, Span};

use esdb_cluster::channel::Channel;
use esdb_cluster::channel_selector::ChannelSelector;
use esdb_core::endpoint::Endpoint;
use esdb_core::error::Result;

use crate::reconnection::{ReconnectionRequired, ReconnectionSink};

enum Route<C> {
    Unresolved,
    Current(Arc<C>),
    Rediscover,
    Redirect(Endpoint),
}

impl<C: Channel> Debug for Route<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Unresolved => write!(f, "Unresolved"),
            Route::Current(channel) => write!(f, "Current({})", channel.endpoint()),
            Route::Rediscover => write!(f, "Rediscover"),
            Route::Redirect(endpoint) => write!(f, "Redirect({})", endpoint),
        }
    }
}

/// Keeps the channel calls are routed to until a failed call says otherwise.
///
/// The route is read lock-free on every call and replaced when a [`ReconnectionRequired`] signal
/// arrives. Concurrent calls that find the route invalidated each resolve it on their own.
pub struct ChannelProvider<C: Channel> {
    selector: Arc<dyn ChannelSelector<C>>,
    route: ArcSwap<Route<C>>,
    span: Span,
}

impl<C> ChannelProvider<C>
where
    C: Channel,
{
    pub fn new(selector: Arc<dyn ChannelSelector<C>>) -> Self {
        Self::with_span(selector, info_span!("channel_provider"))
    }

    pub fn with_span(selector: Arc<dyn ChannelSelector<C>>, span: Span) -> Self {
        Self {
            selector,
            route: ArcSwap::from_pointee(Route::Unresolved),
            span,
        }
    }

    /// Resolves the route if needed. A signal applied while resolution is in flight wins over
    /// the resolved channel.
    pub async fn current_channel(&self, cancel: &CancellationToken) -> Result<Arc<C>> {
        let entry = self.route.load_full();
        let redirect = match entry.as_ref() {
            Route::Current(channel) => return Ok(channel.clone()),
            Route::Redirect(endpoint) => Some(endpoint.clone()),
            Route::Unresolved | Route::Rediscover => None,
        };
        let channel = match redirect {
            Some(endpoint) => {
                let _enter = self.span.enter();
                info!("routing to reported leader {}", endpoint);
                self.selector.select_channel_for(&endpoint)
            }
            None => {
                self.selector
                    .select_channel(cancel)
                    .instrument(self.span.clone())
                    .await?
            }
        };
        let previous = self
            .route
            .compare_and_swap(&entry, Arc::new(Route::Current(channel.clone())));
        if !Arc::ptr_eq(&*previous, &entry) {
            let _enter = self.span.enter();
            debug!("route changed while resolving, keeping {:?}", &**previous);
        }
        Ok(channel)
    }

    /// The endpoint calls are currently routed to, if resolved.
    pub fn current_endpoint(&self) -> Option<Endpoint> {
        match self.route.load().as_ref() {
            Route::Current(channel) => Some(channel.endpoint().clone()),
            _ => None,
        }
    }

    pub fn apply(&self, signal: ReconnectionRequired) {
        let _enter = self.span.enter();
        match signal {
            ReconnectionRequired::None => {}
            ReconnectionRequired::Rediscover => {
                debug!("route invalidated, next call rediscovers");
                self.route.store(Arc::new(Route::Rediscover));
            }
            ReconnectionRequired::NewLeader(endpoint) => {
                debug!("route redirected to {}", endpoint);
                self.route.store(Arc::new(Route::Redirect(endpoint)));
            }
        }
    }
}

impl<C> ReconnectionSink for ChannelProvider<C>
where
    C: Channel,
{
    fn reconnection_required(&self, signal: ReconnectionRequired) {
        self.apply(signal);
    }
}

impl<C> Debug for ChannelProvider<C>
where
    C: Channel,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelProvider")
            .field("route", self.route.load().as_ref())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    use esdb_cluster::channel::Channel;
    use esdb_cluster::channel_cache::ChannelCache;
    use esdb_cluster::channel_selector::{ChannelSelector, SingleNodeChannelSelector};
    use esdb_cluster::testing::{FakeChannel, FakeChannelFactory};
    use esdb_core::endpoint::Endpoint;

    use crate::channel_provider::ChannelProvider;
    use crate::reconnection::ReconnectionRequired;

    fn provider(factory: FakeChannelFactory) -> ChannelProvider<FakeChannel> {
        let channels = Arc::new(ChannelCache::<FakeChannel>::new(factory));
        let selector = SingleNodeChannelSelector::new(Endpoint::new("a", 2113), channels);
        ChannelProvider::new(Arc::new(selector))
    }

    #[tokio::test]
    async fn route_is_sticky_until_signalled() -> anyhow::Result<()> {
        let factory = FakeChannelFactory::default();
        let provider = provider(factory.clone());
        let cancel = CancellationToken::new();
        assert_eq!(provider.current_endpoint(), None);
        let first = provider.current_channel(&cancel).await?;
        let second = provider.current_channel(&cancel).await?;
        assert!(Arc::ptr_eq(&first, &second));
        provider.apply(ReconnectionRequired::None);
        assert!(Arc::ptr_eq(&first, &provider.current_channel(&cancel).await?));
        assert_eq!(factory.created(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn new_leader_redirects_without_selection() -> anyhow::Result<()> {
        let provider = provider(FakeChannelFactory::default());
        let cancel = CancellationToken::new();
        provider.current_channel(&cancel).await?;
        provider.apply(ReconnectionRequired::NewLeader(Endpoint::new("b", 2113)));
        let channel = provider.current_channel(&cancel).await?;
        assert_eq!(channel.endpoint(), &Endpoint::new("b", 2113));
        assert_eq!(provider.current_endpoint(), Some(Endpoint::new("b", 2113)));
        Ok(())
    }

    #[tokio::test]
    async fn rediscover_goes_back_to_the_selector() -> anyhow::Result<()> {
        let provider = provider(FakeChannelFactory::default());
        let cancel = CancellationToken::new();
        provider.apply(ReconnectionRequired::NewLeader(Endpoint::new("b", 2113)));
        assert_eq!(provider.current_channel(&cancel).await?.endpoint(), &Endpoint::new("b", 2113));
        provider.apply(ReconnectionRequired::Rediscover);
        assert_eq!(provider.current_endpoint(), None);
        assert_eq!(provider.current_channel(&cancel).await?.endpoint(), &Endpoint::new("a", 2113));
        Ok(())
    }

    /// Parks resolution until released so tests can signal while it is in flight.
    struct PausedSelector {
        channels: Arc<ChannelCache<FakeChannel>>,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ChannelSelector<FakeChannel> for PausedSelector {
        async fn select_channel(&self, _cancel: &CancellationToken) -> esdb_core::error::Result<Arc<FakeChannel>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(self.channels.get_or_create(&Endpoint::new("a", 2113)))
        }

        fn select_channel_for(&self, endpoint: &Endpoint) -> Arc<FakeChannel> {
            self.channels.get_or_create(endpoint)
        }
    }

    #[tokio::test]
    async fn signal_during_resolution_is_not_overwritten() -> anyhow::Result<()> {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let selector = PausedSelector {
            channels: Arc::new(ChannelCache::<FakeChannel>::new(FakeChannelFactory::default())),
            entered: entered.clone(),
            release: release.clone(),
        };
        let provider = Arc::new(ChannelProvider::new(Arc::new(selector)));
        let resolving = tokio::spawn({
            let provider = provider.clone();
            async move { provider.current_channel(&CancellationToken::new()).await }
        });
        entered.notified().await;
        provider.apply(ReconnectionRequired::NewLeader(Endpoint::new("b", 2113)));
        release.notify_one();
        let resolved = resolving.await??;
        assert_eq!(resolved.endpoint(), &Endpoint::new("a", 2113));
        assert_eq!(provider.current_endpoint(), None);
        let next = provider.current_channel(&CancellationToken::new()).await?;
        assert_eq!(next.endpoint(), &Endpoint::new("b", 2113));
        Ok(())
    }
}

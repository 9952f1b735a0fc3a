use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use ahash::{HashSet, RandomState};
use dashmap::DashMap;
use rand::seq::SliceRandom;
use tracing::debug;

use esdb_core::endpoint::Endpoint;

use crate::channel::{Channel, ChannelFactory};

/// Endpoint to channel map shared by every selector and call of one client.
///
/// Readers never hold a lock while iterating: [`ChannelCache::snapshot_random_order`] copies the
/// entries out and releases the shard locks before returning.
pub struct ChannelCache<C: Channel> {
    factory: Box<dyn ChannelFactory<C>>,
    channels: DashMap<Endpoint, Arc<C>, RandomState>,
}

impl<C> ChannelCache<C>
where
    C: Channel,
{
    pub fn new<F>(factory: F) -> Self
    where
        F: ChannelFactory<C>,
    {
        Self {
            factory: Box::new(factory),
            channels: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Returns the cached channel or creates it. Concurrent callers for the same endpoint observe
    /// the same instance because creation happens under the entry's shard lock.
    pub fn get_or_create(&self, endpoint: &Endpoint) -> Arc<C> {
        if let Some(channel) = self.channels.get(endpoint) {
            return channel.value().clone();
        }
        self.channels
            .entry(endpoint.clone())
            .or_insert_with(|| {
                debug!("create channel to {}", endpoint);
                Arc::new(self.factory.create(endpoint))
            })
            .value()
            .clone()
    }

    pub fn snapshot_random_order(&self) -> Vec<(Endpoint, Arc<C>)> {
        let mut snapshot = self
            .channels
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect::<Vec<_>>();
        snapshot.shuffle(&mut rand::thread_rng());
        snapshot
    }

    /// Makes the cache hold exactly `endpoints`. Channels of endpoints that stay are kept as they
    /// are, channels of endpoints that left are removed and disposed.
    pub fn reconcile<I>(&self, endpoints: I)
    where
        I: IntoIterator<Item = Endpoint>,
    {
        let wanted = endpoints.into_iter().collect::<HashSet<_>>();
        let stale = self
            .channels
            .iter()
            .filter(|entry| !wanted.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        for endpoint in stale {
            if let Some((endpoint, channel)) = self.channels.remove(&endpoint) {
                debug!("dispose channel to {}, it left the cluster", endpoint);
                channel.dispose();
            }
        }
        for endpoint in &wanted {
            self.get_or_create(endpoint);
        }
    }

    pub fn get(&self, endpoint: &Endpoint) -> Option<Arc<C>> {
        self.channels.get(endpoint).map(|c| c.value().clone())
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.channels.contains_key(endpoint)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }
}

impl<C> Drop for ChannelCache<C>
where
    C: Channel,
{
    fn drop(&mut self) {
        for entry in self.channels.iter() {
            entry.value().dispose();
        }
    }
}

impl<C> Debug for ChannelCache<C>
where
    C: Channel,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let endpoints = self.channels.iter().map(|e| e.key().to_string()).collect::<Vec<_>>();
        f.debug_struct("ChannelCache")
            .field("endpoints", &endpoints)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use esdb_core::endpoint::Endpoint;

    use crate::channel::Channel;
    use crate::channel_cache::ChannelCache;
    use crate::testing::{FakeChannel, FakeChannelFactory};

    fn endpoints(hosts: &[&str]) -> Vec<Endpoint> {
        hosts.iter().map(|h| Endpoint::new(*h, 2113)).collect()
    }

    #[test]
    fn reconcile_is_idempotent() {
        let factory = FakeChannelFactory::default();
        let cache = ChannelCache::<FakeChannel>::new(factory.clone());
        cache.reconcile(endpoints(&["a", "b", "c"]));
        let before = cache.snapshot_random_order();
        cache.reconcile(endpoints(&["a", "b", "c"]));
        assert_eq!(factory.created(), 3);
        for (endpoint, channel) in before {
            let after = cache.get(&endpoint).unwrap();
            assert!(Arc::ptr_eq(&channel, &after));
        }
    }

    #[test]
    fn reconcile_keeps_survivors_and_disposes_leavers() {
        let factory = FakeChannelFactory::default();
        let cache = ChannelCache::<FakeChannel>::new(factory.clone());
        cache.reconcile(endpoints(&["a", "b"]));
        let a = cache.get(&Endpoint::new("a", 2113)).unwrap();
        let b = cache.get(&Endpoint::new("b", 2113)).unwrap();
        cache.reconcile(endpoints(&["a", "c"]));
        assert!(Arc::ptr_eq(&a, &cache.get(&Endpoint::new("a", 2113)).unwrap()));
        assert!(!a.is_disposed());
        assert!(b.is_disposed());
        assert!(!cache.contains(&Endpoint::new("b", 2113)));
        assert!(cache.contains(&Endpoint::new("c", 2113)));
        assert_eq!(factory.created(), 3);
    }

    #[test]
    fn snapshot_is_detached_from_later_mutation() {
        let cache = ChannelCache::<FakeChannel>::new(FakeChannelFactory::default());
        cache.reconcile(endpoints(&["a", "b", "c"]));
        let snapshot = cache.snapshot_random_order();
        cache.reconcile(endpoints(&["d"]));
        assert_eq!(snapshot.len(), 3);
        for (endpoint, channel) in &snapshot {
            assert_eq!(channel.endpoint(), endpoint);
        }
        assert_eq!(cache.endpoints(), endpoints(&["d"]));
    }

    #[test]
    fn concurrent_get_or_create_builds_once() {
        let factory = FakeChannelFactory::default();
        let cache = Arc::new(ChannelCache::<FakeChannel>::new(factory.clone()));
        let endpoint = Endpoint::new("a", 2113);
        let handles = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let endpoint = endpoint.clone();
                std::thread::spawn(move || cache.get_or_create(&endpoint))
            })
            .collect::<Vec<_>>();
        let channels = handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>();
        assert_eq!(factory.created(), 1);
        assert!(channels.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn concurrent_reconcile_converges() {
        let factory = FakeChannelFactory::default();
        let cache = Arc::new(ChannelCache::<FakeChannel>::new(factory.clone()));
        cache.reconcile(endpoints(&["x", "y"]));
        let handles = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.reconcile(endpoints(&["a", "b", "c"])))
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        let mut cached = cache.endpoints();
        cached.sort();
        assert_eq!(cached, endpoints(&["a", "b", "c"]));
        assert_eq!(factory.created(), 5);
    }
}

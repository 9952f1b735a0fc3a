use std::sync::Arc;

use tracing::info;

use esdb_cluster::channel::Channel;
use esdb_core::error::Result;
use esdb_core::position::Position;

use crate::call::CallOptions;
use crate::interceptor::Interceptor;
use crate::subscription::filter::FilterOptions;
use crate::subscription::persistent_settings::PersistentSubscriptionSettings;
use crate::transport::{PersistentDefinition, PersistentSubscriptionsTransport, PersistentTarget};

/// Group administration. Calls follow the client's node preference; set
/// [`CallOptions::requires_leader`] to route one call differently.
pub struct PersistentSubscriptions<C: Channel> {
    interceptor: Interceptor<C>,
    transport: Arc<dyn PersistentSubscriptionsTransport<C>>,
}

impl<C> PersistentSubscriptions<C>
where
    C: Channel,
{
    pub fn new(interceptor: Interceptor<C>, transport: Arc<dyn PersistentSubscriptionsTransport<C>>) -> Self {
        Self { interceptor, transport }
    }

    pub async fn create_to_stream(
        &self,
        stream: impl Into<String>,
        group: impl Into<String>,
        settings: PersistentSubscriptionSettings<u64>,
        options: &CallOptions,
    ) -> Result<()> {
        settings.validate()?;
        let definition = PersistentDefinition::Stream {
            stream: stream.into(),
            settings,
        };
        self.create(group.into(), definition, options).await
    }

    pub async fn create_to_all(
        &self,
        group: impl Into<String>,
        settings: PersistentSubscriptionSettings<Position>,
        filter: Option<FilterOptions>,
        options: &CallOptions,
    ) -> Result<()> {
        settings.validate()?;
        if let Some(filter) = &filter {
            filter.validate()?;
        }
        self.create(group.into(), PersistentDefinition::All { settings, filter }, options)
            .await
    }

    pub async fn update_to_stream(
        &self,
        stream: impl Into<String>,
        group: impl Into<String>,
        settings: PersistentSubscriptionSettings<u64>,
        options: &CallOptions,
    ) -> Result<()> {
        settings.validate()?;
        let definition = PersistentDefinition::Stream {
            stream: stream.into(),
            settings,
        };
        self.update(group.into(), definition, options).await
    }

    pub async fn update_to_all(
        &self,
        group: impl Into<String>,
        settings: PersistentSubscriptionSettings<Position>,
        options: &CallOptions,
    ) -> Result<()> {
        settings.validate()?;
        let definition = PersistentDefinition::All { settings, filter: None };
        self.update(group.into(), definition, options).await
    }

    pub async fn delete_to_stream(
        &self,
        stream: impl Into<String>,
        group: impl Into<String>,
        options: &CallOptions,
    ) -> Result<()> {
        self.delete(PersistentTarget::Stream(stream.into()), group.into(), options)
            .await
    }

    pub async fn delete_to_all(&self, group: impl Into<String>, options: &CallOptions) -> Result<()> {
        self.delete(PersistentTarget::All, group.into(), options).await
    }

    /// Moves parked events back into delivery. `stop_at` bounds how many are replayed.
    pub async fn replay_parked_messages(
        &self,
        target: PersistentTarget,
        group: impl Into<String>,
        stop_at: Option<u64>,
        options: &CallOptions,
    ) -> Result<()> {
        let group = group.into();
        info!("replaying parked messages of {}::{}", target, group);
        self.interceptor
            .unary(options, |context| {
                self.transport.replay_parked(context, target, group, stop_at)
            })
            .await
    }

    pub async fn restart_subsystem(&self, options: &CallOptions) -> Result<()> {
        info!("restarting persistent subscription subsystem");
        self.interceptor
            .unary(options, |context| self.transport.restart_subsystem(context))
            .await
    }

    async fn create(&self, group: String, definition: PersistentDefinition, options: &CallOptions) -> Result<()> {
        info!("creating persistent subscription {}::{}", definition.target(), group);
        self.interceptor
            .unary(options, |context| self.transport.create(context, group, definition))
            .await
    }

    async fn update(&self, group: String, definition: PersistentDefinition, options: &CallOptions) -> Result<()> {
        info!("updating persistent subscription {}::{}", definition.target(), group);
        self.interceptor
            .unary(options, |context| self.transport.update(context, group, definition))
            .await
    }

    async fn delete(&self, target: PersistentTarget, group: String, options: &CallOptions) -> Result<()> {
        info!("deleting persistent subscription {}::{}", target, group);
        self.interceptor
            .unary(options, |context| self.transport.delete(context, target, group))
            .await
    }
}

impl<C> Clone for PersistentSubscriptions<C>
where
    C: Channel,
{
    fn clone(&self) -> Self {
        Self {
            interceptor: self.interceptor.clone(),
            transport: self.transport.clone(),
        }
    }
}

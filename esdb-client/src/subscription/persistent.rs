use std::sync::Arc;

use ahash::HashSet;
use anyhow::anyhow;
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use esdb_cluster::channel::Channel;
use esdb_core::error::{Error, Result};
use esdb_core::event::ResolvedEvent;

use crate::call::CallOptions;
use crate::interceptor::Interceptor;
use crate::subscription::{spawn_reader, DropReason, Inbound, SubscriptionShared, SubscriptionState};
use crate::transport::{
    NackAction, PersistentReadRequest, PersistentRequest, PersistentResponse, PersistentSubscriptionsTransport,
    RequestStream,
};

#[derive(Debug, Clone, TypedBuilder)]
pub struct SubscribeToPersistentSubscriptionOptions {
    /// Events the server may have in flight to this consumer before it waits for acks.
    #[builder(default = 10)]
    pub buffer_size: usize,
    #[builder(default)]
    pub call: CallOptions,
}

impl Default for SubscribeToPersistentSubscriptionOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[async_trait]
pub trait PersistentSubscriptionListener: Send + 'static {
    /// `retry_count` is zero on first delivery. Ack or nack through `subscription`.
    async fn on_event(
        &mut self,
        subscription: &PersistentSubscription,
        event: ResolvedEvent,
        retry_count: u32,
    ) -> anyhow::Result<()>;

    async fn on_dropped(&mut self, _reason: DropReason, _error: Option<&Error>) {}
}

#[derive(Debug)]
struct PersistentShared {
    lifecycle: SubscriptionShared,
    requests: UnboundedSender<PersistentRequest>,
    outstanding: Mutex<HashSet<Uuid>>,
}

/// One consumer of a persistent subscription group.
#[derive(Debug, Clone)]
pub struct PersistentSubscription {
    shared: Arc<PersistentShared>,
}

impl PersistentSubscription {
    pub(crate) fn start<C, L>(
        interceptor: Interceptor<C>,
        transport: Arc<dyn PersistentSubscriptionsTransport<C>>,
        request: PersistentReadRequest,
        call: CallOptions,
        listener: L,
    ) -> Self
    where
        C: Channel,
        L: PersistentSubscriptionListener,
    {
        let cancel = call.cancellation.child_token();
        let call = call.cancellation(cancel.clone());
        let (requests, outgoing) = unbounded();
        let shared = Arc::new(PersistentShared {
            lifecycle: SubscriptionShared::new(cancel),
            requests,
            outstanding: Mutex::new(HashSet::default()),
        });
        let subscription = Self { shared };
        let span = info_span!("persistent_subscription", target = %request.target, group = %request.group);
        let dispatcher = Dispatcher {
            subscription: subscription.clone(),
            listener,
            span: span.clone(),
        };
        tokio::spawn(
            dispatcher
                .run(interceptor, transport, request, outgoing.boxed(), call)
                .instrument(span),
        );
        subscription
    }

    pub fn state(&self) -> SubscriptionState {
        self.shared.lifecycle.state()
    }

    pub fn subscription_id(&self) -> Option<String> {
        self.shared.lifecycle.subscription_id()
    }

    /// Acknowledges events delivered to this consumer in one request. Ids this consumer does not
    /// hold are ignored.
    pub fn ack<I>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = Uuid>,
    {
        self.ensure_active()?;
        let ids = self.settle(ids);
        if ids.is_empty() {
            return Ok(());
        }
        self.send(PersistentRequest::Ack { ids })
    }

    pub fn ack_event(&self, event: &ResolvedEvent) -> Result<()> {
        self.ack(event.id())
    }

    pub fn nack<I>(&self, action: NackAction, reason: impl Into<String>, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = Uuid>,
    {
        self.ensure_active()?;
        let ids = self.settle(ids);
        if ids.is_empty() {
            return Ok(());
        }
        self.send(PersistentRequest::Nack {
            ids,
            action,
            reason: reason.into(),
        })
    }

    pub fn nack_event(&self, action: NackAction, reason: impl Into<String>, event: &ResolvedEvent) -> Result<()> {
        self.nack(action, reason, event.id())
    }

    /// Number of delivered events not yet acked or nacked.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.lock().len()
    }

    pub fn dispose(&self) {
        self.shared.lifecycle.cancel.cancel();
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.shared.lifecycle.cancel
    }

    pub fn drop_reason(&self) -> Option<DropReason> {
        self.shared.lifecycle.drop_reason()
    }

    pub async fn dropped(&self) -> DropReason {
        self.shared.lifecycle.wait_dropped().await
    }

    fn settle<I>(&self, ids: I) -> Vec<Uuid>
    where
        I: IntoIterator<Item = Uuid>,
    {
        let mut outstanding = self.shared.outstanding.lock();
        ids.into_iter()
            .filter(|id| {
                let held = outstanding.remove(id);
                if !held {
                    warn!("ignoring settlement of {} which this consumer does not hold", id);
                }
                held
            })
            .collect()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.shared.lifecycle.cancel.is_cancelled() {
            return Err(Error::PersistentSubscriptionDropped);
        }
        Ok(())
    }

    fn send(&self, request: PersistentRequest) -> Result<()> {
        self.shared
            .requests
            .unbounded_send(request)
            .map_err(|_| Error::PersistentSubscriptionDropped)
    }

    fn track(&self, id: Uuid) {
        self.shared.outstanding.lock().insert(id);
    }
}

struct Dispatcher<L> {
    subscription: PersistentSubscription,
    listener: L,
    span: Span,
}

impl<L> Dispatcher<L>
where
    L: PersistentSubscriptionListener,
{
    async fn run<C>(
        mut self,
        interceptor: Interceptor<C>,
        transport: Arc<dyn PersistentSubscriptionsTransport<C>>,
        request: PersistentReadRequest,
        outgoing: RequestStream<PersistentRequest>,
        call: CallOptions,
    ) where
        C: Channel,
    {
        let buffer_size = request.buffer_size;
        let stream = interceptor
            .duplex_streaming(&call, |context| transport.read(context, request, outgoing))
            .await;
        let (reason, error) = match stream {
            Ok(stream) => {
                let cancel = self.subscription.shared.lifecycle.cancel.clone();
                let inbound = spawn_reader(stream, buffer_size, cancel, self.span.clone());
                self.consume(inbound).await
            }
            Err(error) => (DropReason::from_error(&error), Some(error)),
        };
        let error = error.filter(|_| reason != DropReason::Disposed);
        match &error {
            Some(error) => warn!("subscription dropped: {}, {}", reason, error),
            None => info!("subscription dropped: {}", reason),
        }
        self.subscription.shared.requests.close_channel();
        self.listener.on_dropped(reason, error.as_ref()).await;
        self.subscription.shared.lifecycle.finish(reason);
    }

    async fn consume(&mut self, mut inbound: mpsc::Receiver<Inbound<PersistentResponse>>) -> (DropReason, Option<Error>) {
        let cancel = self.subscription.shared.lifecycle.cancel.clone();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = inbound.recv() => next,
            };
            if cancel.is_cancelled() {
                return (DropReason::Disposed, None);
            }
            let response = match next {
                Some(Inbound::Message(response)) => response,
                Some(Inbound::Failed(error)) => return (DropReason::from_error(&error), Some(error)),
                Some(Inbound::Ended) | None => {
                    return (DropReason::ServerError, Some(Error::Other(anyhow!("server ended the subscription"))));
                }
            };
            let lifecycle = &self.subscription.shared.lifecycle;
            match response {
                PersistentResponse::Confirmation { subscription_id } => {
                    lifecycle.confirm(subscription_id);
                    lifecycle.transition(SubscriptionState::Live);
                }
                PersistentResponse::Event { event, retry_count } => {
                    if lifecycle.state() == SubscriptionState::Initializing {
                        lifecycle.transition(SubscriptionState::Live);
                    }
                    let Some(id) = event.id() else {
                        warn!("skipping delivery without a record");
                        continue;
                    };
                    let retry_count = retry_count.unwrap_or_default();
                    debug!("delivering {} with retry count {}", id, retry_count);
                    self.subscription.track(id);
                    if let Err(error) = self.listener.on_event(&self.subscription, event, retry_count).await {
                        return (DropReason::SubscriberError, Some(Error::Other(error)));
                    }
                }
            }
        }
    }
}

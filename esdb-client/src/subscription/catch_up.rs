use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument, Span};
use typed_builder::TypedBuilder;

use esdb_cluster::channel::Channel;
use esdb_core::error::{Error, Result};
use esdb_core::event::ResolvedEvent;
use esdb_core::position::{Checkpoint, Position, StreamStart};

use crate::call::CallOptions;
use crate::interceptor::Interceptor;
use crate::subscription::filter::FilterOptions;
use crate::subscription::{spawn_reader, DropReason, Inbound, SubscriptionShared, SubscriptionState};
use crate::transport::{ReadResponse, StreamsTransport, SubscribeRequest, SubscribeTarget};

#[derive(Debug, Clone, TypedBuilder)]
pub struct SubscribeToStreamOptions {
    #[builder(default)]
    pub start: StreamStart<u64>,
    #[builder(default)]
    pub resolve_link_tos: bool,
    /// Capacity of the queue between the transport and the listener.
    #[builder(default = 32)]
    pub buffer_size: usize,
    #[builder(default)]
    pub call: CallOptions,
}

impl Default for SubscribeToStreamOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SubscribeToStreamOptions {
    /// Continues after `checkpoint`, usually [`CatchUpSubscription::last_position`] of a dropped
    /// subscription. `None` keeps the configured start.
    pub fn resume_from(mut self, checkpoint: Option<Checkpoint>) -> Result<Self> {
        match checkpoint {
            None => {}
            Some(Checkpoint::Revision(revision)) => self.start = StreamStart::After(revision),
            Some(Checkpoint::Position(position)) => {
                return Err(Error::InvalidArgument(format!(
                    "stream subscriptions resume from a revision, got position {}",
                    position
                )));
            }
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct SubscribeToAllOptions {
    #[builder(default)]
    pub start: StreamStart<Position>,
    #[builder(default, setter(strip_option))]
    pub filter: Option<FilterOptions>,
    #[builder(default)]
    pub resolve_link_tos: bool,
    #[builder(default = 32)]
    pub buffer_size: usize,
    #[builder(default)]
    pub call: CallOptions,
}

impl Default for SubscribeToAllOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SubscribeToAllOptions {
    pub fn resume_from(mut self, checkpoint: Option<Checkpoint>) -> Result<Self> {
        match checkpoint {
            None => {}
            Some(Checkpoint::Position(position)) => self.start = StreamStart::After(position),
            Some(Checkpoint::Revision(revision)) => {
                return Err(Error::InvalidArgument(format!(
                    "all-stream subscriptions resume from a position, got revision {}",
                    revision
                )));
            }
        }
        Ok(self)
    }
}

/// Callbacks of a catch-up subscription, invoked one at a time in delivery order.
///
/// Once the subscription is disposed only [`SubscriptionListener::on_dropped`] runs.
#[async_trait]
pub trait SubscriptionListener: Send + 'static {
    async fn on_event(&mut self, event: ResolvedEvent) -> anyhow::Result<()>;

    async fn on_checkpoint(&mut self, _position: Position) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_caught_up(&mut self) {}

    async fn on_fell_behind(&mut self) {}

    async fn on_dropped(&mut self, _reason: DropReason, _error: Option<&Error>) {}
}

#[derive(Debug)]
struct CatchUpShared {
    lifecycle: SubscriptionShared,
    last_position: Mutex<Option<Checkpoint>>,
}

/// Handle to a running catch-up subscription. Dropping the handle does not stop it,
/// [`CatchUpSubscription::dispose`] does.
#[derive(Debug, Clone)]
pub struct CatchUpSubscription {
    shared: Arc<CatchUpShared>,
}

impl CatchUpSubscription {
    pub(crate) fn start<C, L>(
        interceptor: Interceptor<C>,
        transport: Arc<dyn StreamsTransport<C>>,
        request: SubscribeRequest,
        buffer_size: usize,
        call: CallOptions,
        listener: L,
    ) -> Self
    where
        C: Channel,
        L: SubscriptionListener,
    {
        let cancel = call.cancellation.child_token();
        let call = call.cancellation(cancel.clone());
        let shared = Arc::new(CatchUpShared {
            lifecycle: SubscriptionShared::new(cancel),
            last_position: Mutex::new(None),
        });
        let span = info_span!("catch_up_subscription", target = %request.target);
        let dispatcher = Dispatcher {
            shared: shared.clone(),
            listener,
            guard: OrderGuard::for_target(&request.target),
            span: span.clone(),
        };
        tokio::spawn(
            dispatcher
                .run(interceptor, transport, request, buffer_size, call)
                .instrument(span),
        );
        Self { shared }
    }

    pub fn state(&self) -> SubscriptionState {
        self.shared.lifecycle.state()
    }

    pub fn subscription_id(&self) -> Option<String> {
        self.shared.lifecycle.subscription_id()
    }

    /// The last event or checkpoint position the listener accepted.
    pub fn last_position(&self) -> Option<Checkpoint> {
        *self.shared.last_position.lock()
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

    /// Resolves once the listener has seen `on_dropped`.
    pub async fn dropped(&self) -> DropReason {
        self.shared.lifecycle.wait_dropped().await
    }
}

/// Rejects events that do not move strictly forward.
#[derive(Debug)]
enum OrderGuard {
    Stream { last: Option<u64> },
    All { last: Option<Position> },
}

impl OrderGuard {
    fn for_target(target: &SubscribeTarget) -> Self {
        match target {
            SubscribeTarget::Stream { .. } => OrderGuard::Stream { last: None },
            SubscribeTarget::All { .. } => OrderGuard::All { last: None },
        }
    }

    fn tracks_position(&self) -> bool {
        matches!(self, OrderGuard::All { .. })
    }

    fn admit(&mut self, event: &ResolvedEvent) -> Option<Checkpoint> {
        let Some(original) = event.original_event() else {
            warn!("skipping delivery without a record");
            return None;
        };
        match self {
            OrderGuard::Stream { last } => {
                if let Some(last) = last.filter(|last| original.revision <= *last) {
                    warn!(
                        "skipping {}@{}, revision {} already delivered",
                        original.stream_id, original.revision, last
                    );
                    return None;
                }
                *last = Some(original.revision);
                Some(Checkpoint::Revision(original.revision))
            }
            OrderGuard::All { last } => {
                if let Some(last) = last.filter(|last| original.position <= *last) {
                    warn!("skipping event at {}, position {} already delivered", original.position, last);
                    return None;
                }
                *last = Some(original.position);
                Some(Checkpoint::Position(original.position))
            }
        }
    }
}

struct Dispatcher<L> {
    shared: Arc<CatchUpShared>,
    listener: L,
    guard: OrderGuard,
    span: Span,
}

impl<L> Dispatcher<L>
where
    L: SubscriptionListener,
{
    async fn run<C>(
        mut self,
        interceptor: Interceptor<C>,
        transport: Arc<dyn StreamsTransport<C>>,
        request: SubscribeRequest,
        buffer_size: usize,
        call: CallOptions,
    ) where
        C: Channel,
    {
        let stream = interceptor
            .server_streaming(&call, |context| transport.subscribe(context, request))
            .await;
        let (reason, error) = match stream {
            Ok(stream) => {
                let cancel = self.shared.lifecycle.cancel.clone();
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
        self.listener.on_dropped(reason, error.as_ref()).await;
        self.shared.lifecycle.finish(reason);
    }

    async fn consume(&mut self, mut inbound: mpsc::Receiver<Inbound<ReadResponse>>) -> (DropReason, Option<Error>) {
        let cancel = self.shared.lifecycle.cancel.clone();
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
            if let Err(error) = self.handle(response).await {
                return (DropReason::SubscriberError, Some(Error::Other(error)));
            }
        }
    }

    async fn handle(&mut self, response: ReadResponse) -> anyhow::Result<()> {
        let lifecycle = &self.shared.lifecycle;
        match response {
            ReadResponse::Confirmation { subscription_id } => {
                lifecycle.confirm(subscription_id);
                lifecycle.transition(SubscriptionState::CatchingUp);
            }
            ReadResponse::Event(event) => {
                if lifecycle.state() == SubscriptionState::Initializing {
                    lifecycle.transition(SubscriptionState::CatchingUp);
                }
                if let Some(checkpoint) = self.guard.admit(&event) {
                    self.listener.on_event(event).await?;
                    *self.shared.last_position.lock() = Some(checkpoint);
                }
            }
            ReadResponse::Checkpoint(position) => {
                self.listener.on_checkpoint(position).await?;
                if self.guard.tracks_position() {
                    *self.shared.last_position.lock() = Some(Checkpoint::Position(position));
                }
            }
            ReadResponse::CaughtUp => {
                if lifecycle.transition(SubscriptionState::Live) {
                    self.listener.on_caught_up().await;
                }
            }
            ReadResponse::FellBehind => {
                if lifecycle.transition(SubscriptionState::CatchingUp) {
                    self.listener.on_fell_behind().await;
                }
            }
        }
        Ok(())
    }
}

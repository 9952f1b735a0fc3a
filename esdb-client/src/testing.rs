//! In-memory stand-ins for the streams and persistent-subscription services.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc as stream_channel;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use uuid::Uuid;

use esdb_cluster::channel::Channel;
use esdb_cluster::channel_cache::ChannelCache;
use esdb_cluster::channel_selector::SingleNodeChannelSelector;
use esdb_cluster::testing::{FakeChannel, FakeChannelFactory};
use esdb_core::endpoint::Endpoint;
use esdb_core::error::Error;
use esdb_core::event::{RecordedEvent, ResolvedEvent};
use esdb_core::node_preference::NodePreference;
use esdb_core::position::{Position, StreamStart};
use esdb_core::status::{exception, Code, Metadata, Status, EXCEPTION, GROUP_NAME, REQUIRES_LEADER, STREAM_NAME};

use crate::call::CallContext;
use crate::channel_provider::ChannelProvider;
use crate::interceptor::Interceptor;
use crate::subscription::catch_up::SubscriptionListener;
use crate::subscription::filter::FilterMatcher;
use crate::subscription::persistent::{PersistentSubscription, PersistentSubscriptionListener};
use crate::subscription::DropReason;
use crate::transport::{
    NackAction, PersistentDefinition, PersistentReadRequest, PersistentRequest, PersistentResponse,
    PersistentSubscriptionsTransport, PersistentTarget, ReadResponse, RequestStream, ResponseStream, StreamsTransport, SubscribeRequest,
    SubscribeTarget, ALL_STREAM,
};

/// Interceptor bound to a single node at `localhost:2113`.
pub fn single_node_interceptor() -> Interceptor<FakeChannel> {
    let channels = Arc::new(ChannelCache::new(FakeChannelFactory::default()));
    let selector = SingleNodeChannelSelector::new(Endpoint::new("localhost", 2113), channels);
    let provider = Arc::new(ChannelProvider::new(Arc::new(selector)));
    Interceptor::new(provider, NodePreference::Leader, None)
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Rejects leader-only calls that reach any node other than the configured leader, and replays
/// injected faults before serving.
#[derive(Debug, Default)]
struct Gate {
    leader: Mutex<Option<Endpoint>>,
    faults: Mutex<VecDeque<Status>>,
    calls: Mutex<Vec<(Endpoint, Metadata)>>,
}

impl Gate {
    fn admit<C: Channel>(&self, context: &CallContext<C>) -> Result<(), Status> {
        let endpoint = context.channel.endpoint().clone();
        self.calls.lock().push((endpoint.clone(), context.metadata.clone()));
        if let Some(status) = self.faults.lock().pop_front() {
            return Err(status);
        }
        let requires_leader = context.metadata.get(REQUIRES_LEADER) == Some("true");
        match self.leader.lock().as_ref() {
            Some(leader) if requires_leader && leader != &endpoint => Err(Status::not_leader(leader)),
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
struct Log {
    events: Vec<RecordedEvent>,
    revisions: HashMap<String, u64>,
}

/// An append-only log serving catch-up subscriptions.
#[derive(Debug)]
pub struct InMemoryStreams {
    log: Mutex<Log>,
    live: broadcast::Sender<RecordedEvent>,
    gate: Gate,
}

impl InMemoryStreams {
    pub fn new() -> Arc<Self> {
        let (live, _) = broadcast::channel(1024);
        Arc::new(Self {
            log: Mutex::new(Log {
                events: Vec::new(),
                revisions: HashMap::new(),
            }),
            live,
            gate: Gate::default(),
        })
    }

    pub fn append(&self, stream: &str, event_type: &str) -> RecordedEvent {
        let mut log = self.log.lock();
        let revision = *log
            .revisions
            .entry(stream.to_string())
            .and_modify(|revision| *revision += 1)
            .or_insert(0);
        let commit = (log.events.len() as u64 + 1) * 100;
        let event = RecordedEvent {
            id: Uuid::new_v4(),
            stream_id: stream.to_string(),
            revision,
            position: Position::new(commit, commit),
            event_type: event_type.to_string(),
            is_json: true,
            metadata: HashMap::new(),
            custom_metadata: Bytes::new(),
            data: Bytes::from(format!("{{\"revision\":{}}}", revision)),
        };
        log.events.push(event.clone());
        let _ = self.live.send(event.clone());
        event
    }

    pub fn append_many(&self, stream: &str, event_type: &str, count: usize) -> Vec<RecordedEvent> {
        (0..count).map(|_| self.append(stream, event_type)).collect()
    }

    pub fn set_leader(&self, leader: Endpoint) {
        *self.gate.leader.lock() = Some(leader);
    }

    pub fn fail_next(&self, status: Status) {
        self.gate.faults.lock().push_back(status);
    }

    pub fn calls(&self) -> Vec<Endpoint> {
        self.gate.calls.lock().iter().map(|(endpoint, _)| endpoint.clone()).collect()
    }

    pub fn last_metadata(&self) -> Option<Metadata> {
        self.gate.calls.lock().last().map(|(_, metadata)| metadata.clone())
    }

    /// History and a live feed taken atomically, so nothing falls between them.
    fn tail(&self) -> (Vec<RecordedEvent>, broadcast::Receiver<RecordedEvent>) {
        let log = self.log.lock();
        (log.events.clone(), self.live.subscribe())
    }
}

struct Cursor {
    target: SubscribeTarget,
    matcher: Option<FilterMatcher>,
    checkpoint_interval: u64,
    skipped: u64,
    last: Option<Position>,
}

impl Cursor {
    fn new(target: SubscribeTarget) -> Result<Self, Status> {
        let (matcher, checkpoint_interval) = match &target {
            SubscribeTarget::All { filter: Some(filter), .. } => {
                let matcher = filter
                    .filter
                    .matcher()
                    .map_err(|error| Status::new(Code::InvalidArgument, error.to_string()))?;
                (Some(matcher), filter.checkpoint_interval().max(1))
            }
            _ => (None, u64::MAX),
        };
        Ok(Self {
            target,
            matcher,
            checkpoint_interval,
            skipped: 0,
            last: None,
        })
    }

    fn from_end(&self) -> bool {
        matches!(
            self.target,
            SubscribeTarget::Stream { start: StreamStart::End, .. } | SubscribeTarget::All { start: StreamStart::End, .. }
        )
    }

    fn next(&mut self, event: &RecordedEvent) -> Option<ReadResponse> {
        if self.last.is_some_and(|last| event.position <= last) {
            return None;
        }
        self.last = Some(event.position);
        match &self.target {
            SubscribeTarget::Stream { stream, start } => {
                let after = match start {
                    StreamStart::After(revision) => event.revision > *revision,
                    _ => true,
                };
                (&event.stream_id == stream && after).then(|| ReadResponse::Event(ResolvedEvent::from_event(event.clone())))
            }
            SubscribeTarget::All { start, .. } => {
                if let StreamStart::After(position) = start {
                    if event.position <= *position {
                        return None;
                    }
                }
                match &self.matcher {
                    Some(matcher) if !matcher.matches(event) => {
                        self.skipped += 1;
                        if self.skipped >= self.checkpoint_interval {
                            self.skipped = 0;
                            Some(ReadResponse::Checkpoint(event.position))
                        } else {
                            None
                        }
                    }
                    _ => Some(ReadResponse::Event(ResolvedEvent::from_event(event.clone()))),
                }
            }
        }
    }
}

#[async_trait]
impl<C> StreamsTransport<C> for InMemoryStreams
where
    C: Channel,
{
    async fn subscribe(&self, context: CallContext<C>, request: SubscribeRequest) -> Result<ResponseStream<ReadResponse>, Status> {
        self.gate.admit(&context)?;
        let mut cursor = Cursor::new(request.target)?;
        let (history, mut live) = self.tail();
        let (mut tx, rx) = stream_channel::channel(16);
        tokio::spawn(async move {
            let serve = async {
                let subscription_id = Uuid::new_v4().to_string();
                tx.send(Ok(ReadResponse::Confirmation { subscription_id })).await?;
                if !cursor.from_end() {
                    for event in &history {
                        if let Some(response) = cursor.next(event) {
                            tx.send(Ok(response)).await?;
                        }
                    }
                }
                tx.send(Ok(ReadResponse::CaughtUp)).await?;
                loop {
                    match live.recv().await {
                        Ok(event) => {
                            if let Some(response) = cursor.next(&event) {
                                tx.send(Ok(response)).await?;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            tx.send(Ok(ReadResponse::FellBehind)).await?;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                Ok::<_, stream_channel::SendError>(())
            };
            let _ = serve.await;
        });
        Ok(rx.boxed())
    }
}

fn group_status(code: Code, exception: &str, target: &str, group: &str) -> Status {
    let metadata = Metadata::new()
        .with(EXCEPTION, exception)
        .with(STREAM_NAME, target)
        .with(GROUP_NAME, group);
    Status::with_metadata(code, format!("{} on {}::{}", exception, target, group), metadata)
}

#[derive(Debug, Clone)]
struct InFlight {
    event: RecordedEvent,
    retry_count: u32,
    consumer: u64,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct GroupState {
    pending: VecDeque<(RecordedEvent, u32)>,
    in_flight: HashMap<Uuid, InFlight>,
    parked: Vec<RecordedEvent>,
    acked: Vec<Uuid>,
    skipped: usize,
    consumers: usize,
    next_consumer: u64,
}

#[derive(Debug)]
struct Group {
    target: String,
    name: String,
    matcher: Option<FilterMatcher>,
    message_timeout: Mutex<Duration>,
    max_retry_count: Mutex<u32>,
    max_subscribers: Mutex<u32>,
    state: Mutex<GroupState>,
    /// Bumped on every change consumers should look at.
    version: watch::Sender<u64>,
    /// Bumped when connected consumers must be dropped.
    revoked: watch::Sender<u64>,
}

impl Group {
    fn wake(&self) {
        self.version.send_modify(|version| *version += 1);
    }

    fn revoke(&self) {
        self.revoked.send_modify(|revision| *revision += 1);
    }

    fn offer(&self, event: &RecordedEvent) {
        let wanted = match &self.matcher {
            Some(matcher) => matcher.matches(event),
            None => self.target == ALL_STREAM || event.stream_id == self.target,
        };
        if wanted {
            self.state.lock().pending.push_back((event.clone(), 0));
            self.wake();
        }
    }

    fn join(&self) -> Result<u64, Status> {
        let max_subscribers = *self.max_subscribers.lock();
        let mut state = self.state.lock();
        if max_subscribers > 0 && state.consumers >= max_subscribers as usize {
            return Err(group_status(
                Code::FailedPrecondition,
                exception::MAXIMUM_SUBSCRIBERS_REACHED,
                &self.target,
                &self.name,
            ));
        }
        state.consumers += 1;
        state.next_consumer += 1;
        Ok(state.next_consumer)
    }

    fn leave(&self, consumer: u64) {
        let mut state = self.state.lock();
        state.consumers = state.consumers.saturating_sub(1);
        let held = state
            .in_flight
            .iter()
            .filter(|(_, in_flight)| in_flight.consumer == consumer)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in held {
            if let Some(in_flight) = state.in_flight.remove(&id) {
                state.pending.push_front((in_flight.event, in_flight.retry_count + 1));
            }
        }
        drop(state);
        self.wake();
    }

    fn next_for(&self, consumer: u64, credit: usize) -> Option<(RecordedEvent, u32)> {
        let timeout = *self.message_timeout.lock();
        let mut state = self.state.lock();
        let held = state.in_flight.values().filter(|f| f.consumer == consumer).count();
        if held >= credit {
            return None;
        }
        let (event, retry_count) = state.pending.pop_front()?;
        state.in_flight.insert(
            event.id,
            InFlight {
                event: event.clone(),
                retry_count,
                consumer,
                deadline: Instant::now() + timeout,
            },
        );
        Some((event, retry_count))
    }

    /// Returns false when the consumer asked to stop.
    fn settle(&self, consumer: u64, request: PersistentRequest) -> bool {
        let max_retry_count = *self.max_retry_count.lock();
        let mut state = self.state.lock();
        let (ids, action) = match request {
            PersistentRequest::Ack { ids } => (ids, None),
            PersistentRequest::Nack { ids, action, .. } => (ids, Some(action)),
        };
        let mut keep_going = true;
        for id in ids {
            let Some(in_flight) = state.in_flight.get(&id).filter(|f| f.consumer == consumer).cloned() else {
                continue;
            };
            state.in_flight.remove(&id);
            match action {
                None => state.acked.push(id),
                Some(NackAction::Park) => state.parked.push(in_flight.event),
                Some(NackAction::Retry) => {
                    let retry_count = in_flight.retry_count + 1;
                    if retry_count > max_retry_count {
                        state.parked.push(in_flight.event);
                    } else {
                        state.pending.push_front((in_flight.event, retry_count));
                    }
                }
                Some(NackAction::Skip) => state.skipped += 1,
                Some(NackAction::Stop) => {
                    state.pending.push_front((in_flight.event, in_flight.retry_count));
                    keep_going = false;
                }
            }
        }
        drop(state);
        self.wake();
        keep_going
    }

    fn expire(&self, now: Instant) {
        let max_retry_count = *self.max_retry_count.lock();
        let mut state = self.state.lock();
        let expired = state
            .in_flight
            .iter()
            .filter(|(_, in_flight)| in_flight.deadline <= now)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        if expired.is_empty() {
            return;
        }
        for id in expired {
            if let Some(in_flight) = state.in_flight.remove(&id) {
                let retry_count = in_flight.retry_count + 1;
                if retry_count > max_retry_count {
                    state.parked.push(in_flight.event);
                } else {
                    state.pending.push_back((in_flight.event, retry_count));
                }
            }
        }
        drop(state);
        self.wake();
    }
}

/// Server side of persistent subscription groups, fed from an [`InMemoryStreams`] log.
/// Unacknowledged events are redelivered after the group's message timeout.
#[derive(Debug)]
pub struct InMemoryPersistentSubscriptions {
    streams: Arc<InMemoryStreams>,
    groups: Mutex<HashMap<(String, String), Arc<Group>>>,
    gate: Gate,
}

impl InMemoryPersistentSubscriptions {
    pub fn new(streams: Arc<InMemoryStreams>) -> Arc<Self> {
        Arc::new(Self {
            streams,
            groups: Mutex::new(HashMap::new()),
            gate: Gate::default(),
        })
    }

    pub fn set_leader(&self, leader: Endpoint) {
        *self.gate.leader.lock() = Some(leader);
    }

    pub fn fail_next(&self, status: Status) {
        self.gate.faults.lock().push_back(status);
    }

    pub fn calls(&self) -> Vec<Endpoint> {
        self.gate.calls.lock().iter().map(|(endpoint, _)| endpoint.clone()).collect()
    }

    pub fn acked(&self, target: &str, group: &str) -> Vec<Uuid> {
        self.inspect(target, group, |state| state.acked.clone()).unwrap_or_default()
    }

    pub fn parked(&self, target: &str, group: &str) -> Vec<Uuid> {
        self.inspect(target, group, |state| state.parked.iter().map(|e| e.id).collect())
            .unwrap_or_default()
    }

    pub fn skipped(&self, target: &str, group: &str) -> usize {
        self.inspect(target, group, |state| state.skipped).unwrap_or_default()
    }

    pub fn in_flight(&self, target: &str, group: &str) -> usize {
        self.inspect(target, group, |state| state.in_flight.len()).unwrap_or_default()
    }

    pub fn consumers(&self, target: &str, group: &str) -> usize {
        self.inspect(target, group, |state| state.consumers).unwrap_or_default()
    }

    fn inspect<T>(&self, target: &str, group: &str, f: impl FnOnce(&GroupState) -> T) -> Option<T> {
        let group = self.group(target, group)?;
        let state = group.state.lock();
        Some(f(&state))
    }

    fn group(&self, target: &str, group: &str) -> Option<Arc<Group>> {
        self.groups
            .lock()
            .get(&(target.to_string(), group.to_string()))
            .cloned()
    }

    fn not_found(target: &str, group: &str) -> Status {
        group_status(
            Code::NotFound,
            exception::PERSISTENT_SUBSCRIPTION_DOES_NOT_EXIST,
            target,
            group,
        )
    }

    fn build_group(&self, name: &str, definition: &PersistentDefinition) -> Result<Arc<Group>, Status> {
        let target = definition.target().stream_name().to_string();
        let (message_timeout, max_retry_count, max_subscribers, matcher) = match definition {
            PersistentDefinition::Stream { settings, .. } => (
                settings.message_timeout,
                settings.max_retry_count,
                settings.max_subscriber_count,
                None,
            ),
            PersistentDefinition::All { settings, filter } => {
                let matcher = filter
                    .as_ref()
                    .map(|filter| filter.filter.matcher())
                    .transpose()
                    .map_err(|error: Error| Status::new(Code::InvalidArgument, error.to_string()))?;
                (
                    settings.message_timeout,
                    settings.max_retry_count,
                    settings.max_subscriber_count,
                    matcher,
                )
            }
        };
        let (version, _) = watch::channel(0);
        let (revoked, _) = watch::channel(0);
        Ok(Arc::new(Group {
            target,
            name: name.to_string(),
            matcher,
            message_timeout: Mutex::new(message_timeout),
            max_retry_count: Mutex::new(max_retry_count),
            max_subscribers: Mutex::new(max_subscribers),
            state: Mutex::new(GroupState::default()),
            version,
            revoked,
        }))
    }

    fn feed(&self, group: Arc<Group>, definition: &PersistentDefinition) {
        let (history, mut live) = self.streams.tail();
        let replay = |event: &RecordedEvent| match definition {
            PersistentDefinition::Stream { settings, .. } => match settings.start_from {
                StreamStart::Start => true,
                StreamStart::End => false,
                StreamStart::After(revision) => event.revision > revision,
            },
            PersistentDefinition::All { settings, .. } => match settings.start_from {
                StreamStart::Start => true,
                StreamStart::End => false,
                StreamStart::After(position) => event.position > position,
            },
        };
        for event in history.iter().filter(|event| replay(*event)) {
            group.offer(event);
        }
        let group = Arc::downgrade(&group);
        tokio::spawn(async move {
            while let Ok(event) = live.recv().await {
                match group.upgrade() {
                    Some(group) => group.offer(&event),
                    None => break,
                }
            }
        });
    }
}

async fn serve(
    group: Arc<Group>,
    consumer: u64,
    credit: usize,
    mut requests: RequestStream<PersistentRequest>,
    mut tx: stream_channel::Sender<Result<PersistentResponse, Status>>,
) {
    let mut version = group.version.subscribe();
    let mut revoked = group.revoked.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_millis(20));
    let subscription_id = format!("{}::{}", group.target, group.name);
    let outcome = async {
        tx.send(Ok(PersistentResponse::Confirmation { subscription_id })).await?;
        loop {
            while let Some((event, retry_count)) = group.next_for(consumer, credit) {
                let event = ResolvedEvent::from_event(event);
                tx.send(Ok(PersistentResponse::Event {
                    event,
                    retry_count: Some(retry_count),
                }))
                .await?;
            }
            tokio::select! {
                request = requests.next() => match request {
                    Some(request) => {
                        if !group.settle(consumer, request) {
                            break;
                        }
                    }
                    None => break,
                },
                changed = version.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = revoked.changed() => {
                    let status = group_status(
                        Code::Aborted,
                        exception::PERSISTENT_SUBSCRIPTION_DROPPED,
                        &group.target,
                        &group.name,
                    );
                    tx.send(Err(status)).await?;
                    break;
                }
                _ = ticker.tick() => group.expire(Instant::now()),
            }
        }
        Ok::<_, stream_channel::SendError>(())
    };
    let _ = outcome.await;
    group.leave(consumer);
}

#[async_trait]
impl<C> PersistentSubscriptionsTransport<C> for InMemoryPersistentSubscriptions
where
    C: Channel,
{
    async fn read(
        &self,
        context: CallContext<C>,
        request: PersistentReadRequest,
        requests: RequestStream<PersistentRequest>,
    ) -> Result<ResponseStream<PersistentResponse>, Status> {
        self.gate.admit(&context)?;
        let target = request.target.stream_name();
        let group = self
            .group(target, &request.group)
            .ok_or_else(|| Self::not_found(target, &request.group))?;
        let consumer = group.join()?;
        let (tx, rx) = stream_channel::channel(request.buffer_size.max(1));
        tokio::spawn(serve(group, consumer, request.buffer_size.max(1), requests, tx));
        Ok(rx.boxed())
    }

    async fn create(&self, context: CallContext<C>, group: String, definition: PersistentDefinition) -> Result<(), Status> {
        self.gate.admit(&context)?;
        let target = definition.target().stream_name().to_string();
        let key = (target.clone(), group.clone());
        if self.groups.lock().contains_key(&key) {
            return Err(group_status(
                Code::AlreadyExists,
                exception::PERSISTENT_SUBSCRIPTION_EXISTS,
                &target,
                &group,
            ));
        }
        let built = self.build_group(&group, &definition)?;
        self.groups.lock().insert(key, built.clone());
        self.feed(built, &definition);
        Ok(())
    }

    async fn update(&self, context: CallContext<C>, group: String, definition: PersistentDefinition) -> Result<(), Status> {
        self.gate.admit(&context)?;
        let target = definition.target().stream_name().to_string();
        let existing = self
            .group(&target, &group)
            .ok_or_else(|| Self::not_found(&target, &group))?;
        let (message_timeout, max_retry_count, max_subscribers) = match &definition {
            PersistentDefinition::Stream { settings, .. } => (
                settings.message_timeout,
                settings.max_retry_count,
                settings.max_subscriber_count,
            ),
            PersistentDefinition::All { settings, .. } => (
                settings.message_timeout,
                settings.max_retry_count,
                settings.max_subscriber_count,
            ),
        };
        *existing.message_timeout.lock() = message_timeout;
        *existing.max_retry_count.lock() = max_retry_count;
        *existing.max_subscribers.lock() = max_subscribers;
        existing.revoke();
        Ok(())
    }

    async fn delete(&self, context: CallContext<C>, target: PersistentTarget, group: String) -> Result<(), Status> {
        self.gate.admit(&context)?;
        let key = (target.stream_name().to_string(), group.clone());
        let removed = self
            .groups
            .lock()
            .remove(&key)
            .ok_or_else(|| Self::not_found(target.stream_name(), &group))?;
        removed.revoke();
        Ok(())
    }

    async fn replay_parked(
        &self,
        context: CallContext<C>,
        target: PersistentTarget,
        group: String,
        stop_at: Option<u64>,
    ) -> Result<(), Status> {
        self.gate.admit(&context)?;
        let existing = self
            .group(target.stream_name(), &group)
            .ok_or_else(|| Self::not_found(target.stream_name(), &group))?;
        let mut state = existing.state.lock();
        let count = stop_at.map_or(state.parked.len(), |stop_at| (stop_at as usize).min(state.parked.len()));
        let replayed = state.parked.drain(..count).collect::<Vec<_>>();
        state.pending.extend(replayed.into_iter().map(|event| (event, 0)));
        drop(state);
        existing.wake();
        Ok(())
    }

    async fn restart_subsystem(&self, context: CallContext<C>) -> Result<(), Status> {
        self.gate.admit(&context)?;
        for group in self.groups.lock().values() {
            group.revoke();
        }
        Ok(())
    }
}

/// Everything a [`RecordingListener`] or [`AckingListener`] observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Event(ResolvedEvent),
    Delivery { event: ResolvedEvent, retry_count: u32 },
    Checkpoint(Position),
    CaughtUp,
    FellBehind,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Default)]
pub struct Observations {
    seen: Arc<Mutex<Vec<Observed>>>,
}

impl Observations {
    pub fn push(&self, observed: Observed) {
        self.seen.lock().push(observed);
    }

    pub fn all(&self) -> Vec<Observed> {
        self.seen.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.seen
            .lock()
            .iter()
            .filter_map(|observed| match observed {
                Observed::Event(event) | Observed::Delivery { event, .. } => event.original_event().cloned(),
                _ => None,
            })
            .collect()
    }

    pub fn checkpoints(&self) -> usize {
        self.count(|observed| matches!(observed, Observed::Checkpoint(_)))
    }

    pub fn dropped(&self) -> Option<DropReason> {
        self.seen.lock().iter().find_map(|observed| match observed {
            Observed::Dropped(reason) => Some(*reason),
            _ => None,
        })
    }

    pub fn count(&self, predicate: impl Fn(&Observed) -> bool) -> usize {
        self.seen.lock().iter().filter(|observed| predicate(observed)).count()
    }
}

/// Catch-up listener that records every callback as it starts. `delay` slows each callback down.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    pub observations: Observations,
    pub delay: Option<Duration>,
    pub fail_on_event: Option<u64>,
}

impl RecordingListener {
    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SubscriptionListener for RecordingListener {
    async fn on_event(&mut self, event: ResolvedEvent) -> anyhow::Result<()> {
        let revision = event.original_event().map(|e| e.revision);
        if revision.is_some() && revision == self.fail_on_event {
            anyhow::bail!("listener rejected revision {:?}", revision);
        }
        self.observations.push(Observed::Event(event));
        self.pause().await;
        Ok(())
    }

    async fn on_checkpoint(&mut self, position: Position) -> anyhow::Result<()> {
        self.observations.push(Observed::Checkpoint(position));
        self.pause().await;
        Ok(())
    }

    async fn on_caught_up(&mut self) {
        self.observations.push(Observed::CaughtUp);
    }

    async fn on_fell_behind(&mut self) {
        self.observations.push(Observed::FellBehind);
    }

    async fn on_dropped(&mut self, reason: DropReason, _error: Option<&Error>) {
        self.observations.push(Observed::Dropped(reason));
    }
}

/// Persistent listener that records deliveries and settles them by event type: `park-*` events
/// are parked, `retry-*` events are retried once, `skip-*` events are skipped, `stop-*` events
/// stop the consumer and everything else is acked.
#[derive(Debug, Clone, Default)]
pub struct AckingListener {
    pub observations: Observations,
}

#[async_trait]
impl PersistentSubscriptionListener for AckingListener {
    async fn on_event(
        &mut self,
        subscription: &PersistentSubscription,
        event: ResolvedEvent,
        retry_count: u32,
    ) -> anyhow::Result<()> {
        let event_type = event
            .original_event()
            .map(|e| e.event_type.clone())
            .unwrap_or_default();
        self.observations.push(Observed::Delivery {
            event: event.clone(),
            retry_count,
        });
        if event_type.starts_with("park-") {
            subscription.nack_event(NackAction::Park, "poison", &event)?;
        } else if event_type.starts_with("retry-") && retry_count == 0 {
            subscription.nack_event(NackAction::Retry, "transient", &event)?;
        } else if event_type.starts_with("skip-") {
            subscription.nack_event(NackAction::Skip, "stale", &event)?;
        } else if event_type.starts_with("stop-") {
            subscription.nack_event(NackAction::Stop, "halt", &event)?;
        } else {
            subscription.ack_event(&event)?;
        }
        Ok(())
    }

    async fn on_dropped(&mut self, reason: DropReason, _error: Option<&Error>) {
        self.observations.push(Observed::Dropped(reason));
    }
}

//! Seams to the RPC substrate. Implementations marshal these requests onto the wire.

use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use esdb_core::event::ResolvedEvent;
use esdb_core::position::{Position, StreamStart};
use esdb_core::status::Status;

use crate::call::CallContext;
use crate::subscription::filter::FilterOptions;
use crate::subscription::persistent_settings::PersistentSubscriptionSettings;

pub type ResponseStream<T> = BoxStream<'static, Result<T, Status>>;

pub type RequestStream<T> = BoxStream<'static, T>;

pub const ALL_STREAM: &str = "$all";

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SubscribeTarget {
    Stream { stream: String, start: StreamStart<u64> },
    All { start: StreamStart<Position>, filter: Option<FilterOptions> },
}

impl Display for SubscribeTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscribeTarget::Stream { stream, start } => write!(f, "{} from {}", stream, start),
            SubscribeTarget::All { start, filter: None } => write!(f, "{} from {}", ALL_STREAM, start),
            SubscribeTarget::All { start, filter: Some(filter) } => {
                write!(f, "{} from {} where {}", ALL_STREAM, start, filter.filter)
            }
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SubscribeRequest {
    pub target: SubscribeTarget,
    pub resolve_link_tos: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadResponse {
    Confirmation { subscription_id: String },
    Event(ResolvedEvent),
    Checkpoint(Position),
    CaughtUp,
    FellBehind,
}

#[async_trait]
pub trait StreamsTransport<C>: Send + Sync + 'static {
    async fn subscribe(&self, context: CallContext<C>, request: SubscribeRequest) -> Result<ResponseStream<ReadResponse>, Status>;
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum PersistentTarget {
    Stream(String),
    All,
}

impl PersistentTarget {
    pub fn stream_name(&self) -> &str {
        match self {
            PersistentTarget::Stream(stream) => stream,
            PersistentTarget::All => ALL_STREAM,
        }
    }
}

impl Display for PersistentTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stream_name())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PersistentReadRequest {
    pub target: PersistentTarget,
    pub group: String,
    pub buffer_size: usize,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NackAction {
    Park,
    Retry,
    Skip,
    Stop,
}

impl Display for NackAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PersistentRequest {
    Ack { ids: Vec<Uuid> },
    Nack { ids: Vec<Uuid>, action: NackAction, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PersistentResponse {
    Confirmation { subscription_id: String },
    Event { event: ResolvedEvent, retry_count: Option<u32> },
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PersistentDefinition {
    Stream {
        stream: String,
        settings: PersistentSubscriptionSettings<u64>,
    },
    All {
        settings: PersistentSubscriptionSettings<Position>,
        filter: Option<FilterOptions>,
    },
}

impl PersistentDefinition {
    pub fn target(&self) -> PersistentTarget {
        match self {
            PersistentDefinition::Stream { stream, .. } => PersistentTarget::Stream(stream.clone()),
            PersistentDefinition::All { .. } => PersistentTarget::All,
        }
    }
}

#[async_trait]
pub trait PersistentSubscriptionsTransport<C>: Send + Sync + 'static {
    async fn read(
        &self,
        context: CallContext<C>,
        request: PersistentReadRequest,
        requests: RequestStream<PersistentRequest>,
    ) -> Result<ResponseStream<PersistentResponse>, Status>;

    async fn create(&self, context: CallContext<C>, group: String, definition: PersistentDefinition) -> Result<(), Status>;

    async fn update(&self, context: CallContext<C>, group: String, definition: PersistentDefinition) -> Result<(), Status>;

    async fn delete(&self, context: CallContext<C>, target: PersistentTarget, group: String) -> Result<(), Status>;

    async fn replay_parked(
        &self,
        context: CallContext<C>,
        target: PersistentTarget,
        group: String,
        stop_at: Option<u64>,
    ) -> Result<(), Status>;

    async fn restart_subsystem(&self, context: CallContext<C>) -> Result<(), Status>;
}

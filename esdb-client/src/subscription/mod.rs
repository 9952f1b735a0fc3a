use std::fmt::{Display, Formatter};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn, Instrument, Span};

use esdb_core::error::{Error, Result};

pub mod catch_up;
pub mod filter;
pub mod management;
pub mod persistent;
pub mod persistent_settings;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SubscriptionState {
    Initializing,
    CatchingUp,
    Live,
    Dropped,
}

impl SubscriptionState {
    pub fn can_transition_to(&self, next: SubscriptionState) -> bool {
        use SubscriptionState::*;
        matches!(
            (*self, next),
            (Initializing, CatchingUp)
                | (Initializing, Live)
                | (CatchingUp, Live)
                | (Live, CatchingUp)
                | (Initializing | CatchingUp | Live, Dropped)
        )
    }
}

impl Display for SubscriptionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DropReason {
    Disposed,
    SubscriberError,
    ServerError,
    AccessDenied,
    SubscriptionNotFound,
}

impl DropReason {
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Cancelled => DropReason::Disposed,
            Error::AccessDenied | Error::NotAuthenticated => DropReason::AccessDenied,
            Error::PersistentSubscriptionNotFound { .. } => DropReason::SubscriptionNotFound,
            _ => DropReason::ServerError,
        }
    }
}

impl Display for DropReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Lifecycle bookkeeping shared by a subscription handle and its dispatch task.
#[derive(Debug)]
pub(crate) struct SubscriptionShared {
    state: Mutex<SubscriptionState>,
    subscription_id: Mutex<Option<String>>,
    dropped: watch::Sender<Option<DropReason>>,
    pub(crate) cancel: CancellationToken,
}

impl SubscriptionShared {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        let (dropped, _) = watch::channel(None);
        Self {
            state: Mutex::new(SubscriptionState::Initializing),
            subscription_id: Mutex::new(None),
            dropped,
            cancel,
        }
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    /// Applies the transition if the lifecycle allows it.
    pub(crate) fn transition(&self, next: SubscriptionState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            debug!("{} -> {}", *state, next);
            *state = next;
            true
        } else {
            if *state != next {
                warn!("ignored transition {} -> {}", *state, next);
            }
            false
        }
    }

    pub(crate) fn confirm(&self, subscription_id: String) {
        debug!("subscription {} confirmed", subscription_id);
        *self.subscription_id.lock() = Some(subscription_id);
    }

    pub(crate) fn subscription_id(&self) -> Option<String> {
        self.subscription_id.lock().clone()
    }

    pub(crate) fn drop_reason(&self) -> Option<DropReason> {
        *self.dropped.borrow()
    }

    pub(crate) async fn wait_dropped(&self) -> DropReason {
        let mut receiver = self.dropped.subscribe();
        loop {
            if let Some(reason) = *receiver.borrow_and_update() {
                return reason;
            }
            if receiver.changed().await.is_err() {
                return DropReason::Disposed;
            }
        }
    }

    /// Marks the subscription dropped and stops its reader. Called once by the dispatch task,
    /// after the listener has been told.
    pub(crate) fn finish(&self, reason: DropReason) {
        self.transition(SubscriptionState::Dropped);
        self.cancel.cancel();
        self.dropped.send_replace(Some(reason));
    }
}

pub(crate) enum Inbound<T> {
    Message(T),
    Failed(Error),
    Ended,
}

/// Moves a response stream into a bounded queue until the stream ends, fails or `cancel` fires.
/// The bounded queue applies backpressure to the transport while the listener is busy.
pub(crate) fn spawn_reader<S, T>(stream: S, capacity: usize, cancel: CancellationToken, span: Span) -> mpsc::Receiver<Inbound<T>>
where
    S: Stream<Item = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(
        async move {
            tokio::pin!(stream);
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = stream.next() => next,
                };
                let (inbound, last) = match next {
                    Some(Ok(message)) => (Inbound::Message(message), false),
                    Some(Err(error)) => (Inbound::Failed(error), true),
                    None => (Inbound::Ended, true),
                };
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = tx.send(inbound) => sent,
                };
                if sent.is_err() || last {
                    break;
                }
            }
            trace!("reader stopped");
        }
        .instrument(span),
    );
    rx
}

#[cfg(test)]
mod tests {
    use esdb_core::error::Error;
    use esdb_core::status::Status;
    use tokio_util::sync::CancellationToken;

    use crate::subscription::{DropReason, SubscriptionShared, SubscriptionState};

    #[test]
    fn lifecycle_transitions_are_guarded() {
        use SubscriptionState::*;
        assert!(Initializing.can_transition_to(CatchingUp));
        assert!(CatchingUp.can_transition_to(Live));
        assert!(Live.can_transition_to(CatchingUp));
        assert!(Live.can_transition_to(Dropped));
        assert!(!Dropped.can_transition_to(Live));
        assert!(!Dropped.can_transition_to(Dropped));
        assert!(!Live.can_transition_to(Initializing));
        assert!(!CatchingUp.can_transition_to(Initializing));
    }

    #[tokio::test]
    async fn finish_is_terminal() {
        let shared = SubscriptionShared::new(CancellationToken::new());
        assert!(shared.transition(SubscriptionState::CatchingUp));
        shared.finish(DropReason::ServerError);
        assert_eq!(shared.state(), SubscriptionState::Dropped);
        assert!(shared.cancel.is_cancelled());
        assert!(!shared.transition(SubscriptionState::Live));
        assert_eq!(shared.wait_dropped().await, DropReason::ServerError);
        assert_eq!(shared.drop_reason(), Some(DropReason::ServerError));
    }

    #[test]
    fn drop_reason_from_error() {
        assert_eq!(DropReason::from_error(&Error::Cancelled), DropReason::Disposed);
        assert_eq!(DropReason::from_error(&Error::AccessDenied), DropReason::AccessDenied);
        assert_eq!(
            DropReason::from_error(&Error::PersistentSubscriptionNotFound {
                stream: "orders".to_string(),
                group: "billing".to_string(),
            }),
            DropReason::SubscriptionNotFound
        );
        assert_eq!(DropReason::from_error(&Error::from(Status::unavailable("down"))), DropReason::ServerError);
    }
}

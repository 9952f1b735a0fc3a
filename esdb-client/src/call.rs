use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use esdb_core::status::Metadata;

/// The four RPC shapes. Used for logging, dispatch is shape-agnostic.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CallKind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    DuplexStreaming,
}

impl Display for CallKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides the client's default deadline. Streaming calls apply it to establishment only.
    pub deadline: Option<Duration>,
    /// Overrides the flag derived from the node preference.
    pub requires_leader: Option<bool>,
    pub authorization: Option<String>,
    pub cancellation: CancellationToken,
}

impl CallOptions {
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn requires_leader(mut self, requires_leader: bool) -> Self {
        self.requires_leader = Some(requires_leader);
        self
    }

    pub fn authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }

    pub fn cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Everything a transport needs to dispatch one call.
#[derive(Debug)]
pub struct CallContext<C> {
    pub kind: CallKind,
    pub channel: Arc<C>,
    pub metadata: Metadata,
    pub deadline: Option<Duration>,
}

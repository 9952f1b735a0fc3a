use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use crate::endpoint::Endpoint;

pub const REQUIRES_LEADER: &str = "requires-leader";
pub const TARGET_HOST: &str = "target-host";
pub const AUTHORIZATION: &str = "authorization";
pub const EXCEPTION: &str = "exception";
pub const LEADER_ENDPOINT_HOST: &str = "leader-endpoint-host";
pub const LEADER_ENDPOINT_PORT: &str = "leader-endpoint-port";
pub const STREAM_NAME: &str = "stream-name";
pub const GROUP_NAME: &str = "group-name";
pub const EXPECTED_VERSION: &str = "expected-version";
pub const ACTUAL_VERSION: &str = "actual-version";

pub mod exception {
    pub const NOT_LEADER: &str = "not-leader";
    pub const WRONG_EXPECTED_VERSION: &str = "wrong-expected-version";
    pub const STREAM_DELETED: &str = "stream-deleted";
    pub const STREAM_NOT_FOUND: &str = "stream-not-found";
    pub const ACCESS_DENIED: &str = "access-denied";
    pub const NOT_AUTHENTICATED: &str = "not-authenticated";
    pub const PERSISTENT_SUBSCRIPTION_DOES_NOT_EXIST: &str = "persistent-subscription-does-not-exist";
    pub const PERSISTENT_SUBSCRIPTION_EXISTS: &str = "persistent-subscription-exists";
    pub const MAXIMUM_SUBSCRIBERS_REACHED: &str = "maximum-subscribers-reached";
    pub const PERSISTENT_SUBSCRIPTION_DROPPED: &str = "persistent-subscription-dropped";
}

/// Standard RPC status codes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Code {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Request headers or response trailers.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Metadata {
    entries: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|v| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Status {
    pub code: Code,
    pub message: String,
    pub metadata: Metadata,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(code: Code, message: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            code,
            message: message.into(),
            metadata,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(Code::Aborted, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// The trailer the server attaches when a leader-only call reached a follower.
    pub fn not_leader(leader: &Endpoint) -> Self {
        let metadata = Metadata::new()
            .with(EXCEPTION, exception::NOT_LEADER)
            .with(LEADER_ENDPOINT_HOST, leader.host.clone())
            .with(LEADER_ENDPOINT_PORT, leader.port.to_string());
        Self::with_metadata(Code::NotFound, "Leader info available", metadata)
    }

    pub fn exception(&self) -> Option<&str> {
        self.metadata.get(EXCEPTION)
    }

    /// The reported leader, when this status is a well-formed not-leader signal.
    pub fn leader_endpoint(&self) -> Option<Endpoint> {
        if self.exception() != Some(exception::NOT_LEADER) {
            return None;
        }
        let host = self.metadata.get(LEADER_ENDPOINT_HOST)?;
        let port = self.metadata.get(LEADER_ENDPOINT_PORT)?.parse::<u16>().ok()?;
        Some(Endpoint::new(host, port))
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "status: {}, message: {:?}", self.code, self.message)?;
        if let Some(exception) = self.exception() {
            write!(f, ", exception: {}", exception)?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use crate::endpoint::Endpoint;
    use crate::status::{Code, Metadata, Status, EXCEPTION, LEADER_ENDPOINT_HOST, LEADER_ENDPOINT_PORT};

    #[test]
    fn not_leader_round_trips_endpoint() {
        let leader = Endpoint::new("node2", 2113);
        let status = Status::not_leader(&leader);
        assert_eq!(status.leader_endpoint(), Some(leader));
    }

    #[test]
    fn malformed_leader_port_is_ignored() {
        let metadata = Metadata::new()
            .with(EXCEPTION, "not-leader")
            .with(LEADER_ENDPOINT_HOST, "node2")
            .with(LEADER_ENDPOINT_PORT, "port");
        let status = Status::with_metadata(Code::NotFound, "", metadata);
        assert_eq!(status.leader_endpoint(), None);
    }
}

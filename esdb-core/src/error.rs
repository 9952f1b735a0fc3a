use thiserror::Error;

use crate::endpoint::Endpoint;
use crate::status::{exception, Code, Status, ACTUAL_VERSION, EXPECTED_VERSION, GROUP_NAME, STREAM_NAME};

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to discover a cluster node after {attempts} attempts")]
    Discovery { attempts: usize },
    #[error("node is not the leader, leader is at {leader}")]
    NotLeader { leader: Endpoint },
    #[error("server unavailable: {0}")]
    ServerUnavailable(Status),
    #[error("call aborted: {0}")]
    Aborted(Status),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("operation cancelled")]
    Cancelled,
    #[error("wrong expected version on stream {stream}, expected {expected}, actual {actual}")]
    WrongExpectedVersion {
        stream: String,
        expected: String,
        actual: String,
    },
    #[error("stream {0} not found")]
    StreamNotFound(String),
    #[error("stream {0} is deleted")]
    StreamDeleted(String),
    #[error("access denied")]
    AccessDenied,
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("persistent subscription {group} on {stream} does not exist")]
    PersistentSubscriptionNotFound { stream: String, group: String },
    #[error("persistent subscription {group} on {stream} already exists")]
    PersistentSubscriptionExists { stream: String, group: String },
    #[error("persistent subscription {group} on {stream} reached its maximum subscriber count")]
    MaximumSubscribersReached { stream: String, group: String },
    #[error("persistent subscription was dropped by the server")]
    PersistentSubscriptionDropped,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Grpc(Status),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Maps a transport status to the most specific error kind it carries.
    pub fn from_status(status: Status) -> Self {
        let header = |key: &str| status.metadata.get(key).unwrap_or_default().to_string();
        match status.exception() {
            Some(exception::NOT_LEADER) => {
                if let Some(leader) = status.leader_endpoint() {
                    return Error::NotLeader { leader };
                }
            }
            Some(exception::WRONG_EXPECTED_VERSION) => {
                return Error::WrongExpectedVersion {
                    stream: header(STREAM_NAME),
                    expected: header(EXPECTED_VERSION),
                    actual: header(ACTUAL_VERSION),
                };
            }
            Some(exception::STREAM_DELETED) => return Error::StreamDeleted(header(STREAM_NAME)),
            Some(exception::STREAM_NOT_FOUND) => return Error::StreamNotFound(header(STREAM_NAME)),
            Some(exception::ACCESS_DENIED) => return Error::AccessDenied,
            Some(exception::NOT_AUTHENTICATED) => return Error::NotAuthenticated,
            Some(exception::PERSISTENT_SUBSCRIPTION_DOES_NOT_EXIST) => {
                return Error::PersistentSubscriptionNotFound {
                    stream: header(STREAM_NAME),
                    group: header(GROUP_NAME),
                };
            }
            Some(exception::PERSISTENT_SUBSCRIPTION_EXISTS) => {
                return Error::PersistentSubscriptionExists {
                    stream: header(STREAM_NAME),
                    group: header(GROUP_NAME),
                };
            }
            Some(exception::MAXIMUM_SUBSCRIBERS_REACHED) => {
                return Error::MaximumSubscribersReached {
                    stream: header(STREAM_NAME),
                    group: header(GROUP_NAME),
                };
            }
            Some(exception::PERSISTENT_SUBSCRIPTION_DROPPED) => return Error::PersistentSubscriptionDropped,
            _ => {}
        }
        match status.code {
            Code::Unavailable => Error::ServerUnavailable(status),
            Code::Aborted => Error::Aborted(status),
            Code::DeadlineExceeded => Error::DeadlineExceeded,
            Code::Cancelled => Error::Cancelled,
            Code::PermissionDenied => Error::AccessDenied,
            Code::Unauthenticated => Error::NotAuthenticated,
            Code::InvalidArgument => Error::InvalidArgument(status.message),
            _ => Error::Grpc(status),
        }
    }

    /// Infrastructure failures that a fresh discovery may cure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ServerUnavailable(_) | Error::Aborted(_) | Error::NotLeader { .. })
    }
}

impl From<Status> for Error {
    fn from(value: Status) -> Self {
        Error::from_status(value)
    }
}

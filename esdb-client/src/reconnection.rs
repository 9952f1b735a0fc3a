use std::fmt::{Display, Formatter};

use esdb_core::endpoint::Endpoint;
use esdb_core::status::{Code, Status};

/// What the next call must do about routing after a call failed.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ReconnectionRequired {
    None,
    Rediscover,
    NewLeader(Endpoint),
}

impl ReconnectionRequired {
    pub fn classify(status: &Status) -> Self {
        if let Some(leader) = status.leader_endpoint() {
            return ReconnectionRequired::NewLeader(leader);
        }
        match status.code {
            Code::Aborted | Code::Unavailable => ReconnectionRequired::Rediscover,
            _ => ReconnectionRequired::None,
        }
    }
}

impl Display for ReconnectionRequired {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconnectionRequired::None => write!(f, "None"),
            ReconnectionRequired::Rediscover => write!(f, "Rediscover"),
            ReconnectionRequired::NewLeader(endpoint) => write!(f, "NewLeader({})", endpoint),
        }
    }
}

/// Receives the routing signal produced by a failed call.
pub trait ReconnectionSink: Send + Sync + 'static {
    fn reconnection_required(&self, signal: ReconnectionRequired);
}

#[cfg(test)]
mod tests {
    use esdb_core::endpoint::Endpoint;
    use esdb_core::status::{exception, Code, Metadata, Status, EXCEPTION};

    use crate::reconnection::ReconnectionRequired;

    #[test]
    fn not_leader_classifies_to_new_leader() {
        let status = Status::not_leader(&Endpoint::new("h", 1113));
        assert_eq!(
            ReconnectionRequired::classify(&status),
            ReconnectionRequired::NewLeader(Endpoint::new("h", 1113))
        );
    }

    #[test]
    fn aborted_and_unavailable_classify_to_rediscover() {
        assert_eq!(ReconnectionRequired::classify(&Status::aborted("")), ReconnectionRequired::Rediscover);
        assert_eq!(ReconnectionRequired::classify(&Status::unavailable("")), ReconnectionRequired::Rediscover);
    }

    #[test]
    fn everything_else_classifies_to_none() {
        let codes = [
            Code::Cancelled,
            Code::Unknown,
            Code::InvalidArgument,
            Code::DeadlineExceeded,
            Code::NotFound,
            Code::AlreadyExists,
            Code::PermissionDenied,
            Code::ResourceExhausted,
            Code::FailedPrecondition,
            Code::OutOfRange,
            Code::Unimplemented,
            Code::Internal,
            Code::DataLoss,
            Code::Unauthenticated,
        ];
        for code in codes {
            assert_eq!(ReconnectionRequired::classify(&Status::new(code, "")), ReconnectionRequired::None);
        }
        let wrong_version = Status::with_metadata(
            Code::FailedPrecondition,
            "",
            Metadata::new().with(EXCEPTION, exception::WRONG_EXPECTED_VERSION),
        );
        assert_eq!(ReconnectionRequired::classify(&wrong_version), ReconnectionRequired::None);
    }

    #[test]
    fn not_leader_without_endpoint_is_not_a_redirect() {
        let status = Status::with_metadata(
            Code::NotFound,
            "",
            Metadata::new().with(EXCEPTION, exception::NOT_LEADER),
        );
        assert_eq!(ReconnectionRequired::classify(&status), ReconnectionRequired::None);
    }
}

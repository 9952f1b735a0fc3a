use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use typed_builder::TypedBuilder;

use esdb_core::error::{Error, Result};
use esdb_core::position::StreamStart;

/// How the server spreads a group's events across its consumers.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum ConsumerStrategy {
    #[default]
    RoundRobin,
    DispatchToSingle,
    Pinned,
    PinnedByCorrelation,
}

impl Display for ConsumerStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for ConsumerStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RoundRobin" => Ok(ConsumerStrategy::RoundRobin),
            "DispatchToSingle" => Ok(ConsumerStrategy::DispatchToSingle),
            "Pinned" => Ok(ConsumerStrategy::Pinned),
            "PinnedByCorrelation" => Ok(ConsumerStrategy::PinnedByCorrelation),
            other => Err(Error::InvalidArgument(format!("unknown consumer strategy {}", other))),
        }
    }
}

/// Group settings. `T` is the start point type: a revision for stream groups, a
/// [`esdb_core::position::Position`] for all-stream groups.
#[derive(Debug, Clone, Eq, PartialEq, TypedBuilder)]
pub struct PersistentSubscriptionSettings<T> {
    #[builder(default)]
    pub resolve_link_tos: bool,
    #[builder(default = StreamStart::End)]
    pub start_from: StreamStart<T>,
    #[builder(default)]
    pub extra_statistics: bool,
    #[builder(default = Duration::from_secs(30))]
    pub message_timeout: Duration,
    #[builder(default = 10)]
    pub max_retry_count: u32,
    #[builder(default = 500)]
    pub live_buffer_size: u32,
    #[builder(default = 20)]
    pub read_batch_size: u32,
    #[builder(default = 500)]
    pub history_buffer_size: u32,
    #[builder(default = Duration::from_secs(2))]
    pub checkpoint_after: Duration,
    #[builder(default = 10)]
    pub checkpoint_lower_bound: u32,
    #[builder(default = 1000)]
    pub checkpoint_upper_bound: u32,
    /// Zero means unbounded.
    #[builder(default = 0)]
    pub max_subscriber_count: u32,
    #[builder(default)]
    pub consumer_strategy: ConsumerStrategy,
}

impl<T> Default for PersistentSubscriptionSettings<T> {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<T> PersistentSubscriptionSettings<T> {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("live buffer size", self.live_buffer_size),
            ("read batch size", self.read_batch_size),
            ("history buffer size", self.history_buffer_size),
            ("checkpoint upper bound", self.checkpoint_upper_bound),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::InvalidArgument(format!("{} must be positive", name)));
        }
        if self.checkpoint_lower_bound > self.checkpoint_upper_bound {
            return Err(Error::InvalidArgument(format!(
                "checkpoint lower bound {} exceeds upper bound {}",
                self.checkpoint_lower_bound, self.checkpoint_upper_bound
            )));
        }
        if self.read_batch_size > self.history_buffer_size {
            return Err(Error::InvalidArgument(format!(
                "read batch size {} exceeds history buffer size {}",
                self.read_batch_size, self.history_buffer_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use esdb_core::position::{Position, StreamStart};

    use crate::subscription::persistent_settings::{ConsumerStrategy, PersistentSubscriptionSettings};

    #[test]
    fn server_defaults() {
        let settings = PersistentSubscriptionSettings::<u64>::default();
        assert_eq!(settings.start_from, StreamStart::End);
        assert_eq!(settings.message_timeout, Duration::from_secs(30));
        assert_eq!(settings.max_retry_count, 10);
        assert_eq!(settings.live_buffer_size, 500);
        assert_eq!(settings.read_batch_size, 20);
        assert_eq!(settings.history_buffer_size, 500);
        assert_eq!(settings.checkpoint_after, Duration::from_secs(2));
        assert_eq!((settings.checkpoint_lower_bound, settings.checkpoint_upper_bound), (10, 1000));
        assert_eq!(settings.max_subscriber_count, 0);
        assert_eq!(settings.consumer_strategy, ConsumerStrategy::RoundRobin);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_inconsistent_settings() {
        let inverted = PersistentSubscriptionSettings::<Position>::builder()
            .checkpoint_lower_bound(100)
            .checkpoint_upper_bound(10)
            .build();
        assert!(inverted.validate().is_err());
        let empty_buffer = PersistentSubscriptionSettings::<u64>::builder().live_buffer_size(0).build();
        assert!(empty_buffer.validate().is_err());
        let oversized_batch = PersistentSubscriptionSettings::<u64>::builder()
            .read_batch_size(600)
            .build();
        assert!(oversized_batch.validate().is_err());
    }

    #[test]
    fn strategy_names_round_trip() -> anyhow::Result<()> {
        for strategy in [
            ConsumerStrategy::RoundRobin,
            ConsumerStrategy::DispatchToSingle,
            ConsumerStrategy::Pinned,
            ConsumerStrategy::PinnedByCorrelation,
        ] {
            assert_eq!(strategy.to_string().parse::<ConsumerStrategy>()?, strategy);
        }
        assert!("Fastest".parse::<ConsumerStrategy>().is_err());
        Ok(())
    }
}

use std::fmt::{Display, Formatter};

use itertools::Itertools;
use regex::Regex;
use typed_builder::TypedBuilder;

use esdb_core::error::{Error, Result};
use esdb_core::event::RecordedEvent;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FilterTarget {
    EventType,
    StreamName,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum FilterExpression {
    Prefix(Vec<String>),
    Regex(String),
}

/// Server-side filter of an all-stream subscription.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct SubscriptionFilter {
    pub target: FilterTarget,
    pub expression: FilterExpression,
}

impl SubscriptionFilter {
    pub fn event_type_prefix<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::prefix(FilterTarget::EventType, prefixes)
    }

    pub fn stream_name_prefix<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::prefix(FilterTarget::StreamName, prefixes)
    }

    pub fn event_type_regex(regex: impl Into<String>) -> Self {
        Self {
            target: FilterTarget::EventType,
            expression: FilterExpression::Regex(regex.into()),
        }
    }

    pub fn stream_name_regex(regex: impl Into<String>) -> Self {
        Self {
            target: FilterTarget::StreamName,
            expression: FilterExpression::Regex(regex.into()),
        }
    }

    /// Drops every event whose type starts with `$`.
    pub fn exclude_system_events() -> Self {
        Self::event_type_regex(r"^[^\$].*")
    }

    fn prefix<I, S>(target: FilterTarget, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target,
            expression: FilterExpression::Prefix(prefixes.into_iter().map(Into::into).collect()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.matcher().map(|_| ())
    }

    pub fn matcher(&self) -> Result<FilterMatcher> {
        let rule = match &self.expression {
            FilterExpression::Prefix(prefixes) => {
                if prefixes.is_empty() {
                    return Err(Error::InvalidArgument("filter needs at least one prefix".to_string()));
                }
                if prefixes.iter().any(|prefix| prefix.is_empty()) {
                    return Err(Error::InvalidArgument("filter prefixes must not be empty".to_string()));
                }
                Rule::Prefix(prefixes.clone())
            }
            FilterExpression::Regex(regex) => {
                let regex = Regex::new(regex)
                    .map_err(|error| Error::InvalidArgument(format!("invalid filter regex: {}", error)))?;
                Rule::Regex(regex)
            }
        };
        Ok(FilterMatcher {
            target: self.target,
            rule,
        })
    }
}

impl Display for SubscriptionFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.expression {
            FilterExpression::Prefix(prefixes) => {
                write!(f, "{:?} prefix [{}]", self.target, prefixes.iter().join(", "))
            }
            FilterExpression::Regex(regex) => write!(f, "{:?} regex {}", self.target, regex),
        }
    }
}

#[derive(Debug, Clone)]
enum Rule {
    Prefix(Vec<String>),
    Regex(Regex),
}

/// A validated filter ready to test events.
#[derive(Debug, Clone)]
pub struct FilterMatcher {
    target: FilterTarget,
    rule: Rule,
}

impl FilterMatcher {
    pub fn matches(&self, event: &RecordedEvent) -> bool {
        let value = match self.target {
            FilterTarget::EventType => event.event_type.as_str(),
            FilterTarget::StreamName => event.stream_id.as_str(),
        };
        match &self.rule {
            Rule::Prefix(prefixes) => prefixes.iter().any(|prefix| value.starts_with(prefix.as_str())),
            Rule::Regex(regex) => regex.is_match(value),
        }
    }
}

/// Filter plus the checkpoint cadence. The server raises a checkpoint after scanning
/// `max_search_window * checkpoint_interval_multiplier` events without a match.
#[derive(Debug, Clone, Eq, PartialEq, Hash, TypedBuilder)]
pub struct FilterOptions {
    pub filter: SubscriptionFilter,
    #[builder(default = 32)]
    pub max_search_window: u32,
    #[builder(default = 1)]
    pub checkpoint_interval_multiplier: u32,
}

impl FilterOptions {
    pub fn new(filter: SubscriptionFilter) -> Self {
        Self::builder().filter(filter).build()
    }

    pub fn checkpoint_interval(&self) -> u64 {
        self.max_search_window as u64 * self.checkpoint_interval_multiplier as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_search_window == 0 {
            return Err(Error::InvalidArgument("max search window must be positive".to_string()));
        }
        if self.checkpoint_interval_multiplier == 0 {
            return Err(Error::InvalidArgument("checkpoint interval multiplier must be positive".to_string()));
        }
        self.filter.validate()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bytes::Bytes;
    use uuid::Uuid;

    use esdb_core::error::Error;
    use esdb_core::event::RecordedEvent;
    use esdb_core::position::Position;

    use crate::subscription::filter::{FilterOptions, SubscriptionFilter};

    fn event(stream: &str, event_type: &str) -> RecordedEvent {
        RecordedEvent {
            id: Uuid::new_v4(),
            stream_id: stream.to_string(),
            revision: 0,
            position: Position::START,
            event_type: event_type.to_string(),
            is_json: true,
            metadata: HashMap::new(),
            custom_metadata: Bytes::new(),
            data: Bytes::new(),
        }
    }

    #[test]
    fn prefix_filters() -> anyhow::Result<()> {
        let by_type = SubscriptionFilter::event_type_prefix(["order-", "invoice-"]).matcher()?;
        assert!(by_type.matches(&event("s", "order-placed")));
        assert!(by_type.matches(&event("s", "invoice-sent")));
        assert!(!by_type.matches(&event("order-1", "shipped")));

        let by_stream = SubscriptionFilter::stream_name_prefix(["order-"]).matcher()?;
        assert!(by_stream.matches(&event("order-1", "shipped")));
        assert!(!by_stream.matches(&event("user-1", "order-placed")));
        Ok(())
    }

    #[test]
    fn regex_filters_and_system_events() -> anyhow::Result<()> {
        let matcher = SubscriptionFilter::stream_name_regex("^user-[0-9]+$").matcher()?;
        assert!(matcher.matches(&event("user-42", "x")));
        assert!(!matcher.matches(&event("user-x", "x")));

        let no_system = SubscriptionFilter::exclude_system_events().matcher()?;
        assert!(no_system.matches(&event("s", "order-placed")));
        assert!(!no_system.matches(&event("s", "$metadata")));
        Ok(())
    }

    #[test]
    fn invalid_filters_are_rejected() {
        assert!(matches!(
            SubscriptionFilter::event_type_regex("(unclosed").validate(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(SubscriptionFilter::event_type_prefix(Vec::<String>::new()).validate().is_err());
        assert!(SubscriptionFilter::event_type_prefix([""]).validate().is_err());
        let options = FilterOptions::builder()
            .filter(SubscriptionFilter::exclude_system_events())
            .max_search_window(0)
            .build();
        assert!(options.validate().is_err());
    }

    #[test]
    fn checkpoint_interval_multiplies_window() {
        let options = FilterOptions::builder()
            .filter(SubscriptionFilter::exclude_system_events())
            .max_search_window(4)
            .checkpoint_interval_multiplier(3)
            .build();
        assert_eq!(options.checkpoint_interval(), 12);
        assert_eq!(FilterOptions::new(SubscriptionFilter::exclude_system_events()).checkpoint_interval(), 32);
    }
}

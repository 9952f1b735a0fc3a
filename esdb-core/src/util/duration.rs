use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Table form of a duration used in configuration files, e.g. `{ seconds = 5 }`.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConfigDuration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    days: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    milliseconds: Option<u64>,
}

impl ConfigDuration {
    pub fn to_std_duration(&self) -> Duration {
        let days = self.days.unwrap_or(0);
        let hours = self.hours.unwrap_or(0);
        let minutes = self.minutes.unwrap_or(0);
        let seconds = self.seconds.unwrap_or(0);
        let milliseconds = self.milliseconds.unwrap_or(0);
        let duration = Duration::from_secs(
            days * 24 * 60 * 60 + hours * 60 * 60 + minutes * 60 + seconds,
        );
        duration + Duration::from_millis(milliseconds)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self {
            milliseconds: Some(millis),
            ..Default::default()
        }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self {
            seconds: Some(secs),
            ..Default::default()
        }
    }

    pub fn from_mins(mins: u64) -> Self {
        Self {
            minutes: Some(mins),
            ..Default::default()
        }
    }
}

impl From<Duration> for ConfigDuration {
    fn from(value: Duration) -> Self {
        Self::from_millis(value.as_millis() as u64)
    }
}

impl From<ConfigDuration> for Duration {
    fn from(value: ConfigDuration) -> Self {
        value.to_std_duration()
    }
}

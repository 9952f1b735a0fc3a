use std::time::Duration;

use anyhow::anyhow;
use config::builder::DefaultState;
use config::{File, FileFormat, Source};
use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::node_preference::NodePreference;
use crate::util::duration::ConfigDuration;
use crate::CLIENT_CONFIG;

/// Connection settings consumed by discovery and call dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    pub seeds: Vec<Endpoint>,
    pub dns_discover: bool,
    pub node_preference: NodePreference,
    pub max_discover_attempts: usize,
    pub discovery_interval: ConfigDuration,
    pub gossip_timeout: ConfigDuration,
    #[serde(default)]
    pub default_deadline: Option<ConfigDuration>,
    pub keep_alive_interval: ConfigDuration,
    pub keep_alive_timeout: ConfigDuration,
    pub tls: bool,
}

impl ClientSettings {
    pub fn builder() -> ClientSettingsBuilder {
        ClientSettingsBuilder::default()
    }

    /// Defaults with the given seeds, no files or environment involved.
    pub fn with_seeds(seeds: impl IntoIterator<Item = Endpoint>) -> anyhow::Result<Self> {
        let mut settings = Self::builder().build()?;
        settings.seeds = seeds.into_iter().collect();
        settings.dns_discover = false;
        settings.validate()?;
        Ok(settings)
    }

    /// Gossip discovery is used unless a single seed is configured without dns discovery.
    pub fn is_cluster(&self) -> bool {
        self.dns_discover || self.seeds.len() > 1
    }

    pub fn discovery_interval(&self) -> Duration {
        self.discovery_interval.to_std_duration()
    }

    pub fn gossip_timeout(&self) -> Duration {
        self.gossip_timeout.to_std_duration()
    }

    pub fn default_deadline(&self) -> Option<Duration> {
        self.default_deadline.map(|d| d.to_std_duration())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.seeds.is_empty() {
            return Err(anyhow!("at least one seed endpoint is required"));
        }
        if self.max_discover_attempts < 1 {
            return Err(anyhow!("max_discover_attempts must be >= 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ClientSettingsBuilder {
    builder: config::ConfigBuilder<DefaultState>,
}

impl ClientSettingsBuilder {
    pub fn add_source<T>(self, source: T) -> anyhow::Result<Self>
    where
        T: Source + Send + Sync + 'static,
    {
        Ok(Self { builder: self.builder.add_source(source) })
    }

    pub fn set_override<S>(self, key: &str, value: S) -> anyhow::Result<Self>
    where
        S: Into<config::Value>,
    {
        Ok(Self { builder: self.builder.set_override(key, value)? })
    }

    pub fn build(self) -> anyhow::Result<ClientSettings> {
        let defaults = config::Config::builder().add_source(File::from_str(CLIENT_CONFIG, FileFormat::Toml));
        let builder = defaults.add_source(self.builder.build()?);
        let settings = builder.build()?.try_deserialize::<ClientSettings>()?;
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use config::{File, FileFormat};

    use crate::endpoint::Endpoint;
    use crate::node_preference::NodePreference;
    use crate::settings::ClientSettings;

    #[test]
    fn defaults() -> anyhow::Result<()> {
        let settings = ClientSettings::builder().build()?;
        assert_eq!(settings.seeds, vec![Endpoint::new("127.0.0.1", 2113)]);
        assert_eq!(settings.node_preference, NodePreference::Leader);
        assert_eq!(settings.max_discover_attempts, 10);
        assert_eq!(settings.discovery_interval(), Duration::from_millis(100));
        assert_eq!(settings.gossip_timeout(), Duration::from_secs(5));
        assert_eq!(settings.default_deadline(), None);
        assert!(!settings.is_cluster());
        Ok(())
    }

    #[test]
    fn override_from_source() -> anyhow::Result<()> {
        let overrides = r#"
seeds = ["node1:2113", "node2:2113", "node3:2113"]
node_preference = "Follower"
max_discover_attempts = 3

[default_deadline]
seconds = 30
"#;
        let settings = ClientSettings::builder()
            .add_source(File::from_str(overrides, FileFormat::Toml))?
            .build()?;
        assert_eq!(settings.seeds.len(), 3);
        assert_eq!(settings.node_preference, NodePreference::Follower);
        assert_eq!(settings.max_discover_attempts, 3);
        assert_eq!(settings.default_deadline(), Some(Duration::from_secs(30)));
        assert_eq!(settings.gossip_timeout(), Duration::from_secs(5));
        assert!(settings.is_cluster());
        Ok(())
    }

    #[test]
    fn reject_zero_attempts() -> anyhow::Result<()> {
        let result = ClientSettings::builder()
            .set_override("max_discover_attempts", 0)?
            .build();
        assert!(result.is_err());
        Ok(())
    }
}

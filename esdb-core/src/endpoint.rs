use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

/// Network address of one cluster node. Equality is by value, so it is usable as a cache key.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or(anyhow!("endpoint {} must be in host:port form", s))?;
        if host.is_empty() {
            return Err(anyhow!("endpoint {} has an empty host", s));
        }
        let port = port
            .parse::<u16>()
            .with_context(|| format!("endpoint {} has an invalid port", s))?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use crate::endpoint::Endpoint;

    #[test]
    fn parse_endpoint() -> anyhow::Result<()> {
        let endpoint: Endpoint = "node1.cluster:2113".parse()?;
        assert_eq!(endpoint, Endpoint::new("node1.cluster", 2113));
        assert_eq!(endpoint.to_string(), "node1.cluster:2113");
        Ok(())
    }

    #[test]
    fn reject_malformed_endpoint() {
        assert!("localhost".parse::<Endpoint>().is_err());
        assert!(":2113".parse::<Endpoint>().is_err());
        assert!("localhost:http".parse::<Endpoint>().is_err());
        assert!("localhost:70000".parse::<Endpoint>().is_err());
    }
}

//! Published port inspection.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use stevedore_common::error::RuntimeError;

/// A container port with its protocol, e.g. `3306/tcp`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerPort {
    /// Port inside the container.
    pub port: u16,
    /// Transport protocol.
    pub protocol: String,
}

impl fmt::Display for ContainerPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

/// Host ports bound to each container port of one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMap {
    bindings: BTreeMap<ContainerPort, Vec<u16>>,
}

impl PortMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `host` forwards to `container`.
    pub fn bind(&mut self, container: ContainerPort, host: u16) {
        let hosts = self.bindings.entry(container).or_default();
        if !hosts.contains(&host) {
            hosts.push(host);
        }
    }

    /// First host port bound to `port` over TCP.
    #[must_use]
    pub fn host_port(&self, port: u16) -> Option<u16> {
        self.bindings
            .iter()
            .find(|(c, _)| c.port == port && c.protocol == "tcp")
            .and_then(|(_, hosts)| hosts.first().copied())
    }

    /// Lowest published TCP host port, if any.
    #[must_use]
    pub fn first_tcp_host_port(&self) -> Option<u16> {
        self.bindings
            .iter()
            .filter(|(c, _)| c.protocol == "tcp")
            .find_map(|(_, hosts)| hosts.first().copied())
    }

    /// Iterates over `(container port, host ports)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&ContainerPort, &[u16])> {
        self.bindings.iter().map(|(c, h)| (c, h.as_slice()))
    }

    /// Returns `true` when nothing is published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.values().all(Vec::is_empty)
    }

    /// Parses the `NetworkSettings.Ports` object reported by `docker inspect`.
    ///
    /// Unpublished ports (`null` bindings) are omitted.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::UnexpectedOutput`] if the document does not
    /// have the expected shape.
    pub fn from_inspect_json(container: &str, raw: &str) -> Result<Self, RuntimeError> {
        #[derive(Deserialize)]
        struct Binding {
            #[serde(rename = "HostPort")]
            host_port: String,
        }

        let unexpected = || RuntimeError::UnexpectedOutput {
            query: format!("ports of {container}"),
            output: raw.to_string(),
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "null" || trimmed == "{}" {
            return Ok(Self::new());
        }
        let doc: BTreeMap<String, Option<Vec<Binding>>> =
            serde_json::from_str(trimmed).map_err(|_| unexpected())?;

        let mut map = Self::new();
        for (key, bindings) in doc {
            let (port, protocol) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
            let port = port.parse().map_err(|_| unexpected())?;
            for binding in bindings.unwrap_or_default() {
                if binding.host_port.is_empty() {
                    continue;
                }
                let host = binding.host_port.parse().map_err(|_| unexpected())?;
                map.bind(
                    ContainerPort {
                        port,
                        protocol: protocol.to_string(),
                    },
                    host,
                );
            }
        }
        Ok(map)
    }
}

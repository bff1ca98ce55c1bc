//! Shared data model for the Stevedore control plane.
//!
//! These are the wire shapes stored in Redis: instances as `host:port`
//! strings inside per-app sets, deployment records as JSON list entries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One running container of one app, identified by `host:port`.
///
/// Membership of the serialized form in the `{app}:instances` set is the
/// source of truth for "this instance currently receives traffic".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instance {
    pub host: String,
    pub port: u16,
}

impl Instance {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The `host:port` endpoint string used in the store and by probes.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Instance {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| StoreError::BadInstance(s.to_string()))?;
        if host.is_empty() {
            return Err(StoreError::BadInstance(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| StoreError::BadInstance(s.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Immutable log entry appended to `deployments:{app}` on every successful
/// app-level deploy. Never mutated, only read back most-recent-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Unix timestamp (seconds) of the deploy.
    pub timestamp: u64,
    pub app: String,
    pub image: String,
    pub count: u32,
}

/// A container image reference split into pull coordinates.
///
/// `images/create` wants the name and tag as separate query parameters, so
/// `user/repo:tag` is split on the last colon after the last slash. A
/// missing tag defaults to `latest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    pub fn parse(image: &str) -> Self {
        let split_at = image.rfind(':').filter(|&i| i > image.rfind('/').unwrap_or(0));
        match split_at {
            Some(i) => Self {
                name: image[..i].to_string(),
                tag: image[i + 1..].to_string(),
            },
            None => Self {
                name: image.to_string(),
                tag: "latest".to_string(),
            },
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

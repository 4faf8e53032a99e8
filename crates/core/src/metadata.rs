//! Entry metadata

use crate::version::VectorClock;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Expiration settings and version of an entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Time the entry lives after being written, in milliseconds
    pub lifespan_ms: Option<u64>,
    /// Version stamp, when versioning is enabled
    pub version: Option<VectorClock>,
}

impl Metadata {
    /// Metadata without expiration or version
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lifespan
    pub fn with_lifespan(mut self, lifespan: Duration) -> Self {
        self.lifespan_ms = Some(lifespan.as_millis() as u64);
        self
    }

    /// Set the version
    pub fn with_version(mut self, version: VectorClock) -> Self {
        self.version = Some(version);
        self
    }

    /// Lifespan as a duration
    pub fn lifespan(&self) -> Option<Duration> {
        self.lifespan_ms.map(Duration::from_millis)
    }
}

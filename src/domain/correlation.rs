//! Correlation identifiers
//!
//! Ids are `{prefix}-{counter}`: the prefix is random per generator, the
//! counter is strictly increasing, so two live requests can never share an id.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Payload field that carries the correlation id in both directions.
pub const CORRELATION_FIELD: &str = "requestId";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

pub struct CorrelationIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl CorrelationIdGenerator {
    pub fn new() -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self::with_prefix(&uuid[..8])
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            counter: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> CorrelationId {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        CorrelationId(format!("{}-{}", self.prefix, n))
    }
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

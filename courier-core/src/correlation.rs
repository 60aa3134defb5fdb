//! Correlation context.
//!
//! A [`CorrelationContext`] identifies one logical request across every hop it
//! makes. It is created once (inherited from an inbound header or generated),
//! then passed by value into every execution unit that works on the request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Standard headers used for correlation.
pub mod headers {
    /// Correlation ID header carried on inbound and outbound requests.
    pub const CORRELATION_ID: &str = "X-Correlation-ID";
    /// Request ID header accepted as a fallback on inbound requests.
    pub const REQUEST_ID: &str = "X-Request-ID";
}

/// Snapshot key holding the correlation id.
pub const CORRELATION_ID_KEY: &str = "correlationId";

/// Immutable request-scoped correlation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationContext {
    correlation_id: String,
    spawned_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    baggage: BTreeMap<String, String>,
}

impl CorrelationContext {
    /// Create a context with a freshly generated id.
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    /// Create a context around an existing id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            correlation_id: id.into(),
            spawned_at: Utc::now(),
            baggage: BTreeMap::new(),
        }
    }

    /// Inherit `incoming` when it is present and non-blank, otherwise generate a new id.
    ///
    /// # Examples
    ///
    /// ```
    /// use courier_core::CorrelationContext;
    ///
    /// let inherited = CorrelationContext::ensure(Some("abc-123"));
    /// assert_eq!(inherited.correlation_id(), "abc-123");
    ///
    /// let generated = CorrelationContext::ensure(Some("   "));
    /// assert_ne!(generated.correlation_id(), "   ");
    /// ```
    pub fn ensure(incoming: Option<&str>) -> Self {
        match incoming.map(str::trim) {
            Some(id) if !id.is_empty() => Self::with_id(id),
            _ => Self::new(),
        }
    }

    /// Add a request-scoped key/value pair that travels with the id.
    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if key != CORRELATION_ID_KEY {
            self.baggage.insert(key, value.into());
        }
        self
    }

    /// The correlation id.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// When this context was created.
    pub fn spawned_at(&self) -> DateTime<Utc> {
        self.spawned_at
    }

    /// Look up a baggage item.
    pub fn baggage(&self, key: &str) -> Option<&str> {
        self.baggage.get(key).map(String::as_str)
    }

    /// Flatten into a snapshot that can cross an execution boundary.
    pub fn to_snapshot(&self) -> ContextSnapshot {
        let mut values = self.baggage.clone();
        values.insert(CORRELATION_ID_KEY.to_string(), self.correlation_id.clone());
        ContextSnapshot(values)
    }

    /// Rebuild a context from a snapshot.
    ///
    /// Returns `None` when the snapshot carries no usable correlation id.
    pub fn from_snapshot(snapshot: &ContextSnapshot) -> Option<Self> {
        let id = snapshot.correlation_id()?.trim();
        if id.is_empty() {
            return None;
        }

        let baggage = snapshot
            .0
            .iter()
            .filter(|(k, _)| k.as_str() != CORRELATION_ID_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Some(Self {
            correlation_id: id.to_string(),
            spawned_at: Utc::now(),
            baggage,
        })
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.correlation_id)
    }
}

/// Plain key/value copy of the active request-scoped values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot(BTreeMap<String, String>);

impl ContextSnapshot {
    /// An empty snapshot ("no correlation id").
    pub fn empty() -> Self {
        Self::default()
    }

    /// The captured correlation id, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.get(CORRELATION_ID_KEY)
    }

    /// Look up a captured value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the raw map.
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl From<BTreeMap<String, String>> for ContextSnapshot {
    fn from(values: BTreeMap<String, String>) -> Self {
        Self(values)
    }
}

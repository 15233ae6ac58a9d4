//! Keyed result types produced by feed handlers.
//!
//! A `ResultBatch` is the unit a handler streams to its consumer: every
//! parsed frame yields at most one batch, and handshake failures yield one
//! batch marking every requested key unresolved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;

/// Bound for keys tracked by a feed (e.g., `CurrencyPair`).
pub trait QueryKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> QueryKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Bound for observation payloads (e.g., a decimal price).
pub trait QueryValue: Clone + Debug + Send + Sync + 'static {}

impl<T> QueryValue for T where T: Clone + Debug + Send + Sync + 'static {}

/// Lifecycle phase a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Dial,
    BuildSubscription,
    Write,
    Read,
    Parse,
    Close,
}

impl ErrorKind {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dial => "dial",
            Self::BuildSubscription => "build_subscription",
            Self::Write => "write",
            Self::Read => "read",
            Self::Parse => "parse",
            Self::Close => "close",
        }
    }

    /// Whether this kind is reported per key (handshake failures only).
    pub fn is_attributable(&self) -> bool {
        matches!(self, Self::Dial | Self::BuildSubscription | Self::Write)
    }

    /// Whether the session survives this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Parse)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved value and the time it was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation<V> {
    pub value: V,
    pub timestamp: DateTime<Utc>,
}

impl<V> Observation<V> {
    /// Create an observation stamped with the current time.
    pub fn new(value: V) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
        }
    }
}

/// One delta of keyed results.
///
/// A key is never present in both `resolved` and `unresolved`: inserting on
/// one side evicts the key from the other.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultBatch<K: QueryKey, V> {
    resolved: HashMap<K, Observation<V>>,
    unresolved: HashMap<K, ErrorKind>,
}

impl<K: QueryKey, V> Default for ResultBatch<K, V> {
    fn default() -> Self {
        Self {
            resolved: HashMap::new(),
            unresolved: HashMap::new(),
        }
    }
}

impl<K: QueryKey, V> ResultBatch<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch from both maps. A key present in both is kept as resolved.
    pub fn from_parts(
        resolved: HashMap<K, Observation<V>>,
        mut unresolved: HashMap<K, ErrorKind>,
    ) -> Self {
        unresolved.retain(|key, _| !resolved.contains_key(key));
        Self {
            resolved,
            unresolved,
        }
    }

    /// Build a batch marking every key unresolved with the same cause.
    pub fn unresolved_all<'a, I>(keys: I, kind: ErrorKind) -> Self
    where
        I: IntoIterator<Item = &'a K>,
    {
        Self {
            resolved: HashMap::new(),
            unresolved: keys.into_iter().map(|key| (key.clone(), kind)).collect(),
        }
    }

    pub fn insert_resolved(&mut self, key: K, observation: Observation<V>) {
        self.unresolved.remove(&key);
        self.resolved.insert(key, observation);
    }

    pub fn insert_unresolved(&mut self, key: K, kind: ErrorKind) {
        self.resolved.remove(&key);
        self.unresolved.insert(key, kind);
    }

    pub fn resolved(&self) -> &HashMap<K, Observation<V>> {
        &self.resolved
    }

    pub fn unresolved(&self) -> &HashMap<K, ErrorKind> {
        &self.unresolved
    }

    /// Total number of keys carried by this batch.
    pub fn len(&self) -> usize {
        self.resolved.len() + self.unresolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty() && self.unresolved.is_empty()
    }

    /// Drop every entry whose key does not satisfy `keep`.
    ///
    /// Returns the number of entries removed.
    pub fn retain_keys<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let before = self.len();
        self.resolved.retain(|key, _| keep(key));
        self.unresolved.retain(|key, _| keep(key));
        before - self.len()
    }
}

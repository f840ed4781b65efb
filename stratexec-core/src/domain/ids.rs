use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution id supplied by the caller; the idempotency key of an exec call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecId(pub String);

impl ExecId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ExecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-assigned order identity. Resubmitting the same `UniqueId` never
/// creates a second logical order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueId(pub String);

impl UniqueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Deterministic id for the `seq`-th order created during exec `exec_id`.
    ///
    /// Format is `{exec_id}_{8 hex chars}` where the suffix is the BLAKE3 hash
    /// of the exec id and sequence number, so replays produce identical ids.
    pub fn derive(exec_id: &ExecId, seq: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(exec_id.0.as_bytes());
        hasher.update(&seq.to_le_bytes());
        let hex = hasher.finalize().to_hex();
        Self(format!("{}_{}", exec_id.0, &hex.as_str()[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Venue-assigned order id. Absent until the venue accepts the order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serialization key for exec calls: calls for the same (account, strategy)
/// run one at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyKey {
    pub account: String,
    pub strategy: String,
}

impl StrategyKey {
    pub fn new(account: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self { account: account.into(), strategy: strategy.into() }
    }
}

impl fmt::Display for StrategyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_unique_ids_are_deterministic() {
        let exec = ExecId::new("exec-42");
        assert_eq!(UniqueId::derive(&exec, 0), UniqueId::derive(&exec, 0));
        assert_ne!(UniqueId::derive(&exec, 0), UniqueId::derive(&exec, 1));
    }

    #[test]
    fn derived_unique_id_format() {
        let id = UniqueId::derive(&ExecId::new("abc"), 3);
        let (prefix, suffix) = id.as_str().rsplit_once('_').unwrap();
        assert_eq!(prefix, "abc");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&OrderId::new("123")).unwrap();
        assert_eq!(json, "\"123\"");
    }
}

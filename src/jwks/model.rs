// src/jwks/model.rs

use serde::{Deserialize, Serialize};

/// Represents a JSON Web Key Set (JWKS) as served by the identity provider.
///
/// Keys are kept as raw JSON so that a single key of an unsupported type does
/// not make the whole set unusable.
#[derive(Debug, Deserialize, Serialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<serde_json::Value>,
}

/// A key set as written to a `KeySetStore`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistedKeySet {
    /// Unix timestamp (seconds) of the network fetch that produced the set.
    pub fetched_at: u64,
    pub ttl_secs: u64,
    /// The JWKS document exactly as the provider served it.
    pub jwks: serde_json::Value,
}

//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use crate::domain::ports::CacheError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Server selection strategy used by the load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Cycle through healthy servers in insertion order
    RoundRobin,
    /// Pick the server with the fewest in-flight requests
    LeastConnections,
    /// Weighted random sampling proportional to server weight
    WeightedRoundRobin,
    /// Uniform random choice
    Random,
    /// Composite score of latency, error rate and load
    HealthBased,
}

impl Strategy {
    /// Parse a strategy name.
    ///
    /// # Examples
    /// ```
    /// use traffic_pool::domain::value_objects::Strategy;
    ///
    /// assert_eq!(Strategy::from_str("least_connections"), Strategy::LeastConnections);
    /// assert_eq!(Strategy::from_str("unknown"), Strategy::RoundRobin); // fallback
    /// ```
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "round_robin" => Self::RoundRobin,
            "least_connections" => Self::LeastConnections,
            "weighted_round_robin" => Self::WeightedRoundRobin,
            "random" => Self::Random,
            "health_based" => Self::HealthBased,
            _ => Self::RoundRobin, // fallback
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastConnections => "least_connections",
            Self::WeightedRoundRobin => "weighted_round_robin",
            Self::Random => "random",
            Self::HealthBased => "health_based",
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Uninitialized,
    Initializing,
    Active,
    Closed,
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolState::Uninitialized => write!(f, "uninitialized"),
            PoolState::Initializing => write!(f, "initializing"),
            PoolState::Active => write!(f, "active"),
            PoolState::Closed => write!(f, "closed"),
        }
    }
}

/// Storage tier a cache operation was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Remote,
    Local,
}

const TEXT_TAG: &str = "text:";
const BINARY_TAG: &str = "binary:";

/// Tagged serialized form of a cached value.
///
/// Scalars (strings, numbers, booleans, null) are stored as their JSON text.
/// Composite values (arrays, objects) are stored as hex-encoded JSON bytes.
/// The tag travels with the payload so decoding never has to guess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePayload {
    Text(String),
    Binary(Vec<u8>),
}

impl CachePayload {
    /// Serialize a value into its tagged form.
    pub fn from_value<T: Serialize + ?Sized>(value: &T) -> Result<Self, CacheError> {
        let json = serde_json::to_value(value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        match json {
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                let bytes = serde_json::to_vec(&json)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                Ok(Self::Binary(bytes))
            }
            scalar => Ok(Self::Text(scalar.to_string())),
        }
    }

    /// Deserialize the payload into a concrete type.
    pub fn to_value<T: DeserializeOwned>(&self) -> Result<T, CacheError> {
        let result = match self {
            Self::Text(text) => serde_json::from_str(text),
            Self::Binary(bytes) => serde_json::from_slice(bytes),
        };
        result.map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// Encode into the string stored by either tier.
    pub fn encode(&self) -> String {
        match self {
            Self::Text(text) => format!("{}{}", TEXT_TAG, text),
            Self::Binary(bytes) => format!("{}{}", BINARY_TAG, hex::encode(bytes)),
        }
    }

    /// Parse a stored string back into a payload.
    pub fn decode(raw: &str) -> Result<Self, CacheError> {
        if let Some(text) = raw.strip_prefix(TEXT_TAG) {
            return Ok(Self::Text(text.to_string()));
        }
        if let Some(encoded) = raw.strip_prefix(BINARY_TAG) {
            return hex::decode(encoded)
                .map(Self::Binary)
                .map_err(|e| CacheError::Serialization(format!("invalid hex payload: {}", e)));
        }
        Err(CacheError::Serialization("missing payload tag".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(Strategy::from_str("round_robin"), Strategy::RoundRobin);
        assert_eq!(Strategy::from_str("LEAST_CONNECTIONS"), Strategy::LeastConnections);
        assert_eq!(Strategy::from_str("weighted-round-robin"), Strategy::WeightedRoundRobin);
        assert_eq!(Strategy::from_str("random"), Strategy::Random);
        assert_eq!(Strategy::from_str(" health_based "), Strategy::HealthBased);
    }

    #[test]
    fn test_strategy_fallback() {
        assert_eq!(Strategy::from_str(""), Strategy::RoundRobin);
        assert_eq!(Strategy::from_str("fastest"), Strategy::RoundRobin);
        assert_eq!(Strategy::default(), Strategy::RoundRobin);
    }

    #[test]
    fn test_strategy_as_str_matches_parse() {
        for strategy in [
            Strategy::RoundRobin,
            Strategy::LeastConnections,
            Strategy::WeightedRoundRobin,
            Strategy::Random,
            Strategy::HealthBased,
        ] {
            assert_eq!(Strategy::from_str(strategy.as_str()), strategy);
        }
    }

    #[test]
    fn test_strategy_serde_name() {
        let encoded = serde_json::to_string(&Strategy::HealthBased).unwrap();
        assert_eq!(encoded, "\"health_based\"");
    }

    #[test]
    fn test_pool_state_display() {
        assert_eq!(PoolState::Uninitialized.to_string(), "uninitialized");
        assert_eq!(PoolState::Active.to_string(), "active");
        assert_eq!(PoolState::Closed.to_string(), "closed");
    }

    #[test]
    fn test_scalars_use_text_tag() {
        assert_eq!(CachePayload::from_value(&42).unwrap().encode(), "text:42");
        assert_eq!(CachePayload::from_value("hi").unwrap().encode(), "text:\"hi\"");
        assert_eq!(CachePayload::from_value(&true).unwrap().encode(), "text:true");
        assert_eq!(CachePayload::from_value(&Option::<u8>::None).unwrap().encode(), "text:null");
    }

    #[test]
    fn test_composites_use_binary_tag() {
        let payload = CachePayload::from_value(&json!({"suv": 4.2})).unwrap();
        let encoded = payload.encode();
        assert!(encoded.starts_with("binary:"));
        assert!(encoded["binary:".len()..].chars().all(|c| c.is_ascii_hexdigit()));

        let decoded = CachePayload::decode(&encoded).unwrap();
        let value: serde_json::Value = decoded.to_value().unwrap();
        assert_eq!(value, json!({"suv": 4.2}));
    }

    #[test]
    fn test_text_payload_with_colons_survives() {
        let payload = CachePayload::from_value("a:b:c").unwrap();
        let decoded = CachePayload::decode(&payload.encode()).unwrap();
        let value: String = decoded.to_value().unwrap();
        assert_eq!(value, "a:b:c");
    }

    #[test]
    fn test_decode_rejects_untagged() {
        assert!(matches!(
            CachePayload::decode("42"),
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_hex() {
        assert!(matches!(
            CachePayload::decode("binary:zz"),
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn test_to_value_type_mismatch() {
        let payload = CachePayload::from_value("text").unwrap();
        let result: Result<u32, _> = payload.to_value();
        assert!(result.is_err());
    }
}

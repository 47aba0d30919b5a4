//! The Store abstraction: loads/saves the three artifacts (config source,
//! state map, error-notification template), either from the local
//! filesystem or through the remote admin API.

mod local;
mod remote;

pub use local::LocalStore;
pub use remote::RemoteStore;

use crate::model::FeedState;
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

pub type StateMap = BTreeMap<String, FeedState>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response from the remote backend, carrying the payload when
    /// the body parsed as `{"error": "..."}`.
    #[error("remote store error ({status}): {message}")]
    Remote { status: u16, message: String },
}

pub const DEFAULT_ERROR_TEMPLATE: &str = "⚠️ Feed error: %v";

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub config_source: String,
    pub state: StateMap,
    pub error_template: String,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn load_snapshot(&self) -> Result<Snapshot, StoreError> {
        Ok(Snapshot {
            config_source: self.load_config().await?,
            state: self.load_state().await?,
            error_template: self.load_error_template().await?,
        })
    }

    async fn load_config(&self) -> Result<String, StoreError>;
    async fn load_state(&self) -> Result<StateMap, StoreError>;
    async fn load_error_template(&self) -> Result<String, StoreError>;

    async fn save_config(&self, source: &str) -> Result<(), StoreError>;
    async fn save_state(&self, state: &StateMap) -> Result<(), StoreError>;
    async fn save_state_json(&self, raw: &str) -> Result<(), StoreError>;
    async fn save_error_template(&self, template: &str) -> Result<(), StoreError>;
}

/// `UnmarshalStateMap(MarshalStateMap(m)) == m` for all non-null maps; empty
/// bytes unmarshal to an empty map.
pub fn marshal_state_map(state: &StateMap) -> Result<String, StoreError> {
    Ok(serde_json::to_string_pretty(state)?)
}

pub fn unmarshal_state_map(raw: &str) -> Result<StateMap, StoreError> {
    if raw.trim().is_empty() {
        return Ok(StateMap::new());
    }
    let parsed: serde_json::Value = serde_json::from_str(raw)?;
    if parsed.is_null() {
        return Ok(StateMap::new());
    }
    Ok(serde_json::from_value(parsed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeedState;

    #[test]
    fn round_trip_empty_map() {
        let m = StateMap::new();
        let raw = marshal_state_map(&m).unwrap();
        assert_eq!(unmarshal_state_map(&raw).unwrap(), m);
    }

    #[test]
    fn round_trip_nonempty_map() {
        let mut m = StateMap::new();
        m.insert("https://example.com/feed".into(), FeedState::default());
        let raw = marshal_state_map(&m).unwrap();
        assert_eq!(unmarshal_state_map(&raw).unwrap(), m);
    }

    #[test]
    fn empty_bytes_unmarshal_to_empty_map() {
        assert_eq!(unmarshal_state_map("").unwrap(), StateMap::new());
        assert_eq!(unmarshal_state_map("   ").unwrap(), StateMap::new());
    }

    #[test]
    fn null_unmarshals_to_empty_map() {
        assert_eq!(unmarshal_state_map("null").unwrap(), StateMap::new());
    }
}

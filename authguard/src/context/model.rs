//! Authentication flow context

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// State shared by the steps of one login flow
///
/// `version == 0` means the context was never written; such a context is
/// synthesized on load and only persisted once a step saves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationFlowContext {
    /// Correlation id of the flow instance
    pub transaction_id: String,
    /// Bumped by every writer
    pub version: u64,
    /// Flow attributes
    #[serde(default)]
    pub data: Map<String, Value>,
    /// When this version was written
    pub created_at: DateTime<Utc>,
    /// When the store may drop this version
    pub expire_at: DateTime<Utc>,
}

impl AuthenticationFlowContext {
    /// Unsaved context (`version = 0`) for a transaction
    pub fn new(transaction_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            version: 0,
            data: Map::new(),
            created_at: now,
            expire_at: now,
        }
    }

    /// Whether the context has never been persisted
    pub fn is_fresh(&self) -> bool {
        self.version == 0
    }

    /// Read one attribute
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Set one attribute, returning the previous value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.insert(name.into(), value.into())
    }
}

use async_trait::async_trait;
use serde_json::Value as Json;
use thiserror::Error;

use crate::{ResourceTarget, Subscription};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} `{name}` not found")]
    NotFound { kind: String, name: String },
    #[error("{kind} `{name}` conflict: {reason}")]
    Conflict { kind: String, name: String, reason: String },
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl StoreError {
    pub fn not_found(target: &ResourceTarget, name: &str) -> Self {
        StoreError::NotFound { kind: target.kind.clone(), name: name.to_string() }
    }

    pub fn conflict(target: &ResourceTarget, name: &str, reason: impl Into<String>) -> Self {
        StoreError::Conflict { kind: target.kind.clone(), name: name.to_string(), reason: reason.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Eventually-consistent document store: whole-document CRUD plus change watches.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, target: &ResourceTarget, name: &str) -> StoreResult<Json>;

    async fn create(&self, target: &ResourceTarget, doc: &Json) -> StoreResult<Json>;

    /// Whole-document replace. A stale `metadata.resourceVersion` is a `Conflict`.
    async fn replace(&self, target: &ResourceTarget, name: &str, doc: &Json) -> StoreResult<Json>;

    /// Number of removed objects.
    async fn delete(&self, target: &ResourceTarget, name: &str) -> StoreResult<usize>;

    async fn list(&self, target: &ResourceTarget) -> StoreResult<Vec<Json>>;

    /// Subscribe to changes of the kind, or of one named object. The subscription is
    /// live when this returns: every later mutation is observed.
    async fn watch(&self, target: &ResourceTarget, name: Option<&str>) -> StoreResult<Subscription>;
}

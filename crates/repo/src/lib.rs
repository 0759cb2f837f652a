//! Kope repo: typed CRUD and watches for one resource kind over a [`Store`].

#![forbid(unsafe_code)]

use std::marker::PhantomData;
use std::sync::Arc;

use kope_core::{Describe, ResourceIdentity, SchemaError};
use kope_kubehub::{ResourceTarget, Store, StoreError};
use kope_marshal::{marshal, unmarshal, MarshalError};
use metrics::counter;
use serde_json::{json, Value as Json};
use thiserror::Error;
use tracing::debug;

mod watch;

pub use watch::{Watch, WatchEvent};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{kind} is {scope}: {reason}")]
    ScopeMismatch { kind: String, scope: &'static str, reason: &'static str },
    #[error("{kind} `{name}`: {reason}")]
    IllegalState { kind: String, name: String, reason: String },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error("{op} {kind} `{name}`: {source}")]
    Store {
        op: &'static str,
        kind: String,
        name: String,
        #[source]
        source: StoreError,
    },
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Typed access to the instances of `T`, bound to one namespace for namespaced kinds.
pub struct Repository<T> {
    store: Arc<dyn Store>,
    identity: ResourceIdentity,
    target: ResourceTarget,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            identity: self.identity.clone(),
            target: self.target.clone(),
            _kind: PhantomData,
        }
    }
}

impl<T: Describe + 'static> Repository<T> {
    pub fn new(store: Arc<dyn Store>, namespace: Option<&str>) -> RepoResult<Self> {
        let identity = T::identity().ok_or_else(|| SchemaError::MissingIdentity {
            type_name: std::any::type_name::<T>().to_string(),
        })?;
        let scope = identity.scope.as_str();
        match (identity.scope.is_namespaced(), namespace) {
            (true, None) => {
                return Err(RepoError::ScopeMismatch { kind: identity.kind, scope, reason: "a namespace is required" })
            }
            (false, Some(_)) => {
                return Err(RepoError::ScopeMismatch { kind: identity.kind, scope, reason: "a namespace is not allowed" })
            }
            _ => {}
        }
        let target = ResourceTarget::from_identity(&identity).with_namespace(namespace);
        Ok(Self { store, identity, target, _kind: PhantomData })
    }

    pub fn target(&self) -> &ResourceTarget {
        &self.target
    }

    pub fn namespace(&self) -> Option<&str> {
        self.target.namespace.as_deref()
    }

    pub async fn list(&self) -> RepoResult<Vec<T>> {
        self.count("list");
        let docs = self.store.list(&self.target).await.map_err(|e| self.store_error("list", "*", e))?;
        docs.iter().map(|d| unmarshal::<T>(d).map_err(RepoError::from)).collect()
    }

    /// `None` when the store has no such instance.
    pub async fn get(&self, name: &str) -> RepoResult<Option<T>> {
        self.count("get");
        match self.store.get(&self.target, name).await {
            Ok(doc) => Ok(Some(unmarshal::<T>(&doc)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(self.store_error("get", name, e)),
        }
    }

    /// Create and return the stored instance as echoed by the store.
    pub async fn create(&self, value: &T) -> RepoResult<T> {
        self.count("create");
        let (name, doc) = self.outgoing(value)?;
        let created = self.store.create(&self.target, &doc).await.map_err(|e| self.store_error("create", &name, e))?;
        debug!(kind = %self.identity.kind, name = %name, "created");
        Ok(unmarshal::<T>(&created)?)
    }

    /// Replace the existing instance under its current token, or create it.
    pub async fn create_or_replace(&self, value: &T) -> RepoResult<T> {
        self.count("create_or_replace");
        let (name, mut doc) = self.outgoing(value)?;
        let existing = match self.store.get(&self.target, &name).await {
            Ok(existing) => existing,
            Err(e) if e.is_not_found() => {
                let created =
                    self.store.create(&self.target, &doc).await.map_err(|e| self.store_error("create", &name, e))?;
                return Ok(unmarshal::<T>(&created)?);
            }
            Err(e) => return Err(self.store_error("get", &name, e)),
        };
        let token = existing.pointer("/metadata/resourceVersion").and_then(|v| v.as_str()).ok_or_else(|| {
            RepoError::IllegalState {
                kind: self.identity.kind.clone(),
                name: name.clone(),
                reason: "existing instance carries no resourceVersion".into(),
            }
        })?;
        doc["metadata"]["resourceVersion"] = json!(token);
        let replaced =
            self.store.replace(&self.target, &name, &doc).await.map_err(|e| self.store_error("replace", &name, e))?;
        debug!(kind = %self.identity.kind, name = %name, "replaced");
        Ok(unmarshal::<T>(&replaced)?)
    }

    pub async fn delete(&self, value: &T) -> RepoResult<bool> {
        let (name, _) = self.outgoing(value)?;
        self.delete_named(&name).await
    }

    /// `false` when there was nothing to delete.
    pub async fn delete_named(&self, name: &str) -> RepoResult<bool> {
        self.count("delete");
        match self.store.delete(&self.target, name).await {
            Ok(n) => Ok(n > 0),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(self.store_error("delete", name, e)),
        }
    }

    /// Watch the kind, or a single named instance.
    pub async fn watch(&self, name: Option<&str>) -> RepoResult<Watch<T>> {
        self.count("watch");
        let sub = self
            .store
            .watch(&self.target, name)
            .await
            .map_err(|e| self.store_error("watch", name.unwrap_or("*"), e))?;
        Ok(Watch::new(sub))
    }

    /// Marshaled document bound to this repository's namespace, with its name.
    fn outgoing(&self, value: &T) -> RepoResult<(String, Json)> {
        let mut doc = marshal(value)?;
        let name = doc
            .pointer("/metadata/name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| MarshalError::MissingField {
                type_name: self.identity.kind.clone(),
                path: "/metadata/name".into(),
                field: "name".into(),
            })?;
        if let Some(ns) = &self.target.namespace {
            doc["metadata"]["namespace"] = json!(ns);
        }
        Ok((name, doc))
    }

    fn store_error(&self, op: &'static str, name: &str, source: StoreError) -> RepoError {
        RepoError::Store { op, kind: self.identity.kind.clone(), name: name.to_string(), source }
    }

    fn count(&self, op: &'static str) {
        counter!("kope_repo_ops_total", 1u64, "op" => op, "kind" => self.identity.kind.clone());
    }
}

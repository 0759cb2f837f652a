//! Kope store: an in-process, eventually-consistent [`Store`] for tests, demos and dry runs.
//!
//! Objects live in memory keyed by kind and `(namespace, name)`. Every mutation bumps a
//! store-wide revision used as the `resourceVersion` token, and is published to the
//! watches registered at the time of the mutation, optionally after a delay.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use kope_kubehub::{
    ResourceTarget, SignalSender, Store, StoreError, StoreResult, Subscription, WatchAction, WatchEvent, WatchSignal,
};
use rustc_hash::FxHashMap;
use serde_json::{json, Value as Json};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Operations a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Create,
    Replace,
    Delete,
    List,
    Watch,
}

// Versions of one kind share storage, as on a real server.
type KindKey = (String, String);

fn kind_key(target: &ResourceTarget) -> KindKey {
    (target.group.clone(), target.plural.clone())
}

struct Watcher {
    key: KindKey,
    namespace: Option<String>,
    name: Option<String>,
    tx: SignalSender,
}

impl Watcher {
    fn matches(&self, key: &KindKey, namespace: &str, name: &str) -> bool {
        &self.key == key
            && self.namespace.as_deref().map_or(true, |ns| ns == namespace)
            && self.name.as_deref().map_or(true, |n| n == name)
    }
}

#[derive(Default)]
struct State {
    objects: FxHashMap<KindKey, BTreeMap<(String, String), Json>>,
    revision: u64,
    watchers: Vec<Watcher>,
    faults: Vec<(StoreOp, String)>,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    // Senders of the watches that see this mutation; closed watches are dropped here.
    fn audience(&mut self, key: &KindKey, namespace: &str, name: &str) -> Vec<SignalSender> {
        self.watchers.retain(|w| !w.tx.is_closed());
        self.watchers.iter().filter(|w| w.matches(key, namespace, name)).map(|w| w.tx.clone()).collect()
    }
}

struct Dispatch {
    due: Instant,
    audience: Vec<SignalSender>,
    event: WatchEvent,
}

pub struct MemoryStore {
    state: Mutex<State>,
    muted: AtomicBool,
    event_delay: Option<Duration>,
    watch_buffer: usize,
    dispatcher: Mutex<Option<mpsc::UnboundedSender<Dispatch>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let watch_buffer = std::env::var("KOPE_WATCH_BUFFER").ok().and_then(|s| s.parse().ok()).unwrap_or(1024);
        Self {
            state: Mutex::new(State::default()),
            muted: AtomicBool::new(false),
            event_delay: None,
            watch_buffer,
            dispatcher: Mutex::new(None),
        }
    }

    /// Deliver watch events this long after the mutation that caused them.
    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = Some(delay);
        self
    }

    pub fn with_watch_buffer(mut self, capacity: usize) -> Self {
        self.watch_buffer = capacity.max(1);
        self
    }

    /// While muted, mutations apply but no watch sees them.
    pub fn mute_events(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    /// Fail every `op` on `name` with a fault until cleared. For `List` and `Watch`
    /// the name is matched against the target kind.
    pub fn fail_on(&self, op: StoreOp, name: impl Into<String>) {
        self.lock().faults.push((op, name.into()));
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Number of stored objects of the target's kind, across namespaces.
    pub fn count(&self, target: &ResourceTarget) -> usize {
        self.lock().objects.get(&kind_key(target)).map_or(0, BTreeMap::len)
    }

    pub fn watcher_count(&self) -> usize {
        let mut state = self.lock();
        state.watchers.retain(|w| !w.tx.is_closed());
        state.watchers.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_fault(&self, op: StoreOp, target: &ResourceTarget, name: &str) -> StoreResult<()> {
        let subject = match op {
            StoreOp::List | StoreOp::Watch => target.kind.as_str(),
            _ => name,
        };
        if self.lock().faults.iter().any(|(o, n)| *o == op && n == subject) {
            warn!(op = ?op, gvk = %target.gvk_key(), name = %subject, "injected store fault");
            return Err(StoreError::Fault(anyhow!("injected {:?} fault on {} `{}`", op, target.gvk_key(), subject)));
        }
        Ok(())
    }

    fn namespace_of(target: &ResourceTarget, doc: &Json) -> StoreResult<String> {
        if !target.namespaced {
            return Ok(String::new());
        }
        doc.pointer("/metadata/namespace")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| target.namespace.clone())
            .ok_or_else(|| StoreError::Fault(anyhow!("{} requires a namespace", target.gvk_key())))
    }

    fn lookup(&self, target: &ResourceTarget, name: &str) -> Option<((String, String), Json)> {
        let state = self.lock();
        let objects = state.objects.get(&kind_key(target))?;
        match &target.namespace {
            Some(ns) if target.namespaced => {
                let key = (ns.clone(), name.to_string());
                objects.get(&key).map(|doc| (key, doc.clone()))
            }
            // All-namespaces lookups take the first match; names are expected to be unique then.
            _ => objects.iter().find(|((_, n), _)| n == name).map(|(k, doc)| (k.clone(), doc.clone())),
        }
    }

    async fn publish(&self, audience: Vec<SignalSender>, event: WatchEvent) {
        if audience.is_empty() || self.muted.load(Ordering::SeqCst) {
            return;
        }
        match self.event_delay {
            None => {
                for tx in audience {
                    let _ = tx.send(WatchSignal::Event(event.clone())).await;
                }
            }
            Some(delay) => {
                let dispatch = Dispatch { due: Instant::now() + delay, audience, event };
                let mut slot = self.dispatcher.lock().unwrap_or_else(|e| e.into_inner());
                let tx = slot.get_or_insert_with(spawn_dispatcher);
                if let Err(mpsc::error::SendError(d)) = tx.send(dispatch) {
                    // Dispatcher gone (runtime restarted between tests); start a fresh one.
                    let tx = spawn_dispatcher();
                    let _ = tx.send(d);
                    *slot = Some(tx);
                }
            }
        }
    }
}

// Single task delivering delayed events in mutation order.
fn spawn_dispatcher() -> mpsc::UnboundedSender<Dispatch> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Dispatch>();
    tokio::spawn(async move {
        while let Some(d) = rx.recv().await {
            tokio::time::sleep_until(d.due).await;
            for sub in d.audience {
                let _ = sub.send(WatchSignal::Event(d.event.clone())).await;
            }
        }
    });
    tx
}

fn stamp(doc: &mut Json, fields: &[(&str, Json)]) {
    if !doc.get("metadata").map_or(false, Json::is_object) {
        doc["metadata"] = json!({});
    }
    if let Some(meta) = doc.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for (k, v) in fields {
            meta.insert((*k).to_string(), v.clone());
        }
    }
}

fn name_of(doc: &Json) -> Option<&str> {
    doc.pointer("/metadata/name").and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, target: &ResourceTarget, name: &str) -> StoreResult<Json> {
        self.check_fault(StoreOp::Get, target, name)?;
        self.lookup(target, name).map(|(_, doc)| doc).ok_or_else(|| StoreError::not_found(target, name))
    }

    async fn create(&self, target: &ResourceTarget, doc: &Json) -> StoreResult<Json> {
        let name = name_of(doc)
            .ok_or_else(|| StoreError::Fault(anyhow!("{} document has no metadata.name", target.gvk_key())))?
            .to_string();
        self.check_fault(StoreOp::Create, target, &name)?;
        if !doc.is_object() {
            return Err(StoreError::Fault(anyhow!("{} `{}` is not an object", target.gvk_key(), name)));
        }
        let namespace = Self::namespace_of(target, doc)?;
        let key = kind_key(target);
        let (stored, audience) = {
            let mut state = self.lock();
            if state.objects.get(&key).map_or(false, |m| m.contains_key(&(namespace.clone(), name.clone()))) {
                return Err(StoreError::conflict(target, &name, "already exists"));
            }
            let revision = state.next_revision();
            let mut stored = doc.clone();
            let mut fields = vec![
                ("resourceVersion", json!(revision)),
                ("uid", json!(uuid::Uuid::new_v4().to_string())),
                ("creationTimestamp", json!(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true))),
                ("generation", json!(1)),
            ];
            if target.namespaced {
                fields.push(("namespace", json!(namespace)));
            }
            stamp(&mut stored, &fields);
            state.objects.entry(key.clone()).or_default().insert((namespace.clone(), name.clone()), stored.clone());
            let audience = state.audience(&key, &namespace, &name);
            (stored, audience)
        };
        debug!(gvk = %target.gvk_key(), name = %name, watchers = audience.len(), "created");
        self.publish(audience, WatchEvent::new(WatchAction::Added, stored.clone())).await;
        Ok(stored)
    }

    async fn replace(&self, target: &ResourceTarget, name: &str, doc: &Json) -> StoreResult<Json> {
        self.check_fault(StoreOp::Replace, target, name)?;
        let ((namespace, _), current) = self.lookup(target, name).ok_or_else(|| StoreError::not_found(target, name))?;
        let expected = current.pointer("/metadata/resourceVersion").and_then(|v| v.as_str());
        let offered = doc.pointer("/metadata/resourceVersion").and_then(|v| v.as_str());
        if offered.is_none() || offered != expected {
            return Err(StoreError::conflict(
                target,
                name,
                format!("resourceVersion {:?} does not match current {:?}", offered, expected),
            ));
        }
        let key = kind_key(target);
        let (stored, audience) = {
            let mut state = self.lock();
            // Re-check under the lock; another writer may have raced us.
            let live = state
                .objects
                .get(&key)
                .and_then(|m| m.get(&(namespace.clone(), name.to_string())))
                .and_then(|d| d.pointer("/metadata/resourceVersion"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            if live.as_deref() != offered {
                return Err(StoreError::conflict(target, name, "object changed concurrently"));
            }
            let revision = state.next_revision();
            let generation = current.pointer("/metadata/generation").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
            let mut stored = doc.clone();
            let mut fields = vec![("name", json!(name)), ("resourceVersion", json!(revision)), ("generation", json!(generation))];
            for server_owned in ["uid", "creationTimestamp"] {
                if let Some(v) = current.pointer(&format!("/metadata/{}", server_owned)) {
                    fields.push((server_owned, v.clone()));
                }
            }
            if target.namespaced {
                fields.push(("namespace", json!(namespace)));
            }
            stamp(&mut stored, &fields);
            state.objects.entry(key.clone()).or_default().insert((namespace.clone(), name.to_string()), stored.clone());
            let audience = state.audience(&key, &namespace, name);
            (stored, audience)
        };
        self.publish(audience, WatchEvent::new(WatchAction::Modified, stored.clone())).await;
        Ok(stored)
    }

    async fn delete(&self, target: &ResourceTarget, name: &str) -> StoreResult<usize> {
        self.check_fault(StoreOp::Delete, target, name)?;
        let ((namespace, _), _) = self.lookup(target, name).ok_or_else(|| StoreError::not_found(target, name))?;
        let key = kind_key(target);
        let (removed, audience) = {
            let mut state = self.lock();
            let removed = state.objects.get_mut(&key).and_then(|m| m.remove(&(namespace.clone(), name.to_string())));
            let Some(mut removed) = removed else {
                return Err(StoreError::not_found(target, name));
            };
            let revision = state.next_revision();
            stamp(&mut removed, &[("resourceVersion", json!(revision))]);
            let audience = state.audience(&key, &namespace, name);
            (removed, audience)
        };
        debug!(gvk = %target.gvk_key(), name = %name, watchers = audience.len(), "deleted");
        self.publish(audience, WatchEvent::new(WatchAction::Deleted, removed)).await;
        Ok(1)
    }

    async fn list(&self, target: &ResourceTarget) -> StoreResult<Vec<Json>> {
        self.check_fault(StoreOp::List, target, "")?;
        let state = self.lock();
        let Some(objects) = state.objects.get(&kind_key(target)) else {
            return Ok(Vec::new());
        };
        Ok(objects
            .iter()
            .filter(|((ns, _), _)| match &target.namespace {
                Some(want) if target.namespaced => ns == want,
                _ => true,
            })
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn watch(&self, target: &ResourceTarget, name: Option<&str>) -> StoreResult<Subscription> {
        self.check_fault(StoreOp::Watch, target, "")?;
        let (tx, sub) = Subscription::channel(self.watch_buffer);
        self.lock().watchers.push(Watcher {
            key: kind_key(target),
            namespace: if target.namespaced { target.namespace.clone() } else { None },
            name: name.map(str::to_string),
            tx,
        });
        debug!(gvk = %target.gvk_key(), name = ?name, "watch registered");
        Ok(sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widgets() -> ResourceTarget {
        ResourceTarget {
            group: "example.com".into(),
            version: "v1".into(),
            kind: "Widget".into(),
            plural: "widgets".into(),
            namespaced: true,
            namespace: Some("default".into()),
        }
    }

    #[tokio::test]
    async fn create_stamps_server_fields() {
        let store = MemoryStore::new();
        let created = store.create(&widgets(), &json!({ "metadata": { "name": "a" }, "size": 1 })).await.expect("create");
        assert_eq!(created["metadata"]["resourceVersion"], "1");
        assert_eq!(created["metadata"]["namespace"], "default");
        assert_eq!(created["metadata"]["generation"], 1);
        assert!(created["metadata"]["uid"].is_string());
        assert!(created["metadata"]["creationTimestamp"].is_string());
        assert_eq!(created["size"], 1);
    }

    #[tokio::test]
    async fn versions_share_storage() {
        let store = MemoryStore::new();
        store.create(&widgets(), &json!({ "metadata": { "name": "a" } })).await.expect("create");
        let other = ResourceTarget { version: "v2".into(), ..widgets() };
        assert!(store.get(&other, "a").await.is_ok());
        assert_eq!(store.count(&other), 1);
    }

    #[tokio::test]
    async fn missing_name_is_a_fault() {
        let store = MemoryStore::new();
        let err = store.create(&widgets(), &json!({ "metadata": {} })).await.unwrap_err();
        assert!(matches!(err, StoreError::Fault(_)));
    }
}

#![forbid(unsafe_code)]

use std::time::Duration;

use kope_kubehub::{ResourceTarget, Store, StoreError, WatchAction, WatchSignal};
use kope_store::{MemoryStore, StoreOp};
use serde_json::json;

fn gadgets(ns: Option<&str>) -> ResourceTarget {
    ResourceTarget {
        group: "example.com".into(),
        version: "v1".into(),
        kind: "Gadget".into(),
        plural: "gadgets".into(),
        namespaced: true,
        namespace: ns.map(str::to_string),
    }
}

fn doc(name: &str) -> serde_json::Value {
    json!({ "apiVersion": "example.com/v1", "kind": "Gadget", "metadata": { "name": name }, "size": 1 })
}

async fn next_event(sub: &mut kope_kubehub::Subscription) -> (WatchAction, String) {
    match tokio::time::timeout(Duration::from_secs(1), sub.next()).await.expect("event in time") {
        WatchSignal::Event(ev) => (ev.action, ev.name().unwrap_or_default().to_string()),
        WatchSignal::Closed(cause) => panic!("closed: {:?}", cause),
    }
}

#[tokio::test]
async fn watch_sees_mutations_after_subscribing_only() {
    let store = MemoryStore::new();
    let t = gadgets(Some("default"));
    store.create(&t, &doc("before")).await.expect("create");
    let mut sub = store.watch(&t, None).await.expect("watch");
    store.create(&t, &doc("after")).await.expect("create");
    assert_eq!(next_event(&mut sub).await, (WatchAction::Added, "after".to_string()));
    store.delete(&t, "before").await.expect("delete");
    assert_eq!(next_event(&mut sub).await, (WatchAction::Deleted, "before".to_string()));
}

#[tokio::test]
async fn named_watch_filters_other_objects() {
    let store = MemoryStore::new();
    let t = gadgets(Some("default"));
    let mut sub = store.watch(&t, Some("b")).await.expect("watch");
    store.create(&t, &doc("a")).await.expect("create a");
    store.create(&t, &doc("b")).await.expect("create b");
    assert_eq!(next_event(&mut sub).await, (WatchAction::Added, "b".to_string()));
}

#[tokio::test]
async fn namespace_binding_scopes_list_and_watch() {
    let store = MemoryStore::new();
    let prod = gadgets(Some("prod"));
    let dev = gadgets(Some("dev"));
    let all = gadgets(None);
    let mut sub_all = store.watch(&all, None).await.expect("watch all");
    let mut sub_dev = store.watch(&dev, None).await.expect("watch dev");
    store.create(&prod, &doc("p")).await.expect("create");
    store.create(&dev, &doc("d")).await.expect("create");
    assert_eq!(store.list(&prod).await.expect("list").len(), 1);
    assert_eq!(store.list(&all).await.expect("list").len(), 2);
    assert_eq!(next_event(&mut sub_all).await.1, "p");
    assert_eq!(next_event(&mut sub_all).await.1, "d");
    assert_eq!(next_event(&mut sub_dev).await.1, "d");
}

#[tokio::test]
async fn replace_requires_current_token() {
    let store = MemoryStore::new();
    let t = gadgets(Some("default"));
    let created = store.create(&t, &doc("a")).await.expect("create");

    let mut stale = created.clone();
    stale["metadata"]["resourceVersion"] = json!("999");
    let err = store.replace(&t, "a", &stale).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }), "{:?}", err);

    let err = store.replace(&t, "a", &doc("a")).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }), "{:?}", err);

    let mut fresh = created.clone();
    fresh["size"] = json!(2);
    let replaced = store.replace(&t, "a", &fresh).await.expect("replace");
    assert_eq!(replaced["size"], 2);
    assert_eq!(replaced["metadata"]["generation"], 2);
    assert_eq!(replaced["metadata"]["uid"], created["metadata"]["uid"]);
    assert_ne!(replaced["metadata"]["resourceVersion"], created["metadata"]["resourceVersion"]);
}

#[tokio::test]
async fn create_twice_conflicts_and_missing_objects_are_not_found() {
    let store = MemoryStore::new();
    let t = gadgets(Some("default"));
    store.create(&t, &doc("a")).await.expect("create");
    assert!(matches!(store.create(&t, &doc("a")).await.unwrap_err(), StoreError::Conflict { .. }));
    assert!(store.get(&t, "zzz").await.unwrap_err().is_not_found());
    assert!(store.delete(&t, "zzz").await.unwrap_err().is_not_found());
    assert!(store.replace(&t, "zzz", &doc("zzz")).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn namespaced_create_without_namespace_fails() {
    let store = MemoryStore::new();
    let err = store.create(&gadgets(None), &doc("a")).await.unwrap_err();
    assert!(matches!(err, StoreError::Fault(_)));
}

#[tokio::test]
async fn injected_faults_fail_until_cleared() {
    let store = MemoryStore::new();
    let t = gadgets(Some("default"));
    store.fail_on(StoreOp::Create, "a");
    store.fail_on(StoreOp::List, "Gadget");
    assert!(matches!(store.create(&t, &doc("a")).await.unwrap_err(), StoreError::Fault(_)));
    assert!(store.create(&t, &doc("b")).await.is_ok());
    assert!(matches!(store.list(&t).await.unwrap_err(), StoreError::Fault(_)));
    store.clear_faults();
    assert!(store.create(&t, &doc("a")).await.is_ok());
    assert_eq!(store.list(&t).await.expect("list").len(), 2);
}

#[tokio::test]
async fn muted_store_applies_without_events() {
    let store = MemoryStore::new();
    let t = gadgets(Some("default"));
    let mut sub = store.watch(&t, None).await.expect("watch");
    store.mute_events(true);
    store.create(&t, &doc("quiet")).await.expect("create");
    assert!(tokio::time::timeout(Duration::from_millis(50), sub.next()).await.is_err());
    assert_eq!(store.count(&t), 1);
    store.mute_events(false);
    store.create(&t, &doc("loud")).await.expect("create");
    assert_eq!(next_event(&mut sub).await.1, "loud");
}

#[tokio::test]
async fn delayed_events_keep_mutation_order() {
    let store = MemoryStore::new().with_event_delay(Duration::from_millis(30));
    let t = gadgets(Some("default"));
    let mut sub = store.watch(&t, None).await.expect("watch");
    store.create(&t, &doc("x")).await.expect("create");
    store.delete(&t, "x").await.expect("delete");
    assert!(tokio::time::timeout(Duration::from_millis(5), sub.next()).await.is_err());
    assert_eq!(next_event(&mut sub).await, (WatchAction::Added, "x".to_string()));
    assert_eq!(next_event(&mut sub).await, (WatchAction::Deleted, "x".to_string()));
}

#[tokio::test]
async fn dropped_subscriptions_are_pruned() {
    let store = MemoryStore::new();
    let t = gadgets(Some("default"));
    let sub = store.watch(&t, None).await.expect("watch");
    assert_eq!(store.watcher_count(), 1);
    drop(sub);
    assert_eq!(store.watcher_count(), 0);
}

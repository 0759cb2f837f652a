use std::sync::Arc;
use std::time::Duration;

use kope_core::{describe, Metadata, Scope};
use kope_kubehub::{ResourceTarget, Store, WatchAction, WatchSignal};
use kope_ops::{FaultPolicy, Protocol, ProtocolConfig, ProtocolError, TimeoutPolicy};
use kope_repo::Repository;
use kope_schema::{definition, DefinitionDocument};
use kope_store::{MemoryStore, StoreOp};

describe! {
    #[resource(kind = "Widget", group = "example.com", version = "v1", scope = Scope::Cluster)]
    #[derive(Debug, Clone, PartialEq)]
    pub struct Widget {
        pub metadata: Metadata,
        #[field(minimum = 1, maximum = 100)]
        pub count: i64,
    }
}

describe! {
    #[resource(kind = "Gizmo", group = "example.com", version = "v1")]
    #[derive(Debug, Clone, PartialEq)]
    pub struct Gizmo {
        pub metadata: Metadata,
        pub label: Option<String>,
    }
}

fn widget(name: &str, count: i64) -> Widget {
    Widget { metadata: Metadata::named(name), count }
}

fn gizmo(name: &str) -> Gizmo {
    Gizmo { metadata: Metadata::named(name), label: None }
}

fn strict() -> ProtocolConfig {
    ProtocolConfig::default()
        .with_confirm_timeout(Duration::from_secs(2))
        .with_timeout_policy(TimeoutPolicy::Fail)
}

fn both() -> Vec<Arc<DefinitionDocument>> {
    vec![definition::<Widget>().expect("widget"), definition::<Gizmo>().expect("gizmo")]
}

#[tokio::test]
async fn widget_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let defs = vec![definition::<Widget>().expect("definition")];
    let count = &defs[0].tree()["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["count"];
    assert_eq!(count["type"], "integer");
    assert_eq!(count["minimum"], 1.0);
    assert_eq!(count["maximum"], 100.0);

    let mut observer = store.watch(&ResourceTarget::definitions(), None).await.expect("observer");
    let protocol = Protocol::new(store.clone(), strict());
    let report = protocol.install(&defs).await.expect("install");
    assert_eq!(report.confirmed, vec!["widgets.example.com".to_string()]);
    assert!(report.is_clean());

    match observer.next().await {
        WatchSignal::Event(ev) => {
            assert_eq!(ev.action, WatchAction::Added);
            assert_eq!(ev.name(), Some("widgets.example.com"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(tokio::time::timeout(Duration::from_millis(50), observer.next()).await.is_err());

    let repo = Repository::<Widget>::new(store.clone(), None).expect("repo");
    let created = repo.create(&widget("w1", 5)).await.expect("create");
    let fetched = repo.get("w1").await.expect("get").expect("present");
    assert_eq!(fetched, created);
    assert_eq!(fetched.count, 5);
    assert!(repo.delete_named("w1").await.expect("delete"));
    assert!(!repo.delete_named("w1").await.expect("delete again"));
}

#[tokio::test]
async fn install_waits_for_delayed_confirmation() {
    let store = Arc::new(MemoryStore::new().with_event_delay(Duration::from_millis(80)));
    let protocol = Protocol::new(store.clone(), strict());
    let report = protocol.install(&both()).await.expect("install");
    assert_eq!(report.confirmed, vec!["widgets.example.com".to_string(), "gizmos.example.com".to_string()]);
    assert_eq!(store.count(&ResourceTarget::definitions()), 2);
    assert_eq!(store.watcher_count(), 0);
}

#[tokio::test]
async fn install_skips_installed_definitions_without_watching() {
    let store = Arc::new(MemoryStore::new());
    let protocol = Protocol::new(store.clone(), strict());
    protocol.install(&both()).await.expect("first install");

    let report = protocol.install(&both()).await.expect("second install");
    assert!(report.confirmed.is_empty());
    assert_eq!(report.skipped, vec!["widgets.example.com".to_string(), "gizmos.example.com".to_string()]);
    assert_eq!(store.count(&ResourceTarget::definitions()), 2);
}

#[tokio::test]
async fn timeout_warns_by_default() {
    let store = Arc::new(MemoryStore::new());
    store.mute_events(true);
    let config = ProtocolConfig::default().with_confirm_timeout(Duration::from_millis(100));
    let report = Protocol::new(store.clone(), config).install(&both()).await.expect("install proceeds");
    assert!(report.confirmed.is_empty());
    assert_eq!(report.unconfirmed.len(), 2);
    assert!(!report.is_clean());
    assert_eq!(store.count(&ResourceTarget::definitions()), 2);
    assert_eq!(store.watcher_count(), 0);
}

#[tokio::test]
async fn timeout_fails_under_fail_policy() {
    let store = Arc::new(MemoryStore::new());
    store.mute_events(true);
    let config = strict().with_confirm_timeout(Duration::from_millis(100));
    let err = Protocol::new(store.clone(), config).install(&both()).await.unwrap_err();
    match err {
        ProtocolError::Timeout { action, pending } => {
            assert_eq!(action, "install");
            assert_eq!(pending, vec!["widgets.example.com".to_string(), "gizmos.example.com".to_string()]);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(store.watcher_count(), 0);
}

#[tokio::test]
async fn install_fault_aborts_batch_by_default() {
    let store = Arc::new(MemoryStore::new());
    store.fail_on(StoreOp::Create, "gizmos.example.com");
    let err = Protocol::new(store.clone(), strict()).install(&both()).await.unwrap_err();
    match &err {
        ProtocolError::Store { context, .. } => assert!(context.contains("gizmos.example.com"), "{}", context),
        other => panic!("unexpected {:?}", other),
    }
    // The creation issued before the fault went through.
    let defs = ResourceTarget::definitions();
    assert!(store.get(&defs, "widgets.example.com").await.is_ok());
    assert_eq!(store.count(&defs), 1);
    assert_eq!(store.watcher_count(), 0);
}

#[tokio::test]
async fn install_fault_is_recorded_under_continue_policy() {
    let store = Arc::new(MemoryStore::new());
    store.fail_on(StoreOp::Create, "widgets.example.com");
    let config = strict().with_install_faults(FaultPolicy::Continue);
    let report = Protocol::new(store.clone(), config).install(&both()).await.expect("install");
    assert_eq!(report.failed, vec!["widgets.example.com".to_string()]);
    assert_eq!(report.confirmed, vec!["gizmos.example.com".to_string()]);
}

#[tokio::test]
async fn reset_removes_instances_and_keeps_definitions() {
    let store = Arc::new(MemoryStore::new());
    let protocol = Protocol::new(store.clone(), strict());
    protocol.install(&both()).await.expect("install");

    let widgets = Repository::<Widget>::new(store.clone(), None).expect("widgets");
    widgets.create(&widget("w1", 1)).await.expect("w1");
    widgets.create(&widget("w2", 2)).await.expect("w2");
    for ns in ["prod", "dev"] {
        let gizmos = Repository::<Gizmo>::new(store.clone(), Some(ns)).expect("gizmos");
        gizmos.create(&gizmo("g")).await.expect("g");
    }

    let report = protocol.reset(&both()).await.expect("reset");
    let mut confirmed = report.confirmed.clone();
    confirmed.sort();
    assert_eq!(confirmed, vec!["Gizmo dev/g", "Gizmo prod/g", "Widget w1", "Widget w2"]);
    assert!(widgets.list().await.expect("list").is_empty());
    assert_eq!(store.count(&ResourceTarget::definitions()), 2);
}

#[tokio::test]
async fn reset_timeout_still_visits_every_kind() {
    let store = Arc::new(MemoryStore::new());
    let protocol = Protocol::new(store.clone(), strict().with_confirm_timeout(Duration::from_millis(100)));
    protocol.install(&both()).await.expect("install");
    let widgets = Repository::<Widget>::new(store.clone(), None).expect("widgets");
    let gizmos = Repository::<Gizmo>::new(store.clone(), Some("prod")).expect("gizmos");
    widgets.create(&widget("w1", 1)).await.expect("widget");
    gizmos.create(&gizmo("g1")).await.expect("gizmo");

    store.mute_events(true);
    match protocol.uninstall(&both()).await.unwrap_err() {
        ProtocolError::Timeout { action, pending } => {
            assert_eq!(action, "reset");
            assert_eq!(pending, vec!["Widget w1".to_string(), "Gizmo prod/g1".to_string()]);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(widgets.list().await.expect("widgets").is_empty());
    assert!(gizmos.list().await.expect("gizmos").is_empty());
    // Definitions stay while instance deletions are unconfirmed.
    assert_eq!(store.count(&ResourceTarget::definitions()), 2);
    assert_eq!(store.watcher_count(), 0);
}

#[tokio::test]
async fn reset_of_uninstalled_kinds_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());
    let report = Protocol::new(store.clone(), strict()).reset(&both()).await.expect("reset");
    assert_eq!(report, Default::default());
}

#[tokio::test]
async fn uninstall_continues_past_instance_deletion_fault() {
    let store = Arc::new(MemoryStore::new());
    let protocol = Protocol::new(store.clone(), strict());
    protocol.install(&both()).await.expect("install");
    let widgets = Repository::<Widget>::new(store.clone(), None).expect("widgets");
    let gizmos = Repository::<Gizmo>::new(store.clone(), Some("prod")).expect("gizmos");
    widgets.create(&widget("stuck", 1)).await.expect("widget");
    gizmos.create(&gizmo("g1")).await.expect("gizmo");

    store.fail_on(StoreOp::Delete, "stuck");
    let report = protocol.uninstall(&both()).await.expect("uninstall");
    assert_eq!(report.failed, vec!["Widget".to_string()]);
    assert!(report.confirmed.contains(&"Gizmo prod/g1".to_string()));
    assert!(report.confirmed.contains(&"widgets.example.com".to_string()));
    assert!(report.confirmed.contains(&"gizmos.example.com".to_string()));
    assert!(gizmos.list().await.expect("list").is_empty());
    assert_eq!(store.count(&ResourceTarget::definitions()), 0);
}

#[tokio::test]
async fn uninstall_definition_fault_names_the_kinds() {
    let store = Arc::new(MemoryStore::new());
    let protocol = Protocol::new(store.clone(), strict());
    protocol.install(&both()).await.expect("install");
    store.fail_on(StoreOp::Delete, "gizmos.example.com");
    match protocol.uninstall(&both()).await.unwrap_err() {
        ProtocolError::Store { context, .. } => {
            assert!(context.contains("Widget") && context.contains("Gizmo"), "{}", context)
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(store.watcher_count(), 0);
}

#[tokio::test]
async fn uninstall_skips_missing_definitions() {
    let store = Arc::new(MemoryStore::new());
    let report = Protocol::new(store.clone(), strict()).uninstall(&both()).await.expect("uninstall");
    assert_eq!(report.skipped, vec!["widgets.example.com".to_string(), "gizmos.example.com".to_string()]);
}

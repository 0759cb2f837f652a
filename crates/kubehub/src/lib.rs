//! Kope kubehub: the store contract (targets, CRUD, watches) and its kube-rs implementation.

#![forbid(unsafe_code)]

mod kube_store;
mod store;
mod target;
mod watch;

pub use kube_store::{get_kube_client, KubeStore};
pub use store::{Store, StoreError, StoreResult};
pub use target::ResourceTarget;
pub use watch::{SignalSender, Subscription, WatchAction, WatchEvent, WatchSignal};

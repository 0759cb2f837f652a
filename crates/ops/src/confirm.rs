use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use kope_kubehub::{ResourceTarget, Store, StoreResult, Subscription, WatchAction, WatchSignal};
use metrics::{counter, histogram};
use serde_json::Value as Json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// `namespace/name` for namespaced objects, `name` otherwise.
pub(crate) fn object_key(doc: &Json) -> Option<String> {
    let meta = doc.get("metadata")?;
    let name = meta.get("name")?.as_str()?;
    match meta.get("namespace").and_then(|v| v.as_str()) {
        Some(ns) if !ns.is_empty() => Some(format!("{}/{}", ns, name)),
        _ => Some(name.to_string()),
    }
}

/// A watch awaiting one expected action per tracked key.
///
/// The consuming task is the only writer of the pending set; it publishes every
/// change through a `watch` channel. Dropping the confirmation aborts the task,
/// which releases the subscription.
pub(crate) struct Confirmation {
    pending: watch::Receiver<BTreeSet<String>>,
    forget: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl Confirmation {
    /// Subscribe to `target` before any mutation is issued.
    pub(crate) async fn open(
        store: &dyn Store,
        target: &ResourceTarget,
        expected: WatchAction,
        keys: BTreeSet<String>,
    ) -> StoreResult<Self> {
        let sub = store.watch(target, None).await?;
        let (tx, pending) = watch::channel(keys.clone());
        let (forget, forget_rx) = mpsc::unbounded_channel();
        let kind = target.kind.clone();
        let task = tokio::spawn(consume(sub, kind, expected, keys, tx, forget_rx));
        Ok(Self { pending, forget, task })
    }

    /// Stop tracking a key whose mutation was never issued or is already settled.
    pub(crate) fn forget(&self, key: &str) {
        // The task only goes away when the confirmation is closed.
        let _ = self.forget.send(key.to_string());
    }

    /// Wait for every tracked key, or until `timeout` elapses. Returns what is still pending.
    pub(crate) async fn wait(&mut self, timeout: Duration) -> BTreeSet<String> {
        let settled = tokio::time::timeout(timeout, self.pending.wait_for(|p| p.is_empty())).await.map(|r| r.map(|_| ()));
        match settled {
            Ok(Ok(_)) => BTreeSet::new(),
            _ => self.pending.borrow().clone(),
        }
    }

    /// Abort the consuming task and wait until it has released the subscription.
    pub(crate) async fn close(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for Confirmation {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn consume(
    mut sub: Subscription,
    kind: String,
    expected: WatchAction,
    watched: BTreeSet<String>,
    tx: watch::Sender<BTreeSet<String>>,
    mut forget: mpsc::UnboundedReceiver<String>,
) {
    let started = Instant::now();
    let mut pending = watched.clone();
    loop {
        tokio::select! {
            Some(key) = forget.recv() => {
                if pending.remove(&key) {
                    tx.send_replace(pending.clone());
                }
            }
            signal = sub.next() => match signal {
                WatchSignal::Event(ev) => {
                    let Some(key) = object_key(&ev.document) else { continue };
                    if !watched.contains(&key) {
                        continue;
                    }
                    if ev.action != expected {
                        warn!(kind = %kind, name = %key, action = %ev.action, expected = %expected, "unexpected watch event");
                        continue;
                    }
                    if pending.remove(&key) {
                        let ms = started.elapsed().as_secs_f64() * 1000.0;
                        counter!("kope_confirm_events_total", 1u64, "action" => expected.as_str());
                        histogram!("kope_confirm_latency_ms", ms);
                        debug!(kind = %kind, name = %key, action = %expected, remaining = pending.len(), "confirmed");
                        tx.send_replace(pending.clone());
                    }
                }
                WatchSignal::Closed(cause) => {
                    match cause {
                        Some(e) => warn!(kind = %kind, error = %e, "confirmation watch closed"),
                        None => debug!(kind = %kind, "confirmation watch closed"),
                    }
                    break;
                }
            },
        }
    }
}

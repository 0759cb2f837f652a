//! `Store` over a live API server through kube-rs dynamic objects.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams, WatchEvent as KubeWatchEvent, WatchParams},
    config::KubeConfigOptions,
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client, Config,
};
use serde_json::{json, Value as Json};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{ResourceTarget, Store, StoreError, StoreResult, Subscription, WatchAction, WatchEvent, WatchSignal};

/// Build a client from the kubeconfig, optionally pinned to a named context.
pub async fn get_kube_client(context: Option<&str>) -> Result<Client> {
    let config = match context {
        Some(ctx) => {
            let options = KubeConfigOptions { context: Some(ctx.to_string()), ..Default::default() };
            Config::from_kubeconfig(&options)
                .await
                .with_context(|| format!("loading kubeconfig context `{}`", ctx))?
        }
        None => Config::infer().await.context("inferring kube config")?,
    };
    info!(cluster = %config.cluster_url, context = ?context, "kube client configured");
    Client::try_from(config).context("building kube client")
}

pub struct KubeStore {
    client: Client,
    watch_buffer: usize,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        let watch_buffer = std::env::var("KOPE_WATCH_BUFFER").ok().and_then(|s| s.parse().ok()).unwrap_or(1024);
        Self { client, watch_buffer }
    }

    pub async fn connect(context: Option<&str>) -> Result<Self> {
        Ok(Self::new(get_kube_client(context).await?))
    }

    fn api(&self, target: &ResourceTarget) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(&target.group, &target.version, &target.kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, &target.plural);
        match (&target.namespace, target.namespaced) {
            (Some(ns), true) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }

    // Creates and replaces of namespaced kinds need a namespaced Api even when the
    // target spans all namespaces; the document says where it lives.
    fn api_for_doc(&self, target: &ResourceTarget, doc: &Json) -> Api<DynamicObject> {
        let ns = doc.pointer("/metadata/namespace").and_then(|v| v.as_str());
        match (target.namespaced, &target.namespace, ns) {
            (true, None, Some(ns)) => self.api(&target.clone().with_namespace(Some(ns))),
            _ => self.api(target),
        }
    }
}

fn map_err(target: &ResourceTarget, name: &str, op: &str, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::not_found(target, name),
        kube::Error::Api(ae) if ae.code == 409 => StoreError::conflict(target, name, ae.message),
        other => StoreError::Fault(anyhow!(other).context(format!("{} {} `{}`", op, target.gvk_key(), name))),
    }
}

fn to_object(doc: &Json) -> StoreResult<DynamicObject> {
    serde_json::from_value(doc.clone()).map_err(|e| StoreError::Fault(anyhow!(e).context("decoding document")))
}

fn to_json(obj: &DynamicObject) -> StoreResult<Json> {
    let mut v = serde_json::to_value(obj).map_err(|e| StoreError::Fault(anyhow!(e).context("encoding object")))?;
    strip_managed_fields(&mut v);
    Ok(v)
}

fn strip_managed_fields(v: &mut Json) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
}

fn doc_name(doc: &Json) -> &str {
    doc.pointer("/metadata/name").and_then(|v| v.as_str()).unwrap_or("")
}

fn translate(event: KubeWatchEvent<DynamicObject>) -> StoreResult<WatchEvent> {
    Ok(match event {
        KubeWatchEvent::Added(o) => WatchEvent::new(WatchAction::Added, to_json(&o)?),
        KubeWatchEvent::Modified(o) => WatchEvent::new(WatchAction::Modified, to_json(&o)?),
        KubeWatchEvent::Deleted(o) => WatchEvent::new(WatchAction::Deleted, to_json(&o)?),
        KubeWatchEvent::Bookmark(b) => WatchEvent::new(
            WatchAction::Bookmark,
            json!({ "metadata": { "resourceVersion": b.metadata.resource_version } }),
        ),
        KubeWatchEvent::Error(e) => WatchEvent::new(
            WatchAction::Error,
            json!({ "status": e.status, "message": e.message, "reason": e.reason, "code": e.code }),
        ),
    })
}

#[async_trait]
impl Store for KubeStore {
    async fn get(&self, target: &ResourceTarget, name: &str) -> StoreResult<Json> {
        let obj = self.api(target).get(name).await.map_err(|e| map_err(target, name, "get", e))?;
        to_json(&obj)
    }

    async fn create(&self, target: &ResourceTarget, doc: &Json) -> StoreResult<Json> {
        let name = doc_name(doc);
        let obj = to_object(doc)?;
        let created = self
            .api_for_doc(target, doc)
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| map_err(target, name, "create", e))?;
        debug!(gvk = %target.gvk_key(), name = %name, "created");
        to_json(&created)
    }

    async fn replace(&self, target: &ResourceTarget, name: &str, doc: &Json) -> StoreResult<Json> {
        let obj = to_object(doc)?;
        let replaced = self
            .api_for_doc(target, doc)
            .replace(name, &PostParams::default(), &obj)
            .await
            .map_err(|e| map_err(target, name, "replace", e))?;
        to_json(&replaced)
    }

    async fn delete(&self, target: &ResourceTarget, name: &str) -> StoreResult<usize> {
        self.api(target)
            .delete(name, &DeleteParams::foreground())
            .await
            .map_err(|e| map_err(target, name, "delete", e))?;
        debug!(gvk = %target.gvk_key(), name = %name, "delete accepted");
        Ok(1)
    }

    async fn list(&self, target: &ResourceTarget) -> StoreResult<Vec<Json>> {
        let list = self
            .api(target)
            .list(&ListParams::default())
            .await
            .map_err(|e| map_err(target, "*", "list", e))?;
        list.items.iter().map(to_json).collect()
    }

    async fn watch(&self, target: &ResourceTarget, name: Option<&str>) -> StoreResult<Subscription> {
        let api = self.api(target);
        let mut wp = WatchParams::default();
        let mut lp = ListParams::default().limit(1);
        if let Some(n) = name {
            let selector = format!("metadata.name={}", n);
            wp = wp.fields(&selector);
            lp = lp.fields(&selector);
        }
        // Start from the current revision so existing objects are not replayed as Added.
        let since = api
            .list_metadata(&lp)
            .await
            .map_err(|e| map_err(target, name.unwrap_or("*"), "watch", e))?
            .metadata
            .resource_version
            .unwrap_or_else(|| "0".to_string());
        let (tx, sub) = Subscription::channel(self.watch_buffer);
        let (ready_tx, ready_rx) = oneshot::channel::<StoreResult<()>>();
        let gvk = target.gvk_key();
        let label = name.unwrap_or("*").to_string();
        let pump = tokio::spawn(async move {
            let stream = match api.watch(&wp, &since).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(StoreError::Fault(anyhow!(e).context(format!("watch {}", gvk)))));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            futures::pin_mut!(stream);
            debug!(gvk = %gvk, name = %label, "watch open");
            while let Some(item) = stream.next().await {
                let signal = match item.map_err(|e| StoreError::Fault(anyhow!(e))).and_then(translate) {
                    Ok(ev) => WatchSignal::Event(ev),
                    Err(e) => {
                        warn!(gvk = %gvk, error = %e, "watch stream failed");
                        let _ = tx.send(WatchSignal::Closed(Some(e))).await;
                        return;
                    }
                };
                if tx.send(signal).await.is_err() {
                    return;
                }
            }
            debug!(gvk = %gvk, name = %label, "watch stream ended");
            let _ = tx.send(WatchSignal::Closed(None)).await;
        });
        match ready_rx.await {
            Ok(Ok(())) => Ok(sub.attach(pump)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(StoreError::Fault(anyhow!("watch task for {} ended before opening", target.gvk_key()))),
        }
    }
}

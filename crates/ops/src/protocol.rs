//! Watch-confirmed install, reset and uninstall of resource definitions.
//!
//! Every batch subscribes before its first mutating call, issues the mutations,
//! then waits for one confirming event per object or for the confirmation
//! timeout. The subscription is released on every path out of a batch.

use std::collections::BTreeSet;
use std::sync::Arc;

use kope_core::{ApiStyle, SchemaError};
use kope_kubehub::{ResourceTarget, Store, StoreError, WatchAction};
use kope_schema::DefinitionDocument;
use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{FaultPolicy, ProtocolConfig, TimeoutPolicy};
use crate::confirm::{object_key, Confirmation};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{action} not confirmed in time for: {}", pending.join(", "))]
    Timeout { action: &'static str, pending: Vec<String> },
    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl ProtocolError {
    fn store(context: impl Into<String>, source: StoreError) -> Self {
        ProtocolError::Store { context: context.into(), source }
    }
}

/// Outcome of one batch. Definitions are named by their resource name,
/// instances by `Kind namespace/name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub confirmed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    pub unconfirmed: Vec<String>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.unconfirmed.is_empty()
    }

    fn absorb(&mut self, other: BatchReport) {
        self.confirmed.extend(other.confirmed);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
        self.unconfirmed.extend(other.unconfirmed);
    }
}

#[derive(Clone)]
pub struct Protocol {
    store: Arc<dyn Store>,
    config: ProtocolConfig,
}

impl Protocol {
    pub fn new(store: Arc<dyn Store>, config: ProtocolConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Create every definition that is not installed yet and wait for its `Added` event.
    pub async fn install(&self, definitions: &[Arc<DefinitionDocument>]) -> Result<BatchReport, ProtocolError> {
        let mut report = BatchReport::default();
        for (target, defs) in by_definition_target(definitions) {
            report.absorb(self.install_group(&target, &defs).await?);
        }
        info!(
            confirmed = report.confirmed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            unconfirmed = report.unconfirmed.len(),
            "install finished"
        );
        Ok(report)
    }

    async fn install_group(
        &self,
        target: &ResourceTarget,
        defs: &[&Arc<DefinitionDocument>],
    ) -> Result<BatchReport, ProtocolError> {
        let mut report = BatchReport::default();
        let mut todo = Vec::new();
        for def in defs {
            match self.store.get(target, def.name()).await {
                Ok(_) => {
                    warn!(definition = %def.name(), "already installed; skipping");
                    report.skipped.push(def.name().to_string());
                }
                Err(e) if e.is_not_found() => todo.push(*def),
                Err(e) => {
                    self.install_fault(&mut report, format!("checking definition {}", def.name()), def.name(), e)?;
                }
            }
        }
        if todo.is_empty() {
            return Ok(report);
        }

        let keys: BTreeSet<String> = todo.iter().map(|d| d.name().to_string()).collect();
        let mut confirm = Confirmation::open(self.store.as_ref(), target, WatchAction::Added, keys)
            .await
            .map_err(|e| ProtocolError::store("opening definition watch", e))?;

        let mut issued = Vec::new();
        let mut abort = None;
        for (i, def) in todo.iter().enumerate() {
            match self.store.create(target, def.tree()).await {
                Ok(_) => {
                    info!(definition = %def.name(), kind = %def.identity().kind, "definition created");
                    issued.push(def.name().to_string());
                }
                Err(e) => {
                    confirm.forget(def.name());
                    let context = format!("creating definition {}", def.name());
                    if let Err(err) = self.install_fault(&mut report, context, def.name(), e) {
                        // Creations already issued stay tracked until the wait below.
                        for rest in &todo[i + 1..] {
                            confirm.forget(rest.name());
                        }
                        abort = Some(err);
                        break;
                    }
                }
            }
        }

        let pending = confirm.wait(self.config.confirm_timeout).await;
        confirm.close().await;
        if let Some(err) = abort {
            if !pending.is_empty() {
                warn!(pending = ?pending, "install aborted with unconfirmed definitions");
            }
            return Err(err);
        }
        self.settle("install", issued, pending, &mut report)?;
        Ok(report)
    }

    fn install_fault(
        &self,
        report: &mut BatchReport,
        context: String,
        name: &str,
        source: StoreError,
    ) -> Result<(), ProtocolError> {
        match self.config.install_faults {
            FaultPolicy::Abort => Err(ProtocolError::store(context, source)),
            FaultPolicy::Continue => {
                warn!(definition = %name, error = %source, "{}; continuing", context);
                report.failed.push(name.to_string());
                Ok(())
            }
        }
    }

    /// Delete every live instance of the installed kinds in the batch. Definitions stay.
    ///
    /// A kind that faults or times out does not stop the remaining kinds; under
    /// [`TimeoutPolicy::Fail`] the collected timeouts are returned once every kind was tried.
    pub async fn reset(&self, definitions: &[Arc<DefinitionDocument>]) -> Result<BatchReport, ProtocolError> {
        let mut report = BatchReport::default();
        let mut timed_out = Vec::new();
        for def in definitions {
            let defs_target = ResourceTarget::definitions_for(def.identity().api_style);
            let target = match self.store.get(&defs_target, def.name()).await {
                Ok(installed) => ResourceTarget::from_definition_doc(&installed)
                    .unwrap_or_else(|| ResourceTarget::from_identity(def.identity())),
                Err(e) if e.is_not_found() => {
                    info!(definition = %def.name(), "not installed; nothing to reset");
                    continue;
                }
                Err(e) => {
                    warn!(definition = %def.name(), error = %e, "could not read definition; skipping kind");
                    report.failed.push(def.name().to_string());
                    continue;
                }
            };
            match self.purge(&target).await {
                Ok(r) => report.absorb(r),
                Err(ProtocolError::Store { context, source }) => {
                    warn!(kind = %target.kind, error = %source, "{}; continuing with remaining kinds", context);
                    report.failed.push(target.kind.clone());
                }
                Err(ProtocolError::Timeout { pending, .. }) => {
                    warn!(kind = %target.kind, pending = ?pending, "deletions unconfirmed; continuing with remaining kinds");
                    timed_out.extend(pending);
                }
                Err(e) => return Err(e),
            }
        }
        if !timed_out.is_empty() {
            return Err(ProtocolError::Timeout { action: "reset", pending: timed_out });
        }
        Ok(report)
    }

    async fn purge(&self, target: &ResourceTarget) -> Result<BatchReport, ProtocolError> {
        let mut report = BatchReport::default();
        let docs = self
            .store
            .list(target)
            .await
            .map_err(|e| ProtocolError::store(format!("listing {} instances", target.kind), e))?;
        let objects: Vec<(String, String, Option<String>)> = docs
            .iter()
            .filter_map(|d| {
                let key = object_key(d)?;
                let name = d.pointer("/metadata/name")?.as_str()?.to_string();
                let ns = d.pointer("/metadata/namespace").and_then(|v| v.as_str()).map(str::to_string);
                Some((key, name, ns))
            })
            .collect();
        if objects.is_empty() {
            return Ok(report);
        }

        let keys: BTreeSet<String> = objects.iter().map(|(k, _, _)| k.clone()).collect();
        let mut confirm = Confirmation::open(self.store.as_ref(), target, WatchAction::Deleted, keys)
            .await
            .map_err(|e| ProtocolError::store(format!("opening {} watch", target.kind), e))?;

        let mut issued = Vec::new();
        for (key, name, ns) in &objects {
            let at = target.clone().with_namespace(ns.as_deref());
            match self.store.delete(&at, name).await {
                Ok(_) => issued.push(key.clone()),
                Err(e) if e.is_not_found() => confirm.forget(key),
                Err(e) => {
                    confirm.close().await;
                    return Err(ProtocolError::store(format!("deleting {} {}", target.kind, key), e));
                }
            }
        }
        let pending = confirm.wait(self.config.confirm_timeout).await;
        confirm.close().await;
        let label = |k: &String| format!("{} {}", target.kind, k);
        self.settle(
            "reset",
            issued.iter().map(label).collect(),
            pending.iter().map(label).collect(),
            &mut report,
        )?;
        Ok(report)
    }

    /// Reset, then delete the definitions themselves.
    pub async fn uninstall(&self, definitions: &[Arc<DefinitionDocument>]) -> Result<BatchReport, ProtocolError> {
        let mut report = self.reset(definitions).await?;
        for (target, defs) in by_definition_target(definitions) {
            report.absorb(self.uninstall_group(&target, &defs).await?);
        }
        info!(
            confirmed = report.confirmed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            unconfirmed = report.unconfirmed.len(),
            "uninstall finished"
        );
        Ok(report)
    }

    async fn uninstall_group(
        &self,
        target: &ResourceTarget,
        defs: &[&Arc<DefinitionDocument>],
    ) -> Result<BatchReport, ProtocolError> {
        let kinds = defs.iter().map(|d| d.identity().kind.as_str()).collect::<Vec<_>>().join(", ");
        let mut report = BatchReport::default();
        let mut todo = Vec::new();
        for def in defs {
            match self.store.get(target, def.name()).await {
                Ok(_) => todo.push(def.name().to_string()),
                Err(e) if e.is_not_found() => {
                    info!(definition = %def.name(), "not installed; skipping");
                    report.skipped.push(def.name().to_string());
                }
                Err(e) => return Err(ProtocolError::store(format!("uninstalling {}", kinds), e)),
            }
        }
        if todo.is_empty() {
            return Ok(report);
        }

        let mut confirm =
            Confirmation::open(self.store.as_ref(), target, WatchAction::Deleted, todo.iter().cloned().collect())
                .await
                .map_err(|e| ProtocolError::store(format!("uninstalling {}", kinds), e))?;
        let mut issued = Vec::new();
        for name in &todo {
            match self.store.delete(target, name).await {
                Ok(_) => {
                    info!(definition = %name, "definition deleted");
                    issued.push(name.clone());
                }
                Err(e) if e.is_not_found() => confirm.forget(name),
                Err(e) => {
                    confirm.close().await;
                    return Err(ProtocolError::store(format!("uninstalling {}", kinds), e));
                }
            }
        }
        let pending = confirm.wait(self.config.confirm_timeout).await;
        confirm.close().await;
        self.settle("uninstall", issued, pending, &mut report)?;
        Ok(report)
    }

    fn settle(
        &self,
        action: &'static str,
        issued: Vec<String>,
        pending: BTreeSet<String>,
        report: &mut BatchReport,
    ) -> Result<(), ProtocolError> {
        let pending: Vec<String> = issued.iter().filter(|k| pending.contains(*k)).cloned().collect();
        report.confirmed.extend(issued.into_iter().filter(|k| !pending.contains(k)));
        if pending.is_empty() {
            return Ok(());
        }
        counter!("kope_confirm_timeouts_total", 1u64, "action" => action);
        match self.config.timeout_policy {
            TimeoutPolicy::Warn => {
                warn!(action, pending = ?pending, timeout = ?self.config.confirm_timeout, "confirmation timed out; proceeding");
                report.unconfirmed.extend(pending);
                Ok(())
            }
            TimeoutPolicy::Fail => Err(ProtocolError::Timeout { action, pending }),
        }
    }
}

/// Definitions grouped by the API version they are stored under, in batch order.
fn by_definition_target(definitions: &[Arc<DefinitionDocument>]) -> Vec<(ResourceTarget, Vec<&Arc<DefinitionDocument>>)> {
    let mut groups: Vec<(ApiStyle, Vec<&Arc<DefinitionDocument>>)> = Vec::new();
    for def in definitions {
        let style = def.identity().api_style;
        match groups.iter_mut().find(|(s, _)| *s == style) {
            Some((_, defs)) => defs.push(def),
            None => groups.push((style, vec![def])),
        }
    }
    groups.into_iter().map(|(style, defs)| (ResourceTarget::definitions_for(style), defs)).collect()
}

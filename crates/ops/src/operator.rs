//! Controller harness: runs user logic on one worker task, with a registry
//! mapping operator keys to constructors and a launcher for one-shot actions.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use kope_core::Describe;
use kope_kubehub::Store;
use kope_schema::{definition, DefinitionDocument};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{info, warn};

use crate::config::ProtocolConfig;
use crate::protocol::{BatchReport, Protocol, ProtocolError};

/// Receiving side of an operator's shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested or the operator is gone.
    pub async fn requested(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

/// User logic driven by an [`Operator`].
#[async_trait]
pub trait Controller: Send + Sync + 'static {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Main loop. Should return soon after `shutdown` fires.
    async fn main(&self, shutdown: ShutdownSignal) -> Result<()>;

    async fn tear_down(&self) -> Result<()> {
        Ok(())
    }
}

/// What the embedding application hands to an operator constructor.
#[derive(Clone)]
pub struct OperatorContext {
    pub store: Arc<dyn Store>,
    pub namespace: Option<String>,
    pub config: ProtocolConfig,
}

pub struct Operator {
    name: String,
    definitions: Vec<Arc<DefinitionDocument>>,
    controller: Arc<dyn Controller>,
    protocol: Protocol,
    shutdown: watch::Sender<bool>,
    finished: watch::Receiver<bool>,
    finished_tx: Arc<watch::Sender<bool>>,
    worker: Mutex<Option<AbortHandle>>,
}

impl Operator {
    pub fn new(name: impl Into<String>, controller: impl Controller, ctx: &OperatorContext) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (finished_tx, finished) = watch::channel(false);
        Self {
            name: name.into(),
            definitions: Vec::new(),
            controller: Arc::new(controller),
            protocol: Protocol::new(Arc::clone(&ctx.store), ctx.config.clone()),
            shutdown,
            finished,
            finished_tx: Arc::new(finished_tx),
            worker: Mutex::new(None),
        }
    }

    pub fn with_definition(mut self, definition: Arc<DefinitionDocument>) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Add the definition generated for `T`.
    pub fn with_kind<T: Describe + 'static>(self) -> Result<Self, ProtocolError> {
        Ok(self.with_definition(definition::<T>()?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definitions(&self) -> &[Arc<DefinitionDocument>] {
        &self.definitions
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.protocol.store()
    }

    pub async fn install(&self) -> Result<BatchReport, ProtocolError> {
        self.protocol.install(&self.definitions).await
    }

    pub async fn uninstall(&self) -> Result<BatchReport, ProtocolError> {
        self.protocol.uninstall(&self.definitions).await
    }

    pub async fn reset(&self) -> Result<BatchReport, ProtocolError> {
        self.protocol.reset(&self.definitions).await
    }

    /// Initialize the controller, then run its main loop on a dedicated task until it returns.
    pub async fn run(&self) -> Result<()> {
        self.controller.initialize().await.with_context(|| format!("initializing {}", self.name))?;
        let controller = Arc::clone(&self.controller);
        let signal = ShutdownSignal { rx: self.shutdown.subscribe() };
        let finished = Arc::clone(&self.finished_tx);
        let handle = tokio::spawn(async move {
            let _done = Finished(finished);
            controller.main(signal).await
        });
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle.abort_handle());
        info!(operator = %self.name, "controller running");
        match handle.await {
            Ok(result) => result.with_context(|| format!("{} controller failed", self.name)),
            Err(e) if e.is_cancelled() => {
                warn!(operator = %self.name, "controller aborted");
                Ok(())
            }
            Err(e) => Err(anyhow!("{} controller panicked: {}", self.name, e)),
        }
    }

    /// Signal shutdown, wait up to the drain period, then abort the worker.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let Some(worker) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            return;
        };
        let drain = self.protocol.config().drain;
        let mut finished = self.finished.clone();
        if tokio::time::timeout(drain, finished.wait_for(|done| *done)).await.is_err() {
            warn!(operator = %self.name, drain = ?drain, "controller did not stop in time; aborting");
            worker.abort();
        } else {
            info!(operator = %self.name, "controller stopped");
        }
    }

    /// Controller tear-down followed by [`Operator::shutdown`].
    pub async fn tear_down(&self) -> Result<()> {
        let torn = self.controller.tear_down().await.with_context(|| format!("tearing down {}", self.name));
        self.shutdown().await;
        torn
    }
}

// Marks the worker finished even when it is aborted.
struct Finished(Arc<watch::Sender<bool>>);

impl Drop for Finished {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

pub type OperatorFactory = Box<dyn Fn(&OperatorContext) -> Result<Operator> + Send + Sync>;

/// Operator constructors by key.
#[derive(Default)]
pub struct OperatorRegistry {
    factories: BTreeMap<String, OperatorFactory>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&OperatorContext) -> Result<Operator> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Box::new(factory));
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(&self, key: &str, ctx: &OperatorContext) -> Result<Operator> {
        let factory = self.factories.get(key).ok_or_else(|| {
            let known = self.keys().collect::<Vec<_>>().join(", ");
            anyhow!("unknown operator `{}` (known: {})", key, if known.is_empty() { "none" } else { &known })
        })?;
        factory(ctx).with_context(|| format!("constructing operator {}", key))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Uninstall,
    Reset,
    Run,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Uninstall => "uninstall",
            Action::Reset => "reset",
            Action::Run => "run",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs one action against an operator and always tears it down afterwards.
pub struct Launcher {
    operator: Operator,
}

impl Launcher {
    pub fn new(operator: Operator) -> Self {
        Self { operator }
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// `interrupt` resolving first cancels the action; tear-down still runs.
    /// Protocol actions return their batch report.
    pub async fn launch<F>(&self, action: Action, interrupt: F) -> Result<Option<BatchReport>>
    where
        F: Future<Output = ()>,
    {
        info!(operator = %self.operator.name(), action = %action, "launching");
        let outcome = tokio::select! {
            r = self.dispatch(action) => r,
            _ = interrupt => {
                warn!(operator = %self.operator.name(), action = %action, "interrupted");
                Ok(None)
            }
        };
        let torn = self.operator.tear_down().await;
        match (outcome, torn) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), torn) => {
                if let Err(t) = torn {
                    warn!(operator = %self.operator.name(), error = %t, "tear-down failed after error");
                }
                Err(e)
            }
        }
    }

    async fn dispatch(&self, action: Action) -> Result<Option<BatchReport>> {
        let op = &self.operator;
        let report = match action {
            Action::Install => op.install().await,
            Action::Uninstall => op.uninstall().await,
            Action::Reset => op.reset().await,
            Action::Run => return op.run().await.map(|()| None),
        };
        report.map(Some).with_context(|| format!("{} {}", action, op.name()))
    }
}

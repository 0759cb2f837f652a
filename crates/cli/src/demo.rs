//! The `widgets` demo operator: one cluster-scoped kind and a controller that logs its changes.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use kope_core::{describe, Metadata, Scope};
use kope_ops::{Controller, Operator, OperatorRegistry, ShutdownSignal};
use kope_repo::{Repository, WatchEvent};
use tracing::{info, warn};

describe! {
    #[resource(kind = "Widget", group = "example.com", version = "v1", scope = Scope::Cluster, short_names = ["wd"])]
    #[derive(Debug, Clone, PartialEq)]
    pub struct Widget {
        pub metadata: Metadata,
        #[field(minimum = 1, maximum = 100, description = "number of widgets to keep")]
        pub count: i64,
        #[field(wire = "displayName")]
        pub display_name: Option<String>,
    }
}

pub struct WidgetController {
    widgets: Repository<Widget>,
}

impl WidgetController {
    pub fn new(widgets: Repository<Widget>) -> Self {
        Self { widgets }
    }
}

#[async_trait]
impl Controller for WidgetController {
    async fn initialize(&self) -> Result<()> {
        let existing = self.widgets.list().await?;
        info!(widgets = existing.len(), "widget controller starting");
        Ok(())
    }

    async fn main(&self, mut shutdown: ShutdownSignal) -> Result<()> {
        let mut watch = self.widgets.watch(None).await?;
        loop {
            tokio::select! {
                _ = shutdown.requested() => break,
                ev = watch.next() => match ev {
                    WatchEvent::Added(w) | WatchEvent::Modified(w) => {
                        info!(widget = %w.metadata.name, count = w.count, display = ?w.display_name, "widget observed");
                    }
                    WatchEvent::Deleted(w) => info!(widget = %w.metadata.name, "widget removed"),
                    WatchEvent::Bookmark => {}
                    WatchEvent::Error(doc) => warn!(document = %doc, "widget watch error"),
                    WatchEvent::Closed(cause) => {
                        if let Some(e) = cause {
                            warn!(error = %e, "widget watch closed");
                        }
                        break;
                    }
                },
            }
        }
        watch.close();
        Ok(())
    }
}

pub fn register(registry: &mut OperatorRegistry) {
    registry.register("widgets", |ctx| {
        let widgets = Repository::<Widget>::new(Arc::clone(&ctx.store), None)?;
        Ok(Operator::new("widgets", WidgetController::new(widgets), ctx).with_kind::<Widget>()?)
    });
}

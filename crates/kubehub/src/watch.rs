use serde_json::Value as Json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchAction {
    Added,
    Modified,
    Deleted,
    Error,
    Bookmark,
}

impl WatchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchAction::Added => "ADDED",
            WatchAction::Modified => "MODIFIED",
            WatchAction::Deleted => "DELETED",
            WatchAction::Error => "ERROR",
            WatchAction::Bookmark => "BOOKMARK",
        }
    }
}

impl std::fmt::Display for WatchAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub action: WatchAction,
    pub document: Json,
}

impl WatchEvent {
    pub fn new(action: WatchAction, document: Json) -> Self {
        Self { action, document }
    }

    pub fn name(&self) -> Option<&str> {
        self.document.pointer("/metadata/name").and_then(|v| v.as_str())
    }
}

#[derive(Debug)]
pub enum WatchSignal {
    Event(WatchEvent),
    /// Terminal. Carries the cause when the stream failed.
    Closed(Option<StoreError>),
}

/// Sending half handed to the task producing events for a [`Subscription`].
pub type SignalSender = mpsc::Sender<WatchSignal>;

/// A live watch. Dropping it closes the underlying stream.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<WatchSignal>,
    pump: Option<JoinHandle<()>>,
    done: bool,
}

impl Subscription {
    /// Channel pair; the producer task is attached with [`Subscription::attach`].
    pub fn channel(capacity: usize) -> (SignalSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx, pump: None, done: false })
    }

    pub fn attach(mut self, pump: JoinHandle<()>) -> Self {
        self.pump = Some(pump);
        self
    }

    /// Next signal. After `Closed` every call returns `Closed(None)`.
    pub async fn next(&mut self) -> WatchSignal {
        if self.done {
            return WatchSignal::Closed(None);
        }
        match self.rx.recv().await {
            Some(WatchSignal::Closed(cause)) => {
                self.done = true;
                WatchSignal::Closed(cause)
            }
            Some(signal) => signal,
            None => {
                self.done = true;
                WatchSignal::Closed(None)
            }
        }
    }

    pub fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.rx.close();
        self.done = true;
    }

    pub fn is_closed(&self) -> bool {
        self.done
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

use std::marker::PhantomData;

use kope_core::Describe;
use kope_kubehub::{StoreError, Subscription, WatchAction, WatchSignal};
use kope_marshal::unmarshal;
use serde_json::Value as Json;
use tracing::warn;

/// A watch notification decoded into `T`.
#[derive(Debug)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
    Bookmark,
    /// Store-side error notification, or a document that failed to decode.
    Error(Json),
    /// Terminal.
    Closed(Option<StoreError>),
}

impl<T> WatchEvent<T> {
    pub fn instance(&self) -> Option<&T> {
        match self {
            WatchEvent::Added(v) | WatchEvent::Modified(v) | WatchEvent::Deleted(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, WatchEvent::Closed(_))
    }
}

pub struct Watch<T> {
    sub: Subscription,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Describe + 'static> Watch<T> {
    pub(crate) fn new(sub: Subscription) -> Self {
        Self { sub, _kind: PhantomData }
    }

    pub async fn next(&mut self) -> WatchEvent<T> {
        let ev = match self.sub.next().await {
            WatchSignal::Event(ev) => ev,
            WatchSignal::Closed(cause) => return WatchEvent::Closed(cause),
        };
        let wrap = match ev.action {
            WatchAction::Added => WatchEvent::Added,
            WatchAction::Modified => WatchEvent::Modified,
            WatchAction::Deleted => WatchEvent::Deleted,
            WatchAction::Bookmark => return WatchEvent::Bookmark,
            WatchAction::Error => return WatchEvent::Error(ev.document),
        };
        match unmarshal::<T>(&ev.document) {
            Ok(value) => wrap(value),
            Err(e) => {
                warn!(action = %ev.action, error = %e, "watch document did not decode");
                WatchEvent::Error(ev.document)
            }
        }
    }

    pub fn close(&mut self) {
        self.sub.close();
    }

    pub fn is_closed(&self) -> bool {
        self.sub.is_closed()
    }
}

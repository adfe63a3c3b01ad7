//! The account-and-data service the monitor talks to.
//!
//! Everything the core knows about the backend goes through [`Backend`]:
//! push subscriptions, whole-value writes, partial updates, and one-shot
//! reads. Subscriptions deliver into a shared queue instead of calling back,
//! so a single owner drains primary, legacy, status and registry updates one
//! at a time in arrival order. Nothing re-enters the view while it is
//! half-updated.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::error::Result;

pub mod memory;

pub use memory::MemoryBackend;

/// Which upstream a queued update came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Feed {
    Registry,
    /// Status feed of one device; carries the MAC so updates for a device the
    /// view no longer watches can be recognised and dropped.
    DeviceStatus(String),
    PrimarySessions,
    LegacySessions,
    DriverDirectory,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    /// Current value at the subscribed path; `None` when nothing is stored.
    Value(Option<Value>),
    /// The subscription could not be served (unauthorized, unprovisioned path).
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    pub feed: Feed,
    pub update: FeedUpdate,
}

impl FeedEvent {
    pub fn value(feed: Feed, value: Option<Value>) -> Self {
        Self {
            feed,
            update: FeedUpdate::Value(value),
        }
    }

    pub fn failed(feed: Feed, reason: impl Into<String>) -> Self {
        Self {
            feed,
            update: FeedUpdate::Failed(reason.into()),
        }
    }
}

pub type FeedSender = UnboundedSender<FeedEvent>;
pub type FeedReceiver = UnboundedReceiver<FeedEvent>;

pub fn feed_channel() -> (FeedSender, FeedReceiver) {
    mpsc::unbounded_channel()
}

/// Live subscription handle. Dropping it unsubscribes.
pub struct Subscription {
    path: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(path: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            path: path.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            debug!(path = %self.path, "Subscription released");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("active", &self.release.is_some())
            .finish()
    }
}

pub trait Backend {
    /// Pushes the current value at `path` into `sink` right away, then again
    /// after every change at, above, or below `path`.
    fn subscribe(&self, path: &str, feed: Feed, sink: FeedSender) -> Result<Subscription>;

    fn write(&self, path: &str, value: Value) -> Result<()>;

    /// Merges `partial` into the object at `path`; a `null` member deletes the key.
    fn patch_update(&self, path: &str, partial: Map<String, Value>) -> Result<()>;

    fn read_once(&self, path: &str) -> Result<Option<Value>>;
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn subscribe(&self, path: &str, feed: Feed, sink: FeedSender) -> Result<Subscription> {
        (**self).subscribe(path, feed, sink)
    }

    fn write(&self, path: &str, value: Value) -> Result<()> {
        (**self).write(path, value)
    }

    fn patch_update(&self, path: &str, partial: Map<String, Value>) -> Result<()> {
        (**self).patch_update(path, partial)
    }

    fn read_once(&self, path: &str) -> Result<Option<Value>> {
        (**self).read_once(path)
    }
}

impl<B: Backend + ?Sized> Backend for &B {
    fn subscribe(&self, path: &str, feed: Feed, sink: FeedSender) -> Result<Subscription> {
        (**self).subscribe(path, feed, sink)
    }

    fn write(&self, path: &str, value: Value) -> Result<()> {
        (**self).write(path, value)
    }

    fn patch_update(&self, path: &str, partial: Map<String, Value>) -> Result<()> {
        (**self).patch_update(path, partial)
    }

    fn read_once(&self, path: &str) -> Result<Option<Value>> {
        (**self).read_once(path)
    }
}

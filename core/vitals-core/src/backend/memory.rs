//! In-memory backend over a JSON tree.
//!
//! Mirrors the realtime database semantics the monitor relies on: `null` and
//! empty objects do not exist, writes notify every subscriber at, above or
//! below the written path, and a subscription delivers the current value as
//! soon as it is opened. Paths can be marked denied (reads fail the way an
//! unprovisioned legacy path does) or unreachable (writes fail the way they
//! do on network loss).
//!
//! The CLI uses it as a store file: [`MemoryBackend::load`] / [`MemoryBackend::save`]
//! with temp file + rename so an interrupted save never truncates the store.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use fs_err as fs;
use serde_json::{Map, Value};
use tracing::{debug, trace};
use vitals_protocol::paths;

use super::{Backend, Feed, FeedEvent, FeedSender, Subscription};
use crate::error::{Result, VitalsError};

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    root: Value,
    subscribers: Vec<Subscriber>,
    next_id: u64,
    denied: Vec<Vec<String>>,
    unreachable: Vec<Vec<String>>,
}

struct Subscriber {
    id: u64,
    path: Vec<String>,
    feed: Feed,
    sink: FeedSender,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Self {
        let backend = Self::new();
        backend.lock().root = normalize(value);
        backend
    }

    /// Loads a store file. A missing or empty file is an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path).map_err(|source| VitalsError::Io {
            context: format!("reading store {}", path.display()),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Self::new());
        }
        let value: Value = serde_json::from_str(&content).map_err(|source| VitalsError::Json {
            context: format!("parsing store {}", path.display()),
            source,
        })?;
        Ok(Self::from_value(value))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| VitalsError::Io {
                context: format!("creating {}", parent.display()),
                source,
            })?;
        }
        let payload =
            serde_json::to_vec_pretty(&self.snapshot()).map_err(|source| VitalsError::Json {
                context: "serializing store".to_string(),
                source,
            })?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, payload).map_err(|source| VitalsError::Io {
            context: format!("writing {}", tmp_path.display()),
            source,
        })?;
        fs::rename(&tmp_path, path).map_err(|source| VitalsError::Io {
            context: format!("committing {}", path.display()),
            source,
        })?;
        Ok(())
    }

    /// Whole tree as JSON (an empty object when nothing is stored).
    pub fn snapshot(&self) -> Value {
        match &self.lock().root {
            Value::Null => Value::Object(Map::new()),
            root => root.clone(),
        }
    }

    /// Refuse reads, subscriptions and writes at and below `path`.
    pub fn deny(&self, path: &str) {
        self.lock().denied.push(split(path));
    }

    /// Make writes at and below `path` fail until cleared.
    pub fn set_unreachable(&self, path: &str, unreachable: bool) {
        let segments = split(path);
        let mut inner = self.lock();
        inner.unreachable.retain(|existing| existing != &segments);
        if unreachable {
            inner.unreachable.push(segments);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Inner {
    fn is_denied(&self, segments: &[String]) -> bool {
        self.denied.iter().any(|denied| is_prefix(denied, segments))
    }

    fn check_writable(&self, path: &str, segments: &[String]) -> Result<()> {
        if self.is_denied(segments) {
            return Err(VitalsError::PermissionDenied(path.to_string()));
        }
        if self
            .unreachable
            .iter()
            .any(|unreachable| is_prefix(unreachable, segments))
        {
            return Err(VitalsError::backend(path, "backend unreachable"));
        }
        Ok(())
    }

    fn notify(&self, changed: &[String]) {
        for subscriber in &self.subscribers {
            if !is_prefix(&subscriber.path, changed) && !is_prefix(changed, &subscriber.path) {
                continue;
            }
            let value = get_at(&self.root, &subscriber.path).cloned();
            let event = FeedEvent::value(subscriber.feed.clone(), value);
            if subscriber.sink.send(event).is_err() {
                trace!(subscriber = subscriber.id, "Subscriber queue closed");
            }
        }
    }
}

impl Backend for MemoryBackend {
    fn subscribe(&self, path: &str, feed: Feed, sink: FeedSender) -> Result<Subscription> {
        let segments = split(path);
        let mut inner = self.lock();

        if inner.is_denied(&segments) {
            debug!(path = %path, "Subscription refused");
            let _ = sink.send(FeedEvent::failed(feed, format!("permission denied: {}", path)));
            return Ok(Subscription::new(path, || {}));
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let initial = get_at(&inner.root, &segments).cloned();
        let _ = sink.send(FeedEvent::value(feed.clone(), initial));
        inner.subscribers.push(Subscriber {
            id,
            path: segments,
            feed,
            sink,
        });

        let weak = Arc::downgrade(&self.inner);
        Ok(Subscription::new(path, move || {
            if let Some(inner) = weak.upgrade() {
                lock_inner(&inner).subscribers.retain(|s| s.id != id);
            }
        }))
    }

    fn write(&self, path: &str, value: Value) -> Result<()> {
        let segments = split(path);
        let mut inner = self.lock();
        inner.check_writable(path, &segments)?;
        set_at(&mut inner.root, &segments, normalize(value));
        inner.notify(&segments);
        Ok(())
    }

    fn patch_update(&self, path: &str, partial: Map<String, Value>) -> Result<()> {
        let segments = split(path);
        let mut inner = self.lock();
        inner.check_writable(path, &segments)?;
        for (key, value) in partial {
            let mut child = segments.clone();
            child.extend(split(&key));
            set_at(&mut inner.root, &child, normalize(value));
        }
        inner.notify(&segments);
        Ok(())
    }

    fn read_once(&self, path: &str) -> Result<Option<Value>> {
        let segments = split(path);
        let inner = self.lock();
        if inner.is_denied(&segments) {
            return Err(VitalsError::PermissionDenied(path.to_string()));
        }
        Ok(get_at(&inner.root, &segments).cloned())
    }
}

fn split(path: &str) -> Vec<String> {
    paths::segments(path).map(str::to_string).collect()
}

fn is_prefix(prefix: &[String], path: &[String]) -> bool {
    prefix.len() <= path.len() && prefix.iter().zip(path).all(|(a, b)| a == b)
}

fn get_at<'a>(node: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = node;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    match current {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        value => Some(value),
    }
}

/// Drops `null` members recursively; an object left empty becomes `null`.
fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .map(|(key, child)| (key, normalize(child)))
                .filter(|(_, child)| !child.is_null())
                .collect();
            if cleaned.is_empty() {
                Value::Null
            } else {
                Value::Object(cleaned)
            }
        }
        other => other,
    }
}

/// Stores `value` at `segments`, creating parents; `null` removes the key and
/// prunes parents left empty.
fn set_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            map.remove(head);
        } else {
            map.insert(head.clone(), value);
        }
        return;
    }

    let child = map.entry(head.clone()).or_insert(Value::Null);
    set_at(child, rest, value);
    let child_empty = match child {
        Value::Null => true,
        Value::Object(children) => children.is_empty(),
        _ => false,
    };
    if child_empty {
        map.remove(head);
    }
}

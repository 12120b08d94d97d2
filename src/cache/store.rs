//! Value Store Module
//!
//! Main store engine: values live on disk, are served from memory once a key
//! is warm, and changes fan out to per-key watchers.
//!
//! One lock guards the cache, the warm set and the watcher registry. Disk I/O
//! for a key happens while that lock is held so that the on-disk state always
//! precedes the in-memory state for whoever takes the lock next. Only
//! non-blocking enqueues happen under the lock; delivery to consumers is left
//! to each watcher's forwarding task.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cache::{validate_key, CancelToken, PrefixManager, StoreStats, WatchStream, VALUE_DIR};
use crate::codec::{Base64Codec, Codec};
use crate::config::DEFAULT_WATCH_BUFFER;
use crate::error::{Result, StateError};
use crate::models::TaggedValue;
use crate::tasks::spawn_forward_task;

/// Permissions for value files; values may be sensitive.
#[cfg(unix)]
const VALUE_FILE_MODE: u32 = 0o600;

type WatcherId = u64;

// == Watcher ==
/// Registry entry for one `watch` call.
#[derive(Debug)]
struct Watcher {
    key: String,
    /// Capacity-1 signal buffer drained by the forwarding task
    signal: mpsc::Sender<()>,
}

// == Store State ==
/// Everything guarded by the store lock.
#[derive(Debug, Default)]
struct StoreState {
    /// Authoritative in-memory values
    cache: HashMap<String, TaggedValue>,
    /// Keys whose presence is resolved in memory; never shrinks
    warm: HashSet<String>,
    /// Active subscriptions
    watchers: HashMap<WatcherId, Watcher>,
    next_watcher: WatcherId,
    stats: StoreStats,
}

impl StoreState {
    /// Signals every watcher of `key` without blocking. A full buffer already
    /// holds a pending notification that covers this change.
    fn notify(&mut self, key: &str) {
        let mut conflated = 0;
        for (id, watcher) in self.watchers.iter() {
            if watcher.key != key {
                continue;
            }
            match watcher.signal.try_send(()) {
                Ok(()) => self.stats.record_notification(),
                Err(TrySendError::Full(())) => {
                    self.stats.record_conflation();
                    conflated += 1;
                }
                // The forwarding task has exited and its guard is about to
                // deregister it
                Err(TrySendError::Closed(())) => {
                    debug!("Watcher {} for key {} is shutting down", id, key)
                }
            }
        }
        if conflated > 0 {
            debug!("Conflated {} notification(s) for key {}", conflated, key);
        }
    }

    fn deregister(&mut self, id: WatcherId) {
        if let Some(watcher) = self.watchers.remove(&id) {
            debug!("Removed watcher {} for key {}", id, watcher.key);
        }
    }
}

// == Watcher Guard ==
/// Removes a watcher from the registry when dropped.
///
/// Owned by the forwarding task, so deregistration happens exactly once on
/// every way out of that task, unwinding included.
#[derive(Debug)]
pub(crate) struct WatcherGuard {
    state: Arc<Mutex<StoreState>>,
    id: WatcherId,
}

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        let id = self.id;
        if let Ok(mut state) = self.state.try_lock() {
            state.deregister(id);
            return;
        }
        let state = Arc::clone(&self.state);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    state.lock().await.deregister(id);
                });
            }
            Err(_) => warn!("Watcher {} dropped outside a runtime; not deregistered", id),
        }
    }
}

// == Value Store ==
/// Disk-backed key-value store with change notifications.
///
/// Cloning is cheap and every clone shares the same state, so one store can
/// be built at start-up and handed to all consumers.
#[derive(Debug, Clone)]
pub struct ValueStore {
    /// Provisions `<base>/value/` on first disk access
    prefix: Arc<PrefixManager>,
    /// On-disk text representation of values
    codec: Arc<dyn Codec>,
    /// Cache, warm set and watcher registry
    state: Arc<Mutex<StoreState>>,
    /// Capacity of each watcher's outgoing stream
    watch_buffer: usize,
}

impl ValueStore {
    // == Constructor ==
    /// Creates a store whose values live under `<base_prefix>/value/`.
    ///
    /// Nothing is read from disk up front; each key is loaded on first `get`.
    pub fn new(base_prefix: impl AsRef<Path>) -> Self {
        Self {
            prefix: Arc::new(PrefixManager::new(base_prefix.as_ref().join(VALUE_DIR))),
            codec: Arc::new(Base64Codec),
            state: Arc::new(Mutex::new(StoreState::default())),
            watch_buffer: DEFAULT_WATCH_BUFFER,
        }
    }

    /// Replaces the codec. Must be called before the store is shared.
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Sets the capacity of each watcher's outgoing stream (minimum 1).
    pub fn with_watch_buffer(mut self, capacity: usize) -> Self {
        self.watch_buffer = capacity.max(1);
        self
    }

    /// Directory holding the value files.
    pub fn value_dir(&self) -> &Path {
        self.prefix.path()
    }

    /// Path of the file backing `key`.
    pub fn value_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.prefix.path().join(key))
    }

    // == Get ==
    /// Returns the current value of `key`, or `None` if it is not set.
    ///
    /// The first read of a key goes to disk; afterwards memory is
    /// authoritative. A read or decode failure is returned and the key stays
    /// cold so the next call retries.
    pub async fn get(&self, key: &str) -> Result<Option<TaggedValue>> {
        validate_key(key)?;
        let dir = self.prefix.ensure().await?;

        let mut state = self.state.lock().await;

        let mut from_disk = None;
        if !state.warm.contains(key) {
            state.stats.record_disk_read();
            from_disk = read_value_file(&dir.join(key), self.codec.as_ref()).await?;
        }

        // Anything in memory overrides what is on disk
        if let Some(value) = state.cache.get(key) {
            return Ok(Some(value.clone()));
        }

        state.warm.insert(key.to_string());
        Ok(from_disk)
    }

    // == Set ==
    /// Stores `value` under `key`, or removes the key when `value` is `None`.
    ///
    /// The file is written (or removed) before memory is touched; if that
    /// fails nothing else changes and no watcher is notified. Removing a key
    /// that does not exist succeeds.
    pub async fn set(&self, key: &str, value: Option<TaggedValue>) -> Result<()> {
        validate_key(key)?;
        let encoded = match &value {
            Some(v) => Some(self.codec.encode(v)?),
            None => None,
        };
        let dir = self.prefix.ensure().await?;
        let path = dir.join(key);

        let mut state = self.state.lock().await;

        match &encoded {
            Some(text) => {
                write_value_file(&path, text).await?;
                state.stats.record_disk_write();
            }
            None => {
                remove_value_file(&path).await?;
                state.stats.record_disk_remove();
            }
        }

        match value {
            Some(v) => {
                state.cache.insert(key.to_string(), v);
            }
            None => {
                state.cache.remove(key);
            }
        }
        // Memory now matches disk for this key, so later reads can skip it
        state.warm.insert(key.to_string());

        // Removals notify too
        state.notify(key);
        Ok(())
    }

    /// Removes `key`. Same as `set(key, None)`.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.set(key, None).await
    }

    // == Watch ==
    /// Subscribes to changes of `key` until `cancel` fires.
    ///
    /// The stream yields one notification right away, then at least one after
    /// every `set` of the key. Notifications for a burst of changes may be
    /// merged into one, so consumers must `get` the key to learn its state.
    /// Dropping the stream also ends the subscription.
    pub async fn watch(&self, key: &str, cancel: CancelToken) -> Result<WatchStream> {
        validate_key(key)?;

        let (signal_tx, signal_rx) = mpsc::channel(1);
        let (out_tx, out_rx) = mpsc::channel(self.watch_buffer);

        let id = {
            let mut state = self.state.lock().await;

            // Startup signal so every subscriber sees at least one event
            signal_tx
                .try_send(())
                .map_err(|e| StateError::Programming(format!("startup signal rejected: {}", e)))?;

            let id = state.next_watcher;
            state.next_watcher += 1;
            state.watchers.insert(
                id,
                Watcher {
                    key: key.to_string(),
                    signal: signal_tx,
                },
            );
            id
        };
        debug!("Registered watcher {} for key {}", id, key);

        let guard = WatcherGuard {
            state: Arc::clone(&self.state),
            id,
        };
        spawn_forward_task(key.to_string(), signal_rx, out_tx, cancel, guard);

        Ok(WatchStream::new(out_rx))
    }

    // == Stats ==
    /// Returns current store statistics.
    pub async fn stats(&self) -> StoreStats {
        let state = self.state.lock().await;
        let mut stats = state.stats.clone();
        stats.set_sizes(state.cache.len(), state.warm.len(), state.watchers.len());
        stats
    }
}

// == Disk Helpers ==

/// Reads and decodes one value file. A missing file is `Ok(None)`.
async fn read_value_file(path: &Path, codec: &dyn Codec) -> Result<Option<TaggedValue>> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No value file at {}", path.display());
            return Ok(None);
        }
        Err(e) => return Err(StateError::io(format!("read {}", path.display()), e)),
    };
    debug!("Loaded value file {}", path.display());
    codec.decode(text.trim()).map(Some)
}

/// Writes one newline-terminated value file with owner-only permissions.
async fn write_value_file(path: &Path, encoded: &str) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(VALUE_FILE_MODE);

    let context = || format!("write {}", path.display());
    let mut file = options
        .open(path)
        .await
        .map_err(|e| StateError::io(context(), e))?;
    file.write_all(encoded.as_bytes())
        .await
        .map_err(|e| StateError::io(context(), e))?;
    file.write_all(b"\n")
        .await
        .map_err(|e| StateError::io(context(), e))?;
    file.flush().await.map_err(|e| StateError::io(context(), e))?;

    debug!("Wrote value file {}", path.display());
    Ok(())
}

/// Removes one value file. A missing file counts as success.
async fn remove_value_file(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed value file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StateError::io(format!("remove {}", path.display()), e)),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::cancel_pair;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_stream::StreamExt;

    fn new_store() -> (TempDir, ValueStore) {
        let tmp = TempDir::new().unwrap();
        let store = ValueStore::new(tmp.path());
        (tmp, store)
    }

    async fn next_within(stream: &mut WatchStream, ms: u64) -> Option<()> {
        tokio::time::timeout(Duration::from_millis(ms), stream.next())
            .await
            .ok()
            .flatten()
    }

    async fn wait_for_watchers(store: &ValueStore, expected: usize) {
        for _ in 0..200 {
            if store.stats().await.active_watchers == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {} watchers, found {}",
            expected,
            store.stats().await.active_watchers
        );
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let (_tmp, store) = new_store();
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert!(store.value_dir().is_dir());
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (_tmp, store) = new_store();

        store.set("key1", Some(TaggedValue::text("value1"))).await.unwrap();
        let value = store.get("key1").await.unwrap();

        assert_eq!(value, Some(TaggedValue::text("value1")));
    }

    #[tokio::test]
    async fn test_set_writes_newline_terminated_file() {
        let (_tmp, store) = new_store();
        let value = TaggedValue::text("on disk");

        store.set("key1", Some(value.clone())).await.unwrap();

        let path = store.value_path("key1").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with('\n'));
        assert_eq!(Base64Codec.decode(contents.trim()).unwrap(), value);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_value_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_tmp, store) = new_store();
        store.set("secret", Some(TaggedValue::text("s3cr3t"))).await.unwrap();

        let mode = std::fs::metadata(store.value_path("secret").unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let (_tmp, store) = new_store();

        store.set("key1", Some(TaggedValue::text("value1"))).await.unwrap();
        store.set("key1", Some(TaggedValue::text("value2"))).await.unwrap();

        let value = store.get("key1").await.unwrap();
        assert_eq!(value, Some(TaggedValue::text("value2")));
        assert_eq!(store.stats().await.cached_entries, 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let (_tmp, store) = new_store();

        store.set("key1", Some(TaggedValue::text("value1"))).await.unwrap();
        store.remove("key1").await.unwrap();

        assert_eq!(store.get("key1").await.unwrap(), None);
        assert!(!store.value_path("key1").unwrap().exists());
    }

    #[tokio::test]
    async fn test_remove_nonexistent_is_ok() {
        let (_tmp, store) = new_store();
        assert!(store.set("never-set", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_cold_read_from_previous_store() {
        let tmp = TempDir::new().unwrap();

        let first = ValueStore::new(tmp.path());
        first.set("key1", Some(TaggedValue::text("persisted"))).await.unwrap();
        drop(first);

        let second = ValueStore::new(tmp.path());
        let value = second.get("key1").await.unwrap();
        assert_eq!(value, Some(TaggedValue::text("persisted")));
        assert_eq!(second.stats().await.disk_reads, 1);
    }

    #[tokio::test]
    async fn test_warm_key_skips_disk() {
        let (_tmp, store) = new_store();

        assert_eq!(store.get("key1").await.unwrap(), None);
        assert_eq!(store.get("key1").await.unwrap(), None);

        // A file appearing behind our back is not seen once the key is warm
        std::fs::write(
            store.value_path("key1").unwrap(),
            format!("{}\n", Base64Codec.encode(&TaggedValue::text("sneaky")).unwrap()),
        )
        .unwrap();
        assert_eq!(store.get("key1").await.unwrap(), None);

        let stats = store.stats().await;
        assert_eq!(stats.disk_reads, 1);
        assert_eq!(stats.warm_keys, 1);
    }

    #[tokio::test]
    async fn test_get_after_set_does_not_read_disk() {
        let (_tmp, store) = new_store();

        store.set("key1", Some(TaggedValue::text("value1"))).await.unwrap();
        store.get("key1").await.unwrap();
        store.get("key1").await.unwrap();

        assert_eq!(store.stats().await.disk_reads, 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_decode_error_and_stays_cold() {
        let (_tmp, store) = new_store();
        store.prefix.ensure().await.unwrap();
        let path = store.value_path("broken").unwrap();
        std::fs::write(&path, "%%% not a value %%%\n").unwrap();

        let result = store.get("broken").await;
        assert!(matches!(result, Err(StateError::Decode(_))));
        assert_eq!(store.stats().await.warm_keys, 0);

        // Fixing the file lets the next call succeed
        std::fs::write(
            &path,
            format!("{}\n", Base64Codec.encode(&TaggedValue::text("fixed")).unwrap()),
        )
        .unwrap();
        assert_eq!(
            store.get("broken").await.unwrap(),
            Some(TaggedValue::text("fixed"))
        );
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_untouched() {
        let (_tmp, store) = new_store();
        store.set("key1", Some(TaggedValue::text("old"))).await.unwrap();

        // A directory in place of the value file makes the write fail
        let path = store.value_path("key1").unwrap();
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let (_canceller, token) = cancel_pair();
        let mut stream = store.watch("key1", token).await.unwrap();
        assert!(next_within(&mut stream, 500).await.is_some());

        let result = store.set("key1", Some(TaggedValue::text("new"))).await;
        assert!(matches!(result, Err(StateError::Io { .. })));
        assert_eq!(
            store.get("key1").await.unwrap(),
            Some(TaggedValue::text("old"))
        );
        assert!(next_within(&mut stream, 100).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_key() {
        let (_tmp, store) = new_store();

        assert!(matches!(
            store.get("../escape").await,
            Err(StateError::Validation(_))
        ));
        assert!(matches!(
            store.set("", Some(TaggedValue::text("x"))).await,
            Err(StateError::Validation(_))
        ));
        let (_canceller, token) = cancel_pair();
        assert!(matches!(
            store.watch("a/b", token).await,
            Err(StateError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_watch_sends_startup_notification() {
        let (_tmp, store) = new_store();
        let (_canceller, token) = cancel_pair();

        let mut stream = store.watch("key1", token).await.unwrap();

        assert!(next_within(&mut stream, 500).await.is_some());
        assert!(next_within(&mut stream, 50).await.is_none());
    }

    #[tokio::test]
    async fn test_watch_notifies_on_set_and_remove() {
        let (_tmp, store) = new_store();
        let (_canceller, token) = cancel_pair();
        let mut stream = store.watch("key1", token).await.unwrap();
        next_within(&mut stream, 500).await.unwrap();

        store.set("key1", Some(TaggedValue::text("v1"))).await.unwrap();
        assert!(next_within(&mut stream, 500).await.is_some());

        store.remove("key1").await.unwrap();
        assert!(next_within(&mut stream, 500).await.is_some());
    }

    #[tokio::test]
    async fn test_watch_ignores_other_keys() {
        let (_tmp, store) = new_store();
        let (_canceller, token) = cancel_pair();
        let mut stream = store.watch("key1", token).await.unwrap();
        next_within(&mut stream, 500).await.unwrap();

        store.set("key2", Some(TaggedValue::text("v"))).await.unwrap();
        assert!(next_within(&mut stream, 100).await.is_none());
    }

    #[tokio::test]
    async fn test_burst_is_conflated_but_not_lost() {
        let (_tmp, store) = new_store();
        let (_canceller, token) = cancel_pair();
        let mut stream = store.watch("key1", token).await.unwrap();

        // Don't drain the startup notification before the burst
        for i in 0..10 {
            store
                .set("key1", Some(TaggedValue::text(format!("v{}", i))))
                .await
                .unwrap();
        }

        let mut received = 0;
        while next_within(&mut stream, 200).await.is_some() {
            received += 1;
        }
        assert!(received >= 1);
        assert!(received <= 11);
        assert!(store.stats().await.notifications_conflated > 0);
        assert_eq!(
            store.get("key1").await.unwrap(),
            Some(TaggedValue::text("v9"))
        );
    }

    #[tokio::test]
    async fn test_cancel_removes_watcher() {
        let (_tmp, store) = new_store();
        let (canceller, token) = cancel_pair();
        let mut stream = store.watch("key1", token).await.unwrap();
        next_within(&mut stream, 500).await.unwrap();
        assert_eq!(store.stats().await.active_watchers, 1);

        canceller.cancel();
        wait_for_watchers(&store, 0).await;

        store.set("key1", Some(TaggedValue::text("v"))).await.unwrap();
        assert!(next_within(&mut stream, 200).await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_stream_removes_watcher() {
        let (_tmp, store) = new_store();
        let (_canceller, token) = cancel_pair();
        let stream = store.watch("key1", token).await.unwrap();
        drop(stream);

        // The forwarding task notices on its next send attempt
        store.set("key1", Some(TaggedValue::text("v"))).await.unwrap();
        wait_for_watchers(&store, 0).await;
    }

    #[tokio::test]
    async fn test_multiple_watchers_same_key() {
        let (_tmp, store) = new_store();
        let (_c1, t1) = cancel_pair();
        let (_c2, t2) = cancel_pair();
        let mut s1 = store.watch("key1", t1).await.unwrap();
        let mut s2 = store.watch("key1", t2).await.unwrap();
        next_within(&mut s1, 500).await.unwrap();
        next_within(&mut s2, 500).await.unwrap();

        store.set("key1", Some(TaggedValue::text("v"))).await.unwrap();

        assert!(next_within(&mut s1, 500).await.is_some());
        assert!(next_within(&mut s2, 500).await.is_some());
        assert_eq!(store.stats().await.active_watchers, 2);
    }

    #[tokio::test]
    async fn test_custom_codec() {
        #[derive(Debug)]
        struct PlainText;

        impl Codec for PlainText {
            fn encode(&self, value: &TaggedValue) -> Result<String> {
                value
                    .as_text()
                    .map(|s| s.to_string())
                    .ok_or_else(|| StateError::Encode("text only".to_string()))
            }

            fn decode(&self, text: &str) -> Result<TaggedValue> {
                Ok(TaggedValue::text(text))
            }
        }

        let tmp = TempDir::new().unwrap();
        let store = ValueStore::new(tmp.path()).with_codec(Arc::new(PlainText));

        store.set("greeting", Some(TaggedValue::text("hi"))).await.unwrap();
        let contents = std::fs::read_to_string(store.value_path("greeting").unwrap()).unwrap();
        assert_eq!(contents, "hi\n");

        let result = store
            .set("blob", Some(TaggedValue::new("bytes", vec![1, 2, 3])))
            .await;
        assert!(matches!(result, Err(StateError::Encode(_))));
        assert!(!store.value_path("blob").unwrap().exists());
    }
}

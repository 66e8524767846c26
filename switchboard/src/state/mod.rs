//! Shared guild state, replicated through a backing store so every process of
//! a deployment sees the same guilds, channels, members and indices.

pub mod bans;
pub mod dedup;
pub mod error;
pub mod getters;
pub mod handlers;
pub mod keys;
pub mod memory;
pub mod merge;
pub mod models;
pub mod redis;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::engine::tasks::BackgroundTasks;

use self::bans::UpstreamBans;
use self::error::{StateError, StateResult};
use self::keys::KeyCodec;
use self::store::StateStore;

/// Handle to the shared state. Cheap to clone; clones share the store, the
/// handler lock and the background task scope.
#[derive(Clone)]
pub struct SharedState {
    store: Arc<dyn StateStore>,
    keys: KeyCodec,
    /// Serializes mutation handlers within this process.
    lock: Arc<Mutex<()>>,
    bans: Option<Arc<dyn UpstreamBans>>,
    tasks: BackgroundTasks,
    max_channel_messages: usize,
    expire: Option<Duration>,
}

impl SharedState {
    pub fn new(store: Arc<dyn StateStore>, keys: KeyCodec) -> Self {
        Self {
            store,
            keys,
            lock: Arc::new(Mutex::new(())),
            bans: None,
            tasks: BackgroundTasks::new(),
            max_channel_messages: 0,
            expire: None,
        }
    }

    /// Enable ban list backfill through `bans`.
    pub fn with_upstream_bans(mut self, bans: Arc<dyn UpstreamBans>) -> Self {
        self.bans = Some(bans);
        self
    }

    pub fn with_background_tasks(mut self, tasks: BackgroundTasks) -> Self {
        self.tasks = tasks;
        self
    }

    /// Keep up to `max` recent messages per channel. 0 keeps none.
    pub fn with_max_channel_messages(mut self, max: usize) -> Self {
        self.max_channel_messages = max;
        self
    }

    /// Expire entity records after `expire`.
    pub fn with_expiry(mut self, expire: Option<Duration>) -> Self {
        self.expire = expire;
        self
    }

    pub fn keys(&self) -> &KeyCodec {
        &self.keys
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    pub(crate) async fn write_object<T: Serialize>(&self, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.store.set(key, &bytes, self.expire).await
    }

    pub(crate) async fn read_object<T: DeserializeOwned>(&self, key: &str) -> StateResult<T> {
        let bytes = self.store.get(key).await?.ok_or(StateError::NotFound)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub(crate) async fn delete_object(&self, key: &str) -> StateResult<()> {
        self.store.delete(key).await
    }
}

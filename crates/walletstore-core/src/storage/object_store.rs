use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use thiserror::Error;

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Maximum number of keys returned by one listing page unless a store says otherwise.
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Errors produced by backing object stores.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObjectStoreError {
    /// Requested object does not exist.
    #[error("no such key: {key}")]
    NotFound { key: String },
    /// Bucket does not exist.
    #[error("no such bucket: {bucket}")]
    NoSuchBucket { bucket: String },
    /// Network, filesystem or service failure.
    #[error("transport failure: {reason}")]
    Transport { reason: String },
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Keys in this page, in the order the store returned them.
    pub keys: Vec<String>,
    /// Token to pass back to fetch the following page.
    pub next_token: Option<String>,
    /// Whether more pages follow.
    pub truncated: bool,
}

/// Minimal S3-style client contract: flat keys inside buckets, prefix listing with
/// continuation tokens, and bucket provisioning.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Persist an object, overwriting any existing object with the same key.
    async fn put_object(&self, bucket: &str, key: &str, data: &[u8])
        -> Result<(), ObjectStoreError>;

    /// Fetch an object.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError>;

    /// List keys beginning with `prefix`, resuming from `continuation` if given.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, ObjectStoreError>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError>;

    async fn create_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError>;

    /// Block until a freshly created bucket is visible.
    async fn wait_until_bucket_exists(&self, bucket: &str) -> Result<(), ObjectStoreError>;
}

/// Connection parameters handed to a [`Connector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub region: String,
    /// Custom endpoint for S3-compatible services.
    pub endpoint: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
        }
    }
}

/// Builds an object-store client for a region/endpoint pair.
#[async_trait]
pub trait Connector: Send + Sync {
    type Client: ObjectStore + 'static;

    async fn connect(&self, settings: &ClientSettings) -> Result<Self::Client, ObjectStoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    buckets: HashMap<String, BTreeMap<String, Vec<u8>>>,
    failing: HashSet<String>,
    requests: Vec<String>,
}

/// In-memory object store for tests and smoke runs.
/// Clones share state, so a clone handed to a store can be inspected afterwards.
#[derive(Debug, Clone)]
pub struct InMemoryObjectStore {
    inner: Arc<Mutex<MemoryState>>,
    page_size: usize,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self {
            inner: Arc::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit listing pages to `page_size` keys to exercise continuation tokens.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make every subsequent `get_object` for `key` fail with a transport error.
    pub fn fail_key(&self, key: impl Into<String>) {
        if let Ok(mut state) = self.inner.lock() {
            state.failing.insert(key.into());
        }
    }

    /// Log of requests seen so far, formatted as `"<op> <key>"`.
    pub fn requests(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|state| state.requests.clone())
            .unwrap_or_default()
    }

    pub fn clear_requests(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.requests.clear();
        }
    }

    /// Keys currently held in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.inner
            .lock()
            .ok()
            .and_then(|state| state.buckets.get(bucket).map(|b| b.keys().cloned().collect()))
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, ObjectStoreError> {
        self.inner.lock().map_err(|err| ObjectStoreError::Transport {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
    ) -> Result<(), ObjectStoreError> {
        let mut state = self.lock()?;
        state.requests.push(format!("put {key}"));
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ObjectStoreError::NoSuchBucket {
                bucket: bucket.to_string(),
            })?;
        objects.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let mut state = self.lock()?;
        state.requests.push(format!("get {key}"));
        if state.failing.contains(key) {
            return Err(ObjectStoreError::Transport {
                reason: format!("injected failure for {key}"),
            });
        }
        let objects = state
            .buckets
            .get(bucket)
            .ok_or_else(|| ObjectStoreError::NoSuchBucket {
                bucket: bucket.to_string(),
            })?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, ObjectStoreError> {
        let mut state = self.lock()?;
        state.requests.push(format!("list {prefix}"));
        let objects = state
            .buckets
            .get(bucket)
            .ok_or_else(|| ObjectStoreError::NoSuchBucket {
                bucket: bucket.to_string(),
            })?;

        // Continuation token is the last key of the previous page.
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| continuation.is_none_or(|token| k.as_str() > token))
            .take(self.page_size + 1)
            .cloned()
            .collect();

        let truncated = keys.len() > self.page_size;
        keys.truncate(self.page_size);
        let next_token = if truncated { keys.last().cloned() } else { None };
        Ok(ListPage {
            keys,
            next_token,
            truncated,
        })
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.lock()?.buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        self.lock()?.buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn wait_until_bucket_exists(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        if self.bucket_exists(bucket).await? {
            Ok(())
        } else {
            Err(ObjectStoreError::NoSuchBucket {
                bucket: bucket.to_string(),
            })
        }
    }
}

#[async_trait]
impl Connector for InMemoryObjectStore {
    type Client = InMemoryObjectStore;

    async fn connect(&self, _settings: &ClientSettings) -> Result<Self::Client, ObjectStoreError> {
        Ok(self.clone())
    }
}

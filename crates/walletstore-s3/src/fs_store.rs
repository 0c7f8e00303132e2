use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};
use walletstore_core::storage::{
    ClientSettings, Connector, ListPage, ObjectStore, ObjectStoreError,
};

/// Keys returned per listing page, matching S3's default.
pub const LIST_PAGE_SIZE: usize = 1000;

/// S3-compatible object store on the local filesystem: one directory per bucket and
/// one file per object, named by the URL-safe base64 of its key.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    page_size: usize,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: LIST_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, ObjectStoreError> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket.starts_with('.') {
            return Err(ObjectStoreError::NoSuchBucket {
                bucket: bucket.to_string(),
            });
        }
        Ok(self.root.join(bucket))
    }

    fn existing_bucket_dir(&self, bucket: &str) -> Result<PathBuf, ObjectStoreError> {
        let dir = self.bucket_dir(bucket)?;
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(ObjectStoreError::NoSuchBucket {
                bucket: bucket.to_string(),
            })
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    #[instrument(skip_all, fields(%bucket, %key))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
    ) -> Result<(), ObjectStoreError> {
        let dir = self.existing_bucket_dir(bucket)?;
        write_object(&dir, &dir.join(encode_key(key)), data)
    }

    #[instrument(skip_all, fields(%bucket, %key))]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let dir = self.existing_bucket_dir(bucket)?;
        read_object(&dir.join(encode_key(key)), key)
    }

    #[instrument(skip_all, fields(%bucket, %prefix))]
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, ObjectStoreError> {
        let dir = self.existing_bucket_dir(bucket)?;
        let after = continuation.map(decode_key).transpose()?;

        let mut keys = Vec::new();
        for entry in fs::read_dir(&dir).map_err(transport_err)? {
            let entry = entry.map_err(transport_err)?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            // Temp files from in-flight writes do not decode.
            let Ok(key) = decode_key(&name) else {
                continue;
            };
            if key.starts_with(prefix) && after.as_deref().is_none_or(|a| key.as_str() > a) {
                keys.push(key);
            }
        }
        keys.sort();

        let truncated = keys.len() > self.page_size;
        keys.truncate(self.page_size);
        let next_token = if truncated {
            keys.last().map(|k| encode_key(k))
        } else {
            None
        };
        Ok(ListPage {
            keys,
            next_token,
            truncated,
        })
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.bucket_dir(bucket)?.is_dir())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        let dir = self.bucket_dir(bucket)?;
        debug!(?dir, "creating bucket");
        fs::create_dir_all(dir).map_err(transport_err)
    }

    async fn wait_until_bucket_exists(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        // Directory creation is synchronous, so there is nothing to wait for.
        self.existing_bucket_dir(bucket).map(|_| ())
    }
}

#[async_trait]
impl Connector for FsObjectStore {
    type Client = FsObjectStore;

    /// A custom endpoint is taken as the root directory; region has no meaning locally.
    async fn connect(&self, settings: &ClientSettings) -> Result<Self::Client, ObjectStoreError> {
        let root = settings
            .endpoint
            .as_deref()
            .map(|endpoint| PathBuf::from(endpoint.strip_prefix("file://").unwrap_or(endpoint)))
            .unwrap_or_else(|| self.root.clone());
        debug!(?root, region = %settings.region, "connecting filesystem object store");
        fs::create_dir_all(&root).map_err(transport_err)?;
        Ok(FsObjectStore {
            root,
            page_size: self.page_size,
        })
    }
}

fn write_object(dir: &Path, path: &Path, data: &[u8]) -> Result<(), ObjectStoreError> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(transport_err)?;
    tmp.write_all(data).map_err(transport_err)?;
    tmp.flush().map_err(transport_err)?;
    tmp.persist(path).map_err(|e| transport_err(e.error))?;
    Ok(())
}

fn read_object(path: &Path, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
    let mut file = File::open(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ObjectStoreError::NotFound {
                key: key.to_string(),
            }
        } else {
            transport_err(err)
        }
    })?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(transport_err)?;
    Ok(buf)
}

fn encode_key(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key)
}

fn decode_key(name: &str) -> Result<String, ObjectStoreError> {
    URL_SAFE_NO_PAD
        .decode(name)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| ObjectStoreError::Transport {
            reason: format!("undecodable object name {name:?}"),
        })
}

fn transport_err<E: ToString>(err: E) -> ObjectStoreError {
    ObjectStoreError::Transport {
        reason: err.to_string(),
    }
}

//! Single-object reads and writes, with encryption applied on the way through.

use std::sync::Arc;

use tracing::instrument;
use walletstore_core::{storage::ObjectStore, wallet::StoreError};

use crate::crypt::Crypter;

/// Size of the serialized empty accounts index, stored without encryption.
pub const EMPTY_INDEX_LEN: usize = 2;

/// Put/get primitives shared by the facade and the bulk enumerator.
/// Holds only read-only configuration, so clones are cheap and can move into tasks.
pub struct RecordStore<O> {
    client: Arc<O>,
    bucket: Arc<str>,
    crypter: Crypter,
}

impl<O> Clone for RecordStore<O> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            bucket: Arc::clone(&self.bucket),
            crypter: self.crypter.clone(),
        }
    }
}

impl<O: ObjectStore> RecordStore<O> {
    pub fn new(client: Arc<O>, bucket: &str, crypter: Crypter) -> Self {
        Self {
            client,
            bucket: Arc::from(bucket),
            crypter,
        }
    }

    pub fn client(&self) -> &O {
        &self.client
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Encrypt if required, then upload; overwrites any object at `key`.
    #[instrument(skip_all, fields(%key))]
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let data = self.crypter.encrypt(data.to_vec()).await?;
        self.put_plain(key, &data).await
    }

    /// Download, then decrypt if required. A missing key is the backing store's `NotFound`.
    #[instrument(skip_all, fields(%key))]
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let data = self.get_plain(key).await?;
        self.crypter.decrypt(data).await
    }

    pub async fn put_plain(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        self.client.put_object(&self.bucket, key, data).await?;
        Ok(())
    }

    pub async fn get_plain(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        Ok(self.client.get_object(&self.bucket, key).await?)
    }

    /// Accounts index write: the empty index is stored as-is.
    pub async fn put_index(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        if data.len() == EMPTY_INDEX_LEN {
            self.put_plain(key, data).await
        } else {
            self.put(key, data).await
        }
    }

    pub async fn get_index(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let data = self.get_plain(key).await?;
        if data.len() == EMPTY_INDEX_LEN {
            return Ok(data);
        }
        self.crypter.decrypt(data).await
    }
}

#[cfg(test)]
mod tests {
    use walletstore_core::storage::{InMemoryObjectStore, ObjectStoreError};

    use std::{
        fmt,
        sync::{mpsc, Mutex},
        time::Duration,
    };

    use tracing::{
        field::{Field, Visit},
        span, Subscriber,
    };
    use tracing_subscriber::{
        layer::{Context, SubscriberExt},
        Layer,
    };

    use super::*;
    use crate::crypt::{AesGcmCipher, Cipher, CipherError};

    /// Pass-through cipher that blocks until signalled from an async task.
    struct GatedCipher {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl GatedCipher {
        fn wait(&self) -> Result<(), CipherError> {
            let gate = self.gate.lock().map_err(|_| CipherError::Decrypt)?;
            gate.recv_timeout(Duration::from_secs(5))
                .map_err(|_| CipherError::Decrypt)
        }
    }

    impl Cipher for GatedCipher {
        fn seal(&self, data: &[u8], _passphrase: &[u8]) -> Result<Vec<u8>, CipherError> {
            self.wait()
                .map_err(|_| CipherError::Encrypt("gate timed out".into()))?;
            Ok(data.to_vec())
        }

        fn open(&self, data: &[u8], _passphrase: &[u8]) -> Result<Vec<u8>, CipherError> {
            self.wait()?;
            Ok(data.to_vec())
        }
    }

    async fn records(passphrase: &str) -> (InMemoryObjectStore, RecordStore<InMemoryObjectStore>) {
        let backend = InMemoryObjectStore::new();
        backend.create_bucket("bucket").await.expect("bucket");
        let crypter = Crypter::new(passphrase.as_bytes(), Arc::new(AesGcmCipher));
        let records = RecordStore::new(Arc::new(backend.clone()), "bucket", crypter);
        (backend, records)
    }

    #[tokio::test]
    async fn put_encrypts_and_get_decrypts() {
        let (backend, records) = records("secret").await;
        let payload = br#"{"name":"acct","uuid":"00000000-0000-0000-0000-000000000001"}"#;

        records.put("w/a", payload).await.expect("put");
        let raw = backend.get_object("bucket", "w/a").await.expect("raw");
        assert_ne!(raw, payload);
        assert_eq!(records.get("w/a").await.expect("get"), payload);
    }

    #[tokio::test]
    async fn missing_key_is_not_found_not_empty() {
        let (_, records) = records("").await;
        let err = records.get("nope").await.expect_err("missing");
        assert!(matches!(
            err,
            StoreError::Object(ObjectStoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn empty_index_is_stored_in_plaintext() {
        let (backend, records) = records("secret").await;

        records.put_index("w/index", b"{}").await.expect("put index");
        assert_eq!(backend.get_object("bucket", "w/index").await.unwrap(), b"{}");
        assert_eq!(records.get_index("w/index").await.expect("get index"), b"{}");

        let full = br#"{"00000000-0000-0000-0000-000000000001":"acct"}"#;
        records.put_index("w/index", full).await.expect("put index");
        assert_ne!(backend.get_object("bucket", "w/index").await.unwrap(), full);
        assert_eq!(records.get_index("w/index").await.expect("get index"), full);
    }

    #[tokio::test]
    async fn cipher_work_leaves_the_runtime_free() {
        // Single-threaded runtime: the signalling task only runs if the cipher is
        // off the runtime thread while it waits.
        let backend = InMemoryObjectStore::new();
        backend.create_bucket("bucket").await.expect("bucket");
        let (tx, rx) = mpsc::channel();
        let cipher = GatedCipher {
            gate: Mutex::new(rx),
        };
        let crypter = Crypter::new(b"secret", Arc::new(cipher));
        let records = RecordStore::new(Arc::new(backend), "bucket", crypter);
        let payload = b"payload long enough to be sealed";

        let signal = tx.clone();
        tokio::spawn(async move { signal.send(()).ok() });
        records.put("w/a", payload).await.expect("put");

        tokio::spawn(async move { tx.send(()).ok() });
        assert_eq!(records.get("w/a").await.expect("get"), payload);
    }

    /// Collects `name=value` for every field recorded when a span opens.
    #[derive(Clone, Default)]
    struct SpanFields(Arc<Mutex<Vec<String>>>);

    impl Visit for SpanFields {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if let Ok(mut fields) = self.0.lock() {
                fields.push(format!("{}={:?}", field.name(), value));
            }
        }
    }

    impl<S: Subscriber> Layer<S> for SpanFields {
        fn on_new_span(&self, attrs: &span::Attributes<'_>, _id: &span::Id, _ctx: Context<'_, S>) {
            attrs.record(&mut self.clone());
        }
    }

    #[tokio::test]
    async fn spans_carry_the_object_key() {
        let fields = SpanFields::default();
        let subscriber = tracing_subscriber::registry().with(fields.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let (_, records) = records("").await;
        records.put("w/a", b"plain").await.expect("put");
        records.get("w/a").await.expect("get");

        let seen = fields.0.lock().expect("lock").clone();
        assert_eq!(seen, vec!["key=w/a", "key=w/a"]);
    }
}

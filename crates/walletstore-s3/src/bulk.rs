//! List-then-fetch retrieval of every record under a prefix.
//!
//! One full, sequential listing pass collects the keys; fetches then fan out across
//! at most `concurrency` tasks. Records arrive in completion order. A key that cannot
//! be fetched or decrypted is logged and skipped. The stream ends only after every
//! fetch has finished.

use std::sync::Arc;

use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinSet,
};
use tracing::{debug, warn};
use walletstore_core::{
    storage::{ObjectStore, ObjectStoreError},
    wallet::RecordStream,
};

use crate::records::RecordStore;

/// Default cap on simultaneous object downloads.
pub const DOWNLOAD_CONCURRENCY: usize = 16;

/// Records buffered ahead of a slow consumer.
const ELEMENT_CAPACITY: usize = 64;

/// Start listing `prefix` and fetching every key accepted by `filter`.
pub fn list_and_fetch<O, F>(
    records: RecordStore<O>,
    prefix: String,
    filter: F,
    concurrency: usize,
) -> RecordStream
where
    O: ObjectStore + 'static,
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel(ELEMENT_CAPACITY);
    tokio::spawn(async move {
        let keys = match list_all(&records, &prefix, &tx).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(%prefix, %err, "listing failed");
                return;
            }
        };

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut fetches = JoinSet::new();
        for key in keys
            .into_iter()
            .filter(|key| !key.ends_with('/') && filter(key.as_str()))
        {
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = tx.closed() => break,
            };
            let records = records.clone();
            let tx = tx.clone();
            fetches.spawn(async move {
                let _permit = permit;
                tokio::select! {
                    fetched = records.get(&key) => match fetched {
                        Ok(data) => {
                            let _ = tx.send(data).await;
                        }
                        Err(err) => debug!(%key, %err, "skipping unreadable record"),
                    },
                    _ = tx.closed() => {}
                }
            });
        }

        while fetches.join_next().await.is_some() {}
        debug!(%prefix, "retrieval complete");
    });
    RecordStream::new(rx)
}

/// Follow continuation tokens until the listing is exhausted or the consumer goes away.
async fn list_all<O: ObjectStore>(
    records: &RecordStore<O>,
    prefix: &str,
    tx: &mpsc::Sender<Vec<u8>>,
) -> Result<Vec<String>, ObjectStoreError> {
    let mut keys = Vec::new();
    let mut token: Option<String> = None;
    loop {
        if tx.is_closed() {
            return Ok(Vec::new());
        }
        let page = records
            .client()
            .list_objects(records.bucket(), prefix, token.as_deref())
            .await?;
        keys.extend(page.keys);
        match (page.truncated, page.next_token) {
            (true, Some(next)) => token = Some(next),
            _ => break,
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use walletstore_core::storage::{InMemoryObjectStore, ListPage};

    use super::*;
    use crate::crypt::{AesGcmCipher, Crypter};

    async fn seeded(
        page_size: usize,
        count: usize,
        passphrase: &str,
    ) -> (InMemoryObjectStore, RecordStore<InMemoryObjectStore>) {
        let backend = InMemoryObjectStore::new().with_page_size(page_size);
        backend.create_bucket("b").await.expect("bucket");
        let crypter = Crypter::new(passphrase.as_bytes(), Arc::new(AesGcmCipher));
        let records = RecordStore::new(Arc::new(backend.clone()), "b", crypter);
        records.put_plain("w/", b"").await.expect("placeholder");
        for i in 0..count {
            let payload = format!(r#"{{"name":"record {i:04}"}}"#);
            records
                .put(&format!("w/{i:04}"), payload.as_bytes())
                .await
                .expect("put");
        }
        (backend, records)
    }

    fn sorted(records: Vec<Vec<u8>>) -> Vec<String> {
        let mut out: Vec<String> = records
            .into_iter()
            .map(|r| String::from_utf8(r).expect("utf8"))
            .collect();
        out.sort();
        out
    }

    #[tokio::test]
    async fn fetches_every_key_across_pages() {
        let (backend, records) = seeded(3, 10, "").await;
        let stream = list_and_fetch(records, "w/".into(), |_| true, 4);
        let got = sorted(stream.collect().await);

        assert_eq!(got.len(), 10);
        assert_eq!(got[0], r#"{"name":"record 0000"}"#);
        let lists = backend
            .requests()
            .iter()
            .filter(|r| r.starts_with("list "))
            .count();
        assert_eq!(lists, 4, "11 keys in pages of 3");
    }

    #[tokio::test]
    async fn filter_and_placeholders_are_skipped() {
        let (backend, records) = seeded(1000, 4, "").await;
        backend.clear_requests();
        let stream = list_and_fetch(records, "w/".into(), |key| !key.ends_with("0002"), 2);

        assert_eq!(stream.collect().await.len(), 3);
        assert!(!backend.requests().contains(&"get w/".to_string()));
        assert!(!backend.requests().contains(&"get w/0002".to_string()));
    }

    #[tokio::test]
    async fn per_key_failures_are_dropped() {
        let (backend, records) = seeded(1000, 5, "passphrase").await;
        backend.fail_key("w/0001");
        backend
            .put_object("b", "w/0003", b"corrupted ciphertext, not an envelope")
            .await
            .expect("corrupt");

        let got = sorted(list_and_fetch(records, "w/".into(), |_| true, 3).collect().await);
        assert_eq!(
            got,
            vec![
                r#"{"name":"record 0000"}"#,
                r#"{"name":"record 0002"}"#,
                r#"{"name":"record 0004"}"#,
            ]
        );
    }

    #[tokio::test]
    async fn listing_failure_yields_empty_stream() {
        let backend = InMemoryObjectStore::new();
        let records = RecordStore::new(Arc::new(backend), "missing", Crypter::default());
        let stream = list_and_fetch(records, String::new(), |_| true, 4);
        assert!(stream.collect().await.is_empty());
    }

    #[tokio::test]
    async fn closing_the_stream_stops_new_fetches() {
        let (backend, records) = seeded(1000, 200, "").await;
        backend.clear_requests();
        let mut stream = list_and_fetch(records, "w/".into(), |_| true, 1);

        assert!(stream.next().await.is_some());
        stream.close();
        while stream.next().await.is_some() {}

        // Give any straggling worker a chance to run before counting.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let gets = backend
            .requests()
            .iter()
            .filter(|r| r.starts_with("get "))
            .count();
        assert!(gets < 200, "fetching should stop after close, saw {gets}");
    }

    /// Delegating store that holds each get open briefly and records the most
    /// gets seen in flight at once.
    struct SlowGets {
        inner: InMemoryObjectStore,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore for SlowGets {
        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            data: &[u8],
        ) -> Result<(), ObjectStoreError> {
            self.inner.put_object(bucket, key, data).await
        }

        async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let result = self.inner.get_object(bucket, key).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn list_objects(
            &self,
            bucket: &str,
            prefix: &str,
            continuation: Option<&str>,
        ) -> Result<ListPage, ObjectStoreError> {
            self.inner.list_objects(bucket, prefix, continuation).await
        }

        async fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError> {
            self.inner.bucket_exists(bucket).await
        }

        async fn create_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
            self.inner.create_bucket(bucket).await
        }

        async fn wait_until_bucket_exists(&self, bucket: &str) -> Result<(), ObjectStoreError> {
            self.inner.wait_until_bucket_exists(bucket).await
        }
    }

    #[tokio::test]
    async fn fetches_never_exceed_the_concurrency_cap() {
        let (backend, _) = seeded(1000, 40, "").await;
        let slow = Arc::new(SlowGets {
            inner: backend,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let records = RecordStore::new(Arc::clone(&slow), "b", Crypter::default());

        let got = list_and_fetch(records, "w/".into(), |_| true, 3).collect().await;
        assert_eq!(got.len(), 40);

        let peak = slow.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "saw {peak} concurrent fetches with a cap of 3");
        assert!(peak > 1, "fetches should overlap, peak was {peak}");
    }
}

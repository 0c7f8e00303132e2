use std::{fmt, sync::Arc};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};
use uuid::Uuid;
use walletstore_core::{
    storage::{ClientSettings, Connector, ObjectStore, ObjectStoreError, DEFAULT_REGION},
    wallet::{
        BatchStore, RecordProbe, RecordStream, Store, StoreError, StoreLocationProvider,
    },
};

use crate::{
    bulk::{self, DOWNLOAD_CONCURRENCY},
    credentials::CredentialsProvider,
    crypt::{AesGcmCipher, Cipher, Crypter},
    keys::{self, KeyDeriver, KeyScheme, WalletScope, MAX_COMPONENT_LEN},
    records::RecordStore,
};

const BUCKET_NAME_DOMAIN: &str = "Ethereum 2 wallet";

/// Options for [`S3Store::open`].
#[derive(Clone)]
pub struct StoreOptions {
    id: Vec<u8>,
    region: String,
    endpoint: Option<String>,
    bucket: Option<String>,
    path: String,
    passphrase: Vec<u8>,
    key_scheme: KeyScheme,
    concurrency: usize,
    cipher: Arc<dyn Cipher>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            id: Vec::new(),
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            bucket: None,
            path: String::new(),
            passphrase: Vec::new(),
            key_scheme: KeyScheme::default(),
            concurrency: DOWNLOAD_CONCURRENCY,
            cipher: Arc::new(AesGcmCipher),
        }
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("path", &self.path)
            .field("encrypted", &!self.passphrase.is_empty())
            .field("key_scheme", &self.key_scheme)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifying salt mixed into the derived default bucket name.
    pub fn with_id(mut self, id: impl Into<Vec<u8>>) -> Self {
        self.id = id.into();
        self
    }

    /// Region for the object-store client. Empty strings keep the current region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        let region = region.into();
        if !region.is_empty() {
            self.region = region;
        }
        self
    }

    /// URL of an S3-compatible service to use in place of S3 itself.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint = (!endpoint.is_empty()).then_some(endpoint);
        self
    }

    /// Use this bucket instead of deriving one from the credentials.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        self.bucket = (!bucket.is_empty()).then_some(bucket);
        self
    }

    /// Path inside the bucket under which wallets are placed; defaults to the bucket root.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into().trim_matches('/').to_string();
        self
    }

    /// Encrypt every record written and decrypt every record read with this passphrase.
    pub fn with_passphrase(mut self, passphrase: impl Into<Vec<u8>>) -> Self {
        self.passphrase = passphrase.into();
        self
    }

    pub fn with_key_scheme(mut self, scheme: KeyScheme) -> Self {
        self.key_scheme = scheme;
        self
    }

    /// Cap on simultaneous downloads during bulk retrieval.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = cipher;
        self
    }
}

/// Bucket name derived from the account's access key and the store id:
/// the first 63 hex characters of SHA-256 over both.
pub fn default_bucket_name(access_key_id: &str, id: &[u8]) -> String {
    let digest = Sha256::new()
        .chain_update(format!("{BUCKET_NAME_DOMAIN}:{access_key_id}").as_bytes())
        .chain_update(id)
        .finalize();
    let mut bucket = hex::encode(digest);
    bucket.truncate(MAX_COMPONENT_LEN);
    bucket
}

/// Wallet store over an S3-compatible object store.
///
/// Holds no cached state: every retrieval reads the backing store again. Concurrent
/// writers to the same account are not excluded from each other; the last upload wins.
pub struct S3Store<O> {
    records: RecordStore<O>,
    keys: KeyDeriver,
    path: String,
    concurrency: usize,
}

impl<O: ObjectStore + 'static> S3Store<O> {
    /// Connect, resolve the bucket, and create the bucket and path if they do not exist.
    /// Any failure here is fatal; no store is returned.
    #[instrument(skip_all, fields(region = %options.region))]
    pub async fn open<C, P>(
        connector: &C,
        credentials: &P,
        options: StoreOptions,
    ) -> Result<Self, StoreError>
    where
        C: Connector<Client = O>,
        P: CredentialsProvider + ?Sized,
    {
        let settings = ClientSettings {
            region: options.region.clone(),
            endpoint: options.endpoint.clone(),
        };
        let client = connector
            .connect(&settings)
            .await
            .map_err(|source| StoreError::Provisioning {
                context: "unable to connect to object store",
                source,
            })?;

        let bucket = match &options.bucket {
            Some(bucket) if bucket.len() > MAX_COMPONENT_LEN => {
                return Err(StoreError::Config(format!(
                    "bucket cannot be more than {MAX_COMPONENT_LEN} characters in length"
                )))
            }
            Some(bucket) => bucket.clone(),
            None => {
                let resolved = credentials
                    .resolve()
                    .await
                    .map_err(|e| StoreError::Credentials(e.to_string()))?;
                default_bucket_name(&resolved.access_key_id, &options.id)
            }
        };

        ensure_bucket(&client, &bucket).await?;
        ensure_path(&client, &bucket, &options.path).await?;

        let crypter = Crypter::new(&options.passphrase, Arc::clone(&options.cipher));
        Ok(Self {
            records: RecordStore::new(Arc::new(client), &bucket, crypter),
            keys: KeyDeriver::new(options.key_scheme, &options.path),
            path: options.path,
            concurrency: options.concurrency,
        })
    }

    pub fn bucket(&self) -> &str {
        self.records.bucket()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn key_scheme(&self) -> KeyScheme {
        self.keys.scheme()
    }

    fn wallet_headers(&self) -> RecordStream {
        let keys = self.keys.clone();
        bulk::list_and_fetch(
            self.records.clone(),
            self.keys.listing_prefix(),
            move |key| keys.is_wallet_header(key),
            self.concurrency,
        )
    }

    fn accounts(&self, scope: &WalletScope) -> Result<RecordStream, StoreError> {
        let prefix = self.keys.wallet_prefix(scope)?;
        let keys = self.keys.clone();
        let scope = scope.clone();
        Ok(bulk::list_and_fetch(
            self.records.clone(),
            prefix,
            move |key| keys.is_account(key, &scope),
            self.concurrency,
        ))
    }

    async fn find_wallet<F>(&self, matches: F) -> Result<Vec<u8>, StoreError>
    where
        F: Fn(&RecordProbe) -> bool + Send + Sync,
    {
        first_match(self.wallet_headers(), matches)
            .await
            .ok_or(StoreError::NotFound { what: "wallet" })
    }

    async fn find_account<F>(&self, scope: &WalletScope, matches: F) -> Result<Vec<u8>, StoreError>
    where
        F: Fn(&RecordProbe) -> bool + Send + Sync,
    {
        first_match(self.accounts(scope)?, matches)
            .await
            .ok_or(StoreError::NotFound { what: "account" })
    }

    /// Confirm the wallet header exists; its name feeds name-based keys.
    async fn require_wallet(&self, wallet_id: Uuid) -> Result<WalletScope, StoreError> {
        match self.find_wallet(|probe| probe.uuid == Some(wallet_id)).await {
            Ok(header) => {
                let name = RecordProbe::parse(&header).and_then(|probe| probe.name);
                Ok(WalletScope::new(wallet_id, name))
            }
            Err(err) if err.is_not_found() => Err(StoreError::WalletNotFound { wallet_id }),
            Err(err) => Err(err),
        }
    }

    /// Scope for operations that only need the wallet header when keys are name-based.
    async fn resolve_scope(&self, wallet_id: Uuid) -> Result<WalletScope, StoreError> {
        if self.keys.scheme().is_name_based() {
            self.require_wallet(wallet_id).await
        } else {
            Ok(WalletScope::new(wallet_id, None))
        }
    }

    async fn account_by_name(
        &self,
        scope: &WalletScope,
        name: &str,
    ) -> Result<Vec<u8>, StoreError> {
        match self.keys.scheme() {
            KeyScheme::Identifier => {
                self.find_account(scope, |probe| probe.name.as_deref() == Some(name))
                    .await
            }
            KeyScheme::NameHash => {
                // Name-based keys ignore the account id.
                let key = self.keys.account_key(scope, Uuid::nil(), name)?;
                self.records.get(&key).await
            }
        }
    }
}

async fn first_match<F>(mut records: RecordStream, matches: F) -> Option<Vec<u8>>
where
    F: Fn(&RecordProbe) -> bool,
{
    while let Some(data) = records.next().await {
        if RecordProbe::parse(&data).is_some_and(|probe| matches(&probe)) {
            return Some(data);
        }
    }
    None
}

async fn ensure_bucket<O: ObjectStore>(client: &O, bucket: &str) -> Result<(), StoreError> {
    let exists = client
        .bucket_exists(bucket)
        .await
        .map_err(|source| StoreError::Provisioning {
            context: "unable to access bucket",
            source,
        })?;
    if exists {
        return Ok(());
    }

    info!(%bucket, "creating bucket");
    client
        .create_bucket(bucket)
        .await
        .map_err(|source| StoreError::Provisioning {
            context: "unable to create bucket",
            source,
        })?;
    client
        .wait_until_bucket_exists(bucket)
        .await
        .map_err(|source| StoreError::Provisioning {
            context: "failed to confirm bucket creation",
            source,
        })
}

/// Write a directory placeholder (`a/`, `a/b/`, ...) for every element of `path`.
async fn ensure_path<O: ObjectStore>(
    client: &O,
    bucket: &str,
    path: &str,
) -> Result<(), StoreError> {
    let mut current = String::new();
    for element in path.split('/').filter(|e| !e.is_empty()) {
        current = keys::join(&[&current, element]);
        let placeholder = format!("{current}/");
        match client.get_object(bucket, &placeholder).await {
            Ok(_) => continue,
            Err(ObjectStoreError::NotFound { .. }) => {}
            Err(source) => {
                return Err(StoreError::Provisioning {
                    context: "unable to access path",
                    source,
                })
            }
        }
        info!(%bucket, %placeholder, "creating path");
        client
            .put_object(bucket, &placeholder, &[])
            .await
            .map_err(|source| StoreError::Provisioning {
                context: "failed to confirm path creation",
                source,
            })?;
    }
    Ok(())
}

#[async_trait]
impl<O: ObjectStore + 'static> Store for S3Store<O> {
    fn name(&self) -> &'static str {
        "s3"
    }

    /// Overwrites unconditionally; name clashes between wallets are the caller's concern.
    #[instrument(skip_all, fields(wallet_id = %id))]
    async fn store_wallet(&self, id: Uuid, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let scope = WalletScope::new(id, Some(name.to_string()));
        let key = self.keys.wallet_header_key(&scope)?;
        self.records.put(&key, data).await?;
        debug!(%key, "stored wallet");
        Ok(())
    }

    #[instrument(skip_all)]
    async fn retrieve_wallet(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        self.find_wallet(|probe| probe.name.as_deref() == Some(name))
            .await
    }

    #[instrument(skip_all, fields(wallet_id = %id))]
    async fn retrieve_wallet_by_id(&self, id: Uuid) -> Result<Vec<u8>, StoreError> {
        self.find_wallet(|probe| probe.uuid == Some(id)).await
    }

    async fn retrieve_wallets(&self) -> RecordStream {
        self.wallet_headers()
    }

    #[instrument(skip_all, fields(%wallet_id, %account_id))]
    async fn store_account(
        &self,
        wallet_id: Uuid,
        account_id: Uuid,
        data: &[u8],
    ) -> Result<(), StoreError> {
        let scope = self.require_wallet(wallet_id).await?;
        let name = RecordProbe::parse(data)
            .and_then(|probe| probe.name)
            .ok_or_else(|| StoreError::MalformedRecord("account data has no name".to_string()))?;

        match self.account_by_name(&scope, &name).await {
            Ok(existing) => {
                let existing_id = RecordProbe::parse(&existing)
                    .and_then(|probe| probe.uuid)
                    .ok_or_else(|| {
                        StoreError::MalformedRecord(format!("stored account {name:?} has no uuid"))
                    })?;
                if existing_id != account_id {
                    return Err(StoreError::DuplicateName { name });
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let key = self.keys.account_key(&scope, account_id, &name)?;
        self.records.put(&key, data).await?;
        debug!(%key, "stored account");
        Ok(())
    }

    #[instrument(skip_all, fields(%wallet_id, %account_id))]
    async fn retrieve_account(
        &self,
        wallet_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<u8>, StoreError> {
        match self.keys.scheme() {
            KeyScheme::Identifier => {
                let scope = WalletScope::new(wallet_id, None);
                // Identifier keys ignore the account name.
                let key = self.keys.account_key(&scope, account_id, "")?;
                self.records.get(&key).await
            }
            KeyScheme::NameHash => {
                let scope = self.require_wallet(wallet_id).await?;
                self.find_account(&scope, |probe| probe.uuid == Some(account_id))
                    .await
            }
        }
    }

    #[instrument(skip_all, fields(%wallet_id))]
    async fn retrieve_account_by_name(
        &self,
        wallet_id: Uuid,
        name: &str,
    ) -> Result<Vec<u8>, StoreError> {
        let scope = self.resolve_scope(wallet_id).await?;
        self.account_by_name(&scope, name).await
    }

    #[instrument(skip_all, fields(%wallet_id))]
    async fn retrieve_accounts(&self, wallet_id: Uuid) -> RecordStream {
        let accounts = match self.resolve_scope(wallet_id).await {
            Ok(scope) => self.accounts(&scope),
            Err(err) => Err(err),
        };
        accounts.unwrap_or_else(|err| {
            debug!(%err, "no accounts to retrieve");
            RecordStream::empty()
        })
    }

    #[instrument(skip_all, fields(%wallet_id))]
    async fn store_accounts_index(&self, wallet_id: Uuid, data: &[u8]) -> Result<(), StoreError> {
        let scope = self.resolve_scope(wallet_id).await?;
        let key = self.keys.index_key(&scope)?;
        self.records.put_index(&key, data).await
    }

    #[instrument(skip_all, fields(%wallet_id))]
    async fn retrieve_accounts_index(&self, wallet_id: Uuid) -> Result<Vec<u8>, StoreError> {
        let scope = self.resolve_scope(wallet_id).await?;
        let key = self.keys.index_key(&scope)?;
        self.records.get_index(&key).await
    }
}

#[async_trait]
impl<O: ObjectStore + 'static> BatchStore for S3Store<O> {
    #[instrument(skip_all, fields(%wallet_id))]
    async fn store_batch(&self, wallet_id: Uuid, data: &[u8]) -> Result<(), StoreError> {
        let scope = self.require_wallet(wallet_id).await?;
        let key = self.keys.batch_key(&scope)?;
        self.records.put(&key, data).await
    }

    /// A wallet without a batch yields the backing store's own `NotFound`.
    #[instrument(skip_all, fields(%wallet_id))]
    async fn retrieve_batch(&self, wallet_id: Uuid) -> Result<Vec<u8>, StoreError> {
        let scope = self.require_wallet(wallet_id).await?;
        let key = self.keys.batch_key(&scope)?;
        self.records.get(&key).await
    }
}

impl<O> StoreLocationProvider for S3Store<O>
where
    O: ObjectStore + 'static,
{
    fn location(&self) -> String {
        keys::join(&[self.bucket(), &self.path])
    }
}

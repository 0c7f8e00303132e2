//! Wallet storage contracts: the capability traits a backend implements and the
//! errors they report.

mod stream;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::storage::ObjectStoreError;

pub use stream::RecordStream;

/// Errors produced by wallet stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A lookup by name or id found no matching record.
    #[error("{what} not found")]
    NotFound { what: &'static str },
    /// Error reported by the backing object store, passed through as-is.
    #[error(transparent)]
    Object(#[from] ObjectStoreError),
    /// A wallet-scoped operation ran before the wallet header was stored.
    #[error("wallet {wallet_id} not found")]
    WalletNotFound { wallet_id: Uuid },
    /// The account name is already bound to a different identifier.
    #[error("account already exists: {name}")]
    DuplicateName { name: String },
    /// Authentication failed while opening ciphertext (usually the wrong passphrase).
    #[error("failed to decrypt data; wrong passphrase?")]
    Decryption,
    #[error("data must be at least 16 bytes (got {len})")]
    PayloadTooShort { len: usize },
    #[error("encryption failed: {0}")]
    Encryption(String),
    /// A payload lacks the fields needed to key or match it.
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("credentials: {0}")]
    Credentials(String),
    /// Bucket or path provisioning failed while opening the store.
    #[error("{context}: {source}")]
    Provisioning {
        context: &'static str,
        #[source]
        source: ObjectStoreError,
    },
}

impl StoreError {
    /// True for lookup misses and for the backing store's own missing-key error.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. } | StoreError::Object(ObjectStoreError::NotFound { .. })
        )
    }
}

/// The `name`/`uuid` envelope shared by wallet and account payloads.
/// Everything else in a payload is opaque to the store.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RecordProbe {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uuid: Option<Uuid>,
}

impl RecordProbe {
    /// Parse the envelope; `None` when the payload is not a JSON object with these fields.
    pub fn parse(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}

/// Wallet and account persistence.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name used for logging and UI.
    fn name(&self) -> &'static str;

    /// Store wallet-level data, overwriting whatever is at the wallet's header key.
    async fn store_wallet(&self, id: Uuid, name: &str, data: &[u8]) -> Result<(), StoreError>;

    async fn retrieve_wallet(&self, name: &str) -> Result<Vec<u8>, StoreError>;

    async fn retrieve_wallet_by_id(&self, id: Uuid) -> Result<Vec<u8>, StoreError>;

    /// All wallet headers, in completion order.
    async fn retrieve_wallets(&self) -> RecordStream;

    /// Store an account; rejects a name already bound to a different account id.
    async fn store_account(
        &self,
        wallet_id: Uuid,
        account_id: Uuid,
        data: &[u8],
    ) -> Result<(), StoreError>;

    async fn retrieve_account(
        &self,
        wallet_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<u8>, StoreError>;

    async fn retrieve_account_by_name(
        &self,
        wallet_id: Uuid,
        name: &str,
    ) -> Result<Vec<u8>, StoreError>;

    /// All accounts of a wallet, in completion order.
    async fn retrieve_accounts(&self, wallet_id: Uuid) -> RecordStream;

    async fn store_accounts_index(&self, wallet_id: Uuid, data: &[u8]) -> Result<(), StoreError>;

    async fn retrieve_accounts_index(&self, wallet_id: Uuid) -> Result<Vec<u8>, StoreError>;
}

/// Stores that can hold a prepared batch blob per wallet.
#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn store_batch(&self, wallet_id: Uuid, data: &[u8]) -> Result<(), StoreError>;

    async fn retrieve_batch(&self, wallet_id: Uuid) -> Result<Vec<u8>, StoreError>;
}

/// Stores that can report where their data lives.
pub trait StoreLocationProvider {
    fn location(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_extracts_name_and_uuid() {
        let id = Uuid::new_v4();
        let data = format!(r#"{{"name":"test wallet","uuid":"{id}","version":1}}"#);
        let probe = RecordProbe::parse(data.as_bytes()).expect("probe");
        assert_eq!(probe.name.as_deref(), Some("test wallet"));
        assert_eq!(probe.uuid, Some(id));
    }

    #[test]
    fn probe_rejects_non_json() {
        assert!(RecordProbe::parse(b"\x00\x01garbage").is_none());
        assert_eq!(
            RecordProbe::parse(b"{}").expect("empty object"),
            RecordProbe::default()
        );
    }

    #[test]
    fn not_found_covers_backing_store_misses() {
        assert!(StoreError::NotFound { what: "wallet" }.is_not_found());
        assert!(StoreError::Object(ObjectStoreError::NotFound { key: "k".into() }).is_not_found());
        assert!(!StoreError::WalletNotFound {
            wallet_id: Uuid::nil()
        }
        .is_not_found());
        assert!(!StoreError::Decryption.is_not_found());
    }
}

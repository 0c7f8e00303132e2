//! Object-key derivation for wallet headers, accounts, indices and batches.
//!
//! Two layouts exist and a store uses exactly one of them:
//!
//! * [`KeyScheme::Identifier`]: `<root>/<walletID>/<walletID>` for the header and
//!   `<root>/<walletID>/<accountID>` for accounts. A header is the key whose last two
//!   segments are equal.
//! * [`KeyScheme::NameHash`]: every component is the first 63 hex characters of the
//!   SHA-256 of a name, so arbitrary names become valid keys and listings do not
//!   reveal them. Fixed records (header, index, batch) hash a reserved literal.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use walletstore_core::wallet::StoreError;

/// Longest computed key component; S3 bucket names share the same limit.
pub const MAX_COMPONENT_LEN: usize = 63;

const INDEX_SEGMENT: &str = "index";
const BATCH_SEGMENT: &str = "batch";

const HEADER_LITERAL: &str = "\0wallet";
const INDEX_LITERAL: &str = "\0index";
const BATCH_LITERAL: &str = "\0batch";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyScheme {
    #[default]
    Identifier,
    NameHash,
}

impl KeyScheme {
    /// Whether keys depend on wallet/account names rather than identifiers.
    pub fn is_name_based(self) -> bool {
        matches!(self, KeyScheme::NameHash)
    }
}

/// Identity of the wallet a key is scoped to. `name` is only consulted by name-based schemes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletScope {
    pub id: Uuid,
    pub name: Option<String>,
}

impl WalletScope {
    pub fn new(id: Uuid, name: Option<String>) -> Self {
        Self { id, name }
    }
}

/// First 63 hex characters of SHA-256 over the UTF-8 input.
pub fn hash_component(input: &str) -> String {
    let mut out = hex::encode(Sha256::digest(input.as_bytes()));
    out.truncate(MAX_COMPONENT_LEN);
    out
}

/// Join path segments with `/`, skipping empty ones.
pub fn join(segments: &[&str]) -> String {
    segments
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone)]
pub struct KeyDeriver {
    scheme: KeyScheme,
    root: String,
    header: String,
    index: String,
    batch: String,
}

impl KeyDeriver {
    pub fn new(scheme: KeyScheme, root: &str) -> Self {
        let (header, index, batch) = match scheme {
            KeyScheme::Identifier => (
                String::new(),
                INDEX_SEGMENT.to_string(),
                BATCH_SEGMENT.to_string(),
            ),
            KeyScheme::NameHash => (
                hash_component(HEADER_LITERAL),
                hash_component(INDEX_LITERAL),
                hash_component(BATCH_LITERAL),
            ),
        };
        Self {
            scheme,
            root: root.trim_matches('/').to_string(),
            header,
            index,
            batch,
        }
    }

    pub fn scheme(&self) -> KeyScheme {
        self.scheme
    }

    /// Prefix under which every wallet of this store lives.
    pub fn listing_prefix(&self) -> String {
        if self.root.is_empty() {
            String::new()
        } else {
            format!("{}/", self.root)
        }
    }

    /// Directory holding one wallet's header, accounts, index and batch.
    pub fn wallet_dir(&self, scope: &WalletScope) -> Result<String, StoreError> {
        let component = match self.scheme {
            KeyScheme::Identifier => scope.id.to_string(),
            KeyScheme::NameHash => hash_component(wallet_name(scope)?),
        };
        Ok(join(&[&self.root, &component]))
    }

    pub fn wallet_prefix(&self, scope: &WalletScope) -> Result<String, StoreError> {
        Ok(format!("{}/", self.wallet_dir(scope)?))
    }

    pub fn wallet_header_key(&self, scope: &WalletScope) -> Result<String, StoreError> {
        let dir = self.wallet_dir(scope)?;
        match self.scheme {
            KeyScheme::Identifier => Ok(join(&[&dir, &scope.id.to_string()])),
            KeyScheme::NameHash => Ok(join(&[&dir, &self.header])),
        }
    }

    pub fn account_key(
        &self,
        scope: &WalletScope,
        account_id: Uuid,
        account_name: &str,
    ) -> Result<String, StoreError> {
        let dir = self.wallet_dir(scope)?;
        match self.scheme {
            KeyScheme::Identifier => Ok(join(&[&dir, &account_id.to_string()])),
            KeyScheme::NameHash => {
                if [HEADER_LITERAL, INDEX_LITERAL, BATCH_LITERAL].contains(&account_name) {
                    return Err(StoreError::MalformedRecord(format!(
                        "account name {account_name:?} is reserved"
                    )));
                }
                Ok(join(&[&dir, &hash_component(account_name)]))
            }
        }
    }

    pub fn index_key(&self, scope: &WalletScope) -> Result<String, StoreError> {
        Ok(join(&[&self.wallet_dir(scope)?, &self.index]))
    }

    pub fn batch_key(&self, scope: &WalletScope) -> Result<String, StoreError> {
        Ok(join(&[&self.wallet_dir(scope)?, &self.batch]))
    }

    /// Whether a listed key is a wallet header.
    pub fn is_wallet_header(&self, key: &str) -> bool {
        let mut segments = key.rsplit('/');
        let (Some(last), Some(parent)) = (segments.next(), segments.next()) else {
            return false;
        };
        match self.scheme {
            KeyScheme::Identifier => last == parent && Uuid::parse_str(last).is_ok(),
            KeyScheme::NameHash => last == self.header,
        }
    }

    /// Whether a key listed under a wallet's prefix is one of its accounts.
    pub fn is_account(&self, key: &str, scope: &WalletScope) -> bool {
        if key.ends_with('/') {
            return false;
        }
        let last = key.rsplit('/').next().unwrap_or_default();
        match self.scheme {
            KeyScheme::Identifier => {
                matches!(Uuid::parse_str(last), Ok(id) if id != scope.id)
            }
            KeyScheme::NameHash => {
                !last.is_empty() && last != self.header && last != self.index && last != self.batch
            }
        }
    }
}

fn wallet_name(scope: &WalletScope) -> Result<&str, StoreError> {
    scope.name.as_deref().ok_or_else(|| {
        StoreError::MalformedRecord(format!("wallet {} has no name to derive keys from", scope.id))
    })
}

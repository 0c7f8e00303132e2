//! Wallet store over any S3-compatible object store.
//! Records are keyed deterministically from wallet/account identity and, when a
//! passphrase is configured, sealed with AES-256-GCM before they leave the process.

pub mod bulk;
pub mod credentials;
pub mod crypt;
pub mod fs_store;
pub mod keys;
pub mod records;
pub mod store;

pub use store::{S3Store, StoreOptions};

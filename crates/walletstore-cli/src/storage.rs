use std::path::PathBuf;

use color_eyre::Result;
use dirs::data_dir;
use tracing::debug;
use walletstore_s3::{
    credentials::{ChainCredentialsProvider, CredentialsProvider, StaticCredentialsProvider},
    fs_store::FsObjectStore,
    S3Store, StoreOptions,
};

use crate::config::{Config, StoreConfig};

/// Environment variable holding the store passphrase.
pub const PASSPHRASE_ENV: &str = "WALLETSTORE_PASSPHRASE";

/// Resolve the default data directory for the filesystem object store.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("walletstore"))
}

/// Translate the `[store]` section into construction options.
pub fn store_options(config: &StoreConfig, passphrase: Option<String>) -> StoreOptions {
    let mut options = StoreOptions::new();
    if let Some(id) = &config.id {
        options = options.with_id(id.as_bytes());
    }
    if let Some(region) = &config.region {
        options = options.with_region(region.as_str());
    }
    if let Some(endpoint) = &config.endpoint {
        options = options.with_endpoint(endpoint.as_str());
    }
    if let Some(bucket) = &config.bucket {
        options = options.with_bucket(bucket.as_str());
    }
    if let Some(path) = &config.path {
        options = options.with_path(path.as_str());
    }
    if let Some(scheme) = config.key_scheme {
        options = options.with_key_scheme(scheme);
    }
    if let Some(passphrase) = passphrase.filter(|p| !p.is_empty()) {
        options = options.with_passphrase(passphrase);
    }
    options
}

fn credentials_provider(config: &StoreConfig) -> Box<dyn CredentialsProvider> {
    match &config.access_key_id {
        Some(access_key_id) => Box::new(StaticCredentialsProvider::new(access_key_id.as_str())),
        None => Box::new(ChainCredentialsProvider::default_chain()),
    }
}

/// Open the wallet store described by `config` over the local filesystem.
pub async fn store_from_config(config: &Config) -> Result<S3Store<FsObjectStore>> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    debug!(?root, "opening wallet store");

    let connector = FsObjectStore::new(root);
    let options = store_options(&config.store, std::env::var(PASSPHRASE_ENV).ok());
    let credentials = credentials_provider(&config.store);
    S3Store::open(&connector, credentials.as_ref(), options)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))
}

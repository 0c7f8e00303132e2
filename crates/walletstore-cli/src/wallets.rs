use std::collections::BTreeMap;

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use uuid::Uuid;
use walletstore_core::wallet::{RecordProbe, Store};

use crate::cli::{AccountCommand, WalletCommand};

const RECORD_VERSION: u32 = 1;

/// Minimal wallet/account payload written by the CLI.
#[derive(Debug, Serialize)]
struct NewRecord<'a> {
    name: &'a str,
    uuid: Uuid,
    version: u32,
}

/// A stored record as listed: its id and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Listed {
    pub name: String,
    pub uuid: Uuid,
}

pub async fn handle_wallet<S: Store + ?Sized>(cmd: WalletCommand, store: &S) -> Result<()> {
    match cmd {
        WalletCommand::List => {
            let wallets = list_wallets(store).await;
            if wallets.is_empty() {
                println!("No wallets yet. Create one with `walletstore wallet create <name>`.");
                return Ok(());
            }
            for wallet in wallets {
                println!("{} {}", wallet.uuid, wallet.name);
            }
        }
        WalletCommand::Create { name } => {
            let id = create_wallet(store, &name).await?;
            println!("Created wallet {id}: {name}");
        }
        WalletCommand::Show { name } => {
            let data = store.retrieve_wallet(&name).await.map_err(|e| eyre!(e.to_string()))?;
            println!("{}", String::from_utf8_lossy(&data));
        }
    }
    Ok(())
}

pub async fn handle_account<S: Store + ?Sized>(cmd: AccountCommand, store: &S) -> Result<()> {
    match cmd {
        AccountCommand::List { wallet } => {
            let wallet_id = wallet_id(store, &wallet).await?;
            let accounts = list_accounts(store, wallet_id).await;
            if accounts.is_empty() {
                println!("Wallet {wallet} has no accounts.");
                return Ok(());
            }
            for account in accounts {
                println!("{} {}", account.uuid, account.name);
            }
        }
        AccountCommand::Create { wallet, name } => {
            let wallet_id = wallet_id(store, &wallet).await?;
            let id = create_account(store, wallet_id, &name).await?;
            println!("Created account {id}: {wallet}/{name}");
        }
        AccountCommand::Show { wallet, name } => {
            let wallet_id = wallet_id(store, &wallet).await?;
            let data = store
                .retrieve_account_by_name(wallet_id, &name)
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            println!("{}", String::from_utf8_lossy(&data));
        }
    }
    Ok(())
}

/// Store a new wallet header and an empty accounts index.
pub async fn create_wallet<S: Store + ?Sized>(store: &S, name: &str) -> Result<Uuid> {
    if store.retrieve_wallet(name).await.is_ok() {
        return Err(eyre!("wallet {name} already exists"));
    }
    let id = Uuid::new_v4();
    let data = serde_json::to_vec(&NewRecord {
        name,
        uuid: id,
        version: RECORD_VERSION,
    })?;
    store
        .store_wallet(id, name, &data)
        .await
        .map_err(|e| eyre!(e.to_string()))?;
    store
        .store_accounts_index(id, b"{}")
        .await
        .map_err(|e| eyre!(e.to_string()))?;
    Ok(id)
}

/// Store a new account and record it in the wallet's accounts index.
pub async fn create_account<S: Store + ?Sized>(
    store: &S,
    wallet_id: Uuid,
    name: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let data = serde_json::to_vec(&NewRecord {
        name,
        uuid: id,
        version: RECORD_VERSION,
    })?;
    store
        .store_account(wallet_id, id, &data)
        .await
        .map_err(|e| eyre!(e.to_string()))?;

    let mut index = accounts_index(store, wallet_id).await?;
    index.insert(id, name.to_string());
    store
        .store_accounts_index(wallet_id, &serde_json::to_vec(&index)?)
        .await
        .map_err(|e| eyre!(e.to_string()))?;
    Ok(id)
}

/// The wallet's id-to-name index; empty when none has been stored.
pub async fn accounts_index<S: Store + ?Sized>(
    store: &S,
    wallet_id: Uuid,
) -> Result<BTreeMap<Uuid, String>> {
    match store.retrieve_accounts_index(wallet_id).await {
        Ok(data) => Ok(serde_json::from_slice(&data)?),
        Err(err) if err.is_not_found() => Ok(BTreeMap::new()),
        Err(err) => Err(eyre!(err.to_string())),
    }
}

pub async fn list_wallets<S: Store + ?Sized>(store: &S) -> Vec<Listed> {
    listed(store.retrieve_wallets().await.collect().await)
}

pub async fn list_accounts<S: Store + ?Sized>(store: &S, wallet_id: Uuid) -> Vec<Listed> {
    listed(store.retrieve_accounts(wallet_id).await.collect().await)
}

async fn wallet_id<S: Store + ?Sized>(store: &S, name: &str) -> Result<Uuid> {
    let data = store
        .retrieve_wallet(name)
        .await
        .map_err(|e| eyre!(e.to_string()))?;
    RecordProbe::parse(&data)
        .and_then(|probe| probe.uuid)
        .ok_or_else(|| eyre!("wallet {name} has no uuid"))
}

fn listed(records: Vec<Vec<u8>>) -> Vec<Listed> {
    let mut out: Vec<Listed> = records
        .iter()
        .filter_map(|data| RecordProbe::parse(data))
        .filter_map(|probe| {
            Some(Listed {
                name: probe.name?,
                uuid: probe.uuid?,
            })
        })
        .collect();
    out.sort();
    out
}

use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "walletstore",
    about = "Encrypted wallet and account store over S3-compatible object storage",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Open the store (creating bucket and path if needed) and enumerate wallets.
    Health,
    /// Print where wallets are stored.
    Location,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage wallets.
    #[command(subcommand)]
    Wallet(WalletCommand),
    /// Manage accounts inside a wallet.
    #[command(subcommand)]
    Account(AccountCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum WalletCommand {
    List,
    Create { name: String },
    /// Print a wallet's stored record.
    Show { name: String },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum AccountCommand {
    List { wallet: String },
    Create { wallet: String, name: String },
    /// Print an account's stored record.
    Show { wallet: String, name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_health_subcommand() {
        let cli = Cli::try_parse_from(["walletstore", "health"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Health);
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli =
            Cli::try_parse_from(["walletstore", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Config(ConfigCommand::Init));
    }

    #[test]
    fn parses_wallet_create() {
        let cli = Cli::try_parse_from(["walletstore", "wallet", "create", "primary"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Wallet(WalletCommand::Create {
                name: "primary".into()
            })
        );
    }

    #[test]
    fn parses_account_show() {
        let cli = Cli::try_parse_from(["walletstore", "account", "show", "primary", "validator 1"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Account(AccountCommand::Show {
                wallet: "primary".into(),
                name: "validator 1".into(),
            })
        );
    }

    #[test]
    fn requires_a_subcommand() {
        assert!(Cli::try_parse_from(["walletstore"]).is_err());
        assert!(Cli::try_parse_from(["walletstore", "account", "create", "primary"]).is_err());
    }
}

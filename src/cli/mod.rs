//! CLI module
//!
//! This module defines the command-line interface using clap and implements
//! the command execution logic.

use crate::client::Role;
use crate::ledger::{AppId, AssetId};
use crate::{Config, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod commands;
pub mod output;

/// NFT Escrow CLI
#[derive(Parser, Debug)]
#[command(name = "nft-escrow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Ledger snapshot to continue (overrides config)
    #[arg(short, long, global = true)]
    pub ledger: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the whole sale on a fresh (or the given) ledger
    Demo {
        /// Sale price in microunits (overrides config)
        #[arg(short, long)]
        price: Option<u64>,

        /// Delete the escrow once the sale completes
        #[arg(long)]
        delete: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },

    /// Create an application
    Create {
        /// Which program to deploy
        #[arg(short, long, value_enum, default_value = "escrow")]
        kind: ContractKind,

        /// Initial name (name contract only)
        #[arg(long)]
        initial_name: Option<String>,

        /// Signing role
        #[arg(long = "as", value_enum, default_value = "creator")]
        role: Role,
    },

    /// Pay the escrow its setup funding
    Fund {
        #[arg(short, long, value_parser = parse_app_id)]
        app: AppId,

        #[arg(long = "as", value_enum, default_value = "creator")]
        role: Role,
    },

    /// Mint a single-unit NFT owned by the seller
    Mint {
        #[arg(long = "as", value_enum, default_value = "seller")]
        role: Role,
    },

    /// List an NFT in the escrow
    Deposit {
        #[arg(short, long, value_parser = parse_app_id)]
        app: AppId,

        #[arg(short, long, value_parser = parse_asset_id)]
        nft: AssetId,

        /// Sale price in microunits (defaults to the configured price)
        #[arg(short, long)]
        price: Option<u64>,

        #[arg(long = "as", value_enum, default_value = "seller")]
        role: Role,
    },

    /// Buy the listed NFT
    Buy {
        #[arg(short, long, value_parser = parse_app_id)]
        app: AppId,

        #[arg(long = "as", value_enum, default_value = "buyer")]
        role: Role,
    },

    /// Delete the escrow, returning its NFT and balance
    Delete {
        #[arg(short, long, value_parser = parse_app_id)]
        app: AppId,

        #[arg(long = "as", value_enum, default_value = "creator")]
        role: Role,
    },

    /// Change the stored name of a name contract
    Rename {
        #[arg(short, long, value_parser = parse_app_id)]
        app: AppId,

        /// New name
        name: String,

        #[arg(long = "as", value_enum, default_value = "creator")]
        role: Role,
    },

    /// Show an application's global state
    State {
        #[arg(short, long, value_parser = parse_app_id)]
        app: AppId,

        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },

    /// Show role accounts and balances
    Account {
        /// Only this role
        #[arg(short, long, value_enum)]
        role: Option<Role>,

        /// Print a freshly generated secret key instead
        #[arg(long)]
        generate: bool,

        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },

    /// Show an escrow's lifecycle graph
    History {
        #[arg(short, long, value_parser = parse_app_id)]
        app: AppId,

        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,

        /// Also write the DOT graph to a timestamped file
        #[arg(long)]
        export: bool,
    },
}

/// Deployable programs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ContractKind {
    /// NFT escrow
    Escrow,
    /// Single-key name store
    Name,
}

/// Output format types
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// DOT format (Graphviz), history only
    Dot,
    /// Plain text table
    Table,
}

fn parse_app_id(s: &str) -> std::result::Result<AppId, String> {
    s.parse().map(AppId).map_err(|e| format!("invalid application id: {}", e))
}

fn parse_asset_id(s: &str) -> std::result::Result<AssetId, String> {
    s.parse().map(AssetId).map_err(|e| format!("invalid asset id: {}", e))
}

/// Execute the CLI command
pub async fn execute(args: Cli, config: Config) -> Result<()> {
    commands::execute(args.command, config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli =
            Cli::try_parse_from(["nft-escrow", "demo", "--price", "5000", "--delete"]).unwrap();
        match cli.command {
            Commands::Demo { price, delete, output } => {
                assert_eq!(price, Some(5000));
                assert!(delete);
                assert_eq!(output, OutputFormat::Table);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_ledger_and_roles() {
        let cli = Cli::try_parse_from([
            "nft-escrow",
            "buy",
            "--app",
            "3",
            "--as",
            "seller",
            "--ledger",
            "/tmp/ledger.json",
        ])
        .unwrap();
        assert_eq!(cli.ledger, Some(PathBuf::from("/tmp/ledger.json")));
        match cli.command {
            Commands::Buy { app, role } => {
                assert_eq!(app, AppId(3));
                assert_eq!(role, Role::Seller);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_ids() {
        assert!(Cli::try_parse_from(["nft-escrow", "fund", "--app", "x"]).is_err());
        assert!(Cli::try_parse_from(["nft-escrow", "deposit", "--app", "1"]).is_err());
    }
}

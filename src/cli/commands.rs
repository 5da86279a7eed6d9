//! CLI command implementations
//!
//! This module contains the implementation for each CLI command. Every
//! command except `demo` works on a persistent ledger snapshot so separate
//! invocations continue one sale.

use crate::cli::Commands;
use crate::client::{Account, Session};
use crate::ledger::{LedgerStore, create_node};
use crate::{Config, Result};

/// Dispatch a parsed command
pub async fn execute(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Demo {
            price,
            delete,
            output,
        } => demo::execute(config, price, delete, output).await,
        Commands::Account {
            role,
            generate: true,
            ..
        } => inspect::generate_key(role),
        Commands::Account { role, output, .. } => {
            let session = persistent_session(config).await?;
            inspect::accounts(&session, role, output).await
        }
        Commands::State { app, output } => {
            let session = persistent_session(config).await?;
            inspect::state(&session, app, output).await
        }
        Commands::History {
            app,
            output,
            export,
        } => {
            let session = persistent_session(config).await?;
            inspect::history(&session, app, output, export).await
        }
        other => {
            let session = persistent_session(config).await?;
            workflow::execute(&session, other).await
        }
    }
}

/// Session over the configured ledger snapshot, or the default one
async fn persistent_session(mut config: Config) -> Result<Session> {
    if config.node.ledger_path.is_none() {
        let path = LedgerStore::default_path()?;
        tracing::debug!("No ledger path configured, using {:?}", path);
        config.node.ledger_path = Some(path);
    }
    let node = create_node(&config).await?;
    Session::from_config(node, &config)
}

/// Demo command implementation
pub mod demo {
    use super::*;
    use crate::cli::OutputFormat;
    use crate::client::DemoOptions;

    /// Run the full sale, in memory unless a ledger path is set
    pub async fn execute(
        config: Config,
        price: Option<u64>,
        delete: bool,
        output: OutputFormat,
    ) -> Result<()> {
        let node = create_node(&config).await?;
        let session = Session::from_config(node, &config)?;

        tracing::info!("Running the escrow demo");
        let report = session.run_demo(&DemoOptions { price, delete }).await?;

        match output {
            OutputFormat::Json => crate::cli::output::output_json(&mut std::io::stdout(), &report)?,
            OutputFormat::Table => {
                crate::cli::output::output_demo_table(&mut std::io::stdout(), &report)?
            }
            OutputFormat::Dot => {
                let graph = session.lifecycle_graph(report.app_id).await?;
                println!("{}", graph.to_dot());
            }
        }
        Ok(())
    }
}

/// Single workflow steps
pub mod workflow {
    use super::*;
    use crate::cli::ContractKind;

    pub async fn execute(session: &Session, command: Commands) -> Result<()> {
        match command {
            Commands::Create {
                kind: ContractKind::Escrow,
                role,
                ..
            } => {
                let app_id = session.create_escrow_contract(role).await?;
                println!("Created escrow application {}", app_id);
                println!("Escrow address: {}", app_id.address());
            }
            Commands::Create {
                kind: ContractKind::Name,
                initial_name,
                role,
            } => {
                let app_id = session
                    .create_name_contract(role, initial_name.as_deref())
                    .await?;
                println!("Created name application {}", app_id);
            }
            Commands::Fund { app, role } => {
                let txid = session.fund_escrow_contract(role, app).await?;
                println!("Funded escrow {} in transaction {}", app, txid);
            }
            Commands::Mint { role } => {
                let nft_id = session.create_nft(role).await?;
                println!("Created NFT {}", nft_id);
            }
            Commands::Deposit {
                app,
                nft,
                price,
                role,
            } => {
                let price = price.unwrap_or(session.sale().price);
                let txid = session.deposit_nft(role, app, nft, price).await?;
                println!("Listed NFT {} in escrow {} for {} uA ({})", nft, app, price, txid);
            }
            Commands::Buy { app, role } => {
                let txid = session.pay_contract(role, app).await?;
                println!("Bought from escrow {} in transaction {}", app, txid);
            }
            Commands::Delete { app, role } => {
                let txid = session.delete_escrow_contract(role, app).await?;
                println!("Deleted escrow {} in transaction {}", app, txid);
            }
            Commands::Rename { app, name, role } => {
                let txid = session.change_name(role, app, &name).await?;
                println!("Renamed {} to {:?} in transaction {}", app, name, txid);
            }
            other => {
                return Err(crate::Error::invalid_argument(format!(
                    "{:?} is not a workflow step",
                    other
                )));
            }
        }
        Ok(())
    }
}

/// Read-only commands
pub mod inspect {
    use super::*;
    use crate::cli::OutputFormat;
    use crate::cli::output::{
        output_accounts_json, output_accounts_table, output_history_json, output_history_table,
        output_json, output_state_table,
    };
    use crate::client::Role;
    use crate::ledger::AppId;

    pub async fn state(session: &Session, app_id: AppId, output: OutputFormat) -> Result<()> {
        let state = session.get_app_global_state(app_id).await?;
        match output {
            OutputFormat::Json => output_json(&mut std::io::stdout(), &state),
            _ => output_state_table(&mut std::io::stdout(), app_id, &state),
        }
    }

    pub async fn accounts(
        session: &Session,
        role: Option<Role>,
        output: OutputFormat,
    ) -> Result<()> {
        let roles = match role {
            Some(role) => vec![role],
            None => Role::ALL.to_vec(),
        };
        let mut rows = Vec::new();
        for role in roles {
            let address = session.credentials().address(role);
            rows.push((role, address, session.get_balances(&address).await?));
        }
        match output {
            OutputFormat::Json => output_accounts_json(&mut std::io::stdout(), &rows),
            _ => output_accounts_table(&mut std::io::stdout(), &rows),
        }
    }

    pub async fn history(
        session: &Session,
        app_id: AppId,
        output: OutputFormat,
        export: bool,
    ) -> Result<()> {
        let graph = session.lifecycle_graph(app_id).await?;
        if export {
            let filename = graph.export_dot()?;
            tracing::info!("Wrote lifecycle graph to {}", filename);
        }
        match output {
            OutputFormat::Json => output_history_json(&mut std::io::stdout(), &graph),
            OutputFormat::Table => output_history_table(&mut std::io::stdout(), &graph),
            OutputFormat::Dot => {
                println!("{}", graph.to_dot());
                Ok(())
            }
        }
    }

    /// Print a fresh secret key and its address
    pub fn generate_key(role: Option<Role>) -> Result<()> {
        let account = Account::generate()?;
        if let Some(role) = role {
            println!("# {} ({})", role, role.env_var());
        }
        println!("address = \"{}\"", account.address());
        println!("secret  = \"{}\"", account.secret_hex());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{ContractKind, OutputFormat};
    use crate::client::Role;
    use crate::contract::EscrowState;
    use crate::ledger::{AppId, AssetId};
    use std::path::PathBuf;

    fn temp_ledger(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "nft-escrow-cli-{}-{}-{}.json",
            name,
            std::process::id(),
            rand::random::<u32>()
        ))
    }

    fn config_with(path: &PathBuf) -> Config {
        let mut config = Config::default();
        config.node.ledger_path = Some(path.clone());
        config
    }

    #[tokio::test]
    async fn test_workflow_steps_share_the_snapshot() {
        let path = temp_ledger("workflow");
        let config = config_with(&path);

        let step = |command: Commands| {
            let config = config.clone();
            async move { execute(command, config).await }
        };

        step(Commands::Create {
            kind: ContractKind::Escrow,
            initial_name: None,
            role: Role::Creator,
        })
        .await
        .unwrap();
        // fresh ledger: the escrow is the first id handed out, the NFT the next
        let app = AppId(1);
        step(Commands::Fund { app, role: Role::Creator }).await.unwrap();
        step(Commands::Mint { role: Role::Seller }).await.unwrap();
        step(Commands::Deposit {
            app,
            nft: AssetId(2),
            price: Some(10_000),
            role: Role::Seller,
        })
        .await
        .unwrap();
        step(Commands::Buy { app, role: Role::Buyer }).await.unwrap();
        step(Commands::History {
            app,
            output: OutputFormat::Json,
            export: false,
        })
        .await
        .unwrap();

        let session = persistent_session(config.clone()).await.unwrap();
        assert_eq!(session.escrow_state(app).await.unwrap(), EscrowState::Sold);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_demo_in_memory() {
        let config = Config::default();
        execute(
            Commands::Demo {
                price: Some(3_000),
                delete: true,
                output: OutputFormat::Json,
            },
            config,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_state_of_unknown_app_fails() {
        let path = temp_ledger("unknown");
        let err = execute(
            Commands::State {
                app: AppId(99),
                output: OutputFormat::Table,
            },
            config_with(&path),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, crate::Error::UnknownApplication(99)));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_generate_key() {
        inspect::generate_key(Some(Role::Buyer)).unwrap();
    }

    #[tokio::test]
    async fn test_workflow_rejects_read_commands() {
        let node = std::sync::Arc::new(crate::ledger::SimulatedNode::new(
            crate::ledger::LedgerState::genesis("sim", []),
            std::time::Duration::ZERO,
        ));
        let session = Session::new(node, crate::client::Credentials::demo().unwrap());
        let err = workflow::execute(
            &session,
            Commands::State {
                app: AppId(1),
                output: OutputFormat::Table,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, crate::Error::InvalidArgument(_)));
    }
}

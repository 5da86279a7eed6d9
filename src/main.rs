//! NFT Escrow

use clap::Parser;
use nft_escrow::{Config, Result, VERSION, cli, init_logging};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::load()?
    };
    if let Some(ledger) = &args.ledger {
        config.node.ledger_path = Some(ledger.clone());
    }

    init_logging(&config.logging.level);

    tracing::info!("NFT Escrow v{}", VERSION);
    tracing::debug!("Parsed arguments: {:?}", args);
    tracing::debug!("Loaded configuration: {:?}", config);

    if let Err(e) = cli::execute(args, config).await {
        if e.is_fatal_timeout() {
            eprintln!("{}; giving up", e);
            std::process::exit(2);
        }
        return Err(e);
    }

    Ok(())
}

//! NFT Escrow
//!
//! An escrow-style NFT sale running on an in-process simulated ledger.
//!
//! This library provides functionality for:
//! - Hosting applications, assets and atomic transaction groups on a simulated node
//! - The escrow approval program and its single-key name companion
//! - Orchestrating the sale: create, fund, mint, deposit, buy, delete
//! - Reconstructing an escrow's lifecycle graph from the node's history

pub mod cli;
pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod ledger;

pub use config::Config;
pub use error::{Error, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging with the given log level
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "nft-escrow");
    }
}

//! Ledger module - the host the escrow contract runs on
//!
//! This module provides a trait-based abstraction over a ledger node
//! (submission, rounds, account/application/asset queries) and an in-process
//! simulated implementation.

use crate::contract::{CompiledProgram, Program};
use crate::{Config, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod eval;
pub mod models;
pub mod sim;
pub mod store;
pub mod transaction;

// Re-export models
pub use models::{
    APP_MIN_BALANCE, ASSET_MIN_BALANCE, AccountData, AccountInfo, Address, AppId, AppSnapshot,
    ApplicationInfo, ApplicationRecord, ApplyData, AssetHolding, AssetId, AssetInfo, AssetParams,
    AssetRecord, BlockInfo, GlobalState, InnerTxnRecord, MAX_GROUP_SIZE, MAX_TXN_LIFE, MIN_BALANCE,
    MIN_FEE, NodeStatus, OnComplete, PendingTransaction, StateSchema, StateValue, SuggestedParams,
    TxId, blake2b_256,
};
pub use sim::{LedgerState, SimulatedNode};
pub use store::LedgerStore;
pub use transaction::{
    ApplicationCall, AssetTransfer, Payment, SignedTransaction, Transaction, TxnKind,
    assign_group_id, compute_group_id,
};

/// Ledger node interface used by the orchestration client
///
/// Mirrors the calls a client makes against a real node: submit signed
/// groups, follow rounds and read back accounts, applications and assets.
#[async_trait]
pub trait Node: Send + Sync {
    /// Current round
    async fn status(&self) -> Result<NodeStatus>;

    /// Wait until a round later than `round` has been produced
    async fn status_after_block(&self, round: u64) -> Result<NodeStatus>;

    async fn suggested_params(&self) -> Result<SuggestedParams>;

    /// Lower a program to bytecode
    async fn compile(&self, program: &Program) -> Result<CompiledProgram>;

    /// Submit a signed group. Returns the id of its first transaction.
    async fn send_transactions(&self, group: &[SignedTransaction]) -> Result<TxId>;

    async fn pending_transaction_info(&self, txid: &TxId) -> Result<PendingTransaction>;

    async fn account_info(&self, address: &Address) -> Result<AccountInfo>;

    async fn application_info(&self, app_id: AppId) -> Result<ApplicationInfo>;

    async fn asset_info(&self, asset_id: AssetId) -> Result<AssetInfo>;

    async fn block_info(&self, round: u64) -> Result<BlockInfo>;

    /// Confirmed application snapshots, oldest first
    async fn application_history(&self, app_id: AppId) -> Result<Vec<AppSnapshot>>;
}

/// Create the simulated node described by the configuration
///
/// With a ledger path the node resumes from (and keeps writing) a JSON
/// snapshot; without one it starts from genesis in memory.
pub async fn create_node(config: &Config) -> Result<Arc<SimulatedNode>> {
    let round_interval = Duration::from_millis(config.node.round_interval_ms);
    let allocations = config.genesis_allocations()?;
    let genesis_id = config.node.genesis_id.clone();
    let genesis = move || LedgerState::genesis(genesis_id, allocations);

    let node = match &config.node.ledger_path {
        Some(path) => SimulatedNode::open(LedgerStore::new(path), genesis, round_interval).await?,
        None => SimulatedNode::new(genesis(), round_interval),
    };
    Ok(Arc::new(node))
}

//! In-process simulated node
//!
//! A single async mutex guards the ledger, so groups are applied one at a time
//! in submission order. Blocks are produced on demand by
//! [`Node::status_after_block`], each draining the pending pool.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::eval::World;
use super::models::{
    AccountInfo, Address, AppId, AppSnapshot, ApplicationInfo, ApplyData, AssetId, AssetInfo,
    BlockInfo, MAX_GROUP_SIZE, MAX_TXN_LIFE, MIN_FEE, NodeStatus, OnComplete, PendingTransaction,
    SuggestedParams, TxId,
};
use super::store::LedgerStore;
use super::transaction::{SignedTransaction, Transaction, TxnKind, compute_group_id};
use super::Node;
use crate::contract::{CompiledProgram, Program};
use crate::{Error, Result};

/// A submitted group waiting for the next block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PooledGroup {
    pub txids: Vec<TxId>,
    pub txns: Vec<Transaction>,
}

/// Everything the simulated node knows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerState {
    pub genesis_id: String,
    pub round: u64,
    pub world: World,
    /// Block headers indexed by round; round 0 is genesis
    pub blocks: Vec<BlockInfo>,
    pub transactions: BTreeMap<TxId, PendingTransaction>,
    #[serde(default)]
    pub pool: Vec<PooledGroup>,
    #[serde(default)]
    pub app_history: BTreeMap<AppId, Vec<AppSnapshot>>,
}

impl LedgerState {
    pub fn genesis(
        genesis_id: impl Into<String>,
        allocations: impl IntoIterator<Item = (Address, u64)>,
    ) -> Self {
        Self {
            genesis_id: genesis_id.into(),
            round: 0,
            world: World::with_allocations(allocations),
            blocks: vec![BlockInfo {
                round: 0,
                timestamp: chrono::Utc::now(),
                txids: Vec::new(),
            }],
            transactions: BTreeMap::new(),
            pool: Vec::new(),
            app_history: BTreeMap::new(),
        }
    }

    fn check_validity(&self, txn: &Transaction, round: u64) -> Result<()> {
        if txn.genesis_id != self.genesis_id {
            return Err(Error::invalid_argument(format!(
                "genesis id {:?} does not match {:?}",
                txn.genesis_id, self.genesis_id
            )));
        }
        if txn.fee < MIN_FEE {
            return Err(Error::invalid_argument(format!(
                "fee {} below minimum {}",
                txn.fee, MIN_FEE
            )));
        }
        if txn.last_valid.saturating_sub(txn.first_valid) > MAX_TXN_LIFE {
            return Err(Error::invalid_argument(format!(
                "validity window longer than {} rounds",
                MAX_TXN_LIFE
            )));
        }
        if round < txn.first_valid || round > txn.last_valid {
            return Err(Error::invalid_argument(format!(
                "round {} outside validity window {}..={}",
                round, txn.first_valid, txn.last_valid
            )));
        }
        Ok(())
    }

    /// Produce the next block, applying pooled groups unless `hold` is set
    fn produce_block(&mut self, hold: bool) {
        self.round += 1;
        let round = self.round;
        let mut confirmed = Vec::new();

        if !hold {
            for pooled in std::mem::take(&mut self.pool) {
                let outcome = pooled
                    .txns
                    .iter()
                    .try_for_each(|txn| self.check_validity(txn, round))
                    .and_then(|_| self.world.apply_group(&pooled.txns));
                match outcome {
                    Ok(applied) => {
                        for (txid, apply) in pooled.txids.iter().zip(&applied) {
                            if let Some(pending) = self.transactions.get_mut(txid) {
                                pending.confirmed_round = Some(round);
                                pending.apply = apply.clone();
                            }
                        }
                        self.record_history(round, &pooled, &applied);
                        confirmed.extend(pooled.txids.iter().copied());
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Group {} failed in round {}: {}",
                            pooled.txids[0],
                            round,
                            e
                        );
                        for txid in &pooled.txids {
                            if let Some(pending) = self.transactions.get_mut(txid) {
                                pending.pool_error = e.to_string();
                            }
                        }
                    }
                }
            }
        }

        tracing::debug!("Produced block {} with {} transactions", round, confirmed.len());
        self.blocks.push(BlockInfo {
            round,
            timestamp: chrono::Utc::now(),
            txids: confirmed,
        });
    }

    fn app_for_address(&self, address: &Address) -> Option<AppId> {
        self.world
            .apps
            .keys()
            .copied()
            .find(|id| id.address() == *address)
    }

    /// Record the state of every application the group touched
    fn record_history(&mut self, round: u64, pooled: &PooledGroup, applied: &[ApplyData]) {
        let mut touched: Vec<(AppId, usize)> = Vec::new();
        for (index, (txn, apply)) in pooled.txns.iter().zip(applied).enumerate() {
            let app = match &txn.kind {
                TxnKind::ApplicationCall(call) => {
                    Some(apply.application_index.unwrap_or(call.app_id))
                }
                TxnKind::Payment(pay) => self.app_for_address(&pay.receiver),
                TxnKind::AssetTransfer(xfer) => self.app_for_address(&xfer.receiver),
                TxnKind::AssetConfig(_) => None,
            };
            let Some(app) = app else { continue };
            match touched.iter_mut().find(|(id, _)| *id == app) {
                Some(entry) if txn.as_app_call().is_some() => entry.1 = index,
                Some(_) => {}
                None => touched.push((app, index)),
            }
        }

        for (app_id, index) in touched {
            let txn = &pooled.txns[index];
            let address = app_id.address();
            let (global_state, deleted) = match self.world.apps.get(&app_id) {
                Some(app) => (app.global_state.clone(), false),
                None => (
                    applied[index].global_state.clone().unwrap_or_default(),
                    true,
                ),
            };
            let holdings = self
                .world
                .accounts
                .get(&address)
                .map(|account| {
                    account
                        .assets
                        .iter()
                        .map(|(id, holding)| (*id, holding.amount))
                        .collect()
                })
                .unwrap_or_default();
            let snapshot = AppSnapshot {
                round,
                txid: pooled.txids[index],
                action: action_label(txn),
                global_state,
                balance: self.world.balance(&address),
                holdings,
                deleted,
            };
            self.app_history.entry(app_id).or_default().push(snapshot);
        }
    }
}

/// Short description of what a transaction did to an application
fn action_label(txn: &Transaction) -> String {
    match &txn.kind {
        TxnKind::ApplicationCall(call) if call.app_id.is_create() => "create".to_string(),
        TxnKind::ApplicationCall(call) => match call.on_complete {
            OnComplete::NoOp => call
                .method()
                .map(|m| String::from_utf8_lossy(m).into_owned())
                .unwrap_or_else(|| "noop".to_string()),
            OnComplete::DeleteApplication => "delete".to_string(),
            other => format!("{:?}", other).to_lowercase(),
        },
        other => other.name().to_string(),
    }
}

/// Simulated node serving one in-memory ledger
pub struct SimulatedNode {
    state: Mutex<LedgerState>,
    round_interval: Duration,
    hold: AtomicBool,
    store: Option<LedgerStore>,
}

impl SimulatedNode {
    pub fn new(state: LedgerState, round_interval: Duration) -> Self {
        Self {
            state: Mutex::new(state),
            round_interval,
            hold: AtomicBool::new(false),
            store: None,
        }
    }

    /// Persist the ledger to `store` after every block
    pub fn with_store(mut self, store: LedgerStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Open the snapshot in `store`, or start from `genesis` if there is none
    pub async fn open(
        store: LedgerStore,
        genesis: impl FnOnce() -> LedgerState,
        round_interval: Duration,
    ) -> Result<Self> {
        let state = match store.load().await? {
            Some(state) => {
                tracing::info!("Resuming ledger at round {} from {:?}", state.round, store.path());
                state
            }
            None => {
                let state = genesis();
                store.save(&state).await?;
                state
            }
        };
        Ok(Self::new(state, round_interval).with_store(store))
    }

    /// Keep produced blocks from draining the pending pool
    pub fn hold_pending(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }
}

#[async_trait]
impl Node for SimulatedNode {
    async fn status(&self) -> Result<NodeStatus> {
        let state = self.state.lock().await;
        Ok(NodeStatus {
            last_round: state.round,
        })
    }

    async fn status_after_block(&self, round: u64) -> Result<NodeStatus> {
        loop {
            {
                let state = self.state.lock().await;
                if state.round > round {
                    return Ok(NodeStatus {
                        last_round: state.round,
                    });
                }
            }
            if !self.round_interval.is_zero() {
                tokio::time::sleep(self.round_interval).await;
            }
            let mut state = self.state.lock().await;
            state.produce_block(self.hold.load(Ordering::SeqCst));
            if let Some(store) = &self.store {
                store.save(&state).await?;
            }
        }
    }

    async fn suggested_params(&self) -> Result<SuggestedParams> {
        let state = self.state.lock().await;
        Ok(SuggestedParams {
            fee: MIN_FEE,
            first_valid: state.round,
            last_valid: state.round + MAX_TXN_LIFE,
            genesis_id: state.genesis_id.clone(),
        })
    }

    async fn compile(&self, program: &Program) -> Result<CompiledProgram> {
        let compiled = program.compile()?;
        tracing::debug!("Compiled {} program ({} bytes)", program.name(), compiled.bytes.len());
        Ok(compiled)
    }

    async fn send_transactions(&self, group: &[SignedTransaction]) -> Result<TxId> {
        if group.is_empty() || group.len() > MAX_GROUP_SIZE {
            return Err(Error::invalid_argument(format!(
                "group size must be 1..={}, got {}",
                MAX_GROUP_SIZE,
                group.len()
            )));
        }
        for stxn in group {
            stxn.verify()?;
        }
        let txns: Vec<Transaction> = group.iter().map(|s| s.txn.clone()).collect();
        let txids = txns.iter().map(Transaction::id).collect::<Result<Vec<_>>>()?;

        if txns.len() > 1 || txns[0].group.is_some() {
            let gid = compute_group_id(&txns)?;
            if txns.iter().any(|t| t.group != Some(gid)) {
                return Err(Error::invalid_argument("group id does not match its transactions"));
            }
        }

        let mut state = self.state.lock().await;
        let next_round = state.round + 1;
        for txn in &txns {
            state.check_validity(txn, next_round)?;
        }
        if let Some(seen) = txids.iter().find(|id| state.transactions.contains_key(*id)) {
            return Err(Error::invalid_argument(format!(
                "transaction {} already submitted",
                seen
            )));
        }

        let mut dry_run = state.world.clone();
        for pooled in &state.pool {
            let _ = dry_run.apply_group(&pooled.txns);
        }
        dry_run.apply_group(&txns).inspect_err(|e| {
            tracing::warn!("Rejected group {}: {}", txids[0], e);
        })?;

        for (txid, txn) in txids.iter().zip(&txns) {
            state.transactions.insert(
                *txid,
                PendingTransaction {
                    txid: *txid,
                    txn: txn.clone(),
                    pool_error: String::new(),
                    confirmed_round: None,
                    apply: ApplyData::default(),
                },
            );
        }
        state.pool.push(PooledGroup {
            txids: txids.clone(),
            txns,
        });
        tracing::debug!("Accepted group of {} led by {}", txids.len(), txids[0]);
        Ok(txids[0])
    }

    async fn pending_transaction_info(&self, txid: &TxId) -> Result<PendingTransaction> {
        let state = self.state.lock().await;
        state
            .transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| Error::UnknownTransaction(txid.to_string()))
    }

    async fn account_info(&self, address: &Address) -> Result<AccountInfo> {
        let state = self.state.lock().await;
        let account = state.world.accounts.get(address).cloned().unwrap_or_default();
        Ok(AccountInfo {
            address: *address,
            amount: account.amount,
            min_balance: state.world.min_balance(address),
            assets: account.assets,
            created_apps: account.created_apps,
            created_assets: account.created_assets,
        })
    }

    async fn application_info(&self, app_id: AppId) -> Result<ApplicationInfo> {
        let state = self.state.lock().await;
        let app = state
            .world
            .apps
            .get(&app_id)
            .ok_or(Error::UnknownApplication(app_id.0))?;
        Ok(ApplicationInfo {
            id: app_id,
            address: app_id.address(),
            params: app.clone(),
        })
    }

    async fn asset_info(&self, asset_id: AssetId) -> Result<AssetInfo> {
        let state = self.state.lock().await;
        let asset = state
            .world
            .assets
            .get(&asset_id)
            .ok_or(Error::UnknownAsset(asset_id.0))?;
        Ok(AssetInfo {
            id: asset_id,
            creator: asset.creator,
            params: asset.params.clone(),
        })
    }

    async fn block_info(&self, round: u64) -> Result<BlockInfo> {
        let state = self.state.lock().await;
        usize::try_from(round)
            .ok()
            .and_then(|r| state.blocks.get(r))
            .cloned()
            .ok_or_else(|| Error::invalid_argument(format!("round {} not produced yet", round)))
    }

    async fn application_history(&self, app_id: AppId) -> Result<Vec<AppSnapshot>> {
        let state = self.state.lock().await;
        state
            .app_history
            .get(&app_id)
            .cloned()
            .ok_or(Error::UnknownApplication(app_id.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::wait_for_confirmation;
    use crate::ledger::transaction::assign_group_id;
    use secp256k1::{Keypair, Message, Secp256k1, SecretKey};

    fn keypair(seed: u8) -> (Keypair, Address) {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[seed; 32]).unwrap();
        let keypair = Keypair::from_secret_key(&secp, &secret);
        let (xonly, _) = keypair.x_only_public_key();
        (keypair, Address(xonly.serialize()))
    }

    fn sign(keypair: &Keypair, txn: Transaction) -> SignedTransaction {
        let secp = Secp256k1::new();
        let message = Message::from_digest(txn.id().unwrap().0);
        let signature = secp.sign_schnorr_no_aux_rand(&message, keypair);
        SignedTransaction {
            txn,
            signature: signature.serialize().to_vec(),
        }
    }

    fn node(funded: &[Address]) -> SimulatedNode {
        let state = LedgerState::genesis("sim-test", funded.iter().map(|a| (*a, 10_000_000)));
        SimulatedNode::new(state, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_payment_confirms_in_next_block() {
        let (alice_key, alice) = keypair(1);
        let (_, bob) = keypair(2);
        let node = node(&[alice, bob]);
        let params = node.suggested_params().await.unwrap();

        let payment = Transaction::payment(alice, &params, bob, 250_000);
        let txid = node.send_transactions(&[sign(&alice_key, payment)]).await.unwrap();
        let pending = node.pending_transaction_info(&txid).await.unwrap();
        assert!(!pending.is_confirmed());

        let status = node.status_after_block(0).await.unwrap();
        assert_eq!(status.last_round, 1);
        let confirmed = node.pending_transaction_info(&txid).await.unwrap();
        assert_eq!(confirmed.confirmed_round, Some(1));
        assert_eq!(node.account_info(&bob).await.unwrap().amount, 10_250_000);
        assert_eq!(node.block_info(1).await.unwrap().txids, vec![txid]);
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let (_, alice) = keypair(1);
        let (mallory_key, _) = keypair(3);
        let node = node(&[alice]);
        let params = node.suggested_params().await.unwrap();
        let forged = sign(&mallory_key, Transaction::payment(alice, &params, Address([9; 32]), 1));
        let err = node.send_transactions(&[forged]).await.unwrap_err();
        assert!(matches!(err, Error::Signature(_)));
    }

    #[tokio::test]
    async fn test_rejected_group_never_enters_pool() {
        let (alice_key, alice) = keypair(1);
        let (bob_key, bob) = keypair(2);
        let node = node(&[alice, bob]);
        let params = node.suggested_params().await.unwrap();

        let mut txns = vec![
            Transaction::payment(alice, &params, bob, 1_000),
            Transaction::payment(bob, &params, alice, 999_000_000),
        ];
        assign_group_id(&mut txns).unwrap();
        let group = vec![sign(&alice_key, txns[0].clone()), sign(&bob_key, txns[1].clone())];
        assert!(node.send_transactions(&group).await.unwrap_err().is_rejection());
        assert!(node.state.lock().await.pool.is_empty());
    }

    #[tokio::test]
    async fn test_ungrouped_pair_rejected() {
        let (alice_key, alice) = keypair(1);
        let node = node(&[alice]);
        let params = node.suggested_params().await.unwrap();
        let group = vec![
            sign(&alice_key, Transaction::payment(alice, &params, alice, 0)),
            sign(&alice_key, Transaction::payment(alice, &params, alice, 0)),
        ];
        assert!(matches!(
            node.send_transactions(&group).await.unwrap_err(),
            Error::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn test_hold_pending_delays_confirmation() {
        let (alice_key, alice) = keypair(1);
        let node = node(&[alice]);
        let params = node.suggested_params().await.unwrap();
        node.hold_pending(true);
        let txid = node
            .send_transactions(&[sign(&alice_key, Transaction::payment(alice, &params, alice, 0))])
            .await
            .unwrap();
        node.status_after_block(2).await.unwrap();
        assert!(!node.pending_transaction_info(&txid).await.unwrap().is_confirmed());

        node.hold_pending(false);
        node.status_after_block(3).await.unwrap();
        assert_eq!(
            node.pending_transaction_info(&txid).await.unwrap().confirmed_round,
            Some(4)
        );
    }

    #[tokio::test]
    async fn test_wrong_genesis_rejected() {
        let (alice_key, alice) = keypair(1);
        let node = node(&[alice]);
        let mut params = node.suggested_params().await.unwrap();
        params.genesis_id = "other".to_string();
        let stxn = sign(&alice_key, Transaction::payment(alice, &params, alice, 0));
        assert!(node.send_transactions(&[stxn]).await.is_err());
    }

    #[tokio::test]
    async fn test_group_expiring_in_pool_surfaces_pool_error() {
        let (alice_key, alice) = keypair(1);
        let (_, bob) = keypair(2);
        let node = node(&[alice, bob]);
        let mut params = node.suggested_params().await.unwrap();
        params.last_valid = params.first_valid + 2;

        node.hold_pending(true);
        let payment = Transaction::payment(alice, &params, bob, 250_000);
        let txid = node.send_transactions(&[sign(&alice_key, payment)]).await.unwrap();
        node.status_after_block(2).await.unwrap();
        let before = node.state.lock().await.world.clone();
        node.hold_pending(false);

        let err = wait_for_confirmation(&node, &txid, 5).await.unwrap_err();
        assert!(matches!(err, Error::Pool { .. }));
        assert!(err.is_rejection());

        let state = node.state.lock().await;
        assert_eq!(state.world, before);
        assert!(state.pool.is_empty());
        assert!(state.transactions[&txid].pool_error.contains("outside validity window"));
        assert_eq!(state.world.balance(&bob), 10_000_000);
    }

    #[tokio::test]
    async fn test_duplicate_submission_rejected() {
        let (alice_key, alice) = keypair(1);
        let (_, bob) = keypair(2);
        let node = node(&[alice, bob]);
        let params = node.suggested_params().await.unwrap();
        let stxn = sign(&alice_key, Transaction::payment(alice, &params, bob, 1_000));

        node.send_transactions(&[stxn.clone()]).await.unwrap();
        let err = node.send_transactions(&[stxn.clone()]).await.unwrap_err();
        assert!(err.to_string().contains("already submitted"));
        assert_eq!(node.state.lock().await.pool.len(), 1);

        node.status_after_block(0).await.unwrap();
        let err = node.send_transactions(&[stxn]).await.unwrap_err();
        assert!(err.to_string().contains("already submitted"));
        assert_eq!(node.account_info(&bob).await.unwrap().amount, 10_001_000);
    }

    #[tokio::test]
    async fn test_validity_window_enforced_on_submit() {
        let (alice_key, alice) = keypair(1);
        let node = node(&[alice]);

        let mut params = node.suggested_params().await.unwrap();
        params.last_valid = params.first_valid + MAX_TXN_LIFE + 1;
        let too_long = sign(&alice_key, Transaction::payment(alice, &params, alice, 0));
        let err = node.send_transactions(&[too_long]).await.unwrap_err();
        assert!(err.to_string().contains("validity window longer"));

        node.status_after_block(2).await.unwrap();
        let mut params = node.suggested_params().await.unwrap();
        params.first_valid = 0;
        params.last_valid = 2;
        let expired = sign(&alice_key, Transaction::payment(alice, &params, alice, 0));
        let err = node.send_transactions(&[expired]).await.unwrap_err();
        assert!(err.to_string().contains("outside validity window"));
        assert!(node.state.lock().await.pool.is_empty());
    }
}

//! Group evaluation
//!
//! [`World`] holds balances, assets and applications. [`World::apply_group`]
//! runs every transaction of a group against a scratch copy and only replaces
//! the live world once the whole group, including minimum-balance checks, has
//! succeeded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::models::{
    APP_MIN_BALANCE, ASSET_MIN_BALANCE, AccountData, Address, AppId, ApplicationRecord, ApplyData,
    AssetHolding, AssetId, AssetParams, AssetRecord, GlobalState, InnerTxnRecord, MIN_BALANCE,
    MIN_FEE, OnComplete, StateSchema, StateValue,
};
use super::transaction::{ApplicationCall, AssetTransfer, Payment, Transaction, TxnKind};
use crate::contract::{AppEnv, Program};
use crate::ensure;
use crate::{Error, Result};

/// Largest global key, in bytes
pub const MAX_KEY_LEN: usize = 64;

/// Largest key plus value, in bytes
pub const MAX_KEY_VALUE_LEN: usize = 128;

/// Most state slots an application may declare
pub const MAX_GLOBAL_SLOTS: u64 = 64;

/// Most inner transactions one call may issue
pub const MAX_INNER_TXNS: usize = 16;

const MAX_UNIT_NAME_LEN: usize = 8;
const MAX_ASSET_NAME_LEN: usize = 32;

/// Ledger balances, assets and applications
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct World {
    pub accounts: BTreeMap<Address, AccountData>,
    pub assets: BTreeMap<AssetId, AssetRecord>,
    pub apps: BTreeMap<AppId, ApplicationRecord>,
    /// Last id handed out; assets and applications share the counter
    pub last_index: u64,
}

impl World {
    pub fn with_allocations(allocations: impl IntoIterator<Item = (Address, u64)>) -> Self {
        let mut world = Self::default();
        for (address, amount) in allocations {
            world.accounts.entry(address).or_default().amount += amount;
        }
        world
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.accounts.get(address).map(|a| a.amount).unwrap_or(0)
    }

    pub fn holding(&self, address: &Address, asset: AssetId) -> Option<AssetHolding> {
        self.accounts
            .get(address)
            .and_then(|a| a.assets.get(&asset))
            .copied()
    }

    /// Balance an account must keep to stay open
    pub fn min_balance(&self, address: &Address) -> u64 {
        let Some(account) = self.accounts.get(address) else {
            return 0;
        };
        let apps: u64 = account
            .created_apps
            .iter()
            .filter_map(|id| self.apps.get(id))
            .map(|app| {
                APP_MIN_BALANCE + app.global_schema.min_balance() + app.local_schema.min_balance()
            })
            .sum();
        MIN_BALANCE + account.assets.len() as u64 * ASSET_MIN_BALANCE + apps
    }

    /// Apply a group atomically. On error the world is unchanged.
    pub fn apply_group(&mut self, group: &[Transaction]) -> Result<Vec<ApplyData>> {
        let mut scratch = self.clone();
        let mut applied = Vec::with_capacity(group.len());
        for index in 0..group.len() {
            let apply = scratch.apply_txn(group, index).inspect_err(|e| {
                tracing::debug!("Transaction {} of group failed: {}", index, e);
            })?;
            applied.push(apply);
        }
        scratch.settle()?;
        *self = scratch;
        Ok(applied)
    }

    fn apply_txn(&mut self, group: &[Transaction], index: usize) -> Result<ApplyData> {
        let txn = &group[index];
        self.debit(&txn.sender, txn.fee)?;

        match &txn.kind {
            TxnKind::Payment(pay) => Ok(ApplyData {
                closing_amount: self.pay(txn.sender, pay)?,
                ..Default::default()
            }),
            TxnKind::AssetConfig(params) => Ok(ApplyData {
                asset_index: Some(self.create_asset(txn.sender, params)?),
                ..Default::default()
            }),
            TxnKind::AssetTransfer(xfer) => Ok(ApplyData {
                closing_amount: self.transfer_asset(txn.sender, xfer)?,
                ..Default::default()
            }),
            TxnKind::ApplicationCall(call) => {
                let invocation = Invocation {
                    call,
                    sender: txn.sender,
                    group,
                    index,
                };
                if call.app_id.is_create() {
                    self.create_app(invocation)
                } else {
                    self.call_app(invocation)
                }
            }
        }
    }

    /// Enforce minimum balances and drop emptied accounts
    fn settle(&mut self) -> Result<()> {
        self.accounts.retain(|_, account| {
            account.amount > 0
                || !account.assets.is_empty()
                || !account.created_apps.is_empty()
                || !account.created_assets.is_empty()
        });
        for (address, account) in &self.accounts {
            let required = self.min_balance(address);
            if account.amount < required {
                return Err(Error::transfer(format!(
                    "account {} balance {} below min {}",
                    address.short(),
                    account.amount,
                    required
                )));
            }
        }
        Ok(())
    }

    fn next_index(&mut self) -> u64 {
        self.last_index += 1;
        self.last_index
    }

    fn debit(&mut self, address: &Address, amount: u64) -> Result<()> {
        let account = self
            .accounts
            .get_mut(address)
            .ok_or_else(|| Error::transfer(format!("account {} has no funds", address.short())))?;
        let available = account.amount;
        account.amount = available.checked_sub(amount).ok_or_else(|| {
            Error::transfer(format!(
                "account {} has {} microunits, needs {}",
                address.short(),
                available,
                amount
            ))
        })?;
        Ok(())
    }

    fn credit(&mut self, address: Address, amount: u64) -> Result<()> {
        let account = self.accounts.entry(address).or_default();
        account.amount = account
            .amount
            .checked_add(amount)
            .ok_or_else(|| Error::transfer("balance overflow"))?;
        Ok(())
    }

    /// Returns the closed-out remainder, if any
    fn pay(&mut self, sender: Address, pay: &Payment) -> Result<Option<u64>> {
        self.debit(&sender, pay.amount)?;
        self.credit(pay.receiver, pay.amount)?;

        let Some(close_to) = pay.close_remainder_to else {
            return Ok(None);
        };
        if close_to == sender {
            return Err(Error::transfer("cannot close an account to itself"));
        }
        let account = self.accounts.remove(&sender).unwrap_or_default();
        if !account.assets.is_empty()
            || !account.created_apps.is_empty()
            || !account.created_assets.is_empty()
        {
            return Err(Error::transfer(format!(
                "account {} still holds assets or applications",
                sender.short()
            )));
        }
        self.credit(close_to, account.amount)?;
        Ok(Some(account.amount))
    }

    fn create_asset(&mut self, creator: Address, params: &AssetParams) -> Result<AssetId> {
        ensure!(
            params.unit_name.len() <= MAX_UNIT_NAME_LEN,
            "unit name {:?} longer than {} bytes",
            params.unit_name,
            MAX_UNIT_NAME_LEN
        );
        ensure!(
            params.asset_name.len() <= MAX_ASSET_NAME_LEN,
            "asset name {:?} longer than {} bytes",
            params.asset_name,
            MAX_ASSET_NAME_LEN
        );
        let id = AssetId(self.next_index());
        self.assets.insert(
            id,
            AssetRecord {
                creator,
                params: params.clone(),
            },
        );
        let account = self.accounts.entry(creator).or_default();
        account.created_assets.push(id);
        account.assets.insert(
            id,
            AssetHolding {
                amount: params.total,
                frozen: false,
            },
        );
        Ok(id)
    }

    fn holding_mut(&mut self, address: &Address, asset: AssetId) -> Result<&mut AssetHolding> {
        self.accounts
            .get_mut(address)
            .and_then(|a| a.assets.get_mut(&asset))
            .ok_or_else(|| {
                Error::transfer(format!(
                    "account {} is not opted in to asset {}",
                    address.short(),
                    asset
                ))
            })
    }

    /// Returns the closed-out holding, if any
    fn transfer_asset(&mut self, sender: Address, xfer: &AssetTransfer) -> Result<Option<u64>> {
        let record = self
            .assets
            .get(&xfer.asset)
            .ok_or_else(|| Error::transfer(format!("asset {} does not exist", xfer.asset)))?;
        let creator = record.creator;
        let frozen = record.params.default_frozen;

        if xfer.receiver == sender && xfer.amount == 0 && xfer.close_to.is_none() {
            let account = self.accounts.get_mut(&sender).ok_or_else(|| {
                Error::transfer(format!("account {} has no funds", sender.short()))
            })?;
            account.assets.entry(xfer.asset).or_insert(AssetHolding { amount: 0, frozen });
            return Ok(None);
        }

        let held = self.holding_mut(&sender, xfer.asset)?;
        if held.frozen {
            return Err(Error::transfer(format!("asset {} is frozen for sender", xfer.asset)));
        }
        held.amount = held.amount.checked_sub(xfer.amount).ok_or_else(|| {
            Error::transfer(format!(
                "insufficient holding of asset {} to send {}",
                xfer.asset, xfer.amount
            ))
        })?;
        let received = self.holding_mut(&xfer.receiver, xfer.asset)?;
        received.amount += xfer.amount;

        let Some(close_to) = xfer.close_to else {
            return Ok(None);
        };
        if sender == creator {
            return Err(Error::transfer("the asset creator cannot close out"));
        }
        self.holding_mut(&close_to, xfer.asset)?;
        let rest = self
            .accounts
            .get_mut(&sender)
            .and_then(|a| a.assets.remove(&xfer.asset))
            .map(|h| h.amount)
            .unwrap_or(0);
        self.holding_mut(&close_to, xfer.asset)?.amount += rest;
        Ok(Some(rest))
    }

    fn create_app(&mut self, invocation: Invocation<'_>) -> Result<ApplyData> {
        let call = invocation.call;
        let approval = Program::from_bytecode(&call.approval_program)?;
        Program::from_bytecode(&call.clear_program)?;
        let declared = call.global_schema.num_uints + call.global_schema.num_byte_slices;
        ensure!(
            declared <= MAX_GLOBAL_SLOTS,
            "global schema declares {} slots, at most {} allowed",
            declared,
            MAX_GLOBAL_SLOTS
        );

        let app_id = AppId(self.next_index());
        let creator = invocation.sender;
        let (global_state, inner_txns) = self.run(
            approval,
            &invocation,
            app_id,
            creator,
            GlobalState::new(),
            call.global_schema,
        )?;

        self.apps.insert(
            app_id,
            ApplicationRecord {
                creator,
                approval_program: call.approval_program.clone(),
                clear_program: call.clear_program.clone(),
                global_schema: call.global_schema,
                local_schema: call.local_schema,
                global_state: global_state.clone(),
            },
        );
        self.accounts
            .entry(creator)
            .or_default()
            .created_apps
            .push(app_id);
        tracing::debug!("Created application {} for {}", app_id, creator.short());

        Ok(ApplyData {
            application_index: Some(app_id),
            inner_txns,
            global_state: Some(global_state),
            ..Default::default()
        })
    }

    fn call_app(&mut self, invocation: Invocation<'_>) -> Result<ApplyData> {
        let call = invocation.call;
        let app = self
            .apps
            .get(&call.app_id)
            .ok_or_else(|| Error::rejected(format!("application {} does not exist", call.app_id)))?
            .clone();

        if call.on_complete == OnComplete::ClearState {
            let clear = Program::from_bytecode(&app.clear_program)?;
            let mut scratch = self.clone();
            return match scratch.run(
                clear,
                &invocation,
                call.app_id,
                app.creator,
                app.global_state.clone(),
                app.global_schema,
            ) {
                Ok((global_state, inner_txns)) => {
                    *self = scratch;
                    self.store_globals(call.app_id, &global_state);
                    Ok(ApplyData {
                        inner_txns,
                        global_state: Some(global_state),
                        ..Default::default()
                    })
                }
                Err(e) => {
                    tracing::debug!("Clear program of {} failed, ignored: {}", call.app_id, e);
                    Ok(ApplyData::default())
                }
            };
        }

        let approval = Program::from_bytecode(&app.approval_program)?;
        let (global_state, inner_txns) = self.run(
            approval,
            &invocation,
            call.app_id,
            app.creator,
            app.global_state.clone(),
            app.global_schema,
        )?;

        if call.on_complete == OnComplete::DeleteApplication {
            self.apps.remove(&call.app_id);
            if let Some(account) = self.accounts.get_mut(&app.creator) {
                account.created_apps.retain(|id| *id != call.app_id);
            }
            tracing::debug!("Deleted application {}", call.app_id);
        } else {
            self.store_globals(call.app_id, &global_state);
        }

        Ok(ApplyData {
            inner_txns,
            global_state: Some(global_state),
            ..Default::default()
        })
    }

    fn store_globals(&mut self, app_id: AppId, global_state: &GlobalState) {
        if let Some(app) = self.apps.get_mut(&app_id) {
            app.global_state = global_state.clone();
        }
    }

    fn run(
        &mut self,
        program: Program,
        invocation: &Invocation<'_>,
        app_id: AppId,
        creator: Address,
        globals: GlobalState,
        schema: StateSchema,
    ) -> Result<(GlobalState, Vec<InnerTxnRecord>)> {
        let mut env = CallEnv {
            world: self,
            invocation,
            app_id,
            creator,
            globals,
            schema,
            inner: Vec::new(),
        };
        program.evaluate(&mut env)?;
        Ok((env.globals, env.inner))
    }
}

/// The application call being evaluated and its place in the group
struct Invocation<'a> {
    call: &'a ApplicationCall,
    sender: Address,
    group: &'a [Transaction],
    index: usize,
}

struct CallEnv<'a> {
    world: &'a mut World,
    invocation: &'a Invocation<'a>,
    app_id: AppId,
    creator: Address,
    globals: GlobalState,
    schema: StateSchema,
    inner: Vec<InnerTxnRecord>,
}

impl CallEnv<'_> {
    fn require_account(&self, account: &Address) -> Result<()> {
        let call = self.invocation.call;
        ensure!(
            *account == self.invocation.sender
                || *account == self.app_address()
                || call.accounts.contains(account),
            "account {} is not available to application {}",
            account.short(),
            self.app_id
        );
        Ok(())
    }

    fn require_asset(&self, asset: AssetId) -> Result<()> {
        ensure!(
            self.invocation.call.foreign_assets.contains(&asset),
            "asset {} is not available to application {}",
            asset,
            self.app_id
        );
        Ok(())
    }
}

impl AppEnv for CallEnv<'_> {
    fn call(&self) -> &ApplicationCall {
        self.invocation.call
    }

    fn sender(&self) -> Address {
        self.invocation.sender
    }

    fn app_id(&self) -> AppId {
        self.app_id
    }

    fn creator(&self) -> Address {
        self.creator
    }

    fn group(&self) -> &[Transaction] {
        self.invocation.group
    }

    fn group_index(&self) -> usize {
        self.invocation.index
    }

    fn global_state(&self) -> &GlobalState {
        &self.globals
    }

    fn global_put(&mut self, key: &[u8], value: StateValue) -> Result<()> {
        ensure!(
            std::str::from_utf8(key).is_ok(),
            "global state key {} is not UTF-8",
            hex::encode(key)
        );
        ensure!(
            key.len() <= MAX_KEY_LEN,
            "key of {} bytes exceeds {}",
            key.len(),
            MAX_KEY_LEN
        );
        if let StateValue::Bytes(bytes) = &value {
            ensure!(
                key.len() + bytes.len() <= MAX_KEY_VALUE_LEN,
                "key and value of {} bytes exceed {}",
                key.len() + bytes.len(),
                MAX_KEY_VALUE_LEN
            );
        }
        self.globals.insert(key, value);
        let (uints, byte_slices) = self.globals.slot_usage();
        ensure!(
            uints <= self.schema.num_uints && byte_slices <= self.schema.num_byte_slices,
            "global state uses {} uints and {} byte slices, schema allows {} and {}",
            uints,
            byte_slices,
            self.schema.num_uints,
            self.schema.num_byte_slices
        );
        Ok(())
    }

    fn global_del(&mut self, key: &[u8]) {
        self.globals.remove(key);
    }

    fn balance(&self, account: &Address) -> Result<u64> {
        self.require_account(account)?;
        Ok(self.world.balance(account))
    }

    fn asset_holding(&self, account: &Address, asset: AssetId) -> Result<Option<u64>> {
        self.require_account(account)?;
        self.require_asset(asset)?;
        Ok(self.world.holding(account, asset).map(|h| h.amount))
    }

    fn submit_inner(&mut self, kind: TxnKind) -> Result<()> {
        ensure!(
            self.inner.len() < MAX_INNER_TXNS,
            "too many inner transactions"
        );
        let app = self.app_address();
        match &kind {
            TxnKind::Payment(pay) => {
                self.require_account(&pay.receiver)?;
                if let Some(to) = &pay.close_remainder_to {
                    self.require_account(to)?;
                }
                self.world.debit(&app, MIN_FEE)?;
                self.world.pay(app, pay)?;
            }
            TxnKind::AssetTransfer(xfer) => {
                self.require_asset(xfer.asset)?;
                self.require_account(&xfer.receiver)?;
                if let Some(to) = &xfer.close_to {
                    self.require_account(to)?;
                }
                self.world.debit(&app, MIN_FEE)?;
                self.world.transfer_asset(app, xfer)?;
            }
            other => {
                return Err(Error::rejected(format!(
                    "inner {} transactions are not supported",
                    other.name()
                )));
            }
        }
        tracing::debug!("Application {} issued inner {}", self.app_id, kind.name());
        self.inner.push(InnerTxnRecord { sender: app, kind });
        Ok(())
    }
}

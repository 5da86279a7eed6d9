//! Escrow workflow operations

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::{Role, Session};
use crate::contract::escrow::{self, BUY_METHOD, DEPOSIT_METHOD};
use crate::contract::name::{self, CHANGE_METHOD};
use crate::contract::{EscrowRecord, EscrowState, LifecycleGraph, Program, itob};
use crate::ledger::{
    ASSET_MIN_BALANCE, Address, AppId, AssetId, AssetParams, GlobalState, MIN_BALANCE, MIN_FEE,
    Node, OnComplete, StateSchema, Transaction, TxId,
};
use crate::{Error, Result};

/// Funding an escrow needs before `setup`: its own minimum balance, the NFT
/// holding and the fees of three inner transactions
pub const ESCROW_FUNDING: u64 = MIN_BALANCE + ASSET_MIN_BALANCE + 3 * MIN_FEE;

/// Balances keyed by asset id; key 0 is the native currency
pub type Balances = BTreeMap<u64, u64>;

#[derive(Debug, Clone, Default)]
pub struct DemoOptions {
    /// Override the configured sale price
    pub price: Option<u64>,
    /// Delete the escrow once the sale completes
    pub delete: bool,
}

/// Outcome of [`Session::run_demo`]
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub app_id: AppId,
    pub escrow_address: Address,
    pub nft_id: AssetId,
    pub price: u64,
    pub record: EscrowRecord,
    pub state: EscrowState,
    pub balances: BTreeMap<String, Balances>,
    pub last_block: DateTime<Utc>,
}

impl Session {
    /// Create the escrow application. Returns its id.
    pub async fn create_escrow_contract(&self, creator: Role) -> Result<AppId> {
        let (approval, clear) = self.compile_programs().await?;
        let params = self.params().await?;
        let txn = Transaction::app_create(
            self.credentials().address(creator),
            &params,
            approval.bytes,
            clear.bytes,
            escrow::global_schema(),
            StateSchema::default(),
        );
        let confirmed = self.submit(creator, txn).await?;
        let app_id = confirmed
            .application_index()
            .filter(|id| id.0 > 0)
            .ok_or_else(|| Error::custom("application creation returned no id"))?;
        tracing::info!("Created escrow application {} ({})", app_id, app_id.address());
        Ok(app_id)
    }

    /// Create the single-key name application, optionally with an initial name
    pub async fn create_name_contract(
        &self,
        creator: Role,
        initial_name: Option<&str>,
    ) -> Result<AppId> {
        let approval = self.programs().get_or_compile(self.node(), Program::Name).await?;
        let clear = self
            .programs()
            .get_or_compile(self.node(), Program::ClearState)
            .await?;
        let params = self.params().await?;
        let args = initial_name
            .map(|n| vec![n.as_bytes().to_vec()])
            .unwrap_or_default();
        let txn = Transaction::app_create(
            self.credentials().address(creator),
            &params,
            approval.bytes,
            clear.bytes,
            name::global_schema(),
            StateSchema::default(),
        )
        .with_args(args);
        let confirmed = self.submit(creator, txn).await?;
        let app_id = confirmed
            .application_index()
            .filter(|id| id.0 > 0)
            .ok_or_else(|| Error::custom("application creation returned no id"))?;
        tracing::info!("Created name application {}", app_id);
        Ok(app_id)
    }

    /// Pay [`ESCROW_FUNDING`] into the escrow account
    pub async fn fund_escrow_contract(&self, funder: Role, app_id: AppId) -> Result<TxId> {
        let params = self.params().await?;
        let txn = Transaction::payment(
            self.credentials().address(funder),
            &params,
            app_id.address(),
            ESCROW_FUNDING,
        );
        let confirmed = self.submit(funder, txn).await?;
        tracing::info!("Funded escrow {} with {} microunits", app_id, ESCROW_FUNDING);
        Ok(confirmed.txid)
    }

    /// Mint a single-unit NFT owned by `seller`
    pub async fn create_nft(&self, seller: Role) -> Result<AssetId> {
        let owner = self.credentials().address(seller);
        let params = self.params().await?;
        let asset = AssetParams {
            total: 1,
            decimals: 0,
            default_frozen: false,
            unit_name: self.sale().unit_name.clone(),
            asset_name: self.sale().asset_name.clone(),
            manager: Some(owner),
            reserve: Some(owner),
            freeze: Some(owner),
            clawback: Some(owner),
        };
        let confirmed = self
            .submit(seller, Transaction::asset_create(owner, &params, asset))
            .await?;
        let nft_id = confirmed
            .asset_index()
            .ok_or_else(|| Error::custom("asset creation returned no id"))?;
        tracing::info!("Created NFT {} for {}", nft_id, owner.short());
        Ok(nft_id)
    }

    /// Record the sale and move the NFT into the escrow in one group
    pub async fn deposit_nft(
        &self,
        seller: Role,
        app_id: AppId,
        nft_id: AssetId,
        price: u64,
    ) -> Result<TxId> {
        let owner = self.credentials().address(seller);
        let params = self.params().await?;
        let call = Transaction::app_call(
            owner,
            &params,
            app_id,
            OnComplete::NoOp,
            vec![
                DEPOSIT_METHOD.to_vec(),
                owner.as_bytes().to_vec(),
                itob(nft_id.0),
                itob(price),
            ],
        )
        .with_foreign_assets(vec![nft_id]);
        let transfer = Transaction::asset_transfer(owner, &params, nft_id, app_id.address(), 1);

        let confirmed = self
            .submit_group(vec![(seller, call), (seller, transfer)])
            .await?;
        tracing::info!("Deposited NFT {} into escrow {} at price {}", nft_id, app_id, price);
        Ok(confirmed.txid)
    }

    /// Buy the listed NFT: opt the buyer in, then pay the escrow and call `buy` atomically
    pub async fn pay_contract(&self, buyer: Role, app_id: AppId) -> Result<TxId> {
        let record = self.escrow_record(app_id).await?;
        let purchaser = self.credentials().address(buyer);

        if record.nft_id.0 != 0 && !self.is_opted_in(&purchaser, record.nft_id).await? {
            let params = self.params().await?;
            self.submit(buyer, Transaction::asset_opt_in(purchaser, &params, record.nft_id))
                .await?;
            tracing::info!("Opted {} in to NFT {}", purchaser.short(), record.nft_id);
        }

        let params = self.params().await?;
        let payment = Transaction::payment(purchaser, &params, app_id.address(), record.price);
        let mut accounts: Vec<Address> = record.seller.into_iter().collect();
        accounts.push(purchaser);
        let foreign_assets = if record.nft_id.0 != 0 {
            vec![record.nft_id]
        } else {
            Vec::new()
        };
        let call = Transaction::app_call(
            self.credentials().address(Role::Creator),
            &params,
            app_id,
            OnComplete::NoOp,
            vec![BUY_METHOD.to_vec(), purchaser.as_bytes().to_vec()],
        )
        .with_accounts(accounts)
        .with_foreign_assets(foreign_assets);

        let confirmed = self
            .submit_group(vec![(buyer, payment), (Role::Creator, call)])
            .await?;
        tracing::info!("{} bought NFT {} for {}", purchaser.short(), record.nft_id, record.price);
        Ok(confirmed.txid)
    }

    /// Delete the escrow, returning any held NFT to the seller and the balance to the creator
    pub async fn delete_escrow_contract(&self, creator: Role, app_id: AppId) -> Result<TxId> {
        let record = self.escrow_record(app_id).await?;
        let params = self.params().await?;
        let foreign_assets = if record.nft_id.0 != 0 {
            vec![record.nft_id]
        } else {
            Vec::new()
        };
        let txn = Transaction::app_call(
            self.credentials().address(creator),
            &params,
            app_id,
            OnComplete::DeleteApplication,
            Vec::new(),
        )
        .with_accounts(record.seller.into_iter().collect())
        .with_foreign_assets(foreign_assets);
        let confirmed = self.submit(creator, txn).await?;
        tracing::info!("Deleted escrow {}", app_id);
        Ok(confirmed.txid)
    }

    pub async fn change_name(&self, sender: Role, app_id: AppId, new_name: &str) -> Result<TxId> {
        let params = self.params().await?;
        let txn = Transaction::app_call(
            self.credentials().address(sender),
            &params,
            app_id,
            OnComplete::NoOp,
            vec![CHANGE_METHOD.to_vec(), new_name.as_bytes().to_vec()],
        );
        let confirmed = self.submit(sender, txn).await?;
        tracing::info!("Changed name of {} to {:?}", app_id, new_name);
        Ok(confirmed.txid)
    }

    pub async fn get_app_global_state(&self, app_id: AppId) -> Result<GlobalState> {
        Ok(self.node().application_info(app_id).await?.params.global_state)
    }

    pub async fn escrow_record(&self, app_id: AppId) -> Result<EscrowRecord> {
        EscrowRecord::from_global_state(&self.get_app_global_state(app_id).await?)
    }

    /// Lifecycle position of the escrow, including after deletion
    pub async fn escrow_state(&self, app_id: AppId) -> Result<EscrowState> {
        match self.node().application_info(app_id).await {
            Ok(info) => {
                let record = EscrowRecord::from_global_state(&info.params.global_state)?;
                let holding = self
                    .node()
                    .account_info(&info.address)
                    .await?
                    .assets
                    .get(&record.nft_id)
                    .map(|h| h.amount);
                Ok(EscrowState::derive(&record, holding, false))
            }
            Err(Error::UnknownApplication(id)) => {
                let history = self.node().application_history(app_id).await?;
                match history.last() {
                    Some(last) if last.deleted => Ok(EscrowState::Deleted),
                    _ => Err(Error::UnknownApplication(id)),
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_balances(&self, address: &Address) -> Result<Balances> {
        let info = self.node().account_info(address).await?;
        let mut balances = Balances::new();
        balances.insert(0, info.amount);
        for (id, holding) in info.assets {
            balances.insert(id.0, holding.amount);
        }
        Ok(balances)
    }

    pub async fn last_block_timestamp(&self) -> Result<DateTime<Utc>> {
        let status = self.node().status().await?;
        Ok(self.node().block_info(status.last_round).await?.timestamp)
    }

    pub async fn lifecycle_graph(&self, app_id: AppId) -> Result<LifecycleGraph> {
        let history = self.node().application_history(app_id).await?;
        LifecycleGraph::build_from_history(app_id, &history)
    }

    async fn is_opted_in(&self, address: &Address, asset: AssetId) -> Result<bool> {
        Ok(self
            .node()
            .account_info(address)
            .await?
            .assets
            .contains_key(&asset))
    }

    /// Run the whole sale: create and fund the escrow, mint, deposit, buy
    pub async fn run_demo(&self, options: &DemoOptions) -> Result<DemoReport> {
        let price = options.price.unwrap_or(self.sale().price);

        tracing::info!("Creating escrow application");
        let app_id = self.create_escrow_contract(Role::Creator).await?;
        self.fund_escrow_contract(Role::Creator, app_id).await?;

        tracing::info!("Minting NFT");
        let nft_id = self.create_nft(Role::Seller).await?;

        tracing::info!("Depositing NFT {} for sale at {}", nft_id, price);
        self.deposit_nft(Role::Seller, app_id, nft_id, price).await?;
        self.log_balances(app_id).await?;

        tracing::info!("Buying NFT {}", nft_id);
        self.pay_contract(Role::Buyer, app_id).await?;
        let record = self.escrow_record(app_id).await?;
        let balances = self.log_balances(app_id).await?;
        tracing::info!("The escrow is ready to accept another NFT");

        if options.delete {
            self.delete_escrow_contract(Role::Creator, app_id).await?;
        }

        Ok(DemoReport {
            app_id,
            escrow_address: app_id.address(),
            nft_id,
            price,
            record,
            state: self.escrow_state(app_id).await?,
            balances,
            last_block: self.last_block_timestamp().await?,
        })
    }

    async fn log_balances(&self, app_id: AppId) -> Result<BTreeMap<String, Balances>> {
        let mut all = BTreeMap::new();
        for role in Role::ALL {
            let balances = self.get_balances(&self.credentials().address(role)).await?;
            tracing::info!("{} balances: {:?}", role, balances);
            all.insert(role.to_string(), balances);
        }
        let escrow = self.get_balances(&app_id.address()).await?;
        tracing::info!("escrow balances: {:?}", escrow);
        all.insert("escrow".to_string(), escrow);
        Ok(all)
    }
}

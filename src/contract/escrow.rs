//! NFT escrow approval program
//!
//! Global schema: `seller` (bytes), `buyer` (bytes), `nft_id` (uint),
//! `price` (uint), `status` (uint, see [`SaleStatus`]).
//!
//! NoOp methods:
//! - `setup` / `deposit` `[method, seller, nft_id, price]`: record a sale and
//!   opt the escrow into the NFT.
//! - `buy` `[method, buyer]`: pay the seller from the escrow balance and hand
//!   the NFT to the buyer.
//!
//! Deleting (creator only) returns any held NFT to the seller and the
//! remaining balance to the creator.

use crate::contract::{AppEnv, EscrowVariant, btoi};
use crate::contract::state::{EscrowRecord, SaleStatus};
use crate::ensure;
use crate::ledger::{
    Address, AssetId, AssetTransfer, OnComplete, Payment, StateSchema, StateValue, TxnKind,
};
use crate::{Error, Result};

pub const SELLER_KEY: &[u8] = b"seller";
pub const BUYER_KEY: &[u8] = b"buyer";
pub const NFT_ID_KEY: &[u8] = b"nft_id";
pub const PRICE_KEY: &[u8] = b"price";
pub const STATUS_KEY: &[u8] = b"status";

pub const SETUP_METHOD: &[u8] = b"setup";
pub const DEPOSIT_METHOD: &[u8] = b"deposit";
pub const BUY_METHOD: &[u8] = b"buy";

/// Global schema the escrow is created with
pub fn global_schema() -> StateSchema {
    StateSchema::new(4, 2)
}

pub fn approve(variant: &EscrowVariant, env: &mut dyn AppEnv) -> Result<()> {
    let call = env.call().clone();
    if call.app_id.is_create() {
        return Ok(());
    }

    match call.on_complete {
        OnComplete::NoOp => match call.method() {
            Some(SETUP_METHOD | DEPOSIT_METHOD) => on_setup(env, &call.args),
            Some(BUY_METHOD) => on_buy(variant, env, &call.args),
            Some(other) => Err(Error::rejected(format!(
                "unknown method {:?}",
                String::from_utf8_lossy(other)
            ))),
            None => Err(Error::rejected("missing method selector")),
        },
        OnComplete::DeleteApplication => on_delete(env),
        other => Err(Error::rejected(format!("{:?} is not supported", other))),
    }
}

fn on_setup(env: &mut dyn AppEnv, args: &[Vec<u8>]) -> Result<()> {
    ensure!(
        args.len() == 4,
        "setup expects [method, seller, nft_id, price], got {} args",
        args.len()
    );
    let record = EscrowRecord::from_global_state(env.global_state())?;
    ensure!(!record.is_listed(), "a sale is already in progress");

    let seller = Address::from_bytes(&args[1]).map_err(|e| Error::rejected(e.to_string()))?;
    let nft_id = btoi(&args[2])?;
    let price = btoi(&args[3])?;

    env.global_put(SELLER_KEY, StateValue::Bytes(seller.as_bytes().to_vec()))?;
    env.global_put(NFT_ID_KEY, StateValue::Uint(nft_id))?;
    env.global_put(PRICE_KEY, StateValue::Uint(price))?;
    env.global_put(STATUS_KEY, StateValue::Uint(SaleStatus::Listed.as_uint()))?;
    env.global_del(BUYER_KEY);

    let app = env.app_address();
    env.submit_inner(TxnKind::AssetTransfer(AssetTransfer {
        asset: AssetId(nft_id),
        receiver: app,
        amount: 0,
        close_to: None,
    }))
}

fn on_buy(variant: &EscrowVariant, env: &mut dyn AppEnv, args: &[Vec<u8>]) -> Result<()> {
    ensure!(
        args.len() == 2,
        "buy expects [method, buyer], got {} args",
        args.len()
    );
    let record = EscrowRecord::from_global_state(env.global_state())?;
    match record.status {
        Some(SaleStatus::Listed) => {}
        Some(SaleStatus::Sold) => return Err(Error::rejected("the NFT has already been sold")),
        None => return Err(Error::rejected("no sale has been set up")),
    }
    let seller = record
        .seller
        .ok_or_else(|| Error::rejected("listed sale has no seller"))?;
    let buyer = Address::from_bytes(&args[1]).map_err(|e| Error::rejected(e.to_string()))?;

    if variant.require_grouped_payment {
        let app = env.app_address();
        let index = env.group_index();
        let paid = env.group().iter().enumerate().any(|(i, txn)| {
            i != index
                && matches!(&txn.kind, TxnKind::Payment(pay)
                    if pay.receiver == app && pay.amount >= record.price)
        });
        ensure!(
            paid,
            "buy needs a grouped payment of at least {} to the escrow",
            record.price
        );
    }

    env.global_put(BUYER_KEY, StateValue::Bytes(buyer.as_bytes().to_vec()))?;
    env.submit_inner(TxnKind::Payment(Payment {
        receiver: seller,
        amount: record.price,
        close_remainder_to: None,
    }))?;
    close_nft_to(env, record.nft_id, buyer)?;
    env.global_put(STATUS_KEY, StateValue::Uint(SaleStatus::Sold.as_uint()))
}

fn on_delete(env: &mut dyn AppEnv) -> Result<()> {
    ensure!(
        env.sender() == env.creator(),
        "only the creator may delete the escrow"
    );
    let record = EscrowRecord::from_global_state(env.global_state())?;
    if let Some(seller) = record.seller
        && record.nft_id.0 != 0
    {
        close_nft_to(env, record.nft_id, seller)?;
    }

    let app = env.app_address();
    let creator = env.creator();
    if env.balance(&app)? > 0 {
        env.submit_inner(TxnKind::Payment(Payment {
            receiver: creator,
            amount: 0,
            close_remainder_to: Some(creator),
        }))?;
    }
    Ok(())
}

/// Move the escrow's entire holding of `asset` to `account` and opt out
fn close_nft_to(env: &mut dyn AppEnv, asset: AssetId, account: Address) -> Result<()> {
    let app = env.app_address();
    if env.asset_holding(&app, asset)?.is_some() {
        env.submit_inner(TxnKind::AssetTransfer(AssetTransfer {
            asset,
            receiver: account,
            amount: 0,
            close_to: Some(account),
        }))?;
    }
    Ok(())
}

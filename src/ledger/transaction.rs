//! Transactions, atomic groups and their canonical encoding
//!
//! Transactions are CBOR-encoded with `minicbor`; the transaction id is the
//! Blake2b-256 digest of `"TX" || cbor(txn)` and a group id is the digest of
//! `"TG" || id_0 || id_1 || ...` computed with the group field cleared.

use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};

use super::models::{
    Address, AppId, AssetId, AssetParams, MAX_GROUP_SIZE, MIN_FEE, OnComplete, StateSchema,
    SuggestedParams, TxId, blake2b_256, hex_bytes, hex_bytes_list,
};
use crate::{Error, Result};

/// Transfer of the native currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Payment {
    #[n(0)]
    pub receiver: Address,
    #[n(1)]
    pub amount: u64,
    /// Close the sender account and send the remaining balance here
    #[n(2)]
    #[serde(default)]
    pub close_remainder_to: Option<Address>,
}

/// Transfer of an asset. A zero-amount transfer to oneself is an opt-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct AssetTransfer {
    #[n(0)]
    pub asset: AssetId,
    #[n(1)]
    pub receiver: Address,
    #[n(2)]
    pub amount: u64,
    /// Remove the sender's holding and send whatever remains here
    #[n(3)]
    #[serde(default)]
    pub close_to: Option<Address>,
}

/// Call into an application (or create one when `app_id` is zero)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ApplicationCall {
    #[n(0)]
    pub app_id: AppId,
    #[n(1)]
    pub on_complete: OnComplete,
    #[n(2)]
    #[serde(with = "hex_bytes_list", default)]
    pub args: Vec<Vec<u8>>,
    #[n(3)]
    #[serde(default)]
    pub foreign_assets: Vec<AssetId>,
    #[n(4)]
    #[serde(default)]
    pub accounts: Vec<Address>,
    #[n(5)]
    #[cbor(with = "minicbor::bytes")]
    #[serde(with = "hex_bytes", default)]
    pub approval_program: Vec<u8>,
    #[n(6)]
    #[cbor(with = "minicbor::bytes")]
    #[serde(with = "hex_bytes", default)]
    pub clear_program: Vec<u8>,
    #[n(7)]
    #[serde(default)]
    pub global_schema: StateSchema,
    #[n(8)]
    #[serde(default)]
    pub local_schema: StateSchema,
}

impl ApplicationCall {
    /// Method selector (first argument)
    pub fn method(&self) -> Option<&[u8]> {
        self.args.first().map(Vec::as_slice)
    }
}

/// Type-specific part of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TxnKind {
    #[n(0)]
    Payment(#[n(0)] Payment),
    #[n(1)]
    AssetConfig(#[n(0)] AssetParams),
    #[n(2)]
    AssetTransfer(#[n(0)] AssetTransfer),
    #[n(3)]
    ApplicationCall(#[n(0)] ApplicationCall),
}

impl TxnKind {
    pub fn name(&self) -> &'static str {
        match self {
            TxnKind::Payment(_) => "pay",
            TxnKind::AssetConfig(_) => "acfg",
            TxnKind::AssetTransfer(_) => "axfer",
            TxnKind::ApplicationCall(_) => "appl",
        }
    }
}

/// An unsigned transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Transaction {
    #[n(0)]
    pub sender: Address,
    #[n(1)]
    pub fee: u64,
    #[n(2)]
    pub first_valid: u64,
    #[n(3)]
    pub last_valid: u64,
    #[n(4)]
    pub genesis_id: String,
    #[n(5)]
    #[cbor(with = "minicbor::bytes")]
    #[serde(with = "hex_bytes", default)]
    pub note: Vec<u8>,
    #[n(6)]
    #[serde(default)]
    pub group: Option<TxId>,
    #[n(7)]
    pub kind: TxnKind,
}

impl Transaction {
    /// Create a transaction from suggested params. A random note keeps
    /// otherwise identical transactions from colliding on their id.
    pub fn new(sender: Address, params: &SuggestedParams, kind: TxnKind) -> Self {
        Self {
            sender,
            fee: params.fee.max(MIN_FEE),
            first_valid: params.first_valid,
            last_valid: params.last_valid,
            genesis_id: params.genesis_id.clone(),
            note: rand::random::<u64>().to_be_bytes().to_vec(),
            group: None,
            kind,
        }
    }

    pub fn payment(
        sender: Address,
        params: &SuggestedParams,
        receiver: Address,
        amount: u64,
    ) -> Self {
        Self::new(
            sender,
            params,
            TxnKind::Payment(Payment {
                receiver,
                amount,
                close_remainder_to: None,
            }),
        )
    }

    pub fn asset_create(sender: Address, params: &SuggestedParams, asset: AssetParams) -> Self {
        Self::new(sender, params, TxnKind::AssetConfig(asset))
    }

    pub fn asset_transfer(
        sender: Address,
        params: &SuggestedParams,
        asset: AssetId,
        receiver: Address,
        amount: u64,
    ) -> Self {
        Self::new(
            sender,
            params,
            TxnKind::AssetTransfer(AssetTransfer {
                asset,
                receiver,
                amount,
                close_to: None,
            }),
        )
    }

    /// Zero-amount transfer to oneself
    pub fn asset_opt_in(sender: Address, params: &SuggestedParams, asset: AssetId) -> Self {
        Self::asset_transfer(sender, params, asset, sender, 0)
    }

    pub fn app_create(
        sender: Address,
        params: &SuggestedParams,
        approval_program: Vec<u8>,
        clear_program: Vec<u8>,
        global_schema: StateSchema,
        local_schema: StateSchema,
    ) -> Self {
        Self::new(
            sender,
            params,
            TxnKind::ApplicationCall(ApplicationCall {
                app_id: AppId(0),
                on_complete: OnComplete::NoOp,
                args: Vec::new(),
                foreign_assets: Vec::new(),
                accounts: Vec::new(),
                approval_program,
                clear_program,
                global_schema,
                local_schema,
            }),
        )
    }

    pub fn app_call(
        sender: Address,
        params: &SuggestedParams,
        app_id: AppId,
        on_complete: OnComplete,
        args: Vec<Vec<u8>>,
    ) -> Self {
        Self::new(
            sender,
            params,
            TxnKind::ApplicationCall(ApplicationCall {
                app_id,
                on_complete,
                args,
                foreign_assets: Vec::new(),
                accounts: Vec::new(),
                approval_program: Vec::new(),
                clear_program: Vec::new(),
                global_schema: StateSchema::default(),
                local_schema: StateSchema::default(),
            }),
        )
    }

    /// Set application arguments (application calls only)
    pub fn with_args(mut self, new_args: Vec<Vec<u8>>) -> Self {
        if let TxnKind::ApplicationCall(call) = &mut self.kind {
            call.args = new_args;
        }
        self
    }

    /// Reference assets the program may touch (application calls only)
    pub fn with_foreign_assets(mut self, assets: Vec<AssetId>) -> Self {
        if let TxnKind::ApplicationCall(call) = &mut self.kind {
            call.foreign_assets = assets;
        }
        self
    }

    /// Reference accounts the program may touch (application calls only)
    pub fn with_accounts(mut self, accounts: Vec<Address>) -> Self {
        if let TxnKind::ApplicationCall(call) = &mut self.kind {
            call.accounts = accounts;
        }
        self
    }

    /// Close the sender's balance to `to` (payments only)
    pub fn with_close_remainder_to(mut self, to: Address) -> Self {
        if let TxnKind::Payment(pay) = &mut self.kind {
            pay.close_remainder_to = Some(to);
        }
        self
    }

    /// Canonical CBOR encoding
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(minicbor::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(minicbor::decode(bytes)?)
    }

    /// Transaction id: `blake2b256("TX" || cbor(self))`
    pub fn id(&self) -> Result<TxId> {
        let mut preimage = b"TX".to_vec();
        preimage.extend(self.encode()?);
        Ok(TxId(blake2b_256(&preimage)))
    }

    pub fn as_app_call(&self) -> Option<&ApplicationCall> {
        match &self.kind {
            TxnKind::ApplicationCall(call) => Some(call),
            _ => None,
        }
    }
}

/// Compute the group id for a set of transactions, ignoring any group id they already carry
pub fn compute_group_id(txns: &[Transaction]) -> Result<TxId> {
    if txns.is_empty() || txns.len() > MAX_GROUP_SIZE {
        return Err(Error::invalid_argument(format!(
            "group size must be 1..={}, got {}",
            MAX_GROUP_SIZE,
            txns.len()
        )));
    }

    let mut preimage = b"TG".to_vec();
    for txn in txns {
        let mut bare = txn.clone();
        bare.group = None;
        preimage.extend_from_slice(&bare.id()?.0);
    }
    Ok(TxId(blake2b_256(&preimage)))
}

/// Bind transactions into one atomic group
pub fn assign_group_id(txns: &mut [Transaction]) -> Result<TxId> {
    let gid = compute_group_id(txns)?;
    for txn in txns.iter_mut() {
        txn.group = Some(gid);
    }
    Ok(gid)
}

/// A transaction with the sender's Schnorr signature over its id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub txn: Transaction,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    pub fn id(&self) -> Result<TxId> {
        self.txn.id()
    }

    /// Verify the signature against the sender address (an x-only public key)
    pub fn verify(&self) -> Result<()> {
        use secp256k1::{Message, Secp256k1, XOnlyPublicKey, schnorr::Signature};

        let secp = Secp256k1::verification_only();
        let key = XOnlyPublicKey::from_slice(self.txn.sender.as_bytes())
            .map_err(|e| Error::Signature(format!("sender is not a signing account: {}", e)))?;
        let signature = Signature::from_slice(&self.signature)?;
        let message = Message::from_digest(self.id()?.0);
        secp.verify_schnorr(&signature, &message, &key).map_err(|e| {
            Error::Signature(format!("bad signature from {}: {}", self.txn.sender.short(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SuggestedParams {
        SuggestedParams {
            fee: 0,
            first_valid: 1,
            last_valid: 1001,
            genesis_id: "sim-v1".to_string(),
        }
    }

    #[test]
    fn test_fee_is_at_least_minimum() {
        let txn = Transaction::payment(Address([1; 32]), &params(), Address([2; 32]), 5);
        assert_eq!(txn.fee, MIN_FEE);
    }

    #[test]
    fn test_cbor_roundtrip_preserves_id() {
        let txn = Transaction::app_call(
            Address([1; 32]),
            &params(),
            AppId(7),
            OnComplete::NoOp,
            vec![b"buy".to_vec(), vec![3; 32]],
        )
        .with_foreign_assets(vec![AssetId(9)])
        .with_accounts(vec![Address([4; 32])]);

        let decoded = Transaction::decode(&txn.encode().unwrap()).unwrap();
        assert_eq!(decoded, txn);
        assert_eq!(decoded.id().unwrap(), txn.id().unwrap());
    }

    #[test]
    fn test_random_note_distinguishes_identical_transactions() {
        let a = Transaction::asset_opt_in(Address([1; 32]), &params(), AssetId(5));
        let b = Transaction::asset_opt_in(Address([1; 32]), &params(), AssetId(5));
        assert_ne!(a.id().unwrap(), b.id().unwrap());
    }

    #[test]
    fn test_group_id_ignores_existing_group_field() {
        let mut txns = vec![
            Transaction::payment(Address([1; 32]), &params(), Address([2; 32]), 10),
            Transaction::payment(Address([2; 32]), &params(), Address([1; 32]), 10),
        ];
        let gid = assign_group_id(&mut txns).unwrap();
        assert!(txns.iter().all(|t| t.group == Some(gid)));
        assert_eq!(compute_group_id(&txns).unwrap(), gid);
    }

    #[test]
    fn test_group_size_limits() {
        assert!(compute_group_id(&[]).is_err());
        let many: Vec<Transaction> = (0..17)
            .map(|_| Transaction::payment(Address([1; 32]), &params(), Address([2; 32]), 1))
            .collect();
        assert!(compute_group_id(&many).is_err());
    }

    #[test]
    fn test_builders_ignore_mismatched_kinds() {
        let pay = Transaction::payment(Address([1; 32]), &params(), Address([2; 32]), 1)
            .with_accounts(vec![Address([3; 32])]);
        assert!(pay.as_app_call().is_none());
    }
}

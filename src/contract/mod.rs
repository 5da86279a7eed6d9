//! Contract module - on-chain programs and their execution interface
//!
//! Programs never touch the ledger directly. The node hands them an
//! [`AppEnv`] describing the current call, the application's global state and
//! the inner transactions they may issue; any error rejects the whole group.

use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::ledger::{
    Address, AppId, ApplicationCall, AssetId, GlobalState, StateValue, Transaction, TxnKind,
    blake2b_256,
};
use crate::{Error, Result};

pub mod escrow;
pub mod graph;
pub mod name;
pub mod state;

// Re-export key types
pub use graph::{GraphStats, LifecycleGraph};
pub use state::{EscrowRecord, EscrowState, SaleStatus};

/// Version byte stamped on compiled bytecode
pub const PROGRAM_VERSION: u8 = 5;

const BYTECODE_MAGIC: &[u8; 4] = b"NFTE";

/// Escrow compile-time options
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Encode, Decode,
)]
pub struct EscrowVariant {
    /// Require a payment of at least `price` to the escrow in the same group as `buy`
    #[n(0)]
    #[serde(default)]
    pub require_grouped_payment: bool,
}

/// Programs the node knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
#[serde(tag = "program", rename_all = "snake_case")]
pub enum Program {
    /// NFT escrow approval program
    #[n(0)]
    Escrow(#[n(0)] EscrowVariant),
    /// Single-key "current_name" toy approval program
    #[n(1)]
    Name,
    /// Clear-state program that always approves
    #[n(2)]
    ClearState,
}

/// Bytecode produced by compiling a [`Program`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProgram {
    pub bytes: Vec<u8>,
    /// Hex Blake2b-256 of the bytecode
    pub hash: String,
}

impl Program {
    pub fn escrow() -> Self {
        Program::Escrow(EscrowVariant::default())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Program::Escrow(_) => "escrow",
            Program::Name => "name",
            Program::ClearState => "clear_state",
        }
    }

    /// Lower the program to bytecode: magic, version byte, CBOR body
    pub fn compile(&self) -> Result<CompiledProgram> {
        let mut bytes = BYTECODE_MAGIC.to_vec();
        bytes.push(PROGRAM_VERSION);
        bytes.extend(minicbor::to_vec(self)?);
        let hash = hex::encode(blake2b_256(&bytes));
        Ok(CompiledProgram { bytes, hash })
    }

    /// Recover the program from bytecode stored on an application
    pub fn from_bytecode(bytes: &[u8]) -> Result<Self> {
        let body = bytes
            .strip_prefix(BYTECODE_MAGIC.as_slice())
            .ok_or_else(|| Error::rejected("bytecode has no program header"))?;
        match body.split_first() {
            Some((&PROGRAM_VERSION, cbor)) => Ok(minicbor::decode(cbor)?),
            Some((version, _)) => Err(Error::rejected(format!(
                "unsupported program version {}",
                version
            ))),
            None => Err(Error::rejected("empty bytecode")),
        }
    }

    /// Run the program against one call. `Ok` approves, any error rejects.
    pub fn evaluate(&self, env: &mut dyn AppEnv) -> Result<()> {
        match self {
            Program::Escrow(variant) => escrow::approve(variant, env),
            Program::Name => name::approve(env),
            Program::ClearState => Ok(()),
        }
    }
}

/// What a running program can see and do
pub trait AppEnv {
    /// The application call being evaluated
    fn call(&self) -> &ApplicationCall;

    fn sender(&self) -> Address;

    /// Id of the application being run (the new id while creating)
    fn app_id(&self) -> AppId;

    fn app_address(&self) -> Address {
        self.app_id().address()
    }

    fn creator(&self) -> Address;

    /// Every transaction of the atomic group, in order
    fn group(&self) -> &[Transaction];

    /// Position of the current call within [`AppEnv::group`]
    fn group_index(&self) -> usize;

    fn global_state(&self) -> &GlobalState;

    fn global_put(&mut self, key: &[u8], value: StateValue) -> Result<()>;

    fn global_del(&mut self, key: &[u8]);

    /// Currency balance of an available account
    fn balance(&self, account: &Address) -> Result<u64>;

    /// Holding of an available asset by an available account; `None` if not opted in
    fn asset_holding(&self, account: &Address, asset: AssetId) -> Result<Option<u64>>;

    /// Execute an inner transaction sent from the application account
    fn submit_inner(&mut self, kind: TxnKind) -> Result<()>;
}

/// Decode a big-endian integer argument of at most 8 bytes
pub fn btoi(bytes: &[u8]) -> Result<u64> {
    if bytes.len() > 8 {
        return Err(Error::rejected(format!(
            "btoi argument is {} bytes, at most 8 allowed",
            bytes.len()
        )));
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Encode an integer argument as 8 big-endian bytes
pub fn itob(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory [`AppEnv`] for exercising programs without a ledger

    use super::*;
    use crate::ledger::{AssetTransfer, OnComplete, Payment};
    use std::collections::HashMap;

    pub struct FakeEnv {
        pub call: ApplicationCall,
        pub sender: Address,
        pub app_id: AppId,
        pub creator: Address,
        pub group: Vec<Transaction>,
        pub group_index: usize,
        pub globals: GlobalState,
        pub balances: HashMap<Address, u64>,
        pub holdings: HashMap<(Address, AssetId), u64>,
        pub inner: Vec<TxnKind>,
    }

    impl FakeEnv {
        pub fn new(sender: Address, on_complete: OnComplete, args: Vec<Vec<u8>>) -> Self {
            Self {
                call: ApplicationCall {
                    app_id: AppId(11),
                    on_complete,
                    args,
                    foreign_assets: Vec::new(),
                    accounts: Vec::new(),
                    approval_program: Vec::new(),
                    clear_program: Vec::new(),
                    global_schema: Default::default(),
                    local_schema: Default::default(),
                },
                sender,
                app_id: AppId(11),
                creator: Address([0xc0; 32]),
                group: Vec::new(),
                group_index: 0,
                globals: GlobalState::new(),
                balances: HashMap::new(),
                holdings: HashMap::new(),
                inner: Vec::new(),
            }
        }

        pub fn creating(mut self) -> Self {
            self.call.app_id = AppId(0);
            self
        }
    }

    impl AppEnv for FakeEnv {
        fn call(&self) -> &ApplicationCall {
            &self.call
        }

        fn sender(&self) -> Address {
            self.sender
        }

        fn app_id(&self) -> AppId {
            self.app_id
        }

        fn creator(&self) -> Address {
            self.creator
        }

        fn group(&self) -> &[Transaction] {
            &self.group
        }

        fn group_index(&self) -> usize {
            self.group_index
        }

        fn global_state(&self) -> &GlobalState {
            &self.globals
        }

        fn global_put(&mut self, key: &[u8], value: StateValue) -> Result<()> {
            self.globals.insert(key, value);
            Ok(())
        }

        fn global_del(&mut self, key: &[u8]) {
            self.globals.remove(key);
        }

        fn balance(&self, account: &Address) -> Result<u64> {
            Ok(self.balances.get(account).copied().unwrap_or(0))
        }

        fn asset_holding(&self, account: &Address, asset: AssetId) -> Result<Option<u64>> {
            Ok(self.holdings.get(&(*account, asset)).copied())
        }

        fn submit_inner(&mut self, kind: TxnKind) -> Result<()> {
            let app = self.app_address();
            match &kind {
                TxnKind::Payment(Payment { receiver, .. }) if receiver.is_zero() => {
                    return Err(Error::transfer("payment to the zero address"));
                }
                TxnKind::AssetTransfer(AssetTransfer {
                    asset,
                    receiver,
                    amount,
                    close_to,
                }) => {
                    if asset.0 == 0 {
                        return Err(Error::transfer("asset 0 does not exist"));
                    }
                    if *receiver == app && *amount == 0 {
                        self.holdings.entry((app, *asset)).or_insert(0);
                    } else if let Some(to) = close_to {
                        let held = self.holdings.remove(&(app, *asset)).unwrap_or(0);
                        *self.holdings.entry((*to, *asset)).or_insert(0) += held;
                    }
                }
                _ => {}
            }
            self.inner.push(kind);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_roundtrip() {
        for program in [
            Program::escrow(),
            Program::Escrow(EscrowVariant {
                require_grouped_payment: true,
            }),
            Program::Name,
            Program::ClearState,
        ] {
            let compiled = program.compile().unwrap();
            assert_eq!(Program::from_bytecode(&compiled.bytes).unwrap(), program);
            assert_eq!(compiled.hash.len(), 64);
        }
    }

    #[test]
    fn test_variants_compile_to_distinct_bytecode() {
        let plain = Program::escrow().compile().unwrap();
        let guarded = Program::Escrow(EscrowVariant {
            require_grouped_payment: true,
        })
        .compile()
        .unwrap();
        assert_ne!(plain.hash, guarded.hash);
    }

    #[test]
    fn test_bad_bytecode_is_rejected() {
        assert!(Program::from_bytecode(b"garbage").is_err());
        let mut bytes = Program::Name.compile().unwrap().bytes;
        bytes[4] = 9;
        assert!(Program::from_bytecode(&bytes).is_err());
    }

    #[test]
    fn test_btoi_itob() {
        assert_eq!(btoi(&itob(67_248_837)).unwrap(), 67_248_837);
        assert_eq!(btoi(&[]).unwrap(), 0);
        assert_eq!(btoi(&[1, 0]).unwrap(), 256);
        assert!(btoi(&[0; 9]).is_err());
    }
}

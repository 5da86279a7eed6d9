//! Core data models for the simulated ledger
//!
//! This module defines addresses, identifiers, global state values and the
//! account/application/asset records served by a [`Node`](super::Node).

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Minimum fee for any transaction, top-level or inner
pub const MIN_FEE: u64 = 1_000;

/// Minimum balance of any open account
pub const MIN_BALANCE: u64 = 100_000;

/// Additional minimum balance per asset holding (opt-in)
pub const ASSET_MIN_BALANCE: u64 = 100_000;

/// Additional minimum balance per created application
pub const APP_MIN_BALANCE: u64 = 100_000;

/// Additional minimum balance per global uint slot of a created application
pub const SCHEMA_UINT_MIN_BALANCE: u64 = 28_500;

/// Additional minimum balance per global byte-slice slot of a created application
pub const SCHEMA_BYTES_MIN_BALANCE: u64 = 50_000;

/// Maximum number of transactions in one atomic group
pub const MAX_GROUP_SIZE: usize = 16;

/// Maximum distance between first and last valid round
pub const MAX_TXN_LIFE: u64 = 1_000;

/// Calculate Blake2b-256 hash of data
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    use blake2::digest::consts::U32;
    use blake2::{Blake2b, Digest};

    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn decode_32(kind: &str, s: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(s.trim())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| {
            Error::InvalidAddress(format!("{} must be 32 bytes, got {}", kind, b.len()))
        })
}

/// A 32-byte account address.
///
/// Signing accounts use their x-only public key; application accounts use
/// [`Address::for_application`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const ZERO: Address = Address([0u8; 32]);

    /// Address controlled by an application: `blake2b256("appID" || be64(id))`
    pub fn for_application(app_id: AppId) -> Self {
        let mut preimage = b"appID".to_vec();
        preimage.extend_from_slice(&app_id.0.to_be_bytes());
        Address(blake2b_256(&preimage))
    }

    /// Parse an address from raw call-argument bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::InvalidAddress(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Address(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Abbreviated form for tables and logs
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}…{}", &full[..6], &full[58..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Address({})", self.short())
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        decode_32("address", s).map(Address)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl<C> minicbor::Encode<C> for Address {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> std::result::Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?;
        Ok(())
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Address {
    fn decode(
        d: &mut minicbor::Decoder<'b>,
        _ctx: &mut C,
    ) -> std::result::Result<Self, minicbor::decode::Error> {
        let bytes = d.bytes()?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("address must be 32 bytes"))?;
        Ok(Address(arr))
    }
}

/// Transaction identifier (Blake2b-256 of the encoded transaction)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(pub [u8; 32]);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TxId({})", &self.to_string()[..12])
    }
}

impl FromStr for TxId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        decode_32("transaction id", s).map(TxId)
    }
}

impl Serialize for TxId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

macro_rules! index_newtype {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Default,
            Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl<C> minicbor::Encode<C> for $name {
            fn encode<W: minicbor::encode::Write>(
                &self,
                e: &mut minicbor::Encoder<W>,
                _ctx: &mut C,
            ) -> std::result::Result<(), minicbor::encode::Error<W::Error>> {
                e.u64(self.0)?;
                Ok(())
            }
        }

        impl<'b, C> minicbor::Decode<'b, C> for $name {
            fn decode(
                d: &mut minicbor::Decoder<'b>,
                _ctx: &mut C,
            ) -> std::result::Result<Self, minicbor::decode::Error> {
                Ok($name(d.u64()?))
            }
        }
    };
}

index_newtype!(AppId, "Application identifier; zero means \"create\"");
index_newtype!(AssetId, "Asset identifier");

impl AppId {
    pub fn is_create(&self) -> bool {
        self.0 == 0
    }

    pub fn address(&self) -> Address {
        Address::for_application(*self)
    }
}

impl<C> minicbor::Encode<C> for TxId {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> std::result::Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?;
        Ok(())
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TxId {
    fn decode(
        d: &mut minicbor::Decoder<'b>,
        _ctx: &mut C,
    ) -> std::result::Result<Self, minicbor::decode::Error> {
        let bytes = d.bytes()?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("digest must be 32 bytes"))?;
        Ok(TxId(arr))
    }
}

/// Serde helper for byte vectors rendered as hex strings
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// Serde helper for lists of byte vectors rendered as hex strings
pub(crate) mod hex_bytes_list {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(items.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .into_iter()
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// A global state value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum StateValue {
    Uint(u64),
    Bytes(#[serde(with = "hex_bytes")] Vec<u8>),
}

impl StateValue {
    /// Integer view; byte values and absent keys read as zero
    pub fn as_uint(&self) -> u64 {
        match self {
            StateValue::Uint(v) => *v,
            StateValue::Bytes(_) => 0,
        }
    }

    /// Byte view; integer values read as empty
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            StateValue::Bytes(b) => b,
            StateValue::Uint(_) => &[],
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StateValue::Uint(v) => write!(f, "{}", v),
            StateValue::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) if b.len() != 32 && s.chars().all(|c| !c.is_control()) => {
                    write!(f, "\"{}\"", s)
                }
                _ => write!(f, "0x{}", hex::encode(b)),
            },
        }
    }
}

/// Key/value global state of one application. Keys are raw byte strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalState(pub BTreeMap<Vec<u8>, StateValue>);

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<&StateValue> {
        self.0.get(key)
    }

    /// Integer read with the host's absent-key-is-zero semantics
    pub fn uint(&self, key: &[u8]) -> u64 {
        self.get(key).map(StateValue::as_uint).unwrap_or(0)
    }

    /// Byte read with the host's absent-key-is-empty semantics
    pub fn bytes(&self, key: &[u8]) -> &[u8] {
        self.get(key).map(StateValue::as_bytes).unwrap_or(&[])
    }

    pub fn insert(&mut self, key: &[u8], value: StateValue) {
        self.0.insert(key.to_vec(), value);
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<StateValue> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Number of (uint, byte-slice) slots in use
    pub fn slot_usage(&self) -> (u64, u64) {
        self.0.values().fold((0, 0), |(u, b), v| match v {
            StateValue::Uint(_) => (u + 1, b),
            StateValue::Bytes(_) => (u, b + 1),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &StateValue)> {
        self.0.iter()
    }
}

/// Keys are written as UTF-8 strings; a key that is not valid UTF-8 fails to serialize
impl Serialize for GlobalState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            let key = std::str::from_utf8(key).map_err(serde::ser::Error::custom)?;
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for GlobalState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = BTreeMap::<String, StateValue>::deserialize(deserializer)?;
        Ok(GlobalState(
            raw.into_iter().map(|(k, v)| (k.into_bytes(), v)).collect(),
        ))
    }
}

/// Declared storage schema of an application
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    minicbor::Encode,
    minicbor::Decode,
)]
pub struct StateSchema {
    #[n(0)]
    pub num_uints: u64,
    #[n(1)]
    pub num_byte_slices: u64,
}

impl StateSchema {
    pub fn new(num_uints: u64, num_byte_slices: u64) -> Self {
        Self {
            num_uints,
            num_byte_slices,
        }
    }

    /// Minimum balance the creator must carry for this schema
    pub fn min_balance(&self) -> u64 {
        self.num_uints * SCHEMA_UINT_MIN_BALANCE + self.num_byte_slices * SCHEMA_BYTES_MIN_BALANCE
    }
}

/// What an application call asks the program to do besides running it
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    minicbor::Encode,
    minicbor::Decode,
)]
#[cbor(index_only)]
pub enum OnComplete {
    #[default]
    #[n(0)]
    NoOp,
    #[n(1)]
    OptIn,
    #[n(2)]
    CloseOut,
    #[n(3)]
    ClearState,
    #[n(4)]
    UpdateApplication,
    #[n(5)]
    DeleteApplication,
}

/// Asset creation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, minicbor::Encode, minicbor::Decode)]
pub struct AssetParams {
    #[n(0)]
    pub total: u64,
    #[n(1)]
    pub decimals: u32,
    #[n(2)]
    pub default_frozen: bool,
    #[n(3)]
    pub unit_name: String,
    #[n(4)]
    pub asset_name: String,
    #[n(5)]
    pub manager: Option<Address>,
    #[n(6)]
    pub reserve: Option<Address>,
    #[n(7)]
    pub freeze: Option<Address>,
    #[n(8)]
    pub clawback: Option<Address>,
}

/// An account's holding of one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssetHolding {
    pub amount: u64,
    #[serde(default)]
    pub frozen: bool,
}

/// Ledger record of one account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountData {
    pub amount: u64,
    #[serde(default)]
    pub assets: BTreeMap<AssetId, AssetHolding>,
    #[serde(default)]
    pub created_apps: Vec<AppId>,
    #[serde(default)]
    pub created_assets: Vec<AssetId>,
}

/// Ledger record of one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub creator: Address,
    pub params: AssetParams,
}

/// Ledger record of one application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub creator: Address,
    #[serde(with = "hex_bytes")]
    pub approval_program: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub clear_program: Vec<u8>,
    pub global_schema: StateSchema,
    pub local_schema: StateSchema,
    pub global_state: GlobalState,
}

/// Account view returned by the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub address: Address,
    pub amount: u64,
    pub min_balance: u64,
    pub assets: BTreeMap<AssetId, AssetHolding>,
    pub created_apps: Vec<AppId>,
    pub created_assets: Vec<AssetId>,
}

/// Application view returned by the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub id: AppId,
    pub address: Address,
    pub params: ApplicationRecord,
}

/// Asset view returned by the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub id: AssetId,
    pub creator: Address,
    pub params: AssetParams,
}

/// Node status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub last_round: u64,
}

/// Parameters a client needs to build a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedParams {
    pub fee: u64,
    pub first_valid: u64,
    pub last_valid: u64,
    pub genesis_id: String,
}

/// Header of a produced block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub round: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub txids: Vec<TxId>,
}

/// One inner transaction issued by an application while a call executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerTxnRecord {
    pub sender: Address,
    pub kind: crate::ledger::transaction::TxnKind,
}

/// Effects of applying one transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyData {
    pub application_index: Option<AppId>,
    pub asset_index: Option<AssetId>,
    pub closing_amount: Option<u64>,
    pub inner_txns: Vec<InnerTxnRecord>,
    /// Global state after the call, for application calls
    pub global_state: Option<GlobalState>,
}

/// Application account state recorded after each confirmed group that touched it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSnapshot {
    pub round: u64,
    /// Id of the group's application call, or its first transaction
    pub txid: TxId,
    /// Method name, on-completion action or transaction type that caused the change
    pub action: String,
    pub global_state: GlobalState,
    pub balance: u64,
    #[serde(default)]
    pub holdings: BTreeMap<AssetId, u64>,
    #[serde(default)]
    pub deleted: bool,
}

/// Pool/confirmation status of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub txid: TxId,
    pub txn: crate::ledger::transaction::Transaction,
    /// Non-empty when the group failed as its round was produced
    pub pool_error: String,
    pub confirmed_round: Option<u64>,
    #[serde(default)]
    pub apply: ApplyData,
}

impl PendingTransaction {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_round.unwrap_or(0) > 0
    }

    pub fn application_index(&self) -> Option<AppId> {
        self.apply.application_index
    }

    pub fn asset_index(&self) -> Option<AssetId> {
        self.apply.asset_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_hex_roundtrip() {
        let addr = Address([7u8; 32]);
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(parsed, addr);
        assert!("abcd".parse::<Address>().is_err());
    }

    #[test]
    fn test_application_address_is_stable_and_distinct() {
        let a = Address::for_application(AppId(1));
        assert_eq!(a, AppId(1).address());
        assert_ne!(a, Address::for_application(AppId(2)));
    }

    #[test]
    fn test_global_state_absent_keys_read_as_zero() {
        let mut state = GlobalState::new();
        assert_eq!(state.uint(b"price"), 0);
        assert!(state.bytes(b"seller").is_empty());

        state.insert(b"price", StateValue::Uint(1_000_000));
        state.insert(b"seller", StateValue::Bytes(vec![1; 32]));
        assert_eq!(state.uint(b"price"), 1_000_000);
        assert_eq!(state.bytes(b"seller"), &[1u8; 32][..]);
        assert_eq!(state.slot_usage(), (1, 1));
    }

    #[test]
    fn test_global_state_serialization() {
        let mut state = GlobalState::new();
        state.insert(b"nft_id", StateValue::Uint(42));
        state.insert(b"current_name", StateValue::Bytes(b"Sasha".to_vec()));

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"nft_id\""));
        let back: GlobalState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);

        state.insert(&[0xff, 0xfe], StateValue::Uint(1));
        assert!(serde_json::to_string(&state).is_err());
    }

    #[test]
    fn test_schema_min_balance() {
        assert_eq!(StateSchema::new(4, 2).min_balance(), 4 * 28_500 + 2 * 50_000);
    }

    #[test]
    fn test_state_value_display() {
        assert_eq!(StateValue::Uint(5).to_string(), "5");
        assert_eq!(StateValue::Bytes(b"Sasha".to_vec()).to_string(), "\"Sasha\"");
        assert!(StateValue::Bytes(vec![0; 32]).to_string().starts_with("0x"));
    }
}

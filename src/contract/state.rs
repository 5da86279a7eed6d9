//! Escrow state as seen from outside the program

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::contract::escrow::{BUYER_KEY, NFT_ID_KEY, PRICE_KEY, SELLER_KEY, STATUS_KEY};
use crate::ledger::{Address, AssetId, GlobalState};
use crate::{Error, Result};

/// Value of the `status` global
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Listed = 1,
    Sold = 2,
}

impl SaleStatus {
    pub fn from_uint(value: u64) -> Option<Self> {
        match value {
            1 => Some(SaleStatus::Listed),
            2 => Some(SaleStatus::Sold),
            _ => None,
        }
    }

    pub fn as_uint(self) -> u64 {
        self as u64
    }
}

/// Typed view over the escrow's global state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub seller: Option<Address>,
    pub buyer: Option<Address>,
    pub nft_id: AssetId,
    pub price: u64,
    pub status: Option<SaleStatus>,
}

impl EscrowRecord {
    /// Read the record. Absent keys read as zero or empty.
    pub fn from_global_state(state: &GlobalState) -> Result<Self> {
        let status = match state.uint(STATUS_KEY) {
            0 => None,
            other => Some(SaleStatus::from_uint(other).ok_or_else(|| {
                Error::rejected(format!("unknown sale status {}", other))
            })?),
        };
        Ok(Self {
            seller: optional_address(state.bytes(SELLER_KEY))?,
            buyer: optional_address(state.bytes(BUYER_KEY))?,
            nft_id: AssetId(state.uint(NFT_ID_KEY)),
            price: state.uint(PRICE_KEY),
            status,
        })
    }

    pub fn is_listed(&self) -> bool {
        self.status == Some(SaleStatus::Listed)
    }
}

fn optional_address(bytes: &[u8]) -> Result<Option<Address>> {
    if bytes.is_empty() {
        Ok(None)
    } else {
        Address::from_bytes(bytes)
            .map(Some)
            .map_err(|e| Error::rejected(e.to_string()))
    }
}

/// Lifecycle position of an escrow, derived from its globals and holdings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowState {
    /// Created, no sale recorded yet
    Uninitialized,
    /// Listed and opted in, NFT not yet transferred to the escrow
    AwaitingDeposit,
    /// Listed with the NFT held by the escrow
    HoldingAsset,
    Sold,
    Deleted,
}

impl EscrowState {
    /// `holding` is the escrow's balance of the recorded NFT, `None` if not opted in
    pub fn derive(record: &EscrowRecord, holding: Option<u64>, deleted: bool) -> Self {
        if deleted {
            return EscrowState::Deleted;
        }
        match record.status {
            None => EscrowState::Uninitialized,
            Some(SaleStatus::Sold) => EscrowState::Sold,
            Some(SaleStatus::Listed) if holding.unwrap_or(0) > 0 => EscrowState::HoldingAsset,
            Some(SaleStatus::Listed) => EscrowState::AwaitingDeposit,
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            EscrowState::Uninitialized => "lightblue",
            EscrowState::AwaitingDeposit => "yellow",
            EscrowState::HoldingAsset => "lightgreen",
            EscrowState::Sold => "green",
            EscrowState::Deleted => "gray",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EscrowState::Uninitialized => "Uninitialized",
            EscrowState::AwaitingDeposit => "AwaitingDeposit",
            EscrowState::HoldingAsset => "HoldingAsset",
            EscrowState::Sold => "Sold",
            EscrowState::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for EscrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::StateValue;

    fn listed_state() -> GlobalState {
        let mut state = GlobalState::new();
        state.insert(SELLER_KEY, StateValue::Bytes(vec![1u8; 32]));
        state.insert(NFT_ID_KEY, StateValue::Uint(42));
        state.insert(PRICE_KEY, StateValue::Uint(1_000_000));
        state.insert(STATUS_KEY, StateValue::Uint(SaleStatus::Listed.as_uint()));
        state
    }

    #[test]
    fn test_record_from_empty_state() {
        let record = EscrowRecord::from_global_state(&GlobalState::new()).unwrap();
        assert_eq!(record, EscrowRecord::default());
        assert!(!record.is_listed());
    }

    #[test]
    fn test_record_from_listed_state() {
        let record = EscrowRecord::from_global_state(&listed_state()).unwrap();
        assert_eq!(record.seller, Some(Address([1u8; 32])));
        assert_eq!(record.buyer, None);
        assert_eq!(record.nft_id, AssetId(42));
        assert_eq!(record.price, 1_000_000);
        assert!(record.is_listed());
    }

    #[test]
    fn test_record_rejects_bad_values() {
        let mut state = listed_state();
        state.insert(STATUS_KEY, StateValue::Uint(7));
        assert!(EscrowRecord::from_global_state(&state).is_err());

        let mut state = listed_state();
        state.insert(SELLER_KEY, StateValue::Bytes(vec![1, 2, 3]));
        assert!(EscrowRecord::from_global_state(&state).is_err());
    }

    #[test]
    fn test_derive_lifecycle() {
        let empty = EscrowRecord::default();
        assert_eq!(EscrowState::derive(&empty, None, false), EscrowState::Uninitialized);

        let listed = EscrowRecord::from_global_state(&listed_state()).unwrap();
        assert_eq!(EscrowState::derive(&listed, Some(0), false), EscrowState::AwaitingDeposit);
        assert_eq!(EscrowState::derive(&listed, Some(1), false), EscrowState::HoldingAsset);

        let sold = EscrowRecord {
            status: Some(SaleStatus::Sold),
            ..listed
        };
        assert_eq!(EscrowState::derive(&sold, None, false), EscrowState::Sold);
        assert_eq!(EscrowState::derive(&sold, None, true), EscrowState::Deleted);
    }
}

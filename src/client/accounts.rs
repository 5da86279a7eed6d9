//! Signing accounts and the role credential table

use secp256k1::{Keypair, Message, Secp256k1};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::Config;
use crate::ledger::{Address, SignedTransaction, Transaction, blake2b_256};
use crate::{Error, Result};

/// Participants of the sale
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Creator,
    Seller,
    Buyer,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Creator, Role::Seller, Role::Buyer];

    pub fn name(&self) -> &'static str {
        match self {
            Role::Creator => "creator",
            Role::Seller => "seller",
            Role::Buyer => "buyer",
        }
    }

    /// Environment variable holding the role's secret key
    pub fn env_var(&self) -> &'static str {
        match self {
            Role::Creator => "CREATOR_SK",
            Role::Seller => "SELLER_SK",
            Role::Buyer => "BUYER_SK",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A Schnorr keypair and the address it controls
#[derive(Clone)]
pub struct Account {
    keypair: Keypair,
    address: Address,
}

impl Account {
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self> {
        let secp = Secp256k1::signing_only();
        let keypair = Keypair::from_seckey_slice(&secp, secret)?;
        let (xonly, _parity) = keypair.x_only_public_key();
        Ok(Self {
            keypair,
            address: Address(xonly.serialize()),
        })
    }

    pub fn from_secret_hex(secret: &str) -> Result<Self> {
        Self::from_secret_bytes(&hex::decode(secret.trim())?)
    }

    /// Deterministic key for running without configured credentials
    pub fn demo(role: Role) -> Result<Self> {
        let seed = blake2b_256(format!("nft-escrow demo {}", role.name()).as_bytes());
        Self::from_secret_bytes(&seed)
    }

    /// Fresh random key
    pub fn generate() -> Result<Self> {
        Self::from_secret_bytes(&rand::random::<[u8; 32]>())
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Hex secret key, for writing into a config file
    pub fn secret_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }

    /// Sign a transaction sent from this account
    pub fn sign(&self, txn: Transaction) -> Result<SignedTransaction> {
        if txn.sender != self.address {
            return Err(Error::Signature(format!(
                "account {} cannot sign for sender {}",
                self.address.short(),
                txn.sender.short()
            )));
        }
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest(txn.id()?.0);
        let signature = secp.sign_schnorr_no_aux_rand(&message, &self.keypair);
        Ok(SignedTransaction {
            txn,
            signature: signature.serialize().to_vec(),
        })
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Keys for every role
#[derive(Debug, Clone)]
pub struct Credentials {
    creator: Account,
    seller: Account,
    buyer: Account,
}

impl Credentials {
    pub fn new(creator: Account, seller: Account, buyer: Account) -> Self {
        Self {
            creator,
            seller,
            buyer,
        }
    }

    /// Configured or environment keys, falling back to the demo key per role
    pub fn from_config(config: &Config) -> Result<Self> {
        let load = |role: Role| match config.account_secret(role) {
            Some(secret) => Account::from_secret_hex(&secret).map_err(|e| {
                Error::Config(format!("invalid {} secret key: {}", role, e))
            }),
            None => {
                tracing::debug!("Using demo key for {}", role);
                Account::demo(role)
            }
        };
        Ok(Self::new(
            load(Role::Creator)?,
            load(Role::Seller)?,
            load(Role::Buyer)?,
        ))
    }

    pub fn demo() -> Result<Self> {
        Ok(Self::new(
            Account::demo(Role::Creator)?,
            Account::demo(Role::Seller)?,
            Account::demo(Role::Buyer)?,
        ))
    }

    pub fn account(&self, role: Role) -> &Account {
        match role {
            Role::Creator => &self.creator,
            Role::Seller => &self.seller,
            Role::Buyer => &self.buyer,
        }
    }

    pub fn address(&self, role: Role) -> Address {
        self.account(role).address()
    }

    /// Role whose account controls `address`, if any
    pub fn role_of(&self, address: &Address) -> Option<Role> {
        Role::ALL
            .into_iter()
            .find(|role| self.address(*role) == *address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SuggestedParams;

    fn params() -> SuggestedParams {
        SuggestedParams {
            fee: 1_000,
            first_valid: 0,
            last_valid: 1_000,
            genesis_id: "sim".to_string(),
        }
    }

    #[test]
    fn test_demo_keys_are_stable_and_distinct() {
        let a = Credentials::demo().unwrap();
        let b = Credentials::demo().unwrap();
        for role in Role::ALL {
            assert_eq!(a.address(role), b.address(role));
        }
        assert_ne!(a.address(Role::Seller), a.address(Role::Buyer));
        assert_eq!(a.role_of(&a.address(Role::Buyer)), Some(Role::Buyer));
        assert_eq!(a.role_of(&Address([0; 32])), None);
    }

    #[test]
    fn test_sign_and_verify() {
        let account = Account::generate().unwrap();
        let txn = Transaction::payment(account.address(), &params(), Address([1; 32]), 10);
        let signed = account.sign(txn).unwrap();
        signed.verify().unwrap();

        let mut tampered = signed.clone();
        tampered.txn.fee += 1;
        assert!(tampered.verify().is_err());
    }

    #[test]
    fn test_cannot_sign_for_other_sender() {
        let account = Account::generate().unwrap();
        let txn = Transaction::payment(Address([1; 32]), &params(), account.address(), 10);
        assert!(matches!(account.sign(txn), Err(Error::Signature(_))));
    }

    #[test]
    fn test_secret_hex_roundtrip() {
        let account = Account::generate().unwrap();
        let restored = Account::from_secret_hex(&account.secret_hex()).unwrap();
        assert_eq!(restored.address(), account.address());
        assert!(Account::from_secret_hex("zz").is_err());
    }
}

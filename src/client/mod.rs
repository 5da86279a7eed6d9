//! Client module - builds, signs, submits and confirms transactions
//!
//! A [`Session`] bundles everything the workflow needs: the node, the role
//! credentials, the program cache and the confirmation wait budget.

use std::sync::Arc;

use crate::config::{Config, SaleConfig};
use crate::contract::{CompiledProgram, EscrowVariant, Program};
use crate::ledger::{
    Node, PendingTransaction, SignedTransaction, SuggestedParams, Transaction, assign_group_id,
};
use crate::Result;

pub mod accounts;
pub mod cache;
pub mod operations;
pub mod wait;

pub use accounts::{Account, Credentials, Role};
pub use cache::ProgramCache;
pub use operations::{Balances, DemoOptions, DemoReport, ESCROW_FUNDING};
pub use wait::wait_for_confirmation;

/// Default confirmation budget in rounds
pub const DEFAULT_WAIT_ROUNDS: u64 = 10;

pub struct Session {
    node: Arc<dyn Node>,
    credentials: Credentials,
    programs: ProgramCache,
    wait_rounds: u64,
    sale: SaleConfig,
}

impl Session {
    pub fn new(node: Arc<dyn Node>, credentials: Credentials) -> Self {
        Self {
            node,
            credentials,
            programs: ProgramCache::new(),
            wait_rounds: DEFAULT_WAIT_ROUNDS,
            sale: SaleConfig::default(),
        }
    }

    pub fn from_config(node: Arc<dyn Node>, config: &Config) -> Result<Self> {
        Ok(Self::new(node, Credentials::from_config(config)?)
            .with_wait_rounds(config.node.wait_rounds)
            .with_sale(config.sale.clone()))
    }

    pub fn with_wait_rounds(mut self, rounds: u64) -> Self {
        self.wait_rounds = rounds;
        self
    }

    pub fn with_sale(mut self, sale: SaleConfig) -> Self {
        self.sale = sale;
        self
    }

    pub fn node(&self) -> &dyn Node {
        self.node.as_ref()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn sale(&self) -> &SaleConfig {
        &self.sale
    }

    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    /// Escrow program compiled with this session's options
    pub fn escrow_program(&self) -> Program {
        Program::Escrow(EscrowVariant {
            require_grouped_payment: self.sale.require_grouped_payment,
        })
    }

    /// Approval and clear programs for the escrow, compiled once per session
    pub async fn compile_programs(&self) -> Result<(CompiledProgram, CompiledProgram)> {
        let approval = self
            .programs
            .get_or_compile(self.node(), self.escrow_program())
            .await?;
        let clear = self
            .programs
            .get_or_compile(self.node(), Program::ClearState)
            .await?;
        Ok((approval, clear))
    }

    pub(crate) async fn params(&self) -> Result<SuggestedParams> {
        self.node.suggested_params().await
    }

    /// Sign one transaction as `role`, submit it and wait for confirmation
    pub async fn submit(&self, role: Role, txn: Transaction) -> Result<PendingTransaction> {
        let signed = self.credentials.account(role).sign(txn)?;
        self.send_and_wait(vec![signed]).await
    }

    /// Group transactions atomically, sign each with its role, submit and wait
    pub async fn submit_group(
        &self,
        members: Vec<(Role, Transaction)>,
    ) -> Result<PendingTransaction> {
        let (roles, mut txns): (Vec<Role>, Vec<Transaction>) = members.into_iter().unzip();
        let gid = assign_group_id(&mut txns)?;
        tracing::debug!("Assigned group id {} to {} transactions", gid, txns.len());
        let signed = roles
            .into_iter()
            .zip(txns)
            .map(|(role, txn)| self.credentials.account(role).sign(txn))
            .collect::<Result<Vec<_>>>()?;
        self.send_and_wait(signed).await
    }

    async fn send_and_wait(&self, group: Vec<SignedTransaction>) -> Result<PendingTransaction> {
        let txid = self.node.send_transactions(&group).await?;
        tracing::debug!("Submitted {} ({} in group)", txid, group.len());
        wait_for_confirmation(self.node(), &txid, self.wait_rounds).await
    }
}

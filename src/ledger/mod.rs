//! Ledger module - the remote source of truth
//!
//! This module provides:
//! - The [`LedgerClient`] contract the coordinator consumes
//! - Contract ABIs and event topics for ProfileManager, Matchmaker and EscrowChat
//! - An EVM JSON-RPC implementation with multi-RPC failover

pub mod abi;
pub mod evm;

pub use evm::EvmLedgerClient;

use crate::error::CoordinatorResult;
use crate::tracker::MutationKind;

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Log, H256, U256};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// The three contracts the coordinator talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractKind {
    ProfileManager,
    Matchmaker,
    EscrowChat,
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContractKind::ProfileManager => "profile_manager",
            ContractKind::Matchmaker => "matchmaker",
            ContractKind::EscrowChat => "escrow_chat",
        };
        f.write_str(name)
    }
}

/// A view-function call
#[derive(Debug, Clone, PartialEq)]
pub struct ReadCall {
    pub contract: ContractKind,
    pub function: &'static str,
    pub args: Vec<Token>,
}

/// A state-changing call to be signed and sent
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub kind: MutationKind,
    pub contract: ContractKind,
    pub function: &'static str,
    pub args: Vec<Token>,
    /// Native value attached to the call, in wei
    pub value: Option<U256>,
}

/// Correlation handle returned once the ledger accepts a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmissionHandle {
    pub kind: MutationKind,
    pub correlation: Uuid,
    pub tx_hash: H256,
}

impl SubmissionHandle {
    pub fn tx_hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.tx_hash.as_bytes()))
    }
}

/// Remote ledger as seen by the coordinator
///
/// `submit` resolves once the ledger has accepted the mutation into its pending set;
/// `await_outcome` resolves once it is confirmed (`Ok`) or rejected
/// (`Err(MutationRejected)` carrying the ledger's message).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn call(&self, call: &ReadCall) -> CoordinatorResult<Vec<Token>>;

    async fn submit(&self, mutation: &Mutation) -> CoordinatorResult<SubmissionHandle>;

    async fn await_outcome(&self, handle: &SubmissionHandle) -> CoordinatorResult<()>;

    async fn block_number(&self) -> CoordinatorResult<u64>;

    /// `MatchCreated` logs in the inclusive block range
    async fn match_logs(&self, from_block: u64, to_block: u64) -> CoordinatorResult<Vec<Log>>;
}

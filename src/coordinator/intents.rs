//! User intents and their ledger mutations

use super::session::ActiveMatch;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::ledger::{ContractKind, Mutation};
use crate::tracker::MutationKind;

use ethers::abi::Token;
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const POOL_TOO_SMALL: &str = "Not enough users in the pool to match.";

/// A mutating action requested by the user
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    MintProfile {
        gender: u8,
        preferred: u8,
        age: u64,
        interests_hash: String,
    },
    JoinPool,
    Deposit,
    Accept,
    ExchangeSocials {
        contact: String,
    },
    RequestMatchmaking,
}

impl Intent {
    pub fn kind(&self) -> MutationKind {
        match self {
            Intent::MintProfile { .. } => MutationKind::MintProfile,
            Intent::JoinPool => MutationKind::JoinPool,
            Intent::Deposit => MutationKind::Deposit,
            Intent::Accept => MutationKind::Accept,
            Intent::ExchangeSocials { .. } => MutationKind::ExchangeSocials,
            Intent::RequestMatchmaking => MutationKind::RequestMatchmaking,
        }
    }

    /// Build the ledger mutation. Match-scoped intents need an active match.
    pub fn to_mutation(
        &self,
        pointer: Option<ActiveMatch>,
        deposit_wei: U256,
    ) -> CoordinatorResult<Mutation> {
        let kind = self.kind();
        let match_arg = || -> CoordinatorResult<Token> {
            pointer
                .map(|active| Token::Uint(active.match_id.as_u256()))
                .ok_or(CoordinatorError::NoActiveMatch)
        };

        let (contract, function, args, value) = match self {
            Intent::MintProfile {
                gender,
                preferred,
                age,
                interests_hash,
            } => (
                ContractKind::ProfileManager,
                "mintProfile",
                vec![
                    Token::Uint(U256::from(*gender)),
                    Token::Uint(U256::from(*preferred)),
                    Token::Uint(U256::from(*age)),
                    Token::String(interests_hash.clone()),
                ],
                None,
            ),
            Intent::JoinPool => (ContractKind::Matchmaker, "enterMatchingPool", vec![], None),
            Intent::Deposit => (
                ContractKind::EscrowChat,
                "deposit",
                vec![match_arg()?],
                Some(deposit_wei),
            ),
            Intent::Accept => (ContractKind::EscrowChat, "acceptMatch", vec![match_arg()?], None),
            Intent::ExchangeSocials { contact } => {
                let contact = contact.trim();
                if contact.is_empty() {
                    return Err(CoordinatorError::Precondition(
                        "Contact details cannot be empty".to_string(),
                    ));
                }
                (
                    ContractKind::EscrowChat,
                    "exchangeSocials",
                    vec![match_arg()?, Token::String(contact.to_string())],
                    None,
                )
            }
            Intent::RequestMatchmaking => {
                (ContractKind::Matchmaker, "requestMatchmaking", vec![], None)
            }
        };

        Ok(Mutation {
            kind,
            contract,
            function,
            args,
            value,
        })
    }
}

/// Acknowledgement returned to the caller of an intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IntentAck {
    Submitted { kind: MutationKind, attempt: Uuid },
    /// The same kind is already submitting or confirming; nothing was sent
    AlreadyInFlight { kind: MutationKind },
}

//! Cache keys and the view call each one maps to

use crate::ids::{MatchId, TokenId};
use crate::ledger::{ContractKind, ReadCall};

use ethers::abi::Token;
use ethers::types::Address;
use serde::Serialize;
use std::fmt;

/// Remote entity kinds the reader can cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    OwnedProfile,
    Profile,
    PoolMembership,
    PoolSize,
    MatchCounter,
    Participants,
    Escrow,
    Contact,
    Administrator,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::OwnedProfile,
        EntityKind::Profile,
        EntityKind::PoolMembership,
        EntityKind::PoolSize,
        EntityKind::MatchCounter,
        EntityKind::Participants,
        EntityKind::Escrow,
        EntityKind::Contact,
        EntityKind::Administrator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::OwnedProfile => "owned_profile",
            EntityKind::Profile => "profile",
            EntityKind::PoolMembership => "pool_membership",
            EntityKind::PoolSize => "pool_size",
            EntityKind::MatchCounter => "match_counter",
            EntityKind::Participants => "participants",
            EntityKind::Escrow => "escrow",
            EntityKind::Contact => "contact",
            EntityKind::Administrator => "administrator",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable cache key: entity kind plus its arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    OwnedProfile(Address),
    Profile(TokenId),
    PoolMembership(TokenId),
    PoolSize,
    MatchCounter,
    Participants(MatchId),
    Escrow(MatchId),
    Contact(MatchId, TokenId),
    Administrator,
}

impl CacheKey {
    pub fn kind(&self) -> EntityKind {
        match self {
            CacheKey::OwnedProfile(_) => EntityKind::OwnedProfile,
            CacheKey::Profile(_) => EntityKind::Profile,
            CacheKey::PoolMembership(_) => EntityKind::PoolMembership,
            CacheKey::PoolSize => EntityKind::PoolSize,
            CacheKey::MatchCounter => EntityKind::MatchCounter,
            CacheKey::Participants(_) => EntityKind::Participants,
            CacheKey::Escrow(_) => EntityKind::Escrow,
            CacheKey::Contact(..) => EntityKind::Contact,
            CacheKey::Administrator => EntityKind::Administrator,
        }
    }

    /// The view call that fetches this entity
    pub fn call(&self) -> ReadCall {
        let (contract, function, args) = match self {
            CacheKey::OwnedProfile(owner) => (
                ContractKind::ProfileManager,
                "ownerToTokenId",
                vec![Token::Address(*owner)],
            ),
            CacheKey::Profile(token) => (
                ContractKind::ProfileManager,
                "getProfile",
                vec![Token::Uint(token.as_u256())],
            ),
            CacheKey::PoolMembership(token) => (
                ContractKind::Matchmaker,
                "isInPool",
                vec![Token::Uint(token.as_u256())],
            ),
            CacheKey::PoolSize => (ContractKind::Matchmaker, "getMatchingPoolSize", vec![]),
            CacheKey::MatchCounter => (ContractKind::Matchmaker, "matchCounter", vec![]),
            CacheKey::Participants(match_id) => (
                ContractKind::Matchmaker,
                "matches",
                vec![Token::Uint(match_id.as_u256())],
            ),
            CacheKey::Escrow(match_id) => (
                ContractKind::EscrowChat,
                "escrows",
                vec![Token::Uint(match_id.as_u256())],
            ),
            CacheKey::Contact(match_id, token) => (
                ContractKind::EscrowChat,
                "socialsOf",
                vec![Token::Uint(match_id.as_u256()), Token::Uint(token.as_u256())],
            ),
            CacheKey::Administrator => (ContractKind::Matchmaker, "owner", vec![]),
        };

        ReadCall {
            contract,
            function,
            args,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::OwnedProfile(owner) => write!(f, "owned_profile({:?})", owner),
            CacheKey::Profile(token) => write!(f, "profile({})", token),
            CacheKey::PoolMembership(token) => write!(f, "pool_membership({})", token),
            CacheKey::Participants(id) => write!(f, "participants({})", id),
            CacheKey::Escrow(id) => write!(f, "escrow({})", id),
            CacheKey::Contact(id, token) => write!(f, "contact({}, {})", id, token),
            other => f.write_str(other.kind().as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::abi::contract_abi;

    #[test]
    fn test_every_key_targets_an_existing_function() {
        let keys = vec![
            CacheKey::OwnedProfile(Address::repeat_byte(1)),
            CacheKey::Profile(TokenId::from(7)),
            CacheKey::PoolMembership(TokenId::from(7)),
            CacheKey::PoolSize,
            CacheKey::MatchCounter,
            CacheKey::Participants(MatchId::from(3)),
            CacheKey::Escrow(MatchId::from(3)),
            CacheKey::Contact(MatchId::from(3), TokenId::from(9)),
            CacheKey::Administrator,
        ];

        for key in keys {
            let call = key.call();
            let abi = contract_abi(call.contract).unwrap();
            let function = abi.function(call.function).unwrap();
            function.encode_input(&call.args).unwrap();
        }
    }

    #[test]
    fn test_keys_with_different_args_differ() {
        assert_ne!(
            CacheKey::Escrow(MatchId::from(3)),
            CacheKey::Escrow(MatchId::from(4))
        );
        assert_eq!(CacheKey::Escrow(MatchId::from(3)).kind(), EntityKind::Escrow);
    }
}

//! Contract interfaces and event topic signatures

use super::ContractKind;
use crate::error::{CoordinatorError, CoordinatorResult};

use ethers::abi::{parse_abi, Abi};
use ethers::types::H256;
use lazy_static::lazy_static;
use sha3::{Digest, Keccak256};

pub const PROFILE_MANAGER_ABI: &[&str] = &[
    "function mintProfile(uint8 gender, uint8 preferred, uint256 age, string interestsHash)",
    "function getProfile(uint256 tokenId) view returns (uint8 gender, uint8 preferred, uint256 age, string interestsHash)",
    "function ownerToTokenId(address owner) view returns (uint256)",
];

pub const MATCHMAKER_ABI: &[&str] = &[
    "function enterMatchingPool()",
    "function requestMatchmaking()",
    "function getMatchingPoolSize() view returns (uint256)",
    "function isInPool(uint256 tokenId) view returns (bool)",
    "function matchCounter() view returns (uint256)",
    "function matches(uint256 matchId) view returns (uint256 userA, uint256 userB)",
    "function owner() view returns (address)",
    "event MatchCreated(uint256 indexed matchId, uint256 indexed userA, uint256 indexed userB)",
];

pub const ESCROW_CHAT_ABI: &[&str] = &[
    "function deposit(uint256 matchId) payable",
    "function acceptMatch(uint256 matchId)",
    "function exchangeSocials(uint256 matchId, string contact)",
    "function escrows(uint256 matchId) view returns (bool depositedA, bool depositedB, bool acceptedA, bool acceptedB)",
    "function socialsOf(uint256 matchId, uint256 tokenId) view returns (string)",
];

pub const MATCH_CREATED_SIGNATURE: &str = "MatchCreated(uint256,uint256,uint256)";

/// keccak256 of an event signature
pub fn event_topic(signature: &str) -> H256 {
    H256::from_slice(&Keccak256::digest(signature.as_bytes()))
}

lazy_static! {
    pub static ref MATCH_CREATED: H256 = event_topic(MATCH_CREATED_SIGNATURE);
}

/// Parsed ABI for one of the contracts
pub fn contract_abi(contract: ContractKind) -> CoordinatorResult<Abi> {
    let signatures = match contract {
        ContractKind::ProfileManager => PROFILE_MANAGER_ABI,
        ContractKind::Matchmaker => MATCHMAKER_ABI,
        ContractKind::EscrowChat => ESCROW_CHAT_ABI,
    };

    parse_abi(signatures)
        .map_err(|e| CoordinatorError::Config(format!("Invalid {} ABI: {}", contract, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_abis_parse() {
        for contract in [
            ContractKind::ProfileManager,
            ContractKind::Matchmaker,
            ContractKind::EscrowChat,
        ] {
            contract_abi(contract).unwrap();
        }
    }

    #[test]
    fn test_match_created_topic_matches_abi() {
        let abi = contract_abi(ContractKind::Matchmaker).unwrap();
        let event = abi.event("MatchCreated").unwrap();
        assert_eq!(event.signature(), *MATCH_CREATED);
    }
}

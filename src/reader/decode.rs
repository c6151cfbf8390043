//! Decoders from ABI tokens to typed entity values

use super::keys::CacheKey;
use crate::ids::{ProfileStatus, TokenId};

use ethers::abi::Token;
use ethers::types::{Address, U256};
use serde::Serialize;

/// On-chain profile record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub gender: u8,
    pub preferred: u8,
    pub age: u64,
    pub interests_hash: String,
}

/// Escrow flags for a match, as reported by the ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EscrowState {
    pub deposited_a: bool,
    pub deposited_b: bool,
    pub accepted_a: bool,
    pub accepted_b: bool,
}

impl EscrowState {
    pub fn both_deposited(&self) -> bool {
        self.deposited_a && self.deposited_b
    }

    pub fn both_accepted(&self) -> bool {
        self.accepted_a && self.accepted_b
    }
}

/// Decoded value of a cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityValue {
    OwnedProfile(ProfileStatus),
    Profile(Profile),
    InPool(bool),
    PoolSize(U256),
    MatchCounter(U256),
    Participants { user_a: TokenId, user_b: TokenId },
    Escrow(EscrowState),
    Contact(String),
    Administrator(Address),
}

impl EntityValue {
    pub fn as_profile_status(&self) -> Option<ProfileStatus> {
        match self {
            EntityValue::OwnedProfile(status) => Some(*status),
            _ => None,
        }
    }

    pub fn as_profile(&self) -> Option<&Profile> {
        match self {
            EntityValue::Profile(profile) => Some(profile),
            _ => None,
        }
    }

    pub fn as_in_pool(&self) -> Option<bool> {
        match self {
            EntityValue::InPool(in_pool) => Some(*in_pool),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<U256> {
        match self {
            EntityValue::PoolSize(n) | EntityValue::MatchCounter(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_participants(&self) -> Option<(TokenId, TokenId)> {
        match self {
            EntityValue::Participants { user_a, user_b } => Some((*user_a, *user_b)),
            _ => None,
        }
    }

    pub fn as_escrow(&self) -> Option<EscrowState> {
        match self {
            EntityValue::Escrow(escrow) => Some(*escrow),
            _ => None,
        }
    }

    pub fn as_contact(&self) -> Option<&str> {
        match self {
            EntityValue::Contact(contact) => Some(contact),
            _ => None,
        }
    }

    pub fn as_administrator(&self) -> Option<Address> {
        match self {
            EntityValue::Administrator(address) => Some(*address),
            _ => None,
        }
    }
}

/// Decode the output tokens of `key`'s view call
pub fn decode(key: &CacheKey, tokens: Vec<Token>) -> Result<EntityValue, String> {
    // Multi-value returns may arrive wrapped in a single tuple
    let tokens = match <[Token; 1]>::try_from(tokens) {
        Ok([Token::Tuple(inner)]) => inner,
        Ok([single]) => vec![single],
        Err(tokens) => tokens,
    };

    match key {
        CacheKey::OwnedProfile(_) => {
            let [raw] = expect::<1>(tokens)?;
            Ok(EntityValue::OwnedProfile(ProfileStatus::from_raw(uint(&raw, "tokenId")?)))
        }
        CacheKey::Profile(_) => {
            let [gender, preferred, age, interests] = expect::<4>(tokens)?;
            Ok(EntityValue::Profile(Profile {
                gender: small(&gender, "gender")?,
                preferred: small(&preferred, "preferred")?,
                age: u64_field(&age, "age")?,
                interests_hash: string(&interests, "interestsHash")?,
            }))
        }
        CacheKey::PoolMembership(_) => {
            let [flag] = expect::<1>(tokens)?;
            Ok(EntityValue::InPool(boolean(&flag, "isInPool")?))
        }
        CacheKey::PoolSize => {
            let [size] = expect::<1>(tokens)?;
            Ok(EntityValue::PoolSize(uint(&size, "poolSize")?))
        }
        CacheKey::MatchCounter => {
            let [counter] = expect::<1>(tokens)?;
            Ok(EntityValue::MatchCounter(uint(&counter, "matchCounter")?))
        }
        CacheKey::Participants(_) => {
            let [a, b] = expect::<2>(tokens)?;
            Ok(EntityValue::Participants {
                user_a: TokenId(uint(&a, "userA")?),
                user_b: TokenId(uint(&b, "userB")?),
            })
        }
        CacheKey::Escrow(_) => {
            let [deposited_a, deposited_b, accepted_a, accepted_b] = expect::<4>(tokens)?;
            Ok(EntityValue::Escrow(EscrowState {
                deposited_a: boolean(&deposited_a, "depositedA")?,
                deposited_b: boolean(&deposited_b, "depositedB")?,
                accepted_a: boolean(&accepted_a, "acceptedA")?,
                accepted_b: boolean(&accepted_b, "acceptedB")?,
            }))
        }
        CacheKey::Contact(..) => {
            let [contact] = expect::<1>(tokens)?;
            Ok(EntityValue::Contact(string(&contact, "contact")?))
        }
        CacheKey::Administrator => {
            let [owner] = expect::<1>(tokens)?;
            match owner {
                Token::Address(address) => Ok(EntityValue::Administrator(address)),
                other => Err(format!("owner: expected address, got {:?}", other)),
            }
        }
    }
}

fn expect<const N: usize>(tokens: Vec<Token>) -> Result<[Token; N], String> {
    let len = tokens.len();
    <[Token; N]>::try_from(tokens).map_err(|_| format!("expected {} value(s), got {}", N, len))
}

fn uint(token: &Token, field: &str) -> Result<U256, String> {
    match token {
        Token::Uint(value) => Ok(*value),
        other => Err(format!("{}: expected uint, got {:?}", field, other)),
    }
}

fn u64_field(token: &Token, field: &str) -> Result<u64, String> {
    let value = uint(token, field)?;
    if value > U256::from(u64::MAX) {
        return Err(format!("{}: value {} out of range", field, value));
    }
    Ok(value.as_u64())
}

fn small(token: &Token, field: &str) -> Result<u8, String> {
    let value = uint(token, field)?;
    if value > U256::from(u8::MAX) {
        return Err(format!("{}: value {} out of range", field, value));
    }
    Ok(value.as_u32() as u8)
}

fn boolean(token: &Token, field: &str) -> Result<bool, String> {
    match token {
        Token::Bool(value) => Ok(*value),
        other => Err(format!("{}: expected bool, got {:?}", field, other)),
    }
}

fn string(token: &Token, field: &str) -> Result<String, String> {
    match token {
        Token::String(value) => Ok(value.clone()),
        other => Err(format!("{}: expected string, got {:?}", field, other)),
    }
}

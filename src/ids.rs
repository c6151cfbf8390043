//! Remote identifiers: profile tokens and match ids

use crate::store::codec::bigint;

use ethers::types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

macro_rules! bigint_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub U256);

        impl $name {
            pub fn as_u256(&self) -> U256 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(U256::from(value))
            }
        }

        impl From<U256> for $name {
            fn from(value: U256) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                bigint::serialize(&self.0, serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                bigint::deserialize(deserializer).map(Self)
            }
        }
    };
}

bigint_id!(
    /// Profile token id assigned by the profile manager contract
    TokenId
);

bigint_id!(
    /// Match id assigned by the matchmaker's monotonic counter
    MatchId
);

/// Whether an address owns a profile. Zero from the ledger means "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileStatus {
    NoProfile,
    Profile(TokenId),
}

impl ProfileStatus {
    pub fn from_raw(raw: U256) -> Self {
        if raw.is_zero() {
            ProfileStatus::NoProfile
        } else {
            ProfileStatus::Profile(TokenId(raw))
        }
    }

    pub fn token(&self) -> Option<TokenId> {
        match self {
            ProfileStatus::Profile(token) => Some(*token),
            ProfileStatus::NoProfile => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_token_means_no_profile() {
        assert_eq!(ProfileStatus::from_raw(U256::zero()), ProfileStatus::NoProfile);
        assert_eq!(
            ProfileStatus::from_raw(U256::from(7u64)),
            ProfileStatus::Profile(TokenId::from(7))
        );
        assert_eq!(ProfileStatus::NoProfile.token(), None);
    }

    #[test]
    fn test_ids_display_as_decimal() {
        let id = MatchId(U256::from(2u64).pow(U256::from(70u64)));
        assert_eq!(id.to_string(), "1180591620717411303424");
    }
}

//! Tagged encoding for integers wider than a JSON number can carry exactly
//!
//! Values are written as `{"kind": "bigint", "digits": "<decimal>"}`. Plain JSON
//! numbers written by older clients are still accepted on read as long as they fit
//! in a `u64`.

use ethers::types::U256;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Tagged {
    Bigint { digits: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Stored {
    Tagged(Tagged),
    Legacy(u64),
}

/// Serde adapter for `U256` values, usable with `#[serde(with = "...")]`
pub mod bigint {
    use super::*;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        Tagged::Bigint {
            digits: value.to_string(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        match Stored::deserialize(deserializer)? {
            Stored::Tagged(Tagged::Bigint { digits }) => parse_digits(&digits).map_err(D::Error::custom),
            Stored::Legacy(n) => Ok(U256::from(n)),
        }
    }
}

/// Parse a non-empty string of ASCII decimal digits into a `U256`
pub fn parse_digits(digits: &str) -> Result<U256, String> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid bigint digits {:?}", digits));
    }
    U256::from_dec_str(digits).map_err(|e| format!("bigint out of range: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wrapper(#[serde(with = "bigint")] U256);

    #[test]
    fn test_encodes_as_tagged_structure() {
        let value = serde_json::to_value(Wrapper(U256::from(3u64))).unwrap();
        assert_eq!(value, json!({"kind": "bigint", "digits": "3"}));
    }

    #[test]
    fn test_values_beyond_safe_range_survive_exactly() {
        // 2^53 + 1 is the first integer a double cannot hold
        let just_past_double = U256::from(9_007_199_254_740_993u64);
        let huge = U256::from(2u64).pow(U256::from(200u64)) + U256::from(7u64);

        for original in [just_past_double, huge, U256::MAX] {
            let text = serde_json::to_string(&Wrapper(original)).unwrap();
            let Wrapper(decoded) = serde_json::from_str(&text).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_legacy_number_accepted() {
        let Wrapper(decoded) = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(decoded, U256::from(42u64));
    }

    #[test]
    fn test_rejects_garbage_digits() {
        assert!(serde_json::from_value::<Wrapper>(json!({"kind": "bigint", "digits": "12a"})).is_err());
        assert!(serde_json::from_value::<Wrapper>(json!({"kind": "bigint", "digits": ""})).is_err());
        assert!(serde_json::from_value::<Wrapper>(json!({"kind": "decimal", "digits": "1"})).is_err());
    }
}

//! Match-creation events and log parsing
//!
//! The matchmaker emits `MatchCreated(matchId, userA, userB)` with all three
//! arguments indexed; older deployments emitted them unindexed in the data
//! section, so both layouts are accepted.

mod listener;

pub use listener::{EventListener, ListenerCommand};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::ids::{MatchId, TokenId};
use crate::ledger::abi::MATCH_CREATED;

use ethers::prelude::*;
use serde::Serialize;

/// A match was created between two profile tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchCreated {
    pub match_id: MatchId,
    pub token_a: TokenId,
    pub token_b: TokenId,
    pub block_number: u64,
    pub tx_hash: H256,
}

/// Events from one polled block range, in log order
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch {
    pub from_block: u64,
    pub to_block: u64,
    pub events: Vec<MatchCreated>,
}

/// Parser for matchmaker logs
#[derive(Debug, Clone, Default)]
pub struct EventParser;

impl EventParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a log entry. `Ok(None)` for logs that are not `MatchCreated`.
    pub fn parse_log(&self, log: &Log) -> CoordinatorResult<Option<MatchCreated>> {
        let Some(topic) = log.topics.first() else {
            return Err(CoordinatorError::MalformedEvent(
                "log has no topics".to_string(),
            ));
        };
        if *topic != *MATCH_CREATED {
            return Ok(None);
        }

        let block_number = log.block_number.map(|b| b.as_u64()).unwrap_or(0);
        let tx_hash = log.transaction_hash.unwrap_or_default();

        // Indexed arguments first, then 32-byte words of the data section
        let mut words: Vec<U256> = log.topics[1..]
            .iter()
            .map(|t| U256::from_big_endian(t.as_bytes()))
            .collect();
        if log.data.len() % 32 != 0 {
            return Err(CoordinatorError::MalformedEvent(format!(
                "MatchCreated data length {} in tx {:?} is not word aligned",
                log.data.len(),
                tx_hash
            )));
        }
        words.extend(log.data.chunks(32).map(U256::from_big_endian));

        let [match_id, token_a, token_b] = match <[U256; 3]>::try_from(words) {
            Ok(words) => words,
            Err(words) => {
                return Err(CoordinatorError::MalformedEvent(format!(
                    "MatchCreated in tx {:?} has {} argument word(s), expected 3",
                    tx_hash,
                    words.len()
                )))
            }
        };

        if match_id.is_zero() || token_a.is_zero() || token_b.is_zero() {
            return Err(CoordinatorError::MalformedEvent(format!(
                "MatchCreated in tx {:?} carries a zero id",
                tx_hash
            )));
        }

        Ok(Some(MatchCreated {
            match_id: MatchId(match_id),
            token_a: TokenId(token_a),
            token_b: TokenId(token_b),
            block_number,
            tx_hash,
        }))
    }
}

#[cfg(test)]
pub(crate) fn match_log(match_id: u64, token_a: u64, token_b: u64, block: u64) -> Log {
    let word = |v: u64| H256::from_low_u64_be(v);
    Log {
        topics: vec![*MATCH_CREATED, word(match_id), word(token_a), word(token_b)],
        block_number: Some(U64::from(block)),
        transaction_hash: Some(H256::repeat_byte(block as u8)),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_indexed_match_created() {
        let event = EventParser::new()
            .parse_log(&match_log(3, 7, 9, 120))
            .unwrap()
            .unwrap();
        assert_eq!(event.match_id, MatchId::from(3));
        assert_eq!(event.token_a, TokenId::from(7));
        assert_eq!(event.token_b, TokenId::from(9));
        assert_eq!(event.block_number, 120);
    }

    #[test]
    fn test_parse_unindexed_match_created() {
        let mut data = Vec::new();
        for v in [4u64, 11, 12] {
            data.extend_from_slice(H256::from_low_u64_be(v).as_bytes());
        }
        let log = Log {
            topics: vec![*MATCH_CREATED],
            data: Bytes::from(data),
            ..Default::default()
        };

        let event = EventParser::new().parse_log(&log).unwrap().unwrap();
        assert_eq!(event.match_id, MatchId::from(4));
        assert_eq!(event.token_b, TokenId::from(12));
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let mut log = match_log(3, 7, 9, 1);
        log.topics.truncate(3);

        let err = EventParser::new().parse_log(&log).unwrap_err();
        assert!(matches!(err, CoordinatorError::MalformedEvent(_)));
    }

    #[test]
    fn test_other_topics_are_skipped() {
        let log = Log {
            topics: vec![H256::repeat_byte(0x11)],
            ..Default::default()
        };
        assert_eq!(EventParser::new().parse_log(&log).unwrap(), None);
    }
}

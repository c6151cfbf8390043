//! Matchmaker event listener with bounded-range HTTP log polling

use super::{EventBatch, EventParser};
use crate::config::ListenerConfig;
use crate::error::CoordinatorResult;
use crate::ledger::LedgerClient;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Control messages accepted by the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerCommand {
    /// Restart delivery from the configured replay block
    Rewind,
}

/// Polls `MatchCreated` logs and forwards them as batches
pub struct EventListener {
    config: ListenerConfig,
    ledger: Arc<dyn LedgerClient>,
    parser: EventParser,
    batch_tx: mpsc::Sender<EventBatch>,
    /// Next block to fetch; `None` until the head is first observed
    cursor: Option<u64>,
}

impl EventListener {
    pub fn new(
        config: ListenerConfig,
        ledger: Arc<dyn LedgerClient>,
        batch_tx: mpsc::Sender<EventBatch>,
    ) -> Self {
        Self {
            config,
            ledger,
            parser: EventParser::new(),
            batch_tx,
            cursor: None,
        }
    }

    #[cfg(test)]
    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// Main polling loop
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<ListenerCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) -> CoordinatorResult<()> {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        info!(
            "Event listener started (poll every {:?}, replay from block {})",
            poll_interval, self.config.replay_from_block
        );

        loop {
            if let Err(e) = self.poll_once().await {
                if e.is_retryable() {
                    warn!("Event poll failed, will retry: {}", e);
                } else {
                    error!("Event poll failed: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                Some(command) = commands.recv() => self.handle_command(command),
                _ = shutdown.changed() => {
                    info!("Event listener shutting down");
                    return Ok(());
                }
            }

            if self.batch_tx.is_closed() {
                info!("Event consumer gone, stopping listener");
                return Ok(());
            }
        }
    }

    pub fn handle_command(&mut self, command: ListenerCommand) {
        match command {
            ListenerCommand::Rewind => {
                info!(
                    "Rewinding event listener from {:?} to block {}",
                    self.cursor, self.config.replay_from_block
                );
                self.cursor = Some(self.config.replay_from_block);
            }
        }
    }

    /// Fetch at most one bounded range of blocks. Returns the number of events delivered.
    pub async fn poll_once(&mut self) -> CoordinatorResult<usize> {
        let head = self.ledger.block_number().await?;

        let from_block = match self.cursor {
            Some(cursor) => cursor,
            None => {
                // Start live delivery at the current head; history arrives via rewind
                self.cursor = Some(head + 1);
                debug!("Event listener starting after block {}", head);
                return Ok(0);
            }
        };

        if from_block > head {
            return Ok(0);
        }

        let to_block = std::cmp::min(head, from_block + self.config.max_block_range - 1);
        debug!("Processing blocks {} to {}", from_block, to_block);

        // Leave the cursor alone on failure so the range is retried
        let logs = self.ledger.match_logs(from_block, to_block).await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match self.parser.parse_log(log) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    warn!("Dropping log: {}", e);
                    crate::metrics::record_event_dropped("malformed");
                }
            }
        }

        self.cursor = Some(to_block + 1);

        let delivered = events.len();
        if delivered > 0 {
            crate::metrics::record_events_received(delivered);
            let batch = EventBatch {
                from_block,
                to_block,
                events,
            };
            if self.batch_tx.send(batch).await.is_err() {
                debug!("Event batch receiver closed");
            }
        }

        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::match_log;
    use crate::ids::MatchId;
    use crate::testing::FakeLedger;

    fn config() -> ListenerConfig {
        ListenerConfig {
            poll_interval_ms: 10,
            replay_from_block: 100,
            max_block_range: 50,
        }
    }

    fn listener(ledger: Arc<FakeLedger>) -> (EventListener, mpsc::Receiver<EventBatch>) {
        let (tx, rx) = mpsc::channel(16);
        (EventListener::new(config(), ledger, tx), rx)
    }

    #[tokio::test]
    async fn test_first_poll_starts_at_head() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_head(500);
        ledger.push_log(match_log(1, 7, 9, 300));
        let (mut listener, mut rx) = listener(ledger);

        assert_eq!(listener.poll_once().await.unwrap(), 0);
        assert_eq!(listener.cursor(), Some(501));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rewind_replays_in_bounded_ranges() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_head(180);
        ledger.push_log(match_log(1, 7, 9, 120));
        ledger.push_log(match_log(2, 5, 6, 170));
        let (mut listener, mut rx) = listener(ledger);

        listener.poll_once().await.unwrap();
        listener.handle_command(ListenerCommand::Rewind);

        assert_eq!(listener.poll_once().await.unwrap(), 1);
        let batch = rx.recv().await.unwrap();
        assert_eq!((batch.from_block, batch.to_block), (100, 149));
        assert_eq!(batch.events[0].match_id, MatchId::from(1));

        assert_eq!(listener.poll_once().await.unwrap(), 1);
        let batch = rx.recv().await.unwrap();
        assert_eq!((batch.from_block, batch.to_block), (150, 180));
        assert_eq!(listener.cursor(), Some(181));
    }

    #[tokio::test]
    async fn test_malformed_logs_are_dropped() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_head(110);
        let mut broken = match_log(4, 7, 9, 105);
        broken.topics.truncate(2);
        ledger.push_log(broken);
        ledger.push_log(match_log(5, 7, 9, 106));
        let (mut listener, mut rx) = listener(ledger);

        listener.handle_command(ListenerCommand::Rewind);
        assert_eq!(listener.poll_once().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap().events[0].match_id, MatchId::from(5));
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_cursor() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_head(120);
        ledger.fail_logs(true);
        let (mut listener, _rx) = listener(ledger.clone());

        listener.handle_command(ListenerCommand::Rewind);
        assert!(listener.poll_once().await.is_err());
        assert_eq!(listener.cursor(), Some(100));

        ledger.fail_logs(false);
        listener.poll_once().await.unwrap();
        assert_eq!(listener.cursor(), Some(121));
    }
}

//! Scripted ledger and recording notifier for tests

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::ledger::{LedgerClient, Mutation, ReadCall, SubmissionHandle};
use crate::notify::{NotificationLevel, NotificationSink};
use crate::reader::CacheKey;
use crate::session::IdentityProvider;
use crate::tracker::MutationKind;

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, Log, H256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// How the fake answers `submit` / `await_outcome` for a mutation kind
#[derive(Debug, Clone, PartialEq)]
pub enum Scripted {
    Succeed,
    Reject(String),
    Hang,
}

/// In-memory ledger with scripted answers
pub struct FakeLedger {
    reads: Mutex<Vec<(ReadCall, Result<Vec<Token>, String>)>>,
    read_counts: Mutex<HashMap<&'static str, usize>>,
    read_delay: Mutex<Duration>,
    submit_script: Mutex<HashMap<MutationKind, Scripted>>,
    outcome_script: Mutex<HashMap<MutationKind, Scripted>>,
    submissions: Mutex<Vec<Mutation>>,
    head: AtomicU64,
    logs: Mutex<Vec<Log>>,
    fail_logs: AtomicBool,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self {
            reads: Mutex::new(Vec::new()),
            read_counts: Mutex::new(HashMap::new()),
            read_delay: Mutex::new(Duration::ZERO),
            submit_script: Mutex::new(HashMap::new()),
            outcome_script: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            head: AtomicU64::new(0),
            logs: Mutex::new(Vec::new()),
            fail_logs: AtomicBool::new(false),
        }
    }

    fn script_read(&self, key: &CacheKey, answer: Result<Vec<Token>, String>) {
        let call = key.call();
        let mut reads = self.reads.lock().unwrap();
        reads.retain(|(existing, _)| *existing != call);
        reads.push((call, answer));
    }

    pub fn set_read(&self, key: &CacheKey, tokens: Vec<Token>) {
        self.script_read(key, Ok(tokens));
    }

    pub fn fail_read(&self, key: &CacheKey, message: &str) {
        self.script_read(key, Err(message.to_string()));
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = delay;
    }

    /// Number of view calls made to `function`
    pub fn read_count(&self, function: &str) -> usize {
        self.read_counts
            .lock()
            .unwrap()
            .get(function)
            .copied()
            .unwrap_or(0)
    }

    pub fn script_submit(&self, kind: MutationKind, script: Scripted) {
        self.submit_script.lock().unwrap().insert(kind, script);
    }

    pub fn script_outcome(&self, kind: MutationKind, script: Scripted) {
        self.outcome_script.lock().unwrap().insert(kind, script);
    }

    pub fn submissions(&self) -> Vec<Mutation> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submit_count(&self, kind: MutationKind) -> usize {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.kind == kind)
            .count()
    }

    pub fn set_head(&self, block: u64) {
        self.head.store(block, Ordering::SeqCst);
    }

    pub fn push_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn fail_logs(&self, fail: bool) {
        self.fail_logs.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn call(&self, call: &ReadCall) -> CoordinatorResult<Vec<Token>> {
        *self.read_counts.lock().unwrap().entry(call.function).or_default() += 1;

        let delay = *self.read_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let answer = self
            .reads
            .lock()
            .unwrap()
            .iter()
            .find(|(scripted, _)| scripted == call)
            .map(|(_, answer)| answer.clone());

        match answer {
            Some(Ok(tokens)) => Ok(tokens),
            Some(Err(message)) => Err(CoordinatorError::Ledger(message)),
            None => Err(CoordinatorError::Ledger(format!(
                "no scripted answer for {}.{}",
                call.contract, call.function
            ))),
        }
    }

    async fn submit(&self, mutation: &Mutation) -> CoordinatorResult<SubmissionHandle> {
        let sequence = {
            let mut submissions = self.submissions.lock().unwrap();
            submissions.push(mutation.clone());
            submissions.len() as u64
        };

        let script = self
            .submit_script
            .lock()
            .unwrap()
            .get(&mutation.kind)
            .cloned()
            .unwrap_or(Scripted::Succeed);

        match script {
            Scripted::Succeed => Ok(SubmissionHandle {
                kind: mutation.kind,
                correlation: Uuid::new_v4(),
                tx_hash: H256::from_low_u64_be(sequence),
            }),
            Scripted::Reject(message) => Err(CoordinatorError::MutationRejected {
                kind: mutation.kind,
                message,
            }),
            Scripted::Hang => std::future::pending().await,
        }
    }

    async fn await_outcome(&self, handle: &SubmissionHandle) -> CoordinatorResult<()> {
        let script = self
            .outcome_script
            .lock()
            .unwrap()
            .get(&handle.kind)
            .cloned()
            .unwrap_or(Scripted::Succeed);

        match script {
            Scripted::Succeed => Ok(()),
            Scripted::Reject(message) => Err(CoordinatorError::MutationRejected {
                kind: handle.kind,
                message,
            }),
            Scripted::Hang => std::future::pending().await,
        }
    }

    async fn block_number(&self) -> CoordinatorResult<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn match_logs(&self, from_block: u64, to_block: u64) -> CoordinatorResult<Vec<Log>> {
        if self.fail_logs.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Ledger("log query timed out".to_string()));
        }

        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                let block = log.block_number.map(|b| b.as_u64()).unwrap_or(0);
                block >= from_block && block <= to_block
            })
            .cloned()
            .collect())
    }
}

/// Notification sink that records everything it is given
#[derive(Default)]
pub struct RecordingNotifier {
    entries: Mutex<Vec<(NotificationLevel, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(NotificationLevel, String)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn messages(&self, level: NotificationLevel) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message)
            .collect()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, level: NotificationLevel, message: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }
}

/// Identity whose address can be swapped mid-session, like a wallet switching accounts
pub struct SwitchableIdentity {
    address: Mutex<Address>,
    logged_in: AtomicBool,
}

impl SwitchableIdentity {
    pub fn new(address: Address) -> Self {
        Self {
            address: Mutex::new(address),
            logged_in: AtomicBool::new(false),
        }
    }

    pub fn switch_to(&self, address: Address) {
        *self.address.lock().unwrap() = address;
    }
}

#[async_trait]
impl IdentityProvider for SwitchableIdentity {
    fn current_address(&self) -> Option<Address> {
        if self.logged_in.load(Ordering::SeqCst) {
            Some(*self.address.lock().unwrap())
        } else {
            None
        }
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn login(&self) -> CoordinatorResult<Address> {
        self.logged_in.store(true, Ordering::SeqCst);
        Ok(*self.address.lock().unwrap())
    }

    async fn logout(&self) {
        self.logged_in.store(false, Ordering::SeqCst);
    }
}

//! Main coordinator loop

use super::intents::{Intent, IntentAck, POOL_TOO_SMALL};
use super::reconcile::reconcile_batch;
use super::session::{load_pointer, persist_pointer, ActiveMatch, SessionContext};
use super::view::{derive, LifecycleStage, LifecycleView, ViewInputs};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::{EventBatch, ListenerCommand};
use crate::ids::{ProfileStatus, TokenId};
use crate::ledger::{LedgerClient, SubmissionHandle};
use crate::notify::{NotificationLevel, NotificationSink};
use crate::reader::{CacheKey, ReadOptions, RemoteStateReader};
use crate::session::IdentityProvider;
use crate::store::DurableStore;
use crate::tracker::{MutationKind, TerminalOutcome};

use ethers::types::{Address, U256};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

const INTERNAL_BUFFER: usize = 256;

/// Requests accepted by the coordinator loop
#[derive(Debug)]
pub enum Command {
    Login {
        reply: oneshot::Sender<CoordinatorResult<LifecycleView>>,
    },
    Logout {
        reply: oneshot::Sender<()>,
    },
    Submit {
        intent: Intent,
        reply: oneshot::Sender<CoordinatorResult<IntentAck>>,
    },
    View {
        reply: oneshot::Sender<LifecycleView>,
    },
    /// Re-resolve identity and re-read everything stale
    Refresh {
        reply: oneshot::Sender<CoordinatorResult<()>>,
    },
}

/// Completions reported back by spawned remote work. Each carries its session id.
#[derive(Debug)]
enum Internal {
    IdentityResolved {
        session: Uuid,
        status: Option<ProfileStatus>,
    },
    Submitted {
        session: Uuid,
        kind: MutationKind,
        attempt: Uuid,
        handle: SubmissionHandle,
    },
    Settled {
        session: Uuid,
        kind: MutationKind,
        attempt: Uuid,
        outcome: Result<(), String>,
    },
    ReadsSettled {
        session: Uuid,
    },
}

/// Match lifecycle coordinator
pub struct Coordinator {
    identity: Arc<dyn IdentityProvider>,
    ledger: Arc<dyn LedgerClient>,
    reader: Arc<RemoteStateReader>,
    store: DurableStore,
    notifier: Arc<dyn NotificationSink>,
    deposit_wei: U256,
    listener: mpsc::Sender<ListenerCommand>,
    session: Option<SessionContext>,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: Option<mpsc::Receiver<Internal>>,
}

impl Coordinator {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        ledger: Arc<dyn LedgerClient>,
        store: DurableStore,
        notifier: Arc<dyn NotificationSink>,
        deposit_wei: U256,
        listener: mpsc::Sender<ListenerCommand>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_BUFFER);
        let reader = Arc::new(RemoteStateReader::new(Arc::clone(&ledger)));

        Self {
            identity,
            ledger,
            reader,
            store,
            notifier,
            deposit_wei,
            listener,
            session: None,
            internal_tx,
            internal_rx: Some(internal_rx),
        }
    }

    #[cfg(test)]
    pub fn session(&self) -> Option<&SessionContext> {
        self.session.as_ref()
    }

    /// Main coordination loop
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<EventBatch>,
        mut shutdown: watch::Receiver<bool>,
    ) -> CoordinatorResult<()> {
        let mut internal_rx = self
            .internal_rx
            .take()
            .ok_or_else(|| CoordinatorError::Internal("Coordinator already running".to_string()))?;

        info!("Coordinator started");

        loop {
            tokio::select! {
                Some(command) = commands.recv() => self.handle_command(command).await,
                Some(batch) = events.recv() => self.handle_event_batch(batch).await,
                Some(message) = internal_rx.recv() => self.handle_internal(message).await,
                _ = shutdown.changed() => break,
                else => break,
            }

            self.observe_stage();
        }

        info!("Coordinator stopped");
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Login { reply } => {
                let result = self.login().await;
                let _ = reply.send(result);
            }
            Command::Logout { reply } => {
                self.logout().await;
                let _ = reply.send(());
            }
            Command::Submit { intent, reply } => {
                let result = self.submit_intent(intent);
                if let Err(e) = &result {
                    if e.is_user_facing() {
                        self.notifier.notify(NotificationLevel::Error, &e.to_string());
                    }
                }
                let _ = reply.send(result);
            }
            Command::View { reply } => {
                let _ = reply.send(self.view());
            }
            Command::Refresh { reply } => {
                let result = self.refresh().await;
                let _ = reply.send(result);
            }
        }
    }

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::IdentityResolved { session, status } => {
                if self.is_current(session) {
                    self.handle_identity_resolved(status);
                }
            }
            Internal::Submitted {
                session,
                kind,
                attempt,
                handle,
            } => {
                if let Some(context) = self.current_mut(session) {
                    context.tracker_mut(kind).mark_confirming(attempt, handle);
                }
            }
            Internal::Settled {
                session,
                kind,
                attempt,
                outcome,
            } => {
                if self.is_current(session) {
                    self.handle_tracker_update(kind, attempt, outcome);
                }
            }
            Internal::ReadsSettled { session } => {
                if self.is_current(session) {
                    debug!("Session reads settled");
                    self.verify_pointer().await;
                }
            }
        }
    }

    fn is_current(&self, session: Uuid) -> bool {
        let current = self.session.as_ref().map(|s| s.id) == Some(session);
        if !current {
            debug!(%session, "Discarding completion for a torn-down session");
        }
        current
    }

    fn current_mut(&mut self, session: Uuid) -> Option<&mut SessionContext> {
        if self.is_current(session) {
            self.session.as_mut()
        } else {
            None
        }
    }

    async fn login(&mut self) -> CoordinatorResult<LifecycleView> {
        if let Some(session) = &self.session {
            debug!("Already logged in as {:?}", session.address);
            return Ok(self.view());
        }

        let address = self.identity.login().await?;

        // New identity: nothing cached for a previous one may leak through
        self.reader.clear();

        let pointer = load_pointer(&self.store).await;
        let session = SessionContext::new(address, pointer);
        info!(session = %session.id, ?address, restored_match = pointer.is_some(), "Session created");
        self.session = Some(session);

        self.spawn_sync();
        Ok(self.view())
    }

    /// Re-resolve identity and re-read everything stale. A changed wallet
    /// address starts a new session.
    async fn refresh(&mut self) -> CoordinatorResult<()> {
        let Some(session) = &self.session else {
            return Err(CoordinatorError::NoSession);
        };

        match self.identity.current_address() {
            Some(address) if address == session.address => {
                self.spawn_sync();
                Ok(())
            }
            Some(address) => {
                info!(from = ?session.address, to = ?address, "Wallet address changed, starting new session");
                self.session = None;
                self.login().await.map(|_| ())
            }
            None => {
                info!("Identity provider signed out, ending session");
                self.logout().await;
                Err(CoordinatorError::NoSession)
            }
        }
    }

    async fn logout(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        self.identity.logout().await;
        persist_pointer(&self.store, None).await;
        self.reader.clear();
        crate::metrics::record_stage(LifecycleStage::SignedOut.ordinal());
        info!(session = %session.id, "Session destroyed");
    }

    fn submit_intent(&mut self, intent: Intent) -> CoordinatorResult<IntentAck> {
        let deposit_wei = self.deposit_wei;
        let pool_size = self
            .reader
            .value(&CacheKey::PoolSize)
            .and_then(|value| value.as_count());

        let session = self.session.as_mut().ok_or(CoordinatorError::NoSession)?;
        let kind = intent.kind();

        if kind == MutationKind::RequestMatchmaking
            && pool_size.map_or(true, |size| size < U256::from(2u64))
        {
            return Err(CoordinatorError::Precondition(POOL_TOO_SMALL.to_string()));
        }

        let mutation = intent.to_mutation(session.pointer, deposit_wei)?;

        let attempt = match session.tracker_mut(kind).submit() {
            Ok(attempt) => attempt,
            Err(CoordinatorError::AlreadyInFlight { kind }) => {
                debug!(%kind, "Ignoring duplicate intent while in flight");
                return Ok(IntentAck::AlreadyInFlight { kind });
            }
            Err(e) => return Err(e),
        };

        crate::metrics::record_tx_submitted(kind.as_str());
        info!(%kind, %attempt, "Submitting intent");

        let ledger = Arc::clone(&self.ledger);
        let tx = self.internal_tx.clone();
        let session_id = session.id;

        tokio::spawn(async move {
            let outcome = match ledger.submit(&mutation).await {
                Ok(handle) => {
                    let _ = tx
                        .send(Internal::Submitted {
                            session: session_id,
                            kind,
                            attempt,
                            handle,
                        })
                        .await;
                    ledger.await_outcome(&handle).await
                }
                Err(e) => Err(e),
            };

            let _ = tx
                .send(Internal::Settled {
                    session: session_id,
                    kind,
                    attempt,
                    outcome: outcome.map_err(|e| e.to_string()),
                })
                .await;
        });

        Ok(IntentAck::Submitted { kind, attempt })
    }

    fn handle_tracker_update(
        &mut self,
        kind: MutationKind,
        attempt: Uuid,
        outcome: Result<(), String>,
    ) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let tracker = session.tracker_mut(kind);

        // Duplicate terminal notifications stop here
        let Some(terminal) = tracker.complete(attempt, outcome) else {
            return;
        };
        tracker.reset();

        match terminal {
            TerminalOutcome::Confirmed => {
                crate::metrics::record_tx_confirmed(kind.as_str());
                info!(%kind, %attempt, "Mutation confirmed");
                let epoch = self.reader.invalidate_all();
                debug!(epoch, "Caches invalidated after confirmation");
                self.notifier
                    .notify(NotificationLevel::Success, kind.confirmation_message());
                self.spawn_sync();
            }
            TerminalOutcome::Failed(reason) => {
                crate::metrics::record_tx_failed(kind.as_str());
                warn!(%kind, %attempt, %reason, "Mutation failed");
                self.notifier.notify(NotificationLevel::Error, &reason);
            }
        }
    }

    fn handle_identity_resolved(&mut self, status: Option<ProfileStatus>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let Some(status) = status else {
            // A failed read is not "no profile"; keep whatever was known
            warn!("Identity read failed, keeping {:?}", session.identity);
            return;
        };

        let is_profile = matches!(status, ProfileStatus::Profile(_));
        let changed = session.identity != Some(status);
        if changed {
            info!(?status, "Identity resolved");
        }
        session.identity = Some(status);
        let needs_rewind = is_profile && !session.rewound;

        if needs_rewind {
            self.request_rewind();
        }
        if is_profile && changed {
            self.spawn_prime();
        }
    }

    /// Ask the listener to replay from the configured block. Retried on the
    /// next identity resolution if the request cannot be queued.
    fn request_rewind(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match self.listener.try_send(ListenerCommand::Rewind) {
            Ok(()) => {
                session.rewound = true;
                debug!("Requested event replay for resolved identity");
            }
            Err(e) => warn!("Failed to request event replay, will retry: {}", e),
        }
    }

    /// Drop a restored pointer whose match does not pair the resolved
    /// identity with the recorded partner, then replay events.
    async fn verify_pointer(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let (Some(token), Some(active)) = (session.token(), session.pointer) else {
            return;
        };
        let Some((user_a, user_b)) = self
            .reader
            .value(&CacheKey::Participants(active.match_id))
            .and_then(|value| value.as_participants())
        else {
            return;
        };

        let partner = if token == user_a {
            Some(user_b)
        } else if token == user_b {
            Some(user_a)
        } else {
            None
        };
        if partner == Some(active.partner) {
            return;
        }

        warn!(
            match_id = %active.match_id,
            partner = %active.partner,
            identity = %token,
            "Active match does not belong to this identity, discarding"
        );
        if let Some(session) = self.session.as_mut() {
            session.pointer = None;
            session.rewound = false;
        }
        if !persist_pointer(&self.store, None).await {
            warn!("Cleared active match kept in memory only");
        }
        self.request_rewind();
    }

    async fn handle_event_batch(&mut self, batch: EventBatch) {
        let count = batch.events.len();
        let Some(session) = self.session.as_mut() else {
            debug!(count, "Dropping events, no session");
            crate::metrics::record_event_dropped("no_session");
            return;
        };

        let Some(identity) = session.token() else {
            debug!(count, "Dropping events received before identity resolved");
            crate::metrics::record_event_dropped("pre_identity");
            return;
        };

        debug!(
            count,
            from = batch.from_block,
            to = batch.to_block,
            "Reconciling match events"
        );

        let Some(pointer) = reconcile_batch(identity, session.pointer, &batch.events) else {
            return;
        };

        session.pointer = Some(pointer);
        crate::metrics::record_pointer_update();
        info!(match_id = %pointer.match_id, partner = %pointer.partner, "Active match updated");

        if !persist_pointer(&self.store, Some(pointer)).await {
            warn!("Active match kept in memory only");
        }

        self.notifier
            .notify(NotificationLevel::Info, "You have a new match!");
        self.spawn_prime();
    }

    /// Re-resolve identity, then refresh everything stale
    fn spawn_sync(&self) {
        let Some(session) = &self.session else {
            return;
        };

        let reader = Arc::clone(&self.reader);
        let tx = self.internal_tx.clone();
        let session_id = session.id;
        let address = session.address;
        let pointer = session.pointer;

        tokio::spawn(async move {
            let owned = reader
                .read(CacheKey::OwnedProfile(address), ReadOptions::enabled())
                .await;
            let status = owned.value.and_then(|value| value.as_profile_status());

            let _ = tx
                .send(Internal::IdentityResolved {
                    session: session_id,
                    status,
                })
                .await;

            prime(&reader, address, status, pointer).await;
            let refreshed = reader.refresh_stale().await;
            debug!(refreshed, "Stale entries refreshed");

            let _ = tx.send(Internal::ReadsSettled { session: session_id }).await;
        });
    }

    /// Read everything the view depends on for the current session
    fn spawn_prime(&self) {
        let Some(session) = &self.session else {
            return;
        };

        let reader = Arc::clone(&self.reader);
        let tx = self.internal_tx.clone();
        let session_id = session.id;
        let address = session.address;
        let identity = session.identity;
        let pointer = session.pointer;

        tokio::spawn(async move {
            prime(&reader, address, identity, pointer).await;
            let _ = tx.send(Internal::ReadsSettled { session: session_id }).await;
        });
    }

    /// Current derived view
    pub fn view(&self) -> LifecycleView {
        let Some(session) = &self.session else {
            return derive(&ViewInputs {
                invalidation_epoch: self.reader.invalidation_epoch(),
                ..Default::default()
            });
        };

        let token = session.token();
        let value = |key: CacheKey| self.reader.value(&key);

        let mut inputs = ViewInputs {
            address: Some(session.address),
            identity: session.identity,
            pointer: session.pointer,
            pool_size: value(CacheKey::PoolSize).and_then(|v| v.as_count()),
            match_counter: value(CacheKey::MatchCounter).and_then(|v| v.as_count()),
            administrator: value(CacheKey::Administrator).and_then(|v| v.as_administrator()),
            trackers: Some(&session.trackers),
            invalidation_epoch: self.reader.invalidation_epoch(),
            ..Default::default()
        };

        if let Some(token) = token {
            inputs.profile = value(CacheKey::Profile(token)).and_then(|v| v.as_profile().cloned());
            inputs.in_pool = value(CacheKey::PoolMembership(token)).and_then(|v| v.as_in_pool());
        }

        if let Some(ActiveMatch { match_id, partner }) = session.pointer {
            inputs.participants =
                value(CacheKey::Participants(match_id)).and_then(|v| v.as_participants());
            inputs.escrow = value(CacheKey::Escrow(match_id)).and_then(|v| v.as_escrow());
            inputs.partner_profile =
                value(CacheKey::Profile(partner)).and_then(|v| v.as_profile().cloned());
            inputs.partner_contact = value(CacheKey::Contact(match_id, partner))
                .and_then(|v| v.as_contact().map(str::to_string));
            if let Some(token) = token {
                inputs.my_contact = value(CacheKey::Contact(match_id, token))
                    .and_then(|v| v.as_contact().map(str::to_string));
            }
        }

        derive(&inputs)
    }

    fn observe_stage(&mut self) {
        if self.session.is_none() {
            return;
        }

        let stage = self.view().stage;
        if let Some(session) = self.session.as_mut() {
            if session.last_stage != Some(stage) {
                info!(from = ?session.last_stage, to = ?stage, "Lifecycle stage changed");
                session.last_stage = Some(stage);
                crate::metrics::record_stage(stage.ordinal());
            }
        }
    }
}

/// Issue every read the view needs. Match-scoped reads wait for a resolved profile.
async fn prime(
    reader: &RemoteStateReader,
    address: Address,
    identity: Option<ProfileStatus>,
    pointer: Option<ActiveMatch>,
) {
    let token: Option<TokenId> = identity.and_then(|status| status.token());
    let has_profile = token.is_some();

    let mut reads = vec![
        (CacheKey::OwnedProfile(address), ReadOptions::enabled()),
        (CacheKey::Administrator, ReadOptions::enabled()),
        (CacheKey::PoolSize, ReadOptions::enabled()),
        (CacheKey::MatchCounter, ReadOptions::enabled()),
    ];

    if let Some(token) = token {
        reads.push((CacheKey::Profile(token), ReadOptions::enabled()));
        reads.push((CacheKey::PoolMembership(token), ReadOptions::enabled()));
    }

    if let Some(ActiveMatch { match_id, partner }) = pointer {
        let when_profile = ReadOptions::when(has_profile);
        reads.push((CacheKey::Participants(match_id), when_profile));
        reads.push((CacheKey::Escrow(match_id), when_profile));
        reads.push((CacheKey::Profile(partner), when_profile));
        reads.push((CacheKey::Contact(match_id, partner), when_profile));
        if let Some(token) = token {
            reads.push((CacheKey::Contact(match_id, token), when_profile));
        }
    }

    futures::future::join_all(
        reads
            .into_iter()
            .map(|(key, options)| reader.read(key, options)),
    )
    .await;
}

/// Cloneable front door to a running [`Coordinator`]
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    pub fn new(commands: mpsc::Sender<Command>) -> Self {
        Self { commands }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> CoordinatorResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        response.await.map_err(|_| CoordinatorError::ChannelClosed)
    }

    pub async fn login(&self) -> CoordinatorResult<LifecycleView> {
        self.request(|reply| Command::Login { reply }).await?
    }

    pub async fn logout(&self) -> CoordinatorResult<()> {
        self.request(|reply| Command::Logout { reply }).await
    }

    pub async fn submit(&self, intent: Intent) -> CoordinatorResult<IntentAck> {
        self.request(|reply| Command::Submit { intent, reply }).await?
    }

    pub async fn view(&self) -> CoordinatorResult<LifecycleView> {
        self.request(|reply| Command::View { reply }).await
    }

    pub async fn refresh(&self) -> CoordinatorResult<()> {
        self.request(|reply| Command::Refresh { reply }).await?
    }
}

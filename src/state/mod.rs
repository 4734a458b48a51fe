//! Shared application state: queue-store slot, live sessions, tickets, and
//! connected-runner registries.

pub mod session;
pub mod ticket;

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::queue_store::QueueStore,
    error::ServiceError,
    services::results::ResultsPublisher,
    state::{session::RaceSession, ticket::MatchTicket},
};

/// Cheaply cloneable handle to the process-wide state.
pub type SharedState = Arc<AppState>;

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Clone)]
/// Handle used to push ranked updates to a connected runner.
pub struct RunnerConnection {
    /// Participant behind this socket.
    pub participant_id: Uuid,
    /// Session the runner joined.
    pub session_id: Uuid,
    /// Outbound writer channel of the socket.
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Central application state storing live sessions and connection registries.
pub struct AppState {
    config: AppConfig,
    queue_store: RwLock<Option<Arc<dyn QueueStore>>>,
    degraded: watch::Sender<bool>,
    /// One mutex per session: telemetry for different sessions never contends.
    sessions: DashMap<Uuid, Arc<Mutex<RaceSession>>>,
    /// participant -> session, kept in sync with `sessions`.
    participant_index: DashMap<Uuid, Uuid>,
    /// Pending match tickets keyed by participant; removal is consumption.
    tickets: DashMap<Uuid, MatchTicket>,
    runners: DashMap<Uuid, RunnerConnection>,
    results: ResultsPublisher,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned
    /// cheaply. The application starts degraded until a queue store is
    /// installed by the supervisor.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let results = ResultsPublisher::new(config.results_endpoint.clone());
        Arc::new(Self {
            config,
            queue_store: RwLock::new(None),
            degraded: degraded_tx,
            sessions: DashMap::new(),
            participant_index: DashMap::new(),
            tickets: DashMap::new(),
            runners: DashMap::new(),
            results,
        })
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Client used to hand final standings to the results collaborator.
    pub fn results(&self) -> &ResultsPublisher {
        &self.results
    }

    /// Obtain a handle to the current queue store, if one is installed.
    pub async fn queue_store(&self) -> Option<Arc<dyn QueueStore>> {
        let guard = self.queue_store.read().await;
        guard.as_ref().cloned()
    }

    /// Queue store handle or the degraded-mode error.
    pub async fn require_queue_store(&self) -> Result<Arc<dyn QueueStore>, ServiceError> {
        self.queue_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a queue store implementation and leave degraded mode.
    pub async fn install_queue_store(&self, store: Arc<dyn QueueStore>) {
        {
            let mut guard = self.queue_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current queue store and enter degraded mode.
    pub async fn clear_queue_store(&self) {
        {
            let mut guard = self.queue_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Register a freshly created session, indexing its roster.
    pub fn insert_session(&self, session: RaceSession) -> Arc<Mutex<RaceSession>> {
        let session_id = session.session_id;
        for participant_id in session.participants.keys() {
            self.participant_index.insert(*participant_id, session_id);
        }
        let handle = Arc::new(Mutex::new(session));
        self.sessions.insert(session_id, handle.clone());
        handle
    }

    /// Look up a live session.
    pub fn session(&self, session_id: Uuid) -> Option<Arc<Mutex<RaceSession>>> {
        self.sessions.get(&session_id).map(|entry| entry.clone())
    }

    /// Archive a session: drop it and its roster index entries.
    pub fn remove_session(&self, session_id: Uuid, members: &[Uuid]) {
        self.sessions.remove(&session_id);
        for participant_id in members {
            self.participant_index
                .remove_if(participant_id, |_, mapped| *mapped == session_id);
        }
    }

    /// Number of sessions currently held by the live engine.
    pub fn live_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Identifiers of every live session; used by the timeout sweep.
    pub fn live_session_ids(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Whether a participant is already part of a live session.
    pub fn is_participating(&self, participant_id: Uuid) -> bool {
        self.participant_index.contains_key(&participant_id)
    }

    /// Session a participant currently belongs to, if any.
    pub fn participant_session(&self, participant_id: Uuid) -> Option<Uuid> {
        self.participant_index
            .get(&participant_id)
            .map(|entry| *entry.value())
    }

    /// Issue and register a match ticket for one participant.
    pub fn issue_ticket(&self, participant_id: Uuid, session_id: Uuid) -> MatchTicket {
        let ticket = MatchTicket::issue(participant_id, session_id, self.config.matching.ticket_ttl());
        self.tickets.insert(participant_id, ticket.clone());
        ticket
    }

    /// Pending ticket for a participant, purging it when already expired.
    pub fn pending_ticket(&self, participant_id: Uuid) -> Option<MatchTicket> {
        let now = Instant::now();
        let expired = self
            .tickets
            .remove_if(&participant_id, |_, ticket| ticket.is_expired(now))
            .is_some();
        if expired {
            return None;
        }
        self.tickets
            .get(&participant_id)
            .map(|entry| entry.clone())
    }

    /// Consume a ticket during the join handshake.
    ///
    /// The removal doubles as the single-use guarantee: two concurrent joins
    /// with the same ticket can only take it once. The session binding is
    /// part of the predicate, so a join frame naming the wrong session is
    /// rejected without burning the ticket.
    pub fn take_ticket(
        &self,
        participant_id: Uuid,
        ticket_id: Uuid,
        session_id: Uuid,
    ) -> Result<MatchTicket, ServiceError> {
        let now = Instant::now();
        let Some((_, ticket)) = self.tickets.remove_if(&participant_id, |_, ticket| {
            ticket.ticket_id == ticket_id
                && ticket.session_id == session_id
                && !ticket.is_expired(now)
        }) else {
            // Drop an expired leftover so it cannot linger forever.
            self.tickets
                .remove_if(&participant_id, |_, ticket| ticket.is_expired(now));
            return Err(ServiceError::Unauthorized(
                "no valid match ticket for this participant".into(),
            ));
        };
        Ok(ticket)
    }

    /// Registry of active runner sockets keyed by participant.
    pub fn runners(&self) -> &DashMap<Uuid, RunnerConnection> {
        &self.runners
    }

    /// Whether any runner of the given session still holds an open socket.
    pub fn session_has_connected_runners(&self, session_id: Uuid) -> bool {
        self.runners
            .iter()
            .any(|entry| entry.session_id == session_id)
    }
}

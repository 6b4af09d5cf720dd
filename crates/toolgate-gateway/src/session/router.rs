//! Session router
//!
//! Maps inbound requests onto long-lived protocol-engine sessions. One
//! engine per logical session; a generated session id binds subsequent
//! requests to it. Because the upstream application client is unreliable
//! about echoing the session header, the router also keeps an implicit
//! *default* session: requests arriving without an identifier are routed
//! there, and when nothing exists yet a stateless default is created
//! lazily instead of erroring.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::engine::{EngineFactory, ProtocolEngine};

/// Default idle lifetime for a session: 30 minutes.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;

/// Default cap on concurrent sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

/// Events retained per session for `Last-Event-ID` replay.
const EVENT_BUFFER_CAPACITY: usize = 256;

/// How a request was matched to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRoute {
    /// Matched by an explicit, known session id.
    Bound(String),
    /// No id supplied; routed to the implicit default session.
    Default,
    /// Nothing existed; a stateless default was created on the fly.
    Stateless,
}

/// A server-initiated event with a monotonically increasing id,
/// replayable via `Last-Event-ID`.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub id: u64,
    pub data: String,
}

/// One protocol-engine session.
pub struct Session {
    /// Session identifier handed to the caller.
    pub id: String,
    engine: Arc<dyn ProtocolEngine>,
    /// Engines do not tolerate concurrent calls; requests serialize here.
    call_lock: Mutex<()>,
    /// Live event stream for SSE subscribers.
    events_tx: broadcast::Sender<SessionEvent>,
    /// Bounded replay buffer for reconnecting subscribers.
    event_buffer: Mutex<std::collections::VecDeque<SessionEvent>>,
    next_event_id: AtomicU64,
    last_activity: AtomicU64,
    /// Forwarder task moving engine notifications onto the event stream.
    forwarder: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl Session {
    fn new(engine: Arc<dyn ProtocolEngine>) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER_CAPACITY);
        let session = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            engine,
            call_lock: Mutex::new(()),
            events_tx,
            event_buffer: Mutex::new(std::collections::VecDeque::new()),
            next_event_id: AtomicU64::new(1),
            last_activity: AtomicU64::new(now_ms()),
            forwarder: Mutex::new(None),
        });

        // Bridge engine notifications into numbered session events. The
        // task ends when the engine drops its notification sender or the
        // session is terminated.
        let weak = Arc::downgrade(&session);
        let mut notifications = session.engine.notifications();
        let handle = tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(data) => {
                        let Some(session) = weak.upgrade() else { break };
                        session.publish(data).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("[Session] Notification stream lagged, skipped {}", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // The lock is uncontended at construction time.
        if let Ok(mut slot) = session.forwarder.try_lock() {
            *slot = Some(handle);
        }

        session
    }

    /// Dispatch one message to the engine, serialized with any other
    /// in-flight call on this session.
    pub async fn dispatch(&self, message: serde_json::Value) -> anyhow::Result<Option<serde_json::Value>> {
        let _guard = self.call_lock.lock().await;
        self.touch();
        self.engine.handle(message).await
    }

    /// Record an event: number it, buffer it for replay, broadcast it.
    async fn publish(&self, data: String) {
        let id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        let event = SessionEvent { id, data };

        let mut buffer = self.event_buffer.lock().await;
        if buffer.len() >= EVENT_BUFFER_CAPACITY {
            buffer.pop_front();
        }
        buffer.push_back(event.clone());
        drop(buffer);

        // No subscribers is fine; events stay in the replay buffer.
        let _ = self.events_tx.send(event);
    }

    /// Subscribe to the event stream, replaying buffered events after
    /// `last_event_id`. Dropping the receiver releases only the
    /// subscription; the session and its buffer survive for reconnects.
    pub async fn subscribe(
        &self,
        last_event_id: Option<u64>,
    ) -> (Vec<SessionEvent>, broadcast::Receiver<SessionEvent>) {
        // Subscribe before snapshotting the buffer so no event published
        // in between is lost.
        let rx = self.events_tx.subscribe();
        let buffer = self.event_buffer.lock().await;
        let replay = match last_event_id {
            Some(after) => buffer.iter().filter(|e| e.id > after).cloned().collect(),
            None => Vec::new(),
        };
        (replay, rx)
    }

    fn touch(&self) {
        self.last_activity.store(now_ms(), Ordering::Relaxed);
    }

    fn is_expired(&self, ttl_ms: u64) -> bool {
        now_ms().saturating_sub(self.last_activity.load(Ordering::Relaxed)) > ttl_ms
    }

    async fn shutdown(&self) {
        self.engine.shutdown().await;
        if let Some(handle) = self.forwarder.lock().await.take() {
            handle.abort();
        }
    }
}

/// Errors from session resolution.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("session limit reached")]
    Capacity,
    #[error("no session established")]
    NoSession,
    #[error("failed to create protocol engine: {0}")]
    Engine(#[from] anyhow::Error),
}

/// Outcome of routing a request.
pub struct RouteOutcome {
    pub session: Arc<Session>,
    pub route: SessionRoute,
    /// Set when this request caused the session to be created, so the
    /// response must carry the session id header.
    pub newly_created: bool,
}

/// The session router.
pub struct SessionRouter {
    sessions: DashMap<String, Arc<Session>>,
    default_session: RwLock<Option<Arc<Session>>>,
    factory: Arc<dyn EngineFactory>,
    /// Serializes every create path: two concurrent initializations (or
    /// two id-less requests racing to build the stateless default) must
    /// never spawn two engines for one slot.
    creation_lock: Mutex<()>,
    ttl_ms: u64,
    max_sessions: usize,
}

impl SessionRouter {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            sessions: DashMap::new(),
            default_session: RwLock::new(None),
            factory,
            creation_lock: Mutex::new(()),
            ttl_ms: DEFAULT_SESSION_TTL_SECS * 1000,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Look up a known, unexpired session by id.
    fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(id)?.clone();
        if session.is_expired(self.ttl_ms) {
            debug!("[Session] {} expired on access", id);
            return None;
        }
        session.touch();
        Some(session)
    }

    /// Route a POST request to a session per the decision table:
    /// - id known → bound session
    /// - initialization without id → fresh session, becomes the default
    /// - no id, default exists → default session
    /// - id absent/unknown, non-init, no default → stateless default,
    ///   created lazily (the caller's session discipline is not trusted)
    pub async fn resolve(
        &self,
        session_id: Option<&str>,
        is_init: bool,
    ) -> Result<RouteOutcome, RouterError> {
        if let Some(id) = session_id {
            if let Some(session) = self.get(id) {
                return Ok(RouteOutcome {
                    session,
                    route: SessionRoute::Bound(id.to_string()),
                    newly_created: false,
                });
            }
            debug!("[Session] Unknown session id {}, falling back", id);
        }

        if is_init {
            // A new initialization starts a new logical session and takes
            // over as the implicit default.
            let session = self.create_session(true).await?;
            info!("[Session] Created session {} (default)", session.id);
            return Ok(RouteOutcome {
                session,
                route: SessionRoute::Default,
                newly_created: true,
            });
        }

        if let Some(session) = self.default_unexpired().await {
            return Ok(RouteOutcome {
                session,
                route: SessionRoute::Default,
                newly_created: false,
            });
        }

        // Self-healing: no id, no default, not an initialization. Create a
        // stateless default rather than erroring.
        let session = self.create_session(false).await?;
        info!("[Session] Created stateless fallback session {}", session.id);
        Ok(RouteOutcome {
            session,
            route: SessionRoute::Stateless,
            newly_created: true,
        })
    }

    /// Resolve a session for GET/DELETE: bound if the id is known, else
    /// the default; never fabricates.
    pub async fn resolve_existing(&self, session_id: Option<&str>) -> Option<Arc<Session>> {
        if let Some(id) = session_id {
            if let Some(session) = self.get(id) {
                return Some(session);
            }
        }
        self.default_unexpired().await
    }

    async fn default_unexpired(&self) -> Option<Arc<Session>> {
        let guard = self.default_session.read().await;
        let session = guard.as_ref()?;
        if session.is_expired(self.ttl_ms) {
            return None;
        }
        session.touch();
        Some(session.clone())
    }

    /// Create a session, register it, and bind it as the default. An
    /// initialization (`fresh`) always gets its own session; the lazy
    /// fallback path instead converges on a default another request may
    /// have created while this one waited on the lock.
    async fn create_session(&self, fresh: bool) -> Result<Arc<Session>, RouterError> {
        let _guard = self.creation_lock.lock().await;

        if !fresh {
            if let Some(existing) = self.default_unexpired().await {
                return Ok(existing);
            }
        }

        if self.sessions.len() >= self.max_sessions {
            self.cleanup_expired().await;
            if self.sessions.len() >= self.max_sessions {
                warn!(
                    "[Session] Limit reached ({} sessions), rejecting",
                    self.max_sessions
                );
                return Err(RouterError::Capacity);
            }
        }

        let engine = self.factory.create()?;
        let session = Session::new(engine);
        self.sessions.insert(session.id.clone(), session.clone());

        // The newest session always becomes the implicit default, so
        // id-less followups from either path land somewhere live.
        let mut slot = self.default_session.write().await;
        *slot = Some(session.clone());
        drop(slot);

        Ok(session)
    }

    /// Terminate a session: bound when the id is known, else the default.
    /// Returns the terminated session id, or `None` when nothing existed.
    /// Termination is not an error and never creates a session.
    pub async fn terminate(&self, session_id: Option<&str>) -> Option<String> {
        let session = match session_id {
            Some(id) => self.sessions.get(id).map(|s| s.clone()),
            None => self.default_session.read().await.clone(),
        }?;

        self.sessions.remove(&session.id);
        {
            let mut slot = self.default_session.write().await;
            if slot.as_ref().map(|s| s.id == session.id).unwrap_or(false) {
                *slot = None;
            }
        }
        session.shutdown().await;
        info!("[Session] Terminated session {}", session.id);
        Some(session.id.clone())
    }

    /// Drop sessions idle beyond the TTL. Called opportunistically and by
    /// the periodic sweep.
    pub async fn cleanup_expired(&self) -> usize {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired(self.ttl_ms))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in expired {
            if let Some((_, session)) = self.sessions.remove(&id) {
                let mut slot = self.default_session.write().await;
                if slot.as_ref().map(|s| s.id == id).unwrap_or(false) {
                    *slot = None;
                }
                drop(slot);
                session.shutdown().await;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(
                "[Session] Cleaned up {} expired session(s), {} remaining",
                removed,
                self.sessions.len()
            );
        }
        removed
    }

    /// Spawn the periodic idle sweep. The task stops with the returned
    /// token.
    pub fn spawn_cleanup(self: &Arc<Self>) -> tokio_util::sync::CancellationToken {
        let token = tokio_util::sync::CancellationToken::new();
        let router = Arc::downgrade(self);
        let task_token = token.clone();
        let interval = Duration::from_millis((self.ttl_ms / 2).max(60_000));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(router) = router.upgrade() else { break };
                        router.cleanup_expired().await;
                    }
                    _ = task_token.cancelled() => break,
                }
            }
        });
        token
    }
}

//! Network surface of the coordinator: HTTP request/response API and the realtime
//! websocket channel.
//!
//! [`Coordinator`] wires the components together once; both listeners share it
//! through an `Arc`.

pub mod dto;
pub mod error;
pub mod http;
pub mod realtime;

pub use error::ApiError;
pub use http::build_router;
pub use realtime::RealtimeServer;

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::coordinator::{
    Clock, ConnectivityCandidate, CoordinatorSettings, CreatedSession, HeartbeatMonitor,
    JoinBroker, JoinOutcome, JoinRequest, LeaveOutcome, RealtimeNotifier, Result, SessionFilter,
    SessionId, SessionPatch, SessionRegistry, SessionSnapshot, SessionSpec, SessionSummary,
    Subscription, SweepHandle, SystemClock,
};
use crate::tracks::{IntegrityError, TrackAvailability, TrackCatalog};

/// One coordinator instance: registry plus the components operating on it.
#[derive(Debug)]
pub struct Coordinator {
    settings: CoordinatorSettings,
    default_game_port: u16,
    registry: Arc<SessionRegistry>,
    broker: JoinBroker,
    heartbeats: Arc<HeartbeatMonitor>,
}

impl Coordinator {
    pub fn new(settings: CoordinatorSettings, default_game_port: u16) -> Self {
        Self::with_clock(settings, default_game_port, Arc::new(SystemClock))
    }

    /// Build a coordinator reading time from `clock`.
    pub fn with_clock(settings: CoordinatorSettings, default_game_port: u16, clock: Arc<dyn Clock>) -> Self {
        let notifier = Arc::new(RealtimeNotifier::new(settings.queue_capacity));
        let registry = Arc::new(SessionRegistry::new(notifier, clock, settings.limits));
        let broker = JoinBroker::new(Arc::clone(&registry));
        let heartbeats = Arc::new(HeartbeatMonitor::new(Arc::clone(&registry), settings.heartbeat));

        Self {
            settings,
            default_game_port,
            registry,
            broker,
            heartbeats,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn default_game_port(&self) -> u16 {
        self.default_game_port
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn heartbeats(&self) -> &Arc<HeartbeatMonitor> {
        &self.heartbeats
    }

    pub fn notifier(&self) -> &Arc<RealtimeNotifier> {
        self.registry.notifier()
    }

    pub async fn create_session(&self, spec: SessionSpec) -> Result<CreatedSession> {
        self.registry.create(spec).await
    }

    pub async fn list_sessions(&self, filter: &SessionFilter) -> Vec<SessionSummary> {
        self.registry.list(filter).await
    }

    pub async fn get_session(&self, session_id: SessionId) -> Result<SessionSnapshot> {
        self.registry.get(session_id).await
    }

    pub async fn update_session(
        &self,
        session_id: SessionId,
        host_token: &str,
        patch: SessionPatch,
    ) -> Result<SessionSnapshot> {
        self.registry.update(session_id, host_token, patch).await
    }

    pub async fn close_session(&self, session_id: SessionId, host_token: &str) -> Result<()> {
        self.registry.teardown(session_id, host_token).await
    }

    pub async fn join(&self, session_id: SessionId, request: JoinRequest) -> Result<JoinOutcome> {
        self.broker.join(session_id, request).await
    }

    pub async fn leave(
        &self,
        session_id: SessionId,
        player_id: &str,
        host_token: Option<&str>,
    ) -> Result<LeaveOutcome> {
        self.broker.leave(session_id, player_id, host_token).await
    }

    pub async fn heartbeat(&self, session_id: SessionId, host_token: &str) -> Result<chrono::DateTime<chrono::Utc>> {
        self.heartbeats.heartbeat(session_id, host_token).await
    }

    pub async fn renegotiate_track(
        &self,
        session_id: SessionId,
        player_id: &str,
        local_tracks: &TrackCatalog,
        failure: Option<IntegrityError>,
    ) -> Result<TrackAvailability> {
        self.broker
            .renegotiate_track(session_id, player_id, local_tracks, failure)
            .await
    }

    /// Register a realtime observer.
    pub fn subscribe(&self) -> Subscription {
        self.notifier().subscribe()
    }

    /// Start the background heartbeat sweeper.
    pub fn spawn_sweeper(&self) -> SweepHandle {
        Arc::clone(&self.heartbeats).spawn()
    }

    /// Candidate for a host that advertised none.
    pub fn fallback_candidate(&self, address: IpAddr, game_port: Option<u16>) -> ConnectivityCandidate {
        ConnectivityCandidate {
            address,
            port: game_port.unwrap_or(self.default_game_port),
        }
    }

    /// Serve the HTTP API and the realtime channel until `shutdown` resolves.
    pub async fn serve<F>(
        self: Arc<Self>,
        http_listener: TcpListener,
        realtime_listener: TcpListener,
        shutdown: F,
    ) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);

        let sweeper = self.spawn_sweeper();

        let realtime = RealtimeServer::new(Arc::clone(&self), realtime_listener);
        tracing::info!("Realtime channel listening on ws://{}", realtime.local_addr()?);
        let realtime_task = tokio::spawn(realtime.run(stop_rx));

        tracing::info!("HTTP API listening on http://{}", http_listener.local_addr()?);
        let router = build_router(Arc::clone(&self));

        let served = axum::serve(
            http_listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        tracing::info!("Shutting down");
        let _ = stop_tx.send(true);
        if let Err(e) = realtime_task.await {
            tracing::error!("Realtime server task failed: {}", e);
        }
        sweeper.shutdown().await;

        served
    }
}

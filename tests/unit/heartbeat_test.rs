//! Unit tests for heartbeats and session expiry.

use std::sync::Arc;
use std::time::Duration;

use racehub::coordinator::{
    CloseReason, CoordinatorError, Delivery, GameMode, HeartbeatMonitor, HeartbeatPolicy,
    ManualClock, PhysicsMode, PlayerIdentity, RealtimeNotifier, RegistryLimits, RoomDescriptor,
    SessionEvent, SessionFilter, SessionRegistry, SessionSpec,
};

fn setup(policy: HeartbeatPolicy) -> (Arc<SessionRegistry>, Arc<HeartbeatMonitor>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(RealtimeNotifier::new(64)),
        clock.clone(),
        RegistryLimits::default(),
    ));
    let monitor = Arc::new(HeartbeatMonitor::new(Arc::clone(&registry), policy));
    (registry, monitor, clock)
}

fn spec(host: &str) -> SessionSpec {
    SessionSpec::new(
        PlayerIdentity::new(host, host),
        RoomDescriptor {
            name: format!("{} room", host),
            map_id: "MP-dunes".to_string(),
            track_id: String::new(),
            is_custom_track: false,
            game_mode: GameMode::Training,
            laps: 1,
            physics_mode: PhysicsMode::Sim,
        },
    )
}

/// Test the default expiry threshold
#[test]
fn test_default_timeout_is_three_intervals() {
    let policy = HeartbeatPolicy::default();
    assert_eq!(policy.interval, Duration::from_secs(30));
    assert_eq!(policy.timeout(), Duration::from_secs(90));
    assert_eq!(policy.sweep_interval, Duration::from_secs(30));
}

/// Test that heartbeats every 10s for two minutes keep a session alive, and that
/// stopping them expires it within one sweep interval past the threshold
#[tokio::test]
async fn test_heartbeats_keep_session_alive_then_expire() {
    let policy = HeartbeatPolicy::default();
    let (registry, monitor, clock) = setup(policy);
    let created = registry.create(spec("host")).await.unwrap();
    let id = created.session_id;

    let mut since_sweep = Duration::ZERO;
    for _ in 0..12 {
        clock.advance(Duration::from_secs(10));
        monitor.heartbeat(id, &created.host_token).await.unwrap();

        since_sweep += Duration::from_secs(10);
        if since_sweep >= policy.sweep_interval {
            since_sweep = Duration::ZERO;
            let report = monitor.sweep().await;
            assert!(report.expired.is_empty());
        }
    }
    assert!(registry.get(id).await.is_ok());

    // Host goes silent. Sweeps keep running every sweep interval.
    let mut silent = Duration::ZERO;
    loop {
        clock.advance(policy.sweep_interval);
        silent += policy.sweep_interval;
        let report = monitor.sweep().await;

        if report.expired.contains(&id) {
            break;
        }
        assert!(
            silent <= policy.timeout(),
            "session still alive after {:?} of silence",
            silent
        );
    }

    assert!(silent > policy.timeout());
    assert!(silent <= policy.timeout() + policy.sweep_interval);
    assert!(matches!(registry.get(id).await, Err(CoordinatorError::SessionNotFound(_))));
    assert!(registry.list(&SessionFilter::default()).await.is_empty());
}

/// Test that expiry delivers SessionClosed to every subscriber
#[tokio::test]
async fn test_expiry_notifies_all_subscribers() {
    let (registry, monitor, clock) = setup(HeartbeatPolicy::default());
    let created = registry.create(spec("host")).await.unwrap();

    let mut subs = vec![
        registry.notifier().subscribe(),
        registry.notifier().subscribe(),
        registry.notifier().subscribe(),
    ];

    clock.advance(Duration::from_secs(91));
    let report = monitor.sweep().await;
    assert_eq!(report.expired, vec![created.session_id]);
    assert!(report.failed.is_empty());

    for sub in subs.iter_mut() {
        match sub.recv().await {
            Delivery::Event(SessionEvent::SessionClosed { session_id, reason, revision }) => {
                assert_eq!(session_id, created.session_id);
                assert_eq!(reason, CloseReason::Expired);
                assert_eq!(revision, 2);
            }
            other => panic!("unexpected delivery {:?}", other),
        }
    }
}

/// Test that only silent sessions are expired
#[tokio::test]
async fn test_sweep_only_expires_stale_sessions() {
    let (registry, monitor, clock) = setup(HeartbeatPolicy::default());
    let quiet = registry.create(spec("quiet")).await.unwrap();
    let chatty = registry.create(spec("chatty")).await.unwrap();

    clock.advance(Duration::from_secs(60));
    monitor.heartbeat(chatty.session_id, &chatty.host_token).await.unwrap();
    clock.advance(Duration::from_secs(45));

    let report = monitor.sweep().await;
    assert_eq!(report.examined, 1);
    assert_eq!(report.expired, vec![quiet.session_id]);
    assert!(registry.get(chatty.session_id).await.is_ok());
}

/// Test heartbeat authorization
#[tokio::test]
async fn test_heartbeat_requires_host_token() {
    let (registry, monitor, _) = setup(HeartbeatPolicy::default());
    let created = registry.create(spec("host")).await.unwrap();

    let err = monitor.heartbeat(created.session_id, "not-the-token").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Unauthorized));

    let err = monitor.heartbeat(uuid::Uuid::new_v4(), &created.host_token).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::SessionNotFound(_)));
}

/// Test that a heartbeat does not bump the revision or publish
#[tokio::test]
async fn test_heartbeat_is_quiet() {
    let (registry, monitor, clock) = setup(HeartbeatPolicy::default());
    let created = registry.create(spec("host")).await.unwrap();
    let mut sub = registry.notifier().subscribe();

    clock.advance(Duration::from_secs(5));
    let at = monitor.heartbeat(created.session_id, &created.host_token).await.unwrap();

    let snapshot = registry.get(created.session_id).await.unwrap();
    assert_eq!(snapshot.last_heartbeat, at);
    assert_eq!(snapshot.summary.revision, 1);
    assert_eq!(sub.try_recv(), None);
}

/// Test that the background sweeper expires sessions and stops on shutdown
#[tokio::test]
async fn test_spawned_sweeper_runs_until_shutdown() {
    let policy = HeartbeatPolicy {
        interval: Duration::from_secs(30),
        expiry_multiplier: 3,
        sweep_interval: Duration::from_millis(10),
    };
    let (registry, monitor, clock) = setup(policy);
    let created = registry.create(spec("host")).await.unwrap();

    let handle = Arc::clone(&monitor).spawn();
    clock.advance(Duration::from_secs(120));

    let mut gone = false;
    for _ in 0..200 {
        if registry.get(created.session_id).await.is_err() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(gone, "sweeper did not expire the session");

    tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
        .await
        .expect("sweeper did not stop");
}

//! Unit tests for joining and leaving sessions.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use racehub::coordinator::{
    CloseReason, ConnectivityCandidate, CoordinatorError, Delivery, GameMode, JoinBroker,
    JoinRequest, LeaveOutcome, ManualClock, PhysicsMode, PlayerIdentity, RealtimeNotifier,
    RegistryLimits, Role, RoomDescriptor, SessionEvent, SessionId, SessionRegistry, SessionSpec,
    SessionState,
};
use racehub::tracks::{ContentHash, IntegrityError, TrackAvailability, TrackCatalog};

const TRACK: &[u8] = b"custom track: twelve gates over the harbor";

struct Fixture {
    registry: Arc<SessionRegistry>,
    broker: JoinBroker,
}

fn fixture() -> Fixture {
    let notifier = Arc::new(RealtimeNotifier::new(64));
    let registry = Arc::new(SessionRegistry::new(
        notifier,
        Arc::new(ManualClock::default()),
        RegistryLimits::default(),
    ));
    let broker = JoinBroker::new(Arc::clone(&registry));
    Fixture { registry, broker }
}

fn host_candidate() -> ConnectivityCandidate {
    ConnectivityCandidate {
        address: IpAddr::V4(Ipv4Addr::new(198, 51, 100, 4)),
        port: 5056,
    }
}

fn room_spec(max_pilots: u32, max_spectators: u32) -> SessionSpec {
    let mut spec = SessionSpec::new(
        PlayerIdentity::new("host", "Host"),
        RoomDescriptor {
            name: "Harbor".to_string(),
            map_id: "MP-harbor".to_string(),
            track_id: "CMP-harbor".to_string(),
            is_custom_track: true,
            game_mode: GameMode::Race,
            laps: 3,
            physics_mode: PhysicsMode::Sim,
        },
    );
    spec.track_hash = Some(ContentHash::of(TRACK));
    spec.track_size = TRACK.len() as u64;
    spec.host_candidates = vec![host_candidate()];
    spec.max_pilots = Some(max_pilots);
    spec.max_spectators = Some(max_spectators);
    spec
}

async fn create(fx: &Fixture, spec: SessionSpec) -> (SessionId, String) {
    let created = fx.registry.create(spec).await.unwrap();
    (created.session_id, created.host_token)
}

fn pilot(id: &str) -> JoinRequest {
    JoinRequest::pilot(PlayerIdentity::new(id, id))
}

/// Test that six pilots fit, a seventh is rejected and can still spectate
#[tokio::test]
async fn test_six_pilots_then_full_then_spectator() {
    let fx = fixture();
    let (id, _) = create(&fx, room_spec(6, 15)).await;

    for i in 0..6 {
        let outcome = fx.broker.join(id, pilot(&format!("p{}", i))).await.unwrap();
        assert_eq!(outcome.role, Role::Pilot);
        assert!(!outcome.rejoined);
    }

    let err = fx.broker.join(id, pilot("p6")).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::SessionFull(_)));

    let spectator = fx
        .broker
        .join(id, JoinRequest::spectator(PlayerIdentity::new("p6", "p6")))
        .await
        .unwrap();
    assert_eq!(spectator.role, Role::Spectator);

    let snapshot = fx.registry.get(id).await.unwrap();
    assert_eq!(snapshot.summary.capacity.current_pilots, 6);
    assert_eq!(snapshot.summary.capacity.current_spectators, 1);
    assert_eq!(snapshot.summary.state, SessionState::Open);
}

/// Test that a rejected join leaves no trace
#[tokio::test]
async fn test_full_join_does_not_mutate() {
    let fx = fixture();
    let (id, _) = create(&fx, room_spec(1, 1)).await;
    fx.broker.join(id, pilot("p1")).await.unwrap();

    let before = fx.registry.get(id).await.unwrap();
    let mut sub = fx.registry.notifier().subscribe();

    let err = fx.broker.join(id, pilot("p2")).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::SessionFull(_)));

    assert_eq!(fx.registry.get(id).await.unwrap(), before);
    assert_eq!(sub.try_recv(), None);
}

/// Test that the state becomes Full only when both role counters are at max
#[tokio::test]
async fn test_full_state_and_back_to_open() {
    let fx = fixture();
    let (id, _) = create(&fx, room_spec(1, 1)).await;

    fx.broker.join(id, pilot("p1")).await.unwrap();
    assert_eq!(fx.registry.get(id).await.unwrap().summary.state, SessionState::Open);

    fx.broker
        .join(id, JoinRequest::spectator(PlayerIdentity::new("s1", "s1")))
        .await
        .unwrap();
    assert_eq!(fx.registry.get(id).await.unwrap().summary.state, SessionState::Full);

    let outcome = fx.broker.leave(id, "p1", None).await.unwrap();
    assert_eq!(outcome, LeaveOutcome::Left(Role::Pilot));

    let snapshot = fx.registry.get(id).await.unwrap();
    assert_eq!(snapshot.summary.state, SessionState::Open);
    assert_eq!(snapshot.summary.capacity.current_pilots, 0);
}

/// Test password checks run before capacity checks
#[tokio::test]
async fn test_password_checked_before_capacity() {
    let fx = fixture();
    let mut spec = room_spec(1, 1);
    spec.password = Some("letmein".to_string());
    let (id, _) = create(&fx, spec).await;

    fx.broker.join(id, pilot("p1").with_password("letmein")).await.unwrap();

    // Room is now pilot-full, but a wrong password is reported first.
    let err = fx.broker.join(id, pilot("p2").with_password("nope")).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidPassword));

    let err = fx.broker.join(id, pilot("p3")).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidPassword));

    let err = fx.broker.join(id, pilot("p4").with_password("letmein")).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::SessionFull(_)));
}

/// Test that joining a missing session is reported first
#[tokio::test]
async fn test_join_unknown_session() {
    let fx = fixture();
    let err = fx.broker.join(uuid::Uuid::new_v4(), pilot("p")).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::SessionNotFound(_)));
}

/// Test that re-joining returns the existing membership without changes
#[tokio::test]
async fn test_rejoin_is_idempotent() {
    let fx = fixture();
    let (id, _) = create(&fx, room_spec(2, 1)).await;

    let first = fx.broker.join(id, pilot("p1")).await.unwrap();
    let mut sub = fx.registry.notifier().subscribe();

    let again = fx.broker.join(id, pilot("p1")).await.unwrap();
    assert!(again.rejoined);
    assert_eq!(again.role, Role::Pilot);
    assert_eq!(again.revision, first.revision);

    let snapshot = fx.registry.get(id).await.unwrap();
    assert_eq!(snapshot.summary.capacity.current_pilots, 1);
    assert_eq!(snapshot.members.len(), 2);
    assert_eq!(sub.try_recv(), None);
}

/// Test that re-joining a pilot-full room reports it full
#[tokio::test]
async fn test_rejoin_into_full_room_is_rejected() {
    let fx = fixture();
    let (id, _) = create(&fx, room_spec(1, 1)).await;

    fx.broker.join(id, pilot("p1")).await.unwrap();
    let before = fx.registry.get(id).await.unwrap();

    let err = fx.broker.join(id, pilot("p1")).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::SessionFull(_)));
    assert_eq!(fx.registry.get(id).await.unwrap(), before);
}

/// Test that re-joining with a different role is rejected
#[tokio::test]
async fn test_rejoin_with_other_role_is_rejected() {
    let fx = fixture();
    let (id, _) = create(&fx, room_spec(2, 2)).await;

    fx.broker.join(id, pilot("p1")).await.unwrap();
    let err = fx
        .broker
        .join(id, JoinRequest::spectator(PlayerIdentity::new("p1", "p1")))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Validation(_)));
}

/// Test that the host asking to join as pilot gets its host seat back
#[tokio::test]
async fn test_host_rejoin_keeps_host_role() {
    let fx = fixture();
    let (id, _) = create(&fx, room_spec(2, 2)).await;

    let outcome = fx.broker.join(id, pilot("host")).await.unwrap();
    assert!(outcome.rejoined);
    assert_eq!(outcome.role, Role::Host);
}

/// Test that a successful join returns connectivity and publishes an update
#[tokio::test]
async fn test_join_returns_host_connectivity() {
    let fx = fixture();
    let (id, _) = create(&fx, room_spec(2, 2)).await;
    let mut sub = fx.registry.notifier().subscribe();

    let outcome = fx.broker.join(id, pilot("p1")).await.unwrap();
    assert_eq!(outcome.connectivity, vec![host_candidate()]);
    assert_eq!(outcome.host.player_id, "host");
    assert_eq!(outcome.track.content_hash, Some(ContentHash::of(TRACK)));
    assert_eq!(outcome.revision, 2);

    match sub.try_recv() {
        Some(Delivery::Event(SessionEvent::SessionUpdated { revision, session })) => {
            assert_eq!(revision, 2);
            assert_eq!(session.capacity.current_pilots, 1);
        }
        other => panic!("unexpected delivery {:?}", other),
    }
}

/// Test that a joiner lacking the track gets a ticket naming the host
#[tokio::test]
async fn test_join_without_track_gets_ticket() {
    let fx = fixture();
    let (id, _) = create(&fx, room_spec(2, 2)).await;

    let outcome = fx.broker.join(id, pilot("p1")).await.unwrap();
    let ticket = outcome.availability.ticket().expect("ticket expected");

    assert_eq!(ticket.session_id, id);
    assert_eq!(ticket.source.host.player_id, "host");
    assert_eq!(ticket.source.candidates, vec![host_candidate()]);
    assert_eq!(ticket.content_hash, ContentHash::of(TRACK));
    assert_eq!(ticket.byte_size, TRACK.len() as u64);
    assert!(ticket.verify(TRACK).is_ok());
}

/// Test that a joiner holding the track gets no ticket
#[tokio::test]
async fn test_join_with_track_gets_no_ticket() {
    let fx = fixture();
    let (id, _) = create(&fx, room_spec(2, 2)).await;

    let local = TrackCatalog::from_hashes([ContentHash::of(TRACK)]);
    let outcome = fx.broker.join(id, pilot("p1").with_tracks(local)).await.unwrap();

    assert_eq!(outcome.availability, TrackAvailability::Available);
}

/// Test that join succeeds with the track unavailable when downloads are off
#[tokio::test]
async fn test_join_download_disabled() {
    let fx = fixture();
    let mut spec = room_spec(2, 2);
    spec.download_allowed = false;
    let (id, _) = create(&fx, spec).await;

    let outcome = fx.broker.join(id, pilot("p1")).await.unwrap();
    assert_eq!(outcome.role, Role::Pilot);
    assert_eq!(outcome.availability, TrackAvailability::Unavailable);
}

/// Test that the host leaving closes the session
#[tokio::test]
async fn test_host_leave_closes_session() {
    let fx = fixture();
    let (id, token) = create(&fx, room_spec(2, 2)).await;
    fx.broker.join(id, pilot("p1")).await.unwrap();
    let mut sub = fx.registry.notifier().subscribe();

    let err = fx.broker.leave(id, "host", None).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Unauthorized));
    let err = fx.broker.leave(id, "host", Some("bogus")).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Unauthorized));

    let outcome = fx.broker.leave(id, "host", Some(&token)).await.unwrap();
    assert_eq!(outcome, LeaveOutcome::SessionClosed);
    assert!(matches!(
        fx.registry.get(id).await,
        Err(CoordinatorError::SessionNotFound(_))
    ));

    match sub.try_recv() {
        Some(Delivery::Event(SessionEvent::SessionClosed { reason, .. })) => {
            assert_eq!(reason, CloseReason::HostLeft);
        }
        other => panic!("unexpected delivery {:?}", other),
    }

    // Joining a closed session reports it as gone.
    let err = fx.broker.join(id, pilot("p2")).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::SessionNotFound(_)));
}

/// Test that leaving without a seat changes nothing
#[tokio::test]
async fn test_leave_non_member() {
    let fx = fixture();
    let (id, _) = create(&fx, room_spec(2, 2)).await;

    let outcome = fx.broker.leave(id, "stranger", None).await.unwrap();
    assert_eq!(outcome, LeaveOutcome::NotMember);
    assert_eq!(fx.registry.get(id).await.unwrap().summary.revision, 1);
}

/// Test that concurrent joins never exceed capacity
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_respect_capacity() {
    let fx = fixture();
    let (id, _) = create(&fx, room_spec(6, 15)).await;

    let mut handles = Vec::new();
    for i in 0..24 {
        let broker = fx.broker.clone();
        handles.push(tokio::spawn(async move { broker.join(id, pilot(&format!("p{}", i))).await }));
    }

    let mut joined = 0;
    let mut full = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => joined += 1,
            Err(CoordinatorError::SessionFull(_)) => full += 1,
            Err(e) => panic!("unexpected error {:?}", e),
        }
    }

    assert_eq!(joined, 6);
    assert_eq!(full, 18);

    let snapshot = fx.registry.get(id).await.unwrap();
    assert_eq!(snapshot.summary.capacity.current_pilots, 6);
    assert_eq!(snapshot.members.len(), 7);
}

/// Test renegotiating a ticket after a failed transfer
#[tokio::test]
async fn test_renegotiate_track_for_member() {
    let fx = fixture();
    let (id, _) = create(&fx, room_spec(2, 2)).await;
    fx.broker.join(id, pilot("p1")).await.unwrap();

    let reported = IntegrityError::SizeMismatch {
        expected: TRACK.len() as u64,
        actual: 3,
    };
    let availability = fx
        .broker
        .renegotiate_track(id, "p1", &TrackCatalog::new(), Some(reported))
        .await
        .unwrap();
    assert!(availability.ticket().is_some());

    let err = fx
        .broker
        .renegotiate_track(id, "stranger", &TrackCatalog::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Validation(_)));
}

/// Test that a transfer failure the host cannot repair is reported back
#[tokio::test]
async fn test_renegotiate_without_download_reports_integrity_failure() {
    let fx = fixture();
    let mut spec = room_spec(2, 2);
    spec.download_allowed = false;
    let (id, _) = create(&fx, spec).await;
    fx.broker.join(id, pilot("p1")).await.unwrap();

    let reported = IntegrityError::HashMismatch {
        expected: ContentHash::of(TRACK),
        actual: ContentHash::of(b"truncated"),
    };
    let err = fx
        .broker
        .renegotiate_track(id, "p1", &TrackCatalog::new(), Some(reported.clone()))
        .await
        .unwrap_err();
    match err {
        CoordinatorError::Integrity(e) => assert_eq!(e, reported),
        other => panic!("unexpected error {:?}", other),
    }

    // Without a reported failure the answer is simply unavailable.
    let availability = fx
        .broker
        .renegotiate_track(id, "p1", &TrackCatalog::new(), None)
        .await
        .unwrap();
    assert_eq!(availability, TrackAvailability::Unavailable);
}

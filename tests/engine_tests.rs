//! End-to-end tests for a session driving a simulated chain.
//!
//! Time is paused, so timeouts resolve instantly and deterministically.

use std::time::Duration;

use led_chain::hal::{MockLink, Responder};
use led_chain::{
    ChainSession, Classification, Command, CommandKind, CommandOutcome, Config, DeviceAddress,
    EngineError, InvalidReason, LineDirection, SystemState,
};

async fn ready_session(devices: u16) -> (ChainSession, MockLink) {
    let link = MockLink::simulated(devices);
    let session = ChainSession::connect(Config::default(), link.clone()).unwrap();
    session.ready().await.unwrap();
    (session, link)
}

/// Let the worker drain whatever is queued.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ============================================================================
// Encoding through the session
// ============================================================================

#[tokio::test(start_paused = true)]
async fn servo_to_device_two_of_four() {
    let (session, link) = ready_session(4).await;

    let outcome = session
        .submit(Command::servo(DeviceAddress::device(2), 90))
        .await
        .unwrap();

    assert_eq!(outcome, CommandOutcome::Acknowledged);
    assert_eq!(link.last_written().as_deref(), Some("002,servo,767"));
    assert_eq!(session.current_state(), (SystemState::Ready, 4));
}

#[tokio::test(start_paused = true)]
async fn dac_broadcast_half_scale() {
    let (session, link) = ready_session(2).await;

    session.submit(Command::dac_all(1050)).await.unwrap();

    assert_eq!(link.last_written().as_deref(), Some("000,dac,512"));
}

#[tokio::test(start_paused = true)]
async fn connect_asks_for_chain_length() {
    let (_session, link) = ready_session(5).await;
    assert_eq!(link.written(), vec!["000,status".to_string()]);
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn discovery_report_sets_chain_length() {
    let link = MockLink::new();
    let session = ChainSession::connect(Config::default(), link.clone()).unwrap();
    assert_eq!(session.current_state(), (SystemState::Initializing, 0));

    assert!(link.inject("Initialization complete. Total devices: 3"));
    let status = session.ready().await.unwrap();
    assert_eq!(status.device_count, 3);
    assert_eq!(session.current_state(), (SystemState::Ready, 3));

    let writes = link.write_count();
    let err = session
        .submit(Command::servo(DeviceAddress::device(4), 90))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::UnknownTarget {
            address: DeviceAddress::device(4),
            device_count: 3,
        }
    );
    assert_eq!(link.write_count(), writes, "nothing transmitted");
}

#[tokio::test(start_paused = true)]
async fn discovery_timeout_faults_session() {
    let link = MockLink::new();
    let session = ChainSession::connect(Config::default(), link.clone()).unwrap();

    let started = tokio::time::Instant::now();
    assert_eq!(session.ready().await, Err(EngineError::DiscoveryTimeout));
    assert!(started.elapsed() >= Duration::from_millis(10_000));

    assert_eq!(session.current_state(), (SystemState::Fault, 0));
    assert_eq!(
        session.submit(Command::status(DeviceAddress::BROADCAST)).await,
        Err(EngineError::NotReady(SystemState::Fault))
    );
}

#[tokio::test(start_paused = true)]
async fn commands_refused_while_initializing() {
    let link = MockLink::new();
    let session = ChainSession::connect(Config::default(), link.clone()).unwrap();

    assert_eq!(
        session.submit(Command::servo_all(90)).await,
        Err(EngineError::NotReady(SystemState::Initializing))
    );
    assert_eq!(link.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reinit_rediscovers() {
    let (session, link) = ready_session(3).await;

    assert_eq!(session.reinit().await, Ok(3));
    assert_eq!(link.last_written().as_deref(), Some("000,reinit"));
    assert_eq!(session.current_state(), (SystemState::Ready, 3));
}

// ============================================================================
// Resolution
// ============================================================================

#[tokio::test(start_paused = true)]
async fn status_returns_report() {
    let (session, _link) = ready_session(3).await;

    let outcome = session
        .submit(Command::status(DeviceAddress::BROADCAST))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CommandOutcome::Status {
            device_count: Some(3),
            state: "READY".into(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn help_resolves_on_ok() {
    let (session, link) = ready_session(1).await;

    assert_eq!(
        session.submit(Command::help()).await,
        Ok(CommandOutcome::Acknowledged)
    );
    assert_eq!(link.last_written().as_deref(), Some("000,help"));
}

struct JammedServos;

impl Responder for JammedServos {
    fn respond(&mut self, line: &str) -> Vec<String> {
        if line.ends_with(",status") {
            vec!["Total devices: 2, Current State: READY".into()]
        } else {
            vec!["ERROR: Servo jammed".into()]
        }
    }
}

#[tokio::test(start_paused = true)]
async fn error_report_rejects_command() {
    let link = MockLink::new().with_responder(JammedServos);
    let session = ChainSession::connect(Config::default(), link.clone()).unwrap();
    session.ready().await.unwrap();

    assert_eq!(
        session.submit(Command::servo_all(90)).await,
        Err(EngineError::Rejected("Servo jammed".into()))
    );
    // A rejection is a normal resolution; the chain stays usable.
    assert_eq!(session.current_state(), (SystemState::Ready, 2));
}

#[tokio::test(start_paused = true)]
async fn timeout_recovers_and_late_reply_is_stray() {
    let (session, link) = ready_session(2).await;
    link.mute(true);

    let started = tokio::time::Instant::now();
    let result = session.submit(Command::servo_all(90)).await;
    assert_eq!(result, Err(EngineError::TimedOut));
    assert!(started.elapsed() >= Duration::from_millis(2_500));
    assert_eq!(session.current_state(), (SystemState::Ready, 2));

    // The firmware finally answers at 2.6 s.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(link.inject("ACK"));
    settle().await;

    let last_rx = session
        .recent(10)
        .into_iter()
        .rev()
        .find(|e| e.direction == LineDirection::Rx)
        .unwrap();
    assert_eq!(last_rx.line, "ACK");
    assert_eq!(last_rx.classification, Classification::Unrecognized);
    assert_eq!(session.current_state(), (SystemState::Ready, 2));

    // Engine does not retry on its own.
    assert_eq!(link.write_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn reply_queued_behind_expired_deadline_is_too_late() {
    let (session, link) = ready_session(2).await;
    link.mute(true);

    let dispatcher = session.dispatcher().clone();
    let pending = tokio::spawn(async move { dispatcher.submit(Command::servo_all(90)).await });
    settle().await;
    assert_eq!(session.current_state().0, SystemState::Processing);

    // The answer is queued before the worker next runs, but by then the
    // 2.5 s bound has already passed.
    assert!(link.inject("ACK"));
    tokio::time::advance(Duration::from_millis(2_600)).await;

    assert_eq!(pending.await.unwrap(), Err(EngineError::TimedOut));
    settle().await;
    assert_eq!(session.current_state(), (SystemState::Ready, 2));

    let last_rx = session
        .recent(10)
        .into_iter()
        .rev()
        .find(|e| e.direction == LineDirection::Rx)
        .unwrap();
    assert_eq!(last_rx.line, "ACK");
    assert_eq!(last_rx.classification, Classification::Unrecognized);
}

// ============================================================================
// Single-flight
// ============================================================================

#[tokio::test(start_paused = true)]
async fn second_submission_while_pending_is_busy() {
    let (session, link) = ready_session(2).await;
    link.mute(true);

    let dispatcher = session.dispatcher().clone();
    let first = tokio::spawn(async move {
        dispatcher
            .submit(Command::servo(DeviceAddress::device(1), 90))
            .await
    });
    settle().await;
    assert_eq!(session.current_state().0, SystemState::Processing);

    assert_eq!(
        session.submit(Command::dac_all(0)).await,
        Err(EngineError::Busy)
    );
    assert_eq!(link.write_count(), 2, "busy command never reached the wire");

    assert!(link.inject("ACK"));
    assert_eq!(first.await.unwrap(), Ok(CommandOutcome::Acknowledged));
    assert_eq!(session.current_state().0, SystemState::Ready);
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn out_of_range_value_is_not_sent() {
    let (session, link) = ready_session(2).await;

    let err = session
        .submit_command(CommandKind::Servo, DeviceAddress::device(1), Some(130))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Invalid(InvalidReason::OutOfRange { value: 130, .. })
    ));

    let err = session
        .submit_command(CommandKind::Dac, DeviceAddress::BROADCAST, None)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Invalid(InvalidReason::MissingValue(CommandKind::Dac))
    );

    assert_eq!(link.write_count(), 1);
}

// ============================================================================
// Transport
// ============================================================================

#[tokio::test(start_paused = true)]
async fn port_failure_faults_until_reconnect() {
    let (session, link) = ready_session(3).await;
    link.mute(true);

    let dispatcher = session.dispatcher().clone();
    let pending = tokio::spawn(async move { dispatcher.submit(Command::servo_all(90)).await });
    settle().await;

    assert!(link.fail("cable pulled"));
    assert_eq!(
        pending.await.unwrap(),
        Err(EngineError::TransportError("cable pulled".into()))
    );
    assert_eq!(session.current_state(), (SystemState::Fault, 0));
    assert!(link.is_closed());

    link.mute(false);
    session.reconnect().await.unwrap();
    assert_eq!(link.opens(), 2);
    assert_eq!(session.ready().await.unwrap().device_count, 3);
}

#[tokio::test(start_paused = true)]
async fn failed_reopen_stays_faulted() {
    let (session, link) = ready_session(3).await;

    link.fail_next_open("device busy");
    let err = session.reconnect().await.unwrap_err();
    assert!(matches!(err, EngineError::TransportError(_)));
    assert_eq!(session.current_state().0, SystemState::Fault);

    session.reconnect().await.unwrap();
    assert_eq!(session.ready().await.unwrap().device_count, 3);
}

#[tokio::test(start_paused = true)]
async fn write_failure_faults_session() {
    let (session, link) = ready_session(2).await;
    link.fail_writes(Some("broken pipe"));

    let err = session.submit(Command::servo_all(90)).await.unwrap_err();
    assert!(matches!(err, EngineError::TransportError(_)));
    assert_eq!(session.current_state().0, SystemState::Fault);
}

#[tokio::test(start_paused = true)]
async fn disconnect_closes_port() {
    let (session, link) = ready_session(2).await;

    session.disconnect().await.unwrap();
    assert!(link.is_closed());
    assert_eq!(session.current_state(), (SystemState::Disconnected, 0));
    assert_eq!(
        session.submit(Command::status(DeviceAddress::BROADCAST)).await,
        Err(EngineError::NotReady(SystemState::Disconnected))
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_worker() {
    let (session, link) = ready_session(2).await;
    let dispatcher = session.dispatcher().clone();

    session.shutdown().await;
    assert!(link.is_closed());
    assert_eq!(
        dispatcher.submit(Command::status(DeviceAddress::BROADCAST)).await,
        Err(EngineError::Disconnected)
    );
}

// ============================================================================
// Observation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn history_keeps_last_64_lines() {
    let (session, link) = ready_session(1).await;

    for i in 0..70u16 {
        session.submit(Command::servo_all(60 + i % 60)).await.unwrap();
    }

    let history = session.history().await.unwrap();
    assert_eq!(history.len(), 64);
    assert_eq!(history.last(), link.last_written().as_ref());
    assert_eq!(link.write_count(), 71);
}

#[tokio::test(start_paused = true)]
async fn event_stream_shows_tx_then_rx() {
    let (session, _link) = ready_session(2).await;
    let mut events = session.subscribe();

    session.submit(Command::servo_all(90)).await.unwrap();

    let mut wire = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.direction != LineDirection::Local {
            wire.push((event.direction, event.line));
        }
    }
    assert_eq!(
        wire,
        vec![
            (LineDirection::Tx, "000,servo,767".to_string()),
            (LineDirection::Rx, "ACK".to_string()),
        ]
    );
}

//! Reconnection integration tests
//!
//! Backoff schedule, circuit breaker and manual reconnects.

mod common;

use common::{assert_elapsed, MockController};
use iclink_client::ConnectionState;
use iclink_core::{types, Error};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_backoff_then_circuit_open() {
    let (mut controller, transport) = MockController::new();
    controller.fail_next_connects(u32::MAX);
    let coordinator = common::coordinator(transport);

    coordinator.start().await.unwrap();
    let start = controller.next_open().await;

    // failures 1..=4 schedule the backoff, the fifth opens the circuit
    let mut expected = Duration::ZERO;
    for delay in [30.0, 45.0, 67.5, 101.25] {
        expected += Duration::from_secs_f64(delay);
        let at = controller.next_open().await;
        assert_elapsed(start, at, expected);
    }
    coordinator
        .wait_for_state(ConnectionState::CircuitOpen)
        .await
        .unwrap();
    assert_eq!(coordinator.stats().circuit_opens, 1);

    match coordinator.reconnect_now().await {
        Err(Error::CircuitOpen { retry_in }) => assert!(retry_in <= Duration::from_secs(300)),
        other => panic!("Expected CircuitOpen, got {:?}", other),
    }
    let result = coordinator
        .send_request("GetParamList", types::keepalive_params(), true)
        .await;
    assert!(matches!(result, Err(Error::CircuitOpen { .. })));

    // single probe after the cooldown; its failure re-opens the circuit
    expected += Duration::from_secs(300);
    let probe = controller.next_open().await;
    assert_elapsed(start, probe, expected);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(coordinator.state(), ConnectionState::CircuitOpen);

    let stats = coordinator.stats();
    assert_eq!(stats.circuit_opens, 2);
    assert_eq!(stats.reconnect_attempts, 5);
    assert_eq!(controller.open_count(), 6);

    // a successful probe closes the circuit
    controller.fail_next_connects(0);
    expected += Duration::from_secs(300);
    let recovered = controller.next_open().await;
    assert_elapsed(start, recovered, expected);
    coordinator
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();
    assert_eq!(coordinator.stats().successful_connects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_connection_loss() {
    let (mut controller, transport) = MockController::new();
    let coordinator = common::coordinator(transport);
    coordinator.start().await.unwrap();
    coordinator
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();
    controller.next_open().await;

    controller.fail_next_connects(2);
    controller.drop_connection("reset by peer");
    let lost_at = Instant::now();
    coordinator
        .wait_for_state(ConnectionState::Disconnected)
        .await
        .unwrap();

    // first delay after a loss, then the schedule continues from there
    assert_elapsed(lost_at, controller.next_open().await, Duration::from_secs(30));
    assert_elapsed(lost_at, controller.next_open().await, Duration::from_secs(75));
    assert_elapsed(lost_at, controller.next_open().await, Duration::from_secs_f64(142.5));
    coordinator
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();

    let stats = coordinator.stats();
    assert_eq!(stats.reconnect_attempts, 3);
    assert_eq!(stats.successful_connects, 2);
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_backoff() {
    let (mut controller, transport) = MockController::new();
    controller.fail_next_connects(2);
    let coordinator = common::coordinator(transport);
    coordinator.start().await.unwrap();
    let start = controller.next_open().await;
    assert_elapsed(start, controller.next_open().await, Duration::from_secs(30));
    assert_elapsed(start, controller.next_open().await, Duration::from_secs(75));
    coordinator
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();

    controller.drop_connection("reset by peer");
    let lost_at = Instant::now();
    assert_elapsed(lost_at, controller.next_open().await, Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_now_skips_backoff() {
    let (mut controller, transport) = MockController::new();
    controller.fail_next_connects(1);
    let coordinator = common::coordinator(transport);
    coordinator.start().await.unwrap();
    let start = controller.next_open().await;
    coordinator
        .wait_for_state(ConnectionState::Disconnected)
        .await
        .unwrap();

    coordinator.reconnect_now().await.unwrap();
    let at = controller.next_open().await;
    assert_eq!(at, start);
    coordinator
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();

    // connected: nothing to do
    coordinator.reconnect_now().await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(controller.open_count(), 2);
    assert_eq!(coordinator.stats().reconnect_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_after_loss_opens_circuit_after_five_failures() {
    let (mut controller, transport) = MockController::new();
    let coordinator = common::coordinator(transport);
    coordinator.start().await.unwrap();
    coordinator
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();
    controller.next_open().await;

    controller.fail_next_connects(u32::MAX);
    controller.drop_connection("reset by peer");
    let mut previous = Instant::now();

    for delay in [30.0, 45.0, 67.5, 101.25, 151.875] {
        let at = controller.next_open().await;
        assert_elapsed(previous, at, Duration::from_secs_f64(delay));
        previous = at;
    }
    coordinator
        .wait_for_state(ConnectionState::CircuitOpen)
        .await
        .unwrap();

    let probe = controller.next_open().await;
    assert_elapsed(previous, probe, Duration::from_secs(300));
    assert_eq!(coordinator.stats().circuit_opens, 2);
}

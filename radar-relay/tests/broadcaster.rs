mod common;

use common::{sample_tx, wait_until, LogRecorder, TIMEOUT};
use proptest::prelude::*;
use radar_core::{Hash, InventoryMessage, InventoryVector, Transaction};
use radar_network::{MemoryNetwork, PoolRole, StartOutcome};
use radar_relay::{Broadcaster, Logger, MonitorState, RelayError, Severity};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

fn started_broadcaster(
    network: &MemoryNetwork,
    logger: Logger,
) -> (Broadcaster, mpsc::Receiver<Hash>) {
    let broadcaster = Broadcaster::new(Arc::new(network.clone()), logger);
    let (tx_sender, tx_receiver) = mpsc::channel();
    let (started_sender, started_receiver) = mpsc::channel();

    broadcaster
        .start(
            2,
            4,
            4,
            move |hash| {
                let _ = tx_sender.send(hash);
                Ok(())
            },
            move |failure| {
                let _ = started_sender.send(failure);
                Ok(())
            },
        )
        .unwrap();

    assert_eq!(started_receiver.recv_timeout(TIMEOUT).unwrap(), None);
    assert_eq!(broadcaster.state(), MonitorState::Running);
    (broadcaster, tx_receiver)
}

/// One broadcaster shared by every proptest case
fn shared_broadcaster() -> &'static (Broadcaster, MemoryNetwork) {
    static SHARED: OnceLock<(Broadcaster, MemoryNetwork)> = OnceLock::new();
    SHARED.get_or_init(|| {
        let network = MemoryNetwork::new();
        let (broadcaster, _) = started_broadcaster(&network, Logger::silent());
        (broadcaster, network)
    })
}

proptest! {
    #[test]
    fn truncated_transactions_are_rejected(len in 0usize..60) {
        let raw = sample_tx();

        let (broadcaster, network) = shared_broadcaster();
        prop_assert!(!broadcaster.broadcast(&raw[..len]));

        let pool = network.pool(PoolRole::Broadcast).unwrap();
        prop_assert!(pool.broadcasts().is_empty());
    }
}

#[test]
fn test_valid_transaction_is_submitted_once() {
    let network = MemoryNetwork::new();
    let (broadcaster, _) = started_broadcaster(&network, Logger::silent());

    let raw = sample_tx();
    assert!(broadcaster.broadcast(&raw));

    let broadcasts = network.pool(PoolRole::Broadcast).unwrap().broadcasts();
    assert_eq!(broadcasts, vec![Transaction::parse(&raw).unwrap()]);
    assert!(network.pool(PoolRole::Monitor).unwrap().broadcasts().is_empty());

    broadcaster.stop().unwrap();
    assert_eq!(broadcaster.state(), MonitorState::Stopped);
}

#[test]
fn test_broadcast_before_start_fails() {
    let network = MemoryNetwork::new();
    let broadcaster = Broadcaster::new(Arc::new(network.clone()), Logger::silent());

    assert!(!broadcaster.broadcast(&sample_tx()));
    assert_eq!(network.pool_count(), 0);
    assert!(matches!(broadcaster.stop(), Err(RelayError::NotStarted)));
}

#[test]
fn test_broadcast_pool_failure_skips_monitor_pool() {
    let network = MemoryNetwork::new();
    network.script_start(PoolRole::Broadcast, vec![StartOutcome::Fail("no seeds".into())]);
    let recorder = LogRecorder::default();
    let broadcaster = Broadcaster::new(Arc::new(network.clone()), recorder.logger());

    let (started_sender, started_receiver) = mpsc::channel();
    broadcaster
        .start(
            2,
            4,
            4,
            |_| Ok(()),
            move |failure| {
                let _ = started_sender.send(failure);
                Ok(())
            },
        )
        .unwrap();

    let failure = started_receiver.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(failure.as_deref(), Some("Peer connection error: no seeds"));
    assert!(started_receiver
        .recv_timeout(Duration::from_millis(200))
        .is_err());

    assert_eq!(network.pool(PoolRole::Broadcast).unwrap().start_calls(), 1);
    assert_eq!(network.pool(PoolRole::Monitor).unwrap().start_calls(), 0);
    assert_eq!(broadcaster.state(), MonitorState::Starting);
    assert!(wait_until(|| recorder.count(Severity::Error, "Broadcast pool failed to start") == 1));

    broadcaster.stop().unwrap();
}

#[test]
fn test_monitor_pool_failure_is_reported() {
    let network = MemoryNetwork::new();
    network.script_start(PoolRole::Monitor, vec![StartOutcome::Fail("refused".into())]);
    let broadcaster = Broadcaster::new(Arc::new(network.clone()), Logger::silent());

    let (started_sender, started_receiver) = mpsc::channel();
    broadcaster
        .start(
            1,
            2,
            2,
            |_| Ok(()),
            move |failure| {
                let _ = started_sender.send(failure);
                Ok(())
            },
        )
        .unwrap();

    let failure = started_receiver.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(failure.as_deref(), Some("Peer connection error: refused"));
    assert_eq!(network.pool(PoolRole::Broadcast).unwrap().start_calls(), 1);
    assert_eq!(network.pool(PoolRole::Monitor).unwrap().start_calls(), 1);
    broadcaster.stop().unwrap();
}

#[test]
fn test_announcements_reach_host() {
    let network = MemoryNetwork::new();
    let (broadcaster, hashes) = started_broadcaster(&network, Logger::silent());

    let monitor = network.pool(PoolRole::Monitor).unwrap();
    let connection = monitor.connect();
    let hash = Hash::new([0x42; 32]);
    connection.announce(InventoryMessage::new(vec![InventoryVector::transaction(hash)]));

    assert_eq!(hashes.recv_timeout(TIMEOUT).unwrap(), hash);
    broadcaster.stop().unwrap();
    assert!(monitor.is_stopped());
}

#[test]
fn test_start_twice_is_rejected() {
    let network = MemoryNetwork::new();
    let (broadcaster, _) = started_broadcaster(&network, Logger::silent());

    assert!(matches!(
        broadcaster.start(1, 1, 1, |_| Ok(()), |_| Ok(())),
        Err(RelayError::AlreadyStarted)
    ));
    broadcaster.stop().unwrap();
    assert!(!broadcaster.broadcast(&sample_tx()));
}

#[test]
fn test_broadcast_pool_announcements_are_consumed_silently() {
    let network = MemoryNetwork::new();
    let (broadcaster, hashes) = started_broadcaster(&network, Logger::silent());

    let pool = network.pool(PoolRole::Broadcast).unwrap();
    assert!(wait_until(|| pool.connection_subscriptions() == 1));
    let connection = pool.connect();
    for n in 0..20u8 {
        assert!(connection.announce(InventoryMessage::new(vec![
            InventoryVector::transaction(Hash::new([n; 32])),
        ])));
    }

    assert!(wait_until(|| {
        connection.inventory_subscriptions() == 21 && connection.has_pending_subscription()
    }));
    assert!(wait_until(|| pool.connection_subscriptions() == 2));
    assert!(hashes.recv_timeout(Duration::from_millis(200)).is_err());

    broadcaster.stop().unwrap();
    assert!(pool.is_stopped());
}

//! Integration tests for key pairing over real TCP connections.

use astview_core::remoting::Endpoint;
use astview_core::services::RegistryProxy;
use astview_core::{BrokerHandle, BrokerSettings, ConnectionBroker, RemotingError, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

async fn start_broker() -> BrokerHandle {
    ConnectionBroker::bind(BrokerSettings::ephemeral())
        .await
        .expect("Failed to bind broker")
}

/// Connect like a view process would and return its registry proxy.
async fn connect_view(handle: &BrokerHandle) -> (Endpoint, RegistryProxy) {
    let stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    let endpoint = Endpoint::open(stream);
    let registry = endpoint.proxy();
    (endpoint, registry)
}

fn counting(counter: &Arc<AtomicUsize>) -> impl FnOnce(Endpoint) -> futures::future::Ready<Result<()>> {
    let counter = counter.clone();
    move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Ok(()))
    }
}

#[test]
fn test_issued_keys_are_unique() {
    let broker = ConnectionBroker::new("localhost", 1235);
    let mut seen = HashSet::new();
    for _ in 0..10_000 {
        assert!(seen.insert(broker.issue_key()));
    }
}

#[tokio::test]
async fn test_known_key_pairs_and_runs_callback() {
    let handle = start_broker().await;
    let broker = handle.broker();

    // Host side: key "1" is the first one issued.
    let key = broker.issue_key();
    assert_eq!(key, "1");
    let address = broker.address_for(&key);
    assert_eq!(address.host, "127.0.0.1");
    assert_eq!(address.port, handle.local_addr().port());

    let calls = Arc::new(AtomicUsize::new(0));
    let pairing = broker.register_pending(&key, counting(&calls)).unwrap();

    let (_view, registry) = connect_view(&handle).await;
    registry.register(&address.key).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let endpoint = tokio::time::timeout(Duration::from_secs(1), pairing.paired())
        .await
        .expect("pairing resolves")
        .unwrap();
    assert!(!endpoint.is_closed());
}

#[tokio::test]
async fn test_unknown_key_is_rejected_and_broker_keeps_serving() {
    let handle = start_broker().await;
    let broker = handle.broker();

    let calls = Arc::new(AtomicUsize::new(0));
    let key = broker.issue_key();
    let pairing = broker.register_pending(&key, counting(&calls)).unwrap();

    let (_stray, stray_registry) = connect_view(&handle).await;
    let err = stray_registry.register("99").await.unwrap_err();
    match err {
        RemotingError::UnexpectedConnection { key } => assert_eq!(key, "99"),
        other => panic!("Expected UnexpectedConnection, got: {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(broker.is_pending(&key));

    let (_view, registry) = connect_view(&handle).await;
    registry.register(&key).await.unwrap();
    assert!(pairing.paired().await.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_each_key_resolves_only_its_own_registration() {
    let handle = start_broker().await;
    let broker = handle.broker();

    let counters: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let keys: Vec<String> = (0..3).map(|_| broker.issue_key()).collect();
    let mut pairings: Vec<_> = keys
        .iter()
        .zip(&counters)
        .map(|(key, counter)| broker.register_pending(key, counting(counter)).unwrap())
        .collect();

    let (_view, registry) = connect_view(&handle).await;
    registry.register(&keys[1]).await.unwrap();

    assert_eq!(counters[0].load(Ordering::SeqCst), 0);
    assert_eq!(counters[1].load(Ordering::SeqCst), 1);
    assert_eq!(counters[2].load(Ordering::SeqCst), 0);
    assert!(pairings.remove(1).paired().await.is_ok());
    assert_eq!(broker.pending_count(), 2);
}

#[tokio::test]
async fn test_key_pairs_at_most_once() {
    let handle = start_broker().await;
    let broker = handle.broker();

    let calls = Arc::new(AtomicUsize::new(0));
    let key = broker.issue_key();
    let _pairing = broker.register_pending(&key, counting(&calls)).unwrap();

    let (_first, first) = connect_view(&handle).await;
    let (_second, second) = connect_view(&handle).await;

    let (a, b) = tokio::join!(first.register(&key), second.register(&key));
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    let failure = if a.is_err() { a } else { b };
    assert!(matches!(
        failure,
        Err(RemotingError::UnexpectedConnection { .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_closes_open_connections() {
    let mut handle = start_broker().await;
    let (view, _registry) = connect_view(&handle).await;

    // Give the accept loop a moment to pick the connection up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.shutdown();

    tokio::time::timeout(Duration::from_secs(2), view.closed())
        .await
        .expect("view sees the connection close");
}

#[tokio::test]
async fn test_idle_connections_do_not_lock_out_views() {
    let handle = start_broker().await;
    let broker = handle.broker();

    let mut idle = Vec::new();
    for _ in 0..80 {
        idle.push(TcpStream::connect(handle.local_addr()).await.unwrap());
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let key = broker.issue_key();
    let pairing = broker.register_pending(&key, counting(&calls)).unwrap();

    let (_view, registry) = connect_view(&handle).await;
    tokio::time::timeout(Duration::from_secs(2), registry.register(&key))
        .await
        .expect("register answers")
        .unwrap();
    pairing.paired().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    drop(idle);
}

#[tokio::test]
async fn test_configured_connection_cap_rejects_extra_connections() {
    let handle = ConnectionBroker::bind(BrokerSettings::ephemeral().with_max_connections(Some(1)))
        .await
        .unwrap();
    let broker = handle.broker();

    let (_first, first_registry) = connect_view(&handle).await;
    let err = first_registry.register("99").await.unwrap_err();
    assert!(matches!(err, RemotingError::UnexpectedConnection { .. }));

    let (second, second_registry) = connect_view(&handle).await;
    let key = broker.issue_key();
    let calls = Arc::new(AtomicUsize::new(0));
    let _pairing = broker.register_pending(&key, counting(&calls)).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), second_registry.register(&key))
        .await
        .expect("rejected connection is closed");
    assert!(matches!(result, Err(RemotingError::ChannelClosed)));
    assert!(second.is_closed());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

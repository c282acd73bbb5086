use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::timeout;

use nsm_monitor::monitor::{pipe, ChannelStream};
use nsm_monitor::telemetry::init_test_logging;
use nsm_monitor::wire;
use nsm_monitor::{
    BundleEventFactory, Connection, ConnectionEventFactory, EventFactory, EventStream, EventType,
    MonitorClient, MonitorClientConfig, MonitorServer, MonitorServerConfig, TransportError,
    TrustBundle,
};

const WAIT: Duration = Duration::from_secs(2);

async fn next_connection_event(
    stream: &mut ChannelStream<wire::ConnectionEvent>,
) -> nsm_monitor::Event {
    let msg = timeout(WAIT, stream.recv())
        .await
        .expect("timed out waiting for event")
        .expect("stream failed");
    ConnectionEventFactory::default().from_message(msg).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_subscriber_sees_snapshot_then_only_newer_changes() {
    init_test_logging();
    let cfg = MonitorServerConfig {
        outbound_queue_capacity: 128,
        ..MonitorServerConfig::default()
    };
    let server = MonitorServer::start(ConnectionEventFactory::default(), &cfg);

    let producer = server.clone();
    let produce = tokio::spawn(async move {
        for i in 0..50 {
            producer
                .update(Connection::new(format!("c{i:02}"), "svc"))
                .await
                .unwrap();
            tokio::task::yield_now().await;
        }
    });

    // Join while the producer is running.
    tokio::time::sleep(Duration::from_millis(1)).await;
    let (recipient, mut stream) = pipe(128);
    server.add_recipient(recipient).await.unwrap();
    produce.await.unwrap();

    let snapshot = next_connection_event(&mut stream).await;
    assert_eq!(snapshot.event_type(), EventType::InitialStateTransfer);
    let in_snapshot: BTreeSet<String> = snapshot.entities().keys().cloned().collect();

    let mut seen = in_snapshot.clone();
    while seen.len() < 50 {
        let event = next_connection_event(&mut stream).await;
        assert_eq!(event.event_type(), EventType::Update);
        for id in event.entities().keys() {
            assert!(
                !in_snapshot.contains(id),
                "{id} delivered both in the snapshot and as an update"
            );
            assert!(seen.insert(id.clone()), "{id} delivered twice");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_recipient_does_not_block_others() {
    init_test_logging();
    let server =
        MonitorServer::start(ConnectionEventFactory::default(), &MonitorServerConfig::default());

    // Drained for its snapshot only.
    let (stalled, mut stalled_stream) = pipe(1);
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let srv = server.clone();
    let stalled_task = tokio::spawn(async move {
        srv.monitor_entities(stalled, async move {
            let _ = cancel_rx.await;
        })
        .await
    });
    let snapshot = next_connection_event(&mut stalled_stream).await;
    assert_eq!(snapshot.event_type(), EventType::InitialStateTransfer);

    let (healthy, mut healthy_stream) = pipe(256);
    server.add_recipient(healthy).await.unwrap();
    let reader = tokio::spawn(async move {
        // Any resync snapshot counts too.
        let mut seen = BTreeSet::new();
        while seen.len() < 100 {
            let event = next_connection_event(&mut healthy_stream).await;
            seen.extend(event.entities().keys().cloned());
        }
    });

    for i in 0..100 {
        server
            .update(Connection::new(format!("c{i}"), "svc"))
            .await
            .unwrap();
        tokio::task::yield_now().await;
    }
    timeout(WAIT, reader).await.unwrap().unwrap();

    // Still registered until its subscriber goes away.
    assert!(!stalled_task.is_finished());
    cancel_tx.send(()).unwrap();
    timeout(WAIT, stalled_task).await.unwrap().unwrap().unwrap();

    let mut delivered = 0;
    loop {
        match timeout(WAIT, stalled_stream.recv()).await.unwrap() {
            Ok(_) => delivered += 1,
            Err(e) => {
                assert_eq!(e, TransportError::StreamClosed);
                break;
            }
        }
    }
    assert!(delivered < 100);
}

#[tokio::test]
async fn client_decodes_server_stream() {
    init_test_logging();
    let server =
        MonitorServer::start(ConnectionEventFactory::default(), &MonitorServerConfig::default());
    server.update(Connection::new("c1", "svc")).await.unwrap();

    let (recipient, stream) = pipe(8);
    server.add_recipient(recipient).await.unwrap();
    let mut client = MonitorClient::spawn(
        ConnectionEventFactory::default(),
        stream,
        &MonitorClientConfig::default(),
    );

    let snapshot = timeout(WAIT, client.recv()).await.unwrap().unwrap();
    assert_eq!(snapshot.event_type(), EventType::InitialStateTransfer);
    assert!(snapshot.entities().contains_key("c1"));

    server.delete(Connection::new("c1", "svc")).await.unwrap();
    let deleted = timeout(WAIT, client.recv()).await.unwrap().unwrap();
    assert_eq!(deleted.event_type(), EventType::Delete);
    assert!(deleted.entities().contains_key("c1"));
    assert!(server.entities().await.unwrap().is_empty());

    client.close();
}

#[tokio::test]
async fn bundle_monitor_reuses_the_same_machinery() {
    init_test_logging();
    let server =
        MonitorServer::start(BundleEventFactory::default(), &MonitorServerConfig::default());
    assert_eq!(server.name(), "bundles");
    server
        .update(TrustBundle::new("spiffe://a.example").with_root_ca(vec![0xde, 0xad]))
        .await
        .unwrap();

    let (recipient, stream) = pipe(8);
    server.add_recipient(recipient).await.unwrap();
    let mut client =
        MonitorClient::spawn(BundleEventFactory::default(), stream, &MonitorClientConfig::default());

    let snapshot = timeout(WAIT, client.recv()).await.unwrap().unwrap();
    assert_eq!(snapshot.event_type(), EventType::InitialStateTransfer);
    let bundle = &snapshot.entities()["spiffe://a.example"];
    assert_eq!(bundle.kind(), nsm_monitor::EntityKind::TrustBundle);

    server
        .update(TrustBundle::new("spiffe://b.example"))
        .await
        .unwrap();
    let update = timeout(WAIT, client.recv()).await.unwrap().unwrap();
    assert_eq!(update.event_type(), EventType::Update);
    assert_eq!(
        update.entities().keys().collect::<Vec<_>>(),
        vec!["spiffe://b.example"]
    );
}

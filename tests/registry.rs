//! End-to-end registry behaviour through the public chain API

use assert_matches::assert_matches;
use futures::StreamExt;
use registry_memory::{
    collect_entries, BeginStage, CallContext, Chain, EventKind, FindStream, MemoryRegistry, MetadataStage,
    NetworkService, NetworkServiceEndpoint, Path, PathSegment, Query, RefreshStage,
    RegistryConfig,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

fn started(config: RegistryConfig) -> Arc<MemoryRegistry> {
    let registry = MemoryRegistry::new(config).unwrap();
    registry.start();
    registry
}

fn nse(name: &str, service: &str) -> NetworkServiceEndpoint {
    NetworkServiceEndpoint::new(name)
        .with_url("tcp://127.0.0.1:5000")
        .with_service(service)
}

async fn find_by_name(
    chain: &Chain<NetworkServiceEndpoint>,
    name: &str,
) -> Vec<NetworkServiceEndpoint> {
    let stream = chain
        .find(
            &mut CallContext::new(),
            Query::new(NetworkServiceEndpoint::new(name)),
        )
        .await
        .unwrap();
    collect_entries(stream).await.unwrap()
}

#[tokio::test]
async fn test_register_find_round_trip() {
    let registry = started(RegistryConfig::default());
    let chain = registry.endpoint_chain();

    let registered = chain
        .register(&mut CallContext::new(), nse("", "ns-1"))
        .await
        .unwrap();
    assert!(!registered.name.is_empty());
    assert!(registered.expiration_time.is_some());

    let found = find_by_name(&chain, &registered.name).await;
    assert_eq!(found, vec![registered]);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_unregister_removes_and_is_idempotent() {
    let registry = started(RegistryConfig::default());
    let chain = registry.endpoint_chain();

    let registered = chain
        .register(&mut CallContext::new(), nse("nse-1", "ns-1"))
        .await
        .unwrap();
    chain
        .unregister(&mut CallContext::new(), registered.clone())
        .await
        .unwrap();
    assert!(find_by_name(&chain, "nse-1").await.is_empty());

    // Second unregister is not an error
    chain
        .unregister(&mut CallContext::new(), registered)
        .await
        .unwrap();

    registry.shutdown().await;
}

#[tokio::test]
async fn test_expired_endpoint_is_evicted() {
    let registry = started(RegistryConfig::default());
    let chain = registry.endpoint_chain();

    let entry = nse("nse-1", "ns-1")
        .with_expiration_time(chrono::Utc::now() + chrono::Duration::seconds(1));
    chain.register(&mut CallContext::new(), entry).await.unwrap();
    assert_eq!(find_by_name(&chain, "nse-1").await.len(), 1);

    let deadline = Instant::now() + Duration::from_secs(6);
    loop {
        if find_by_name(&chain, "nse-1").await.is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "endpoint outlived its expiration");
        sleep(Duration::from_millis(100)).await;
    }

    registry.shutdown().await;
}

#[tokio::test]
async fn test_refresh_keeps_endpoint_alive() {
    let config = RegistryConfig::default().with_expire_period(Duration::from_millis(300));
    let registry = started(config);

    let teardown = CancellationToken::new();
    let client = Chain::builder()
        .stage(BeginStage::new())
        .stage(RefreshStage::<NetworkServiceEndpoint>::new(&teardown))
        .stage(registry.endpoint_chain())
        .build();

    let registered = client
        .register(&mut CallContext::new(), nse("", "ns-1"))
        .await
        .unwrap();

    // Continuously findable for more than three lifetimes
    let until = Instant::now() + Duration::from_millis(1000);
    while Instant::now() < until {
        assert!(
            registry.endpoints().contains(&registered.name),
            "endpoint expired despite refresh"
        );
        sleep(Duration::from_millis(25)).await;
    }

    // Once refresh stops the endpoint expires
    teardown.cancel();
    sleep(Duration::from_millis(800)).await;
    assert!(!registry.endpoints().contains(&registered.name));

    registry.shutdown().await;
}

#[tokio::test]
async fn test_unregister_through_client_chain_stops_refresh() {
    let config = RegistryConfig::default().with_expire_period(Duration::from_millis(300));
    let registry = started(config);

    let teardown = CancellationToken::new();
    let client = Chain::builder()
        .stage(BeginStage::new())
        .stage(RefreshStage::<NetworkServiceEndpoint>::new(&teardown))
        .stage(registry.endpoint_chain())
        .build();

    let registered = client
        .register(&mut CallContext::new(), nse("nse-1", "ns-1"))
        .await
        .unwrap();
    client
        .unregister(&mut CallContext::new(), registered)
        .await
        .unwrap();

    // No refresh resurrects it
    sleep(Duration::from_millis(500)).await;
    assert!(!registry.endpoints().contains("nse-1"));

    registry.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_registration_isolation() {
    let registry = started(RegistryConfig::default());
    let chain = registry.endpoint_chain();

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let chain = chain.clone();
            tokio::spawn(async move {
                chain
                    .register(&mut CallContext::new(), nse(&format!("nse-{}", i), "ns-shared"))
                    .await
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let stream = chain
        .find(
            &mut CallContext::new(),
            Query::new(NetworkServiceEndpoint::for_service("ns-shared")),
        )
        .await
        .unwrap();
    let found = collect_entries(stream).await.unwrap();
    let names: HashSet<String> = found.into_iter().map(|e| e.name).collect();
    assert_eq!(names.len(), 10);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_generated_names_are_unique() {
    let registry = started(RegistryConfig::default());
    let chain = registry.endpoint_chain();

    let mut names = HashSet::new();
    for _ in 0..25 {
        let registered = chain
            .register(&mut CallContext::new(), nse("", "ns-1"))
            .await
            .unwrap();
        assert!(!registered.name.is_empty());
        names.insert(registered.name);
    }
    assert_eq!(names.len(), 25);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_inclusive_query_semantics() {
    let registry = started(RegistryConfig::default());
    let chain = registry.endpoint_chain();
    for (name, service) in [("nse-a", "ns-1"), ("nse-b", "ns-2"), ("nse-c", "ns-3")] {
        chain
            .register(&mut CallContext::new(), nse(name, service))
            .await
            .unwrap();
    }

    // Name matches nse-a, service matches nse-b
    let template = NetworkServiceEndpoint::new("nse-a").with_service("ns-2");
    let stream = chain
        .find(&mut CallContext::new(), Query::new(template))
        .await
        .unwrap();
    let names: Vec<String> = collect_entries(stream)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["nse-a", "nse-b"]);

    // No filter matches all
    let stream = chain
        .find(
            &mut CallContext::new(),
            Query::new(NetworkServiceEndpoint::default()),
        )
        .await
        .unwrap();
    assert_eq!(collect_entries(stream).await.unwrap().len(), 3);

    registry.shutdown().await;
}

async fn next_change(watch: &mut FindStream<NetworkServiceEndpoint>) -> (EventKind, String) {
    let event = timeout(Duration::from_secs(2), watch.next())
        .await
        .expect("watch stalled")
        .expect("watch ended")
        .expect("watch failed");
    (event.kind, event.entry.name)
}

#[tokio::test]
async fn test_watch_sees_changes_in_order() {
    let config = RegistryConfig::default().with_expire_period(Duration::from_millis(300));
    let registry = started(config);
    let chain = registry.endpoint_chain();

    chain
        .register(&mut CallContext::new(), nse("nse-1", "ns-1"))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let mut watch = chain
        .find(
            &mut CallContext::with_cancel(cancel.clone()),
            Query::watch(NetworkServiceEndpoint::for_service("ns-1")),
        )
        .await
        .unwrap();

    assert_eq!(next_change(&mut watch).await, (EventKind::Added, "nse-1".to_string()));

    chain
        .register(&mut CallContext::new(), nse("nse-2", "ns-1"))
        .await
        .unwrap();
    assert_eq!(next_change(&mut watch).await, (EventKind::Added, "nse-2".to_string()));

    chain
        .unregister(&mut CallContext::new(), NetworkServiceEndpoint::new("nse-2"))
        .await
        .unwrap();
    assert_eq!(next_change(&mut watch).await, (EventKind::Deleted, "nse-2".to_string()));

    // Expiration is reported as a deletion
    assert_eq!(next_change(&mut watch).await, (EventKind::Deleted, "nse-1".to_string()));

    cancel.cancel();
    let end = timeout(Duration::from_secs(1), watch.next()).await.unwrap();
    assert!(end.is_none());

    registry.shutdown().await;
}

#[tokio::test]
async fn test_path_survives_client_server_round_trip() {
    let registry = started(RegistryConfig {
        name: "registry-1".to_string(),
        ..Default::default()
    });

    let client = Chain::builder()
        .stage(MetadataStage::client())
        .stage(registry.service_chain())
        .build();

    let caller = PathSegment {
        name: "client".to_string(),
        id: "client-id".to_string(),
        ..Default::default()
    };
    let mut ctx = CallContext::new()
        .with_token("token-1")
        .with_path(Path {
            index: 0,
            segments: vec![caller.clone()],
        });

    client
        .register(&mut ctx, NetworkService::new("ns-1"))
        .await
        .unwrap();

    let path = ctx.path.unwrap();
    assert_eq!(path.index, 0);
    assert_eq!(path.segments[0], caller);
    assert_eq!(path.segments[1].name, "registry-1");
    assert_eq!(path.segments[1].token.as_deref(), Some("token-1"));

    registry.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_rejects_calls() {
    let registry = started(RegistryConfig::default());
    let chain = registry.service_chain();
    chain
        .register(&mut CallContext::new(), NetworkService::new("ns-1"))
        .await
        .unwrap();

    registry.shutdown().await;

    let result = chain
        .register(&mut CallContext::new(), NetworkService::new("ns-2"))
        .await;
    assert_matches!(result, Err(registry_memory::Error::ShuttingDown));
}

use std::sync::Arc;

use tonic::Status;

use crate::test_utils::enable_logger;
use crate::test_utils::tenant;
use crate::test_utils::test_channel_settings;
use crate::test_utils::MockConnector;
use crate::ApiDemux;
use crate::ApiError;
use crate::Error;
use crate::LifecycleComponent;
use crate::LifecycleStatus;
use crate::RouteEntry;
use crate::RoutingKey;
use crate::SelectionPolicy;

fn demux(connector: &Arc<MockConnector>) -> ApiDemux<MockConnector> {
    ApiDemux::new(
        "asset-management",
        connector.clone(),
        test_channel_settings(),
        SelectionPolicy::SingleTarget,
    )
}

async fn started_demux(
    connector: &Arc<MockConnector>,
    targets: &[&str],
) -> ApiDemux<MockConnector> {
    let demux = demux(connector).with_targets(targets.iter().map(|t| t.to_string()).collect());
    demux.start().await.unwrap();
    demux
}

fn collect(responses: Vec<(String, String)>) -> Vec<(String, String)> {
    responses
}

#[tokio::test]
async fn test_add_channel_rejects_duplicate_target() {
    let connector = Arc::new(MockConnector::new());
    let demux = demux(&connector);

    demux.add_channel("a:1").await.unwrap();
    let result = demux.add_channel("a:1").await;
    assert!(matches!(result, Err(Error::Api(ApiError::DuplicateTarget(t))) if t == "a:1"));
    assert_eq!(demux.len(), 1);
}

#[tokio::test]
async fn test_add_channel_removes_channel_that_fails_to_start() {
    let connector = Arc::new(MockConnector::new());
    let demux = demux(&connector);

    assert!(demux.add_channel("bad target").await.is_err());
    assert!(demux.is_empty());
    assert!(demux.get_channel_by_target("bad target").is_none());
}

#[tokio::test]
async fn test_invoke_round_robins_over_healthy_channels() {
    enable_logger();
    let connector = Arc::new(MockConnector::new());
    let demux = started_demux(&connector, &["a:1", "b:1"]).await;

    for _ in 0..4 {
        demux.invoke(|t| async move { t.call("ping").await }).await.unwrap();
    }
    assert_eq!(connector.endpoint("a:1").calls(), 2);
    assert_eq!(connector.endpoint("b:1").calls(), 2);
}

#[tokio::test]
async fn test_invoke_fails_fast_without_healthy_channel() {
    let connector = Arc::new(MockConnector::new());
    let empty = demux(&connector);
    let result = empty.invoke(|t| async move { t.call("ping").await }).await;
    assert!(matches!(result, Err(Error::Api(ApiError::NoHealthyChannel))));

    connector.endpoint("a:1").set_reachable(false);
    let demux = started_demux(&connector, &["a:1"]).await;
    assert!(demux.healthy_targets().is_empty());
    let result = demux.invoke(|t| async move { t.call("ping").await }).await;
    assert!(matches!(result, Err(Error::Api(ApiError::NoHealthyChannel))));
    assert_eq!(connector.endpoint("a:1").calls(), 0);
}

#[tokio::test]
async fn test_invoke_fails_over_on_unavailable() {
    enable_logger();
    let connector = Arc::new(MockConnector::new());
    let demux = started_demux(&connector, &["a:1", "b:1"]).await;

    // a looks healthy until its next call
    connector.endpoint("a:1").set_reachable(false);
    for _ in 0..3 {
        let response = demux.invoke(|t| async move { t.call("ping").await }).await.unwrap();
        assert_eq!(response, "b:1:ping");
    }
    assert_eq!(demux.healthy_targets(), vec!["b:1".to_string()]);
}

#[tokio::test]
async fn test_invoke_returns_application_errors_without_failover() {
    let connector = Arc::new(MockConnector::new());
    let demux = started_demux(&connector, &["a:1"]).await;
    connector
        .endpoint("a:1")
        .fail_with(Some(Status::invalid_argument("bad request")));

    let result = demux.invoke(|t| async move { t.call("ping").await }).await;
    assert!(matches!(result, Err(Error::Api(ApiError::Rpc { .. }))));
    assert_eq!(demux.healthy_targets(), vec!["a:1".to_string()]);
}

#[tokio::test]
async fn test_invoke_all_merges_and_reports_failures() {
    let connector = Arc::new(MockConnector::new());
    let demux = started_demux(&connector, &["c:1", "a:1", "b:1"]).await;
    connector
        .endpoint("b:1")
        .fail_with(Some(Status::internal("backend bug")));

    let result = demux
        .invoke_all(|t| async move { t.call("ping").await }, collect)
        .await
        .unwrap();

    assert_eq!(
        result.value,
        vec![
            ("a:1".to_string(), "a:1:ping".to_string()),
            ("c:1".to_string(), "c:1:ping".to_string()),
        ]
    );
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].0, "b:1");
}

#[tokio::test]
async fn test_invoke_routed_uses_tenant_route() {
    let connector = Arc::new(MockConnector::new());
    let demux = started_demux(&connector, &["a:1", "b:1"]).await;
    demux
        .set_route(
            RoutingKey::Tenant(tenant("acme")),
            vec!["b:1".to_string()],
            SelectionPolicy::SingleTarget,
        )
        .unwrap();

    for _ in 0..3 {
        let result = demux
            .invoke_routed(
                &RoutingKey::Tenant(tenant("acme")),
                |t| async move { t.call("ping").await },
                collect,
            )
            .await
            .unwrap();
        assert_eq!(result.value[0].1, "b:1:ping");
    }
    assert_eq!(connector.endpoint("a:1").calls(), 0);

    // unrouted tenants fall back to every channel
    let result = demux
        .invoke_routed(
            &RoutingKey::Tenant(tenant("other")),
            |t| async move { t.call("ping").await },
            collect,
        )
        .await
        .unwrap();
    assert_eq!(result.value.len(), 1);
}

#[tokio::test]
async fn test_invoke_routed_fan_out_route() {
    let connector = Arc::new(MockConnector::new());
    let demux = started_demux(&connector, &["a:1", "b:1", "c:1"]).await;
    demux
        .set_route(
            RoutingKey::Default,
            vec!["a:1".to_string(), "c:1".to_string()],
            SelectionPolicy::FanOut,
        )
        .unwrap();

    let result = demux
        .invoke_routed(
            &RoutingKey::Tenant(tenant("acme")),
            |t| async move { t.call("ping").await },
            collect,
        )
        .await
        .unwrap();
    let targets: Vec<&str> = result.value.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(targets, vec!["a:1", "c:1"]);
    assert!(result.failed.is_empty());
}

#[tokio::test]
async fn test_set_route_rejects_unknown_target() {
    let connector = Arc::new(MockConnector::new());
    let demux = started_demux(&connector, &["a:1"]).await;

    let result = demux.set_route(
        RoutingKey::Default,
        vec!["a:1".to_string(), "z:9".to_string()],
        SelectionPolicy::FanOut,
    );
    assert!(matches!(result, Err(Error::Api(ApiError::ChannelNotFound(t))) if t == "z:9"));
    assert!(demux.route(&RoutingKey::Default).is_none());
    assert!(!demux.clear_route(&RoutingKey::Default));
}

#[tokio::test]
async fn test_get_channel_follows_route() {
    let connector = Arc::new(MockConnector::new());
    let demux = started_demux(&connector, &["a:1", "b:1"]).await;
    let key = RoutingKey::Tenant(tenant("acme"));
    demux
        .set_route(key.clone(), vec!["b:1".to_string()], SelectionPolicy::SingleTarget)
        .unwrap();

    assert_eq!(demux.get_channel(&key).unwrap().target(), "b:1");
    assert!(demux.clear_route(&key));
    assert_eq!(demux.get_channel(&key).unwrap().target(), "a:1");
}

#[tokio::test]
async fn test_remove_channel() {
    let connector = Arc::new(MockConnector::new());
    let demux = started_demux(&connector, &["a:1", "b:1"]).await;
    let key = RoutingKey::Tenant(tenant("acme"));
    demux
        .set_route(
            key.clone(),
            vec!["a:1".to_string(), "b:1".to_string()],
            SelectionPolicy::FanOut,
        )
        .unwrap();
    let channel = demux.get_channel_by_target("a:1").unwrap();

    demux.remove_channel("a:1").await.unwrap();
    assert_eq!(channel.status(), LifecycleStatus::Stopped);
    assert_eq!(demux.targets(), vec!["b:1".to_string()]);
    assert_eq!(demux.route(&key).unwrap().targets, vec!["b:1".to_string()]);

    let result = demux.remove_channel("a:1").await;
    assert!(matches!(result, Err(Error::Api(ApiError::ChannelNotFound(_)))));
}

#[tokio::test]
async fn test_removing_last_channel_leaves_no_healthy_channel() {
    let connector = Arc::new(MockConnector::new());
    let demux = started_demux(&connector, &["a:1"]).await;
    demux.invoke(|t| async move { t.call("ping").await }).await.unwrap();
    assert_eq!(connector.endpoint("a:1").calls(), 1);

    demux.remove_channel("a:1").await.unwrap();
    assert!(demux.healthy_targets().is_empty());

    let result = demux.invoke(|t| async move { t.call("ping").await }).await;
    assert!(matches!(result, Err(Error::Api(ApiError::NoHealthyChannel))));
    assert_eq!(connector.endpoint("a:1").calls(), 1);
}

#[tokio::test]
async fn test_lifecycle_adds_initial_targets_and_routes() {
    let connector = Arc::new(MockConnector::new());
    let key = RoutingKey::Tenant(tenant("acme"));
    let demux = demux(&connector)
        .with_targets(vec!["a:1".to_string(), "b:1".to_string()])
        .with_route(
            key.clone(),
            RouteEntry {
                targets: vec!["a:1".to_string()],
                policy: SelectionPolicy::FanOut,
            },
        );

    assert_eq!(demux.start().await.unwrap(), LifecycleStatus::Started);
    assert_eq!(demux.healthy_targets(), vec!["a:1".to_string(), "b:1".to_string()]);
    assert_eq!(demux.route(&key).unwrap().policy, SelectionPolicy::FanOut);
    let channel = demux.get_channel_by_target("b:1").unwrap();

    assert_eq!(demux.stop().await.unwrap(), LifecycleStatus::Stopped);
    assert!(demux.is_empty());
    assert!(demux.route(&key).is_none());
    assert_eq!(channel.status(), LifecycleStatus::Stopped);

    // initial targets are added again on restart
    assert_eq!(demux.start().await.unwrap(), LifecycleStatus::Started);
    assert_eq!(demux.len(), 2);
}

#[tokio::test]
async fn test_start_fails_on_invalid_initial_target() {
    let connector = Arc::new(MockConnector::new());
    let demux = demux(&connector).with_targets(vec!["a:1".to_string(), "bad target".to_string()]);

    assert!(demux.start().await.is_err());
    assert_eq!(demux.status(), LifecycleStatus::Errored);

    // release tolerates the partially started state
    assert_eq!(demux.stop().await.unwrap(), LifecycleStatus::Stopped);
    assert!(demux.is_empty());
}

use devmgmt::proto::device::CreateDeviceAssignmentRequest;
use devmgmt::LifecycleComponent;
use devmgmt::MicroserviceBuilder;
use devmgmt::SelectionPolicy;
use devmgmt::TenantRouteConfig;
use tonic::Code;

use crate::common::client;
use crate::common::microservice_config;
use crate::common::start_backend;
use crate::common::wait_until;
use crate::common::with_tenant;
use crate::common::Backend;
use crate::common::WAIT_FOR_HEALTHY;

fn assign(asset_token: &str) -> CreateDeviceAssignmentRequest {
    CreateDeviceAssignmentRequest {
        device_token: "dev-1".into(),
        asset_token: asset_token.into(),
    }
}

#[tokio::test]
async fn test_fan_out_finds_asset_known_to_one_backend() {
    let events = start_backend(Backend::default()).await;
    let a1 = start_backend(Backend::default()).await;
    let a2 = start_backend(Backend::default().with_asset("acme", "crane-2", "Crane 2")).await;

    let mut config = microservice_config(events.addr, &[a1.addr, a2.addr]);
    config.asset_management.selection = SelectionPolicy::FanOut;
    let microservice = MicroserviceBuilder::new(config).build().unwrap();
    microservice.start().await.unwrap();
    let demux = microservice.asset_management_api_demux().clone();
    assert!(wait_until(WAIT_FOR_HEALTHY, || demux.healthy_targets().len() == 2).await);

    let mut client = client(microservice.local_addr().unwrap()).await;
    let assignment = client
        .create_device_assignment(with_tenant("acme", assign("crane-2")))
        .await
        .unwrap()
        .into_inner()
        .assignment
        .unwrap();
    assert_eq!(assignment.asset_name, "Crane 2");
    assert_eq!(a1.backend.asset_calls(), 1);
    assert_eq!(a2.backend.asset_calls(), 1);
    assert_eq!(events.backend.events().len(), 1);

    microservice.stop().await.unwrap();
}

#[tokio::test]
async fn test_tenant_route_pins_lookups_to_its_backends() {
    let events = start_backend(Backend::default()).await;
    let shared = start_backend(Backend::default()).await;
    let dedicated = start_backend(Backend::default().with_asset("acme", "press-1", "Press 1")).await;

    let mut config = microservice_config(events.addr, &[shared.addr, dedicated.addr]);
    config.asset_management.routes = vec![TenantRouteConfig {
        tenant_id: "acme".to_string(),
        targets: vec![dedicated.addr.to_string()],
        selection: SelectionPolicy::SingleTarget,
    }];
    let microservice = MicroserviceBuilder::new(config).build().unwrap();
    microservice.start().await.unwrap();
    let demux = microservice.asset_management_api_demux().clone();
    assert!(wait_until(WAIT_FOR_HEALTHY, || demux.healthy_targets().len() == 2).await);

    let mut client = client(microservice.local_addr().unwrap()).await;
    for _ in 0..3 {
        microservice.asset_resolver().clear_cache();
        let assignment = client
            .create_device_assignment(with_tenant("acme", assign("press-1")))
            .await
            .unwrap()
            .into_inner()
            .assignment
            .unwrap();
        assert_eq!(assignment.asset_name, "Press 1");
    }
    assert_eq!(shared.backend.asset_calls(), 0);
    assert_eq!(dedicated.backend.asset_calls(), 3);

    microservice.stop().await.unwrap();
}

#[tokio::test]
async fn test_no_asset_backends_means_unavailable() {
    let events = start_backend(Backend::default()).await;
    let microservice = MicroserviceBuilder::new(microservice_config(events.addr, &[]))
        .build()
        .unwrap();
    microservice.start().await.unwrap();

    let mut client = client(microservice.local_addr().unwrap()).await;
    let status = client
        .create_device_assignment(with_tenant("acme", assign("anything")))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
    assert!(events.backend.events().is_empty());

    microservice.stop().await.unwrap();
}

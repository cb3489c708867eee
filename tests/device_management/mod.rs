use devmgmt::proto::device::CreateDeviceAssignmentRequest;
use devmgmt::proto::device::CreateDeviceRequest;
use devmgmt::proto::device::GetDeviceByTokenRequest;
use devmgmt::proto::device::ListDevicesRequest;
use devmgmt::LifecycleComponent;
use devmgmt::LifecycleStatus;
use devmgmt::MicroserviceBuilder;
use devmgmt::TenantId;
use tonic::Code;

use crate::common::client;
use crate::common::enable_logger;
use crate::common::microservice_config;
use crate::common::start_backend;
use crate::common::wait_until;
use crate::common::with_tenant;
use crate::common::Backend;
use crate::common::WAIT_FOR_HEALTHY;

#[tokio::test]
async fn test_device_and_assignment_round_trip() {
    enable_logger();
    let backend = start_backend(Backend::default().with_asset("acme", "pump-7", "Pump 7")).await;
    let microservice = MicroserviceBuilder::new(microservice_config(backend.addr, &[backend.addr]))
        .build()
        .unwrap();
    microservice.start().await.unwrap();
    let demux = microservice.asset_management_api_demux().clone();
    assert!(wait_until(WAIT_FOR_HEALTHY, || !demux.healthy_targets().is_empty()).await);

    let mut client = client(microservice.local_addr().unwrap()).await;

    let device = client
        .create_device(with_tenant(
            "acme",
            CreateDeviceRequest {
                name: "Valve".into(),
                device_type: "actuator".into(),
                ..Default::default()
            },
        ))
        .await
        .unwrap()
        .into_inner()
        .device
        .unwrap();
    assert!(!device.token.is_empty());

    let fetched = client
        .get_device_by_token(with_tenant(
            "acme",
            GetDeviceByTokenRequest {
                token: device.token.clone(),
            },
        ))
        .await
        .unwrap()
        .into_inner()
        .device
        .unwrap();
    assert_eq!(fetched, device);

    let devices = client
        .list_devices(with_tenant("acme", ListDevicesRequest::default()))
        .await
        .unwrap()
        .into_inner()
        .devices;
    let tokens: Vec<&str> = devices.iter().map(|d| d.token.as_str()).collect();
    assert!(tokens.contains(&"dev-1"));
    assert!(tokens.contains(&device.token.as_str()));

    for _ in 0..2 {
        let assignment = client
            .create_device_assignment(with_tenant(
                "acme",
                CreateDeviceAssignmentRequest {
                    device_token: device.token.clone(),
                    asset_token: "pump-7".into(),
                },
            ))
            .await
            .unwrap()
            .into_inner()
            .assignment
            .unwrap();
        assert_eq!(assignment.asset_name, "Pump 7");
    }

    // second assignment is served from the asset cache
    assert_eq!(backend.backend.asset_calls(), 1);
    let events = backend.backend.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.device_token == device.token && e.tenant_id == "acme"));

    microservice.stop().await.unwrap();
}

#[tokio::test]
async fn test_requests_without_a_ready_tenant_are_rejected() {
    let backend = start_backend(Backend::default()).await;
    let microservice = MicroserviceBuilder::new(microservice_config(backend.addr, &[backend.addr]))
        .build()
        .unwrap();
    microservice.start().await.unwrap();
    let mut client = client(microservice.local_addr().unwrap()).await;

    let status = client
        .list_devices(tonic::Request::new(ListDevicesRequest::default()))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = client
        .list_devices(with_tenant("globex", ListDevicesRequest::default()))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);

    let status = client
        .create_device_assignment(with_tenant(
            "acme",
            CreateDeviceAssignmentRequest {
                device_token: "dev-1".into(),
                asset_token: "unknown".into(),
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
    assert!(backend.backend.events().is_empty());

    microservice.stop().await.unwrap();
}

#[tokio::test]
async fn test_tenant_engine_can_be_stopped_and_restarted_at_runtime() {
    let backend = start_backend(Backend::default()).await;
    let microservice = MicroserviceBuilder::new(microservice_config(backend.addr, &[backend.addr]))
        .build()
        .unwrap();
    microservice.start().await.unwrap();
    let mut client = client(microservice.local_addr().unwrap()).await;
    let manager = microservice.tenant_engine_manager();
    let acme = TenantId::new("acme").unwrap();

    assert_eq!(manager.stop_engine(&acme).await.unwrap(), LifecycleStatus::Stopped);
    let status = client
        .list_devices(with_tenant("acme", ListDevicesRequest::default()))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);

    assert_eq!(manager.restart_engine(&acme).await.unwrap(), LifecycleStatus::Started);
    let devices = client
        .list_devices(with_tenant("acme", ListDevicesRequest::default()))
        .await
        .unwrap()
        .into_inner()
        .devices;
    assert_eq!(devices.len(), 1);

    manager.remove_engine(&acme).await.unwrap();
    assert!(!manager.contains(&acme));
    let globex = TenantId::new("globex").unwrap();
    assert_eq!(
        manager.create_and_start_default_engine(&globex).await.unwrap(),
        LifecycleStatus::Errored
    );

    microservice.stop().await.unwrap();
}

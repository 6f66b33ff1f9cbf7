// Backend adapters against a mocked OpenShock API.

#![allow(clippy::unwrap_used)]

use secrecy::SecretString;
use serde_json::json;
use shockline_api::{ApiClient, ReconnectConfig, TransportConfig};
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shockline_core::{
    ApiRoster, ConnectionFactory, CoreError, DeviceId, GatewayResolution, LiveFactory,
    RosterSource,
};

fn client(server: &MockServer) -> ApiClient {
    let token = SecretString::from("token".to_owned());
    ApiClient::new(
        Url::parse(&server.uri()).unwrap(),
        &token,
        &TransportConfig::default(),
    )
    .unwrap()
}

fn factory(server: &MockServer) -> LiveFactory {
    LiveFactory::new(
        client(server),
        SecretString::from("token".to_owned()),
        ReconnectConfig::default(),
    )
}

async fn mock_lcg(server: &MockServer, device: Uuid, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/1/devices/{device}/lcg")))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn roster_converts_devices() {
    let server = MockServer::start().await;
    let hub = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/1/shockers/own"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "id": hub,
                "name": "Desk hub",
                "shockers": [{ "id": Uuid::new_v4(), "name": "A", "rfId": 1, "model": "CaiXianlin" }]
            }]
        })))
        .mount(&server)
        .await;

    let devices = ApiRoster::new(client(&server))
        .fetch_devices()
        .await
        .unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, DeviceId::new(hub));
    assert_eq!(devices[0].shockers.len(), 1);
    assert!(devices[0].online_capable);
}

#[tokio::test]
async fn roster_reports_unauthenticated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1/shockers/own"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = ApiRoster::new(client(&server))
        .fetch_devices()
        .await
        .unwrap_err();
    assert!(err.is_unauthenticated());
}

#[tokio::test]
async fn gateway_answers_map_to_resolutions() {
    let server = MockServer::start().await;
    let (online, missing, offline, outdated, forbidden) = (
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
    );

    mock_lcg(
        &server,
        online,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "data": { "gateway": "eu1-gateway.openshock.app", "country": "NL" } })),
    )
    .await;
    mock_lcg(&server, missing, ResponseTemplate::new(404)).await;
    mock_lcg(
        &server,
        offline,
        ResponseTemplate::new(412).set_body_json(json!({ "type": "Device.NotOnline" })),
    )
    .await;
    mock_lcg(
        &server,
        outdated,
        ResponseTemplate::new(412).set_body_json(json!({ "type": "Device.NotConnectedToGateway" })),
    )
    .await;
    mock_lcg(&server, forbidden, ResponseTemplate::new(401)).await;

    let factory = factory(&server);
    let resolve = |id: Uuid| factory.resolve_gateway(DeviceId::new(id));

    assert_eq!(
        resolve(online).await.unwrap(),
        GatewayResolution::Gateway("eu1-gateway.openshock.app".into())
    );
    assert_eq!(resolve(missing).await.unwrap(), GatewayResolution::NotFound);
    assert_eq!(resolve(offline).await.unwrap(), GatewayResolution::DeviceOffline);
    assert_eq!(resolve(outdated).await.unwrap(), GatewayResolution::OnlineNoGateway);
    assert_eq!(resolve(forbidden).await.unwrap(), GatewayResolution::Unauthenticated);
}

#[tokio::test]
async fn gateway_server_error_is_a_failure() {
    let server = MockServer::start().await;
    let device = Uuid::new_v4();
    mock_lcg(&server, device, ResponseTemplate::new(500)).await;

    let err = factory(&server)
        .resolve_gateway(DeviceId::new(device))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Api { status: Some(500), .. }));
}

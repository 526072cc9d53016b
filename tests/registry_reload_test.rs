use httpmock::{Method::GET, MockServer};
use ibp_geodns::registry::Registry;
use reqwest::Client;

const MEMBERS_JSON: &str = r#"{
    "alice": {
        "service": {"Active": 1, "ServiceIPv4": "1.2.3.4", "ServiceIPv6": ""},
        "membership": {"MemberLevel": 3},
        "Location": {"Latitude": 51.5, "Longitude": -0.1},
        "ServiceAssignments": {"polkadot": ["relay"]}
    }
}"#;

const SERVICES_JSON: &str = r#"{
    "relay": {
        "Configuration": {"Active": 1, "LevelRequired": 1, "NetworkName": "Polkadot"},
        "Providers": {"p1": {"RpcUrls": ["wss://rpc.example.net/ws"]}}
    }
}"#;

#[tokio::test]
async fn reload_derives_endpoints_from_fetched_registries() {
    let server = MockServer::start_async().await;
    let members_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/members.json");
            then.status(200)
                .header("content-type", "application/json")
                .body(MEMBERS_JSON);
        })
        .await;
    let services_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/services.json");
            then.status(200)
                .header("content-type", "application/json")
                .body(SERVICES_JSON);
        })
        .await;

    let registry = Registry::new(
        Client::new(),
        format!("{}/members.json", server.base_url()),
        format!("{}/services.json", server.base_url()),
    );
    registry.reload().await;

    members_mock.assert();
    services_mock.assert();
    let topology = registry.snapshot();
    assert!(topology.endpoints["rpc.example.net"].contains_key("alice"));
}

#[tokio::test]
async fn reload_retains_previous_snapshot_on_fetch_failure() {
    let server = MockServer::start_async().await;
    let members_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/members.json");
            then.status(200)
                .header("content-type", "application/json")
                .body(MEMBERS_JSON);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/services.json");
            then.status(200)
                .header("content-type", "application/json")
                .body(SERVICES_JSON);
        })
        .await;

    let registry = Registry::new(
        Client::new(),
        format!("{}/members.json", server.base_url()),
        format!("{}/services.json", server.base_url()),
    );
    registry.reload().await;
    members_mock.assert();
    assert!(registry.snapshot().endpoints.contains_key("rpc.example.net"));

    // Now point at a members URL that 500s — the previous snapshot must survive.
    let broken = server
        .mock_async(|when, then| {
            when.method(GET).path("/members-broken.json");
            then.status(500);
        })
        .await;
    let broken_registry = Registry::new(
        Client::new(),
        format!("{}/members-broken.json", server.base_url()),
        format!("{}/services.json", server.base_url()),
    );
    broken_registry.reload().await;
    broken.assert();
    assert!(broken_registry.snapshot().endpoints.is_empty());
}

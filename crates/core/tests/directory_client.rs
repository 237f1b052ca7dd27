//! `DirectoryClient` against a mock HTTP server.

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use membersync_core::config::DirectoryConfig;
use membersync_core::directory::{ApiSurface, DirectoryClient, DirectoryRequest, DirectoryTransport};
use membersync_core::errors::DirectoryError;

// ===========================================================================
// Helpers
// ===========================================================================

fn config(server: &MockServer) -> DirectoryConfig {
    DirectoryConfig {
        api_url: format!("{}/v1", server.uri()),
        rest_url: format!("{}/rest", server.uri()),
        max_attempts: 3,
        burst_size: 100,
        period_ms: 1000,
        retry_base_ms: 1,
        ..Default::default()
    }
}

fn client(server: &MockServer) -> DirectoryClient {
    DirectoryClient::new(&config(server), "secret-token").unwrap()
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn test_get_sends_token_and_decodes_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/group/g1/roles"))
        .and(header("authorization", "token secret-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "name": "Org Admin", "publicId": "id-org-admin" }])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let value = client(&server)
        .request(&DirectoryRequest::get(ApiSurface::V1, "/group/g1/roles"))
        .await
        .unwrap();
    assert_eq!(value[0]["publicId"], "id-org-admin");
}

#[tokio::test]
async fn test_put_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/org/o1/members/update/u1"))
        .and(body_json(json!({ "rolePublicId": "id-org-admin" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let request = DirectoryRequest::put(
        "/org/o1/members/update/u1",
        json!({ "rolePublicId": "id-org-admin" }),
    );
    let value = client(&server).request(&request).await.unwrap();
    assert_eq!(value["ok"], true);
}

#[tokio::test]
async fn test_rest_invite_uses_rest_surface_and_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/orgs/o1/invites"))
        .and(query_param("version", "2022-10-06"))
        .and(header("content-type", "application/vnd.api+json"))
        .and(body_json(json!({ "email": "new@acme.com", "role": "id-org-collab" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "data": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let request = DirectoryRequest::post(
        ApiSurface::Rest,
        "/orgs/o1/invites?version=2022-10-06",
        json!({ "email": "new@acme.com", "role": "id-org-collab" }),
    );
    client(&server).request(&request).await.unwrap();
}

#[tokio::test]
async fn test_empty_body_decodes_as_null() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/org/o1/members/u1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let value = client(&server)
        .request(&DirectoryRequest::delete("/org/o1/members/u1"))
        .await
        .unwrap();
    assert!(value.is_null());
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/orgs"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/orgs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "orgs": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let value = client(&server)
        .request(&DirectoryRequest::get(ApiSurface::V1, "/orgs"))
        .await
        .unwrap();
    assert_eq!(value["orgs"], json!([]));
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/org/o1/members/u9"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "code": 404, "message": "User not found" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .request(&DirectoryRequest::delete("/org/o1/members/u9"))
        .await
        .unwrap_err();
    match err {
        DirectoryError::ApiError { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "User not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unauthorized_maps_to_authentication_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/orgs"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "Invalid auth token" })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .request(&DirectoryRequest::get(ApiSurface::V1, "/orgs"))
        .await
        .unwrap_err();
    assert!(matches!(err, DirectoryError::AuthenticationFailed(_)));
    assert!(err.message().contains("Invalid auth token"));
}

#[tokio::test]
async fn test_persistent_rate_limit_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/orgs"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server)
        .request(&DirectoryRequest::get(ApiSurface::V1, "/orgs"))
        .await
        .unwrap_err();
    assert!(matches!(err, DirectoryError::RateLimited { attempts: 3 }));
}

mod common;

use common::*;
use dingtalk_auth::{ApiError, AuthEvent, AuthorizedClient};
use serde_json::json;

async fn client_with_session(server: &MockServer) -> AuthorizedClient {
    let session = session_store();
    session.save("T1", Some(&json!({ "id": 7 }))).unwrap();
    AuthorizedClient::new("/api", server.page_url("/dashboard"), session).with_http_client(http_client())
}

#[tokio::test]
async fn test_me_sends_bearer_token() {
    let server = MockServer::start().await;
    server.route(
        "GET",
        ME_PATH,
        Reply::json(200, json!({ "data": { "user": { "id": 7, "name": "Ada" } } })),
    );
    let client = client_with_session(&server).await;

    let user = client.me().await.unwrap();

    assert_eq!(user["name"], "Ada");
    let requests = server.requests_to(ME_PATH);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("Authorization"), Some("Bearer T1"));
}

#[tokio::test]
async fn test_stored_token_used_when_header_detached() {
    let server = MockServer::start().await;
    server.route("GET", ME_PATH, Reply::json(200, json!({ "user": { "id": 7 } })));
    let client = client_with_session(&server).await;
    client.session().authorization().clear();

    client.me().await.unwrap();

    assert_eq!(
        server.requests_to(ME_PATH)[0].header("authorization"),
        Some("Bearer T1")
    );
}

#[tokio::test]
async fn test_unauthorized_clears_session() {
    let server = MockServer::start().await;
    server.route("GET", ME_PATH, Reply::json(401, json!({ "message": "expired" })));
    let client = client_with_session(&server).await;
    let mut events = client.session().subscribe();

    let err = client.me().await.unwrap_err();

    assert!(matches!(err, ApiError::Unauthorized));
    assert_eq!(client.session().load().unwrap(), None);
    assert!(client.session().authorization().bearer().is_none());
    assert_eq!(events.try_recv().unwrap(), AuthEvent::UserUpdated);
}

#[tokio::test]
async fn test_other_errors_keep_session() {
    let server = MockServer::start().await;
    server.route(
        "GET",
        "/api/facebook/summary",
        Reply::json(500, json!({ "detail": "db down" })).with_header("X-Request-ID", "rid-9"),
    );
    let client = client_with_session(&server).await;

    let err = client.get_json("/facebook/summary").await.unwrap_err();

    match err {
        ApiError::Status {
            status,
            request_id,
            detail,
        } => {
            assert_eq!(status, 500);
            assert_eq!(request_id.as_deref(), Some("rid-9"));
            assert_eq!(detail.as_deref(), Some("db down"));
        }
        other => panic!("expected status error, got {:?}", other),
    }
    assert_eq!(client.session().stored_token().unwrap().as_deref(), Some("T1"));
}

#[tokio::test]
async fn test_refresh_user_updates_stored_profile() {
    let server = MockServer::start().await;
    server.route(
        "POST",
        REFRESH_USER_PATH,
        Reply::json(200, json!({ "user": { "id": 7, "name": "Ada Lovelace" } })),
    );
    let client = client_with_session(&server).await;
    let mut events = client.session().subscribe();

    let user = client.refresh_user().await.unwrap();

    assert_eq!(user["name"], "Ada Lovelace");
    assert_eq!(
        client.session().stored_user().unwrap(),
        Some(json!({ "id": 7, "name": "Ada Lovelace" }))
    );
    assert_eq!(events.try_recv().unwrap(), AuthEvent::UserUpdated);

    let requests = server.requests_to(REFRESH_USER_PATH);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].json(), json!({}));
}

#[tokio::test]
async fn test_post_json_duplicate_api_prefix() {
    let server = MockServer::start().await;
    server.route("POST", "/api/reports/query", Reply::json(200, json!({ "rows": [] })));
    let client = client_with_session(&server).await;

    let body = client
        .post_json("/api/reports/query", &json!({ "range": "7d" }))
        .await
        .unwrap();

    assert_eq!(body, json!({ "rows": [] }));
    assert_eq!(
        server.requests_to("/api/reports/query")[0].json(),
        json!({ "range": "7d" })
    );
}

#![forbid(unsafe_code)]

use serde_json::json;
use tfo_core::JobRef;
use tfo_poll::{HttpPollClient, PollClient, PollConfig, PollError};
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn login_ok(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"is_success": true, "data": {"status_info": {"status_code": 200, "message": "ok"}, "data": [token]}}))
}

async fn client_for(server: &MockServer) -> HttpPollClient {
    let base: Url = server.uri().parse().unwrap();
    HttpPollClient::new(PollConfig::new(base, "admin", "s3cret")).unwrap()
}

fn job() -> JobRef {
    JobRef::new("job1", "default", "outputs")
}

#[tokio::test]
async fn logs_in_once_and_polls_with_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_json(json!({"user": "admin", "password": "s3cret"})))
        .respond_with(login_ok("tok-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/poll/job1"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_success": true,
            "data": {"status_info": {"message": "done"}, "data": ["{\"kind\":\"ConfigMap\"}"]}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    for _ in 0..2 {
        let result = client.read(&job()).await.unwrap();
        assert!(result.is_success);
        assert_eq!(result.data.data, json!(["{\"kind\":\"ConfigMap\"}"]));
    }
}

#[tokio::test]
async fn error_envelope_on_404_is_returned_as_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).and(path("/login")).respond_with(login_ok("tok")).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/poll/job1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "is_success": false,
            "error_message": "terraforms.tf.isaaguilar.com \"job1\" not found"
        })))
        .mount(&server)
        .await;

    let result = client_for(&server).await.read(&job()).await.unwrap();
    assert!(!result.is_success);
    assert!(tfo_core::is_not_registered(&result.err_msg, "job1"));
}

#[tokio::test]
async fn plain_server_error_is_a_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).and(path("/login")).respond_with(login_ok("tok")).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/poll/job1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = client_for(&server).await.read(&job()).await.unwrap_err();
    assert!(matches!(err, PollError::Status { status: 502, .. }), "err={err}");
}

#[tokio::test]
async fn failed_login_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).and(path("/login")).respond_with(ResponseTemplate::new(403).set_body_string("denied")).mount(&server).await;

    let err = client_for(&server).await.read(&job()).await.unwrap_err();
    assert!(matches!(err, PollError::Login { .. }), "err={err}");
}

#[tokio::test]
async fn unauthorized_poll_triggers_one_relogin() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).and(path("/login")).respond_with(login_ok("tok")).expect(2).mount(&server).await;
    // first poll is rejected, the retry succeeds
    Mock::given(method("GET"))
        .and(path("/api/v1/poll/job1"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/poll/job1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"is_success": true, "data": {"data": []}})))
        .mount(&server)
        .await;

    let result = client_for(&server).await.read(&job()).await.unwrap();
    assert!(result.is_success);
}

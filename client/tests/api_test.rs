//! REST client tests against a mock WorkLogix server.

use std::time::Duration;

use chrono::NaiveDate;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use worklogix_client::api::{RetryPolicy, TimerClient};
use worklogix_client::error::ClientError;
use worklogix_client::types::{TaskStatus, TimerKey, TimerStatus};

const TOKEN: &str = "client-token";

fn key() -> TimerKey {
    TimerKey::new("t-1", "u-1", NaiveDate::from_ymd_opt(2024, 5, 14).unwrap())
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

fn client(server: &MockServer) -> TimerClient {
    TimerClient::new(server.uri(), Some(TOKEN.to_string()))
        .unwrap()
        .with_retry_policy(fast_retry())
}

fn running_body() -> serde_json::Value {
    json!({
        "totalSeconds": 100,
        "timerStatus": "running",
        "timerStartedAt": "2024-05-14T09:00:00Z"
    })
}

#[tokio::test]
async fn get_timer_sends_key_and_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/t-1/timer"))
        .and(query_param("userId", "u-1"))
        .and(query_param("date", "2024-05-14"))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(running_body()))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = client(&server).get_timer(&key()).await.unwrap();

    assert_eq!(snapshot.total_seconds, 100);
    assert_eq!(snapshot.timer_status, TimerStatus::Running);
    assert!(snapshot.timer_started_at.is_some());
}

#[tokio::test]
async fn get_timer_maps_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/t-1/timer"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"error": "timer not found", "code": "not_found"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).get_timer(&key()).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(ref msg) if msg == "timer not found"));
}

#[tokio::test]
async fn get_timer_retries_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/t-1/timer"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_json(json!({"error": "store busy", "code": "transient_io"})),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/t-1/timer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(running_body()))
        .mount(&server)
        .await;

    let snapshot = client(&server).get_timer(&key()).await.unwrap();

    assert_eq!(snapshot.total_seconds, 100);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn get_timer_gives_up_after_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server).get_timer(&key()).await.unwrap_err();
    assert!(matches!(err, ClientError::MaxRetriesExceeded { attempts: 3, .. }));
}

#[tokio::test]
async fn start_posts_key_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks/t-1/timer/start"))
        .and(body_json(json!({"userId": "u-1", "date": "2024-05-14"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(running_body()))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = client(&server).start(&key()).await.unwrap();
    assert_eq!(snapshot.timer_status, TimerStatus::Running);
}

#[tokio::test]
async fn mutations_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks/t-1/timer/pause"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_json(json!({"error": "store busy", "code": "transient_io"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).pause(&key()).await.unwrap_err();
    assert!(matches!(err, ClientError::Unavailable(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn pause_when_stopped_is_invalid_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks/t-1/timer/pause"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({"error": "timer is not running", "code": "invalid_state"})),
        )
        .mount(&server)
        .await;

    let err = client(&server).pause(&key()).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidState(_)));
}

#[tokio::test]
async fn complete_sends_advisory_duration() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks/t-1/timer/complete"))
        .and(body_json(json!({"userId": "u-1", "date": "2024-05-14", "duration": 25})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSeconds": 25,
            "timerStatus": "completed",
            "timerStartedAt": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = client(&server).complete(&key(), Some(25)).await.unwrap();
    assert_eq!(snapshot.total_seconds, 25);
    assert_eq!(snapshot.timer_status, TimerStatus::Completed);
    assert!(snapshot.timer_started_at.is_none());
}

#[tokio::test]
async fn bad_token_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": "invalid token", "code": "invalid_token"})),
        )
        .mount(&server)
        .await;

    let err = client(&server).start(&key()).await.unwrap_err();
    assert!(matches!(err, ClientError::Unauthorized(ref code) if code == "invalid_token"));
}

#[tokio::test]
async fn validation_errors_carry_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(
            json!({"error": "userId must not be empty", "code": "invalid_request"}),
        ))
        .mount(&server)
        .await;

    let err = client(&server).start(&key()).await.unwrap_err();
    match err {
        ClientError::Rejected { code, message } => {
            assert_eq!(code, "invalid_request");
            assert_eq!(message, "userId must not be empty");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn get_task_reads_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/t-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "t-1",
            "title": "Quarterly report",
            "status": "completed",
            "updatedAt": "2024-05-14T09:00:35Z"
        })))
        .mount(&server)
        .await;

    let task = client(&server).get_task("t-1").await.unwrap();
    assert_eq!(task.id, "t-1");
    assert_eq!(task.title, "Quarterly report");
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn client_without_token_sends_no_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(running_body()))
        .mount(&server)
        .await;

    TimerClient::new(server.uri(), None)
        .unwrap()
        .get_timer(&key())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn task_id_is_escaped_into_one_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/t%2F1%3Fx/timer"))
        .and(query_param("userId", "u-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(running_body()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tasks/t%2F1%3Fx/timer/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(running_body()))
        .expect(1)
        .mount(&server)
        .await;

    let odd = TimerKey::new("t/1?x", "u-1", NaiveDate::from_ymd_opt(2024, 5, 14).unwrap());
    let client = client(&server);
    client.get_timer(&odd).await.unwrap();
    client.start(&odd).await.unwrap();
}

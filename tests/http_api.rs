//! Integration tests for the HTTP onboarding client.
//!
//! Each test spins up an Axum server on a random port that imitates the board
//! service, then exercises `HttpOnboardingApi` against it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use board_onboarding::config::ApiConfig;
use board_onboarding::error::ApiError;
use board_onboarding::onboarding::{
    AlwaysActive, AnswerPayload, ConversationPhase, HttpOnboardingApi, OnboardingApi,
    OnboardingController, Role, SessionStatus,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct Recorded {
    auth_headers: Arc<Mutex<Vec<String>>>,
    answer_bodies: Arc<Mutex<Vec<Value>>>,
}

fn session_json(board_id: &str, status: &str, messages: Value) -> Value {
    json!({
        "id": "sess-1",
        "board_id": board_id,
        "session_key": "key-1",
        "status": status,
        "messages": messages,
        "draft_goal": null,
        "created_at": "2026-10-18T09:00:00Z",
        "updated_at": "2026-10-18T09:00:00Z"
    })
}

fn record_auth(state: &Recorded, headers: &HeaderMap) {
    let value = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    state.auth_headers.lock().unwrap().push(value);
}

async fn start(
    State(state): State<Recorded>,
    Path(board_id): Path<String>,
    headers: HeaderMap,
) -> Json<Value> {
    record_auth(&state, &headers);
    Json(session_json(
        &board_id,
        "active",
        json!([{
            "role": "assistant",
            "content": r#"{"question":"Pick a style","options":["Option A","Option B"]}"#,
            "timestamp": "2026-10-18T09:00:00"
        }]),
    ))
}

async fn fetch(Path((board_id, session_id)): Path<(String, String)>) -> Response {
    match session_id.as_str() {
        "broken" => (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable").into_response(),
        "partial" => Json(json!({"id": "partial", "status": "active"})).into_response(),
        "text" => (StatusCode::OK, "<html>maintenance</html>").into_response(),
        _ => Json(session_json(&board_id, "active", json!(null))).into_response(),
    }
}

async fn answer(
    State(state): State<Recorded>,
    Path((board_id, _session_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.answer_bodies.lock().unwrap().push(body.clone());
    Json(session_json(
        &board_id,
        "active",
        json!([
            {"role": "assistant", "content": "Pick a style"},
            {"role": "user", "content": body["answer"]}
        ]),
    ))
}

async fn confirm(Path((board_id, _session_id)): Path<(String, String)>) -> Json<Value> {
    let mut session = session_json(&board_id, "confirmed", json!([]));
    session["draft_goal"] = json!({"objective": "Ship it"});
    Json(session)
}

/// Start an Axum server on a random port, return (base URL, recorded requests).
async fn start_server() -> (String, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/api/v1/boards/{board_id}/onboarding/start", post(start))
        .route("/api/v1/boards/{board_id}/onboarding/{session_id}", get(fetch))
        .route(
            "/api/v1/boards/{board_id}/onboarding/{session_id}/answer",
            post(answer),
        )
        .route(
            "/api/v1/boards/{board_id}/onboarding/{session_id}/confirm",
            post(confirm),
        )
        .with_state(recorded.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}"), recorded)
}

#[tokio::test]
async fn start_decodes_session_and_sends_token() {
    timeout(TEST_TIMEOUT, async {
        let (base, recorded) = start_server().await;
        let api = HttpOnboardingApi::new(ApiConfig::new(base).with_token("secret-token")).unwrap();

        let session = api.start_session("board-7").await.unwrap();
        assert_eq!(session.id, "sess-1");
        assert_eq!(session.board_id, "board-7");
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, Role::Assistant);
        assert!(session.messages[0].timestamp.is_some());

        assert_eq!(
            *recorded.auth_headers.lock().unwrap(),
            vec!["Bearer secret-token".to_string()]
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn answer_posts_json_body() {
    timeout(TEST_TIMEOUT, async {
        let (base, recorded) = start_server().await;
        let api = HttpOnboardingApi::new(ApiConfig::new(base)).unwrap();

        let session = api
            .answer_session("board-7", "sess-1", &AnswerPayload::Option("Option A".into()))
            .await
            .unwrap();
        assert_eq!(session.messages.last().unwrap().content, "Option A");

        api.answer_session("board-7", "sess-1", &AnswerPayload::Other("A bit of both".into()))
            .await
            .unwrap();

        assert_eq!(
            *recorded.answer_bodies.lock().unwrap(),
            vec![
                json!({"answer": "Option A"}),
                json!({"answer": "Other", "other_text": "A bit of both"}),
            ]
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn null_messages_decode_as_empty() {
    timeout(TEST_TIMEOUT, async {
        let (base, _recorded) = start_server().await;
        let api = HttpOnboardingApi::new(ApiConfig::new(base)).unwrap();

        let session = api.get_session("board-7", "sess-1").await.unwrap();
        assert!(session.messages.is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn error_status_is_reported() {
    timeout(TEST_TIMEOUT, async {
        let (base, _recorded) = start_server().await;
        let api = HttpOnboardingApi::new(ApiConfig::new(base)).unwrap();

        match api.get_session("board-7", "broken").await {
            Err(ApiError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "database unavailable");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn incomplete_or_non_json_bodies_are_malformed() {
    timeout(TEST_TIMEOUT, async {
        let (base, _recorded) = start_server().await;
        let api = HttpOnboardingApi::new(ApiConfig::new(base)).unwrap();

        let partial = api.get_session("board-7", "partial").await.unwrap_err();
        assert!(partial.is_malformed(), "got {partial:?}");

        let text = api.get_session("board-7", "text").await.unwrap_err();
        assert!(text.is_malformed(), "got {text:?}");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    timeout(TEST_TIMEOUT, async {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let api = HttpOnboardingApi::new(ApiConfig::new(format!("http://127.0.0.1:{port}"))).unwrap();
        let err = api.start_session("board-7").await.unwrap_err();
        assert!(matches!(err, ApiError::Network { .. }), "got {err:?}");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn controller_runs_against_http_api() {
    timeout(TEST_TIMEOUT, async {
        let (base, _recorded) = start_server().await;
        let api: Arc<dyn OnboardingApi> =
            Arc::new(HttpOnboardingApi::new(ApiConfig::new(base)).unwrap());

        let controller = OnboardingController::mount(
            "board-7",
            api,
            Arc::new(AlwaysActive),
            Default::default(),
            || {},
        )
        .await;

        let view = controller.view();
        assert_eq!(view.phase, ConversationPhase::AwaitingUserAnswer);
        assert_eq!(view.message.unwrap().options(), ["Option A", "Option B"]);

        controller.select_option("Option B").await.unwrap();
        controller.submit_selection().await.unwrap();
        assert_eq!(controller.phase(), ConversationPhase::AwaitingAssistant);

        controller.shutdown().await;
    })
    .await
    .expect("test timed out");
}

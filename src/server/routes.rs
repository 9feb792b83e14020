//! HTTP route handlers for the study assistant API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::{Conversation, ConversationResult, ConversationStore};
use crate::llm::InferenceError;

use super::state::{AppState, Session};

/// Handler error: status plus a message for the user.
type ApiError = (StatusCode, String);

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))
        .route("/api/sessions/{id}/chat", post(chat_completion))
        .route("/api/sessions/{id}/new", post(new_conversation))
        .route("/api/sessions/{id}/select/{rank}", post(select_conversation))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "study-assistant",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.llm.model(),
        "sessions": state.session_count()
    }))
}

/// Response for a newly opened session.
#[derive(Debug, Serialize)]
pub struct SessionCreated {
    /// Identifier to use in subsequent requests.
    pub session_id: Uuid,
}

/// A saved conversation as shown in the history list.
#[derive(Debug, Serialize)]
pub struct SavedConversationDto {
    /// Position in most-recent-first order; pass this to `select`.
    pub rank: usize,
    /// Position in the underlying saved list.
    pub index: usize,
    /// Display label.
    pub title: String,
    /// Turns of the conversation.
    pub turns: Conversation,
}

/// Full view of a session's history.
#[derive(Debug, Serialize)]
pub struct SessionView {
    /// Session identifier.
    pub session_id: Uuid,
    /// When the session was opened.
    pub created_at: DateTime<Utc>,
    /// Conversation being extended.
    pub active: Conversation,
    /// Saved conversations, newest first.
    pub saved: Vec<SavedConversationDto>,
}

impl SessionView {
    fn build(session_id: Uuid, session: &Session) -> Self {
        Self {
            session_id,
            created_at: session.created_at,
            active: session.store.active().clone(),
            saved: saved_newest_first(&session.store),
        }
    }
}

fn saved_newest_first(store: &ConversationStore) -> Vec<SavedConversationDto> {
    let len = store.saved_len();
    store
        .list_saved()
        .enumerate()
        .rev()
        .map(|(index, conversation)| SavedConversationDto {
            rank: len - 1 - index,
            index,
            title: conversation.title(),
            turns: conversation.clone(),
        })
        .collect()
}

fn session_not_found(id: Uuid) -> ApiError {
    (StatusCode::NOT_FOUND, format!("Session {id} not found"))
}

/// Open a new session.
async fn create_session(State(state): State<Arc<AppState>>) -> Json<SessionCreated> {
    let session_id = state.create_session();
    tracing::info!("Opened session {session_id}");
    Json(SessionCreated { session_id })
}

/// Return the active conversation and saved history.
async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    state
        .with_session(id, |session| SessionView::build(id, session))
        .map(Json)
        .ok_or_else(|| session_not_found(id))
}

/// Chat request.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// The user's question.
    pub question: String,
}

/// Chat response.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    /// The assistant's answer.
    pub answer: String,
    /// Model used.
    pub model: String,
    /// Active conversation after the answer was recorded.
    pub active: Conversation,
}

/// Ask the model and record the exchange in the active conversation.
async fn chat_completion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.question.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Please enter a prompt first!".to_string(),
        ));
    }

    let history = state
        .with_session(id, |session| session.store.active().turns().to_vec())
        .ok_or_else(|| session_not_found(id))?;

    let llm = Arc::clone(&state.llm);
    let system_prompt = state.config.system_prompt.clone();
    let question = request.question.clone();
    let (history, answer) = tokio::task::spawn_blocking(move || {
        let answer = llm.complete(&system_prompt, &history, &question);
        (history, answer)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Worker error: {e}")))?;
    let answer = answer.map_err(|e| {
        tracing::warn!("Completion failed for session {id}: {e}");
        provider_error(&e)
    })?;

    let active = state
        .with_session(id, |session| {
            if session.store.active().turns() != history.as_slice() {
                return Err((
                    StatusCode::CONFLICT,
                    "The active conversation changed while the answer was generated".to_string(),
                ));
            }
            session.store.append_turn(request.question, answer.clone());
            session.store.persist_if_new();
            Ok(session.store.active().clone())
        })
        .ok_or_else(|| session_not_found(id))??;

    Ok(Json(ChatResponse {
        answer,
        model: state.llm.model().to_string(),
        active,
    }))
}

fn provider_error(error: &InferenceError) -> ApiError {
    match error {
        InferenceError::MissingApiKey => (StatusCode::SERVICE_UNAVAILABLE, error.to_string()),
        _ => (
            StatusCode::BAD_GATEWAY,
            format!("Error connecting to the model provider: {error}"),
        ),
    }
}

/// Close a session and drop its history.
async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.remove_session(id) {
        tracing::info!("Closed session {id}");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(session_not_found(id))
    }
}

/// Start a fresh, empty active conversation.
async fn new_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    state
        .with_session(id, |session| {
            session.store.new_conversation();
            SessionView::build(id, session)
        })
        .map(Json)
        .ok_or_else(|| session_not_found(id))
}

/// Replace the active conversation with a saved one, addressed by display rank.
async fn select_conversation(
    State(state): State<Arc<AppState>>,
    Path((id, rank)): Path<(Uuid, usize)>,
) -> Result<Json<SessionView>, ApiError> {
    state
        .with_session(id, |session| -> ConversationResult<SessionView> {
            let index = session.store.index_for_display_rank(rank)?;
            session.store.select_conversation(index)?;
            Ok(SessionView::build(id, session))
        })
        .ok_or_else(|| session_not_found(id))?
        .map(Json)
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::AssistantConfig;
    use crate::conversation::Turn;
    use crate::llm::ChatCompletion;

    /// Answers with canned text and records how much history it saw.
    #[derive(Default)]
    struct ScriptedLlm {
        last_history_len: AtomicUsize,
    }

    impl ChatCompletion for ScriptedLlm {
        fn model(&self) -> &str {
            "scripted"
        }

        fn complete(
            &self,
            _system_prompt: &str,
            history: &[Turn],
            question: &str,
        ) -> Result<String, InferenceError> {
            self.last_history_len.store(history.len(), Ordering::SeqCst);
            Ok(match question {
                "What is 2+2?" => "4".to_string(),
                "Capital of France?" => "Paris".to_string(),
                other => format!("echo: {other}"),
            })
        }
    }

    struct QuotaLlm;

    impl ChatCompletion for QuotaLlm {
        fn model(&self) -> &str {
            "quota"
        }

        fn complete(&self, _: &str, _: &[Turn], _: &str) -> Result<String, InferenceError> {
            Err(InferenceError::QuotaExceeded)
        }
    }

    /// Holds the answer to `GATED_QUESTION` until the test releases it.
    struct GatedLlm {
        entered: tokio::sync::mpsc::UnboundedSender<()>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    const GATED_QUESTION: &str = "And 3+3?";

    impl ChatCompletion for GatedLlm {
        fn model(&self) -> &str {
            "gated"
        }

        fn complete(&self, _: &str, history: &[Turn], question: &str) -> Result<String, InferenceError> {
            if question == GATED_QUESTION {
                let _ = self.entered.send(());
                if let Ok(release) = self.release.lock() {
                    let _ = release.recv();
                }
            }
            Ok(format!("{question} ({} prior turns)", history.len()))
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap_or_default();

        let response = app.clone().oneshot(request).await.unwrap_or_default();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        let json = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, json)
    }

    async fn open_session(app: &Router) -> String {
        let (status, body) = send(app, "POST", "/api/sessions", None).await;
        assert_eq!(status, StatusCode::OK);
        body["session_id"].as_str().unwrap_or_default().to_string()
    }

    async fn ask(app: &Router, id: &str, question: &str) -> (StatusCode, Value) {
        send(
            app,
            "POST",
            &format!("/api/sessions/{id}/chat"),
            Some(serde_json::json!({ "question": question })),
        )
        .await
    }

    fn scripted_app() -> (Router, Arc<ScriptedLlm>) {
        let llm = Arc::new(ScriptedLlm::default());
        let state = AppState::with_llm(AssistantConfig::default(), llm.clone());
        (create_router(state), llm)
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = scripted_app();
        let (status, body) = send(&app, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["model"], "scripted");
    }

    #[tokio::test]
    async fn test_chat_records_and_saves_turn() {
        let (app, _) = scripted_app();
        let id = open_session(&app).await;

        let (status, body) = ask(&app, &id, "What is 2+2?").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "4");
        assert_eq!(body["active"][0]["question"], "What is 2+2?");

        let (_, view) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(view["saved"].as_array().map(Vec::len), Some(1));
        assert_eq!(view["saved"][0]["title"], "What is 2+2?");
    }

    #[tokio::test]
    async fn test_history_is_sent_with_follow_up() {
        let (app, llm) = scripted_app();
        let id = open_session(&app).await;

        ask(&app, &id, "What is 2+2?").await;
        ask(&app, &id, "And 3+3?").await;

        assert_eq!(llm.last_history_len.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_chat_then_select_by_rank() {
        let (app, _) = scripted_app();
        let id = open_session(&app).await;

        ask(&app, &id, "What is 2+2?").await;
        let (status, view) = send(&app, "POST", &format!("/api/sessions/{id}/new"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["active"], serde_json::json!([]));

        ask(&app, &id, "Capital of France?").await;
        let (_, view) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(view["saved"][0]["rank"], 0);
        assert_eq!(view["saved"][0]["index"], 1);
        assert_eq!(view["saved"][1]["title"], "What is 2+2?");

        let (status, view) =
            send(&app, "POST", &format!("/api/sessions/{id}/select/1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["active"][0]["answer"], "4");

        let (status, _) = send(&app, "POST", &format!("/api/sessions/{id}/select/5"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected() {
        let (app, llm) = scripted_app();
        let id = open_session(&app).await;
        llm.last_history_len.store(99, Ordering::SeqCst);

        let (status, body) = ask(&app, &id, "   ").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Please enter a prompt first!");
        assert_eq!(llm.last_history_len.load(Ordering::SeqCst), 99);
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_store_untouched() {
        let app = create_router(AppState::with_llm(
            AssistantConfig::default(),
            Arc::new(QuotaLlm),
        ));
        let id = open_session(&app).await;

        let (status, body) = ask(&app, &id, "anything").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.as_str().unwrap_or_default().contains("quota exceeded"));

        let (_, view) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(view["active"], serde_json::json!([]));
        assert_eq!(view["saved"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (app, _) = scripted_app();
        let id = Uuid::new_v4();

        let (status, _) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = ask(&app, &id.to_string(), "hello").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let (app, _) = scripted_app();
        let first = open_session(&app).await;
        let second = open_session(&app).await;

        ask(&app, &first, "What is 2+2?").await;

        let (_, view) = send(&app, "GET", &format!("/api/sessions/{second}"), None).await;
        assert_eq!(view["active"], serde_json::json!([]));
        assert_eq!(view["saved"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_answer_is_not_filed_into_a_replaced_conversation() {
        let (entered_tx, mut entered_rx) = tokio::sync::mpsc::unbounded_channel();
        let (release_tx, release_rx) = mpsc::channel();
        let llm = GatedLlm {
            entered: entered_tx,
            release: Mutex::new(release_rx),
        };
        let app = create_router(AppState::with_llm(AssistantConfig::default(), Arc::new(llm)));
        let id = open_session(&app).await;
        ask(&app, &id, "What is 2+2?").await;

        let pending = {
            let app = app.clone();
            let id = id.clone();
            tokio::spawn(async move { ask(&app, &id, GATED_QUESTION).await })
        };
        assert!(entered_rx.recv().await.is_some());

        let (status, _) = send(&app, "POST", &format!("/api/sessions/{id}/new"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(release_tx.send(()).is_ok());

        let (status, _) = pending
            .await
            .unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, Value::Null));
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, view) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(view["active"], serde_json::json!([]));
        assert_eq!(view["saved"].as_array().map(Vec::len), Some(1));
        assert_eq!(view["saved"][0]["title"], "What is 2+2?");
    }

    #[tokio::test]
    async fn test_delete_session() {
        let (app, _) = scripted_app();
        let id = open_session(&app).await;
        let uri = format!("/api/sessions/{id}");

        let (status, _) = send(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_missing_api_key_is_service_unavailable() {
        // The blocking client must be created and dropped outside the runtime.
        let state = AppState::new(AssistantConfig::default());
        assert!(state.is_ok());
        let Ok(state) = state else { return };
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build();
        assert!(runtime.is_ok());
        let Ok(runtime) = runtime else { return };
        let app = create_router(Arc::clone(&state));

        runtime.block_on(async {
            let id = open_session(&app).await;

            let (status, body) = ask(&app, &id, "What is 2+2?").await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(body, "API key required to connect to the model provider");

            let (_, view) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await;
            assert_eq!(view["saved"], serde_json::json!([]));
        });
    }
}

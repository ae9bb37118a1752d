//! The HTTP surface: session initialization, turn processing, and trace
//! reads.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

use vinny_core::chat::{ChatBackend, ChatClient};
use vinny_core::controller::run_turn;
use vinny_core::session::{
    SessionContext, SessionState, SessionStore, TurnEvent, TurnLog,
};
use vinny_core::tools::ToolExecutor;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Builds a chat backend for a new session's user id. A seam so router
/// tests can substitute a scripted backend.
pub type BackendFactory = Arc<dyn Fn(&str) -> Box<dyn ChatBackend> + Send + Sync>;

pub struct AppState {
    pub store: SessionStore,
    pub executor: Arc<dyn ToolExecutor>,
    pub backend_factory: BackendFactory,
    pub backend_username: String,
    pub backend_secret: String,
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct InitRequest {
    pub lead_id: i64,
    pub buyer_id: i64,
    pub escalation_phone: String,
}

#[derive(Debug, Serialize)]
pub struct InitResponse {
    pub success: bool,
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<TurnEvent>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/init", post(init_session))
        .route("/api/chat", post(chat))
        .route("/api/logs", get(get_logs))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: Arc<AppState>, bind: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("vinny serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("vinny serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn init_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InitRequest>,
) -> Result<axum::response::Response, AppError> {
    if request.escalation_phone.trim().is_empty() {
        return Err(AppError::bad_request("escalation_phone is required"));
    }

    // One live session per lead: reuse instead of opening a second
    // backend conversation.
    if let Some(existing) = state.store.find_by_lead(request.lead_id).await {
        info!(lead_id = request.lead_id, session = %existing, "reusing existing session");
        return Ok(Json(InitResponse {
            success: true,
            session_id: existing,
            message: "Session reused.".to_string(),
        })
        .into_response());
    }

    let user_id = request.lead_id.to_string();
    let backend = (state.backend_factory)(&user_id);
    let mut client = ChatClient::new(
        backend,
        user_id,
        state.backend_username.clone(),
        state.backend_secret.clone(),
    );

    // The backend's session id doubles as ours, so a fresh conversation
    // thread is bound up front.
    let session_id = client
        .bind_session(true)
        .await
        .map_err(|e| AppError::internal(format!("failed to initialize session: {e}")))?;

    let session = SessionState {
        context: SessionContext {
            lead_id: request.lead_id,
            buyer_id: request.buyer_id,
            escalation_phone: request.escalation_phone.trim().to_string(),
        },
        log: TurnLog::new(),
        client,
    };
    state.store.insert(session_id.clone(), session).await;

    info!(
        lead_id = request.lead_id,
        buyer_id = request.buyer_id,
        session = %session_id,
        "session initialized"
    );
    Ok(Json(InitResponse {
        success: true,
        session_id,
        message: "Session initialized successfully.".to_string(),
    })
    .into_response())
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<axum::response::Response, AppError> {
    let message = request.message.trim().to_string();
    if message.is_empty() {
        return Err(AppError::bad_request("message is required"));
    }
    if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
        return Ok(Json(ChatResponse {
            reply: "Session ended. Thank you!".to_string(),
        })
        .into_response());
    }

    let Some(session) = state.store.get(&request.session_id).await else {
        return Err(AppError::bad_request(
            "Invalid or missing session_id. Please initialize session first.",
        ));
    };

    // Holding the session lock for the whole turn serializes turns per
    // session.
    let mut session = session.lock().await;
    let reply = run_turn(&mut session, state.executor.as_ref(), &message).await;

    Ok(Json(ChatResponse { reply }).into_response())
}

async fn get_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Result<axum::response::Response, AppError> {
    let Some(session_id) = query.session_id else {
        return Err(AppError::bad_request("session_id is required"));
    };
    let Some(session) = state.store.get(&session_id).await else {
        return Err(AppError::bad_request("Invalid or missing session_id"));
    };

    let session = session.lock().await;
    let logs = session.log.recent(10).to_vec();
    Ok(Json(LogsResponse { logs }).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::PgPool;
    use tower::ServiceExt;

    use vinny_core::chat::{ChatError, SendOutcome, WireShape};
    use vinny_core::result::ToolResult;
    use vinny_db::queries::schedule;
    use vinny_test_utils::{create_test_db, drop_test_db};

    /// Backend whose every reply is a fixed chat plan.
    struct CannedBackend {
        reply: String,
    }

    #[async_trait]
    impl ChatBackend for CannedBackend {
        async fn authenticate(&self, _u: &str, _s: &str) -> Result<String, ChatError> {
            Ok("token".to_string())
        }
        async fn open_session(
            &self,
            _t: &str,
            user_id: &str,
            _f: bool,
        ) -> Result<String, ChatError> {
            Ok(format!("session-{user_id}"))
        }
        async fn send(
            &self,
            _t: &str,
            _s: &str,
            _u: &str,
            _m: &str,
            _shape: WireShape,
        ) -> Result<SendOutcome, ChatError> {
            Ok(SendOutcome::Reply(self.reply.clone()))
        }
        async fn close_session(&self, _t: &str, _u: &str, _s: &str) -> Result<(), ChatError> {
            Ok(())
        }
    }

    /// Executor that never runs; routes in these tests stay on the chat
    /// path.
    struct UnusedExecutor;

    #[async_trait]
    impl vinny_core::tools::ToolExecutor for UnusedExecutor {
        async fn car_retrieve(&self, _q: &serde_json::Map<String, serde_json::Value>) -> ToolResult {
            unreachable!("no tool plans in these tests")
        }
        async fn car_add(&self, _p: serde_json::Map<String, serde_json::Value>) -> ToolResult {
            unreachable!()
        }
        async fn car_update(
            &self,
            _i: serde_json::Map<String, serde_json::Value>,
            _p: serde_json::Map<String, serde_json::Value>,
        ) -> ToolResult {
            unreachable!()
        }
        async fn get_all_cars(&self) -> ToolResult {
            unreachable!()
        }
        async fn get_buyer_availability(&self, _b: i64) -> ToolResult {
            unreachable!()
        }
        async fn add_buyer_schedule(
            &self,
            _b: i64,
            _p: serde_json::Map<String, serde_json::Value>,
        ) -> ToolResult {
            unreachable!()
        }
        async fn pickup_retrieve(&self, _i: serde_json::Map<String, serde_json::Value>) -> ToolResult {
            unreachable!()
        }
        async fn pickup_add(&self, _p: serde_json::Map<String, serde_json::Value>) -> ToolResult {
            unreachable!()
        }
        async fn pickup_update(
            &self,
            _i: serde_json::Map<String, serde_json::Value>,
            _p: serde_json::Map<String, serde_json::Value>,
        ) -> ToolResult {
            unreachable!()
        }
        async fn get_all_pickups(&self) -> ToolResult {
            unreachable!()
        }
        async fn get_closest(&self, _a: &str, _s: &str) -> ToolResult {
            unreachable!()
        }
        async fn send_escalation(&self, _t: &str, _m: &str) -> ToolResult {
            unreachable!()
        }
    }

    fn test_state(_pool: PgPool, reply: &str) -> Arc<AppState> {
        let reply = reply.to_string();
        Arc::new(AppState {
            store: SessionStore::new(),
            executor: Arc::new(UnusedExecutor),
            backend_factory: Arc::new(move |_user_id| {
                Box::new(CannedBackend {
                    reply: reply.clone(),
                })
            }),
            backend_username: "assistant".to_string(),
            backend_secret: "secret".to_string(),
        })
    }

    async fn send_json(
        state: Arc<AppState>,
        method: &str,
        uri: &str,
        body: serde_json::Value,
    ) -> axum::response::Response {
        let app = build_router(state);
        app.oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn init_creates_session_with_backend_id() {
        let (pool, db_name) = create_test_db().await;
        let state = test_state(pool.clone(), "unused");

        let resp = send_json(
            state.clone(),
            "POST",
            "/api/init",
            serde_json::json!({"lead_id": 3, "buyer_id": 9, "escalation_phone": "+15550100"}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["session_id"], "session-3");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn init_reuses_session_for_same_lead() {
        let (pool, db_name) = create_test_db().await;
        let state = test_state(pool.clone(), "unused");

        let body = serde_json::json!({"lead_id": 3, "buyer_id": 9, "escalation_phone": "+15550100"});
        let first = body_json(send_json(state.clone(), "POST", "/api/init", body.clone()).await).await;
        let second = body_json(send_json(state.clone(), "POST", "/api/init", body).await).await;
        assert_eq!(first["session_id"], second["session_id"]);
        assert_eq!(second["message"], "Session reused.");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn init_requires_escalation_phone() {
        let (pool, db_name) = create_test_db().await;
        let state = test_state(pool.clone(), "unused");

        let resp = send_json(
            state,
            "POST",
            "/api/init",
            serde_json::json!({"lead_id": 3, "buyer_id": 9, "escalation_phone": "  "}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn chat_runs_a_turn_and_logs_it() {
        let (pool, db_name) = create_test_db().await;
        schedule::insert_buyer(&pool, 9, Some("Test Buyer"))
            .await
            .expect("insert buyer");
        let state = test_state(
            pool.clone(),
            "```json\n{\"action\":\"chat\",\"answer\":\"Hi! How can I help?\"}\n```",
        );

        let init = body_json(
            send_json(
                state.clone(),
                "POST",
                "/api/init",
                serde_json::json!({"lead_id": 3, "buyer_id": 9, "escalation_phone": "+15550100"}),
            )
            .await,
        )
        .await;
        let session_id = init["session_id"].as_str().unwrap().to_string();

        let resp = send_json(
            state.clone(),
            "POST",
            "/api/chat",
            serde_json::json!({"session_id": session_id, "message": "hello"}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["reply"], "Hi! How can I help?");

        let logs = body_json(
            send_json(
                state,
                "GET",
                &format!("/api/logs?session_id={session_id}"),
                serde_json::json!({}),
            )
            .await,
        )
        .await;
        let entries = logs["logs"].as_array().unwrap();
        assert!(entries.iter().any(|e| e["kind"] == "user_input"));
        assert!(entries.iter().any(|e| e["kind"] == "chat"));

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn chat_rejects_unknown_session() {
        let (pool, db_name) = create_test_db().await;
        let state = test_state(pool.clone(), "unused");

        let resp = send_json(
            state,
            "POST",
            "/api/chat",
            serde_json::json!({"session_id": "nope", "message": "hello"}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn exit_ends_the_session_politely() {
        let (pool, db_name) = create_test_db().await;
        let state = test_state(pool.clone(), "unused");

        let init = body_json(
            send_json(
                state.clone(),
                "POST",
                "/api/init",
                serde_json::json!({"lead_id": 4, "buyer_id": 9, "escalation_phone": "+15550100"}),
            )
            .await,
        )
        .await;
        let session_id = init["session_id"].as_str().unwrap();

        let resp = send_json(
            state.clone(),
            "POST",
            "/api/chat",
            serde_json::json!({"session_id": session_id, "message": "exit"}),
        )
        .await;
        let json = body_json(resp).await;
        assert_eq!(json["reply"], "Session ended. Thank you!");

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}

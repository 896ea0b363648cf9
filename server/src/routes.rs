//! HTTP route handlers for the WorkLogix server.
//!
//! Timer endpoints:
//!
//! - `GET /tasks/{id}/timer?userId=&date=` - current snapshot
//! - `POST /tasks/{id}/timer/start` - `{userId, date}`
//! - `POST /tasks/{id}/timer/pause` - `{userId, date}`
//! - `POST /tasks/{id}/timer/complete` - `{userId, date, duration?}`
//! - `GET /tasks/{id}/timers?date=` - every user's log for the task
//!
//! Task endpoints:
//!
//! - `POST /tasks`, `GET /tasks/{id}`, `DELETE /tasks/{id}`
//! - `PATCH /tasks/{id}/status` - `{status}`
//!
//! Change channel:
//!
//! - `GET /ws?token=&type=&taskId=` - push stream of change events
//! - `POST /notifications` - raise a change event on behalf of another service
//!
//! `GET /health` is always public. Everything else requires
//! `Authorization: Bearer <token>` (or `?token=` on `/ws`) unless
//! `WORKLOGIX_UNSAFE_NO_AUTH` is set.
//!
//! # Example
//!
//! ```rust,no_run
//! use worklogix_server::config::Config;
//! use worklogix_server::routes::{create_router, AppState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let state = AppState::new(config).expect("failed to build state");
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, DefaultBodyLimit, Path, Query, Request, State, WebSocketUpgrade},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, debug_span, error, info, trace, warn};
use uuid::Uuid;

use crate::auth::{authorize_headers, validate_token, AuthError};
use crate::broadcast::{ChangeBroadcaster, SubscriberFilter};
use crate::config::Config;
use crate::error::{ErrorResponse, Result, ServerError};
use crate::service::TimerService;
use crate::store::{InMemoryTimerStore, TimerStore};
use crate::synchronizer::TaskStatusSynchronizer;
use crate::tasks::{InMemoryTaskStore, RemoteTaskStore, TaskError, TaskStore};
use crate::timer::{Clock, SystemClock, TimerController};
use crate::types::{ChangeEvent, ChangeEventType, Task, TaskStatus, TimeLog, TimerKey, TimerSnapshot};

/// Maximum accepted request body (64 KB).
const MAX_BODY_SIZE: usize = 64 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Timer operations with change notification.
    pub timers: TimerService,

    /// Task backend (registry or external service).
    pub tasks: Arc<dyn TaskStore>,

    /// Change notification hub shared with the WebSocket handlers.
    pub broadcaster: ChangeBroadcaster,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Builds the state from configuration: in-memory timer store, system
    /// clock, and the task backend selected by `task_service_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Configuration`] if the task service client cannot
    /// be created.
    pub fn new(config: Config) -> std::result::Result<Self, TaskError> {
        let tasks: Arc<dyn TaskStore> = match &config.task_service_url {
            Some(url) => {
                info!(url = %url, "Using external task service");
                Arc::new(RemoteTaskStore::new(
                    url.clone(),
                    config.task_service_token.clone(),
                )?)
            }
            None => {
                info!("Using in-process task registry");
                Arc::new(InMemoryTaskStore::new())
            }
        };

        Ok(Self::with_components(
            config,
            Arc::new(InMemoryTimerStore::new()),
            Arc::new(SystemClock),
            tasks,
        ))
    }

    /// Builds the state from explicit components. Used by tests to inject a
    /// manual clock or a mock task service.
    #[must_use]
    pub fn with_components(
        config: Config,
        timer_store: Arc<dyn TimerStore>,
        clock: Arc<dyn Clock>,
        tasks: Arc<dyn TaskStore>,
    ) -> Self {
        let broadcaster = ChangeBroadcaster::with_capacity(config.channel_capacity);
        let controller = TimerController::new(timer_store, clock);
        let synchronizer = TaskStatusSynchronizer::new(Arc::clone(&tasks), broadcaster.clone());

        Self {
            config: Arc::new(config),
            timers: TimerService::new(controller, synchronizer, broadcaster.clone()),
            tasks,
            broadcaster,
            start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("timers", &self.timers)
            .field("tasks", &"<TaskStore>")
            .field("broadcaster", &self.broadcaster)
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/tasks", post(create_task))
        .route("/tasks/{id}", get(get_task).delete(delete_task))
        .route("/tasks/{id}/status", patch(patch_task_status))
        .route("/tasks/{id}/timer", get(get_timer))
        .route("/tasks/{id}/timer/start", post(start_timer))
        .route("/tasks/{id}/timer/pause", post(pause_timer))
        .route("/tasks/{id}/timer/complete", post(complete_timer))
        .route("/tasks/{id}/timers", get(list_timers))
        .route("/notifications", post(post_notification))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(protected)
        .route("/ws", get(get_ws))
        .route("/health", get(get_health))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(
            // Path only: the `/ws` query string carries the API token.
            TraceLayer::new_for_http().make_span_with(|request: &Request| {
                debug_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Authentication
// ============================================================================

fn auth_failure(err: &AuthError) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new(err.to_string()).with_code(err.code())),
    )
        .into_response()
}

/// Returns the configured token, or `None` when auth is disabled.
fn expected_token(config: &Config) -> std::result::Result<Option<&str>, Response> {
    if config.unsafe_no_auth {
        return Ok(None);
    }
    match config.api_token.as_deref() {
        Some(token) => Ok(Some(token)),
        None => {
            error!("API token not configured but auth is enabled");
            Err(ServerError::internal("server configuration error").into_response())
        }
    }
}

/// Middleware rejecting REST requests without a valid bearer token.
async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let expected = match expected_token(&state.config) {
        Ok(Some(token)) => token,
        Ok(None) => return next.run(request).await,
        Err(response) => return response,
    };

    if let Err(err) = authorize_headers(request.headers(), expected) {
        debug!(error = %err, path = %request.uri().path(), "Rejected unauthenticated request");
        return auth_failure(&err);
    }

    next.run(request).await
}

// ============================================================================
// Request parsing
// ============================================================================

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body).map_err(|err| {
        debug!(error = %err, "Failed to parse request body");
        ServerError::validation(format!("invalid JSON: {err}"))
    })
}

fn parse_query<T>(query: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| ServerError::validation(rejection.body_text()))
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ServerError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

// ============================================================================
// Timer endpoints
// ============================================================================

/// Identifies the acting user and day for a timer call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerQuery {
    pub user_id: String,
    pub date: NaiveDate,
}

/// Body of `POST /tasks/{id}/timer/complete`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub user_id: String,
    pub date: NaiveDate,

    /// Client-measured duration in seconds. Advisory only.
    #[serde(default)]
    pub duration: Option<u64>,
}

impl TimerQuery {
    fn into_key(self, task_id: String) -> Result<TimerKey> {
        require_non_empty("taskId", &task_id)?;
        require_non_empty("userId", &self.user_id)?;
        Ok(TimerKey::new(task_id, self.user_id, self.date))
    }
}

async fn get_timer(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    query: std::result::Result<Query<TimerQuery>, QueryRejection>,
) -> Result<Json<TimerSnapshot>> {
    let key = parse_query(query)?.into_key(task_id)?;
    Ok(Json(state.timers.query(&key)?))
}

async fn start_timer(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    body: Bytes,
) -> Result<Json<TimerSnapshot>> {
    let key = parse_body::<TimerQuery>(&body)?.into_key(task_id)?;
    Ok(Json(state.timers.start(&key).await?))
}

async fn pause_timer(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    body: Bytes,
) -> Result<Json<TimerSnapshot>> {
    let key = parse_body::<TimerQuery>(&body)?.into_key(task_id)?;
    Ok(Json(state.timers.pause(&key)?))
}

async fn complete_timer(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    body: Bytes,
) -> Result<Json<TimerSnapshot>> {
    let request: CompleteRequest = parse_body(&body)?;
    let key = TimerQuery {
        user_id: request.user_id,
        date: request.date,
    }
    .into_key(task_id)?;

    Ok(Json(state.timers.complete(&key, request.duration).await?))
}

/// Query of `GET /tasks/{id}/timers`.
#[derive(Debug, Default, Deserialize)]
pub struct TimersQuery {
    pub date: Option<NaiveDate>,
}

async fn list_timers(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    query: std::result::Result<Query<TimersQuery>, QueryRejection>,
) -> Result<Json<Vec<TimeLog>>> {
    let query = parse_query(query)?;
    Ok(Json(state.timers.list_for_task(&task_id, query.date)?))
}

// ============================================================================
// Task endpoints
// ============================================================================

/// Body of `POST /tasks`.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
}

/// Body of `PATCH /tasks/{id}/status`.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: TaskStatus,
}

async fn create_task(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let request: CreateTaskRequest = parse_body(&body)?;
    require_non_empty("title", &request.title)?;

    let task_id = match request.id {
        Some(id) => {
            require_non_empty("id", &id)?;
            id
        }
        None => Uuid::new_v4().to_string(),
    };

    let task = state.tasks.create(&task_id, &request.title).await?;
    info!(task_id = %task.id, "Task created");
    state.broadcaster.broadcast(ChangeEvent::TaskCreated {
        task_id: task.id.clone(),
    });

    Ok((StatusCode::CREATED, Json(task)).into_response())
}

async fn get_task(State(state): State<AppState>, Path(task_id): Path<String>) -> Result<Json<Task>> {
    Ok(Json(state.tasks.get(&task_id).await?))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>> {
    let task = state.tasks.delete(&task_id).await?;
    info!(task_id = %task.id, "Task deleted");
    state
        .broadcaster
        .broadcast(ChangeEvent::TaskDeleted { task_id });
    Ok(Json(task))
}

async fn patch_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    body: Bytes,
) -> Result<Json<Task>> {
    let request: StatusRequest = parse_body(&body)?;
    let task = state
        .timers
        .synchronizer()
        .set_status(&task_id, request.status)
        .await?;
    Ok(Json(task))
}

// ============================================================================
// POST /notifications
// ============================================================================

/// Response of `POST /notifications`.
#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationAccepted {
    /// Number of subscribers the event was handed to.
    pub receivers: usize,
}

async fn post_notification(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let event: ChangeEvent = parse_body(&body)?;

    // Timer events describe server-owned state.
    if event.event_type() == ChangeEventType::TimerUpdated {
        return Err(ServerError::validation(
            "timer_updated events are raised by the server only",
        ));
    }
    if let Some(task_id) = event.task_id() {
        require_non_empty("taskId", task_id)?;
    }

    debug!(event_type = ?event.event_type(), "Relaying external change notification");
    let receivers = state.broadcaster.broadcast(event);
    Ok((StatusCode::ACCEPTED, Json(NotificationAccepted { receivers })).into_response())
}

// ============================================================================
// GET /ws - WebSocket Subscription
// ============================================================================

/// Query parameters for WebSocket subscription.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQueryParams {
    /// Authentication token (required unless unsafe_no_auth is enabled).
    pub token: Option<String>,

    /// Filter events by type.
    #[serde(rename = "type")]
    pub event_type: Option<ChangeEventType>,

    /// Filter events by task.
    pub task_id: Option<String>,
}

impl WsQueryParams {
    fn to_filter(&self) -> SubscriberFilter {
        let mut filter = SubscriberFilter::new();

        if let Some(event_type) = self.event_type {
            filter = filter.with_event_type(event_type);
        }

        if let Some(ref task_id) = self.task_id {
            filter = filter.with_task_id(task_id.clone());
        }

        filter
    }
}

/// GET /ws - push stream of [`ChangeEvent`]s as JSON text frames.
///
/// Responds `401` for a missing or wrong `token` and `400` for an unknown
/// `type` filter.
async fn get_ws(
    State(state): State<AppState>,
    params: std::result::Result<Query<WsQueryParams>, QueryRejection>,
    ws: WebSocketUpgrade,
) -> Response {
    let params = match parse_query(params) {
        Ok(params) => params,
        Err(err) => return err.into_response(),
    };

    match expected_token(&state.config) {
        Ok(None) => {}
        Ok(Some(expected)) => {
            let provided = match params.token.as_deref() {
                Some(token) if !token.is_empty() => token,
                _ => {
                    debug!("Missing or empty token in WebSocket request");
                    return auth_failure(&AuthError::MissingToken);
                }
            };
            if let Err(err) = validate_token(provided, expected) {
                debug!("Invalid token in WebSocket request");
                return auth_failure(&err);
            }
        }
        Err(response) => return response,
    }

    let filter = params.to_filter();
    info!(filter = ?filter, "WebSocket client connecting");

    ws.on_upgrade(move |socket| handle_websocket(socket, state.broadcaster, filter))
}

/// Forwards matching events to one client until either side goes away.
async fn handle_websocket(
    socket: axum::extract::ws::WebSocket,
    broadcaster: ChangeBroadcaster,
    filter: SubscriberFilter,
) {
    use axum::extract::ws::Message;
    use futures_util::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = broadcaster.subscribe();

    info!("WebSocket client connected");

    let forward_task = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    if !filter.matches(&event) {
                        continue;
                    }

                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            trace!(event_type = ?event.event_type(), "Sending event to WebSocket client");
                            if let Err(err) = sender.send(Message::Text(json.into())).await {
                                debug!(error = %err, "Failed to send event to WebSocket client");
                                break;
                            }
                        }
                        Err(err) => {
                            error!(error = %err, "Failed to serialize change event");
                        }
                    }
                }
                Err(RecvError::Lagged(count)) => {
                    warn!(skipped = count, "WebSocket client lagged, skipped events");
                }
                Err(RecvError::Closed) => {
                    debug!("Change broadcaster closed");
                    break;
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client sent close frame");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "WebSocket error");
                break;
            }
        }
    }

    forward_task.abort();
    info!("WebSocket client disconnected");
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for the health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always "ok" if responding.
    pub status: String,

    /// Number of active change subscribers.
    pub connections: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        connections: state.broadcaster.subscriber_count(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================

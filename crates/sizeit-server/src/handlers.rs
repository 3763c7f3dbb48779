//! HTTP handlers for the size-it server.
//!
//! Commands are plain form posts answered with an empty `200`; room updates
//! reach browsers over a server-sent-events stream opened on the session page
//! URL.

use crate::config::Config;
use crate::error::AppError;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::render::JsonRenderer;
use crate::store::MemoryStore;
use anyhow::Result;
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Form, Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use sizeit_live::model::{STORY_POINTS, T_SHIRT};
use sizeit_live::{ConnectionId, EventReceiver, LiveService, SessionRecord, SizingType, User};
use sizeit_protocol::codec;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Name of the cookie carrying the user id.
pub const COOKIE_NAME: &str = "sizeIt";

/// Cookie lifetime: three weeks.
pub const COOKIE_MAX_AGE: u64 = 60 * 60 * 24 * 7 * 3;

const MIME_SSE: &str = "text/event-stream";

/// Shared server state.
pub struct AppState {
    /// The live collaboration engine.
    pub live: LiveService,
    /// Sessions, tickets and users.
    pub store: Arc<MemoryStore>,
    /// Server configuration.
    pub config: Config,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
    started: Instant,
}

impl AppState {
    /// Create new app state and start the engine.
    #[must_use]
    pub fn new(config: Config, shutdown: CancellationToken) -> Self {
        let store = Arc::new(MemoryStore::new());
        let renderer = Arc::new(JsonRenderer::new(config.base_path()));
        let live = LiveService::new(
            config.live.to_live_config(),
            store.clone(),
            renderer,
            shutdown.clone(),
        );

        Self {
            live,
            store,
            config,
            shutdown,
            started: Instant::now(),
        }
    }

    fn find_session(&self, session_id: &str) -> Result<SessionRecord, AppError> {
        Uuid::parse_str(session_id)
            .map_err(|_| AppError::InvalidInput(format!("malformed session id {session_id}")))?;

        self.store
            .get_session(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))
    }

    fn session_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{}", self.config.base_path(), session_id)
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let base = state.config.base_path().to_string();

    let routes = Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/info", get(info_handler))
        .route("/", get(root_handler))
        .route("/sessions", post(create_or_join_session))
        .route(
            "/sessions/:id",
            get(get_session)
                .patch(save_ticket)
                .post(add_ticket_to_history)
                .put(reset_session),
        )
        // The static segment wins over `:sizing_type`.
        .route("/sessions/:id/toggle", patch(toggle_sizings))
        .route("/sessions/:id/:sizing_type", patch(switch_sizing_type))
        .route(
            "/sessions/:id/:sizing_type/:sizing_value",
            patch(set_sizing_value),
        )
        .with_state(state);

    if base.is_empty() {
        routes
    } else {
        Router::new().nest(&base, routes)
    }
}

/// Run the HTTP server until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config, shutdown: CancellationToken) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config, shutdown.clone()));
    tokio::spawn(metrics::track_active_rooms(
        state.live.watch_room_count(),
        shutdown.clone(),
    ));
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    info!("size-it server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("size-it server stopped");
    Ok(())
}

/// The user identified by the request cookie.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        cookie_value(&parts.headers, COOKIE_NAME)
            .and_then(|user_id| state.store.get_user(user_id))
            .map(CurrentUser)
            .ok_or(AppError::Unauthorized)
    }
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rooms = state.live.room_count().await;
    let uptime = state.started.elapsed();

    Json(serde_json::json!({
        "status": "UP",
        "uptime": format_uptime(uptime),
        "uptime_secs": uptime.as_secs(),
        "rooms": rooms,
    }))
}

/// Build and runtime information.
async fn info_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (sessions, tickets) = state.store.counts();
    let parallelism = std::thread::available_parallelism().map_or(1, usize::from);

    Json(serde_json::json!({
        "application": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "vcsRevision": option_env!("SIZE_IT_VCS_REVISION").unwrap_or("unknown"),
            "vcsTime": option_env!("SIZE_IT_VCS_TIME").unwrap_or("unknown"),
        },
        "storage": {
            "kind": "memory",
            "sessions": sessions,
            "tickets": tickets,
        },
        "rust": {
            "minimumVersion": env!("CARGO_PKG_RUST_VERSION"),
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "parallelism": parallelism,
        },
    }))
}

/// `1h2m3s` style rendering, down to the second.
fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs / 60 % 60, secs % 60);

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Landing page data: known teams and the current user, if any.
async fn root_handler(
    State(state): State<Arc<AppState>>,
    user: Option<CurrentUser>,
) -> impl IntoResponse {
    let user = user.map(|CurrentUser(user)| user);

    Json(serde_json::json!({
        "template": "newSession",
        "path": state.config.base_path(),
        "teams": state.store.teams(),
        "user": user,
    }))
}

#[derive(Debug, Deserialize)]
struct CreateOrJoinSessionInput {
    #[serde(default)]
    id: String,
    #[serde(default)]
    team: String,
    #[serde(default)]
    username: String,
}

impl CreateOrJoinSessionInput {
    fn validate(&self) -> Result<(), AppError> {
        if self.username.trim().is_empty() {
            return Err(AppError::InvalidInput("username is required".into()));
        }
        if self.id.is_empty() && self.team.trim().is_empty() {
            return Err(AppError::InvalidInput("team is required".into()));
        }
        Ok(())
    }
}

/// Create a session (no id) or join one, then hand out a user cookie.
async fn create_or_join_session(
    State(state): State<Arc<AppState>>,
    Form(input): Form<CreateOrJoinSessionInput>,
) -> Result<Response, AppError> {
    input.validate()?;

    let session = if input.id.is_empty() {
        state.store.create_session(input.team.trim())
    } else {
        state.find_session(&input.id)?
    };

    let user = User::new(
        Uuid::new_v4().simple().to_string(),
        input.username.trim(),
        session.team.clone(),
    );
    state.store.save_user(user.clone());
    info!(session = %session.id, user = %user.name, "User registered");

    let cookie = format!(
        "{COOKIE_NAME}={}; Path=/; Max-Age={COOKIE_MAX_AGE}; HttpOnly; SameSite=Lax",
        user.id
    );

    Ok((
        StatusCode::FOUND,
        [
            (header::LOCATION, state.session_url(&session.id)),
            (header::SET_COOKIE, cookie),
        ],
    )
        .into_response())
}

/// Session page data, or the session's event stream.
async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    user: Option<CurrentUser>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let session = state.find_session(&session_id)?;

    let wants_events = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains(MIME_SSE));

    if wants_events {
        let CurrentUser(user) = user.ok_or(AppError::Unauthorized)?;
        return open_event_stream(state, session, user).await;
    }

    let Some(CurrentUser(user)) = user else {
        return Ok(Json(serde_json::json!({
            "template": "joinSession",
            "path": state.config.base_path(),
            "session": session,
        }))
        .into_response());
    };

    state.live.create(&session.id, &session.team).await?;

    Ok(Json(serde_json::json!({
        "template": "session",
        "path": state.config.base_path(),
        "session": session,
        "sizing_value_story_points": STORY_POINTS,
        "sizing_value_t_shirt": T_SHIRT,
        "user": user,
    }))
    .into_response())
}

async fn open_event_stream(
    state: Arc<AppState>,
    session: SessionRecord,
    user: User,
) -> Result<Response, AppError> {
    let (tx, rx) = state.live.mailbox();
    let id = state.live.join(&session.id, user.clone(), tx).await?;
    info!(session = %session.id, user = %user.name, connection = id, "Event stream opened");

    let connection = Connection {
        rx,
        live: state.live.clone(),
        session_id: session.id,
        user,
        id,
        shutdown: state.shutdown.clone(),
        ended: false,
        _metrics: ConnectionMetricsGuard::new(),
    };

    let events = futures_util::stream::unfold(connection, |mut connection| async move {
        connection
            .next_chunk()
            .await
            .map(|chunk| (Ok::<_, Infallible>(chunk), connection))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, MIME_SSE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(events))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// One open event stream.
///
/// Dropping it while the client is still expected (the transport went away)
/// reports this connection as leaving. Streams ended by the engine or by
/// shutdown do not, and the engine ignores the leave once the user joined
/// again over a newer connection.
struct Connection {
    rx: EventReceiver,
    live: LiveService,
    session_id: String,
    user: User,
    id: ConnectionId,
    shutdown: CancellationToken,
    ended: bool,
    _metrics: ConnectionMetricsGuard,
}

impl Connection {
    async fn next_chunk(&mut self) -> Option<Bytes> {
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    info!(session = %self.session_id, user = %self.user.name, "Server is shutting down, closing event stream");
                    self.ended = true;
                    return None;
                }
                event = self.rx.recv() => {
                    let Some(event) = event else {
                        info!(session = %self.session_id, user = %self.user.name, "Connection replaced or evicted, closing event stream");
                        self.ended = true;
                        return None;
                    };

                    match codec::encode(&event) {
                        Ok(bytes) => {
                            metrics::record_event(event.kind.as_str(), bytes.len());
                            return Some(bytes);
                        }
                        Err(e) => {
                            warn!(session = %self.session_id, event = %event.kind, error = %e, "Dropping unencodable event");
                            metrics::record_error("encode");
                        }
                    }
                }
            }
        }
    }

    /// Whether the engine dropped its side of the mailbox.
    fn closed_by_engine(&mut self) -> bool {
        loop {
            match self.rx.try_recv() {
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.ended || self.shutdown.is_cancelled() || self.closed_by_engine() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        debug!(session = %self.session_id, user = %self.user.name, "Client went away");
        let live = self.live.clone();
        let session_id = std::mem::take(&mut self.session_id);
        let user = self.user.clone();
        let id = self.id;

        runtime.spawn(async move {
            if let Err(e) = live.leave_connection(&session_id, &user, id).await {
                debug!(session = %session_id, error = %e, "Leave after disconnect failed");
            }
        });
    }
}

#[derive(Debug, Deserialize)]
struct TicketInput {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    url: String,
}

async fn save_ticket(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    CurrentUser(user): CurrentUser,
    Form(input): Form<TicketInput>,
) -> Result<StatusCode, AppError> {
    state
        .live
        .save_ticket(&session_id, &input.summary, &input.url, &user)
        .await?;
    Ok(StatusCode::OK)
}

async fn add_ticket_to_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, AppError> {
    state.live.add_ticket_to_history(&session_id, &user).await?;
    Ok(StatusCode::OK)
}

async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    CurrentUser(_): CurrentUser,
) -> Result<StatusCode, AppError> {
    state.live.reset_session(&session_id).await?;
    Ok(StatusCode::OK)
}

async fn toggle_sizings(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    CurrentUser(_): CurrentUser,
) -> Result<StatusCode, AppError> {
    state.live.toggle_sizings(&session_id).await?;
    Ok(StatusCode::OK)
}

async fn switch_sizing_type(
    State(state): State<Arc<AppState>>,
    Path((session_id, sizing_type)): Path<(String, String)>,
    CurrentUser(_): CurrentUser,
) -> Result<StatusCode, AppError> {
    let sizing_type: SizingType = sizing_type.parse()?;
    state.live.switch_sizing_type(&session_id, sizing_type).await?;
    Ok(StatusCode::OK)
}

async fn set_sizing_value(
    State(state): State<Arc<AppState>>,
    Path((session_id, sizing_type, sizing_value)): Path<(String, String, String)>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, AppError> {
    let sizing_type: SizingType = sizing_type.parse()?;
    if !sizing_type.accepts(&sizing_value) {
        return Err(AppError::InvalidInput(format!(
            "{sizing_value} is not a {sizing_type} value"
        )));
    }

    state
        .live
        .set_sizing_value(&session_id, &sizing_value, &user)
        .await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::{Method, Request};
    use futures_util::StreamExt;
    use std::time::Duration;
    use tower::ServiceExt;

    const FORM: &str = "application/x-www-form-urlencoded";

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(Config::default(), CancellationToken::new()))
    }

    /// A session with a registered user, and that user's cookie.
    fn session_with_user(state: &AppState) -> (SessionRecord, String) {
        let session = state.store.create_session("core");
        state.store.save_user(User::new("u-alice", "Alice", "core"));
        (session, format!("{COOKIE_NAME}=u-alice"))
    }

    fn request(method: Method, uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "theme=dark; sizeIt=abc123".parse().unwrap());
        assert_eq!(cookie_value(&headers, COOKIE_NAME), Some("abc123"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_millis(4_500)), "4s");
        assert_eq!(format_uptime(Duration::from_secs(62)), "1m2s");
        assert_eq!(format_uptime(Duration::from_secs(3_600 + 120 + 3)), "1h2m3s");
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(state())
            .oneshot(request(Method::GET, "/api/v1/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let health = json(response).await;
        assert_eq!(health["status"], "UP");
        assert_eq!(health["rooms"], 0);
        assert!(health["uptime"].as_str().unwrap().ends_with('s'));
    }

    #[tokio::test]
    async fn test_info() {
        let state = state();
        let _ = session_with_user(&state);

        let response = router(state)
            .oneshot(request(Method::GET, "/api/v1/info", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let info = json(response).await;
        assert_eq!(info["application"]["name"], "sizeit-server");
        assert_eq!(info["application"]["version"], env!("CARGO_PKG_VERSION"));
        assert!(info["application"]["vcsRevision"].is_string());
        assert_eq!(info["storage"]["sessions"], 1);
        assert_eq!(info["rust"]["os"], std::env::consts::OS);
    }

    #[tokio::test]
    async fn test_create_session_sets_cookie_and_redirects() {
        let state = state();
        let response = router(state.clone())
            .oneshot(
                Request::post("/sessions")
                    .header(header::CONTENT_TYPE, FORM)
                    .body(Body::from("team=core&username=Alice"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        let session_id = location.strip_prefix("/sessions/").unwrap();
        assert!(state.store.get_session(session_id).is_some());

        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("sizeIt="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=1814400"));

        let user_id = cookie
            .trim_start_matches("sizeIt=")
            .split(';')
            .next()
            .unwrap();
        let user = state.store.get_user(user_id).unwrap();
        assert_eq!(user.name, "Alice");
        assert_eq!(user.team, "core");
    }

    #[tokio::test]
    async fn test_create_session_requires_fields() {
        let app = router(state());

        for body in ["team=core", "username=Alice", "id=&team=&username=Alice"] {
            let response = app
                .clone()
                .oneshot(
                    Request::post("/sessions")
                        .header(header::CONTENT_TYPE, FORM)
                        .body(Body::from(body))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        }
    }

    #[tokio::test]
    async fn test_session_page_creates_room() {
        let state = state();
        let (session, cookie) = session_with_user(&state);

        let response = router(state.clone())
            .oneshot(request(
                Method::GET,
                &format!("/sessions/{}", session.id),
                Some(&cookie),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let page = json(response).await;
        assert_eq!(page["template"], "session");
        assert_eq!(page["user"]["name"], "Alice");
        assert_eq!(state.live.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_session_page_without_user_asks_to_join() {
        let state = state();
        let (session, _) = session_with_user(&state);

        let response = router(state.clone())
            .oneshot(request(Method::GET, &format!("/sessions/{}", session.id), None))
            .await
            .unwrap();

        assert_eq!(json(response).await["template"], "joinSession");
        assert_eq!(state.live.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let state = state();
        let (session, cookie) = session_with_user(&state);
        let app = router(state);
        let unknown = Uuid::new_v4();

        let cases = [
            (Method::PATCH, format!("/sessions/{}/toggle", session.id), None, StatusCode::UNAUTHORIZED),
            (Method::PATCH, format!("/sessions/{unknown}/toggle"), Some(&cookie), StatusCode::NOT_FOUND),
            (Method::GET, "/sessions/not-a-uuid".to_string(), Some(&cookie), StatusCode::BAD_REQUEST),
            (Method::GET, format!("/sessions/{unknown}"), Some(&cookie), StatusCode::NOT_FOUND),
            (Method::PATCH, format!("/sessions/{}/FIBONACCI", session.id), Some(&cookie), StatusCode::BAD_REQUEST),
            (Method::PATCH, format!("/sessions/{}/T_SHIRT/13", session.id), Some(&cookie), StatusCode::BAD_REQUEST),
        ];

        for (method, uri, cookie, expected) in cases {
            let response = app
                .clone()
                .oneshot(request(method, &uri, cookie.map(String::as_str)))
                .await
                .unwrap();
            assert_eq!(response.status(), expected, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_commands_drive_the_room() {
        let state = state();
        let (session, cookie) = session_with_user(&state);
        let app = router(state.clone());
        state.live.create(&session.id, &session.team).await.unwrap();

        let response = app
            .clone()
            .oneshot(request(
                Method::PATCH,
                &format!("/sessions/{}/T_SHIRT", session.id),
                Some(&cookie),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request(
                Method::PATCH,
                &format!("/sessions/{}/toggle", session.id),
                Some(&cookie),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::patch(format!("/sessions/{}", session.id))
                    .header(header::COOKIE, &cookie)
                    .header(header::CONTENT_TYPE, FORM)
                    .body(Body::from("summary=Login+page&url=https%3A%2F%2Ftracker%2F1"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let snapshot = state.live.snapshot(&session.id).await.unwrap();
        assert_eq!(snapshot.ticket.sizing_type, SizingType::TShirt);
        assert_eq!(snapshot.ticket.summary, "Login page");
        assert_eq!(snapshot.ticket.url, "https://tracker/1");
        assert!(snapshot.results_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_stream_joins_and_leaves() {
        let state = state();
        let (session, cookie) = session_with_user(&state);

        let response = router(state.clone())
            .oneshot(
                Request::get(format!("/sessions/{}", session.id))
                    .header(header::ACCEPT, MIME_SSE)
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], MIME_SSE);

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        assert!(first.starts_with(b"event: ticket\ndata: "));

        let snapshot = state.live.snapshot(&session.id).await.unwrap();
        assert!(snapshot.participant("u-alice").unwrap().connected);

        // Client goes away.
        drop(body);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = state.live.snapshot(&session.id).await.unwrap();
        let alice = snapshot.participant("u-alice").unwrap();
        assert!(alice.pending_expiry);
        assert!(!alice.connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_stream_does_not_leave() {
        let state = state();
        let (session, cookie) = session_with_user(&state);
        let app = router(state.clone());

        let open = || {
            Request::get(format!("/sessions/{}", session.id))
                .header(header::ACCEPT, MIME_SSE)
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(open()).await.unwrap();
        let _second = app.oneshot(open()).await.unwrap();

        // The first stream was closed by the engine; dropping it is not a leave.
        drop(first);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = state.live.snapshot(&session.id).await.unwrap();
        let alice = snapshot.participant("u-alice").unwrap();
        assert!(!alice.pending_expiry);
        assert!(alice.connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_stream_does_not_close_its_replacement() {
        let state = state();
        let (session, cookie) = session_with_user(&state);
        let app = router(state.clone());

        let open = || {
            Request::get(format!("/sessions/{}", session.id))
                .header(header::ACCEPT, MIME_SSE)
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap()
        };

        // The old stream goes away before the browser reconnects, and its
        // leave may only run after the new join.
        let first = app.clone().oneshot(open()).await.unwrap();
        drop(first);
        let second = app.oneshot(open()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = state.live.snapshot(&session.id).await.unwrap();
        let alice = snapshot.participant("u-alice").unwrap();
        assert!(alice.connected);
        assert!(!alice.pending_expiry);

        // The join backlog is there and the stream stays open afterwards.
        let mut body = second.into_body().into_data_stream();
        for _ in 0..4 {
            assert!(body.next().await.unwrap().is_ok());
        }
        let idle = tokio::time::timeout(Duration::from_secs(1), body.next()).await;
        assert!(idle.is_err());

        // Well past the grace period, still active.
        tokio::time::sleep(Duration::from_secs(10)).await;
        let snapshot = state.live.snapshot(&session.id).await.unwrap();
        assert!(!snapshot.participant("u-alice").unwrap().inactive);
    }
}

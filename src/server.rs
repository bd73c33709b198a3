use crate::config::{AppConfig, MapConfig};
use crate::palette::ColorScheme;
use crate::registry::{self, LayerOptions};
use crate::source::DatasetSource;
use crate::view::{
    FailureKind, RenderFailure, SelectionChange, SelectionState, View, ViewController,
};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

type Session = Arc<Mutex<ViewController>>;

const PRUNE_INTERVAL_SECS: u64 = 60;

struct SessionEntry {
    controller: Session,
    last_seen: Instant,
}

/// Datasets are shared through `source`; each session owns its own controller.
/// Sessions untouched for `idle_timeout` are dropped.
pub struct AppState {
    pub source: Arc<dyn DatasetSource>,
    pub map: MapConfig,
    idle_timeout: Duration,
    sessions: Mutex<HashMap<u64, SessionEntry>>,
    next_id: AtomicU64,
}

impl AppState {
    pub fn new(source: Arc<dyn DatasetSource>, map: MapConfig, idle_timeout: Duration) -> Self {
        Self {
            source,
            map,
            idle_timeout,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn session(&self, id: u64) -> Result<Session, ApiError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let entry = sessions.get_mut(&id).ok_or(ApiError::NoSession(id))?;
        entry.last_seen = Instant::now();
        Ok(Arc::clone(&entry.controller))
    }

    /// Drops idle sessions and returns how many went.
    pub fn prune_idle(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_seen.elapsed() < self.idle_timeout);
        let pruned = before - sessions.len();
        if pruned > 0 {
            info!(pruned, remaining = sessions.len(), "idle sessions dropped");
        }
        pruned
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Periodic idle-session cleanup for the lifetime of the server.
async fn run_session_pruner(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(PRUNE_INTERVAL_SECS));
    // first tick fires immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        state.prune_idle();
    }
}

#[derive(Debug)]
pub enum ApiError {
    NoSession(u64),
    Render { session: u64, failure: RenderFailure },
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<u64>,
    kind: &'static str,
    message: String,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NoSession(id) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    session: Some(id),
                    kind: "no_session",
                    message: "Session not found.".to_string(),
                    detail: format!("no session with id {id}"),
                },
            ),
            ApiError::Render { session, failure } => {
                let (status, kind) = match failure.kind {
                    FailureKind::Config => (StatusCode::BAD_REQUEST, "config"),
                    FailureKind::DataUnavailable => {
                        (StatusCode::SERVICE_UNAVAILABLE, "data_unavailable")
                    }
                    FailureKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
                };
                (
                    status,
                    ErrorBody {
                        session: Some(session),
                        kind,
                        message: failure.message,
                        detail: failure.detail,
                    },
                )
            }
            ApiError::Internal(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    session: None,
                    kind: "internal",
                    message: "An error occurred.".to_string(),
                    detail,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
pub struct OptionsResponse {
    layers: Vec<LayerOptions>,
    schemes: Vec<&'static str>,
    defaults: SelectionState,
}

#[derive(Serialize)]
pub struct SessionView {
    session: u64,
    view: Arc<View>,
}

/// Runs a render off the async workers; rendering is synchronous and may hit disk.
async fn with_session<F>(id: u64, session: Session, f: F) -> Result<Arc<View>, ApiError>
where
    F: FnOnce(&mut ViewController) -> Result<Arc<View>, RenderFailure> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut ctl = session.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut ctl)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
    .map_err(|failure| ApiError::Render {
        session: id,
        failure,
    })
}

async fn options_handler() -> Json<OptionsResponse> {
    Json(OptionsResponse {
        layers: registry::layer_options(),
        schemes: ColorScheme::names(),
        defaults: SelectionState::default(),
    })
}

async fn create_session(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<SessionView>), ApiError> {
    state.prune_idle();
    let id = state.next_id.fetch_add(1, Ordering::Relaxed);
    let session = Arc::new(Mutex::new(ViewController::new(
        Arc::clone(&state.source),
        state.map.clone(),
    )));
    state.sessions.lock().unwrap_or_else(|e| e.into_inner()).insert(
        id,
        SessionEntry {
            controller: Arc::clone(&session),
            last_seen: Instant::now(),
        },
    );
    info!(session = id, "session created");

    let view = with_session(id, session, |ctl| ctl.refresh()).await?;
    Ok((StatusCode::CREATED, Json(SessionView { session: id, view })))
}

async fn get_view(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state.session(id)?;
    let view = with_session(id, session, ViewController::current).await?;
    Ok(Json(SessionView { session: id, view }))
}

async fn update_selection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(change): Json<SelectionChange>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state.session(id)?;
    let view = with_session(id, session, move |ctl| ctl.apply(&change)).await?;
    Ok(Json(SessionView { session: id, view }))
}

async fn table_csv(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Response, ApiError> {
    let session = state.session(id)?;
    let view = with_session(id, session, ViewController::current).await?;
    let csv = view.table.to_csv().map_err(|e| ApiError::Render {
        session: id,
        failure: e.into(),
    })?;
    let disposition = format!("attachment; filename=\"{}\"", view.csv_file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}

async fn delete_session(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> StatusCode {
    let removed = state
        .sessions
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&id);
    match removed {
        Some(_) => {
            info!(session = id, "session closed");
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

pub fn build_app(state: Arc<AppState>, static_dir: PathBuf) -> Router {
    Router::new()
        .route("/api/options", get(options_handler))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", axum::routing::delete(delete_session))
        .route("/api/sessions/:id/view", get(get_view))
        .route("/api/sessions/:id/selection", post(update_selection))
        .route("/api/sessions/:id/table.csv", get(table_csv))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig, source: Arc<dyn DatasetSource>) -> Result<()> {
    let static_dir = config.server.static_dir.clone();
    if !static_dir.exists() {
        warn!(path = ?static_dir, "static directory missing, serving the API only");
    }

    let idle_timeout = Duration::from_secs(config.server.session_idle_secs);
    let state = Arc::new(AppState::new(source, config.map.clone(), idle_timeout));
    tokio::spawn(run_session_pruner(Arc::clone(&state)));
    let app = build_app(state, static_dir);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::tests::StaticSource;
    use crate::types::{Dataset, Feature, Layer};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn rbsk() -> Dataset {
        let team = |name: &str, sam: Value| {
            let attributes = [
                ("RBSK Team", json!(name)),
                ("SAM", sam),
                ("MAM", json!(1)),
                ("Moderately", json!(0)),
                ("Severely U", json!(0)),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
            Feature {
                geometry: None,
                attributes,
            }
        };
        Dataset::new(
            Layer::Rbsk,
            vec![team("X", json!(10)), team("Y", json!(null)), team("Z", json!(5))],
        )
    }

    fn state(idle_timeout: Duration) -> Arc<AppState> {
        Arc::new(AppState::new(
            Arc::new(StaticSource::new([rbsk()])),
            MapConfig::default(),
            idle_timeout,
        ))
    }

    fn router(state: Arc<AppState>) -> Router {
        build_app(state, std::env::temp_dir().join("facility-choropleth-no-static"))
    }

    fn app() -> Router {
        router(state(Duration::from_secs(3600)))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn json_body(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn options_list_layers_and_schemes() {
        let (status, body) = send(&app(), "GET", "/api/options", None).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        assert_eq!(body["schemes"].as_array().unwrap().len(), 7);
        assert_eq!(body["layers"][1]["layer"], json!("RBSK"));
        assert_eq!(body["layers"][1]["indicators"][2], json!("Moderately UW"));
        assert_eq!(body["defaults"]["layer"], json!("PHC"));
    }

    #[tokio::test]
    async fn default_session_reports_missing_phc_data() {
        let app = app();
        let (status, body) = send(&app, "POST", "/api/sessions", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(&body);
        assert_eq!(body["kind"], json!("data_unavailable"));
        assert_eq!(body["session"], json!(1));
    }

    #[tokio::test]
    async fn selection_update_renders_and_exports_csv() {
        let app = app();
        send(&app, "POST", "/api/sessions", None).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/sessions/1/selection",
            Some(json!({"layer": "RBSK", "show_labels": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        assert_eq!(body["view"]["title"], json!("RBSK - SAM"));
        assert_eq!(body["view"]["stats"]["totals"][0]["total"], json!(15));
        assert_eq!(body["view"]["table"]["rows"][2]["label"], json!("Y"));

        let (status, csv) = send(&app, "GET", "/api/sessions/1/table.csv", None).await;
        assert_eq!(status, StatusCode::OK);
        let csv = String::from_utf8(csv).unwrap();
        assert!(csv.starts_with("Rank,RBSK Team,SAM,MAM,Moderately UW,Severely UW\n1,X,10,1,0,0\n"));
    }

    #[tokio::test]
    async fn invalid_indicator_is_a_bad_request() {
        let app = app();
        send(&app, "POST", "/api/sessions", None).await;
        send(&app, "POST", "/api/sessions/1/selection", Some(json!({"layer": "RBSK"}))).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/sessions/1/selection",
            Some(json!({"indicator": "Obese"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json_body(&body)["detail"].as_str().unwrap().contains("Obese"));

        let (status, body) = send(&app, "GET", "/api/sessions/1/view", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["view"]["selection"]["indicator"], json!("SAM"));
    }

    #[tokio::test]
    async fn sessions_are_independent_and_deletable() {
        let app = app();
        send(&app, "POST", "/api/sessions", None).await;
        send(&app, "POST", "/api/sessions", None).await;
        send(&app, "POST", "/api/sessions/1/selection", Some(json!({"layer": "RBSK"}))).await;
        send(
            &app,
            "POST",
            "/api/sessions/2/selection",
            Some(json!({"layer": "RBSK", "scheme": "Blues"})),
        )
        .await;

        let (_, one) = send(&app, "GET", "/api/sessions/1/view", None).await;
        let (_, two) = send(&app, "GET", "/api/sessions/2/view", None).await;
        assert_eq!(json_body(&one)["view"]["selection"]["scheme"], json!("YlOrRd"));
        assert_eq!(json_body(&two)["view"]["selection"]["scheme"], json!("Blues"));

        let (status, _) = send(&app, "DELETE", "/api/sessions/1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", "/api/sessions/1/view", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn idle_sessions_are_dropped_on_the_next_create() {
        let state = state(Duration::ZERO);
        let app = router(Arc::clone(&state));
        send(&app, "POST", "/api/sessions", None).await;
        send(&app, "POST", "/api/sessions", None).await;
        assert_eq!(state.session_count(), 1);

        let (status, _) = send(&app, "GET", "/api/sessions/1/view", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(
            &app,
            "POST",
            "/api/sessions/2/selection",
            Some(json!({"layer": "RBSK"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn active_sessions_survive_pruning() {
        let state = state(Duration::from_secs(3600));
        let app = router(Arc::clone(&state));
        send(&app, "POST", "/api/sessions", None).await;
        send(&app, "POST", "/api/sessions", None).await;
        assert_eq!(state.prune_idle(), 0);
        assert_eq!(state.session_count(), 2);
    }
}

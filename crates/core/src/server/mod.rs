use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

mod persistence;

use crate::access::{self, Principal};
use crate::catalog::{builtin_library, AbstractWidget, WidgetLibrary};
use crate::config::{resolve_relative_to, AppConfig};
use crate::error::GraphError;
use crate::model::{
    AbstractWidgetId, Connection, ConnectionId, Input, InputId, Output, OutputId, Widget, WidgetId,
    WidgetKind, Workflow, WorkflowId,
};
use crate::preview::{self, WorkflowPreview};
use crate::store::GraphStore;
use persistence::WorkflowsPersistence;

const USER_HEADER: &str = "x-weft-user";
const LOCAL_USER: &str = "local";

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: GraphStore,
    library: WidgetLibrary,
    persistence: Option<WorkflowsPersistence>,
    config: RwLock<AppConfig>,
    config_path: PathBuf,
}

impl AppState {
    pub fn new(
        library: WidgetLibrary,
        config: AppConfig,
        config_path: PathBuf,
        data_dir: PathBuf,
    ) -> Self {
        let store = GraphStore::new();

        let persistence = match WorkflowsPersistence::new(&data_dir) {
            Ok(persistence) => Some(persistence),
            Err(err) => {
                warn!(
                    error = %err,
                    data_dir = %data_dir.display(),
                    "Failed to initialize workflows persistence; running with in-memory state only"
                );
                None
            }
        };

        if let Some(persistence) = &persistence {
            match persistence.load_workflows_for_startup() {
                Ok(restored) => {
                    let restored_count = restored.len();
                    for workflow in restored {
                        store.insert_workflow(workflow);
                    }
                    info!(
                        restored_count,
                        db_path = %persistence.db_path().display(),
                        "Restored persisted workflows into runtime state"
                    );
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        db_path = %persistence.db_path().display(),
                        "Failed to restore persisted workflows; continuing with empty state"
                    );
                }
            }
        }

        Self {
            inner: Arc::new(AppStateInner {
                store,
                library,
                persistence,
                config: RwLock::new(config),
                config_path,
            }),
        }
    }

    pub fn store(&self) -> &GraphStore {
        &self.inner.store
    }

    fn persist_workflow_snapshot(&self, id: WorkflowId) {
        let Some(persistence) = &self.inner.persistence else {
            return;
        };
        match self.inner.store.snapshot(id) {
            Ok(workflow) => {
                if let Err(err) = persistence.upsert_workflow(&workflow) {
                    warn!(workflow_id = %id, error = %err, "Failed to persist workflow snapshot");
                }
            }
            Err(err) => {
                warn!(workflow_id = %id, error = %err, "Skipped persisting missing workflow");
            }
        }
    }

    fn forget_persisted_workflow(&self, id: WorkflowId) {
        if let Some(persistence) = &self.inner.persistence {
            if let Err(err) = persistence.delete_workflow(id) {
                warn!(workflow_id = %id, error = %err, "Failed to delete persisted workflow row");
            }
        }
    }
}

pub fn app_state_with_config(
    config: AppConfig,
    config_path: PathBuf,
    data_dir: PathBuf,
) -> AppState {
    let mut library = builtin_library();
    let library_dir = resolve_relative_to(&data_dir, &config.paths.library_dir);
    if library_dir.is_dir() {
        library.load_from_dir(&library_dir);
    }
    info!(templates = library.len(), "Widget library ready");

    AppState::new(library, config, config_path, data_dir)
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub public: bool,
}

#[derive(Deserialize)]
pub struct AddWidgetRequest {
    pub abstract_widget: AbstractWidgetId,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

#[derive(Deserialize)]
pub struct MoveWidgetRequest {
    pub x: f64,
    pub y: f64,
}

#[derive(Deserialize)]
pub struct CreateConnectionRequest {
    pub output: OutputId,
    pub input: InputId,
}

#[derive(Serialize)]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub name: String,
    pub user: String,
    pub is_public: bool,
    pub is_subprocess: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
pub struct WorkflowView {
    pub id: WorkflowId,
    pub name: String,
    pub user: String,
    pub is_public: bool,
    pub is_subprocess: bool,
    pub widgets: Vec<WidgetView>,
    pub connections: Vec<ConnectionView>,
}

#[derive(Serialize)]
pub struct WidgetView {
    pub id: WidgetId,
    pub workflow: WorkflowId,
    pub name: String,
    pub kind: WidgetKind,
    pub x: f64,
    pub y: f64,
    pub abstract_widget: Option<AbstractWidgetId>,
    pub description: String,
    pub visual: Option<String>,
    pub finished: bool,
    pub running: bool,
    pub error: bool,
    pub progress: u8,
    pub inputs: Vec<InputView>,
    pub outputs: Vec<OutputView>,
}

/// Input as exposed on the wire. `value` is a deferred field: it is
/// rendered for parameter inputs only, never for data feeds.
#[derive(Serialize)]
pub struct InputView {
    pub id: InputId,
    pub name: String,
    pub short_name: String,
    pub description: String,
    pub variable: String,
    pub required: bool,
    pub parameter: bool,
    pub parameter_type: Option<String>,
    pub value: Option<serde_json::Value>,
    pub multi_id: Option<crate::model::AbstractInputId>,
    pub order: u32,
    pub abstract_input: Option<crate::model::AbstractInputId>,
    pub options: Vec<crate::model::InputOption>,
}

#[derive(Serialize)]
pub struct OutputView {
    pub id: OutputId,
    pub name: String,
    pub short_name: String,
    pub description: String,
    pub variable: String,
    pub order: u32,
    pub abstract_output: Option<crate::model::AbstractOutputId>,
}

#[derive(Serialize)]
pub struct ConnectionView {
    pub id: ConnectionId,
    pub workflow: WorkflowId,
    pub output: OutputId,
    pub input: InputId,
    pub output_widget: Option<WidgetId>,
    pub input_widget: Option<WidgetId>,
}

#[derive(Serialize)]
pub struct CreateConnectionResponse {
    pub connection: ConnectionView,
    /// Widget whose cached input list went stale because its multi-group
    /// grew, if any.
    pub refresh: Option<WidgetId>,
    pub refreshworkflow: Option<WorkflowId>,
}

#[derive(Serialize)]
pub struct DisconnectResponse {
    pub refresh: Option<WidgetId>,
    pub refreshworkflow: Option<WorkflowId>,
}

fn input_view(input: &Input) -> InputView {
    InputView {
        id: input.id,
        name: input.name.clone(),
        short_name: input.short_name.clone(),
        description: input.description.clone(),
        variable: input.variable.clone(),
        required: input.required,
        parameter: input.parameter,
        parameter_type: input.parameter_type.clone(),
        value: if input.parameter {
            input.value.clone()
        } else {
            None
        },
        multi_id: input.multi_id,
        order: input.order,
        abstract_input: input.abstract_input,
        options: input.options.clone(),
    }
}

fn output_view(output: &Output) -> OutputView {
    OutputView {
        id: output.id,
        name: output.name.clone(),
        short_name: output.short_name.clone(),
        description: output.description.clone(),
        variable: output.variable.clone(),
        order: output.order,
        abstract_output: output.abstract_output,
    }
}

fn widget_view(widget: &Widget, library: &WidgetLibrary) -> WidgetView {
    let template = widget
        .abstract_widget
        .and_then(|id| library.get(id));
    WidgetView {
        id: widget.id,
        workflow: widget.workflow,
        name: widget.name.clone(),
        kind: widget.kind,
        x: widget.x,
        y: widget.y,
        abstract_widget: widget.abstract_widget,
        description: template.map(|t| t.description.clone()).unwrap_or_default(),
        visual: template.map(|t| t.visual.clone()),
        finished: widget.finished,
        running: widget.running,
        error: widget.error,
        progress: widget.progress,
        inputs: widget.inputs.iter().map(input_view).collect(),
        outputs: widget.outputs.iter().map(output_view).collect(),
    }
}

fn connection_view(conn: &Connection, workflow: &Workflow) -> ConnectionView {
    ConnectionView {
        id: conn.id,
        workflow: conn.workflow,
        output: conn.output,
        input: conn.input,
        output_widget: workflow.output_owner(conn.output).map(|widget| widget.id),
        input_widget: workflow.input_owner(conn.input).map(|widget| widget.id),
    }
}

fn workflow_view(workflow: &Workflow, library: &WidgetLibrary) -> WorkflowView {
    WorkflowView {
        id: workflow.id,
        name: workflow.name.clone(),
        user: workflow.owner.clone(),
        is_public: workflow.public,
        is_subprocess: workflow.is_subprocess(),
        widgets: workflow
            .widgets
            .iter()
            .map(|widget| widget_view(widget, library))
            .collect(),
        connections: workflow
            .connections
            .iter()
            .map(|conn| connection_view(conn, workflow))
            .collect(),
    }
}

fn workflow_summary(workflow: &Workflow) -> WorkflowSummary {
    WorkflowSummary {
        id: workflow.id,
        name: workflow.name.clone(),
        user: workflow.owner.clone(),
        is_public: workflow.public,
        is_subprocess: workflow.is_subprocess(),
        created_at: workflow.created_at,
        updated_at: workflow.updated_at,
    }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

pub enum AppError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<GraphError> for AppError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CrossWorkflow | GraphError::Cycle => AppError::BadRequest(err.to_string()),
            GraphError::NotFound { .. } => AppError::NotFound(err.to_string()),
        }
    }
}

fn principal_from_headers(headers: &HeaderMap) -> Principal {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|username| !username.is_empty())
        .map(Principal::new)
        .unwrap_or_else(|| Principal::new(LOCAL_USER))
}

/// Read access failures surface as 404 so private workflows stay
/// unenumerable; write failures are an explicit 403.
fn ensure_readable(principal: &Principal, workflow: &Workflow) -> Result<(), AppError> {
    if access::can_read(principal, workflow) {
        Ok(())
    } else {
        Err(AppError::NotFound(format!(
            "workflow not found: {}",
            workflow.id
        )))
    }
}

fn ensure_writable(principal: &Principal, workflow: &Workflow) -> Result<(), AppError> {
    if access::can_write(principal, workflow) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "workflow {} is not editable by {}",
            workflow.id, principal.username
        )))
    }
}

// ─── Router ──────────────────────────────────────────────────────────────────

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/config", get(get_config).put(update_config))
        .route("/api/library", get(list_library))
        .route("/api/workflows", get(list_workflows).post(create_workflow))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/preview", get(preview_workflow))
        .route("/api/workflows/{id}/widgets", post(add_widget))
        .route(
            "/api/widgets/{id}",
            patch(move_widget).delete(delete_widget),
        )
        .route("/api/connections", post(create_connection))
        .route(
            "/api/connections/{id}",
            axum::routing::delete(destroy_connection),
        )
        .route("/api/{*path}", any(api_route_not_found))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn api_route_not_found(Path(path): Path<String>) -> AppError {
    AppError::NotFound(format!("api endpoint not found: /api/{path}"))
}

async fn get_config(State(state): State<AppState>) -> Json<AppConfig> {
    Json(state.inner.config.read().await.clone())
}

async fn update_config(
    State(state): State<AppState>,
    Json(payload): Json<AppConfig>,
) -> Result<Json<AppConfig>, AppError> {
    payload.save_to_path(&state.inner.config_path)?;
    *state.inner.config.write().await = payload.clone();
    Ok(Json(payload))
}

async fn list_library(State(state): State<AppState>) -> Json<Vec<AbstractWidget>> {
    Json(
        state
            .inner
            .library
            .list()
            .into_iter()
            .cloned()
            .collect(),
    )
}

async fn list_workflows(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<Vec<WorkflowSummary>> {
    let principal = principal_from_headers(&headers);
    let summaries = state
        .inner
        .store
        .visible_to(&principal.username)
        .iter()
        .map(workflow_summary)
        .collect();
    Json(summaries)
}

async fn create_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowView>), AppError> {
    let principal = principal_from_headers(&headers);
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest(
            "workflow name must not be empty".into(),
        ));
    }

    let id = state
        .inner
        .store
        .create_workflow(name, principal.username, payload.public);
    state.persist_workflow_snapshot(id);

    let workflow = state.inner.store.snapshot(id)?;
    Ok((
        StatusCode::CREATED,
        Json(workflow_view(&workflow, &state.inner.library)),
    ))
}

async fn get_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<WorkflowId>,
) -> Result<Json<WorkflowView>, AppError> {
    let principal = principal_from_headers(&headers);
    let workflow = state.inner.store.snapshot(id)?;
    ensure_readable(&principal, &workflow)?;

    Ok(Json(workflow_view(&workflow, &state.inner.library)))
}

async fn delete_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<WorkflowId>,
) -> Result<StatusCode, AppError> {
    let principal = principal_from_headers(&headers);
    let workflow = state.inner.store.snapshot(id)?;
    ensure_writable(&principal, &workflow)?;

    state.inner.store.remove_workflow(id)?;
    state.forget_persisted_workflow(id);
    Ok(StatusCode::NO_CONTENT)
}

async fn preview_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<WorkflowId>,
) -> Result<Json<WorkflowPreview>, AppError> {
    let principal = principal_from_headers(&headers);
    let workflow = state.inner.store.snapshot(id)?;
    ensure_readable(&principal, &workflow)?;

    Ok(Json(preview::normalize(&workflow)))
}

async fn add_widget(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<WorkflowId>,
    Json(payload): Json<AddWidgetRequest>,
) -> Result<(StatusCode, Json<WidgetView>), AppError> {
    let principal = principal_from_headers(&headers);
    let workflow = state.inner.store.snapshot(id)?;
    ensure_writable(&principal, &workflow)?;

    let template = state
        .inner
        .library
        .get(payload.abstract_widget)
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "abstract widget not found: {}",
                payload.abstract_widget
            ))
        })?;

    let widget = state
        .inner
        .store
        .add_widget(id, template, payload.x, payload.y)?;
    state.persist_workflow_snapshot(id);

    Ok((
        StatusCode::CREATED,
        Json(widget_view(&widget, &state.inner.library)),
    ))
}

async fn move_widget(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<WidgetId>,
    Json(payload): Json<MoveWidgetRequest>,
) -> Result<Json<WidgetView>, AppError> {
    let principal = principal_from_headers(&headers);
    let workflow_id = state.inner.store.workflow_of_widget(id)?;
    let workflow = state.inner.store.snapshot(workflow_id)?;
    ensure_writable(&principal, &workflow)?;

    state.inner.store.move_widget(id, payload.x, payload.y)?;
    state.persist_workflow_snapshot(workflow_id);

    let workflow = state.inner.store.snapshot(workflow_id)?;
    let widget = workflow
        .widget(id)
        .ok_or_else(|| AppError::NotFound(format!("widget not found: {id}")))?;
    Ok(Json(widget_view(widget, &state.inner.library)))
}

async fn delete_widget(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<WidgetId>,
) -> Result<StatusCode, AppError> {
    let principal = principal_from_headers(&headers);
    let workflow_id = state.inner.store.workflow_of_widget(id)?;
    let workflow = state.inner.store.snapshot(workflow_id)?;
    ensure_writable(&principal, &workflow)?;

    state.inner.store.remove_widget(id)?;
    state.persist_workflow_snapshot(workflow_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn create_connection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateConnectionRequest>,
) -> Result<(StatusCode, Json<CreateConnectionResponse>), AppError> {
    let principal = principal_from_headers(&headers);
    let workflow_id = state.inner.store.workflow_of_input(payload.input)?;
    let workflow = state.inner.store.snapshot(workflow_id)?;
    ensure_writable(&principal, &workflow)?;

    let change = state
        .inner
        .store
        .create_connection(payload.output, payload.input)?;
    state.persist_workflow_snapshot(workflow_id);

    let workflow = state.inner.store.snapshot(workflow_id)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateConnectionResponse {
            connection: connection_view(&change.connection, &workflow),
            refresh: change.refresh.map(|scope| scope.widget),
            refreshworkflow: change.refresh.map(|scope| scope.workflow),
        }),
    ))
}

async fn destroy_connection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ConnectionId>,
) -> Result<Json<DisconnectResponse>, AppError> {
    let principal = principal_from_headers(&headers);
    let workflow_id = state.inner.store.workflow_of_connection(id)?;
    let workflow = state.inner.store.snapshot(workflow_id)?;
    ensure_writable(&principal, &workflow)?;

    let outcome = state.inner.store.destroy_connection(id)?;
    state.persist_workflow_snapshot(workflow_id);

    Ok(Json(DisconnectResponse {
        refresh: outcome.refresh.map(|scope| scope.widget),
        refreshworkflow: outcome.refresh.map(|scope| scope.workflow),
    }))
}

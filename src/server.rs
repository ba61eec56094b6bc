use crate::{
    dispatch::{
        registry::{CallRequest, TaskRegistry, TaskRequest},
        types::{Capabilities, Outcome, TaskInfo},
    },
    errors::{into_response, AppError, TaskError},
    security,
    tasks::TaskContext,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::{sync::Arc, time::Instant};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<TaskContext>,
    pub registry: Arc<TaskRegistry>,
    pub rls: security::RateLimiters,
}

impl AppState {
    pub fn new(ctx: TaskContext, registry: TaskRegistry) -> Self {
        let limits = &ctx.cfg.limits;
        let rls = security::RateLimiters::new(limits.rate_per_sec, limits.rate_burst, limits.rate_per_sec, limits.rate_burst);
        Self { ctx: Arc::new(ctx), registry: Arc::new(registry), rls }
    }
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let server = &state.ctx.cfg.server;
    let addr: std::net::SocketAddr = format!("{}:{}", server.bind_addr, server.port).parse()?;
    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
    }
    tracing::info!("shutting down");
}

pub fn build_router(shared: AppState) -> Router {
    let base = shared.ctx.cfg.server.base_path.trim_end_matches('/').to_string();
    let limit_bytes = shared.ctx.cfg.limits.max_request_kb * 1024;
    Router::new()
        .route("/healthz", get(health))
        .route(&format!("{base}/capabilities"), get(capabilities))
        .route(&format!("{base}/call"), post(call))
        .route("/filter_csv", post(filter_csv))
        .layer(RequestBodyLimitLayer::new(limit_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

async fn health(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match security::authorize(&state.ctx.cfg.auth, &headers) {
        Ok(()) => (StatusCode::OK, Json(json!({"status":"ok"}))).into_response(),
        Err(e) => into_response(e).into_response(),
    }
}

async fn capabilities(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = security::authorize(&state.ctx.cfg.auth, &headers) {
        return into_response(e).into_response();
    }
    let tasks: Vec<TaskInfo> = state
        .registry
        .list_names()
        .into_iter()
        .filter_map(|n| {
            let caps = state.registry.get(&n)?.capabilities();
            Some(TaskInfo { name: n, input_schema: caps["input"].clone(), output_schema: caps["output"].clone() })
        })
        .collect();
    let caps = Capabilities { version: env!("CARGO_PKG_VERSION"), tasks };
    (StatusCode::OK, Json(caps)).into_response()
}

/// Boundary refusals that happen before a task is considered.
fn admit(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    security::authorize(&state.ctx.cfg.auth, headers)?;
    security::content_length_ok(headers, state.ctx.cfg.limits.max_request_kb)?;
    let token = security::extract_bearer(headers);
    state.rls.check(token.as_deref())
}

async fn call(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CallRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();

    if let Err(e) = admit(&state, &headers) {
        audit(&request_id, "", "deny", e.code(), started);
        return into_response(e).into_response();
    }
    let req = match body {
        Ok(Json(req)) => req,
        Err(rej) => {
            let e = rejection(rej);
            audit(&request_id, "", "deny", e.code(), started);
            return into_response(e).into_response();
        }
    };
    let task = req.request.task.clone();

    let res = state.registry.dispatch(&state.ctx, req.request).await;
    let status = match &res {
        Ok(_) => {
            audit(&request_id, &task, "allow", "OK", started);
            StatusCode::OK
        }
        Err(e) => {
            audit(&request_id, &task, "error", e.code(), started);
            e.status()
        }
    };
    (status, Json(Outcome::new(req.id, res))).into_response()
}

/// The single filtering endpoint: takes a filter body, returns the matching records.
async fn filter_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let task = "filter-and-return";

    if let Err(e) = admit(&state, &headers) {
        audit(&request_id, task, "deny", e.code(), started);
        return into_response(e).into_response();
    }

    let args = match body {
        Ok(Json(args)) => args,
        Err(rej) => {
            let e = rejection(rej);
            audit(&request_id, task, "deny", e.code(), started);
            return into_response(e).into_response();
        }
    };
    let req = TaskRequest { task: task.to_string(), args, timeout_s: None };
    match state.registry.dispatch(&state.ctx, req).await {
        Ok(records) => {
            audit(&request_id, task, "allow", "OK", started);
            (StatusCode::OK, Json(records)).into_response()
        }
        Err(e) => {
            audit(&request_id, task, "error", e.code(), started);
            into_response(AppError::from(e)).into_response()
        }
    }
}

fn audit(request_id: &str, task: &str, decision: &str, code: &str, started: Instant) {
    tracing::info!(
        request_id = request_id,
        task = task,
        decision = decision,
        code = code,
        duration_ms = started.elapsed().as_millis() as u64,
        "audit"
    );
}

fn rejection(e: JsonRejection) -> AppError {
    match e {
        // a body cut off by the size limit, including chunked bodies with no content-length
        JsonRejection::BytesRejection(ref b) if b.status() == StatusCode::PAYLOAD_TOO_LARGE => AppError::RequestTooLarge,
        other => AppError::from(TaskError::InvalidArgument(other.body_text())),
    }
}

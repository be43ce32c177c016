use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;
use vps_common::VpsConfig;
use vps_executor::{ContainerDriver, DockerRuntime};
use vps_lib::{dispatch, Command, Decision, Notice, Outcome, VpsContext};
use vps_store::SqliteStore;

#[derive(Clone)]
struct AppState {
    ctx: VpsContext,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting VPS host service...");
    let config = VpsConfig::from_env();

    let runtime =
        DockerRuntime::from_local_defaults().context("cannot reach the Docker daemon")?;
    let driver = ContainerDriver::new(Arc::new(runtime));
    let store = Arc::new(
        SqliteStore::open(&config.db_path).context("cannot open the instance database")?,
    );

    let listen = format!("{}:{}", config.api_host, config.api_port);
    let ctx = VpsContext::new(driver, store, config).await?;

    // Periodic presence refresh: one read-only count per minute, never a
    // container-runtime call.
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            loop {
                tick.tick().await;
                match ctx.instance_count().await {
                    Ok(count) => info!(count, "Serving cloud instances"),
                    Err(e) => error!(error = %e, "Instance count refresh failed"),
                }
            }
        });
    }

    let app = create_app(AppState { ctx });
    let addr: SocketAddr = listen.parse().context("invalid listen address")?;
    info!(%addr, "VPS API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn create_app(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/instances",
            post(create_instance).get(list_instances).delete(delete_all),
        )
        .route("/api/v1/instances/deploy", post(deploy_instance))
        .route("/api/v1/instances/:name", delete(remove_instance))
        .route("/api/v1/instances/:name/start", post(start_instance))
        .route("/api/v1/instances/:name/stop", post(stop_instance))
        .route("/api/v1/instances/:name/restart", post(restart_instance))
        .route("/api/v1/instances/:name/tunnel", post(tunnel_instance))
        .route("/api/v1/confirmations/:token", post(resolve_confirmation))
        .route("/api/v1/regen", post(regen_credential))
        .route("/api/v1/node", get(node_status))
        .route("/api/v1/reconcile", get(reconcile))
        .route("/api/v1/admins", post(grant_admin))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

struct Identity {
    user_id: String,
    display_name: Option<String>,
}

/// The front-end authenticates callers; this service only receives the
/// opaque identity it resolved.
fn identity(headers: &HeaderMap) -> Result<Identity, (StatusCode, Json<Outcome>)> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty());

    match user_id {
        Some(user_id) => Ok(Identity {
            user_id,
            display_name: headers
                .get("x-display-name")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }),
        None => Err((
            StatusCode::BAD_REQUEST,
            Json(Outcome {
                notice: Notice::new("Missing Identity", "The x-user-id header is required."),
                direct: None,
                failed: true,
            }),
        )),
    }
}

async fn run(
    state: &AppState,
    headers: HeaderMap,
    command: Command,
) -> (StatusCode, Json<Outcome>) {
    match identity(&headers) {
        Err(resp) => resp,
        Ok(id) => {
            let outcome =
                dispatch(&state.ctx, &id.user_id, id.display_name.as_deref(), command).await;
            let status = if outcome.failed {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::OK
            };
            (status, Json(outcome))
        }
    }
}

#[derive(Deserialize)]
struct CreateRequest {
    tier: String,
}

async fn create_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateRequest>,
) -> (StatusCode, Json<Outcome>) {
    run(&state, headers, Command::Create { tier: req.tier }).await
}

#[derive(Deserialize)]
struct DeployRequest {
    user_id: String,
    name: String,
    ram: String,
    cpu: String,
    duration: String,
}

async fn deploy_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeployRequest>,
) -> (StatusCode, Json<Outcome>) {
    run(
        &state,
        headers,
        Command::Deploy {
            user_id: req.user_id,
            name: req.name,
            ram: req.ram,
            cpu: req.cpu,
            duration: req.duration,
        },
    )
    .await
}

async fn remove_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> (StatusCode, Json<Outcome>) {
    run(&state, headers, Command::Remove { name }).await
}

async fn delete_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Outcome>) {
    run(&state, headers, Command::DeleteAll).await
}

#[derive(Deserialize)]
struct ConfirmRequest {
    decision: Decision,
}

async fn resolve_confirmation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token): Path<Uuid>,
    Json(req): Json<ConfirmRequest>,
) -> (StatusCode, Json<Outcome>) {
    run(
        &state,
        headers,
        Command::Confirm {
            token,
            decision: req.decision,
        },
    )
    .await
}

async fn start_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> (StatusCode, Json<Outcome>) {
    run(&state, headers, Command::Start { name }).await
}

async fn stop_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> (StatusCode, Json<Outcome>) {
    run(&state, headers, Command::Stop { name }).await
}

async fn restart_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> (StatusCode, Json<Outcome>) {
    run(&state, headers, Command::Restart { name }).await
}

#[derive(Deserialize)]
struct RegenRequest {
    #[serde(default)]
    name: Option<String>,
}

async fn regen_credential(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegenRequest>,
) -> (StatusCode, Json<Outcome>) {
    run(&state, headers, Command::RegenCredential { name: req.name }).await
}

async fn list_instances(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Outcome>) {
    run(&state, headers, Command::ListAll).await
}

async fn node_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Outcome>) {
    run(&state, headers, Command::NodeStatus).await
}

#[derive(Deserialize)]
struct TunnelRequest {
    port: u16,
}

async fn tunnel_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(req): Json<TunnelRequest>,
) -> (StatusCode, Json<Outcome>) {
    run(&state, headers, Command::Tunnel { name, port: req.port }).await
}

#[derive(Deserialize)]
struct GrantAdminRequest {
    user_id: String,
}

async fn grant_admin(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GrantAdminRequest>,
) -> (StatusCode, Json<Outcome>) {
    run(&state, headers, Command::GrantAdmin { user_id: req.user_id }).await
}

async fn reconcile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Outcome>) {
    run(&state, headers, Command::Reconcile).await
}

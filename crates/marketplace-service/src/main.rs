use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use marketplace_api::{
    AccessCheckRequest, AccessCheckResult, AddListingRequest, AddProfileRequest, MarketplaceApi,
    MigrateResult, NotificationPermissionRequest, NotificationPermissionResult, RecommendationView,
    TokenizeResult, API_CONTRACT_VERSION,
};
use marketplace_core::{
    AccessPolicy, BookmarkSnapshot, EngineConfig, ListingId, ListingSnapshot, ProfileId,
    ProfileSnapshot, RunReport, DEFAULT_BATCH_SIZE, DEFAULT_SEARCH_INDEX, DEFAULT_TOP_N,
};
use marketplace_store_sqlite::SchemaStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const DEFAULT_ENGINE: &str = "custom";

#[derive(Debug, Clone)]
struct ServiceState {
    api: MarketplaceApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct BookmarkRequest {
    profile_id: ProfileId,
    listing_id: ListingId,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenizeRequest {
    marking: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PresentNotificationRequest {
    viewer_id: ProfileId,
    notification: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct RunRequest {
    #[serde(default = "default_engines")]
    engines: Vec<String>,
}

fn default_engines() -> Vec<String> {
    vec![DEFAULT_ENGINE.to_string()]
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    policy_version: String,
}

#[derive(Debug, Clone, Serialize)]
struct VisibleListings {
    profile_id: ProfileId,
    listings: Vec<ListingSnapshot>,
}

#[derive(Debug, Parser)]
#[command(name = "marketplace-service")]
#[command(about = "Local HTTP service for the listing marketplace")]
struct Args {
    #[arg(long, default_value = "./marketplace.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    #[arg(long, env = "MARKETPLACE_POLICY")]
    policy: Option<PathBuf>,
    #[arg(long, env = "MARKETPLACE_SEARCH_URL")]
    search_url: Option<String>,
    #[arg(long, default_value = DEFAULT_SEARCH_INDEX)]
    search_index: String,
    #[arg(long, default_value_t = DEFAULT_TOP_N)]
    top_n: usize,
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(message: impl Into<String>) -> ServiceError {
        ServiceError { service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/profiles", post(profile_add))
        .route("/v1/listings", post(listing_add))
        .route("/v1/listings/visible/:profile_id", get(listings_visible))
        .route("/v1/bookmarks", post(bookmark_add))
        .route("/v1/access/check", post(access_check))
        .route("/v1/access/tokenize", post(access_tokenize))
        .route("/v1/notifications/permission", post(notification_permission))
        .route("/v1/notifications/present", post(notification_present))
        .route("/v1/recommend/run", post(recommend_run))
        .route("/v1/recommendations/:profile_id", get(recommendations_show))
        .with_state(state)
}

fn build_api(args: &Args) -> Result<MarketplaceApi> {
    let mut api = MarketplaceApi::new(args.db.clone()).with_engine_config(EngineConfig {
        top_n: args.top_n,
        batch_size: args.batch_size,
        search_service_url: args.search_url.clone(),
        search_index: args.search_index.clone(),
    });
    if let Some(path) = args.policy.as_ref() {
        let policy = AccessPolicy::from_yaml_path(path)
            .with_context(|| format!("failed to load access policy {}", path.display()))?;
        api = api.with_policy(policy);
    }
    Ok(api)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_env("MARKETPLACE_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let state = ServiceState { api: build_api(&args)? };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, db = %args.db.display(), "marketplace service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health(State(state): State<ServiceState>) -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse {
        status: "ok",
        policy_version: state.api.policy().version.clone(),
    }))
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<SchemaStatus>>, ServiceError> {
    let status = state.api.schema_status().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<MigrateResult>>, ServiceError> {
    let result =
        state.api.migrate(request.dry_run).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(result)))
}

async fn profile_add(
    State(state): State<ServiceState>,
    Json(request): Json<AddProfileRequest>,
) -> Result<Json<ServiceEnvelope<ProfileSnapshot>>, ServiceError> {
    let profile =
        state.api.add_profile(request).map_err(|err| ServiceState::error(format!("{err:#}")))?;
    Ok(Json(envelope(profile)))
}

async fn listing_add(
    State(state): State<ServiceState>,
    Json(request): Json<AddListingRequest>,
) -> Result<Json<ServiceEnvelope<ListingSnapshot>>, ServiceError> {
    let listing =
        state.api.add_listing(request).map_err(|err| ServiceState::error(format!("{err:#}")))?;
    Ok(Json(envelope(listing)))
}

async fn listings_visible(
    State(state): State<ServiceState>,
    Path(profile_id): Path<i64>,
) -> Result<Json<ServiceEnvelope<VisibleListings>>, ServiceError> {
    let profile_id = ProfileId(profile_id);
    let listings = state
        .api
        .visible_listings(profile_id)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(VisibleListings { profile_id, listings })))
}

async fn bookmark_add(
    State(state): State<ServiceState>,
    Json(request): Json<BookmarkRequest>,
) -> Result<Json<ServiceEnvelope<BookmarkSnapshot>>, ServiceError> {
    let bookmark = state
        .api
        .add_bookmark(request.profile_id, request.listing_id)
        .map_err(|err| ServiceState::error(format!("{err:#}")))?;
    Ok(Json(envelope(bookmark)))
}

async fn access_check(
    State(state): State<ServiceState>,
    Json(request): Json<AccessCheckRequest>,
) -> Json<ServiceEnvelope<AccessCheckResult>> {
    Json(envelope(state.api.check_access(&request)))
}

async fn access_tokenize(
    State(state): State<ServiceState>,
    Json(request): Json<TokenizeRequest>,
) -> Json<ServiceEnvelope<TokenizeResult>> {
    Json(envelope(state.api.tokenize(&request.marking)))
}

async fn notification_permission(
    State(state): State<ServiceState>,
    Json(request): Json<NotificationPermissionRequest>,
) -> Json<ServiceEnvelope<NotificationPermissionResult>> {
    Json(envelope(state.api.notification_permission(&request)))
}

async fn notification_present(
    State(state): State<ServiceState>,
    Json(request): Json<PresentNotificationRequest>,
) -> Result<Json<ServiceEnvelope<Value>>, ServiceError> {
    let presented = state
        .api
        .present_notification(request.viewer_id, request.notification)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(presented)))
}

async fn recommend_run(
    State(state): State<ServiceState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<ServiceEnvelope<RunReport>>, ServiceError> {
    // Strategies block on SQLite and the search backend.
    let api = state.api.clone();
    let report = tokio::task::spawn_blocking(move || api.run_recommendations(&request.engines))
        .await
        .map_err(|err| ServiceState::error(format!("recommendation run aborted: {err}")))?
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(report)))
}

async fn recommendations_show(
    State(state): State<ServiceState>,
    Path(profile_id): Path<i64>,
) -> Result<Json<ServiceEnvelope<RecommendationView>>, ServiceError> {
    let view = state
        .api
        .recommendations_for(ProfileId(profile_id))
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(view)))
}

//! HTTP boundary for scan uploads and inventory queries.

use crate::config::ApiConfig;
use crate::frame_sampler::{MediaInput, SampleError};
use crate::inventory_store::{InventoryItem, InventoryStore, MergeMode};
use crate::pipeline::{ScanError, ScanOutcome, ScanPipeline};
use crate::product_parser::ProductCandidate;
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Multipart field name carrying the uploaded media file.
pub const MEDIA_FIELD: &str = "media";

/// Multipart field name carrying the optional merge mode.
pub const MODE_FIELD: &str = "mode";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ScanPipeline>,
    pub inventory: Arc<InventoryStore>,
}

/// Scan response envelope
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub ok: bool,
    /// Number of inventory rows written by the merge
    pub added: u64,
    /// Products extracted from the upload, in model output order
    pub products: Vec<ProductResponse>,
    /// Base64 JPEG of the collage sent to inference; video scans only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collage_base64: Option<String>,
}

/// Product entry in scan responses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    pub name: String,
    pub quantity: u32,
    pub added_at: DateTime<Utc>,
}

impl From<ProductCandidate> for ProductResponse {
    fn from(candidate: ProductCandidate) -> Self {
        Self {
            name: candidate.name,
            quantity: candidate.quantity,
            added_at: candidate.added_at,
        }
    }
}

/// Query parameters for scan submission
#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    /// Shop whose inventory receives the extracted products
    #[serde(default)]
    pub shop_id: String,
}

/// Query parameters for inventory listing
#[derive(Debug, Deserialize)]
pub struct InventoryQuery {
    /// Shop to list
    pub shop_id: Uuid,
    /// Maximum results
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Offset for pagination
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

/// Inventory list response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryListResponse {
    pub items: Vec<InventoryItemResponse>,
    pub total_count: i64,
    pub has_more: bool,
}

/// Inventory row in API responses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItemResponse {
    pub id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub added_at: DateTime<Utc>,
}

impl From<InventoryItem> for InventoryItemResponse {
    fn from(item: InventoryItem) -> Self {
        Self {
            id: item.id,
            name: item.name,
            quantity: item.quantity,
            added_at: item.added_at,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/scans", post(create_scan))
        .route("/api/v1/inventory", get(list_inventory))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "shelfscan"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    // Check database connectivity
    match sqlx::query("SELECT 1")
        .fetch_one(state.inventory.pool())
        .await
    {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Accept one media upload, run the scan pipeline, and merge the result
/// into the shop's inventory.
#[instrument(skip(state, multipart))]
async fn create_scan(
    State(state): State<AppState>,
    Query(params): Query<ScanQuery>,
    mut multipart: Multipart,
) -> Result<Json<ScanResponse>, (StatusCode, Json<ErrorResponse>)> {
    let shop_id = Uuid::parse_str(params.shop_id.trim()).map_err(|_| {
        bad_request(
            "Query parameter 'shop_id' must be a UUID",
            "INVALID_SHOP_ID",
        )
    })?;

    let upload = read_upload(&mut multipart).await?;

    let mode = match upload.mode.as_deref() {
        Some(raw) => MergeMode::from_str(raw).map_err(|e| bad_request(&e, "INVALID_MODE"))?,
        None => MergeMode::default(),
    };

    let input = upload.media.ok_or_else(|| {
        bad_request(
            &format!("Multipart field '{}' with the media file is required", MEDIA_FIELD),
            "MISSING_MEDIA",
        )
    })?;

    let outcome = state.pipeline.run(input).await.map_err(scan_error_response)?;

    let added = state
        .inventory
        .merge_products(shop_id, &outcome.products, mode)
        .await
        .map_err(|e| {
            error!(error = %e, shop_id = %shop_id, "Inventory merge failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to merge products into inventory".to_string(),
                    code: "MERGE_ERROR".to_string(),
                }),
            )
        })?;

    info!(shop_id = %shop_id, added, "Scan merged into inventory");

    Ok(Json(build_scan_response(outcome, added)))
}

/// Fields pulled out of one multipart upload.
struct ScanUpload {
    media: Option<MediaInput>,
    mode: Option<String>,
}

/// Read the media file and optional mode field from the multipart body.
/// Unknown fields are ignored.
async fn read_upload(
    multipart: &mut Multipart,
) -> Result<ScanUpload, (StatusCode, Json<ErrorResponse>)> {
    let mut upload = ScanUpload {
        media: None,
        mode: None,
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return Err(bad_request(
                    &format!("Malformed multipart body: {}", e),
                    "INVALID_MULTIPART",
                ));
            }
        };

        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            MEDIA_FIELD => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    bad_request(&format!("Failed to read upload: {}", e), "INVALID_MULTIPART")
                })?;

                upload.media = Some(MediaInput {
                    bytes: bytes.to_vec(),
                    mime_type,
                    file_name,
                });
            }
            MODE_FIELD => {
                let value = field.text().await.map_err(|e| {
                    bad_request(
                        &format!("Failed to read mode field: {}", e),
                        "INVALID_MULTIPART",
                    )
                })?;
                upload.mode = Some(value);
            }
            _ => {
                warn!(field = %name, "Ignoring unexpected multipart field");
            }
        }
    }

    Ok(upload)
}

/// Map a pipeline failure to an HTTP error response.
fn scan_error_response(error: ScanError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &error {
        ScanError::UnsupportedMediaType(_) => {
            (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MEDIA_TYPE")
        }
        ScanError::Sample(SampleError::Copy(_)) => (StatusCode::UNPROCESSABLE_ENTITY, "COPY_ERROR"),
        ScanError::Sample(_) => (StatusCode::UNPROCESSABLE_ENTITY, "EXTRACTION_ERROR"),
        ScanError::Collage(_) => (StatusCode::UNPROCESSABLE_ENTITY, "COMPOSITE_ERROR"),
        ScanError::Vision(_) => (StatusCode::BAD_GATEWAY, "INFERENCE_UNAVAILABLE"),
        ScanError::Workspace(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

/// Assemble the response envelope from a scan outcome.
fn build_scan_response(outcome: ScanOutcome, added: u64) -> ScanResponse {
    let collage_base64 = outcome
        .collage
        .as_ref()
        .map(|collage| STANDARD.encode(&collage.data));

    ScanResponse {
        ok: true,
        added,
        products: outcome.products.into_iter().map(Into::into).collect(),
        collage_base64,
    }
}

fn bad_request(message: &str, code: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
        }),
    )
}

/// List a shop's inventory, most recently added first.
#[instrument(skip(state))]
async fn list_inventory(
    State(state): State<AppState>,
    Query(params): Query<InventoryQuery>,
) -> Result<Json<InventoryListResponse>, (StatusCode, Json<ErrorResponse>)> {
    let limit = params.limit.clamp(1, 500);
    let offset = params.offset.max(0);

    // Fetch one extra to check has_more
    let mut items = state
        .inventory
        .list_items(params.shop_id, limit + 1, offset)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to query inventory");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to query inventory".to_string(),
                    code: "QUERY_ERROR".to_string(),
                }),
            )
        })?;

    let has_more = items.len() > limit as usize;
    if has_more {
        items.pop();
    }

    let total_count = state.inventory.item_count(params.shop_id).await.unwrap_or(0);

    Ok(Json(InventoryListResponse {
        items: items.into_iter().map(Into::into).collect(),
        total_count,
        has_more,
    }))
}

/// Start the scan API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting scan API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

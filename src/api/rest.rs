//! Axum REST API handlers
//!
//! HTTP mirror of the gRPC surface for probes and tooling.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::catalog::{class_entries_from_catalog, CatalogSku};
use crate::engine::ClassEntry;
use crate::error::EngineError;
use crate::service::{DetectionService, HealthResult};

use super::dto::*;
use super::request_id;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Application state shared across handlers
pub struct AppState {
    pub service: Arc<DetectionService>,
}

/// Create the REST API router
pub fn create_rest_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/model", get(model_info_handler))
        .route("/api/v1/detect", post(detect_handler))
        .route("/api/v1/classes", post(sync_classes_handler))
        .route("/api/v1/catalog/sync", post(catalog_sync_handler))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn engine_error(request_id: &str, err: EngineError) -> ApiError {
    match err {
        EngineError::NotLoaded => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new(&err.to_string(), "MODEL_NOT_LOADED")),
        ),
        other => {
            error!("[{}] Detection failed: {}", request_id, other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(&other.to_string(), "DETECTION_FAILED")),
            )
        }
    }
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message, "BAD_REQUEST")))
}

/// Health handler, 503 while no model is installed
async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResult>) {
    let health = state.service.health();
    let code = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health))
}

async fn model_info_handler(State(state): State<Arc<AppState>>) -> Json<ModelInfoResponse> {
    // One handle snapshot for every field.
    let response = match state.service.engine().current() {
        Some(handle) => ModelInfoResponse {
            version: handle.version().to_string(),
            architecture: handle.architecture().to_string(),
            class_names: handle.class_names().to_vec(),
            input_width: handle.input_size(),
            input_height: handle.input_size(),
            loaded_at: Some(handle.modified_at().to_rfc3339()),
        },
        None => {
            let info = state.service.model_info();
            ModelInfoResponse {
                version: info.version,
                architecture: info.architecture,
                class_names: info.class_names,
                input_width: info.input_size,
                input_height: info.input_size,
                loaded_at: None,
            }
        }
    };

    Json(response)
}

/// Detect handler, expects an `image` multipart field
async fn detect_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DetectQuery>,
    mut multipart: Multipart,
) -> Result<Json<DetectResponse>, ApiError> {
    let request_id = request_id();

    let mut image_data = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(&e.to_string()))?
    {
        if field.name() == Some("image") {
            let bytes = field.bytes().await.map_err(|e| bad_request(&e.to_string()))?;
            image_data = Some(bytes.to_vec());
        }
    }
    let image_data = image_data.ok_or_else(|| bad_request("missing multipart field: image"))?;

    info!(
        "[{}] Detection request from device: {}, image size: {} bytes",
        request_id,
        query.device_id.as_deref().unwrap_or("-"),
        image_data.len()
    );

    let result = state
        .service
        .detect(image_data, query.confidence_threshold, query.iou_threshold)
        .await
        .map_err(|e| engine_error(&request_id, e))?;

    let detections = result
        .detections
        .into_iter()
        .map(|d| DetectionDto {
            class_id: d.class_id,
            class_name: d.class_name,
            external_id: d.external_id,
            confidence: d.confidence,
            bbox: BoundingBoxDto {
                x1: d.bbox.x1,
                y1: d.bbox.y1,
                x2: d.bbox.x2,
                y2: d.bbox.y2,
            },
        })
        .collect();

    Ok(Json(DetectResponse {
        detections,
        model_version: result.model_version,
        inference_time_ms: result.inference_time_ms,
        request_id,
    }))
}

async fn sync_classes_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SyncClassesRequest>,
) -> Json<SyncClassesResponse> {
    let entries: Vec<ClassEntry> = request
        .classes
        .into_iter()
        .map(|c| ClassEntry {
            class_id: c.class_id,
            external_id: c.external_id,
            display_name: c.display_name,
        })
        .collect();

    let result = state.service.sync_classes(entries);
    info!("Synced {} classes via REST", result.class_count);

    Json(SyncClassesResponse {
        success: result.success,
        class_count: result.class_count,
    })
}

/// Sync straight from a catalog SKU listing
async fn catalog_sync_handler(
    State(state): State<Arc<AppState>>,
    Json(skus): Json<Vec<CatalogSku>>,
) -> Json<SyncClassesResponse> {
    let result = state.service.sync_classes(class_entries_from_catalog(&skus));
    info!("Synced {} classes from {} catalog records", result.class_count, skus.len());

    Json(SyncClassesResponse {
        success: result.success,
        class_count: result.class_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::engine::backend::fake::{write_model, FakeLoader};
    use crate::engine::DetectionEngine;
    use anyhow::anyhow;

    fn state(dir: &tempfile::TempDir) -> Arc<AppState> {
        let config = ModelConfig {
            model_dir: dir.path().to_path_buf(),
            input_size: 32,
            ..ModelConfig::default()
        };
        let engine = Arc::new(DetectionEngine::new(config, Arc::new(FakeLoader::default())));
        Arc::new(AppState {
            service: Arc::new(DetectionService::new(engine, 2)),
        })
    }

    #[tokio::test]
    async fn test_health_status_codes() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);

        let (code, Json(body)) = health_handler(State(state.clone())).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.model_loaded);

        write_model(&state.service.engine().model_path(), "cola", 1_000);
        assert!(state.service.reload().await);

        let (code, Json(body)) = health_handler(State(state)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.status, "healthy");
    }

    #[tokio::test]
    async fn test_model_info_loaded_at() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);

        let Json(info) = model_info_handler(State(state.clone())).await;
        assert_eq!(info.version, "none");
        assert!(info.loaded_at.is_none());

        write_model(&state.service.engine().model_path(), "cola,sprite", 1_000);
        assert!(state.service.reload().await);

        let Json(info) = model_info_handler(State(state)).await;
        assert_eq!(info.version, "v1000");
        assert_eq!(info.class_names, vec!["cola", "sprite"]);
        assert_eq!(info.input_width, 32);
        assert!(info.loaded_at.unwrap().starts_with("1970-01-01T00:16:40"));
    }

    #[tokio::test]
    async fn test_model_info_fields_from_one_model() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let path = state.service.engine().model_path();
        write_model(&path, "cola", 1_000);
        assert!(state.service.reload().await);

        let engine = state.service.engine().clone();
        let flipper = std::thread::spawn(move || {
            for i in 0..40 {
                let (content, secs) = if i % 2 == 0 { ("sprite,fanta", 2_000) } else { ("cola", 1_000) };
                write_model(&path, content, secs);
                assert!(engine.reload());
            }
        });

        for _ in 0..200 {
            let Json(info) = model_info_handler(State(state.clone())).await;
            let loaded_at = info.loaded_at.unwrap();
            match info.version.as_str() {
                "v1000" => {
                    assert!(loaded_at.starts_with("1970-01-01T00:16:40"));
                    assert_eq!(info.class_names, vec!["cola"]);
                }
                "v2000" => {
                    assert!(loaded_at.starts_with("1970-01-01T00:33:20"));
                    assert_eq!(info.class_names, vec!["sprite", "fanta"]);
                }
                other => panic!("unexpected version {}", other),
            }
        }

        flipper.join().unwrap();
    }

    #[tokio::test]
    async fn test_sync_endpoints_count_distinct_classes() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);

        let request: SyncClassesRequest = serde_json::from_str(
            r#"{"classes": [
                {"class_id": 0, "external_id": "a", "display_name": "A"},
                {"class_id": 0, "external_id": "b", "display_name": "B"}
            ]}"#,
        )
        .unwrap();
        let Json(resp) = sync_classes_handler(State(state.clone()), Json(request)).await;
        assert!(resp.success);
        assert_eq!(resp.class_count, 1);
        let mapping = state.service.engine().class_mapping();
        assert_eq!(mapping.get(0).unwrap().external_id, "b");

        let skus: Vec<CatalogSku> =
            serde_json::from_str(r#"[{"id": "sku-1", "name": "Cola"}, {"id": "sku-2"}]"#).unwrap();
        let Json(resp) = catalog_sync_handler(State(state.clone()), Json(skus)).await;
        assert_eq!(resp.class_count, 2);
        assert_eq!(state.service.engine().class_mapping().get(1).unwrap().display_name, "class_1");
    }

    #[test]
    fn test_engine_error_codes() {
        let (code, Json(body)) = engine_error("abcd1234", EngineError::NotLoaded);
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.code, "MODEL_NOT_LOADED");

        let (code, Json(body)) = engine_error("abcd1234", EngineError::Decode(anyhow!("truncated")));
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "DETECTION_FAILED");
    }
}

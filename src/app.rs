use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{Config, MAX_UPLOAD_BYTES};
use crate::envelope::{ErrorKind, ResultEnvelope, classify, succeed};
use crate::orchestrator::Orchestrator;
use crate::workbook::{UploadedArtifact, XLSX_MIME};

/// Request body limit: the 5 MB file cap plus base64/multipart overhead
const BODY_LIMIT: usize = 8 * 1024 * 1024;

pub struct AppState {
    pub orchestrator: Orchestrator,
}

#[derive(Deserialize)]
struct Base64Upload {
    #[serde(rename = "fileBase64", default)]
    file_base64: Option<String>,
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);

    // Setup app state
    let app_state = Arc::new(AppState {
        orchestrator: Orchestrator::new(config.clone()),
    });

    let app = router(app_state);

    // Start server
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/process", post(process_upload))
        .route("/api/test-upload", post(test_upload))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Map an envelope to its HTTP response: 200 on success, 400 for
/// client-side validation failures, 500 for backend/server failures
fn respond<T: Serialize>(envelope: ResultEnvelope<T>) -> Response {
    let status = match &envelope {
        ResultEnvelope::Success { .. } => StatusCode::OK,
        ResultEnvelope::Failure { error, .. } => {
            if error.code.is_client_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    };
    (status, Json(envelope)).into_response()
}

fn reject(kind: ErrorKind, message: Option<String>) -> Response {
    respond(classify::<Value>(kind, message, None))
}

async fn health() -> Response {
    respond(succeed(json!({ "status": "ok" }), None))
}

/// Accepts the spreadsheet as `multipart/form-data` (a `file` field) or as
/// `application/json` (a base64 `fileBase64` field) and runs the pipeline
async fn process_upload(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let artifact = if content_type.starts_with("multipart/form-data") {
        match artifact_from_multipart(req).await {
            Ok(artifact) => artifact,
            Err(response) => return response,
        }
    } else if content_type.starts_with("application/json") {
        match artifact_from_json(req).await {
            Ok(artifact) => artifact,
            Err(response) => return response,
        }
    } else {
        return reject(
            ErrorKind::FileTypeInvalid,
            Some(
                "Unsupported content type. Use 'multipart/form-data' or 'application/json'."
                    .to_string(),
            ),
        );
    };

    // Fixed constraints, enforced before any parsing
    if artifact.is_empty() {
        return reject(ErrorKind::FileMissing, None);
    }
    if !artifact.declares_spreadsheet() {
        return reject(ErrorKind::FileTypeInvalid, None);
    }
    if artifact.len() > MAX_UPLOAD_BYTES {
        return reject(ErrorKind::FileTooLarge, None);
    }

    respond(state.orchestrator.process(artifact).await)
}

async fn artifact_from_multipart(req: Request) -> Result<UploadedArtifact, Response> {
    let mut multipart = match Multipart::from_request(req, &()).await {
        Ok(multipart) => multipart,
        Err(_) => {
            return Err(reject(
                ErrorKind::FileUnparseable,
                Some("The request body could not be read as multipart form data.".to_string()),
            ));
        }
    };

    let mut artifact: Option<UploadedArtifact> = None;

    while let Some(field) = multipart.next_field().await.unwrap_or(None) {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("upload.xlsx").to_string();
            let content_type = field.content_type().unwrap_or(XLSX_MIME).to_string();
            let data = field.bytes().await.unwrap_or_default();
            artifact = Some(UploadedArtifact::new(data.to_vec(), filename, content_type));
        }
    }

    artifact.ok_or_else(|| reject(ErrorKind::FileMissing, None))
}

async fn artifact_from_json(req: Request) -> Result<UploadedArtifact, Response> {
    let bytes = axum::body::to_bytes(req.into_body(), BODY_LIMIT)
        .await
        .map_err(|_| reject(ErrorKind::FileUnparseable, None))?;

    let upload: Base64Upload = serde_json::from_slice(&bytes).map_err(|_| {
        reject(
            ErrorKind::FileUnparseable,
            Some("The request body is not valid JSON.".to_string()),
        )
    })?;

    let encoded = match upload.file_base64 {
        Some(encoded) => encoded,
        None => return Err(reject(ErrorKind::FileMissing, None)),
    };

    let decoded = BASE64.decode(encoded.as_bytes()).map_err(|_| {
        reject(
            ErrorKind::FileUnparseable,
            Some("The fileBase64 field could not be decoded.".to_string()),
        )
    })?;

    // The JSON path carries no metadata; assume the declared spreadsheet type
    Ok(UploadedArtifact::new(decoded, "uploaded.xlsx", XLSX_MIME))
}

/// Diagnostic endpoint: accepts any multipart file and echoes its metadata
/// without running the pipeline
async fn test_upload(mut multipart: Multipart) -> Response {
    while let Some(field) = multipart.next_field().await.unwrap_or(None) {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("unknown").to_string();
            let content_type = field.content_type().unwrap_or("unknown").to_string();
            let data = field.bytes().await.unwrap_or_default();

            info!(
                filename = %filename,
                content_type = %content_type,
                size = data.len(),
                "test upload received"
            );

            return respond(succeed(
                json!({
                    "name": filename,
                    "type": content_type,
                    "size": data.len(),
                }),
                Some("Test file received successfully.".to_string()),
            ));
        }
    }

    reject(ErrorKind::FileMissing, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendMode;
    use axum::body::Body;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let config = Arc::new(Config {
            backend: Some(BackendMode::Fallback),
            ..Config::default()
        });
        let state = Arc::new(AppState {
            orchestrator: Orchestrator::new(config),
        });
        router(state)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_answers_a_success_envelope() {
        let response = test_router()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], json!(true));
    }

    #[tokio::test]
    async fn json_upload_without_file_is_400_file_not_provided() {
        let response = test_router()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/process")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], json!("file_not_provided"));
    }

    #[tokio::test]
    async fn unsupported_content_type_is_rejected() {
        let response = test_router()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/process")
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], json!("file_type_invalid"));
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_before_parsing() {
        let oversized = vec![0u8; MAX_UPLOAD_BYTES + 1];
        let body = json!({ "fileBase64": BASE64.encode(&oversized) }).to_string();

        let response = test_router()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/process")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], json!("file_size_exceeded"));
    }

    #[tokio::test]
    async fn garbage_base64_is_a_parsing_error() {
        let response = test_router()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/process")
                    .header(header::CONTENT_TYPE, "text/plain; boundary=x")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        // Unrelated content type never reaches the base64 decoder
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = test_router()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/process")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"fileBase64": "%%%not-base64%%%"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], json!("file_parsing_error"));
    }
}

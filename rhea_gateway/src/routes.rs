//! Route handlers for the REST gateway.

use axum::{
    Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;

use rhea_common::{BlobStore, FileEnvelope, Handle, StoreError};

/// Shared state behind the gateway routes.
#[derive(Clone)]
pub struct GatewayState {
    store: BlobStore,
    metrics: PrometheusHandle,
}

impl GatewayState {
    pub fn new(store: BlobStore, metrics: PrometheusHandle) -> Self {
        Self { store, metrics }
    }
}

/// Build the gateway router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/download", get(download))
        .route("/metrics", get(metrics_exposition))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
enum GatewayError {
    #[error("missing required header '{0}'")]
    MissingHeader(&'static str),

    #[error("missing required query parameter '{0}'")]
    MissingParam(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::MissingHeader(_) | GatewayError::MissingParam(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            GatewayError::Store(StoreError::Unavailable(_)) => StatusCode::BAD_GATEWAY,
            GatewayError::Store(StoreError::Serialization(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = axum::Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// `POST /upload`: wrap the body in an artifact envelope and store it.
async fn upload(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let filename = headers
        .get("x-filename")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(GatewayError::MissingHeader("x-filename"))?;

    let proxy = FileEnvelope::from_buffer(filename, body)
        .to_store(&state.store)
        .await?;

    tracing::info!(key = %proxy.handle, filename = %proxy.filename, size = proxy.size, "uploaded");
    Ok(axum::Json(json!({
        "key": proxy.handle,
        "name": proxy.name,
        "format": proxy.format,
        "filename": proxy.filename,
        "size": proxy.size,
    })))
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    key: Option<String>,
}

/// `GET /download?key=HANDLE`: stream the envelope's bytes back.
async fn download(
    State(state): State<GatewayState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, GatewayError> {
    let key = query.key.ok_or(GatewayError::MissingParam("key"))?;
    let envelope = FileEnvelope::from_handle(&Handle::new(key), &state.store).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        envelope.filename.replace('"', "")
    );
    let response = (
        [
            (header::CONTENT_TYPE, envelope.format.clone()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        envelope.contents,
    );
    Ok(response.into_response())
}

/// `GET /metrics`: Prometheus text exposition.
async fn metrics_exposition(State(state): State<GatewayState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn test_app() -> (Router, BlobStore) {
        let store = BlobStore::in_memory();
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let app = router(GatewayState::new(store.clone(), handle));
        (app, store)
    }

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upload_download_round_trip() {
        let (app, _) = test_app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload")
                    .header("x-filename", "data.csv")
                    .body(Body::from("col1,col2\n1,2\n"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let upload_body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        let key = upload_body["key"].as_str().unwrap().to_string();
        assert_eq!(upload_body["filename"], "data.csv");
        assert_eq!(upload_body["size"], 14);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/download?key={key}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.contains("data.csv"));

        assert_eq!(&body_bytes(response).await[..], b"col1,col2\n1,2\n");
    }

    #[tokio::test]
    async fn upload_without_filename_is_bad_request() {
        let (app, _) = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn download_unknown_key_is_not_found() {
        let (app, _) = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/download?key=deadbeef")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_exposition_renders() {
        let (app, _) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

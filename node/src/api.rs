//! REST API for the KEYLEDGER dev node

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use keyledger_core::{Address, KeyledgerError, ADDRESS_LENGTH};
use keyledger_records::BatchList;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_http::validate_request::ValidateRequestHeaderLayer;
use tracing::{error, info};

use crate::runtime::{BatchStatusEntry, NodeRuntime, SubmitError};

/// API state containing node runtime
pub type ApiState = Arc<NodeRuntime>;

const DEFAULT_PAGE_LIMIT: usize = 100;
const MAX_PAGE_LIMIT: usize = 1000;
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Error response: `{"error": {"code": .., "message": ..}}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("API error: {}", self);
        }
        let body = serde_json::json!({
            "error": { "code": status.as_u16(), "message": self.to_string() }
        });
        (status, Json(body)).into_response()
    }
}

impl From<KeyledgerError> for ApiError {
    fn from(err: KeyledgerError) -> Self {
        if err.is_invalid_transaction() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Rejected(e) => e.into(),
            SubmitError::QueueFull | SubmitError::Closed => ApiError::Unavailable(err.to_string()),
        }
    }
}

/// `{"data": ..}` envelope
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub link: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub id: String,
    pub wait: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    pub address: Option<String>,
    pub start: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct StateEntryResponse {
    pub address: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct Paging {
    pub next: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StateListResponse {
    pub data: Vec<StateEntryResponse>,
    pub paging: Paging,
}

/// Create API router, adding Basic auth when the node has credentials
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let auth = state.config().auth_user.clone().map(|user| {
        let password = state.config().auth_password.clone().unwrap_or_default();
        (user, password)
    });

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/batches", post(submit_batches))
        .route("/batch_statuses", get(batch_statuses))
        .route("/state", get(list_state))
        .route("/state/:address", get(get_state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state);

    if let Some((user, password)) = auth {
        router = router.layer(ValidateRequestHeaderLayer::basic(&user, &password));
    }

    router.layer(TraceLayer::new_for_http()).layer(cors)
}

/// Health check
async fn health(State(runtime): State<ApiState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "state_version": runtime.state_version().await.0,
    }))
}

/// Accept a bincode `BatchList`
async fn submit_batches(
    State(runtime): State<ApiState>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let list = BatchList::from_bytes(&body)?;
    let ids = runtime.submit_batches(list)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            link: format!("/batch_statuses?id={}", ids.join(",")),
        }),
    ))
}

/// Batch statuses, optionally waiting for them to leave PENDING
async fn batch_statuses(
    State(runtime): State<ApiState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<DataResponse<Vec<BatchStatusEntry>>>, ApiError> {
    let ids: Vec<String> = query
        .id
        .split(',')
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    if ids.is_empty() {
        return Err(ApiError::BadRequest("at least one batch id is required".into()));
    }

    let data = match query.wait {
        Some(secs) if secs > 0 => {
            runtime
                .wait_for_statuses(&ids, Duration::from_secs(secs))
                .await
        }
        _ => runtime.batch_statuses(&ids),
    };
    Ok(Json(DataResponse { data }))
}

/// Entries under an address prefix, one page at a time
async fn list_state(
    State(runtime): State<ApiState>,
    Query(query): Query<StateQuery>,
) -> Result<Json<StateListResponse>, ApiError> {
    let prefix = query.address.unwrap_or_default();
    if prefix.len() > ADDRESS_LENGTH
        || !prefix.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
    {
        return Err(ApiError::BadRequest(format!("invalid address prefix: {}", prefix)));
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);

    let page = runtime
        .list_state(&prefix, query.start.as_deref(), limit)
        .await?;

    let data = page
        .entries
        .into_iter()
        .map(|entry| StateEntryResponse {
            address: String::from_utf8_lossy(&entry.key).into_owned(),
            data: BASE64.encode(&entry.value),
        })
        .collect();
    let next = page
        .next
        .map(|start| format!("/state?address={}&start={}&limit={}", prefix, start, limit));

    Ok(Json(StateListResponse {
        data,
        paging: Paging { next },
    }))
}

/// The blob stored at one address
async fn get_state(
    State(runtime): State<ApiState>,
    Path(address): Path<String>,
) -> Result<Json<DataResponse<String>>, ApiError> {
    let address = Address::from_hex(&address)?;
    match runtime.get_state(&address).await? {
        Some(value) => Ok(Json(DataResponse {
            data: BASE64.encode(value),
        })),
        None => Err(ApiError::NotFound(format!("no state at {}", address))),
    }
}

/// Start API server, stopping when `shutdown` resolves
pub async fn start_api_server(
    runtime: ApiState,
    listener: tokio::net::TcpListener,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let router = create_router(runtime);
    info!("API server listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use keyledger_core::{NodeConfig, RecordKey};
    use keyledger_crypto::keys::KeyPair;
    use keyledger_records::{family_namespace, record_address, RecordPayload, TransactionBuilder};
    use keyledger_state::MemoryStateStore;
    use tower::ServiceExt;

    fn runtime(config: NodeConfig) -> ApiState {
        let runtime = NodeRuntime::new(config, Arc::new(MemoryStateStore::new()));
        runtime.spawn_executor().unwrap();
        runtime
    }

    fn create_body(key: &str, batch_nr: &str) -> (String, Vec<u8>) {
        let kp = KeyPair::generate();
        let payload =
            RecordPayload::create(RecordKey::new(key).unwrap(), vec![batch_nr.to_string()])
                .unwrap();
        let list = TransactionBuilder::new(Some(&kp))
            .build_batch_list(&payload)
            .unwrap();
        (list.batch_ids()[0].clone(), list.to_bytes().unwrap())
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn submit(app: &Router, body: Vec<u8>) -> Response {
        app.clone()
            .oneshot(
                Request::post("/batches")
                    .header(header::CONTENT_TYPE, "application/octet-stream")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn get(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_wait_and_read() {
        let app = create_router(runtime(NodeConfig::default()));
        let (id, body) = create_body("farmA", "42");

        let response = submit(&app, body).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(json(response).await["link"], format!("/batch_statuses?id={}", id));

        let response = get(&app, &format!("/batch_statuses?id={}&wait=5", id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["data"][0]["id"], id);
        assert_eq!(body["data"][0]["status"], "COMMITTED");

        let address = record_address(&RecordKey::new("farmA").unwrap()).unwrap();
        let body = json(get(&app, &format!("/state/{}", address)).await).await;
        let data = BASE64.decode(body["data"].as_str().unwrap()).unwrap();
        assert_eq!(data, b"farmA,42");

        let body = json(get(&app, &format!("/state?address={}", family_namespace())).await).await;
        assert_eq!(body["data"][0]["address"], address.as_str());
        assert!(body["paging"]["next"].is_null());
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let app = create_router(runtime(NodeConfig::default()));

        assert_eq!(submit(&app, vec![1, 2, 3]).await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(get(&app, "/state/xyz").await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(get(&app, "/state?address=XYZ").await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(get(&app, "/batch_statuses?id=").await.status(), StatusCode::BAD_REQUEST);

        let missing = record_address(&RecordKey::new("nobody").unwrap()).unwrap();
        let response = get(&app, &format!("/state/{}", missing)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(response).await["error"]["code"], 404);
    }

    #[tokio::test]
    async fn test_unknown_status() {
        let app = create_router(runtime(NodeConfig::default()));
        let body = json(get(&app, "/batch_statuses?id=abc,def").await).await;
        assert_eq!(body["data"][0]["status"], "UNKNOWN");
        assert_eq!(body["data"][1]["id"], "def");
    }

    #[tokio::test]
    async fn test_paging_links() {
        let app = create_router(runtime(NodeConfig::default()));
        for key in ["a", "b", "c"] {
            let (id, body) = create_body(key, "1");
            submit(&app, body).await;
            get(&app, &format!("/batch_statuses?id={}&wait=5", id)).await;
        }

        let body = json(get(&app, &format!("/state?address={}&limit=2", family_namespace())).await).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        let next = body["paging"]["next"].as_str().unwrap().to_string();

        let body = json(get(&app, &next).await).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert!(body["paging"]["next"].is_null());
    }

    #[tokio::test]
    async fn test_basic_auth() {
        let config = NodeConfig {
            auth_user: Some("alice".into()),
            auth_password: Some("secret".into()),
            ..NodeConfig::default()
        };
        let app = create_router(runtime(config));

        assert_eq!(get(&app, "/health").await.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::get("/health")
                    .header(header::AUTHORIZATION, format!("Basic {}", BASE64.encode("alice:secret")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

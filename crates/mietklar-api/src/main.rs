//! mietklar-api - HTTP API server for mietklar contract analysis

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use uuid::Uuid;

use mietklar_core::defaults::{
    CAP_ANALYSES, CAP_UPLOADS, HTTP_PORT, MAX_UPLOAD_BYTES, RETENTION_DAYS,
    STATUS_STREAM_KEEPALIVE_SECS, STATUS_STREAM_TIMEOUT_SECS,
};
use mietklar_core::{
    AllowAllEntitlements, Contract, ContractDetails, ContractDetailsRepository,
    ContractFileRepository, ContractRepository, ContractStatus, CreateContractRequest,
    EntitlementProvider, EventBus, FilesystemBackend, ServerEvent, StorageBackend,
};
use mietklar_db::Database;
use mietklar_inference::OpenAIBackend;
use mietklar_pipeline::{ContractProcessor, HttpGeocoder, HttpTileFetcher, OcrCache};

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Application state shared across handlers.
///
/// Repositories are held as trait objects so tests can substitute in-memory
/// fakes for the PostgreSQL implementations.
#[derive(Clone)]
struct AppState {
    contracts: Arc<dyn ContractRepository>,
    files: Arc<dyn ContractFileRepository>,
    details: Arc<dyn ContractDetailsRepository>,
    storage: Arc<dyn StorageBackend>,
    entitlements: Arc<dyn EntitlementProvider>,
    processor: Arc<ContractProcessor>,
    event_bus: Arc<EventBus>,
}

/// OpenAPI documentation metadata.
#[allow(dead_code)]
#[derive(OpenApi)]
#[openapi(info(
    title = "mietklar API",
    version = "0.4.0",
    description = "Rental contract upload and AI-assisted analysis"
))]
struct ApiDoc;

// =============================================================================
// RESPONSE TYPES
// =============================================================================

#[derive(Debug, Serialize)]
struct UploadResponse {
    contract: Contract,
    page_count: usize,
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    success: bool,
    token_count: u64,
    processing_time_ms: u64,
}

#[derive(Debug, Serialize)]
struct ContractResponse {
    contract: Contract,
    details: ContractDetails,
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Resolve the caller from the `X-User-Id` header. Authentication itself is
/// terminated upstream; this service trusts the forwarded identity.
fn require_user(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing or invalid X-User-Id header".to_string()))
}

/// Reject when the user holds no usable grant for the capability.
async fn require_entitlement(
    state: &AppState,
    user_id: Uuid,
    capability: &str,
) -> Result<(), ApiError> {
    match state.entitlements.check(user_id, capability).await? {
        Some(remaining) if remaining > 0 => Ok(()),
        _ => Err(ApiError::Forbidden(format!(
            "No remaining entitlement for {}",
            capability
        ))),
    }
}

/// Upload contract pages as one multipart request.
///
/// A `name` text part sets the contract name; every file part becomes one
/// stored page.
async fn upload_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers)?;
    require_entitlement(&state, user_id, CAP_UPLOADS).await?;

    let mut name: Option<String> = None;
    let mut pages: Vec<(String, String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read part: {}", e)))?;
                pages.push((file_name, content_type, data.to_vec()));
            }
            None if field.name() == Some("name") => {
                name = field.text().await.ok().filter(|t| !t.is_empty());
            }
            None => {}
        }
    }

    if pages.is_empty() {
        return Err(ApiError::BadRequest(
            "Upload must contain at least one page image".to_string(),
        ));
    }

    let contract = state
        .contracts
        .create(CreateContractRequest {
            user_id,
            name: name.unwrap_or_else(|| "Mietvertrag".to_string()),
            retention_days: RETENTION_DAYS,
        })
        .await?;

    let page_count = pages.len();
    for (file_name, content_type, data) in pages {
        let file_id = state
            .storage
            .put(contract.id, &file_name, &content_type, &data)
            .await?;
        state
            .files
            .register(
                file_id,
                contract.id,
                &file_name,
                &content_type,
                data.len() as i64,
            )
            .await?;
    }

    info!(contract_id = %contract.id, user_id = %user_id, page_count, "Contract uploaded");
    Ok((StatusCode::CREATED, Json(UploadResponse { contract, page_count })))
}

/// Run the analysis pipeline for a contract.
///
/// The processing claim is taken atomically before the run; a concurrent
/// second request is rejected with 409, never queued. The run itself is
/// detached from the request future so a client disconnect cannot abandon
/// it after the claim: the terminal status transition and its event happen
/// in the detached task on every pipeline outcome.
async fn analyze_contract(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers)?;
    let contract = state.contracts.fetch(id, user_id).await?;
    require_entitlement(&state, user_id, CAP_ANALYSES).await?;

    if !state.contracts.try_begin_processing(id).await? {
        return Err(ApiError::Conflict(format!(
            "Contract {} is already being analyzed",
            id
        )));
    }
    state.event_bus.emit(ServerEvent::ContractStatus {
        contract_id: id,
        status: ContractStatus::Processing,
    });

    let run_state = state.clone();
    let run = tokio::spawn(async move {
        let outcome = run_state.processor.process(&contract).await;
        let terminal = match &outcome {
            Ok(_) => ContractStatus::Analyzed,
            Err(e) => {
                error!(contract_id = %id, error = %e, "Contract analysis failed");
                ContractStatus::Error
            }
        };
        if let Err(e) = run_state.contracts.set_status(id, terminal).await {
            error!(contract_id = %id, error = %e, "Failed to record terminal status");
        }
        run_state.event_bus.emit(ServerEvent::ContractStatus {
            contract_id: id,
            status: terminal,
        });
        outcome
    });

    match run.await {
        Ok(Ok(outcome)) => Ok(Json(AnalyzeResponse {
            success: true,
            token_count: outcome.token_count,
            processing_time_ms: outcome.processing_time.as_millis() as u64,
        })),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(ApiError::Internal(mietklar_core::Error::Internal(format!(
            "analysis task failed: {}",
            e
        )))),
    }
}

/// SSE stream of one contract's status.
///
/// Emits the current status immediately, then every change, an
/// `event: close` on terminal status, and closes after a 5-minute ceiling
/// even if the contract never settles. Status frames are unnamed
/// (`data: <status>`) so a default `EventSource` message listener sees
/// them; only the close frame carries an event name.
async fn status_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers)?;
    state.contracts.fetch(id, user_id).await?;

    let (tx, rx) = mpsc::channel::<Result<Event, std::convert::Infallible>>(16);
    let contracts = state.contracts.clone();
    let mut bus_rx = state.event_bus.subscribe();

    tokio::spawn(async move {
        let send_status = |status: ContractStatus| Event::default().data(status.to_string());
        let close_event = || Event::default().event("close").data("stream closed");

        let current = match contracts.status(id).await {
            Ok(status) => status,
            Err(e) => {
                warn!(contract_id = %id, error = %e, "Status stream could not read status");
                let _ = tx.send(Ok(close_event())).await;
                return;
            }
        };
        if tx.send(Ok(send_status(current))).await.is_err() {
            return;
        }
        if current.is_terminal() {
            let _ = tx.send(Ok(close_event())).await;
            return;
        }

        let deadline = tokio::time::sleep(Duration::from_secs(STATUS_STREAM_TIMEOUT_SECS));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    let _ = tx.send(Ok(close_event())).await;
                    return;
                }
                event = bus_rx.recv() => match event {
                    Ok(ServerEvent::ContractStatus { contract_id, status })
                        if contract_id == id =>
                    {
                        if tx.send(Ok(send_status(status))).await.is_err() {
                            return;
                        }
                        if status.is_terminal() {
                            let _ = tx.send(Ok(close_event())).await;
                            return;
                        }
                    }
                    Ok(_) => {}
                    // Lagged subscribers re-read on the next event; a closed
                    // bus ends the stream.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        let _ = tx.send(Ok(close_event())).await;
                        return;
                    }
                },
            }
        }
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(STATUS_STREAM_KEEPALIVE_SECS))
            .text("keepalive"),
    ))
}

/// Fetch one contract with its details.
async fn get_contract(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers)?;
    let contract = state.contracts.fetch(id, user_id).await?;
    let details = state.details.get_or_create(id).await?;
    Ok(Json(ContractResponse { contract, details }))
}

/// List the caller's non-archived contracts, newest first.
async fn list_contracts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers)?;
    let contracts = state.contracts.list_for_user(user_id).await?;
    Ok(Json(contracts))
}

/// Archive a contract, removing it from the default listing.
async fn archive_contract(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers)?;
    state.contracts.archive(id, user_id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// =============================================================================
// ROUTER
// =============================================================================

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/contracts", post(upload_contract).get(list_contracts))
        .route("/api/v1/contracts/:id", get(get_contract))
        .route("/api/v1/contracts/:id/analyze", post(analyze_contract))
        .route("/api/v1/contracts/:id/status/stream", get(status_stream))
        .route("/api/v1/contracts/:id/archive", post(archive_contract))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mietklar_api=debug,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/mietklar".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(HTTP_PORT);

    info!("Connecting to database...");
    let db = Database::connect(&database_url).await?;
    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database ready");

    let storage_path =
        std::env::var("FILE_STORAGE_PATH").unwrap_or_else(|_| "/var/lib/mietklar/files".to_string());
    let storage = FilesystemBackend::new(storage_path.clone());
    storage.validate().await?;
    info!("File storage initialized at {}", storage_path);

    let chat = Arc::new(OpenAIBackend::from_env()?);
    info!("Chat backend initialized: {}", chat.config().gen_model);

    let contracts: Arc<dyn ContractRepository> =
        Arc::new(mietklar_db::PgContractRepository::new(db.pool.clone()));
    let files: Arc<dyn ContractFileRepository> =
        Arc::new(mietklar_db::PgContractFileRepository::new(db.pool.clone()));
    let details: Arc<dyn ContractDetailsRepository> =
        Arc::new(mietklar_db::PgContractDetailsRepository::new(db.pool.clone()));
    let storage: Arc<dyn StorageBackend> = Arc::new(storage);

    let processor = Arc::new(ContractProcessor::new(
        chat,
        storage.clone(),
        files.clone(),
        details.clone(),
        Arc::new(HttpGeocoder::from_env()),
        Arc::new(HttpTileFetcher::from_env()),
        Arc::new(OcrCache::new()),
    ));

    let state = AppState {
        contracts,
        files,
        details,
        storage,
        entitlements: Arc::new(AllowAllEntitlements),
        processor,
        event_bus: Arc::new(EventBus::new()),
    };

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{0}")]
    Internal(mietklar_core::Error),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
}

impl From<mietklar_core::Error> for ApiError {
    fn from(err: mietklar_core::Error) -> Self {
        use mietklar_core::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::ContractNotFound(_) => ApiError::NotFound(err.to_string()),
            Error::AlreadyProcessing(_) => ApiError::Conflict(err.to_string()),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            Error::Forbidden(msg) => ApiError::Forbidden(msg),
            _ => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::Utc;
    use mietklar_core::{
        ChatBackend, ContractFile, Error, Generation, GeoPoint, Geocoder, ImageInput, Result,
        TileFetcher,
    };
    use mietklar_inference::MockChatBackend;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;
    use tower::ServiceExt;

    struct FakeContracts {
        contract: Contract,
        processing: AtomicBool,
        statuses: Mutex<Vec<ContractStatus>>,
    }

    impl FakeContracts {
        fn new(contract: Contract) -> Self {
            Self {
                contract,
                processing: AtomicBool::new(false),
                statuses: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ContractRepository for FakeContracts {
        async fn create(&self, _req: CreateContractRequest) -> Result<Contract> {
            Ok(self.contract.clone())
        }

        async fn fetch(&self, id: Uuid, user_id: Uuid) -> Result<Contract> {
            if id == self.contract.id && user_id == self.contract.user_id {
                Ok(self.contract.clone())
            } else {
                Err(Error::ContractNotFound(id))
            }
        }

        async fn list_for_user(&self, _user_id: Uuid) -> Result<Vec<Contract>> {
            Ok(vec![self.contract.clone()])
        }

        async fn try_begin_processing(&self, _id: Uuid) -> Result<bool> {
            Ok(!self.processing.swap(true, Ordering::SeqCst))
        }

        async fn set_status(&self, _id: Uuid, status: ContractStatus) -> Result<()> {
            if status.is_terminal() {
                self.processing.store(false, Ordering::SeqCst);
            }
            self.statuses.lock().unwrap().push(status);
            Ok(())
        }

        async fn status(&self, _id: Uuid) -> Result<ContractStatus> {
            Ok(self.contract.status)
        }

        async fn archive(&self, _id: Uuid, _user_id: Uuid) -> Result<()> {
            Ok(())
        }
    }

    struct FakeFiles;

    #[async_trait]
    impl ContractFileRepository for FakeFiles {
        async fn register(
            &self,
            file_id: Uuid,
            contract_id: Uuid,
            file_name: &str,
            content_type: &str,
            file_size: i64,
        ) -> Result<ContractFile> {
            Ok(ContractFile {
                id: file_id,
                contract_id,
                file_name: file_name.to_string(),
                content_type: content_type.to_string(),
                file_size,
                uploaded_at: Utc::now(),
            })
        }

        async fn list_for_contract(&self, contract_id: Uuid) -> Result<Vec<ContractFile>> {
            Ok(vec![ContractFile {
                id: Uuid::new_v4(),
                contract_id,
                file_name: "seite-1.png".to_string(),
                content_type: "image/png".to_string(),
                file_size: 4,
                uploaded_at: Utc::now(),
            }])
        }

        async fn replace_content(&self, _file_id: Uuid, _file_size: i64) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDetails {
        merge_count: Mutex<usize>,
    }

    #[async_trait]
    impl ContractDetailsRepository for FakeDetails {
        async fn get_or_create(&self, contract_id: Uuid) -> Result<ContractDetails> {
            Ok(ContractDetails {
                contract_id,
                ..ContractDetails::default()
            })
        }

        async fn merge_update(
            &self,
            _contract_id: Uuid,
            payload: &serde_json::Map<String, serde_json::Value>,
        ) -> Result<usize> {
            *self.merge_count.lock().unwrap() += 1;
            Ok(payload.len())
        }
    }

    struct FakeStorage;

    #[async_trait]
    impl StorageBackend for FakeStorage {
        async fn get(&self, _file_id: Uuid) -> Result<Vec<u8>> {
            Ok(vec![1, 2, 3, 4])
        }

        async fn put(
            &self,
            _contract_id: Uuid,
            _file_name: &str,
            _content_type: &str,
            _data: &[u8],
        ) -> Result<Uuid> {
            Ok(Uuid::new_v4())
        }

        async fn delete(&self, _file_id: Uuid) -> Result<()> {
            Ok(())
        }
    }

    struct NoGeo;

    #[async_trait]
    impl Geocoder for NoGeo {
        async fn geocode(&self, _address: &str) -> Result<Option<GeoPoint>> {
            Ok(None)
        }
    }

    struct NoTiles;

    #[async_trait]
    impl TileFetcher for NoTiles {
        async fn fetch(&self, _zoom: u32, _x: u32, _y: u32) -> Result<Vec<u8>> {
            Err(Error::Request("no tiles".to_string()))
        }
    }

    /// Backend that holds every provider call long enough for a test to drop
    /// the request future mid-run.
    struct SlowBackend;

    impl SlowBackend {
        async fn respond(&self) -> Result<Generation> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Generation {
                text: "§1 Vertragstext".to_string(),
                token_count: 5,
            })
        }
    }

    #[async_trait]
    impl ChatBackend for SlowBackend {
        async fn generate(&self, _system: &str, _prompt: &str) -> Result<Generation> {
            self.respond().await
        }

        async fn generate_json(&self, _system: &str, _prompt: &str) -> Result<Generation> {
            self.respond().await
        }

        async fn generate_with_images(
            &self,
            _system: &str,
            _prompt: &str,
            _images: &[ImageInput],
        ) -> Result<Generation> {
            self.respond().await
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    fn test_contract() -> Contract {
        Contract {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Mietvertrag".to_string(),
            uploaded_at: Utc::now(),
            status: ContractStatus::Uploaded,
            archived: false,
            archived_at: None,
            retention_days: RETENTION_DAYS,
            scheduled_deletion_at: None,
        }
    }

    fn test_state(contract: Contract) -> (AppState, Arc<FakeContracts>) {
        let chat = MockChatBackend::new()
            .with_default_response("§1 Vertragstext\n\nInhalt.")
            .with_tokens_per_call(10);
        test_state_with_chat(contract, Arc::new(chat))
    }

    fn test_state_with_chat(
        contract: Contract,
        chat: Arc<dyn ChatBackend>,
    ) -> (AppState, Arc<FakeContracts>) {
        let contracts = Arc::new(FakeContracts::new(contract));
        let files: Arc<dyn ContractFileRepository> = Arc::new(FakeFiles);
        let details: Arc<dyn ContractDetailsRepository> = Arc::new(FakeDetails::default());
        let storage: Arc<dyn StorageBackend> = Arc::new(FakeStorage);

        let processor = Arc::new(ContractProcessor::new(
            chat,
            storage.clone(),
            files.clone(),
            details.clone(),
            Arc::new(NoGeo),
            Arc::new(NoTiles),
            Arc::new(OcrCache::new()),
        ));

        let state = AppState {
            contracts: contracts.clone(),
            files,
            details,
            storage,
            entitlements: Arc::new(AllowAllEntitlements),
            processor,
            event_bus: Arc::new(EventBus::new()),
        };
        (state, contracts)
    }

    fn analyze_request(contract: &Contract) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/api/v1/contracts/{}/analyze", contract.id))
            .header("x-user-id", contract.user_id.to_string())
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn missing_user_header_is_unauthorized() {
        let (state, _) = test_state(test_contract());
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/contracts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn analyze_completes_and_reports_tokens() {
        let contract = test_contract();
        let (state, contracts) = test_state(contract.clone());

        let response = app(state).oneshot(analyze_request(&contract)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
        assert!(json["token_count"].as_u64().unwrap() > 0);

        let statuses = contracts.statuses.lock().unwrap();
        assert_eq!(statuses.last(), Some(&ContractStatus::Analyzed));
    }

    #[tokio::test]
    async fn second_analyze_while_processing_conflicts() {
        let contract = test_contract();
        let (state, contracts) = test_state(contract.clone());
        // Simulate a held processing claim.
        contracts.processing.store(true, Ordering::SeqCst);

        let response = app(state).oneshot(analyze_request(&contract)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("already being analyzed"));
    }

    #[tokio::test]
    async fn disconnected_client_does_not_strand_processing() {
        let contract = test_contract();
        let (state, contracts) = test_state_with_chat(contract.clone(), Arc::new(SlowBackend));

        // Dropping the request future mid-run mimics a client disconnect
        // after the processing claim was taken.
        let request = tokio::spawn(app(state).oneshot(analyze_request(&contract)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        request.abort();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let terminal = contracts
                .statuses
                .lock()
                .unwrap()
                .last()
                .map(|s| s.is_terminal())
                .unwrap_or(false);
            if terminal {
                break;
            }
            assert!(
                Instant::now() < deadline,
                "run never reached a terminal status"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(
            contracts.statuses.lock().unwrap().last(),
            Some(&ContractStatus::Analyzed)
        );
        assert!(!contracts.processing.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn status_stream_sends_plain_data_frames_and_close() {
        let mut contract = test_contract();
        contract.status = ContractStatus::Analyzed;
        let (state, _) = test_state(contract.clone());

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/contracts/{}/status/stream", contract.id))
                    .header("x-user-id", contract.user_id.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        // Status frames are unnamed so a default EventSource listener fires.
        assert!(text.contains("data: analyzed\n"));
        assert!(!text.contains("event: contract.status"));
        assert!(text.contains("event: close\n"));
    }

    #[tokio::test]
    async fn foreign_contract_is_not_found() {
        let contract = test_contract();
        let (state, _) = test_state(contract.clone());

        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/contracts/{}/analyze", contract.id))
                    .header("x-user-id", Uuid::new_v4().to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_contracts_returns_owned() {
        let contract = test_contract();
        let (state, _) = test_state(contract.clone());

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/contracts")
                    .header("x-user-id", contract.user_id.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 1);
    }
}

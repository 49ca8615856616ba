use std::collections::HashMap;

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use physio_core::CoreError;
use physio_core::analysis::ExtractedExercise;
use physio_core::config::ReconcileConfig;
use physio_core::executor::{execute_import, run_analysis};
use physio_core::filter::ExerciseFilter;
use physio_core::request::ImportRequest;
use physio_core::upload::{DocumentFile, validate_document};
use physio_core::wizard::{AnalysisTicket, ImportTicket, WizardAction, WizardSnapshot};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use physio_core::error::ApiError;

use crate::error::AppError;
use crate::state::{AppState, ImportSession};

// JSON envelope and field names around the encoded document.
const UPLOAD_BODY_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn router(config: &ReconcileConfig) -> Router<AppState> {
    Router::new()
        .route("/v1/document-imports/sessions", post(create_session))
        .route(
            "/v1/document-imports/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route(
            "/v1/document-imports/sessions/{id}/document",
            post(upload_document).layer(DefaultBodyLimit::max(upload_body_limit(
                config.max_upload_bytes,
            ))),
        )
        .route(
            "/v1/document-imports/sessions/{id}/analyze",
            post(analyze_document),
        )
        .route(
            "/v1/document-imports/sessions/{id}/actions",
            post(apply_actions),
        )
        .route(
            "/v1/document-imports/sessions/{id}/exercises",
            get(list_exercises),
        )
        .route(
            "/v1/document-imports/sessions/{id}/request",
            get(preview_request),
        )
        .route("/v1/document-imports/sessions/{id}/import", post(run_import))
}

fn upload_body_limit(max_upload_bytes: u64) -> usize {
    let raw = usize::try_from(max_upload_bytes).unwrap_or(usize::MAX / 2);
    raw.div_ceil(3)
        .saturating_mul(4)
        .saturating_add(UPLOAD_BODY_OVERHEAD_BYTES)
}

// ── Request / response types ─────────────────────────────────

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub assign_sets_to_patient: bool,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadDocumentRequest {
    pub file_name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Standard base64 of the document bytes
    pub content_base64: String,
}

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// Free-text hint for the extraction
    #[serde(default)]
    pub context: Option<String>,
}

/// Operator actions, applied in order. Either all apply or none do.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplyActionsRequest {
    /// Tagged objects, e.g. `{"type":"set_exercise_action","tempId":"e1","action":"skip"}`
    #[schema(value_type = Vec<Object>)]
    pub actions: Vec<WizardAction>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub wizard: WizardSnapshot,
}

impl SessionResponse {
    fn new(session_id: Uuid, session: &ImportSession) -> Self {
        Self {
            session_id,
            created_at: session.created_at,
            updated_at: session.updated_at,
            wizard: session.wizard.snapshot(),
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExercisesQuery {
    /// all, create, reuse, skip or matched. Defaults to the session's filter.
    pub filter: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExercisesResponse {
    pub filter: ExerciseFilter,
    pub count: usize,
    pub exercises: Vec<ExtractedExercise>,
}

type Sessions = HashMap<Uuid, ImportSession>;

fn session_mut(sessions: &mut Sessions, id: Uuid) -> Result<&mut ImportSession, AppError> {
    sessions.get_mut(&id).ok_or_else(|| AppError::NotFound {
        resource: format!("import session {id}"),
    })
}

fn session_ref(sessions: &Sessions, id: Uuid) -> Result<&ImportSession, AppError> {
    sessions.get(&id).ok_or_else(|| AppError::NotFound {
        resource: format!("import session {id}"),
    })
}

// ── Handlers ─────────────────────────────────────────────────

/// Start a new import session
#[utoipa::path(
    post,
    path = "/v1/document-imports/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = SessionResponse)
    ),
    tag = "document-imports"
)]
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> (StatusCode, Json<SessionResponse>) {
    let id = Uuid::now_v7();
    let mut session = ImportSession::new(state.config);
    session.wizard.set_selected_patient(req.patient_id);
    session.wizard.set_assign_sets_to_patient(req.assign_sets_to_patient);
    let response = SessionResponse::new(id, &session);

    state.sessions.write().await.insert(id, session);
    tracing::info!(session_id = %id, "import session created");
    (StatusCode::CREATED, Json(response))
}

/// Current wizard state of a session
#[utoipa::path(
    get,
    path = "/v1/document-imports/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session state", body = SessionResponse),
        (status = 404, description = "Unknown session", body = ApiError)
    ),
    tag = "document-imports"
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, AppError> {
    let sessions = state.sessions.read().await;
    let session = session_ref(&sessions, id)?;
    Ok(Json(SessionResponse::new(id, session)))
}

/// Drop a session and everything it holds
#[utoipa::path(
    delete,
    path = "/v1/document-imports/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 404, description = "Unknown session", body = ApiError)
    ),
    tag = "document-imports"
)]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    match state.sessions.write().await.remove(&id) {
        Some(_) => {
            tracing::info!(session_id = %id, "import session deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(AppError::NotFound {
            resource: format!("import session {id}"),
        }),
    }
}

/// Select the document to analyse
///
/// Replaces any previous document and drops its analysis and decisions.
#[utoipa::path(
    post,
    path = "/v1/document-imports/sessions/{id}/document",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = UploadDocumentRequest,
    responses(
        (status = 200, description = "Document selected", body = SessionResponse),
        (status = 400, description = "Invalid document", body = ApiError),
        (status = 404, description = "Unknown session", body = ApiError),
        (status = 409, description = "A call is in flight", body = ApiError)
    ),
    tag = "document-imports"
)]
pub async fn upload_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UploadDocumentRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let bytes = STANDARD
        .decode(req.content_base64.trim())
        .map_err(|e| AppError::Validation {
            message: format!("contentBase64 is not valid base64: {e}"),
            field: Some("contentBase64".to_string()),
            received: None,
            docs_hint: Some("Send the document bytes as standard base64.".to_string()),
        })?;
    let mime_type = req
        .mime_type
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());
    let file = DocumentFile::new(req.file_name.trim(), mime_type, bytes);
    validate_document(&file, state.config.max_upload_bytes)?;

    let mut sessions = state.sessions.write().await;
    let session = session_mut(&mut sessions, id)?;
    tracing::info!(session_id = %id, file = ?file, "document selected");
    session.wizard.set_file(Some(file))?;
    session.touch();
    Ok(Json(SessionResponse::new(id, session)))
}

/// Run the document analysis
///
/// On success the session moves to `review-exercises` with the initial
/// decisions applied. On failure it returns to `upload` with the error set.
#[utoipa::path(
    post,
    path = "/v1/document-imports/sessions/{id}/analyze",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "Document analysed", body = SessionResponse),
        (status = 400, description = "No or invalid document", body = ApiError),
        (status = 404, description = "Unknown session", body = ApiError),
        (status = 409, description = "A call is in flight", body = ApiError),
        (status = 502, description = "Analysis service failed", body = ApiError)
    ),
    tag = "document-imports"
)]
pub async fn analyze_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let ticket = {
        let mut sessions = state.sessions.write().await;
        let session = session_mut(&mut sessions, id)?;
        let ticket = session.wizard.begin_analysis(req.context);
        session.touch();
        ticket?
    };

    // Detached so a client disconnect cannot leave the session busy.
    let response = tokio::spawn(finish_analysis(state, id, ticket))
        .await
        .map_err(|e| detached_task_failed("analysis", e))??;
    Ok(Json(response))
}

async fn finish_analysis(
    state: AppState,
    id: Uuid,
    ticket: AnalysisTicket,
) -> Result<SessionResponse, AppError> {
    let outcome = run_analysis(&state.analysis, &ticket.input).await;
    let failure = outcome.as_ref().err().cloned();

    let mut sessions = state.sessions.write().await;
    let session = session_mut(&mut sessions, id)?;
    if !session.wizard.complete_analysis(&ticket, outcome) {
        return Err(AppError::Conflict {
            message: "session was reset while the analysis was running".to_string(),
            docs_hint: None,
        });
    }
    session.touch();
    match failure {
        Some(err) => Err(err.into()),
        None => Ok(SessionResponse::new(id, session)),
    }
}

fn detached_task_failed(operation: &str, err: tokio::task::JoinError) -> AppError {
    tracing::error!(error = %err, operation, "boundary call task failed");
    AppError::Upstream {
        message: format!("{operation} did not complete"),
    }
}

/// Apply operator actions
///
/// Actions run against a copy of the session; the copy replaces the session
/// only when every action succeeded.
#[utoipa::path(
    post,
    path = "/v1/document-imports/sessions/{id}/actions",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = ApplyActionsRequest,
    responses(
        (status = 200, description = "Actions applied", body = SessionResponse),
        (status = 400, description = "Invalid action", body = ApiError),
        (status = 404, description = "Unknown session or entity", body = ApiError),
        (status = 409, description = "No analysis yet", body = ApiError)
    ),
    tag = "document-imports"
)]
pub async fn apply_actions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApplyActionsRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let mut sessions = state.sessions.write().await;
    let session = session_mut(&mut sessions, id)?;

    let mut wizard = session.wizard.clone();
    for (index, action) in req.actions.into_iter().enumerate() {
        wizard.apply(action).map_err(|err| {
            tracing::debug!(session_id = %id, index, error = %err, "action rejected");
            AppError::from(err)
        })?;
    }
    session.wizard = wizard;
    session.touch();
    Ok(Json(SessionResponse::new(id, session)))
}

/// Extracted exercises through a filter
#[utoipa::path(
    get,
    path = "/v1/document-imports/sessions/{id}/exercises",
    params(("id" = Uuid, Path, description = "Session id"), ExercisesQuery),
    responses(
        (status = 200, description = "Filtered exercises", body = ExercisesResponse),
        (status = 400, description = "Unknown filter", body = ApiError),
        (status = 404, description = "Unknown session", body = ApiError),
        (status = 409, description = "No analysis yet", body = ApiError)
    ),
    tag = "document-imports"
)]
pub async fn list_exercises(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ExercisesQuery>,
) -> Result<Json<ExercisesResponse>, AppError> {
    let sessions = state.sessions.read().await;
    let session = session_ref(&sessions, id)?;
    if session.wizard.analysis().is_none() {
        return Err(CoreError::NoAnalysis.into());
    }

    let filter = match query.filter.as_deref() {
        Some(raw) => raw
            .parse::<ExerciseFilter>()
            .map_err(|message| AppError::Validation {
                message,
                field: Some("filter".to_string()),
                received: Some(serde_json::Value::String(raw.to_string())),
                docs_hint: None,
            })?,
        None => session.wizard.exercise_filter(),
    };
    let exercises: Vec<ExtractedExercise> = session
        .wizard
        .exercises_matching(filter)
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(ExercisesResponse {
        filter,
        count: exercises.len(),
        exercises,
    }))
}

/// Preview the request the import would send
#[utoipa::path(
    get,
    path = "/v1/document-imports/sessions/{id}/request",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Import request", body = ImportRequest),
        (status = 404, description = "Unknown session", body = ApiError),
        (status = 409, description = "No analysis yet", body = ApiError)
    ),
    tag = "document-imports"
)]
pub async fn preview_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ImportRequest>, AppError> {
    let sessions = state.sessions.read().await;
    let session = session_ref(&sessions, id)?;
    Ok(Json(session.wizard.build_request()?))
}

/// Send the reconciled import to the backend
///
/// Per-item failures are reported in `importResult`; only an unreachable
/// backend is an error, and the decisions are kept for a retry.
#[utoipa::path(
    post,
    path = "/v1/document-imports/sessions/{id}/import",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Import delivered", body = SessionResponse),
        (status = 404, description = "Unknown session", body = ApiError),
        (status = 409, description = "No analysis yet or a call is in flight", body = ApiError),
        (status = 502, description = "Backend unreachable", body = ApiError)
    ),
    tag = "document-imports"
)]
pub async fn run_import(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, AppError> {
    let ticket = {
        let mut sessions = state.sessions.write().await;
        let session = session_mut(&mut sessions, id)?;
        let ticket = session.wizard.begin_import()?;
        session.touch();
        ticket
    };

    let response = tokio::spawn(finish_import(state, id, ticket))
        .await
        .map_err(|e| detached_task_failed("import", e))??;
    Ok(Json(response))
}

async fn finish_import(
    state: AppState,
    id: Uuid,
    ticket: ImportTicket,
) -> Result<SessionResponse, AppError> {
    let outcome = execute_import(&state.backend, &ticket.request).await;
    let failure = outcome.as_ref().err().cloned();

    let mut sessions = state.sessions.write().await;
    let session = session_mut(&mut sessions, id)?;
    if !session.wizard.complete_import(&ticket, outcome) {
        return Err(AppError::Conflict {
            message: "session was reset while the import was running".to_string(),
            docs_hint: None,
        });
    }
    session.touch();
    match failure {
        Some(err) => Err(err.into()),
        None => Ok(SessionResponse::new(id, session)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use physio_core::config::ReconcileConfig;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::clients::{HttpAnalysisClient, HttpBackendClient};
    use crate::state::AppState;

    fn analysis_payload() -> Value {
        json!({
            "documentInfo": { "patientName": "Jane Doe" },
            "exercises": [
                { "tempId": "e1", "name": "Squat", "sets": 4, "reps": 10 },
                { "tempId": "e2", "name": "Bridge" },
                { "tempId": "e3", "name": "Plank", "duration": 30 }
            ],
            "exerciseSets": [
                { "tempId": "s1", "name": "Morning", "exerciseTempIds": ["e1", "e2", "e3"] }
            ],
            "clinicalNotes": [
                { "tempId": "n1", "type": "precaution", "title": "Knee", "content": "No deep flexion" }
            ],
            "matchSuggestions": {
                "e1": [{ "existingExerciseId": "ex-100", "confidence": 0.92 }],
                "e2": [{ "existingExerciseId": "ex-200", "confidence": 0.5 }]
            }
        })
    }

    /// Fake analysis service and backend on an ephemeral port.
    async fn spawn_upstream(received: Arc<Mutex<Vec<Value>>>) -> String {
        let app = Router::new()
            .route(
                "/v1/documents/analyze",
                post(|Json(_body): Json<Value>| async { Json(analysis_payload()) }),
            )
            .route(
                "/v1/exercise-imports",
                post(move |Json(body): Json<Value>| {
                    let received = received.clone();
                    async move {
                        received.lock().unwrap().push(body);
                        Json(json!({
                            "success": true,
                            "importedCount": 4,
                            "failedCount": 0,
                            "message": "imported"
                        }))
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake upstream");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake upstream");
        });
        format!("http://{addr}")
    }

    /// Analysis service that answers only after `delay`.
    async fn spawn_slow_analysis(delay: Duration) -> String {
        let app = Router::new().route(
            "/v1/documents/analyze",
            post(move |Json(_body): Json<Value>| async move {
                tokio::time::sleep(delay).await;
                Json(analysis_payload())
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake upstream");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake upstream");
        });
        format!("http://{addr}")
    }

    fn app_with_upstream(base_url: &str) -> Router {
        let config = ReconcileConfig::default();
        let state = AppState::new(
            config,
            HttpAnalysisClient::new(base_url),
            HttpBackendClient::new(base_url, Some("token".to_string())),
        );
        super::router(&config).with_state(state)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .expect("request should build");
        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("request should succeed");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("body should be json")
        };
        (status, value)
    }

    async fn create(app: &Router) -> String {
        let (status, body) = call(
            app,
            "POST",
            "/v1/document-imports/sessions",
            Some(json!({ "patientId": " p-1 ", "assignSetsToPatient": true })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["step"], "upload");
        assert_eq!(body["selectedPatientId"], "p-1");
        body["sessionId"].as_str().expect("session id").to_string()
    }

    async fn upload_pdf(app: &Router, id: &str) {
        let (status, body) = call(
            app,
            "POST",
            &format!("/v1/document-imports/sessions/{id}/document"),
            Some(json!({
                "fileName": "plan.pdf",
                "mimeType": "application/pdf",
                "contentBase64": "JVBERi0xLjc="
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["file"]["fileName"], "plan.pdf");
        assert_eq!(body["canProceed"], true);
    }

    #[tokio::test]
    async fn full_import_flow_against_fake_upstream() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let base_url = spawn_upstream(received.clone()).await;
        let app = app_with_upstream(&base_url);
        let id = create(&app).await;
        upload_pdf(&app, &id).await;

        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/document-imports/sessions/{id}/analyze"),
            Some(json!({ "context": "post-op knee" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["step"], "review-exercises");
        assert_eq!(body["decisions"]["exercises"]["e1"]["action"], "reuse");
        assert_eq!(body["decisions"]["exercises"]["e2"]["action"], "create");
        assert_eq!(body["stats"]["exercises"]["matched"], 2);

        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/document-imports/sessions/{id}/actions"),
            Some(json!({ "actions": [
                { "type": "set_exercise_action", "tempId": "e2", "action": "skip" },
                { "type": "next" }
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["step"], "review-sets");

        let (status, request) = call(
            &app,
            "GET",
            &format!("/v1/document-imports/sessions/{id}/request"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(request["exercisesToReuse"]["e1"], "ex-100");
        let refs: Vec<&str> = request["exerciseSetsToCreate"][0]["exercises"]
            .as_array()
            .expect("set exercises")
            .iter()
            .filter_map(|e| e["exerciseTempId"].as_str())
            .collect();
        assert_eq!(refs, vec!["e1", "e3"]);
        assert_eq!(request["patientId"], "p-1");
        assert_eq!(request["assignToPatient"], true);

        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/document-imports/sessions/{id}/import"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["step"], "summary");
        assert_eq!(body["importResult"]["importedCount"], 4);
        assert_eq!(body["isImporting"], false);

        let sent = received.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], request);
    }

    #[tokio::test]
    async fn dropped_analyze_request_still_completes_the_session() {
        let base_url = spawn_slow_analysis(Duration::from_millis(600)).await;
        let app = app_with_upstream(&base_url);
        let id = create(&app).await;
        upload_pdf(&app, &id).await;
        let analyze_uri = format!("/v1/document-imports/sessions/{id}/analyze");
        let session_uri = format!("/v1/document-imports/sessions/{id}");

        let abandoned = tokio::time::timeout(
            Duration::from_millis(200),
            call(&app, "POST", &analyze_uri, Some(json!({}))),
        )
        .await;
        assert!(abandoned.is_err(), "client gave up before the upstream answered");

        let mut body = Value::Null;
        for _ in 0..50 {
            let (status, current) = call(&app, "GET", &session_uri, None).await;
            assert_eq!(status, StatusCode::OK);
            body = current;
            if body["isAnalyzing"] == false {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(body["isAnalyzing"], false);
        assert_eq!(body["step"], "review-exercises");
        assert_eq!(body["decisions"]["exercises"]["e1"]["action"], "reuse");

        let (status, body) = call(&app, "POST", &analyze_uri, Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["step"], "review-exercises");
    }

    #[tokio::test]
    async fn unreachable_analysis_service_returns_to_upload() {
        // Nothing listens on port 9 of the loopback interface.
        let app = app_with_upstream("http://127.0.0.1:9");
        let id = create(&app).await;
        upload_pdf(&app, &id).await;

        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/document-imports/sessions/{id}/analyze"),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "upstream_failed");

        let (_, body) = call(&app, "GET", &format!("/v1/document-imports/sessions/{id}"), None).await;
        assert_eq!(body["step"], "upload");
        assert_eq!(body["isAnalyzing"], false);
        assert!(body["error"].as_str().is_some());
        assert_eq!(body["file"]["fileName"], "plan.pdf");
    }

    #[tokio::test]
    async fn analyze_without_document_is_rejected() {
        let app = app_with_upstream("http://127.0.0.1:9");
        let id = create(&app).await;
        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/document-imports/sessions/{id}/analyze"),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "file");
    }

    #[tokio::test]
    async fn unsupported_upload_is_rejected_before_storing() {
        let app = app_with_upstream("http://127.0.0.1:9");
        let id = create(&app).await;
        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/document-imports/sessions/{id}/document"),
            Some(json!({
                "fileName": "plan.xlsx",
                "mimeType": "application/vnd.ms-excel",
                "contentBase64": "AAEC"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "mimeType");

        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/document-imports/sessions/{id}/document"),
            Some(json!({ "fileName": "plan.pdf", "contentBase64": "not base64!" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "contentBase64");

        let (_, body) = call(&app, "GET", &format!("/v1/document-imports/sessions/{id}"), None).await;
        assert!(body["file"].is_null());
    }

    #[tokio::test]
    async fn actions_apply_all_or_nothing() {
        let base_url = spawn_upstream(Arc::new(Mutex::new(Vec::new()))).await;
        let app = app_with_upstream(&base_url);
        let id = create(&app).await;
        upload_pdf(&app, &id).await;
        call(
            &app,
            "POST",
            &format!("/v1/document-imports/sessions/{id}/analyze"),
            Some(json!({})),
        )
        .await;

        let (status, _) = call(
            &app,
            "POST",
            &format!("/v1/document-imports/sessions/{id}/actions"),
            Some(json!({ "actions": [
                { "type": "set_all_exercises_skip" },
                { "type": "set_exercise_action", "tempId": "e9", "action": "skip" }
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call(&app, "GET", &format!("/v1/document-imports/sessions/{id}"), None).await;
        assert_eq!(body["decisions"]["exercises"]["e1"]["action"], "reuse");
        assert_eq!(body["stats"]["exercises"]["skip"], 0);
    }

    #[tokio::test]
    async fn exercise_filter_is_validated() {
        let base_url = spawn_upstream(Arc::new(Mutex::new(Vec::new()))).await;
        let app = app_with_upstream(&base_url);
        let id = create(&app).await;

        let (status, _) = call(
            &app,
            "GET",
            &format!("/v1/document-imports/sessions/{id}/exercises?filter=matched"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        upload_pdf(&app, &id).await;
        call(
            &app,
            "POST",
            &format!("/v1/document-imports/sessions/{id}/analyze"),
            Some(json!({})),
        )
        .await;

        let (status, body) = call(
            &app,
            "GET",
            &format!("/v1/document-imports/sessions/{id}/exercises?filter=Matched"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["filter"], "matched");
        assert_eq!(body["count"], 2);

        let (status, body) = call(
            &app,
            "GET",
            &format!("/v1/document-imports/sessions/{id}/exercises?filter=maybe"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["received"], "maybe");
    }

    #[tokio::test]
    async fn unknown_and_deleted_sessions_are_not_found() {
        let app = app_with_upstream("http://127.0.0.1:9");
        let (status, _) = call(
            &app,
            "GET",
            "/v1/document-imports/sessions/0190b8a4-0000-7000-8000-000000000000",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let id = create(&app).await;
        let (status, _) = call(&app, "DELETE", &format!("/v1/document-imports/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "GET", &format!("/v1/document-imports/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn upload_limit_covers_base64_growth() {
        assert_eq!(super::upload_body_limit(3), 4 + super::UPLOAD_BODY_OVERHEAD_BYTES);
        assert!(super::upload_body_limit(10 * 1024 * 1024) > 13 * 1024 * 1024);
    }
}

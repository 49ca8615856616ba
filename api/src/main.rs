use std::net::SocketAddr;

use axum::Router;
use physio_core::config::ReconcileConfig;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod clients;
mod error;
mod middleware;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Physio Document Import API",
        version = "0.1.0",
        description = "Turns an analysed treatment document into a reconciled import of exercises, exercise sets and clinical notes."
    ),
    paths(
        routes::health::health_check,
        routes::document_imports::create_session,
        routes::document_imports::get_session,
        routes::document_imports::delete_session,
        routes::document_imports::upload_document,
        routes::document_imports::analyze_document,
        routes::document_imports::apply_actions,
        routes::document_imports::list_exercises,
        routes::document_imports::preview_request,
        routes::document_imports::run_import,
    ),
    components(schemas(
        HealthResponse,
        routes::document_imports::CreateSessionRequest,
        routes::document_imports::UploadDocumentRequest,
        routes::document_imports::AnalyzeRequest,
        routes::document_imports::ApplyActionsRequest,
        routes::document_imports::SessionResponse,
        routes::document_imports::ExercisesResponse,
        physio_core::error::ApiError,
        physio_core::config::ReconcileConfig,
        physio_core::analysis::AnalysisResult,
        physio_core::analysis::DocumentInfo,
        physio_core::analysis::ExtractedExercise,
        physio_core::analysis::ExtractedSet,
        physio_core::analysis::ExtractedNote,
        physio_core::analysis::MatchCandidate,
        physio_core::analysis::EntityKind,
        physio_core::decisions::DecisionModel,
        physio_core::decisions::ExerciseDecision,
        physio_core::decisions::ExerciseSetDecision,
        physio_core::decisions::ClinicalNoteDecision,
        physio_core::decisions::ExerciseAction,
        physio_core::decisions::EntityAction,
        physio_core::decisions::ExerciseEdits,
        physio_core::filter::ExerciseFilter,
        physio_core::stats::ImportStats,
        physio_core::stats::ExerciseCounts,
        physio_core::stats::EntityCounts,
        physio_core::request::ImportRequest,
        physio_core::request::ExerciseImportItem,
        physio_core::request::ExerciseSetImportItem,
        physio_core::request::SetExerciseEntry,
        physio_core::request::ClinicalNoteImportItem,
        physio_core::executor::ImportResult,
        physio_core::executor::ImportCounts,
        physio_core::executor::ImportItemError,
        physio_core::wizard::WizardStep,
        physio_core::wizard::WizardSnapshot,
        physio_core::wizard::FileSummary,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub open_sessions: usize,
    pub config: ReconcileConfig,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "physio_api=debug,physio_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let app_state = state::AppState::from_env();
    tracing::info!(
        auto_reuse_threshold = app_state.config.auto_reuse_threshold,
        default_exercise_sets = app_state.config.default_exercise_sets,
        max_upload_bytes = app_state.config.max_upload_bytes,
        session_ttl_secs = app_state.session_ttl.as_secs(),
        "reconciliation settings"
    );
    state::spawn_session_reaper(app_state.clone());

    let cors_layer = middleware::cors::build_cors_layer();

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::document_imports::router(&app_state.config))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::security_headers::apply))
                .layer(cors_layer),
        )
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%addr, error = %err, "failed to bind listener");
            std::process::exit(1);
        }
    };
    tracing::info!("Physio import API listening on {}", addr);

    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(error = %err, "server stopped");
        std::process::exit(1);
    }
}

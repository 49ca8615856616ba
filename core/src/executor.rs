//! Boundaries to the document analysis service and the persistence backend.

use std::future::Future;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::analysis::{AnalysisResult, EntityKind};
use crate::error::CoreError;
use crate::request::ImportRequest;
use crate::upload::DocumentFile;

/// Failure to reach a boundary or to get a usable answer from it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct BoundaryError {
    pub message: String,
}

impl BoundaryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// What the analysis service receives for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisInput {
    pub document: DocumentFile,
    pub patient_id: Option<String>,
    /// Free-text hint for the extraction (e.g. "post-op ACL protocol")
    pub context: Option<String>,
}

pub trait AnalysisService {
    fn analyze(
        &self,
        input: &AnalysisInput,
    ) -> impl Future<Output = Result<AnalysisResult, BoundaryError>> + Send;
}

pub trait PersistenceService {
    fn persist(
        &self,
        request: &ImportRequest,
    ) -> impl Future<Output = Result<ImportResult, BoundaryError>> + Send;
}

/// Outcome reported by the persistence backend.
///
/// Per-item failures are part of a delivered result, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    pub imported_count: usize,
    pub failed_count: usize,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ImportItemError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exercises: Option<ImportCounts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exercise_sets: Option<ImportCounts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_notes: Option<ImportCounts>,
}

impl ImportResult {
    pub fn attempted_count(&self) -> usize {
        self.imported_count + self.failed_count
    }

    pub fn is_partial(&self) -> bool {
        self.failed_count > 0 && self.imported_count > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportCounts {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportItemError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,
    pub message: String,
}

/// Hand a built request to the backend.
///
/// Only transport failures become errors; partial failures are returned as
/// a result for the summary screen.
pub async fn execute_import<P: PersistenceService>(
    service: &P,
    request: &ImportRequest,
) -> Result<ImportResult, CoreError> {
    tracing::info!(
        items = request.item_count(),
        reused = request.exercises_to_reuse.len(),
        "sending import request"
    );
    match service.persist(request).await {
        Ok(result) => {
            if result.failed_count > 0 {
                tracing::warn!(
                    imported = result.imported_count,
                    failed = result.failed_count,
                    "import finished with failed items"
                );
            } else {
                tracing::info!(imported = result.imported_count, "import finished");
            }
            Ok(result)
        }
        Err(err) => {
            tracing::warn!(error = %err, "import request could not be delivered");
            Err(CoreError::Transport(err.message))
        }
    }
}

/// Send a document to the analysis service and check what comes back.
pub async fn run_analysis<A: AnalysisService>(
    service: &A,
    input: &AnalysisInput,
) -> Result<AnalysisResult, CoreError> {
    tracing::info!(file = %input.document.file_name, "analysing document");
    let result = service
        .analyze(input)
        .await
        .map_err(|err| CoreError::Analysis(err.message))?;
    result.validate()?;
    tracing::info!(
        exercises = result.exercises.len(),
        sets = result.exercise_sets.len(),
        notes = result.clinical_notes.len(),
        "document analysed"
    );
    Ok(result)
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::Mutex;

    use super::*;

    /// Returns a fixed analysis outcome.
    pub struct FixedAnalysis(pub Result<AnalysisResult, BoundaryError>);

    impl AnalysisService for FixedAnalysis {
        async fn analyze(&self, _input: &AnalysisInput) -> Result<AnalysisResult, BoundaryError> {
            self.0.clone()
        }
    }

    /// Records every request and answers with a fixed outcome.
    pub struct RecordingBackend {
        pub outcome: Result<ImportResult, BoundaryError>,
        pub requests: Mutex<Vec<ImportRequest>>,
    }

    impl RecordingBackend {
        pub fn new(outcome: Result<ImportResult, BoundaryError>) -> Self {
            Self {
                outcome,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl PersistenceService for RecordingBackend {
        async fn persist(&self, request: &ImportRequest) -> Result<ImportResult, BoundaryError> {
            self.requests
                .lock()
                .expect("requests lock")
                .push(request.clone());
            self.outcome.clone()
        }
    }
}

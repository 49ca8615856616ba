//! Import wizard state machine.
//!
//! `upload -> processing -> review-exercises -> review-sets -> summary`.
//! All state lives in [`WizardState`] and changes only through its methods
//! (or [`WizardState::apply`] for serialized operator actions).
//!
//! The two boundary calls are split into `begin_*` / `complete_*` phases so a
//! host can release its lock on the state while the call is in flight. The
//! `is_analyzing` / `is_importing` flags guard against a second dispatch.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::analysis::{AnalysisResult, ExtractedExercise};
use crate::bulk;
use crate::config::ReconcileConfig;
use crate::decisions::{DecisionModel, EntityAction, ExerciseAction, ExerciseEdits};
use crate::error::{CoreError, Result};
use crate::executor::{
    AnalysisInput, AnalysisService, ImportResult, PersistenceService, execute_import, run_analysis,
};
use crate::filter::{ExerciseFilter, filter_exercises};
use crate::heuristic::initial_decisions;
use crate::request::{ImportRequest, build_import_request};
use crate::stats::ImportStats;
use crate::upload::{DocumentFile, validate_document};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum WizardStep {
    #[default]
    Upload,
    Processing,
    ReviewExercises,
    ReviewSets,
    Summary,
}

impl WizardStep {
    pub const ORDER: [WizardStep; 5] = [
        WizardStep::Upload,
        WizardStep::Processing,
        WizardStep::ReviewExercises,
        WizardStep::ReviewSets,
        WizardStep::Summary,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WizardStep::Upload => "upload",
            WizardStep::Processing => "processing",
            WizardStep::ReviewExercises => "review-exercises",
            WizardStep::ReviewSets => "review-sets",
            WizardStep::Summary => "summary",
        }
    }

    fn index(self) -> usize {
        Self::ORDER
            .iter()
            .position(|s| *s == self)
            .unwrap_or_default()
    }

    pub fn next(self) -> Option<WizardStep> {
        Self::ORDER.get(self.index() + 1).copied()
    }

    pub fn previous(self) -> Option<WizardStep> {
        self.index().checked_sub(1).map(|i| Self::ORDER[i])
    }
}

/// Proof that an analysis was dispatched for the current document.
#[derive(Debug, Clone)]
pub struct AnalysisTicket {
    generation: u64,
    pub input: AnalysisInput,
}

/// Proof that an import was dispatched for the current session.
#[derive(Debug, Clone)]
pub struct ImportTicket {
    generation: u64,
    pub request: ImportRequest,
}

#[derive(Debug, Clone)]
pub struct WizardState {
    config: ReconcileConfig,
    step: WizardStep,
    file: Option<DocumentFile>,
    is_analyzing: bool,
    is_importing: bool,
    analysis: Option<AnalysisResult>,
    decisions: DecisionModel,
    selected_patient_id: Option<String>,
    assign_sets_to_patient: bool,
    exercise_filter: ExerciseFilter,
    error: Option<String>,
    import_result: Option<ImportResult>,
    // Bumped by reset so completions dispatched before it are dropped.
    generation: u64,
}

impl Default for WizardState {
    fn default() -> Self {
        Self::new(ReconcileConfig::default())
    }
}

impl WizardState {
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            config,
            step: WizardStep::Upload,
            file: None,
            is_analyzing: false,
            is_importing: false,
            analysis: None,
            decisions: DecisionModel::default(),
            selected_patient_id: None,
            assign_sets_to_patient: false,
            exercise_filter: ExerciseFilter::All,
            error: None,
            import_result: None,
            generation: 0,
        }
    }

    /// Resume at `review-exercises` with an analysis received out of band
    /// (e.g. a saved analysis file). Without `decisions` the initial ones
    /// are derived as after a live analysis; given ones must match the
    /// analysis' temp ids and candidates.
    pub fn resume(
        config: ReconcileConfig,
        analysis: AnalysisResult,
        decisions: Option<DecisionModel>,
    ) -> Result<Self> {
        analysis.validate()?;
        let decisions = match decisions {
            Some(decisions) => {
                decisions.validate(&analysis)?;
                decisions
            }
            None => initial_decisions(&analysis, &config),
        };
        let mut wizard = Self::new(config);
        wizard.decisions = decisions;
        wizard.analysis = Some(analysis);
        wizard.step = WizardStep::ReviewExercises;
        Ok(wizard)
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn file(&self) -> Option<&DocumentFile> {
        self.file.as_ref()
    }

    pub fn is_analyzing(&self) -> bool {
        self.is_analyzing
    }

    pub fn is_importing(&self) -> bool {
        self.is_importing
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        self.analysis.as_ref()
    }

    pub fn decisions(&self) -> &DecisionModel {
        &self.decisions
    }

    pub fn selected_patient_id(&self) -> Option<&str> {
        self.selected_patient_id.as_deref()
    }

    pub fn assign_sets_to_patient(&self) -> bool {
        self.assign_sets_to_patient
    }

    pub fn exercise_filter(&self) -> ExerciseFilter {
        self.exercise_filter
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn import_result(&self) -> Option<&ImportResult> {
        self.import_result.as_ref()
    }

    // ── Navigation ───────────────────────────────────────────

    pub fn go_next(&mut self) {
        if let Some(next) = self.step.next() {
            self.move_to(next);
        }
    }

    pub fn go_back(&mut self) {
        if let Some(previous) = self.step.previous() {
            self.move_to(previous);
        }
    }

    /// Unguarded jump. Callers only offer steps the operator already completed.
    pub fn go_to_step(&mut self, step: WizardStep) {
        self.move_to(step);
    }

    fn move_to(&mut self, step: WizardStep) {
        if step != self.step {
            tracing::info!(from = self.step.as_str(), to = step.as_str(), "wizard step");
            self.step = step;
        }
    }

    /// Whether the current step's work is done.
    pub fn can_proceed(&self) -> bool {
        match self.step {
            WizardStep::Upload => self.file.is_some(),
            WizardStep::Processing => false,
            WizardStep::ReviewExercises => {
                self.analysis.is_some() && self.stats().has_importable_exercises()
            }
            WizardStep::ReviewSets => true,
            WizardStep::Summary => self.import_result.as_ref().is_some_and(|r| r.success),
        }
    }

    // ── Inputs ───────────────────────────────────────────────

    /// Select a new document (or clear it). Drops the analysis, every
    /// decision and any import result; the current step is kept.
    pub fn set_file(&mut self, file: Option<DocumentFile>) -> Result<()> {
        self.ensure_idle()?;
        self.file = file;
        self.analysis = None;
        self.decisions = DecisionModel::default();
        self.import_result = None;
        self.error = None;
        Ok(())
    }

    pub fn set_selected_patient(&mut self, patient_id: Option<String>) {
        self.selected_patient_id = patient_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
    }

    pub fn set_assign_sets_to_patient(&mut self, assign: bool) {
        self.assign_sets_to_patient = assign;
    }

    pub fn set_exercise_filter(&mut self, filter: ExerciseFilter) {
        self.exercise_filter = filter;
    }

    // ── Analysis ─────────────────────────────────────────────

    /// Validate the selected document and mark the analysis as in flight.
    ///
    /// Validation failures are recorded in `error` and leave the step alone.
    pub fn begin_analysis(&mut self, context: Option<String>) -> Result<AnalysisTicket> {
        if self.is_analyzing {
            return Err(CoreError::Busy {
                operation: "analysis",
            });
        }
        if self.is_importing {
            return Err(CoreError::Busy { operation: "import" });
        }
        let Some(file) = self.file.as_ref() else {
            return Err(self.record(CoreError::NoFile));
        };
        if let Err(err) = validate_document(file, self.config.max_upload_bytes) {
            return Err(self.record(err));
        }

        let input = AnalysisInput {
            document: file.clone(),
            patient_id: self.selected_patient_id.clone(),
            context,
        };
        self.error = None;
        self.is_analyzing = true;
        self.move_to(WizardStep::Processing);
        Ok(AnalysisTicket {
            generation: self.generation,
            input,
        })
    }

    /// Apply the outcome of a dispatched analysis. Returns false when the
    /// wizard was reset in the meantime and the outcome was dropped.
    pub fn complete_analysis(
        &mut self,
        ticket: &AnalysisTicket,
        outcome: Result<AnalysisResult>,
    ) -> bool {
        if ticket.generation != self.generation {
            tracing::debug!("dropping analysis outcome from before reset");
            return false;
        }
        self.is_analyzing = false;
        match outcome {
            Ok(analysis) => {
                self.decisions = initial_decisions(&analysis, &self.config);
                self.analysis = Some(analysis);
                self.import_result = None;
                self.exercise_filter = ExerciseFilter::All;
                self.move_to(WizardStep::ReviewExercises);
            }
            Err(err) => {
                self.record(err);
                self.move_to(WizardStep::Upload);
            }
        }
        true
    }

    /// Dispatch the selected document to `service` and apply the outcome.
    pub async fn analyze_document<A: AnalysisService>(
        &mut self,
        service: &A,
        context: Option<String>,
    ) -> Result<()> {
        let ticket = self.begin_analysis(context)?;
        let outcome = run_analysis(service, &ticket.input).await;
        let failure = outcome.as_ref().err().cloned();
        self.complete_analysis(&ticket, outcome);
        failure.map_or(Ok(()), Err)
    }

    // ── Import ───────────────────────────────────────────────

    /// Build the request from the current decisions and mark the import as
    /// in flight. Later decision changes do not affect the returned request.
    pub fn begin_import(&mut self) -> Result<ImportTicket> {
        if self.is_importing {
            return Err(CoreError::Busy { operation: "import" });
        }
        if self.is_analyzing {
            return Err(CoreError::Busy {
                operation: "analysis",
            });
        }
        let request = self.build_request()?;
        self.error = None;
        self.is_importing = true;
        Ok(ImportTicket {
            generation: self.generation,
            request,
        })
    }

    /// Apply the outcome of a dispatched import. A transport failure keeps
    /// the current step so the operator can retry.
    pub fn complete_import(
        &mut self,
        ticket: &ImportTicket,
        outcome: Result<ImportResult>,
    ) -> bool {
        if ticket.generation != self.generation {
            tracing::debug!("dropping import outcome from before reset");
            return false;
        }
        self.is_importing = false;
        match outcome {
            Ok(result) => {
                self.import_result = Some(result);
                self.move_to(WizardStep::Summary);
            }
            Err(err) => {
                self.record(err);
            }
        }
        true
    }

    /// Build, send and record the import.
    pub async fn execute_import<P: PersistenceService>(&mut self, service: &P) -> Result<()> {
        let ticket = self.begin_import()?;
        let outcome = execute_import(service, &ticket.request).await;
        let failure = outcome.as_ref().err().cloned();
        self.complete_import(&ticket, outcome);
        failure.map_or(Ok(()), Err)
    }

    // ── Derived views ────────────────────────────────────────

    pub fn stats(&self) -> ImportStats {
        self.analysis
            .as_ref()
            .map(|analysis| ImportStats::compute(analysis, &self.decisions))
            .unwrap_or_default()
    }

    /// Extracted exercises passing the current filter.
    pub fn filtered_exercises(&self) -> Vec<&ExtractedExercise> {
        self.exercises_matching(self.exercise_filter)
    }

    pub fn exercises_matching(&self, filter: ExerciseFilter) -> Vec<&ExtractedExercise> {
        match self.analysis.as_ref() {
            Some(analysis) => filter_exercises(analysis, &self.decisions, filter),
            None => Vec::new(),
        }
    }

    pub fn build_request(&self) -> Result<ImportRequest> {
        let analysis = self.analysis.as_ref().ok_or(CoreError::NoAnalysis)?;
        Ok(build_import_request(
            analysis,
            &self.decisions,
            self.selected_patient_id.as_deref(),
            self.assign_sets_to_patient,
            &self.config,
        ))
    }

    // ── Decisions ────────────────────────────────────────────

    pub fn set_exercise_action(&mut self, temp_id: &str, action: ExerciseAction) -> Result<()> {
        let (analysis, decisions) = self.decision_parts()?;
        decisions.set_exercise_action(analysis, temp_id, action)
    }

    pub fn reuse_exercise(&mut self, temp_id: &str, existing_exercise_id: &str) -> Result<()> {
        let (analysis, decisions) = self.decision_parts()?;
        decisions.reuse_exercise(analysis, temp_id, existing_exercise_id)
    }

    pub fn edit_exercise(&mut self, temp_id: &str, edits: Option<ExerciseEdits>) -> Result<()> {
        let (analysis, decisions) = self.decision_parts()?;
        decisions.edit_exercise(analysis, temp_id, edits)
    }

    pub fn set_exercise_set_action(&mut self, temp_id: &str, action: EntityAction) -> Result<()> {
        let (analysis, decisions) = self.decision_parts()?;
        decisions.set_exercise_set_action(analysis, temp_id, action)
    }

    pub fn edit_exercise_set(
        &mut self,
        temp_id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<()> {
        let (analysis, decisions) = self.decision_parts()?;
        decisions.edit_exercise_set(analysis, temp_id, name, description)
    }

    pub fn set_clinical_note_action(&mut self, temp_id: &str, action: EntityAction) -> Result<()> {
        let (analysis, decisions) = self.decision_parts()?;
        decisions.set_clinical_note_action(analysis, temp_id, action)
    }

    pub fn edit_clinical_note(&mut self, temp_id: &str, content: Option<String>) -> Result<()> {
        let (analysis, decisions) = self.decision_parts()?;
        decisions.edit_clinical_note(analysis, temp_id, content)
    }

    pub fn set_all_exercises_create(&mut self) -> Result<()> {
        let (analysis, decisions) = self.decision_parts()?;
        bulk::set_all_exercises_create(analysis, decisions);
        Ok(())
    }

    pub fn set_all_exercises_skip(&mut self) -> Result<()> {
        let (analysis, decisions) = self.decision_parts()?;
        bulk::set_all_exercises_skip(analysis, decisions);
        Ok(())
    }

    pub fn use_all_matched_exercises(&mut self) -> Result<usize> {
        let (analysis, decisions) = self.decision_parts()?;
        Ok(bulk::use_all_matched_exercises(analysis, decisions))
    }

    /// Back to the initial state. In-flight outcomes dispatched before the
    /// reset are ignored when they complete.
    pub fn reset(&mut self) {
        if self.is_analyzing || self.is_importing {
            tracing::warn!(
                is_analyzing = self.is_analyzing,
                is_importing = self.is_importing,
                "wizard reset while a boundary call is in flight; its result will be dropped"
            );
        }
        let generation = self.generation + 1;
        *self = Self::new(self.config);
        self.generation = generation;
        tracing::info!("wizard reset");
    }

    /// Apply one serialized operator action.
    pub fn apply(&mut self, action: WizardAction) -> Result<()> {
        match action {
            WizardAction::Next => self.go_next(),
            WizardAction::Back => self.go_back(),
            WizardAction::GoToStep { step } => self.go_to_step(step),
            WizardAction::SelectPatient { patient_id } => self.set_selected_patient(patient_id),
            WizardAction::SetAssignSetsToPatient { assign } => {
                self.set_assign_sets_to_patient(assign)
            }
            WizardAction::SetExerciseFilter { filter } => self.set_exercise_filter(filter),
            WizardAction::SetExerciseAction { temp_id, action } => {
                self.set_exercise_action(&temp_id, action)?
            }
            WizardAction::ReuseExercise {
                temp_id,
                existing_exercise_id,
            } => self.reuse_exercise(&temp_id, &existing_exercise_id)?,
            WizardAction::EditExercise { temp_id, edits } => self.edit_exercise(&temp_id, edits)?,
            WizardAction::SetExerciseSetAction { temp_id, action } => {
                self.set_exercise_set_action(&temp_id, action)?
            }
            WizardAction::EditExerciseSet {
                temp_id,
                name,
                description,
            } => self.edit_exercise_set(&temp_id, name, description)?,
            WizardAction::SetClinicalNoteAction { temp_id, action } => {
                self.set_clinical_note_action(&temp_id, action)?
            }
            WizardAction::EditClinicalNote { temp_id, content } => {
                self.edit_clinical_note(&temp_id, content)?
            }
            WizardAction::SetAllExercisesCreate => self.set_all_exercises_create()?,
            WizardAction::SetAllExercisesSkip => self.set_all_exercises_skip()?,
            WizardAction::UseAllMatchedExercises => {
                self.use_all_matched_exercises()?;
            }
            WizardAction::Reset => self.reset(),
        }
        Ok(())
    }

    pub fn snapshot(&self) -> WizardSnapshot {
        WizardSnapshot {
            step: self.step,
            file: self.file.as_ref().map(|f| FileSummary {
                file_name: f.file_name.clone(),
                mime_type: f.mime_type.clone(),
                size_bytes: f.size_bytes(),
            }),
            is_analyzing: self.is_analyzing,
            is_importing: self.is_importing,
            analysis_result: self.analysis.clone(),
            decisions: self.decisions.clone(),
            selected_patient_id: self.selected_patient_id.clone(),
            assign_sets_to_patient: self.assign_sets_to_patient,
            exercise_filter: self.exercise_filter,
            error: self.error.clone(),
            import_result: self.import_result.clone(),
            stats: self.stats(),
            can_proceed: self.can_proceed(),
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_analyzing {
            return Err(CoreError::Busy {
                operation: "analysis",
            });
        }
        if self.is_importing {
            return Err(CoreError::Busy { operation: "import" });
        }
        Ok(())
    }

    fn decision_parts(&mut self) -> Result<(&AnalysisResult, &mut DecisionModel)> {
        let analysis = self.analysis.as_ref().ok_or(CoreError::NoAnalysis)?;
        Ok((analysis, &mut self.decisions))
    }

    fn record(&mut self, err: CoreError) -> CoreError {
        tracing::warn!(step = self.step.as_str(), error = %err, "wizard error");
        self.error = Some(err.to_string());
        err
    }
}

/// Serialized operator interaction, replayable with [`WizardState::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WizardAction {
    Next,
    Back,
    GoToStep {
        step: WizardStep,
    },
    SelectPatient {
        #[serde(default)]
        patient_id: Option<String>,
    },
    SetAssignSetsToPatient {
        assign: bool,
    },
    SetExerciseFilter {
        filter: ExerciseFilter,
    },
    SetExerciseAction {
        temp_id: String,
        action: ExerciseAction,
    },
    ReuseExercise {
        temp_id: String,
        existing_exercise_id: String,
    },
    EditExercise {
        temp_id: String,
        #[serde(default)]
        edits: Option<ExerciseEdits>,
    },
    SetExerciseSetAction {
        temp_id: String,
        action: EntityAction,
    },
    EditExerciseSet {
        temp_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    SetClinicalNoteAction {
        temp_id: String,
        action: EntityAction,
    },
    EditClinicalNote {
        temp_id: String,
        #[serde(default)]
        content: Option<String>,
    },
    SetAllExercisesCreate,
    SetAllExercisesSkip,
    UseAllMatchedExercises,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub size_bytes: u64,
}

/// Read-only view of the whole wizard for remote clients.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WizardSnapshot {
    pub step: WizardStep,
    pub file: Option<FileSummary>,
    pub is_analyzing: bool,
    pub is_importing: bool,
    pub analysis_result: Option<AnalysisResult>,
    pub decisions: DecisionModel,
    pub selected_patient_id: Option<String>,
    pub assign_sets_to_patient: bool,
    pub exercise_filter: ExerciseFilter,
    pub error: Option<String>,
    pub import_result: Option<ImportResult>,
    pub stats: ImportStats,
    pub can_proceed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fixtures::sample;
    use crate::decisions::ExerciseDecision;
    use crate::executor::fakes::{FixedAnalysis, RecordingBackend};
    use crate::executor::{BoundaryError, ImportItemError};

    fn pdf() -> DocumentFile {
        DocumentFile::new(
            "plan.pdf",
            Some("application/pdf".to_string()),
            b"%PDF-1.7".to_vec(),
        )
    }

    fn ok_result() -> ImportResult {
        ImportResult {
            success: true,
            imported_count: 6,
            failed_count: 0,
            message: "imported".to_string(),
            ..Default::default()
        }
    }

    async fn analysed() -> WizardState {
        let mut wizard = WizardState::default();
        wizard.set_file(Some(pdf())).unwrap();
        wizard
            .analyze_document(&FixedAnalysis(Ok(sample())), None)
            .await
            .expect("analysis succeeds");
        wizard
    }

    #[test]
    fn step_order_is_linear_with_boundaries() {
        assert_eq!(WizardStep::Upload.previous(), None);
        assert_eq!(WizardStep::Upload.next(), Some(WizardStep::Processing));
        assert_eq!(WizardStep::ReviewSets.next(), Some(WizardStep::Summary));
        assert_eq!(WizardStep::Summary.next(), None);

        let mut wizard = WizardState::default();
        wizard.go_back();
        assert_eq!(wizard.step(), WizardStep::Upload);
        wizard.go_to_step(WizardStep::Summary);
        wizard.go_next();
        assert_eq!(wizard.step(), WizardStep::Summary);
        wizard.go_back();
        assert_eq!(wizard.step(), WizardStep::ReviewSets);
    }

    #[test]
    fn step_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(WizardStep::ReviewExercises).unwrap(),
            serde_json::json!("review-exercises")
        );
    }

    #[test]
    fn upload_step_needs_a_file() {
        let mut wizard = WizardState::default();
        assert!(!wizard.can_proceed());
        wizard.set_file(Some(pdf())).unwrap();
        assert!(wizard.can_proceed());
    }

    #[test]
    fn validation_failure_keeps_step_and_records_error() {
        let mut wizard = WizardState::default();
        wizard
            .set_file(Some(DocumentFile::new("scan.xlsx", None, vec![1])))
            .unwrap();
        let err = wizard.begin_analysis(None).expect_err("xlsx is unsupported");
        assert!(matches!(err, CoreError::UnsupportedFormat { .. }));
        assert_eq!(wizard.step(), WizardStep::Upload);
        assert!(!wizard.is_analyzing());
        assert!(wizard.error().is_some());
    }

    #[tokio::test]
    async fn successful_analysis_applies_heuristic() {
        let wizard = analysed().await;
        assert_eq!(wizard.step(), WizardStep::ReviewExercises);
        assert!(!wizard.is_analyzing());
        assert_eq!(
            wizard.decisions().exercise_action("e1"),
            ExerciseAction::Reuse
        );
        assert_eq!(
            wizard.decisions().exercise_action("e2"),
            ExerciseAction::Create
        );
        assert!(wizard.can_proceed());
    }

    #[tokio::test]
    async fn failed_analysis_returns_to_upload() {
        let mut wizard = WizardState::default();
        wizard.set_file(Some(pdf())).unwrap();
        let err = wizard
            .analyze_document(
                &FixedAnalysis(Err(BoundaryError::new("model overloaded"))),
                None,
            )
            .await
            .expect_err("analysis fails");
        assert_eq!(err, CoreError::Analysis("model overloaded".to_string()));
        assert_eq!(wizard.step(), WizardStep::Upload);
        assert!(!wizard.is_analyzing());
        assert_eq!(
            wizard.error(),
            Some("document analysis failed: model overloaded")
        );
        assert!(wizard.analysis().is_none());
    }

    #[test]
    fn second_dispatch_is_refused_while_analysing() {
        let mut wizard = WizardState::default();
        wizard.set_file(Some(pdf())).unwrap();
        let ticket = wizard.begin_analysis(None).expect("first dispatch");
        assert_eq!(wizard.step(), WizardStep::Processing);
        assert!(!wizard.can_proceed());
        assert_eq!(
            wizard.begin_analysis(None).unwrap_err(),
            CoreError::Busy {
                operation: "analysis"
            }
        );
        assert!(wizard.set_file(None).is_err());

        assert!(wizard.complete_analysis(&ticket, Ok(sample())));
        assert_eq!(wizard.step(), WizardStep::ReviewExercises);
    }

    #[test]
    fn outcome_dispatched_before_reset_is_dropped() {
        let mut wizard = WizardState::default();
        wizard.set_file(Some(pdf())).unwrap();
        let ticket = wizard.begin_analysis(None).unwrap();
        wizard.reset();

        assert!(!wizard.complete_analysis(&ticket, Ok(sample())));
        assert!(wizard.analysis().is_none());
        assert_eq!(wizard.step(), WizardStep::Upload);
        assert!(!wizard.is_analyzing());
    }

    #[tokio::test]
    async fn reset_during_import_frees_the_wizard() {
        let mut wizard = analysed().await;
        wizard.go_next();
        let ticket = wizard.begin_import().expect("import dispatch");
        assert!(wizard.is_importing());

        wizard.reset();
        assert!(!wizard.is_importing());
        assert!(!wizard.complete_import(&ticket, Ok(ok_result())));
        assert!(wizard.import_result().is_none());

        wizard.set_file(Some(pdf())).unwrap();
        assert!(wizard.begin_analysis(None).is_ok());
    }

    #[tokio::test]
    async fn new_file_clears_downstream_state_but_not_step() {
        let mut wizard = analysed().await;
        wizard.go_next();
        wizard
            .set_file(Some(DocumentFile::new("other.png", None, vec![1, 2])))
            .unwrap();

        assert_eq!(wizard.step(), WizardStep::ReviewSets);
        assert!(wizard.analysis().is_none());
        assert!(wizard.decisions().exercises.is_empty());
        assert!(wizard.import_result().is_none());
    }

    #[tokio::test]
    async fn review_exercises_blocks_when_everything_is_skipped() {
        let mut wizard = analysed().await;
        wizard.set_all_exercises_skip().unwrap();
        assert!(!wizard.can_proceed());
        wizard.set_exercise_action("e3", ExerciseAction::Create).unwrap();
        assert!(wizard.can_proceed());
    }

    #[tokio::test]
    async fn import_success_moves_to_summary() {
        let mut wizard = analysed().await;
        wizard.set_selected_patient(Some("patient-7".to_string()));
        wizard.set_assign_sets_to_patient(true);
        wizard.go_next();

        let backend = RecordingBackend::new(Ok(ok_result()));
        wizard.execute_import(&backend).await.expect("import succeeds");

        assert_eq!(wizard.step(), WizardStep::Summary);
        assert!(!wizard.is_importing());
        assert!(wizard.can_proceed());
        let sent = backend.requests.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].assign_to_patient);
        assert_eq!(sent[0].clinical_notes_to_create.len(), 2);
    }

    #[tokio::test]
    async fn partial_import_still_reaches_summary() {
        let mut wizard = analysed().await;
        wizard.go_next();
        let backend = RecordingBackend::new(Ok(ImportResult {
            success: true,
            imported_count: 4,
            failed_count: 1,
            errors: vec![ImportItemError {
                temp_id: Some("e5".to_string()),
                kind: None,
                message: "name already exists".to_string(),
            }],
            ..Default::default()
        }));
        wizard.execute_import(&backend).await.unwrap();

        assert_eq!(wizard.step(), WizardStep::Summary);
        assert_eq!(wizard.import_result().map(|r| r.failed_count), Some(1));
        assert!(wizard.error().is_none());
    }

    #[tokio::test]
    async fn transport_failure_stays_on_review_sets_and_keeps_decisions() {
        let mut wizard = analysed().await;
        wizard.set_exercise_action("e3", ExerciseAction::Skip).unwrap();
        wizard.go_next();
        let before = wizard.decisions().clone();

        let backend = RecordingBackend::new(Err(BoundaryError::new("backend unreachable")));
        let err = wizard.execute_import(&backend).await.unwrap_err();

        assert!(matches!(err, CoreError::Transport(_)));
        assert_eq!(wizard.step(), WizardStep::ReviewSets);
        assert!(!wizard.is_importing());
        assert!(wizard.error().is_some());
        assert_eq!(wizard.decisions(), &before);

        let retry = RecordingBackend::new(Ok(ok_result()));
        wizard.execute_import(&retry).await.expect("retry succeeds");
        assert_eq!(wizard.step(), WizardStep::Summary);
        assert!(wizard.error().is_none());
    }

    #[tokio::test]
    async fn failed_summary_cannot_proceed() {
        let mut wizard = analysed().await;
        let backend = RecordingBackend::new(Ok(ImportResult {
            success: false,
            failed_count: 6,
            ..Default::default()
        }));
        wizard.execute_import(&backend).await.unwrap();
        assert_eq!(wizard.step(), WizardStep::Summary);
        assert!(!wizard.can_proceed());
    }

    #[tokio::test]
    async fn import_request_reflects_latest_decisions() {
        let mut wizard = analysed().await;
        wizard.set_exercise_action("e4", ExerciseAction::Skip).unwrap();
        let ticket = wizard.begin_import().expect("dispatch");
        assert!(wizard.begin_import().is_err());
        wizard.set_exercise_action("e1", ExerciseAction::Skip).unwrap();

        assert!(
            ticket
                .request
                .exercise_sets_to_create
                .iter()
                .all(|s| s.temp_id != "s2")
        );
        assert!(ticket.request.exercises_to_reuse.contains_key("e1"));
        assert!(wizard.complete_import(&ticket, Ok(ok_result())));
    }

    #[test]
    fn decisions_require_an_analysis() {
        let mut wizard = WizardState::default();
        assert_eq!(
            wizard.set_exercise_action("e1", ExerciseAction::Skip),
            Err(CoreError::NoAnalysis)
        );
        assert_eq!(wizard.build_request(), Err(CoreError::NoAnalysis));
        assert!(wizard.filtered_exercises().is_empty());
        assert_eq!(wizard.stats(), ImportStats::default());
    }

    #[tokio::test]
    async fn actions_replay_through_reducer() {
        let mut wizard = analysed().await;
        let actions: Vec<WizardAction> = serde_json::from_value(serde_json::json!([
            { "type": "set_exercise_action", "tempId": "e1", "action": "skip" },
            { "type": "set_exercise_action", "tempId": "e5", "action": "create" },
            { "type": "use_all_matched_exercises" },
            { "type": "set_exercise_filter", "filter": "reuse" },
            { "type": "select_patient", "patientId": "patient-1" },
            { "type": "edit_clinical_note", "tempId": "n1", "content": "Edited" },
            { "type": "next" }
        ]))
        .expect("actions parse");
        for action in actions {
            wizard.apply(action).expect("action applies");
        }

        assert_eq!(
            wizard.decisions().exercise_action("e1"),
            ExerciseAction::Skip
        );
        assert_eq!(
            wizard.decisions().exercise_action("e5"),
            ExerciseAction::Create
        );
        assert_eq!(
            wizard.decisions().exercises["e2"].reuse_exercise_id.as_deref(),
            Some("ex-200")
        );
        let filtered: Vec<&str> = wizard
            .filtered_exercises()
            .into_iter()
            .map(|e| e.temp_id.as_str())
            .collect();
        assert_eq!(filtered, vec!["e2"]);
        assert_eq!(wizard.selected_patient_id(), Some("patient-1"));
        assert_eq!(wizard.step(), WizardStep::ReviewSets);

        let request = wizard.build_request().unwrap();
        assert_eq!(request.clinical_notes_to_create[0].content, "Edited");
    }

    #[tokio::test]
    async fn reset_returns_to_initial_state() {
        let mut wizard = analysed().await;
        wizard.set_selected_patient(Some("patient-1".to_string()));
        wizard.apply(WizardAction::Reset).unwrap();

        let fresh = WizardState::default().snapshot();
        assert_eq!(wizard.snapshot(), fresh);
    }

    #[tokio::test]
    async fn snapshot_exposes_stats_and_readiness() {
        let wizard = analysed().await;
        let snapshot = serde_json::to_value(wizard.snapshot()).unwrap();
        assert_eq!(snapshot["step"], "review-exercises");
        assert_eq!(snapshot["stats"]["exercises"]["reuse"], 1);
        assert_eq!(snapshot["canProceed"], true);
        assert_eq!(snapshot["file"]["fileName"], "plan.pdf");
    }

    #[test]
    fn resume_derives_or_keeps_decisions() {
        let wizard = WizardState::resume(ReconcileConfig::default(), sample(), None)
            .expect("valid analysis resumes");
        assert_eq!(wizard.step(), WizardStep::ReviewExercises);
        assert_eq!(wizard.decisions().exercise_action("e1"), ExerciseAction::Reuse);

        let mut saved = wizard.decisions().clone();
        saved
            .set_exercise_action(wizard.analysis().unwrap(), "e1", ExerciseAction::Skip)
            .unwrap();
        let resumed = WizardState::resume(ReconcileConfig::default(), sample(), Some(saved))
            .expect("valid analysis resumes");
        assert_eq!(resumed.decisions().exercise_action("e1"), ExerciseAction::Skip);
        assert!(resumed.can_proceed());
    }

    #[test]
    fn resume_rejects_decisions_from_another_analysis() {
        let mut bogus_target = DecisionModel::default();
        bogus_target
            .exercises
            .insert("e3".to_string(), ExerciseDecision::reuse("e3", "ex-bogus"));
        let err = WizardState::resume(ReconcileConfig::default(), sample(), Some(bogus_target))
            .expect_err("unknown candidate must fail");
        assert!(matches!(err, CoreError::UnknownCandidate { .. }));

        let mut ghost = DecisionModel::default();
        ghost
            .exercises
            .insert("ghost".to_string(), ExerciseDecision::create("ghost"));
        let err = WizardState::resume(ReconcileConfig::default(), sample(), Some(ghost))
            .expect_err("unknown temp id must fail");
        assert!(matches!(err, CoreError::UnknownTempId { .. }));
    }

    #[test]
    fn resume_rejects_invalid_analysis() {
        let mut analysis = sample();
        analysis.exercise_sets.push(analysis.exercise_sets[0].clone());
        let err = WizardState::resume(ReconcileConfig::default(), analysis, None)
            .expect_err("duplicate set ids must fail");
        assert!(matches!(err, CoreError::InvalidAnalysis(_)));
    }
}

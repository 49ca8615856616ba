//! Offline reconciliation over saved analysis files. No network access.

use clap::{Args, Subcommand};
use physio_core::analysis::{AnalysisResult, ExtractedExercise};
use physio_core::config::ReconcileConfig;
use physio_core::decisions::DecisionModel;
use physio_core::filter::ExerciseFilter;
use physio_core::heuristic::initial_decisions;
use physio_core::wizard::{WizardAction, WizardState};
use serde::Serialize;

use crate::util::{exit_error, print_json, read_typed};

#[derive(Subcommand)]
pub enum ReconcileCommands {
    /// Initial decisions the auto-resolution step picks for an analysis
    Defaults {
        #[command(flatten)]
        input: ReconcileInput,
    },
    /// Create/reuse/skip counts
    Stats {
        #[command(flatten)]
        input: ReconcileInput,
    },
    /// Extracted exercises through a review filter
    Exercises {
        #[command(flatten)]
        input: ReconcileInput,
        /// all, create, reuse, skip or matched
        #[arg(long, default_value = "all")]
        filter: ExerciseFilter,
    },
    /// Build the import request the backend would receive
    Build {
        #[command(flatten)]
        input: ReconcileInput,
        /// Patient the import is for
        #[arg(long)]
        patient_id: Option<String>,
        /// Assign created exercise sets to the patient
        #[arg(long)]
        assign_sets: bool,
    },
}

#[derive(Args)]
pub struct ReconcileInput {
    /// Analysis result JSON (use '-' for stdin)
    #[arg(long)]
    analysis: String,
    /// Saved decision model JSON. Defaults to the auto-resolved decisions.
    #[arg(long)]
    decisions: Option<String>,
    /// JSON array of wizard actions replayed on top of the decisions
    #[arg(long)]
    actions: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExercisesOutput<'a> {
    filter: ExerciseFilter,
    count: usize,
    exercises: Vec<&'a ExtractedExercise>,
}

pub fn run(config: ReconcileConfig, command: ReconcileCommands) -> i32 {
    match command {
        ReconcileCommands::Defaults { input } => {
            let analysis = load_analysis(&input.analysis);
            print_json(&initial_decisions(&analysis, &config))
        }
        ReconcileCommands::Stats { input } => {
            let wizard = load_wizard(config, &input);
            print_json(&wizard.stats())
        }
        ReconcileCommands::Exercises { input, filter } => {
            let wizard = load_wizard(config, &input);
            let exercises = wizard.exercises_matching(filter);
            print_json(&ExercisesOutput {
                filter,
                count: exercises.len(),
                exercises,
            })
        }
        ReconcileCommands::Build {
            input,
            patient_id,
            assign_sets,
        } => {
            let mut wizard = load_wizard(config, &input);
            wizard.set_selected_patient(patient_id);
            wizard.set_assign_sets_to_patient(assign_sets);
            match wizard.build_request() {
                Ok(request) => print_json(&request),
                Err(e) => exit_error(&e.to_string(), None),
            }
        }
    }
}

fn load_analysis(path: &str) -> AnalysisResult {
    let analysis: AnalysisResult = read_typed(path, "analysis result").unwrap_or_else(|e| {
        exit_error(
            &e,
            Some("Pass the JSON returned by the document analysis service."),
        )
    });
    if let Err(e) = analysis.validate() {
        exit_error(&e.to_string(), None);
    }
    analysis
}

fn load_wizard(config: ReconcileConfig, input: &ReconcileInput) -> WizardState {
    let analysis = load_analysis(&input.analysis);
    let decisions = input.decisions.as_deref().map(|path| {
        read_typed::<DecisionModel>(path, "decision model")
            .unwrap_or_else(|e| exit_error(&e, None))
    });
    let actions = input
        .actions
        .as_deref()
        .map(|path| {
            read_typed::<Vec<WizardAction>>(path, "action list").unwrap_or_else(|e| {
                exit_error(
                    &e,
                    Some(r#"Actions look like {"type":"set_exercise_action","tempId":"e1","action":"skip"}."#),
                )
            })
        })
        .unwrap_or_default();

    match replay(config, analysis, decisions, actions) {
        Ok(wizard) => wizard,
        Err(e) => exit_error(&e, None),
    }
}

fn replay(
    config: ReconcileConfig,
    analysis: AnalysisResult,
    decisions: Option<DecisionModel>,
    actions: Vec<WizardAction>,
) -> Result<WizardState, String> {
    let mut wizard =
        WizardState::resume(config, analysis, decisions).map_err(|e| e.to_string())?;
    for (index, action) in actions.into_iter().enumerate() {
        wizard
            .apply(action)
            .map_err(|e| format!("action {index} failed: {e}"))?;
    }
    Ok(wizard)
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::analysis::{AnalysisResult, ExtractedExercise, ExtractedSet};
use crate::config::ReconcileConfig;
use crate::decisions::{DecisionModel, EntityAction, ExerciseAction, ExerciseDecision};

/// Write request for the persistence backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub exercises_to_create: Vec<ExerciseImportItem>,
    /// Exercise temp id -> existing catalog exercise id
    pub exercises_to_reuse: BTreeMap<String, String>,
    pub exercise_sets_to_create: Vec<ExerciseSetImportItem>,
    pub clinical_notes_to_create: Vec<ClinicalNoteImportItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    pub assign_to_patient: bool,
}

impl ImportRequest {
    /// Number of entities the backend will attempt to write.
    pub fn item_count(&self) -> usize {
        self.exercises_to_create.len()
            + self.exercise_sets_to_create.len()
            + self.clinical_notes_to_create.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0 && self.exercises_to_reuse.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseImportItem {
    pub temp_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub exercise_type: Option<String>,
    pub sets: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_sets: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_reps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<String>,
    pub tag_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseSetImportItem {
    pub temp_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub exercises: Vec<SetExerciseEntry>,
}

/// Reference from a set to an exercise that is either created or reused
/// by the same request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetExerciseEntry {
    pub exercise_temp_id: String,
    /// 1-based position within the set
    pub order: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalNoteImportItem {
    pub temp_id: String,
    #[serde(rename = "type")]
    pub note_type: String,
    pub title: String,
    pub content: String,
}

/// What an exercise turns into on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExerciseResolution<'a> {
    Create,
    Reuse(&'a str),
    Skip,
}

/// Resolve an exercise decision. A reuse decision without a candidate id
/// cannot be honoured and resolves to create.
pub fn resolve_exercise(decision: Option<&ExerciseDecision>) -> ExerciseResolution<'_> {
    let Some(decision) = decision else {
        return ExerciseResolution::Create;
    };
    match (decision.action, decision.reuse_exercise_id.as_deref()) {
        (ExerciseAction::Skip, _) => ExerciseResolution::Skip,
        (ExerciseAction::Reuse, Some(id)) => ExerciseResolution::Reuse(id),
        (ExerciseAction::Reuse, None) | (ExerciseAction::Create, _) => ExerciseResolution::Create,
    }
}

/// Adjacency step of the set -> exercise reference graph: the set's exercise
/// references that survive `is_live`, renumbered 1..n in their original
/// relative order.
pub fn live_exercise_refs(
    set: &ExtractedSet,
    is_live: impl Fn(&str) -> bool,
) -> Vec<SetExerciseEntry> {
    set.exercise_temp_ids
        .iter()
        .filter(|temp_id| is_live(temp_id.as_str()))
        .enumerate()
        .map(|(index, temp_id)| SetExerciseEntry {
            exercise_temp_id: temp_id.clone(),
            order: index as u32 + 1,
        })
        .collect()
}

/// Build the backend write request from the analysis and current decisions.
///
/// Pure: the same inputs always produce the same request. Every exercise a
/// set references in the output is present in either `exercisesToCreate` or
/// `exercisesToReuse`; sets left without exercises are omitted. Notes are
/// only included when a patient is selected, and assignment requires one too.
pub fn build_import_request(
    analysis: &AnalysisResult,
    decisions: &DecisionModel,
    patient_id: Option<&str>,
    assign_sets_to_patient: bool,
    config: &ReconcileConfig,
) -> ImportRequest {
    let patient_id = patient_id.map(str::trim).filter(|id| !id.is_empty());

    let mut exercises_to_create = Vec::new();
    let mut exercises_to_reuse = BTreeMap::new();
    for exercise in &analysis.exercises {
        let decision = decisions.exercises.get(&exercise.temp_id);
        match resolve_exercise(decision) {
            ExerciseResolution::Skip => {}
            ExerciseResolution::Reuse(existing_id) => {
                exercises_to_reuse.insert(exercise.temp_id.clone(), existing_id.to_string());
            }
            ExerciseResolution::Create => {
                if decision.is_some_and(|d| d.action == ExerciseAction::Reuse) {
                    tracing::warn!(
                        temp_id = %exercise.temp_id,
                        "reuse decision without candidate id, treating as create"
                    );
                }
                exercises_to_create.push(exercise_item(exercise, decision, config));
            }
        }
    }

    let is_live = |temp_id: &str| {
        analysis.exercise(temp_id).is_some()
            && resolve_exercise(decisions.exercises.get(temp_id)) != ExerciseResolution::Skip
    };

    let mut exercise_sets_to_create = Vec::new();
    for set in &analysis.exercise_sets {
        let decision = decisions.exercise_sets.get(&set.temp_id);
        if decision.map(|d| d.action) == Some(EntityAction::Skip) {
            continue;
        }
        let exercises = live_exercise_refs(set, &is_live);
        if exercises.is_empty() {
            tracing::debug!(temp_id = %set.temp_id, "dropping set without live exercises");
            continue;
        }
        exercise_sets_to_create.push(ExerciseSetImportItem {
            temp_id: set.temp_id.clone(),
            name: decision
                .and_then(|d| d.edited_name.clone())
                .unwrap_or_else(|| set.name.clone()),
            description: decision
                .and_then(|d| d.edited_description.clone())
                .or_else(|| set.description.clone()),
            exercises,
        });
    }

    let clinical_notes_to_create = match patient_id {
        Some(_) => analysis
            .clinical_notes
            .iter()
            .filter_map(|note| {
                let decision = decisions.clinical_notes.get(&note.temp_id);
                if decision.map(|d| d.action) == Some(EntityAction::Skip) {
                    return None;
                }
                Some(ClinicalNoteImportItem {
                    temp_id: note.temp_id.clone(),
                    note_type: note.note_type.clone(),
                    title: note.title.clone(),
                    content: decision
                        .and_then(|d| d.edited_content.clone())
                        .unwrap_or_else(|| note.content.clone()),
                })
            })
            .collect(),
        None => Vec::new(),
    };

    let request = ImportRequest {
        exercises_to_create,
        exercises_to_reuse,
        exercise_sets_to_create,
        clinical_notes_to_create,
        patient_id: patient_id.map(str::to_string),
        assign_to_patient: assign_sets_to_patient && patient_id.is_some(),
    };

    tracing::debug!(
        create = request.exercises_to_create.len(),
        reuse = request.exercises_to_reuse.len(),
        sets = request.exercise_sets_to_create.len(),
        notes = request.clinical_notes_to_create.len(),
        assign = request.assign_to_patient,
        "built import request"
    );
    request
}

fn exercise_item(
    exercise: &ExtractedExercise,
    decision: Option<&ExerciseDecision>,
    config: &ReconcileConfig,
) -> ExerciseImportItem {
    let edits = decision.and_then(|d| d.edited_data.as_ref());

    ExerciseImportItem {
        temp_id: exercise.temp_id.clone(),
        name: edits
            .and_then(|e| e.name.clone())
            .unwrap_or_else(|| exercise.name.clone()),
        description: edits
            .and_then(|e| e.description.clone())
            .or_else(|| exercise.description.clone()),
        exercise_type: edits
            .and_then(|e| e.exercise_type.clone())
            .or_else(|| exercise.exercise_type.clone()),
        sets: edits
            .and_then(|e| e.sets)
            .or(exercise.sets)
            .unwrap_or(config.default_exercise_sets),
        reps: edits.and_then(|e| e.reps).or(exercise.reps),
        duration: edits.and_then(|e| e.duration).or(exercise.duration),
        rest_sets: edits.and_then(|e| e.rest_sets).or(exercise.rest_sets),
        rest_reps: edits.and_then(|e| e.rest_reps).or(exercise.rest_reps),
        side: edits
            .and_then(|e| e.side.clone())
            .or_else(|| exercise.side.clone()),
        tag_ids: edits
            .and_then(|e| e.tag_ids.clone())
            .unwrap_or_else(|| exercise.suggested_tag_ids.clone()),
        notes: edits
            .and_then(|e| e.notes.clone())
            .or_else(|| exercise.notes.clone()),
    }
}

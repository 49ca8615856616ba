use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{CoreError, Result};

/// Kind of extracted entity. Each kind has its own temp-id namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Exercise,
    ExerciseSet,
    ClinicalNote,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Exercise => "exercise",
            EntityKind::ExerciseSet => "exercise set",
            EntityKind::ClinicalNote => "clinical note",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot returned by the document analysis service.
/// Never mutated after it is received; a new upload replaces it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(default)]
    pub document_info: DocumentInfo,
    #[serde(default)]
    pub exercises: Vec<ExtractedExercise>,
    #[serde(default)]
    pub exercise_sets: Vec<ExtractedSet>,
    #[serde(default)]
    pub clinical_notes: Vec<ExtractedNote>,
    /// Exercise temp id -> candidates from the existing catalog, best first
    #[serde(default)]
    pub match_suggestions: BTreeMap<String, Vec<MatchCandidate>>,
}

/// Display-only metadata recognised in the document header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub therapist_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedExercise {
    pub temp_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form exercise type (e.g. "strength", "mobility", "balance")
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub exercise_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sets: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reps: Option<u32>,
    /// Hold or work duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    /// Rest between sets in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_sets: Option<u32>,
    /// Rest between repetitions in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_reps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<String>,
    #[serde(default)]
    pub suggested_tag_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedSet {
    pub temp_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered references into `AnalysisResult::exercises`
    #[serde(default)]
    pub exercise_temp_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedNote {
    pub temp_id: String,
    #[serde(rename = "type")]
    pub note_type: String,
    pub title: String,
    pub content: String,
}

/// An existing catalog exercise proposed for an extracted exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub existing_exercise_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_exercise_name: Option<String>,
    /// Similarity in [0, 1]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_reason: Option<String>,
}

impl AnalysisResult {
    pub fn exercise(&self, temp_id: &str) -> Option<&ExtractedExercise> {
        self.exercises.iter().find(|e| e.temp_id == temp_id)
    }

    pub fn exercise_set(&self, temp_id: &str) -> Option<&ExtractedSet> {
        self.exercise_sets.iter().find(|s| s.temp_id == temp_id)
    }

    pub fn clinical_note(&self, temp_id: &str) -> Option<&ExtractedNote> {
        self.clinical_notes.iter().find(|n| n.temp_id == temp_id)
    }

    pub fn suggestions(&self, temp_id: &str) -> &[MatchCandidate] {
        self.match_suggestions
            .get(temp_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// First candidate as ordered by the analysis service. The order is
    /// authoritative; ties are not re-sorted here.
    pub fn best_match(&self, temp_id: &str) -> Option<&MatchCandidate> {
        self.suggestions(temp_id).first()
    }

    pub fn has_match(&self, temp_id: &str) -> bool {
        !self.suggestions(temp_id).is_empty()
    }

    pub fn candidate(&self, temp_id: &str, existing_exercise_id: &str) -> Option<&MatchCandidate> {
        self.suggestions(temp_id)
            .iter()
            .find(|c| c.existing_exercise_id == existing_exercise_id)
    }

    pub fn contains(&self, kind: EntityKind, temp_id: &str) -> bool {
        match kind {
            EntityKind::Exercise => self.exercise(temp_id).is_some(),
            EntityKind::ExerciseSet => self.exercise_set(temp_id).is_some(),
            EntityKind::ClinicalNote => self.clinical_note(temp_id).is_some(),
        }
    }

    /// Reject results that would make temp-id lookups ambiguous or carry
    /// confidences outside [0, 1].
    ///
    /// Set references to unknown exercise temp ids are accepted; they never
    /// resolve and are dropped when the request is built.
    pub fn validate(&self) -> Result<()> {
        ensure_unique(EntityKind::Exercise, self.exercises.iter().map(|e| &e.temp_id))?;
        ensure_unique(
            EntityKind::ExerciseSet,
            self.exercise_sets.iter().map(|s| &s.temp_id),
        )?;
        ensure_unique(
            EntityKind::ClinicalNote,
            self.clinical_notes.iter().map(|n| &n.temp_id),
        )?;

        for (temp_id, candidates) in &self.match_suggestions {
            for candidate in candidates {
                if !candidate.confidence.is_finite()
                    || !(0.0..=1.0).contains(&candidate.confidence)
                {
                    return Err(CoreError::InvalidAnalysis(format!(
                        "match suggestion '{}' for exercise '{}' has confidence {} outside [0, 1]",
                        candidate.existing_exercise_id, temp_id, candidate.confidence
                    )));
                }
            }
        }
        Ok(())
    }
}

fn ensure_unique<'a>(kind: EntityKind, ids: impl Iterator<Item = &'a String>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(CoreError::InvalidAnalysis(format!(
                "duplicate {kind} temp id '{id}'"
            )));
        }
    }
    Ok(())
}

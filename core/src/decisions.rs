use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::analysis::{AnalysisResult, EntityKind};
use crate::error::{CoreError, Result};

/// Disposition of an extracted exercise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseAction {
    #[default]
    Create,
    Reuse,
    Skip,
}

/// Disposition of an extracted exercise set or clinical note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntityAction {
    #[default]
    Create,
    Skip,
}

/// Operator overrides for an exercise that will be created.
/// `None` fields fall back to the extracted value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseEdits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub exercise_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sets: Option<u32>,
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseDecision {
    pub temp_id: String,
    pub action: ExerciseAction,
    /// Present iff `action` is `Reuse`; one of the exercise's match candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse_exercise_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_data: Option<ExerciseEdits>,
}

impl ExerciseDecision {
    pub fn create(temp_id: impl Into<String>) -> Self {
        Self {
            temp_id: temp_id.into(),
            action: ExerciseAction::Create,
            reuse_exercise_id: None,
            edited_data: None,
        }
    }

    pub fn skip(temp_id: impl Into<String>) -> Self {
        Self {
            action: ExerciseAction::Skip,
            ..Self::create(temp_id)
        }
    }

    pub fn reuse(temp_id: impl Into<String>, existing_exercise_id: impl Into<String>) -> Self {
        Self {
            action: ExerciseAction::Reuse,
            reuse_exercise_id: Some(existing_exercise_id.into()),
            ..Self::create(temp_id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseSetDecision {
    pub temp_id: String,
    pub action: EntityAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_description: Option<String>,
}

impl ExerciseSetDecision {
    pub fn create(temp_id: impl Into<String>) -> Self {
        Self {
            temp_id: temp_id.into(),
            action: EntityAction::Create,
            edited_name: None,
            edited_description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalNoteDecision {
    pub temp_id: String,
    pub action: EntityAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_content: Option<String>,
}

impl ClinicalNoteDecision {
    pub fn create(temp_id: impl Into<String>) -> Self {
        Self {
            temp_id: temp_id.into(),
            action: EntityAction::Create,
            edited_content: None,
        }
    }
}

/// Per-kind decision maps keyed by temp id.
///
/// A temp id with no entry reads as `Create`, the same default the
/// auto-resolution step would pick for an unmatched entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DecisionModel {
    #[serde(default)]
    pub exercises: BTreeMap<String, ExerciseDecision>,
    #[serde(default)]
    pub exercise_sets: BTreeMap<String, ExerciseSetDecision>,
    #[serde(default)]
    pub clinical_notes: BTreeMap<String, ClinicalNoteDecision>,
}

impl DecisionModel {
    pub fn exercise_action(&self, temp_id: &str) -> ExerciseAction {
        self.exercises
            .get(temp_id)
            .map(|d| d.action)
            .unwrap_or_default()
    }

    pub fn exercise_set_action(&self, temp_id: &str) -> EntityAction {
        self.exercise_sets
            .get(temp_id)
            .map(|d| d.action)
            .unwrap_or_default()
    }

    pub fn clinical_note_action(&self, temp_id: &str) -> EntityAction {
        self.clinical_notes
            .get(temp_id)
            .map(|d| d.action)
            .unwrap_or_default()
    }

    /// Change an exercise's action. `Reuse` selects the best candidate; use
    /// [`DecisionModel::reuse_exercise`] to pick a different one.
    pub fn set_exercise_action(
        &mut self,
        analysis: &AnalysisResult,
        temp_id: &str,
        action: ExerciseAction,
    ) -> Result<()> {
        ensure_known(analysis, EntityKind::Exercise, temp_id)?;
        match action {
            ExerciseAction::Reuse => {
                let best = analysis.best_match(temp_id).ok_or_else(|| {
                    CoreError::NoMatchSuggestion {
                        temp_id: temp_id.to_string(),
                    }
                })?;
                let id = best.existing_exercise_id.clone();
                self.reuse_exercise(analysis, temp_id, &id)
            }
            ExerciseAction::Create | ExerciseAction::Skip => {
                let decision = self.exercise_entry(temp_id);
                decision.action = action;
                decision.reuse_exercise_id = None;
                Ok(())
            }
        }
    }

    /// Map an exercise onto one of its suggested catalog exercises.
    pub fn reuse_exercise(
        &mut self,
        analysis: &AnalysisResult,
        temp_id: &str,
        existing_exercise_id: &str,
    ) -> Result<()> {
        ensure_known(analysis, EntityKind::Exercise, temp_id)?;
        if analysis.candidate(temp_id, existing_exercise_id).is_none() {
            return Err(CoreError::UnknownCandidate {
                temp_id: temp_id.to_string(),
                existing_exercise_id: existing_exercise_id.to_string(),
            });
        }
        let decision = self.exercise_entry(temp_id);
        decision.action = ExerciseAction::Reuse;
        decision.reuse_exercise_id = Some(existing_exercise_id.to_string());
        Ok(())
    }

    /// Replace the operator's field overrides; `None` clears them.
    pub fn edit_exercise(
        &mut self,
        analysis: &AnalysisResult,
        temp_id: &str,
        edits: Option<ExerciseEdits>,
    ) -> Result<()> {
        ensure_known(analysis, EntityKind::Exercise, temp_id)?;
        self.exercise_entry(temp_id).edited_data = edits;
        Ok(())
    }

    pub fn set_exercise_set_action(
        &mut self,
        analysis: &AnalysisResult,
        temp_id: &str,
        action: EntityAction,
    ) -> Result<()> {
        ensure_known(analysis, EntityKind::ExerciseSet, temp_id)?;
        self.exercise_set_entry(temp_id).action = action;
        Ok(())
    }

    pub fn edit_exercise_set(
        &mut self,
        analysis: &AnalysisResult,
        temp_id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<()> {
        ensure_known(analysis, EntityKind::ExerciseSet, temp_id)?;
        let decision = self.exercise_set_entry(temp_id);
        decision.edited_name = name;
        decision.edited_description = description;
        Ok(())
    }

    pub fn set_clinical_note_action(
        &mut self,
        analysis: &AnalysisResult,
        temp_id: &str,
        action: EntityAction,
    ) -> Result<()> {
        ensure_known(analysis, EntityKind::ClinicalNote, temp_id)?;
        self.clinical_note_entry(temp_id).action = action;
        Ok(())
    }

    pub fn edit_clinical_note(
        &mut self,
        analysis: &AnalysisResult,
        temp_id: &str,
        content: Option<String>,
    ) -> Result<()> {
        ensure_known(analysis, EntityKind::ClinicalNote, temp_id)?;
        self.clinical_note_entry(temp_id).edited_content = content;
        Ok(())
    }

    /// Check a decision model loaded from outside the mutators against the
    /// analysis it belongs to.
    ///
    /// Every key must name an extracted entity and every reuse target must be
    /// one of that exercise's candidates. A `Reuse` without a target is left
    /// alone; the request builder treats it as `Create`.
    pub fn validate(&self, analysis: &AnalysisResult) -> Result<()> {
        for (temp_id, decision) in &self.exercises {
            ensure_known(analysis, EntityKind::Exercise, temp_id)?;
            if decision.action != ExerciseAction::Reuse {
                continue;
            }
            if let Some(existing_exercise_id) = decision.reuse_exercise_id.as_deref() {
                if analysis.candidate(temp_id, existing_exercise_id).is_none() {
                    return Err(CoreError::UnknownCandidate {
                        temp_id: temp_id.clone(),
                        existing_exercise_id: existing_exercise_id.to_string(),
                    });
                }
            }
        }
        for temp_id in self.exercise_sets.keys() {
            ensure_known(analysis, EntityKind::ExerciseSet, temp_id)?;
        }
        for temp_id in self.clinical_notes.keys() {
            ensure_known(analysis, EntityKind::ClinicalNote, temp_id)?;
        }
        Ok(())
    }

    fn exercise_entry(&mut self, temp_id: &str) -> &mut ExerciseDecision {
        self.exercises
            .entry(temp_id.to_string())
            .or_insert_with(|| ExerciseDecision::create(temp_id))
    }

    fn exercise_set_entry(&mut self, temp_id: &str) -> &mut ExerciseSetDecision {
        self.exercise_sets
            .entry(temp_id.to_string())
            .or_insert_with(|| ExerciseSetDecision::create(temp_id))
    }

    fn clinical_note_entry(&mut self, temp_id: &str) -> &mut ClinicalNoteDecision {
        self.clinical_notes
            .entry(temp_id.to_string())
            .or_insert_with(|| ClinicalNoteDecision::create(temp_id))
    }
}

fn ensure_known(analysis: &AnalysisResult, kind: EntityKind, temp_id: &str) -> Result<()> {
    if analysis.contains(kind, temp_id) {
        Ok(())
    } else {
        Err(CoreError::UnknownTempId {
            kind,
            temp_id: temp_id.to_string(),
        })
    }
}

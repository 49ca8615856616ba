use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::analysis::AnalysisResult;
use crate::decisions::{DecisionModel, EntityAction};
use crate::request::{ExerciseResolution, resolve_exercise};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseCounts {
    pub create: usize,
    pub reuse: usize,
    pub skip: usize,
    /// Exercises with at least one match suggestion, whatever their action
    pub matched: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityCounts {
    pub create: usize,
    pub skip: usize,
    pub total: usize,
}

/// Decision counts for the review screens.
///
/// Exercises are classified the way the import request resolves them.
/// Counted over the extracted entities, so `create + reuse + skip == total`
/// (and `create + skip == total` for sets and notes) holds for any map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportStats {
    pub exercises: ExerciseCounts,
    pub exercise_sets: EntityCounts,
    pub clinical_notes: EntityCounts,
}

impl ImportStats {
    pub fn compute(analysis: &AnalysisResult, decisions: &DecisionModel) -> Self {
        let mut exercises = ExerciseCounts::default();
        for exercise in &analysis.exercises {
            match resolve_exercise(decisions.exercises.get(&exercise.temp_id)) {
                ExerciseResolution::Create => exercises.create += 1,
                ExerciseResolution::Reuse(_) => exercises.reuse += 1,
                ExerciseResolution::Skip => exercises.skip += 1,
            }
            if analysis.has_match(&exercise.temp_id) {
                exercises.matched += 1;
            }
            exercises.total += 1;
        }

        let exercise_sets = count_entities(
            analysis
                .exercise_sets
                .iter()
                .map(|s| decisions.exercise_set_action(&s.temp_id)),
        );
        let clinical_notes = count_entities(
            analysis
                .clinical_notes
                .iter()
                .map(|n| decisions.clinical_note_action(&n.temp_id)),
        );

        Self {
            exercises,
            exercise_sets,
            clinical_notes,
        }
    }

    /// At least one exercise will be created or reused.
    pub fn has_importable_exercises(&self) -> bool {
        self.exercises.create + self.exercises.reuse > 0
    }
}

fn count_entities(actions: impl Iterator<Item = EntityAction>) -> EntityCounts {
    actions.fold(EntityCounts::default(), |mut counts, action| {
        match action {
            EntityAction::Create => counts.create += 1,
            EntityAction::Skip => counts.skip += 1,
        }
        counts.total += 1;
        counts
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fixtures::sample;
    use crate::config::ReconcileConfig;
    use crate::decisions::{ExerciseAction, ExerciseDecision};
    use crate::heuristic::initial_decisions;
    use crate::request::build_import_request;

    #[test]
    fn default_decisions_are_counted() {
        let analysis = sample();
        let decisions = initial_decisions(&analysis, &ReconcileConfig::default());
        let stats = ImportStats::compute(&analysis, &decisions);

        assert_eq!(
            stats.exercises,
            ExerciseCounts {
                create: 4,
                reuse: 1,
                skip: 0,
                matched: 2,
                total: 5,
            }
        );
        assert_eq!(stats.exercise_sets.create, 2);
        assert_eq!(stats.clinical_notes.total, 2);
        assert!(stats.has_importable_exercises());
    }

    #[test]
    fn counts_reconcile_even_with_missing_entries() {
        let analysis = sample();
        let mut decisions = DecisionModel::default();
        decisions
            .set_exercise_action(&analysis, "e2", ExerciseAction::Skip)
            .unwrap();
        decisions
            .set_clinical_note_action(&analysis, "n1", EntityAction::Skip)
            .unwrap();
        let stats = ImportStats::compute(&analysis, &decisions);

        let ex = stats.exercises;
        assert_eq!(ex.create + ex.reuse + ex.skip, ex.total);
        assert_eq!(ex.total, analysis.exercises.len());
        assert_eq!(ex.skip, 1);
        assert_eq!(
            stats.clinical_notes,
            EntityCounts {
                create: 1,
                skip: 1,
                total: 2
            }
        );
    }

    #[test]
    fn matched_is_independent_of_action() {
        let analysis = sample();
        let mut decisions = initial_decisions(&analysis, &ReconcileConfig::default());
        decisions
            .set_exercise_action(&analysis, "e1", ExerciseAction::Skip)
            .unwrap();
        let stats = ImportStats::compute(&analysis, &decisions);
        assert_eq!(stats.exercises.matched, 2);
    }

    #[test]
    fn all_skipped_has_nothing_to_import() {
        let analysis = sample();
        let mut decisions = DecisionModel::default();
        for exercise in &analysis.exercises {
            decisions
                .set_exercise_action(&analysis, &exercise.temp_id, ExerciseAction::Skip)
                .unwrap();
        }
        assert!(!ImportStats::compute(&analysis, &decisions).has_importable_exercises());
    }

    #[test]
    fn reuse_without_target_counts_as_create_like_the_request() {
        let analysis = sample();
        let config = ReconcileConfig::default();
        let mut decisions = initial_decisions(&analysis, &config);
        decisions.exercises.insert(
            "e2".to_string(),
            ExerciseDecision {
                reuse_exercise_id: None,
                ..ExerciseDecision::reuse("e2", "ex-200")
            },
        );

        let stats = ImportStats::compute(&analysis, &decisions);
        let request = build_import_request(&analysis, &decisions, None, false, &config);

        assert_eq!(stats.exercises.reuse, 1);
        assert_eq!(stats.exercises.create, 4);
        assert_eq!(stats.exercises.create, request.exercises_to_create.len());
        assert_eq!(stats.exercises.reuse, request.exercises_to_reuse.len());
        assert!(!request.exercises_to_reuse.contains_key("e2"));
    }
}

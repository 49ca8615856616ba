use crate::analysis::AnalysisResult;
use crate::decisions::{DecisionModel, ExerciseAction, ExerciseDecision};

/// Replace every exercise decision with create. Reuse ids and edits are dropped.
pub fn set_all_exercises_create(analysis: &AnalysisResult, decisions: &mut DecisionModel) {
    decisions.exercises = analysis
        .exercises
        .iter()
        .map(|e| (e.temp_id.clone(), ExerciseDecision::create(&e.temp_id)))
        .collect();
}

/// Replace every exercise decision with skip.
pub fn set_all_exercises_skip(analysis: &AnalysisResult, decisions: &mut DecisionModel) {
    decisions.exercises = analysis
        .exercises
        .iter()
        .map(|e| (e.temp_id.clone(), ExerciseDecision::skip(&e.temp_id)))
        .collect();
}

/// Adopt the best suggestion for every matched exercise still marked create.
///
/// Merges into the current map. Exercises without suggestions, explicit
/// skips, and existing reuse choices are left as they are. Returns how many
/// decisions changed.
pub fn use_all_matched_exercises(analysis: &AnalysisResult, decisions: &mut DecisionModel) -> usize {
    let mut switched = 0;
    for exercise in &analysis.exercises {
        let Some(best) = analysis.best_match(&exercise.temp_id) else {
            continue;
        };
        if decisions.exercise_action(&exercise.temp_id) != ExerciseAction::Create {
            continue;
        }
        let decision = decisions
            .exercises
            .entry(exercise.temp_id.clone())
            .or_insert_with(|| ExerciseDecision::create(&exercise.temp_id));
        decision.action = ExerciseAction::Reuse;
        decision.reuse_exercise_id = Some(best.existing_exercise_id.clone());
        switched += 1;
    }
    switched
}

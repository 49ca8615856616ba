use crate::analysis::AnalysisResult;
use crate::config::ReconcileConfig;
use crate::decisions::{
    ClinicalNoteDecision, DecisionModel, ExerciseDecision, ExerciseSetDecision,
};

/// Initial decisions for a freshly analysed document.
///
/// An exercise whose best candidate reaches `auto_reuse_threshold` defaults to
/// reusing that candidate; everything else defaults to create. Sets and notes
/// always start as create.
pub fn initial_decisions(analysis: &AnalysisResult, config: &ReconcileConfig) -> DecisionModel {
    let exercises = analysis
        .exercises
        .iter()
        .map(|exercise| {
            let decision = match analysis.best_match(&exercise.temp_id) {
                Some(best) if best.confidence >= config.auto_reuse_threshold => {
                    ExerciseDecision::reuse(&exercise.temp_id, &best.existing_exercise_id)
                }
                _ => ExerciseDecision::create(&exercise.temp_id),
            };
            (exercise.temp_id.clone(), decision)
        })
        .collect();

    let exercise_sets = analysis
        .exercise_sets
        .iter()
        .map(|set| (set.temp_id.clone(), ExerciseSetDecision::create(&set.temp_id)))
        .collect();

    let clinical_notes = analysis
        .clinical_notes
        .iter()
        .map(|note| {
            (
                note.temp_id.clone(),
                ClinicalNoteDecision::create(&note.temp_id),
            )
        })
        .collect();

    DecisionModel {
        exercises,
        exercise_sets,
        clinical_notes,
    }
}

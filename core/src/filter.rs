use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::analysis::{AnalysisResult, ExtractedExercise};
use crate::decisions::DecisionModel;
use crate::request::{ExerciseResolution, resolve_exercise};

/// Review-screen filter over extracted exercises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseFilter {
    #[default]
    All,
    Create,
    Reuse,
    Skip,
    Matched,
}

impl ExerciseFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            ExerciseFilter::All => "all",
            ExerciseFilter::Create => "create",
            ExerciseFilter::Reuse => "reuse",
            ExerciseFilter::Skip => "skip",
            ExerciseFilter::Matched => "matched",
        }
    }

    fn accepts(self, analysis: &AnalysisResult, decisions: &DecisionModel, temp_id: &str) -> bool {
        let resolution = || resolve_exercise(decisions.exercises.get(temp_id));
        match self {
            ExerciseFilter::All => true,
            ExerciseFilter::Matched => analysis.has_match(temp_id),
            ExerciseFilter::Create => resolution() == ExerciseResolution::Create,
            ExerciseFilter::Reuse => matches!(resolution(), ExerciseResolution::Reuse(_)),
            ExerciseFilter::Skip => resolution() == ExerciseResolution::Skip,
        }
    }
}

impl fmt::Display for ExerciseFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExerciseFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(ExerciseFilter::All),
            "create" => Ok(ExerciseFilter::Create),
            "reuse" => Ok(ExerciseFilter::Reuse),
            "skip" => Ok(ExerciseFilter::Skip),
            "matched" => Ok(ExerciseFilter::Matched),
            other => Err(format!(
                "unknown exercise filter '{other}', expected all, create, reuse, skip or matched"
            )),
        }
    }
}

/// Extracted exercises passing `filter`, in extraction order.
pub fn filter_exercises<'a>(
    analysis: &'a AnalysisResult,
    decisions: &DecisionModel,
    filter: ExerciseFilter,
) -> Vec<&'a ExtractedExercise> {
    analysis
        .exercises
        .iter()
        .filter(|exercise| filter.accepts(analysis, decisions, &exercise.temp_id))
        .collect()
}

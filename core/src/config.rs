use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Minimum best-candidate confidence for an exercise to default to reuse.
pub const AUTO_REUSE_CONFIDENCE_THRESHOLD: f64 = 0.8;
/// Sets assigned to a created exercise when neither edits nor extraction provide one.
pub const DEFAULT_EXERCISE_SETS: u32 = 3;
/// Largest document accepted for analysis (10 MiB).
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Tunables of the reconciliation pipeline. Defaults reproduce the
/// behaviour operators are used to; change them deliberately.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileConfig {
    pub auto_reuse_threshold: f64,
    pub default_exercise_sets: u32,
    pub max_upload_bytes: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            auto_reuse_threshold: AUTO_REUSE_CONFIDENCE_THRESHOLD,
            default_exercise_sets: DEFAULT_EXERCISE_SETS,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

impl ReconcileConfig {
    /// Read overrides from `PHYSIO_AUTO_REUSE_THRESHOLD`,
    /// `PHYSIO_DEFAULT_EXERCISE_SETS` and `PHYSIO_MAX_UPLOAD_BYTES`.
    /// Unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let auto_reuse_threshold = env_parse::<f64>("PHYSIO_AUTO_REUSE_THRESHOLD")
            .filter(|v| (0.0..=1.0).contains(v))
            .unwrap_or(defaults.auto_reuse_threshold);
        let default_exercise_sets = env_parse::<u32>("PHYSIO_DEFAULT_EXERCISE_SETS")
            .unwrap_or(defaults.default_exercise_sets);
        let max_upload_bytes =
            env_parse::<u64>("PHYSIO_MAX_UPLOAD_BYTES").unwrap_or(defaults.max_upload_bytes);

        Self {
            auto_reuse_threshold,
            default_exercise_sets,
            max_upload_bytes,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

//! Command classification from feature vectors.
//!
//! Models are plain JSON artifacts naming a decision rule and its numbers:
//!
//! ```json
//! {
//!   "version": 1,
//!   "feature_mode": "temporal",
//!   "rule": {"kind": "linear", "weights": [0.4, -1.2], "bias": 0.1,
//!            "positive": 1, "negative": 0}
//! }
//! ```
//!
//! A missing or unreadable artifact is not an error for the pipeline: the
//! [`Classifier`] simply holds no model and every prediction is `None`.

use crate::processing::{Feature, FeatureMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Artifact schema version understood by this build.
pub const MODEL_SCHEMA_VERSION: u64 = 1;

/// Discrete label produced by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Command(pub i64);

impl Command {
    pub fn label(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mean feature vector of one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub label: i64,
    pub mean: Vec<f64>,
}

/// How a feature vector becomes a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionRule {
    /// `positive` when `weights · x + bias > 0`, else `negative`.
    Linear {
        weights: Vec<f64>,
        bias: f64,
        positive: i64,
        negative: i64,
    },
    /// Label of the closest centroid (Euclidean). Ties go to the first.
    NearestCentroid { centroids: Vec<Centroid> },
}

/// A loaded, validated model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub version: u64,
    /// Feature mode the model was trained on
    #[serde(default)]
    pub feature_mode: FeatureMode,
    pub rule: DecisionRule,
}

/// Errors that can occur when loading a model artifact.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse model: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported model version {0}, expected 1")]
    UnsupportedVersion(u64),

    #[error("invalid model: {0}")]
    Invalid(String),
}

impl Model {
    /// Build a linear model.
    pub fn linear(
        feature_mode: FeatureMode,
        weights: Vec<f64>,
        bias: f64,
        positive: i64,
        negative: i64,
    ) -> Self {
        Self {
            version: MODEL_SCHEMA_VERSION,
            feature_mode,
            rule: DecisionRule::Linear {
                weights,
                bias,
                positive,
                negative,
            },
        }
    }

    /// Build a nearest-centroid model.
    pub fn nearest_centroid(feature_mode: FeatureMode, centroids: Vec<Centroid>) -> Self {
        Self {
            version: MODEL_SCHEMA_VERSION,
            feature_mode,
            rule: DecisionRule::NearestCentroid { centroids },
        }
    }

    /// Parse and validate an artifact.
    pub fn from_json(raw: &str) -> Result<Self, ModelError> {
        let value: Value = serde_json::from_str(raw)?;
        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| ModelError::Invalid("missing version".to_string()))?;
        if version != MODEL_SCHEMA_VERSION {
            return Err(ModelError::UnsupportedVersion(version));
        }

        let model: Model = serde_json::from_value(value)?;
        model.validate()?;
        Ok(model)
    }

    /// Read an artifact from disk.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Write the artifact as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        match &self.rule {
            DecisionRule::Linear { weights, bias, .. } => {
                if weights.is_empty() {
                    return Err(ModelError::Invalid("linear model has no weights".to_string()));
                }
                if !all_finite(weights) || !bias.is_finite() {
                    return Err(ModelError::Invalid(
                        "linear model has non-finite parameters".to_string(),
                    ));
                }
            }
            DecisionRule::NearestCentroid { centroids } => {
                let Some(first) = centroids.first() else {
                    return Err(ModelError::Invalid("model has no centroids".to_string()));
                };
                let dimension = first.mean.len();
                if dimension == 0 {
                    return Err(ModelError::Invalid("centroids are empty".to_string()));
                }
                for centroid in centroids {
                    if centroid.mean.len() != dimension {
                        return Err(ModelError::Invalid(format!(
                            "centroid {} has {} values, expected {}",
                            centroid.label,
                            centroid.mean.len(),
                            dimension
                        )));
                    }
                    if !all_finite(&centroid.mean) {
                        return Err(ModelError::Invalid(format!(
                            "centroid {} has non-finite values",
                            centroid.label
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Length of the feature vectors the model accepts.
    pub fn dimension(&self) -> usize {
        match &self.rule {
            DecisionRule::Linear { weights, .. } => weights.len(),
            DecisionRule::NearestCentroid { centroids } => {
                centroids.first().map_or(0, |c| c.mean.len())
            }
        }
    }

    /// Apply the decision rule. `None` on a length mismatch or a
    /// non-finite input.
    pub fn decide(&self, features: &[f64]) -> Option<Command> {
        if features.len() != self.dimension() || features.iter().any(|v| !v.is_finite()) {
            return None;
        }

        match &self.rule {
            DecisionRule::Linear {
                weights,
                bias,
                positive,
                negative,
            } => {
                let dot: f64 = weights.iter().zip(features).map(|(w, x)| w * x).sum();
                let score = dot + bias;
                Some(Command(if score > 0.0 { *positive } else { *negative }))
            }
            DecisionRule::NearestCentroid { centroids } => centroids
                .iter()
                .map(|c| {
                    let distance: f64 = c
                        .mean
                        .iter()
                        .zip(features)
                        .map(|(m, x)| (m - x) * (m - x))
                        .sum();
                    (c.label, distance)
                })
                .fold(None, |best: Option<(i64, f64)>, (label, distance)| match best {
                    Some((_, best_distance)) if best_distance <= distance => best,
                    _ => Some((label, distance)),
                })
                .map(|(label, _)| Command(label)),
        }
    }
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// Applies a preloaded model; holds none when loading failed.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    model: Option<Model>,
}

impl Classifier {
    /// Load the model at `path`. Never fails: problems are logged and the
    /// classifier predicts nothing.
    pub fn load(path: &Path) -> Self {
        match Model::load(path) {
            Ok(model) => {
                info!(
                    path = %path.display(),
                    dimension = model.dimension(),
                    feature_mode = %model.feature_mode,
                    "Loaded model"
                );
                Self { model: Some(model) }
            }
            Err(ModelError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "No model found, predictions disabled");
                Self::none()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Model unusable, predictions disabled");
                Self::none()
            }
        }
    }

    pub fn from_model(model: Model) -> Self {
        Self { model: Some(model) }
    }

    /// A classifier without a model.
    pub fn none() -> Self {
        Self { model: None }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    /// Feature mode the loaded model expects. Features built any other way
    /// never match its dimension, so callers should build theirs this way.
    pub fn feature_mode(&self) -> Option<FeatureMode> {
        self.model.as_ref().map(|model| model.feature_mode)
    }

    /// Predict a command. Never blocks and never fails.
    pub fn predict(&self, feature: &Feature) -> Option<Command> {
        let model = self.model.as_ref()?;
        let command = model.decide(feature.values());
        if command.is_none() {
            debug!(
                expected = model.dimension(),
                got = feature.len(),
                "Feature not usable by model"
            );
        }
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundary_model() -> Model {
        // x0 - x1 > 0.5 => 1, else 0
        Model::linear(FeatureMode::AcrossChannels, vec![1.0, -1.0], -0.5, 1, 0)
    }

    #[test]
    fn test_no_model_predicts_none() {
        let classifier = Classifier::none();
        assert!(!classifier.is_loaded());
        for values in [vec![], vec![0.0], vec![1e6, -1e6, 3.0]] {
            assert_eq!(classifier.predict(&Feature::new(values)), None);
        }
    }

    #[test]
    fn test_feature_mode_follows_model() {
        assert_eq!(Classifier::none().feature_mode(), None);
        assert_eq!(
            Classifier::from_model(boundary_model()).feature_mode(),
            Some(FeatureMode::AcrossChannels)
        );

        // A temporal processor's features never fit an across-channels model
        let classifier = Classifier::from_model(boundary_model());
        let temporal = Feature::new(vec![1.0; crate::stream::CHANNEL_COUNT]);
        assert_eq!(classifier.predict(&temporal), None);
        assert!(classifier.predict(&Feature::new(vec![2.0, 0.0])).is_some());
    }

    #[test]
    fn test_linear_boundary_sides() {
        let classifier = Classifier::from_model(boundary_model());
        let above = Feature::new(vec![2.0, 0.0]);
        let below = Feature::new(vec![0.0, 2.0]);

        assert_eq!(classifier.predict(&above), Some(Command(1)));
        assert_eq!(classifier.predict(&below), Some(Command(0)));
        // Deterministic
        assert_eq!(classifier.predict(&above), classifier.predict(&above));
        // Exactly on the boundary is not > 0
        assert_eq!(classifier.predict(&Feature::new(vec![0.5, 0.0])), Some(Command(0)));
    }

    #[test]
    fn test_dimension_mismatch_predicts_none() {
        let classifier = Classifier::from_model(boundary_model());
        assert_eq!(classifier.predict(&Feature::new(vec![1.0])), None);
        assert_eq!(classifier.predict(&Feature::new(vec![f64::NAN, 1.0])), None);
    }

    #[test]
    fn test_nearest_centroid() {
        let model = Model::nearest_centroid(
            FeatureMode::Temporal,
            vec![
                Centroid { label: 0, mean: vec![0.0, 0.0] },
                Centroid { label: 2, mean: vec![10.0, 10.0] },
            ],
        );
        model.validate().unwrap();
        assert_eq!(model.decide(&[1.0, 2.0]), Some(Command(0)));
        assert_eq!(model.decide(&[9.0, 7.5]), Some(Command(2)));
        assert_eq!(model.decide(&[5.0, 5.0]), Some(Command(0)));
    }

    #[test]
    fn test_artifact_roundtrip_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        boundary_model().save(&path).unwrap();

        let classifier = Classifier::load(&path);
        assert!(classifier.is_loaded());
        assert_eq!(classifier.model(), Some(&boundary_model()));
    }

    #[test]
    fn test_parse_tagged_artifact() {
        let raw = r#"{
            "version": 1,
            "feature_mode": "across_channels",
            "rule": {"kind": "linear", "weights": [0.5], "bias": -1.0, "positive": 3, "negative": 4}
        }"#;
        let model = Model::from_json(raw).unwrap();
        assert_eq!(model.feature_mode, FeatureMode::AcrossChannels);
        assert_eq!(model.decide(&[4.0]), Some(Command(3)));
        assert_eq!(model.decide(&[1.0]), Some(Command(4)));
    }

    #[test]
    fn test_rejects_bad_artifacts() {
        let wrong_version = r#"{"version": 2, "rule": {"kind": "linear", "weights": [1.0], "bias": 0.0, "positive": 1, "negative": 0}}"#;
        assert!(matches!(
            Model::from_json(wrong_version),
            Err(ModelError::UnsupportedVersion(2))
        ));

        let no_weights = r#"{"version": 1, "rule": {"kind": "linear", "weights": [], "bias": 0.0, "positive": 1, "negative": 0}}"#;
        assert!(matches!(Model::from_json(no_weights), Err(ModelError::Invalid(_))));

        let ragged = r#"{"version": 1, "rule": {"kind": "nearest_centroid", "centroids": [
            {"label": 0, "mean": [1.0, 2.0]}, {"label": 1, "mean": [1.0]}]}}"#;
        assert!(matches!(Model::from_json(ragged), Err(ModelError::Invalid(_))));

        let opaque = r#"{"version": 1, "rule": {"kind": "pickled_sklearn", "blob": "gASV"}}"#;
        assert!(matches!(Model::from_json(opaque), Err(ModelError::Parse(_))));
    }

    #[test]
    fn test_missing_or_corrupt_file_yields_none_model() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!Classifier::load(&dir.path().join("absent.json")).is_loaded());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{not json").unwrap();
        let classifier = Classifier::load(&corrupt);
        assert!(!classifier.is_loaded());
        assert_eq!(classifier.predict(&Feature::new(vec![1.0, 2.0])), None);
    }
}

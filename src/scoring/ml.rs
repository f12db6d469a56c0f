//! Scoring model and explainer contracts, and the model registry
//!
//! The engine treats the model and its explainer as opaque, synchronous and
//! possibly slow calls. The registry is the one place that knows how model
//! artifacts are laid out on disk: `model_<version>.json` files in a model
//! directory, the newest of which is loaded at startup.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use super::model::ModelInfo;
use crate::error::ModelError;
use crate::features::FeatureSet;

/// Lower bound of the score scale
pub const MIN_SCORE: f64 = 0.0;

/// Upper bound of the score scale
pub const MAX_SCORE: f64 = 100.0;

/// Output of a model invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub score: f64,
    pub version: String,
}

/// Raw per-feature attribution produced by an explainer
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub feature: String,
    pub value: f64,
    pub attribution: f64,
}

/// `predict(features) -> score, version`
pub trait ScoringModel: Send + Sync {
    fn version(&self) -> &str;

    /// Names of the features the model consumes
    fn feature_names(&self) -> Vec<String>;

    fn predict(&self, features: &FeatureSet) -> Result<Prediction, ModelError>;
}

/// `explain(features, score) -> attributions`
pub trait Explainer: Send + Sync {
    fn explain(&self, features: &FeatureSet, score: f64) -> Result<Vec<Attribution>, ModelError>;
}

// ============================================================================
// Linear model artifact
// ============================================================================

/// On-disk form of a linear scoring model
#[derive(Debug, Clone, Deserialize)]
pub struct LinearArtifact {
    #[serde(default)]
    pub version: Option<String>,
    pub intercept: f64,
    pub weights: BTreeMap<String, f64>,
    /// Reference value per feature; attributions are measured from it
    #[serde(default)]
    pub baselines: BTreeMap<String, f64>,
}

/// Linear model clamped to the score scale, with an exact additive explainer
#[derive(Debug, Clone)]
pub struct LinearModel {
    version: String,
    intercept: f64,
    weights: BTreeMap<String, f64>,
    baselines: BTreeMap<String, f64>,
}

impl LinearModel {
    pub fn new(version: impl Into<String>, intercept: f64, weights: BTreeMap<String, f64>) -> Self {
        Self {
            version: version.into(),
            intercept,
            weights,
            baselines: BTreeMap::new(),
        }
    }

    pub fn with_baselines(mut self, baselines: BTreeMap<String, f64>) -> Self {
        self.baselines = baselines;
        self
    }

    pub fn from_artifact(default_version: &str, artifact: LinearArtifact) -> Self {
        Self {
            version: artifact
                .version
                .unwrap_or_else(|| default_version.to_string()),
            intercept: artifact.intercept,
            weights: artifact.weights,
            baselines: artifact.baselines,
        }
    }

    fn value_of(&self, features: &FeatureSet, name: &str) -> f64 {
        features.get(name).unwrap_or(0.0)
    }
}

impl ScoringModel for LinearModel {
    fn version(&self) -> &str {
        &self.version
    }

    fn feature_names(&self) -> Vec<String> {
        self.weights.keys().cloned().collect()
    }

    fn predict(&self, features: &FeatureSet) -> Result<Prediction, ModelError> {
        let raw = self.intercept
            + self
                .weights
                .iter()
                .map(|(name, weight)| weight * self.value_of(features, name))
                .sum::<f64>();

        if !raw.is_finite() {
            return Err(ModelError::Prediction(format!(
                "model {} produced a non-finite score",
                self.version
            )));
        }

        Ok(Prediction {
            score: raw.clamp(MIN_SCORE, MAX_SCORE),
            version: self.version.clone(),
        })
    }
}

impl Explainer for LinearModel {
    fn explain(&self, features: &FeatureSet, score: f64) -> Result<Vec<Attribution>, ModelError> {
        if !score.is_finite() {
            return Err(ModelError::Explanation(format!(
                "cannot explain non-finite score {}",
                score
            )));
        }

        let mut attributions: Vec<Attribution> = self
            .weights
            .iter()
            .map(|(name, weight)| {
                let value = self.value_of(features, name);
                let baseline = self.baselines.get(name).copied().unwrap_or(0.0);
                Attribution {
                    feature: name.clone(),
                    value,
                    attribution: weight * (value - baseline),
                }
            })
            .collect();

        // largest contributions first
        attributions.sort_by(|a, b| b.attribution.abs().total_cmp(&a.attribution.abs()));
        Ok(attributions)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// A model paired with the explainer for its outputs
#[derive(Clone)]
pub struct LoadedModel {
    pub model: Arc<dyn ScoringModel>,
    pub explainer: Arc<dyn Explainer>,
    pub last_updated: DateTime<Utc>,
}

impl LoadedModel {
    pub fn linear(model: LinearModel, last_updated: DateTime<Utc>) -> Self {
        let model = Arc::new(model);
        Self {
            model: model.clone(),
            explainer: model,
            last_updated,
        }
    }

    pub fn version(&self) -> &str {
        self.model.version()
    }
}

/// Holds the current model and resolves explicitly requested versions
pub struct ModelRegistry {
    model_dir: Option<PathBuf>,
    current: LoadedModel,
    versions: RwLock<HashMap<String, LoadedModel>>,
}

impl ModelRegistry {
    /// Registry around an already constructed model, with no artifact directory
    pub fn with_model(model: LoadedModel) -> Self {
        Self {
            model_dir: None,
            current: model,
            versions: RwLock::new(HashMap::new()),
        }
    }

    /// Load the most recently modified `model_<version>.json` in `dir`
    pub fn load_latest(dir: impl AsRef<Path>) -> Result<Self, ModelError> {
        let dir = dir.as_ref();
        let latest = latest_artifact(dir)?;
        let current = load_artifact(&latest)?;

        tracing::info!(
            version = %current.version(),
            path = %latest.display(),
            "Scoring model loaded"
        );

        Ok(Self {
            model_dir: Some(dir.to_path_buf()),
            current,
            versions: RwLock::new(HashMap::new()),
        })
    }

    pub fn current(&self) -> LoadedModel {
        self.current.clone()
    }

    /// The current model, or the named version loaded from the artifact directory
    pub fn resolve(&self, version: Option<&str>) -> Result<LoadedModel, ModelError> {
        let version = match version {
            None => return Ok(self.current()),
            Some(v) if v == self.current.version() => return Ok(self.current()),
            Some(v) => v,
        };

        if let Some(loaded) = self
            .versions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(version)
        {
            return Ok(loaded.clone());
        }

        if !is_valid_version(version) {
            return Err(ModelError::UnknownVersion(version.to_string()));
        }
        let dir = self
            .model_dir
            .as_ref()
            .ok_or_else(|| ModelError::UnknownVersion(version.to_string()))?;
        let path = dir.join(format!("model_{}.json", version));
        if !path.is_file() {
            return Err(ModelError::UnknownVersion(version.to_string()));
        }

        let loaded = load_artifact(&path)?;
        tracing::info!(version = %version, "Additional model version loaded");
        self.versions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(version.to_string(), loaded.clone());
        Ok(loaded)
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            version: self.current.version().to_string(),
            features: self.current.model.feature_names(),
            last_updated: self.current.last_updated,
        }
    }
}

/// Versions name files, so only a conservative character set is accepted
fn is_valid_version(version: &str) -> bool {
    !version.is_empty()
        && !version.contains("..")
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

fn version_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let version = stem.strip_prefix("model_")?;
    (!version.is_empty()).then(|| version.to_string())
}

fn latest_artifact(dir: &Path) -> Result<PathBuf, ModelError> {
    let entries =
        std::fs::read_dir(dir).map_err(|_| ModelError::NoArtifact(dir.display().to_string()))?;

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_artifact = path.extension().and_then(|e| e.to_str()) == Some("json")
            && version_from_path(&path).is_some();
        if !is_artifact {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if latest.as_ref().map_or(true, |(t, _)| modified > *t) {
            latest = Some((modified, path));
        }
    }

    latest
        .map(|(_, path)| path)
        .ok_or_else(|| ModelError::NoArtifact(dir.display().to_string()))
}

fn load_artifact(path: &Path) -> Result<LoadedModel, ModelError> {
    let invalid = |reason: String| ModelError::InvalidArtifact {
        path: path.display().to_string(),
        reason,
    };

    let default_version = version_from_path(path).ok_or_else(|| invalid("bad file name".to_string()))?;
    let bytes = std::fs::read(path).map_err(|e| invalid(e.to_string()))?;
    let artifact: LinearArtifact = serde_json::from_slice(&bytes).map_err(|e| invalid(e.to_string()))?;

    let last_updated = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    Ok(LoadedModel::linear(
        LinearModel::from_artifact(&default_version, artifact),
        last_updated,
    ))
}

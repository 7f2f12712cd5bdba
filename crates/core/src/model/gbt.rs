use crate::features::{FeatureSchema, FeatureVector};
use crate::model::PricePredictor;
use anyhow::{bail, ensure, Context};
use serde::Deserialize;
use std::path::Path;

pub const SUPPORTED_FORMAT_VERSION: u32 = 1;

// JSON dump of the trained gradient-boosted-tree regression. The training
// pipeline owns this format; we only read it.
#[derive(Debug, Clone, Deserialize)]
pub struct GbtArtifact {
    pub format_version: u32,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    pub schema: FeatureSchema,
    pub base_score: f64,
    pub trees: Vec<GbtTree>,
}

fn default_model_name() -> String {
    "cocoon_price_gbt".to_string()
}

// Flat-array tree. A negative child encodes a leaf, with leaf index
// `-child - 1` into `leaf_value`.
#[derive(Debug, Clone, Deserialize)]
pub struct GbtTree {
    pub split_feature: Vec<usize>,
    pub threshold: Vec<f64>,
    pub left_child: Vec<i32>,
    pub right_child: Vec<i32>,
    pub leaf_value: Vec<f64>,
}

impl GbtTree {
    fn validate(&self, feature_count: usize) -> anyhow::Result<()> {
        let internal = self.split_feature.len();
        ensure!(
            self.threshold.len() == internal
                && self.left_child.len() == internal
                && self.right_child.len() == internal,
            "tree split/threshold/child arrays disagree on node count"
        );
        ensure!(!self.leaf_value.is_empty(), "tree has no leaves");
        if internal > 0 {
            ensure!(
                self.leaf_value.len() == internal + 1,
                "tree has {} internal nodes but {} leaves",
                internal,
                self.leaf_value.len()
            );
        }
        for &feature in &self.split_feature {
            ensure!(
                feature < feature_count,
                "tree splits on feature index {feature}, schema has {feature_count} features"
            );
        }
        // A NaN anywhere in a tree would poison price comparisons downstream.
        for &threshold in &self.threshold {
            ensure!(
                threshold.is_finite(),
                "tree threshold {threshold} is not finite"
            );
        }
        for &leaf in &self.leaf_value {
            ensure!(leaf.is_finite(), "tree leaf value {leaf} is not finite");
        }
        for &child in self.left_child.iter().chain(self.right_child.iter()) {
            if child >= 0 {
                ensure!(
                    (child as usize) < internal,
                    "tree child index {child} out of range"
                );
            } else {
                let leaf = (-child - 1) as usize;
                ensure!(
                    leaf < self.leaf_value.len(),
                    "tree leaf index {leaf} out of range"
                );
            }
        }
        Ok(())
    }

    fn evaluate(&self, values: &[f64]) -> anyhow::Result<f64> {
        if self.split_feature.is_empty() {
            return Ok(self.leaf_value[0]);
        }
        let mut node = 0usize;
        // The walk visits each internal node at most once; a longer path
        // means the child arrays form a cycle and the artifact is corrupt.
        for _ in 0..=self.split_feature.len() {
            let feature = self.split_feature[node];
            let child = if values[feature] <= self.threshold[node] {
                self.left_child[node]
            } else {
                self.right_child[node]
            };
            if child < 0 {
                return Ok(self.leaf_value[(-child - 1) as usize]);
            }
            node = child as usize;
        }
        bail!("tree walk did not reach a leaf");
    }
}

#[derive(Debug)]
pub struct GbtPricePredictor {
    artifact: GbtArtifact,
}

impl GbtPricePredictor {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading model artifact at {}", path.display()))?;
        let artifact: GbtArtifact = serde_json::from_str(&raw)
            .with_context(|| format!("parsing model artifact at {}", path.display()))?;
        let predictor = Self::from_artifact(artifact)?;
        tracing::info!(
            model = predictor.artifact.model_name,
            trees = predictor.artifact.trees.len(),
            features = predictor.artifact.schema.feature_names.len(),
            "loaded price model"
        );
        Ok(predictor)
    }

    pub fn from_artifact(artifact: GbtArtifact) -> anyhow::Result<Self> {
        ensure!(
            artifact.format_version == SUPPORTED_FORMAT_VERSION,
            "unsupported model artifact format_version {} (supported: {})",
            artifact.format_version,
            SUPPORTED_FORMAT_VERSION
        );
        ensure!(!artifact.trees.is_empty(), "model artifact contains no trees");
        ensure!(
            artifact.base_score.is_finite(),
            "model base_score is not finite"
        );
        let feature_count = artifact.schema.feature_names.len();
        ensure!(feature_count > 0, "model schema names no features");
        for (idx, tree) in artifact.trees.iter().enumerate() {
            tree.validate(feature_count)
                .with_context(|| format!("model tree {idx} is malformed"))?;
        }
        Ok(Self { artifact })
    }
}

impl PricePredictor for GbtPricePredictor {
    fn predict(&self, features: &FeatureVector) -> anyhow::Result<f64> {
        let expected = self.artifact.schema.feature_names.len();
        ensure!(
            features.len() == expected,
            "feature vector has {} values, model expects {expected}",
            features.len()
        );
        let mut score = self.artifact.base_score;
        for tree in &self.artifact.trees {
            score += tree.evaluate(&features.values)?;
        }
        // Prices are non-negative by definition; boosted sums near the low
        // end of the training range can dip below zero.
        Ok(score.max(0.0))
    }

    fn schema(&self) -> &FeatureSchema {
        &self.artifact.schema
    }

    fn model_name(&self) -> &str {
        &self.artifact.model_name
    }
}

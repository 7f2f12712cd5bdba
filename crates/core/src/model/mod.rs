use crate::features::{FeatureSchema, FeatureVector};

pub mod gbt;

pub use gbt::GbtPricePredictor;

// Price inference seam. The engine only sees this trait; the artifact
// format stays a detail of the production implementation.
pub trait PricePredictor: Send + Sync {
    // Price per kg for one encoded candidate. Pure, synchronous, never
    // negative.
    fn predict(&self, features: &FeatureVector) -> anyhow::Result<f64>;

    // Encoders are built from this.
    fn schema(&self) -> &FeatureSchema;

    fn model_name(&self) -> &str;
}

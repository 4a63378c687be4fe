//! ImageNet classification with a pretrained TensorFlow SavedModel.
//!
//! [`ImageClassifier`] turns raw image bytes into the top-k
//! [`PredictionResult`]; [`provision::Provisioner`] fetches the model and
//! label assets it needs.

mod classifier;
mod config;
mod error;
mod labels;
mod prediction;
pub mod preprocess;
pub mod provision;
mod timer;

pub use classifier::{Backend, Classification, ImageClassifier, TfBackend, Timings};
pub use config::{
    parse_top_k, AssetPaths, ClassifierConfig, Normalization, OutputKind, ProvisionConfig,
    DEFAULT_LABELS_URL, DEFAULT_MODELS_DIR, DEFAULT_WEIGHTS_URL,
};
pub use error::{Error, Result};
pub use labels::{ClassLabelTable, IMAGENET_CLASSES};
pub use prediction::{decode_predictions, softmax, Prediction, PredictionResult};
pub use timer::Timer;

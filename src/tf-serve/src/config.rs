use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_MODELS_DIR: &str = "models";
pub const DEFAULT_EXPORT_DIR: &str = "efficientnetv2_b0";
pub const DEFAULT_LABELS_FILE: &str = "imagenet_class_labels.json";

/// EfficientNetV2-B0 trained on ImageNet-1k, packaged as a TF2 SavedModel.
/// TF Hub publishes no SavedModel of the original EfficientNet-B0 classifier.
pub const DEFAULT_WEIGHTS_URL: &str = "https://tfhub.dev/google/imagenet/efficientnet_v2_imagenet1k_b0/classification/2?tf-hub-format=compressed";
pub const DEFAULT_LABELS_URL: &str =
    "https://storage.googleapis.com/download.tensorflow.org/data/imagenet_class_index.json";

pub const DEFAULT_SIGNATURE: &str = "serving_default";
pub const DEFAULT_INPUT_SIZE: u32 = 224;
pub const DEFAULT_TOP_K: usize = 5;

/// Pixel transform applied before the forward pass, named after the modes
/// of Keras' `preprocess_input`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Untouched 0..255 values; the model rescales internally.
    Raw,
    /// 0..1
    Unit,
    /// -1..1
    Tf,
    /// 0..1, then ImageNet mean/std per channel
    Torch,
    /// BGR, ImageNet mean subtracted, no scaling
    Caffe,
}

impl FromStr for Normalization {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Normalization::Raw),
            "unit" => Ok(Normalization::Unit),
            "tf" => Ok(Normalization::Tf),
            "torch" => Ok(Normalization::Torch),
            "caffe" => Ok(Normalization::Caffe),
            other => Err(Error::Unsupported(format!("normalization `{}`", other))),
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Normalization::Raw => "raw",
            Normalization::Unit => "unit",
            Normalization::Tf => "tf",
            Normalization::Torch => "torch",
            Normalization::Caffe => "caffe",
        };
        f.write_str(name)
    }
}

/// What the serving signature returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Probabilities,
    Logits,
}

impl FromStr for OutputKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "probabilities" | "probs" => Ok(OutputKind::Probabilities),
            "logits" => Ok(OutputKind::Logits),
            other => Err(Error::Unsupported(format!("output kind `{}`", other))),
        }
    }
}

/// Where the provisioned assets live on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPaths {
    pub models_dir: PathBuf,
    pub export_dir: PathBuf,
    pub labels_path: PathBuf,
}

impl AssetPaths {
    pub fn in_dir(models_dir: &Path) -> Self {
        AssetPaths {
            models_dir: models_dir.to_path_buf(),
            export_dir: models_dir.join(DEFAULT_EXPORT_DIR),
            labels_path: models_dir.join(DEFAULT_LABELS_FILE),
        }
    }
}

impl Default for AssetPaths {
    fn default() -> Self {
        AssetPaths::in_dir(Path::new(DEFAULT_MODELS_DIR))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Export directory of the TensorFlow SavedModel
    pub export_dir: PathBuf,

    /// JSON array of class names
    pub labels_path: PathBuf,

    /// Signature key used to find the input and output tensors
    pub signature: String,

    /// Side of the square input image
    #[serde(deserialize_with = "at_least_one")]
    pub input_size: u32,

    pub normalization: Normalization,

    pub output: OutputKind,

    /// Number of predictions kept after decoding
    #[serde(deserialize_with = "at_least_one")]
    pub top_k: usize,
}

fn at_least_one<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default + PartialEq,
{
    let value = T::deserialize(deserializer)?;
    if value == T::default() {
        return Err(serde::de::Error::custom("must be at least 1"));
    }
    Ok(value)
}

/// Parse a `--top-k` style count, refusing zero.
pub fn parse_top_k(s: &str) -> Result<usize> {
    match s.parse::<usize>() {
        Ok(0) => Err(Error::Config("top_k must be at least 1".to_owned())),
        Ok(k) => Ok(k),
        Err(err) => Err(Error::Config(format!("top_k `{}`: {}", s, err))),
    }
}

impl ClassifierConfig {
    /// Reject settings that would make every classification empty.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::Config("top_k must be at least 1".to_owned()));
        }
        if self.input_size == 0 {
            return Err(Error::Config("input_size must be at least 1".to_owned()));
        }
        Ok(())
    }

    pub fn from_assets(paths: &AssetPaths) -> Self {
        ClassifierConfig {
            export_dir: paths.export_dir.clone(),
            labels_path: paths.labels_path.clone(),
            ..Default::default()
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let paths = AssetPaths::default();

        // Matches the default weights archive: 0..1 inputs, raw logits out.
        ClassifierConfig {
            export_dir: paths.export_dir,
            labels_path: paths.labels_path,
            signature: DEFAULT_SIGNATURE.to_owned(),
            input_size: DEFAULT_INPUT_SIZE,
            normalization: Normalization::Unit,
            output: OutputKind::Logits,
            top_k: DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    pub paths: AssetPaths,
    pub weights_url: String,
    pub labels_url: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        ProvisionConfig {
            paths: AssetPaths::default(),
            weights_url: DEFAULT_WEIGHTS_URL.to_owned(),
            labels_url: DEFAULT_LABELS_URL.to_owned(),
        }
    }
}

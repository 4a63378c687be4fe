use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("tensorflow: {0}")]
    Tensorflow(#[from] tensorflow::Status),

    #[error("could not decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// The class index does not have the expected shape
    #[error("malformed class index: {0}")]
    LabelShape(String),

    #[error("could not unpack model archive into {path}: {source}")]
    Archive {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("model produced {got} scores for {labels} labels")]
    OutputShape { got: usize, labels: usize },

    #[error("signature `{signature}` has no single {kind} tensor")]
    Signature { signature: String, kind: &'static str },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unsupported {0}")]
    Unsupported(String),
}

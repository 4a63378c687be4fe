//! One-time download of the model weights and the ImageNet class labels.
//!
//! Each asset is fetched only when it is missing on disk, so running the
//! provisioner again after a successful run touches neither the network nor
//! the files. A failure in one half is logged and does not undo the other.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use log::{error, info, warn};

use crate::config::ProvisionConfig;
use crate::error::{Error, Result};
use crate::labels::{ClassLabelTable, IMAGENET_CLASSES};
use crate::timer::Timer;

const SAVED_MODEL_FILE: &str = "saved_model.pb";

/// Source of remote assets.
pub trait Fetch {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

impl<F: Fetch + ?Sized> Fetch for &F {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        (**self).fetch(url)
    }
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        // Model archives take longer than the default 30s request timeout.
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(None)
            .build()?;

        Ok(HttpFetcher { client })
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let t = Timer::start(format!("Fetching {}", url));

        let body = self.client.get(url).send()?.error_for_status()?.bytes()?;

        t.stop();

        Ok(body.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Already on disk, nothing fetched
    Skipped,
    Saved(PathBuf),
    Failed(String),
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Skipped => write!(f, "already present"),
            StepOutcome::Saved(path) => write!(f, "saved to {}", path.display()),
            StepOutcome::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub weights: StepOutcome,
    pub labels: StepOutcome,
}

impl ProvisionReport {
    pub fn already_present(&self) -> bool {
        self.weights == StepOutcome::Skipped && self.labels == StepOutcome::Skipped
    }

    pub fn is_complete(&self) -> bool {
        !matches!(self.weights, StepOutcome::Failed(_))
            && !matches!(self.labels, StepOutcome::Failed(_))
    }
}

pub struct Provisioner<F> {
    config: ProvisionConfig,
    fetcher: F,
}

impl<F: Fetch> Provisioner<F> {
    pub fn new(config: ProvisionConfig, fetcher: F) -> Self {
        Provisioner { config, fetcher }
    }

    /// Only failing to create the models directory is returned as an error;
    /// download failures are logged and reported per asset.
    pub fn run(&self) -> Result<ProvisionReport> {
        let paths = &self.config.paths;

        info!("--- Starting Download and Setup ---");

        fs::create_dir_all(&paths.models_dir)?;

        let weights_present = paths.export_dir.is_dir();
        let labels_present = paths.labels_path.is_file();

        if weights_present && labels_present {
            info!("Setup files already exist!");
            info!("  - Model weights: {}", paths.export_dir.display());
            info!("  - Class labels: {}", paths.labels_path.display());
            info!("Setup has been cancelled. Delete these files if you want to redownload them.");
            info!("--- Setup Complete! ---");

            return Ok(ProvisionReport {
                weights: StepOutcome::Skipped,
                labels: StepOutcome::Skipped,
            });
        }

        let weights = if weights_present {
            info!("Model weights already at {}", paths.export_dir.display());
            StepOutcome::Skipped
        } else {
            info!("Downloading model weights from {}", self.config.weights_url);
            match self.provision_weights() {
                Ok(()) => {
                    info!("Successfully saved model weights to: {}", paths.export_dir.display());
                    StepOutcome::Saved(paths.export_dir.clone())
                }
                Err(e) => {
                    error!("Error downloading or saving model weights: {}", e);
                    StepOutcome::Failed(e.to_string())
                }
            }
        };

        let labels = if labels_present {
            info!("Class labels already at {}", paths.labels_path.display());
            StepOutcome::Skipped
        } else {
            info!("Downloading ImageNet class labels from {}", self.config.labels_url);
            match self.provision_labels() {
                Ok(()) => {
                    info!(
                        "Successfully saved ImageNet class labels to: {}",
                        paths.labels_path.display()
                    );
                    StepOutcome::Saved(paths.labels_path.clone())
                }
                Err(e) => {
                    error!("Error downloading or processing class labels: {}", e);
                    StepOutcome::Failed(e.to_string())
                }
            }
        };

        info!("--- Setup Complete! ---");

        Ok(ProvisionReport { weights, labels })
    }

    fn provision_weights(&self) -> Result<()> {
        let archive = self.fetcher.fetch(&self.config.weights_url)?;
        unpack_saved_model(&archive, &self.config.paths.export_dir)
    }

    fn provision_labels(&self) -> Result<()> {
        let raw = self.fetcher.fetch(&self.config.labels_url)?;

        let table = ClassLabelTable::from_class_index(&raw)?;
        table.ensure_len(IMAGENET_CLASSES)?;

        let path = &self.config.paths.labels_path;
        let partial = path.with_extension("json.partial");
        table.save(&partial)?;
        fs::rename(&partial, path)?;

        Ok(())
    }
}

/// Unpack a gzipped tar of a SavedModel into `export_dir`.
///
/// The archive may hold the model at its root or inside a single top-level
/// directory. `export_dir` only appears once the model is fully unpacked.
pub fn unpack_saved_model(archive: &[u8], export_dir: &Path) -> Result<()> {
    let staging = staging_dir(export_dir);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let result = unpack_into(archive, &staging).and_then(|root| {
        fs::rename(&root, export_dir)?;
        Ok(())
    });

    if staging.exists() {
        if let Err(e) = fs::remove_dir_all(&staging) {
            warn!("Could not clean up {}: {}", staging.display(), e);
        }
    }

    result
}

fn unpack_into(archive: &[u8], staging: &Path) -> Result<PathBuf> {
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    tar.unpack(staging).map_err(|source| Error::Archive {
        path: staging.to_path_buf(),
        source,
    })?;

    saved_model_root(staging)?.ok_or_else(|| Error::Archive {
        path: staging.to_path_buf(),
        source: io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no {} in archive", SAVED_MODEL_FILE),
        ),
    })
}

fn saved_model_root(dir: &Path) -> Result<Option<PathBuf>> {
    if dir.join(SAVED_MODEL_FILE).is_file() {
        return Ok(Some(dir.to_path_buf()));
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() && path.join(SAVED_MODEL_FILE).is_file() {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

fn staging_dir(export_dir: &Path) -> PathBuf {
    let name = export_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_owned());

    export_dir.with_file_name(format!(".{}.partial", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_is_a_hidden_sibling() {
        assert_eq!(
            staging_dir(Path::new("models/efficientnetv2_b0")),
            Path::new("models/.efficientnetv2_b0.partial")
        );
    }

    #[test]
    fn report_states() {
        let skipped = ProvisionReport {
            weights: StepOutcome::Skipped,
            labels: StepOutcome::Skipped,
        };
        assert!(skipped.already_present());
        assert!(skipped.is_complete());

        let partial = ProvisionReport {
            weights: StepOutcome::Saved(PathBuf::from("models/efficientnetv2_b0")),
            labels: StepOutcome::Failed("404".into()),
        };
        assert!(!partial.already_present());
        assert!(!partial.is_complete());
        assert_eq!(partial.labels.to_string(), "failed: 404");
    }

    #[test]
    fn garbage_archive_leaves_no_export_dir() {
        let dir = tempfile::tempdir().unwrap();
        let export_dir = dir.path().join("efficientnetv2_b0");

        let err = unpack_saved_model(b"definitely not gzip", &export_dir).unwrap_err();

        assert!(matches!(err, Error::Archive { .. }));
        assert!(!export_dir.exists());
        assert!(!staging_dir(&export_dir).exists());
    }
}

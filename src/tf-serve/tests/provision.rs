use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tf_serve::provision::{Fetch, Provisioner, StepOutcome};
use tf_serve::{AssetPaths, ClassLabelTable, Error, ProvisionConfig, Result, IMAGENET_CLASSES};

const WEIGHTS_URL: &str = "https://example.test/efficientnetv2_b0.tar.gz";
const LABELS_URL: &str = "https://example.test/imagenet_class_index.json";

#[derive(Default)]
struct FakeFetcher {
    responses: HashMap<&'static str, Vec<u8>>,
    calls: RefCell<Vec<String>>,
}

impl FakeFetcher {
    fn serving(weights: Option<Vec<u8>>, labels: Option<Vec<u8>>) -> Self {
        let mut responses = HashMap::new();
        if let Some(w) = weights {
            responses.insert(WEIGHTS_URL, w);
        }
        if let Some(l) = labels {
            responses.insert(LABELS_URL, l);
        }
        FakeFetcher {
            responses,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl Fetch for FakeFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.borrow_mut().push(url.to_owned());
        self.responses.get(url).cloned().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("404 for {}", url),
            ))
        })
    }
}

fn class_index(n: usize) -> Vec<u8> {
    // Deliberately out of order: the flat list must follow the keys.
    let entries: Vec<String> = (0..n)
        .rev()
        .map(|i| format!("\"{}\": [\"n{:08}\", \"class_{}\"]", i, i, i))
        .collect();
    format!("{{{}}}", entries.join(",")).into_bytes()
}

fn saved_model_archive(prefix: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    for (name, data) in [
        ("saved_model.pb", &b"graph"[..]),
        ("variables/variables.index", &b"index"[..]),
        ("variables/variables.data-00000-of-00001", &b"data"[..]),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, format!("{}{}", prefix, name), data)
            .unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap()
}

fn config(models_dir: &Path) -> ProvisionConfig {
    ProvisionConfig {
        paths: AssetPaths::in_dir(models_dir),
        weights_url: WEIGHTS_URL.to_owned(),
        labels_url: LABELS_URL.to_owned(),
    }
}

#[test]
fn fresh_run_saves_both_assets() {
    let dir = tempfile::tempdir().unwrap();
    let models = dir.path().join("models");
    let fetcher = FakeFetcher::serving(
        Some(saved_model_archive("")),
        Some(class_index(IMAGENET_CLASSES)),
    );

    let report = Provisioner::new(config(&models), &fetcher).run().unwrap();

    assert!(report.is_complete());
    let paths = AssetPaths::in_dir(&models);
    assert_eq!(report.weights, StepOutcome::Saved(paths.export_dir.clone()));
    assert_eq!(report.labels, StepOutcome::Saved(paths.labels_path.clone()));

    assert!(paths.export_dir.join("saved_model.pb").is_file());
    assert!(paths.export_dir.join("variables/variables.index").is_file());
    assert!(!models.join(".efficientnetv2_b0.partial").exists());
}

#[test]
fn saved_labels_follow_the_index_keys() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::serving(
        Some(saved_model_archive("")),
        Some(class_index(IMAGENET_CLASSES)),
    );

    Provisioner::new(config(dir.path()), &fetcher).run().unwrap();

    let table = ClassLabelTable::load(&AssetPaths::in_dir(dir.path()).labels_path).unwrap();
    assert_eq!(table.len(), IMAGENET_CLASSES);
    for i in [0, 1, 500, 999] {
        assert_eq!(table.name(i), Some(format!("class_{}", i).as_str()));
    }
}

#[test]
fn second_run_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let paths = AssetPaths::in_dir(dir.path());

    let first = FakeFetcher::serving(
        Some(saved_model_archive("")),
        Some(class_index(IMAGENET_CLASSES)),
    );
    Provisioner::new(config(dir.path()), &first).run().unwrap();
    assert_eq!(first.calls(), 2);

    let labels_before = fs::read(&paths.labels_path).unwrap();
    let graph_before = fs::read(paths.export_dir.join("saved_model.pb")).unwrap();

    let second = FakeFetcher::default();
    let report = Provisioner::new(config(dir.path()), &second).run().unwrap();

    assert!(report.already_present());
    assert_eq!(second.calls(), 0);
    assert_eq!(fs::read(&paths.labels_path).unwrap(), labels_before);
    assert_eq!(
        fs::read(paths.export_dir.join("saved_model.pb")).unwrap(),
        graph_before
    );
}

#[test]
fn label_failure_keeps_the_weights() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::serving(Some(saved_model_archive("")), None);

    let report = Provisioner::new(config(dir.path()), &fetcher).run().unwrap();

    assert!(matches!(report.weights, StepOutcome::Saved(_)));
    assert!(matches!(report.labels, StepOutcome::Failed(_)));

    let paths = AssetPaths::in_dir(dir.path());
    assert!(paths.export_dir.join("saved_model.pb").is_file());
    assert!(!paths.labels_path.exists());
}

#[test]
fn weights_failure_still_fetches_labels() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::serving(None, Some(class_index(IMAGENET_CLASSES)));

    let report = Provisioner::new(config(dir.path()), &fetcher).run().unwrap();

    assert!(matches!(report.weights, StepOutcome::Failed(_)));
    assert!(matches!(report.labels, StepOutcome::Saved(_)));
    assert!(!AssetPaths::in_dir(dir.path()).export_dir.exists());
}

#[test]
fn only_the_missing_asset_is_fetched() {
    let dir = tempfile::tempdir().unwrap();
    let first = FakeFetcher::serving(Some(saved_model_archive("")), None);
    Provisioner::new(config(dir.path()), &first).run().unwrap();

    let second = FakeFetcher::serving(None, Some(class_index(IMAGENET_CLASSES)));
    let report = Provisioner::new(config(dir.path()), &second).run().unwrap();

    assert_eq!(report.weights, StepOutcome::Skipped);
    assert!(matches!(report.labels, StepOutcome::Saved(_)));
    assert_eq!(*second.calls.borrow(), vec![LABELS_URL.to_owned()]);
}

#[test]
fn short_class_index_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::serving(Some(saved_model_archive("")), Some(class_index(10)));

    let report = Provisioner::new(config(dir.path()), &fetcher).run().unwrap();

    assert!(matches!(report.labels, StepOutcome::Failed(_)));
    assert!(!AssetPaths::in_dir(dir.path()).labels_path.exists());
}

#[test]
fn archive_with_top_level_directory() {
    let dir = tempfile::tempdir().unwrap();
    let export_dir = dir.path().join("efficientnetv2_b0");

    tf_serve::provision::unpack_saved_model(&saved_model_archive("b0/"), &export_dir).unwrap();

    assert!(export_dir.join("saved_model.pb").is_file());
    assert!(export_dir.join("variables").is_dir());
}

#[test]
fn archive_without_saved_model_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let export_dir = dir.path().join("efficientnetv2_b0");

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(5);
    header.set_mode(0o644);
    builder
        .append_data(&mut header, "README.md", &b"hello"[..])
        .unwrap();
    let archive = builder.into_inner().unwrap().finish().unwrap();

    let err = tf_serve::provision::unpack_saved_model(&archive, &export_dir).unwrap_err();
    assert!(matches!(err, Error::Archive { .. }));
    assert!(!export_dir.exists());
}

//! Runs the real model. Provision `models/` with `tf-setup` first and point
//! `REFERENCE_IMAGE` at a photo of a golden retriever.

use std::path::{Path, PathBuf};

use tf_serve::{AssetPaths, ClassifierConfig, ImageClassifier};

fn models_dir() -> PathBuf {
    std::env::var_os("TF_MODELS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("../../models"))
}

#[test]
#[ignore = "needs provisioned model assets and REFERENCE_IMAGE"]
fn golden_retriever_is_top_1() {
    let _ = env_logger::builder().is_test(true).try_init();

    let image = PathBuf::from(std::env::var("REFERENCE_IMAGE")
        .expect("set REFERENCE_IMAGE to the path of a golden retriever photo"));
    let config = ClassifierConfig::from_assets(&AssetPaths::in_dir(&models_dir()));

    let classifier = ImageClassifier::load(&config).unwrap();
    let classification = classifier.classify_from_path(&image).unwrap();

    let predictions = &classification.predictions;
    assert_eq!(predictions.len(), 5);
    assert_eq!(predictions.top_1().unwrap().class_name, "golden_retriever");
}

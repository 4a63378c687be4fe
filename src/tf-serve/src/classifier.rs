use std::collections::HashMap;
use std::os::raw::c_int;
use std::path::Path;

use image::DynamicImage;
use log::{debug, info};
use serde::Serialize;
use tensorflow::{
    Graph, SavedModelBundle, Session, SessionOptions, SessionRunArgs, Tensor, TensorInfo,
};

use crate::config::{ClassifierConfig, OutputKind};
use crate::error::{Error, Result};
use crate::labels::ClassLabelTable;
use crate::prediction::{self, PredictionResult};
use crate::preprocess;
use crate::timer::Timer;

/// A model that maps one preprocessed image to a score per class.
pub trait Backend: Send + Sync {
    /// `input` holds a `[1, size, size, 3]` NHWC batch.
    fn forward(&self, input: &[f32], size: u32) -> Result<Vec<f32>>;
}

/// A TensorFlow SavedModel run through its serving signature.
pub struct TfBackend {
    /// TensorFlow model graph
    graph: Graph,

    /// TensorFlow session
    session: Session,

    /// Operation name and output index fed with the image batch
    input: (String, c_int),

    /// Operation name and output index holding the class scores
    output: (String, c_int),
}

impl TfBackend {
    pub fn load(export_dir: &Path, signature: &str) -> Result<Self> {
        let t = Timer::start("Loading session");

        let mut graph = Graph::new();
        let bundle =
            SavedModelBundle::load(&SessionOptions::new(), &["serve"], &mut graph, export_dir)?;

        let signature_def = bundle.meta_graph_def().get_signature(signature)?;
        let input = single_tensor(tensor_names(signature_def.inputs()), signature, "input")?;
        let output = single_tensor(tensor_names(signature_def.outputs()), signature, "output")?;

        debug!(
            "Signature {}: feeding {}:{}, fetching {}:{}",
            signature, input.0, input.1, output.0, output.1
        );

        // Fail at load time rather than on the first request.
        graph.operation_by_name_required(&input.0)?;
        graph.operation_by_name_required(&output.0)?;

        t.stop();

        Ok(TfBackend {
            graph,
            session: bundle.session,
            input,
            output,
        })
    }
}

fn tensor_names(
    tensors: &HashMap<String, TensorInfo>,
) -> impl Iterator<Item = (String, c_int)> + '_ {
    tensors
        .values()
        .map(|info| (info.name().name.clone(), info.name().index))
}

/// The only `(operation, index)` pair of a signature's inputs or outputs.
fn single_tensor(
    tensors: impl IntoIterator<Item = (String, c_int)>,
    signature: &str,
    kind: &'static str,
) -> Result<(String, c_int)> {
    let mut tensors = tensors.into_iter();
    match (tensors.next(), tensors.next()) {
        (Some(tensor), None) => Ok(tensor),
        _ => Err(Error::Signature {
            signature: signature.to_owned(),
            kind,
        }),
    }
}

impl Backend for TfBackend {
    fn forward(&self, input: &[f32], size: u32) -> Result<Vec<f32>> {
        let size = u64::from(size);
        let input = Tensor::new(&[1, size, size, 3]).with_values(input)?;

        let mut args = SessionRunArgs::new();
        args.add_feed(
            &self.graph.operation_by_name_required(&self.input.0)?,
            self.input.1,
            &input,
        );
        let result = args.request_fetch(
            &self.graph.operation_by_name_required(&self.output.0)?,
            self.output.1,
        );

        self.session.run(&mut args)?;
        let output: Tensor<f32> = args.fetch(result)?;

        Ok(output.to_vec())
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Timings {
    /// Time spent fetching image from URL
    pub url_fetch: i64,

    /// Time spent loading image in memory
    pub image_load: i64,

    /// Time resizing image
    pub image_resize: i64,

    /// Time spent on running session
    pub session_run: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub predictions: PredictionResult,

    /// Milliseconds per stage
    pub timings: Timings,
}

pub struct ImageClassifier {
    backend: Box<dyn Backend>,
    labels: ClassLabelTable,
    config: ClassifierConfig,
}

impl ImageClassifier {
    /// Load the SavedModel and label table named by `config`.
    pub fn load(config: &ClassifierConfig) -> Result<Self> {
        let backend = TfBackend::load(&config.export_dir, &config.signature)?;
        let labels = ClassLabelTable::load(&config.labels_path)?;

        info!(
            "Loaded model from {} with {} labels",
            config.export_dir.display(),
            labels.len()
        );

        ImageClassifier::new(Box::new(backend), labels, config.clone())
    }

    pub fn new(
        backend: Box<dyn Backend>,
        labels: ClassLabelTable,
        config: ClassifierConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(ImageClassifier {
            backend,
            labels,
            config,
        })
    }

    pub fn labels(&self) -> &ClassLabelTable {
        &self.labels
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn run(&self, input: &[f32]) -> Result<Classification> {
        let t = Timer::start("Running session");

        let mut scores = self.backend.forward(input, self.config.input_size)?;
        if self.config.output == OutputKind::Logits {
            scores = prediction::softmax(&scores);
        }

        let predictions =
            prediction::decode_predictions(&scores, &self.labels, self.config.top_k)?;

        Ok(Classification {
            predictions,
            timings: Timings {
                session_run: t.stop(),
                ..Default::default()
            },
        })
    }

    pub fn classify(&self, image: &DynamicImage) -> Result<Classification> {
        let t = Timer::start("Resizing image");

        let input =
            preprocess::to_input(image, self.config.input_size, self.config.normalization);

        let resize_ms = t.stop();

        let mut classification = self.run(&input)?;
        classification.timings.image_resize = resize_ms;

        Ok(classification)
    }

    pub fn classify_from_raw(&self, data: &[u8]) -> Result<Classification> {
        let t = Timer::start("Load image from memory");

        let image = preprocess::decode(data)?;

        let load_ms = t.stop();

        let mut classification = self.classify(&image)?;
        classification.timings.image_load = load_ms;

        Ok(classification)
    }

    pub fn classify_from_path(&self, path: &Path) -> Result<Classification> {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            preprocess::format_for_extension(ext)?;
        }

        let data = std::fs::read(path)?;
        self.classify_from_raw(&data)
    }

    pub fn classify_from_url(&self, url: &str) -> Result<Classification> {
        let t = Timer::start(format!("Fetching image from {}", url));

        let buf = reqwest::blocking::get(url)?.error_for_status()?.bytes()?;

        let fetch_ms = t.stop();

        let mut classification = self.classify_from_raw(&buf)?;
        classification.timings.url_fetch = fetch_ms;

        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Normalization;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    /// Scores every class by how close its index is to the mean input value.
    struct MeanBackend;

    impl Backend for MeanBackend {
        fn forward(&self, input: &[f32], size: u32) -> Result<Vec<f32>> {
            assert_eq!(input.len(), (size * size * 3) as usize);
            let mean = input.iter().sum::<f32>() / input.len() as f32;
            Ok((0..8).map(|i| -(i as f32 - mean).abs()).collect())
        }
    }

    fn classifier() -> ImageClassifier {
        let labels = ClassLabelTable::new((0..8).map(|i| format!("class_{}", i)).collect());
        let config = ClassifierConfig {
            input_size: 16,
            normalization: Normalization::Raw,
            output: OutputKind::Logits,
            ..Default::default()
        };
        ImageClassifier::new(Box::new(MeanBackend), labels, config).unwrap()
    }

    fn png(value: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        RgbImage::from_pixel(32, 20, Rgb([value, value, value]))
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn signature_must_name_exactly_one_tensor() {
        let one = vec![("serving_default_input_1".to_owned(), 0)];
        assert_eq!(
            single_tensor(one, "serving_default", "input").unwrap(),
            ("serving_default_input_1".to_owned(), 0)
        );

        let err = single_tensor(Vec::new(), "serving_default", "output").unwrap_err();
        assert!(matches!(err, Error::Signature { kind: "output", .. }));

        let two = vec![("logits".to_owned(), 0), ("probs".to_owned(), 1)];
        let err = single_tensor(two, "serving_default", "output").unwrap_err();
        assert_eq!(
            err.to_string(),
            "signature `serving_default` has no single output tensor"
        );
    }

    #[test]
    fn zero_top_k_is_rejected_up_front() {
        let labels = ClassLabelTable::new(vec!["tench".into()]);
        let config = ClassifierConfig {
            top_k: 0,
            ..Default::default()
        };

        let err = ImageClassifier::new(Box::new(MeanBackend), labels, config)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn classifies_raw_png_bytes() {
        let classification = classifier().classify_from_raw(&png(3)).unwrap();
        let predictions = &classification.predictions;

        assert_eq!(predictions.len(), 5);
        assert_eq!(predictions.top_1().unwrap().class_name, "class_3");

        let sum: f32 = predictions.iter().map(|p| p.confidence).sum();
        assert!(sum <= 1.0 + 1e-5);
    }

    #[test]
    fn undecodable_bytes_are_an_image_error() {
        let err = classifier().classify_from_raw(b"\x89PNG but not really").unwrap_err();
        assert!(matches!(err, Error::Image(_)));
    }

    #[test]
    fn unsupported_extension_is_rejected_before_reading() {
        let err = classifier()
            .classify_from_path(Path::new("does/not/exist.gif"))
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::labels::ClassLabelTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class_id: usize,
    pub class_name: String,
    /// Probability in `[0, 1]`
    pub confidence: f32,
}

/// Top-k predictions, highest confidence first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionResult(Vec<Prediction>);

impl PredictionResult {
    pub fn top_1(&self) -> Option<&Prediction> {
        self.0.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Prediction> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a PredictionResult {
    type Item = &'a Prediction;
    type IntoIter = std::slice::Iter<'a, Prediction>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    exps.into_iter().map(|x| x / sum).collect()
}

/// Pick the `k` highest scores and attach their class names.
///
/// A score vector one longer than the label table carries a leading
/// background class, which is dropped.
pub fn decode_predictions(
    scores: &[f32],
    labels: &ClassLabelTable,
    k: usize,
) -> Result<PredictionResult> {
    let scores = match scores.len() {
        n if n == labels.len() => scores,
        n if n == labels.len() + 1 => &scores[1..],
        n => {
            return Err(Error::OutputShape {
                got: n,
                labels: labels.len(),
            })
        }
    };

    let mut ranked: Vec<(usize, f32)> = scores
        .iter()
        .map(|s| if s.is_nan() { 0.0 } else { *s })
        .enumerate()
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let predictions = ranked
        .into_iter()
        .take(k)
        .map(|(class_id, score)| Prediction {
            class_id,
            // Every index is in range after the length check above.
            class_name: labels.name(class_id).unwrap_or_default().to_owned(),
            confidence: score.clamp(0.0, 1.0),
        })
        .collect();

    Ok(PredictionResult(predictions))
}

//! Barcode value recognition model

use super::backend::InferenceBackend;
use crate::config::{InputSize, RecognizerConfig};
use crate::error::{Result, VisionError};
use crate::processing::preprocess_image;
use image::RgbImage;
use ndarray::{Array2, ArrayD, ArrayView2, Axis, Ix2};
use std::sync::Arc;
use tracing::debug;

/// Sequence recognizer reading the value of a single cropped barcode
pub struct Recognizer {
    backend: Arc<dyn InferenceBackend>,
    input_size: InputSize,
    alphabet: Vec<char>,
}

impl Recognizer {
    pub fn new(backend: Arc<dyn InferenceBackend>, input_size: InputSize, alphabet: &str) -> Self {
        Self {
            backend,
            input_size,
            alphabet: alphabet.chars().collect(),
        }
    }

    /// Build from configuration around an already loaded backend
    pub fn from_config(backend: Arc<dyn InferenceBackend>, config: &RecognizerConfig) -> Self {
        Self::new(backend, config.input_size(), &config.alphabet)
    }

    /// Recognize the barcode value shown in `image`
    pub fn predict(&self, image: &RgbImage) -> Result<String> {
        let input = preprocess_image(image, self.input_size)?;
        let output = self.backend.infer(input)?;
        let logits = sequence_logits(output)?;
        let value = ctc_greedy_decode(logits.view(), &self.alphabet);
        debug!("Recognizer decoded {} symbols", value.chars().count());
        Ok(value)
    }
}

/// Reduce a `(1, T, C)` or `(T, C)` output to `(T, C)`
fn sequence_logits(output: ArrayD<f32>) -> Result<Array2<f32>> {
    let output = match output.ndim() {
        3 if output.shape()[0] == 1 => output.index_axis_move(Axis(0), 0),
        2 => output,
        _ => {
            return Err(VisionError::Processing(format!(
                "Expected recognizer output of shape (1, T, C) or (T, C), got {:?}",
                output.shape()
            )))
        }
    };
    Ok(output.into_dimensionality::<Ix2>()?)
}

/// Greedy CTC decoding: best class per step, repeats collapsed, blank (class 0) dropped.
///
/// Class `k >= 1` maps to `alphabet[k - 1]`; classes beyond the alphabet are skipped.
pub fn ctc_greedy_decode(logits: ArrayView2<'_, f32>, alphabet: &[char]) -> String {
    let mut decoded = String::new();
    let mut previous = None;

    for step in logits.axis_iter(Axis(0)) {
        let best = step
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (class, &score)| match best {
                Some((_, top)) if top >= score => best,
                _ => Some((class, score)),
            })
            .map(|(class, _)| class);

        if best != previous {
            if let Some(class) = best.filter(|&c| c > 0) {
                if let Some(&symbol) = alphabet.get(class - 1) {
                    decoded.push(symbol);
                }
            }
        }
        previous = best;
    }

    decoded
}

//! Barcode segmentation model

use super::backend::InferenceBackend;
use crate::config::{InputSize, SegmentationConfig};
use crate::error::{Result, VisionError};
use crate::processing::{masks_to_bboxes, preprocess_image, resize_mask_back_to_original, CocoBox};
use crate::utils::sigmoid;
use image::RgbImage;
use ndarray::{Array2, ArrayD};
use std::sync::Arc;
use tracing::debug;

/// Segmentation model producing a per-pixel barcode logit map
pub struct Segmenter {
    backend: Arc<dyn InferenceBackend>,
    input_size: InputSize,
    threshold: f32,
}

impl Segmenter {
    pub fn new(backend: Arc<dyn InferenceBackend>, input_size: InputSize, threshold: f32) -> Self {
        Self {
            backend,
            input_size,
            threshold,
        }
    }

    /// Build from configuration around an already loaded backend
    pub fn from_config(backend: Arc<dyn InferenceBackend>, config: &SegmentationConfig) -> Self {
        Self::new(backend, config.input_size(), config.threshold)
    }

    /// Raw model output mapped back onto the original image, shape `(H, W)`
    pub fn predict_mask(&self, image: &RgbImage) -> Result<Array2<f32>> {
        let (width, height) = image.dimensions();
        let logits = self.forward(image)?;
        resize_mask_back_to_original(logits.view(), height as usize, width as usize)
    }

    /// Bounding boxes of every detected barcode, in original image coordinates
    pub fn predict(&self, image: &RgbImage) -> Result<Vec<CocoBox>> {
        let (width, height) = image.dimensions();
        let logits = self.forward(image)?;

        let threshold = self.threshold;
        let binary = logits.mapv(|v| if sigmoid(v) > threshold { 255u8 } else { 0 });
        let mask = resize_mask_back_to_original(binary.view(), height as usize, width as usize)?;

        let boxes = masks_to_bboxes(mask.view())?;
        debug!("Segmenter found {} barcode regions", boxes.len());
        Ok(boxes)
    }

    /// Preprocess and run the backend, returning the 2-D logit map in canvas coordinates
    fn forward(&self, image: &RgbImage) -> Result<Array2<f32>> {
        let input = preprocess_image(image, self.input_size)?;
        let output = self.backend.infer(input)?;
        squeeze_to_2d(output)
    }
}

/// Drop leading singleton axes so `(1, 1, H, W)` style outputs become `(H, W)`
fn squeeze_to_2d(output: ArrayD<f32>) -> Result<Array2<f32>> {
    let shape = output.shape().to_vec();
    if shape.len() < 2 || shape[..shape.len() - 2].iter().any(|&d| d != 1) {
        return Err(VisionError::Processing(format!(
            "Expected a single-channel mask output, got shape {:?}",
            shape
        )));
    }
    let (h, w) = (shape[shape.len() - 2], shape[shape.len() - 1]);
    Ok(output.into_shape_with_order((h, w))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backend::MockInferenceBackend;
    use image::Rgb;
    use ndarray::{s, Array4, IxDyn};

    fn backend_returning(output: ArrayD<f32>) -> Arc<dyn InferenceBackend> {
        let mut mock = MockInferenceBackend::new();
        mock.expect_infer()
            .withf(|input: &Array4<f32>| input.shape() == [1, 3, 224, 224])
            .returning(move |_| Ok(output.clone()));
        Arc::new(mock)
    }

    #[test]
    fn test_predict_mask_has_original_size() {
        let backend = backend_returning(ArrayD::zeros(IxDyn(&[1, 1, 224, 224])));
        let segmenter = Segmenter::new(backend, InputSize::default(), 0.5);
        let image = RgbImage::from_pixel(640, 480, Rgb([10, 20, 30]));
        let mask = segmenter.predict_mask(&image).unwrap();
        assert_eq!(mask.dim(), (480, 640));
    }

    #[test]
    fn test_predict_mask_keeps_raw_values() {
        let backend = backend_returning(ArrayD::from_elem(IxDyn(&[1, 1, 224, 224]), -3.25));
        let segmenter = Segmenter::new(backend, InputSize::default(), 0.5);
        let image = RgbImage::new(224, 224);
        let mask = segmenter.predict_mask(&image).unwrap();
        assert!(mask.iter().all(|&v| v == -3.25));
    }

    #[test]
    fn test_predict_empty_when_all_negative() {
        let backend = backend_returning(ArrayD::from_elem(IxDyn(&[1, 1, 224, 224]), -5.0));
        let segmenter = Segmenter::new(backend, InputSize::default(), 0.5);
        let boxes = segmenter.predict(&RgbImage::new(448, 224)).unwrap();
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_predict_maps_box_to_original_coordinates() {
        // 448x448 image: scale 0.5, no padding
        let mut logits = ArrayD::from_elem(IxDyn(&[1, 1, 224, 224]), -5.0f32);
        logits.slice_mut(s![0, 0, 10..20, 30..60]).fill(5.0);
        let segmenter = Segmenter::new(backend_returning(logits), InputSize::default(), 0.5);
        let boxes = segmenter.predict(&RgbImage::new(448, 448)).unwrap();
        assert_eq!(boxes, vec![CocoBox::new(60, 20, 60, 20)]);
    }

    #[test]
    fn test_predict_threshold_is_strict() {
        // sigmoid(0) == 0.5 is not above a 0.5 threshold
        let backend = backend_returning(ArrayD::zeros(IxDyn(&[1, 1, 224, 224])));
        let segmenter = Segmenter::new(backend, InputSize::default(), 0.5);
        assert!(segmenter.predict(&RgbImage::new(224, 224)).unwrap().is_empty());
    }

    #[test]
    fn test_backend_error_propagates() {
        let mut mock = MockInferenceBackend::new();
        mock.expect_infer()
            .returning(|_| Err(VisionError::Ort("boom".to_string())));
        let segmenter = Segmenter::new(Arc::new(mock), InputSize::default(), 0.5);
        let err = segmenter.predict(&RgbImage::new(32, 32)).unwrap_err();
        assert!(matches!(err, VisionError::Ort(_)));
    }

    #[test]
    fn test_multi_channel_output_rejected() {
        let backend = backend_returning(ArrayD::zeros(IxDyn(&[1, 2, 224, 224])));
        let segmenter = Segmenter::new(backend, InputSize::default(), 0.5);
        let err = segmenter.predict_mask(&RgbImage::new(64, 64)).unwrap_err();
        assert!(matches!(err, VisionError::Processing(_)));
    }

    #[test]
    fn test_squeeze_accepts_plain_2d() {
        let out = squeeze_to_2d(ArrayD::zeros(IxDyn(&[5, 7]))).unwrap();
        assert_eq!(out.dim(), (5, 7));
    }
}

//! Tests for the segmentation, recognition and full recognition pipelines with stub backends

use barscan_eye::error::Result;
use barscan_eye::processing::{CocoBox, MinMaxBox, RecognitionPipeline};
use barscan_eye::{InferenceBackend, InputSize, Recognizer, Segmenter, VisionError};
use image::{Rgb, RgbImage};
use ndarray::{s, Array2, Array4, ArrayD, Axis};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Returns the normalized red channel as a `(1, 1, H, W)` logit map.
/// Pixels brighter than the ImageNet red mean come out positive.
struct RedChannelBackend;

impl InferenceBackend for RedChannelBackend {
    fn infer(&self, input: Array4<f32>) -> Result<ArrayD<f32>> {
        let red = input.slice(s![.., 0..1, .., ..]).to_owned();
        Ok(red.into_dyn())
    }

    fn name(&self) -> &str {
        "red-channel"
    }
}

/// Always emits the same one-hot sequence and counts calls
struct FixedSequenceBackend {
    classes: Vec<usize>,
    calls: AtomicUsize,
}

impl FixedSequenceBackend {
    fn new(classes: Vec<usize>) -> Self {
        Self {
            classes,
            calls: AtomicUsize::new(0),
        }
    }
}

impl InferenceBackend for FixedSequenceBackend {
    fn infer(&self, _input: Array4<f32>) -> Result<ArrayD<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut logits = Array2::<f32>::zeros((self.classes.len(), 11));
        for (t, &c) in self.classes.iter().enumerate() {
            logits[[t, c]] = 1.0;
        }
        Ok(logits.insert_axis(Axis(0)).into_dyn())
    }

    fn name(&self) -> &str {
        "fixed-sequence"
    }
}

fn draw_rect(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32) {
    for yy in y..y + h {
        for xx in x..x + w {
            image.put_pixel(xx, yy, Rgb([255, 255, 255]));
        }
    }
}

fn segmenter() -> Arc<Segmenter> {
    Arc::new(Segmenter::new(Arc::new(RedChannelBackend), InputSize::default(), 0.5))
}

#[test]
fn test_segmenter_finds_single_rectangle() {
    let mut image = RgbImage::new(224, 224);
    draw_rect(&mut image, 20, 100, 60, 30);

    let boxes = segmenter().predict(&image).unwrap();
    assert_eq!(boxes, vec![CocoBox::new(20, 100, 60, 30)]);
}

#[test]
fn test_segmenter_maps_back_through_downscale() {
    // 448x448 is fitted at scale 0.5 with no padding
    let mut image = RgbImage::new(448, 448);
    draw_rect(&mut image, 40, 200, 120, 60);

    let boxes = segmenter().predict(&image).unwrap();
    assert_eq!(boxes, vec![CocoBox::new(40, 200, 120, 60)]);
}

#[test]
fn test_segmenter_maps_back_through_padding() {
    // 448x224 is fitted at scale 0.5 with 56 rows of padding on top and bottom
    let mut image = RgbImage::new(448, 224);
    draw_rect(&mut image, 100, 40, 80, 100);

    let boxes = segmenter().predict(&image).unwrap();
    assert_eq!(boxes, vec![CocoBox::new(100, 40, 80, 100)]);
}

#[test]
fn test_segmenter_orders_boxes_in_raster_order() {
    let mut image = RgbImage::new(224, 224);
    draw_rect(&mut image, 10, 150, 40, 20);
    draw_rect(&mut image, 150, 10, 40, 20);

    let boxes = segmenter().predict(&image).unwrap();
    assert_eq!(
        boxes,
        vec![CocoBox::new(150, 10, 40, 20), CocoBox::new(10, 150, 40, 20)]
    );
}

#[test]
fn test_predict_mask_matches_image_size() {
    let image = RgbImage::new(300, 120);
    let mask = segmenter().predict_mask(&image).unwrap();
    assert_eq!(mask.dim(), (120, 300));
}

#[test]
fn test_recognition_pipeline_reads_each_region() {
    let mut image = RgbImage::new(224, 224);
    draw_rect(&mut image, 10, 20, 50, 30);
    draw_rect(&mut image, 120, 150, 40, 40);

    let backend = Arc::new(FixedSequenceBackend::new(vec![5, 5, 0, 3]));
    let recognizer = Arc::new(Recognizer::new(backend.clone(), InputSize::default(), "0123456789"));
    let pipeline = RecognitionPipeline::new(segmenter(), recognizer);

    let results = pipeline.recognize_image(&image).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);

    // y_max follows the box width
    assert_eq!(
        results[0].bbox,
        MinMaxBox {
            x_min: 10,
            x_max: 60,
            y_min: 20,
            y_max: 70,
        }
    );
    assert_eq!(results[0].value, "42");
    assert_eq!(
        results[1].bbox,
        MinMaxBox {
            x_min: 120,
            x_max: 160,
            y_min: 150,
            y_max: 190,
        }
    );
}

#[test]
fn test_recognition_pipeline_no_barcodes() {
    let backend = Arc::new(FixedSequenceBackend::new(vec![1]));
    let recognizer = Arc::new(Recognizer::new(backend.clone(), InputSize::default(), "0123456789"));
    let pipeline = RecognitionPipeline::new(segmenter(), recognizer);

    let results = pipeline.recognize_image(&RgbImage::new(64, 64)).unwrap();
    assert!(results.is_empty());
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_recognizer_standalone() {
    let backend = Arc::new(FixedSequenceBackend::new(vec![2, 0, 2, 9]));
    let recognizer = Recognizer::new(backend, InputSize::new(32, 128), "0123456789");
    let value = recognizer.predict(&RgbImage::new(200, 50)).unwrap();
    assert_eq!(value, "118");
}

#[test]
fn test_unreadable_sliver_fails_whole_image() {
    let mut image = RgbImage::new(224, 224);
    draw_rect(&mut image, 10, 20, 50, 30);
    // Full-width line on the last row: the crop is 224x1 and cannot be letterboxed into 32x128
    draw_rect(&mut image, 0, 223, 224, 1);

    let backend = Arc::new(FixedSequenceBackend::new(vec![5]));
    let recognizer = Arc::new(Recognizer::new(backend.clone(), InputSize::new(32, 128), "0123456789"));
    let pipeline = RecognitionPipeline::new(segmenter(), recognizer);

    let err = pipeline.recognize_image(&image).unwrap_err();
    assert!(matches!(err, VisionError::Processing(_)));
    // The first region was read before the sliver failed; nothing is returned for it
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

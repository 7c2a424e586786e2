//! Detect-then-read pipeline over a whole image

use super::bbox::{prepare_bbox, MinMaxBox};
use crate::error::Result;
use crate::models::{Recognizer, Segmenter};
use crate::utils::crop_rgb;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// A barcode located in an image together with its decoded value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognizedBarcode {
    pub bbox: MinMaxBox,
    pub value: String,
}

/// Recognition pipeline: segment, crop every region, read each crop
pub struct RecognitionPipeline {
    segmenter: Arc<Segmenter>,
    recognizer: Arc<Recognizer>,
}

impl RecognitionPipeline {
    pub fn new(segmenter: Arc<Segmenter>, recognizer: Arc<Recognizer>) -> Self {
        Self { segmenter, recognizer }
    }

    /// Find and read every barcode in `image`, in detection order.
    ///
    /// A region that cannot be cropped or read fails the whole call; partial results
    /// are never returned.
    pub fn recognize_image(&self, image: &RgbImage) -> Result<Vec<RecognizedBarcode>> {
        let boxes = self.segmenter.predict(image)?;
        debug!("Recognizing {} detected regions", boxes.len());

        boxes
            .iter()
            .map(|coco| {
                let bbox = prepare_bbox(coco);
                let value = crop_rgb(image, &bbox)
                    .and_then(|crop| self.recognizer.predict(&crop))
                    .map_err(|e| {
                        debug!("Region {:?} could not be read: {}", bbox, e);
                        e
                    })?;
                Ok(RecognizedBarcode { bbox, value })
            })
            .collect()
    }
}

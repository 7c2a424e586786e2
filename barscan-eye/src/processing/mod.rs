//! Image geometry, mask post-processing and the recognition pipeline

pub mod bbox;
pub mod components;
pub mod geometry;
pub mod recognition;

pub use bbox::{prepare_bbox, CocoBox, MinMaxBox};
pub use components::{label_components, masks_to_bboxes};
pub use geometry::{preprocess_image, resize_mask_back_to_original, Letterbox};
pub use recognition::{RecognitionPipeline, RecognizedBarcode};

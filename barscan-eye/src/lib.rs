//! barscan-eye: barcode detection and recognition models
//!
//! Letterbox preprocessing, inverse mask mapping, connected-component box extraction
//! and the model services that wrap a pluggable inference backend.

pub mod config;
pub mod error;
pub mod models;
pub mod processing;
pub mod utils;

pub use config::{Device, InputSize, RecognizerConfig, SegmentationConfig, VisionConfig};
pub use error::{Result, VisionError};
pub use models::{InferenceBackend, ModelManager, Recognizer, Segmenter};
pub use processing::{CocoBox, MinMaxBox, RecognitionPipeline, RecognizedBarcode};

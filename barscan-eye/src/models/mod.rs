//! Model backends, model services and model loading

pub mod backend;
pub mod manager;
pub mod recognizer;
pub mod segmenter;

pub use backend::InferenceBackend;
#[cfg(feature = "onnx")]
pub use backend::OnnxBackend;
pub use manager::ModelManager;
pub use recognizer::Recognizer;
pub use segmenter::Segmenter;

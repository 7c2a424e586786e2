//! Inference backends that turn an input batch into a raw output tensor

use crate::error::Result;
use ndarray::{Array4, ArrayD};

/// A loaded network that maps a `(1, 3, H, W)` batch to its first output tensor.
///
/// Implementations must be shareable between request handlers.
#[cfg_attr(test, mockall::automock)]
pub trait InferenceBackend: Send + Sync {
    /// Run a forward pass
    fn infer(&self, input: Array4<f32>) -> Result<ArrayD<f32>>;

    /// Name used in logs
    fn name(&self) -> &str;
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxBackend;

#[cfg(feature = "onnx")]
mod onnx {
    use super::InferenceBackend;
    use crate::config::Device;
    use crate::error::{Result, VisionError};
    use ndarray::{Array4, ArrayD, IxDyn};
    use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;
    use parking_lot::Mutex;
    use std::path::Path;
    use tracing::{debug, info};

    /// ONNX Runtime session behind a lock; a run needs exclusive access
    pub struct OnnxBackend {
        name: String,
        session: Mutex<Session>,
    }

    impl OnnxBackend {
        /// Load a model file and build a session for `device`
        pub fn load(name: &str, model_path: &Path, device: Device, intra_threads: usize) -> Result<Self> {
            let builder = Session::builder()
                .map_err(|e| VisionError::Ort(format!("Failed to create session builder: {}", e)))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| VisionError::Ort(format!("Failed to set optimization level: {}", e)))?
                .with_intra_threads(intra_threads)
                .map_err(|e| VisionError::Ort(format!("Failed to set intra threads: {}", e)))?;

            let builder = match device {
                Device::Cpu => builder.with_execution_providers([CPUExecutionProvider::default().build()]),
                Device::Cuda => builder.with_execution_providers([
                    CUDAExecutionProvider::default().build(),
                    CPUExecutionProvider::default().build(),
                ]),
            }
            .map_err(|e| VisionError::Ort(format!("Failed to register execution provider: {}", e)))?;

            let session = builder
                .commit_from_file(model_path)
                .map_err(|e| VisionError::Ort(format!("Failed to load {} model: {}", name, e)))?;

            info!("{} model loaded from {:?} on {:?}", name, model_path, device);

            Ok(Self {
                name: name.to_string(),
                session: Mutex::new(session),
            })
        }
    }

    impl InferenceBackend for OnnxBackend {
        fn infer(&self, input: Array4<f32>) -> Result<ArrayD<f32>> {
            let input = Tensor::from_array(input)
                .map_err(|e| VisionError::Ort(format!("Failed to create input tensor: {}", e)))?;

            let mut session = self.session.lock();
            let outputs = session
                .run(ort::inputs![input])
                .map_err(|e| VisionError::Ort(format!("{} inference failed: {}", self.name, e)))?;

            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| VisionError::Ort(format!("Failed to extract {} output: {}", self.name, e)))?;

            let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            debug!("{} output shape {:?}", self.name, dims);

            Ok(ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())?)
        }

        fn name(&self) -> &str {
            &self.name
        }
    }
}

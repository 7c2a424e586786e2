//! Model manager: checkpoint verification and one-time model loading

use super::backend::InferenceBackend;
use super::recognizer::Recognizer;
use super::segmenter::Segmenter;
use crate::config::{Device, VisionConfig};
use crate::error::VisionError;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Builds a backend from (model name, checkpoint path, device, intra-op threads)
pub type BackendLoader =
    dyn Fn(&str, &Path, Device, usize) -> Result<Arc<dyn InferenceBackend>, VisionError> + Send + Sync;

/// Smallest file accepted as a model checkpoint
const MIN_CHECKPOINT_SIZE: u64 = 64;

/// Loads the segmentation and recognition models and shares them as singletons
pub struct ModelManager {
    config: Arc<VisionConfig>,
    loader: Arc<BackendLoader>,
    segmenter: Mutex<Option<Arc<Segmenter>>>,
    recognizer: Mutex<Option<Arc<Recognizer>>>,
}

impl ModelManager {
    /// Create a manager that loads checkpoints with ONNX Runtime
    pub fn new(config: Arc<VisionConfig>) -> Self {
        Self::with_loader(config, Arc::new(default_loader))
    }

    /// Create a manager with a custom backend loader
    pub fn with_loader(config: Arc<VisionConfig>, loader: Arc<BackendLoader>) -> Self {
        Self {
            config,
            loader,
            segmenter: Mutex::new(None),
            recognizer: Mutex::new(None),
        }
    }

    /// Segmentation model, loaded on first use
    pub fn segmenter(&self) -> Result<Arc<Segmenter>, VisionError> {
        let mut slot = self.segmenter.lock();
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        let cfg = &self.config.segmentation;
        cfg.validate().map_err(VisionError::Config)?;
        let path = verify_checkpoint(&cfg.checkpoint, cfg.sha256.as_deref())?;
        let backend = (self.loader)("segmentation", &path, cfg.device, cfg.intra_threads)?;

        let model = Arc::new(Segmenter::from_config(backend, cfg));
        *slot = Some(Arc::clone(&model));
        info!("Segmentation model ready ({:?})", path);
        Ok(model)
    }

    /// Recognition model, loaded on first use
    pub fn recognizer(&self) -> Result<Arc<Recognizer>, VisionError> {
        let mut slot = self.recognizer.lock();
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        let cfg = &self.config.recognizer;
        cfg.validate().map_err(VisionError::Config)?;
        let path = verify_checkpoint(&cfg.checkpoint, cfg.sha256.as_deref())?;
        let backend = (self.loader)("recognizer", &path, cfg.device, cfg.intra_threads)?;

        let model = Arc::new(Recognizer::from_config(backend, cfg));
        *slot = Some(Arc::clone(&model));
        info!("Recognizer model ready ({:?})", path);
        Ok(model)
    }

    /// Check if model is loaded
    pub fn is_loaded(&self, model_name: &str) -> bool {
        match model_name {
            "segmentation" => self.segmenter.lock().is_some(),
            "recognizer" => self.recognizer.lock().is_some(),
            _ => false,
        }
    }
}

/// Validate a checkpoint path and, when a digest is given, its SHA-256.
pub fn verify_checkpoint(path: &Path, expected_sha256: Option<&str>) -> Result<PathBuf, VisionError> {
    let metadata = fs::metadata(path)
        .map_err(|e| VisionError::Model(format!("Checkpoint {:?} is not accessible: {}", path, e)))?;

    if !metadata.is_file() {
        return Err(VisionError::Model(format!("Checkpoint {:?} is not a file", path)));
    }

    // Minimum size check (prevent empty/corrupted files)
    if metadata.len() < MIN_CHECKPOINT_SIZE {
        return Err(VisionError::Model(format!(
            "Checkpoint {:?} too small ({} bytes), likely corrupted",
            path,
            metadata.len()
        )));
    }

    match expected_sha256 {
        Some(expected) => {
            let computed = sha256_file(path)?;
            if !computed.eq_ignore_ascii_case(expected) {
                return Err(VisionError::Model(format!(
                    "Checksum mismatch for {:?}: expected {}, got {}",
                    path, expected, computed
                )));
            }
            info!("Verified checksum for {:?}", path);
        }
        None => warn!("No checksum configured for {:?}, skipping verification", path),
    }

    Ok(path.to_path_buf())
}

fn sha256_file(path: &Path) -> Result<String, VisionError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(feature = "onnx")]
fn default_loader(
    name: &str,
    path: &Path,
    device: Device,
    intra_threads: usize,
) -> Result<Arc<dyn InferenceBackend>, VisionError> {
    let backend = super::backend::OnnxBackend::load(name, path, device, intra_threads)?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "onnx"))]
fn default_loader(
    name: &str,
    _path: &Path,
    _device: Device,
    _intra_threads: usize,
) -> Result<Arc<dyn InferenceBackend>, VisionError> {
    Err(VisionError::Model(format!(
        "Cannot load {} model: built without the `onnx` feature",
        name
    )))
}

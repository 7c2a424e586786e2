//! Configuration for barscan-eye

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default square model input edge used by both models.
pub const DEFAULT_INPUT_SIZE: u32 = 224;

/// Execution device for a model session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
}

impl Default for Device {
    fn default() -> Self {
        Device::Cpu
    }
}

/// Spatial input size expected by a model, (height, width) order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSize {
    pub height: u32,
    pub width: u32,
}

impl InputSize {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }
}

impl Default for InputSize {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE)
    }
}

/// Segmentation (detector) model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Path to the model checkpoint
    pub checkpoint: PathBuf,
    pub device: Device,
    pub input_height: u32,
    pub input_width: u32,
    /// Probability above which a mask pixel counts as foreground
    pub threshold: f32,
    /// Optional hex SHA-256 of the checkpoint
    pub sha256: Option<String>,
    pub intra_threads: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            checkpoint: PathBuf::from("models/segmentation.onnx"),
            device: Device::Cpu,
            input_height: DEFAULT_INPUT_SIZE,
            input_width: DEFAULT_INPUT_SIZE,
            threshold: 0.5,
            sha256: None,
            intra_threads: 1,
        }
    }
}

impl SegmentationConfig {
    pub fn input_size(&self) -> InputSize {
        InputSize::new(self.input_height, self.input_width)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        validate_input_size(self.input_height, self.input_width)?;
        if !self.threshold.is_finite() || self.threshold <= 0.0 || self.threshold >= 1.0 {
            return Err("Segmentation threshold must be in (0, 1)".to_string());
        }
        validate_common(&self.checkpoint, self.intra_threads, self.sha256.as_deref())
    }
}

/// Recognizer model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub checkpoint: PathBuf,
    pub device: Device,
    pub input_height: u32,
    pub input_width: u32,
    pub sha256: Option<String>,
    pub intra_threads: usize,
    /// Symbols for output classes 1..=len; class 0 is the blank
    pub alphabet: String,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            checkpoint: PathBuf::from("models/recognizer.onnx"),
            device: Device::Cpu,
            input_height: DEFAULT_INPUT_SIZE,
            input_width: DEFAULT_INPUT_SIZE,
            sha256: None,
            intra_threads: 1,
            alphabet: "0123456789".to_string(),
        }
    }
}

impl RecognizerConfig {
    pub fn input_size(&self) -> InputSize {
        InputSize::new(self.input_height, self.input_width)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        validate_input_size(self.input_height, self.input_width)?;
        if self.alphabet.is_empty() {
            return Err("Recognizer alphabet must not be empty".to_string());
        }
        validate_common(&self.checkpoint, self.intra_threads, self.sha256.as_deref())
    }
}

/// Both models served by the process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub segmentation: SegmentationConfig,
    pub recognizer: RecognizerConfig,
}

impl VisionConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.segmentation
            .validate()
            .map_err(|e| format!("segmentation: {}", e))?;
        self.recognizer
            .validate()
            .map_err(|e| format!("recognizer: {}", e))
    }
}

fn validate_input_size(height: u32, width: u32) -> Result<(), String> {
    if height == 0 || width == 0 {
        return Err("Input size must be non-zero".to_string());
    }
    if height > 4096 || width > 4096 {
        return Err("Input size too large (max 4096)".to_string());
    }
    Ok(())
}

fn validate_common(checkpoint: &Path, intra_threads: usize, sha256: Option<&str>) -> Result<(), String> {
    if checkpoint.as_os_str().is_empty() {
        return Err("Checkpoint path must not be empty".to_string());
    }
    if intra_threads == 0 {
        return Err("intra_threads must be at least 1".to_string());
    }
    if let Some(digest) = sha256 {
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("sha256 must be 64 hex characters".to_string());
        }
    }
    Ok(())
}

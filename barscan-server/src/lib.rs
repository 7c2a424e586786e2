//! barscan-server: HTTP inference service for barcode detection and recognition

pub mod http;
pub mod logging;
pub mod metrics;
pub mod settings;

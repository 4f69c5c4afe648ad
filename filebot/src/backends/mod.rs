//! Image and document processing backends.
//!
//! Everything here is synchronous except the external-tool adapters.
//! Workflows run the synchronous parts on the blocking pool.

pub mod archive;
pub mod image;
pub mod office;
pub mod pdf;
pub mod raster;

use std::sync::Arc;

pub use office::{ConversionOutcome, NativeOfficeConverter, OfficeConverter, OfficeFormat};
pub use raster::{PdfRasterizer, PopplerRasterizer};

/// Backend error type.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Image error: {0}")]
    Image(#[from] ::image::ImageError),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("External tool failed: {0}")]
    Tool(String),

    #[error("Unsupported input: {0}")]
    Unsupported(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for BackendError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for BackendError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        Self::Tool(format!("xlsx writer: {err}"))
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Pluggable backends shared by all workflows.
#[derive(Clone)]
pub struct Backends {
    pub rasterizer: Arc<dyn PdfRasterizer>,
    pub office: Arc<dyn OfficeConverter>,
    /// Program used to unpack RAR archives
    pub unrar_path: String,
}

impl Backends {
    /// Backends built from configuration.
    pub fn from_config(config: &filebot_common::BackendsConfig) -> Self {
        Self {
            rasterizer: Arc::new(PopplerRasterizer::new(
                config.pdftoppm_path.clone(),
                config.raster_zoom,
            )),
            office: Arc::new(NativeOfficeConverter),
            unrar_path: config.unrar_path.clone(),
        }
    }
}

//! PDF page rasterization.

use super::{BackendError, BackendResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Points per inch in PDF user space.
const PDF_DPI: f32 = 72.0;

/// Renders single PDF pages to PNG.
#[async_trait]
pub trait PdfRasterizer: Send + Sync {
    /// Render 1-based `page` to `<dest_stem>.png` and return that path.
    async fn render_page(&self, pdf: &Path, page: usize, dest_stem: &Path) -> BackendResult<PathBuf>;
}

/// Rasterizer backed by poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PopplerRasterizer {
    program: String,
    zoom: f32,
}

impl PopplerRasterizer {
    pub fn new(program: impl Into<String>, zoom: f32) -> Self {
        Self {
            program: program.into(),
            zoom,
        }
    }

    /// Output resolution for the configured zoom factor.
    pub fn dpi(&self) -> u32 {
        (PDF_DPI * self.zoom).round() as u32
    }
}

#[async_trait]
impl PdfRasterizer for PopplerRasterizer {
    async fn render_page(&self, pdf: &Path, page: usize, dest_stem: &Path) -> BackendResult<PathBuf> {
        let page = page.to_string();
        let output = Command::new(&self.program)
            .arg("-png")
            .arg("-r")
            .arg(self.dpi().to_string())
            .arg("-f")
            .arg(&page)
            .arg("-l")
            .arg(&page)
            .arg("-singlefile")
            .arg(pdf)
            .arg(dest_stem)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackendError::Tool(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::Tool(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let rendered = dest_stem.with_extension("png");
        if !rendered.exists() {
            return Err(BackendError::Tool(format!(
                "{} produced no output for page {page}",
                self.program
            )));
        }
        Ok(rendered)
    }
}

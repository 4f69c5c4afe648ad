//! PDF to Word and Excel conversion.
//!
//! The native converter works from the PDF's text layer: paragraphs go to
//! a `.docx`, column-aligned blocks of lines go to `.xlsx` sheets. Scanned
//! PDFs without a text layer produce [`ConversionOutcome::Empty`].

use super::{BackendError, BackendResult};
use crate::progress::ProgressSink;
use docx_rs::{BreakType, Docx, Paragraph, Run};
use rust_xlsxwriter::Workbook;
use std::path::{Path, PathBuf};

/// Target office format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfficeFormat {
    Word,
    Excel,
}

impl OfficeFormat {
    pub const fn output_name(&self) -> &'static str {
        match self {
            Self::Word => "converted.docx",
            Self::Excel => "converted.xlsx",
        }
    }
}

/// Result of a conversion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Converted(PathBuf),
    /// The PDF has no extractable text
    Empty,
    /// No tabular content was found (Excel only)
    NoTables,
}

/// Converts a PDF into an office document.
///
/// Implementations are synchronous and are run on the blocking pool.
pub trait OfficeConverter: Send + Sync {
    fn convert(
        &self,
        pdf: &Path,
        format: OfficeFormat,
        dest: &Path,
        progress: &dyn ProgressSink,
    ) -> BackendResult<ConversionOutcome>;
}

/// Pure-Rust converter built on pdf-extract, docx-rs and rust_xlsxwriter.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeOfficeConverter;

impl OfficeConverter for NativeOfficeConverter {
    fn convert(
        &self,
        pdf: &Path,
        format: OfficeFormat,
        dest: &Path,
        progress: &dyn ProgressSink,
    ) -> BackendResult<ConversionOutcome> {
        progress.checkpoint("Opening document");
        let text = pdf_extract::extract_text(pdf)
            .map_err(|e| BackendError::Tool(format!("text extraction: {e}")))?;

        progress.checkpoint("Analyzing pages");
        let pages = split_pages(&text);
        if pages.iter().all(|page| page.trim().is_empty()) {
            return Ok(ConversionOutcome::Empty);
        }

        match format {
            OfficeFormat::Word => {
                progress.checkpoint("Parsing text");
                let docx = build_docx(&pages);
                progress.checkpoint("Creating document");
                let file = std::fs::File::create(dest)?;
                docx.build()
                    .pack(file)
                    .map_err(|e| BackendError::Tool(format!("docx writer: {e}")))?;
            }
            OfficeFormat::Excel => {
                progress.checkpoint("Parsing tables");
                let tables: Vec<Vec<Vec<String>>> =
                    pages.iter().flat_map(|page| detect_tables(page)).collect();
                if tables.is_empty() {
                    return Ok(ConversionOutcome::NoTables);
                }
                progress.checkpoint("Processing tables");
                write_workbook(&tables, dest)?;
            }
        }

        if std::fs::metadata(dest)?.len() == 0 {
            return Ok(ConversionOutcome::Empty);
        }
        Ok(ConversionOutcome::Converted(dest.to_path_buf()))
    }
}

fn split_pages(text: &str) -> Vec<&str> {
    text.split('\x0c').collect()
}

/// Paragraphs are runs of non-blank lines. Pages end with a page break.
fn build_docx(pages: &[&str]) -> Docx {
    let mut docx = Docx::new();
    let last = pages.len().saturating_sub(1);

    for (index, page) in pages.iter().enumerate() {
        let mut paragraph_lines: Vec<&str> = Vec::new();
        for line in page.lines().chain(std::iter::once("")) {
            let line = line.trim();
            if line.is_empty() {
                if !paragraph_lines.is_empty() {
                    let text = paragraph_lines.join(" ");
                    docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(text)));
                    paragraph_lines.clear();
                }
            } else {
                paragraph_lines.push(line);
            }
        }

        if index < last {
            docx = docx.add_paragraph(
                Paragraph::new().add_run(Run::new().add_break(BreakType::Page)),
            );
        }
    }
    docx
}

/// Split a line into cells on tabs or runs of two or more spaces.
fn split_columns(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut spaces = 0;

    for ch in line.trim().chars() {
        match ch {
            '\t' => {
                spaces = 2;
            }
            ' ' => spaces += 1,
            _ => {
                if spaces >= 2 && !current.is_empty() {
                    cells.push(std::mem::take(&mut current));
                } else if spaces == 1 {
                    current.push(' ');
                }
                spaces = 0;
                current.push(ch);
            }
        }
    }
    if !current.is_empty() {
        cells.push(current);
    }
    cells
}

/// A table is at least two consecutive lines with at least two cells each.
fn detect_tables(page: &str) -> Vec<Vec<Vec<String>>> {
    let mut tables = Vec::new();
    let mut current: Vec<Vec<String>> = Vec::new();

    for line in page.lines().chain(std::iter::once("")) {
        let cells = split_columns(line);
        if cells.len() >= 2 {
            current.push(cells);
        } else {
            if current.len() >= 2 {
                tables.push(std::mem::take(&mut current));
            }
            current.clear();
        }
    }
    tables
}

fn write_workbook(tables: &[Vec<Vec<String>>], dest: &Path) -> BackendResult<()> {
    let mut workbook = Workbook::new();
    for (index, table) in tables.iter().enumerate() {
        let sheet = workbook.add_worksheet();
        sheet.set_name(format!("Table_{}", index + 1))?;
        for (row, cells) in table.iter().enumerate() {
            for (col, cell) in cells.iter().enumerate() {
                sheet.write_string(row as u32, col as u16, cell.as_str())?;
            }
        }
    }
    workbook.save(dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopSink;

    #[test]
    fn test_split_columns() {
        assert_eq!(split_columns("Name   Qty  Price"), vec!["Name", "Qty", "Price"]);
        assert_eq!(split_columns("New York\t12"), vec!["New York", "12"]);
        assert_eq!(split_columns("just a sentence"), vec!["just a sentence"]);
        assert!(split_columns("   ").is_empty());
    }

    #[test]
    fn test_detect_tables() {
        let page = "Quarterly report\n\nItem    Q1    Q2\nApples  10    12\nPears   3     4\n\nClosing words\nA  B\n";
        let tables = detect_tables(page);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].len(), 3);
        assert_eq!(tables[0][1], vec!["Apples", "10", "12"]);
    }

    #[test]
    fn test_write_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("converted.xlsx");
        let tables = vec![vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["1".to_string(), "2".to_string()],
        ]];
        write_workbook(&tables, &dest).unwrap();
        let bytes = std::fs::read(&dest).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn test_build_docx_packs() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("converted.docx");
        let docx = build_docx(&["First line\nsame paragraph\n\nSecond", "Next page"]);
        docx.build().pack(std::fs::File::create(&dest).unwrap()).unwrap();
        assert!(std::fs::metadata(&dest).unwrap().len() > 0);
    }

    #[test]
    fn test_image_only_pdf_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("scan.png");
        ::image::DynamicImage::new_rgb8(40, 40).save(&png).unwrap();
        let pdf = dir.path().join("scan.pdf");
        crate::backends::pdf::images_to_pdf(&[png], &pdf).unwrap();

        let outcome = NativeOfficeConverter
            .convert(&pdf, OfficeFormat::Word, &dir.path().join("out.docx"), &NoopSink)
            .unwrap();
        assert_eq!(outcome, ConversionOutcome::Empty);
    }
}

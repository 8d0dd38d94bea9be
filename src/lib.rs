//! Single-page PDF text extraction using lopdf
//!
//! This crate provides:
//! - A block/line/span view of one page, recovered from its content stream
//! - Text chunks with integer bounding boxes, plus an HTML-like rendering
//! - The page's plain text as produced by lopdf
//! - A JSON response type covering success and every failure mode

#[cfg(feature = "lopdf")]
pub mod document;
#[cfg(feature = "lopdf")]
pub mod extractor;
#[cfg(feature = "lopdf")]
pub mod fonts;
pub mod layout;
pub mod output;
pub mod standard_fonts;
pub mod tounicode;

#[cfg(feature = "lopdf")]
pub use document::{Page, PdfDocument};
pub use layout::{Block, BlockKind, ExtractOptions, Line, Rect, Span};
pub use output::{chunks_from_blocks, render_html, Chunk, Failure, PageExtraction, Response};

#[cfg(feature = "lopdf")]
use log::info;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

/// Extract one page (zero-based index) of a PDF file with default options
pub fn extract_page<P: AsRef<Path>>(path: P, page_index: usize) -> Result<PageExtraction, PdfError> {
    extract_page_with_options(path, page_index, &ExtractOptions::default())
}

/// Extract one page of a PDF file.
///
/// The document is opened, the page index validated, the block tree and the
/// plain text read, and the document closed again before returning.
#[cfg(feature = "lopdf")]
pub fn extract_page_with_options<P: AsRef<Path>>(
    path: P,
    page_index: usize,
    options: &ExtractOptions,
) -> Result<PageExtraction, PdfError> {
    let path = path.as_ref();
    info!("Opening PDF: {}", path.display());
    let doc = PdfDocument::open(path)?;
    extract_from_document(&doc, page_index, options)
}

#[cfg(not(feature = "lopdf"))]
pub fn extract_page_with_options<P: AsRef<Path>>(
    _path: P,
    _page_index: usize,
    _options: &ExtractOptions,
) -> Result<PageExtraction, PdfError> {
    Err(PdfError::DependencyMissing("lopdf".to_string()))
}

/// Extract one page of a PDF held in memory
#[cfg(feature = "lopdf")]
pub fn extract_page_mem(
    buffer: &[u8],
    page_index: usize,
    options: &ExtractOptions,
) -> Result<PageExtraction, PdfError> {
    info!("Opening PDF from memory ({} bytes)", buffer.len());
    let doc = PdfDocument::open_mem(buffer)?;
    extract_from_document(&doc, page_index, options)
}

#[cfg(feature = "lopdf")]
fn extract_from_document(
    doc: &PdfDocument,
    page_index: usize,
    options: &ExtractOptions,
) -> Result<PageExtraction, PdfError> {
    let total_pages = doc.page_count();
    let page = doc.page(page_index)?;
    info!("Processing page {}/{}", page_index + 1, total_pages);

    let blocks = page.blocks(options)?;
    let chunks = chunks_from_blocks(&blocks);
    let text = page.plain_text();

    info!("Extracted {} text blocks", chunks.len());
    info!("Total text: {} chars", text.chars().count());

    Ok(PageExtraction::new(
        chunks,
        text,
        page.width(),
        page.height(),
        page_index,
        total_pages,
    ))
}

/// Extract one page and report the outcome as a [`Response`].
///
/// Never fails: errors, and panics raised while parsing a malformed file,
/// become structured failures. The document is released on every path.
pub fn process_page<P: AsRef<Path>>(path: P, page_index: usize) -> Response {
    let path = path.as_ref();
    match panic::catch_unwind(AssertUnwindSafe(|| extract_page(path, page_index))) {
        Ok(result) => Response::from(result),
        Err(payload) => Response::from(Failure::from_error(&PdfError::Panic(panic_message(
            payload.as_ref(),
        )))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parsing error: {0}")]
    Parse(String),
    #[error("Page {page} not found (PDF has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },
    #[error("PDF backend not available: {0} support was not compiled in")]
    DependencyMissing(String),
    #[error("PDF processing aborted: {0}")]
    Panic(String),
    #[error("Rendering error: {0}")]
    Render(String),
}

#[cfg(feature = "lopdf")]
impl From<lopdf::Error> for PdfError {
    fn from(e: lopdf::Error) -> Self {
        PdfError::Parse(e.to_string())
    }
}

//! Extraction results and their JSON form
//!
//! Every invocation ends in exactly one [`Response`]: either a
//! [`PageExtraction`] or a [`Failure`]. Building a response never prints;
//! the binary serializes it with [`Response::to_json`].

use crate::layout::{Block, BlockKind};
use crate::PdfError;
use serde::Serialize;
use std::backtrace::Backtrace;
use std::error::Error as _;
use std::fmt::Write as _;

/// Label carried by every chunk
pub const TEXT_LABEL: &str = "Text";

const INSTALL_HINTS: [&str; 3] = [
    "Rebuild with the default `lopdf` feature enabled: cargo build --features lopdf",
    "Make sure no `--no-default-features` flag is set for this crate",
    "Check that the lopdf crate can be fetched from the configured registry",
];

const GENERIC_HINTS: [&str; 4] = [
    "Ensure the PDF file is valid and readable",
    "Check if file path is correct",
    "Verify sufficient memory is available",
    "Try with a simpler PDF file",
];

/// One non-empty text block of the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// `[x0, y0, x1, y1]` in page points, origin top-left
    pub bbox: [i64; 4],
    pub label: String,
    pub content: String,
}

impl Chunk {
    /// Chunk for a text block, `None` for image blocks and blocks without text
    pub fn from_block(block: &Block) -> Option<Self> {
        if block.kind != BlockKind::Text {
            return None;
        }

        let lines = block.line_texts();
        if lines.is_empty() {
            return None;
        }

        Some(Self {
            bbox: block.bbox.to_bbox(),
            label: TEXT_LABEL.to_string(),
            content: lines.join(" "),
        })
    }
}

/// Chunks of all text blocks, in block order
pub fn chunks_from_blocks(blocks: &[Block]) -> Vec<Chunk> {
    blocks.iter().filter_map(Chunk::from_block).collect()
}

/// Three lines per chunk: opening div with bbox and label, paragraph, closing div
pub fn render_html(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|chunk| {
            let [x0, y0, x1, y1] = chunk.bbox;
            format!(
                "<div data-bbox=\"[{},{},{},{}]\" data-label=\"{}\">\n<p>{}</p>\n</div>",
                x0, y0, x1, y1, chunk.label, chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMetadata {
    /// Zero-based index of the processed page
    pub page_number: usize,
    pub num_blocks: usize,
    pub total_pages: usize,
}

/// Successful extraction of one page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageExtraction {
    pub success: bool,
    pub html: String,
    /// Plain text of the whole page
    pub markdown: String,
    pub chunks: Vec<Chunk>,
    /// Same as `chunks`
    pub blocks: Vec<Chunk>,
    /// Same as `html`
    pub raw: String,
    pub image_width: i64,
    pub image_height: i64,
    pub metadata: PageMetadata,
}

impl PageExtraction {
    pub fn new(
        chunks: Vec<Chunk>,
        text: String,
        width: i64,
        height: i64,
        page_number: usize,
        total_pages: usize,
    ) -> Self {
        let html = render_html(&chunks);
        Self {
            success: true,
            raw: html.clone(),
            html,
            markdown: text,
            blocks: chunks.clone(),
            metadata: PageMetadata {
                page_number,
                num_blocks: chunks.len(),
                total_pages,
            },
            chunks,
            image_width: width,
            image_height: height,
        }
    }
}

/// Structured failure report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub troubleshooting: Vec<String>,
}

impl Failure {
    fn message(error: String) -> Self {
        Self {
            success: false,
            error,
            traceback: None,
            troubleshooting: Vec::new(),
        }
    }

    /// Missing `<pdf_path>` argument
    pub fn usage(program: &str) -> Self {
        Self::message(format!("Usage: {} <pdf_path> [page_number]", program))
    }

    /// `page_number` argument that is not a non-negative integer
    pub fn invalid_page_number(raw: &str) -> Self {
        Self::message(format!(
            "Invalid page number: {} (expected a zero-based integer)",
            raw
        ))
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::message(format!("File not found: {}", path))
    }

    /// Map an extraction error to its report
    pub fn from_error(err: &PdfError) -> Self {
        match err {
            PdfError::PageOutOfRange { .. } => Self::message(err.to_string()),
            PdfError::DependencyMissing(_) => Self {
                troubleshooting: INSTALL_HINTS.iter().map(|h| h.to_string()).collect(),
                ..Self::message(err.to_string())
            },
            _ => Self {
                traceback: Some(diagnostic_trace(err)),
                troubleshooting: GENERIC_HINTS.iter().map(|h| h.to_string()).collect(),
                ..Self::message(err.to_string())
            },
        }
    }
}

/// Error, its source chain and a backtrace of where it was reported
fn diagnostic_trace(err: &PdfError) -> String {
    let mut trace = format!("Error: {}\n", err);
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = writeln!(trace, "Caused by: {}", cause);
        source = cause.source();
    }
    let _ = write!(trace, "\nStack backtrace:\n{}", Backtrace::force_capture());
    trace
}

/// Outcome of one invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Success(PageExtraction),
    Failure(Failure),
}

impl Response {
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success(_))
    }

    /// Process exit status: 0 on success, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// Pretty-printed JSON, two-space indent, non-ASCII kept as is
    pub fn to_json(&self) -> Result<String, PdfError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PdfError::Render(format!("JSON serialization error: {}", e)))
    }
}

impl From<Failure> for Response {
    fn from(failure: Failure) -> Self {
        Response::Failure(failure)
    }
}

impl From<Result<PageExtraction, PdfError>> for Response {
    fn from(result: Result<PageExtraction, PdfError>) -> Self {
        match result {
            Ok(page) => Response::Success(page),
            Err(e) => Response::Failure(Failure::from_error(&e)),
        }
    }
}

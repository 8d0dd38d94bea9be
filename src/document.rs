//! Opened PDF documents and their pages
//!
//! [`PdfDocument`] owns the parsed lopdf document for the duration of one
//! extraction. Dropping it releases everything, so the handle is closed on
//! every exit path, including errors and unwinding panics.

use crate::extractor;
use crate::layout::{build_blocks, Block, ExtractOptions, PageGeometry, Rect};
use crate::PdfError;
use flate2::read::ZlibDecoder;
use log::{debug, warn};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::io::Read;
use std::path::Path;

/// Page size assumed when neither CropBox nor MediaBox can be read
const US_LETTER: Rect = Rect {
    x0: 0.0,
    y0: 0.0,
    x1: 612.0,
    y1: 792.0,
};

/// Guard against /Parent cycles in broken page trees
const MAX_TREE_DEPTH: usize = 64;

/// An opened PDF document
pub struct PdfDocument {
    inner: Document,
    /// (page number, object id) in page order; page numbers are 1-based
    pages: Vec<(u32, ObjectId)>,
    source: String,
}

impl PdfDocument {
    /// Open a PDF file from disk
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PdfError> {
        let path = path.as_ref();
        let inner = Document::load(path)?;
        Ok(Self::from_document(inner, path.display().to_string()))
    }

    /// Open a PDF from a memory buffer
    pub fn open_mem(buffer: &[u8]) -> Result<Self, PdfError> {
        let inner = Document::load_mem(buffer)?;
        Ok(Self::from_document(inner, "<memory>".to_string()))
    }

    fn from_document(inner: Document, source: String) -> Self {
        let pages: Vec<(u32, ObjectId)> = inner
            .get_pages()
            .into_iter()
            .collect();
        debug!("Opened {} ({} pages)", source, pages.len());
        Self {
            inner,
            pages,
            source,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Get a page by zero-based index
    pub fn page(&self, index: usize) -> Result<Page<'_>, PdfError> {
        let &(number, id) = self.pages.get(index).ok_or(PdfError::PageOutOfRange {
            page: index,
            total: self.pages.len(),
        })?;

        Ok(Page {
            doc: self,
            id,
            number,
            index,
            geometry: page_geometry(&self.inner, id),
        })
    }

    /// Access the underlying lopdf document
    pub fn inner(&self) -> &Document {
        &self.inner
    }
}

impl Drop for PdfDocument {
    fn drop(&mut self) {
        debug!("Closing {}", self.source);
    }
}

/// A page of an opened document
pub struct Page<'a> {
    doc: &'a PdfDocument,
    id: ObjectId,
    number: u32,
    index: usize,
    geometry: PageGeometry,
}

impl Page<'_> {
    /// Zero-based page index
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn geometry(&self) -> &PageGeometry {
        &self.geometry
    }

    /// Page width in points, truncated
    pub fn width(&self) -> i64 {
        self.geometry.width().trunc() as i64
    }

    /// Page height in points, truncated
    pub fn height(&self) -> i64 {
        self.geometry.height().trunc() as i64
    }

    /// Build the block/line/span tree of the page
    pub fn blocks(&self, options: &ExtractOptions) -> Result<Vec<Block>, PdfError> {
        let elements = extractor::extract_page_elements(&self.doc.inner, self.id, options)?;
        debug!(
            "Page {}: {} elements from content stream",
            self.number,
            elements.len()
        );
        Ok(build_blocks(elements, &self.geometry, options))
    }

    /// Whole-page plain text, as produced by lopdf's own text extraction.
    ///
    /// Fragments lopdf cannot decode (fonts without a usable encoding, even
    /// unused ones) are logged and left out instead of failing the page.
    pub fn plain_text(&self) -> String {
        let mut text = String::new();
        for fragment in self.doc.inner.extract_text_chunks(&[self.number]) {
            match fragment {
                Ok(fragment) => text.push_str(&fragment),
                Err(e) => warn!("Page {}: skipping undecodable text: {}", self.number, e),
            }
        }
        text
    }
}

/// Follow a reference one level; anything else is returned as is
pub(crate) fn resolve<'d>(doc: &'d Document, obj: &'d Object) -> &'d Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

/// Look up a dictionary entry and resolve it
pub(crate) fn get_resolved<'d>(
    doc: &'d Document,
    dict: &'d Dictionary,
    key: &[u8],
) -> Option<&'d Object> {
    dict.get(key).ok().map(|obj| resolve(doc, obj))
}

/// Helper to get f32 from Object
pub(crate) fn get_number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Look up a page attribute, walking up the page tree through /Parent
pub(crate) fn inherited<'d>(doc: &'d Document, page_id: ObjectId, key: &[u8]) -> Option<&'d Object> {
    let mut dict = doc.get_object(page_id).and_then(Object::as_dict).ok()?;

    for _ in 0..MAX_TREE_DEPTH {
        if let Some(value) = get_resolved(doc, dict, key) {
            return Some(value);
        }
        dict = get_resolved(doc, dict, b"Parent")?.as_dict().ok()?;
    }

    None
}

/// Resources dictionary of a page, inherited if needed
pub(crate) fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    inherited(doc, page_id, b"Resources").and_then(|obj| obj.as_dict().ok())
}

fn rect_from_array(doc: &Document, obj: &Object) -> Option<Rect> {
    let array = obj.as_array().ok()?;
    if array.len() != 4 {
        return None;
    }

    let n: Vec<f32> = array
        .iter()
        .filter_map(|o| get_number(resolve(doc, o)))
        .collect();
    match n.as_slice() {
        [x0, y0, x1, y1] => Some(Rect::new(*x0, *y0, *x1, *y1)),
        _ => None,
    }
}

/// Visible area (CropBox, else MediaBox) and rotation of a page
fn page_geometry(doc: &Document, page_id: ObjectId) -> PageGeometry {
    let page_box = [b"CropBox".as_slice(), b"MediaBox".as_slice()]
        .iter()
        .find_map(|key| inherited(doc, page_id, key).and_then(|obj| rect_from_array(doc, obj)))
        .filter(|r| r.width() > 0.0 && r.height() > 0.0)
        .unwrap_or_else(|| {
            warn!("Page {:?} has no usable MediaBox, assuming US Letter", page_id);
            US_LETTER
        });

    let rotate = inherited(doc, page_id, b"Rotate")
        .and_then(|obj| obj.as_i64().ok())
        .unwrap_or(0);

    PageGeometry::new(page_box, rotate)
}

/// Decoded content of a stream.
///
/// Falls back to a lenient zlib inflate when lopdf rejects the data, which
/// happens with truncated or padded Flate streams.
pub(crate) fn decode_stream(stream: &Stream) -> Vec<u8> {
    if stream.dict.get(b"Filter").is_err() {
        return stream.content.clone();
    }

    match stream.decompressed_content() {
        Ok(data) => data,
        Err(e) => {
            debug!("Stream decode failed ({}), retrying with zlib", e);
            inflate_lenient(&stream.content).unwrap_or_else(|| stream.content.clone())
        }
    }
}

fn inflate_lenient(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    // Keep whatever was inflated before a corrupt tail
    let _ = decoder.read_to_end(&mut out);
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

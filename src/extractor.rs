//! Content stream interpretation using lopdf
//!
//! Walks a page's content stream, tracking the graphics and text state, and
//! emits positioned text runs and image placements in stream order. Form
//! XObjects are entered recursively; everything is reported in PDF user
//! space.

use crate::document::{decode_stream, get_number, get_resolved, page_resources};
use crate::fonts::{fallback_decode, load_fonts, FontInfo, DEFAULT_ASCENT, DEFAULT_DESCENT, DEFAULT_WIDTH};
use crate::layout::{ExtractOptions, ImageItem, PageElement, Rect, TextItem};
use crate::PdfError;
use log::{debug, warn};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::BTreeMap;

/// Matrix format: [a, b, c, d, e, f] representing:
/// | a  b  0 |
/// | c  d  0 |
/// | e  f  1 |
type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// Multiply two 2D transformation matrices
fn multiply_matrices(m1: &Matrix, m2: &Matrix) -> Matrix {
    [
        m1[0] * m2[0] + m1[1] * m2[2],
        m1[0] * m2[1] + m1[1] * m2[3],
        m1[2] * m2[0] + m1[3] * m2[2],
        m1[2] * m2[1] + m1[3] * m2[3],
        m1[4] * m2[0] + m1[5] * m2[2] + m2[4],
        m1[4] * m2[1] + m1[5] * m2[3] + m2[5],
    ]
}

fn translate(tx: f32, ty: f32) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

fn transform_point(m: &Matrix, x: f32, y: f32) -> (f32, f32) {
    (x * m[0] + y * m[2] + m[4], x * m[1] + y * m[3] + m[5])
}

/// Compute effective font size from base size and text rendering matrix
fn effective_font_size(base_size: f32, matrix: &Matrix) -> f32 {
    let scale_x = (matrix[0].powi(2) + matrix[1].powi(2)).sqrt();
    let scale_y = (matrix[2].powi(2) + matrix[3].powi(2)).sqrt();
    // Use the larger of the two scales (usually they're equal for non-rotated text)
    base_size * scale_x.max(scale_y)
}

/// Six numeric operands as a matrix
fn matrix_operand(operands: &[Object]) -> Option<Matrix> {
    if operands.len() < 6 {
        return None;
    }
    let mut m = IDENTITY;
    for (slot, operand) in m.iter_mut().zip(operands) {
        *slot = get_number(operand)?;
    }
    Some(m)
}

/// Bounding box of the unit square under `ctm`, where images are drawn
fn unit_square(ctm: &Matrix) -> Rect {
    let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)];
    Rect::from_points(corners.iter().map(|&(x, y)| transform_point(ctm, x, y)))
        .unwrap_or_default()
}

/// Graphics state, including the text state parameters
#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    font: Vec<u8>,
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
    /// Tz / 100
    horizontal_scaling: f32,
    leading: f32,
    rise: f32,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: IDENTITY,
            font: Vec::new(),
            font_size: 12.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scaling: 1.0,
            leading: 0.0,
            rise: 0.0,
        }
    }
}

impl GraphicsState {
    /// Move to the start of the next line (T*)
    fn next_line(&self, line_matrix: &mut Matrix, text_matrix: &mut Matrix) {
        let leading = if self.leading != 0.0 {
            self.leading
        } else {
            // No TL set: approximate line height
            self.font_size * 1.2
        };
        *line_matrix = multiply_matrices(&translate(0.0, -leading), line_matrix);
        *text_matrix = *line_matrix;
    }
}

/// Extract text runs and images from a single page, in stream order
pub fn extract_page_elements(
    doc: &Document,
    page_id: ObjectId,
    options: &ExtractOptions,
) -> Result<Vec<PageElement>, PdfError> {
    let content_data = doc
        .get_page_content(page_id)
        .map_err(|e| PdfError::Parse(e.to_string()))?;

    let mut interpreter = Interpreter {
        doc,
        options,
        elements: Vec::new(),
    };
    interpreter.run(
        &content_data,
        page_resources(doc, page_id),
        GraphicsState::default(),
        0,
    )?;

    Ok(interpreter.elements)
}

struct Interpreter<'a> {
    doc: &'a Document,
    options: &'a ExtractOptions,
    elements: Vec<PageElement>,
}

impl<'a> Interpreter<'a> {
    fn run(
        &mut self,
        data: &[u8],
        resources: Option<&'a Dictionary>,
        initial: GraphicsState,
        depth: usize,
    ) -> Result<(), PdfError> {
        let content = Content::decode(data).map_err(|e| PdfError::Parse(e.to_string()))?;
        let fonts = load_fonts(self.doc, resources);

        let mut gs = initial;
        let mut gs_stack: Vec<GraphicsState> = Vec::new();

        let mut text_matrix = IDENTITY;
        let mut line_matrix = IDENTITY;
        let mut in_text_block = false;

        for op in &content.operations {
            let operands = op.operands.as_slice();
            match op.operator.as_str() {
                "q" => gs_stack.push(gs.clone()),
                "Q" => {
                    if let Some(saved) = gs_stack.pop() {
                        gs = saved;
                    }
                }
                "cm" => {
                    if let Some(m) = matrix_operand(operands) {
                        gs.ctm = multiply_matrices(&m, &gs.ctm);
                    }
                }
                "BT" => {
                    in_text_block = true;
                    text_matrix = IDENTITY;
                    line_matrix = IDENTITY;
                }
                "ET" => in_text_block = false,
                "Tf" => {
                    if operands.len() >= 2 {
                        if let Ok(name) = operands[0].as_name() {
                            gs.font = name.to_vec();
                        }
                        if let Some(size) = get_number(&operands[1]) {
                            gs.font_size = size;
                        }
                    }
                }
                "Tc" => set_number(operands, &mut gs.char_spacing),
                "Tw" => set_number(operands, &mut gs.word_spacing),
                "TL" => set_number(operands, &mut gs.leading),
                "Ts" => set_number(operands, &mut gs.rise),
                "Tz" => {
                    if let Some(scale) = operands.first().and_then(get_number) {
                        gs.horizontal_scaling = scale / 100.0;
                    }
                }
                "Td" | "TD" => {
                    if operands.len() >= 2 {
                        let tx = get_number(&operands[0]).unwrap_or(0.0);
                        let ty = get_number(&operands[1]).unwrap_or(0.0);
                        if op.operator == "TD" {
                            gs.leading = -ty;
                        }
                        line_matrix = multiply_matrices(&translate(tx, ty), &line_matrix);
                        text_matrix = line_matrix;
                    }
                }
                "Tm" => {
                    if let Some(m) = matrix_operand(operands) {
                        text_matrix = m;
                        line_matrix = m;
                    }
                }
                "T*" => gs.next_line(&mut line_matrix, &mut text_matrix),
                "Tj" => {
                    if in_text_block && !operands.is_empty() {
                        self.show_text(&operands[..1], &fonts, &gs, &mut text_matrix);
                    }
                }
                "TJ" => {
                    if in_text_block {
                        if let Some(Ok(array)) = operands.first().map(Object::as_array) {
                            self.show_text(array, &fonts, &gs, &mut text_matrix);
                        }
                    }
                }
                "'" => {
                    gs.next_line(&mut line_matrix, &mut text_matrix);
                    if in_text_block && !operands.is_empty() {
                        self.show_text(&operands[..1], &fonts, &gs, &mut text_matrix);
                    }
                }
                "\"" => {
                    if operands.len() >= 3 {
                        set_number(&operands[..1], &mut gs.word_spacing);
                        set_number(&operands[1..2], &mut gs.char_spacing);
                        gs.next_line(&mut line_matrix, &mut text_matrix);
                        if in_text_block {
                            self.show_text(&operands[2..3], &fonts, &gs, &mut text_matrix);
                        }
                    }
                }
                "Do" => {
                    if let Some(Ok(name)) = operands.first().map(Object::as_name) {
                        self.draw_xobject(name, resources, &gs, depth);
                    }
                }
                "BI" => self.elements.push(PageElement::Image(ImageItem {
                    bbox: unit_square(&gs.ctm),
                })),
                _ => {}
            }
        }

        Ok(())
    }

    /// Show strings (Tj, TJ, ' and ") and advance the text matrix.
    ///
    /// One call produces at most one text item. Numbers inside a TJ array
    /// are kerning adjustments in thousandths of an em; one wider than the
    /// word gap is read as a space.
    fn show_text(
        &mut self,
        parts: &[Object],
        fonts: &BTreeMap<Vec<u8>, FontInfo<'a>>,
        gs: &GraphicsState,
        text_matrix: &mut Matrix,
    ) {
        let font = fonts.get(&gs.font);
        let start = *text_matrix;
        let mut text = String::new();
        // Horizontal displacement in text space
        let mut advance = 0.0f32;

        for part in parts {
            match part {
                Object::String(bytes, _) => {
                    let (decoded, codes) = match font {
                        Some(f) => (f.decode(self.doc, bytes), f.codes(bytes)),
                        None => (fallback_decode(bytes), bytes.iter().map(|&b| b as u32).collect()),
                    };
                    text.push_str(&decoded);

                    for code in codes {
                        let (width, word_space) = match font {
                            Some(f) => (f.width(code), f.is_word_space(code)),
                            None => (DEFAULT_WIDTH, code == 32),
                        };
                        let spacing = gs.char_spacing + if word_space { gs.word_spacing } else { 0.0 };
                        advance += (width / 1000.0 * gs.font_size + spacing) * gs.horizontal_scaling;
                    }
                }
                other => {
                    if let Some(adjustment) = get_number(other) {
                        advance -= adjustment / 1000.0 * gs.font_size * gs.horizontal_scaling;
                        if -adjustment / 1000.0 > self.options.word_gap
                            && !text.is_empty()
                            && !text.ends_with(char::is_whitespace)
                        {
                            text.push(' ');
                        }
                    }
                }
            }
        }

        *text_matrix = multiply_matrices(&translate(advance, 0.0), &start);

        if text.trim().is_empty() {
            return;
        }

        let (ascent, descent) = font
            .map(|f| (f.ascent, f.descent))
            .unwrap_or((DEFAULT_ASCENT, DEFAULT_DESCENT));
        let size = gs.font_size;
        let rise = gs.rise;

        // Text space to user space
        let m = multiply_matrices(&start, &gs.ctm);
        let corners = [
            (0.0, descent * size + rise),
            (advance, descent * size + rise),
            (0.0, ascent * size + rise),
            (advance, ascent * size + rise),
        ];
        let bbox = Rect::from_points(corners.iter().map(|&(x, y)| transform_point(&m, x, y)))
            .unwrap_or_default();

        self.elements.push(PageElement::Text(TextItem {
            text,
            origin: transform_point(&m, 0.0, rise),
            bbox,
            font_size: effective_font_size(size, &m),
            font: String::from_utf8_lossy(&gs.font).into_owned(),
        }));
    }

    fn draw_xobject(
        &mut self,
        name: &[u8],
        resources: Option<&'a Dictionary>,
        gs: &GraphicsState,
        depth: usize,
    ) {
        let doc = self.doc;
        let Some(stream) = resources
            .and_then(|r| get_resolved(doc, r, b"XObject"))
            .and_then(|obj| obj.as_dict().ok())
            .and_then(|xobjects| get_resolved(doc, xobjects, name))
            .and_then(|obj| obj.as_stream().ok())
        else {
            debug!("XObject /{} not found", String::from_utf8_lossy(name));
            return;
        };

        match stream.dict.get(b"Subtype").and_then(Object::as_name) {
            Ok(b"Image") => self.elements.push(PageElement::Image(ImageItem {
                bbox: unit_square(&gs.ctm),
            })),
            Ok(b"Form") => {
                if depth >= self.options.max_xobject_depth {
                    debug!(
                        "Form XObject /{} nested too deep, skipping",
                        String::from_utf8_lossy(name)
                    );
                    return;
                }

                let matrix = stream
                    .dict
                    .get(b"Matrix")
                    .and_then(Object::as_array)
                    .ok()
                    .and_then(|array| matrix_operand(array))
                    .unwrap_or(IDENTITY);
                let mut state = gs.clone();
                state.ctm = multiply_matrices(&matrix, &gs.ctm);

                // Forms without their own resources use the caller's
                let form_resources = get_resolved(doc, &stream.dict, b"Resources")
                    .and_then(|obj| obj.as_dict().ok())
                    .or(resources);

                let data = decode_stream(stream);
                if let Err(e) = self.run(&data, form_resources, state, depth + 1) {
                    warn!(
                        "Skipping unreadable form XObject /{}: {}",
                        String::from_utf8_lossy(name),
                        e
                    );
                }
            }
            _ => {}
        }
    }
}

fn set_number(operands: &[Object], target: &mut f32) {
    if let Some(value) = operands.first().and_then(get_number) {
        *target = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    fn single_page_doc(content: &[u8], resources: Dictionary) -> (Document, ObjectId) {
        let mut doc = Document::with_version("1.5");
        let pages_id: ObjectId = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => resources,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::from(page_id)],
                "Count" => 1i64,
            }),
        );
        (doc, page_id)
    }

    fn helvetica() -> Dictionary {
        dictionary! {
            "Font" => Object::Dictionary(dictionary! {
                "F1" => Object::Dictionary(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                }),
            }),
        }
    }

    fn texts(elements: &[PageElement]) -> Vec<&TextItem> {
        elements
            .iter()
            .filter_map(|e| match e {
                PageElement::Text(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_multiply_identity() {
        let m = [2.0, 0.0, 0.0, 3.0, 10.0, 20.0];
        assert_eq!(multiply_matrices(&m, &IDENTITY), m);
        assert_eq!(multiply_matrices(&IDENTITY, &m), m);
    }

    #[test]
    fn test_effective_font_size_scaled() {
        let m = [2.0, 0.0, 0.0, 2.0, 0.0, 0.0];
        assert_eq!(effective_font_size(10.0, &m), 20.0);
    }

    #[test]
    fn test_simple_tj_position_and_width() {
        let (doc, page_id) =
            single_page_doc(b"BT /F1 12 Tf 72 700 Td (Hello) Tj ET", helvetica());
        let elements = extract_page_elements(&doc, page_id, &ExtractOptions::default()).unwrap();
        let items = texts(&elements);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "Hello");
        assert_eq!(items[0].origin, (72.0, 700.0));
        assert_eq!(items[0].font, "F1");
        assert_eq!(items[0].font_size, 12.0);
        // Helvetica "Hello" is 2278 thousandths of an em
        assert!((items[0].bbox.x1 - (72.0 + 2.278 * 12.0)).abs() < 1e-3);
        assert!((items[0].bbox.y1 - (700.0 + 0.8 * 12.0)).abs() < 1e-3);
        assert!((items[0].bbox.y0 - (700.0 - 0.2 * 12.0)).abs() < 1e-3);
    }

    #[test]
    fn test_consecutive_tj_advance_text_matrix() {
        let (doc, page_id) =
            single_page_doc(b"BT /F1 10 Tf 100 500 Td (AB) Tj (CD) Tj ET", helvetica());
        let elements = extract_page_elements(&doc, page_id, &ExtractOptions::default()).unwrap();
        let items = texts(&elements);

        assert_eq!(items.len(), 2);
        assert!((items[1].origin.0 - 113.34).abs() < 1e-3);
        assert_eq!(items[1].origin.1, 500.0);
    }

    #[test]
    fn test_tj_kerning_inserts_space() {
        let (doc, page_id) = single_page_doc(
            b"BT /F1 12 Tf 72 700 Td [(Hello) -600 (World) -20 (!)] TJ ET",
            helvetica(),
        );
        let elements = extract_page_elements(&doc, page_id, &ExtractOptions::default()).unwrap();
        assert_eq!(texts(&elements)[0].text, "Hello World!");
    }

    #[test]
    fn test_tstar_uses_leading() {
        let (doc, page_id) = single_page_doc(
            b"BT /F1 12 Tf 14 TL 72 700 Td (one) Tj T* (two) Tj ET",
            helvetica(),
        );
        let elements = extract_page_elements(&doc, page_id, &ExtractOptions::default()).unwrap();
        let items = texts(&elements);
        assert_eq!(items[1].origin, (72.0, 686.0));
    }

    #[test]
    fn test_cm_and_q_restore() {
        let (doc, page_id) = single_page_doc(
            b"q 1 0 0 1 0 100 cm BT /F1 12 Tf 72 500 Td (in) Tj ET Q BT /F1 12 Tf 72 500 Td (out) Tj ET",
            helvetica(),
        );
        let elements = extract_page_elements(&doc, page_id, &ExtractOptions::default()).unwrap();
        let items = texts(&elements);
        assert_eq!(items[0].origin, (72.0, 600.0));
        assert_eq!(items[1].origin, (72.0, 500.0));
    }

    #[test]
    fn test_whitespace_only_runs_are_skipped() {
        let (doc, page_id) =
            single_page_doc(b"BT /F1 12 Tf 72 700 Td (   ) Tj (x) Tj ET", helvetica());
        let elements = extract_page_elements(&doc, page_id, &ExtractOptions::default()).unwrap();
        let items = texts(&elements);
        assert_eq!(items.len(), 1);
        // The blank run still advanced the pen by three Helvetica spaces
        assert!((items[0].origin.0 - (72.0 + 3.0 * 0.278 * 12.0)).abs() < 1e-3);
        assert_eq!(items[0].origin.1, 700.0);
    }

    #[test]
    fn test_image_xobject_becomes_image_element() {
        let (mut doc, page_id) =
            single_page_doc(b"q 200 0 0 150 100 300 cm /Im0 Do Q", Dictionary::new());
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2i64,
                "Height" => 2i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8i64,
            },
            vec![0u8, 255, 255, 0],
        ));
        let page = doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .unwrap();
        page.set(
            "Resources",
            dictionary! { "XObject" => Object::Dictionary(dictionary! { "Im0" => image_id }) },
        );

        let elements = extract_page_elements(&doc, page_id, &ExtractOptions::default()).unwrap();
        assert_eq!(elements.len(), 1);
        match &elements[0] {
            PageElement::Image(img) => {
                assert_eq!(img.bbox, Rect::new(100.0, 300.0, 300.0, 450.0));
            }
            other => panic!("expected image, got {:?}", other),
        }
    }

    #[test]
    fn test_form_xobject_text_is_transformed() {
        let (mut doc, page_id) = single_page_doc(b"/Fm0 Do", Dictionary::new());
        let form_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Matrix" => vec![1.into(), 0.into(), 0.into(), 1.into(), 50.into(), 0.into()],
                "Resources" => helvetica(),
            },
            b"BT /F1 12 Tf 10 400 Td (form text) Tj ET".to_vec(),
        ));
        let page = doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .unwrap();
        page.set(
            "Resources",
            dictionary! { "XObject" => Object::Dictionary(dictionary! { "Fm0" => form_id }) },
        );

        let elements = extract_page_elements(&doc, page_id, &ExtractOptions::default()).unwrap();
        let items = texts(&elements);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "form text");
        assert_eq!(items[0].origin, (60.0, 400.0));
    }

    #[test]
    fn test_form_recursion_is_bounded() {
        let (mut doc, page_id) = single_page_doc(b"/Fm0 Do", Dictionary::new());
        let form_id = doc.new_object_id();
        // The form draws itself
        doc.objects.insert(
            form_id,
            Object::Stream(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Form",
                    "Resources" => dictionary! {
                        "XObject" => Object::Dictionary(dictionary! { "Fm0" => form_id }),
                    },
                },
                b"/Fm0 Do".to_vec(),
            )),
        );
        let page = doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .unwrap();
        page.set(
            "Resources",
            dictionary! { "XObject" => Object::Dictionary(dictionary! { "Fm0" => form_id }) },
        );

        let elements = extract_page_elements(&doc, page_id, &ExtractOptions::default()).unwrap();
        assert!(elements.is_empty());
    }
}

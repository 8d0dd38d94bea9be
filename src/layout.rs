//! Page structure: blocks, lines and spans
//!
//! The content interpreter produces [`PageElement`]s in PDF user space
//! (origin bottom-left) and in content-stream order. This module maps them
//! to page space (origin top-left, rotation applied) and groups them into
//! the block/line/span tree consumed by the extractor.
//!
//! Grouping never reorders across lines: PDF stream order is usually the
//! reading order, so only consecutive elements are merged.

use std::cmp::Ordering;

/// Axis-aligned rectangle. `x0 <= x1` and `y0 <= y1` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    /// Build a rectangle from two opposite corners in any order
    pub fn new(xa: f32, ya: f32, xb: f32, yb: f32) -> Self {
        Self {
            x0: xa.min(xb),
            y0: ya.min(yb),
            x1: xa.max(xb),
            y1: ya.max(yb),
        }
    }

    /// Smallest rectangle containing all points, `None` for an empty iterator
    pub fn from_points<I: IntoIterator<Item = (f32, f32)>>(points: I) -> Option<Self> {
        points.into_iter().fold(None, |acc: Option<Rect>, (x, y)| {
            Some(match acc {
                None => Rect::new(x, y, x, y),
                Some(r) => Rect::new(r.x0.min(x), r.y0.min(y), r.x1.max(x), r.y1.max(y)),
            })
        })
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect::new(
            self.x0.min(other.x0),
            self.y0.min(other.y0),
            self.x1.max(other.x1),
            self.y1.max(other.y1),
        )
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Integer bounding box, each coordinate truncated toward zero
    pub fn to_bbox(&self) -> [i64; 4] {
        [
            self.x0.trunc() as i64,
            self.y0.trunc() as i64,
            self.x1.trunc() as i64,
            self.y1.trunc() as i64,
        ]
    }
}

/// Visible page area and orientation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    /// CropBox (or MediaBox) in user space
    pub page_box: Rect,
    /// Clockwise rotation in degrees: 0, 90, 180 or 270
    pub rotation: u16,
}

impl PageGeometry {
    pub fn new(page_box: Rect, rotate: i64) -> Self {
        let rotation = (rotate.rem_euclid(360) / 90 * 90) as u16;
        Self { page_box, rotation }
    }

    /// Displayed width in points
    pub fn width(&self) -> f32 {
        match self.rotation {
            90 | 270 => self.page_box.height(),
            _ => self.page_box.width(),
        }
    }

    /// Displayed height in points
    pub fn height(&self) -> f32 {
        match self.rotation {
            90 | 270 => self.page_box.width(),
            _ => self.page_box.height(),
        }
    }

    /// Map a user-space point to page space
    pub fn to_page_point(&self, x: f32, y: f32) -> (f32, f32) {
        let b = &self.page_box;
        let (ux, uy) = (x - b.x0, b.y1 - y);
        let (w, h) = (b.width(), b.height());
        match self.rotation {
            90 => (h - uy, ux),
            180 => (w - ux, h - uy),
            270 => (uy, w - ux),
            _ => (ux, uy),
        }
    }

    /// Map a user-space rectangle to page space
    pub fn to_page_rect(&self, rect: &Rect) -> Rect {
        let (xa, ya) = self.to_page_point(rect.x0, rect.y0);
        let (xb, yb) = self.to_page_point(rect.x1, rect.y1);
        Rect::new(xa, ya, xb, yb)
    }
}

/// A run of text as it was shown by one text operator, in user space
#[derive(Debug, Clone)]
pub struct TextItem {
    pub text: String,
    /// Baseline start point
    pub origin: (f32, f32),
    /// Glyph box covering ascent to descent over the full advance
    pub bbox: Rect,
    /// Rendered font size
    pub font_size: f32,
    /// Font resource name
    pub font: String,
}

/// An image drawn on the page, in user space
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub bbox: Rect,
}

/// Something the content stream put on the page
#[derive(Debug, Clone)]
pub enum PageElement {
    Text(TextItem),
    Image(ImageItem),
}

/// Block type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Image,
}

impl BlockKind {
    /// Numeric block type: 0 for text, 1 for images
    pub fn code(self) -> u8 {
        match self {
            BlockKind::Text => 0,
            BlockKind::Image => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub text: String,
    pub bbox: Rect,
    pub size: f32,
    pub font: String,
    /// Baseline y in page space
    pub baseline: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub spans: Vec<Span>,
    pub bbox: Rect,
}

impl Line {
    fn from_span(span: Span) -> Self {
        Self {
            bbox: span.bbox,
            spans: vec![span],
        }
    }

    /// Concatenated span text
    pub fn text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }

    fn baseline(&self) -> f32 {
        self.spans.last().map(|s| s.baseline).unwrap_or(self.bbox.y1)
    }

    fn size(&self) -> f32 {
        self.spans.iter().map(|s| s.size).fold(0.0, f32::max)
    }

    fn push(&mut self, span: Span) {
        self.bbox = self.bbox.union(&span.bbox);
        self.spans.push(span);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: BlockKind,
    pub bbox: Rect,
    pub lines: Vec<Line>,
}

impl Block {
    /// Trimmed text of every non-blank line, in order
    pub fn line_texts(&self) -> Vec<String> {
        self.lines
            .iter()
            .map(|l| l.text().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Tunables for page structure recovery
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Max baseline difference between spans of one line, in font sizes
    pub line_tolerance: f32,
    /// Horizontal gap, in font sizes, above which a space separates spans
    pub word_gap: f32,
    /// Max horizontal gap, in font sizes, for appending a span to a line
    pub line_join_gap: f32,
    /// Max vertical gap between lines of one block, in line heights
    pub block_gap: f32,
    /// Nesting limit for Form XObjects
    pub max_xobject_depth: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            line_tolerance: 0.5,
            word_gap: 0.2,
            line_join_gap: 3.0,
            block_gap: 0.8,
            max_xobject_depth: 8,
        }
    }
}

/// Group page elements into blocks, preserving stream order
pub fn build_blocks(
    elements: Vec<PageElement>,
    geometry: &PageGeometry,
    options: &ExtractOptions,
) -> Vec<Block> {
    let mut builder = BlockBuilder {
        options,
        blocks: Vec::new(),
        lines: Vec::new(),
        line: None,
    };

    for element in elements {
        match element {
            PageElement::Text(item) => builder.push_span(to_span(item, geometry)),
            PageElement::Image(image) => builder.push_image(geometry.to_page_rect(&image.bbox)),
        }
    }

    builder.finish()
}

fn to_span(item: TextItem, geometry: &PageGeometry) -> Span {
    let bbox = geometry.to_page_rect(&item.bbox);
    let (_, baseline) = geometry.to_page_point(item.origin.0, item.origin.1);
    Span {
        text: item.text,
        bbox,
        size: item.font_size.abs().max(f32::EPSILON),
        font: item.font,
        baseline,
    }
}

struct BlockBuilder<'a> {
    options: &'a ExtractOptions,
    blocks: Vec<Block>,
    /// Finished lines of the open text block
    lines: Vec<Line>,
    line: Option<Line>,
}

impl BlockBuilder<'_> {
    fn push_span(&mut self, span: Span) {
        match self.line.as_mut() {
            Some(line) if same_line(line, &span, self.options) => line.push(span),
            _ => {
                self.close_line();
                self.line = Some(Line::from_span(span));
            }
        }
    }

    fn push_image(&mut self, bbox: Rect) {
        self.close_block();
        self.blocks.push(Block {
            kind: BlockKind::Image,
            bbox,
            lines: Vec::new(),
        });
    }

    fn close_line(&mut self) {
        let Some(mut line) = self.line.take() else {
            return;
        };
        finish_line(&mut line, self.options);

        let continues_block = self
            .lines
            .last()
            .is_some_and(|prev| same_block(prev, &line, &self.lines, self.options));
        if !continues_block {
            self.close_block();
        }
        self.lines.push(line);
    }

    fn close_block(&mut self) {
        if self.line.is_some() {
            self.close_line();
        }
        if self.lines.is_empty() {
            return;
        }

        let lines = std::mem::take(&mut self.lines);
        let bbox = lines
            .iter()
            .skip(1)
            .fold(lines[0].bbox, |acc, l| acc.union(&l.bbox));
        self.blocks.push(Block {
            kind: BlockKind::Text,
            bbox,
            lines,
        });
    }

    fn finish(mut self) -> Vec<Block> {
        self.close_block();
        self.blocks
    }
}

/// Does `span` continue `line`? Same baseline and horizontally within reach.
fn same_line(line: &Line, span: &Span, options: &ExtractOptions) -> bool {
    let size = line.size().max(span.size);
    if (line.baseline() - span.baseline).abs() > options.line_tolerance * size {
        return false;
    }

    let reach = options.line_join_gap * size;
    span.bbox.x0 - line.bbox.x1 <= reach && line.bbox.x0 - span.bbox.x1 <= reach
}

/// Does `line` belong to the block whose last line is `prev`?
fn same_block(prev: &Line, line: &Line, block: &[Line], options: &ExtractOptions) -> bool {
    let height = prev.bbox.height().max(line.bbox.height()).max(1.0);
    let gap = line.bbox.y0 - prev.bbox.y1;
    if gap > options.block_gap * height || gap < -0.5 * height {
        return false;
    }

    let (left, right) = block
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(l, r), b| {
            (l.min(b.bbox.x0), r.max(b.bbox.x1))
        });
    line.bbox.x0 < right && line.bbox.x1 > left
}

/// Sort spans left to right and separate visually distant runs with a space
fn finish_line(line: &mut Line, options: &ExtractOptions) {
    line.spans.sort_by(|a, b| {
        a.bbox
            .x0
            .partial_cmp(&b.bbox.x0)
            .unwrap_or(Ordering::Equal)
    });

    for i in 1..line.spans.len() {
        let (before, after) = line.spans.split_at_mut(i);
        let prev = &before[i - 1];
        let span = &mut after[0];

        let gap = span.bbox.x0 - prev.bbox.x1;
        let size = prev.size.max(span.size);
        let separated = prev.text.ends_with(char::is_whitespace)
            || span.text.starts_with(char::is_whitespace);
        if gap > options.word_gap * size && !separated {
            span.text.insert(0, ' ');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LETTER: Rect = Rect {
        x0: 0.0,
        y0: 0.0,
        x1: 612.0,
        y1: 792.0,
    };

    // Helper to create a text element at a baseline, 0.5 em per character
    fn text(s: &str, x: f32, baseline: f32, size: f32) -> PageElement {
        let width = s.chars().count() as f32 * size * 0.5;
        PageElement::Text(TextItem {
            text: s.to_string(),
            origin: (x, baseline),
            bbox: Rect::new(x, baseline - 0.2 * size, x + width, baseline + 0.8 * size),
            font_size: size,
            font: "F1".to_string(),
        })
    }

    fn letter() -> PageGeometry {
        PageGeometry::new(LETTER, 0)
    }

    #[test]
    fn test_rect_truncates_toward_zero() {
        let r = Rect::new(72.9, 71.2, 199.99, 90.5);
        assert_eq!(r.to_bbox(), [72, 71, 199, 90]);
        let r = Rect::new(-0.7, 0.0, 10.0, 10.0);
        assert_eq!(r.to_bbox(), [0, 0, 10, 10]);
    }

    #[test]
    fn test_rect_new_orders_corners() {
        let r = Rect::new(10.0, 20.0, 5.0, 2.0);
        assert_eq!((r.x0, r.y0, r.x1, r.y1), (5.0, 2.0, 10.0, 20.0));
    }

    #[test]
    fn test_geometry_flips_y() {
        let g = letter();
        assert_eq!(g.to_page_point(72.0, 720.0), (72.0, 72.0));
        assert_eq!(g.width(), 612.0);
        assert_eq!(g.height(), 792.0);
    }

    #[test]
    fn test_geometry_rotation_swaps_dimensions() {
        let g = PageGeometry::new(LETTER, 90);
        assert_eq!(g.width(), 792.0);
        assert_eq!(g.height(), 612.0);
        // Top-left of the unrotated page ends up top-right
        assert_eq!(g.to_page_point(0.0, 792.0), (792.0, 0.0));

        let g = PageGeometry::new(LETTER, -90);
        assert_eq!(g.rotation, 270);
    }

    #[test]
    fn test_geometry_honours_box_origin() {
        let g = PageGeometry::new(Rect::new(50.0, 50.0, 650.0, 850.0), 0);
        assert_eq!(g.to_page_point(50.0, 850.0), (0.0, 0.0));
    }

    #[test]
    fn test_single_span_single_block() {
        let blocks = build_blocks(
            vec![text("Hello World", 72.0, 700.0, 12.0)],
            &letter(),
            &ExtractOptions::default(),
        );
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Text);
        assert_eq!(blocks[0].lines.len(), 1);
        assert_eq!(blocks[0].lines[0].text(), "Hello World");
        // top = 792 - (700 + 9.6), bottom = 792 - (700 - 2.4)
        assert_eq!(blocks[0].bbox.to_bbox(), [72, 82, 138, 94]);
    }

    #[test]
    fn test_spans_on_same_baseline_join_with_space() {
        let blocks = build_blocks(
            vec![
                text("Hello", 100.0, 700.0, 12.0),
                text("World", 160.0, 700.0, 12.0),
            ],
            &letter(),
            &ExtractOptions::default(),
        );
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].lines.len(), 1);
        assert_eq!(blocks[0].lines[0].text(), "Hello World");
    }

    #[test]
    fn test_adjacent_spans_join_without_space() {
        // "Hel" ends at 118, "lo" starts there
        let blocks = build_blocks(
            vec![
                text("Hel", 100.0, 700.0, 12.0),
                text("lo", 118.0, 700.0, 12.0),
            ],
            &letter(),
            &ExtractOptions::default(),
        );
        assert_eq!(blocks[0].lines[0].text(), "Hello");
    }

    #[test]
    fn test_spans_sorted_left_to_right() {
        let blocks = build_blocks(
            vec![
                text("World", 160.0, 700.0, 12.0),
                text("Hello", 100.0, 700.0, 12.0),
            ],
            &letter(),
            &ExtractOptions::default(),
        );
        assert_eq!(blocks[0].lines[0].text(), "Hello World");
    }

    #[test]
    fn test_consecutive_lines_form_one_block() {
        let blocks = build_blocks(
            vec![
                text("First line", 72.0, 700.0, 12.0),
                text("Second line", 72.0, 686.0, 12.0),
            ],
            &letter(),
            &ExtractOptions::default(),
        );
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].line_texts(), vec!["First line", "Second line"]);
    }

    #[test]
    fn test_paragraph_gap_splits_blocks() {
        let blocks = build_blocks(
            vec![
                text("Paragraph one", 72.0, 700.0, 12.0),
                text("Paragraph two", 72.0, 640.0, 12.0),
            ],
            &letter(),
            &ExtractOptions::default(),
        );
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].line_texts(), vec!["Paragraph two"]);
    }

    #[test]
    fn test_column_jump_splits_blocks() {
        // Second column starts back at the top of the page
        let blocks = build_blocks(
            vec![
                text("Left column", 72.0, 700.0, 12.0),
                text("end of left", 72.0, 686.0, 12.0),
                text("Right column", 320.0, 700.0, 12.0),
            ],
            &letter(),
            &ExtractOptions::default(),
        );
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].line_texts(), vec!["Right column"]);
    }

    #[test]
    fn test_image_is_its_own_block() {
        let blocks = build_blocks(
            vec![
                text("Caption above", 72.0, 700.0, 12.0),
                PageElement::Image(ImageItem {
                    bbox: Rect::new(72.0, 400.0, 272.0, 680.0),
                }),
                text("Caption below", 72.0, 386.0, 12.0),
            ],
            &letter(),
            &ExtractOptions::default(),
        );
        let kinds: Vec<u8> = blocks.iter().map(|b| b.kind.code()).collect();
        assert_eq!(kinds, vec![0, 1, 0]);
        assert_eq!(blocks[1].bbox.to_bbox(), [72, 112, 272, 392]);
        assert!(blocks[1].lines.is_empty());
    }

    #[test]
    fn test_empty_page_has_no_blocks() {
        let blocks = build_blocks(Vec::new(), &letter(), &ExtractOptions::default());
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_line_texts_skips_blank_lines() {
        let block = Block {
            kind: BlockKind::Text,
            bbox: Rect::default(),
            lines: vec![
                Line::from_span(Span {
                    text: "  padded  ".into(),
                    bbox: Rect::default(),
                    size: 12.0,
                    font: "F1".into(),
                    baseline: 0.0,
                }),
                Line::from_span(Span {
                    text: "   ".into(),
                    bbox: Rect::default(),
                    size: 12.0,
                    font: "F1".into(),
                    baseline: 0.0,
                }),
            ],
        };
        assert_eq!(block.line_texts(), vec!["padded"]);
    }
}

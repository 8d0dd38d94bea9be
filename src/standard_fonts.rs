//! Advance widths of the standard 14 fonts
//!
//! Simple fonts that name a standard font as `/BaseFont` may omit `/Widths`.
//! Widths here cover the printable ASCII codes 32..=126 in thousandths of an
//! em; other codes fall back to the caller's default.

/// First code covered by the tables
pub const FIRST_CHAR: u32 = 32;

#[rustfmt::skip]
const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    222, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const TIMES_ROMAN: [u16; 95] = [
    250, 333, 408, 500, 500, 833, 778, 180, 333, 333, 500, 564, 250, 333, 250, 278,
    500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 278, 278, 564, 564, 564, 444,
    921, 722, 667, 667, 722, 611, 556, 722, 722, 333, 389, 722, 611, 889, 722, 722,
    556, 722, 667, 556, 611, 722, 722, 944, 722, 722, 611, 333, 278, 333, 469, 500,
    333, 444, 500, 444, 500, 444, 333, 500, 500, 278, 278, 500, 278, 778, 500, 500,
    500, 500, 333, 389, 278, 500, 500, 722, 500, 500, 444, 480, 200, 480, 541,
];

const COURIER: [u16; 95] = [600; 95];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Helvetica,
    Times,
    Courier,
}

/// Lowercase alphanumerics of a font name, without a subset tag like `ABCDEF+`
fn normalize_font_name(name: &str) -> String {
    let name = match name.split_once('+') {
        Some((tag, rest)) if tag.len() == 6 && tag.chars().all(|c| c.is_ascii_uppercase()) => rest,
        _ => name,
    };
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn family(base_font: &str) -> Option<Family> {
    let normalized = normalize_font_name(base_font);
    if normalized.starts_with("helvetica") || normalized.starts_with("arial") {
        Some(Family::Helvetica)
    } else if normalized.starts_with("courier") {
        Some(Family::Courier)
    } else if normalized.starts_with("times") {
        Some(Family::Times)
    } else {
        None
    }
}

/// Widths from [`FIRST_CHAR`] on, for a standard font name
pub fn standard_widths(base_font: &str) -> Option<Vec<f32>> {
    let table = match family(base_font)? {
        Family::Helvetica => &HELVETICA,
        Family::Times => &TIMES_ROMAN,
        Family::Courier => &COURIER,
    };
    Some(table.iter().map(|&w| w as f32).collect())
}

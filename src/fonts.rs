//! Font metrics and text decoding for the content interpreter

use crate::document::{decode_stream, get_number, get_resolved, resolve};
use crate::standard_fonts::{self, standard_widths};
use crate::tounicode::ToUnicodeCMap;
use log::debug;
use lopdf::{Dictionary, Document, Object};
use std::collections::{BTreeMap, HashMap};

/// Advance used when a font carries no width information (thousandths of em)
pub const DEFAULT_WIDTH: f32 = 500.0;
pub const DEFAULT_ASCENT: f32 = 0.8;
pub const DEFAULT_DESCENT: f32 = -0.2;

/// Glyph advance widths in thousandths of an em
#[derive(Debug, Clone)]
enum Widths {
    Simple {
        first_char: u32,
        widths: Vec<f32>,
        missing: f32,
    },
    Composite {
        default: f32,
        map: HashMap<u32, f32>,
    },
}

impl Widths {
    fn get(&self, code: u32) -> f32 {
        match self {
            Widths::Simple {
                first_char,
                widths,
                missing,
            } => code
                .checked_sub(*first_char)
                .and_then(|i| widths.get(i as usize))
                .copied()
                .filter(|w| *w > 0.0)
                .unwrap_or(*missing),
            Widths::Composite { default, map } => map.get(&code).copied().unwrap_or(*default),
        }
    }
}

/// Everything the interpreter needs to know about one font resource
#[derive(Debug)]
pub struct FontInfo<'a> {
    dict: &'a Dictionary,
    /// Composite fonts use two-byte codes
    two_byte: bool,
    widths: Widths,
    to_unicode: Option<ToUnicodeCMap>,
    /// Ascent and descent as fractions of the font size
    pub ascent: f32,
    pub descent: f32,
}

impl<'a> FontInfo<'a> {
    pub fn load(doc: &'a Document, dict: &'a Dictionary) -> Self {
        let two_byte = dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|s| s == b"Type0")
            .unwrap_or(false);

        // Metrics of a composite font live on its descendant CIDFont
        let metrics_dict = if two_byte {
            get_resolved(doc, dict, b"DescendantFonts")
                .and_then(|obj| obj.as_array().ok())
                .and_then(|array| array.first())
                .and_then(|obj| resolve(doc, obj).as_dict().ok())
                .unwrap_or(dict)
        } else {
            dict
        };

        let descriptor = get_resolved(doc, metrics_dict, b"FontDescriptor")
            .and_then(|obj| obj.as_dict().ok());

        let widths = if two_byte {
            composite_widths(doc, metrics_dict)
        } else {
            simple_widths(doc, dict, descriptor_number(doc, descriptor, b"MissingWidth"))
        };

        let ascent = descriptor_number(doc, descriptor, b"Ascent")
            .map(|a| a / 1000.0)
            .filter(|a| *a > 0.0)
            .unwrap_or(DEFAULT_ASCENT);
        let descent = descriptor_number(doc, descriptor, b"Descent")
            .map(|d| d / 1000.0)
            .filter(|d| *d < 0.0)
            .unwrap_or(DEFAULT_DESCENT);

        let to_unicode = if two_byte {
            get_resolved(doc, dict, b"ToUnicode")
                .and_then(|obj| obj.as_stream().ok())
                .and_then(|stream| ToUnicodeCMap::parse(&decode_stream(stream)))
        } else {
            None
        };

        Self {
            dict,
            two_byte,
            widths,
            to_unicode,
            ascent,
            descent,
        }
    }

    /// Character codes of a string operand
    pub fn codes(&self, bytes: &[u8]) -> Vec<u32> {
        if self.two_byte {
            bytes
                .chunks(2)
                .map(|c| match c {
                    [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
                    [single] => *single as u32,
                    _ => 0,
                })
                .collect()
        } else {
            bytes.iter().map(|&b| b as u32).collect()
        }
    }

    /// Advance width of a code in thousandths of an em
    pub fn width(&self, code: u32) -> f32 {
        self.widths.get(code)
    }

    /// Word spacing only applies to the single-byte code 32
    pub fn is_word_space(&self, code: u32) -> bool {
        !self.two_byte && code == 32
    }

    /// Decode a string operand to Unicode
    pub fn decode(&self, doc: &Document, bytes: &[u8]) -> String {
        if let Some(cmap) = &self.to_unicode {
            return cmap.decode_cids(bytes);
        }

        if let Ok(encoding) = self.dict.get_font_encoding(doc) {
            if let Ok(text) = Document::decode_text(&encoding, bytes) {
                return text;
            }
        }
        debug!("Falling back to raw decoding for font without usable encoding");

        fallback_decode(bytes)
    }
}

/// Decode a string without font information: UTF-16BE with BOM, else Latin-1
pub fn fallback_decode(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let utf16: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect();
        return String::from_utf16_lossy(&utf16);
    }

    bytes.iter().map(|&b| b as char).collect()
}

fn descriptor_number(doc: &Document, descriptor: Option<&Dictionary>, key: &[u8]) -> Option<f32> {
    descriptor
        .and_then(|d| d.get(key).ok())
        .and_then(|obj| get_number(resolve(doc, obj)))
}

fn simple_widths(doc: &Document, dict: &Dictionary, missing: Option<f32>) -> Widths {
    let missing = missing.filter(|m| *m > 0.0).unwrap_or(DEFAULT_WIDTH);
    let widths = get_resolved(doc, dict, b"Widths").and_then(|obj| obj.as_array().ok());

    let Some(widths) = widths else {
        // Standard 14 fonts may leave out /Widths
        let standard = get_resolved(doc, dict, b"BaseFont")
            .and_then(|obj| obj.as_name().ok())
            .and_then(|name| standard_widths(&String::from_utf8_lossy(name)));
        return Widths::Simple {
            first_char: standard_fonts::FIRST_CHAR,
            widths: standard.unwrap_or_default(),
            missing,
        };
    };

    let first_char = get_resolved(doc, dict, b"FirstChar")
        .and_then(|obj| obj.as_i64().ok())
        .unwrap_or(0)
        .clamp(0, u32::MAX as i64) as u32;

    Widths::Simple {
        first_char,
        widths: widths
            .iter()
            .map(|w| get_number(resolve(doc, w)).unwrap_or(0.0))
            .collect(),
        missing,
    }
}

/// Parse a CIDFont's /DW and /W entries.
///
/// /W mixes two forms: `c [w1 w2 ...]` and `c_first c_last w`.
fn composite_widths(doc: &Document, cid_font: &Dictionary) -> Widths {
    let default = get_resolved(doc, cid_font, b"DW")
        .and_then(get_number)
        .unwrap_or(1000.0);
    let mut map = HashMap::new();

    let entries: Vec<&Object> = get_resolved(doc, cid_font, b"W")
        .and_then(|obj| obj.as_array().ok())
        .map(|array| array.iter().map(|o| resolve(doc, o)).collect())
        .unwrap_or_default();

    let mut i = 0;
    while i < entries.len() {
        let Some(first) = entries[i].as_i64().ok().filter(|c| *c >= 0) else {
            break;
        };
        match entries.get(i + 1) {
            Some(Object::Array(list)) => {
                for (offset, w) in list.iter().enumerate() {
                    let Some(code) = u32::try_from(first as u64 + offset as u64).ok() else {
                        break;
                    };
                    if let Some(w) = get_number(resolve(doc, w)) {
                        map.insert(code, w);
                    }
                }
                i += 2;
            }
            Some(last) => {
                let (Ok(last), Some(w)) = (
                    last.as_i64(),
                    entries.get(i + 2).and_then(|o| get_number(o)),
                ) else {
                    break;
                };
                // CIDs are at most two bytes
                let last = last.min(first.saturating_add(0xFFFF)).min(u32::MAX as i64);
                for code in first..=last {
                    map.insert(code as u32, w);
                }
                i += 3;
            }
            None => break,
        }
    }

    Widths::Composite { default, map }
}

/// Font resources of a resource dictionary, keyed by resource name
pub fn load_fonts<'a>(doc: &'a Document, resources: Option<&'a Dictionary>) -> BTreeMap<Vec<u8>, FontInfo<'a>> {
    let mut fonts = BTreeMap::new();

    let Some(font_dict) = resources
        .and_then(|r| get_resolved(doc, r, b"Font"))
        .and_then(|obj| obj.as_dict().ok())
    else {
        return fonts;
    };

    for (name, obj) in font_dict.iter() {
        if let Ok(dict) = resolve(doc, obj).as_dict() {
            fonts.insert(name.clone(), FontInfo::load(doc, dict));
        }
    }

    fonts
}

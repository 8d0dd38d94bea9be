//! ToUnicode CMap parsing
//!
//! Fallback decoder for composite (Type0) fonts whose encoding lopdf cannot
//! resolve on its own. Only the `bfchar` and `bfrange` sections matter for
//! text extraction; codespace ranges are ignored and codes are read two
//! bytes at a time.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static BFCHAR_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)beginbfchar(.*?)endbfchar").unwrap());
static BFRANGE_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)beginbfrange(.*?)endbfrange").unwrap());
static HEX_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([0-9A-Fa-f]+)>\s*<([0-9A-Fa-f]*)>").unwrap());
static RANGE_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<([0-9A-Fa-f]+)>\s*<([0-9A-Fa-f]+)>\s*(?:<([0-9A-Fa-f]+)>|\[([^\]]*)\])").unwrap()
});
static HEX_STRING: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([0-9A-Fa-f]*)>").unwrap());

/// A parsed ToUnicode CMap
#[derive(Debug, Default, Clone)]
pub struct ToUnicodeCMap {
    /// Single code mappings
    pub char_map: HashMap<u16, String>,
    /// Range mappings: (first code, last code, first Unicode scalar)
    pub ranges: Vec<(u16, u16, u32)>,
}

impl ToUnicodeCMap {
    /// Parse a CMap from its decompressed stream content.
    ///
    /// Returns `None` when the stream contains no usable mapping.
    pub fn parse(content: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(content);
        let mut cmap = ToUnicodeCMap::default();

        for section in BFCHAR_SECTION.captures_iter(&text) {
            for pair in HEX_PAIR.captures_iter(&section[1]) {
                if let (Some(src), Some(dst)) = (parse_hex_u16(&pair[1]), utf16_hex_to_string(&pair[2]))
                {
                    cmap.char_map.insert(src, dst);
                }
            }
        }

        for section in BFRANGE_SECTION.captures_iter(&text) {
            for entry in RANGE_ENTRY.captures_iter(&section[1]) {
                let (Some(start), Some(end)) = (parse_hex_u16(&entry[1]), parse_hex_u16(&entry[2]))
                else {
                    continue;
                };
                if end < start {
                    continue;
                }

                if let Some(base) = entry.get(3) {
                    if let Some(base) = parse_hex_u32(base.as_str()) {
                        cmap.ranges.push((start, end, base));
                    }
                } else if let Some(array) = entry.get(4) {
                    // [<dst0> <dst1> ...] maps each code of the range in turn
                    for (offset, dst) in HEX_STRING.captures_iter(array.as_str()).enumerate() {
                        let Some(code) = start.checked_add(offset as u16) else {
                            break;
                        };
                        if code > end {
                            break;
                        }
                        if let Some(s) = utf16_hex_to_string(&dst[1]) {
                            cmap.char_map.insert(code, s);
                        }
                    }
                }
            }
        }

        if cmap.char_map.is_empty() && cmap.ranges.is_empty() {
            None
        } else {
            Some(cmap)
        }
    }

    /// Look up a single code
    pub fn lookup(&self, code: u16) -> Option<String> {
        if let Some(s) = self.char_map.get(&code) {
            return Some(s.clone());
        }

        self.ranges
            .iter()
            .find(|&&(start, end, _)| code >= start && code <= end)
            .and_then(|&(start, _, base)| base.checked_add((code - start) as u32))
            .and_then(char::from_u32)
            .map(|c| c.to_string())
    }

    /// Decode a string operand made of two-byte codes.
    ///
    /// Unmapped codes fall back to being read as Unicode scalars.
    pub fn decode_cids(&self, bytes: &[u8]) -> String {
        let mut result = String::new();

        for chunk in bytes.chunks_exact(2) {
            let code = u16::from_be_bytes([chunk[0], chunk[1]]);
            match self.lookup(code) {
                Some(s) => result.push_str(&s),
                None => {
                    if let Some(c) = char::from_u32(code as u32) {
                        result.push(c);
                    }
                }
            }
        }

        result
    }
}

fn parse_hex_u16(hex: &str) -> Option<u16> {
    u16::from_str_radix(hex.trim(), 16).ok()
}

fn parse_hex_u32(hex: &str) -> Option<u32> {
    // Destinations longer than one UTF-16 unit are surrogate pairs
    let units: Vec<u16> = hex_units(hex)?;
    match units.as_slice() {
        [single] => Some(*single as u32),
        [high, low] if (0xD800..0xDC00).contains(high) => {
            char::decode_utf16([*high, *low]).next()?.ok().map(|c| c as u32)
        }
        _ => u32::from_str_radix(hex.trim(), 16).ok(),
    }
}

/// Destination strings are UTF-16BE, four hex digits per unit
fn utf16_hex_to_string(hex: &str) -> Option<String> {
    let units = hex_units(hex)?;
    let s: String = char::decode_utf16(units)
        .filter_map(|r| r.ok())
        .collect();

    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn hex_units(hex: &str) -> Option<Vec<u16>> {
    let hex = hex.trim();
    if hex.is_empty() {
        return None;
    }
    if hex.len() < 4 {
        return u16::from_str_radix(hex, 16).ok().map(|u| vec![u]);
    }

    let units: Vec<u16> = hex
        .as_bytes()
        .chunks(4)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .filter_map(|digits| u16::from_str_radix(digits, 16).ok())
        .collect();

    if units.is_empty() {
        None
    } else {
        Some(units)
    }
}

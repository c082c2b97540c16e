//! # Element Names
//!
//! Node names are not always valid XML names. DocView escapes the offending
//! characters with the ISO 9075 scheme `_xHHHH_` (UTF-16 code unit in hex).
//! Same-name siblings carry their index as a `[n]` suffix that is itself
//! escaped on the wire.

use crate::types::{Result, VaultError};

/// Encode a qualified node label for use as an element name.
///
/// The namespace prefix is kept verbatim. Only the local part is escaped.
#[must_use]
pub fn encode_name(qualified: &str) -> String {
    match qualified.split_once(':') {
        Some((prefix, local)) if !prefix.is_empty() => {
            format!("{prefix}:{}", encode_local(local))
        }
        _ => encode_local(qualified),
    }
}

fn encode_local(local: &str) -> String {
    let mut out = String::with_capacity(local.len());
    let chars: Vec<char> = local.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        let valid = if i == 0 { is_name_start(c) } else { is_name_char(c) };
        if c == '_' && starts_escape(&chars[i..]) {
            push_escaped(&mut out, c);
        } else if valid {
            out.push(c);
        } else {
            push_escaped(&mut out, c);
        }
    }
    out
}

fn push_escaped(out: &mut String, c: char) {
    let mut units = [0u16; 2];
    for unit in c.encode_utf16(&mut units) {
        out.push_str(&format!("_x{:04X}_", unit));
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || (!c.is_ascii() && c.is_alphabetic())
}

fn is_name_char(c: char) -> bool {
    is_name_start(c)
        || c.is_ascii_digit()
        || c == '-'
        || c == '.'
        || (!c.is_ascii() && c.is_alphanumeric())
}

/// True if `chars` begins with a complete `_xHHHH_` sequence.
fn starts_escape(chars: &[char]) -> bool {
    chars.len() >= 7
        && chars[0] == '_'
        && chars[1] == 'x'
        && chars[2..6].iter().all(char::is_ascii_hexdigit)
        && chars[6] == '_'
}

/// Reverse [`encode_name`]. Hex digits are accepted in either case.
#[must_use]
pub fn decode_name(encoded: &str) -> String {
    if !encoded.contains("_x") {
        return encoded.to_string();
    }
    let chars: Vec<char> = encoded.chars().collect();
    let mut out = String::with_capacity(encoded.len());
    let mut units: Vec<u16> = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if starts_escape(&chars[i..]) {
            let hex: String = chars[i + 2..i + 6].iter().collect();
            if let Ok(unit) = u16::from_str_radix(&hex, 16) {
                units.push(unit);
                i += 7;
                continue;
            }
        }
        flush_units(&mut out, &mut units);
        out.push(chars[i]);
        i += 1;
    }
    flush_units(&mut out, &mut units);
    out
}

fn flush_units(out: &mut String, units: &mut Vec<u16>) {
    if units.is_empty() {
        return;
    }
    out.extend(
        char::decode_utf16(units.drain(..)).map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER)),
    );
}

/// Split a decoded label into name and same-name-sibling index.
///
/// `item[3]` → (`item`, 3). A label without suffix, or with `[0]`, has index 0.
pub fn parse_sns_name(label: &str) -> Result<(String, u32)> {
    let Some(body) = label.strip_suffix(']') else {
        return Ok((label.to_string(), 0));
    };
    let Some(open) = body.rfind('[') else {
        return Err(VaultError::InvalidName(label.to_string()));
    };
    let index = body[open + 1..]
        .parse::<u32>()
        .map_err(|_| VaultError::InvalidName(label.to_string()))?;
    let name = &body[..open];
    if name.is_empty() {
        return Err(VaultError::InvalidName(label.to_string()));
    }
    Ok((name.to_string(), index))
}

/// Label of a node as it appears in a path: `name` or `name[index]` for
/// indices above 1.
#[must_use]
pub fn sns_label(name: &str, index: u32) -> String {
    if index > 1 {
        format!("{name}[{index}]")
    } else {
        name.to_string()
    }
}

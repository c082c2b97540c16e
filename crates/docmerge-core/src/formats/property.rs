//! # Property Value Grammar
//!
//! Every property of a DocView node is one attribute whose value follows:
//!
//! ```text
//! value  := ["{" type "}"] ( scalar | "[" [ scalar {"," scalar} ] "]" )
//! ```
//!
//! Escapes: `\\`, `\,` (separator inside brackets), a leading `\[` or `\{`
//! on single values, `\uXXXX` for characters that cannot live in an XML
//! attribute, and `\0` meaning "one empty value" inside brackets.
//!
//! A `{BinaryRef}` tag marks an opaque reference to binary content. Literal
//! binaries are never inlined, they appear as empty placeholders.
//!
//! Law: `parse(format(p)) == p` for every `p` this module formats.

use crate::primitives::BINARY_REF;
use crate::types::{PropertyType, Result, VaultError};

/// A property as it appears in a DocView document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocProperty {
    pub name: String,
    pub values: Vec<String>,
    pub kind: PropertyType,
    pub multiple: bool,
    /// Values are opaque binary references, not content.
    pub binary_ref: bool,
}

impl DocProperty {
    /// Single-valued property.
    #[must_use]
    pub fn single(name: impl Into<String>, kind: PropertyType, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: vec![value.into()],
            kind,
            multiple: false,
            binary_ref: false,
        }
    }

    /// Multi-valued property.
    #[must_use]
    pub fn multi<I, V>(name: impl Into<String>, kind: PropertyType, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
            kind,
            multiple: true,
            binary_ref: false,
        }
    }

    /// First value, or the empty string.
    #[must_use]
    pub fn value(&self) -> &str {
        self.values.first().map_or("", String::as_str)
    }

    /// A binary property whose content must come from an attachment.
    #[must_use]
    pub fn is_binary_placeholder(&self) -> bool {
        self.kind == PropertyType::Binary
            && !self.binary_ref
            && self.values.iter().all(String::is_empty)
    }

    /// Decode the serialized attribute value of property `name`.
    pub fn parse(name: &str, raw: &str) -> Result<Self> {
        let invalid = |message: String| VaultError::InvalidValue {
            name: name.to_string(),
            message,
        };

        let mut kind = PropertyType::Undefined;
        let mut binary_ref = false;
        let mut rest = raw;

        if let Some(after) = raw.strip_prefix('{') {
            let Some(end) = after.find('}') else {
                return Err(invalid("unterminated type tag".to_string()));
            };
            let tag = &after[..end];
            if tag == BINARY_REF {
                kind = PropertyType::Binary;
                binary_ref = true;
            } else {
                kind = PropertyType::from_name(tag)
                    .ok_or_else(|| invalid(format!("unknown property type '{tag}'")))?;
            }
            rest = &after[end + 1..];
        }

        let (values, multiple) = match rest.strip_prefix('[') {
            Some(body) => (parse_array(body).map_err(invalid)?, true),
            None => (vec![unescape(rest).map_err(invalid)?], false),
        };

        Ok(Self {
            name: name.to_string(),
            values,
            kind,
            multiple,
            binary_ref,
        })
    }

    /// Encode this property as an attribute value.
    #[must_use]
    pub fn format(&self) -> String {
        let mut out = String::new();
        if self.binary_ref {
            out.push('{');
            out.push_str(BINARY_REF);
            out.push('}');
        } else if !matches!(self.kind, PropertyType::String | PropertyType::Undefined) {
            out.push('{');
            out.push_str(self.kind.name());
            out.push('}');
        }

        if self.multiple {
            out.push('[');
            if let [only] = self.values.as_slice()
                && only.is_empty()
            {
                out.push_str("\\0");
            } else {
                for (i, v) in self.values.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    escape_into(&mut out, v, true);
                }
            }
            out.push(']');
        } else {
            escape_into(&mut out, self.value(), false);
        }
        out
    }
}

// =============================================================================
// DECODING
// =============================================================================

/// Split the body of a bracketed value (everything after `[`).
fn parse_array(body: &str) -> std::result::Result<Vec<String>, String> {
    let Some(inner) = body.strip_suffix(']') else {
        return Err("unterminated multi-value".to_string());
    };

    let mut values = Vec::new();
    let mut current = String::new();
    let mut started = false;
    let mut separated = false;
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        match c {
            ',' => {
                values.push(std::mem::take(&mut current));
                started = false;
                separated = true;
            }
            '\\' => {
                decode_escape(&mut chars, &mut current)?;
                started = true;
            }
            other => {
                current.push(other);
                started = true;
            }
        }
    }
    if started || separated || !current.is_empty() {
        values.push(current);
    }
    Ok(values)
}

/// Decode a single scalar.
fn unescape(raw: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            decode_escape(&mut chars, &mut out)?;
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

/// Decode one escape sequence (the backslash is already consumed).
/// `\0` contributes no character, it only marks the value as present.
fn decode_escape<I>(chars: &mut I, out: &mut String) -> std::result::Result<(), String>
where
    I: Iterator<Item = char>,
{
    match chars.next() {
        Some(c @ ('\\' | ',' | '[' | '{' | ']')) => {
            out.push(c);
            Ok(())
        }
        Some('0') => Ok(()),
        Some('u') => {
            let mut code = 0u32;
            for _ in 0..4 {
                let digit = chars
                    .next()
                    .and_then(|h| h.to_digit(16))
                    .ok_or_else(|| "incomplete \\u escape".to_string())?;
                code = code * 16 + digit;
            }
            let decoded =
                char::from_u32(code).ok_or_else(|| format!("invalid code point U+{code:04X}"))?;
            out.push(decoded);
            Ok(())
        }
        Some(other) => Err(format!("unknown escape '\\{other}'")),
        None => Err("dangling escape at end of value".to_string()),
    }
}

// =============================================================================
// ENCODING
// =============================================================================

fn escape_into(out: &mut String, value: &str, in_array: bool) {
    for (i, c) in value.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            ',' if in_array => out.push_str("\\,"),
            '[' | '{' if i == 0 && !in_array => {
                out.push('\\');
                out.push(c);
            }
            c if needs_unicode_escape(c) => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
}

/// Characters that do not survive an XML attribute round trip.
fn needs_unicode_escape(c: char) -> bool {
    (c as u32) < 0x20 || c == '\u{FFFE}' || c == '\u{FFFF}'
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> DocProperty {
        DocProperty::parse("p", raw).expect("value parses")
    }

    #[test]
    fn untyped_single_value() {
        let p = parse("hello");
        assert_eq!(p.kind, PropertyType::Undefined);
        assert_eq!(p.values, vec!["hello"]);
        assert!(!p.multiple);
    }

    #[test]
    fn typed_multi_value() {
        let p = parse("{Long}[1,2,3]");
        assert_eq!(p.kind, PropertyType::Long);
        assert_eq!(p.values, vec!["1", "2", "3"]);
        assert!(p.multiple);
    }

    #[test]
    fn empty_array_versus_one_empty_value() {
        assert!(parse("[]").values.is_empty());
        assert_eq!(parse("[\\0]").values, vec![""]);
        assert_eq!(parse("[a,]").values, vec!["a", ""]);
    }

    #[test]
    fn escaped_comma_and_bracket() {
        assert_eq!(parse("[a\\,b,c]").values, vec!["a,b", "c"]);
        let single = parse("\\[not an array]");
        assert!(!single.multiple);
        assert_eq!(single.values, vec!["[not an array]"]);
        assert_eq!(parse("{String}\\{x}").values, vec!["{x}"]);
    }

    #[test]
    fn unicode_escape() {
        assert_eq!(parse("a\\u000ab").values, vec!["a\nb"]);
    }

    #[test]
    fn closing_bracket_inside_array_value() {
        assert_eq!(parse("[a]b]").values, vec!["a]b"]);
    }

    #[test]
    fn binary_reference() {
        let p = parse("{BinaryRef}abc:123");
        assert!(p.binary_ref);
        assert_eq!(p.kind, PropertyType::Binary);
        assert_eq!(p.format(), "{BinaryRef}abc:123");
    }

    #[test]
    fn binary_placeholder() {
        assert!(parse("{Binary}").is_binary_placeholder());
        assert!(!parse("{Binary}abc").is_binary_placeholder());
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(DocProperty::parse("p", "{Long").is_err());
        assert!(DocProperty::parse("p", "{Int}1").is_err());
        assert!(DocProperty::parse("p", "[a,b").is_err());
        assert!(DocProperty::parse("p", "a\\").is_err());
        assert!(DocProperty::parse("p", "\\u12").is_err());
        assert!(DocProperty::parse("p", "\\q").is_err());
    }

    #[test]
    fn format_escapes_ambiguous_values() {
        let p = DocProperty::single("p", PropertyType::Undefined, "[x]");
        assert_eq!(p.format(), "\\[x]");
        let p = DocProperty::multi("p", PropertyType::Undefined, ["a,b", "c\\d"]);
        assert_eq!(p.format(), "[a\\,b,c\\\\d]");
        let p = DocProperty::multi("p", PropertyType::Date, [""]);
        assert_eq!(p.format(), "{Date}[\\0]");
        let p = DocProperty::single("p", PropertyType::Undefined, "tab\there");
        assert_eq!(p.format(), "tab\\u0009here");
    }

    #[test]
    fn string_type_is_written_untagged() {
        let p = DocProperty::single("p", PropertyType::String, "x");
        assert_eq!(p.format(), "x");
    }
}

//! # Wire Formats
//!
//! Encodings shared by the DocView parser and writer:
//! - `property`: the typed, possibly multi-valued attribute value grammar
//! - `name`: ISO 9075 element name escaping and same-name-sibling labels

pub mod name;
pub mod property;

pub use name::{decode_name, encode_name, parse_sns_name, sns_label};
pub use property::DocProperty;

//! # Deferred Binaries
//!
//! Binary property values never appear inline in a document. They are
//! supplied next to it, one [`BlobInfo`] per property, and read when the
//! owning node is applied. Each source is opened, read to the end and
//! closed before the next one is touched.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

use crate::types::{Property, PropertyType, Result, Value, VaultError};

/// Where the bytes of one binary value come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinarySource {
    Inline(Vec<u8>),
    File(PathBuf),
}

impl BinarySource {
    /// Open a reader over the content.
    pub fn open(&self) -> Result<Box<dyn Read + '_>> {
        match self {
            Self::Inline(bytes) => Ok(Box::new(bytes.as_slice())),
            Self::File(path) => {
                let file = File::open(path).map_err(|e| {
                    VaultError::IoError(format!("{}: {e}", path.display()))
                })?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }

    pub fn read_all(&self) -> Result<Vec<u8>> {
        let mut reader = self.open()?;
        let mut out = Vec::new();
        reader
            .read_to_end(&mut out)
            .map_err(|e| VaultError::IoError(e.to_string()))?;
        Ok(out)
    }
}

/// Binary values of one property. Multi-valued properties fill indexed
/// slots, possibly out of order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlobInfo {
    multiple: bool,
    slots: Vec<Option<BinarySource>>,
}

impl BlobInfo {
    #[must_use]
    pub fn single(source: BinarySource) -> Self {
        Self {
            multiple: false,
            slots: vec![Some(source)],
        }
    }

    #[must_use]
    pub fn multi() -> Self {
        Self {
            multiple: true,
            slots: Vec::new(),
        }
    }

    #[must_use]
    pub const fn is_multiple(&self) -> bool {
        self.multiple
    }

    /// Put `source` at `index`, growing the slot list with holes if needed.
    pub fn add(&mut self, index: usize, source: BinarySource) {
        if self.slots.len() <= index {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(source);
    }

    /// Whether every slot is filled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.slots.is_empty() && self.slots.iter().all(Option::is_some)
    }

    /// Read every value in slot order. A hole is an error.
    pub fn read_values(&self, name: &str) -> Result<Vec<Value>> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| match slot {
                Some(source) => source.read_all().map(Value::Binary),
                None => Err(VaultError::InvalidValue {
                    name: name.to_string(),
                    message: format!("binary value {i} is missing"),
                }),
            })
            .collect()
    }

    /// Materialise the property.
    pub fn to_property(&self, name: &str) -> Result<Property> {
        Ok(Property {
            name: name.to_string(),
            kind: PropertyType::Binary,
            values: self.read_values(name)?,
            multiple: self.multiple,
        })
    }
}

//! Key type tags for MeridianDB secondary indexes.

use serde::{Deserialize, Serialize};

/// Width in bytes of a fixed string key (null-padded).
pub const STRING_KEY_SIZE: usize = 10;

/// Identifier for the attribute type an index is built over.
///
/// The tag is chosen at index creation and persisted in the index
/// file's meta page; reopening an index verifies it against the
/// caller's arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum KeyType {
    /// 32-bit signed integer key.
    Int = 0,
    /// 64-bit floating point key.
    Double = 1,
    /// Fixed-width string key, null-padded to 10 bytes.
    Str = 2,
}

impl KeyType {
    /// Returns the serialized width of a key of this type in bytes.
    pub fn key_width(&self) -> usize {
        match self {
            KeyType::Int => 4,
            KeyType::Double => 8,
            KeyType::Str => STRING_KEY_SIZE,
        }
    }

    /// Decodes a persisted type tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(KeyType::Int),
            1 => Some(KeyType::Double),
            2 => Some(KeyType::Str),
            _ => None,
        }
    }

    /// Returns true if this key type has a numeric total order.
    pub fn is_numeric(&self) -> bool {
        matches!(self, KeyType::Int | KeyType::Double)
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KeyType::Int => "INT",
            KeyType::Double => "DOUBLE",
            KeyType::Str => "STR",
        };
        write!(f, "{}", name)
    }
}

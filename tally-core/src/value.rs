//! Stored values and call argument rendering
//!
//! A [`StoredValue`] is one of the four primitives the store accessor accepts.
//! Each value has two textual forms:
//!
//! - its wire encoding, the bytes written to the key-value store
//! - its literal form, used when the value appears as an argument in a call
//!   history entry (`'foo'`, `b'raw'`, `42`, `2.5`)

use std::fmt;

use crate::error::ConversionError;

/// A primitive value accepted by the store accessor.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Text(String),
    Bytes(Vec<u8>),
    Integer(i64),
    Real(f64),
}

impl StoredValue {
    /// Bytes written to the store for this value.
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            StoredValue::Text(text) => text.as_bytes().to_vec(),
            StoredValue::Bytes(bytes) => bytes.clone(),
            StoredValue::Integer(n) => n.to_string().into_bytes(),
            StoredValue::Real(x) => format_real(*x).into_bytes(),
        }
    }

    /// Literal form of this value as it appears inside an argument tuple.
    pub fn literal(&self) -> String {
        match self {
            StoredValue::Text(text) => text_literal(text),
            StoredValue::Bytes(bytes) => bytes_literal(bytes),
            StoredValue::Integer(n) => n.to_string(),
            StoredValue::Real(x) => format_real(*x),
        }
    }

    /// Short name of the variant, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            StoredValue::Text(_) => "text",
            StoredValue::Bytes(_) => "bytes",
            StoredValue::Integer(_) => "integer",
            StoredValue::Real(_) => "real",
        }
    }
}

impl From<String> for StoredValue {
    fn from(value: String) -> Self {
        StoredValue::Text(value)
    }
}

impl From<&str> for StoredValue {
    fn from(value: &str) -> Self {
        StoredValue::Text(value.to_string())
    }
}

impl From<Vec<u8>> for StoredValue {
    fn from(value: Vec<u8>) -> Self {
        StoredValue::Bytes(value)
    }
}

impl From<&[u8]> for StoredValue {
    fn from(value: &[u8]) -> Self {
        StoredValue::Bytes(value.to_vec())
    }
}

impl From<i64> for StoredValue {
    fn from(value: i64) -> Self {
        StoredValue::Integer(value)
    }
}

impl From<f64> for StoredValue {
    fn from(value: f64) -> Self {
        StoredValue::Real(value)
    }
}

// ============================================================================
// CONVERSIONS FROM RAW BYTES
// ============================================================================

/// Decode raw stored bytes as UTF-8 text.
pub fn decode_text(raw: Vec<u8>) -> Result<String, ConversionError> {
    String::from_utf8(raw).map_err(|e| ConversionError::InvalidUtf8 {
        reason: e.to_string(),
    })
}

/// Parse raw stored bytes as a decimal integer.
pub fn decode_integer(raw: Vec<u8>) -> Result<i64, ConversionError> {
    let text = String::from_utf8_lossy(&raw);
    text.trim()
        .parse::<i64>()
        .map_err(|_| ConversionError::InvalidInteger {
            raw: text.into_owned(),
        })
}

/// Parse raw stored bytes as a real number.
pub fn decode_real(raw: Vec<u8>) -> Result<f64, ConversionError> {
    let text = String::from_utf8_lossy(&raw);
    text.trim()
        .parse::<f64>()
        .map_err(|_| ConversionError::InvalidReal {
            raw: text.into_owned(),
        })
}

/// Identity conversion; keeps the raw bytes.
pub fn decode_bytes(raw: Vec<u8>) -> Result<Vec<u8>, ConversionError> {
    Ok(raw)
}

// ============================================================================
// CALL ARGUMENTS
// ============================================================================

/// Ordered, already-rendered positional arguments of one call.
///
/// `Display` produces tuple-literal notation: `()`, `('foo',)`, `('a', 2)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallArgs {
    rendered: Vec<String>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments of a single-value call.
    pub fn single(value: &StoredValue) -> Self {
        Self::new().with_value(value)
    }

    /// Append a stored value argument.
    pub fn with_value(mut self, value: &StoredValue) -> Self {
        self.rendered.push(value.literal());
        self
    }

    /// Append a text argument.
    pub fn with_text(mut self, text: &str) -> Self {
        self.rendered.push(text_literal(text));
        self
    }

    /// Append an argument that is already in literal form.
    pub fn with_literal(mut self, literal: impl Into<String>) -> Self {
        self.rendered.push(literal.into());
        self
    }

    pub fn len(&self) -> usize {
        self.rendered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }
}

impl fmt::Display for CallArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rendered.as_slice() {
            [] => write!(f, "()"),
            [only] => write!(f, "({},)", only),
            many => write!(f, "({})", many.join(", ")),
        }
    }
}

// ============================================================================
// LITERAL RENDERING
// ============================================================================

/// Render a real number in shortest round-trip form, keeping a `.0` on
/// integral values so they never read back as integers.
pub fn format_real(x: f64) -> String {
    let mut out = x.to_string();
    if x.is_finite() && !out.contains('.') {
        out.push_str(".0");
    }
    out
}

fn text_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn bytes_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push_str("b'");
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push('\'');
    out
}

//! Typed cell values read from recovered databases.
//!
//! Legacy files freely mix storage classes within one column, so every cell
//! is carried as a [`CellValue`] and consumers match on the tag.

use crate::signature::{classify, FileKind};
use rusqlite::types::ValueRef;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::borrow::Cow;

/// One SQLite cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Raw bytes of a blob cell.
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            CellValue::Blob(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Text used for matching and for `match_value` in search results.
    ///
    /// Returns `None` for NULL cells, which never match anything. Blobs are
    /// decoded as lossy UTF-8.
    pub fn search_text(&self) -> Option<Cow<'_, str>> {
        match self {
            CellValue::Null => None,
            CellValue::Integer(v) => Some(Cow::Owned(v.to_string())),
            CellValue::Real(v) => Some(Cow::Owned(format_real(*v))),
            CellValue::Text(s) => Some(Cow::Borrowed(s.as_str())),
            CellValue::Blob(bytes) => Some(String::from_utf8_lossy(bytes)),
        }
    }

    /// Storage class name as SQLite's `typeof()` reports it.
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Null => "null",
            CellValue::Integer(_) => "integer",
            CellValue::Real(_) => "real",
            CellValue::Text(_) => "text",
            CellValue::Blob(_) => "blob",
        }
    }
}

/// Text of a borrowed SQLite value, rendered exactly like
/// [`CellValue::search_text`].
pub(crate) fn value_ref_text(value: ValueRef<'_>) -> Option<Cow<'_, str>> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(v) => Some(Cow::Owned(v.to_string())),
        ValueRef::Real(v) => Some(Cow::Owned(format_real(v))),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(String::from_utf8_lossy(bytes)),
    }
}

/// Render a real the way SQLite's text conversion does (`%!.15g`): 15
/// significant digits, exponent form below 1e-4 and from 1e15 up, and always
/// a decimal point (`1.0`, `1.0e+15`).
fn format_real(v: f64) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }
    if v == 0.0 {
        return "0.0".to_string();
    }

    // "d.dddddddddddddde<exp>", rounded to 15 significant digits.
    let scientific = format!("{:.14e}", v.abs());
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return v.to_string();
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return v.to_string();
    };
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let digits = digits.trim_end_matches('0');
    let sign = if v < 0.0 { "-" } else { "" };

    if !(-4..15).contains(&exponent) {
        let (head, tail) = digits.split_at(1);
        let tail = if tail.is_empty() { "0" } else { tail };
        let exp_sign = if exponent < 0 { '-' } else { '+' };
        format!("{sign}{head}.{tail}e{exp_sign}{:02}", exponent.abs())
    } else if exponent >= 0 {
        let int_len = exponent as usize + 1;
        if digits.len() <= int_len {
            format!("{sign}{digits}{}.0", "0".repeat(int_len - digits.len()))
        } else {
            format!("{sign}{}.{}", &digits[..int_len], &digits[int_len..])
        }
    } else {
        let zeros = "0".repeat((-exponent - 1) as usize);
        format!("{sign}0.{zeros}{digits}")
    }
}

impl From<ValueRef<'_>> for CellValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(v) => CellValue::Integer(v),
            ValueRef::Real(v) => CellValue::Real(v),
            ValueRef::Text(bytes) => CellValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => CellValue::Blob(bytes.to_vec()),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Null => serializer.serialize_none(),
            CellValue::Integer(v) => serializer.serialize_i64(*v),
            CellValue::Real(v) => serializer.serialize_f64(*v),
            CellValue::Text(s) => serializer.serialize_str(s),
            CellValue::Blob(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => serializer.serialize_str(text),
                Err(_) => serializer.serialize_str(&format!("<bytes:{}>", hex::encode(bytes))),
            },
        }
    }
}

/// A row keyed by column name, in column order.
///
/// Serialises as a JSON object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowMap(Vec<(String, CellValue)>);

impl RowMap {
    pub fn from_parts(columns: &[String], values: &[CellValue]) -> Self {
        Self(
            columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect(),
        )
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.0
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl Serialize for RowMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A cell prepared for a table view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedCell {
    pub text: String,
    /// The value was too large to show inline and was replaced by a placeholder.
    pub is_large: bool,
    pub file_kind: Option<FileKind>,
}

impl FormattedCell {
    fn inline(text: String) -> Self {
        Self {
            text,
            is_large: false,
            file_kind: None,
        }
    }

    fn placeholder(text: String, file_kind: Option<FileKind>) -> Self {
        Self {
            text,
            is_large: true,
            file_kind,
        }
    }
}

/// Render a cell for display, replacing oversized values with placeholders.
pub fn format_cell(value: &CellValue, display_limit_bytes: usize) -> FormattedCell {
    match value {
        CellValue::Null => FormattedCell::inline("NULL".to_string()),
        CellValue::Blob(bytes) => {
            if let Some(kind) = classify(bytes) {
                return FormattedCell::placeholder(
                    format!("[{} file - {}]", kind, human_size(bytes.len())),
                    Some(kind),
                );
            }
            if bytes.len() > display_limit_bytes {
                return FormattedCell::placeholder(
                    format!("[binary data - {}]", human_size(bytes.len())),
                    None,
                );
            }
            FormattedCell::inline(String::from_utf8_lossy(bytes).into_owned())
        }
        CellValue::Text(s) => {
            if s.len() > display_limit_bytes {
                FormattedCell::placeholder(
                    format!("[large field - {} chars]", s.chars().count()),
                    None,
                )
            } else {
                FormattedCell::inline(s.clone())
            }
        }
        CellValue::Integer(_) | CellValue::Real(_) => {
            let text = value
                .search_text()
                .map(Cow::into_owned)
                .unwrap_or_default();
            if text.len() > display_limit_bytes {
                FormattedCell::placeholder("[large field]".to_string(), None)
            } else {
                FormattedCell::inline(text)
            }
        }
    }
}

fn human_size(len: usize) -> String {
    let kb = len as f64 / 1024.0;
    if kb >= 1024.0 {
        format!("{:.1}MB", kb / 1024.0)
    } else {
        format!("{:.1}KB", kb)
    }
}

//! Grid Line Codec
//!
//! Encoding and decoding for the pipe-delimited grid stream lines.
//!
//! - **Snapshot rows**: 12 fields in fixed column order
//! - **Updates**: `UPDATE|rowId|columnName|newValue`
//!
//! # Escaping
//!
//! Free-text values escape the delimiter and line breaks with a backslash:
//!
//! | Raw | Encoded |
//! |---|---|
//! | `\|` | `\\|` |
//! | newline | `\n` |
//! | `\` | `\\` |
//!
//! Decoding leaves any other backslash sequence as-is.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::domain::grid::{GridField, GridRow, RowId};

/// Field delimiter.
pub const DELIMITER: char = '|';

/// Escape character for free-text values.
pub const ESCAPE: char = '\\';

/// Prefix of every update line.
pub const UPDATE_PREFIX: &str = "UPDATE|";

/// Number of fields in a snapshot row line.
pub const ROW_FIELD_COUNT: usize = 12;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Snapshot row did not have exactly 12 fields.
    #[error("expected {expected} fields, found {found}")]
    FieldCount {
        /// Required field count.
        expected: usize,
        /// Fields present in the line.
        found: usize,
    },

    /// Numeric column failed to parse.
    #[error("invalid {field} value: {value:?}")]
    InvalidNumber {
        /// Column that failed.
        field: GridField,
        /// Raw text.
        value: String,
    },

    /// Line does not start with `UPDATE|`.
    #[error("not an update line")]
    NotAnUpdate,

    /// Update line has fewer than three delimiters.
    #[error("update line is missing delimiters")]
    MissingDelimiter,

    /// Update row id is not a non-negative integer.
    #[error("invalid row id: {0:?}")]
    InvalidRowId(String),
}

/// A decoded update line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateLine {
    /// Target row.
    pub row_id: RowId,
    /// Column wire name.
    pub field: String,
    /// Unescaped new value.
    pub value: String,
}

/// Codec for the grid stream line formats.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineCodec;

impl LineCodec {
    /// Create a new line codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a snapshot row line.
    ///
    /// Field boundaries come from a single scan for unescaped delimiters;
    /// fields are borrowed slices until the row is built.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::FieldCount` if the line does not hold exactly 12
    /// fields, or `CodecError::InvalidNumber` if a numeric column is malformed.
    pub fn decode_row(&self, line: &str) -> Result<GridRow, CodecError> {
        let mut fields = [""; ROW_FIELD_COUNT];
        let mut count = 0;
        let mut start = 0;

        for pos in unescaped_delimiters(line) {
            if count == ROW_FIELD_COUNT - 1 {
                return Err(CodecError::FieldCount {
                    expected: ROW_FIELD_COUNT,
                    found: unescaped_delimiters(line).count() + 1,
                });
            }
            fields[count] = &line[start..pos];
            count += 1;
            start = pos + 1;
        }
        fields[count] = &line[start..];
        count += 1;

        if count != ROW_FIELD_COUNT {
            return Err(CodecError::FieldCount {
                expected: ROW_FIELD_COUNT,
                found: count,
            });
        }

        let [
            id,
            name,
            price,
            quantity,
            status,
            created_timestamp,
            modified_timestamp,
            value,
            bid_price,
            bid_size,
            ask_price,
            ask_size,
        ] = fields;

        Ok(GridRow {
            id: number(GridField::Id, id)?,
            name: unescape(name).into_owned(),
            price: number(GridField::Price, price)?,
            quantity: number(GridField::Quantity, quantity)?,
            status: unescape(status).into_owned(),
            created_timestamp: unescape(created_timestamp).into_owned(),
            modified_timestamp: unescape(modified_timestamp).into_owned(),
            value: number(GridField::Value, value)?,
            bid_price: number(GridField::BidPrice, bid_price)?,
            bid_size: number(GridField::BidSize, bid_size)?,
            ask_price: number(GridField::AskPrice, ask_price)?,
            ask_size: number(GridField::AskSize, ask_size)?,
        })
    }

    /// Decode an `UPDATE|rowId|columnName|newValue` line.
    ///
    /// The value is everything after the third delimiter, unescaped.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is missing, fewer than three delimiters
    /// are present, or the row id is not numeric.
    pub fn decode_update(&self, line: &str) -> Result<UpdateLine, CodecError> {
        let rest = line
            .strip_prefix(UPDATE_PREFIX)
            .ok_or(CodecError::NotAnUpdate)?;
        let (row_id, rest) = rest
            .split_once(DELIMITER)
            .ok_or(CodecError::MissingDelimiter)?;
        let (field, value) = rest
            .split_once(DELIMITER)
            .ok_or(CodecError::MissingDelimiter)?;

        let row_id = row_id
            .parse()
            .map_err(|_| CodecError::InvalidRowId(row_id.to_string()))?;

        Ok(UpdateLine {
            row_id,
            field: field.to_string(),
            value: unescape(value).into_owned(),
        })
    }

    /// Encode a row as a snapshot line.
    #[must_use]
    pub fn encode_row(&self, row: &GridRow) -> String {
        let mut line = String::with_capacity(128);
        // Writing to a String cannot fail.
        let _ = write!(
            line,
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            row.id,
            escape(&row.name),
            row.price,
            row.quantity,
            escape(&row.status),
            escape(&row.created_timestamp),
            escape(&row.modified_timestamp),
            row.value,
            row.bid_price,
            row.bid_size,
            row.ask_price,
            row.ask_size,
        );
        line
    }

    /// Encode a single field update line.
    #[must_use]
    pub fn encode_update(&self, row_id: RowId, field: &str, value: &str) -> String {
        format!("{UPDATE_PREFIX}{row_id}|{field}|{}", escape(value))
    }
}

/// Byte offsets of delimiters not preceded by an escape.
///
/// Both the delimiter and escape are ASCII, so byte offsets are valid
/// `str` boundaries.
fn unescaped_delimiters(line: &str) -> impl Iterator<Item = usize> + '_ {
    let mut escaped = false;
    line.bytes().enumerate().filter_map(move |(i, b)| {
        if escaped {
            escaped = false;
            return None;
        }
        match b {
            b'\\' => {
                escaped = true;
                None
            }
            b'|' => Some(i),
            _ => None,
        }
    })
}

fn number<T: std::str::FromStr>(field: GridField, raw: &str) -> Result<T, CodecError> {
    raw.trim().parse().map_err(|_| CodecError::InvalidNumber {
        field,
        value: raw.to_string(),
    })
}

/// Escape a free-text value for the wire.
#[must_use]
pub fn escape(value: &str) -> Cow<'_, str> {
    if !value.contains([DELIMITER, ESCAPE, '\n']) {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

/// Decode an escaped wire value.
#[must_use]
pub fn unescape(value: &str) -> Cow<'_, str> {
    if !value.contains(ESCAPE) {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != ESCAPE {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('|') => out.push('|'),
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push(ESCAPE);
                out.push(other);
            }
            None => out.push(ESCAPE),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const VALID_ROW: &str =
        "3|ACME|10.5|100|ACTIVE|2024-01-15 09:30:00|2024-01-15 09:31:00|1050.0|10.4|300|10.6|200";

    #[test]
    fn decode_row_parses_all_columns() {
        let row = LineCodec::new().decode_row(VALID_ROW).unwrap();
        assert_eq!(row.id, 3);
        assert_eq!(row.name, "ACME");
        assert_eq!(row.price, 10.5);
        assert_eq!(row.quantity, 100);
        assert_eq!(row.status, "ACTIVE");
        assert_eq!(row.created_timestamp, "2024-01-15 09:30:00");
        assert_eq!(row.modified_timestamp, "2024-01-15 09:31:00");
        assert_eq!(row.value, 1050.0);
        assert_eq!(row.bid_price, 10.4);
        assert_eq!(row.bid_size, 300);
        assert_eq!(row.ask_price, 10.6);
        assert_eq!(row.ask_size, 200);
    }

    #[test]
    fn decode_row_rejects_short_line() {
        let err = LineCodec::new().decode_row("1|ACME|10.5").unwrap_err();
        assert_eq!(
            err,
            CodecError::FieldCount {
                expected: 12,
                found: 3
            }
        );
    }

    #[test]
    fn decode_row_rejects_extra_fields() {
        let line = format!("{VALID_ROW}|extra");
        let err = LineCodec::new().decode_row(&line).unwrap_err();
        assert_eq!(
            err,
            CodecError::FieldCount {
                expected: 12,
                found: 13
            }
        );
    }

    #[test]
    fn decode_row_rejects_bad_number() {
        let line = VALID_ROW.replace("10.5", "ten");
        let err = LineCodec::new().decode_row(&line).unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidNumber {
                field: GridField::Price,
                ..
            }
        ));
    }

    #[test]
    fn decode_row_keeps_escaped_delimiters_in_text() {
        let line = VALID_ROW.replace("ACME", r"A\|C\nME");
        let row = LineCodec::new().decode_row(&line).unwrap();
        assert_eq!(row.name, "A|C\nME");
        assert_eq!(row.ask_size, 200);
    }

    #[test]
    fn row_with_delimiter_and_newline_in_name_round_trips() {
        let codec = LineCodec::new();
        let row = GridRow {
            id: 9,
            name: "Foo|Bar\nBaz".to_string(),
            price: 1.25,
            quantity: -4,
            status: "HALTED".to_string(),
            ..GridRow::default()
        };

        let line = codec.encode_row(&row);
        assert!(!line.contains('\n'));
        assert_eq!(codec.decode_row(&line).unwrap(), row);
    }

    #[test]
    fn decode_update_with_escaped_value() {
        let update = LineCodec::new().decode_update(r"UPDATE|7|name|A\|B").unwrap();
        assert_eq!(
            update,
            UpdateLine {
                row_id: 7,
                field: "name".to_string(),
                value: "A|B".to_string(),
            }
        );
    }

    #[test]
    fn decode_update_value_keeps_raw_delimiters() {
        let update = LineCodec::new().decode_update("UPDATE|1|status|a|b").unwrap();
        assert_eq!(update.value, "a|b");
    }

    #[test]
    fn decode_update_allows_empty_value() {
        let update = LineCodec::new().decode_update("UPDATE|1|status|").unwrap();
        assert_eq!(update.value, "");
    }

    #[test]
    fn decode_update_rejects_missing_delimiters() {
        let codec = LineCodec::new();
        assert_eq!(
            codec.decode_update("UPDATE|1|price").unwrap_err(),
            CodecError::MissingDelimiter
        );
        assert_eq!(
            codec.decode_update("UPDATE|1").unwrap_err(),
            CodecError::MissingDelimiter
        );
    }

    #[test]
    fn decode_update_rejects_bad_row_id() {
        assert_eq!(
            LineCodec::new()
                .decode_update("UPDATE|-1|price|1.0")
                .unwrap_err(),
            CodecError::InvalidRowId("-1".to_string())
        );
    }

    #[test]
    fn decode_update_rejects_other_lines() {
        assert_eq!(
            LineCodec::new().decode_update("HEARTBEAT").unwrap_err(),
            CodecError::NotAnUpdate
        );
    }

    #[test]
    fn encode_update_escapes_value() {
        let line = LineCodec::new().encode_update(7, "name", "A|B");
        assert_eq!(line, r"UPDATE|7|name|A\|B");
    }

    #[test]
    fn unescape_leaves_unknown_sequences() {
        assert_eq!(unescape(r"a\tb"), r"a\tb");
        assert_eq!(unescape(r"trailing\"), r"trailing\");
        assert!(matches!(unescape("plain"), Cow::Borrowed("plain")));
    }

    proptest! {
        #[test]
        fn escape_then_unescape_is_identity(value in "\\PC*") {
            let escaped = escape(&value);
            prop_assert!(!escaped.contains('\n'));
            prop_assert_eq!(unescape(&escaped), value.as_str());
        }
    }
}

//! Grid Row Model
//!
//! The fixed-schema record streamed by the grid server. Rows are created once
//! from the snapshot and then mutated in place, one field at a time, by
//! name-addressed string updates.
//!
//! # Wire Field Names
//!
//! | Field | Wire name | Type |
//! |---|---|---|
//! | id | `id` | integer |
//! | name | `name` | text |
//! | price | `price` | float |
//! | quantity | `quantity` | integer |
//! | status | `status` | text |
//! | created timestamp | `createdTimestamp` | text |
//! | modified timestamp | `modifiedTimestamp` | text |
//! | value | `value` | float |
//! | bid price | `bidPrice` | float |
//! | bid size | `bidSize` | integer |
//! | ask price | `askPrice` | float |
//! | ask size | `askSize` | integer |

use std::fmt;
use std::str::FromStr;

// =============================================================================
// Types
// =============================================================================

/// Row identifier. Also the row's positional index in the snapshot.
pub type RowId = u32;

/// Errors raised when mutating a row from a wire value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    /// Field name is not part of the row schema.
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// Value could not be parsed as the field's type.
    #[error("invalid value {value:?} for field {field}")]
    InvalidValue {
        /// Field being updated.
        field: GridField,
        /// Raw value received.
        value: String,
    },
}

// =============================================================================
// Grid Field
// =============================================================================

/// A column of the grid schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridField {
    /// Row identifier.
    Id,
    /// Instrument name.
    Name,
    /// Last price.
    Price,
    /// Quantity held.
    Quantity,
    /// Free-text status.
    Status,
    /// Creation timestamp (opaque text).
    CreatedTimestamp,
    /// Last modification timestamp (opaque text).
    ModifiedTimestamp,
    /// Position value.
    Value,
    /// Best bid price.
    BidPrice,
    /// Best bid size.
    BidSize,
    /// Best ask price.
    AskPrice,
    /// Best ask size.
    AskSize,
}

impl GridField {
    /// Get all fields in snapshot column order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Id,
            Self::Name,
            Self::Price,
            Self::Quantity,
            Self::Status,
            Self::CreatedTimestamp,
            Self::ModifiedTimestamp,
            Self::Value,
            Self::BidPrice,
            Self::BidSize,
            Self::AskPrice,
            Self::AskSize,
        ]
    }

    /// Get the wire name of this field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Price => "price",
            Self::Quantity => "quantity",
            Self::Status => "status",
            Self::CreatedTimestamp => "createdTimestamp",
            Self::ModifiedTimestamp => "modifiedTimestamp",
            Self::Value => "value",
            Self::BidPrice => "bidPrice",
            Self::BidSize => "bidSize",
            Self::AskPrice => "askPrice",
            Self::AskSize => "askSize",
        }
    }
}

impl fmt::Display for GridField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GridField {
    type Err = RowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| RowError::UnknownField(s.to_string()))
    }
}

// =============================================================================
// Grid Row
// =============================================================================

/// One row of the streamed grid.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GridRow {
    /// Row identifier.
    pub id: RowId,
    /// Instrument name.
    pub name: String,
    /// Last price.
    pub price: f64,
    /// Quantity held.
    pub quantity: i64,
    /// Free-text status.
    pub status: String,
    /// Creation timestamp.
    pub created_timestamp: String,
    /// Last modification timestamp.
    pub modified_timestamp: String,
    /// Position value.
    pub value: f64,
    /// Best bid price.
    pub bid_price: f64,
    /// Best bid size.
    pub bid_size: i64,
    /// Best ask price.
    pub ask_price: f64,
    /// Best ask size.
    pub ask_size: i64,
}

impl GridRow {
    /// Set a field by wire name from its string representation.
    ///
    /// The row is left untouched when the name is unknown or the value does
    /// not parse.
    ///
    /// # Errors
    ///
    /// Returns `RowError::UnknownField` for names outside the schema and
    /// `RowError::InvalidValue` for malformed numeric values.
    pub fn update_field(&mut self, name: &str, value: &str) -> Result<GridField, RowError> {
        let field: GridField = name.parse()?;
        self.set(field, value)?;
        Ok(field)
    }

    /// Set a typed field from its string representation.
    ///
    /// # Errors
    ///
    /// Returns `RowError::InvalidValue` if the value does not parse.
    pub fn set(&mut self, field: GridField, value: &str) -> Result<(), RowError> {
        match field {
            GridField::Id => self.id = parse(field, value)?,
            GridField::Name => self.name = value.to_string(),
            GridField::Price => self.price = parse(field, value)?,
            GridField::Quantity => self.quantity = parse(field, value)?,
            GridField::Status => self.status = value.to_string(),
            GridField::CreatedTimestamp => self.created_timestamp = value.to_string(),
            GridField::ModifiedTimestamp => self.modified_timestamp = value.to_string(),
            GridField::Value => self.value = parse(field, value)?,
            GridField::BidPrice => self.bid_price = parse(field, value)?,
            GridField::BidSize => self.bid_size = parse(field, value)?,
            GridField::AskPrice => self.ask_price = parse(field, value)?,
            GridField::AskSize => self.ask_size = parse(field, value)?,
        }
        Ok(())
    }
}

impl fmt::Display for GridRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GridRow[id={}, name={}, price={:.2}, quantity={}, status={}, value={:.2}]",
            self.id, self.name, self.price, self.quantity, self.status, self.value
        )
    }
}

fn parse<T: FromStr>(field: GridField, value: &str) -> Result<T, RowError> {
    value.trim().parse().map_err(|_| RowError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("id", "7" ; "id")]
    #[test_case("name", "ACME" ; "name")]
    #[test_case("price", "10.5" ; "price")]
    #[test_case("quantity", "42" ; "quantity")]
    #[test_case("status", "ACTIVE" ; "status")]
    #[test_case("createdTimestamp", "2024-01-01 09:30:00" ; "created timestamp")]
    #[test_case("modifiedTimestamp", "2024-01-01 09:31:00" ; "modified timestamp")]
    #[test_case("value", "441.0" ; "value")]
    #[test_case("bidPrice", "10.4" ; "bid price")]
    #[test_case("bidSize", "300" ; "bid size")]
    #[test_case("askPrice", "10.6" ; "ask price")]
    #[test_case("askSize", "200" ; "ask size")]
    fn update_field_accepts_schema_names(name: &str, value: &str) {
        let mut row = GridRow::default();
        let field = row.update_field(name, value).unwrap();
        assert_eq!(field.as_str(), name);
        assert_ne!(row, GridRow::default());
    }

    #[test]
    fn update_field_sets_typed_values() {
        let mut row = GridRow::default();
        row.update_field("price", "11.25").unwrap();
        row.update_field("askSize", "15").unwrap();
        row.update_field("name", "A|B").unwrap();

        assert_eq!(row.price, 11.25);
        assert_eq!(row.ask_size, 15);
        assert_eq!(row.name, "A|B");
    }

    #[test]
    fn update_field_rejects_unknown_name() {
        let mut row = GridRow::default();
        let err = row.update_field("qty", "5").unwrap_err();
        assert_eq!(err, RowError::UnknownField("qty".to_string()));
        assert_eq!(row, GridRow::default());
    }

    #[test]
    fn update_field_rejects_malformed_number() {
        let mut row = GridRow {
            price: 3.0,
            ..GridRow::default()
        };
        let err = row.update_field("price", "abc").unwrap_err();
        assert!(matches!(
            err,
            RowError::InvalidValue {
                field: GridField::Price,
                ..
            }
        ));
        assert_eq!(row.price, 3.0);
    }

    #[test]
    fn field_names_round_trip() {
        for field in GridField::all() {
            assert_eq!(field.as_str().parse::<GridField>().unwrap(), *field);
        }
        assert_eq!(GridField::all().len(), 12);
    }

    #[test]
    fn display_is_compact() {
        let row = GridRow {
            id: 3,
            name: "ACME".to_string(),
            price: 1.5,
            ..GridRow::default()
        };
        assert_eq!(
            row.to_string(),
            "GridRow[id=3, name=ACME, price=1.50, quantity=0, status=, value=0.00]"
        );
    }
}

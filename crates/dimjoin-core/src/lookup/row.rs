//! Positional stream rows and their schema.

use serde::{Deserialize, Serialize};

use crate::lookup::value::ScalarValue;

/// Logical type of a stream field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Boolean
    Bool,
    /// 64-bit signed integer
    Int64,
    /// 64-bit float
    Float64,
    /// UTF-8 string
    Utf8,
    /// Raw binary data
    Binary,
    /// Plain timestamp
    Timestamp,
    /// Event-time attribute of the stream
    EventTime,
    /// Processing-time attribute of the stream
    ProcessingTime,
}

impl FieldType {
    /// Whether this type only marks event-time or processing-time semantics.
    #[must_use]
    pub const fn is_time_indicator(self) -> bool {
        matches!(self, Self::EventTime | Self::ProcessingTime)
    }

    /// The type written to enriched output rows.
    ///
    /// Time attributes degrade to [`FieldType::Timestamp`].
    #[must_use]
    pub const fn output_type(self) -> Self {
        if self.is_time_indicator() {
            Self::Timestamp
        } else {
            self
        }
    }
}

/// A named, typed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Logical type.
    pub field_type: FieldType,
}

impl Field {
    /// Creates a field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Ordered field layout of a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSchema {
    fields: Vec<Field>,
}

impl RowSchema {
    /// Creates a schema from its fields.
    #[must_use]
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// All fields, in position order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Field at `index`.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// Position of the field called `name`.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A positional row of scalar values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row {
    values: Vec<ScalarValue>,
}

impl Row {
    /// Creates a row from its values.
    #[must_use]
    pub fn new(values: Vec<ScalarValue>) -> Self {
        Self { values }
    }

    /// A row of `arity` nulls.
    #[must_use]
    pub fn nulls(arity: usize) -> Self {
        Self {
            values: vec![ScalarValue::Null; arity],
        }
    }

    /// Value at `index`, or `None` if out of range.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ScalarValue> {
        self.values.get(index)
    }

    /// Overwrites the value at `index`. Out-of-range writes are ignored.
    pub fn set(&mut self, index: usize, value: ScalarValue) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    /// All values.
    #[must_use]
    pub fn values(&self) -> &[ScalarValue] {
        &self.values
    }

    /// Number of values.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.values.len()
    }

    /// Consumes the row, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<ScalarValue> {
        self.values
    }
}

impl From<Vec<ScalarValue>> for Row {
    fn from(values: Vec<ScalarValue>) -> Self {
        Self::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_indicator_output_type() {
        assert!(FieldType::EventTime.is_time_indicator());
        assert!(FieldType::ProcessingTime.is_time_indicator());
        assert!(!FieldType::Timestamp.is_time_indicator());
        assert_eq!(FieldType::ProcessingTime.output_type(), FieldType::Timestamp);
        assert_eq!(FieldType::Utf8.output_type(), FieldType::Utf8);
    }

    #[test]
    fn test_schema_index_of() {
        let schema = RowSchema::new(vec![
            Field::new("order_id", FieldType::Int64),
            Field::new("customer_id", FieldType::Utf8),
        ]);
        assert_eq!(schema.index_of("customer_id"), Some(1));
        assert_eq!(schema.index_of("missing"), None);
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn test_row_set_out_of_range_is_ignored() {
        let mut row = Row::nulls(2);
        row.set(1, ScalarValue::Int64(3));
        row.set(5, ScalarValue::Int64(9));
        assert_eq!(row.values(), &[ScalarValue::Null, ScalarValue::Int64(3)]);
    }
}

//! Lookup key construction.
//!
//! An [`EqualityBinding`] lists which stream fields feed the join
//! predicate and which side-table field each one is compared with. A
//! [`RowKeyBuilder`] turns the bound values of one stream row into the
//! string key used against the snapshot, either for an exact match or as
//! a prefix.
//!
//! ## Key layout
//!
//! The default builder concatenates the values in binding order, with an
//! optional separator between them. Side tables whose row identifiers are
//! composed differently can supply a rowkey expression instead:
//!
//! ```text
//! user_id + '_' + region
//! ```
//!
//! Every field referenced by an expression must be part of the binding.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use crate::lookup::value::ScalarValue;

/// Errors raised while building a lookup key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// A field required by the key is absent from the input values.
    #[error("equality field missing: {0}")]
    MissingField(String),

    /// A field required by the key is present but null.
    #[error("equality field is null: {0}")]
    NullField(String),

    /// A rowkey expression references a field outside the equality binding.
    #[error("rowkey expression references unbound field: {0}")]
    UnknownField(String),

    /// A rowkey expression could not be parsed.
    #[error("invalid rowkey expression: {0}")]
    InvalidExpression(String),
}

/// One equality condition: a stream field compared with a side-table field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EqualityField {
    /// Position of the field in the stream row.
    pub stream_index: usize,
    /// Side-table field name it is compared with.
    pub side_field: String,
}

/// Ordered equality conditions of a lookup join.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EqualityBinding {
    fields: Vec<EqualityField>,
}

impl EqualityBinding {
    /// Builds a binding from `(stream index, side field)` pairs.
    pub fn new<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (usize, S)>,
        S: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(stream_index, side_field)| EqualityField {
                    stream_index,
                    side_field: side_field.into(),
                })
                .collect(),
        }
    }

    /// Conditions in key order.
    #[must_use]
    pub fn fields(&self) -> &[EqualityField] {
        &self.fields
    }

    /// Whether `side_field` takes part in the binding.
    #[must_use]
    pub fn contains(&self, side_field: &str) -> bool {
        self.fields.iter().any(|f| f.side_field == side_field)
    }

    /// Number of conditions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the binding has no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Source of named values for [`RowKeyBuilder::build_key`].
pub trait KeyValues {
    /// Value bound to `field`, if any.
    fn value(&self, field: &str) -> Option<&ScalarValue>;
}

impl<S: BuildHasher> KeyValues for HashMap<String, ScalarValue, S> {
    fn value(&self, field: &str) -> Option<&ScalarValue> {
        self.get(field)
    }
}

impl KeyValues for BTreeMap<String, ScalarValue> {
    fn value(&self, field: &str) -> Option<&ScalarValue> {
        self.get(field)
    }
}

impl KeyValues for [(&str, &ScalarValue)] {
    fn value(&self, field: &str) -> Option<&ScalarValue> {
        self.iter().find(|(name, _)| *name == field).map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum KeyPart {
    Field(String),
    Literal(String),
}

/// Derives lookup keys from equality values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowKeyBuilder {
    parts: Vec<KeyPart>,
}

impl RowKeyBuilder {
    /// Concatenates the bound fields in binding order.
    #[must_use]
    pub fn from_binding(binding: &EqualityBinding) -> Self {
        Self::with_separator(binding, "")
    }

    /// Concatenates the bound fields in binding order, `separator` between
    /// consecutive values.
    #[must_use]
    pub fn with_separator(binding: &EqualityBinding, separator: &str) -> Self {
        let mut parts = Vec::with_capacity(binding.len() * 2);
        for (i, field) in binding.fields().iter().enumerate() {
            if i > 0 && !separator.is_empty() {
                parts.push(KeyPart::Literal(separator.to_string()));
            }
            parts.push(KeyPart::Field(field.side_field.clone()));
        }
        Self { parts }
    }

    /// Parses a rowkey expression such as `a + '_' + b`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidExpression`] for empty terms or an
    /// unterminated literal, and [`KeyError::UnknownField`] when a field is
    /// not part of `binding`.
    pub fn parse(expr: &str, binding: &EqualityBinding) -> Result<Self, KeyError> {
        let mut parts = Vec::new();
        for term in split_terms(expr)? {
            let term = term.trim();
            if term.is_empty() {
                return Err(KeyError::InvalidExpression(format!("empty term in '{expr}'")));
            }
            if let Some(rest) = term.strip_prefix('\'') {
                let literal = rest
                    .strip_suffix('\'')
                    .ok_or_else(|| KeyError::InvalidExpression(format!("bad literal {term}")))?;
                parts.push(KeyPart::Literal(literal.to_string()));
            } else if binding.contains(term) {
                parts.push(KeyPart::Field(term.to_string()));
            } else {
                return Err(KeyError::UnknownField(term.to_string()));
            }
        }
        Ok(Self { parts })
    }

    /// Side-table fields the key reads, in key order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            KeyPart::Field(name) => Some(name.as_str()),
            KeyPart::Literal(_) => None,
        })
    }

    /// Builds the key for one set of equality values.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::MissingField`] if a required field is absent and
    /// [`KeyError::NullField`] if it is null.
    pub fn build_key<V: KeyValues + ?Sized>(&self, values: &V) -> Result<String, KeyError> {
        let mut key = String::new();
        for part in &self.parts {
            match part {
                KeyPart::Literal(lit) => key.push_str(lit),
                KeyPart::Field(name) => {
                    let value = values
                        .value(name)
                        .ok_or_else(|| KeyError::MissingField(name.clone()))?;
                    if value.is_null() {
                        return Err(KeyError::NullField(name.clone()));
                    }
                    value.write_key(&mut key);
                }
            }
        }
        Ok(key)
    }
}

/// Splits on `+` outside single-quoted literals.
fn split_terms(expr: &str) -> Result<Vec<&str>, KeyError> {
    let mut terms = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in expr.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '+' if !quoted => {
                terms.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quoted {
        return Err(KeyError::InvalidExpression(format!(
            "unterminated literal in '{expr}'"
        )));
    }
    terms.push(&expr[start..]);
    Ok(terms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> EqualityBinding {
        EqualityBinding::new([(0, "user_id"), (2, "region")])
    }

    fn values() -> HashMap<String, ScalarValue> {
        let mut m = HashMap::new();
        m.insert("user_id".to_string(), ScalarValue::Int64(42));
        m.insert("region".to_string(), ScalarValue::Utf8("eu".into()));
        m
    }

    #[test]
    fn test_concatenates_in_binding_order() {
        let builder = RowKeyBuilder::from_binding(&binding());
        assert_eq!(builder.build_key(&values()).unwrap(), "42eu");
    }

    #[test]
    fn test_separator_between_values_only() {
        let builder = RowKeyBuilder::with_separator(&binding(), ":");
        assert_eq!(builder.build_key(&values()).unwrap(), "42:eu");
    }

    #[test]
    fn test_single_field_key() {
        let binding = EqualityBinding::new([(1, "id")]);
        let builder = RowKeyBuilder::with_separator(&binding, "|");
        let v = ScalarValue::Utf8("42".into());
        let slice: &[(&str, &ScalarValue)] = &[("id", &v)];
        assert_eq!(builder.build_key(slice).unwrap(), "42");
    }

    #[test]
    fn test_missing_field_fails() {
        let builder = RowKeyBuilder::from_binding(&binding());
        let mut v = values();
        v.remove("region");
        assert_eq!(
            builder.build_key(&v),
            Err(KeyError::MissingField("region".into()))
        );
    }

    #[test]
    fn test_null_field_fails() {
        let builder = RowKeyBuilder::from_binding(&binding());
        let mut v = values();
        v.insert("user_id".into(), ScalarValue::Null);
        assert_eq!(
            builder.build_key(&v),
            Err(KeyError::NullField("user_id".into()))
        );
    }

    #[test]
    fn test_expression_with_literal() {
        let builder = RowKeyBuilder::parse("region + '_' + user_id", &binding()).unwrap();
        assert_eq!(builder.build_key(&values()).unwrap(), "eu_42");
        assert_eq!(builder.fields().collect::<Vec<_>>(), vec!["region", "user_id"]);
    }

    #[test]
    fn test_expression_literal_may_contain_plus() {
        let builder = RowKeyBuilder::parse("user_id + '+'", &binding()).unwrap();
        assert_eq!(builder.build_key(&values()).unwrap(), "42+");
    }

    #[test]
    fn test_expression_rejects_unbound_field() {
        let err = RowKeyBuilder::parse("user_id + tier", &binding()).unwrap_err();
        assert_eq!(err, KeyError::UnknownField("tier".into()));
    }

    #[test]
    fn test_expression_rejects_malformed_input() {
        assert!(matches!(
            RowKeyBuilder::parse("user_id + ", &binding()),
            Err(KeyError::InvalidExpression(_))
        ));
        assert!(matches!(
            RowKeyBuilder::parse("user_id + '_", &binding()),
            Err(KeyError::InvalidExpression(_))
        ));
    }

    #[test]
    fn test_keys_are_deterministic() {
        let builder = RowKeyBuilder::from_binding(&binding());
        let a = builder.build_key(&values()).unwrap();
        let b = builder.build_key(&values()).unwrap();
        assert_eq!(a, b);
    }
}

//! Mapping between external column identifiers and logical field names.
//!
//! Wide-column stores address a cell as `family:qualifier`; the join
//! addresses it by the logical name declared for the side table. The
//! [`AliasMap`] holds logical → external, the [`InverseAliasMap`] holds
//! external → logical and is what the snapshot builder consults for every
//! scanned cell.

use rustc_hash::FxHashMap;

use crate::lookup::config::ConfigError;

/// Builds a `family:qualifier` column identifier.
#[must_use]
pub fn qualified_column(family: &str, qualifier: &str) -> String {
    let mut id = String::with_capacity(family.len() + qualifier.len() + 1);
    id.push_str(family);
    id.push(':');
    id.push_str(qualifier);
    id
}

/// Logical field name → external column identifier.
///
/// An empty map is the identity mapping: every column identifier is used
/// as its own logical name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMap {
    by_name: FxHashMap<String, String>,
}

impl AliasMap {
    /// The identity mapping.
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Builds a map from `(logical name, column identifier)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if two logical names share one
    /// column identifier, since the inverse would be ambiguous.
    pub fn new<I, N, C>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (N, C)>,
        N: Into<String>,
        C: Into<String>,
    {
        let mut by_name = FxHashMap::default();
        let mut seen: FxHashMap<String, String> = FxHashMap::default();
        for (name, column) in pairs {
            let name = name.into();
            let column = column.into();
            if let Some(previous) = seen.insert(column.clone(), name.clone()) {
                if previous != name {
                    return Err(ConfigError::Invalid {
                        key: format!("alias.{name}"),
                        value: column,
                        reason: format!("column already aliased as '{previous}'"),
                    });
                }
            }
            if let Some(replaced) = by_name.insert(name, column.clone()) {
                if replaced != column {
                    seen.remove(&replaced);
                }
            }
        }
        Ok(Self { by_name })
    }

    /// Column identifier for a logical name.
    #[must_use]
    pub fn column_for(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(String::as_str)
    }

    /// Number of aliases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether this is the identity mapping.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Builds the external → logical direction.
    #[must_use]
    pub fn inverse(&self) -> InverseAliasMap {
        InverseAliasMap {
            by_column: self
                .by_name
                .iter()
                .map(|(name, column)| (column.clone(), name.clone()))
                .collect(),
        }
    }

    /// Iterates `(logical name, column identifier)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_name.iter().map(|(n, c)| (n.as_str(), c.as_str()))
    }
}

/// External column identifier → logical field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InverseAliasMap {
    by_column: FxHashMap<String, String>,
}

impl InverseAliasMap {
    /// Logical name for `column`.
    ///
    /// With the identity mapping the identifier itself is returned.
    /// Otherwise `None` means the column is not part of the side table.
    #[must_use]
    pub fn resolve<'a>(&'a self, column: &'a str) -> Option<&'a str> {
        if self.by_column.is_empty() {
            return Some(column);
        }
        self.by_column.get(column).map(String::as_str)
    }

    /// Whether this is the identity mapping.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.by_column.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AliasMap {
        AliasMap::new([
            ("name", qualified_column("info", "name")),
            ("city", qualified_column("addr", "city")),
        ])
        .unwrap()
    }

    #[test]
    fn test_qualified_column() {
        assert_eq!(qualified_column("cf", "q1"), "cf:q1");
    }

    #[test]
    fn test_alias_round_trip() {
        let aliases = sample();
        let inverse = aliases.inverse();
        for (name, column) in aliases.iter() {
            assert_eq!(inverse.resolve(column), Some(name));
        }
    }

    #[test]
    fn test_unmapped_column_is_dropped() {
        let inverse = sample().inverse();
        assert_eq!(inverse.resolve("info:age"), None);
    }

    #[test]
    fn test_identity_mapping() {
        let inverse = AliasMap::identity().inverse();
        assert!(inverse.is_identity());
        assert_eq!(inverse.resolve("info:age"), Some("info:age"));
    }

    #[test]
    fn test_ambiguous_inverse_rejected() {
        let err = AliasMap::new([("a", "cf:x"), ("b", "cf:x")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_repeated_identical_alias_is_accepted() {
        let aliases = AliasMap::new([("a", "cf:x"), ("a", "cf:x")]).unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases.column_for("a"), Some("cf:x"));
    }

    #[test]
    fn test_remapped_name_frees_its_column() {
        let aliases = AliasMap::new([("a", "cf:x"), ("a", "cf:y"), ("b", "cf:x")]).unwrap();
        assert_eq!(aliases.column_for("a"), Some("cf:y"));
        assert_eq!(aliases.column_for("b"), Some("cf:x"));
        assert_eq!(aliases.inverse().resolve("cf:x"), Some("b"));
    }
}

//! Canonical data model exchanged between the mapper, the adapters and the
//! routing layer.
//!
//! A client query is disjunctive normal form over equality conditions:
//! a [`Query`] is a list of OR-branches, each branch a list of AND-ed
//! [`Condition`]s. Field identifiers are [`FieldPath`]s — a single segment on
//! the canonical side, possibly several segments after the schema mapper has
//! rewritten them into a source's vocabulary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Condition operator. Only equality is supported by any of the backends;
/// everything else is kept verbatim so compilation can name it in the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Other(String),
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Eq => "=",
            Operator::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Operator {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operator {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "=" => Operator::Eq,
            _ => Operator::Other(s),
        })
    }
}

/// A field identifier: one segment for canonical names (`title`), several for
/// mapped source paths (`["245", "a"]`, `["bibo", "isbn13"]`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "FieldPathRepr", into = "FieldPathRepr")]
pub struct FieldPath(Vec<String>);

/// Wire shape: a bare string or a list of segments.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FieldPathRepr {
    Name(String),
    Path(Vec<String>),
}

impl From<FieldPathRepr> for FieldPath {
    fn from(repr: FieldPathRepr) -> Self {
        match repr {
            FieldPathRepr::Name(name) => FieldPath(vec![name]),
            FieldPathRepr::Path(segments) => FieldPath(segments),
        }
    }
}

impl From<FieldPath> for FieldPathRepr {
    fn from(path: FieldPath) -> Self {
        if path.0.len() == 1 {
            FieldPathRepr::Name(path.0.into_iter().next().unwrap())
        } else {
            FieldPathRepr::Path(path.0)
        }
    }
}

impl FieldPath {
    pub fn new(segments: Vec<String>) -> Self {
        FieldPath(segments)
    }

    /// Single-segment canonical field name.
    pub fn named(name: impl Into<String>) -> Self {
        FieldPath(vec![name.into()])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First segment, the whole name for canonical fields.
    pub fn head(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn joined(&self, sep: char) -> String {
        self.0.join(&sep.to_string())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined('.'))
    }
}

/// A single equality filter on a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub operator: Operator,
    pub field: FieldPath,
    pub value: String,
}

impl Condition {
    pub fn eq(field: FieldPath, value: impl Into<String>) -> Self {
        Condition {
            operator: Operator::Eq,
            field,
            value: value.into(),
        }
    }
}

/// Conditions combined with AND semantics, one OR-branch of a [`Query`].
pub type AndGroup = Vec<Condition>;

/// A canonical query: OR over AND-groups of equality conditions.
/// An empty query means "unconditional, within the result limit".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query {
    pub branches: Vec<AndGroup>,
}

impl Query {
    pub fn new(branches: Vec<AndGroup>) -> Self {
        Query { branches }
    }

    pub fn unconditional() -> Self {
        Query::default()
    }

    /// The one-condition query used by id resolution.
    pub fn equals(field: FieldPath, value: impl Into<String>) -> Self {
        Query {
            branches: vec![vec![Condition::eq(field, value)]],
        }
    }

    pub fn is_unconditional(&self) -> bool {
        self.branches.is_empty()
    }
}

/// A record as an adapter hands it over: id and type assigned, `fields`
/// still carrying the full native substructure for the path walker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub fields: serde_json::Value,
}

/// The canonical unit exchanged with the rest of the system. Field values
/// are always lists, because path extraction may fan out across repeated
/// elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    #[serde(rename = "type")]
    pub instance_type: String,
    pub fields: BTreeMap<String, Vec<serde_json::Value>>,
}

/// Declarative correspondence between one canonical type and one source type.
/// Loaded once at adapter construction, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub source_type: String,
    pub mapped_type: String,
    pub field_mapping: BTreeMap<String, FieldPath>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_deserializes_unknown_tokens() {
        let eq: Operator = serde_json::from_str(r#""=""#).unwrap();
        assert_eq!(eq, Operator::Eq);

        let gt: Operator = serde_json::from_str(r#"">""#).unwrap();
        assert_eq!(gt, Operator::Other(">".to_string()));
        assert_eq!(gt.as_str(), ">");
    }

    #[test]
    fn test_field_path_accepts_string_and_sequence() {
        let named: FieldPath = serde_json::from_str(r#""title""#).unwrap();
        assert_eq!(named, FieldPath::named("title"));

        let path: FieldPath = serde_json::from_str(r#"["245", "a"]"#).unwrap();
        assert_eq!(path.segments(), ["245", "a"]);
        assert_eq!(path.joined(':'), "245:a");
    }

    #[test]
    fn test_query_transparent_serde() {
        let query = Query::equals(FieldPath::named("title"), "Foo");
        let json = serde_json::to_string(&query).unwrap();
        // nested arrays, no wrapper object
        assert!(json.starts_with("[["));

        let back: Query = serde_json::from_str(&json).unwrap();
        assert_eq!(back, query);
    }

    #[test]
    fn test_mapping_camel_case() {
        let yaml = r#"
            sourceType: "marcRecord"
            mappedType: "book"
            fieldMapping:
              title: ["245", "a"]
              id: "001"
        "#;
        let mapping: Mapping = serde_yaml::from_str(yaml).expect("Failed to parse mapping");
        assert_eq!(mapping.source_type, "marcRecord");
        assert_eq!(mapping.mapped_type, "book");
        assert_eq!(
            mapping.field_mapping.get("title"),
            Some(&FieldPath::new(vec!["245".into(), "a".into()]))
        );
        assert_eq!(
            mapping.field_mapping.get("id"),
            Some(&FieldPath::named("001"))
        );
    }
}

//! Bidirectional schema translation between the canonical vocabulary and a
//! source's native field paths.
//!
//! Outbound (query time), canonical field names are rewritten into source
//! paths; fields without a mapping entry are dropped and logged, and an
//! AND-group emptied by drops is dropped whole — left in place it would
//! match everything and change the query's meaning.
//!
//! Inbound (ingest time), each mapped path is walked over the raw field tree
//! of a source record. Path steps project the working set; array values
//! flatten into it, so one mapped field may fan out into many leaves. A path
//! that dead-ends leaves its field absent — absent and present-but-empty are
//! different statements.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use bibfed_common::models::{Condition, FieldPath, Instance, Mapping, Query, SourceRecord};

#[derive(Debug, Clone, Default)]
pub struct SchemaMapper {
    mappings: Vec<Mapping>,
}

impl SchemaMapper {
    pub fn new(mappings: Vec<Mapping>) -> Self {
        SchemaMapper { mappings }
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    /// The mapping to use when sending a query about a canonical type to a
    /// source. `None` is a caller error, reported as `MappingNotFound` —
    /// never treated as an identity mapping.
    pub fn find_mapping_to(&self, mapped_type: &str) -> Option<&Mapping> {
        self.mappings.iter().find(|m| m.mapped_type == mapped_type)
    }

    /// The mapping to use when ingesting records of a source-reported type.
    pub fn find_mapping_from(&self, source_type: &str) -> Option<&Mapping> {
        self.mappings.iter().find(|m| m.source_type == source_type)
    }

    /// All canonical types this mapper can translate to a source.
    pub fn mapped_types(&self) -> Vec<String> {
        self.mappings.iter().map(|m| m.mapped_type.clone()).collect()
    }

    /// Rewrite every condition's canonical field name into the mapped source
    /// path. Unmapped fields are dropped (logged, not fatal); a group left
    /// empty by drops is removed from the result.
    pub fn rewrite_conditions_for_source(&self, mapping: &Mapping, query: &Query) -> Query {
        let mut branches = Vec::new();
        for group in &query.branches {
            let mut rewritten = Vec::new();
            for condition in group {
                let name = condition.field.head().unwrap_or_default();
                match mapping.field_mapping.get(name) {
                    Some(path) => rewritten.push(Condition {
                        operator: condition.operator.clone(),
                        field: path.clone(),
                        value: condition.value.clone(),
                    }),
                    None => {
                        warn!(field = %condition.field, source_type = %mapping.source_type, "Unknown field");
                    }
                }
            }
            if rewritten.is_empty() {
                if !group.is_empty() {
                    warn!(
                        source_type = %mapping.source_type,
                        "dropping AND-group left empty after unmapped fields were removed"
                    );
                }
            } else {
                branches.push(rewritten);
            }
        }
        Query::new(branches)
    }

    /// Rename a projection list into source paths, with the same
    /// drop-unknown policy as condition rewriting.
    pub fn rename_fields_for_source(&self, mapping: &Mapping, fields: &[String]) -> Vec<FieldPath> {
        fields
            .iter()
            .filter_map(|name| match mapping.field_mapping.get(name) {
                Some(path) => Some(path.clone()),
                None => {
                    warn!(field = %name, source_type = %mapping.source_type, "Unknown field");
                    None
                }
            })
            .collect()
    }

    /// Map raw source records into canonical instances by walking every
    /// mapped path over each record's field tree.
    pub fn map_instances_from_source(
        &self,
        mapping: &Mapping,
        records: &[SourceRecord],
    ) -> Vec<Instance> {
        records
            .iter()
            .map(|record| {
                let mut fields = BTreeMap::new();
                for (canonical_name, path) in &mapping.field_mapping {
                    let leaves = extract_path(&record.fields, path);
                    if !leaves.is_empty() {
                        fields.insert(canonical_name.clone(), leaves);
                    }
                }
                Instance {
                    id: record.id.clone(),
                    instance_type: mapping.mapped_type.clone(),
                    fields,
                }
            })
            .collect()
    }
}

/// Walk `path` over `root`: project the working set through each segment,
/// flattening array values so the set only ever holds scalars and objects.
/// An empty intermediate set short-circuits to "absent".
fn extract_path(root: &Value, path: &FieldPath) -> Vec<Value> {
    let mut current: Vec<&Value> = vec![root];
    for segment in path.segments() {
        let mut next: Vec<&Value> = Vec::new();
        for value in &current {
            if let Some(child) = value.get(segment) {
                flatten_into(child, &mut next);
            }
        }
        if next.is_empty() {
            return Vec::new();
        }
        current = next;
    }
    current.into_iter().cloned().collect()
}

fn flatten_into<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        other => out.push(other),
    }
}

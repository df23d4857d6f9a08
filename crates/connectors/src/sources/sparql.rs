//! SPARQL triple store adapter.
//!
//! Each equality condition contributes one `predicate 'literal';` line to a
//! single `SELECT *` document, posted as the `query` form field with an
//! `Accept: application/sparql-results+json` header. A disjunction over
//! multiple AND-groups is not representable in one document for this
//! endpoint, so multi-branch queries are rejected at compile time instead of
//! being silently truncated to their first branch.

use serde::Deserialize;
use tracing::debug;

use bibfed_common::config::SourceConfig;
use bibfed_common::models::{FieldPath, Operator, Query, SourceRecord};
use bibfed_error::{BibfedError, ErrorCode, ErrorContext, Result};

use crate::dispatch::FanOut;
use crate::sources::{
    ensure_endpoint, ensure_limit, parse_adapter_config, unsupported_object_type,
    AdapterProvider, QueryJob, SourceAdapter,
};

/// The object type this backend serves.
const OBJECT_TYPE: &str = "book";

const PREFIXES: &str = "PREFIX bibo: <http://purl.org/ontology/bibo/>\r\n\
PREFIX blt: <http://www.bl.uk/schemas/bibliographic/blterms#>\r\n\
PREFIX dct: <http://purl.org/dc/terms/>\r\n";

fn default_id_variable() -> String {
    // the variable the fixed query tail always binds
    "isbn".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SparqlSourceConfig {
    pub endpoint: String,
    pub limit: usize,
    #[serde(default = "default_id_variable")]
    pub id_variable: String,
}

/// One `predicate 'literal';` line of the WHERE block.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TriplePattern {
    predicate: String,
    object: String,
}

/// The complete query document. Literals are escaped during serialization,
/// never earlier.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectQuery {
    patterns: Vec<TriplePattern>,
    limit: usize,
}

impl SelectQuery {
    fn serialize(&self) -> String {
        let mut filter = String::new();
        for pattern in &self.patterns {
            filter.push_str(&format!(
                "{} '{}';\r\n",
                pattern.predicate,
                escape_literal(&pattern.object)
            ));
        }
        format!(
            "{}SELECT * WHERE {{\r\n?book {}blt:bnb ?bnb;\r\ndct:title ?title;\r\nbibo:isbn13 ?isbn;\r\n}} LIMIT {}",
            PREFIXES, filter, self.limit
        )
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Debug)]
pub struct SparqlAdapter {
    config: SparqlSourceConfig,
    client: reqwest::Client,
}

impl SparqlAdapter {
    pub fn new(config: SparqlSourceConfig) -> Result<Self> {
        ensure_endpoint(&config.endpoint)?;
        ensure_limit(config.limit)?;
        Ok(SparqlAdapter {
            config,
            client: reqwest::Client::new(),
        })
    }

    fn compile(&self, query: &Query) -> Result<SelectQuery> {
        if query.branches.len() > 1 {
            return Err(BibfedError::new(
                ErrorCode::DisjunctionUnsupported,
                "OR over multiple condition groups is not representable in a single SPARQL query",
            )
            .with_hint("issue one query per OR-branch"));
        }

        let group = query.branches.first().cloned().unwrap_or_default();
        let patterns = group
            .iter()
            .map(|condition| {
                if condition.operator != Operator::Eq {
                    return Err(BibfedError::new(
                        ErrorCode::UnsupportedOperator,
                        format!("unknown operator: {}", condition.operator),
                    ));
                }
                let segments = condition.field.segments();
                if segments.len() != 2 {
                    return Err(BibfedError::new(
                        ErrorCode::UnknownField,
                        format!("field is not a prefix:local pair: {}", condition.field),
                    )
                    .with_context(ErrorContext::UnknownField {
                        field: condition.field.to_string(),
                        source_type: "sparql".to_string(),
                        allowed_fields: Vec::new(),
                    }));
                }
                Ok(TriplePattern {
                    predicate: format!("{}:{}", segments[0], segments[1]),
                    object: condition.value.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SelectQuery {
            patterns,
            limit: self.config.limit,
        })
    }
}

async fn fetch_bindings(
    client: reqwest::Client,
    endpoint: String,
    query: String,
    id_variable: String,
) -> Result<Vec<SourceRecord>> {
    debug!(%endpoint, "dispatching sparql query");
    let response = client
        .post(&endpoint)
        .header("Accept", "application/sparql-results+json")
        .form(&[("query", query.as_str())])
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(BibfedError::new(
            ErrorCode::UnexpectedStatus,
            format!("unexpected http status code: {}", status.as_u16()),
        )
        .with_context(ErrorContext::Transport {
            endpoint,
            status: Some(status.as_u16()),
        }));
    }
    // Fully buffer the body before parsing starts.
    let body = response.text().await?;
    parse_bindings(&body, &id_variable)
}

/// Reshape `results.bindings` into source records. Each binding keeps its
/// `{type, value, ...}` term objects untouched for the mapper's path walker.
fn parse_bindings(body: &str, id_variable: &str) -> Result<Vec<SourceRecord>> {
    let parsed: serde_json::Value = serde_json::from_str(body)?;
    let bindings = parsed
        .get("results")
        .and_then(|r| r.get("bindings"))
        .and_then(|b| b.as_array())
        .ok_or_else(|| {
            BibfedError::new(ErrorCode::MalformedResponse, "invalid SPARQL results format")
                .with_context(ErrorContext::Parse {
                    source_type: "sparql".to_string(),
                    detail: None,
                })
        })?;

    bindings
        .iter()
        .map(|binding| {
            let id = binding
                .get(id_variable)
                .and_then(|cell| cell.get("value"))
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    BibfedError::new(
                        ErrorCode::MalformedResponse,
                        format!("binding without a '{}' variable", id_variable),
                    )
                    .with_context(ErrorContext::Parse {
                        source_type: "sparql".to_string(),
                        detail: None,
                    })
                })?;
            Ok(SourceRecord {
                id: id.to_string(),
                record_type: OBJECT_TYPE.to_string(),
                fields: binding.clone(),
            })
        })
        .collect()
}

impl SourceAdapter for SparqlAdapter {
    fn source_type(&self) -> &'static str {
        "sparql"
    }

    fn object_type(&self) -> &str {
        OBJECT_TYPE
    }

    fn id_field(&self) -> FieldPath {
        FieldPath::new(vec!["bibo".to_string(), "isbn13".to_string()])
    }

    fn query(&self, object_type: &str, query: &Query, _fields: &[FieldPath]) -> Result<QueryJob> {
        if object_type != OBJECT_TYPE {
            return Err(unsupported_object_type(object_type, OBJECT_TYPE));
        }
        let compiled = self.compile(query)?;
        // one query document, one dispatched request
        Ok(QueryJob::new(FanOut::spawn(vec![fetch_bindings(
            self.client.clone(),
            self.config.endpoint.clone(),
            compiled.serialize(),
            self.config.id_variable.clone(),
        )])))
    }
}

pub struct SparqlAdapterProvider;

impl AdapterProvider for SparqlAdapterProvider {
    fn type_name(&self) -> &'static str {
        "sparql"
    }

    fn build(&self, source: &SourceConfig) -> Result<Box<dyn SourceAdapter>> {
        let config: SparqlSourceConfig = parse_adapter_config(source)?;
        Ok(Box::new(SparqlAdapter::new(config)?))
    }
}

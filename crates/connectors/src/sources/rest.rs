//! REST search API adapter.
//!
//! The backend exposes a flat search surface: `filter=field:value` query
//! parameters plus `start`/`limit` pagination. Each AND-group of the
//! disjunctive query compiles to one query string; the OR fans out as one
//! HTTP request per group.

use serde::Deserialize;
use tracing::debug;

use bibfed_common::config::{SourceConfig, DEFAULT_START};
use bibfed_common::models::{FieldPath, Operator, Query, SourceRecord};
use bibfed_error::{closest_match, BibfedError, ErrorCode, ErrorContext, Result};

use crate::dispatch::FanOut;
use crate::sources::{
    ensure_endpoint, ensure_limit, parse_adapter_config, unsupported_object_type,
    AdapterProvider, QueryJob, SourceAdapter,
};

/// The object type this backend serves.
const OBJECT_TYPE: &str = "book";

/// Fields the search API accepts in `filter=` parameters. Anything else is a
/// hard compilation error, never a silent drop.
const SEARCH_FIELDS: &[&str] = &[
    "keyword",
    "id",
    "title",
    "title_keyword",
    "creator",
    "creator_keyword",
    "note",
    "note_keyword",
    "lcsh",
    "lcsh_keyword",
    "publisher",
    "pub_date",
    "pub_location",
    "format",
    "Language",
    "pages",
    "height",
    "id_inst",
    "id_isbn",
    "id_lccn",
    "call_num",
    "url",
    "holding_libs",
];

#[derive(Debug, Deserialize, Clone)]
pub struct RestSourceConfig {
    pub endpoint: String,
    pub limit: usize,
}

/// One compiled sub-query. Serialized to the wire only at the boundary, so
/// every value passes through the URL encoder exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FilterQuery {
    filters: Vec<(String, String)>,
    start: usize,
    limit: usize,
}

impl FilterQuery {
    fn to_query_string(&self) -> String {
        let mut parameters: Vec<String> = self
            .filters
            .iter()
            .map(|(field, value)| {
                format!(
                    "filter={}",
                    urlencoding::encode(&format!("{}:{}", field, value))
                )
            })
            .collect();
        parameters.push(format!("start={}", self.start));
        parameters.push(format!("limit={}", self.limit));
        parameters.join("&")
    }
}

#[derive(Debug)]
pub struct RestAdapter {
    config: RestSourceConfig,
    client: reqwest::Client,
}

impl RestAdapter {
    pub fn new(config: RestSourceConfig) -> Result<Self> {
        ensure_endpoint(&config.endpoint)?;
        ensure_limit(config.limit)?;
        Ok(RestAdapter {
            config,
            client: reqwest::Client::new(),
        })
    }

    /// One `FilterQuery` per OR-branch; an empty query compiles to a single
    /// unconditional sub-query.
    fn compile(&self, query: &Query) -> Result<Vec<FilterQuery>> {
        let unconditional = vec![Vec::new()];
        let branches = if query.branches.is_empty() {
            &unconditional
        } else {
            &query.branches
        };

        branches
            .iter()
            .map(|group| {
                let mut filters = Vec::new();
                for condition in group {
                    if condition.operator != Operator::Eq {
                        return Err(BibfedError::new(
                            ErrorCode::UnsupportedOperator,
                            format!("unknown operator: {}", condition.operator),
                        ));
                    }
                    let field = condition.field.head().unwrap_or_default();
                    if !SEARCH_FIELDS.contains(&field) {
                        return Err(unknown_field(field));
                    }
                    filters.push((field.to_string(), condition.value.clone()));
                }
                Ok(FilterQuery {
                    filters,
                    start: DEFAULT_START,
                    limit: self.config.limit,
                })
            })
            .collect()
    }
}

fn unknown_field(field: &str) -> BibfedError {
    let allowed: Vec<String> = SEARCH_FIELDS.iter().map(|f| f.to_string()).collect();
    let mut err = BibfedError::new(
        ErrorCode::UnknownField,
        format!("unsupported query condition on field: {}", field),
    )
    .with_context(ErrorContext::UnknownField {
        field: field.to_string(),
        source_type: "rest".to_string(),
        allowed_fields: allowed.clone(),
    });
    if let Some(closest) = closest_match(field, &allowed) {
        err = err.with_hint(format!("Did you mean '{}'?", closest));
    }
    err
}

async fn fetch_documents(client: reqwest::Client, url: String) -> Result<Vec<SourceRecord>> {
    debug!(%url, "dispatching rest sub-query");
    let response = client.get(&url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(BibfedError::new(
            ErrorCode::UnexpectedStatus,
            format!("unexpected http status code: {}", status.as_u16()),
        )
        .with_context(ErrorContext::Transport {
            endpoint: url,
            status: Some(status.as_u16()),
        }));
    }
    // Fully buffer the body before parsing starts.
    let body = response.text().await?;
    parse_documents(&body)
}

fn parse_documents(body: &str) -> Result<Vec<SourceRecord>> {
    let parsed: serde_json::Value = serde_json::from_str(body)?;
    let documents = parsed
        .get("docs")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            BibfedError::new(
                ErrorCode::MalformedResponse,
                "response carries no 'docs' collection",
            )
            .with_context(ErrorContext::Parse {
                source_type: "rest".to_string(),
                detail: None,
            })
        })?;

    documents
        .iter()
        .map(|document| {
            let id = match document.get("id") {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => {
                    return Err(BibfedError::new(
                        ErrorCode::MalformedResponse,
                        "document without an 'id' field",
                    )
                    .with_context(ErrorContext::Parse {
                        source_type: "rest".to_string(),
                        detail: None,
                    }))
                }
            };
            Ok(SourceRecord {
                id,
                record_type: OBJECT_TYPE.to_string(),
                fields: document.clone(),
            })
        })
        .collect()
}

impl SourceAdapter for RestAdapter {
    fn source_type(&self) -> &'static str {
        "rest"
    }

    fn object_type(&self) -> &str {
        OBJECT_TYPE
    }

    fn id_field(&self) -> FieldPath {
        FieldPath::named("id")
    }

    fn query(&self, object_type: &str, query: &Query, _fields: &[FieldPath]) -> Result<QueryJob> {
        if object_type != OBJECT_TYPE {
            return Err(unsupported_object_type(object_type, OBJECT_TYPE));
        }
        let compiled = self.compile(query)?;
        let subqueries: Vec<_> = compiled
            .into_iter()
            .map(|subquery| {
                let url = format!("{}?{}", self.config.endpoint, subquery.to_query_string());
                fetch_documents(self.client.clone(), url)
            })
            .collect();
        Ok(QueryJob::new(FanOut::spawn(subqueries)))
    }
}

pub struct RestAdapterProvider;

impl AdapterProvider for RestAdapterProvider {
    fn type_name(&self) -> &'static str {
        "rest"
    }

    fn build(&self, source: &SourceConfig) -> Result<Box<dyn SourceAdapter>> {
        let config: RestSourceConfig = parse_adapter_config(source)?;
        Ok(Box::new(RestAdapter::new(config)?))
    }
}

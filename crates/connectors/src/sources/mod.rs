//! Source adapter abstractions and implementations.
//!
//! Every remote backend implements the [`SourceAdapter`] trait. The adapter
//! owns query compilation and response reshaping for its protocol; schema
//! translation between canonical and source vocabularies happens outside, in
//! the mapper.
//!
//! # Supported Sources
//!
//! | Source Type | Implementation | Description |
//! |-------------|----------------|-------------|
//! | `rest`      | `RestAdapter` | Search API queried with `filter=field:value` parameters |
//! | `existdb`   | `ExistDbAdapter` | eXist-db XQuery endpoint over MARC21 record collections |
//! | `sparql`    | `SparqlAdapter` | SPARQL triple store speaking `sparql-results+json` |
//!
//! # Adding a New Source
//!
//! 1. Create an adapter struct implementing `SourceAdapter`.
//! 2. Create a provider implementing `AdapterProvider` to build it from a
//!    `SourceConfig` entry.
//! 3. Register the provider in `default_registry` in this module.

use std::collections::HashMap;

use bibfed_common::config::SourceConfig;
use bibfed_common::models::{FieldPath, Query, SourceRecord};
use bibfed_error::{BibfedError, ErrorCode, ErrorContext, Result};

use crate::dispatch::{CancelHandle, FanOut};

pub mod existdb;
pub mod rest;
pub mod sparql;

/// The contract every backend adapter fulfils.
///
/// `query` validates and compiles synchronously — configuration, object-type
/// and compilation errors are returned before any network I/O happens — and
/// hands back a [`QueryJob`] driving the dispatched sub-queries. Queries
/// passed in here must already be in the source's field vocabulary.
pub trait SourceAdapter: Send + Sync + std::fmt::Debug {
    /// Registry key for this protocol (e.g., "rest", "existdb", "sparql")
    fn source_type(&self) -> &'static str;

    /// The single native object type this adapter serves
    fn object_type(&self) -> &str;

    /// Native path of the record identifier, used by [`Self::resolve_id`]
    fn id_field(&self) -> FieldPath;

    /// Compile and dispatch a disjunctive query. Must be called inside a
    /// tokio runtime.
    fn query(&self, object_type: &str, query: &Query, fields: &[FieldPath]) -> Result<QueryJob>;

    /// Resolve a single record by its native identifier — a convenience
    /// specialization of [`Self::query`], not a separate code path.
    fn resolve_id(&self, id: &str, fields: &[FieldPath]) -> Result<QueryJob> {
        let object_type = self.object_type().to_owned();
        self.query(&object_type, &Query::equals(self.id_field(), id), fields)
    }

    /// Release adapter-held resources. All three shipped adapters are
    /// stateless, but the lifecycle stays symmetric for future ones.
    fn destroy(&self) {}
}

/// An in-flight dispatch: join it for the aggregate records, or cancel it
/// through the (idempotent, clone-able) handle.
#[derive(Debug)]
pub struct QueryJob {
    fan_out: FanOut<SourceRecord>,
}

impl QueryJob {
    pub(crate) fn new(fan_out: FanOut<SourceRecord>) -> Self {
        QueryJob { fan_out }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.fan_out.cancel_handle()
    }

    /// Await every sub-query. Records concatenate in OR-branch order; the
    /// first branch failure cancels the rest and is the one error returned.
    pub async fn join(self) -> Result<Vec<SourceRecord>> {
        self.fan_out.join().await
    }
}

/// Builds one adapter kind from its `{ name, type, ... }` source entry.
pub trait AdapterProvider: Send + Sync {
    /// Returns the source type this provider handles (e.g., "rest")
    fn type_name(&self) -> &'static str;

    /// Construct an adapter from the given configuration. Invalid or missing
    /// configuration fails construction permanently.
    fn build(&self, source: &SourceConfig) -> Result<Box<dyn SourceAdapter>>;
}

#[derive(Default)]
pub struct AdapterRegistry {
    providers: HashMap<&'static str, Box<dyn AdapterProvider>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(&mut self, provider: Box<dyn AdapterProvider>) {
        self.providers.insert(provider.type_name(), provider);
    }

    pub fn build(&self, source: &SourceConfig) -> Result<Box<dyn SourceAdapter>> {
        match self.providers.get(source.source_type.as_str()) {
            Some(provider) => provider.build(source),
            None => {
                let mut known: Vec<&str> = self.providers.keys().copied().collect();
                known.sort_unstable();
                Err(BibfedError::new(
                    ErrorCode::UnknownSourceType,
                    format!("no adapter registered for source type: {}", source.source_type),
                )
                .with_hint(format!("registered types: {}", known.join(", "))))
            }
        }
    }
}

pub fn default_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register_provider(Box::new(rest::RestAdapterProvider));
    registry.register_provider(Box::new(existdb::ExistDbAdapterProvider));
    registry.register_provider(Box::new(sparql::SparqlAdapterProvider));
    registry
}

/// Deserialize the protocol-specific part of a source entry.
pub(crate) fn parse_adapter_config<T: serde::de::DeserializeOwned>(
    source: &SourceConfig,
) -> Result<T> {
    serde_json::from_value(source.config.clone()).map_err(|e| {
        BibfedError::new(
            ErrorCode::MissingConfigField,
            format!("invalid source configuration: {}", e),
        )
        .with_context(ErrorContext::Config {
            source_name: Some(source.name.clone()),
            field: None,
        })
    })
}

pub(crate) fn ensure_endpoint(endpoint: &str) -> Result<()> {
    if bibfed_common::config::validate_endpoint(endpoint).is_err() {
        return Err(BibfedError::new(
            ErrorCode::InvalidEndpoint,
            format!("{:?} is not a valid endpoint URL", endpoint),
        ));
    }
    Ok(())
}

pub(crate) fn ensure_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(BibfedError::new(
            ErrorCode::InvalidLimit,
            "result limit must be a positive integer",
        ));
    }
    Ok(())
}

pub(crate) fn unsupported_object_type(requested: &str, served: &str) -> BibfedError {
    BibfedError::new(
        ErrorCode::UnsupportedObjectType,
        format!("unsupported object type: {}", requested),
    )
    .with_context(ErrorContext::ObjectType {
        requested: requested.to_string(),
        served: served.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_knows_all_shipped_adapters() {
        let registry = default_registry();
        for source_type in ["rest", "existdb", "sparql"] {
            assert!(registry.providers.contains_key(source_type));
        }
    }

    #[test]
    fn test_registry_rejects_unknown_source_type() {
        let registry = default_registry();
        let source = SourceConfig {
            name: "legacy".to_string(),
            source_type: "z3950".to_string(),
            config: serde_json::json!({}),
        };
        let err = registry.build(&source).expect_err("build should fail");
        assert_eq!(err.code, ErrorCode::UnknownSourceType);
        assert_eq!(
            err.hint.as_deref(),
            Some("registered types: existdb, rest, sparql")
        );
    }

    #[test]
    fn test_ensure_limit() {
        assert!(ensure_limit(1).is_ok());
        let err = ensure_limit(0).expect_err("zero limit must fail");
        assert_eq!(err.code, ErrorCode::InvalidLimit);
    }

    #[test]
    fn test_ensure_endpoint() {
        assert!(ensure_endpoint("http://localhost:8080").is_ok());
        let err = ensure_endpoint("gopher://example.org").expect_err("must fail");
        assert_eq!(err.code, ErrorCode::InvalidEndpoint);
    }
}

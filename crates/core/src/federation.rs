//! Composition of one adapter with the schema mapper.
//!
//! This is the single place where schema translation wraps an adapter:
//! conditions and projections are rewritten into the source vocabulary
//! before dispatch, raw records are mapped back into canonical instances
//! after it. Adapters themselves never translate fields.

use tracing::debug;

use bibfed_common::models::{Instance, Mapping, Query};
use bibfed_connectors::dispatch::CancelHandle;
use bibfed_connectors::sources::{QueryJob, SourceAdapter};
use bibfed_error::{BibfedError, ErrorCode, ErrorContext, Result};

use crate::mapper::SchemaMapper;

pub struct FederatedSource {
    adapter: Box<dyn SourceAdapter>,
    mapper: SchemaMapper,
}

impl FederatedSource {
    pub fn new(adapter: Box<dyn SourceAdapter>, mapper: SchemaMapper) -> Self {
        FederatedSource { adapter, mapper }
    }

    pub fn adapter(&self) -> &dyn SourceAdapter {
        self.adapter.as_ref()
    }

    /// Translate a canonical query into the source vocabulary and dispatch
    /// it. Fails with `MappingNotFound` when the canonical type has no
    /// mapping for this source; compilation errors surface before any I/O.
    pub fn start_query(
        &self,
        canonical_type: &str,
        query: &Query,
        fields: &[String],
    ) -> Result<FederatedJob> {
        let mapping = self
            .mapper
            .find_mapping_to(canonical_type)
            .ok_or_else(|| self.mapping_not_found(canonical_type))?
            .clone();

        let rewritten = self.mapper.rewrite_conditions_for_source(&mapping, query);
        let projection = self.mapper.rename_fields_for_source(&mapping, fields);
        debug!(
            canonical_type,
            source_type = %mapping.source_type,
            branches = rewritten.branches.len(),
            "dispatching federated query"
        );

        let job = self
            .adapter
            .query(&mapping.source_type, &rewritten, &projection)?;
        Ok(FederatedJob {
            job,
            mapping,
            mapper: self.mapper.clone(),
        })
    }

    /// Canonical id resolution: the adapter queries its native id field, the
    /// result comes back mapped like any other query.
    pub fn start_resolve_id(&self, canonical_type: &str, id: &str) -> Result<FederatedJob> {
        let mapping = self
            .mapper
            .find_mapping_to(canonical_type)
            .ok_or_else(|| self.mapping_not_found(canonical_type))?
            .clone();

        let job = self.adapter.resolve_id(id, &[])?;
        Ok(FederatedJob {
            job,
            mapping,
            mapper: self.mapper.clone(),
        })
    }

    pub fn destroy(&self) {
        self.adapter.destroy();
    }

    fn mapping_not_found(&self, canonical_type: &str) -> BibfedError {
        BibfedError::new(
            ErrorCode::MappingNotFound,
            format!("no mapping found for type: {}", canonical_type),
        )
        .with_context(ErrorContext::MappingNotFound {
            wanted: canonical_type.to_string(),
            direction: "to".to_string(),
            available: self.mapper.mapped_types(),
        })
    }
}

/// An in-flight federated query. Joining maps the raw records into canonical
/// instances; the cancel handle is the adapter dispatch's own.
#[derive(Debug)]
pub struct FederatedJob {
    job: QueryJob,
    mapping: Mapping,
    mapper: SchemaMapper,
}

impl FederatedJob {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.job.cancel_handle()
    }

    pub async fn join(self) -> Result<Vec<Instance>> {
        let records = self.job.join().await?;
        Ok(self.mapper.map_instances_from_source(&self.mapping, &records))
    }
}

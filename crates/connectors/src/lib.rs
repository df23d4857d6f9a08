//! Protocol adapters for the bibfed federation layer.
//!
//! Each remote backend (REST search API, eXist-db XQuery endpoint, SPARQL
//! triple store) is wrapped by an adapter implementing
//! [`sources::SourceAdapter`]: it compiles a canonical disjunctive query into
//! the backend's native query language, dispatches the request(s) through the
//! [`dispatch`] fan-out machinery, and reshapes native payloads into
//! [`bibfed_common::models::SourceRecord`]s. Schema translation is not done
//! here — that is the mapper's job, applied around the adapter exactly once.
pub mod dispatch;
pub mod sources;

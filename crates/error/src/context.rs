//! # Error Contexts
//!
//! Structured metadata for errors to enable programmatic analysis.

use serde::{Deserialize, Serialize};

/// Structured context attached to a [`crate::BibfedError`].
///
/// Each variant provides specific fields relevant to that error type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorContext {
    /// Context for BIBFED-2002 (UnknownField)
    UnknownField {
        field: String,
        source_type: String,
        allowed_fields: Vec<String>,
    },

    /// Context for BIBFED-2003 (UnsupportedObjectType)
    ObjectType {
        requested: String,
        served: String,
    },

    /// Context for transport errors (BIBFED-1001, 1002)
    Transport {
        endpoint: String,
        status: Option<u16>,
    },

    /// Context for BIBFED-3xxx (config errors)
    Config {
        source_name: Option<String>,
        field: Option<String>,
    },

    /// Context for BIBFED-4001 (MappingNotFound)
    MappingNotFound {
        wanted: String,
        /// "to" when looking up by mapped type, "from" when by source type
        direction: String,
        available: Vec<String>,
    },

    /// Context for BIBFED-5001 (MalformedResponse)
    Parse {
        source_type: String,
        detail: Option<String>,
    },

    /// Context for dispatch failures (which OR-branch died first)
    Dispatch {
        branches: usize,
        failed_branch: Option<usize>,
    },

    /// Generic key-value context for extensibility
    Generic {
        #[serde(flatten)]
        data: std::collections::HashMap<String, serde_json::Value>,
    },
}

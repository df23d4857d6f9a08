use crate::models::Mapping;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use validator::Validate;

// Default constants
pub const DEFAULT_LIMIT: usize = 20;
pub const DEFAULT_START: usize = 0;

/// One configured remote source: `{ name, type, ...protocol fields }`.
///
/// The protocol-specific keys (endpoint URL, document path, id variable)
/// stay opaque here; the adapter selected by `source_type` deserializes and
/// validates them at construction time.
#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct SourceConfig {
    #[validate(length(min = 1))]
    pub name: String,

    #[serde(rename = "type")]
    #[validate(length(min = 1))]
    pub source_type: String, // e.g., rest, existdb, sparql

    // Flatten other loose config for the adapter to interpret
    #[serde(flatten)]
    pub config: serde_json::Value,
}

/// Top-level federation configuration: remote sources plus the schema
/// mappings the admin layer maintains for them.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FederationConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
}

impl FederationConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = config::Config::builder();

        let builder = if std::path::Path::new(path).exists() {
            builder.add_source(config::File::with_name(path))
        } else {
            builder
        };

        // Map BIBFED_SOURCES__... style environment variables onto the tree
        let builder = builder.add_source(
            config::Environment::with_prefix("BIBFED")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().context("Failed to build configuration")?;

        let federation: FederationConfig = cfg
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        for source in &federation.sources {
            source
                .validate()
                .map_err(|e| anyhow::anyhow!("Invalid source entry: {:?}", e))?;
        }

        Ok(federation)
    }
}

/// Endpoint URLs must be absolute http(s) URLs; anything else fails adapter
/// construction permanently.
pub fn validate_endpoint(endpoint: &str) -> std::result::Result<(), validator::ValidationError> {
    match url::Url::parse(endpoint) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_endpoint")),
    }
}

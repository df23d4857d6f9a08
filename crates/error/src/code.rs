use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric error codes following the BIBFED-XXXX format.
///
/// ## Code Ranges
/// - **1000-1999**: Transport errors (network, HTTP status)
/// - **2000-2999**: Query compilation errors (raised before any I/O)
/// - **3000-3999**: Configuration errors (fatal at adapter construction)
/// - **4000-4999**: Schema mapping errors
/// - **5000-5999**: Internal/parse errors
///
/// Codes are stable across versions (semver contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
#[non_exhaustive]
pub enum ErrorCode {
    // === Transport Errors (1000-1999) ===
    /// BIBFED-1001: Network-level failure reaching the remote endpoint
    ConnectionFailed = 1001,
    /// BIBFED-1002: Remote answered with a non-2xx HTTP status
    UnexpectedStatus = 1002,

    // === Query Compilation Errors (2000-2999) ===
    /// BIBFED-2001: Condition operator other than equality
    UnsupportedOperator = 2001,
    /// BIBFED-2002: Field name the target backend cannot query
    UnknownField = 2002,
    /// BIBFED-2003: Object type this adapter does not serve
    UnsupportedObjectType = 2003,
    /// BIBFED-2004: OR over multiple AND-groups not expressible for this backend
    DisjunctionUnsupported = 2004,
    /// BIBFED-2005: Dispatch cancelled before completion
    QueryCancelled = 2005,

    // === Configuration Errors (3000-3999) ===
    /// BIBFED-3001: Required configuration key is absent
    MissingConfigField = 3001,
    /// BIBFED-3002: Endpoint is not a valid http(s) URL
    InvalidEndpoint = 3002,
    /// BIBFED-3003: Result limit is missing or not a positive integer
    InvalidLimit = 3003,
    /// BIBFED-3004: No adapter registered for the configured source type
    UnknownSourceType = 3004,

    // === Mapping Errors (4000-4999) ===
    /// BIBFED-4001: No mapping for the requested type
    MappingNotFound = 4001,

    // === Internal Errors (5000-5999) ===
    /// BIBFED-5001: Native response body could not be parsed
    MalformedResponse = 5001,
    /// BIBFED-5002: Serialization/deserialization failed
    SerializationFailed = 5002,
    /// BIBFED-5003: Unexpected internal state
    Internal = 5003,

    /// BIBFED-9999: Unknown/unclassified error
    Unknown = 9999,
}

impl ErrorCode {
    /// Get the numeric code value
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the formatted code string (e.g., "BIBFED-2002")
    pub fn as_str(&self) -> String {
        format!("BIBFED-{:04}", self.as_u16())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self.as_u16() {
            1000..=1999 => ErrorCategory::Transport,
            2000..=2999 => ErrorCategory::Query,
            3000..=3999 => ErrorCategory::Config,
            4000..=4999 => ErrorCategory::Mapping,
            _ => ErrorCategory::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> String {
        code.as_str()
    }
}

impl TryFrom<String> for ErrorCode {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        // Parse "BIBFED-XXXX" format
        let num: u16 = s
            .strip_prefix("BIBFED-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| "Invalid format".to_string())?;
        Self::try_from(num).map_err(|_| "Unknown code".to_string())
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(n: u16) -> std::result::Result<Self, Self::Error> {
        match n {
            1001 => Ok(Self::ConnectionFailed),
            1002 => Ok(Self::UnexpectedStatus),
            2001 => Ok(Self::UnsupportedOperator),
            2002 => Ok(Self::UnknownField),
            2003 => Ok(Self::UnsupportedObjectType),
            2004 => Ok(Self::DisjunctionUnsupported),
            2005 => Ok(Self::QueryCancelled),
            3001 => Ok(Self::MissingConfigField),
            3002 => Ok(Self::InvalidEndpoint),
            3003 => Ok(Self::InvalidLimit),
            3004 => Ok(Self::UnknownSourceType),
            4001 => Ok(Self::MappingNotFound),
            5001 => Ok(Self::MalformedResponse),
            5002 => Ok(Self::SerializationFailed),
            5003 => Ok(Self::Internal),
            9999 => Ok(Self::Unknown),
            _ => Err(format!("Unknown error code: {}", n)),
        }
    }
}

/// High-level error category, used by the routing layer for HTTP status mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCategory {
    Transport,
    Query,
    Config,
    Mapping,
    Internal,
}

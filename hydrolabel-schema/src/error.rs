//! Error types for the unified annotation schema engine
//!
//! Four error kinds mirror the four failure domains: document shape
//! (`SchemaError`), foreign keys (`ReferenceError`), semantic invariants
//! (`ValidationError`) and legacy-format mapping (`ConversionError`).
//! Every variant carries the offending field path so callers can surface
//! it verbatim to the person fixing the source JSON.

use thiserror::Error;

/// Common result type for schema operations
pub type Result<T> = std::result::Result<T, Error>;

/// Umbrella error for all schema engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// Document shape violation (missing/unknown fields, bad version)
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Dangling or ambiguous foreign key
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Semantic invariant violation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Legacy shape cannot be mapped to the unified schema
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (wraps serde_json::Error)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Document shape violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A field required by the document's profile is absent
    #[error("missing required field `{path}`")]
    MissingRequiredField { path: String },

    /// Strict mode rejected a key outside the closed schema
    #[error("unknown field `{path}` rejected in strict mode")]
    UnknownField { path: String },

    /// Document declares a schema version this engine does not speak
    #[error("unsupported schema version `{found}`, expected \"2.0\"")]
    UnsupportedVersion { found: String },

    /// Document could not be decoded into the typed model
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Foreign-key violations between items and data sources
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    /// Item references a data_source_id absent from data_sources
    #[error("item `{item_id}` references unknown data_source_id `{data_source_id}`")]
    DanglingDataSourceId {
        item_id: String,
        data_source_id: String,
    },

    /// Item omits data_source_id while several data sources exist
    #[error("item `{item_id}` omits data_source_id but the document declares {count} data sources")]
    AmbiguousDataSource { item_id: String, count: usize },

    /// Two data sources share the same key
    #[error("duplicate data_source_id `{data_source_id}`")]
    DuplicateDataSourceId { data_source_id: String },
}

/// Semantic invariant violations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// audio_end_time must be strictly after audio_start_time
    #[error("`{path}`: audio_end_time `{end}` is not after audio_start_time `{start}`")]
    InvalidTimeRange {
        path: String,
        start: String,
        end: String,
    },

    /// verification_round values must increase strictly from 1
    #[error("`{path}`: verification_round {found} breaks strict ordering (expected {expected})")]
    NonMonotonicRound {
        path: String,
        expected: u32,
        found: u32,
    },

    /// Scores and thresholds live in [0, 1]
    #[error("`{path}`: value {value} outside [0, 1]")]
    ScoreOutOfRange { path: String, value: f64 },

    /// accepted/rejected decisions must reference a class the model scored
    #[error("`{path}`: `{decision}` decision for label `{label}` has no matching model output")]
    DecisionWithoutModelOutput {
        path: String,
        label: String,
        decision: String,
    },

    /// A null threshold is only meaningful for manually added labels
    #[error("`{path}`: threshold_used may only be null when decision is `added`")]
    InvalidNullThreshold { path: String },

    /// Appended round must be exactly max(existing) + 1
    #[error("item `{item_id}`: verification_round {round} is not the next round (expected {expected})")]
    DuplicateRound {
        item_id: String,
        round: u32,
        expected: u32,
    },

    /// One score per class per item
    #[error("`{path}`: duplicate model output for class `{class_hierarchy}`")]
    DuplicateModelOutput {
        path: String,
        class_hierarchy: String,
    },

    /// item_id values must be unique within a document
    #[error("duplicate item_id `{item_id}`")]
    DuplicateItemId { item_id: String },

    /// Label does not resolve in the injected taxonomy snapshot
    #[error("`{path}`: label `{label}` not present in taxonomy")]
    LabelNotInTaxonomy { path: String, label: String },
}

/// Legacy-format mapping failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// A legacy field has no counterpart in the unified schema
    #[error("cannot map legacy field `{field}`: {reason}")]
    UnmappableField { field: String, reason: String },

    /// Input matches none of the known legacy shapes
    #[error("unrecognized input format: {0}")]
    UnrecognizedFormat(String),
}

/// Map a serde decode failure onto the schema error taxonomy.
///
/// serde reports absent required fields as "missing field `name`"; those
/// become `MissingRequiredField` so callers see the same kind for all
/// shape problems.
pub(crate) fn schema_error_from_serde(err: serde_json::Error) -> Error {
    let msg = err.to_string();
    if let Some(rest) = msg.strip_prefix("missing field `") {
        if let Some(field) = rest.split('`').next() {
            return SchemaError::MissingRequiredField {
                path: field.to_string(),
            }
            .into();
        }
    }
    SchemaError::Malformed(msg).into()
}

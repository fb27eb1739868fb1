//! # Hydrolabel Schema Library
//!
//! Engine for the Oceans 3.0 Unified Schema v2.0: the JSON interchange
//! format for hydrophone model predictions and expert verifications.
//! Provides:
//! - Typed document model with strict/lenient parsing and minimal
//!   serialization (`document`)
//! - Referential and semantic validation against an injected taxonomy
//!   (`validate`, `taxonomy`)
//! - Lossless conversion of the legacy labeling formats (`convert`)
//! - Append-only verification ledger operations (`ledger`)
//! - Locked, atomic document persistence (`store`)

pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod ledger;
pub mod store;
pub mod taxonomy;
pub mod time;
pub mod validate;

pub use convert::{convert_to_unified, detect_format, ConvertOptions, SourceFormat};
pub use document::{
    DataSource, Decision, Document, Item, LabelDecision, ModelInfo, ModelOutput, ParseMode,
    Profile, TaskType, Verification, VerificationStatus, SCHEMA_VERSION,
};
pub use error::{ConversionError, Error, ReferenceError, Result, SchemaError, ValidationError};
pub use ledger::{current_labels, DocumentSummary, ReviewState};
pub use store::DocumentStore;
pub use taxonomy::Taxonomy;
pub use validate::Validator;

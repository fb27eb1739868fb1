//! Typed model of the unified predictions/verifications document
//!
//! Wire format is the Oceans 3.0 Unified Schema v2.0: one JSON document per
//! data batch holding model metadata, hydrophone data sources, and a list
//! of reviewable items with raw model scores and append-only verification
//! rounds. Two profiles share the shape: "predictions" documents carry
//! `model` + `data_sources` + per-item `model_outputs`; "labels" documents
//! omit all three and rely on verifications alone.
//!
//! Unset optional fields are omitted on serialize (never emitted as null).
//! Keys outside the schema are captured per level into an `extra` map so
//! lenient parsing round-trips them unchanged, while strict parsing can
//! name and reject them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{schema_error_from_serde, Result, SchemaError};

/// Schema version constant written by this engine
pub const SCHEMA_VERSION: &str = "2.0";

/// How unknown keys are treated during parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// The canonical schema is closed: any unrecognized key is an error
    #[default]
    Strict,
    /// Unrecognized keys are preserved and written back on serialize
    Lenient,
}

/// Which optional field set a document carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Model-driven: `model`, `data_sources` and item `model_outputs` present
    Predictions,
    /// Manual labeling: verifications only
    Labels,
}

impl Profile {
    /// Infer the profile of a raw JSON document before typed parsing
    pub fn infer(value: &Value) -> Profile {
        let has_model = value
            .get("model")
            .and_then(Value::as_object)
            .is_some_and(|m| !m.is_empty());
        let items_have_outputs = value
            .get("items")
            .and_then(Value::as_array)
            .is_some_and(|items| {
                items.iter().any(|item| {
                    item.get("model_outputs")
                        .and_then(Value::as_array)
                        .is_some_and(|outputs| !outputs.is_empty())
                })
            });
        if has_model || items_have_outputs {
            Profile::Predictions
        } else {
            Profile::Labels
        }
    }
}

/// Task the producing pipeline was performing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    WhaleDetection,
    AnomalyDetection,
    Classification,
}

/// Reviewer's overall judgement for one round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Verified,
    Rejected,
    Uncertain,
}

/// Reviewer's stated confidence in a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

/// Provenance of the labels in a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelSource {
    Expert,
    Auto,
    Consensus,
}

/// Per-label outcome within a verification round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Model proposed the label and the reviewer agreed
    Accepted,
    /// Model proposed the label and the reviewer disagreed
    Rejected,
    /// Reviewer supplied a label the model did not propose
    Added,
}

impl Decision {
    /// Wire-format name, for error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Accepted => "accepted",
            Decision::Rejected => "rejected",
            Decision::Added => "added",
        }
    }
}

/// Root container for one data batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Always "2.0"; the converter upgrades anything older
    pub schema_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub task_type: TaskType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_sources: Option<Vec<DataSource>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectrogram_config: Option<SpectrogramConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineInfo>,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Model metadata for the predictions profile.
///
/// `model_id` is a deterministic content hash of the weights
/// (`sha256-<hex>`), so two exports of the same checkpoint agree on
/// identity without coordination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wandb_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training_dataset_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training_dataset_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training_dataset_url: Option<String>,
    /// ISO-8601 interval, e.g. "2019-01-01T00:00:00Z/2020-01-01T00:00:00Z"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training_data_time_range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_shape: Option<Vec<u32>>,
    /// Taxonomy paths the model can emit scores for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_classes: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ModelInfo {
    /// Minimal model metadata from an identity hash
    pub fn new(model_id: impl Into<String>) -> Self {
        ModelInfo {
            model_id: model_id.into(),
            model_version: None,
            architecture: None,
            checkpoint_path: None,
            checkpoint_url: None,
            trained_at: None,
            wandb_run_id: None,
            training_dataset_id: None,
            training_dataset_version: None,
            training_dataset_url: None,
            training_data_time_range: None,
            input_shape: None,
            output_classes: None,
            extra: BTreeMap::new(),
        }
    }

    /// Deterministic model identity: SHA-256 over the raw weight bytes
    pub fn id_for_weights(weights: &[u8]) -> String {
        let hash = Sha256::digest(weights);
        format!("sha256-{:x}", hash)
    }
}

/// One hydrophone deployment; items reference it by `data_source_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    /// Unique key within the document
    pub data_source_id: String,
    /// ONC device code, e.g. "ICLISTENHF1353"
    pub device_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
    /// True when amplitudes are calibrated to absolute SPL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_calibrated: Option<bool>,
    /// e.g. "dB re 1 uPa RMS"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DataSource {
    /// New data source with only the required keys set
    pub fn new(data_source_id: impl Into<String>, device_code: impl Into<String>) -> Self {
        DataSource {
            data_source_id: data_source_id.into(),
            device_code: device_code.into(),
            deployment_id: None,
            location_name: None,
            site_code: None,
            latitude: None,
            longitude: None,
            depth_m: None,
            channel: None,
            sample_rate: None,
            is_calibrated: None,
            calibration_reference: None,
            date_from: None,
            date_to: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Spectrogram generation parameters recorded for reproducibility
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectrogramConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nfft: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap: Option<f64>,
    /// [low_hz, high_hz]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_limits: Option<Vec<f64>>,
    /// [min_db, max_db]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_limits: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_source: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Inference pipeline provenance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_repo: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One reviewable display unit (a spectrogram/audio clip)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Unique within the document; convention
    /// `{device_code}_{ISO-timestamp}_seg{NNN}`
    pub item_id: String,
    /// FK into `data_sources`; may be omitted when the document declares
    /// exactly one source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source_id: Option<String>,
    /// Zero-based index when a recording is split into segments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_end_time: Option<DateTime<Utc>>,
    /// Raw, unthresholded scores; empty for labels-only documents
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_outputs: Vec<ModelOutput>,
    /// Append-only review history; the last round is the current state
    #[serde(default)]
    pub verifications: Vec<Verification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<ItemPaths>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Item {
    /// New item with no outputs, verifications or paths
    pub fn new(item_id: impl Into<String>) -> Self {
        Item {
            item_id: item_id.into(),
            data_source_id: None,
            segment_index: None,
            audio_start_time: None,
            audio_end_time: None,
            model_outputs: Vec::new(),
            verifications: Vec::new(),
            paths: None,
            extra: BTreeMap::new(),
        }
    }

    /// Score for a class, when the model emitted one
    pub fn score_for(&self, class_hierarchy: &str) -> Option<f64> {
        self.model_outputs
            .iter()
            .find(|o| o.class_hierarchy == class_hierarchy)
            .map(|o| o.score)
    }
}

/// Relative file references attached to an item; opaque to this engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemPaths {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectrogram_mat_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectrogram_png_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ItemPaths {
    /// True when no path of any kind is recorded
    pub fn is_empty(&self) -> bool {
        self.spectrogram_mat_path.is_none()
            && self.spectrogram_png_path.is_none()
            && self.audio_path.is_none()
            && self.extra.is_empty()
    }
}

/// One raw class score for an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    /// Full taxonomy path, `>`-separated
    pub class_hierarchy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    /// Raw score in [0, 1]; thresholding happens at review time
    pub score: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ModelOutput {
    pub fn new(class_hierarchy: impl Into<String>, score: f64) -> Self {
        ModelOutput {
            class_hierarchy: class_hierarchy.into(),
            class_id: None,
            score,
            extra: BTreeMap::new(),
        }
    }
}

/// One review round; never edited or deleted once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub verified_at: DateTime<Utc>,
    /// Reviewer identifier (email or username)
    pub verified_by: String,
    /// 1-based, strictly increasing within an item
    pub verification_round: u32,
    pub label_decisions: Vec<LabelDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_status: Option<VerificationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer_affiliation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_source: Option<LabelSource>,
    /// Taxonomy snapshot the reviewer worked against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taxonomy_version: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Verification {
    /// New round with required fields only
    pub fn new(
        verified_at: DateTime<Utc>,
        verified_by: impl Into<String>,
        verification_round: u32,
        label_decisions: Vec<LabelDecision>,
    ) -> Self {
        Verification {
            verified_at,
            verified_by: verified_by.into(),
            verification_round,
            label_decisions,
            verification_status: None,
            reviewer_affiliation: None,
            confidence: None,
            notes: None,
            label_source: None,
            taxonomy_version: None,
            extra: BTreeMap::new(),
        }
    }
}

/// One class-level decision within a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDecision {
    /// Taxonomy path
    pub label: String,
    pub decision: Decision,
    /// Threshold applied to the model score; null only for `added` labels
    #[serde(default)]
    pub threshold_used: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl LabelDecision {
    pub fn new(label: impl Into<String>, decision: Decision, threshold_used: Option<f64>) -> Self {
        LabelDecision {
            label: label.into(),
            decision,
            threshold_used,
            extra: BTreeMap::new(),
        }
    }
}

impl Document {
    /// Empty document for a fresh batch; timestamps are stamped on save
    pub fn new(task_type: TaskType) -> Self {
        Document {
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: None,
            updated_at: None,
            task_type,
            model: None,
            data_sources: None,
            spectrogram_config: None,
            pipeline: None,
            items: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Parse a JSON string into the typed model
    pub fn parse_str(s: &str, mode: ParseMode) -> Result<Document> {
        let value: Value = serde_json::from_str(s)?;
        Self::parse_value(value, mode)
    }

    /// Parse a raw JSON value into the typed model.
    ///
    /// Fails with `SchemaError::UnsupportedVersion` for anything other than
    /// schema_version "2.0" (older shapes go through the format converter),
    /// `SchemaError::MissingRequiredField` for absent required fields, and
    /// in strict mode `SchemaError::UnknownField` naming the first key
    /// outside the closed schema.
    pub fn parse_value(value: Value, mode: ParseMode) -> Result<Document> {
        match value.get("schema_version") {
            None => {
                return Err(SchemaError::MissingRequiredField {
                    path: "schema_version".to_string(),
                }
                .into())
            }
            Some(Value::String(v)) if v == SCHEMA_VERSION => {}
            Some(other) => {
                let found = match other {
                    Value::String(s) => s.clone(),
                    v => v.to_string(),
                };
                return Err(SchemaError::UnsupportedVersion { found }.into());
            }
        }

        let doc: Document = serde_json::from_value(value).map_err(schema_error_from_serde)?;

        if mode == ParseMode::Strict {
            if let Some(path) = doc.unknown_fields().into_iter().next() {
                return Err(SchemaError::UnknownField { path }.into());
            }
        }
        Ok(doc)
    }

    /// Serialize to a JSON value, omitting unset optionals
    pub fn to_json_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Serialize to pretty-printed JSON, the on-disk representation
    pub fn to_json_string_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Profile of this document, inferred from the presence of `model`
    pub fn profile(&self) -> Profile {
        if self.model.is_some() {
            Profile::Predictions
        } else {
            Profile::Labels
        }
    }

    /// Paths of all keys outside the closed schema, in document order
    pub fn unknown_fields(&self) -> Vec<String> {
        let mut out: Vec<String> = self.extra.keys().cloned().collect();
        if let Some(model) = &self.model {
            out.extend(model.extra.keys().map(|k| format!("model.{k}")));
        }
        if let Some(sources) = &self.data_sources {
            for (i, source) in sources.iter().enumerate() {
                out.extend(
                    source
                        .extra
                        .keys()
                        .map(|k| format!("data_sources[{i}].{k}")),
                );
            }
        }
        if let Some(config) = &self.spectrogram_config {
            out.extend(config.extra.keys().map(|k| format!("spectrogram_config.{k}")));
        }
        if let Some(pipeline) = &self.pipeline {
            out.extend(pipeline.extra.keys().map(|k| format!("pipeline.{k}")));
        }
        for (i, item) in self.items.iter().enumerate() {
            out.extend(item.extra.keys().map(|k| format!("items[{i}].{k}")));
            if let Some(paths) = &item.paths {
                out.extend(paths.extra.keys().map(|k| format!("items[{i}].paths.{k}")));
            }
            for (j, output) in item.model_outputs.iter().enumerate() {
                out.extend(
                    output
                        .extra
                        .keys()
                        .map(|k| format!("items[{i}].model_outputs[{j}].{k}")),
                );
            }
            for (j, verification) in item.verifications.iter().enumerate() {
                out.extend(
                    verification
                        .extra
                        .keys()
                        .map(|k| format!("items[{i}].verifications[{j}].{k}")),
                );
                for (l, decision) in verification.label_decisions.iter().enumerate() {
                    out.extend(decision.extra.keys().map(|k| {
                        format!("items[{i}].verifications[{j}].label_decisions[{l}].{k}")
                    }));
                }
            }
        }
        out
    }

    /// Look up a data source by key
    pub fn data_source(&self, data_source_id: &str) -> Option<&DataSource> {
        self.data_sources
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|s| s.data_source_id == data_source_id)
    }

    /// Look up an item by key
    pub fn item(&self, item_id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.item_id == item_id)
    }

    /// Mutable item lookup, for appending verification rounds
    pub fn item_mut(&mut self, item_id: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| i.item_id == item_id)
    }

    /// Attach model metadata (switches the document to the predictions profile)
    pub fn set_model(&mut self, model: ModelInfo) {
        self.model = Some(model);
    }

    /// Append a data source record
    pub fn add_data_source(&mut self, source: DataSource) {
        self.data_sources.get_or_insert_with(Vec::new).push(source);
    }

    /// Append an item
    pub fn add_item(&mut self, item: Item) {
        self.items.push(item);
    }

    /// Items no reviewer has touched yet
    pub fn unverified_items(&self) -> Vec<&Item> {
        self.items
            .iter()
            .filter(|i| i.verifications.is_empty())
            .collect()
    }

    /// Items whose score for a class falls on the requested side of a
    /// threshold (`above` selects score >= threshold)
    pub fn items_by_score_threshold(
        &self,
        class_hierarchy: &str,
        threshold: f64,
        above: bool,
    ) -> Vec<&Item> {
        self.items
            .iter()
            .filter(|item| {
                item.score_for(class_hierarchy)
                    .is_some_and(|score| (score >= threshold) == above)
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Legacy format conversion into the unified 2.0 schema
//!
//! The labeling tools have produced four generations of files: flat
//! `{filename: [label, ...]}` maps from the first labeling app, per-day
//! dashboard maps keyed by filename with predicted/verified label lists,
//! whale-detector prediction dumps with `segments`/`predictions` arrays,
//! and near-2.0 documents that still carry a singular `data_source` or
//! item-level `mat_path`/`audio_timestamp` fields. Conversion normalizes
//! all of them losslessly into the canonical shape: consumed legacy keys
//! are relocated, unconsumed ones are preserved in the pass-through maps,
//! and anything that cannot be mapped fails naming the offending field.
//!
//! Conversion is idempotent: canonical input parses straight through.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::document::{
    DataSource, Decision, Document, Item, ItemPaths, LabelDecision, LabelSource, ModelInfo,
    ModelOutput, ParseMode, TaskType, Verification, VerificationStatus, SCHEMA_VERSION,
};
use crate::error::{schema_error_from_serde, ConversionError, Result};
use crate::taxonomy;
use crate::time;

/// Reviewer identity recorded when a legacy file carries labels but no
/// attribution
const LEGACY_REVIEWER: &str = "legacy_import";

/// Taxonomy path the single-class whale detector scores
const FIN_WHALE_CLASS: &str = "Biophony > Marine mammal > Cetacean > Baleen whale > Fin whale";

/// Media extensions stripped when deriving an item_id from a filename key
const MEDIA_EXTENSIONS: [&str; 8] = [
    ".mat", ".npy", ".png", ".jpg", ".jpeg", ".wav", ".flac", ".mp3",
];

/// Recognized input shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Already the unified 2.0 schema; passes through parse unchanged
    Canonical,
    /// Unified-style document with pre-2.0 leftovers (singular
    /// `data_source`, item-level path/timestamp fields, `annotations`)
    UnifiedLegacy,
    /// `{filename: [label, ...]}` from the first labeling app
    FlatLabelMap,
    /// Per-day dashboard map keyed by filename
    DashboardMap,
    /// Whale detector dump with `segments`/`predictions` arrays
    WhalePredictions,
}

/// Knobs for details the legacy files do not record themselves
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Folder prepended to MAT filenames from flat label maps
    pub mat_folder: Option<PathBuf>,
    /// Folder prepended to image filenames from dashboard maps
    pub image_folder: Option<PathBuf>,
    /// Device code for formats that only name the hydrophone out-of-band
    pub device_code: Option<String>,
    /// Task type when the input does not state one
    pub task_type: Option<TaskType>,
    /// Reviewer identity for labels with no attribution
    pub labeled_by: Option<String>,
}

/// Identify which shape a raw JSON document is in, if any
pub fn detect_format(value: &Value) -> Option<SourceFormat> {
    let obj = value.as_object()?;
    if obj.is_empty() {
        return None;
    }

    if obj.get("items").is_some_and(Value::is_array) || obj.contains_key("schema_version") {
        return Some(if is_canonical(obj) {
            SourceFormat::Canonical
        } else {
            SourceFormat::UnifiedLegacy
        });
    }
    if obj.get("segments").is_some_and(Value::is_array)
        || obj.get("predictions").is_some_and(Value::is_array)
    {
        return Some(SourceFormat::WhalePredictions);
    }
    if obj.values().all(is_string_array) {
        return Some(SourceFormat::FlatLabelMap);
    }
    let dashboard_like = obj.values().all(|v| v.is_object() || is_string_array(v))
        && obj.values().any(|v| {
            v.as_object().is_some_and(|entry| {
                entry.contains_key("predicted_labels") || entry.contains_key("verified_labels")
            })
        });
    if dashboard_like {
        return Some(SourceFormat::DashboardMap);
    }
    None
}

/// Normalize any recognized input into a validated-ready typed document.
///
/// The caller is expected to run the [`crate::validate::Validator`] on the
/// result; conversion itself only guarantees shape, not semantics.
pub fn convert_to_unified(value: Value, opts: &ConvertOptions) -> Result<Document> {
    let format = detect_format(&value).ok_or_else(|| {
        ConversionError::UnrecognizedFormat(
            "document matches neither the unified schema nor a known legacy shape".to_string(),
        )
    })?;
    debug!(?format, "converting input document");
    match format {
        SourceFormat::Canonical => Document::parse_value(value, ParseMode::Lenient),
        SourceFormat::UnifiedLegacy => convert_unified_legacy(value, opts),
        SourceFormat::FlatLabelMap => convert_flat_label_map(value, opts),
        SourceFormat::DashboardMap => convert_dashboard_map(value, opts),
        SourceFormat::WhalePredictions => convert_whale_predictions(value, opts),
    }
}

fn is_canonical(obj: &Map<String, Value>) -> bool {
    if obj.get("schema_version").and_then(Value::as_str) != Some(SCHEMA_VERSION) {
        return false;
    }
    if !matches!(
        obj.get("task_type").and_then(Value::as_str),
        Some("whale_detection" | "anomaly_detection" | "classification")
    ) {
        return false;
    }
    if obj.contains_key("data_source") || obj.contains_key("version") {
        return false;
    }
    match obj.get("model") {
        None | Some(Value::Null) => {}
        Some(Value::Object(m)) if !m.is_empty() && m.contains_key("model_id") => {}
        Some(_) => return false,
    }
    match obj.get("data_sources") {
        None | Some(Value::Null) => {}
        Some(Value::Array(a)) if !a.is_empty() => {}
        Some(_) => return false,
    }
    let Some(items) = obj.get("items").and_then(Value::as_array) else {
        return false;
    };
    items.iter().all(|item| {
        let Some(item) = item.as_object() else {
            return false;
        };
        const LEGACY_ITEM_KEYS: [&str; 8] = [
            "mat_path",
            "spectrogram_path",
            "audio_path",
            "audio_file",
            "audio_timestamp",
            "duration_sec",
            "annotations",
            "timestamps",
        ];
        if LEGACY_ITEM_KEYS.iter().any(|k| item.contains_key(*k)) {
            return false;
        }
        item.get("verifications")
            .and_then(Value::as_array)
            .map_or(true, |rounds| {
                rounds.iter().all(|r| {
                    r.as_object()
                        .is_some_and(|r| r.contains_key("label_decisions"))
                })
            })
    })
}

fn is_string_array(value: &Value) -> bool {
    value
        .as_array()
        .is_some_and(|a| a.iter().all(Value::is_string))
}

/// Strip a known media extension so filename keys become stable item ids
fn normalize_item_key(key: &str) -> &str {
    let lower = key.to_ascii_lowercase();
    for ext in MEDIA_EXTENSIONS {
        if lower.ends_with(ext) {
            return &key[..key.len() - ext.len()];
        }
    }
    key
}

fn join_folder(folder: Option<&Path>, filename: &str) -> String {
    match folder {
        Some(folder) => folder.join(filename).to_string_lossy().into_owned(),
        None => filename.to_string(),
    }
}

fn into_extra(map: Map<String, Value>) -> BTreeMap<String, Value> {
    map.into_iter().collect()
}

/// Remove a string-valued key; null and absent both mean unset
fn take_string(map: &mut Map<String, Value>, key: &str, context: &str) -> Result<Option<String>> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(ConversionError::UnmappableField {
            field: format!("{context}.{key}"),
            reason: format!("expected a string, got {other}"),
        }
        .into()),
    }
}

/// Remove a timestamp-valued key; the legacy tools wrote empty strings
/// for "unset", so those map to None as well
fn take_timestamp(
    map: &mut Map<String, Value>,
    key: &str,
    context: &str,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    match take_string(map, key, context)? {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => time::parse_timestamp(&s)
            .map(Some)
            .map_err(|_| {
                ConversionError::UnmappableField {
                    field: format!("{context}.{key}"),
                    reason: format!("unparseable timestamp `{s}`"),
                }
                .into()
            }),
    }
}

fn take_f64(map: &mut Map<String, Value>, key: &str, context: &str) -> Result<Option<f64>> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(ConversionError::UnmappableField {
            field: format!("{context}.{key}"),
            reason: format!("expected a number, got {other}"),
        }
        .into()),
    }
}

fn parse_task_type(value: Option<&Value>) -> Option<TaskType> {
    match value.and_then(Value::as_str) {
        Some("whale_detection") => Some(TaskType::WhaleDetection),
        Some("anomaly_detection") => Some(TaskType::AnomalyDetection),
        Some("classification") => Some(TaskType::Classification),
        _ => None,
    }
}

fn added_decision(label: &str) -> LabelDecision {
    LabelDecision::new(taxonomy::to_hierarchical(label), Decision::Added, None)
}

/// Build a round-1 verification for labels imported without review history
fn imported_round(
    decisions: Vec<LabelDecision>,
    verified_by: Option<String>,
    verified_at: Option<chrono::DateTime<chrono::Utc>>,
    notes: Option<String>,
    verified: bool,
) -> Verification {
    let mut round = Verification::new(
        verified_at.unwrap_or_else(time::now),
        verified_by.unwrap_or_else(|| LEGACY_REVIEWER.to_string()),
        1,
        decisions,
    );
    round.label_source = Some(LabelSource::Expert);
    round.notes = notes.filter(|n| !n.is_empty());
    if verified {
        round.verification_status = Some(VerificationStatus::Verified);
    }
    round
}

// ----------------------------------------------------------------------------
// Flat label map: {filename: [label, ...]}
// ----------------------------------------------------------------------------

fn convert_flat_label_map(value: Value, opts: &ConvertOptions) -> Result<Document> {
    let Value::Object(obj) = value else {
        unreachable!("detect_format only reports FlatLabelMap for objects");
    };

    let mut doc = Document::new(opts.task_type.unwrap_or(TaskType::Classification));
    for (filename, labels) in obj {
        let labels = labels
            .as_array()
            .expect("detect_format verified string arrays")
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>();

        let mut item = Item::new(normalize_item_key(&filename));
        item.paths = Some(ItemPaths {
            spectrogram_mat_path: Some(join_folder(opts.mat_folder.as_deref(), &filename)),
            ..Default::default()
        });
        if !labels.is_empty() {
            let decisions = labels.iter().map(|l| added_decision(l)).collect();
            item.verifications.push(imported_round(
                decisions,
                opts.labeled_by.clone(),
                None,
                None,
                false,
            ));
        }
        doc.add_item(item);
    }
    Ok(doc)
}

// ----------------------------------------------------------------------------
// Dashboard map: {filename: {predicted_labels, probabilities, ...}}
// ----------------------------------------------------------------------------

fn convert_dashboard_map(value: Value, opts: &ConvertOptions) -> Result<Document> {
    let Value::Object(obj) = value else {
        unreachable!("detect_format only reports DashboardMap for objects");
    };

    let mut doc = Document::new(opts.task_type.unwrap_or(TaskType::Classification));
    if let Some(device_code) = &opts.device_code {
        doc.add_data_source(DataSource::new(device_code.clone(), device_code.clone()));
    }

    for (filename, entry) in obj {
        let context = format!("items.{filename}");
        let mut item = Item::new(normalize_item_key(&filename));
        item.paths = Some(ItemPaths {
            spectrogram_png_path: Some(join_folder(opts.image_folder.as_deref(), &filename)),
            ..Default::default()
        });

        match entry {
            // Bare list entries are unreviewed predictions without scores;
            // keep the labels visible as a pass-through extra
            Value::Array(predicted) => {
                if !predicted.is_empty() {
                    item.extra
                        .insert("predicted_labels".to_string(), Value::Array(predicted));
                }
            }
            Value::Object(mut entry) => {
                if let Some(Value::Object(probabilities)) = entry.remove("probabilities") {
                    for (label, score) in probabilities {
                        let Some(score) = score.as_f64() else {
                            return Err(ConversionError::UnmappableField {
                                field: format!("{context}.probabilities.{label}"),
                                reason: format!("expected a number, got {score}"),
                            }
                            .into());
                        };
                        item.model_outputs
                            .push(ModelOutput::new(taxonomy::to_hierarchical(&label), score));
                    }
                }
                // predicted_labels is the thresholded view of probabilities;
                // keep it only when there are no scores to rederive it from
                match entry.remove("predicted_labels") {
                    Some(Value::Array(predicted))
                        if item.model_outputs.is_empty() && !predicted.is_empty() =>
                    {
                        item.extra
                            .insert("predicted_labels".to_string(), Value::Array(predicted));
                    }
                    _ => {}
                }

                item.audio_start_time = take_timestamp(&mut entry, "t0", &context)?;
                item.audio_end_time = take_timestamp(&mut entry, "t1", &context)?;
                entry.remove("hydrophone"); // carried by the data source

                let verified_labels = entry.remove("verified_labels");
                let verified_by = take_string(&mut entry, "verified_by", &context)?;
                let verified_at = take_timestamp(&mut entry, "verified_at", &context)?;
                let notes = take_string(&mut entry, "notes", &context)?;
                entry.remove("verified_role");

                if let Some(Value::Array(labels)) = verified_labels {
                    let decisions: Vec<LabelDecision> = labels
                        .iter()
                        .filter_map(Value::as_str)
                        .map(added_decision)
                        .collect();
                    if !decisions.is_empty() {
                        item.verifications.push(imported_round(
                            decisions,
                            verified_by,
                            verified_at,
                            notes,
                            true,
                        ));
                    }
                }
                item.extra.extend(entry);
            }
            other => {
                return Err(ConversionError::UnmappableField {
                    field: context,
                    reason: format!("expected an object or label list, got {other}"),
                }
                .into())
            }
        }
        doc.add_item(item);
    }
    Ok(doc)
}

// ----------------------------------------------------------------------------
// Whale detector dumps: {model, data_source, segments|predictions}
// ----------------------------------------------------------------------------

fn convert_whale_predictions(value: Value, opts: &ConvertOptions) -> Result<Document> {
    let Value::Object(mut obj) = value else {
        unreachable!("detect_format only reports WhalePredictions for objects");
    };

    let mut doc = Document::new(opts.task_type.unwrap_or(TaskType::WhaleDetection));
    doc.model = take_model(&mut obj)?;
    if let Some(source) = take_singular_data_source(&mut obj)? {
        doc.add_data_source(source);
    }

    if let Some(Value::Array(segments)) = obj.remove("segments") {
        for (i, segment) in segments.into_iter().enumerate() {
            doc.add_item(convert_whale_segment(segment, i, "segments", "segment_id")?);
        }
    } else if let Some(Value::Array(predictions)) = obj.remove("predictions") {
        for (i, prediction) in predictions.into_iter().enumerate() {
            doc.add_item(convert_whale_segment(
                prediction,
                i,
                "predictions",
                "file_id",
            )?);
        }
    }
    Ok(doc)
}

fn convert_whale_segment(
    value: Value,
    index: usize,
    array_name: &str,
    id_key: &str,
) -> Result<Item> {
    let context = format!("{array_name}[{index}]");
    let Value::Object(mut obj) = value else {
        return Err(ConversionError::UnmappableField {
            field: context,
            reason: "expected an object".to_string(),
        }
        .into());
    };

    let item_id = take_string(&mut obj, id_key, &context)?.ok_or_else(|| {
        ConversionError::UnmappableField {
            field: format!("{context}.{id_key}"),
            reason: "segment has no identifier".to_string(),
        }
    })?;
    let mut item = Item::new(item_id);

    let score = take_f64(&mut obj, "max_confidence", &context)?
        .or(take_f64(&mut obj, "confidence", &context)?)
        .unwrap_or(0.0);
    item.model_outputs
        .push(ModelOutput::new(FIN_WHALE_CLASS, score));

    item.audio_start_time = take_timestamp(&mut obj, "audio_timestamp", &context)?;
    relocate_item_paths(&mut obj, &mut item, &context)?;
    derive_end_time(&mut obj, &mut item, &context)?;

    item.extra = into_extra(obj);
    Ok(item)
}

// ----------------------------------------------------------------------------
// Unified-legacy documents (pre-2.0 leftovers)
// ----------------------------------------------------------------------------

fn convert_unified_legacy(value: Value, opts: &ConvertOptions) -> Result<Document> {
    let Value::Object(mut obj) = value else {
        unreachable!("detect_format only reports UnifiedLegacy for objects");
    };

    let task_type = parse_task_type(obj.get("task_type"))
        .or(opts.task_type)
        .unwrap_or(TaskType::Classification);
    obj.remove("task_type");
    obj.remove("schema_version");
    obj.remove("version");

    let mut doc = Document::new(task_type);
    doc.created_at = take_timestamp(&mut obj, "created_at", "document")?;
    doc.updated_at = take_timestamp(&mut obj, "updated_at", "document")?;
    doc.model = take_model(&mut obj)?;

    match obj.remove("data_sources") {
        Some(Value::Array(sources)) if !sources.is_empty() => {
            let sources: Vec<DataSource> =
                serde_json::from_value(Value::Array(sources)).map_err(schema_error_from_serde)?;
            doc.data_sources = Some(sources);
        }
        _ => {
            if let Some(source) = take_singular_data_source(&mut obj)? {
                doc.add_data_source(source);
            }
        }
    }

    match obj.remove("spectrogram_config") {
        Some(Value::Object(config)) if !config.is_empty() => {
            doc.spectrogram_config = Some(
                serde_json::from_value(Value::Object(config)).map_err(schema_error_from_serde)?,
            );
        }
        _ => {}
    }
    match obj.remove("pipeline") {
        Some(Value::Object(pipeline)) if !pipeline.is_empty() => {
            doc.pipeline = Some(
                serde_json::from_value(Value::Object(pipeline)).map_err(schema_error_from_serde)?,
            );
        }
        _ => {}
    }

    if let Some(Value::Array(items)) = obj.remove("items") {
        for (i, item) in items.into_iter().enumerate() {
            doc.add_item(convert_legacy_item(item, i)?);
        }
    }

    // "source" and "summary" blocks from the internal app format, plus
    // anything else unrecognized, survive as pass-through extras.
    doc.extra = into_extra(obj);
    Ok(doc)
}

fn convert_legacy_item(value: Value, index: usize) -> Result<Item> {
    let context = format!("items[{index}]");
    let Value::Object(mut obj) = value else {
        return Err(ConversionError::UnmappableField {
            field: context,
            reason: "expected an object".to_string(),
        }
        .into());
    };

    let item_id = take_string(&mut obj, "item_id", &context)?.ok_or_else(|| {
        ConversionError::UnmappableField {
            field: format!("{context}.item_id"),
            reason: "item has no identifier".to_string(),
        }
    })?;
    let mut item = Item::new(item_id);
    item.data_source_id = take_string(&mut obj, "data_source_id", &context)?;
    item.segment_index = obj
        .remove("segment_index")
        .and_then(|v| v.as_u64())
        .map(|v| v as u32);

    item.audio_start_time = take_timestamp(&mut obj, "audio_start_time", &context)?;
    item.audio_end_time = take_timestamp(&mut obj, "audio_end_time", &context)?;
    if let Some(Value::Object(mut timestamps)) = obj.remove("timestamps") {
        if item.audio_start_time.is_none() {
            item.audio_start_time = take_timestamp(&mut timestamps, "start", &context)?;
        }
        if item.audio_end_time.is_none() {
            item.audio_end_time = take_timestamp(&mut timestamps, "end", &context)?;
        }
    }
    if item.audio_start_time.is_none() {
        item.audio_start_time = take_timestamp(&mut obj, "audio_timestamp", &context)?;
    } else {
        obj.remove("audio_timestamp");
    }

    relocate_item_paths(&mut obj, &mut item, &context)?;
    derive_end_time(&mut obj, &mut item, &context)?;

    if let Some(Value::Array(outputs)) = obj.remove("model_outputs") {
        item.model_outputs =
            serde_json::from_value(Value::Array(outputs)).map_err(schema_error_from_serde)?;
    }
    // Internal-format predictions block: scores live under "confidence"
    if let Some(Value::Object(mut predictions)) = obj.remove("predictions") {
        if let Some(Value::Object(confidence)) = predictions.remove("confidence") {
            for (label, score) in confidence {
                if let Some(score) = score.as_f64() {
                    item.model_outputs
                        .push(ModelOutput::new(taxonomy::to_hierarchical(&label), score));
                }
            }
        }
    }

    if let Some(Value::Array(rounds)) = obj.remove("verifications") {
        for (j, round) in rounds.into_iter().enumerate() {
            item.verifications
                .push(convert_legacy_verification(round, j, &context)?);
        }
    }

    // Legacy annotations object: labels become a round-1 verification
    // when no explicit rounds exist
    if let Some(Value::Object(mut annotations)) = obj.remove("annotations") {
        if item.verifications.is_empty() {
            let labels: Vec<LabelDecision> = match annotations.remove("labels") {
                Some(Value::Array(labels)) => labels
                    .iter()
                    .filter_map(Value::as_str)
                    .map(added_decision)
                    .collect(),
                _ => Vec::new(),
            };
            if !labels.is_empty() {
                let verified_by =
                    take_string(&mut annotations, "annotated_by", &context)?;
                let verified_at =
                    take_timestamp(&mut annotations, "annotated_at", &context)?;
                let notes = take_string(&mut annotations, "notes", &context)?;
                let verified = annotations
                    .remove("verified")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                item.verifications.push(imported_round(
                    labels,
                    verified_by,
                    verified_at,
                    notes,
                    verified,
                ));
            }
        }
    }

    item.extra = into_extra(obj);
    Ok(item)
}

fn convert_legacy_verification(value: Value, index: usize, context: &str) -> Result<Verification> {
    let round_context = format!("{context}.verifications[{index}]");
    let Value::Object(mut obj) = value else {
        return Err(ConversionError::UnmappableField {
            field: round_context,
            reason: "expected an object".to_string(),
        }
        .into());
    };

    if !obj.contains_key("verification_round") {
        obj.insert(
            "verification_round".to_string(),
            Value::from(index as u64 + 1),
        );
    }

    if obj.contains_key("label_decisions") {
        return serde_json::from_value(Value::Object(obj)).map_err(schema_error_from_serde);
    }

    // Oldest rounds recorded a bare "labels" list
    let decisions: Vec<LabelDecision> = match obj.remove("labels") {
        Some(Value::Array(labels)) => labels
            .iter()
            .filter_map(Value::as_str)
            .map(added_decision)
            .collect(),
        _ => {
            return Err(ConversionError::UnmappableField {
                field: format!("{round_context}.label_decisions"),
                reason: "verification has neither label_decisions nor labels".to_string(),
            }
            .into())
        }
    };
    let verified_by = take_string(&mut obj, "verified_by", &round_context)?;
    let verified_at = take_timestamp(&mut obj, "verified_at", &round_context)?;
    let notes = take_string(&mut obj, "notes", &round_context)?;
    let mut round = imported_round(decisions, verified_by, verified_at, notes, false);
    round.verification_round = obj
        .get("verification_round")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(index as u32 + 1);
    Ok(round)
}

// ----------------------------------------------------------------------------
// Shared relocation helpers
// ----------------------------------------------------------------------------

fn take_model(obj: &mut Map<String, Value>) -> Result<Option<ModelInfo>> {
    match obj.remove("model") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(model)) if model.is_empty() => Ok(None),
        Some(Value::Object(model)) => {
            if !model.contains_key("model_id") {
                return Err(ConversionError::UnmappableField {
                    field: "model.model_id".to_string(),
                    reason: "legacy model block lacks a model identifier".to_string(),
                }
                .into());
            }
            Ok(Some(
                serde_json::from_value(Value::Object(model)).map_err(schema_error_from_serde)?,
            ))
        }
        Some(other) => Err(ConversionError::UnmappableField {
            field: "model".to_string(),
            reason: format!("expected an object, got {other}"),
        }
        .into()),
    }
}

/// Singular pre-2.0 `data_source` object into a one-element source list.
/// Items bind to it implicitly via the single-source shortcut.
fn take_singular_data_source(obj: &mut Map<String, Value>) -> Result<Option<DataSource>> {
    let Some(Value::Object(mut source)) = obj.remove("data_source") else {
        return Ok(None);
    };
    if source.is_empty() {
        return Ok(None);
    }

    let device_code = take_string(&mut source, "device_code", "data_source")?
        .or(take_string(&mut source, "hydrophone", "data_source")?);
    let data_source_id = take_string(&mut source, "data_source_id", "data_source")?;
    let (data_source_id, device_code) = match (data_source_id, device_code) {
        (Some(id), Some(code)) => (id, code),
        (None, Some(code)) => (code.clone(), code),
        (Some(id), None) => (id.clone(), id),
        (None, None) => {
            return Err(ConversionError::UnmappableField {
                field: "data_source.device_code".to_string(),
                reason: "legacy data_source names no device".to_string(),
            }
            .into())
        }
    };

    let mut converted = DataSource::new(data_source_id, device_code);
    converted.location_name = take_string(&mut source, "location_name", "data_source")?
        .or(take_string(&mut source, "location", "data_source")?);
    converted.date_from = take_timestamp(&mut source, "date_from", "data_source")?;
    converted.date_to = take_timestamp(&mut source, "date_to", "data_source")?;
    converted.sample_rate = take_f64(&mut source, "sample_rate", "data_source")?;
    converted.extra = into_extra(source);
    Ok(Some(converted))
}

/// Relocate item-level legacy path fields into the `paths` block
fn relocate_item_paths(
    obj: &mut Map<String, Value>,
    item: &mut Item,
    context: &str,
) -> Result<()> {
    let mut paths = match obj.remove("paths") {
        Some(Value::Object(paths)) => {
            serde_json::from_value::<ItemPaths>(Value::Object(paths))
                .map_err(schema_error_from_serde)?
        }
        _ => ItemPaths::default(),
    };

    if paths.spectrogram_mat_path.is_none() {
        paths.spectrogram_mat_path = take_string(obj, "mat_path", context)?;
    } else {
        obj.remove("mat_path");
    }
    if paths.spectrogram_png_path.is_none() {
        paths.spectrogram_png_path = take_string(obj, "spectrogram_path", context)?;
    } else {
        obj.remove("spectrogram_path");
    }
    if paths.audio_path.is_none() {
        paths.audio_path = take_string(obj, "audio_path", context)?
            .or(take_string(obj, "audio_file", context)?);
    } else {
        obj.remove("audio_path");
        obj.remove("audio_file");
    }

    if !paths.is_empty() {
        item.paths = Some(paths);
    }
    Ok(())
}

/// Derive `audio_end_time` from a legacy `duration_sec` when possible.
///
/// The derivation `end = start + duration_sec` is a documented assumption,
/// not a stated contract of the legacy format; when the start time itself
/// is missing the duration is kept as a pass-through extra and flagged.
fn derive_end_time(obj: &mut Map<String, Value>, item: &mut Item, context: &str) -> Result<()> {
    let Some(duration) = obj.get("duration_sec").and_then(Value::as_f64) else {
        return Ok(());
    };
    if item.audio_end_time.is_some() {
        obj.remove("duration_sec");
        return Ok(());
    }
    match item.audio_start_time {
        Some(start) => {
            let millis = (duration * 1000.0).round() as i64;
            item.audio_end_time = Some(start + chrono::Duration::milliseconds(millis));
            obj.remove("duration_sec");
        }
        None => {
            warn!(
                item_id = %item.item_id,
                context = context,
                "duration_sec present but no start time; cannot derive audio_end_time"
            );
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

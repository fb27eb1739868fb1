//! Semantic validation of unified documents
//!
//! Shape checking lives in [`crate::document`]; this module enforces the
//! invariants a well-formed JSON document can still break: referential
//! integrity between items and data sources, time ordering, score bounds,
//! verification round monotonicity, and decision consistency against the
//! item's model outputs. Validation is all-or-nothing: the first violation
//! is returned with its field path and nothing is mutated.
//!
//! The taxonomy is injected explicitly. With a snapshot attached, every
//! label in the document must resolve in the tree; without one, label
//! strings are treated as opaque.

use std::collections::HashSet;

use tracing::debug;

use crate::document::{Decision, Document, Item};
use crate::error::{ReferenceError, Result, SchemaError, ValidationError};
use crate::taxonomy::Taxonomy;

/// Document validator; the acceptance gate for inference pipeline output
/// before a document is considered well-formed for review.
#[derive(Debug, Default)]
pub struct Validator<'a> {
    taxonomy: Option<&'a Taxonomy>,
}

impl<'a> Validator<'a> {
    /// Validator without a taxonomy; labels are not resolved
    pub fn new() -> Self {
        Validator { taxonomy: None }
    }

    /// Validator that additionally resolves every label against a
    /// read-only taxonomy snapshot
    pub fn with_taxonomy(taxonomy: &'a Taxonomy) -> Self {
        Validator {
            taxonomy: Some(taxonomy),
        }
    }

    /// Check every invariant; `Ok(())` means the document is accepted whole
    pub fn validate(&self, doc: &Document) -> Result<()> {
        self.check_profile_requirements(doc)?;
        self.check_data_sources(doc)?;
        self.check_items(doc)?;
        debug!(
            items = doc.items.len(),
            data_sources = doc.data_sources.as_deref().map_or(0, |s| s.len()),
            taxonomy = self.taxonomy.is_some(),
            "document validated"
        );
        Ok(())
    }

    /// Predictions profile requires model, data sources and per-item scores
    fn check_profile_requirements(&self, doc: &Document) -> Result<()> {
        // Labels-only documents have nothing to require here
        let Some(model) = doc.model.as_ref() else {
            return Ok(());
        };
        if model.model_id.is_empty() {
            return Err(SchemaError::MissingRequiredField {
                path: "model.model_id".to_string(),
            }
            .into());
        }
        if doc.data_sources.as_deref().unwrap_or_default().is_empty() {
            return Err(SchemaError::MissingRequiredField {
                path: "data_sources".to_string(),
            }
            .into());
        }
        for (i, item) in doc.items.iter().enumerate() {
            if item.model_outputs.is_empty() {
                return Err(SchemaError::MissingRequiredField {
                    path: format!("items[{i}].model_outputs"),
                }
                .into());
            }
        }
        if let Some(classes) = model.output_classes.as_deref() {
            for (i, class) in classes.iter().enumerate() {
                self.check_label(class, &format!("model.output_classes[{i}]"))?;
            }
        }
        Ok(())
    }

    fn check_data_sources(&self, doc: &Document) -> Result<()> {
        let mut seen = HashSet::new();
        for source in doc.data_sources.as_deref().unwrap_or_default() {
            if !seen.insert(source.data_source_id.as_str()) {
                return Err(ReferenceError::DuplicateDataSourceId {
                    data_source_id: source.data_source_id.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn check_items(&self, doc: &Document) -> Result<()> {
        let sources = doc.data_sources.as_deref().unwrap_or_default();
        let source_count = sources.len();

        let mut seen_items = HashSet::new();
        for (i, item) in doc.items.iter().enumerate() {
            if !seen_items.insert(item.item_id.as_str()) {
                return Err(ValidationError::DuplicateItemId {
                    item_id: item.item_id.clone(),
                }
                .into());
            }

            match item.data_source_id.as_deref() {
                Some(id) => {
                    if doc.data_source(id).is_none() {
                        return Err(ReferenceError::DanglingDataSourceId {
                            item_id: item.item_id.clone(),
                            data_source_id: id.to_string(),
                        }
                        .into());
                    }
                }
                // Single-source shortcut: an omitted FK binds implicitly
                // when exactly one source exists.
                None if source_count > 1 => {
                    return Err(ReferenceError::AmbiguousDataSource {
                        item_id: item.item_id.clone(),
                        count: source_count,
                    }
                    .into());
                }
                None => {}
            }

            if let (Some(start), Some(end)) = (item.audio_start_time, item.audio_end_time) {
                if end <= start {
                    return Err(ValidationError::InvalidTimeRange {
                        path: format!("items[{i}].audio_end_time"),
                        start: start.to_rfc3339(),
                        end: end.to_rfc3339(),
                    }
                    .into());
                }
            }

            self.check_model_outputs(item, i)?;
            self.check_verifications(item, i)?;
        }
        Ok(())
    }

    fn check_model_outputs(&self, item: &Item, i: usize) -> Result<()> {
        let mut seen_classes = HashSet::new();
        for (j, output) in item.model_outputs.iter().enumerate() {
            if !(0.0..=1.0).contains(&output.score) {
                return Err(ValidationError::ScoreOutOfRange {
                    path: format!("items[{i}].model_outputs[{j}].score"),
                    value: output.score,
                }
                .into());
            }
            if !seen_classes.insert(output.class_hierarchy.as_str()) {
                return Err(ValidationError::DuplicateModelOutput {
                    path: format!("items[{i}].model_outputs[{j}]"),
                    class_hierarchy: output.class_hierarchy.clone(),
                }
                .into());
            }
            self.check_label(
                &output.class_hierarchy,
                &format!("items[{i}].model_outputs[{j}].class_hierarchy"),
            )?;
        }
        Ok(())
    }

    fn check_verifications(&self, item: &Item, i: usize) -> Result<()> {
        let mut expected_round = 1u32;
        for (j, verification) in item.verifications.iter().enumerate() {
            if verification.verification_round != expected_round {
                return Err(ValidationError::NonMonotonicRound {
                    path: format!("items[{i}].verifications[{j}].verification_round"),
                    expected: expected_round,
                    found: verification.verification_round,
                }
                .into());
            }
            expected_round += 1;

            if verification.label_decisions.is_empty() {
                return Err(SchemaError::MissingRequiredField {
                    path: format!("items[{i}].verifications[{j}].label_decisions"),
                }
                .into());
            }

            for (l, decision) in verification.label_decisions.iter().enumerate() {
                let path = format!("items[{i}].verifications[{j}].label_decisions[{l}]");
                match decision.threshold_used {
                    Some(threshold) if !(0.0..=1.0).contains(&threshold) => {
                        return Err(ValidationError::ScoreOutOfRange {
                            path: format!("{path}.threshold_used"),
                            value: threshold,
                        }
                        .into());
                    }
                    None if decision.decision != Decision::Added => {
                        return Err(ValidationError::InvalidNullThreshold { path }.into());
                    }
                    _ => {}
                }

                // A reviewer cannot accept or reject a label the model
                // never scored; added labels are exempt.
                if decision.decision != Decision::Added
                    && item.score_for(&decision.label).is_none()
                {
                    return Err(ValidationError::DecisionWithoutModelOutput {
                        path,
                        label: decision.label.clone(),
                        decision: decision.decision.as_str().to_string(),
                    }
                    .into());
                }

                self.check_label(&decision.label, &format!("{path}.label"))?;
            }
        }
        Ok(())
    }

    fn check_label(&self, label: &str, path: &str) -> Result<()> {
        if let Some(taxonomy) = self.taxonomy {
            if !taxonomy.contains(label) {
                return Err(ValidationError::LabelNotInTaxonomy {
                    path: path.to_string(),
                    label: label.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{
        DataSource, Document, Item, LabelDecision, ModelInfo, ModelOutput, TaskType, Verification,
    };
    use crate::error::Error;
    use crate::time;

    const FIN_WHALE: &str = "Biophony > Marine mammal > Cetacean > Baleen whale > Fin whale";

    fn labels_doc_with_item(item: Item) -> Document {
        let mut doc = Document::new(TaskType::Classification);
        doc.add_item(item);
        doc
    }

    fn predictions_doc() -> Document {
        let mut doc = Document::new(TaskType::WhaleDetection);
        doc.set_model(ModelInfo::new("sha256-abc"));
        doc.add_data_source(DataSource::new("X", "ICLISTENHF1353"));
        let mut item = Item::new("seg_000");
        item.model_outputs.push(ModelOutput::new(FIN_WHALE, 0.87));
        doc.add_item(item);
        doc
    }

    fn round(n: u32, decisions: Vec<LabelDecision>) -> Verification {
        Verification::new(time::now(), "reviewer@onc.ca", n, decisions)
    }

    #[test]
    fn test_valid_predictions_document() {
        let mut doc = predictions_doc();
        doc.items[0].verifications.push(round(
            1,
            vec![LabelDecision::new(FIN_WHALE, Decision::Accepted, Some(0.5))],
        ));
        Validator::new().validate(&doc).unwrap();
    }

    #[test]
    fn test_single_source_shortcut_resolves() {
        // One data source, item omits the FK: binds implicitly
        let doc = predictions_doc();
        assert!(doc.items[0].data_source_id.is_none());
        Validator::new().validate(&doc).unwrap();
    }

    #[test]
    fn test_ambiguous_data_source() {
        let mut doc = predictions_doc();
        doc.add_data_source(DataSource::new("Y", "ICLISTENHF1252"));
        let err = Validator::new().validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            Error::Reference(ReferenceError::AmbiguousDataSource { ref item_id, count: 2 })
                if item_id == "seg_000"
        ));
    }

    #[test]
    fn test_dangling_data_source_id() {
        let mut doc = predictions_doc();
        doc.items[0].data_source_id = Some("MISSING".to_string());
        let err = Validator::new().validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            Error::Reference(ReferenceError::DanglingDataSourceId { ref data_source_id, .. })
                if data_source_id == "MISSING"
        ));
    }

    #[test]
    fn test_duplicate_data_source_id() {
        let mut doc = predictions_doc();
        doc.add_data_source(DataSource::new("X", "OTHERDEVICE"));
        doc.items[0].data_source_id = Some("X".to_string());
        let err = Validator::new().validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            Error::Reference(ReferenceError::DuplicateDataSourceId { .. })
        ));
    }

    #[test]
    fn test_duplicate_item_id() {
        let mut doc = predictions_doc();
        let mut dup = Item::new("seg_000");
        dup.model_outputs.push(ModelOutput::new(FIN_WHALE, 0.1));
        doc.add_item(dup);
        let err = Validator::new().validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::DuplicateItemId { .. })
        ));
    }

    #[test]
    fn test_invalid_time_range() {
        let mut doc = predictions_doc();
        let start = time::parse_timestamp("2019-06-30T00:05:38Z").unwrap();
        let end = time::parse_timestamp("2019-06-30T00:04:58Z").unwrap();
        doc.items[0].audio_start_time = Some(start);
        doc.items[0].audio_end_time = Some(end);
        let err = Validator::new().validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidTimeRange { .. })
        ));
    }

    #[test]
    fn test_equal_times_rejected() {
        let mut doc = predictions_doc();
        let t = time::parse_timestamp("2019-06-30T00:04:58Z").unwrap();
        doc.items[0].audio_start_time = Some(t);
        doc.items[0].audio_end_time = Some(t);
        assert!(Validator::new().validate(&doc).is_err());
    }

    #[test]
    fn test_score_out_of_range() {
        let mut doc = predictions_doc();
        doc.items[0].model_outputs[0].score = 1.2;
        let err = Validator::new().validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::ScoreOutOfRange { ref path, .. })
                if path == "items[0].model_outputs[0].score"
        ));
    }

    #[test]
    fn test_duplicate_model_output() {
        let mut doc = predictions_doc();
        doc.items[0].model_outputs.push(ModelOutput::new(FIN_WHALE, 0.2));
        let err = Validator::new().validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::DuplicateModelOutput { .. })
        ));
    }

    #[test]
    fn test_non_monotonic_round() {
        let mut doc = predictions_doc();
        doc.items[0].verifications.push(round(
            2,
            vec![LabelDecision::new(FIN_WHALE, Decision::Accepted, Some(0.5))],
        ));
        let err = Validator::new().validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::NonMonotonicRound { expected: 1, found: 2, .. })
        ));
    }

    #[test]
    fn test_empty_label_decisions_rejected() {
        let mut doc = predictions_doc();
        doc.items[0].verifications.push(round(1, vec![]));
        let err = Validator::new().validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::MissingRequiredField { ref path })
                if path == "items[0].verifications[0].label_decisions"
        ));
    }

    #[test]
    fn test_decision_without_model_output() {
        let mut doc = predictions_doc();
        doc.items[0].verifications.push(round(
            1,
            vec![LabelDecision::new(
                "Anthropophony > Vessel",
                Decision::Accepted,
                Some(0.5),
            )],
        ));
        let err = Validator::new().validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::DecisionWithoutModelOutput { ref label, .. })
                if label == "Anthropophony > Vessel"
        ));
    }

    #[test]
    fn test_added_decision_exempt_from_model_output_match() {
        // Manual-labeling profile: no model outputs, added labels only
        let mut item = Item::new("file1");
        item.verifications.push(round(
            1,
            vec![LabelDecision::new(
                "Instrumentation",
                Decision::Added,
                None,
            )],
        ));
        let doc = labels_doc_with_item(item);
        Validator::new().validate(&doc).unwrap();
    }

    #[test]
    fn test_null_threshold_only_for_added() {
        let mut doc = predictions_doc();
        doc.items[0].verifications.push(round(
            1,
            vec![LabelDecision::new(FIN_WHALE, Decision::Accepted, None)],
        ));
        let err = Validator::new().validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidNullThreshold { .. })
        ));
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut doc = predictions_doc();
        doc.items[0].verifications.push(round(
            1,
            vec![LabelDecision::new(FIN_WHALE, Decision::Accepted, Some(1.5))],
        ));
        let err = Validator::new().validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::ScoreOutOfRange { ref path, value })
                if path.ends_with("threshold_used") && value == 1.5
        ));
    }

    #[test]
    fn test_predictions_profile_requires_data_sources() {
        let mut doc = predictions_doc();
        doc.data_sources = None;
        let err = Validator::new().validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::MissingRequiredField { ref path }) if path == "data_sources"
        ));
    }

    #[test]
    fn test_predictions_profile_requires_item_outputs() {
        let mut doc = predictions_doc();
        doc.add_item(Item::new("seg_001"));
        let err = Validator::new().validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::MissingRequiredField { ref path })
                if path == "items[1].model_outputs"
        ));
    }

    #[test]
    fn test_taxonomy_rejects_unknown_label() {
        let mut doc = predictions_doc();
        doc.items[0].model_outputs[0].class_hierarchy = "Biophony > Kraken".to_string();
        let taxonomy = Taxonomy::builtin();
        let err = Validator::with_taxonomy(taxonomy).validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::LabelNotInTaxonomy { ref label, .. })
                if label == "Biophony > Kraken"
        ));
    }

    #[test]
    fn test_taxonomy_accepts_known_labels() {
        let mut doc = predictions_doc();
        doc.items[0].verifications.push(round(
            1,
            vec![LabelDecision::new(FIN_WHALE, Decision::Accepted, Some(0.5))],
        ));
        Validator::with_taxonomy(Taxonomy::builtin())
            .validate(&doc)
            .unwrap();
    }

    #[test]
    fn test_labels_profile_without_sources_is_valid() {
        let mut item = Item::new("file1");
        item.verifications.push(round(
            1,
            vec![LabelDecision::new(
                "Anthropophony > Vessel",
                Decision::Added,
                None,
            )],
        ));
        let doc = labels_doc_with_item(item);
        Validator::with_taxonomy(Taxonomy::builtin())
            .validate(&doc)
            .unwrap();
    }
}

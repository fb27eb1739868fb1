//! End-to-end tests for the unified document workflow:
//! parse -> validate -> review (ledger) -> persist -> reload.

use hydrolabel_schema::{
    convert_to_unified, current_labels, document::ConfidenceLevel, ledger, ConvertOptions,
    DataSource, Decision, Document, DocumentStore, Error, Item, LabelDecision, ModelInfo,
    ModelOutput, ParseMode, Profile, ReferenceError, TaskType, Taxonomy, ValidationError,
    Validator, Verification,
};
use serde_json::json;
use tempfile::TempDir;

const FIN_WHALE: &str = "Biophony > Marine mammal > Cetacean > Baleen whale > Fin whale";

fn predictions_document() -> Document {
    let mut doc = Document::new(TaskType::WhaleDetection);
    doc.set_model(ModelInfo::new(ModelInfo::id_for_weights(b"model-weights")));
    let mut source = DataSource::new("ICLISTENHF1353_CLAYO_2019", "ICLISTENHF1353");
    source.location_name = Some("Clayoquot Slope".to_string());
    doc.add_data_source(source);

    let mut item = Item::new("ICLISTENHF1353_20190630T000458Z_seg000");
    item.audio_start_time = Some(hydrolabel_schema::time::parse_timestamp("2019-06-30T00:04:58Z").unwrap());
    item.audio_end_time = Some(hydrolabel_schema::time::parse_timestamp("2019-06-30T00:05:38Z").unwrap());
    item.model_outputs.push(ModelOutput::new(FIN_WHALE, 0.87));
    doc.add_item(item);
    doc
}

#[test]
fn accepted_score_becomes_current_label() {
    let mut doc = predictions_document();
    Validator::with_taxonomy(Taxonomy::builtin())
        .validate(&doc)
        .unwrap();

    let item = doc.item_mut("ICLISTENHF1353_20190630T000458Z_seg000").unwrap();
    let mut round = Verification::new(
        hydrolabel_schema::time::now(),
        "expert@onc.ca",
        ledger::next_round(item),
        vec![LabelDecision::new(FIN_WHALE, Decision::Accepted, Some(0.5))],
    );
    round.confidence = Some(ConfidenceLevel::High);
    ledger::append_round(item, round).unwrap();

    Validator::with_taxonomy(Taxonomy::builtin())
        .validate(&doc)
        .unwrap();
    let item = doc.item("ICLISTENHF1353_20190630T000458Z_seg000").unwrap();
    let labels = current_labels(item);
    assert_eq!(labels.into_iter().collect::<Vec<_>>(), vec![FIN_WHALE.to_string()]);
}

#[test]
fn manual_label_without_model_output_is_valid() {
    let mut doc = Document::new(TaskType::Classification);
    let mut item = Item::new("file1");
    item.verifications.push(Verification::new(
        hydrolabel_schema::time::now(),
        "expert@onc.ca",
        1,
        vec![LabelDecision::new("Instrumentation", Decision::Added, None)],
    ));
    doc.add_item(item);

    assert_eq!(doc.profile(), Profile::Labels);
    Validator::new().validate(&doc).unwrap();
    assert_eq!(
        current_labels(doc.item("file1").unwrap())
            .into_iter()
            .collect::<Vec<_>>(),
        vec!["Instrumentation".to_string()]
    );
}

#[test]
fn single_source_shortcut_and_ambiguity() {
    // One declared source: an item without the FK resolves implicitly
    let doc = predictions_document();
    Validator::new().validate(&doc).unwrap();

    // A second source makes the omission ambiguous
    let mut doc = doc;
    doc.add_data_source(DataSource::new("OTHER_2020", "ICLISTENHF1252"));
    let err = Validator::new().validate(&doc).unwrap_err();
    assert!(matches!(
        err,
        Error::Reference(ReferenceError::AmbiguousDataSource { .. })
    ));
}

#[test]
fn dangling_foreign_key_is_rejected() {
    let mut doc = predictions_document();
    doc.items[0].data_source_id = Some("NOT_DECLARED".to_string());
    let err = Validator::new().validate(&doc).unwrap_err();
    assert!(matches!(
        err,
        Error::Reference(ReferenceError::DanglingDataSourceId { ref data_source_id, .. })
            if data_source_id == "NOT_DECLARED"
    ));
}

#[test]
fn round_numbers_must_advance_by_one() {
    let mut doc = predictions_document();
    let item = doc.item_mut("ICLISTENHF1353_20190630T000458Z_seg000").unwrap();
    ledger::append_round(
        item,
        Verification::new(
            hydrolabel_schema::time::now(),
            "expert@onc.ca",
            1,
            vec![LabelDecision::new(FIN_WHALE, Decision::Accepted, Some(0.5))],
        ),
    )
    .unwrap();

    // Existing max round is 1: round 3 is rejected, it must be exactly 2
    let err = ledger::append_round(
        item,
        Verification::new(
            hydrolabel_schema::time::now(),
            "expert@onc.ca",
            3,
            vec![LabelDecision::new(FIN_WHALE, Decision::Rejected, Some(0.5))],
        ),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::DuplicateRound { round: 3, expected: 2, .. })
    ));
}

#[test]
fn full_document_survives_disk_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::open(dir.path().join("predictions.json"));

    let mut doc = predictions_document();
    store.save(&mut doc).unwrap();
    let loaded = store.load(ParseMode::Strict).unwrap();
    assert_eq!(loaded, doc);

    // Review through the locked read-modify-write cycle
    store
        .modify(ParseMode::Strict, |doc| {
            let item = doc
                .item_mut("ICLISTENHF1353_20190630T000458Z_seg000")
                .ok_or_else(|| Error::NotFound("item".to_string()))?;
            ledger::append_round(
                item,
                Verification::new(
                    hydrolabel_schema::time::now(),
                    "expert@onc.ca",
                    ledger::next_round(item),
                    vec![LabelDecision::new(FIN_WHALE, Decision::Accepted, Some(0.5))],
                ),
            )
        })
        .unwrap();

    let reviewed = store.load(ParseMode::Strict).unwrap();
    assert_eq!(reviewed.items[0].verifications.len(), 1);
    assert!(reviewed.updated_at.unwrap() >= reviewed.created_at.unwrap());

    let summary = ledger::summarize(&reviewed);
    assert_eq!(summary.total_items, 1);
    assert_eq!(summary.verified, 1);
    assert_eq!(summary.unverified, 0);
}

#[test]
fn legacy_flat_map_imports_and_validates() {
    let raw = json!({"file1.mat": ["Vessel"]});
    let doc = convert_to_unified(raw, &ConvertOptions::default()).unwrap();
    Validator::with_taxonomy(Taxonomy::builtin())
        .validate(&doc)
        .unwrap();

    assert_eq!(doc.items.len(), 1);
    let item = &doc.items[0];
    assert_eq!(item.item_id, "file1");
    assert_eq!(item.verifications.len(), 1);
    assert_eq!(item.verifications[0].verification_round, 1);
    let decision = &item.verifications[0].label_decisions[0];
    assert_eq!(decision.decision, Decision::Added);
    assert_eq!(decision.threshold_used, None);
}

#[test]
fn converted_legacy_document_is_reviewable() {
    // Import a legacy file, persist it, then run a second review round
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::open(dir.path().join("imported.json"));

    let raw = json!({"file1.mat": ["Rain"]});
    let mut doc = convert_to_unified(raw, &ConvertOptions::default()).unwrap();
    store.save(&mut doc).unwrap();

    store
        .modify(ParseMode::Lenient, |doc| {
            let item = doc
                .item_mut("file1")
                .ok_or_else(|| Error::NotFound("item".to_string()))?;
            ledger::append_round(
                item,
                Verification::new(
                    hydrolabel_schema::time::now(),
                    "second-reviewer@onc.ca",
                    ledger::next_round(item),
                    vec![LabelDecision::new(
                        "Other > Unknown sound of interest",
                        Decision::Added,
                        None,
                    )],
                ),
            )
        })
        .unwrap();

    let reloaded = store.load(ParseMode::Strict).unwrap();
    let item = reloaded.item("file1").unwrap();
    assert_eq!(item.verifications.len(), 2);
    // Last round fully replaces the first
    assert_eq!(
        current_labels(item).into_iter().collect::<Vec<_>>(),
        vec!["Other > Unknown sound of interest".to_string()]
    );

    let changes = ledger::diff_rounds(item, 1, 2).unwrap();
    assert_eq!(changes.len(), 2);
}

#[test]
fn serialized_documents_omit_unset_fields() {
    let mut doc = Document::new(TaskType::Classification);
    doc.add_item(Item::new("file1"));
    let value = doc.to_json_value().unwrap();

    let root = value.as_object().unwrap();
    assert!(!root.contains_key("model"));
    assert!(!root.contains_key("spectrogram_config"));
    assert!(!root.contains_key("pipeline"));
    let item = value["items"][0].as_object().unwrap();
    assert!(!item.contains_key("data_source_id"));
    assert!(!item.contains_key("audio_start_time"));
    assert!(!item.contains_key("paths"));
    assert!(!item.contains_key("model_outputs"));
    // verifications is always materialized, even when empty
    assert_eq!(value["items"][0]["verifications"], json!([]));
}

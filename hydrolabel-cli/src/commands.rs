//! Subcommand implementations

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use hydrolabel_schema::document::{ConfidenceLevel, VerificationStatus};
use hydrolabel_schema::{
    convert_to_unified, current_labels, ledger, ConvertOptions, Decision, Document, DocumentStore,
    Item, LabelDecision, ParseMode, TaskType, Taxonomy, Validator, Verification,
};

use crate::{ConvertArgs, DiffArgs, LabelsArgs, SummaryArgs, ValidateArgs, VerifyArgs};

pub fn validate(args: ValidateArgs) -> Result<()> {
    let mode = if args.lenient {
        ParseMode::Lenient
    } else {
        ParseMode::Strict
    };
    let doc = read_document(&args.file, mode)?;

    let custom_taxonomy = args
        .taxonomy
        .as_deref()
        .map(load_taxonomy)
        .transpose()?;
    let result = if args.skip_labels {
        Validator::new().validate(&doc)
    } else {
        let taxonomy = custom_taxonomy.as_ref().unwrap_or_else(|| Taxonomy::builtin());
        Validator::with_taxonomy(taxonomy).validate(&doc)
    };
    result.with_context(|| format!("validation failed for {}", args.file.display()))?;

    println!(
        "{}: valid ({:?} profile, {} items)",
        args.file.display(),
        doc.profile(),
        doc.items.len()
    );
    Ok(())
}

pub fn convert(args: ConvertArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.input)
        .with_context(|| format!("cannot read {}", args.input.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", args.input.display()))?;

    let opts = ConvertOptions {
        mat_folder: args.mat_folder,
        image_folder: args.image_folder,
        device_code: args.device_code,
        task_type: args.task_type.as_deref().map(parse_task_type).transpose()?,
        labeled_by: args.labeled_by,
    };
    let mut doc = convert_to_unified(value, &opts)
        .with_context(|| format!("cannot convert {}", args.input.display()))?;
    Validator::new()
        .validate(&doc)
        .context("converted document failed validation")?;

    let store = DocumentStore::open(&args.output);
    store.save(&mut doc)?;
    info!(
        input = %args.input.display(),
        output = %args.output.display(),
        items = doc.items.len(),
        "conversion complete"
    );
    println!(
        "converted {} -> {} ({} items)",
        args.input.display(),
        args.output.display(),
        doc.items.len()
    );
    Ok(())
}

pub fn summary(args: SummaryArgs) -> Result<()> {
    let doc = read_document(&args.file, ParseMode::Lenient)?;
    let summary = ledger::summarize(&doc);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

pub fn labels(args: LabelsArgs) -> Result<()> {
    let doc = read_document(&args.file, ParseMode::Lenient)?;
    let items: Vec<&Item> = match &args.item {
        Some(item_id) => {
            let item = doc
                .item(item_id)
                .with_context(|| format!("no item `{item_id}` in {}", args.file.display()))?;
            vec![item]
        }
        None => doc.items.iter().collect(),
    };

    for item in items {
        let labels = current_labels(item);
        if labels.is_empty() {
            println!("{}: (unreviewed)", item.item_id);
        } else {
            for label in labels {
                println!("{}: {label}", item.item_id);
            }
        }
    }
    Ok(())
}

pub fn verify(args: VerifyArgs) -> Result<()> {
    if args.accept.is_empty() && args.reject.is_empty() && args.add.is_empty() {
        bail!("nothing to record: pass at least one --accept/--reject/--add label");
    }
    if (!args.accept.is_empty() || !args.reject.is_empty()) && args.threshold.is_none() {
        bail!("--threshold is required when accepting or rejecting labels");
    }

    let mut decisions = Vec::new();
    for label in &args.accept {
        decisions.push(LabelDecision::new(label, Decision::Accepted, args.threshold));
    }
    for label in &args.reject {
        decisions.push(LabelDecision::new(label, Decision::Rejected, args.threshold));
    }
    for label in &args.add {
        decisions.push(LabelDecision::new(label, Decision::Added, None));
    }

    let status = args.status.as_deref().map(parse_status).transpose()?;
    let confidence = args.confidence.as_deref().map(parse_confidence).transpose()?;

    let store = DocumentStore::open(&args.file);
    let round_number = store.modify(ParseMode::Lenient, |doc| {
        let item = doc.item_mut(&args.item).ok_or_else(|| {
            hydrolabel_schema::Error::NotFound(format!("item `{}`", args.item))
        })?;
        let mut round = Verification::new(
            hydrolabel_schema::time::now(),
            args.reviewer.clone(),
            ledger::next_round(item),
            decisions.clone(),
        );
        round.verification_status = status;
        round.confidence = confidence;
        round.notes = args.notes.clone().filter(|n| !n.is_empty());
        round.reviewer_affiliation = args.affiliation.clone();
        let number = round.verification_round;
        ledger::append_round(item, round)?;
        Ok(number)
    })?;

    println!(
        "recorded round {round_number} for item {} in {}",
        args.item,
        args.file.display()
    );
    Ok(())
}

pub fn diff(args: DiffArgs) -> Result<()> {
    let doc = read_document(&args.file, ParseMode::Lenient)?;
    let item = doc
        .item(&args.item)
        .with_context(|| format!("no item `{}` in {}", args.item, args.file.display()))?;
    let changes = ledger::diff_rounds(item, args.round_a, args.round_b)?;

    if changes.is_empty() {
        println!(
            "no label changes between rounds {} and {}",
            args.round_a, args.round_b
        );
        return Ok(());
    }
    for change in changes {
        let before = change
            .before
            .map_or("-", |d| d.as_str());
        let after = change.after.map_or("-", |d| d.as_str());
        println!("{}: {before} -> {after}", change.label);
    }
    Ok(())
}

fn read_document(path: &Path, mode: ParseMode) -> Result<Document> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    Document::parse_str(&raw, mode)
        .with_context(|| format!("cannot parse {}", path.display()))
}

fn load_taxonomy(path: &Path) -> Result<Taxonomy> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    Taxonomy::from_json_str(&raw)
        .with_context(|| format!("cannot parse taxonomy {}", path.display()))
}

fn parse_task_type(s: &str) -> Result<TaskType> {
    match s {
        "whale_detection" => Ok(TaskType::WhaleDetection),
        "anomaly_detection" => Ok(TaskType::AnomalyDetection),
        "classification" => Ok(TaskType::Classification),
        other => bail!(
            "unknown task type `{other}` (expected whale_detection, anomaly_detection or classification)"
        ),
    }
}

fn parse_status(s: &str) -> Result<VerificationStatus> {
    match s {
        "verified" => Ok(VerificationStatus::Verified),
        "rejected" => Ok(VerificationStatus::Rejected),
        "uncertain" => Ok(VerificationStatus::Uncertain),
        other => bail!("unknown status `{other}` (expected verified, rejected or uncertain)"),
    }
}

fn parse_confidence(s: &str) -> Result<ConfidenceLevel> {
    match s {
        "high" => Ok(ConfidenceLevel::High),
        "medium" => Ok(ConfidenceLevel::Medium),
        "low" => Ok(ConfidenceLevel::Low),
        other => bail!("unknown confidence `{other}` (expected high, medium or low)"),
    }
}

// ============================================================================
// Tests
// ============================================================================

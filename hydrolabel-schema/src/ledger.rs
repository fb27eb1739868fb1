//! Verification ledger operations
//!
//! An item's `verifications` list is an append-only audit log: rounds are
//! written once and never edited or removed, and the last round is the
//! authoritative current state. A later round fully replaces earlier ones;
//! labels omitted from it do not carry forward.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::document::{Decision, Document, Item, Verification, VerificationStatus};
use crate::error::{Error, Result, SchemaError, ValidationError};

/// Review position of one item, driven by the latest round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    /// No verification rounds recorded
    Unreviewed,
    /// At least one round recorded; status is the latest round's judgement
    Reviewed {
        status: Option<VerificationStatus>,
    },
}

/// One label's movement between two rounds, for audit display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelChange {
    pub label: String,
    /// Decision in the earlier round, if the label appeared there
    pub before: Option<Decision>,
    /// Decision in the later round, if the label appears there
    pub after: Option<Decision>,
}

/// Aggregate counts for one document, as shown in review tooling
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub total_items: usize,
    pub verified: usize,
    pub unverified: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f64>,
}

/// Labels currently standing for an item: the accepted and added labels
/// of the **last** verification round. Earlier rounds are history, not
/// merged. An unreviewed item has no current labels.
pub fn current_labels(item: &Item) -> BTreeSet<String> {
    match item.verifications.last() {
        None => BTreeSet::new(),
        Some(latest) => latest
            .label_decisions
            .iter()
            .filter(|d| matches!(d.decision, Decision::Accepted | Decision::Added))
            .map(|d| d.label.clone())
            .collect(),
    }
}

/// Round number the next verification must carry
pub fn next_round(item: &Item) -> u32 {
    item.verifications
        .iter()
        .map(|v| v.verification_round)
        .max()
        .unwrap_or(0)
        + 1
}

/// Review position of an item
pub fn review_state(item: &Item) -> ReviewState {
    match item.verifications.last() {
        None => ReviewState::Unreviewed,
        Some(latest) => ReviewState::Reviewed {
            status: latest.verification_status,
        },
    }
}

/// Append one verification round to an item.
///
/// The new round's number must be exactly `max(existing) + 1` and its
/// decisions must be coherent with the item's model outputs. On success
/// the round is appended; prior rounds are never touched. Any failure
/// leaves the item unchanged.
pub fn append_round(item: &mut Item, round: Verification) -> Result<()> {
    let expected = next_round(item);
    if round.verification_round != expected {
        return Err(ValidationError::DuplicateRound {
            item_id: item.item_id.clone(),
            round: round.verification_round,
            expected,
        }
        .into());
    }

    if round.label_decisions.is_empty() {
        return Err(SchemaError::MissingRequiredField {
            path: "label_decisions".to_string(),
        }
        .into());
    }

    for (l, decision) in round.label_decisions.iter().enumerate() {
        match decision.threshold_used {
            Some(threshold) if !(0.0..=1.0).contains(&threshold) => {
                return Err(ValidationError::ScoreOutOfRange {
                    path: format!("label_decisions[{l}].threshold_used"),
                    value: threshold,
                }
                .into());
            }
            None if decision.decision != Decision::Added => {
                return Err(ValidationError::InvalidNullThreshold {
                    path: format!("label_decisions[{l}]"),
                }
                .into());
            }
            _ => {}
        }
        if decision.decision != Decision::Added && item.score_for(&decision.label).is_none() {
            return Err(ValidationError::DecisionWithoutModelOutput {
                path: format!("label_decisions[{l}]"),
                label: decision.label.clone(),
                decision: decision.decision.as_str().to_string(),
            }
            .into());
        }
    }

    debug!(
        item_id = %item.item_id,
        round = round.verification_round,
        decisions = round.label_decisions.len(),
        "verification round appended"
    );
    item.verifications.push(round);
    Ok(())
}

/// Pure audit diff between two recorded rounds of one item.
///
/// Returns one entry per label whose decision differs between the rounds,
/// in label order. Fails with `Error::NotFound` when either round number
/// is not recorded on the item.
pub fn diff_rounds(item: &Item, round_a: u32, round_b: u32) -> Result<Vec<LabelChange>> {
    let a = find_round(item, round_a)?;
    let b = find_round(item, round_b)?;

    let before: BTreeMap<&str, Decision> = a
        .label_decisions
        .iter()
        .map(|d| (d.label.as_str(), d.decision))
        .collect();
    let after: BTreeMap<&str, Decision> = b
        .label_decisions
        .iter()
        .map(|d| (d.label.as_str(), d.decision))
        .collect();

    let labels: BTreeSet<&str> = before.keys().chain(after.keys()).copied().collect();
    Ok(labels
        .into_iter()
        .filter_map(|label| {
            let change = LabelChange {
                label: label.to_string(),
                before: before.get(label).copied(),
                after: after.get(label).copied(),
            };
            (change.before != change.after).then_some(change)
        })
        .collect())
}

/// Aggregate review statistics for a document
pub fn summarize(doc: &Document) -> DocumentSummary {
    let total_items = doc.items.len();
    let verified = doc
        .items
        .iter()
        .filter(|i| !i.verifications.is_empty())
        .count();

    let scores: Vec<f64> = doc
        .items
        .iter()
        .flat_map(|i| i.model_outputs.iter().map(|o| o.score))
        .collect();

    let (mean_score, min_score, max_score) = if scores.is_empty() {
        (None, None, None)
    } else {
        let sum: f64 = scores.iter().sum();
        (
            Some(sum / scores.len() as f64),
            scores.iter().copied().fold(f64::INFINITY, f64::min).into(),
            scores
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max)
                .into(),
        )
    };

    DocumentSummary {
        total_items,
        verified,
        unverified: total_items - verified,
        mean_score,
        min_score,
        max_score,
    }
}

fn find_round(item: &Item, round: u32) -> Result<&Verification> {
    item.verifications
        .iter()
        .find(|v| v.verification_round == round)
        .ok_or_else(|| {
            Error::NotFound(format!(
                "item `{}` has no verification round {round}",
                item.item_id
            ))
        })
}

// ============================================================================
// Tests
// ============================================================================

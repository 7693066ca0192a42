//! Offline accuracy evaluation over a labelled reference set.
//!
//! Every query is scored with the same [`rank`] and [`classify`] the live
//! service uses, so numbers reported here describe production behavior.
//!
//! Two modes:
//!
//! - **Leave-one-out**: each record queries all *other* records.
//! - **Hold-out**: records listed in a hold-out file are removed from the
//!   reference set and used as queries against the remainder.

use std::collections::{BTreeMap, HashSet};

use index::EmbeddingIndex;
use matcher::{MatchError, MatchStatus, Thresholds, classify, rank};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationMode {
    LeaveOneOut,
    /// Record ids used as queries and excluded from the reference set.
    Holdout(HashSet<String>),
}

/// Parse a hold-out list: one record id per line, blank lines and `#`
/// comments ignored.
pub fn parse_holdout_ids(text: &str) -> HashSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BuildingAccuracy {
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EvaluationReport {
    pub total: usize,
    pub top_k: usize,
    pub confidence_threshold: f64,
    pub backup_threshold: f64,
    /// Correct predictions that were also `confident`.
    pub correct_confident: usize,
    /// Correct predictions regardless of status.
    pub correct_any: usize,
    /// `correct_confident / total`.
    pub accuracy_confident: f64,
    /// `correct_any / total`.
    pub accuracy_any: f64,
    pub status_counts: BTreeMap<String, usize>,
    pub per_building: BTreeMap<String, BuildingAccuracy>,
}

impl EvaluationReport {
    /// Buildings with at least one wrong prediction, worst first.
    pub fn buildings_with_errors(&self) -> Vec<(&str, &BuildingAccuracy)> {
        let mut worst: Vec<(&str, &BuildingAccuracy)> = self
            .per_building
            .iter()
            .filter(|(_, acc)| acc.correct < acc.total)
            .map(|(id, acc)| (id.as_str(), acc))
            .collect();
        worst.sort_by(|a, b| a.1.accuracy.total_cmp(&b.1.accuracy));
        worst
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 { 0.0 } else { part as f64 / whole as f64 }
}

/// Score every query in `index` under `mode` and aggregate accuracy.
pub fn evaluate(
    index: &EmbeddingIndex,
    mode: &EvaluationMode,
    top_k: usize,
    thresholds: Thresholds,
) -> Result<EvaluationReport, MatchError> {
    if top_k == 0 {
        return Err(MatchError::InvalidConfig("top_k must be at least 1".into()));
    }
    thresholds.validate()?;

    let mut correct_confident = 0;
    let mut correct_any = 0;
    let mut status_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut per_building: BTreeMap<String, BuildingAccuracy> = BTreeMap::new();

    let holdout_split;
    let (queries, reference) = match mode {
        EvaluationMode::LeaveOneOut => (index, index),
        EvaluationMode::Holdout(ids) => {
            let queries = index.filtered(|rec| ids.contains(&rec.id));
            let missing = ids.len().saturating_sub(queries.size());
            if missing > 0 {
                warn!(missing, "hold-out ids not present in the index were skipped");
            }
            holdout_split = (queries, index.filtered(|rec| !ids.contains(&rec.id)));
            (&holdout_split.0, &holdout_split.1)
        }
    };

    for record in queries.records() {
        let matches = match mode {
            EvaluationMode::LeaveOneOut => {
                let mut m = rank(&record.vector, reference, top_k + 1)?;
                if let Some(pos) = m.iter().position(|n| n.id == record.id) {
                    m.remove(pos);
                }
                m.truncate(top_k);
                m
            }
            EvaluationMode::Holdout(_) => rank(&record.vector, reference, top_k)?,
        };
        let result = classify(&matches, thresholds.confidence, thresholds.backup);

        let correct = result.building_id.as_deref() == Some(record.building_id.as_str());
        if correct {
            correct_any += 1;
            if result.status == MatchStatus::Confident {
                correct_confident += 1;
            }
        }
        *status_counts.entry(result.status.to_string()).or_default() += 1;
        let entry = per_building.entry(record.building_id.clone()).or_default();
        entry.total += 1;
        if correct {
            entry.correct += 1;
        }
    }

    for acc in per_building.values_mut() {
        acc.accuracy = ratio(acc.correct, acc.total);
    }

    let total = queries.size();
    let report = EvaluationReport {
        total,
        top_k,
        confidence_threshold: thresholds.confidence,
        backup_threshold: thresholds.backup,
        correct_confident,
        correct_any,
        accuracy_confident: ratio(correct_confident, total),
        accuracy_any: ratio(correct_any, total),
        status_counts,
        per_building,
    };
    info!(
        total,
        accuracy_confident = report.accuracy_confident,
        accuracy_any = report.accuracy_any,
        "evaluation finished"
    );
    Ok(report)
}

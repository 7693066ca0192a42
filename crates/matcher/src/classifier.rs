use serde::{Deserialize, Serialize};

use crate::types::{MatchError, NeighborMatch};

pub const UNCERTAIN_MESSAGE: &str = "Low confidence match - building might be nearby";
pub const NO_MATCH_MESSAGE: &str = "No similar buildings found in database";
pub const NO_NEIGHBORS_MESSAGE: &str = "No similar buildings found";

/// Outcome category of a classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Confident,
    Uncertain,
    NoMatch,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Confident => "confident",
            MatchStatus::Uncertain => "uncertain",
            MatchStatus::NoMatch => "no_match",
        }
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A supporting match as reported to callers, similarity rounded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredMatch {
    pub building_id: String,
    pub similarity: f64,
}

/// Final identification decision for one query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationResult {
    pub status: MatchStatus,
    pub building_id: Option<String>,
    /// Rounded to three decimals, within `[0, 1]`.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Every match that cleared the threshold that decided `status`.
    /// Absent for `no_match`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<ScoredMatch>,
}

impl ClassificationResult {
    fn no_match(message: &str, confidence: f64) -> Self {
        Self {
            status: MatchStatus::NoMatch,
            building_id: None,
            confidence,
            message: Some(message.to_string()),
            matches: Vec::new(),
        }
    }
}

/// Confidence and backup similarity cut-offs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Thresholds {
    #[serde(default = "Thresholds::default_confidence")]
    pub confidence: f64,
    #[serde(default = "Thresholds::default_backup")]
    pub backup: f64,
}

impl Thresholds {
    pub(crate) fn default_confidence() -> f64 {
        0.7
    }

    pub(crate) fn default_backup() -> f64 {
        0.4
    }

    pub fn new(confidence: f64, backup: f64) -> Result<Self, MatchError> {
        let thresholds = Self { confidence, backup };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), MatchError> {
        for (name, value) in [("confidence", self.confidence), ("backup", self.backup)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MatchError::InvalidConfig(format!(
                    "{name} threshold must be within [0, 1], got {value}"
                )));
            }
        }
        if self.confidence < self.backup {
            return Err(MatchError::InvalidConfig(format!(
                "confidence threshold {} must be >= backup threshold {}",
                self.confidence, self.backup
            )));
        }
        Ok(())
    }

    pub fn classify(&self, matches: &[NeighborMatch]) -> ClassificationResult {
        classify(matches, self.confidence, self.backup)
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: Self::default_confidence(),
            backup: Self::default_backup(),
        }
    }
}

/// Round to three decimal places.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round_ties_even() / 1000.0
}

/// Turn ranked matches into a building decision by thresholded majority vote.
///
/// Matches at or above `confidence_threshold` vote first; if none qualify,
/// matches at or above `backup_threshold` vote and the result is
/// `uncertain`. Vote ties go to the building seen first in rank order.
pub fn classify(
    matches: &[NeighborMatch],
    confidence_threshold: f64,
    backup_threshold: f64,
) -> ClassificationResult {
    let Some(top) = matches.first() else {
        return ClassificationResult::no_match(NO_NEIGHBORS_MESSAGE, 0.0);
    };

    for (threshold, status) in [
        (confidence_threshold, MatchStatus::Confident),
        (backup_threshold, MatchStatus::Uncertain),
    ] {
        let qualifying: Vec<&NeighborMatch> =
            matches.iter().filter(|m| m.similarity >= threshold).collect();
        if let Some((winner, confidence)) = majority_vote(&qualifying) {
            return ClassificationResult {
                status,
                building_id: Some(winner.to_string()),
                confidence: round3(confidence),
                message: (status == MatchStatus::Uncertain).then(|| UNCERTAIN_MESSAGE.to_string()),
                matches: qualifying
                    .iter()
                    .map(|m| ScoredMatch {
                        building_id: m.building_id.clone(),
                        similarity: round3(m.similarity),
                    })
                    .collect(),
            };
        }
    }

    ClassificationResult::no_match(NO_MATCH_MESSAGE, round3(top.similarity.clamp(0.0, 1.0)))
}

/// Most frequent building among `members` and its mean similarity.
fn majority_vote<'a>(members: &[&'a NeighborMatch]) -> Option<(&'a str, f64)> {
    // (building, count, similarity sum) in first-seen order
    let mut tally: Vec<(&str, usize, f64)> = Vec::new();
    for m in members {
        match tally.iter_mut().find(|(b, _, _)| *b == m.building_id) {
            Some(entry) => {
                entry.1 += 1;
                entry.2 += m.similarity;
            }
            None => tally.push((m.building_id.as_str(), 1, m.similarity)),
        }
    }

    let mut best: Option<(&str, usize, f64)> = None;
    for entry in tally {
        if best.is_none_or(|(_, count, _)| entry.1 > count) {
            best = Some(entry);
        }
    }
    best.map(|(building, count, sum)| (building, sum / count as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(id: &str, similarity: f64) -> NeighborMatch {
        NeighborMatch::new(id, similarity)
    }

    #[test]
    fn empty_matches_are_no_match() {
        let result = classify(&[], 0.7, 0.4);
        assert_eq!(result.status, MatchStatus::NoMatch);
        assert_eq!(result.building_id, None);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.message.as_deref(), Some(NO_NEIGHBORS_MESSAGE));
        assert!(result.matches.is_empty());
    }

    #[test]
    fn exact_halves_round_to_even() {
        assert_eq!(round3(0.8125), 0.812);
        assert_eq!(round3(0.5), 0.5);

        let result = classify(&[m("1_a", 0.8125)], 0.7, 0.4);
        assert_eq!(result.status, MatchStatus::Confident);
        assert_eq!(result.confidence, 0.812);
        assert_eq!(result.matches[0].similarity, 0.812);
    }

    #[test]
    fn majority_beats_higher_single_score() {
        let matches = vec![
            m("2_a", 0.95),
            m("1_a", 0.80),
            m("2_b", 0.90),
            m("1_b", 0.78),
            m("1_c", 0.75),
        ];
        let result = classify(&matches, 0.7, 0.4);
        assert_eq!(result.status, MatchStatus::Confident);
        assert_eq!(result.building_id.as_deref(), Some("1"));
        assert_eq!(result.confidence, round3((0.80 + 0.78 + 0.75) / 3.0));
        assert_eq!(result.matches.len(), 5);
        assert!(result.message.is_none());
    }

    #[test]
    fn vote_tie_goes_to_first_seen_building() {
        let matches = vec![m("7_a", 0.9), m("3_a", 0.95), m("3_b", 0.8), m("7_b", 0.85)];
        let result = classify(&matches, 0.7, 0.4);
        assert_eq!(result.building_id.as_deref(), Some("7"));
        assert_eq!(result.confidence, 0.875);
    }

    #[test]
    fn only_confident_members_vote_and_are_reported() {
        let matches = vec![m("1_a", 0.81), m("2_a", 0.6), m("2_b", 0.55), m("2_c", 0.5)];
        let result = classify(&matches, 0.7, 0.4);
        assert_eq!(result.status, MatchStatus::Confident);
        assert_eq!(result.building_id.as_deref(), Some("1"));
        assert_eq!(
            result.matches,
            vec![ScoredMatch {
                building_id: "1".into(),
                similarity: 0.81
            }]
        );
    }

    #[test]
    fn backup_band_is_uncertain() {
        let matches = vec![m("4_a", 0.61234), m("5_a", 0.5), m("4_b", 0.45), m("6_a", 0.2)];
        let result = classify(&matches, 0.7, 0.4);
        assert_eq!(result.status, MatchStatus::Uncertain);
        assert_eq!(result.building_id.as_deref(), Some("4"));
        assert_eq!(result.confidence, round3((0.61234 + 0.45) / 2.0));
        assert_eq!(result.message.as_deref(), Some(UNCERTAIN_MESSAGE));
        assert_eq!(result.matches.len(), 3);
        assert_eq!(result.matches[0].similarity, 0.612);
    }

    #[test]
    fn below_backup_is_no_match_with_top_score() {
        let matches = vec![m("1_a", 0.3456), m("2_a", 0.1)];
        let result = classify(&matches, 0.7, 0.4);
        assert_eq!(result.status, MatchStatus::NoMatch);
        assert_eq!(result.building_id, None);
        assert_eq!(result.confidence, 0.346);
        assert_eq!(result.message.as_deref(), Some(NO_MATCH_MESSAGE));
        assert!(result.matches.is_empty());
    }

    #[test]
    fn negative_top_score_reports_zero_confidence() {
        let result = classify(&[m("1_a", -0.4)], 0.7, 0.4);
        assert_eq!(result.status, MatchStatus::NoMatch);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn threshold_boundaries_are_inclusive() {
        assert_eq!(classify(&[m("1_a", 0.7)], 0.7, 0.4).status, MatchStatus::Confident);
        assert_eq!(classify(&[m("1_a", 0.4)], 0.7, 0.4).status, MatchStatus::Uncertain);
    }

    #[test]
    fn raising_confidence_never_upgrades_status() {
        let matches = vec![m("1_a", 0.82), m("2_a", 0.74), m("1_b", 0.5)];
        let rank = |s: MatchStatus| match s {
            MatchStatus::Confident => 2,
            MatchStatus::Uncertain => 1,
            MatchStatus::NoMatch => 0,
        };
        let mut previous = rank(classify(&matches, 0.0, 0.0).status);
        for step in 1..=20 {
            let t = step as f64 / 20.0;
            let current = rank(classify(&matches, t, 0.4_f64.min(t)).status);
            assert!(current <= previous, "status improved at threshold {t}");
            previous = current;
        }
    }

    #[test]
    fn serialized_shape_omits_empty_fields() {
        let confident = classify(&[m("1_a", 1.0)], 0.7, 0.4);
        let json = serde_json::to_value(&confident).unwrap();
        assert_eq!(json["status"], "confident");
        assert_eq!(json["building_id"], "1");
        assert!(json.get("message").is_none());
        assert_eq!(json["matches"][0]["similarity"], 1.0);

        let none = classify(&[m("1_a", 0.0)], 0.7, 0.4);
        let json = serde_json::to_value(&none).unwrap();
        assert_eq!(json["status"], "no_match");
        assert!(json["building_id"].is_null());
        assert!(json.get("matches").is_none());
    }

    #[test]
    fn thresholds_validation() {
        assert!(Thresholds::default().validate().is_ok());
        assert!(Thresholds::new(0.4, 0.7).is_err());
        assert!(Thresholds::new(1.2, 0.4).is_err());
        assert!(Thresholds::new(0.7, -0.1).is_err());
        let err = Thresholds::new(0.3, 0.5).unwrap_err();
        match err {
            MatchError::InvalidConfig(msg) => assert!(msg.contains("backup")),
            other => panic!("unexpected error: {other}"),
        }
    }
}

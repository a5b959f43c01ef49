//! Threshold evaluation over an aggregated vote session.
//!
//! Pure decision logic: the same `(threshold, round, aggregate)` always
//! produces the same verdict. No I/O, no clock.

use super::aggregate::VoteAggregate;
use crate::meeting::config::{ThresholdConfig, ThresholdMode};
use serde::{Deserialize, Serialize};

/// Verdict of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdDecision {
    pub accepted: bool,
    pub reason: String,
    pub avg_score: u32,
}

impl ThresholdDecision {
    fn reject(reason: impl Into<String>, avg_score: u32) -> Self {
        Self { accepted: false, reason: reason.into(), avg_score }
    }
}

/// Evaluate a finished vote session against the meeting threshold.
///
/// For `avg_score` mode: rejects before `min_rounds`, otherwise accepts iff
/// the integer-rounded mean reaches `avg_score_threshold`. Unknown modes
/// always reject.
pub fn evaluate_threshold(
    threshold: &ThresholdConfig,
    round: u32,
    aggregate: &VoteAggregate,
) -> ThresholdDecision {
    if round < threshold.min_rounds {
        return ThresholdDecision::reject("min rounds not reached", aggregate.avg_score);
    }

    match threshold.mode {
        ThresholdMode::AvgScore => {
            if aggregate.is_empty() {
                return ThresholdDecision::reject("no votes received", 0);
            }
            if aggregate.avg_score >= threshold.avg_score_threshold {
                ThresholdDecision {
                    accepted: true,
                    reason: format!(
                        "avg score {} >= threshold {}",
                        aggregate.avg_score, threshold.avg_score_threshold
                    ),
                    avg_score: aggregate.avg_score,
                }
            } else {
                ThresholdDecision::reject(
                    format!(
                        "avg score {} < threshold {}",
                        aggregate.avg_score, threshold.avg_score_threshold
                    ),
                    aggregate.avg_score,
                )
            }
        }
        ThresholdMode::Unknown => {
            ThresholdDecision::reject("unknown threshold mode", aggregate.avg_score)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vote::entities::Vote;
    use chrono::Utc;

    fn aggregate(scores: &[u32]) -> VoteAggregate {
        let votes: Vec<Vote> = scores
            .iter()
            .map(|s| Vote::new("m", "s", "a", *s, *s >= 80, None, 1, Utc::now()))
            .collect();
        VoteAggregate::from_votes(&votes)
    }

    #[test]
    fn rejects_before_min_rounds() {
        let threshold = ThresholdConfig::default(); // min_rounds 2
        let decision = evaluate_threshold(&threshold, 1, &aggregate(&[95, 95, 95]));
        assert!(!decision.accepted);
        assert_eq!(decision.reason, "min rounds not reached");
    }

    #[test]
    fn accepts_at_threshold() {
        let threshold = ThresholdConfig::default(); // 80
        let decision = evaluate_threshold(&threshold, 2, &aggregate(&[80, 80, 80]));
        assert!(decision.accepted);
        assert_eq!(decision.avg_score, 80);
    }

    #[test]
    fn rejects_below_threshold() {
        let threshold = ThresholdConfig::default();
        // (75+75+75+75+90)/5 = 78
        let decision = evaluate_threshold(&threshold, 2, &aggregate(&[75, 75, 75, 75, 90]));
        assert!(!decision.accepted);
        assert_eq!(decision.avg_score, 78);
    }

    #[test]
    fn unknown_mode_rejects() {
        let threshold = ThresholdConfig { mode: ThresholdMode::Unknown, ..Default::default() };
        let decision = evaluate_threshold(&threshold, 5, &aggregate(&[100, 100, 100]));
        assert!(!decision.accepted);
        assert_eq!(decision.reason, "unknown threshold mode");
    }

    #[test]
    fn empty_aggregate_rejects() {
        let threshold = ThresholdConfig::default();
        let decision = evaluate_threshold(&threshold, 3, &VoteAggregate::default());
        assert!(!decision.accepted);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let threshold = ThresholdConfig::default();
        let agg = aggregate(&[70, 80, 90]);
        let a = evaluate_threshold(&threshold, 2, &agg);
        let b = evaluate_threshold(&threshold, 2, &agg);
        assert_eq!(a, b);
    }

    #[test]
    fn min_rounds_zero_evaluates_any_round() {
        let threshold = ThresholdConfig { min_rounds: 0, ..Default::default() };
        let decision = evaluate_threshold(&threshold, 1, &aggregate(&[90, 90, 90]));
        assert!(decision.accepted);
    }
}

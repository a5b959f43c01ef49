//! Aggregation over the votes that actually landed in a session.

use super::entities::Vote;
use serde::{Deserialize, Serialize};

/// Aggregated result of one vote session.
///
/// Built from persisted votes only; agents whose calls failed or whose votes
/// were dropped by the stage-version check are simply absent from the mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VoteAggregate {
    /// Integer-rounded mean score.
    pub avg_score: u32,
    pub min_score: u32,
    pub max_score: u32,
    pub count: usize,
    pub pass_count: usize,
}

impl VoteAggregate {
    pub fn from_votes(votes: &[Vote]) -> Self {
        if votes.is_empty() {
            return Self::default();
        }
        let sum: u64 = votes.iter().map(|v| v.score as u64).sum();
        let avg_score = (sum as f64 / votes.len() as f64).round() as u32;
        Self {
            avg_score,
            min_score: votes.iter().map(|v| v.score).min().unwrap_or(0),
            max_score: votes.iter().map(|v| v.score).max().unwrap_or(0),
            count: votes.len(),
            pass_count: votes.iter().filter(|v| v.pass).count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True when every expected voter passed. Unanimity requires an explicit
    /// `pass=true` from each expected agent, not merely a majority.
    pub fn unanimous_over(votes: &[Vote], expected_agent_ids: &[String]) -> bool {
        expected_agent_ids.iter().all(|id| {
            votes
                .iter()
                .any(|v| v.voter_agent_id == *id && v.pass)
        })
    }
}

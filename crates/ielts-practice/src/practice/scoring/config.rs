use serde::{Deserialize, Serialize};

/// How writing answers still waiting on the external grader take part in aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingWritingPolicy {
    /// Ungraded answers count toward the writing total and contribute a score of zero.
    #[default]
    CountAsZero,
    /// Ungraded answers are left out of the writing section entirely.
    Exclude,
}

impl PendingWritingPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "count_as_zero" | "zero" => Some(Self::CountAsZero),
            "exclude" => Some(Self::Exclude),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub pending_writing: PendingWritingPolicy,
}

mod aggregate;
mod bands;
mod comparator;
mod config;
mod review;

pub use aggregate::{
    calculate_session_results, MissingAssociation, ScoreSummary, ScoringEngine, ScoringError,
};
pub use bands::{raw_score_to_band, round_to_half_band, scale_to_canonical, CANONICAL_QUESTION_COUNT};
pub use comparator::compare_answers;
pub use config::{PendingWritingPolicy, ScoringConfig};
pub use review::{review_session, GroupReview, QuestionReview};

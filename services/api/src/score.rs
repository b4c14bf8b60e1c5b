use chrono::{DateTime, Utc};
use clap::Args;
use ielts_practice::error::AppError;
use ielts_practice::practice::{
    PendingWritingPolicy, ResolvedSession, ScoreSummary, ScoringConfig, ScoringEngine, SessionId,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct ScoreArgs {
    /// JSON document holding a resolved session (groups, questions, keys, answers)
    #[arg(long)]
    pub(crate) session: PathBuf,
    /// Leave ungraded essays out of the writing band instead of counting them as zero
    #[arg(long)]
    pub(crate) exclude_pending: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ScoreReport {
    pub(crate) session_id: SessionId,
    pub(crate) scored_at: DateTime<Utc>,
    pub(crate) pending_writing: PendingWritingPolicy,
    pub(crate) summary: ScoreSummary,
}

pub(crate) fn run_score(args: ScoreArgs) -> Result<(), AppError> {
    let document = std::fs::read_to_string(&args.session)?;
    let report = score_document(&document, policy(args.exclude_pending))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.summary.is_final() {
        eprintln!(
            "note: {} essay(s) pending and {} failed; writing band is provisional",
            report.summary.pending_grades, report.summary.failed_grades
        );
    }
    Ok(())
}

fn policy(exclude_pending: bool) -> PendingWritingPolicy {
    if exclude_pending {
        PendingWritingPolicy::Exclude
    } else {
        PendingWritingPolicy::CountAsZero
    }
}

pub(crate) fn score_document(
    document: &str,
    pending_writing: PendingWritingPolicy,
) -> Result<ScoreReport, AppError> {
    let resolved: ResolvedSession = serde_json::from_str(document)?;
    let engine = ScoringEngine::new(ScoringConfig { pending_writing });
    let summary = engine.summarize(&resolved)?;

    Ok(ScoreReport {
        session_id: resolved.session.id,
        scored_at: Utc::now(),
        pending_writing,
        summary,
    })
}

//! Scoring and grading core for IELTS practice sessions.

pub mod config;
pub mod error;
pub mod practice;
pub mod telemetry;

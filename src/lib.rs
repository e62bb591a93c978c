//! Report triage pipeline: takes citizen-submitted safety incident reports
//! through shape checks, AI quality scoring with bounded retries, and
//! escalation to a human moderator when automated attempts run out.

pub mod config;
pub mod core;
pub mod oracle;
pub mod pipeline;

//! Collections engine orchestrating dunning escalation plans for overdue
//! receivables: policy-driven eligibility, plan lifecycle (pause, resume,
//! stop, policy switch), balance computation, and payment hand-off.

pub mod config;
pub mod dunning;
pub mod error;
pub mod telemetry;

// Lead Scoring
//
// Weighted rule evaluation producing a qualification score and quality tier
// for CRM records. Rules share operator semantics with workflow conditions.

pub mod engine;
pub mod rules;
pub mod service;

pub use engine::{ScoreResult, ScoringEngine};
pub use rules::RuleDefinition;
pub use service::{ScoreStore, ScoringService};

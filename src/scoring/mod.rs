//! Scoring engine: damage and survival credit, placements and ranks

pub mod score;
pub mod tracker;

pub use score::{competition_ranks, ranked, BotResults, Score};
pub use tracker::{results_for, AccumulatedScores, ScoreTracker};

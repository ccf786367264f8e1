//! CAPTCHA puzzles injected after repeated login failures.
//!
//! The guard asks a [`PuzzleSource`] for a fresh puzzle whenever a client
//! crosses the challenge threshold, keeps the answer, and hands the rendered
//! prompt back through [`ChallengePrompt`].

mod generator;

pub use generator::SvgPuzzleSource;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A freshly generated puzzle
#[derive(Debug, Clone)]
pub struct Puzzle {
    /// Solution text as displayed (compared case-insensitively)
    pub answer: String,
    /// Rendered SVG document
    pub svg: String,
}

/// What a client is shown while a challenge is pending
#[derive(Debug, Clone, Serialize)]
pub struct ChallengePrompt {
    /// Rendered SVG document
    pub svg: String,
    /// The challenge is void at or after this instant
    pub expires_at: DateTime<Utc>,
}

/// Produces puzzles for the guard
pub trait PuzzleSource: Send + Sync {
    fn generate(&self) -> Puzzle;
}

/// Always yields the same answer, so tests can solve the challenge
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct FixedPuzzleSource {
    answer: String,
}

#[cfg(test)]
impl FixedPuzzleSource {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
        }
    }
}

#[cfg(test)]
impl PuzzleSource for FixedPuzzleSource {
    fn generate(&self) -> Puzzle {
        Puzzle {
            answer: self.answer.clone(),
            svg: format!(r#"<svg xmlns="http://www.w3.org/2000/svg"><text>{}</text></svg>"#, self.answer),
        }
    }
}

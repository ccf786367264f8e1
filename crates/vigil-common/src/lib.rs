//! # Vigil Common
//!
//! Shared types, errors, and constants used across Vigil components.
//!
//! ## Modules
//! - `types` - Core data structures (Decision, ChallengeOutcome, UserProfile, etc.)
//! - `error` - The error taxonomy surfaced to clients
//! - `constants` - Shared configuration defaults and key prefixes

pub mod constants;
pub mod error;
pub mod types;

pub use error::VigilError;
pub use types::*;

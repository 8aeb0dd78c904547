//! ProductBazar Scoring
//!
//! Pure, deterministic scoring of recommendation candidates:
//! - Component signals: engagement, recency, trending, similarity,
//!   personalization, diversity and quality ([`signals`])
//! - Time and season context multiplier ([`psychology`])
//! - Per-strategy base compositions ([`Strategy`], [`Composition`])
//! - Two-phase scoring for parallel prescoring and greedy selection
//!   ([`ScoringKernel`])
//!
//! The kernel performs no I/O and reads no clock; the caller supplies `now`
//! through [`ScoringContext`].
//!
//! # Example
//!
//! ```
//! use bazaar_model::{Candidate, Product};
//! use bazaar_scoring::{ScoringContext, ScoringKernel, Strategy};
//! use chrono::Utc;
//!
//! let kernel = ScoringKernel::default();
//! let ctx = ScoringContext::new(Strategy::New, Utc::now());
//! let candidate = Candidate::bare(Product::new("p1", "notes", "maker", "tools"), 1.0);
//! let detail = kernel.score(&candidate, &ctx, &[]);
//! assert!(detail.score >= 0.01 && detail.score <= 1.0);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod explain;
pub mod kernel;
pub mod psychology;
pub mod signals;
pub mod strategy;

pub use config::{ScoringConfig, ScoringConfigError, ScoringWeights};
pub use kernel::{PreScore, ScoringContext, ScoringKernel, MIN_SCORE};
pub use psychology::CategoryFamily;
pub use strategy::{Composition, Strategy, StrategyRegistry, UnknownStrategy};

//! # IPCHECK Security
//!
//! Risk classification of network connections and an overall security score.
//!
//! Connections are an input: gathering them from the operating system is up
//! to the caller. Geolocation records, when supplied, only feed the
//! "lookup failed" signal and the country summary.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ipcheck_security::{Connection, SecurityAnalyzer};
//!
//! let analyzer = SecurityAnalyzer::default();
//! let analyzed: Vec<_> = connections
//!     .into_iter()
//!     .map(|c| analyzer.analyze(c, None))
//!     .collect();
//!
//! let score = analyzer.score(&analyzed);
//! println!("{} ({})", score.score, score.grade);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod analysis;
pub mod score;

pub use analysis::{AnalyzedConnection, Connection, RiskLevel, SecurityAnalyzer};
pub use score::{Grade, ScoreWeights, SecurityScore};

//! # Caches
//!
//! Process-wide caches shared across requests.

pub mod pattern;

pub use pattern::PatternCache;

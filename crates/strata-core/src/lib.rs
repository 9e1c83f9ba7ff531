//! Strata Core - synchronized stem playback, analysis, and EQ

pub mod analysis;
pub mod cache;
pub mod engine;
pub mod eq;
pub mod types;

pub use types::*;

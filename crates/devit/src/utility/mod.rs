//! # Miscellaneous Utilities
pub mod probability;

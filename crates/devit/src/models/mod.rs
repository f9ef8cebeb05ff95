//! # Model Families
pub mod devit;

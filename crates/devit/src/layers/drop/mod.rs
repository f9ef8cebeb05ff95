//! # Stochastic Drop Layers
pub mod drop_path;

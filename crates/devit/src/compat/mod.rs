//! # Compat / Shape Arithmetic
pub mod conv_shape;

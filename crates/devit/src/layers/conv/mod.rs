//! # Depthwise Convolution Layers
pub mod depthwise_separable;
pub mod spatial_dwconv;

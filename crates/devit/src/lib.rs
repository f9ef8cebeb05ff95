#![warn(missing_docs)]
//!# devit - Defactorization Transformer for Burn
//!
//! ## Notable Components
//!
//! * [`compat`] - shape arithmetic for convolutions and sliding windows.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::activation`] - activation layer abstraction wrapper.
//!   * [`layers::conv`] - depthwise / depthwise-separable convolutions.
//!   * [`layers::drop::drop_path`] - drop path / stochastic depth.
//!   * [`layers::init`] - the shared weight-initialization policy.
//!   * [`layers::patching::overlap_patch_embed`] - overlapping patch embedding.
//! * [`models`] - complete model families.
//!   * [`models::devit`] - The DeViT backbone.
//! * [`checkpoint`] - named state dictionaries and legacy weight conversion.
//! * [`prefabs`] - well-known model configurations.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod checkpoint;
pub mod compat;
pub mod layers;
pub mod models;
pub mod prefabs;
pub mod utility;

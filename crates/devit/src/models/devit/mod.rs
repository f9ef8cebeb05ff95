//! # DeViT - Defactorization Transformer
//!
//! A four-stage vision transformer backbone whose attention factorizes
//! dense self-attention into a depthwise-convolutional key/value
//! summary followed by small-window attention.
//!
//! * [`attention`] - multi-scale defactorized window attention.
//! * [`mlp`] - feed-forward block with a depthwise convolution.
//! * [`block`] - pre-norm transformer block.
//! * [`stage`] - patch embedding + blocks + norm.
//! * [`devit_model`] - the backbone and classifier.
//! * [`state_dict`] - named checkpoint import/export.
//! * [`prefabs`] - the `b0`..`b5` configurations.
pub mod attention;
pub mod block;
pub mod devit_model;
pub mod mlp;
pub mod prefabs;
pub mod stage;
pub mod state_dict;

pub use devit_model::{Devit, DevitConfig};

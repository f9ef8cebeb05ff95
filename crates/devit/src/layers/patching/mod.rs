//! # Patch Embedding Layers
pub mod overlap_patch_embed;

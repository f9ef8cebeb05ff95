//! # Drop Path (Stochastic Depth)
//!
//! Randomly zeroes the residual branch for whole samples of a batch.
//!
//! Drop path is only applied when the backend is tracking gradients
//! (`B::ad_enabled()`); on an inference backend it is the identity.
use crate::utility::probability::expect_probability;
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::Distribution;

/// Apply drop path to a batch-major tensor.
///
/// # Arguments
///
/// - `x`: the input tensor; dim 0 is the batch.
/// - `drop_prob`: the probability of dropping each sample.
/// - `training`: when false, returns `x` unchanged.
/// - `scale_by_keep`: rescale kept samples by `1 / (1 - drop_prob)`.
///
/// # Returns
///
/// A tensor of the same shape as `x`.
pub fn drop_path<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    drop_prob: f64,
    training: bool,
    scale_by_keep: bool,
) -> Tensor<B, D> {
    if !training || drop_prob == 0.0 {
        return x;
    }
    let keep_prob = 1.0 - drop_prob;

    let mut mask_shape = [1; D];
    mask_shape[0] = x.dims()[0];

    let mask = Tensor::<B, D>::random(
        mask_shape,
        Distribution::Bernoulli(keep_prob),
        &x.device(),
    );
    let mask = if keep_prob > 0.0 && scale_by_keep {
        mask.div_scalar(keep_prob)
    } else {
        mask
    };

    x * mask
}

/// [`DropPath`] Configuration.
#[derive(Config, Debug)]
pub struct DropPathConfig {
    /// Probability of dropping a sample's residual branch.
    #[config(default = "0.0")]
    pub drop_prob: f64,

    /// Rescale kept samples by `1 / (1 - drop_prob)`.
    #[config(default = "true")]
    pub scale_by_keep: bool,
}

impl DropPathConfig {
    /// Initialize a [`DropPath`].
    ///
    /// # Panics
    ///
    /// If `drop_prob` is not a probability.
    pub fn init(&self) -> DropPath {
        DropPath {
            drop_prob: expect_probability(self.drop_prob),
            scale_by_keep: self.scale_by_keep,
        }
    }
}

/// Drop path layer.
#[derive(Module, Clone, Debug)]
pub struct DropPath {
    /// Probability of dropping a sample's residual branch.
    pub drop_prob: f64,

    /// Rescale kept samples by `1 / (1 - drop_prob)`.
    pub scale_by_keep: bool,
}

impl DropPath {
    /// Forward pass.
    ///
    /// Active only on autodiff backends.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
    ) -> Tensor<B, D> {
        drop_path(x, self.drop_prob, B::ad_enabled(), self.scale_by_keep)
    }
}

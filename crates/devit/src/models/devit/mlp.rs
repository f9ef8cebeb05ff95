//! # Feed-Forward Block with Spatial Mixing
//!
//! ``fc1 -> depthwise 3x3 conv -> act -> drop -> fc2 -> drop``
use crate::layers::activation::activation_wrapper::{Activation, ActivationConfig};
use crate::layers::conv::spatial_dwconv::{SpatialDwConv, SpatialDwConvConfig};
use crate::layers::init::{WeightInit, WeightInitConfig};
use crate::utility::probability::expect_probability;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`SpatialMlp`] Meta trait.
pub trait SpatialMlpMeta {
    /// Input/output feature size.
    fn in_features(&self) -> usize;

    /// Hidden feature size.
    fn hidden_features(&self) -> usize;
}

/// [`SpatialMlp`] Config.
#[derive(Config, Debug)]
pub struct SpatialMlpConfig {
    /// Input/output feature size.
    pub in_features: usize,

    /// Hidden feature size.
    pub hidden_features: usize,

    /// Dropout after the activation and after `fc2`.
    #[config(default = "0.0")]
    pub drop: f64,

    /// Activation.
    #[config(default = "ActivationConfig::Gelu")]
    pub act: ActivationConfig,
}

impl SpatialMlpMeta for SpatialMlpConfig {
    fn in_features(&self) -> usize {
        self.in_features
    }

    fn hidden_features(&self) -> usize {
        self.hidden_features
    }
}

impl SpatialMlpConfig {
    /// Create a config with ``hidden = floor(in_features * mlp_ratio)``.
    pub fn from_ratio(
        in_features: usize,
        mlp_ratio: f64,
    ) -> Self {
        Self::new(in_features, (in_features as f64 * mlp_ratio) as usize)
    }

    /// Initialize a [`SpatialMlp`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> SpatialMlp<B> {
        let drop = expect_probability(self.drop);
        SpatialMlp {
            fc1: LinearConfig::new(self.in_features, self.hidden_features).init(device),
            dwconv: SpatialDwConvConfig::new(self.hidden_features).init(device),
            act: self.act.init(device),
            drop: DropoutConfig::new(drop).init(),
            fc2: LinearConfig::new(self.hidden_features, self.in_features).init(device),
        }
    }
}

/// Feed-forward block with a depthwise convolution between the projections.
///
/// Implements [`SpatialMlpMeta`].
#[derive(Module, Debug)]
pub struct SpatialMlp<B: Backend> {
    /// Expansion projection.
    pub fc1: Linear<B>,

    /// Spatial mixing over the token grid.
    pub dwconv: SpatialDwConv<B>,

    /// Activation.
    pub act: Activation<B>,

    /// Dropout.
    pub drop: Dropout,

    /// Contraction projection.
    pub fc2: Linear<B>,
}

impl<B: Backend> SpatialMlpMeta for SpatialMlp<B> {
    fn in_features(&self) -> usize {
        self.fc1.weight.dims()[0]
    }

    fn hidden_features(&self) -> usize {
        self.fc1.weight.dims()[1]
    }
}

impl<B: Backend> WeightInit for SpatialMlp<B> {
    fn init_weights(
        mut self,
        policy: &WeightInitConfig,
    ) -> Self {
        self.fc1 = self.fc1.init_weights(policy);
        self.dwconv = self.dwconv.init_weights(policy);
        self.fc2 = self.fc2.init_weights(policy);
        self
    }
}

impl<B: Backend> SpatialMlp<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, height*width, in_features]``.
    /// - `resolution`: the ``[height, width]`` token grid.
    ///
    /// # Returns
    ///
    /// ``[batch, height*width, in_features]``
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        resolution: [usize; 2],
    ) -> Tensor<B, 3> {
        let x = self.fc1.forward(x);
        let x = self.dwconv.forward(x, resolution);
        let x = self.act.forward(x);
        let x = self.drop.forward(x);
        let x = self.fc2.forward(x);
        self.drop.forward(x)
    }
}

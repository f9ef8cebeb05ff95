//! # Token-Sequence Depthwise Convolution
//!
//! Applies a depthwise 3x3 convolution to a token sequence by viewing it
//! as a spatial map: ``[batch, height*width, channels]`` is transposed to
//! ``[batch, channels, height, width]``, convolved, and flattened back.
use crate::layers::init::{WeightInit, WeightInitConfig};
use bimm_contracts::unpack_shape_contract;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`SpatialDwConv`] Config.
#[derive(Config, Debug)]
pub struct SpatialDwConvConfig {
    /// Number of channels.
    pub channels: usize,
}

impl SpatialDwConvConfig {
    /// Initialize a [`SpatialDwConv`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> SpatialDwConv<B> {
        let c = self.channels;
        SpatialDwConv {
            dwconv: Conv2dConfig::new([c, c], [3, 3])
                .with_groups(c)
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
        }
    }
}

/// Depthwise 3x3 convolution over a token grid.
#[derive(Module, Debug)]
pub struct SpatialDwConv<B: Backend> {
    /// The depthwise convolution.
    pub dwconv: Conv2d<B>,
}

impl<B: Backend> WeightInit for SpatialDwConv<B> {
    fn init_weights(
        mut self,
        policy: &WeightInitConfig,
    ) -> Self {
        self.dwconv = self.dwconv.init_weights(policy);
        self
    }
}

impl<B: Backend> SpatialDwConv<B> {
    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.dwconv.weight.dims()[0]
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, height*width, channels]`` tokens in row-major grid order.
    /// - `resolution`: the ``[height, width]`` token grid.
    ///
    /// # Returns
    ///
    /// ``[batch, height*width, channels]``
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        resolution: [usize; 2],
    ) -> Tensor<B, 3> {
        let [height, width] = resolution;
        let [batch, channels] = unpack_shape_contract!(
            ["batch", "height" * "width", "channels"],
            &x,
            &["batch", "channels"],
            &[
                ("height", height),
                ("width", width),
                ("channels", self.channels())
            ]
        );

        let x = x.swap_dims(1, 2).reshape([batch, channels, height, width]);
        let x = self.dwconv.forward(x);
        x.flatten::<3>(2, 3).swap_dims(1, 2)
    }
}

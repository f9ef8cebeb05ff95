//! # Depthwise-Separable Projection
//!
//! A depthwise 3x3 convolution (spatial mixing within each channel)
//! followed by a pointwise 1x1 convolution (channel mixing).
//!
//! Maps ``[batch, in_channels, height, width]`` to
//! ``[batch, out_channels, height, width]``.
use crate::layers::init::{WeightInit, WeightInitConfig};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`DepthwiseSeparableConv`] Meta trait.
pub trait DepthwiseSeparableMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Kernel size of the depthwise convolution.
    fn kernel_size(&self) -> usize;
}

/// [`DepthwiseSeparableConv`] Config.
#[derive(Config, Debug)]
pub struct DepthwiseSeparableConfig {
    /// Number of input channels.
    pub in_channels: usize,

    /// Number of output channels.
    pub out_channels: usize,

    /// Kernel size of the depthwise convolution; must be odd.
    #[config(default = "3")]
    pub kernel_size: usize,
}

impl DepthwiseSeparableMeta for DepthwiseSeparableConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn kernel_size(&self) -> usize {
        self.kernel_size
    }
}

impl DepthwiseSeparableConfig {
    /// Initialize a [`DepthwiseSeparableConv`].
    ///
    /// # Panics
    ///
    /// If `kernel_size` is even.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> DepthwiseSeparableConv<B> {
        let k = self.kernel_size;
        assert!(k % 2 == 1, "kernel_size must be odd: {k}");
        let c = self.in_channels;

        DepthwiseSeparableConv {
            depth_conv: Conv2dConfig::new([c, c], [k, k])
                .with_groups(c)
                .with_padding(PaddingConfig2d::Explicit(k / 2, k / 2))
                .init(device),
            point_conv: Conv2dConfig::new([c, self.out_channels], [1, 1]).init(device),
        }
    }
}

/// Depthwise-Separable Convolution.
///
/// Implements [`DepthwiseSeparableMeta`].
#[derive(Module, Debug)]
pub struct DepthwiseSeparableConv<B: Backend> {
    /// Per-channel spatial convolution.
    pub depth_conv: Conv2d<B>,

    /// 1x1 channel mixing convolution.
    pub point_conv: Conv2d<B>,
}

impl<B: Backend> DepthwiseSeparableMeta for DepthwiseSeparableConv<B> {
    fn in_channels(&self) -> usize {
        self.depth_conv.weight.dims()[0]
    }

    fn out_channels(&self) -> usize {
        self.point_conv.weight.dims()[0]
    }

    fn kernel_size(&self) -> usize {
        self.depth_conv.kernel_size[0]
    }
}

impl<B: Backend> WeightInit for DepthwiseSeparableConv<B> {
    fn init_weights(
        mut self,
        policy: &WeightInitConfig,
    ) -> Self {
        self.depth_conv = self.depth_conv.init_weights(policy);
        self.point_conv = self.point_conv.init_weights(policy);
        self
    }
}

impl<B: Backend> DepthwiseSeparableConv<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, height, width]``.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("in_channels", self.in_channels())]
        );

        let x = self.depth_conv.forward(input);
        let x = self.point_conv.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "height", "width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("height", height),
                ("width", width)
            ]
        );

        x
    }
}

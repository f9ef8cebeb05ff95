//! # Overlapping Patch Embedding
//!
//! A strided convolution whose kernel is larger than its stride, so
//! neighbouring patches overlap. The output map is flattened to tokens
//! and layer-normalized.
use crate::compat::conv_shape::ConvGeometry;
use crate::layers::init::{WeightInit, WeightInitConfig};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{LayerNorm, LayerNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`OverlapPatchEmbed`] Meta trait.
pub trait OverlapPatchEmbedMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Embedding (output) dimension.
    fn embed_dim(&self) -> usize;

    /// Patch (kernel) size.
    fn patch_size(&self) -> usize;

    /// Stride.
    fn stride(&self) -> usize;

    /// The convolution geometry, with ``patch_size / 2`` padding.
    fn geometry(&self) -> ConvGeometry {
        ConvGeometry::new(self.patch_size(), self.stride()).with_padding(self.patch_size() / 2)
    }

    /// Predict the output ``[height, width]`` for an input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> anyhow::Result<[usize; 2]> {
        self.geometry().try_output_resolution(input_resolution)
    }
}

/// [`OverlapPatchEmbed`] Config.
#[derive(Config, Debug)]
pub struct OverlapPatchEmbedConfig {
    /// Number of input channels.
    pub in_channels: usize,

    /// Embedding (output) dimension.
    pub embed_dim: usize,

    /// Patch (kernel) size; must exceed `stride`.
    #[config(default = "7")]
    pub patch_size: usize,

    /// Stride.
    #[config(default = "4")]
    pub stride: usize,

    /// Epsilon of the output [`LayerNorm`].
    #[config(default = "1e-5")]
    pub norm_eps: f64,
}

impl OverlapPatchEmbedMeta for OverlapPatchEmbedConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    fn patch_size(&self) -> usize {
        self.patch_size
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl OverlapPatchEmbedConfig {
    /// Check the config.
    pub fn try_validate(&self) -> anyhow::Result<()> {
        if self.stride == 0 {
            anyhow::bail!("stride must be > 0");
        }
        if self.patch_size <= self.stride {
            anyhow::bail!(
                "patch_size ({}) must be larger than stride ({})",
                self.patch_size,
                self.stride
            );
        }
        Ok(())
    }

    /// Check the config.
    ///
    /// # Panics
    ///
    /// On an invalid config.
    pub fn expect_valid(&self) {
        if let Err(e) = self.try_validate() {
            panic!("{}", e);
        }
    }

    /// Initialize an [`OverlapPatchEmbed`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> OverlapPatchEmbed<B> {
        self.expect_valid();
        let p = self.patch_size;
        let pad = p / 2;

        OverlapPatchEmbed {
            proj: Conv2dConfig::new([self.in_channels, self.embed_dim], [p, p])
                .with_stride([self.stride, self.stride])
                .with_padding(PaddingConfig2d::Explicit(pad, pad))
                .init(device),
            norm: LayerNormConfig::new(self.embed_dim)
                .with_epsilon(self.norm_eps)
                .init(device),
        }
    }
}

/// Overlapping Patch Embedding.
///
/// Implements [`OverlapPatchEmbedMeta`].
#[derive(Module, Debug)]
pub struct OverlapPatchEmbed<B: Backend> {
    /// Patch projection.
    pub proj: Conv2d<B>,

    /// Token normalization.
    pub norm: LayerNorm<B>,
}

impl<B: Backend> OverlapPatchEmbedMeta for OverlapPatchEmbed<B> {
    fn in_channels(&self) -> usize {
        self.proj.weight.dims()[1]
    }

    fn embed_dim(&self) -> usize {
        self.proj.weight.dims()[0]
    }

    fn patch_size(&self) -> usize {
        self.proj.kernel_size[0]
    }

    fn stride(&self) -> usize {
        self.proj.stride[0]
    }
}

impl<B: Backend> WeightInit for OverlapPatchEmbed<B> {
    fn init_weights(
        mut self,
        policy: &WeightInitConfig,
    ) -> Self {
        self.proj = self.proj.init_weights(policy);
        self.norm = self.norm.init_weights(policy);
        self
    }
}

impl<B: Backend> OverlapPatchEmbed<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``([batch, out_height*out_width, embed_dim], [out_height, out_width])`` tuple.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> (Tensor<B, 3>, [usize; 2]) {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())]
        );
        let [out_height, out_width] = self
            .geometry()
            .expect_output_resolution([in_height, in_width]);

        let x = self.proj.forward(input);
        assert_shape_contract_periodically!(
            ["batch", "embed_dim", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("embed_dim", self.embed_dim()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        let x = x.flatten::<3>(2, 3).swap_dims(1, 2);
        let x = self.norm.forward(x);

        (x, [out_height, out_width])
    }
}

//! # DeViT Stage
//!
//! One backbone stage: an overlapping patch embedding, a sequence of
//! [`DevitBlock`]s at the embedded resolution, and a final LayerNorm.
use crate::layers::activation::activation_wrapper::ActivationConfig;
use crate::layers::init::{WeightInit, WeightInitConfig};
use crate::layers::patching::overlap_patch_embed::{
    OverlapPatchEmbed, OverlapPatchEmbedConfig, OverlapPatchEmbedMeta,
};
use crate::models::devit::attention::{ScaleGroupSpec, stage_scale_weights};
use crate::models::devit::block::{DevitBlock, DevitBlockConfig};
use bimm_contracts::unpack_shape_contract;
use burn::nn::{LayerNorm, LayerNormConfig};
use burn::prelude::{Backend, Config, Module, Tensor};
use serde::{Deserialize, Serialize};

/// Per-stage hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Channel width of the stage.
    pub embed_dim: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Ratio of MLP hidden size to `embed_dim`.
    pub mlp_ratio: f64,

    /// Number of blocks.
    pub depth: usize,

    /// Patch embedding kernel size.
    pub patch_size: usize,

    /// Patch embedding stride.
    pub stride: usize,
}

impl StageConfig {
    /// Construct a stage config.
    pub fn new(
        embed_dim: usize,
        num_heads: usize,
        mlp_ratio: f64,
        depth: usize,
        patch_size: usize,
        stride: usize,
    ) -> Self {
        Self {
            embed_dim,
            num_heads,
            mlp_ratio,
            depth,
            patch_size,
            stride,
        }
    }
}

/// [`DevitStage`] Config.
#[derive(Config, Debug)]
pub struct DevitStageConfig {
    /// Stage index; selects the attention scale groups.
    pub index: usize,

    /// Input channels of the patch embedding.
    pub in_channels: usize,

    /// Stage hyper-parameters.
    pub stage: StageConfig,

    /// Drop path probability of each block; `len == stage.depth`.
    pub drop_path_rates: Vec<f64>,

    /// Attention window size.
    #[config(default = "7")]
    pub window_size: usize,

    /// Bias on the attention query / key-value projections.
    #[config(default = "false")]
    pub qkv_bias: bool,

    /// MLP and attention-output dropout.
    #[config(default = "0.0")]
    pub drop: f64,

    /// Attention weight dropout.
    #[config(default = "0.0")]
    pub attn_drop: f64,

    /// Epsilon of the block and stage norms.
    #[config(default = "1e-5")]
    pub norm_eps: f64,

    /// MLP activation.
    #[config(default = "ActivationConfig::Gelu")]
    pub act: ActivationConfig,
}

impl DevitStageConfig {
    /// The patch embedding config.
    pub fn patch_embed_config(&self) -> OverlapPatchEmbedConfig {
        OverlapPatchEmbedConfig::new(self.in_channels, self.stage.embed_dim)
            .with_patch_size(self.stage.patch_size)
            .with_stride(self.stage.stride)
    }

    /// The config of block `j`.
    pub fn block_config(
        &self,
        j: usize,
    ) -> DevitBlockConfig {
        DevitBlockConfig::new(self.stage.embed_dim, self.stage.num_heads)
            .with_scale_weights(stage_scale_weights(self.index))
            .with_mlp_ratio(self.stage.mlp_ratio)
            .with_window_size(self.window_size)
            .with_qkv_bias(self.qkv_bias)
            .with_drop(self.drop)
            .with_attn_drop(self.attn_drop)
            .with_drop_path(self.drop_path_rates.get(j).copied().unwrap_or(0.0))
            .with_norm_eps(self.norm_eps)
            .with_act(self.act.clone())
    }

    /// The attention scale groups of this stage.
    pub fn scale_groups(&self) -> Vec<ScaleGroupSpec> {
        self.block_config(0).attention_config().scale_groups()
    }

    /// Check the config.
    pub fn try_validate(&self) -> anyhow::Result<()> {
        if self.stage.depth == 0 {
            anyhow::bail!("stage {}: depth must be > 0", self.index);
        }
        if self.drop_path_rates.len() != self.stage.depth {
            anyhow::bail!(
                "stage {}: expected {} drop path rates, got {}",
                self.index,
                self.stage.depth,
                self.drop_path_rates.len()
            );
        }
        self.patch_embed_config()
            .try_validate()
            .map_err(|e| anyhow::anyhow!("stage {}: {e}", self.index))?;
        self.block_config(0)
            .try_validate()
            .map_err(|e| anyhow::anyhow!("stage {}: {e}", self.index))
    }

    /// Initialize a [`DevitStage`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> DevitStage<B> {
        if let Err(e) = self.try_validate() {
            panic!("{}", e);
        }

        DevitStage {
            patch_embed: self.patch_embed_config().init(device),
            blocks: (0..self.stage.depth)
                .map(|j| self.block_config(j).init(device))
                .collect(),
            norm: LayerNormConfig::new(self.stage.embed_dim)
                .with_epsilon(self.norm_eps)
                .init(device),
        }
    }
}

/// DeViT Stage.
#[derive(Module, Debug)]
pub struct DevitStage<B: Backend> {
    /// Downsampling patch embedding.
    pub patch_embed: OverlapPatchEmbed<B>,

    /// Transformer blocks.
    pub blocks: Vec<DevitBlock<B>>,

    /// Output norm.
    pub norm: LayerNorm<B>,
}

impl<B: Backend> WeightInit for DevitStage<B> {
    fn init_weights(
        mut self,
        policy: &WeightInitConfig,
    ) -> Self {
        self.patch_embed = self.patch_embed.init_weights(policy);
        self.blocks = self.blocks.init_weights(policy);
        self.norm = self.norm.init_weights(policy);
        self
    }
}

impl<B: Backend> DevitStage<B> {
    /// Output channel width.
    pub fn embed_dim(&self) -> usize {
        self.patch_embed.embed_dim()
    }

    /// Number of blocks.
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    /// Exclude the patch embedding from gradient tracking.
    pub fn freeze_patch_embed(mut self) -> Self {
        self.patch_embed = self.patch_embed.no_grad();
        self
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``([batch, height*width, embed_dim], [height, width])`` tuple of
    /// normalized tokens and their grid.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> (Tensor<B, 3>, [usize; 2]) {
        let (x, resolution) = self.patch_embed.forward(input);

        let x = self
            .blocks
            .iter()
            .fold(x, |x, block| block.forward(x, resolution));

        (self.norm.forward(x), resolution)
    }

    /// Forward Pass, returning a feature map.
    ///
    /// # Returns
    ///
    /// ``[batch, embed_dim, height, width]``
    pub fn forward_map(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let (x, resolution) = self.forward(input);
        tokens_to_map(x, resolution)
    }
}

/// Reshape ``[batch, height*width, channels]`` tokens to a
/// ``[batch, channels, height, width]`` map.
pub fn tokens_to_map<B: Backend>(
    x: Tensor<B, 3>,
    resolution: [usize; 2],
) -> Tensor<B, 4> {
    let [height, width] = resolution;
    let [batch, channels] = unpack_shape_contract!(
        ["batch", "height" * "width", "channels"],
        &x,
        &["batch", "channels"],
        &[("height", height), ("width", width)]
    );
    x.reshape([batch, height, width, channels])
        .permute([0, 3, 1, 2])
}

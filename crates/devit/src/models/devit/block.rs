//! # DeViT Transformer Block
//!
//! Pre-norm residual block:
//!
//! ```text
//! x = x + drop_path(attn(norm1(x)))
//! x = x + drop_path(mlp(norm2(x)))
//! ```
use crate::layers::activation::activation_wrapper::ActivationConfig;
use crate::layers::drop::drop_path::{DropPath, DropPathConfig};
use crate::layers::init::{WeightInit, WeightInitConfig};
use crate::models::devit::attention::{
    DefactorizedAttention, DefactorizedAttentionConfig, DefactorizedAttentionMeta,
    stage_scale_weights,
};
use crate::models::devit::mlp::{SpatialMlp, SpatialMlpConfig};
use crate::utility::probability::expect_probability;
use burn::nn::{LayerNorm, LayerNormConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`DevitBlock`] Config.
#[derive(Config, Debug)]
pub struct DevitBlockConfig {
    /// Channel dimension.
    pub dim: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Attention scale-group weights.
    #[config(default = "vec![1, 1]")]
    pub scale_weights: Vec<usize>,

    /// Ratio of MLP hidden size to `dim`.
    #[config(default = "4.0")]
    pub mlp_ratio: f64,

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

    /// Drop path probability of both residual branches.
    #[config(default = "0.0")]
    pub drop_path: f64,

    /// Epsilon of `norm1` and `norm2`.
    #[config(default = "1e-5")]
    pub norm_eps: f64,

    /// MLP activation.
    #[config(default = "ActivationConfig::Gelu")]
    pub act: ActivationConfig,
}

impl DevitBlockConfig {
    /// Create a config with the attention scale groups of a backbone stage.
    pub fn for_stage(
        dim: usize,
        num_heads: usize,
        stage: usize,
    ) -> Self {
        Self::new(dim, num_heads).with_scale_weights(stage_scale_weights(stage))
    }

    /// The attention config.
    pub fn attention_config(&self) -> DefactorizedAttentionConfig {
        DefactorizedAttentionConfig::new(self.dim, self.num_heads)
            .with_scale_weights(self.scale_weights.clone())
            .with_window_size(self.window_size)
            .with_qkv_bias(self.qkv_bias)
            .with_attn_drop(self.attn_drop)
            .with_proj_drop(self.drop)
    }

    /// The MLP config.
    pub fn mlp_config(&self) -> SpatialMlpConfig {
        SpatialMlpConfig::from_ratio(self.dim, self.mlp_ratio)
            .with_drop(self.drop)
            .with_act(self.act.clone())
    }

    /// Check the config.
    pub fn try_validate(&self) -> anyhow::Result<()> {
        if self.mlp_ratio <= 0.0 {
            anyhow::bail!("mlp_ratio must be > 0: {}", self.mlp_ratio);
        }
        self.attention_config().try_validate()
    }

    /// Initialize a [`DevitBlock`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> DevitBlock<B> {
        if let Err(e) = self.try_validate() {
            panic!("{}", e);
        }
        let drop_path = expect_probability(self.drop_path);

        DevitBlock {
            norm1: LayerNormConfig::new(self.dim)
                .with_epsilon(self.norm_eps)
                .init(device),
            attn: self.attention_config().init(device),
            drop_path: if drop_path != 0.0 {
                DropPathConfig::new()
                    .with_drop_prob(drop_path)
                    .init()
                    .into()
            } else {
                None
            },
            norm2: LayerNormConfig::new(self.dim)
                .with_epsilon(self.norm_eps)
                .init(device),
            mlp: self.mlp_config().init(device),
        }
    }
}

/// DeViT Transformer Block.
#[derive(Module, Debug)]
pub struct DevitBlock<B: Backend> {
    /// Attention pre-norm.
    pub norm1: LayerNorm<B>,

    /// Attention.
    pub attn: DefactorizedAttention<B>,

    /// Optional `DropPath` layer; shared by both branches.
    pub drop_path: Option<DropPath>,

    /// MLP pre-norm.
    pub norm2: LayerNorm<B>,

    /// MLP.
    pub mlp: SpatialMlp<B>,
}

impl<B: Backend> WeightInit for DevitBlock<B> {
    fn init_weights(
        mut self,
        policy: &WeightInitConfig,
    ) -> Self {
        self.norm1 = self.norm1.init_weights(policy);
        self.attn = self.attn.init_weights(policy);
        self.norm2 = self.norm2.init_weights(policy);
        self.mlp = self.mlp.init_weights(policy);
        self
    }
}

impl<B: Backend> DevitBlock<B> {
    /// Channel dimension.
    pub fn dim(&self) -> usize {
        self.attn.dim()
    }

    /// Drop path probability; 0 when absent.
    pub fn drop_path_prob(&self) -> f64 {
        self.drop_path.as_ref().map_or(0.0, |d| d.drop_prob)
    }

    fn residual(
        &self,
        x: Tensor<B, 3>,
        branch: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let branch = match &self.drop_path {
            Some(drop_path) => drop_path.forward(branch),
            None => branch,
        };
        x + branch
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, height*width, dim]``.
    /// - `resolution`: the ``[height, width]`` token grid.
    ///
    /// # Returns
    ///
    /// ``[batch, height*width, dim]``
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        resolution: [usize; 2],
    ) -> Tensor<B, 3> {
        let branch = self
            .attn
            .forward(self.norm1.forward(x.clone()), resolution);
        let x = self.residual(x, branch);

        let branch = self.mlp.forward(self.norm2.forward(x.clone()), resolution);
        self.residual(x, branch)
    }
}

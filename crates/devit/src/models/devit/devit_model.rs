//! # DeViT Backbone
//!
//! Four [`DevitStage`]s of decreasing resolution and increasing width,
//! followed by token mean-pooling and an optional linear classifier.
use crate::layers::activation::activation_wrapper::ActivationConfig;
use crate::layers::init::{WeightInit, WeightInitConfig};
use crate::layers::patching::overlap_patch_embed::OverlapPatchEmbedMeta;
use crate::models::devit::stage::{DevitStage, DevitStageConfig, StageConfig};
use anyhow::Context;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Number of backbone stages.
pub const NUM_STAGES: usize = 4;

/// Patch embedding ``(patch_size, stride)`` of a stage.
pub fn stage_patching(stage: usize) -> (usize, usize) {
    if stage == 0 { (7, 4) } else { (3, 2) }
}

/// [`Devit`] Config.
#[derive(Config, Debug)]
pub struct DevitConfig {
    /// Per-stage hyper-parameters.
    pub stages: Vec<StageConfig>,

    /// Image channels.
    #[config(default = "3")]
    pub in_channels: usize,

    /// Number of classifier outputs; `0` disables the classifier.
    #[config(default = "1000")]
    pub num_classes: usize,

    /// Attention window size.
    #[config(default = "7")]
    pub window_size: usize,

    /// Bias on the attention query / key-value projections.
    #[config(default = "false")]
    pub qkv_bias: bool,

    /// MLP and attention-output dropout.
    #[config(default = "0.0")]
    pub drop_rate: f64,

    /// Attention weight dropout.
    #[config(default = "0.0")]
    pub attn_drop_rate: f64,

    /// Final drop path rate of the stochastic depth schedule.
    #[config(default = "0.0")]
    pub drop_path_rate: f64,

    /// Epsilon of the block and stage norms.
    #[config(default = "1e-5")]
    pub norm_eps: f64,

    /// MLP activation.
    #[config(default = "ActivationConfig::Gelu")]
    pub act: ActivationConfig,

    /// Weight initialization policy.
    #[config(default = "WeightInitConfig::new()")]
    pub weight_init: WeightInitConfig,
}

impl DevitConfig {
    /// Build a config from per-stage lists.
    ///
    /// Stage 0 uses a 7/4 patch embedding; later stages 3/2.
    ///
    /// # Panics
    ///
    /// If the lists differ in length.
    pub fn build(
        embed_dims: &[usize],
        num_heads: &[usize],
        mlp_ratios: &[f64],
        depths: &[usize],
        num_classes: usize,
    ) -> Self {
        let n = embed_dims.len();
        assert!(
            num_heads.len() == n && mlp_ratios.len() == n && depths.len() == n,
            "stage lists differ in length: embed_dims:{embed_dims:?} num_heads:{num_heads:?} mlp_ratios:{mlp_ratios:?} depths:{depths:?}"
        );

        let stages = (0..n)
            .map(|i| {
                let (patch_size, stride) = stage_patching(i);
                StageConfig::new(
                    embed_dims[i],
                    num_heads[i],
                    mlp_ratios[i],
                    depths[i],
                    patch_size,
                    stride,
                )
            })
            .collect();

        Self::new(stages).with_num_classes(num_classes)
    }

    /// Number of stages.
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Per-stage channel widths.
    pub fn embed_dims(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.embed_dim).collect()
    }

    /// Total number of blocks.
    pub fn total_depth(&self) -> usize {
        self.stages.iter().map(|s| s.depth).sum()
    }

    /// Per-block drop path rates, in block order across all stages.
    ///
    /// ``linspace(0, drop_path_rate, total_depth)``
    pub fn stochastic_depth_schedule(&self) -> Vec<f64> {
        let n = self.total_depth();
        match n {
            0 => vec![],
            1 => vec![0.0],
            _ => (0..n)
                .map(|i| self.drop_path_rate * i as f64 / (n - 1) as f64)
                .collect(),
        }
    }

    /// Per-stage configs.
    pub fn stage_configs(&self) -> Vec<DevitStageConfig> {
        let schedule = self.stochastic_depth_schedule();
        let mut cursor = 0;

        self.stages
            .iter()
            .enumerate()
            .map(|(i, stage)| {
                let in_channels = if i == 0 {
                    self.in_channels
                } else {
                    self.stages[i - 1].embed_dim
                };
                let rates = schedule[cursor..cursor + stage.depth].to_vec();
                cursor += stage.depth;

                DevitStageConfig::new(i, in_channels, stage.clone(), rates)
                    .with_window_size(self.window_size)
                    .with_qkv_bias(self.qkv_bias)
                    .with_drop(self.drop_rate)
                    .with_attn_drop(self.attn_drop_rate)
                    .with_norm_eps(self.norm_eps)
                    .with_act(self.act.clone())
            })
            .collect()
    }

    /// Check the config.
    pub fn try_validate(&self) -> anyhow::Result<()> {
        if self.stages.len() != NUM_STAGES {
            anyhow::bail!(
                "expected {NUM_STAGES} stages, got {}",
                self.stages.len()
            );
        }
        if self.in_channels == 0 {
            anyhow::bail!("in_channels must be > 0");
        }
        for (name, prob) in [
            ("drop_rate", self.drop_rate),
            ("attn_drop_rate", self.attn_drop_rate),
            ("drop_path_rate", self.drop_path_rate),
        ] {
            if !(0.0..=1.0).contains(&prob) {
                anyhow::bail!("{name} must be a probability, got {prob}");
            }
        }
        for stage in self.stage_configs() {
            stage.try_validate()?;
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

    /// Predict the token grid of every stage for an input image size.
    ///
    /// Fails if a stage's attention windows do not fit its grid.
    pub fn stage_resolutions(
        &self,
        input_resolution: [usize; 2],
    ) -> anyhow::Result<Vec<[usize; 2]>> {
        let mut resolution = input_resolution;
        let mut resolutions = Vec::with_capacity(self.stages.len());

        for stage in self.stage_configs() {
            resolution = stage
                .patch_embed_config()
                .output_resolution(resolution)
                .with_context(|| format!("stage {} patch embedding", stage.index))?;

            for group in stage.scale_groups() {
                group
                    .geometry()
                    .try_output_resolution(resolution)
                    .with_context(|| {
                        format!(
                            "stage {} scale group {}: window {} with dilation {}",
                            stage.index, group.index, group.window_size, group.dilation
                        )
                    })?;
            }
            resolutions.push(resolution);
        }
        Ok(resolutions)
    }

    /// Initialize a [`Devit`] and apply the weight initialization policy.
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> Devit<B> {
        self.expect_valid();

        let stages: Vec<DevitStage<B>> = self
            .stage_configs()
            .into_iter()
            .map(|config| {
                tracing::debug!(
                    stage = config.index,
                    embed_dim = config.stage.embed_dim,
                    num_heads = config.stage.num_heads,
                    depth = config.stage.depth,
                    scale_groups = config.scale_groups().len(),
                    "building stage"
                );
                config.init(device)
            })
            .collect();

        let head_dim = self.stages[NUM_STAGES - 1].embed_dim;
        let head = if self.num_classes > 0 {
            Some(LinearConfig::new(head_dim, self.num_classes).init(device))
        } else {
            None
        };

        let model = Devit { stages, head }.init_weights(&self.weight_init);

        tracing::info!(
            num_params = model.num_params(),
            num_classes = self.num_classes,
            "initialized DeViT"
        );
        model
    }
}

/// DeViT (Defactorization Transformer) backbone.
#[derive(Module, Debug)]
pub struct Devit<B: Backend> {
    /// Stages, in order.
    pub stages: Vec<DevitStage<B>>,

    /// Optional classifier; identity when absent.
    pub head: Option<Linear<B>>,
}

impl<B: Backend> WeightInit for Devit<B> {
    fn init_weights(
        mut self,
        policy: &WeightInitConfig,
    ) -> Self {
        self.stages = self.stages.init_weights(policy);
        self.head = self.head.init_weights(policy);
        self
    }
}

impl<B: Backend> Devit<B> {
    /// Number of stages.
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Per-stage channel widths.
    pub fn embed_dims(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.embed_dim()).collect()
    }

    /// Width of the pooled feature vector.
    pub fn num_features(&self) -> usize {
        self.stages.last().map_or(0, |s| s.embed_dim())
    }

    /// Number of classifier outputs; `0` when there is no classifier.
    pub fn num_classes(&self) -> usize {
        self.head.as_ref().map_or(0, |head| head.weight.dims()[1])
    }

    /// The classifier head, if any.
    pub fn classifier(&self) -> Option<&Linear<B>> {
        self.head.as_ref()
    }

    /// Replace the classifier head.
    ///
    /// The new head is initialized with the linear weight policy; the
    /// backbone is unchanged. `num_classes == 0` removes the head.
    pub fn reset_classifier(
        mut self,
        num_classes: usize,
        policy: &WeightInitConfig,
    ) -> Self {
        let device = self.stages[0].norm.gamma.device();
        self.head = if num_classes > 0 {
            Some(
                LinearConfig::new(self.num_features(), num_classes)
                    .init(&device)
                    .init_weights(policy),
            )
        } else {
            None
        };
        self
    }

    /// Exclude the first stage's patch embedding from gradient tracking.
    pub fn freeze_patch_embed(mut self) -> Self {
        self.stages = self
            .stages
            .into_iter()
            .enumerate()
            .map(|(i, stage)| {
                if i == 0 {
                    stage.freeze_patch_embed()
                } else {
                    stage
                }
            })
            .collect();
        self
    }

    /// Classify a batch of images.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits; or the pooled features when
    /// there is no classifier.
    #[tracing::instrument(skip_all)]
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let features = self.forward_features(input);
        match &self.head {
            Some(head) => head.forward(features),
            None => features,
        }
    }

    /// Compute the pooled feature vector.
    ///
    /// # Returns
    ///
    /// ``[batch, num_features]``, the mean of the final stage's tokens.
    #[tracing::instrument(skip_all)]
    pub fn forward_features(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let (body, last) = self.stages.split_at(self.stages.len() - 1);
        let x = body.iter().fold(input, |x, stage| stage.forward_map(x));

        let (tokens, _) = last[0].forward(x);
        tokens.mean_dim(1).squeeze::<2>(1)
    }

    /// Compute the normalized feature map of every stage.
    ///
    /// # Returns
    ///
    /// One ``[batch, embed_dims[i], height_i, width_i]`` map per stage.
    #[tracing::instrument(skip_all)]
    pub fn forward_feature_maps(
        &self,
        input: Tensor<B, 4>,
    ) -> Vec<Tensor<B, 4>> {
        let mut maps = Vec::with_capacity(self.stages.len());
        let mut x = input;
        for stage in &self.stages {
            x = stage.forward_map(x);
            maps.push(x.clone());
        }
        maps
    }

    /// Patch embedding ``(patch_size, stride)`` of each stage.
    pub fn stage_patching(&self) -> Vec<(usize, usize)> {
        self.stages
            .iter()
            .map(|s| (s.patch_embed.patch_size(), s.patch_embed.stride()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;
    use hamcrest::prelude::*;

    type B = NdArray<f32>;

    /// A small config that runs quickly on 96x96 images.
    fn tiny_config() -> DevitConfig {
        DevitConfig::build(&[8, 16, 32, 64], &[1, 2, 4, 8], &[2.0; 4], &[1, 1, 1, 1], 10)
            .with_window_size(3)
            .with_qkv_bias(true)
            .with_norm_eps(1e-6)
    }

    #[test]
    fn test_build() {
        let config = DevitConfig::build(
            &[32, 64, 128, 256],
            &[1, 2, 4, 8],
            &[8.0, 6.0, 4.0, 4.0],
            &[2, 2, 5, 2],
            1000,
        );
        assert_eq!(config.num_stages(), 4);
        assert_eq!(config.embed_dims(), vec![32, 64, 128, 256]);
        assert_eq!(config.total_depth(), 11);
        assert_eq!(config.stages[0].patch_size, 7);
        assert_eq!(config.stages[0].stride, 4);
        for stage in &config.stages[1..] {
            assert_eq!(stage.patch_size, 3);
            assert_eq!(stage.stride, 2);
        }
        assert_eq!(config.window_size, 7);
        assert!(config.try_validate().is_ok());

        let stages = config.stage_configs();
        assert_eq!(stages[0].in_channels, 3);
        assert_eq!(stages[1].in_channels, 32);
        assert_eq!(stages[3].in_channels, 128);
        assert_eq!(stages[2].scale_groups().len(), 2);
        assert_eq!(stages[3].scale_groups().len(), 1);
    }

    #[test]
    #[should_panic(expected = "stage lists differ in length")]
    fn test_build_panics() {
        DevitConfig::build(&[8, 16], &[1], &[2.0, 2.0], &[1, 1], 10);
    }

    #[test]
    fn test_stochastic_depth_schedule() {
        let config = tiny_config().with_drop_path_rate(0.3);
        let schedule = config.stochastic_depth_schedule();
        assert_eq!(schedule.len(), 4);
        assert_eq!(schedule[0], 0.0);
        assert_that!(schedule[1], close_to(0.1, 1e-12));
        assert_that!(schedule[2], close_to(0.2, 1e-12));
        assert_that!(schedule[3], close_to(0.3, 1e-12));

        let stages = config.stage_configs();
        assert_eq!(stages[0].drop_path_rates, vec![0.0]);
        assert_that!(stages[3].drop_path_rates[0], close_to(0.3, 1e-12));

        let zero = tiny_config().stochastic_depth_schedule();
        assert!(zero.iter().all(|&r| r == 0.0));
    }

    #[test]
    fn test_validate() {
        assert!(tiny_config().try_validate().is_ok());

        let three = DevitConfig::build(&[8, 16, 32], &[1, 2, 4], &[2.0; 3], &[1, 1, 1], 10);
        assert_eq!(
            three.try_validate().unwrap_err().to_string(),
            "expected 4 stages, got 3"
        );

        let bad_heads =
            DevitConfig::build(&[8, 16, 32, 64], &[1, 3, 4, 8], &[2.0; 4], &[1, 1, 1, 1], 10);
        let err = bad_heads.try_validate().unwrap_err().to_string();
        assert!(err.starts_with("stage 1:"), "{err}");

        assert!(
            tiny_config()
                .with_drop_path_rate(1.5)
                .try_validate()
                .is_err()
        );
    }

    #[test]
    fn test_stage_resolutions() {
        let config = tiny_config();
        assert_eq!(
            config.stage_resolutions([96, 96]).unwrap(),
            vec![[24, 24], [12, 12], [6, 6], [3, 3]]
        );

        let b0 = DevitConfig::build(
            &[32, 64, 128, 256],
            &[1, 2, 4, 8],
            &[8.0, 6.0, 4.0, 4.0],
            &[2, 2, 5, 2],
            1000,
        );
        assert_eq!(
            b0.stage_resolutions([224, 224]).unwrap(),
            vec![[56, 56], [28, 28], [14, 14], [7, 7]]
        );

        // 192 -> 48, 24, 12: stage 2's dilated window (extent 13) does not fit.
        let err = b0.stage_resolutions([192, 192]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "stage 2 scale group 1: window 7 with dilation 2"
        );
    }

    #[test]
    fn test_init() {
        let device = Default::default();
        let model: Devit<B> = tiny_config().init(&device);

        assert_eq!(model.num_stages(), 4);
        assert_eq!(model.embed_dims(), vec![8, 16, 32, 64]);
        assert_eq!(model.num_features(), 64);
        assert_eq!(model.num_classes(), 10);
        assert_eq!(
            model.stage_patching(),
            vec![(7, 4), (3, 2), (3, 2), (3, 2)]
        );
        assert_eq!(model.stages[0].blocks[0].attn.groups.len(), 2);
        assert_eq!(model.stages[3].blocks[0].attn.groups.len(), 1);

        // Init policy: zero biases and unit norms.
        let head = model.classifier().unwrap();
        head.bias
            .as_ref()
            .unwrap()
            .val()
            .to_data()
            .assert_eq(&Tensor::<B, 1>::zeros([10], &device).to_data(), true);
        model.stages[2].norm
            .gamma
            .val()
            .to_data()
            .assert_eq(&Tensor::<B, 1>::ones([32], &device).to_data(), true);
        model.stages[1].blocks[0]
            .attn
            .kv
            .depth_conv
            .bias
            .as_ref()
            .unwrap()
            .val()
            .to_data()
            .assert_eq(&Tensor::<B, 1>::zeros([16], &device).to_data(), true);
    }

    #[test]
    fn test_forward() {
        let device = Default::default();
        let model: Devit<B> = tiny_config().init(&device);

        let input = Tensor::random([2, 3, 96, 96], Distribution::Default, &device);

        let features = model.forward_features(input.clone());
        assert_shape_contract!(
            ["batch", "features"],
            &features,
            &[("batch", 2), ("features", 64)],
        );

        let logits = model.forward(input.clone());
        assert_shape_contract!(
            ["batch", "classes"],
            &logits,
            &[("batch", 2), ("classes", 10)],
        );
        let expected = model.head.as_ref().unwrap().forward(features);
        logits.to_data().assert_eq(&expected.to_data(), true);

        // Inference is deterministic.
        model
            .forward(input)
            .to_data()
            .assert_eq(&logits.to_data(), true);
    }

    #[test]
    fn test_forward_feature_maps() {
        let device = Default::default();
        let model: Devit<B> = tiny_config().init(&device);

        let input = Tensor::random([1, 3, 96, 96], Distribution::Default, &device);
        let maps = model.forward_feature_maps(input.clone());

        let dims: Vec<[usize; 4]> = maps.iter().map(|m| m.dims()).collect();
        assert_eq!(
            dims,
            vec![[1, 8, 24, 24], [1, 16, 12, 12], [1, 32, 6, 6], [1, 64, 3, 3]]
        );

        // The pooled features are the spatial mean of the last map.
        let pooled = maps[3].clone().flatten::<3>(2, 3).mean_dim(2).squeeze::<2>(2);
        let features = model.forward_features(input);
        let diff = (pooled - features).abs().max().into_scalar();
        assert!(diff < 1e-5, "max diff: {diff}");
    }

    #[test]
    fn test_drop_path_does_not_change_shapes() {
        let device = Default::default();
        let model: Devit<B> = tiny_config().with_drop_path_rate(0.2).init(&device);
        assert!(model.stages[0].blocks[0].drop_path.is_none());
        assert!(model.stages[3].blocks[0].drop_path.is_some());

        let input = Tensor::random([2, 3, 96, 96], Distribution::Default, &device);
        assert_eq!(model.forward(input).dims(), [2, 10]);
    }

    #[test]
    fn test_headless() {
        let device = Default::default();
        let model: Devit<B> = tiny_config().with_num_classes(0).init(&device);
        assert!(model.classifier().is_none());
        assert_eq!(model.num_classes(), 0);

        let input = Tensor::random([2, 3, 96, 96], Distribution::Default, &device);
        model
            .forward(input.clone())
            .to_data()
            .assert_eq(&model.forward_features(input).to_data(), true);
    }

    #[test]
    fn test_reset_classifier() {
        let device = Default::default();
        let model: Devit<B> = tiny_config().init(&device);
        let input = Tensor::random([1, 3, 96, 96], Distribution::Default, &device);
        let features = model.forward_features(input.clone());

        let model = model.reset_classifier(5, &WeightInitConfig::new());
        assert_eq!(model.num_classes(), 5);
        assert_eq!(model.forward(input.clone()).dims(), [1, 5]);

        // The backbone is unchanged.
        model
            .forward_features(input.clone())
            .to_data()
            .assert_eq(&features.to_data(), true);

        let model = model.reset_classifier(0, &WeightInitConfig::new());
        assert!(model.classifier().is_none());
        assert_eq!(model.forward(input).dims(), [1, 64]);
    }

    #[test]
    fn test_freeze_patch_embed() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();
        let model: Devit<B> = tiny_config().init(&device);
        assert!(model.stages[0].patch_embed.proj.weight.is_require_grad());
        let input = Tensor::random([1, 3, 96, 96], Distribution::Default, &device);
        let before = model.forward(input.clone());

        let model = model.freeze_patch_embed();
        model
            .forward(input)
            .to_data()
            .assert_eq(&before.to_data(), true);

        let embed = &model.stages[0].patch_embed;
        assert!(!embed.proj.weight.is_require_grad());
        assert!(!embed.norm.gamma.is_require_grad());

        assert!(model.stages[1].patch_embed.proj.weight.is_require_grad());
        for stage in &model.stages {
            assert!(stage.blocks[0].attn.q.weight.is_require_grad());
            assert!(stage.blocks[0].mlp.fc1.weight.is_require_grad());
            assert!(stage.norm.gamma.is_require_grad());
        }
        assert!(model.head.as_ref().unwrap().weight.is_require_grad());
    }

    #[test]
    #[should_panic(expected = "expected 4 stages, got 2")]
    fn test_init_panics() {
        let device = Default::default();
        let _: Devit<B> =
            DevitConfig::build(&[8, 16], &[1, 2], &[2.0; 2], &[1, 1], 10).init(&device);
    }

    #[test]
    #[should_panic(expected = "does not fit input")]
    fn test_small_input_panics() {
        let device = Default::default();
        let model: Devit<B> = tiny_config().init(&device);
        // 64 -> 16, 8, 4, 2: stage 2's dilated window (extent 5) does not fit 4x4.
        let input = Tensor::zeros([1, 3, 64, 64], &device);
        model.forward(input);
    }
}

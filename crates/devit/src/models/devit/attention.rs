//! # Defactorized Multi-Scale Window Attention
//!
//! Queries are taken from every token; keys and values come from a
//! compact per-window summary of a depthwise-separable projection of
//! the input map.
//!
//! The channel dimension is partitioned into one or more *scale groups*.
//! Group `i` extracts ``window_size x window_size`` windows with dilation
//! `2^i` and stride ``2^i * (window_size - 1) + 1`` (non-overlapping
//! dilated windows), averages across windows down to one
//! ``window_size^2`` token set per head, and attends from the group's
//! slice of the queries to those summary tokens. Group outputs are
//! concatenated back to the full channel width.
//!
//! Cost is ``O(N * window_size^2)`` per group rather than ``O(N^2)``.
use crate::compat::conv_shape::ConvGeometry;
use crate::layers::conv::depthwise_separable::{DepthwiseSeparableConfig, DepthwiseSeparableConv};
use crate::layers::init::{WeightInit, WeightInitConfig};
use crate::utility::probability::expect_probability;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool1d, AdaptiveAvgPool1dConfig};
use burn::nn::{
    Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Unfold4d, Unfold4dConfig,
};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::softmax;

/// Scale-group weights for a backbone stage.
///
/// Stages `0..3` split channels evenly across two scales;
/// the last stage (whose grid is a single window) uses one.
pub fn stage_scale_weights(stage: usize) -> Vec<usize> {
    if stage < 3 { vec![1, 1] } else { vec![1] }
}

/// Resolved geometry of one scale group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleGroupSpec {
    /// Group index; also the dilation exponent.
    pub index: usize,

    /// First channel of the group.
    pub offset: usize,

    /// Number of channels in the group.
    pub channels: usize,

    /// Window size.
    pub window_size: usize,

    /// Window dilation, ``2^index``.
    pub dilation: usize,
}

impl ScaleGroupSpec {
    /// Window stride; windows tile without overlap.
    pub fn stride(&self) -> usize {
        self.dilation * (self.window_size - 1) + 1
    }

    /// The sliding-window geometry.
    pub fn geometry(&self) -> ConvGeometry {
        ConvGeometry::new(self.window_size, self.stride()).with_dilation(self.dilation)
    }

    /// Number of summary tokens, ``window_size^2``.
    pub fn window_area(&self) -> usize {
        self.window_size * self.window_size
    }
}

/// [`DefactorizedAttention`] Meta trait.
pub trait DefactorizedAttentionMeta {
    /// Input/output channel dimension.
    fn dim(&self) -> usize;

    /// Number of attention heads.
    fn num_heads(&self) -> usize;

    /// Window size of every scale group.
    fn window_size(&self) -> usize;

    /// Per-head channel width.
    fn head_dim(&self) -> usize {
        self.dim() / self.num_heads()
    }
}

/// [`DefactorizedAttention`] Config.
#[derive(Config, Debug)]
pub struct DefactorizedAttentionConfig {
    /// Input/output channel dimension.
    pub dim: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Relative channel share of each scale group.
    #[config(default = "vec![1, 1]")]
    pub scale_weights: Vec<usize>,

    /// Window size of every scale group.
    #[config(default = "7")]
    pub window_size: usize,

    /// Enable bias on the query and key/value summary projections.
    #[config(default = "false")]
    pub qkv_bias: bool,

    /// Dropout on attention weights.
    #[config(default = "0.0")]
    pub attn_drop: f64,

    /// Dropout on the output projection.
    #[config(default = "0.0")]
    pub proj_drop: f64,
}

impl DefactorizedAttentionMeta for DefactorizedAttentionConfig {
    fn dim(&self) -> usize {
        self.dim
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn window_size(&self) -> usize {
        self.window_size
    }
}

impl DefactorizedAttentionConfig {
    /// Create a config with the scale groups of a backbone stage.
    pub fn for_stage(
        dim: usize,
        num_heads: usize,
        stage: usize,
    ) -> Self {
        Self::new(dim, num_heads).with_scale_weights(stage_scale_weights(stage))
    }

    /// Resolve the channel partition.
    ///
    /// Group `i` has ``dim / sum(scale_weights) * scale_weights[i]`` channels.
    pub fn scale_groups(&self) -> Vec<ScaleGroupSpec> {
        let total: usize = self.scale_weights.iter().sum();
        let unit = if total == 0 { 0 } else { self.dim / total };

        let mut offset = 0;
        self.scale_weights
            .iter()
            .enumerate()
            .map(|(index, &weight)| {
                let channels = unit * weight;
                let spec = ScaleGroupSpec {
                    index,
                    offset,
                    channels,
                    window_size: self.window_size,
                    dilation: 1 << index,
                };
                offset += channels;
                spec
            })
            .collect()
    }

    /// Check the config.
    pub fn try_validate(&self) -> anyhow::Result<()> {
        let dim = self.dim;
        let heads = self.num_heads;
        if heads == 0 || dim % heads != 0 {
            anyhow::bail!("dim {dim} should be divided by num_heads {heads}");
        }
        if self.window_size == 0 {
            anyhow::bail!("window_size must be > 0");
        }
        if self.scale_weights.is_empty() || self.scale_weights.contains(&0) {
            anyhow::bail!(
                "scale_weights must be non-empty and positive: {:?}",
                self.scale_weights
            );
        }
        let total: usize = self.scale_weights.iter().sum();
        if dim % total != 0 {
            anyhow::bail!(
                "dim {dim} should be divided by the sum of scale_weights {:?}",
                self.scale_weights
            );
        }
        for group in self.scale_groups() {
            if group.channels % heads != 0 {
                anyhow::bail!(
                    "scale group {} width {} should be divided by num_heads {heads}",
                    group.index,
                    group.channels
                );
            }
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

    /// Initialize a [`DefactorizedAttention`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> DefactorizedAttention<B> {
        self.expect_valid();
        let attn_drop = expect_probability(self.attn_drop);
        let proj_drop = expect_probability(self.proj_drop);

        let groups = self
            .scale_groups()
            .into_iter()
            .map(|spec| ScaleGroup::new(spec, self.num_heads, self.qkv_bias, device))
            .collect();

        DefactorizedAttention {
            dim: self.dim,
            num_heads: self.num_heads,
            window_size: self.window_size,
            q: LinearConfig::new(self.dim, self.dim)
                .with_bias(self.qkv_bias)
                .init(device),
            kv: DepthwiseSeparableConfig::new(self.dim, self.dim).init(device),
            groups,
            attn_drop: DropoutConfig::new(attn_drop).init(),
            proj: LinearConfig::new(self.dim, self.dim).init(device),
            proj_drop: DropoutConfig::new(proj_drop).init(),
        }
    }
}

/// One scale group of [`DefactorizedAttention`].
#[derive(Module, Debug)]
pub struct ScaleGroup<B: Backend> {
    /// Group index; also the dilation exponent.
    pub index: usize,

    /// First channel of the group.
    pub offset: usize,

    /// Number of channels in the group.
    pub channels: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Window size.
    pub window_size: usize,

    /// Window dilation.
    pub dilation: usize,

    /// Attention logit scale, ``(channels / num_heads)^-0.5``.
    pub scale: f64,

    /// Dilated window extraction.
    pub unfold: Unfold4d,

    /// Cross-window average pooling.
    pub pool: AdaptiveAvgPool1d,

    /// Summary token mixing, ``head_dim -> head_dim``.
    pub fc: Linear<B>,

    /// Key/value projection, ``head_dim -> 2 * head_dim``.
    pub single_head: Linear<B>,

    /// Depthwise 3x3 positional residual on the values.
    pub local_conv: Conv2d<B>,
}

impl<B: Backend> ScaleGroup<B> {
    fn new(
        spec: ScaleGroupSpec,
        num_heads: usize,
        qkv_bias: bool,
        device: &B::Device,
    ) -> Self {
        let head_dim = spec.channels / num_heads;
        let ws = spec.window_size;
        let stride = spec.stride();
        let c = spec.channels;

        Self {
            index: spec.index,
            offset: spec.offset,
            channels: c,
            num_heads,
            window_size: ws,
            dilation: spec.dilation,
            scale: (head_dim as f64).powf(-0.5),
            unfold: Unfold4dConfig::new([ws, ws])
                .with_stride([stride, stride])
                .with_dilation([spec.dilation, spec.dilation])
                .with_padding([0, 0])
                .init(),
            pool: AdaptiveAvgPool1dConfig::new(head_dim).init(),
            fc: LinearConfig::new(head_dim, head_dim)
                .with_bias(qkv_bias)
                .init(device),
            single_head: LinearConfig::new(head_dim, 2 * head_dim)
                .with_bias(qkv_bias)
                .init(device),
            local_conv: Conv2dConfig::new([c, c], [3, 3])
                .with_groups(c)
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
        }
    }

    /// The geometry record of this group.
    pub fn spec(&self) -> ScaleGroupSpec {
        ScaleGroupSpec {
            index: self.index,
            offset: self.offset,
            channels: self.channels,
            window_size: self.window_size,
            dilation: self.dilation,
        }
    }

    /// Per-head channel width.
    pub fn head_dim(&self) -> usize {
        self.channels / self.num_heads
    }

    /// Summarize a key/value channel slice into per-head keys and values.
    ///
    /// # Arguments
    ///
    /// - `kv`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``(k, v)``, each ``[batch, heads, window_size^2, head_dim]``.
    ///
    /// # Panics
    ///
    /// If no window fits in ``[height, width]``.
    pub fn summarize(
        &self,
        kv: Tensor<B, 4>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &kv,
            &["batch", "height", "width"],
            &[("channels", self.channels)]
        );
        let spec = self.spec();
        let [wh, ww] = match spec.geometry().maybe_output_resolution([height, width]) {
            Some(resolution) => resolution,
            None => panic!(
                "scale group {}: window {} with dilation {} (extent {}) does not fit input {height}x{width}",
                self.index,
                self.window_size,
                self.dilation,
                spec.geometry().receptive_field(),
            ),
        };
        let num_windows = wh * ww;
        let heads = self.num_heads;
        let head_dim = self.head_dim();
        let area = spec.window_area();

        // [batch, channels * area, num_windows]
        let windows = self.unfold.forward(kv);

        let summary = windows
            .reshape([batch, heads, head_dim, area, num_windows])
            .permute([0, 1, 3, 4, 2])
            .reshape([batch, heads * area, num_windows * head_dim]);
        let summary = self
            .pool
            .forward(summary)
            .reshape([batch, heads, area, head_dim]);

        let summary = self.fc.forward(summary);
        let kv = self.single_head.forward(summary);

        let k = kv.clone().narrow(3, 0, head_dim);
        let v = kv.narrow(3, head_dim, head_dim);
        (k, v)
    }

    /// Add the local-convolution residual to the values.
    ///
    /// The ``window_size^2`` summary tokens are viewed as a
    /// ``window_size x window_size`` map.
    pub fn local_residual(
        &self,
        v: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, heads, area, head_dim] = v.dims();
        let ws = self.window_size;

        let local = v
            .clone()
            .swap_dims(2, 3)
            .reshape([batch, self.channels, ws, ws]);
        let local = self
            .local_conv
            .forward(local)
            .reshape([batch, heads, head_dim, area])
            .swap_dims(2, 3);

        v + local
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `q`: ``[batch, heads, tokens, head_dim]``, this group's query slice.
    /// - `kv`: ``[batch, channels, height, width]``, this group's key/value slice.
    /// - `attn_drop`: dropout on the attention weights.
    ///
    /// # Returns
    ///
    /// ``[batch, tokens, channels]``
    pub fn forward(
        &self,
        q: Tensor<B, 4>,
        kv: Tensor<B, 4>,
        attn_drop: &Dropout,
    ) -> Tensor<B, 3> {
        let [batch, tokens] = unpack_shape_contract!(
            ["batch", "heads", "tokens", "head_dim"],
            &q,
            &["batch", "tokens"],
            &[("heads", self.num_heads), ("head_dim", self.head_dim())]
        );

        let (k, v) = self.summarize(kv);

        let attn = q.matmul(k.swap_dims(2, 3)).mul_scalar(self.scale);
        let attn = softmax(attn, 3);
        let attn = attn_drop.forward(attn);

        let v = self.local_residual(v);

        attn.matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, tokens, self.channels])
    }
}

impl<B: Backend> WeightInit for ScaleGroup<B> {
    fn init_weights(
        mut self,
        policy: &WeightInitConfig,
    ) -> Self {
        self.fc = self.fc.init_weights(policy);
        self.single_head = self.single_head.init_weights(policy);
        self.local_conv = self.local_conv.init_weights(policy);
        self
    }
}

/// Defactorized Multi-Scale Window Attention.
///
/// Implements [`DefactorizedAttentionMeta`].
#[derive(Module, Debug)]
pub struct DefactorizedAttention<B: Backend> {
    /// Input/output channel dimension.
    pub dim: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Window size of every scale group.
    pub window_size: usize,

    /// Query projection.
    pub q: Linear<B>,

    /// Key/value map projection.
    pub kv: DepthwiseSeparableConv<B>,

    /// Scale groups, in channel order.
    pub groups: Vec<ScaleGroup<B>>,

    /// Attention weight dropout.
    pub attn_drop: Dropout,

    /// Output projection.
    pub proj: Linear<B>,

    /// Output dropout.
    pub proj_drop: Dropout,
}

impl<B: Backend> DefactorizedAttentionMeta for DefactorizedAttention<B> {
    fn dim(&self) -> usize {
        self.dim
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn window_size(&self) -> usize {
        self.window_size
    }
}

impl<B: Backend> WeightInit for DefactorizedAttention<B> {
    fn init_weights(
        mut self,
        policy: &WeightInitConfig,
    ) -> Self {
        self.q = self.q.init_weights(policy);
        self.kv = self.kv.init_weights(policy);
        self.groups = self.groups.init_weights(policy);
        self.proj = self.proj.init_weights(policy);
        self
    }
}

impl<B: Backend> DefactorizedAttention<B> {
    /// The geometry records of the scale groups.
    pub fn scale_groups(&self) -> Vec<ScaleGroupSpec> {
        self.groups.iter().map(|g| g.spec()).collect()
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, height*width, dim]`` tokens.
    /// - `resolution`: the ``[height, width]`` token grid.
    ///
    /// # Returns
    ///
    /// ``[batch, height*width, dim]``
    ///
    /// # Panics
    ///
    /// If a scale group's window does not fit the grid.
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        resolution: [usize; 2],
    ) -> Tensor<B, 3> {
        let [height, width] = resolution;
        let heads = self.num_heads;
        let head_dim = self.head_dim();
        let [batch] = unpack_shape_contract!(
            ["batch", "height" * "width", "dim"],
            &x,
            &["batch"],
            &[("height", height), ("width", width), ("dim", self.dim)]
        );
        let tokens = height * width;

        let q = self
            .q
            .forward(x.clone())
            .reshape([batch, tokens, heads, head_dim])
            .swap_dims(1, 2);

        let map = x
            .reshape([batch, height, width, self.dim])
            .permute([0, 3, 1, 2]);
        let kv = self.kv.forward(map);

        let mut outputs: Vec<Tensor<B, 3>> = self
            .groups
            .iter()
            .map(|group| {
                let q = q
                    .clone()
                    .narrow(3, group.offset / heads, group.head_dim());
                let kv = kv.clone().narrow(1, group.offset, group.channels);
                group.forward(q, kv, &self.attn_drop)
            })
            .collect();

        let x = if outputs.len() == 1 {
            outputs.remove(0)
        } else {
            Tensor::cat(outputs, 2)
        };

        let x = self.proj.forward(x);
        let x = self.proj_drop.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "tokens", "dim"],
            &x,
            &[("batch", batch), ("tokens", tokens), ("dim", self.dim)]
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};
    use hamcrest::prelude::*;

    type B = NdArray<f32>;

    /// Per-head summary tokens computed by direct indexing.
    ///
    /// For each head and window position, the ``[num_windows, head_dim]``
    /// values are flattened window-major and mean-pooled in `head_dim`
    /// contiguous bins, so bins straddle windows.
    fn pooled_summary_reference(
        group: &ScaleGroup<B>,
        kv: &Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, channels, height, width] = kv.dims();
        let values = kv.to_data().to_vec::<f32>().unwrap();
        let at = |b: usize, c: usize, y: usize, x: usize| {
            values[((b * channels + c) * height + y) * width + x]
        };

        let spec = group.spec();
        let [wh, ww] = spec.geometry().expect_output_resolution([height, width]);
        let num_windows = wh * ww;
        let stride = spec.stride();
        let ws = group.window_size;
        let heads = group.num_heads;
        let head_dim = group.head_dim();

        let mut pooled = Vec::with_capacity(batch * heads * ws * ws * head_dim);
        for b in 0..batch {
            for h in 0..heads {
                for ki in 0..ws {
                    for kj in 0..ws {
                        let mut seq = Vec::with_capacity(num_windows * head_dim);
                        for w in 0..num_windows {
                            let y = (w / ww) * stride + ki * group.dilation;
                            let x = (w % ww) * stride + kj * group.dilation;
                            for d in 0..head_dim {
                                seq.push(at(b, h * head_dim + d, y, x));
                            }
                        }
                        for bin in seq.chunks(num_windows) {
                            pooled.push(bin.iter().sum::<f32>() / num_windows as f32);
                        }
                    }
                }
            }
        }

        Tensor::from_data(
            TensorData::new(pooled, [batch, heads, ws * ws, head_dim]),
            &kv.device(),
        )
    }

    #[test]
    fn test_stage_scale_weights() {
        assert_eq!(stage_scale_weights(0), vec![1, 1]);
        assert_eq!(stage_scale_weights(1), vec![1, 1]);
        assert_eq!(stage_scale_weights(2), vec![1, 1]);
        assert_eq!(stage_scale_weights(3), vec![1]);
    }

    #[test]
    fn test_partition_covers_dim() {
        for (stage, (dim, heads)) in [(32, 1), (64, 2), (128, 4), (256, 8)]
            .into_iter()
            .enumerate()
        {
            let config = DefactorizedAttentionConfig::for_stage(dim, heads, stage);
            config.expect_valid();

            let groups = config.scale_groups();
            assert_eq!(groups.len(), if stage < 3 { 2 } else { 1 });
            assert_eq!(groups.iter().map(|g| g.channels).sum::<usize>(), dim);

            let mut offset = 0;
            for (i, group) in groups.iter().enumerate() {
                assert_eq!(group.index, i);
                assert_eq!(group.offset, offset);
                assert_eq!(group.dilation, 1 << i);
                assert_eq!(group.channels % heads, 0);
                offset += group.channels;
            }
        }
    }

    #[test]
    fn test_group_geometry() {
        let groups = DefactorizedAttentionConfig::for_stage(64, 2, 0).scale_groups();
        assert_eq!(groups[0].stride(), 7);
        assert_eq!(groups[0].geometry().receptive_field(), 7);
        assert_eq!(groups[1].stride(), 13);
        assert_eq!(groups[1].geometry().receptive_field(), 13);
        assert_eq!(groups[1].window_area(), 49);
    }

    #[test]
    fn test_validate() {
        assert!(
            DefactorizedAttentionConfig::new(12, 5)
                .try_validate()
                .is_err()
        );
        // dim 6 splits into two groups of 3, which is not divisible by 2 heads.
        assert!(
            DefactorizedAttentionConfig::new(6, 2)
                .try_validate()
                .is_err()
        );
        assert!(
            DefactorizedAttentionConfig::new(5, 1)
                .try_validate()
                .is_err()
        );
        assert!(
            DefactorizedAttentionConfig::new(8, 2)
                .with_scale_weights(vec![])
                .try_validate()
                .is_err()
        );
        assert!(DefactorizedAttentionConfig::new(8, 2).try_validate().is_ok());
    }

    #[test]
    #[should_panic(expected = "dim 12 should be divided by num_heads 5")]
    fn test_init_panics() {
        let device = Default::default();
        let _: DefactorizedAttention<B> = DefactorizedAttentionConfig::new(12, 5).init(&device);
    }

    #[test]
    fn test_module_shapes() {
        let device = Default::default();
        let attn: DefactorizedAttention<B> = DefactorizedAttentionConfig::for_stage(16, 2, 0)
            .with_qkv_bias(true)
            .init(&device);

        assert_eq!(attn.head_dim(), 8);
        assert_eq!(attn.groups.len(), 2);
        assert!(attn.q.bias.is_some());
        assert!(attn.proj.bias.is_some());

        let group = &attn.groups[1];
        assert_eq!(group.head_dim(), 4);
        assert_eq!(group.fc.weight.dims(), [4, 4]);
        assert_eq!(group.single_head.weight.dims(), [4, 8]);
        assert_eq!(group.local_conv.weight.dims(), [8, 1, 3, 3]);
        assert_that!(group.scale, close_to(0.5, 1e-12));
    }

    #[test]
    fn test_single_group_forward() {
        let device = Default::default();
        let attn: DefactorizedAttention<B> =
            DefactorizedAttentionConfig::for_stage(256, 8, 3).init(&device);
        assert_eq!(attn.groups.len(), 1);

        let x = Tensor::random([2, 49, 256], Distribution::Default, &device);
        let y = attn.forward(x, [7, 7]);

        assert_shape_contract!(
            ["batch", "tokens", "dim"],
            &y,
            &[("batch", 2), ("tokens", 49), ("dim", 256)],
        );
    }

    #[test]
    fn test_two_group_forward() {
        let device = Default::default();
        let attn: DefactorizedAttention<B> = DefactorizedAttentionConfig::for_stage(16, 2, 0)
            .with_window_size(3)
            .init(&device);

        // group 0: 3x3 windows, stride 3 -> 2x2 windows
        // group 1: dilated extent 5, stride 5 -> 1x1 window
        let x = Tensor::random([3, 6 * 8, 16], Distribution::Default, &device);
        let y = attn.forward(x.clone(), [6, 8]);
        assert_eq!(y.dims(), [3, 48, 16]);

        // Inference is deterministic.
        let y2 = attn.forward(x, [6, 8]);
        y.to_data().assert_eq(&y2.to_data(), true);
    }

    #[test]
    fn test_group_forward_decomposition() {
        let device = Default::default();
        let attn: DefactorizedAttention<B> = DefactorizedAttentionConfig::for_stage(16, 2, 0)
            .with_window_size(3)
            .init(&device);

        let x = Tensor::<B, 3>::random([1, 36, 16], Distribution::Default, &device);
        let y = attn.forward(x.clone(), [6, 6]);

        let q = attn.q.forward(x.clone()).reshape([1, 36, 2, 8]).swap_dims(1, 2);
        let kv = attn
            .kv
            .forward(x.reshape([1, 6, 6, 16]).permute([0, 3, 1, 2]));

        let lo = attn.groups[0].forward(
            q.clone().narrow(3, 0, 4),
            kv.clone().narrow(1, 0, 8),
            &attn.attn_drop,
        );
        let hi = attn.groups[1].forward(q.narrow(3, 4, 4), kv.narrow(1, 8, 8), &attn.attn_drop);
        let expected = attn.proj.forward(Tensor::cat(vec![lo, hi], 2));

        y.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_single_window_summary_is_unpooled() {
        let device = Default::default();
        let attn: DefactorizedAttention<B> =
            DefactorizedAttentionConfig::for_stage(8, 2, 3)
                .with_window_size(3)
                .init(&device);
        let group = &attn.groups[0];

        // A 3x3 map holds exactly one window; pooling is then the identity.
        let kv = Tensor::<B, 4>::random([1, 8, 3, 3], Distribution::Default, &device);
        let (k, v) = group.summarize(kv.clone());
        assert_eq!(k.dims(), [1, 2, 9, 4]);
        assert_eq!(v.dims(), [1, 2, 9, 4]);

        // [1, 8, 3, 3] -> [1, heads, head_dim, 9] -> [1, heads, 9, head_dim]
        let tokens = kv.reshape([1, 2, 4, 9]).swap_dims(2, 3);
        let expected = group.single_head.forward(group.fc.forward(tokens));
        let expected_k = expected.clone().narrow(3, 0, 4);
        let expected_v = expected.narrow(3, 4, 4);

        k.to_data().assert_eq(&expected_k.to_data(), true);
        v.to_data().assert_eq(&expected_v.to_data(), true);
    }

    #[test]
    fn test_multi_window_summary_matches_reference() {
        let device = Default::default();
        let attn: DefactorizedAttention<B> = DefactorizedAttentionConfig::for_stage(16, 2, 0)
            .with_window_size(3)
            .init(&device);

        // group 0: extent 3, stride 3; group 1: extent 5, stride 5.
        // Both grids hold 2x3 windows.
        for (group, [height, width]) in [(&attn.groups[0], [6, 9]), (&attn.groups[1], [10, 15])] {
            assert_eq!(
                group.spec().geometry().expect_output_resolution([height, width]),
                [2, 3]
            );

            let kv = Tensor::<B, 4>::random([2, 8, height, width], Distribution::Default, &device);
            let (k, v) = group.summarize(kv.clone());

            let expected = group
                .single_head
                .forward(group.fc.forward(pooled_summary_reference(group, &kv)));
            let expected_k = expected.clone().narrow(3, 0, 4);
            let expected_v = expected.narrow(3, 4, 4);

            for (actual, expected) in [(k, expected_k), (v, expected_v)] {
                assert_eq!(actual.dims(), [2, 2, 9, 4]);
                let actual = actual.to_data().to_vec::<f32>().unwrap();
                let expected = expected.to_data().to_vec::<f32>().unwrap();
                for (a, e) in actual.iter().zip(&expected) {
                    assert_that!(*a as f64, close_to(*e as f64, 1e-5));
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "scale group 1: window 7 with dilation 2 (extent 13) does not fit input 7x7")]
    fn test_small_input_panics() {
        let device = Default::default();
        let attn: DefactorizedAttention<B> =
            DefactorizedAttentionConfig::for_stage(16, 2, 0).init(&device);

        let x = Tensor::zeros([1, 49, 16], &device);
        attn.forward(x, [7, 7]);
    }
}

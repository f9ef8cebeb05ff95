//! # Weight Initialization Policy
//!
//! A single post-construction pass which re-initializes every parameter
//! of a model according to its layer kind:
//!
//! * [`Linear`] - weight from a truncated normal, bias zero.
//! * [`LayerNorm`] - weight one, bias zero.
//! * [`Conv2d`] - weight from `Normal(0, sqrt(gain / fan_out))`, where
//!   `fan_out = kernel_h * kernel_w * out_channels / groups`; bias zero.
//!
//! Composite modules implement [`WeightInit`] by forwarding to their
//! children.
use burn::module::Param;
use burn::nn::LayerNorm;
use burn::nn::Linear;
use burn::nn::conv::Conv2d;
use burn::prelude::{Backend, Config, Tensor};
use burn::tensor::Distribution;

/// Weight Initialization Policy Config.
#[derive(Config, Debug)]
pub struct WeightInitConfig {
    /// Standard deviation of linear weights.
    #[config(default = "0.02")]
    pub linear_std: f64,

    /// Absolute truncation bound of linear weights.
    ///
    /// Samples are clamped to ``[-bound, bound]``.
    #[config(default = "2.0")]
    pub linear_trunc_bound: f64,

    /// Variance gain of convolution weights.
    #[config(default = "2.0")]
    pub conv_gain: f64,
}

impl Default for WeightInitConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightInitConfig {
    /// The standard deviation for a conv weight with the given `fan_out`.
    pub fn conv_std(
        &self,
        fan_out: usize,
    ) -> f64 {
        (self.conv_gain / fan_out as f64).sqrt()
    }

    /// Sample a truncated normal tensor for a linear weight.
    pub fn sample_linear_weight<B: Backend, const D: usize>(
        &self,
        shape: [usize; D],
        device: &B::Device,
    ) -> Tensor<B, D> {
        Tensor::random(shape, Distribution::Normal(0.0, self.linear_std), device)
            .clamp(-self.linear_trunc_bound, self.linear_trunc_bound)
    }

    /// Apply the policy to a module.
    pub fn apply<M: WeightInit>(
        &self,
        module: M,
    ) -> M {
        module.init_weights(self)
    }
}

/// Modules which can be re-initialized under a [`WeightInitConfig`].
pub trait WeightInit: Sized {
    /// Re-initialize all parameters.
    fn init_weights(
        self,
        policy: &WeightInitConfig,
    ) -> Self;
}

fn fill_zeros<B: Backend, const D: usize>(param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
    param.map(|t| t.zeros_like())
}

impl<B: Backend> WeightInit for Linear<B> {
    fn init_weights(
        mut self,
        policy: &WeightInitConfig,
    ) -> Self {
        self.weight = self.weight.map(|w| {
            let device = w.device();
            policy.sample_linear_weight(w.dims(), &device)
        });
        self.bias = self.bias.map(fill_zeros);
        self
    }
}

impl<B: Backend> WeightInit for LayerNorm<B> {
    fn init_weights(
        mut self,
        _policy: &WeightInitConfig,
    ) -> Self {
        self.gamma = self.gamma.map(|g| g.ones_like());
        self.beta = fill_zeros(self.beta);
        self
    }
}

impl<B: Backend> WeightInit for Conv2d<B> {
    fn init_weights(
        mut self,
        policy: &WeightInitConfig,
    ) -> Self {
        let [out_channels, _, kernel_h, kernel_w] = self.weight.dims();
        let fan_out = kernel_h * kernel_w * out_channels / self.groups;
        let std = policy.conv_std(fan_out);

        self.weight = self.weight.map(|w| {
            let device = w.device();
            Tensor::random(w.dims(), Distribution::Normal(0.0, std), &device)
        });
        self.bias = self.bias.map(fill_zeros);
        self
    }
}

impl<M: WeightInit> WeightInit for Option<M> {
    fn init_weights(
        self,
        policy: &WeightInitConfig,
    ) -> Self {
        self.map(|m| m.init_weights(policy))
    }
}

impl<M: WeightInit> WeightInit for Vec<M> {
    fn init_weights(
        self,
        policy: &WeightInitConfig,
    ) -> Self {
        self.into_iter().map(|m| m.init_weights(policy)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::conv::Conv2dConfig;
    use burn::nn::{LayerNormConfig, LinearConfig};

    type B = NdArray<f32>;

    fn sample_stats<const D: usize>(t: Tensor<B, D>) -> (f32, f32, f32) {
        let values = t.into_data().to_vec::<f32>().unwrap();
        let n = values.len() as f32;
        let mean = values.iter().sum::<f32>() / n;
        let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        let max_abs = values.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        (mean, var.sqrt(), max_abs)
    }

    #[test]
    fn test_conv_std() {
        let policy = WeightInitConfig::new();
        assert_eq!(policy.conv_std(2), 1.0);
        assert_eq!(policy.conv_std(8), 0.5);
    }

    #[test]
    fn test_linear_policy() {
        let device = Default::default();
        let policy = WeightInitConfig::new();

        let linear = LinearConfig::new(64, 96).init::<B>(&device);
        let linear = policy.apply(linear);

        let (mean, std, max_abs) = sample_stats(linear.weight.val());
        assert!(mean.abs() < 0.005, "mean: {mean}");
        assert!((0.015..0.025).contains(&std), "std: {std}");
        assert!(max_abs <= 2.0);

        let bias = linear.bias.as_ref().unwrap().val();
        bias.to_data()
            .assert_eq(&Tensor::<B, 1>::zeros([96], &device).to_data(), true);
    }

    #[test]
    fn test_linear_truncation() {
        let device = Default::default();
        let policy = WeightInitConfig::new()
            .with_linear_std(1.0)
            .with_linear_trunc_bound(0.5);

        let w = policy.sample_linear_weight::<B, 2>([32, 32], &device);
        let (_, _, max_abs) = sample_stats(w);
        assert!(max_abs <= 0.5);
    }

    #[test]
    fn test_layer_norm_policy() {
        let device = Default::default();
        let mut norm = LayerNormConfig::new(16).init::<B>(&device);
        norm.gamma = norm.gamma.map(|g| g.mul_scalar(3.0));
        norm.beta = norm.beta.map(|b| b.add_scalar(1.0));

        let norm = norm.init_weights(&WeightInitConfig::new());
        norm.gamma
            .val()
            .to_data()
            .assert_eq(&Tensor::<B, 1>::ones([16], &device).to_data(), true);
        norm.beta
            .val()
            .to_data()
            .assert_eq(&Tensor::<B, 1>::zeros([16], &device).to_data(), true);
    }

    #[test]
    fn test_conv_policy() {
        let device = Default::default();
        let policy = WeightInitConfig::new();

        // fan_out = 3 * 3 * 64 = 576; std = sqrt(2 / 576) ~ 0.0589
        let conv = Conv2dConfig::new([16, 64], [3, 3]).init::<B>(&device);
        let conv = policy.apply(conv);

        let (mean, std, _) = sample_stats(conv.weight.val());
        assert!(mean.abs() < 0.01, "mean: {mean}");
        assert!((0.05..0.068).contains(&std), "std: {std}");

        let bias = conv.bias.as_ref().unwrap().val();
        bias.to_data()
            .assert_eq(&Tensor::<B, 1>::zeros([64], &device).to_data(), true);
    }

    #[test]
    fn test_grouped_conv_fan_out() {
        let device = Default::default();
        let policy = WeightInitConfig::new();

        // Depthwise: fan_out = 3 * 3 * 64 / 64 = 9; std = sqrt(2 / 9) ~ 0.471
        let conv = Conv2dConfig::new([64, 64], [3, 3])
            .with_groups(64)
            .init::<B>(&device);
        let conv = policy.apply(Some(conv)).unwrap();

        let (_, std, _) = sample_stats(conv.weight.val());
        assert!((0.40..0.54).contains(&std), "std: {std}");
    }
}

//! # Feed-Forward Activations
//!
//! A serializable selector for the MLP nonlinearity, resolvable from a
//! short name (``"gelu"``, ``"leaky_relu"``, ...).
use burn::nn::{Gelu, LeakyRelu, LeakyReluConfig, PRelu, PReluConfig, Relu, Sigmoid, Tanh};
use burn::prelude::{Backend, Config, Module, Tensor};
use std::str::FromStr;

/// Selects an [`Activation`].
#[derive(Config, Debug)]
#[non_exhaustive]
pub enum ActivationConfig {
    /// Exact (erf) GELU.
    Gelu,

    /// ``max(x, 0)``
    Relu,

    /// ReLU with a fixed negative slope.
    LeakyRelu(LeakyReluConfig),

    /// ReLU with a learned negative slope.
    PRelu(PReluConfig),

    /// Logistic sigmoid.
    Sigmoid,

    /// Hyperbolic tangent.
    Tanh,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self::Gelu
    }
}

impl From<LeakyReluConfig> for ActivationConfig {
    fn from(config: LeakyReluConfig) -> Self {
        Self::LeakyRelu(config)
    }
}

impl From<PReluConfig> for ActivationConfig {
    fn from(config: PReluConfig) -> Self {
        Self::PRelu(config)
    }
}

/// Short names accepted by [`ActivationConfig::from_str`].
pub const ACTIVATION_NAMES: [&str; 6] = ["gelu", "relu", "leaky_relu", "prelu", "sigmoid", "tanh"];

impl FromStr for ActivationConfig {
    type Err = anyhow::Error;

    /// Parse a short name; parameterized variants take burn's defaults.
    fn from_str(name: &str) -> anyhow::Result<Self> {
        Ok(match name.to_ascii_lowercase().as_str() {
            "gelu" => Self::Gelu,
            "relu" => Self::Relu,
            "leaky_relu" => LeakyReluConfig::new().into(),
            "prelu" => PReluConfig::new().into(),
            "sigmoid" => Self::Sigmoid,
            "tanh" => Self::Tanh,
            other => anyhow::bail!(
                "unknown activation {other:?}; expected one of {}",
                ACTIVATION_NAMES.join(", ")
            ),
        })
    }
}

impl ActivationConfig {
    /// The short name of this activation.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gelu => "gelu",
            Self::Relu => "relu",
            Self::LeakyRelu(_) => "leaky_relu",
            Self::PRelu(_) => "prelu",
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
        }
    }

    /// Build the layer.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Activation<B> {
        match self {
            Self::Gelu => Activation::Gelu(Gelu),
            Self::Relu => Activation::Relu(Relu),
            Self::LeakyRelu(config) => Activation::LeakyRelu(config.init()),
            Self::PRelu(config) => Activation::PRelu(config.init(device)),
            Self::Sigmoid => Activation::Sigmoid(Sigmoid),
            Self::Tanh => Activation::Tanh(Tanh),
        }
    }
}

/// Elementwise activation layer, built from an [`ActivationConfig`].
#[derive(Module, Debug)]
#[non_exhaustive]
pub enum Activation<B: Backend> {
    /// See [`ActivationConfig`].
    Gelu(Gelu),
    /// See [`ActivationConfig`].
    Relu(Relu),
    /// See [`ActivationConfig`].
    LeakyRelu(LeakyRelu),
    /// Holds the learned slope parameters.
    PRelu(PRelu<B>),
    /// See [`ActivationConfig`].
    Sigmoid(Sigmoid),
    /// See [`ActivationConfig`].
    Tanh(Tanh),
}

impl<B: Backend> Activation<B> {
    /// The short name of this activation.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gelu(_) => "gelu",
            Self::Relu(_) => "relu",
            Self::LeakyRelu(_) => "leaky_relu",
            Self::PRelu(_) => "prelu",
            Self::Sigmoid(_) => "sigmoid",
            Self::Tanh(_) => "tanh",
        }
    }

    /// Apply the activation elementwise.
    pub fn forward<const D: usize>(
        &self,
        x: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Self::Gelu(act) => act.forward(x),
            Self::Relu(act) => act.forward(x),
            Self::LeakyRelu(act) => act.forward(x),
            Self::PRelu(act) => act.forward(x),
            Self::Sigmoid(act) => act.forward(x),
            Self::Tanh(act) => act.forward(x),
        }
    }
}

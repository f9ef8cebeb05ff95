//! # Input Preprocessing Metadata
use bimm_contracts::assert_shape_contract;
use burn::prelude::{Backend, Tensor};
use serde::{Deserialize, Serialize};

/// `ImageNet` per-channel mean.
pub const IMAGENET_DEFAULT_MEAN: [f64; 3] = [0.485, 0.456, 0.406];

/// `ImageNet` per-channel standard deviation.
pub const IMAGENET_DEFAULT_STD: [f64; 3] = [0.229, 0.224, 0.225];

/// Resize interpolation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Nearest neighbor.
    Nearest,
    /// Bilinear.
    Bilinear,
    /// Bicubic.
    Bicubic,
}

/// Expected input format of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// ``[channels, height, width]``
    pub input_size: [usize; 3],

    /// Per-channel mean.
    pub mean: Vec<f64>,

    /// Per-channel standard deviation.
    pub std: Vec<f64>,

    /// Center crop fraction used at evaluation.
    pub crop_pct: f64,

    /// Resize interpolation.
    pub interpolation: Interpolation,

    /// Checkpoint name of the first convolution.
    pub first_conv: String,

    /// Checkpoint name of the classifier.
    pub classifier: String,
}

impl InputConfig {
    /// 224x224 RGB with `ImageNet` normalization.
    pub fn imagenet() -> Self {
        Self {
            input_size: [3, 224, 224],
            mean: IMAGENET_DEFAULT_MEAN.to_vec(),
            std: IMAGENET_DEFAULT_STD.to_vec(),
            crop_pct: 0.9,
            interpolation: Interpolation::Bicubic,
            first_conv: "patch_embed1.proj".to_string(),
            classifier: "head".to_string(),
        }
    }

    /// Number of input channels.
    pub fn channels(&self) -> usize {
        self.input_size[0]
    }

    /// ``[height, width]``
    pub fn resolution(&self) -> [usize; 2] {
        [self.input_size[1], self.input_size[2]]
    }

    /// Normalize a ``[batch, channels, height, width]`` image batch.
    ///
    /// ``(x - mean) / std``, per channel.
    ///
    /// # Panics
    ///
    /// If the channel count does not match `mean`/`std`.
    pub fn normalize<B: Backend>(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let channels = self.mean.len();
        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &images,
            &[("channels", channels)],
        );
        let device = images.device();
        let as_tensor = |values: &[f64]| {
            let values: Vec<f32> = values.iter().map(|&v| v as f32).collect();
            Tensor::<B, 1>::from_floats(values.as_slice(), &device).reshape([1, channels, 1, 1])
        };
        (images - as_tensor(&self.mean)) / as_tensor(&self.std)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use hamcrest::prelude::*;

    type B = NdArray<f32>;

    #[test]
    fn test_imagenet() {
        let config = InputConfig::imagenet();
        assert_eq!(config.channels(), 3);
        assert_eq!(config.resolution(), [224, 224]);
        assert_eq!(config.interpolation, Interpolation::Bicubic);
        assert_eq!(config.first_conv, "patch_embed1.proj");
        assert_eq!(config.classifier, "head");

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["interpolation"], "bicubic");
        assert_eq!(json["crop_pct"], 0.9);
    }

    #[test]
    fn test_normalize() {
        let device = Default::default();
        let config = InputConfig::imagenet();

        let images = Tensor::<B, 1>::from_floats([0.485, 0.456, 0.406], &device)
            .reshape([1, 3, 1, 1])
            .repeat_dim(2, 2);
        let centered = config.normalize(images);
        assert_eq!(centered.dims(), [1, 3, 2, 1]);
        for v in centered.into_data().to_vec::<f32>().unwrap() {
            assert_that!(v as f64, close_to(0.0, 1e-6));
        }

        let ones = Tensor::<B, 4>::ones([1, 3, 1, 1], &device);
        let y = config.normalize(ones).flatten::<1>(0, 3).into_data();
        let y = y.to_vec::<f32>().unwrap();
        assert_that!(y[0] as f64, close_to((1.0 - 0.485) / 0.229, 1e-5));
        assert_that!(y[2] as f64, close_to((1.0 - 0.406) / 0.225, 1e-5));
    }

    #[test]
    #[should_panic]
    fn test_normalize_wrong_channels() {
        let device = Default::default();
        let images = Tensor::<B, 4>::ones([1, 1, 2, 2], &device);
        InputConfig::imagenet().normalize(images);
    }
}

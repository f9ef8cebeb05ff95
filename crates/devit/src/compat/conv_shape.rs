//! # Convolution Shape Utilities
//!
//! Utilities for computing the output shape of convolution and
//! sliding-window (unfold) operations.
//!
//! [`ConvGeometry`] bundles the kernel/stride/padding/dilation of a square
//! sliding window; it is shared by the patch embedding convolutions and
//! by the windowed key/value extraction in attention.

/// Predict the output size of a 1D convolution operation.
///
/// ```text
/// out_size = floor( ((in_size + 2*padding - dilation*(kernel_size-1) - 1) / stride) + 1 )
/// ```
///
/// # Reference
///
/// - [conv_arithmetic diagram](https://github.com/vdumoulin/conv_arithmetic/blob/master/README.md)
///   visual explanations of these convolution parameters.
/// - [pytorch conv1d](https://docs.pytorch.org/docs/stable/generated/torch.nn.Conv1d.html)
///
/// # Arguments
///
/// - `input_size`: The input dimension size, must be > 0.
/// - `kernel_size`: The kernel size, must be > 0.
/// - `stride`: The stride of the convolution, must be > 0.
/// - `padding`: The padding of the convolution, added evenly to all sides of the input.
/// - `dilation`: The dilation of the convolution, must be > 0.
///
/// # Returns
///
/// An `Option<usize>` representing the output size; or `None` for <= 0.
pub fn maybe_conv1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<usize> {
    assert!(input_size > 0);
    assert!(kernel_size > 0);
    assert!(stride > 0);
    assert!(dilation > 0);

    let effective_size = input_size + 2 * padding;
    let pos = effective_size + stride;
    let kernel_width = 1 + dilation * (kernel_size - 1);

    if pos < kernel_width {
        return None;
    }
    let x = (pos - kernel_width) / stride;
    if x < 1 { None } else { Some(x) }
}

/// Square sliding-window geometry, applied identically to both spatial axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    /// Window (kernel) size.
    pub kernel_size: usize,

    /// Step between window origins.
    pub stride: usize,

    /// Zero padding added to each side.
    pub padding: usize,

    /// Spacing between window taps.
    pub dilation: usize,
}

impl ConvGeometry {
    /// Construct an unpadded, undilated geometry.
    pub fn new(
        kernel_size: usize,
        stride: usize,
    ) -> Self {
        Self {
            kernel_size,
            stride,
            padding: 0,
            dilation: 1,
        }
    }

    /// Set the padding.
    pub fn with_padding(
        self,
        padding: usize,
    ) -> Self {
        Self { padding, ..self }
    }

    /// Set the dilation.
    pub fn with_dilation(
        self,
        dilation: usize,
    ) -> Self {
        Self { dilation, ..self }
    }

    /// The spatial extent covered by one (dilated) window.
    pub fn receptive_field(&self) -> usize {
        self.dilation * (self.kernel_size - 1) + 1
    }

    /// Predict the output size along one axis; `None` if no window fits.
    pub fn maybe_output_size(
        &self,
        input_size: usize,
    ) -> Option<usize> {
        if input_size == 0 {
            return None;
        }
        maybe_conv1d_output_size(
            input_size,
            self.kernel_size,
            self.stride,
            self.padding,
            self.dilation,
        )
    }

    /// Predict the ``[height, width]`` output resolution; `None` if no window fits.
    pub fn maybe_output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]> {
        let [height, width] = input_resolution;
        Some([
            self.maybe_output_size(height)?,
            self.maybe_output_size(width)?,
        ])
    }

    /// Predict the ``[height, width]`` output resolution.
    ///
    /// # Returns
    ///
    /// The output resolution, or an error describing the geometry
    /// which could not be applied.
    pub fn try_output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> anyhow::Result<[usize; 2]> {
        match self.maybe_output_resolution(input_resolution) {
            Some(resolution) => Ok(resolution),
            None => anyhow::bail!(
                "No legal output size for window with:\n input_resolution:{input_resolution:?}\n kernel_size:{}\n stride:{}\n dilation:{}\n padding:{}",
                self.kernel_size,
                self.stride,
                self.dilation,
                self.padding,
            ),
        }
    }

    /// Predict the ``[height, width]`` output resolution.
    ///
    /// This is the ``panic``-ing variant of [`ConvGeometry::try_output_resolution`].
    ///
    /// # Panics
    ///
    /// If no window fits in the input.
    pub fn expect_output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        match self.try_output_resolution(input_resolution) {
            Ok(resolution) => resolution,
            Err(e) => panic!("{}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv1d_output_shape() {
        fn conv1d_output_size_reference(
            input_shape: usize,
            kernel_shape: usize,
            stride: usize,
            padding: usize,
            dilation: usize,
        ) -> Option<usize> {
            let effective_shape = (input_shape + 2 * padding) as f64;
            let kernel_width = 1.0 + (dilation * (kernel_shape - 1)) as f64;

            let x = (((effective_shape - kernel_width) / stride as f64) + 1.0).floor();
            if x < 1.0 { None } else { Some(x as usize) }
        }

        for input_shape in 1..16 {
            for (kernel_shape, stride, padding, dilation) in
                [(7, 4, 3, 1), (3, 2, 1, 1), (7, 7, 0, 1), (7, 13, 0, 2), (3, 5, 0, 2)]
            {
                assert_eq!(
                    maybe_conv1d_output_size(input_shape, kernel_shape, stride, padding, dilation),
                    conv1d_output_size_reference(input_shape, kernel_shape, stride, padding, dilation),
                    "input:{input_shape} kernel:{kernel_shape} stride:{stride} padding:{padding} dilation:{dilation}"
                );
            }
        }
    }

    #[test]
    fn test_patch_embed_geometry() {
        let stem = ConvGeometry::new(7, 4).with_padding(3);
        assert_eq!(stem.expect_output_resolution([224, 224]), [56, 56]);

        let down = ConvGeometry::new(3, 2).with_padding(1);
        assert_eq!(down.expect_output_resolution([56, 56]), [28, 28]);
        assert_eq!(down.expect_output_resolution([28, 14]), [14, 7]);
    }

    #[test]
    fn test_window_geometry() {
        let near = ConvGeometry::new(7, 7);
        assert_eq!(near.receptive_field(), 7);
        assert_eq!(near.expect_output_resolution([56, 56]), [8, 8]);
        assert_eq!(near.expect_output_resolution([7, 7]), [1, 1]);

        let far = ConvGeometry::new(7, 13).with_dilation(2);
        assert_eq!(far.receptive_field(), 13);
        assert_eq!(far.expect_output_resolution([56, 56]), [4, 4]);
        assert_eq!(far.expect_output_resolution([14, 14]), [1, 1]);
        assert_eq!(far.maybe_output_resolution([7, 7]), None);
        assert!(far.try_output_resolution([12, 14]).is_err());
    }

    #[test]
    #[should_panic(expected = "No legal output size for window")]
    fn test_window_geometry_panic() {
        ConvGeometry::new(7, 7).expect_output_resolution([6, 6]);
    }
}

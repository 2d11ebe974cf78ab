//! Invocation parameters, derived geometry, and the error taxonomy.

use std::fmt;

use crate::fixed::Activation;
use crate::word::words_for;

/// Largest supported square kernel extent.
pub const K_MAX: usize = 3;

/// Largest supported convolution stride (the input cache is sized for it).
pub const MAX_STRIDE: usize = 2;

/// One convolution-layer invocation.
///
/// Geometry follows the `[IC, H, W]` / `[OC, IC, K, K]` row-major tensor
/// layout; `use_pool` with `pool_stride == 1` is accepted but the reduction
/// is the caller's job (the engine writes the un-pooled tensor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvParams {
    pub in_channels: usize,
    pub out_channels: usize,
    pub in_height: usize,
    pub in_width: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub use_pool: bool,
    pub pool_stride: usize,
    pub activation: Activation,
}

impl ConvParams {
    /// Pre-pool output height: `(H + 2P − K)/S + 1`.
    #[inline]
    pub fn out_height(&self) -> usize {
        (self.in_height + 2 * self.padding - self.kernel_size) / self.stride + 1
    }

    /// Pre-pool output width: `(W + 2P − K)/S + 1`.
    #[inline]
    pub fn out_width(&self) -> usize {
        (self.in_width + 2 * self.padding - self.kernel_size) / self.stride + 1
    }

    /// Whether the 2×2 max-pool reduction runs inside the Write stage.
    #[inline]
    pub fn pooled(&self) -> bool {
        self.use_pool && self.pool_stride >= 2
    }

    /// Height of the tensor the engine actually writes.
    #[inline]
    pub fn final_height(&self) -> usize {
        if self.pooled() {
            self.out_height() / 2
        } else {
            self.out_height()
        }
    }

    /// Width of the tensor the engine actually writes.
    #[inline]
    pub fn final_width(&self) -> usize {
        if self.pooled() {
            self.out_width() / 2
        } else {
            self.out_width()
        }
    }

    /// Element count of the input region.
    pub fn input_len(&self) -> usize {
        self.in_channels * self.in_height * self.in_width
    }

    /// Element count of the weight region.
    pub fn weight_len(&self) -> usize {
        self.out_channels * self.in_channels * self.kernel_size * self.kernel_size
    }

    /// Element count of the affine region (`scale, bias` per output channel).
    pub fn affine_len(&self) -> usize {
        2 * self.out_channels
    }

    /// Element count of the written output region.
    pub fn output_len(&self) -> usize {
        self.out_channels * self.final_height() * self.final_width()
    }

    /// Word count of the input region.
    pub fn input_words(&self) -> usize {
        words_for(self.input_len())
    }

    /// Word count of the weight region.
    pub fn weight_words(&self) -> usize {
        words_for(self.weight_len())
    }

    /// Word count of the output region.
    pub fn output_words(&self) -> usize {
        words_for(self.output_len())
    }

    /// Reject unsupported parameters before any memory traffic.
    pub fn validate(&self) -> Result<(), ConvError> {
        if self.in_channels == 0 {
            return Err(ConvError::ZeroDimension("in_channels"));
        }
        if self.out_channels == 0 {
            return Err(ConvError::ZeroDimension("out_channels"));
        }
        if self.in_height == 0 {
            return Err(ConvError::ZeroDimension("in_height"));
        }
        if self.in_width == 0 {
            return Err(ConvError::ZeroDimension("in_width"));
        }
        if self.kernel_size == 0 || self.kernel_size > K_MAX {
            return Err(ConvError::UnsupportedKernel {
                kernel: self.kernel_size,
                max: K_MAX,
            });
        }
        if self.stride == 0 || self.stride > MAX_STRIDE {
            return Err(ConvError::UnsupportedStride {
                stride: self.stride,
            });
        }
        if self.padding > 1 {
            return Err(ConvError::UnsupportedPadding {
                padding: self.padding,
            });
        }
        if self.use_pool && !(1..=2).contains(&self.pool_stride) {
            return Err(ConvError::UnsupportedPoolStride {
                pool_stride: self.pool_stride,
            });
        }
        let span_h = self.in_height + 2 * self.padding;
        let span_w = self.in_width + 2 * self.padding;
        if span_h < self.kernel_size
            || span_w < self.kernel_size
            || (span_h - self.kernel_size) % self.stride != 0
            || (span_w - self.kernel_size) % self.stride != 0
        {
            return Err(ConvError::InexactGeometry {
                in_height: self.in_height,
                in_width: self.in_width,
            });
        }
        if self.pooled() && (self.out_height() % 2 != 0 || self.out_width() % 2 != 0) {
            return Err(ConvError::OddPooledOutput {
                out_height: self.out_height(),
                out_width: self.out_width(),
            });
        }
        Ok(())
    }
}

/// Errors surfaced by the convolution engine.
///
/// Saturation is never an error; it is the defined arithmetic outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvError {
    /// Kernel extent outside `1..=K_MAX`; rejected with no memory effect.
    UnsupportedKernel { kernel: usize, max: usize },
    /// Stride outside `1..=MAX_STRIDE`.
    UnsupportedStride { stride: usize },
    /// Padding beyond the supported one-pixel border.
    UnsupportedPadding { padding: usize },
    /// Pool stride outside `1..=2` while pooling is requested.
    UnsupportedPoolStride { pool_stride: usize },
    /// A tensor dimension is zero.
    ZeroDimension(&'static str),
    /// `(extent + 2·padding − kernel)` is not divisible by the stride.
    InexactGeometry { in_height: usize, in_width: usize },
    /// Pooling requires even pre-pool output dimensions.
    OddPooledOutput { out_height: usize, out_width: usize },
    /// Output channels exceed what the partial-sum buffer was sized for.
    TooManyChannels { out_channels: usize, max: usize },
    /// A backing-store region is shorter than the tensor it must hold.
    RegionTooSmall {
        region: &'static str,
        required: usize,
        actual: usize,
    },
    /// A pipeline stage terminated early (engine bug, not a caller error).
    Pipeline(&'static str),
}

impl fmt::Display for ConvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedKernel { kernel, max } => {
                write!(f, "kernel size {kernel} unsupported (max {max})")
            }
            Self::UnsupportedStride { stride } => {
                write!(f, "stride {stride} unsupported (max {MAX_STRIDE})")
            }
            Self::UnsupportedPadding { padding } => {
                write!(f, "padding {padding} unsupported (max 1)")
            }
            Self::UnsupportedPoolStride { pool_stride } => {
                write!(f, "pool stride {pool_stride} unsupported")
            }
            Self::ZeroDimension(dim) => write!(f, "{dim} must be > 0"),
            Self::InexactGeometry {
                in_height,
                in_width,
            } => write!(
                f,
                "input {in_height}x{in_width} does not divide exactly into output geometry"
            ),
            Self::OddPooledOutput {
                out_height,
                out_width,
            } => write!(
                f,
                "pooling requires even conv output, got {out_height}x{out_width}"
            ),
            Self::TooManyChannels { out_channels, max } => {
                write!(f, "{out_channels} output channels exceed engine maximum {max}")
            }
            Self::RegionTooSmall {
                region,
                required,
                actual,
            } => write!(
                f,
                "{region} region too small: need {required} words/elements, got {actual}"
            ),
            Self::Pipeline(stage) => write!(f, "pipeline stage '{stage}' terminated early"),
        }
    }
}

impl std::error::Error for ConvError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ConvParams {
        ConvParams {
            in_channels: 3,
            out_channels: 16,
            in_height: 16,
            in_width: 16,
            kernel_size: 3,
            stride: 1,
            padding: 1,
            use_pool: false,
            pool_stride: 2,
            activation: Activation::Relu,
        }
    }

    #[test]
    fn test_output_geometry() {
        let p = base();
        assert_eq!(p.out_height(), 16);
        assert_eq!(p.out_width(), 16);
        assert_eq!(p.final_height(), 16);

        let pooled = ConvParams {
            use_pool: true,
            ..base()
        };
        assert!(pooled.pooled());
        assert_eq!(pooled.final_height(), 8);
        assert_eq!(pooled.output_len(), 16 * 8 * 8);
    }

    #[test]
    fn test_validate_accepts_supported_shapes() {
        assert_eq!(base().validate(), Ok(()));
        // (25 + 2 - 3) divides exactly by stride 2
        let strided = ConvParams {
            in_height: 25,
            in_width: 25,
            stride: 2,
            ..base()
        };
        assert_eq!(strided.validate(), Ok(()));
        assert_eq!(strided.out_height(), 13);
        let k1 = ConvParams {
            kernel_size: 1,
            padding: 0,
            ..base()
        };
        assert_eq!(k1.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_oversized_kernel() {
        let p = ConvParams {
            kernel_size: 5,
            ..base()
        };
        assert_eq!(
            p.validate(),
            Err(ConvError::UnsupportedKernel { kernel: 5, max: 3 })
        );
    }

    #[test]
    fn test_validate_rejects_bad_stride_and_padding() {
        let p = ConvParams { stride: 3, ..base() };
        assert!(matches!(
            p.validate(),
            Err(ConvError::UnsupportedStride { stride: 3 })
        ));
        let p = ConvParams {
            padding: 2,
            ..base()
        };
        assert!(matches!(
            p.validate(),
            Err(ConvError::UnsupportedPadding { padding: 2 })
        ));
    }

    #[test]
    fn test_validate_rejects_odd_pooled_output() {
        let p = ConvParams {
            in_height: 13,
            in_width: 13,
            use_pool: true,
            ..base()
        };
        assert!(matches!(
            p.validate(),
            Err(ConvError::OddPooledOutput { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_inexact_division() {
        // (13 + 0 - 3) % 2 != 0
        let p = ConvParams {
            in_height: 13,
            in_width: 13,
            stride: 2,
            padding: 0,
            ..base()
        };
        assert!(matches!(p.validate(), Err(ConvError::InexactGeometry { .. })));
    }
}

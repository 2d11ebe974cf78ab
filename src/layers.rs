//! The nine-layer Tiny-YOLO v2 backbone this engine was shaped for.
//!
//! Layers 1–5 fuse a 2×2 stride-2 max-pool into the convolution call. The
//! stride-1 pool after layer 6 and the detection head are external to the
//! engine, so layer 6 runs un-pooled here.

use crate::fixed::Activation;
use crate::params::ConvParams;

/// Input image extent (416×416 RGB).
pub const TINY_YOLO_INPUT: usize = 416;

/// Number of convolution layers the engine evaluates.
pub const TINY_YOLO_LAYERS: usize = 9;

/// Parameters for every backbone layer, in execution order.
pub fn tiny_yolo_layers() -> [ConvParams; TINY_YOLO_LAYERS] {
    let conv3 = |ic: usize, oc: usize, extent: usize, pool: bool| ConvParams {
        in_channels: ic,
        out_channels: oc,
        in_height: extent,
        in_width: extent,
        kernel_size: 3,
        stride: 1,
        padding: 1,
        use_pool: pool,
        pool_stride: 2,
        activation: Activation::Leaky,
    };
    [
        conv3(3, 16, 416, true),
        conv3(16, 32, 208, true),
        conv3(32, 64, 104, true),
        conv3(64, 128, 52, true),
        conv3(128, 256, 26, true),
        // stride-1 pool handled outside the engine
        conv3(256, 512, 13, false),
        conv3(512, 1024, 13, false),
        ConvParams {
            in_channels: 1024,
            out_channels: 256,
            in_height: 13,
            in_width: 13,
            kernel_size: 1,
            stride: 1,
            padding: 0,
            use_pool: false,
            pool_stride: 2,
            activation: Activation::Leaky,
        },
        conv3(256, 512, 13, false),
    ]
}

//! qconv-kernels: tiled Q8.8 fixed-point convolution engine.
//!
//! Evaluates one Tiny-YOLO-style convolution layer per invocation (fused
//! BatchNorm affine, activation, optional 2×2 max-pool) as a three-stage
//! Fetch → Execute → Write pipeline over bounded queues of 256-bit words.
//! All arithmetic is saturating fixed point (Q8.8 data, Q16.16 accumulate)
//! and bit-exact against the scalar golden reference in [`golden`].

pub mod engine;
pub mod execute;
pub mod fetch;
pub mod fixed;
pub mod golden;
pub mod layers;
pub mod params;
pub mod schedule;
pub mod word;
pub mod write;

pub use engine::ConvEngine;
pub use fixed::{Activation, I16F16, I8F8};
pub use params::{ConvError, ConvParams, K_MAX, MAX_STRIDE};
pub use schedule::TileConfig;
pub use word::{Word256, WORD_LANES};

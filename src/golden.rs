//! Scalar golden reference.
//!
//! Computes every output element directly (zero-padded borders, saturating
//! Q16.16 accumulation, single-narrow affine, activation, optional 2×2
//! stride-2 pool) using the same `fixed` primitives as the engine. The two
//! paths must agree bit for bit; any divergence is an engine bug.

use crate::fixed::{activate, affine_narrow, mac, I16F16, I8F8};
use crate::params::ConvParams;

/// Convolution + affine + activation, pre-pool. Returns `[OC, OH, OW]`.
pub fn conv_golden(
    input: &[I8F8],
    weights: &[I8F8],
    affine: &[I8F8],
    p: &ConvParams,
) -> Vec<I8F8> {
    let oh = p.out_height();
    let ow = p.out_width();
    let k = p.kernel_size;
    let mut out = vec![I8F8::ZERO; p.out_channels * oh * ow];

    for oc in 0..p.out_channels {
        let scale = affine[oc * 2];
        let bias = affine[oc * 2 + 1];
        for r in 0..oh {
            for c in 0..ow {
                let h_start = (r * p.stride) as isize - p.padding as isize;
                let w_start = (c * p.stride) as isize - p.padding as isize;
                let mut sum = I16F16::ZERO;
                for ic in 0..p.in_channels {
                    for ky in 0..k {
                        for kx in 0..k {
                            let ih = h_start + ky as isize;
                            let iw = w_start + kx as isize;
                            if ih < 0
                                || ih >= p.in_height as isize
                                || iw < 0
                                || iw >= p.in_width as isize
                            {
                                continue;
                            }
                            let in_idx =
                                (ic * p.in_height + ih as usize) * p.in_width + iw as usize;
                            let wt_idx = ((oc * p.in_channels + ic) * k + ky) * k + kx;
                            sum = mac(sum, input[in_idx], weights[wt_idx]);
                        }
                    }
                }
                out[(oc * oh + r) * ow + c] =
                    activate(affine_narrow(sum, scale, bias), p.activation);
            }
        }
    }
    out
}

/// 2×2 stride-2 max-pool over `[channels, height, width]`.
pub fn pool_golden(src: &[I8F8], channels: usize, height: usize, width: usize) -> Vec<I8F8> {
    let oh = height / 2;
    let ow = width / 2;
    let mut out = vec![I8F8::ZERO; channels * oh * ow];
    for c in 0..channels {
        for r in 0..oh {
            for q in 0..ow {
                let v0 = src[(c * height + r * 2) * width + q * 2];
                let v1 = src[(c * height + r * 2 + 1) * width + q * 2];
                let v2 = src[(c * height + r * 2) * width + q * 2 + 1];
                let v3 = src[(c * height + r * 2 + 1) * width + q * 2 + 1];
                out[(c * oh + r) * ow + q] = v0.max(v1).max(v2.max(v3));
            }
        }
    }
    out
}

/// The full layer as the engine writes it: conv, then pool when enabled.
pub fn layer_golden(
    input: &[I8F8],
    weights: &[I8F8],
    affine: &[I8F8],
    p: &ConvParams,
) -> Vec<I8F8> {
    let conv = conv_golden(input, weights, affine, p);
    if p.pooled() {
        pool_golden(&conv, p.out_channels, p.out_height(), p.out_width())
    } else {
        conv
    }
}

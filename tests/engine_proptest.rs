//! Randomized engine-vs-golden properties over small geometries.

use proptest::prelude::*;

use qconv_kernels::fixed::{Activation, I8F8};
use qconv_kernels::golden::layer_golden;
use qconv_kernels::word::{pack_elements, unpack_elements, Word256};
use qconv_kernels::{ConvEngine, ConvParams};

/// Deterministic Q8.8 data stream from a 64-bit seed.
fn gen_data(len: usize, seed: u64) -> Vec<I8F8> {
    let mut state = seed.wrapping_mul(0x9E3779B97F4A7C15) | 1;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            // keep values in roughly [-2, 2) so sums stay in realistic range
            I8F8::from_raw(((state >> 33) as i16) >> 6)
        })
        .collect()
}

fn arb_params() -> impl Strategy<Value = ConvParams> {
    (
        1usize..=5,           // in_channels
        1usize..=36,          // out_channels
        3usize..=20,          // in_height
        3usize..=20,          // in_width
        prop_oneof![Just(1usize), Just(3usize)],
        1usize..=2,           // stride
        0usize..=1,           // padding
        any::<bool>(),        // use_pool
        prop_oneof![
            Just(Activation::Linear),
            Just(Activation::Relu),
            Just(Activation::Leaky)
        ],
    )
        .prop_filter_map(
            "geometry must divide exactly and pool evenly",
            |(ic, oc, h, w, k, s, p, pool, act)| {
                let params = ConvParams {
                    in_channels: ic,
                    out_channels: oc,
                    in_height: h,
                    in_width: w,
                    kernel_size: k,
                    stride: s,
                    padding: p,
                    use_pool: pool,
                    pool_stride: 2,
                    activation: act,
                };
                params.validate().ok().map(|_| params)
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_engine_matches_golden(params in arb_params(), seed in any::<u64>()) {
        let input = gen_data(params.input_len(), seed);
        let weights = gen_data(params.weight_len(), seed ^ 0xDEAD);
        let affine = gen_data(params.affine_len(), seed ^ 0xBEEF);

        let input_w = pack_elements(&input);
        let weights_w = pack_elements(&weights);
        let mut output_w = vec![Word256::ZERO; params.output_words()];
        ConvEngine::new()
            .run(&input_w, &mut output_w, &weights_w, &affine, &params)
            .unwrap();
        let hw = unpack_elements(&output_w, params.output_len());

        let sw = layer_golden(&input, &weights, &affine, &params);
        prop_assert_eq!(hw, sw);
    }

    #[test]
    fn prop_runs_are_deterministic(params in arb_params(), seed in any::<u64>()) {
        let input = pack_elements(&gen_data(params.input_len(), seed));
        let weights = pack_elements(&gen_data(params.weight_len(), seed ^ 1));
        let affine = gen_data(params.affine_len(), seed ^ 2);

        let mut engine = ConvEngine::new();
        let mut out_a = vec![Word256::ZERO; params.output_words()];
        let mut out_b = vec![Word256::ZERO; params.output_words()];
        engine.run(&input, &mut out_a, &weights, &affine, &params).unwrap();
        engine.run(&input, &mut out_b, &weights, &affine, &params).unwrap();
        prop_assert_eq!(out_a, out_b);
    }

    #[test]
    fn prop_rejected_calls_leave_output_untouched(
        kernel in 4usize..=9,
        fill in any::<i16>(),
    ) {
        let params = ConvParams {
            in_channels: 1,
            out_channels: 1,
            in_height: 8,
            in_width: 8,
            kernel_size: kernel,
            stride: 1,
            padding: 1,
            use_pool: false,
            pool_stride: 2,
            activation: Activation::Relu,
        };
        let sentinel = Word256::pack(&[I8F8::from_raw(fill); 16]);
        let mut output = vec![sentinel; 8];
        let err = ConvEngine::new()
            .run(&[Word256::ZERO; 4], &mut output, &[Word256::ZERO; 8], &[I8F8::ZERO; 2], &params)
            .unwrap_err();
        let is_unsupported_kernel = matches!(err, qconv_kernels::ConvError::UnsupportedKernel { .. });
        prop_assert!(is_unsupported_kernel);
        prop_assert!(output.iter().all(|w| *w == sentinel));
    }
}

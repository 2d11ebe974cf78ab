//! Pipeline wiring: one engine invocation runs the three stages as scoped
//! threads connected by bounded word FIFOs.
//!
//! The invocation is externally synchronous: `run` returns only after the
//! Write stage has placed every output word. Stages suspend only on their
//! queues; all on-chip buffers are allocated once here, at construction, and
//! reused across invocations.

use std::thread;

use crossbeam_channel::bounded;
use log::debug;

use crate::execute::ExecuteStage;
use crate::fetch::FetchStage;
use crate::fixed::I8F8;
use crate::params::{ConvError, ConvParams};
use crate::schedule::{TileConfig, TileSchedule};
use crate::word::Word256;
use crate::write::WriteStage;

/// Words buffered per stream, matching the hardware stream depth.
pub const QUEUE_DEPTH: usize = 1024;

/// Tiled fixed-point convolution engine.
///
/// ```no_run
/// use qconv_kernels::{Activation, ConvEngine, ConvParams, Word256, I8F8};
///
/// let p = ConvParams {
///     in_channels: 3, out_channels: 16,
///     in_height: 16, in_width: 16,
///     kernel_size: 3, stride: 1, padding: 1,
///     use_pool: false, pool_stride: 2,
///     activation: Activation::Relu,
/// };
/// let input = vec![Word256::ZERO; p.input_words()];
/// let weights = vec![Word256::ZERO; p.weight_words()];
/// let affine = vec![I8F8::ONE; p.affine_len()];
/// let mut output = vec![Word256::ZERO; p.output_words()];
///
/// let mut engine = ConvEngine::new();
/// engine.run(&input, &mut output, &weights, &affine, &p).unwrap();
/// ```
pub struct ConvEngine {
    cfg: TileConfig,
    fetch: FetchStage,
    execute: ExecuteStage,
    write: WriteStage,
}

impl ConvEngine {
    /// Engine with the default 16×16×16×16 tile shape.
    pub fn new() -> Self {
        Self::with_config(TileConfig::default())
    }

    /// Engine with an explicit tile shape.
    ///
    /// # Panics
    /// Panics if `cfg` is not a drivable configuration (zero extents or lane
    /// counts beyond one word).
    pub fn with_config(cfg: TileConfig) -> Self {
        assert!(cfg.is_valid(), "invalid tile configuration: {cfg:?}");
        Self {
            cfg,
            fetch: FetchStage::new(cfg),
            execute: ExecuteStage::new(cfg),
            write: WriteStage::new(cfg),
        }
    }

    #[inline]
    pub fn config(&self) -> TileConfig {
        self.cfg
    }

    /// Evaluate one convolution layer.
    ///
    /// Rejected parameters and short regions return an error before any
    /// memory traffic; a completed call has written the full output tensor.
    /// The output region must not alias the input or weight regions; with
    /// safe slices the borrow checker enforces that for free.
    pub fn run(
        &mut self,
        input: &[Word256],
        output: &mut [Word256],
        weights: &[Word256],
        affine: &[I8F8],
        params: &ConvParams,
    ) -> Result<(), ConvError> {
        params.validate()?;
        if params.out_channels > self.cfg.max_oc {
            return Err(ConvError::TooManyChannels {
                out_channels: params.out_channels,
                max: self.cfg.max_oc,
            });
        }
        // pool blocks must not straddle tile boundaries
        assert!(
            !params.pooled() || (self.cfg.tile_h % 2 == 0 && self.cfg.tile_w % 2 == 0),
            "pooling requires even tile extents, got {:?}",
            self.cfg
        );
        check_region("input", params.input_words(), input.len())?;
        check_region("weights", params.weight_words(), weights.len())?;
        check_region("affine", params.affine_len(), affine.len())?;
        check_region("output", params.output_words(), output.len())?;

        debug!(
            "conv: {}x{}x{} -> {}x{}x{} k={} s={} p={} pool={} act={:?}",
            params.in_channels,
            params.in_height,
            params.in_width,
            params.out_channels,
            params.final_height(),
            params.final_width(),
            params.kernel_size,
            params.stride,
            params.padding,
            params.pooled(),
            params.activation,
        );

        let sched = TileSchedule::new(params, self.cfg);
        let Self {
            fetch,
            execute,
            write,
            ..
        } = self;

        let (input_tx, input_rx) = bounded::<Word256>(QUEUE_DEPTH);
        let (weight_tx, weight_rx) = bounded::<Word256>(QUEUE_DEPTH);
        let (output_tx, output_rx) = bounded::<Word256>(QUEUE_DEPTH);

        thread::scope(|s| {
            let sched_ref = &sched;
            let fetch_handle = s.spawn(move || {
                fetch.run(input, weights, params, sched_ref, &input_tx, &weight_tx)
            });
            let execute_handle = s.spawn(move || {
                execute.run(
                    affine,
                    params,
                    sched_ref,
                    &input_rx,
                    &weight_rx,
                    &output_tx,
                )
            });
            // the Write stage runs on the calling thread; a peer that dies
            // drops its channel endpoints, which unblocks everyone else
            let write_result = write.run(output, params, sched_ref, &output_rx);

            let fetch_result = fetch_handle
                .join()
                .unwrap_or(Err(ConvError::Pipeline("fetch")));
            let execute_result = execute_handle
                .join()
                .unwrap_or(Err(ConvError::Pipeline("execute")));
            fetch_result.and(execute_result).and(write_result)
        })
    }
}

impl Default for ConvEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn check_region(region: &'static str, required: usize, actual: usize) -> Result<(), ConvError> {
    if actual < required {
        return Err(ConvError::RegionTooSmall {
            region,
            required,
            actual,
        });
    }
    Ok(())
}

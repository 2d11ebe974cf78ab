//! Fetch stage: fills the on-chip input and weight caches from the backing
//! store and streams them as packed words to the Execute stage.
//!
//! The input cache is filled once per `(row, col, ic)` tile and re-streamed
//! for every OC tile. Row fills are phase-separated (zero the row, burst-copy
//! the covering words into a staging buffer, then scatter lanes) so the store
//! sees long unidirectional reads. Every index outside the real tensor
//! (padding rows/cols, channels past `IC`) reads as zero; that is the entire
//! border-handling policy.

use crossbeam_channel::Sender;
use log::trace;

use crate::fixed::I8F8;
use crate::params::{ConvError, ConvParams, K_MAX};
use crate::schedule::{ConvTile, TileConfig, TileSchedule};
use crate::word::{Word256, WORD_LANES};

pub struct FetchStage {
    cfg: TileConfig,
    /// `[tile_ic][cache_h][cache_w]`, flattened.
    input_cache: Vec<I8F8>,
    /// `[tile_oc][tile_ic][K_MAX][K_MAX]`, flattened.
    weight_cache: Vec<I8F8>,
    /// Burst staging: covers one cache row or one OC's weight block.
    staging: Vec<Word256>,
}

impl FetchStage {
    pub fn new(cfg: TileConfig) -> Self {
        let row_words = cfg.cache_w() / WORD_LANES + 2;
        let wt_words = (cfg.tile_ic * K_MAX * K_MAX) / WORD_LANES + 2;
        Self {
            cfg,
            input_cache: vec![I8F8::ZERO; cfg.tile_ic * cfg.cache_h() * cfg.cache_w()],
            weight_cache: vec![I8F8::ZERO; cfg.tile_oc * cfg.tile_ic * K_MAX * K_MAX],
            staging: vec![Word256::ZERO; row_words.max(wt_words)],
        }
    }

    /// Drive the stage for one invocation.
    pub fn run(
        &mut self,
        input: &[Word256],
        weights: &[Word256],
        p: &ConvParams,
        sched: &TileSchedule,
        input_tx: &Sender<Word256>,
        weight_tx: &Sender<Word256>,
    ) -> Result<(), ConvError> {
        for tile in sched.conv_tiles() {
            if tile.first_oc {
                if tile.first_ic {
                    trace!("fetch: tile row={} col={}", tile.tr, tile.tc);
                }
                self.fill_input_cache(input, p, &tile);
            }
            self.fill_weight_cache(weights, p, &tile);
            self.stream_weights(p, weight_tx)?;
            self.stream_inputs(p, &tile, input_tx)?;
        }
        Ok(())
    }

    #[inline]
    fn cache_idx(&self, ic: usize, row: usize, col: usize) -> usize {
        (ic * self.cfg.cache_h() + row) * self.cfg.cache_w() + col
    }

    #[inline]
    fn wt_idx(&self, oc: usize, ic: usize, ky: usize, kx: usize) -> usize {
        ((oc * self.cfg.tile_ic + ic) * K_MAX + ky) * K_MAX + kx
    }

    /// Load the input window for one `(row, col, ic)` tile.
    fn fill_input_cache(&mut self, input: &[Word256], p: &ConvParams, t: &ConvTile) {
        let h = p.in_height as isize;
        let w = p.in_width as isize;
        for ic in 0..self.cfg.tile_ic {
            let chan = t.ic_base + ic;
            let chan_valid = chan < p.in_channels;
            for i in 0..t.tile_in_h {
                let r = t.h_base + i as isize;
                let row_base = self.cache_idx(ic, i, 0);
                self.input_cache[row_base..row_base + t.tile_in_w].fill(I8F8::ZERO);

                if !chan_valid || r < 0 || r >= h {
                    continue;
                }
                // valid column range of this row within the real tensor
                let c_lo = (-t.w_base).max(0) as usize;
                let c_hi = (w - t.w_base).min(t.tile_in_w as isize);
                if (c_lo as isize) >= c_hi {
                    continue;
                }
                let c_hi = c_hi as usize;
                let row_offset = (chan * p.in_height + r as usize) * p.in_width;
                // w_base + c_lo is never negative: c_lo clamps to the border
                let start = row_offset + (t.w_base + c_lo as isize) as usize;
                let len = c_hi - c_lo;
                self.burst_in(input, start, len);
                let first_word = start / WORD_LANES;
                for j in 0..len {
                    let idx = start + j;
                    let v = self.staging[idx / WORD_LANES - first_word].lane(idx % WORD_LANES);
                    self.input_cache[row_base + c_lo + j] = v;
                }
            }
        }
    }

    /// Load one OC tile's weight block; entries past the valid channel range
    /// stay zero so every downstream word is deterministic.
    fn fill_weight_cache(&mut self, weights: &[Word256], p: &ConvParams, t: &ConvTile) {
        self.weight_cache.fill(I8F8::ZERO);
        let k = p.kernel_size;
        let kk = k * k;
        for oc in 0..t.oc_valid {
            // one OC spans `ic_valid · K²` contiguous elements
            let start = ((t.oc_base + oc) * p.in_channels + t.ic_base) * kk;
            let len = t.ic_valid * kk;
            self.burst_in(weights, start, len);
            let first_word = start / WORD_LANES;
            for e in 0..len {
                let idx = start + e;
                let v = self.staging[idx / WORD_LANES - first_word].lane(idx % WORD_LANES);
                let ic = e / kk;
                let ky = (e % kk) / k;
                let kx = e % k;
                let dst = self.wt_idx(oc, ic, ky, kx);
                self.weight_cache[dst] = v;
            }
        }
    }

    /// Copy the words covering `[start, start+len)` into the staging buffer.
    fn burst_in(&mut self, store: &[Word256], start: usize, len: usize) {
        let first_word = start / WORD_LANES;
        let last_word = (start + len - 1) / WORD_LANES;
        let n = last_word - first_word + 1;
        debug_assert!(n <= self.staging.len());
        self.staging[..n].copy_from_slice(&store[first_word..=last_word]);
    }

    /// One word per `(oc, ky, kx)`, lanes = IC; extra OC slots of a partial
    /// tile are still streamed because Execute consumes a fixed word count.
    fn stream_weights(&self, p: &ConvParams, tx: &Sender<Word256>) -> Result<(), ConvError> {
        for oc in 0..self.cfg.tile_oc {
            for ky in 0..p.kernel_size {
                for kx in 0..p.kernel_size {
                    let mut w = Word256::ZERO;
                    for ic in 0..self.cfg.tile_ic {
                        w.set_lane(ic, self.weight_cache[self.wt_idx(oc, ic, ky, kx)]);
                    }
                    tx.send(w).map_err(|_| ConvError::Pipeline("fetch"))?;
                }
            }
        }
        Ok(())
    }

    /// One word per `(ky, kx, i, j)`, lanes = IC, in K-major order.
    fn stream_inputs(
        &self,
        p: &ConvParams,
        t: &ConvTile,
        tx: &Sender<Word256>,
    ) -> Result<(), ConvError> {
        for ky in 0..p.kernel_size {
            for kx in 0..p.kernel_size {
                for i in 0..t.curr_h {
                    for j in 0..t.curr_w {
                        let row = i * p.stride + ky;
                        let col = j * p.stride + kx;
                        let mut w = Word256::ZERO;
                        for ic in 0..self.cfg.tile_ic {
                            w.set_lane(ic, self.input_cache[self.cache_idx(ic, row, col)]);
                        }
                        tx.send(w).map_err(|_| ConvError::Pipeline("fetch"))?;
                    }
                }
            }
        }
        Ok(())
    }
}

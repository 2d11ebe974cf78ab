//! Execute stage: the MAC array.
//!
//! Consumes the aligned weight and input streams, accumulates Q16.16 partial
//! sums across IC tiles through the psum buffer, and on the last IC tile
//! applies the fused affine and activation before emitting packed output
//! words. One input word drives all `tile_oc` accumulators (16 OC × 16 IC
//! multiplies per word in the default shape).

use crossbeam_channel::{Receiver, Sender};
use log::trace;

use crate::fixed::{activate, affine_narrow, mac, I16F16, I8F8};
use crate::params::{ConvError, ConvParams, K_MAX};
use crate::schedule::{ConvTile, TileConfig, TileSchedule};
use crate::word::Word256;

pub struct ExecuteStage {
    cfg: TileConfig,
    /// `[tile_oc][tile_h][tile_w]` accumulators for the current OC tile.
    acc: Vec<I16F16>,
    /// `[max_oc_steps][tile_oc][tile_h][tile_w]` partial sums across IC tiles.
    psum: Vec<I16F16>,
    /// `[tile_oc][tile_ic][K_MAX][K_MAX]` weight register file.
    wt: Vec<I8F8>,
    scale: Vec<I8F8>,
    bias: Vec<I8F8>,
}

impl ExecuteStage {
    pub fn new(cfg: TileConfig) -> Self {
        let tile = cfg.tile_oc * cfg.tile_h * cfg.tile_w;
        Self {
            cfg,
            acc: vec![I16F16::ZERO; tile],
            psum: vec![I16F16::ZERO; cfg.max_oc_steps() * tile],
            wt: vec![I8F8::ZERO; cfg.tile_oc * cfg.tile_ic * K_MAX * K_MAX],
            scale: vec![I8F8::ZERO; cfg.tile_oc],
            bias: vec![I8F8::ZERO; cfg.tile_oc],
        }
    }

    /// Drive the stage for one invocation.
    pub fn run(
        &mut self,
        affine: &[I8F8],
        p: &ConvParams,
        sched: &TileSchedule,
        input_rx: &Receiver<Word256>,
        weight_rx: &Receiver<Word256>,
        output_tx: &Sender<Word256>,
    ) -> Result<(), ConvError> {
        for tile in sched.conv_tiles() {
            if tile.first_oc && tile.first_ic {
                trace!("execute: tile row={} col={}", tile.tr, tile.tc);
            }
            if tile.first_ic {
                self.acc.fill(I16F16::ZERO);
            } else {
                self.load_psum(tile.to);
            }
            if tile.last_ic {
                self.load_affine(affine, &tile);
            }
            self.read_weights(p, weight_rx)?;
            self.compute(p, &tile, input_rx)?;
            if tile.last_ic {
                self.emit(p, &tile, output_tx)?;
            } else {
                self.save_psum(tile.to);
            }
        }
        Ok(())
    }

    #[inline]
    fn acc_idx(&self, oc: usize, i: usize, j: usize) -> usize {
        (oc * self.cfg.tile_h + i) * self.cfg.tile_w + j
    }

    #[inline]
    fn wt_idx(&self, oc: usize, ic: usize, ky: usize, kx: usize) -> usize {
        ((oc * self.cfg.tile_ic + ic) * K_MAX + ky) * K_MAX + kx
    }

    fn load_psum(&mut self, to: usize) {
        let len = self.acc.len();
        self.acc.copy_from_slice(&self.psum[to * len..(to + 1) * len]);
    }

    fn save_psum(&mut self, to: usize) {
        let len = self.acc.len();
        self.psum[to * len..(to + 1) * len].copy_from_slice(&self.acc);
    }

    /// Load `scale, bias` pairs for the tile's valid channels; lanes past
    /// `oc_valid` get zero registers; their outputs are discarded downstream
    /// and the affine region ends at `2·OC`.
    fn load_affine(&mut self, affine: &[I8F8], t: &ConvTile) {
        for oc in 0..self.cfg.tile_oc {
            if oc < t.oc_valid {
                let idx = (t.oc_base + oc) * 2;
                self.scale[oc] = affine[idx];
                self.bias[oc] = affine[idx + 1];
            } else {
                self.scale[oc] = I8F8::ZERO;
                self.bias[oc] = I8F8::ZERO;
            }
        }
    }

    /// Consume one OC tile's fixed-size weight block into the register file.
    fn read_weights(&mut self, p: &ConvParams, rx: &Receiver<Word256>) -> Result<(), ConvError> {
        for oc in 0..self.cfg.tile_oc {
            for ky in 0..p.kernel_size {
                for kx in 0..p.kernel_size {
                    let w = rx.recv().map_err(|_| ConvError::Pipeline("execute"))?;
                    for ic in 0..self.cfg.tile_ic {
                        let dst = self.wt_idx(oc, ic, ky, kx);
                        self.wt[dst] = w.lane(ic);
                    }
                }
            }
        }
        Ok(())
    }

    /// K-major MAC loop: each input word updates every OC accumulator with a
    /// per-lane dot product, kept as a separate Q16.16 value before the
    /// saturating add into the accumulator.
    fn compute(
        &mut self,
        p: &ConvParams,
        t: &ConvTile,
        rx: &Receiver<Word256>,
    ) -> Result<(), ConvError> {
        for ky in 0..p.kernel_size {
            for kx in 0..p.kernel_size {
                for i in 0..t.curr_h {
                    for j in 0..t.curr_w {
                        let in_vec = rx.recv().map_err(|_| ConvError::Pipeline("execute"))?;
                        for oc in 0..self.cfg.tile_oc {
                            let mut dot = I16F16::ZERO;
                            for ic in 0..self.cfg.tile_ic {
                                let w = self.wt[self.wt_idx(oc, ic, ky, kx)];
                                dot = mac(dot, w, in_vec.lane(ic));
                            }
                            let idx = self.acc_idx(oc, i, j);
                            self.acc[idx] = self.acc[idx].sat_add(dot);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Finalize: fused affine, activation, and packed emission. Lanes past
    /// `oc_valid` carry zeros and are dropped by the Write stage.
    fn emit(
        &self,
        p: &ConvParams,
        t: &ConvTile,
        tx: &Sender<Word256>,
    ) -> Result<(), ConvError> {
        for i in 0..t.curr_h {
            for j in 0..t.curr_w {
                let mut out = Word256::ZERO;
                for oc in 0..self.cfg.tile_oc {
                    let acc = self.acc[self.acc_idx(oc, i, j)];
                    let v = activate(
                        affine_narrow(acc, self.scale[oc], self.bias[oc]),
                        p.activation,
                    );
                    out.set_lane(oc, v);
                }
                tx.send(out).map_err(|_| ConvError::Pipeline("execute"))?;
            }
        }
        Ok(())
    }
}

//! Write stage: places finished tiles into the output tensor, optionally
//! through the 2×2 max-pool reduction.
//!
//! Writes are phase-separated per tile: demux the stream into the tile
//! buffer, then emit whole rows as one-or-two-word bursts. A touched word is
//! read back from the store only when the row overwrites it partially; fully
//! covered words start from zero. Because tiles are written in `(tr, tc, to)`
//! order and rows top-to-bottom, a shared edge word always ends up with the
//! bytes of the later writer, which is what makes the final tensor
//! deterministic.

use crossbeam_channel::Receiver;
use log::trace;

use crate::fixed::I8F8;
use crate::params::{ConvError, ConvParams};
use crate::schedule::{TileConfig, TileSchedule, WriteTile};
use crate::word::{Word256, WORD_LANES};

pub struct WriteStage {
    cfg: TileConfig,
    /// `[tile_oc][tile_h][tile_w]`, flattened.
    tile_buf: Vec<I8F8>,
    /// One packed output row (pooled or direct).
    row_buf: Vec<I8F8>,
}

impl WriteStage {
    pub fn new(cfg: TileConfig) -> Self {
        Self {
            cfg,
            tile_buf: vec![I8F8::ZERO; cfg.tile_oc * cfg.tile_h * cfg.tile_w],
            row_buf: vec![I8F8::ZERO; cfg.tile_w],
        }
    }

    /// Drive the stage for one invocation.
    pub fn run(
        &mut self,
        output: &mut [Word256],
        p: &ConvParams,
        sched: &TileSchedule,
        output_rx: &Receiver<Word256>,
    ) -> Result<(), ConvError> {
        let pooled = p.pooled();
        for tile in sched.write_tiles() {
            if tile.to == 0 {
                trace!("write: tile row={} col={}", tile.tr, tile.tc);
            }
            self.read_stream(&tile, output_rx)?;
            if pooled {
                self.write_pooled(output, p, &tile);
            } else {
                self.write_direct(output, p, &tile);
            }
        }
        Ok(())
    }

    #[inline]
    fn buf_idx(&self, oc: usize, i: usize, j: usize) -> usize {
        (oc * self.cfg.tile_h + i) * self.cfg.tile_w + j
    }

    /// Phase 1: demultiplex `curr_h · curr_w` words into the tile buffer.
    fn read_stream(&mut self, t: &WriteTile, rx: &Receiver<Word256>) -> Result<(), ConvError> {
        for i in 0..t.curr_h {
            for j in 0..t.curr_w {
                let w = rx.recv().map_err(|_| ConvError::Pipeline("write"))?;
                for oc in 0..self.cfg.tile_oc {
                    let idx = self.buf_idx(oc, i, j);
                    self.tile_buf[idx] = w.lane(oc);
                }
            }
        }
        Ok(())
    }

    /// Phase 2/3, direct path: one burst per valid channel row.
    fn write_direct(&mut self, output: &mut [Word256], p: &ConvParams, t: &WriteTile) {
        let oh = p.out_height();
        let ow = p.out_width();
        for oc in 0..t.oc_valid {
            let global_oc = t.oc_base + oc;
            for i in 0..t.curr_h {
                for j in 0..t.curr_w {
                    let idx = self.buf_idx(oc, i, j);
                    self.row_buf[j] = self.tile_buf[idx];
                }
                let base = (global_oc * oh + t.r_start + i) * ow + t.c_start;
                write_row(output, base, &self.row_buf[..t.curr_w]);
            }
        }
    }

    /// Phase 2/3, pooled path: reduce each 2×2 block, then burst the
    /// half-size rows with the same edge discipline.
    fn write_pooled(&mut self, output: &mut [Word256], p: &ConvParams, t: &WriteTile) {
        let final_h = p.out_height() / 2;
        let final_w = p.out_width() / 2;
        let ph = t.curr_h / 2;
        let pw = t.curr_w / 2;
        for oc in 0..t.oc_valid {
            let global_oc = t.oc_base + oc;
            for i in 0..ph {
                for j in 0..pw {
                    let v0 = self.tile_buf[self.buf_idx(oc, i * 2, j * 2)];
                    let v1 = self.tile_buf[self.buf_idx(oc, i * 2 + 1, j * 2)];
                    let v2 = self.tile_buf[self.buf_idx(oc, i * 2, j * 2 + 1)];
                    let v3 = self.tile_buf[self.buf_idx(oc, i * 2 + 1, j * 2 + 1)];
                    self.row_buf[j] = v0.max(v1).max(v2.max(v3));
                }
                let out_r = t.r_start / 2 + i;
                let base = (global_oc * final_h + out_r) * final_w + t.c_start / 2;
                write_row(output, base, &self.row_buf[..pw]);
            }
        }
    }
}

/// Pack one output row into the backing store at flat element index `base`.
///
/// The row touches one or two words. The first word is read back only when
/// the row starts mid-word with more elements than the word can take from
/// slot 0 (`first_count < 16`); the spill word only when it too is partial.
/// Everything else starts from zero, so no stale store bytes survive inside
/// a fully overwritten word.
pub(crate) fn write_row(output: &mut [Word256], base: usize, vals: &[I8F8]) {
    debug_assert!(!vals.is_empty() && vals.len() <= WORD_LANES);
    let first_word = base / WORD_LANES;
    let start_slot = base % WORD_LANES;
    let first_count = (WORD_LANES - start_slot).min(vals.len());
    let second_count = vals.len() - first_count;

    let mut word = if first_count < WORD_LANES {
        output[first_word]
    } else {
        Word256::ZERO
    };
    for (j, &v) in vals[..first_count].iter().enumerate() {
        word.set_lane(start_slot + j, v);
    }
    output[first_word] = word;

    if second_count > 0 {
        let mut word = if second_count < WORD_LANES {
            output[first_word + 1]
        } else {
            Word256::ZERO
        };
        for (j, &v) in vals[first_count..].iter().enumerate() {
            word.set_lane(j, v);
        }
        output[first_word + 1] = word;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elems(vals: &[i16]) -> Vec<I8F8> {
        vals.iter().map(|&r| I8F8::from_raw(r)).collect()
    }

    #[test]
    fn test_full_word_write_clears_stale_bytes() {
        let mut out = vec![Word256::pack(&[I8F8::from_raw(-1); WORD_LANES]); 2];
        let row = elems(&(0i16..16).collect::<Vec<i16>>());
        write_row(&mut out, 0, &row);
        for i in 0..16 {
            assert_eq!(out[0].lane(i).to_raw(), i as i16);
        }
        // the second word was never touched
        assert_eq!(out[1].lane(0).to_raw(), -1);
    }

    #[test]
    fn test_partial_word_preserves_neighbors() {
        let mut out = vec![Word256::pack(&[I8F8::from_raw(99); WORD_LANES]); 1];
        // 13 elements starting at slot 0: slots 13..16 must keep old bytes
        let row = elems(&(1i16..=13).collect::<Vec<i16>>());
        write_row(&mut out, 0, &row);
        assert_eq!(out[0].lane(12).to_raw(), 13);
        assert_eq!(out[0].lane(13).to_raw(), 99);
        assert_eq!(out[0].lane(15).to_raw(), 99);
    }

    #[test]
    fn test_straddling_row_hits_two_words() {
        let mut out = vec![Word256::pack(&[I8F8::from_raw(7); WORD_LANES]); 2];
        // 10 elements starting at slot 13: 3 in word 0, 7 spill into word 1
        let row = elems(&(1i16..=10).collect::<Vec<i16>>());
        write_row(&mut out, 13, &row);
        assert_eq!(out[0].lane(12).to_raw(), 7);
        assert_eq!(out[0].lane(13).to_raw(), 1);
        assert_eq!(out[0].lane(15).to_raw(), 3);
        assert_eq!(out[1].lane(0).to_raw(), 4);
        assert_eq!(out[1].lane(6).to_raw(), 10);
        // spill word is partial -> trailing lanes preserved
        assert_eq!(out[1].lane(7).to_raw(), 7);
    }

    #[test]
    fn test_adjacent_rows_share_an_edge_word() {
        let mut out = vec![Word256::ZERO; 2];
        write_row(&mut out, 0, &elems(&[1; 13]));
        write_row(&mut out, 13, &elems(&[2; 13]));
        for i in 0..13 {
            assert_eq!(out[0].lane(i).to_raw(), 1);
        }
        for i in 13..16 {
            assert_eq!(out[0].lane(i).to_raw(), 2);
        }
        for i in 0..10 {
            assert_eq!(out[1].lane(i).to_raw(), 2);
        }
        // beyond both rows: untouched zeros from the fresh buffer
        assert_eq!(out[1].lane(10).to_raw(), 0);
    }
}

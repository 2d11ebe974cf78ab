//! Tile schedule: the `(row, col, ic, oc)` iteration space and per-tile
//! geometry shared by all three pipeline stages.
//!
//! The canonical order is row-outer, col, IC-outer, OC-inner. IC-outer is
//! load-bearing: one fetched input tile is reused across every OC tile, at
//! the price of the partial-sum buffer dimensioned by `max_oc_steps`.

use crate::params::{ConvParams, K_MAX, MAX_STRIDE};
use crate::word::WORD_LANES;

/// Tile dimensions and partial-sum sizing.
///
/// Defaults match the hardware shape (16 everywhere). Shrinking any field
/// changes the schedule but must never change output bytes; the engine reads
/// every buffer extent from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileConfig {
    pub tile_h: usize,
    pub tile_w: usize,
    /// Input channels per tile; one stream word carries this many lanes (≤ 16).
    pub tile_ic: usize,
    /// Output channels per tile; one output word carries this many lanes (≤ 16).
    pub tile_oc: usize,
    /// Largest supported `out_channels`; sizes the partial-sum buffer.
    pub max_oc: usize,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            tile_h: 16,
            tile_w: 16,
            tile_ic: 16,
            tile_oc: 16,
            max_oc: 1024,
        }
    }
}

impl TileConfig {
    /// Input-cache rows: enough for a full tile at the maximum stride plus
    /// the kernel halo.
    #[inline]
    pub fn cache_h(&self) -> usize {
        self.tile_h * MAX_STRIDE + K_MAX - 1
    }

    /// Input-cache columns.
    #[inline]
    pub fn cache_w(&self) -> usize {
        self.tile_w * MAX_STRIDE + K_MAX - 1
    }

    /// Partial-sum slots: one per OC tile of the widest supported layer.
    #[inline]
    pub fn max_oc_steps(&self) -> usize {
        (self.max_oc + self.tile_oc - 1) / self.tile_oc
    }

    /// `true` when the configuration can drive the engine.
    pub fn is_valid(&self) -> bool {
        self.tile_h > 0
            && self.tile_w > 0
            && self.tile_w <= WORD_LANES
            && (1..=WORD_LANES).contains(&self.tile_ic)
            && (1..=WORD_LANES).contains(&self.tile_oc)
            && self.max_oc >= self.tile_oc
    }
}

/// Step counts and clipped geometry for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct TileSchedule {
    cfg: TileConfig,
    pub row_steps: usize,
    pub col_steps: usize,
    pub ic_steps: usize,
    pub oc_steps: usize,
    out_height: usize,
    out_width: usize,
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
}

impl TileSchedule {
    pub fn new(p: &ConvParams, cfg: TileConfig) -> Self {
        let out_height = p.out_height();
        let out_width = p.out_width();
        Self {
            cfg,
            row_steps: div_ceil(out_height, cfg.tile_h),
            col_steps: div_ceil(out_width, cfg.tile_w),
            ic_steps: div_ceil(p.in_channels, cfg.tile_ic),
            oc_steps: div_ceil(p.out_channels, cfg.tile_oc),
            out_height,
            out_width,
            in_channels: p.in_channels,
            out_channels: p.out_channels,
            kernel: p.kernel_size,
            stride: p.stride,
            padding: p.padding,
        }
    }

    #[inline]
    pub fn config(&self) -> TileConfig {
        self.cfg
    }

    /// Fetch/Execute iteration: `(tr, tc, ti, to)` with `to` fastest.
    pub fn conv_tiles(&self) -> ConvTiles<'_> {
        ConvTiles {
            sched: self,
            tr: 0,
            tc: 0,
            ti: 0,
            to: 0,
            done: false,
        }
    }

    /// Write iteration: `(tr, tc, to)` with `to` fastest.
    pub fn write_tiles(&self) -> WriteTiles<'_> {
        WriteTiles {
            sched: self,
            tr: 0,
            tc: 0,
            to: 0,
            done: false,
        }
    }

    fn spatial(&self, tr: usize, tc: usize) -> (usize, usize, usize, usize) {
        let r_start = tr * self.cfg.tile_h;
        let c_start = tc * self.cfg.tile_w;
        let curr_h = (self.out_height - r_start).min(self.cfg.tile_h);
        let curr_w = (self.out_width - c_start).min(self.cfg.tile_w);
        (r_start, c_start, curr_h, curr_w)
    }
}

/// Geometry of one `(tr, tc, ti, to)` tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvTile {
    pub tr: usize,
    pub tc: usize,
    pub ti: usize,
    pub to: usize,
    /// First output row/col covered by the tile.
    pub r_start: usize,
    pub c_start: usize,
    /// Output extent, clipped at the tensor boundary.
    pub curr_h: usize,
    pub curr_w: usize,
    /// Input window extent required for the clipped output.
    pub tile_in_h: usize,
    pub tile_in_w: usize,
    /// Input window origin; negative at padded edges.
    pub h_base: isize,
    pub w_base: isize,
    pub ic_base: usize,
    pub oc_base: usize,
    /// Channels of this tile that exist in the tensor.
    pub ic_valid: usize,
    pub oc_valid: usize,
    /// First OC tile of this `(tr, tc, ti)`: the input cache is (re)filled here.
    pub first_oc: bool,
    /// First/last IC tile of this `(tr, tc, to)`: accumulator init / finalize.
    pub first_ic: bool,
    pub last_ic: bool,
}

pub struct ConvTiles<'a> {
    sched: &'a TileSchedule,
    tr: usize,
    tc: usize,
    ti: usize,
    to: usize,
    done: bool,
}

impl Iterator for ConvTiles<'_> {
    type Item = ConvTile;

    fn next(&mut self) -> Option<ConvTile> {
        if self.done {
            return None;
        }
        let s = self.sched;
        let cfg = s.cfg;
        let (r_start, c_start, curr_h, curr_w) = s.spatial(self.tr, self.tc);
        let ic_base = self.ti * cfg.tile_ic;
        let oc_base = self.to * cfg.tile_oc;
        let tile = ConvTile {
            tr: self.tr,
            tc: self.tc,
            ti: self.ti,
            to: self.to,
            r_start,
            c_start,
            curr_h,
            curr_w,
            tile_in_h: curr_h * s.stride + s.kernel - 1,
            tile_in_w: curr_w * s.stride + s.kernel - 1,
            h_base: (r_start * s.stride) as isize - s.padding as isize,
            w_base: (c_start * s.stride) as isize - s.padding as isize,
            ic_base,
            oc_base,
            ic_valid: (s.in_channels - ic_base).min(cfg.tile_ic),
            oc_valid: (s.out_channels - oc_base).min(cfg.tile_oc),
            first_oc: self.to == 0,
            first_ic: self.ti == 0,
            last_ic: self.ti + 1 == s.ic_steps,
        };

        self.to += 1;
        if self.to == s.oc_steps {
            self.to = 0;
            self.ti += 1;
            if self.ti == s.ic_steps {
                self.ti = 0;
                self.tc += 1;
                if self.tc == s.col_steps {
                    self.tc = 0;
                    self.tr += 1;
                    if self.tr == s.row_steps {
                        self.done = true;
                    }
                }
            }
        }
        Some(tile)
    }
}

/// Geometry of one `(tr, tc, to)` output tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteTile {
    pub tr: usize,
    pub tc: usize,
    pub to: usize,
    pub r_start: usize,
    pub c_start: usize,
    pub curr_h: usize,
    pub curr_w: usize,
    pub oc_base: usize,
    pub oc_valid: usize,
}

pub struct WriteTiles<'a> {
    sched: &'a TileSchedule,
    tr: usize,
    tc: usize,
    to: usize,
    done: bool,
}

impl Iterator for WriteTiles<'_> {
    type Item = WriteTile;

    fn next(&mut self) -> Option<WriteTile> {
        if self.done {
            return None;
        }
        let s = self.sched;
        let (r_start, c_start, curr_h, curr_w) = s.spatial(self.tr, self.tc);
        let oc_base = self.to * s.cfg.tile_oc;
        let tile = WriteTile {
            tr: self.tr,
            tc: self.tc,
            to: self.to,
            r_start,
            c_start,
            curr_h,
            curr_w,
            oc_base,
            oc_valid: (s.out_channels - oc_base).min(s.cfg.tile_oc),
        };

        self.to += 1;
        if self.to == s.oc_steps {
            self.to = 0;
            self.tc += 1;
            if self.tc == s.col_steps {
                self.tc = 0;
                self.tr += 1;
                if self.tr == s.row_steps {
                    self.done = true;
                }
            }
        }
        Some(tile)
    }
}

#[inline(always)]
fn div_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

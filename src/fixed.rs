//! Q8.8 / Q16.16 saturating fixed-point arithmetic.
//!
//! All rounding is round-to-nearest-even and all overflow saturates. The
//! accelerator pipeline and the golden reference share these primitives, so
//! any divergence between them is a bug here, not in the callers.

use std::fmt;

/// Signed Q8.8 fixed point stored as raw `i16` bits.
///
/// Range ≈ [−128, +127.996], resolution 2⁻⁸.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct I8F8(i16);

/// Signed Q16.16 fixed point stored as raw `i32` bits.
///
/// Accumulator format: the product of two `I8F8` raws is exact in Q16.16.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct I16F16(i32);

impl I8F8 {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1 << 8);
    pub const MIN: Self = Self(i16::MIN);
    pub const MAX: Self = Self(i16::MAX);

    #[inline(always)]
    pub const fn from_raw(raw: i16) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn to_raw(self) -> i16 {
        self.0
    }

    /// Quantize a float, saturating outside the representable range.
    ///
    /// Test/setup convenience; the inference path never touches floats.
    pub fn from_f32(v: f32) -> Self {
        let scaled = (v * 256.0).round();
        Self(scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16)
    }

    /// Float view, exact (raw / 256).
    #[inline]
    pub fn to_f32(self) -> f32 {
        self.0 as f32 / 256.0
    }

    /// Widen to Q16.16 without loss.
    #[inline(always)]
    pub const fn widen(self) -> I16F16 {
        I16F16((self.0 as i32) << 8)
    }

    /// Saturating rounded product: widen, multiply, narrow once.
    #[inline]
    pub fn mul(self, rhs: Self) -> Self {
        prod(self, rhs).narrow()
    }

    /// Larger of two values (raw signed compare, as the pool reducer needs).
    #[inline(always)]
    pub fn max(self, rhs: Self) -> Self {
        if self.0 >= rhs.0 {
            self
        } else {
            rhs
        }
    }
}

impl I16F16 {
    pub const ZERO: Self = Self(0);
    pub const MIN: Self = Self(i32::MIN);
    pub const MAX: Self = Self(i32::MAX);

    #[inline(always)]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn to_raw(self) -> i32 {
        self.0
    }

    #[inline]
    pub fn to_f32(self) -> f32 {
        self.0 as f32 / 65536.0
    }

    /// Saturating add in the accumulator domain.
    #[inline(always)]
    pub fn sat_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Narrow to Q8.8: drop 8 fractional bits with round-to-nearest-even,
    /// saturate to the `i16` raw range.
    #[inline]
    pub fn narrow(self) -> I8F8 {
        I8F8(saturate16(rne_shr(self.0 as i64, 8)))
    }
}

impl fmt::Debug for I8F8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I8F8({})", self.to_f32())
    }
}

impl fmt::Debug for I16F16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I16F16({})", self.to_f32())
    }
}

/// Activation applied after the fused affine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Pass-through (wire value −1).
    Linear,
    /// max(x, 0) (wire value 0).
    Relu,
    /// x < 0 ↦ (x·13) >> 7 in the Q16.16 domain, narrowed (wire value +1).
    Leaky,
}

impl Activation {
    /// Wire encoding used by the invocation interface.
    #[inline(always)]
    pub const fn as_i8(self) -> i8 {
        match self {
            Activation::Linear => -1,
            Activation::Relu => 0,
            Activation::Leaky => 1,
        }
    }

    #[inline(always)]
    pub const fn from_i8(v: i8) -> Option<Self> {
        match v {
            -1 => Some(Activation::Linear),
            0 => Some(Activation::Relu),
            1 => Some(Activation::Leaky),
            _ => None,
        }
    }
}

/// Exact Q16.16 product of two Q8.8 values.
///
/// raw(a)·raw(b) carries 16 fractional bits and fits `i32` for all inputs,
/// so no rounding or saturation occurs here.
#[inline(always)]
fn prod(a: I8F8, b: I8F8) -> I16F16 {
    I16F16(a.to_raw() as i32 * b.to_raw() as i32)
}

/// Multiply-accumulate: `acc + a·b` with a saturating accumulate.
#[inline(always)]
pub fn mac(acc: I16F16, a: I8F8, b: I8F8) -> I16F16 {
    acc.sat_add(prod(a, b))
}

/// Fused affine with a single narrowing: `acc·scale + bias` computed exactly
/// in a 64-bit intermediate (24 fractional bits), then rounded once to Q8.8.
///
/// The intermediate is never narrowed: rounding the product and the sum
/// separately can differ from the single-rounded result by one LSB.
#[inline]
pub fn affine_narrow(acc: I16F16, scale: I8F8, bias: I8F8) -> I8F8 {
    let v = acc.to_raw() as i64 * scale.to_raw() as i64 + ((bias.to_raw() as i64) << 16);
    I8F8::from_raw(saturate16(rne_shr(v, 16)))
}

/// Apply the selected activation to a narrowed Q8.8 value.
#[inline]
pub fn activate(x: I8F8, mode: Activation) -> I8F8 {
    match mode {
        Activation::Linear => x,
        _ if x.to_raw() >= 0 => x,
        Activation::Relu => I8F8::ZERO,
        Activation::Leaky => {
            // (x·13) >> 7 over Q16.16 raws is exact (no low bits are lost:
            // the widened raw is a multiple of 2⁸), so the only rounding is
            // the final narrow.
            let t = ((x.widen().to_raw() as i64) * 13) >> 7;
            I16F16::from_raw(t as i32).narrow()
        }
    }
}

/// Arithmetic shift right with round-to-nearest-even.
#[inline(always)]
fn rne_shr(v: i64, shift: u32) -> i64 {
    let half = 1i64 << (shift - 1);
    let frac = v & ((1i64 << shift) - 1);
    let base = v >> shift;
    if frac > half {
        base + 1
    } else if frac < half {
        base
    } else {
        base + (base & 1)
    }
}

#[inline(always)]
fn saturate16(v: i64) -> i16 {
    v.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrow_round_to_nearest_even() {
        // 0.5 LSB above zero: tie, base even -> stays 0
        assert_eq!(I16F16::from_raw(128).narrow().to_raw(), 0);
        // 1.5 LSB: tie, base odd -> rounds up to 2
        assert_eq!(I16F16::from_raw(384).narrow().to_raw(), 2);
        // just above half rounds up
        assert_eq!(I16F16::from_raw(129).narrow().to_raw(), 1);
        // just below half rounds down
        assert_eq!(I16F16::from_raw(127).narrow().to_raw(), 0);
        // negative tie: -0.5 LSB, base (floor) is -1, odd -> rounds to 0
        assert_eq!(I16F16::from_raw(-128).narrow().to_raw(), 0);
        // -1.5 LSB: floor is -2, even -> stays -2
        assert_eq!(I16F16::from_raw(-384).narrow().to_raw(), -2);
    }

    #[test]
    fn test_narrow_saturates() {
        assert_eq!(I16F16::MAX.narrow(), I8F8::MAX);
        assert_eq!(I16F16::MIN.narrow(), I8F8::MIN);
    }

    #[test]
    fn test_mul_exact_cases() {
        let a = I8F8::from_f32(2.0);
        let b = I8F8::from_f32(-3.5);
        assert_eq!(a.mul(b), I8F8::from_f32(-7.0));
        // 127.99.. * 127.99.. saturates
        assert_eq!(I8F8::MAX.mul(I8F8::MAX), I8F8::MAX);
        assert_eq!(I8F8::MIN.mul(I8F8::MIN), I8F8::MAX);
    }

    #[test]
    fn test_mac_accumulates_and_saturates() {
        let mut acc = I16F16::ZERO;
        acc = mac(acc, I8F8::from_f32(1.5), I8F8::from_f32(2.0));
        acc = mac(acc, I8F8::from_f32(-0.5), I8F8::from_f32(1.0));
        assert_eq!(acc.narrow(), I8F8::from_f32(2.5));

        let sat = mac(I16F16::MAX, I8F8::MAX, I8F8::MAX);
        assert_eq!(sat, I16F16::MAX);
    }

    #[test]
    fn test_affine_single_narrow() {
        // acc = 1.0, scale = 1.0, bias = 0.5 -> 1.5 exactly
        let acc = I16F16::from_raw(1 << 16);
        let r = affine_narrow(acc, I8F8::ONE, I8F8::from_f32(0.5));
        assert_eq!(r, I8F8::from_f32(1.5));

        // identity affine equals plain narrow for a tie-breaking value
        let acc = I16F16::from_raw(384);
        assert_eq!(affine_narrow(acc, I8F8::ONE, I8F8::ZERO), acc.narrow());

        // saturates on large scale
        let acc = I16F16::from_raw(100 << 16);
        assert_eq!(affine_narrow(acc, I8F8::from_f32(100.0), I8F8::ZERO), I8F8::MAX);
    }

    #[test]
    fn test_activate_linear_and_relu() {
        let neg = I8F8::from_f32(-1.25);
        let pos = I8F8::from_f32(3.0);
        assert_eq!(activate(neg, Activation::Linear), neg);
        assert_eq!(activate(pos, Activation::Relu), pos);
        assert_eq!(activate(neg, Activation::Relu), I8F8::ZERO);
    }

    #[test]
    fn test_activate_leaky_matches_shift_formula() {
        // x = -1.0 (raw -256): raw·26 = -6656, narrow -> raw -26
        let x = I8F8::from_f32(-1.0);
        assert_eq!(activate(x, Activation::Leaky).to_raw(), -26);

        // every negative raw must equal narrow((widen(x)·13) >> 7)
        for raw in (-32768i32..0).step_by(257) {
            let x = I8F8::from_raw(raw as i16);
            let expect = I16F16::from_raw((((raw << 8) as i64 * 13) >> 7) as i32).narrow();
            assert_eq!(
                activate(x, Activation::Leaky),
                expect,
                "leaky mismatch at raw {raw}"
            );
        }

        // positives pass through
        let pos = I8F8::from_f32(2.5);
        assert_eq!(activate(pos, Activation::Leaky), pos);
    }

    #[test]
    fn test_activation_wire_values() {
        assert_eq!(Activation::Linear.as_i8(), -1);
        assert_eq!(Activation::Relu.as_i8(), 0);
        assert_eq!(Activation::Leaky.as_i8(), 1);
        assert_eq!(Activation::from_i8(-1), Some(Activation::Linear));
        assert_eq!(Activation::from_i8(2), None);
    }
}

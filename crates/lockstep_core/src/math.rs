//! Fixed-point math utilities for deterministic simulation.
//!
//! All game simulation uses fixed-point arithmetic to ensure
//! deterministic behavior across platforms. Floating-point
//! operations can produce different results on different CPUs.

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all simulation math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
/// Range: approximately -2,147,483,648 to 2,147,483,647
/// Precision: approximately 0.00000000023
pub type Fixed = I32F32;

/// Fixed-point 2D vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec2Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
}

/// Serde support for fixed-point numbers.
///
/// Serializes fixed-point numbers as their raw bit representation (i64)
/// to preserve exact precision across serialization boundaries.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bit representation.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bit representation.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

impl Vec2Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Create a vector from integer world coordinates.
    #[must_use]
    pub fn from_int(x: i32, y: i32) -> Self {
        Self::new(Fixed::from_num(x), Fixed::from_num(y))
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    /// Calculate squared distance (avoids sqrt for comparisons).
    ///
    /// Saturates at [`Fixed::MAX`] for points more than about 46,000
    /// units apart.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        saturate_unsigned(raw_distance_squared(self, other) >> 32)
    }

    /// Straight-line distance, using the exact fixed-point square root.
    ///
    /// The squares are summed on raw bits in 128-bit integers. Saturates
    /// at [`Fixed::MAX`] only for points farther apart than that.
    #[must_use]
    pub fn distance(self, other: Self) -> Fixed {
        saturate_unsigned(raw_length(self, other))
    }

    /// Drop the fractional part of both coordinates, rounding toward zero.
    #[must_use]
    pub fn truncated(self) -> Self {
        Self::new(truncate(self.x), truncate(self.y))
    }

    /// True if both axes differ from `other` by strictly less than `tolerance`.
    #[must_use]
    pub fn within(self, other: Self, tolerance: Fixed) -> bool {
        let tolerance = i128::from(tolerance.to_bits());
        raw_diff(self.x, other.x).abs() < tolerance && raw_diff(self.y, other.y).abs() < tolerance
    }

    /// Move `distance` units from `self` toward `target` along the straight line.
    ///
    /// The displacement is `diff * distance / |diff|` on raw bits, so
    /// perfect-square distances produce exact results and far targets do
    /// not overflow. Returns `self` if the points coincide.
    #[must_use]
    pub fn step_toward(self, target: Self, distance: Fixed) -> Self {
        let length = raw_length(self, target) as i128;
        if length == 0 {
            return self;
        }
        let distance = i128::from(distance.to_bits());
        let axis = |from: Fixed, to: Fixed| {
            let shift = raw_diff(to, from).saturating_mul(distance) / length;
            saturate(i128::from(from.to_bits()) + shift)
        };
        Self::new(axis(self.x, target.x), axis(self.y, target.y))
    }
}

/// `a - b` on raw bits; cannot overflow.
fn raw_diff(a: Fixed, b: Fixed) -> i128 {
    i128::from(a.to_bits()) - i128::from(b.to_bits())
}

/// Squared distance in raw units (scaled by 2^64), saturating at `u128::MAX`.
fn raw_distance_squared(a: Vec2Fixed, b: Vec2Fixed) -> u128 {
    let dx = raw_diff(a.x, b.x).unsigned_abs();
    let dy = raw_diff(a.y, b.y).unsigned_abs();
    dx.saturating_mul(dx).saturating_add(dy.saturating_mul(dy))
}

/// Distance in raw units. Exact to the last bit unless the squares do not
/// fit in 128 bits, in which case the lowest bit of each axis is dropped.
fn raw_length(a: Vec2Fixed, b: Vec2Fixed) -> u128 {
    let dx = raw_diff(a.x, b.x).unsigned_abs();
    let dy = raw_diff(a.y, b.y).unsigned_abs();
    // sqrt(bits² * 2^-64) * 2^32 == sqrt(bits²)
    match dx
        .checked_mul(dx)
        .zip(dy.checked_mul(dy))
        .and_then(|(x, y)| x.checked_add(y))
    {
        Some(sum) => isqrt_u128(sum),
        None => {
            let (hx, hy) = (dx >> 1, dy >> 1);
            isqrt_u128(hx * hx + hy * hy) << 1
        }
    }
}

fn saturate(bits: i128) -> Fixed {
    Fixed::from_bits(bits.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
}

fn saturate_unsigned(bits: u128) -> Fixed {
    Fixed::from_bits(bits.min(i64::MAX as u128) as i64)
}

/// Round toward zero, keeping the integer part only.
#[must_use]
pub fn truncate(value: Fixed) -> Fixed {
    if value < Fixed::ZERO && value.frac() != Fixed::ZERO {
        value.int() + Fixed::ONE
    } else {
        value.int()
    }
}

/// Computes the square root of a non-negative fixed-point number.
///
/// Works on the raw bits with an integer square root, so the result is the
/// exact floor of the true root at `I32F32` precision and identical on every
/// platform. Negative inputs yield zero.
#[must_use]
pub fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }

    // sqrt(v / 2^32) * 2^32 == sqrt(v * 2^32)
    let scaled = (value.to_bits() as u128) << 32;
    Fixed::from_bits(isqrt_u128(scaled) as i64)
}

/// Bit-by-bit integer square root.
fn isqrt_u128(n: u128) -> u128 {
    let mut remainder = n;
    let mut root = 0u128;
    let mut bit = 1u128 << 126;

    while bit > remainder {
        bit >>= 2;
    }

    while bit != 0 {
        if remainder >= root + bit {
            remainder -= root + bit;
            root = (root >> 1) + bit;
        } else {
            root >>= 1;
        }
        bit >>= 2;
    }

    root
}

impl std::ops::Add for Vec2Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x.saturating_add(rhs.x),
            y: self.y.saturating_add(rhs.y),
        }
    }
}

impl std::ops::Sub for Vec2Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x.saturating_sub(rhs.x),
            y: self.y.saturating_sub(rhs.y),
        }
    }
}

// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Small math primitives shared by the RHI value types.
//!
//! The renderer only needs colours and integer extents at this layer; vertex math
//! happens inside shaders (or the software substrate that stands in for them).

pub mod color;
pub mod dimension;

pub use self::color::LinearRgba;
pub use self::dimension::{Extent2D, Extent3D, Origin3D};

/// A small constant for floating-point comparisons.
pub const EPSILON: f32 = 1e-5;

/// Integer ceiling division, as used for work-group and block counts.
///
/// Returns `0` when `divisor` is `0`.
///
/// # Examples
///
/// ```
/// use lunex_core::math::div_ceil;
/// assert_eq!(div_ceil(100, 64), 2);
/// assert_eq!(div_ceil(128, 64), 2);
/// ```
#[inline]
pub fn div_ceil(value: u32, divisor: u32) -> u32 {
    if divisor == 0 {
        return 0;
    }
    value.div_ceil(divisor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn div_ceil_rounds_up_and_handles_zero() {
        assert_eq!(div_ceil(0, 8), 0);
        assert_eq!(div_ceil(1, 8), 1);
        assert_eq!(div_ceil(9, 8), 2);
        assert_eq!(div_ceil(9, 0), 0);
    }
}

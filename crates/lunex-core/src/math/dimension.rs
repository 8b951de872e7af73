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

//! Integer extents and origins used to address texture regions.

use serde::{Deserialize, Serialize};

/// A two-dimensional size in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent2D {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
}

impl Extent2D {
    /// Creates a new extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns `true` if either dimension is zero.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A three-dimensional size in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent3D {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth (or slice count) in texels.
    pub depth: u32,
}

impl Extent3D {
    /// Creates a new extent.
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// The number of texels covered by this extent.
    pub const fn texel_count(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }

    /// The extent of mip `level`, never smaller than one texel per axis.
    pub fn mip(&self, level: u32) -> Self {
        Self {
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
            depth: (self.depth >> level).max(1),
        }
    }
}

/// A three-dimensional texel offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Origin3D {
    /// X offset.
    pub x: u32,
    /// Y offset.
    pub y: u32,
    /// Z offset (or slice).
    pub z: u32,
}

impl Origin3D {
    /// The zero origin.
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };

    /// Creates a new origin.
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_extent_clamps_to_one() {
        let e = Extent3D::new(256, 64, 1);
        assert_eq!(e.mip(1), Extent3D::new(128, 32, 1));
        assert_eq!(e.mip(8), Extent3D::new(1, 1, 1));
        assert_eq!(e.texel_count(), 256 * 64);
    }
}

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

//! Device memory of the software GPU: linear buffers and mip-mapped images.
//!
//! Images are stored tightly packed in their native texel layout, one allocation per
//! (layer, mip) subresource. Row 0 is the top row.

use super::error::SoftGpuError;
use lunex_core::math::{Extent3D, LinearRgba};
use lunex_core::renderer::{
    decode_color, decode_depth, decode_stencil, encode_color, encode_depth, ClearValue,
    ScissorRect, TextureDesc, TextureFormat, TextureRegion, TextureType,
};
use std::ops::Range;

/// Backing store of one buffer.
#[derive(Debug, Clone)]
pub struct BufferMemory {
    bytes: Vec<u8>,
}

impl BufferMemory {
    /// Allocates `size` zeroed bytes, filled from `initial` if given.
    ///
    /// Fails instead of aborting when the host cannot provide the memory.
    pub fn new(size: u64, initial: Option<&[u8]>) -> Result<Self, SoftGpuError> {
        let len = usize::try_from(size).map_err(|_| SoftGpuError::OutOfMemory(size))?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| SoftGpuError::OutOfMemory(size))?;
        bytes.resize(len, 0);
        if let Some(data) = initial {
            let n = data.len().min(bytes.len());
            bytes[..n].copy_from_slice(&data[..n]);
        }
        Ok(Self { bytes })
    }

    /// Length in bytes.
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// `true` for a zero-length buffer.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn range(&self, offset: u64, size: u64) -> Result<Range<usize>, SoftGpuError> {
        match offset.checked_add(size) {
            Some(end) if end <= self.len() => Ok(offset as usize..end as usize),
            _ => Err(SoftGpuError::OutOfRange {
                offset,
                size,
                len: self.len(),
            }),
        }
    }

    /// Borrows `size` bytes at `offset`.
    pub fn read(&self, offset: u64, size: u64) -> Result<&[u8], SoftGpuError> {
        let range = self.range(offset, size)?;
        Ok(&self.bytes[range])
    }

    /// Everything from `offset` to the end.
    pub fn tail(&self, offset: u64) -> &[u8] {
        self.bytes.get(offset as usize..).unwrap_or(&[])
    }

    /// Overwrites bytes at `offset`.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), SoftGpuError> {
        let range = self.range(offset, data.len() as u64)?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Fills a range with a repeating little-endian `u32`.
    pub fn fill_u32(&mut self, offset: u64, size: u64, value: u32) -> Result<(), SoftGpuError> {
        let range = self.range(offset, size)?;
        let pattern = value.to_le_bytes();
        for (i, byte) in self.bytes[range].iter_mut().enumerate() {
            *byte = pattern[i % 4];
        }
        Ok(())
    }

    /// Reads a `Pod` value at `offset`.
    pub fn read_pod<T: bytemuck::Pod>(&self, offset: u64) -> Result<T, SoftGpuError> {
        let bytes = self.read(offset, std::mem::size_of::<T>() as u64)?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// The whole buffer.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The whole buffer, mutably.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Backing store of one texture, every mip of every layer.
#[derive(Debug, Clone)]
pub struct Image {
    desc: TextureDesc,
    subresources: Vec<Vec<u8>>,
}

impl Image {
    /// Allocates a zeroed image. `desc` must already be validated by the device.
    pub fn new(desc: &TextureDesc) -> Result<Self, SoftGpuError> {
        if desc.format.is_compressed() {
            return Err(SoftGpuError::UnsupportedFormat(desc.format));
        }
        let mut desc = desc.clone();
        desc.mip_levels = desc.resolved_mip_levels();
        desc.array_layers = desc.array_layers.max(1);
        let base = desc.extent();
        let mut subresources = Vec::with_capacity((desc.mip_levels * desc.array_layers) as usize);
        for _layer in 0..desc.array_layers {
            for mip in 0..desc.mip_levels {
                let e = base.mip(mip);
                subresources.push(vec![0u8; desc.format.region_size(e.width, e.height, e.depth) as usize]);
            }
        }
        let mut image = Self { desc, subresources };
        if image.desc.format.is_depth() {
            // Depth images start at the far plane.
            for layer in 0..image.desc.array_layers {
                for mip in 0..image.desc.mip_levels {
                    image.clear(mip, layer, None, ClearValue::DEPTH_ONE);
                }
            }
        }
        Ok(image)
    }

    /// The (resolved) descriptor.
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    /// Texel format.
    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    /// Extent of mip `level`. 2D textures keep depth 1.
    pub fn mip_extent(&self, level: u32) -> Extent3D {
        let e = self.desc.extent().mip(level);
        if self.desc.ty == TextureType::Texture3D {
            e
        } else {
            Extent3D::new(e.width, e.height, 1)
        }
    }

    /// Allocated bytes.
    pub fn byte_size(&self) -> u64 {
        self.subresources.iter().map(|s| s.len() as u64).sum()
    }

    fn index(&self, mip: u32, layer: u32) -> Option<usize> {
        (mip < self.desc.mip_levels && layer < self.desc.array_layers)
            .then_some((layer * self.desc.mip_levels + mip) as usize)
    }

    fn check_region(&self, region: &TextureRegion) -> Result<usize, SoftGpuError> {
        let index = self
            .index(region.mip_level, region.array_layer)
            .ok_or_else(|| SoftGpuError::BadRegion(format!("{region:?}")))?;
        let e = self.mip_extent(region.mip_level);
        let o = region.origin;
        let r = region.extent;
        if o.x + r.width > e.width || o.y + r.height > e.height || o.z + r.depth > e.depth {
            return Err(SoftGpuError::BadRegion(format!("{region:?} (mip is {e:?})")));
        }
        Ok(index)
    }

    fn row_range(&self, mip: u32, x: u32, y: u32, z: u32, width: u32) -> Range<usize> {
        let e = self.mip_extent(mip);
        let bpp = self.desc.format.bytes_per_pixel() as usize;
        let start = ((z as usize * e.height as usize + y as usize) * e.width as usize + x as usize) * bpp;
        start..start + width as usize * bpp
    }

    /// Checks that `len` packed bytes exactly fill `region`.
    pub fn check_upload(&self, region: &TextureRegion, len: usize) -> Result<usize, SoftGpuError> {
        let index = self.check_region(region)?;
        let r = region.extent;
        let expected = self.desc.format.region_size(r.width, r.height, r.depth);
        if len as u64 != expected {
            return Err(SoftGpuError::SizeMismatch {
                expected,
                actual: len as u64,
            });
        }
        Ok(index)
    }

    /// Copies `region` out as tightly packed texels.
    pub fn read_region(&self, region: &TextureRegion) -> Result<Vec<u8>, SoftGpuError> {
        let index = self.check_region(region)?;
        let data = &self.subresources[index];
        let o = region.origin;
        let r = region.extent;
        let mut out = Vec::with_capacity(self.desc.format.region_size(r.width, r.height, r.depth) as usize);
        for z in 0..r.depth {
            for y in 0..r.height {
                out.extend_from_slice(&data[self.row_range(region.mip_level, o.x, o.y + y, o.z + z, r.width)]);
            }
        }
        Ok(out)
    }

    /// Writes tightly packed texels into `region`.
    pub fn write_region(&mut self, region: &TextureRegion, bytes: &[u8]) -> Result<(), SoftGpuError> {
        let index = self.check_upload(region, bytes.len())?;
        let r = region.extent;
        let o = region.origin;
        let row_bytes = r.width as usize * self.desc.format.bytes_per_pixel() as usize;
        let mut rows = bytes.chunks_exact(row_bytes.max(1));
        for z in 0..r.depth {
            for y in 0..r.height {
                let range = self.row_range(region.mip_level, o.x, o.y + y, o.z + z, r.width);
                if let Some(row) = rows.next() {
                    self.subresources[index][range].copy_from_slice(row);
                }
            }
        }
        Ok(())
    }

    fn texel(&self, mip: u32, layer: u32, x: u32, y: u32, z: u32) -> Option<&[u8]> {
        let index = self.index(mip, layer)?;
        let range = self.row_range(mip, x, y, z, 1);
        self.subresources[index].get(range)
    }

    fn texel_mut(&mut self, mip: u32, layer: u32, x: u32, y: u32, z: u32) -> Option<&mut [u8]> {
        let index = self.index(mip, layer)?;
        let range = self.row_range(mip, x, y, z, 1);
        self.subresources[index].get_mut(range)
    }

    /// Reads one texel as a color. Out-of-range reads return transparent black.
    pub fn load(&self, mip: u32, layer: u32, x: u32, y: u32, z: u32) -> LinearRgba {
        let e = self.mip_extent(mip);
        if x >= e.width || y >= e.height || z >= e.depth {
            return LinearRgba::TRANSPARENT;
        }
        self.texel(mip, layer, x, y, z)
            .map(|t| decode_color(self.desc.format, t))
            .unwrap_or(LinearRgba::TRANSPARENT)
    }

    /// Writes one texel from a color. Out-of-range writes are dropped.
    pub fn store(&mut self, mip: u32, layer: u32, x: u32, y: u32, z: u32, color: LinearRgba) {
        let e = self.mip_extent(mip);
        if x >= e.width || y >= e.height || z >= e.depth {
            return;
        }
        let format = self.desc.format;
        if let Some(t) = self.texel_mut(mip, layer, x, y, z) {
            encode_color(format, color, t);
        }
    }

    /// Depth at (x, y) of mip 0, layer 0.
    pub fn depth_at(&self, x: u32, y: u32) -> f32 {
        self.texel(0, 0, x, y, 0)
            .map(|t| decode_depth(self.desc.format, t))
            .unwrap_or(1.0)
    }

    /// Stencil at (x, y) of mip 0, layer 0.
    pub fn stencil_at(&self, x: u32, y: u32) -> u8 {
        self.texel(0, 0, x, y, 0)
            .map(|t| decode_stencil(self.desc.format, t))
            .unwrap_or(0)
    }

    /// Writes depth and stencil at (x, y) of mip 0, layer 0.
    pub fn set_depth_stencil(&mut self, x: u32, y: u32, depth: f32, stencil: u8) {
        let format = self.desc.format;
        if let Some(t) = self.texel_mut(0, 0, x, y, 0) {
            encode_depth(format, depth, stencil, t);
        }
    }

    /// Clears one subresource, or only `rect` of it.
    pub fn clear(&mut self, mip: u32, layer: u32, rect: Option<ScissorRect>, value: ClearValue) {
        let Some(index) = self.index(mip, layer) else {
            return;
        };
        let format = self.desc.format;
        let bpp = format.bytes_per_pixel() as usize;
        let mut texel = vec![0u8; bpp];
        match value {
            ClearValue::Color(color) if !format.is_depth() => encode_color(format, color, &mut texel),
            ClearValue::DepthStencil { depth, stencil } if format.is_depth() => {
                encode_depth(format, depth, stencil, &mut texel)
            }
            other => {
                log::warn!("SoftGpu: clear value {other:?} does not match {format:?}, ignored");
                return;
            }
        }
        let e = self.mip_extent(mip);
        let (x0, y0, x1, y1) = match rect {
            Some(r) => {
                let x0 = r.x.max(0) as u32;
                let y0 = r.y.max(0) as u32;
                let x1 = (r.x.max(0) as u32).saturating_add(r.width).min(e.width);
                let y1 = (r.y.max(0) as u32).saturating_add(r.height).min(e.height);
                (x0.min(x1), y0.min(y1), x1, y1)
            }
            None => (0, 0, e.width, e.height),
        };
        for z in 0..e.depth {
            for y in y0..y1 {
                let range = self.row_range(mip, x0, y, z, x1 - x0);
                for chunk in self.subresources[index][range].chunks_exact_mut(bpp.max(1)) {
                    chunk.copy_from_slice(&texel);
                }
            }
        }
    }

    /// Rebuilds mips 1.. of every layer with a 2x2 box filter.
    pub fn generate_mipmaps(&mut self) {
        for layer in 0..self.desc.array_layers {
            for mip in 1..self.desc.mip_levels {
                let dst = self.mip_extent(mip);
                let src = self.mip_extent(mip - 1);
                for z in 0..dst.depth {
                    for y in 0..dst.height {
                        for x in 0..dst.width {
                            let mut sum = [0.0f32; 4];
                            let mut n = 0.0;
                            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                                let sx = (x * 2 + dx).min(src.width - 1);
                                let sy = (y * 2 + dy).min(src.height - 1);
                                let sz = (z * 2).min(src.depth - 1);
                                let c = self.load(mip - 1, layer, sx, sy, sz).to_array();
                                for i in 0..4 {
                                    sum[i] += c[i];
                                }
                                n += 1.0;
                            }
                            let avg = LinearRgba::new(sum[0] / n, sum[1] / n, sum[2] / n, sum[3] / n);
                            self.store(mip, layer, x, y, z, avg);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn buffer_ranges_are_checked() {
        let mut mem = BufferMemory::new(8, Some(&[1, 2, 3])).unwrap();
        assert_eq!(mem.read(0, 4).unwrap(), &[1, 2, 3, 0]);
        assert!(mem.write(6, &[0; 4]).is_err());
        mem.fill_u32(4, 4, 0xAABBCCDD).unwrap();
        assert_eq!(mem.read_pod::<u32>(4).unwrap(), 0xAABBCCDD);
    }

    #[test]
    fn region_round_trip_keeps_rows() {
        let mut image = Image::new(&TextureDesc::texture_2d(4, 4, TextureFormat::R8)).unwrap();
        let region = TextureRegion::rect(1, 1, 2, 2);
        image.write_region(&region, &[1, 2, 3, 4]).unwrap();
        assert_eq!(image.read_region(&region).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(image.read_region(&TextureRegion::rect(0, 1, 4, 1)).unwrap(), vec![0, 1, 2, 0]);
        assert!(image.write_region(&region, &[1, 2, 3]).is_err());
        assert!(image.read_region(&TextureRegion::rect(3, 3, 2, 1)).is_err());
    }

    #[test]
    fn depth_images_start_at_far_plane() {
        let image = Image::new(&TextureDesc::texture_2d(2, 2, TextureFormat::Depth32F)).unwrap();
        assert_relative_eq!(image.depth_at(1, 1), 1.0);
    }

    #[test]
    fn scissored_clear_touches_only_the_rect() {
        let mut image = Image::new(&TextureDesc::texture_2d(4, 4, TextureFormat::RGBA8)).unwrap();
        image.clear(0, 0, Some(ScissorRect::new(2, 2, 8, 8)), ClearValue::Color(LinearRgba::RED));
        assert_eq!(image.load(0, 0, 3, 3, 0), LinearRgba::RED);
        assert_eq!(image.load(0, 0, 1, 1, 0), LinearRgba::TRANSPARENT);
    }

    #[test]
    fn mip_chain_averages() {
        let desc = TextureDesc::texture_2d(2, 2, TextureFormat::RGBA32F).with_mips(0);
        let mut image = Image::new(&desc).unwrap();
        image.store(0, 0, 0, 0, 0, LinearRgba::WHITE);
        image.generate_mipmaps();
        let c = image.load(1, 0, 0, 0, 0);
        assert_relative_eq!(c.r, 0.25);
    }

    #[test]
    fn compressed_formats_are_rejected() {
        assert!(Image::new(&TextureDesc::texture_2d(4, 4, TextureFormat::BC1)).is_err());
    }
}

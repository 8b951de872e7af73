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

//! Buffers and their typed views.

use crate::renderer::api::{BufferAccess, BufferDesc, BufferType, BufferUsage, IndexType, VertexLayout};
use crate::renderer::device::DeviceShared;
use crate::renderer::error::ResourceError;
use crate::renderer::handle::ResourceKind;
use crate::renderer::resource::{Resource, ResourceBase};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const NO_BINDING: u32 = u32::MAX;

/// The result of a map request.
///
/// A request that would create a second live mapping, or that falls outside the
/// buffer, yields a range with `valid == false` and leaves any existing mapping alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedRange {
    /// `false` if the mapping was refused.
    pub valid: bool,
    /// Byte offset of the range in the buffer.
    pub offset: u64,
    /// Byte size of the range.
    pub size: u64,
    /// Requested access.
    pub access: BufferAccess,
}

impl MappedRange {
    /// A refused mapping.
    pub const INVALID: Self = Self {
        valid: false,
        offset: 0,
        size: 0,
        access: BufferAccess::empty(),
    };
}

#[derive(Debug)]
struct Mapping {
    range: MappedRange,
    shadow: Vec<u8>,
}

/// Byte range of `size` bytes at `offset` inside a shadow of `len` bytes.
fn shadow_range(offset: u64, size: u64, len: usize) -> Result<std::ops::Range<usize>, ResourceError> {
    match offset.checked_add(size) {
        Some(end) if end <= len as u64 => Ok(offset as usize..end as usize),
        _ => Err(ResourceError::OutOfBounds),
    }
}

/// A linear range of device memory.
///
/// Size, type and usage are fixed at creation. Uploads pick a staged copy or a direct
/// write from the usage, so callers never choose a path explicitly.
#[derive(Debug)]
pub struct Buffer {
    base: ResourceBase,
    desc: BufferDesc,
    shared: Arc<DeviceShared>,
    mapping: Mutex<Option<Mapping>>,
    binding_point: AtomicU32,
}

impl Buffer {
    pub(crate) fn create(
        shared: &Arc<DeviceShared>,
        desc: BufferDesc,
        data: Option<&[u8]>,
    ) -> Result<Self, ResourceError> {
        if desc.size == 0 {
            let err = ResourceError::InvalidDescriptor(format!("buffer '{}' has zero size", desc.label));
            log::error!("Buffer: {err}");
            return Err(err);
        }
        if let Some(data) = data {
            if data.len() as u64 > desc.size {
                log::error!(
                    "Buffer: initial data of {} bytes does not fit '{}' ({} bytes)",
                    data.len(),
                    desc.label,
                    desc.size
                );
                return Err(ResourceError::OutOfBounds);
            }
        }
        if desc.size > shared.capabilities.max_buffer_size {
            let err = ResourceError::InvalidDescriptor(format!(
                "buffer '{}' of {} bytes exceeds the {}-byte device limit",
                desc.label, desc.size, shared.capabilities.max_buffer_size
            ));
            log::error!("Buffer: {err}");
            return Err(err);
        }
        if desc.ty == BufferType::Storage && desc.size > shared.capabilities.max_storage_buffer_size {
            let err = ResourceError::Unsupported(format!(
                "storage buffer of {} bytes exceeds the device limit",
                desc.size
            ));
            log::error!("Buffer: {err}");
            return Err(err);
        }

        let owner = shared.register(ResourceKind::Buffer, desc.size, &desc.label, |handle| {
            shared.backend.create_buffer(handle, &desc, data)
        })?;
        if let Some(data) = data {
            shared.recorded.record_upload(data.len() as u64);
        }
        Ok(Self {
            base: ResourceBase::new(owner, &desc.label),
            desc,
            shared: shared.clone(),
            mapping: Mutex::new(None),
            binding_point: AtomicU32::new(NO_BINDING),
        })
    }

    /// The creation descriptor.
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.desc.size
    }

    /// Element stride in bytes.
    pub fn stride(&self) -> u32 {
        self.desc.stride
    }

    /// Binding type.
    pub fn buffer_type(&self) -> BufferType {
        self.desc.ty
    }

    /// Update frequency.
    pub fn usage(&self) -> BufferUsage {
        self.desc.usage
    }

    fn check_range(&self, offset: u64, size: u64) -> Result<(), ResourceError> {
        match offset.checked_add(size) {
            Some(end) if end <= self.desc.size => Ok(()),
            _ => Err(ResourceError::OutOfBounds),
        }
    }

    /// Uploads `data` at `offset`.
    pub fn set_data(&self, data: &[u8], offset: u64) -> Result<(), ResourceError> {
        if let Err(e) = self.check_range(offset, data.len() as u64) {
            log::warn!(
                "Buffer: set_data of {} bytes at {offset} overflows '{}' ({} bytes)",
                data.len(),
                self.desc.label,
                self.desc.size
            );
            return Err(e);
        }
        self.shared
            .backend
            .write_buffer(self.handle(), offset, data, self.desc.usage.prefers_staging())?;
        self.shared.recorded.record_upload(data.len() as u64);
        Ok(())
    }

    /// Reads `size` bytes at `offset` back to the CPU. Waits for pending GPU writes.
    pub fn get_data(&self, offset: u64, size: u64) -> Result<Vec<u8>, ResourceError> {
        self.check_range(offset, size)?;
        self.shared.backend.read_buffer(self.handle(), offset, size)
    }

    /// Reads the whole buffer back.
    pub fn get_all_data(&self) -> Result<Vec<u8>, ResourceError> {
        self.get_data(0, self.desc.size)
    }

    /// Maps the whole buffer.
    pub fn map(&self, access: BufferAccess) -> MappedRange {
        self.map_range(0, self.desc.size, access)
    }

    /// Maps `size` bytes at `offset`.
    ///
    /// Only one mapping may be live per buffer; a second request returns
    /// [`MappedRange::INVALID`] and logs a warning.
    pub fn map_range(&self, offset: u64, size: u64, access: BufferAccess) -> MappedRange {
        let mut mapping = self.mapping.lock();
        if mapping.is_some() {
            log::warn!("Buffer: '{}' is already mapped; refusing a second mapping", self.desc.label);
            return MappedRange::INVALID;
        }
        if self.check_range(offset, size).is_err() || size == 0 {
            log::warn!(
                "Buffer: map range {offset}+{size} is outside '{}' ({} bytes)",
                self.desc.label,
                self.desc.size
            );
            return MappedRange::INVALID;
        }
        let shadow = match self.shared.backend.read_buffer(self.handle(), offset, size) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Buffer: failed to map '{}': {e}", self.desc.label);
                return MappedRange::INVALID;
            }
        };
        let range = MappedRange {
            valid: true,
            offset,
            size,
            access,
        };
        *mapping = Some(Mapping { range, shadow });
        range
    }

    /// `true` while a mapping is live.
    pub fn is_mapped(&self) -> bool {
        self.mapping.lock().is_some()
    }

    /// The live mapping, if any.
    pub fn mapped_range(&self) -> Option<MappedRange> {
        self.mapping.lock().as_ref().map(|m| m.range)
    }

    /// Writes into the live mapping at `offset` (relative to the mapped range).
    ///
    /// Coherent mappings make the write visible to the device right away; otherwise it
    /// becomes visible on [`Buffer::flush_mapped_range`] or [`Buffer::unmap`].
    pub fn write_mapped(&self, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let mut guard = self.mapping.lock();
        let Some(mapping) = guard.as_mut() else {
            log::warn!("Buffer: write_mapped on unmapped '{}'", self.desc.label);
            return Err(ResourceError::InvalidHandle);
        };
        if !mapping.range.access.contains(BufferAccess::WRITE) {
            log::warn!("Buffer: '{}' was mapped without write access", self.desc.label);
            return Err(ResourceError::InvalidHandle);
        }
        let range = shadow_range(offset, data.len() as u64, mapping.shadow.len())?;
        mapping.shadow[range].copy_from_slice(data);
        if mapping.range.access.contains(BufferAccess::COHERENT) {
            self.shared
                .backend
                .write_buffer(self.handle(), mapping.range.offset + offset, data, false)?;
        }
        Ok(())
    }

    /// Reads from the live mapping at `offset` (relative to the mapped range).
    pub fn read_mapped(&self, offset: u64, size: u64) -> Result<Vec<u8>, ResourceError> {
        let guard = self.mapping.lock();
        let Some(mapping) = guard.as_ref() else {
            log::warn!("Buffer: read_mapped on unmapped '{}'", self.desc.label);
            return Err(ResourceError::InvalidHandle);
        };
        let range = shadow_range(offset, size, mapping.shadow.len())?;
        Ok(mapping.shadow[range].to_vec())
    }

    /// Runs `f` over the mapped bytes. Returns `None` if nothing is mapped.
    pub fn with_mapped<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let mut guard = self.mapping.lock();
        let mapping = guard.as_mut()?;
        let result = f(&mut mapping.shadow);
        if mapping.range.access.contains(BufferAccess::COHERENT | BufferAccess::WRITE) {
            if let Err(e) =
                self.shared
                    .backend
                    .write_buffer(self.handle(), mapping.range.offset, &mapping.shadow, false)
            {
                log::error!("Buffer: coherent write-back of '{}' failed: {e}", self.desc.label);
            }
        }
        Some(result)
    }

    /// Makes `size` bytes at `offset` (relative to the mapped range) visible to the device.
    pub fn flush_mapped_range(&self, offset: u64, size: u64) -> Result<(), ResourceError> {
        let guard = self.mapping.lock();
        let Some(mapping) = guard.as_ref() else {
            log::warn!("Buffer: flush on unmapped '{}'", self.desc.label);
            return Err(ResourceError::InvalidHandle);
        };
        let range = shadow_range(offset, size, mapping.shadow.len())?;
        let bytes = &mapping.shadow[range];
        self.shared
            .backend
            .write_buffer(self.handle(), mapping.range.offset + offset, bytes, false)?;
        self.shared.recorded.record_upload(size);
        Ok(())
    }

    /// Ends the live mapping, writing it back if it was mapped for writing.
    ///
    /// Returns `false` (with a warning) if nothing was mapped.
    pub fn unmap(&self) -> bool {
        let Some(mapping) = self.mapping.lock().take() else {
            log::warn!("Buffer: unmap on unmapped '{}'", self.desc.label);
            return false;
        };
        if mapping.range.access.contains(BufferAccess::WRITE) {
            match self
                .shared
                .backend
                .write_buffer(self.handle(), mapping.range.offset, &mapping.shadow, false)
            {
                Ok(()) => self.shared.recorded.record_upload(mapping.range.size),
                Err(e) => log::error!("Buffer: write-back of '{}' failed: {e}", self.desc.label),
            }
        }
        true
    }

    /// Associates a uniform or storage buffer with a shader binding slot.
    pub fn bind_to_point(&self, binding: u32) {
        match self.desc.ty {
            BufferType::Uniform | BufferType::Storage => {
                self.binding_point.store(binding, Ordering::Relaxed);
            }
            other => log::warn!(
                "Buffer: bind_to_point is only meaningful for uniform/storage buffers, '{}' is {other:?}",
                self.desc.label
            ),
        }
    }

    /// The binding slot set by [`Buffer::bind_to_point`].
    pub fn binding_point(&self) -> Option<u32> {
        match self.binding_point.load(Ordering::Relaxed) {
            NO_BINDING => None,
            binding => Some(binding),
        }
    }
}

impl Resource for Buffer {
    fn base(&self) -> &ResourceBase {
        &self.base
    }
}

/// A buffer holding vertices of a known layout.
#[derive(Debug)]
pub struct VertexBuffer {
    buffer: Buffer,
    layout: VertexLayout,
}

impl VertexBuffer {
    pub(crate) fn new(buffer: Buffer, layout: VertexLayout) -> Self {
        Self { buffer, layout }
    }

    /// The vertex layout.
    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    /// Number of whole vertices stored.
    pub fn vertex_count(&self) -> u32 {
        match self.layout.stride() {
            0 => 0,
            stride => (self.buffer.size() / stride as u64) as u32,
        }
    }
}

impl Deref for VertexBuffer {
    type Target = Buffer;
    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

impl Resource for VertexBuffer {
    fn base(&self) -> &ResourceBase {
        &self.buffer.base
    }
}

/// A buffer holding 16- or 32-bit indices.
#[derive(Debug)]
pub struct IndexBuffer {
    buffer: Buffer,
    index_type: IndexType,
}

impl IndexBuffer {
    pub(crate) fn new(buffer: Buffer, index_type: IndexType) -> Self {
        Self { buffer, index_type }
    }

    /// Index width.
    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    /// Number of indices stored.
    pub fn index_count(&self) -> u32 {
        (self.buffer.size() / self.index_type.size() as u64) as u32
    }
}

impl Deref for IndexBuffer {
    type Target = Buffer;
    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

impl Resource for IndexBuffer {
    fn base(&self) -> &ResourceBase {
        &self.buffer.base
    }
}

/// A uniform buffer tied to one binding slot.
#[derive(Debug)]
pub struct UniformBuffer {
    buffer: Buffer,
}

impl UniformBuffer {
    pub(crate) fn new(buffer: Buffer, binding: u32) -> Self {
        buffer.bind_to_point(binding);
        Self { buffer }
    }

    /// The binding slot.
    pub fn binding(&self) -> u32 {
        self.buffer.binding_point().unwrap_or(0)
    }

    /// Uploads a plain-old-data value at `offset`.
    pub fn set_value<T: bytemuck::Pod>(&self, value: &T, offset: u64) -> Result<(), ResourceError> {
        self.buffer.set_data(bytemuck::bytes_of(value), offset)
    }
}

impl Deref for UniformBuffer {
    type Target = Buffer;
    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

impl Resource for UniformBuffer {
    fn base(&self) -> &ResourceBase {
        &self.buffer.base
    }
}

/// A shader storage buffer of fixed-stride elements.
#[derive(Debug)]
pub struct StorageBuffer {
    buffer: Buffer,
    element_count: u32,
}

impl StorageBuffer {
    pub(crate) fn new(buffer: Buffer, element_count: u32) -> Self {
        Self {
            buffer,
            element_count,
        }
    }

    /// Number of elements.
    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    /// Size of one element.
    pub fn element_stride(&self) -> u32 {
        self.buffer.stride()
    }

    /// Reads the buffer back as typed elements.
    pub fn read_elements<T: bytemuck::Pod>(&self) -> Result<Vec<T>, ResourceError> {
        let bytes = self.buffer.get_all_data()?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }
}

impl Deref for StorageBuffer {
    type Target = Buffer;
    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

impl Resource for StorageBuffer {
    fn base(&self) -> &ResourceBase {
        &self.buffer.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_ranges_reject_overflowing_offsets() {
        assert_eq!(shadow_range(2, 2, 4), Ok(2..4));
        assert_eq!(shadow_range(4, 0, 4), Ok(4..4));
        assert_eq!(shadow_range(3, 2, 4), Err(ResourceError::OutOfBounds));
        assert_eq!(
            shadow_range(u64::MAX, 2, 4),
            Err(ResourceError::OutOfBounds),
            "offset + size wrapping around must not pass the bounds check"
        );
    }
}

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

//! Textures, their dimensional variants, and samplers.

use crate::math::LinearRgba;
use crate::renderer::api::{
    calculate_mip_levels, decode_color, ClearValue, CubeFace, DeviceCapabilities, SamplerState,
    TextureDesc, TextureFormat, TextureRegion, TextureType,
};
use crate::renderer::command_list::CommandList;
use crate::renderer::device::DeviceShared;
use crate::renderer::error::{RenderError, ResourceError};
use crate::renderer::handle::ResourceKind;
use crate::renderer::resource::{Resource, ResourceBase, ResourceOwner};
use crate::renderer::Device;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

fn invalid(label: &str, reason: impl std::fmt::Display) -> ResourceError {
    let err = ResourceError::InvalidDescriptor(format!("texture '{label}': {reason}"));
    log::error!("Texture: {err}");
    err
}

/// Checks `desc` against the device limits and resolves defaults (full mip chain,
/// clamped sample count).
fn validate_desc(caps: &DeviceCapabilities, desc: &mut TextureDesc) -> Result<(), ResourceError> {
    let label = desc.label.clone();
    if desc.width == 0 || desc.height == 0 || desc.depth == 0 || desc.array_layers == 0 {
        return Err(invalid(&label, "every dimension must be at least 1"));
    }
    if desc.format.is_compressed() {
        if !caps.supports_compressed_textures {
            let err = ResourceError::Unsupported(format!(
                "compressed format {:?} is not supported by this device",
                desc.format
            ));
            log::error!("Texture: {err}");
            return Err(err);
        }
        if desc.is_render_target || desc.is_storage {
            return Err(invalid(&label, "compressed formats cannot be attachments or storage images"));
        }
    }
    if desc.is_storage && desc.format.is_depth() {
        return Err(invalid(&label, "depth formats cannot be storage images"));
    }

    match desc.ty {
        TextureType::Texture2D => {
            if desc.depth != 1 || desc.array_layers != 1 {
                return Err(invalid(&label, "2D textures have depth 1 and a single layer"));
            }
            if desc.width.max(desc.height) > caps.max_texture_size {
                return Err(invalid(&label, format_args!("exceeds max size {}", caps.max_texture_size)));
            }
        }
        TextureType::TextureCube => {
            if desc.width != desc.height {
                return Err(invalid(&label, "cube faces must be square"));
            }
            if desc.array_layers != 6 || desc.depth != 1 {
                return Err(invalid(&label, "cube maps have exactly 6 layers"));
            }
            if desc.width > caps.max_cube_map_size {
                return Err(invalid(&label, format_args!("exceeds max cube size {}", caps.max_cube_map_size)));
            }
        }
        TextureType::Texture2DArray => {
            if desc.depth != 1 {
                return Err(invalid(&label, "array textures have depth 1"));
            }
            if desc.array_layers > caps.max_array_layers {
                return Err(invalid(&label, format_args!("exceeds max layers {}", caps.max_array_layers)));
            }
            if desc.width.max(desc.height) > caps.max_texture_size {
                return Err(invalid(&label, format_args!("exceeds max size {}", caps.max_texture_size)));
            }
        }
        TextureType::Texture3D => {
            if desc.array_layers != 1 {
                return Err(invalid(&label, "volume textures have a single layer"));
            }
            if desc.width.max(desc.height).max(desc.depth) > caps.max_texture_3d_size {
                return Err(invalid(&label, format_args!("exceeds max 3D size {}", caps.max_texture_3d_size)));
            }
        }
    }

    if desc.sample_count == 0 {
        desc.sample_count = 1;
    }
    if desc.sample_count > caps.max_samples {
        log::warn!(
            "Texture: '{label}' requested {} samples, clamping to {}",
            desc.sample_count,
            caps.max_samples
        );
        desc.sample_count = caps.max_samples.max(1);
    }

    let full_chain = calculate_mip_levels(desc.width, desc.height, desc.depth);
    if desc.mip_levels == 0 {
        desc.mip_levels = full_chain;
    } else if desc.mip_levels > full_chain {
        log::warn!(
            "Texture: '{label}' requested {} mips, clamping to {full_chain}",
            desc.mip_levels
        );
        desc.mip_levels = full_chain;
    }
    if desc.label.is_empty() {
        desc.label = format!("{:?}", desc.ty);
    }
    Ok(())
}

/// A resized backing image waiting to replace the current one.
#[derive(Debug)]
pub(crate) struct PendingImage {
    owner: ResourceOwner,
    desc: TextureDesc,
}

/// Image memory with a fixed format and mip/layer structure.
///
/// The dimensional variants ([`Texture2D`], [`TextureCube`], [`Texture2DArray`],
/// [`Texture3D`]) dereference to this type for the shared region upload/readback,
/// mip generation and binding operations.
#[derive(Debug)]
pub struct Texture {
    base: ResourceBase,
    shared: Arc<DeviceShared>,
    desc: RwLock<TextureDesc>,
}

impl Texture {
    pub(crate) fn create(shared: &Arc<DeviceShared>, mut desc: TextureDesc) -> Result<Self, ResourceError> {
        validate_desc(&shared.capabilities, &mut desc)?;
        let owner = Self::allocate(shared, &desc)?;
        Ok(Self {
            base: ResourceBase::new(owner, &desc.label),
            shared: shared.clone(),
            desc: RwLock::new(desc),
        })
    }

    fn allocate(shared: &Arc<DeviceShared>, desc: &TextureDesc) -> Result<ResourceOwner, ResourceError> {
        shared.register(ResourceKind::Texture, desc.total_bytes(), &desc.label, |handle| {
            shared.backend.create_texture(handle, desc)
        })
    }

    /// Allocates a replacement image at a new base size without swapping it in.
    ///
    /// Returns `None` when the texture already has that size. A full mip chain stays a
    /// full chain at the new size.
    pub(crate) fn prepare_resize(&self, width: u32, height: u32) -> Result<Option<PendingImage>, ResourceError> {
        let old = self.desc();
        if old.width == width && old.height == height {
            return Ok(None);
        }
        let full_chain = old.mip_levels == calculate_mip_levels(old.width, old.height, 1);
        let mut desc = TextureDesc {
            width,
            height,
            mip_levels: if full_chain && old.mip_levels > 1 { 0 } else { old.mip_levels },
            ..old
        };
        validate_desc(&self.shared.capabilities, &mut desc)?;
        let owner = Self::allocate(&self.shared, &desc)?;
        Ok(Some(PendingImage { owner, desc }))
    }

    /// Swaps in an image from [`Texture::prepare_resize`].
    ///
    /// The previous image is destroyed and its handle goes stale.
    pub(crate) fn commit(&self, pending: PendingImage) {
        self.base.replace_owner(pending.owner);
        *self.desc.write() = pending.desc;
        log::debug!(
            "Texture: resized '{}' to {}x{}, now {:?}",
            self.debug_name(),
            self.width(),
            self.height(),
            self.handle()
        );
    }

    fn resize_base(&self, width: u32, height: u32) -> Result<(), ResourceError> {
        if let Some(pending) = self.prepare_resize(width, height)? {
            self.commit(pending);
        }
        Ok(())
    }

    /// A copy of the (resolved) creation descriptor.
    pub fn desc(&self) -> TextureDesc {
        self.desc.read().clone()
    }

    /// Base width.
    pub fn width(&self) -> u32 {
        self.desc.read().width
    }

    /// Base height.
    pub fn height(&self) -> u32 {
        self.desc.read().height
    }

    /// Base depth.
    pub fn depth(&self) -> u32 {
        self.desc.read().depth
    }

    /// Pixel format.
    pub fn format(&self) -> TextureFormat {
        self.desc.read().format
    }

    /// Dimensionality.
    pub fn texture_type(&self) -> TextureType {
        self.desc.read().ty
    }

    /// Allocated mip levels.
    pub fn mip_levels(&self) -> u32 {
        self.desc.read().mip_levels
    }

    /// Array layers.
    pub fn array_layers(&self) -> u32 {
        self.desc.read().array_layers
    }

    /// MSAA sample count.
    pub fn sample_count(&self) -> u32 {
        self.desc.read().sample_count
    }

    /// `true` if the texture may be attached to a framebuffer.
    pub fn is_render_target(&self) -> bool {
        self.desc.read().is_render_target
    }

    /// `true` if the texture may be bound as a storage image.
    pub fn is_storage(&self) -> bool {
        self.desc.read().is_storage
    }

    fn check_region(&self, region: &TextureRegion) -> Result<(), ResourceError> {
        let desc = self.desc.read();
        if region.mip_level >= desc.mip_levels || region.array_layer >= desc.array_layers {
            return Err(ResourceError::OutOfBounds);
        }
        let mip = desc.extent().mip(region.mip_level);
        let fits = |origin: u32, extent: u32, limit: u32| {
            extent > 0 && origin.checked_add(extent).is_some_and(|end| end <= limit)
        };
        if fits(region.origin.x, region.extent.width, mip.width)
            && fits(region.origin.y, region.extent.height, mip.height)
            && fits(region.origin.z, region.extent.depth, mip.depth)
        {
            Ok(())
        } else {
            Err(ResourceError::OutOfBounds)
        }
    }

    /// Uploads tightly packed texels into `region`.
    pub fn set_data(&self, region: &TextureRegion, data: &[u8]) -> Result<(), ResourceError> {
        if let Err(e) = self.check_region(region) {
            log::warn!("Texture: region {region:?} is outside '{}'", self.debug_name());
            return Err(e);
        }
        let expected = self.format().region_size(
            region.extent.width,
            region.extent.height,
            region.extent.depth,
        );
        if data.len() as u64 != expected {
            log::warn!(
                "Texture: '{}' expected {expected} bytes for {region:?}, got {}",
                self.debug_name(),
                data.len()
            );
            return Err(ResourceError::InvalidDescriptor(format!(
                "expected {expected} bytes, got {}",
                data.len()
            )));
        }
        self.shared.backend.write_texture(self.handle(), region, data)
    }

    /// Uploads a whole mip 0 of layer 0.
    pub fn set_full_data(&self, data: &[u8]) -> Result<(), ResourceError> {
        let region = TextureRegion::whole_mip(self.desc.read().extent(), 0, 0);
        self.set_data(&region, data)
    }

    /// Reads `region` back as tightly packed texels. Waits for pending GPU work.
    pub fn get_data(&self, region: &TextureRegion) -> Result<Vec<u8>, ResourceError> {
        self.check_region(region)?;
        self.shared.backend.read_texture(self.handle(), region)
    }

    /// Regenerates mips 1.. from mip 0 with a box filter.
    ///
    /// Does nothing (with a warning) on single-mip textures.
    pub fn generate_mipmaps(&self) -> Result<(), ResourceError> {
        if self.mip_levels() <= 1 {
            log::warn!(
                "Texture: generate_mipmaps on '{}' which has a single mip level",
                self.debug_name()
            );
            return Ok(());
        }
        self.shared.backend.generate_mipmaps(self.handle())
    }

    /// Binds the texture for filtered sampling at `slot`.
    pub fn bind(&self, cmd: &mut CommandList, slot: u32, sampler: &Sampler) {
        cmd.set_texture(slot, self, sampler);
    }

    /// Binds mip `mip_level` for raw read/write access from compute at `slot`.
    pub fn bind_as_image(&self, cmd: &mut CommandList, slot: u32, mip_level: u32) {
        cmd.set_storage_texture(slot, self, mip_level);
    }

    pub(crate) fn clear_with(&self, value: ClearValue) -> Result<(), RenderError> {
        let label = format!("clear '{}'", self.debug_name());
        self.shared.execute_immediate(&label, |cmd| {
            cmd.clear_texture(self, 0, 0, None, value);
        })
    }
}

impl Resource for Texture {
    fn base(&self) -> &ResourceBase {
        &self.base
    }
}

macro_rules! texture_view {
    ($name:ident) => {
        impl Deref for $name {
            type Target = Texture;
            fn deref(&self) -> &Texture {
                &self.0
            }
        }

        impl Resource for $name {
            fn base(&self) -> &ResourceBase {
                &self.0.base
            }
        }
    };
}

/// A 2D texture.
#[derive(Debug)]
pub struct Texture2D(Texture);

texture_view!(Texture2D);

impl Texture2D {
    pub(crate) fn create(shared: &Arc<DeviceShared>, desc: TextureDesc) -> Result<Self, ResourceError> {
        Texture::create(shared, TextureDesc { ty: TextureType::Texture2D, ..desc }).map(Self)
    }

    /// Reallocates the texture at a new size. Contents are lost.
    ///
    /// The previous backing image is destroyed immediately, so its handle is no longer
    /// valid afterwards.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), ResourceError> {
        self.0.resize_base(width, height)
    }

    /// Reads one texel of mip 0 as a color. A synchronous slow path.
    pub fn read_pixel(&self, x: u32, y: u32) -> Result<LinearRgba, ResourceError> {
        let bytes = self.0.get_data(&TextureRegion::rect(x, y, 1, 1))?;
        Ok(decode_color(self.format(), &bytes))
    }

    /// Fills mip 0 with `color` (or a depth value from `color.r` for depth formats).
    pub fn clear(&self, color: LinearRgba) -> Result<(), RenderError> {
        let value = if self.format().is_depth() {
            ClearValue::DepthStencil {
                depth: color.r,
                stencil: 0,
            }
        } else {
            ClearValue::Color(color)
        };
        self.0.clear_with(value)
    }
}

/// A six-faced cube map.
#[derive(Debug)]
pub struct TextureCube(Texture);

texture_view!(TextureCube);

impl TextureCube {
    pub(crate) fn create(shared: &Arc<DeviceShared>, desc: TextureDesc) -> Result<Self, ResourceError> {
        Texture::create(
            shared,
            TextureDesc {
                ty: TextureType::TextureCube,
                array_layers: 6,
                ..desc
            },
        )
        .map(Self)
    }

    /// Edge length of a face.
    pub fn size(&self) -> u32 {
        self.width()
    }

    /// Reallocates every face at a new edge length. Contents are lost and the old
    /// handle goes stale.
    pub fn resize(&self, size: u32) -> Result<(), ResourceError> {
        self.0.resize_base(size, size)
    }

    /// Uploads a whole face at `mip`.
    pub fn set_face_data(&self, face: CubeFace, mip: u32, data: &[u8]) -> Result<(), ResourceError> {
        let region = TextureRegion::whole_mip(self.desc.read().extent(), mip, face.layer());
        self.0.set_data(&region, data)
    }

    /// Reads a whole face at `mip`.
    pub fn get_face_data(&self, face: CubeFace, mip: u32) -> Result<Vec<u8>, ResourceError> {
        let region = TextureRegion::whole_mip(self.desc.read().extent(), mip, face.layer());
        self.0.get_data(&region)
    }
}

/// An array of same-sized 2D layers.
#[derive(Debug)]
pub struct Texture2DArray(Texture);

texture_view!(Texture2DArray);

impl Texture2DArray {
    pub(crate) fn create(shared: &Arc<DeviceShared>, desc: TextureDesc) -> Result<Self, ResourceError> {
        Texture::create(shared, TextureDesc { ty: TextureType::Texture2DArray, ..desc }).map(Self)
    }

    /// Number of layers.
    pub fn layer_count(&self) -> u32 {
        self.array_layers()
    }

    /// Reallocates every layer at a new size, keeping the layer count. Contents are
    /// lost and the old handle goes stale.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), ResourceError> {
        self.0.resize_base(width, height)
    }

    /// Uploads a whole layer at `mip`.
    pub fn set_layer_data(&self, layer: u32, mip: u32, data: &[u8]) -> Result<(), ResourceError> {
        let region = TextureRegion::whole_mip(self.desc.read().extent(), mip, layer);
        self.0.set_data(&region, data)
    }
}

/// A volume texture.
#[derive(Debug)]
pub struct Texture3D(Texture);

texture_view!(Texture3D);

impl Texture3D {
    pub(crate) fn create(shared: &Arc<DeviceShared>, desc: TextureDesc) -> Result<Self, ResourceError> {
        Texture::create(shared, TextureDesc { ty: TextureType::Texture3D, ..desc }).map(Self)
    }

    /// Uploads the depth slice `z` of `mip`.
    pub fn set_slice_data(&self, z: u32, mip: u32, data: &[u8]) -> Result<(), ResourceError> {
        let mut region = TextureRegion::whole_mip(self.desc.read().extent(), mip, 0);
        region.origin.z = z;
        region.extent.depth = 1;
        self.0.set_data(&region, data)
    }
}

/// An immutable sampling state object.
#[derive(Debug)]
pub struct Sampler {
    base: ResourceBase,
    state: SamplerState,
}

impl Sampler {
    pub(crate) fn create(shared: &Arc<DeviceShared>, mut state: SamplerState) -> Result<Self, ResourceError> {
        if state.min_lod > state.max_lod {
            let err = ResourceError::InvalidDescriptor(format!(
                "sampler min_lod {} exceeds max_lod {}",
                state.min_lod, state.max_lod
            ));
            log::error!("Sampler: {err}");
            return Err(err);
        }
        let max_anisotropy = shared.capabilities.max_anisotropy;
        if state.max_anisotropy < 1.0 {
            state.max_anisotropy = 1.0;
        } else if state.max_anisotropy > max_anisotropy {
            log::warn!(
                "Sampler: anisotropy {} clamped to the device maximum {max_anisotropy}",
                state.max_anisotropy
            );
            state.max_anisotropy = max_anisotropy;
        }
        Ok(Self {
            base: shared.register_plain(ResourceKind::Sampler, "Sampler"),
            state,
        })
    }

    /// Trilinear filtering with repeat wrapping.
    pub fn create_linear(device: &Device) -> Result<Self, ResourceError> {
        Self::create(device.shared(), SamplerState::linear())
    }

    /// Nearest filtering, no mip interpolation.
    pub fn create_point(device: &Device) -> Result<Self, ResourceError> {
        Self::create(device.shared(), SamplerState::point())
    }

    /// Trilinear filtering with `max_anisotropy`.
    pub fn create_anisotropic(device: &Device, max_anisotropy: f32) -> Result<Self, ResourceError> {
        Self::create(device.shared(), SamplerState::anisotropic(max_anisotropy))
    }

    /// Depth-compare sampler for shadow maps.
    pub fn create_shadow(device: &Device) -> Result<Self, ResourceError> {
        Self::create(device.shared(), SamplerState::shadow())
    }

    /// Trilinear filtering clamped to the edge.
    pub fn create_clamp(device: &Device) -> Result<Self, ResourceError> {
        Self::create(device.shared(), SamplerState::clamp())
    }

    /// The effective sampling state.
    pub fn state(&self) -> &SamplerState {
        &self.state
    }
}

impl Resource for Sampler {
    fn base(&self) -> &ResourceBase {
        &self.base
    }
}

/// Deduplicates samplers: equal states share one [`Sampler`].
#[derive(Debug, Default)]
pub struct SamplerCache {
    samplers: Mutex<HashMap<SamplerState, Arc<Sampler>>>,
}

impl SamplerCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached sampler for `state`, creating it on first use.
    pub fn get_or_create(&self, device: &Device, state: SamplerState) -> Result<Arc<Sampler>, ResourceError> {
        let mut samplers = self.samplers.lock();
        if let Some(sampler) = samplers.get(&state) {
            return Ok(sampler.clone());
        }
        let sampler = Arc::new(device.create_sampler(state)?);
        samplers.insert(state, sampler.clone());
        Ok(sampler)
    }

    /// Number of distinct samplers.
    pub fn len(&self) -> usize {
        self.samplers.lock().len()
    }

    /// `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.samplers.lock().is_empty()
    }

    /// Drops every cached sampler.
    pub fn clear(&self) {
        self.samplers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_full_mip_chain() {
        let caps = DeviceCapabilities::default();
        let mut desc = TextureDesc::texture_2d(256, 128, TextureFormat::RGBA8).with_mips(0);
        validate_desc(&caps, &mut desc).unwrap();
        assert_eq!(desc.mip_levels, 9);
        assert_eq!(desc.label, "Texture2D");
    }

    #[test]
    fn clamps_samples_to_device_limit() {
        let caps = DeviceCapabilities::default();
        let mut desc = TextureDesc::render_target(64, 64, TextureFormat::RGBA8).with_samples(4);
        validate_desc(&caps, &mut desc).unwrap();
        assert_eq!(desc.sample_count, caps.max_samples);
    }

    #[test]
    fn rejects_compressed_without_support() {
        let caps = DeviceCapabilities::default();
        let mut desc = TextureDesc::texture_2d(64, 64, TextureFormat::BC7);
        assert!(matches!(validate_desc(&caps, &mut desc), Err(ResourceError::Unsupported(_))));
    }

    #[test]
    fn rejects_non_square_cubes_and_depth_storage() {
        let caps = DeviceCapabilities::default();
        let mut cube = TextureDesc::cube(64, TextureFormat::RGBA8);
        cube.height = 32;
        assert!(validate_desc(&caps, &mut cube).is_err());
        let mut storage = TextureDesc::texture_2d(8, 8, TextureFormat::Depth32F).with_storage();
        assert!(validate_desc(&caps, &mut storage).is_err());
    }
}

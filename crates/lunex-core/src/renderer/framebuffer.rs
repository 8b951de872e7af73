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

//! Framebuffers, their attachments, and a pool of transient render targets.

use crate::math::LinearRgba;
use crate::renderer::api::{
    decode_color, ClearValue, ColorAttachmentBinding, DepthAttachmentBinding, LoadOp,
    RenderPassBegin, RenderPassLayout, ScissorRect, StoreOp, TextureDesc, TextureFilter,
    TextureFormat, TextureRegion,
};
use crate::renderer::context::Swapchain;
use crate::renderer::device::DeviceShared;
use crate::renderer::error::{RenderError, ResourceError};
use crate::renderer::handle::ResourceKind;
use crate::renderer::resource::{Resource, ResourceBase, ResourceId};
use crate::renderer::texture::{Texture, Texture2D};
use crate::renderer::Device;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// One color slot of a [`FramebufferDesc`].
#[derive(Debug, Clone)]
pub struct ColorAttachmentDesc {
    /// Format of an auto-created texture, or of the borrowed one.
    pub format: TextureFormat,
    /// An externally owned texture; `None` lets the framebuffer create one.
    pub texture: Option<Arc<Texture2D>>,
}

/// The depth slot of a [`FramebufferDesc`].
#[derive(Debug, Clone)]
pub struct DepthAttachmentDesc {
    /// Depth format.
    pub format: TextureFormat,
    /// An externally owned depth texture; `None` lets the framebuffer create one.
    pub texture: Option<Arc<Texture2D>>,
}

/// Describes a framebuffer's size and attachments.
#[derive(Debug, Clone)]
pub struct FramebufferDesc {
    /// Debug label.
    pub label: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// MSAA sample count of auto-created attachments.
    pub samples: u32,
    /// Color attachments in slot order.
    pub color: Vec<ColorAttachmentDesc>,
    /// Optional depth attachment.
    pub depth: Option<DepthAttachmentDesc>,
}

impl FramebufferDesc {
    /// A descriptor with no attachments.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            label: "Framebuffer".to_owned(),
            width,
            height,
            samples: 1,
            color: Vec::new(),
            depth: None,
        }
    }

    /// Sets the size.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Adds an auto-created color attachment.
    pub fn add_color_attachment(mut self, format: TextureFormat) -> Self {
        self.color.push(ColorAttachmentDesc { format, texture: None });
        self
    }

    /// Adds a borrowed color texture. [`Framebuffer::resize`] never reallocates it.
    pub fn add_color_texture(mut self, texture: Arc<Texture2D>) -> Self {
        self.color.push(ColorAttachmentDesc {
            format: texture.format(),
            texture: Some(texture),
        });
        self
    }

    /// Adds an auto-created depth attachment.
    pub fn with_depth(mut self, format: TextureFormat) -> Self {
        self.depth = Some(DepthAttachmentDesc { format, texture: None });
        self
    }

    /// Uses a borrowed depth texture.
    pub fn with_depth_texture(mut self, texture: Arc<Texture2D>) -> Self {
        self.depth = Some(DepthAttachmentDesc {
            format: texture.format(),
            texture: Some(texture),
        });
        self
    }

    /// Sets the MSAA sample count.
    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    /// Sets the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[derive(Debug, Clone)]
struct Attachment {
    texture: Arc<Texture2D>,
    owned: bool,
}

fn invalid(label: &str, reason: impl std::fmt::Display) -> ResourceError {
    let err = ResourceError::InvalidDescriptor(format!("framebuffer '{label}': {reason}"));
    log::error!("Framebuffer: {err}");
    err
}

/// A set of color attachments and an optional depth attachment.
#[derive(Debug)]
pub struct Framebuffer {
    base: ResourceBase,
    shared: Arc<DeviceShared>,
    size: RwLock<(u32, u32)>,
    samples: u32,
    color: Vec<Attachment>,
    depth: Option<Attachment>,
}

impl Framebuffer {
    pub(crate) fn create(shared: &Arc<DeviceShared>, desc: &FramebufferDesc) -> Result<Self, ResourceError> {
        let label = desc.label.as_str();
        if desc.width == 0 || desc.height == 0 {
            return Err(invalid(label, "size must be non-zero"));
        }
        if desc.color.is_empty() && desc.depth.is_none() {
            return Err(invalid(label, "at least one attachment is required"));
        }
        if desc.color.len() as u32 > shared.capabilities.max_color_attachments {
            return Err(invalid(
                label,
                format_args!("{} color attachments exceed the limit", desc.color.len()),
            ));
        }

        let make = |format: TextureFormat, name: String| -> Result<Attachment, ResourceError> {
            let tex_desc = TextureDesc::render_target(desc.width, desc.height, format)
                .with_samples(desc.samples)
                .with_label(name);
            Ok(Attachment {
                texture: Arc::new(Texture2D::create(shared, tex_desc)?),
                owned: true,
            })
        };
        let borrow = |texture: &Arc<Texture2D>| -> Result<Attachment, ResourceError> {
            if texture.width() != desc.width || texture.height() != desc.height {
                return Err(invalid(
                    label,
                    format_args!(
                        "borrowed '{}' is {}x{}, expected {}x{}",
                        texture.debug_name(),
                        texture.width(),
                        texture.height(),
                        desc.width,
                        desc.height
                    ),
                ));
            }
            Ok(Attachment {
                texture: texture.clone(),
                owned: false,
            })
        };

        let mut color = Vec::with_capacity(desc.color.len());
        for (i, slot) in desc.color.iter().enumerate() {
            if slot.format.is_depth() {
                return Err(invalid(label, format_args!("color slot {i} has depth format {:?}", slot.format)));
            }
            color.push(match &slot.texture {
                Some(texture) => borrow(texture)?,
                None => make(slot.format, format!("{label}.color{i}"))?,
            });
        }
        let depth = match &desc.depth {
            Some(slot) if !slot.format.is_depth() => {
                return Err(invalid(label, format_args!("{:?} is not a depth format", slot.format)));
            }
            Some(DepthAttachmentDesc { texture: Some(texture), .. }) => Some(borrow(texture)?),
            Some(slot) => Some(make(slot.format, format!("{label}.depth"))?),
            None => None,
        };
        let samples = color
            .first()
            .or(depth.as_ref())
            .map(|a| a.texture.sample_count())
            .unwrap_or(1);

        log::debug!(
            "Framebuffer: '{label}' {}x{} with {} color attachment(s){}",
            desc.width,
            desc.height,
            color.len(),
            if depth.is_some() { " and depth" } else { "" }
        );
        Ok(Self {
            base: shared.register_plain(ResourceKind::Framebuffer, label),
            shared: shared.clone(),
            size: RwLock::new((desc.width, desc.height)),
            samples,
            color,
            depth,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.size.read().0
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.size.read().1
    }

    /// MSAA sample count.
    pub fn sample_count(&self) -> u32 {
        self.samples
    }

    /// Number of color attachments.
    pub fn color_attachment_count(&self) -> usize {
        self.color.len()
    }

    /// Color attachment `index`.
    pub fn color_attachment(&self, index: usize) -> Option<Arc<Texture2D>> {
        self.color.get(index).map(|a| a.texture.clone())
    }

    /// The depth attachment.
    pub fn depth_attachment(&self) -> Option<Arc<Texture2D>> {
        self.depth.as_ref().map(|a| a.texture.clone())
    }

    /// `true` if color attachment `index` was created by the framebuffer.
    pub fn is_attachment_owned(&self, index: usize) -> bool {
        self.color.get(index).is_some_and(|a| a.owned)
    }

    /// Attachment formats, as pipelines see them.
    pub fn layout(&self) -> RenderPassLayout {
        RenderPassLayout {
            color_formats: self.color.iter().map(|a| a.texture.format()).collect(),
            depth_format: self.depth.as_ref().map(|a| a.texture.format()),
            sample_count: self.samples,
        }
    }

    /// Regenerates owned attachments at the new size. Waits for the device to go idle
    /// first.
    ///
    /// Borrowed attachments must already have the new size; otherwise nothing changes
    /// and the resize fails. Every replacement image is allocated before any is swapped
    /// in, so a failed resize leaves the framebuffer untouched.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), ResourceError> {
        if width == 0 || height == 0 {
            log::warn!("Framebuffer: ignoring resize of '{}' to {width}x{height}", self.debug_name());
            return Err(ResourceError::InvalidDescriptor("framebuffer size must be non-zero".to_owned()));
        }
        if *self.size.read() == (width, height) {
            return Ok(());
        }
        let attachments = || self.color.iter().chain(self.depth.iter());
        if let Some(stale) = attachments()
            .find(|a| !a.owned && (a.texture.width() != width || a.texture.height() != height))
        {
            return Err(invalid(
                &self.debug_name(),
                format_args!(
                    "borrowed '{}' is {}x{}, resize it to {width}x{height} first",
                    stale.texture.debug_name(),
                    stale.texture.width(),
                    stale.texture.height()
                ),
            ));
        }
        self.shared.backend.wait_idle();
        let mut pending = Vec::new();
        for attachment in attachments().filter(|a| a.owned) {
            if let Some(image) = attachment.texture.prepare_resize(width, height)? {
                pending.push((attachment, image));
            }
        }
        for (attachment, image) in pending {
            attachment.texture.commit(image);
        }
        *self.size.write() = (width, height);
        log::debug!("Framebuffer: resized '{}' to {width}x{height}", self.debug_name());
        Ok(())
    }

    /// Builds the pass description for `begin_render_pass`.
    ///
    /// Color slot `i` is cleared if `clear_values[i]` is a color; the depth attachment is
    /// cleared with the first depth/stencil value in the list. Everything else loads.
    pub(crate) fn pass_begin(&self, clear_values: &[ClearValue]) -> RenderPassBegin {
        let color = self
            .color
            .iter()
            .enumerate()
            .map(|(i, a)| ColorAttachmentBinding {
                texture: a.texture.handle(),
                format: a.texture.format(),
                load: match clear_values.get(i) {
                    Some(ClearValue::Color(c)) => LoadOp::Clear(*c),
                    _ => LoadOp::Load,
                },
                store: StoreOp::Store,
            })
            .collect();
        let depth_clear = clear_values.iter().find_map(|v| match *v {
            ClearValue::DepthStencil { depth, stencil } => Some((depth, stencil)),
            ClearValue::Color(_) => None,
        });
        let depth = self.depth.as_ref().map(|a| DepthAttachmentBinding {
            texture: a.texture.handle(),
            format: a.texture.format(),
            depth_load: depth_clear.map_or(LoadOp::Load, |(d, _)| LoadOp::Clear(d)),
            stencil_load: depth_clear.map_or(LoadOp::Load, |(_, s)| LoadOp::Clear(s)),
            store: StoreOp::Store,
        });
        let (width, height) = *self.size.read();
        RenderPassBegin {
            framebuffer: self.handle(),
            width,
            height,
            sample_count: self.samples,
            color,
            depth,
        }
    }

    /// Marks this framebuffer as the bound render target.
    pub fn bind(&self) {
        *self.shared.bound_framebuffer.lock() = Some(self.handle());
    }

    /// Clears the bound-framebuffer state if this framebuffer holds it.
    pub fn unbind(&self) {
        let mut bound = self.shared.bound_framebuffer.lock();
        if *bound == Some(self.handle()) {
            *bound = None;
        }
    }

    /// `true` while bound.
    pub fn is_bound(&self) -> bool {
        *self.shared.bound_framebuffer.lock() == Some(self.handle())
    }

    /// Clears every color attachment to `color` and the depth attachment to 1.0.
    pub fn clear(&self, color: LinearRgba) -> Result<(), RenderError> {
        let label = format!("clear '{}'", self.debug_name());
        self.shared.execute_immediate(&label, |cmd| {
            for a in &self.color {
                cmd.clear_texture(&a.texture, 0, 0, None, ClearValue::Color(color));
            }
            if let Some(d) = &self.depth {
                cmd.clear_texture(&d.texture, 0, 0, None, ClearValue::DEPTH_ONE);
            }
        })
    }

    /// Clears color attachment `index`, optionally only inside `rect`.
    pub fn clear_attachment(
        &self,
        index: usize,
        color: LinearRgba,
        rect: Option<ScissorRect>,
    ) -> Result<(), RenderError> {
        let Some(attachment) = self.color.get(index) else {
            log::warn!("Framebuffer: '{}' has no color attachment {index}", self.debug_name());
            return Err(ResourceError::NotFound.into());
        };
        let label = format!("clear '{}'[{index}]", self.debug_name());
        self.shared.execute_immediate(&label, |cmd| {
            cmd.clear_texture(&attachment.texture, 0, 0, rect, ClearValue::Color(color));
        })
    }

    /// Clears the depth (and stencil) attachment.
    pub fn clear_depth(&self, depth: f32, stencil: u8) -> Result<(), RenderError> {
        let Some(attachment) = &self.depth else {
            log::warn!("Framebuffer: '{}' has no depth attachment", self.debug_name());
            return Err(ResourceError::NotFound.into());
        };
        let label = format!("clear '{}' depth", self.debug_name());
        self.shared.execute_immediate(&label, |cmd| {
            cmd.clear_texture(&attachment.texture, 0, 0, None, ClearValue::DepthStencil { depth, stencil });
        })
    }

    /// Reads one pixel of color attachment `index`.
    ///
    /// A synchronous readback that waits for the device; meant for debugging and
    /// picking, not per-frame use.
    pub fn read_pixel(&self, index: usize, x: u32, y: u32) -> Result<LinearRgba, ResourceError> {
        let attachment = self.color.get(index).ok_or(ResourceError::NotFound)?;
        let bytes = attachment.texture.get_data(&TextureRegion::rect(x, y, 1, 1))?;
        Ok(decode_color(attachment.texture.format(), &bytes))
    }

    /// Reads a rectangle of color attachment `index` as tightly packed texels.
    pub fn read_pixels(&self, index: usize, x: u32, y: u32, width: u32, height: u32) -> Result<Vec<u8>, ResourceError> {
        let attachment = self.color.get(index).ok_or(ResourceError::NotFound)?;
        attachment.texture.get_data(&TextureRegion::rect(x, y, width, height))
    }

    /// Reads the depth value at (`x`, `y`).
    pub fn read_depth(&self, x: u32, y: u32) -> Result<f32, ResourceError> {
        let attachment = self.depth.as_ref().ok_or(ResourceError::NotFound)?;
        let bytes = attachment.texture.get_data(&TextureRegion::rect(x, y, 1, 1))?;
        Ok(crate::renderer::api::decode_depth(attachment.texture.format(), &bytes))
    }

    /// Copies every color attachment (and depth, if both have one) into `target`,
    /// scaling with `filter`. Resolves multisampled attachments.
    pub fn blit_to(&self, target: &Framebuffer, filter: TextureFilter) -> Result<(), RenderError> {
        let label = format!("blit '{}' -> '{}'", self.debug_name(), target.debug_name());
        self.shared.execute_immediate(&label, |cmd| {
            for (src, dst) in self.color.iter().zip(&target.color) {
                blit_whole(cmd, &src.texture, &dst.texture, filter);
            }
            if let (Some(src), Some(dst)) = (&self.depth, &target.depth) {
                blit_whole(cmd, &src.texture, &dst.texture, TextureFilter::Nearest);
            }
        })
    }

    /// Copies color attachment 0 into the swapchain's current image.
    pub fn blit_to_screen(&self, swapchain: &Swapchain, filter: TextureFilter) -> Result<(), RenderError> {
        let Some(target) = swapchain.current_texture() else {
            log::warn!("Framebuffer: blit_to_screen without an acquired swapchain image");
            return Err(RenderError::SurfaceAcquisitionFailed("no image acquired".to_owned()));
        };
        let Some(src) = self.color.first() else {
            return Err(ResourceError::NotFound.into());
        };
        let label = format!("present '{}'", self.debug_name());
        self.shared.execute_immediate(&label, |cmd| {
            blit_whole(cmd, &src.texture, &target, filter);
        })
    }
}

fn blit_whole(cmd: &mut crate::renderer::CommandList, src: &Texture, dst: &Texture, filter: TextureFilter) {
    let src_region = TextureRegion::rect(0, 0, src.width(), src.height());
    let dst_region = TextureRegion::rect(0, 0, dst.width(), dst.height());
    cmd.blit_texture(src, src_region, dst, dst_region, filter);
}

impl Resource for Framebuffer {
    fn base(&self) -> &ResourceBase {
        &self.base
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RenderTargetKey {
    width: u32,
    height: u32,
    format: TextureFormat,
    samples: u32,
    storage: bool,
}

impl RenderTargetKey {
    fn of(desc: &TextureDesc) -> Self {
        Self {
            width: desc.width,
            height: desc.height,
            format: desc.format,
            samples: desc.sample_count.max(1),
            storage: desc.is_storage,
        }
    }
}

#[derive(Debug)]
struct FreeTarget {
    texture: Arc<Texture2D>,
    released_frame: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    frame: u64,
    free: HashMap<RenderTargetKey, Vec<FreeTarget>>,
    in_use: HashMap<ResourceId, RenderTargetKey>,
}

/// Recycles transient render targets between passes and frames.
///
/// Released targets go to a free list keyed by descriptor and are destroyed once
/// they have gone unused for `retention_frames` frames.
#[derive(Debug)]
pub struct RenderTargetPool {
    retention_frames: u64,
    state: Mutex<PoolState>,
}

impl RenderTargetPool {
    /// Creates a pool that trims targets unused for `retention_frames` frames.
    pub fn new(retention_frames: u64) -> Self {
        Self {
            retention_frames,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Returns a free target matching `desc`, creating one if none is available.
    pub fn acquire(&self, device: &Device, desc: &TextureDesc) -> Result<Arc<Texture2D>, ResourceError> {
        let key = RenderTargetKey::of(desc);
        let mut state = self.state.lock();
        let reused = state.free.get_mut(&key).and_then(Vec::pop);
        let texture = match reused {
            Some(free) => free.texture,
            None => {
                let desc = TextureDesc {
                    is_render_target: true,
                    ..desc.clone()
                };
                Arc::new(device.create_texture_2d(desc)?)
            }
        };
        state.in_use.insert(texture.id(), key);
        Ok(texture)
    }

    /// Returns a target to the free list.
    pub fn release(&self, texture: Arc<Texture2D>) {
        let mut state = self.state.lock();
        let Some(key) = state.in_use.remove(&texture.id()) else {
            log::warn!(
                "RenderTargetPool: '{}' was not acquired from this pool",
                texture.debug_name()
            );
            return;
        };
        let released_frame = state.frame;
        state.free.entry(key).or_default().push(FreeTarget {
            texture,
            released_frame,
        });
    }

    /// Advances the pool clock and destroys targets past their retention.
    pub fn end_frame(&self) {
        let mut state = self.state.lock();
        state.frame += 1;
        let frame = state.frame;
        let retention = self.retention_frames;
        let mut trimmed = 0;
        state.free.retain(|_, targets| {
            let before = targets.len();
            targets.retain(|t| frame - t.released_frame <= retention);
            trimmed += before - targets.len();
            !targets.is_empty()
        });
        if trimmed > 0 {
            log::debug!("RenderTargetPool: trimmed {trimmed} unused target(s)");
        }
    }

    /// Targets waiting on the free list.
    pub fn free_count(&self) -> usize {
        self.state.lock().free.values().map(Vec::len).sum()
    }

    /// Targets currently handed out.
    pub fn in_use_count(&self) -> usize {
        self.state.lock().in_use.len()
    }

    /// Destroys every free target.
    pub fn clear(&self) {
        self.state.lock().free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_attachments() {
        let desc = FramebufferDesc::new(128, 64)
            .add_color_attachment(TextureFormat::RGBA8)
            .add_color_attachment(TextureFormat::RGBA16F)
            .with_depth(TextureFormat::Depth24Stencil8)
            .with_label("GBuffer");
        assert_eq!(desc.color.len(), 2);
        assert!(desc.color.iter().all(|c| c.texture.is_none()));
        assert_eq!(desc.depth.as_ref().unwrap().format, TextureFormat::Depth24Stencil8);
        assert_eq!(desc.label, "GBuffer");
    }

    #[test]
    fn render_target_keys_ignore_labels() {
        let a = TextureDesc::render_target(64, 64, TextureFormat::RGBA8).with_label("a");
        let b = TextureDesc::render_target(64, 64, TextureFormat::RGBA8).with_label("b");
        assert_eq!(RenderTargetKey::of(&a), RenderTargetKey::of(&b));
    }
}

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

//! Backend bootstrap: the [`Context`] brings up a backend, owns the [`Device`] and
//! hands out swapchains.

use crate::math::LinearRgba;
use crate::renderer::api::{BackendKind, TextureDesc, TextureFormat};
use crate::renderer::device::Device;
use crate::renderer::error::{RenderError, ResourceError};
use crate::renderer::texture::Texture2D;
use crate::renderer::traits::BackendFactory;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawWindowHandle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Parameters for [`Context::initialize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextDesc {
    /// Which backend to bring up.
    pub backend: BackendKind,
    /// Application name reported in logs.
    pub app_name: String,
    /// Enables extra validation in the backend (barrier tracking, ...).
    pub enable_validation: bool,
    /// Forwards debug groups and markers to the backend log.
    pub enable_debug_markers: bool,
    /// Frames the CPU may record ahead of the GPU.
    pub frames_in_flight: u32,
}

impl Default for ContextDesc {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            app_name: "Lunex Application".to_owned(),
            enable_validation: cfg!(debug_assertions),
            enable_debug_markers: cfg!(debug_assertions),
            frames_in_flight: 2,
        }
    }
}

/// Owns the backend and its [`Device`].
///
/// Dropping the context shuts it down if [`Context::shutdown`] was not called.
pub struct Context {
    desc: ContextDesc,
    device: Device,
    debug_groups: Mutex<Vec<String>>,
    shut_down: AtomicBool,
}

impl Context {
    /// Brings up the backend selected by `desc.backend`.
    ///
    /// Fails with [`RenderError::InitializationFailed`] if the factory cannot provide it.
    pub fn initialize(desc: ContextDesc, factory: &dyn BackendFactory) -> Result<Self, RenderError> {
        log::info!(
            "Context: initializing {} backend for '{}' (validation: {}, frames in flight: {})",
            desc.backend,
            desc.app_name,
            desc.enable_validation,
            desc.frames_in_flight
        );
        if !factory.is_backend_supported(desc.backend) {
            log::error!("Context: {} backend is not supported", desc.backend);
            return Err(RenderError::InitializationFailed(format!(
                "{} backend is not supported on this platform",
                desc.backend
            )));
        }
        let backend = factory.create_backend(&desc).map_err(|e| {
            log::error!("Context: backend creation failed: {e}");
            match e {
                RenderError::InitializationFailed(_) => e,
                other => RenderError::InitializationFailed(other.to_string()),
            }
        })?;
        let device = Device::new(backend);
        Ok(Self {
            desc,
            device,
            debug_groups: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// The descriptor the context was created with.
    pub fn desc(&self) -> &ContextDesc {
        &self.desc
    }

    /// The device.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Waits for outstanding work and stops backend threads. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let live = self.device.shared().handles.live_count();
        self.device.shutdown();
        log::info!("Context: '{}' shut down ({live} resource(s) still alive)", self.desc.app_name);
    }

    /// Opens a named debug group.
    pub fn push_debug_group(&self, name: &str) {
        let mut groups = self.debug_groups.lock();
        groups.push(name.to_owned());
        if self.desc.enable_debug_markers {
            log::debug!("Context: > {}", groups.join(" / "));
        }
    }

    /// Closes the innermost debug group.
    pub fn pop_debug_group(&self) {
        let mut groups = self.debug_groups.lock();
        match groups.pop() {
            Some(name) if self.desc.enable_debug_markers => log::debug!("Context: < {name}"),
            Some(_) => {}
            None => log::warn!("Context: pop_debug_group without a matching push"),
        }
    }

    /// Debug groups currently open, outermost first.
    pub fn debug_groups(&self) -> Vec<String> {
        self.debug_groups.lock().clone()
    }

    /// Creates an offscreen swapchain.
    pub fn create_swapchain(&self, desc: SwapchainDesc) -> Result<Swapchain, RenderError> {
        Swapchain::new(&self.device, desc, None)
    }

    /// Creates a swapchain for a native window.
    ///
    /// The window's platform is recorded; images are presented into CPU backbuffers.
    pub fn create_surface_swapchain<W>(&self, window: &W, desc: SwapchainDesc) -> Result<Swapchain, RenderError>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let window_handle = window
            .window_handle()
            .map_err(|e| RenderError::SurfaceAcquisitionFailed(format!("window handle: {e}")))?;
        window
            .display_handle()
            .map_err(|e| RenderError::SurfaceAcquisitionFailed(format!("display handle: {e}")))?;
        let platform = platform_name(&window_handle.as_raw());
        log::info!("Context: creating a {platform} surface swapchain");
        Swapchain::new(&self.device, desc, Some(platform))
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("desc", &self.desc)
            .field("device", &self.device)
            .finish()
    }
}

fn platform_name(handle: &RawWindowHandle) -> &'static str {
    match handle {
        RawWindowHandle::Win32(_) => "Win32",
        RawWindowHandle::Xlib(_) => "Xlib",
        RawWindowHandle::Xcb(_) => "Xcb",
        RawWindowHandle::Wayland(_) => "Wayland",
        RawWindowHandle::AppKit(_) => "AppKit",
        RawWindowHandle::UiKit(_) => "UiKit",
        RawWindowHandle::AndroidNdk(_) => "AndroidNdk",
        RawWindowHandle::Web(_) => "Web",
        _ => "Other",
    }
}

/// How presented images are paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PresentMode {
    /// Wait for vertical blank (vsync on).
    #[default]
    Fifo,
    /// Replace the queued image, never tear.
    Mailbox,
    /// Present right away (vsync off).
    Immediate,
}

/// Parameters of a [`Swapchain`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapchainDesc {
    /// Image width.
    pub width: u32,
    /// Image height.
    pub height: u32,
    /// Image format.
    pub format: TextureFormat,
    /// Presentation pacing.
    pub present_mode: PresentMode,
    /// Number of backbuffers.
    pub image_count: u32,
}

impl Default for SwapchainDesc {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            format: TextureFormat::RGBA8,
            present_mode: PresentMode::Fifo,
            image_count: 2,
        }
    }
}

impl SwapchainDesc {
    /// A descriptor with the given size and defaults otherwise.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct SwapchainImages {
    acquired: Option<u32>,
    next: u32,
    presented: Option<u32>,
}

/// A ring of presentable images.
///
/// `acquire_next_image` hands out the next image to render into, `present` publishes
/// it after waiting for the work that targets it.
pub struct Swapchain {
    device: Device,
    platform: Option<&'static str>,
    images: Vec<Arc<Texture2D>>,
    state: Mutex<SwapchainImages>,
    present_mode: Mutex<PresentMode>,
    size: Mutex<(u32, u32)>,
    frames_presented: AtomicU64,
}

impl Swapchain {
    fn new(device: &Device, desc: SwapchainDesc, platform: Option<&'static str>) -> Result<Self, RenderError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::ResourceError(ResourceError::InvalidDescriptor(format!(
                "swapchain size {}x{}",
                desc.width, desc.height
            ))));
        }
        if desc.format.is_depth() || desc.format.is_compressed() {
            return Err(RenderError::ResourceError(ResourceError::Unsupported(format!(
                "{:?} is not presentable",
                desc.format
            ))));
        }
        let image_count = desc.image_count.clamp(1, 3);
        let images = (0..image_count)
            .map(|i| {
                device
                    .create_texture_2d(
                        TextureDesc::render_target(desc.width, desc.height, desc.format)
                            .with_label(format!("Swapchain.image{i}")),
                    )
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;
        log::info!(
            "Swapchain: {}x{} {:?}, {image_count} image(s), {:?}",
            desc.width,
            desc.height,
            desc.format,
            desc.present_mode
        );
        Ok(Self {
            device: device.clone(),
            platform,
            images,
            state: Mutex::new(SwapchainImages::default()),
            present_mode: Mutex::new(desc.present_mode),
            size: Mutex::new((desc.width, desc.height)),
            frames_presented: AtomicU64::new(0),
        })
    }

    /// Picks the next image to render into and returns its index.
    ///
    /// Acquiring twice without presenting returns the image already held.
    pub fn acquire_next_image(&self) -> Option<u32> {
        let mut state = self.state.lock();
        if let Some(index) = state.acquired {
            log::warn!("Swapchain: image {index} acquired twice without present");
            return Some(index);
        }
        let index = state.next;
        state.next = (index + 1) % self.images.len() as u32;
        state.acquired = Some(index);
        Some(index)
    }

    /// The currently acquired image, if any.
    pub fn current_texture(&self) -> Option<Arc<Texture2D>> {
        let index = self.state.lock().acquired?;
        self.images.get(index as usize).cloned()
    }

    /// Publishes the acquired image once the work rendering into it has finished.
    pub fn present(&self) -> Result<(), RenderError> {
        let index = self.state.lock().acquired.take().ok_or_else(|| {
            log::warn!("Swapchain: present without an acquired image");
            RenderError::SurfaceAcquisitionFailed("no image acquired".to_owned())
        })?;
        self.device.wait_idle();
        self.state.lock().presented = Some(index);
        let frames = self.frames_presented.fetch_add(1, Ordering::Relaxed) + 1;
        log::trace!("Swapchain: presented image {index} (frame {frames})");
        Ok(())
    }

    /// Resizes every image. A zero size (minimized window) is ignored.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            log::debug!("Swapchain: ignoring resize to {width}x{height}");
            return Ok(());
        }
        if *self.size.lock() == (width, height) {
            return Ok(());
        }
        self.device.wait_idle();
        for image in &self.images {
            image.resize(width, height)?;
        }
        *self.size.lock() = (width, height);
        let mut state = self.state.lock();
        state.acquired = None;
        state.presented = None;
        log::debug!("Swapchain: resized to {width}x{height}");
        Ok(())
    }

    /// Switches between FIFO (on) and immediate (off) pacing.
    pub fn set_vsync(&self, enabled: bool) {
        *self.present_mode.lock() = if enabled { PresentMode::Fifo } else { PresentMode::Immediate };
    }

    /// `true` unless presenting immediately.
    pub fn vsync(&self) -> bool {
        *self.present_mode.lock() != PresentMode::Immediate
    }

    /// The present mode.
    pub fn present_mode(&self) -> PresentMode {
        *self.present_mode.lock()
    }

    /// Number of backbuffers.
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Current image size.
    pub fn size(&self) -> (u32, u32) {
        *self.size.lock()
    }

    /// The window platform for surface swapchains.
    pub fn platform(&self) -> Option<&'static str> {
        self.platform
    }

    /// Number of successful presents.
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented.load(Ordering::Relaxed)
    }

    /// Reads one pixel of the last presented image.
    pub fn read_presented_pixel(&self, x: u32, y: u32) -> Result<LinearRgba, ResourceError> {
        let index = self.state.lock().presented.ok_or(ResourceError::NotFound)?;
        self.images[index as usize].read_pixel(x, y)
    }
}

impl fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Swapchain")
            .field("size", &self.size())
            .field("images", &self.images.len())
            .field("present_mode", &self.present_mode())
            .field("platform", &self.platform)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_desc_from_partial_json() {
        let desc: ContextDesc =
            serde_json::from_str(r#"{ "backend": "Immediate", "app_name": "Probe" }"#).unwrap();
        assert_eq!(desc.backend, BackendKind::Immediate);
        assert_eq!(desc.app_name, "Probe");
        assert_eq!(desc.frames_in_flight, 2);
    }

    #[test]
    fn swapchain_desc_defaults() {
        let desc = SwapchainDesc::new(640, 480);
        assert_eq!((desc.width, desc.height), (640, 480));
        assert_eq!(desc.present_mode, PresentMode::Fifo);
        assert_eq!(desc.image_count, 2);
    }
}

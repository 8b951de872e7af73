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

//! Triangle, line and point rasterization with the fixed-function back end.
//!
//! Vertices arrive already shaded: a clip-space position plus the vertex stage's
//! varyings. Coverage uses edge functions over the primitive's bounding box,
//! varyings are interpolated perspective-correctly and depth linearly in window
//! space. Every covered pixel runs the [`FragmentStage`] before the depth and
//! stencil tests. Primitives with a vertex behind the eye (`w <= 0`) are dropped
//! rather than clipped.

use super::error::SoftGpuError;
use super::memory::Image;
use lunex_core::math::LinearRgba;
use lunex_core::renderer::{
    BlendFactor, BlendOp, BlendState, ColorWriteMask, CullMode, DepthStencilState, FillMode,
    FrontFace, PrimitiveTopology, RasterizerState, ScissorRect, StencilOp, Viewport,
};

/// Smallest representable step of a 24-bit depth buffer, the unit of constant bias.
const DEPTH_BIAS_UNIT: f32 = 1.0 / 16_777_216.0;

/// One shaded vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    /// Clip-space position.
    pub clip: [f32; 4],
    /// Vertex-stage outputs, one per varying slot.
    pub varyings: Vec<[f32; 4]>,
}

/// What the fragment stage sees of one covered pixel.
#[derive(Debug, Clone, Copy)]
pub struct FragmentInput<'a> {
    /// Window position of the pixel centre, window depth and interpolated `1/w`.
    pub frag_coord: [f32; 4],
    /// `true` on front-facing primitives.
    pub front: bool,
    /// Interpolated varyings, in vertex slot order.
    pub varyings: &'a [[f32; 4]],
}

/// Result of shading one fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentOutput {
    /// Colors by output location.
    pub colors: Vec<(u32, [f32; 4])>,
    /// Replacement window depth.
    pub depth: Option<f32>,
}

/// The programmable part of fragment processing.
pub trait FragmentStage {
    /// Shades one fragment. `Ok(None)` discards it.
    fn shade(&mut self, input: &FragmentInput<'_>) -> Result<Option<FragmentOutput>, SoftGpuError>;
}

/// The attachments of the current render pass, mip 0 of layer 0 each.
#[derive(Debug, Default)]
pub struct Targets<'a> {
    /// Color attachments.
    pub color: Vec<&'a mut Image>,
    /// Output location `i` is written to `color[slots[i]]`.
    pub slots: Vec<usize>,
    /// Depth/stencil attachment.
    pub depth: Option<&'a mut Image>,
}

impl<'a> Targets<'a> {
    /// Targets where output location `i` goes to color attachment `i`.
    pub fn new(color: Vec<&'a mut Image>, depth: Option<&'a mut Image>) -> Self {
        let slots = (0..color.len()).collect();
        Self { color, slots, depth }
    }

    fn size(&self) -> (u32, u32) {
        let image = self.color.first().map(|i| &**i).or(self.depth.as_deref());
        image
            .map(|i| {
                let e = i.mip_extent(0);
                (e.width, e.height)
            })
            .unwrap_or((0, 0))
    }
}

/// Fixed-function state of a draw.
#[derive(Debug, Clone, Copy)]
pub struct DrawState<'a> {
    /// Rasterizer state.
    pub rasterizer: &'a RasterizerState,
    /// Depth/stencil state.
    pub depth_stencil: &'a DepthStencilState,
    /// Blend state.
    pub blend: &'a BlendState,
    /// Window transform.
    pub viewport: Viewport,
    /// Scissor rectangle, honored when the rasterizer enables the scissor test.
    pub scissor: Option<ScissorRect>,
    /// Varying slots taken from the provoking vertex instead of interpolated.
    pub flat: &'a [bool],
}

/// A vertex after the viewport transform.
#[derive(Debug, Clone, Copy)]
struct WindowVertex<'v> {
    x: f32,
    y: f32,
    z: f32,
    inv_w: f32,
    varyings: &'v [[f32; 4]],
}

/// Pixel rectangle fragments may touch: `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy)]
struct Clip {
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
}

impl Clip {
    fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }
}

struct Fragment {
    x: u32,
    y: u32,
    depth: f32,
    inv_w: f32,
    varyings: Vec<[f32; 4]>,
    front: bool,
}

/// Rasterizes `vertices` as `topology` into `targets`, shading every covered pixel
/// with `stage`. Returns the fragments written.
pub fn draw(
    targets: &mut Targets<'_>,
    state: &DrawState<'_>,
    topology: PrimitiveTopology,
    vertices: &[Vertex],
    stage: &mut dyn FragmentStage,
) -> Result<u64, SoftGpuError> {
    let (width, height) = targets.size();
    if width == 0 || height == 0 {
        return Ok(0);
    }
    let clip = clip_rect(state, width, height);
    if clip.x0 >= clip.x1 || clip.y0 >= clip.y1 {
        return Ok(0);
    }
    let mut raster = Raster {
        targets,
        state,
        stage,
        clip,
        written: 0,
        fault: None,
    };

    match topology {
        PrimitiveTopology::PointList => {
            for v in vertices {
                if let Some(w) = raster.to_window(v) {
                    raster.point(&w);
                }
            }
        }
        PrimitiveTopology::LineList => {
            for pair in vertices.chunks_exact(2) {
                raster.line_clip(&pair[0], &pair[1]);
            }
        }
        PrimitiveTopology::LineStrip => {
            for pair in vertices.windows(2) {
                raster.line_clip(&pair[0], &pair[1]);
            }
        }
        PrimitiveTopology::TriangleList => {
            for tri in vertices.chunks_exact(3) {
                raster.triangle(&tri[0], &tri[1], &tri[2]);
            }
        }
        PrimitiveTopology::TriangleStrip => {
            for (i, tri) in vertices.windows(3).enumerate() {
                // Odd triangles of a strip are wound the other way.
                if i % 2 == 0 {
                    raster.triangle(&tri[0], &tri[1], &tri[2]);
                } else {
                    raster.triangle(&tri[1], &tri[0], &tri[2]);
                }
            }
        }
        PrimitiveTopology::TriangleFan => {
            if let Some((first, rest)) = vertices.split_first() {
                for pair in rest.windows(2) {
                    raster.triangle(first, &pair[0], &pair[1]);
                }
            }
        }
    }
    match raster.fault {
        Some(e) => Err(e),
        None => Ok(raster.written),
    }
}

fn clip_rect(state: &DrawState<'_>, width: u32, height: u32) -> Clip {
    let vp = &state.viewport;
    let mut clip = Clip {
        x0: vp.x.max(0.0).floor() as i32,
        y0: vp.y.max(0.0).floor() as i32,
        x1: ((vp.x + vp.width).ceil() as i32).min(width as i32),
        y1: ((vp.y + vp.height).ceil() as i32).min(height as i32),
    };
    if let (true, Some(s)) = (state.rasterizer.scissor_test, state.scissor) {
        clip.x0 = clip.x0.max(s.x);
        clip.y0 = clip.y0.max(s.y);
        clip.x1 = clip.x1.min(s.x.saturating_add(s.width as i32));
        clip.y1 = clip.y1.min(s.y.saturating_add(s.height as i32));
    }
    clip
}

fn edge(ax: f32, ay: f32, bx: f32, by: f32, px: f32, py: f32) -> f32 {
    (bx - ax) * (py - ay) - (by - ay) * (px - ax)
}

struct Raster<'t, 'a, 's> {
    targets: &'t mut Targets<'a>,
    state: &'t DrawState<'s>,
    stage: &'t mut dyn FragmentStage,
    clip: Clip,
    written: u64,
    fault: Option<SoftGpuError>,
}

impl Raster<'_, '_, '_> {
    fn to_window<'v>(&self, v: &'v Vertex) -> Option<WindowVertex<'v>> {
        let [x, y, z, w] = v.clip;
        if w <= 0.0 {
            return None;
        }
        let inv_w = 1.0 / w;
        let vp = &self.state.viewport;
        Some(WindowVertex {
            x: vp.x + (x * inv_w * 0.5 + 0.5) * vp.width,
            // NDC +Y points up, row 0 is the top of the target.
            y: vp.y + (0.5 - y * inv_w * 0.5) * vp.height,
            z: z * inv_w,
            inv_w,
            varyings: &v.varyings,
        })
    }

    fn window_depth(&self, ndc_z: f32) -> Option<f32> {
        let vp = &self.state.viewport;
        if !self.state.rasterizer.depth_clamp && !(-1.0..=1.0).contains(&ndc_z) {
            return None;
        }
        let z = ndc_z.clamp(-1.0, 1.0) * 0.5 + 0.5;
        Some(vp.min_depth + z * (vp.max_depth - vp.min_depth))
    }

    fn triangle(&mut self, a: &Vertex, b: &Vertex, c: &Vertex) {
        let (Some(v0), Some(v1), Some(v2)) = (self.to_window(a), self.to_window(b), self.to_window(c)) else {
            return;
        };
        // Window Y points down, so counter-clockwise in NDC has a negative window area.
        let area = edge(v0.x, v0.y, v1.x, v1.y, v2.x, v2.y);
        if area == 0.0 || !area.is_finite() {
            return;
        }
        let ccw = area < 0.0;
        let front = match self.state.rasterizer.front_face {
            FrontFace::CounterClockwise => ccw,
            FrontFace::Clockwise => !ccw,
        };
        let culled = match self.state.rasterizer.cull_mode {
            CullMode::None => false,
            CullMode::Front => front,
            CullMode::Back => !front,
            CullMode::FrontAndBack => true,
        };
        if culled {
            return;
        }
        if self.state.rasterizer.fill_mode == FillMode::Wireframe {
            self.line(&v0, &v1, front);
            self.line(&v1, &v2, front);
            self.line(&v2, &v0, front);
            return;
        }

        let bias = self.depth_bias(&v0, &v1, &v2, area);
        let (sign, inv_area) = if area < 0.0 { (-1.0, -1.0 / area) } else { (1.0, 1.0 / area) };
        let min_x = (v0.x.min(v1.x).min(v2.x).floor() as i32).max(self.clip.x0);
        let max_x = (v0.x.max(v1.x).max(v2.x).ceil() as i32).min(self.clip.x1);
        let min_y = (v0.y.min(v1.y).min(v2.y).floor() as i32).max(self.clip.y0);
        let max_y = (v0.y.max(v1.y).max(v2.y).ceil() as i32).min(self.clip.y1);
        let corners = [v0, v1, v2];

        for y in min_y..max_y {
            for x in min_x..max_x {
                if self.fault.is_some() {
                    return;
                }
                let px = x as f32 + 0.5;
                let py = y as f32 + 0.5;
                let w0 = edge(v1.x, v1.y, v2.x, v2.y, px, py) * sign;
                let w1 = edge(v2.x, v2.y, v0.x, v0.y, px, py) * sign;
                let w2 = edge(v0.x, v0.y, v1.x, v1.y, px, py) * sign;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let b = [w0 * inv_area, w1 * inv_area, w2 * inv_area];
                let ndc_z = b[0] * v0.z + b[1] * v1.z + b[2] * v2.z;
                let Some(depth) = self.window_depth(ndc_z) else {
                    continue;
                };
                self.fragment(Fragment {
                    x: x as u32,
                    y: y as u32,
                    depth: (depth + bias).clamp(0.0, 1.0),
                    inv_w: b[0] * v0.inv_w + b[1] * v1.inv_w + b[2] * v2.inv_w,
                    varyings: interpolate(&corners, b, self.state.flat),
                    front,
                });
            }
        }
    }

    fn depth_bias(&self, v0: &WindowVertex<'_>, v1: &WindowVertex<'_>, v2: &WindowVertex<'_>, area: f32) -> f32 {
        let r = self.state.rasterizer;
        if r.depth_bias == 0.0 && r.slope_scaled_depth_bias == 0.0 {
            return 0.0;
        }
        let dzdx = ((v1.z - v0.z) * (v2.y - v0.y) - (v2.z - v0.z) * (v1.y - v0.y)) / area;
        let dzdy = ((v2.z - v0.z) * (v1.x - v0.x) - (v1.z - v0.z) * (v2.x - v0.x)) / area;
        r.depth_bias * DEPTH_BIAS_UNIT + r.slope_scaled_depth_bias * dzdx.abs().max(dzdy.abs())
    }

    fn line_clip(&mut self, a: &Vertex, b: &Vertex) {
        if let (Some(v0), Some(v1)) = (self.to_window(a), self.to_window(b)) {
            self.line(&v0, &v1, true);
        }
    }

    fn line(&mut self, v0: &WindowVertex<'_>, v1: &WindowVertex<'_>, front: bool) {
        let dx = v1.x - v0.x;
        let dy = v1.y - v0.y;
        let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as u32;
        let half = (self.state.rasterizer.line_width.max(1.0) as i32 - 1) / 2;
        let ends = [*v0, *v1];
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            let x = (v0.x + dx * t).floor() as i32;
            let y = (v0.y + dy * t).floor() as i32;
            let Some(depth) = self.window_depth(v0.z + (v1.z - v0.z) * t) else {
                continue;
            };
            let inv_w = v0.inv_w + (v1.inv_w - v0.inv_w) * t;
            let varyings = interpolate(&ends, [1.0 - t, t], self.state.flat);
            for oy in -half..=half {
                for ox in -half..=half {
                    self.emit(x + ox, y + oy, depth, inv_w, &varyings, front);
                }
            }
        }
    }

    fn point(&mut self, v: &WindowVertex<'_>) {
        let Some(depth) = self.window_depth(v.z) else {
            return;
        };
        let half = (self.state.rasterizer.line_width.max(1.0) as i32 - 1) / 2;
        let (x, y) = (v.x.floor() as i32, v.y.floor() as i32);
        for oy in -half..=half {
            for ox in -half..=half {
                self.emit(x + ox, y + oy, depth, v.inv_w, v.varyings, true);
            }
        }
    }

    fn emit(&mut self, x: i32, y: i32, depth: f32, inv_w: f32, varyings: &[[f32; 4]], front: bool) {
        if self.clip.contains(x, y) && self.fault.is_none() {
            self.fragment(Fragment {
                x: x as u32,
                y: y as u32,
                depth,
                inv_w,
                varyings: varyings.to_vec(),
                front,
            });
        }
    }

    fn fragment(&mut self, f: Fragment) {
        let input = FragmentInput {
            frag_coord: [f.x as f32 + 0.5, f.y as f32 + 0.5, f.depth, f.inv_w],
            front: f.front,
            varyings: &f.varyings,
        };
        let output = match self.stage.shade(&input) {
            Ok(Some(output)) => output,
            Ok(None) => return,
            Err(e) => {
                self.fault = Some(e);
                return;
            }
        };
        let depth = output.depth.map_or(f.depth, |d| d.clamp(0.0, 1.0));

        let ds = self.state.depth_stencil;
        if let Some(depth_image) = self.targets.depth.as_deref_mut() {
            let format = depth_image.format();
            let stored_depth = depth_image.depth_at(f.x, f.y);
            let stored_stencil = depth_image.stencil_at(f.x, f.y);
            let mut stencil = stored_stencil;
            let face = if f.front { &ds.front } else { &ds.back };
            let stencil_active = ds.stencil_test && format.has_stencil();

            if stencil_active {
                let reference = (ds.reference & ds.read_mask) as f32;
                let value = (stored_stencil & ds.read_mask) as f32;
                if !face.compare.test(reference, value) {
                    stencil = apply_stencil(face.fail_op, stored_stencil, ds);
                    depth_image.set_depth_stencil(f.x, f.y, stored_depth, stencil);
                    return;
                }
            }
            if ds.depth_test && !ds.depth_compare.test(depth, stored_depth) {
                if stencil_active {
                    stencil = apply_stencil(face.depth_fail_op, stored_stencil, ds);
                    depth_image.set_depth_stencil(f.x, f.y, stored_depth, stencil);
                }
                return;
            }
            if stencil_active {
                stencil = apply_stencil(face.pass_op, stored_stencil, ds);
            }
            let new_depth = if ds.depth_write { depth } else { stored_depth };
            if new_depth != stored_depth || stencil != stored_stencil {
                depth_image.set_depth_stencil(f.x, f.y, new_depth, stencil);
            }
        }

        let blend = self.state.blend;
        for (location, src) in output.colors {
            let Some(&slot) = self.targets.slots.get(location as usize) else {
                continue;
            };
            let Some(target) = self.targets.color.get_mut(slot) else {
                continue;
            };
            let dst = target.load(0, 0, f.x, f.y, 0).to_array();
            let out = blend_color(blend, src, dst);
            target.store(0, 0, f.x, f.y, 0, LinearRgba::from_array(out));
        }
        self.written += 1;
    }
}

/// Perspective-correct interpolation of every varying slot; flat slots copy the
/// first (provoking) vertex.
fn interpolate<const N: usize>(v: &[WindowVertex<'_>; N], b: [f32; N], flat: &[bool]) -> Vec<[f32; 4]> {
    let weights: [f32; N] = std::array::from_fn(|i| b[i] * v[i].inv_w);
    let sum: f32 = weights.iter().sum();
    let norm = if sum != 0.0 { 1.0 / sum } else { 0.0 };
    let slots = v.iter().map(|w| w.varyings.len()).min().unwrap_or(0);
    (0..slots)
        .map(|slot| {
            if flat.get(slot).copied().unwrap_or(false) {
                return v[0].varyings[slot];
            }
            let mut out = [0.0; 4];
            for i in 0..N {
                let w = weights[i] * norm;
                for (o, x) in out.iter_mut().zip(v[i].varyings[slot]) {
                    *o += x * w;
                }
            }
            out
        })
        .collect()
}

fn apply_stencil(op: StencilOp, value: u8, ds: &DepthStencilState) -> u8 {
    let updated = match op {
        StencilOp::Keep => value,
        StencilOp::Zero => 0,
        StencilOp::Replace => ds.reference,
        StencilOp::IncrementClamp => value.saturating_add(1),
        StencilOp::DecrementClamp => value.saturating_sub(1),
        StencilOp::Invert => !value,
        StencilOp::IncrementWrap => value.wrapping_add(1),
        StencilOp::DecrementWrap => value.wrapping_sub(1),
    };
    (value & !ds.write_mask) | (updated & ds.write_mask)
}

fn factor(f: BlendFactor, src: [f32; 4], dst: [f32; 4], channel: usize) -> f32 {
    match f {
        BlendFactor::Zero => 0.0,
        BlendFactor::One => 1.0,
        BlendFactor::SrcColor => src[channel],
        BlendFactor::OneMinusSrcColor => 1.0 - src[channel],
        BlendFactor::DstColor => dst[channel],
        BlendFactor::OneMinusDstColor => 1.0 - dst[channel],
        BlendFactor::SrcAlpha => src[3],
        BlendFactor::OneMinusSrcAlpha => 1.0 - src[3],
        BlendFactor::DstAlpha => dst[3],
        BlendFactor::OneMinusDstAlpha => 1.0 - dst[3],
    }
}

fn combine(op: BlendOp, s: f32, d: f32, src: f32, dst: f32) -> f32 {
    match op {
        BlendOp::Add => s + d,
        BlendOp::Subtract => s - d,
        BlendOp::ReverseSubtract => d - s,
        BlendOp::Min => src.min(dst),
        BlendOp::Max => src.max(dst),
    }
}

fn blend_color(blend: &BlendState, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    let mut out = src;
    if blend.enabled {
        for c in 0..4 {
            let (sf, df, op) = if c == 3 {
                (blend.src_alpha, blend.dst_alpha, blend.alpha_op)
            } else {
                (blend.src_color, blend.dst_color, blend.color_op)
            };
            let s = src[c] * factor(sf, src, dst, c);
            let d = dst[c] * factor(df, src, dst, c);
            out[c] = combine(op, s, d, src[c], dst[c]);
        }
    }
    let masks = [ColorWriteMask::R, ColorWriteMask::G, ColorWriteMask::B, ColorWriteMask::A];
    for (c, mask) in masks.iter().enumerate() {
        if !blend.write_mask.contains(*mask) {
            out[c] = dst[c];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lunex_core::renderer::{CompareFunc, StencilFaceState, TextureDesc, TextureFormat};

    /// Writes varying 0 to location 0.
    struct VaryingColor;

    impl FragmentStage for VaryingColor {
        fn shade(&mut self, input: &FragmentInput<'_>) -> Result<Option<FragmentOutput>, SoftGpuError> {
            Ok(Some(FragmentOutput {
                colors: vec![(0, input.varyings[0])],
                depth: None,
            }))
        }
    }

    /// Discards every fragment left of the viewport centre.
    struct DiscardLeft(f32);

    impl FragmentStage for DiscardLeft {
        fn shade(&mut self, input: &FragmentInput<'_>) -> Result<Option<FragmentOutput>, SoftGpuError> {
            if input.frag_coord[0] < self.0 {
                return Ok(None);
            }
            VaryingColor.shade(input)
        }
    }

    fn vertex(x: f32, y: f32, z: f32, color: LinearRgba) -> Vertex {
        Vertex {
            clip: [x, y, z, 1.0],
            varyings: vec![color.to_array()],
        }
    }

    /// A triangle covering the whole viewport, counter-clockwise in NDC.
    fn fullscreen(z: f32, color: LinearRgba) -> Vec<Vertex> {
        vec![
            vertex(-1.0, -1.0, z, color),
            vertex(3.0, -1.0, z, color),
            vertex(-1.0, 3.0, z, color),
        ]
    }

    fn state<'a>(
        rasterizer: &'a RasterizerState,
        depth_stencil: &'a DepthStencilState,
        blend: &'a BlendState,
        size: f32,
    ) -> DrawState<'a> {
        DrawState {
            rasterizer,
            depth_stencil,
            blend,
            viewport: Viewport::new(0.0, 0.0, size, size),
            scissor: None,
            flat: &[],
        }
    }

    fn color_image(size: u32) -> Image {
        Image::new(&TextureDesc::render_target(size, size, TextureFormat::RGBA32F)).unwrap()
    }

    fn run(targets: &mut Targets<'_>, state: &DrawState<'_>, topology: PrimitiveTopology, vertices: &[Vertex]) -> u64 {
        draw(targets, state, topology, vertices, &mut VaryingColor).unwrap()
    }

    #[test]
    fn fullscreen_triangle_covers_every_pixel() {
        let mut color = color_image(8);
        let (r, d, b) = (RasterizerState::default(), DepthStencilState::disabled(), BlendState::opaque());
        let mut targets = Targets::new(vec![&mut color], None);
        let written = run(&mut targets, &state(&r, &d, &b, 8.0), PrimitiveTopology::TriangleList, &fullscreen(0.0, LinearRgba::GREEN));
        assert_eq!(written, 64);
        assert_eq!(color.load(0, 0, 7, 7, 0), LinearRgba::GREEN);
    }

    #[test]
    fn back_faces_are_culled_by_default() {
        let mut color = color_image(4);
        let (r, d, b) = (RasterizerState::default(), DepthStencilState::disabled(), BlendState::opaque());
        let mut tri = fullscreen(0.0, LinearRgba::RED);
        tri.swap(1, 2);
        let mut targets = Targets::new(vec![&mut color], None);
        assert_eq!(run(&mut targets, &state(&r, &d, &b, 4.0), PrimitiveTopology::TriangleList, &tri), 0);
        let r = RasterizerState::no_cull();
        assert_eq!(run(&mut targets, &state(&r, &d, &b, 4.0), PrimitiveTopology::TriangleList, &tri), 16);
    }

    #[test]
    fn depth_test_keeps_the_nearest_surface() {
        let mut color = color_image(4);
        let mut depth = Image::new(&TextureDesc::render_target(4, 4, TextureFormat::Depth32F)).unwrap();
        let (r, d, b) = (RasterizerState::default(), DepthStencilState::default(), BlendState::opaque());
        let mut targets = Targets::new(vec![&mut color], Some(&mut depth));
        let s = state(&r, &d, &b, 4.0);
        run(&mut targets, &s, PrimitiveTopology::TriangleList, &fullscreen(0.0, LinearRgba::RED));
        let hidden = run(&mut targets, &s, PrimitiveTopology::TriangleList, &fullscreen(0.5, LinearRgba::BLUE));
        assert_eq!(hidden, 0);
        assert_eq!(color.load(0, 0, 2, 2, 0), LinearRgba::RED);
        assert_relative_eq!(depth.depth_at(2, 2), 0.5);
    }

    #[test]
    fn discarded_fragments_leave_the_target_alone() {
        let mut color = color_image(4);
        let (r, d, b) = (RasterizerState::default(), DepthStencilState::disabled(), BlendState::opaque());
        let mut targets = Targets::new(vec![&mut color], None);
        let written = draw(
            &mut targets,
            &state(&r, &d, &b, 4.0),
            PrimitiveTopology::TriangleList,
            &fullscreen(0.0, LinearRgba::GREEN),
            &mut DiscardLeft(2.0),
        )
        .unwrap();
        assert_eq!(written, 8);
        assert_eq!(color.load(0, 0, 0, 1, 0), LinearRgba::TRANSPARENT);
        assert_eq!(color.load(0, 0, 3, 1, 0), LinearRgba::GREEN);
    }

    #[test]
    fn varyings_interpolate_across_the_primitive() {
        let mut color = color_image(4);
        let (r, d, b) = (RasterizerState::default(), DepthStencilState::disabled(), BlendState::opaque());
        let line = [vertex(-1.0, 0.0, 0.0, LinearRgba::BLACK), vertex(1.0, 0.0, 0.0, LinearRgba::WHITE)];
        let mut targets = Targets::new(vec![&mut color], None);
        run(&mut targets, &state(&r, &d, &b, 4.0), PrimitiveTopology::LineList, &line);
        let mid = targets.color[0].load(0, 0, 2, 2, 0).r;
        assert!(mid > 0.25 && mid < 0.75, "middle of the line should be grey, got {mid}");

        let flat = [true];
        let mut s = state(&r, &d, &b, 4.0);
        s.flat = &flat;
        run(&mut targets, &s, PrimitiveTopology::LineList, &line);
        assert_eq!(color.load(0, 0, 2, 2, 0), LinearRgba::BLACK, "flat slots copy the provoking vertex");
    }

    #[test]
    fn stage_faults_abort_the_draw() {
        struct Faulty;
        impl FragmentStage for Faulty {
            fn shade(&mut self, _: &FragmentInput<'_>) -> Result<Option<FragmentOutput>, SoftGpuError> {
                Err(SoftGpuError::ShaderFault("boom".to_owned()))
            }
        }
        let mut color = color_image(2);
        let (r, d, b) = (RasterizerState::default(), DepthStencilState::disabled(), BlendState::opaque());
        let mut targets = Targets::new(vec![&mut color], None);
        let result = draw(
            &mut targets,
            &state(&r, &d, &b, 2.0),
            PrimitiveTopology::TriangleList,
            &fullscreen(0.0, LinearRgba::WHITE),
            &mut Faulty,
        );
        assert!(matches!(result, Err(SoftGpuError::ShaderFault(_))));
    }

    #[test]
    fn scissor_limits_coverage() {
        let mut color = color_image(8);
        let r = RasterizerState {
            scissor_test: true,
            ..RasterizerState::default()
        };
        let (d, b) = (DepthStencilState::disabled(), BlendState::opaque());
        let mut s = state(&r, &d, &b, 8.0);
        s.scissor = Some(ScissorRect::new(0, 0, 2, 3));
        let mut targets = Targets::new(vec![&mut color], None);
        assert_eq!(run(&mut targets, &s, PrimitiveTopology::TriangleList, &fullscreen(0.0, LinearRgba::WHITE)), 6);
    }

    #[test]
    fn alpha_blending_mixes_with_the_destination() {
        let mut color = color_image(2);
        color.clear(0, 0, None, lunex_core::renderer::ClearValue::Color(LinearRgba::BLACK));
        let (r, d, b) = (RasterizerState::default(), DepthStencilState::disabled(), BlendState::alpha_blend());
        let mut targets = Targets::new(vec![&mut color], None);
        let half_white = LinearRgba::new(1.0, 1.0, 1.0, 0.5);
        run(&mut targets, &state(&r, &d, &b, 2.0), PrimitiveTopology::TriangleList, &fullscreen(0.0, half_white));
        assert_relative_eq!(color.load(0, 0, 0, 0, 0).r, 0.5);
    }

    #[test]
    fn write_mask_preserves_channels() {
        let out = blend_color(
            &BlendState {
                write_mask: ColorWriteMask::R,
                ..BlendState::opaque()
            },
            [1.0, 1.0, 1.0, 1.0],
            [0.0, 0.25, 0.5, 0.75],
        );
        assert_eq!(out, [1.0, 0.25, 0.5, 0.75]);
    }

    #[test]
    fn stencil_replace_marks_covered_pixels() {
        let mut depth = Image::new(&TextureDesc::render_target(2, 2, TextureFormat::Depth24Stencil8)).unwrap();
        let face = StencilFaceState {
            compare: CompareFunc::Always,
            pass_op: StencilOp::Replace,
            ..StencilFaceState::default()
        };
        let d = DepthStencilState {
            stencil_test: true,
            front: face,
            back: face,
            reference: 3,
            ..DepthStencilState::disabled()
        };
        let (r, b) = (RasterizerState::default(), BlendState::opaque());
        let mut targets = Targets::new(Vec::new(), Some(&mut depth));
        run(&mut targets, &state(&r, &d, &b, 2.0), PrimitiveTopology::TriangleList, &fullscreen(0.0, LinearRgba::WHITE));
        assert_eq!(depth.stencil_at(1, 1), 3);
    }

    #[test]
    fn lines_touch_both_endpoints() {
        let mut color = color_image(4);
        let (r, d, b) = (RasterizerState::default(), DepthStencilState::disabled(), BlendState::opaque());
        let mut targets = Targets::new(vec![&mut color], None);
        let line = [vertex(-0.75, 0.75, 0.0, LinearRgba::RED), vertex(0.75, 0.75, 0.0, LinearRgba::RED)];
        run(&mut targets, &state(&r, &d, &b, 4.0), PrimitiveTopology::LineList, &line);
        assert_eq!(color.load(0, 0, 0, 0, 0), LinearRgba::RED);
        assert_eq!(color.load(0, 0, 3, 0, 0), LinearRgba::RED);
        assert_eq!(color.load(0, 0, 0, 3, 0), LinearRgba::TRANSPARENT);
    }
}

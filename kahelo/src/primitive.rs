// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Primitive dispatch: the draw entry points and the memoized strategy
//! choice behind them.
//!
//! Vertices arrive as opaque attribute vectors, position in attribute zero,
//! already in device space. Each draw snapshots dirty state, computes the
//! primitive's device-space bounds, clips them against the active draw
//! region, and appends one command to every tile the bounds touch. The
//! strategy enum is resolved once after a state change and cached per
//! primitive kind, so the per-primitive cost is a tag match rather than a
//! state inspection.

use smallvec::SmallVec;

use crate::arena::SceneFull;
use crate::context::{BinningContext, SetupState};
use crate::fb::Rect;
use crate::scene::{Cmd, CmdPrimitive, CmdRect, TILE_ORDER};
use crate::state::CullFace;
use crate::Error;

/// How a primitive kind is binned under the bound state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) enum Strategy {
    /// Not resolved since the last state change.
    #[default]
    Unbound,
    /// Clip against the per-viewport draw region.
    General,
    /// Scissor test off, no linear constraints: clip against the
    /// framebuffer rect only.
    Specialized,
    /// Rasterizer discard: consume and drop.
    Discard,
}

/// The cached strategy per primitive kind. Unbinding any state that feeds
/// resolution clears all four at once.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Strategies {
    pub point: Strategy,
    pub line: Strategy,
    pub triangle: Strategy,
    pub rect: Strategy,
}

impl Strategies {
    pub fn unbind(&mut self) {
        *self = Self::default();
    }
}

/// Whether a triangle survives the cull state, from its signed device-space
/// area. Device y grows downward, so counter-clockwise winding shows up as
/// negative area.
fn cull_test(area: f32, front_ccw: bool, cull: CullFace) -> bool {
    if area == 0.0 {
        return true;
    }
    let front_facing = (area < 0.0) == front_ccw;
    match cull {
        CullFace::None => false,
        CullFace::Front => front_facing,
        CullFace::Back => !front_facing,
        CullFace::FrontAndBack => true,
    }
}

/// Inclusive pixel bounds of a float extent, with integral maxima treated
/// as exclusive edges.
fn snap_bbox(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Rect {
    Rect {
        x0: min_x.floor() as i32,
        y0: min_y.floor() as i32,
        x1: max_x.ceil() as i32 - 1,
        y1: max_y.ceil() as i32 - 1,
    }
}

impl BinningContext {
    /// Resolve and cache the strategy for every primitive kind.
    fn resolve_strategies(&mut self) {
        let strategy = if self.rasterizer_discard {
            Strategy::Discard
        } else if !self.rasterizer.scissor_test && !self.permit_linear {
            Strategy::Specialized
        } else {
            Strategy::General
        };
        self.strategies = Strategies {
            point: strategy,
            line: strategy,
            triangle: strategy,
            rect: strategy,
        };
        log::trace!("primitive strategies bound: {strategy:?}");
    }

    fn ensure_strategies(&mut self) {
        if self.strategies.triangle == Strategy::Unbound {
            self.resolve_strategies();
        }
    }

    /// Activate a scene and capture dirty state, with the one-shot
    /// flush-and-restart recovery when the capture itself overflows.
    fn prepare_draw(&mut self) -> Result<(), Error> {
        self.set_scene_state(SetupState::Active, "draw")?;
        self.ensure_strategies();
        if self.update_stored_state().is_err() {
            self.flush_and_restart("out of memory")?;
            self.ensure_strategies();
            if self.update_stored_state().is_err() {
                log::error!("state capture exceeds scene capacity");
                return Err(Error::SceneCapacity {
                    context: "state capture",
                });
            }
        }
        Ok(())
    }

    /// The region a strategy clips against.
    fn clip_region(&self, strategy: Strategy) -> Rect {
        match strategy {
            Strategy::General => self.draw_regions[0],
            _ => self.fb.rect(),
        }
    }

    /// Copy the primitive's attribute vectors into the scene and append its
    /// command to every touched tile.
    fn bin_primitive(
        &mut self,
        make: fn(CmdPrimitive) -> Cmd,
        bbox: Rect,
        attrs: &[f32],
    ) -> Result<(), SceneFull> {
        let state = self.fs.stored;
        let Some(scene) = self.scene.as_mut() else {
            return Err(SceneFull);
        };
        let verts = scene.alloc_bytes(bytemuck::cast_slice(attrs), 4)?;
        let cmd = make(CmdPrimitive { state, verts, bbox });
        scene.bin_box(
            bbox.x0 as u32 >> TILE_ORDER,
            bbox.y0 as u32 >> TILE_ORDER,
            bbox.x1 as u32 >> TILE_ORDER,
            bbox.y1 as u32 >> TILE_ORDER,
            cmd,
        )
    }

    /// Draw one point. `v` is the vertex's attribute vectors per the bound
    /// layout.
    pub fn draw_point(&mut self, v: &[[f32; 4]]) -> Result<(), Error> {
        debug_assert_eq!(v.len(), self.vertex_layout.num_attrs);
        self.ensure_strategies();
        if self.strategies.point == Strategy::Discard {
            return Ok(());
        }
        let mut attempt = 0;
        loop {
            self.prepare_draw()?;
            let size = match self.vertex_layout.point_size_attr {
                Some(attr) if self.rasterizer.point_size_per_vertex => v[attr][0],
                _ => self.rasterizer.point_size,
            };
            let half = (size * 0.5).max(0.0);
            let (x, y) = (v[0][0], v[0][1]);
            let bbox = snap_bbox(x - half, y - half, x + half, y + half)
                .intersect(self.clip_region(self.strategies.point));
            if bbox.is_empty() {
                return Ok(());
            }
            let mut attrs: SmallVec<[f32; 16]> = SmallVec::new();
            flatten_vertex(&mut attrs, v);
            match self.bin_primitive(Cmd::Point, bbox, &attrs) {
                Ok(()) => return Ok(()),
                Err(SceneFull) if attempt == 0 => {
                    attempt += 1;
                    self.flush_and_restart("out of memory")?;
                }
                Err(SceneFull) => {
                    log::error!("point exceeds scene capacity");
                    return Err(Error::SceneCapacity { context: "point" });
                }
            }
        }
    }

    /// Draw one line segment, expanded by the rasterizer line width.
    pub fn draw_line(&mut self, v0: &[[f32; 4]], v1: &[[f32; 4]]) -> Result<(), Error> {
        debug_assert_eq!(v0.len(), self.vertex_layout.num_attrs);
        debug_assert_eq!(v1.len(), self.vertex_layout.num_attrs);
        self.ensure_strategies();
        if self.strategies.line == Strategy::Discard {
            return Ok(());
        }
        let mut attempt = 0;
        loop {
            self.prepare_draw()?;
            let half = (self.rasterizer.line_width * 0.5).max(0.0);
            let bbox = snap_bbox(
                v0[0][0].min(v1[0][0]) - half,
                v0[0][1].min(v1[0][1]) - half,
                v0[0][0].max(v1[0][0]) + half,
                v0[0][1].max(v1[0][1]) + half,
            )
            .intersect(self.clip_region(self.strategies.line));
            if bbox.is_empty() {
                return Ok(());
            }
            let mut attrs: SmallVec<[f32; 32]> = SmallVec::new();
            flatten_vertex(&mut attrs, v0);
            flatten_vertex(&mut attrs, v1);
            match self.bin_primitive(Cmd::Line, bbox, &attrs) {
                Ok(()) => return Ok(()),
                Err(SceneFull) if attempt == 0 => {
                    attempt += 1;
                    self.flush_and_restart("out of memory")?;
                }
                Err(SceneFull) => {
                    log::error!("line exceeds scene capacity");
                    return Err(Error::SceneCapacity { context: "line" });
                }
            }
        }
    }

    /// Draw one triangle. Culled triangles and triangles that clip to an
    /// empty region are consumed without binning.
    pub fn draw_triangle(
        &mut self,
        v0: &[[f32; 4]],
        v1: &[[f32; 4]],
        v2: &[[f32; 4]],
    ) -> Result<(), Error> {
        debug_assert_eq!(v0.len(), self.vertex_layout.num_attrs);
        debug_assert_eq!(v1.len(), self.vertex_layout.num_attrs);
        debug_assert_eq!(v2.len(), self.vertex_layout.num_attrs);
        self.ensure_strategies();
        if self.strategies.triangle == Strategy::Discard {
            return Ok(());
        }
        let mut attempt = 0;
        loop {
            self.prepare_draw()?;
            let (x0, y0) = (v0[0][0], v0[0][1]);
            let (x1, y1) = (v1[0][0], v1[0][1]);
            let (x2, y2) = (v2[0][0], v2[0][1]);
            let area = (x1 - x0) * (y2 - y0) - (x2 - x0) * (y1 - y0);
            if cull_test(area, self.rasterizer.front_ccw, self.rasterizer.cull_face) {
                return Ok(());
            }
            let bbox = snap_bbox(
                x0.min(x1).min(x2),
                y0.min(y1).min(y2),
                x0.max(x1).max(x2),
                y0.max(y1).max(y2),
            )
            .intersect(self.clip_region(self.strategies.triangle));
            if bbox.is_empty() {
                return Ok(());
            }
            let mut attrs: SmallVec<[f32; 64]> = SmallVec::new();
            flatten_vertex(&mut attrs, v0);
            flatten_vertex(&mut attrs, v1);
            flatten_vertex(&mut attrs, v2);
            match self.bin_primitive(Cmd::Triangle, bbox, &attrs) {
                Ok(()) => return Ok(()),
                Err(SceneFull) if attempt == 0 => {
                    attempt += 1;
                    self.flush_and_restart("out of memory")?;
                }
                Err(SceneFull) => {
                    log::error!("triangle exceeds scene capacity");
                    return Err(Error::SceneCapacity { context: "triangle" });
                }
            }
        }
    }

    /// Try to draw a screen-aligned rectangle given the six vertices of its
    /// two triangles. Returns `Ok(false)` without consuming anything when
    /// the fast path does not apply (positions are not an axis-aligned
    /// rectangle, or multisampling is on); the caller then decomposes into
    /// triangles.
    pub fn draw_rect(&mut self, v: [&[[f32; 4]]; 6]) -> Result<bool, Error> {
        for vertex in &v {
            debug_assert_eq!(vertex.len(), self.vertex_layout.num_attrs);
        }
        if self.rasterizer.multisample {
            return Ok(false);
        }
        let Some(rect) = axis_aligned_rect(&v) else {
            return Ok(false);
        };
        self.ensure_strategies();
        if self.strategies.rect == Strategy::Discard {
            return Ok(true);
        }
        let mut attempt = 0;
        loop {
            self.prepare_draw()?;
            let bbox = snap_bbox(rect.0, rect.1, rect.2, rect.3)
                .intersect(self.clip_region(self.strategies.rect));
            if bbox.is_empty() {
                return Ok(true);
            }
            let mut attrs: SmallVec<[f32; 128]> = SmallVec::new();
            for vertex in &v {
                flatten_vertex(&mut attrs, vertex);
            }
            let state = self.fs.stored;
            let result = {
                let Some(scene) = self.scene.as_mut() else {
                    return Err(Error::SceneCapacity { context: "rect" });
                };
                scene
                    .alloc_bytes(bytemuck::cast_slice(&attrs), 4)
                    .and_then(|verts| {
                        let cmd = Cmd::Rect(CmdRect {
                            state,
                            verts,
                            rect: bbox,
                        });
                        scene.bin_box(
                            bbox.x0 as u32 >> TILE_ORDER,
                            bbox.y0 as u32 >> TILE_ORDER,
                            bbox.x1 as u32 >> TILE_ORDER,
                            bbox.y1 as u32 >> TILE_ORDER,
                            cmd,
                        )
                    })
            };
            match result {
                Ok(()) => return Ok(true),
                Err(SceneFull) if attempt == 0 => {
                    attempt += 1;
                    self.flush_and_restart("out of memory")?;
                }
                Err(SceneFull) => {
                    log::error!("rect exceeds scene capacity");
                    return Err(Error::SceneCapacity { context: "rect" });
                }
            }
        }
    }
}

fn flatten_vertex<A: smallvec::Array<Item = f32>>(out: &mut SmallVec<A>, v: &[[f32; 4]]) {
    for attr in v {
        out.extend_from_slice(attr);
    }
}

/// If the six positions are two triangles tiling an axis-aligned rectangle,
/// its float extent `(min_x, min_y, max_x, max_y)`.
fn axis_aligned_rect(v: &[&[[f32; 4]]; 6]) -> Option<(f32, f32, f32, f32)> {
    let (mut min_x, mut max_x) = (v[0][0][0], v[0][0][0]);
    let (mut min_y, mut max_y) = (v[0][0][1], v[0][0][1]);
    for vertex in &v[1..] {
        let (x, y) = (vertex[0][0], vertex[0][1]);
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }
    if min_x == max_x || min_y == max_y {
        return None;
    }
    // Every vertex must sit on a corner, and all four corners must appear.
    let mut corners = 0_u8;
    for vertex in v {
        let (x, y) = (vertex[0][0], vertex[0][1]);
        let on_x = if x == min_x {
            0
        } else if x == max_x {
            1
        } else {
            return None;
        };
        let on_y = if y == min_y {
            0
        } else if y == max_y {
            1
        } else {
            return None;
        };
        corners |= 1 << (on_y * 2 + on_x);
    }
    (corners == 0b1111).then_some((min_x, min_y, max_x, max_y))
}

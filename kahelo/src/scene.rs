// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scenes: per-tile command lists plus the arena that owns their operands.
//!
//! A scene is built by exactly one producer, sealed, and then read by any
//! number of rasterizer threads. Commands reference scene-owned data only:
//! inline values, arena [`Span`]s, or ids resolved through the scene's
//! retain lists. Every append is accounted against a single byte budget so
//! a scene's memory footprint is bounded no matter what is drawn into it.

use std::sync::Arc;

use smallvec::SmallVec;
use static_assertions::assert_impl_all;

use crate::arena::{Arena, SceneFull, Span};
use crate::fb::{Framebuffer, Rect};
use crate::fence::Fence;
use crate::format::PackedColor;
use crate::query::Query;
use crate::resource::{FragmentVariant, Resource, ResourceUse};
use crate::MAX_BINNED_QUERIES;

pub const TILE_ORDER: u32 = 6;
/// Tiles are 64x64 pixels.
pub const TILE_SIZE: u32 = 1 << TILE_ORDER;

/// Clear one color buffer to a packed value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CmdClearColor {
    pub cbuf: u32,
    pub value: PackedColor,
}

/// Clear depth/stencil through a packed value and writemask.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CmdClearZs {
    pub value: u64,
    pub mask: u64,
}

/// A binned point, line, or triangle: the stored fragment state it shades
/// with, its copied vertex attributes, and its device-space bounds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CmdPrimitive {
    pub state: Span,
    pub verts: Span,
    pub bbox: Rect,
}

/// An axis-aligned rectangle fast path.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CmdRect {
    pub state: Span,
    pub verts: Span,
    pub rect: Rect,
}

/// One entry in a tile's command list, executed in append order.
#[derive(Clone, Debug)]
pub enum Cmd {
    ClearColor(CmdClearColor),
    ClearZs(CmdClearZs),
    Point(CmdPrimitive),
    Line(CmdPrimitive),
    Triangle(CmdPrimitive),
    Rect(CmdRect),
    BeginQuery(Arc<Query>),
    EndQuery(Arc<Query>),
}

const CMD_COST: usize = core::mem::size_of::<Cmd>();

/// A batch of binned work for one framebuffer, with everything rasterizer
/// threads will dereference owned by the batch itself.
#[derive(Debug)]
pub struct Scene {
    id: u32,
    fb: Framebuffer,
    tiles_x: u32,
    tiles_y: u32,
    bins: Vec<Vec<Cmd>>,
    arena: Arena,
    cmd_bytes: usize,
    budget: usize,
    num_cmds: usize,
    fence: Option<Arc<Fence>>,
    resources: Vec<(Resource, ResourceUse)>,
    variants: Vec<Arc<FragmentVariant>>,
    queries: SmallVec<[Arc<Query>; MAX_BINNED_QUERIES]>,
    permit_linear: bool,
}

assert_impl_all!(Scene: Send, Sync);

impl Scene {
    pub(crate) fn new(id: u32, budget: usize) -> Self {
        Self {
            id,
            fb: Framebuffer::default(),
            tiles_x: 0,
            tiles_y: 0,
            bins: Vec::new(),
            arena: Arena::new(budget),
            cmd_bytes: 0,
            budget,
            num_cmds: 0,
            fence: None,
            resources: Vec::new(),
            variants: Vec::new(),
            queries: SmallVec::new(),
            permit_linear: false,
        }
    }

    /// Re-target an empty scene at a framebuffer, sizing the tile grid.
    pub(crate) fn begin_binning(&mut self, fb: &Framebuffer, permit_linear: bool) {
        debug_assert_eq!(self.num_cmds, 0);
        self.fb = fb.clone();
        self.tiles_x = fb.width.div_ceil(TILE_SIZE);
        self.tiles_y = fb.height.div_ceil(TILE_SIZE);
        let n = (self.tiles_x * self.tiles_y) as usize;
        if self.bins.len() < n {
            self.bins.resize_with(n, Vec::new);
        }
        self.permit_linear = permit_linear;
        log::debug!(
            "scene {}: begin binning {}x{} ({}x{} tiles)",
            self.id,
            fb.width,
            fb.height,
            self.tiles_x,
            self.tiles_y
        );
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.fb
    }

    /// Tile grid dimensions.
    pub fn tiles(&self) -> (u32, u32) {
        (self.tiles_x, self.tiles_y)
    }

    pub fn tile_count(&self) -> u32 {
        self.tiles_x * self.tiles_y
    }

    /// The commands binned into tile (x, y), in submission order.
    pub fn tile(&self, x: u32, y: u32) -> &[Cmd] {
        assert!(x < self.tiles_x && y < self.tiles_y);
        &self.bins[(y * self.tiles_x + x) as usize]
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn fence(&self) -> Option<&Arc<Fence>> {
        self.fence.as_ref()
    }

    pub(crate) fn set_fence(&mut self, fence: Arc<Fence>) {
        self.fence = Some(fence);
    }

    /// Whether the producer allowed the linear (non-binned) rasterizer for
    /// this scene's content.
    pub fn permit_linear_rasterizer(&self) -> bool {
        self.permit_linear
    }

    /// Queries that were active when the scene was sealed.
    pub fn queries(&self) -> &[Arc<Query>] {
        &self.queries
    }

    pub(crate) fn set_queries(&mut self, queries: SmallVec<[Arc<Query>; MAX_BINNED_QUERIES]>) {
        self.queries = queries;
    }

    /// Resources this scene's commands can reach, with their access modes.
    pub fn resources(&self) -> &[(Resource, ResourceUse)] {
        &self.resources
    }

    pub fn command_count(&self) -> usize {
        self.num_cmds
    }

    /// Bytes consumed so far, arena data plus command overhead.
    pub fn size(&self) -> usize {
        self.arena.used() + self.cmd_bytes
    }

    fn charge(&mut self, bytes: usize) -> Result<(), SceneFull> {
        if self.size() + bytes > self.budget {
            return Err(SceneFull);
        }
        self.cmd_bytes += bytes;
        Ok(())
    }

    /// Copy bytes into the scene arena, subject to the shared budget.
    pub(crate) fn alloc_bytes(&mut self, data: &[u8], align: usize) -> Result<Span, SceneFull> {
        if self.size() + data.len() + align > self.budget {
            return Err(SceneFull);
        }
        self.arena.alloc_bytes(data, align)
    }

    /// Store one plain-data record in the scene arena.
    pub(crate) fn alloc_pod<T: bytemuck::NoUninit>(&mut self, value: &T) -> Result<Span, SceneFull> {
        if self.size() + core::mem::size_of::<T>() + core::mem::align_of::<T>() > self.budget {
            return Err(SceneFull);
        }
        self.arena.alloc_pod(value)
    }

    /// Append a command to one tile's list.
    pub(crate) fn bin(&mut self, x: u32, y: u32, cmd: Cmd) -> Result<(), SceneFull> {
        debug_assert!(x < self.tiles_x && y < self.tiles_y);
        self.charge(CMD_COST)?;
        self.bins[(y * self.tiles_x + x) as usize].push(cmd);
        self.num_cmds += 1;
        Ok(())
    }

    /// Append a command to every tile covered by an inclusive tile-coord
    /// box. The budget for the whole box is charged up front, so the append
    /// either happens in all covered tiles or in none.
    pub(crate) fn bin_box(
        &mut self,
        tx0: u32,
        ty0: u32,
        tx1: u32,
        ty1: u32,
        cmd: Cmd,
    ) -> Result<(), SceneFull> {
        debug_assert!(tx1 < self.tiles_x && ty1 < self.tiles_y);
        let n = ((tx1 - tx0 + 1) * (ty1 - ty0 + 1)) as usize;
        self.charge(n * CMD_COST)?;
        for y in ty0..=ty1 {
            for x in tx0..=tx1 {
                self.bins[(y * self.tiles_x + x) as usize].push(cmd.clone());
            }
        }
        self.num_cmds += n;
        Ok(())
    }

    /// Append a command to every tile. A zero-tile scene accepts this as a
    /// no-op; screen-wide operations are still well formed against an empty
    /// framebuffer.
    pub(crate) fn bin_everywhere(&mut self, cmd: Cmd) -> Result<(), SceneFull> {
        if self.tile_count() == 0 {
            return Ok(());
        }
        self.bin_box(0, 0, self.tiles_x - 1, self.tiles_y - 1, cmd)
    }

    /// Retain a resource for the scene's lifetime, widening the recorded
    /// access if it is already retained.
    pub(crate) fn add_resource_reference(&mut self, resource: &Resource, access: ResourceUse) {
        for (retained, retained_access) in &mut self.resources {
            if retained.same(resource) {
                *retained_access |= access;
                return;
            }
        }
        self.resources.push((resource.clone(), access));
    }

    pub(crate) fn add_variant_reference(&mut self, variant: &Arc<FragmentVariant>) {
        if !self.variants.iter().any(|v| Arc::ptr_eq(v, variant)) {
            self.variants.push(variant.clone());
        }
    }

    /// How this scene touches `resource`: through its framebuffer
    /// attachments (read/write) or through its retain list.
    pub fn resource_usage(&self, resource: &Resource) -> ResourceUse {
        for slot in &self.fb.color {
            if let Some(attachment) = slot {
                if attachment.resource.same(resource) {
                    return ResourceUse::READ_WRITE;
                }
            }
        }
        if let Some(zs) = &self.fb.zs {
            if zs.resource.same(resource) {
                return ResourceUse::READ_WRITE;
            }
        }
        for (retained, access) in &self.resources {
            if retained.same(resource) {
                return *access;
            }
        }
        ResourceUse::NONE
    }

    /// Seal-time bookkeeping. After this the producer must not touch the
    /// scene again.
    pub(crate) fn end_binning(&mut self) {
        log::debug!(
            "scene {}: sealed with {} commands, {} bytes ({} arena)",
            self.id,
            self.num_cmds,
            self.size(),
            self.arena.used()
        );
    }

    /// Return the scene to its empty state, keeping allocations for reuse.
    pub(crate) fn reset(&mut self) {
        for bin in &mut self.bins {
            bin.clear();
        }
        self.arena.reset();
        self.cmd_bytes = 0;
        self.num_cmds = 0;
        self.fence = None;
        self.resources.clear();
        self.variants.clear();
        self.queries.clear();
        self.permit_linear = false;
        self.fb = Framebuffer::default();
        self.tiles_x = 0;
        self.tiles_y = 0;
    }
}

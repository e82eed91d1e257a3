// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The producer-side binning context and its setup state machine.
//!
//! A context cycles through three phases. `Flushed`: nothing owned, state
//! setters accumulate dirty bits. `Cleared`: clear requests are coalescing,
//! still no scene owned. `Active`: a scene is loaned from the pool and
//! commands are binning. Any transition that fails (scene capacity during
//! activation) unwinds to `Flushed` with the loan returned, so the machine
//! is never left holding a half-initialized scene.

use std::sync::Arc;

use smallvec::SmallVec;
use static_assertions::assert_impl_all;

use crate::clear::PendingClear;
use crate::fb::{Framebuffer, Rect};
use crate::fence::Fence;
use crate::pool::ScenePool;
use crate::primitive::Strategies;
use crate::query::Query;
use crate::queue::SceneQueue;
use crate::resource::{Resource, ResourceUse};
use crate::scene::{Cmd, CmdClearColor, CmdClearZs, Scene};
use crate::snapshot::{FsState, DIRTY_SCISSOR, DIRTY_VIEWPORTS};
use crate::state::{ConstantBuffer, RasterizerState, VertexLayout, Viewport};
use crate::{clear::ClearFlags, Error, MAX_BINNED_QUERIES, MAX_CONSTANT_BUFFERS, MAX_VIEWPORTS};

/// Engine configuration, fixed at context creation.
#[derive(Clone, Debug)]
pub struct BinningOptions {
    /// Upper bound on scenes existing at once (loaned, idle, or in
    /// flight). The producer blocks once every scene is in flight.
    pub max_scenes: usize,
    /// Byte budget per scene, covering stored state, copied vertex data,
    /// and command overhead.
    pub scene_size: usize,
    /// Rasterizer threads per scene; each signals the scene fence once.
    pub rasterizer_threads: usize,
}

impl Default for BinningOptions {
    fn default() -> Self {
        Self {
            max_scenes: 2,
            scene_size: 8 * 1024 * 1024,
            rasterizer_threads: 1,
        }
    }
}

/// Phase of the setup state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SetupState {
    /// No scene owned, no clears pending.
    Flushed,
    /// Clear requests are accumulating; a scene will be acquired lazily.
    Cleared,
    /// A scene is owned and binning is underway.
    Active,
}

/// The single-producer entry point: binds state, bins clears, primitives
/// and queries, and hands sealed scenes to the submission queue.
pub struct BinningContext {
    pub(crate) queue: Arc<SceneQueue>,
    pub(crate) pool: ScenePool,
    pub(crate) scene: Option<Box<Scene>>,
    pub(crate) state: SetupState,
    pub(crate) rasterizer_threads: usize,

    pub(crate) fb: Framebuffer,
    pub(crate) rasterizer: RasterizerState,
    pub(crate) rasterizer_discard: bool,
    pub(crate) permit_linear: bool,
    pub(crate) vertex_layout: VertexLayout,
    pub(crate) viewports: [Viewport; MAX_VIEWPORTS],
    pub(crate) viewport_rect: Rect,
    pub(crate) scissors: [Rect; MAX_VIEWPORTS],
    pub(crate) draw_regions: [Rect; MAX_VIEWPORTS],
    pub(crate) blend_color: [f32; 4],
    pub(crate) constants: [Option<ConstantBuffer>; MAX_CONSTANT_BUFFERS],
    pub(crate) fs: FsState,

    pub(crate) dirty: u32,
    pub(crate) pending_clear: PendingClear,
    pub(crate) strategies: Strategies,
    pub(crate) active_queries: SmallVec<[Arc<Query>; MAX_BINNED_QUERIES]>,
}

assert_impl_all!(BinningContext: Send);

impl BinningContext {
    pub fn new(options: BinningOptions, queue: Arc<SceneQueue>) -> Self {
        Self {
            queue,
            pool: ScenePool::new(options.max_scenes, options.scene_size),
            scene: None,
            state: SetupState::Flushed,
            rasterizer_threads: options.rasterizer_threads,
            fb: Framebuffer::default(),
            rasterizer: RasterizerState::default(),
            rasterizer_discard: false,
            permit_linear: false,
            vertex_layout: VertexLayout::default(),
            viewports: [Viewport::default(); MAX_VIEWPORTS],
            viewport_rect: Rect::EMPTY,
            scissors: [Rect::EMPTY; MAX_VIEWPORTS],
            draw_regions: [Rect::EMPTY; MAX_VIEWPORTS],
            blend_color: [0.0; 4],
            constants: Default::default(),
            fs: FsState::default(),
            dirty: !0,
            pending_clear: PendingClear::default(),
            strategies: Strategies::default(),
            active_queries: SmallVec::new(),
        }
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    /// Seal and submit any pending work. A no-op while flushed; pending
    /// clears alone still materialize into a (clear-only) scene.
    pub fn flush(&mut self, reason: &'static str) -> Result<(), Error> {
        self.set_scene_state(SetupState::Flushed, reason)
    }

    /// Submit the current scene and immediately continue on a fresh one.
    /// The recovery path for capacity failures mid-binning.
    pub fn flush_and_restart(&mut self, reason: &'static str) -> Result<(), Error> {
        debug_assert_eq!(self.state, SetupState::Active);
        self.set_scene_state(SetupState::Flushed, reason)?;
        self.set_scene_state(SetupState::Active, reason)
    }

    /// Drive the state machine. On error the context has unwound to
    /// `Flushed` with derived state reset and no scene owned.
    pub(crate) fn set_scene_state(
        &mut self,
        new_state: SetupState,
        reason: &'static str,
    ) -> Result<(), Error> {
        use SetupState::*;
        let old = self.state;
        if old == new_state {
            return Ok(());
        }
        log::debug!("setup state {old:?} -> {new_state:?} ({reason})");
        let result = match (old, new_state) {
            (Flushed, Cleared) => Ok(()),
            (Flushed, Active) | (Cleared, Active) => self.begin_binning(),
            (Active, Flushed) => {
                self.rasterize_scene();
                Ok(())
            }
            (Cleared, Flushed) => self.begin_binning().map(|()| self.rasterize_scene()),
            (Active, Cleared) | (Cleared, Cleared) | (Flushed, Flushed) | (Active, Active) => {
                unreachable!("invalid setup transition {old:?} -> {new_state:?}")
            }
        };
        match result {
            Ok(()) => {
                self.state = new_state;
                Ok(())
            }
            Err(e) => {
                log::error!("setup transition to {new_state:?} failed ({reason}): {e}");
                self.fail_unwind();
                Err(e)
            }
        }
    }

    /// Forced unwind after a failed transition: release the loan un-sealed
    /// and fall back to `Flushed`.
    fn fail_unwind(&mut self) {
        if let Some(scene) = self.scene.take() {
            self.pool.release(scene);
        }
        self.reset_derived();
        self.state = SetupState::Flushed;
    }

    /// Acquire and initialize a scene: tile grid, fence, replay of
    /// coalesced clears, and begin markers for still-active queries.
    fn begin_binning(&mut self) -> Result<(), Error> {
        debug_assert!(self.scene.is_none());
        let mut scene = self.pool.acquire();
        scene.begin_binning(&self.fb, self.permit_linear && !self.rasterizer.multisample);
        let fence = Arc::new(Fence::new(self.rasterizer_threads as u32));
        log::trace!("scene {}: fence {}", scene.id(), fence.id());
        scene.set_fence(fence);
        self.scene = Some(scene);
        self.replay_pending()?;
        self.pending_clear.reset();
        Ok(())
    }

    /// Bin the accumulated clears (colors in buffer order, then
    /// depth-stencil) and re-open active queries on the new scene. These
    /// land on a guaranteed-empty scene, so failure is terminal.
    fn replay_pending(&mut self) -> Result<(), Error> {
        let Some(scene) = self.scene.as_mut() else {
            return Ok(());
        };
        let pending = &self.pending_clear;
        for cbuf in 0..self.fb.color.len() {
            if !pending.flags.contains(ClearFlags::color(cbuf))
                || self.fb.color_attachment(cbuf).is_none()
            {
                continue;
            }
            scene
                .bin_everywhere(Cmd::ClearColor(CmdClearColor {
                    cbuf: cbuf as u32,
                    value: pending.colors[cbuf],
                }))
                .map_err(|_| Error::SceneCapacity {
                    context: "clear replay",
                })?;
        }
        if self.fb.zs.is_some() && pending.flags.intersects(ClearFlags::DEPTH_STENCIL) {
            scene
                .bin_everywhere(Cmd::ClearZs(CmdClearZs {
                    value: pending.zs_value,
                    mask: pending.zs_mask,
                }))
                .map_err(|_| Error::SceneCapacity {
                    context: "clear replay",
                })?;
        }
        for query in &self.active_queries {
            scene
                .bin_everywhere(Cmd::BeginQuery(query.clone()))
                .map_err(|_| Error::SceneCapacity {
                    context: "query replay",
                })?;
        }
        Ok(())
    }

    /// Seal the owned scene and hand it to the consumer side.
    fn rasterize_scene(&mut self) {
        let Some(mut scene) = self.scene.take() else {
            debug_assert!(false, "rasterize without a scene");
            return;
        };
        scene.set_queries(self.active_queries.clone());
        scene.end_binning();
        let scene: Arc<Scene> = Arc::from(scene);
        self.pool.deposit(scene.clone());
        self.queue.submit(scene);
        self.reset_derived();
    }

    /// Reset everything derived from the departed scene. Bound producer
    /// state survives; stored spans, dirty bits, coalesced clears and
    /// cached strategies do not.
    pub(crate) fn reset_derived(&mut self) {
        self.dirty = !0;
        self.fs.reset_stored();
        self.pending_clear.reset();
        self.strategies.unbind();
    }

    /// Bind the render targets. Any pending work against the previous
    /// framebuffer is flushed first.
    pub fn bind_framebuffer(&mut self, fb: Framebuffer) -> Result<(), Error> {
        fb.validate();
        self.flush("framebuffer change")?;
        self.fb = fb;
        self.dirty |= DIRTY_SCISSOR;
        Ok(())
    }

    /// Bind rasterizer state. Unbinds the cached primitive strategies; the
    /// next draw re-resolves them.
    pub fn bind_rasterizer_state(&mut self, rasterizer: RasterizerState) {
        if rasterizer.scissor_test != self.rasterizer.scissor_test {
            self.dirty |= DIRTY_SCISSOR;
        }
        if rasterizer.clip_halfz != self.rasterizer.clip_halfz {
            self.dirty |= DIRTY_VIEWPORTS;
        }
        self.rasterizer = rasterizer;
        self.strategies.unbind();
    }

    /// Toggle rasterizer discard: draws are consumed but nothing is
    /// binned.
    pub fn set_rasterizer_discard(&mut self, discard: bool) {
        if self.rasterizer_discard != discard {
            self.rasterizer_discard = discard;
            self.strategies.unbind();
        }
    }

    /// Declare the attribute-vector shape of subsequent draws.
    pub fn set_vertex_layout(&mut self, layout: VertexLayout) {
        debug_assert!(layout.num_attrs >= 1);
        self.vertex_layout = layout;
        self.strategies.unbind();
    }

    /// Allow or forbid the linear (non-binned) rasterizer downstream.
    /// Affects draw regions and scene metadata only.
    pub fn set_linear_mode(&mut self, permit: bool) {
        if self.permit_linear != permit {
            self.permit_linear = permit;
            self.dirty |= DIRTY_SCISSOR;
            self.strategies.unbind();
        }
    }

    /// Whether any pending work references `resource`: the bound
    /// framebuffer, the scene being built, or any scene still in flight.
    pub fn is_resource_referenced(&self, resource: &Resource) -> ResourceUse {
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
        let mut usage = ResourceUse::NONE;
        if let Some(scene) = &self.scene {
            usage |= scene.resource_usage(resource);
        }
        for scene in self.pool.in_flight() {
            usage |= scene.resource_usage(resource);
            if usage == ResourceUse::READ_WRITE {
                break;
            }
        }
        usage
    }

    /// Currently active binned queries.
    pub fn active_query_count(&self) -> usize {
        self.active_queries.len()
    }
}

impl Drop for BinningContext {
    /// Teardown blocks until every in-flight scene has signalled, so scene
    /// and resource memory is never freed under a running consumer. An
    /// unflushed scene is abandoned, not submitted.
    fn drop(&mut self) {
        // A panicking test would deadlock here waiting on fences nobody
        // will signal.
        if std::thread::panicking() {
            return;
        }
        if let Some(scene) = self.scene.take() {
            log::debug!("dropping unflushed scene {}", scene.id());
            self.pool.release(scene);
        }
        self.pool.wait_all();
    }
}

/// A one-attachment framebuffer for unit tests across the crate.
#[cfg(test)]
pub(crate) fn test_fb(width: u32, height: u32) -> Framebuffer {
    use crate::fb::ColorAttachment;
    use crate::format::ColorFormat;
    use crate::resource::TextureTarget;
    let mut fb = Framebuffer::new(width, height);
    fb.color.push(Some(ColorAttachment {
        format: ColorFormat::Rgba8Unorm,
        resource: Resource::texture(TextureTarget::Tex2d, width, height, 1, 4, 0),
    }));
    fb
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with_queue() -> (BinningContext, Arc<SceneQueue>) {
        let queue = Arc::new(SceneQueue::new());
        let ctx = BinningContext::new(BinningOptions::default(), queue.clone());
        (ctx, queue)
    }

    #[test]
    fn flush_while_flushed_submits_nothing() {
        let (mut ctx, queue) = context_with_queue();
        ctx.flush("idle").unwrap();
        assert_eq!(ctx.state(), SetupState::Flushed);
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_then_flush_materializes_one_scene() {
        let (mut ctx, queue) = context_with_queue();
        ctx.bind_framebuffer(test_fb(128, 128)).unwrap();
        ctx.clear([1.0, 0.0, 0.0, 1.0], 0.0, 0, ClearFlags::color(0))
            .unwrap();
        assert_eq!(ctx.state(), SetupState::Cleared);
        assert!(queue.is_empty());
        ctx.flush("frame end").unwrap();
        assert_eq!(ctx.state(), SetupState::Flushed);
        assert_eq!(queue.len(), 1);
        let scene = queue.try_take().unwrap();
        assert_eq!(scene.tile(0, 0).len(), 1);
        scene.fence().unwrap().signal();
    }

    #[test]
    fn framebuffer_bind_flushes_pending_clears() {
        let (mut ctx, queue) = context_with_queue();
        ctx.bind_framebuffer(test_fb(64, 64)).unwrap();
        ctx.clear([0.0; 4], 0.0, 0, ClearFlags::color(0)).unwrap();
        ctx.bind_framebuffer(test_fb(128, 128)).unwrap();
        assert_eq!(queue.len(), 1);
        let scene = queue.try_take().unwrap();
        assert_eq!(scene.framebuffer().width, 64);
        scene.fence().unwrap().signal();
    }

    #[test]
    fn bound_framebuffer_reports_references() {
        let (mut ctx, _queue) = context_with_queue();
        let fb = test_fb(64, 64);
        let target = fb.color_attachment(0).unwrap().resource.clone();
        ctx.bind_framebuffer(fb).unwrap();
        assert_eq!(ctx.is_resource_referenced(&target), ResourceUse::READ_WRITE);
        let unrelated = Resource::buffer(vec![0; 4]);
        assert!(ctx.is_resource_referenced(&unrelated).is_none());
    }
}

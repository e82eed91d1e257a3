// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A tile-binning scene engine for deferred CPU rasterization.
//!
//! Kahelo sits between an immediate-mode front-end and a pool of rasterizer
//! threads. The front-end binds state, issues clears and primitives, and
//! flushes; the engine snapshots mutable state into immutable per-scene
//! records, sorts work into per-tile command lists, and hands sealed scenes
//! to consumers over a submission queue. A bounded scene pool recycles the
//! large tile/arena allocations, blocking the producer when every scene is
//! still in flight.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use kahelo::{BinningContext, BinningOptions, SceneQueue};
//! use kahelo::clear::ClearFlags;
//! use kahelo::fb::{ColorAttachment, Framebuffer};
//! use kahelo::format::ColorFormat;
//! use kahelo::resource::{Resource, TextureTarget};
//!
//! # fn main() -> Result<(), kahelo::Error> {
//! let queue = Arc::new(SceneQueue::new());
//! let mut ctx = BinningContext::new(BinningOptions::default(), queue.clone());
//!
//! let mut fb = Framebuffer::new(256, 256);
//! fb.color.push(Some(ColorAttachment {
//!     format: ColorFormat::Rgba8Unorm,
//!     resource: Resource::texture(TextureTarget::Tex2d, 256, 256, 1, 4, 0),
//! }));
//! ctx.bind_framebuffer(fb)?;
//! ctx.clear([0.0; 4], 1.0, 0, ClearFlags::color(0))?;
//! ctx.flush("frame end")?;
//!
//! // A rasterizer thread would drain the queue; here we run it inline.
//! while let Some(scene) = queue.try_take() {
//!     for y in 0..scene.tiles().1 {
//!         for x in 0..scene.tiles().0 {
//!             let _cmds = scene.tile(x, y);
//!         }
//!     }
//!     if let Some(fence) = scene.fence() {
//!         fence.signal();
//!     }
//! }
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

use thiserror::Error;

pub mod arena;
pub mod clear;
pub mod context;
pub mod fb;
pub mod fence;
pub mod format;
mod pool;
mod primitive;
pub mod query;
pub mod queue;
pub mod resource;
pub mod scene;
mod snapshot;
pub mod state;

pub use context::{BinningContext, BinningOptions, SetupState};
pub use fence::Fence;
pub use queue::SceneQueue;
pub use scene::Scene;

/// Maximum simultaneously bound color attachments.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;
/// Maximum mip levels a texture descriptor carries.
pub const MAX_TEXTURE_LEVELS: usize = 14;
/// Maximum bound sampler views per fragment stage.
pub const MAX_SAMPLER_VIEWS: usize = 16;
/// Maximum bound samplers per fragment stage.
pub const MAX_SAMPLERS: usize = 16;
/// Maximum bound shader images per fragment stage.
pub const MAX_SHADER_IMAGES: usize = 16;
/// Maximum bound shader buffers per fragment stage.
pub const MAX_SHADER_BUFFERS: usize = 16;
/// Maximum constant-buffer slots per fragment stage.
pub const MAX_CONSTANT_BUFFERS: usize = 16;
/// Byte cap applied to each constant buffer when it is copied into a scene.
pub const MAX_CONSTANT_BUFFER_SIZE: usize = 64 * 1024;
/// Maximum viewports, and with them scissors and draw regions.
pub const MAX_VIEWPORTS: usize = 16;
/// Maximum simultaneously active binned queries.
pub const MAX_BINNED_QUERIES: usize = 16;

/// Errors surfaced to the producer.
///
/// Capacity pressure is normally absorbed internally by flushing the current
/// scene and retrying once on an empty one; only requests that cannot fit in
/// an empty scene at all end up here.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A single state capture or command exceeded the whole scene budget.
    /// The engine has unwound to the flushed state (or stayed on a valid
    /// empty scene); previously submitted work is unaffected.
    #[error("request exceeds scene capacity ({context})")]
    SceneCapacity {
        /// Which operation overflowed.
        context: &'static str,
    },
}

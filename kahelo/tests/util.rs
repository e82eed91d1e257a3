// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Utility functions shared across different tests.

use std::sync::Arc;

use kahelo::fb::{ColorAttachment, DepthStencilAttachment, Framebuffer};
use kahelo::format::{ColorFormat, ZsFormat};
use kahelo::resource::{Resource, TextureTarget};
use kahelo::{BinningContext, BinningOptions, Error, Scene, SceneQueue};

/// A framebuffer with one `Rgba8Unorm` color attachment.
pub(crate) fn color_fb(width: u32, height: u32) -> Framebuffer {
    let mut fb = Framebuffer::new(width, height);
    fb.color.push(Some(ColorAttachment {
        format: ColorFormat::Rgba8Unorm,
        resource: Resource::texture(TextureTarget::Tex2d, width, height, 1, 4, 0),
    }));
    fb
}

/// [`color_fb`] plus a depth-stencil attachment in the given format.
pub(crate) fn zs_fb(width: u32, height: u32, format: ZsFormat) -> Framebuffer {
    let mut fb = color_fb(width, height);
    fb.zs = Some(DepthStencilAttachment {
        format,
        resource: Resource::texture(
            TextureTarget::Tex2d,
            width,
            height,
            1,
            format.bytes_per_pixel() as u32,
            0,
        ),
    });
    fb
}

/// A context bound to a one-attachment framebuffer, with the queue its
/// scenes land on.
pub(crate) fn get_ctx(width: u32, height: u32) -> (BinningContext, Arc<SceneQueue>) {
    get_ctx_with(BinningOptions::default(), color_fb(width, height))
}

pub(crate) fn get_ctx_with(
    options: BinningOptions,
    fb: Framebuffer,
) -> (BinningContext, Arc<SceneQueue>) {
    let queue = Arc::new(SceneQueue::new());
    let mut ctx = BinningContext::new(options, queue.clone());
    ctx.bind_framebuffer(fb).unwrap();
    (ctx, queue)
}

/// Take every submitted scene and signal its fence, standing in for the
/// rasterizer threads.
pub(crate) fn drain(queue: &SceneQueue) -> Vec<Arc<Scene>> {
    let mut scenes = Vec::new();
    while let Some(scene) = queue.try_take() {
        if let Some(fence) = scene.fence() {
            for _ in 0..fence.rank() {
                fence.signal();
            }
        }
        scenes.push(scene);
    }
    scenes
}

/// One single-attribute vertex at a window position.
pub(crate) fn vert(x: f32, y: f32) -> [[f32; 4]; 1] {
    [[x, y, 0.0, 1.0]]
}

/// The six vertices of an axis-aligned quad, as two triangles.
pub(crate) fn quad(x0: f32, y0: f32, x1: f32, y1: f32) -> [[[f32; 4]; 1]; 6] {
    [
        vert(x0, y0),
        vert(x1, y0),
        vert(x1, y1),
        vert(x0, y0),
        vert(x1, y1),
        vert(x0, y1),
    ]
}

pub(crate) fn draw_tri(
    ctx: &mut BinningContext,
    a: (f32, f32),
    b: (f32, f32),
    c: (f32, f32),
) -> Result<(), Error> {
    ctx.draw_triangle(&vert(a.0, a.1), &vert(b.0, b.1), &vert(c.0, c.1))
}

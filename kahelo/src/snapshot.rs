// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The state snapshot store.
//!
//! Binds land in [`BinningContext`] fields and raise dirty bits; nothing is
//! copied until a primitive is about to bin. At that point
//! `update_stored_state` captures each dirty category into the scene arena
//! and rebuilds the [`FragmentInputs`] record. The record itself is stored
//! only when its bytes differ from the last store, so a run of primitives
//! drawn under identical state shares a single arena copy.
//!
//! Capture order matters: viewports, blend color, constants and shader
//! buffers feed spans into the fragment record, so those categories run
//! before the record compare, and the scissor-derived draw regions (which
//! live outside the record) run after it.

use std::sync::Arc;

use crate::arena::{SceneFull, Span};
use crate::context::{BinningContext, SetupState};
use crate::format::unorm;
use crate::resource::{minify, FragmentVariant, Resource, ResourceUse, TextureTarget};
use crate::state::{
    viewport_depth_range, viewport_rect, BlendColorRecord, ConstantBuffer, ConstantSlot,
    ConstantSource, DepthRange, FragmentInputs, ImageDesc, ImageView, SamplerDesc, SamplerState,
    SamplerView, Scissor, ShaderBuffer, SsboSlot, TextureDesc, ViewKind, Viewport,
};
use crate::{
    MAX_CONSTANT_BUFFERS, MAX_CONSTANT_BUFFER_SIZE, MAX_SAMPLERS, MAX_SAMPLER_VIEWS,
    MAX_SHADER_BUFFERS, MAX_SHADER_IMAGES, MAX_VIEWPORTS,
};

pub(crate) const DIRTY_FS: u32 = 1 << 0;
pub(crate) const DIRTY_CONSTANTS: u32 = 1 << 1;
pub(crate) const DIRTY_SSBOS: u32 = 1 << 2;
pub(crate) const DIRTY_BLEND_COLOR: u32 = 1 << 3;
pub(crate) const DIRTY_VIEWPORTS: u32 = 1 << 4;
pub(crate) const DIRTY_SCISSOR: u32 = 1 << 5;

/// Fragment-stage state on the producer side: the record being assembled,
/// the handles that keep its resource ids meaningful, and the span of its
/// last arena store.
#[derive(Default)]
pub(crate) struct FsState {
    pub current: FragmentInputs,
    pub variant: Option<Arc<FragmentVariant>>,
    pub textures: [Option<Resource>; MAX_SAMPLER_VIEWS],
    pub images: [Option<Resource>; MAX_SHADER_IMAGES],
    pub ssbos: [Option<ShaderBuffer>; MAX_SHADER_BUFFERS],
    pub ssbo_write_mask: u32,
    pub stored: Span,
    pub stored_valid: bool,
}

impl FsState {
    /// Forget everything that points into a departed scene's arena. Bound
    /// handles survive; spans do not.
    pub fn reset_stored(&mut self) {
        self.stored = Span::EMPTY;
        self.stored_valid = false;
        self.current.blend_color = Span::EMPTY;
        self.current.viewports = Span::EMPTY;
        for slot in &mut self.current.constants {
            *slot = ConstantSlot::default();
        }
    }
}

impl BinningContext {
    /// Bind the fragment-shader variant subsequent primitives shade with.
    pub fn set_fs_variant(&mut self, variant: Arc<FragmentVariant>) {
        self.fs.current.variant = variant.id();
        self.fs.variant = Some(variant);
        self.dirty |= DIRTY_FS;
    }

    /// Bind the fragment constant-buffer slots. Slots beyond `buffers` are
    /// cleared. Data is copied into the scene at capture time, so the caller
    /// may reuse or drop the sources immediately.
    pub fn set_fs_constants(&mut self, buffers: &[Option<ConstantBuffer>]) {
        debug_assert!(buffers.len() <= MAX_CONSTANT_BUFFERS);
        for (i, slot) in self.constants.iter_mut().enumerate() {
            *slot = buffers.get(i).cloned().flatten();
        }
        self.dirty |= DIRTY_CONSTANTS;
    }

    /// Bind the fragment shader-buffer slots. Bit `i` of `write_mask` marks
    /// slot `i` writable, which widens the scene's recorded access.
    pub fn set_fs_ssbos(&mut self, buffers: &[Option<ShaderBuffer>], write_mask: u32) {
        debug_assert!(buffers.len() <= MAX_SHADER_BUFFERS);
        for (i, slot) in self.fs.ssbos.iter_mut().enumerate() {
            *slot = buffers.get(i).cloned().flatten();
        }
        self.fs.ssbo_write_mask = write_mask;
        self.dirty |= DIRTY_SSBOS;
    }

    /// Bind fragment shader images. Each descriptor is built here, against
    /// the resource's layout at bind time.
    pub fn set_fs_images(&mut self, images: &[Option<ImageView>]) {
        debug_assert!(images.len() <= MAX_SHADER_IMAGES);
        for i in 0..MAX_SHADER_IMAGES {
            let view = images.get(i).and_then(Option::as_ref);
            let Some(view) = view else {
                self.fs.current.images[i] = ImageDesc::default();
                self.fs.images[i] = None;
                continue;
            };
            self.fs.current.images[i] = build_image_desc(view);
            self.fs.images[i] = Some(view.resource.clone());
        }
        self.dirty |= DIRTY_FS;
    }

    /// Bind fragment sampler views. Per-level offsets and strides are copied
    /// out of the resource layout here, with the view's layer window folded
    /// into the level offsets.
    pub fn set_fragment_sampler_views(&mut self, views: &[Option<SamplerView>]) {
        debug_assert!(views.len() <= MAX_SAMPLER_VIEWS);
        for i in 0..MAX_SAMPLER_VIEWS {
            let view = views.get(i).and_then(Option::as_ref);
            let Some(view) = view else {
                self.fs.current.textures[i] = TextureDesc::default();
                self.fs.textures[i] = None;
                continue;
            };
            self.fs.current.textures[i] = build_texture_desc(view);
            self.fs.textures[i] = Some(view.resource.clone());
        }
        self.dirty |= DIRTY_FS;
    }

    /// Bind fragment sampler filtering state.
    pub fn set_fragment_sampler_state(&mut self, samplers: &[Option<SamplerState>]) {
        debug_assert!(samplers.len() <= MAX_SAMPLERS);
        for i in 0..MAX_SAMPLERS {
            let state = samplers.get(i).and_then(Option::as_ref);
            self.fs.current.samplers[i] = match state {
                Some(s) => SamplerDesc {
                    min_lod: s.min_lod,
                    max_lod: s.max_lod,
                    lod_bias: s.lod_bias,
                    max_anisotropy: s.max_anisotropy,
                    border_color: s.border_color,
                },
                None => SamplerDesc::default(),
            };
        }
        self.dirty |= DIRTY_FS;
    }

    pub fn set_blend_color(&mut self, color: [f32; 4]) {
        if self.blend_color != color {
            self.blend_color = color;
            self.dirty |= DIRTY_BLEND_COLOR;
        }
    }

    pub fn set_alpha_ref_value(&mut self, alpha_ref: f32) {
        if self.fs.current.alpha_ref != alpha_ref {
            self.fs.current.alpha_ref = alpha_ref;
            self.dirty |= DIRTY_FS;
        }
    }

    /// Front and back stencil reference values.
    pub fn set_stencil_ref_values(&mut self, refs: [u8; 2]) {
        let refs = [u32::from(refs[0]), u32::from(refs[1])];
        if self.fs.current.stencil_refs != refs {
            self.fs.current.stencil_refs = refs;
            self.dirty |= DIRTY_FS;
        }
    }

    pub fn set_sample_mask(&mut self, sample_mask: u32) {
        if self.fs.current.sample_mask != sample_mask {
            self.fs.current.sample_mask = sample_mask;
            self.dirty |= DIRTY_FS;
        }
    }

    /// Bind viewport transforms. Viewport zero also drives the screen rect
    /// the linear-path draw regions are clipped to.
    pub fn set_viewports(&mut self, viewports: &[Viewport]) {
        debug_assert!(!viewports.is_empty() && viewports.len() <= MAX_VIEWPORTS);
        for (slot, vp) in self.viewports.iter_mut().zip(viewports) {
            *slot = *vp;
        }
        self.viewport_rect = viewport_rect(&self.viewports[0]);
        self.dirty |= DIRTY_VIEWPORTS | DIRTY_SCISSOR;
    }

    /// Bind scissor boxes, one per viewport slot.
    pub fn set_scissors(&mut self, scissors: &[Scissor]) {
        debug_assert!(scissors.len() <= MAX_VIEWPORTS);
        for (slot, scissor) in self.scissors.iter_mut().zip(scissors) {
            *slot = scissor.to_rect();
        }
        self.dirty |= DIRTY_SCISSOR;
    }

    /// Capture every dirty state category into the active scene.
    ///
    /// On success all dirty bits are clear, `fs.stored` names a record the
    /// rasterizer can shade from, and the draw regions are current. On
    /// failure the scene is full but untouched state remains dirty, so the
    /// caller can flush, restart, and call this again.
    pub(crate) fn update_stored_state(&mut self) -> Result<(), SceneFull> {
        debug_assert_eq!(self.state, SetupState::Active);
        let Some(scene) = self.scene.as_mut() else {
            return Err(SceneFull);
        };

        if self.dirty & DIRTY_VIEWPORTS != 0 {
            let mut ranges = [DepthRange::default(); MAX_VIEWPORTS];
            for (range, vp) in ranges.iter_mut().zip(&self.viewports) {
                *range = viewport_depth_range(vp, self.rasterizer.clip_halfz);
            }
            let span = scene.alloc_pod(&ranges)?;
            self.fs.current.viewports = span;
            self.dirty |= DIRTY_FS;
        }

        if self.dirty & DIRTY_BLEND_COLOR != 0 {
            let mut record = BlendColorRecord {
                smear: [0; 64],
                floats: self.blend_color,
            };
            for (chan, value) in self.blend_color.iter().enumerate() {
                let byte = unorm(*value, 0xff) as u8;
                record.smear[chan * 16..(chan + 1) * 16].fill(byte);
            }
            let span = scene.alloc_pod(&record)?;
            self.fs.current.blend_color = span;
            self.dirty |= DIRTY_FS;
        }

        if self.dirty & DIRTY_CONSTANTS != 0 {
            for i in 0..MAX_CONSTANT_BUFFERS {
                let data: &[u8] = match &self.constants[i] {
                    Some(cb) => {
                        let raw: &[u8] = match &cb.source {
                            ConstantSource::Resource(res) => res.data(),
                            ConstantSource::User(bytes) => bytes,
                        };
                        let offset = (cb.offset as usize).min(raw.len());
                        let len = (cb.size as usize)
                            .min(raw.len() - offset)
                            .min(MAX_CONSTANT_BUFFER_SIZE);
                        &raw[offset..offset + len]
                    }
                    None => &[],
                };
                let old = self.fs.current.constants[i].data;
                let unchanged = old.len as usize == data.len()
                    && (data.is_empty() || scene.arena().bytes(old) == data);
                if unchanged {
                    continue;
                }
                let span = scene.alloc_bytes(data, 16)?;
                self.fs.current.constants[i] = ConstantSlot {
                    data: span,
                    num_elements: (data.len() / 16) as u32,
                    _pad: 0,
                };
                self.dirty |= DIRTY_FS;
            }
        }

        if self.dirty & DIRTY_SSBOS != 0 {
            for i in 0..MAX_SHADER_BUFFERS {
                let writable = self.fs.ssbo_write_mask & (1 << i) != 0;
                self.fs.current.ssbos[i] = match &self.fs.ssbos[i] {
                    Some(sb) => {
                        let total = sb.buffer.size() as u32;
                        let offset = sb.offset.min(total);
                        SsboSlot {
                            buffer: sb.buffer.id(),
                            offset,
                            len: sb.size.min(total - offset),
                            writable: u32::from(writable),
                        }
                    }
                    None => SsboSlot::default(),
                };
            }
            self.dirty |= DIRTY_FS;
        }

        if self.dirty & DIRTY_FS != 0 || !self.fs.stored_valid {
            let bytes = bytemuck::bytes_of(&self.fs.current);
            let unchanged = self.fs.stored_valid && scene.arena().bytes(self.fs.stored) == bytes;
            if !unchanged {
                let span = scene.alloc_pod(&self.fs.current)?;
                log::trace!("scene {}: stored fragment state at {}", scene.id(), span.offset);
                self.fs.stored = span;
                self.fs.stored_valid = true;
                if let Some(variant) = &self.fs.variant {
                    scene.add_variant_reference(variant);
                }
                for handle in self.fs.textures.iter().flatten() {
                    scene.add_resource_reference(handle, ResourceUse::READ);
                }
                for (handle, desc) in self.fs.images.iter().zip(&self.fs.current.images) {
                    if let Some(res) = handle {
                        let access = if desc.writable != 0 {
                            ResourceUse::READ_WRITE
                        } else {
                            ResourceUse::READ
                        };
                        scene.add_resource_reference(res, access);
                    }
                }
                for (slot, desc) in self.fs.ssbos.iter().zip(&self.fs.current.ssbos) {
                    if let Some(sb) = slot {
                        let access = if desc.writable != 0 {
                            ResourceUse::READ_WRITE
                        } else {
                            ResourceUse::READ
                        };
                        scene.add_resource_reference(&sb.buffer, access);
                    }
                }
            }
        }

        if self.dirty & DIRTY_SCISSOR != 0 {
            let fb_rect = self.fb.rect();
            for i in 0..MAX_VIEWPORTS {
                let mut region = fb_rect;
                if self.rasterizer.scissor_test {
                    region = region.intersect(self.scissors[i]);
                }
                self.draw_regions[i] = region;
            }
            // The linear path reads region zero and must stay inside the
            // viewport.
            if self.permit_linear {
                self.draw_regions[0] = self.draw_regions[0].intersect(self.viewport_rect);
            }
        }

        self.dirty = 0;
        Ok(())
    }
}

/// Build the shader-visible descriptor for one sampler view.
fn build_texture_desc(view: &SamplerView) -> TextureDesc {
    let mut desc = TextureDesc {
        base: view.resource.id(),
        num_samples: 1,
        ..TextureDesc::default()
    };
    match (&view.kind, view.resource.layout()) {
        (
            ViewKind::Texture {
                first_level,
                last_level,
                first_layer,
                last_layer,
            },
            Some(layout),
        ) => {
            let first_level = (*first_level).min(layout.last_level);
            let last_level = (*last_level).clamp(first_level, layout.last_level);
            desc.width = layout.width;
            desc.height = layout.height;
            desc.depth = if layout.target.is_layered() {
                last_layer.saturating_sub(*first_layer) + 1
            } else {
                layout.depth
            };
            desc.first_level = first_level;
            desc.last_level = last_level;
            for level in first_level..=last_level {
                let l = level as usize;
                let mut offset = layout.mip_offsets[l];
                if layout.target.is_layered() {
                    offset += first_layer * layout.img_stride[l];
                }
                desc.mip_offsets[l] = offset;
                desc.row_stride[l] = layout.row_stride[l];
                desc.img_stride[l] = layout.img_stride[l];
            }
        }
        (ViewKind::Buffer { .. }, _) | (ViewKind::Texture { .. }, None) => {
            // A buffer (or a texture view applied to one): width is the
            // byte window.
            let total = view.resource.size() as u32;
            let (offset, size) = match &view.kind {
                ViewKind::Buffer { offset, size } => (*offset, *size),
                ViewKind::Texture { .. } => (0, total),
            };
            let offset = offset.min(total);
            desc.base_offset = offset;
            desc.width = size.min(total - offset);
            desc.height = 1;
            desc.depth = 1;
        }
    }
    desc
}

/// Build the shader-visible descriptor for one image binding, which windows
/// a single level and layer range.
fn build_image_desc(view: &ImageView) -> ImageDesc {
    let mut desc = ImageDesc {
        base: view.resource.id(),
        num_samples: 1,
        writable: u32::from(view.writable),
        ..ImageDesc::default()
    };
    match (&view.kind, view.resource.layout()) {
        (
            ViewKind::Texture {
                first_level,
                first_layer,
                last_layer,
                ..
            },
            Some(layout),
        ) => {
            let level = (*first_level).min(layout.last_level);
            let l = level as usize;
            desc.width = minify(layout.width, level);
            desc.height = minify(layout.height, level);
            desc.depth = if layout.target.is_layered() {
                last_layer.saturating_sub(*first_layer) + 1
            } else if layout.target == TextureTarget::Tex3d {
                minify(layout.depth, level)
            } else {
                1
            };
            desc.base_offset = layout.mip_offsets[l]
                + if layout.target.is_layered() {
                    first_layer * layout.img_stride[l]
                } else {
                    0
                };
            desc.row_stride = layout.row_stride[l];
            desc.img_stride = layout.img_stride[l];
        }
        (ViewKind::Buffer { .. }, _) | (ViewKind::Texture { .. }, None) => {
            let total = view.resource.size() as u32;
            let (offset, size) = match &view.kind {
                ViewKind::Buffer { offset, size } => (*offset, *size),
                ViewKind::Texture { .. } => (0, total),
            };
            let offset = offset.min(total);
            desc.base_offset = offset;
            desc.width = size.min(total - offset);
            desc.height = 1;
            desc.depth = 1;
        }
    }
    desc
}

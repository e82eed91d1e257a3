// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Producer-side pipeline state and the plain-data descriptor records the
//! snapshot store copies into scenes.
//!
//! Everything a fragment-shading thread dereferences is a [`FragmentInputs`]
//! record plus the arena spans and resource ids inside it. The record is
//! `Pod`, so the snapshot store can compare whole captures by byte equality
//! and skip re-storing unchanged state.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

use crate::arena::Span;
use crate::fb::Rect;
use crate::resource::Resource;
use crate::{
    MAX_CONSTANT_BUFFERS, MAX_SAMPLERS, MAX_SAMPLER_VIEWS, MAX_SHADER_BUFFERS, MAX_SHADER_IMAGES,
    MAX_TEXTURE_LEVELS,
};

/// Identity of a fragment-shader variant; zero means none bound.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(transparent)]
pub struct VariantId(pub u32);

impl VariantId {
    pub const NONE: Self = Self(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// One constant-buffer slot: arena-resident bytes plus the vec4 count the
/// shader may index.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct ConstantSlot {
    pub data: Span,
    pub num_elements: u32,
    pub _pad: u32,
}

/// One shader-buffer (SSBO) slot, referencing a retained resource by id.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct SsboSlot {
    pub buffer: u32,
    pub offset: u32,
    pub len: u32,
    pub writable: u32,
}

/// Shader-visible texture descriptor: resource id, view window, and the
/// per-level layout copied from the resource at bind time.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct TextureDesc {
    pub base: u32,
    pub base_offset: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub first_level: u32,
    pub last_level: u32,
    pub num_samples: u32,
    pub sample_stride: u32,
    pub mip_offsets: [u32; MAX_TEXTURE_LEVELS],
    pub row_stride: [u32; MAX_TEXTURE_LEVELS],
    pub img_stride: [u32; MAX_TEXTURE_LEVELS],
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Shader-visible sampler descriptor.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct SamplerDesc {
    pub min_lod: f32,
    pub max_lod: f32,
    pub lod_bias: f32,
    pub max_anisotropy: f32,
    pub border_color: [f32; 4],
}

/// Shader-visible image descriptor for a single bound level/layer window.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct ImageDesc {
    pub base: u32,
    pub base_offset: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub num_samples: u32,
    pub sample_stride: u32,
    pub row_stride: u32,
    pub img_stride: u32,
    pub writable: u32,
}

/// The complete fragment-stage state capture. Compared and copied as raw
/// bytes; must stay free of padding.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct FragmentInputs {
    pub variant: VariantId,
    pub sample_mask: u32,
    pub alpha_ref: f32,
    pub stencil_refs: [u32; 2],
    pub blend_color: Span,
    pub viewports: Span,
    pub constants: [ConstantSlot; MAX_CONSTANT_BUFFERS],
    pub ssbos: [SsboSlot; MAX_SHADER_BUFFERS],
    pub textures: [TextureDesc; MAX_SAMPLER_VIEWS],
    pub samplers: [SamplerDesc; MAX_SAMPLERS],
    pub images: [ImageDesc; MAX_SHADER_IMAGES],
}

const_assert_eq!(core::mem::size_of::<TextureDesc>(), 204);
const_assert_eq!(core::mem::size_of::<FragmentInputs>(), 4964);

impl Default for FragmentInputs {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Blend color as stored in the arena: each channel smeared across a
/// 16-byte unorm vector for the shading kernels, plus the float values.
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct BlendColorRecord {
    pub smear: [u8; 64],
    pub floats: [f32; 4],
}

/// Per-viewport depth bounds as stored in the arena.
#[derive(Copy, Clone, Debug, PartialEq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct DepthRange {
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum CullFace {
    #[default]
    None,
    Front,
    Back,
    FrontAndBack,
}

/// Rasterizer state the binner consults. Binding this invalidates the
/// cached primitive strategies.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RasterizerState {
    pub front_ccw: bool,
    pub cull_face: CullFace,
    pub scissor_test: bool,
    pub flatshade_first: bool,
    pub clip_halfz: bool,
    pub multisample: bool,
    pub point_size: f32,
    pub point_size_per_vertex: bool,
    pub line_width: f32,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            front_ccw: true,
            cull_face: CullFace::None,
            scissor_test: false,
            flatshade_first: false,
            clip_halfz: false,
            multisample: false,
            point_size: 1.0,
            point_size_per_vertex: false,
            line_width: 1.0,
        }
    }
}

/// A viewport transform: window coords = position * scale + translate.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct Viewport {
    pub scale: [f32; 3],
    pub translate: [f32; 3],
}

/// Depth bounds covered by a viewport transform. With `clip_halfz` the
/// incoming depth range is [0, 1] instead of [-1, 1].
pub fn viewport_depth_range(vp: &Viewport, clip_halfz: bool) -> DepthRange {
    let (a, b) = if clip_halfz {
        (vp.translate[2], vp.translate[2] + vp.scale[2])
    } else {
        (vp.translate[2] - vp.scale[2], vp.translate[2] + vp.scale[2])
    };
    DepthRange {
        min_depth: a.min(b),
        max_depth: a.max(b),
    }
}

/// The screen-space rectangle a viewport maps onto, rounded inward so a
/// half-open edge never claims an extra pixel row.
pub fn viewport_rect(vp: &Viewport) -> Rect {
    let half_width = vp.scale[0].abs();
    let half_height = vp.scale[1].abs();
    let x_center = vp.translate[0];
    let y_center = vp.translate[1];
    Rect {
        x0: (x_center - half_width + 0.499) as i32,
        x1: (x_center + half_width - 0.501) as i32,
        y0: (y_center - half_height + 0.499) as i32,
        y1: (y_center + half_height - 0.501) as i32,
    }
}

/// A scissor box with exclusive max edges, as producers specify it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Scissor {
    pub minx: u32,
    pub miny: u32,
    pub maxx: u32,
    pub maxy: u32,
}

impl Scissor {
    pub(crate) fn to_rect(self) -> Rect {
        Rect {
            x0: self.minx as i32,
            y0: self.miny as i32,
            x1: self.maxx as i32 - 1,
            y1: self.maxy as i32 - 1,
        }
    }
}

/// The windowed view of a resource a sampler view or image binds.
#[derive(Clone, Debug)]
pub enum ViewKind {
    Texture {
        first_level: u32,
        last_level: u32,
        first_layer: u32,
        last_layer: u32,
    },
    Buffer {
        offset: u32,
        size: u32,
    },
}

#[derive(Clone, Debug)]
pub struct SamplerView {
    pub resource: Resource,
    pub kind: ViewKind,
}

#[derive(Clone, Debug)]
pub struct ImageView {
    pub resource: Resource,
    pub writable: bool,
    pub kind: ViewKind,
}

/// Sampler filtering controls the shading kernels read.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SamplerState {
    pub min_lod: f32,
    pub max_lod: f32,
    pub lod_bias: f32,
    pub max_anisotropy: f32,
    pub border_color: [f32; 4],
}

impl Default for SamplerState {
    fn default() -> Self {
        Self {
            min_lod: 0.0,
            max_lod: f32::MAX,
            lod_bias: 0.0,
            max_anisotropy: 0.0,
            border_color: [0.0; 4],
        }
    }
}

/// Source for one constant-buffer slot.
#[derive(Clone, Debug)]
pub enum ConstantSource {
    Resource(Resource),
    User(Arc<[u8]>),
}

#[derive(Clone, Debug)]
pub struct ConstantBuffer {
    pub source: ConstantSource,
    pub offset: u32,
    pub size: u32,
}

#[derive(Clone, Debug)]
pub struct ShaderBuffer {
    pub buffer: Resource,
    pub offset: u32,
    pub size: u32,
}

/// Shape of the vertex attribute vectors handed to the draw entry points.
/// Attribute 0 is the window-space position.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    pub num_attrs: usize,
    pub point_size_attr: Option<usize>,
}

impl Default for VertexLayout {
    fn default() -> Self {
        Self {
            num_attrs: 1,
            point_size_attr: None,
        }
    }
}

// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared-ownership handles for buffers, textures, and shader variants.
//!
//! Payloads are immutable after creation, so rasterizer threads read them
//! without locking. Scenes retain clones of every handle their commands can
//! reach; the handle count is what keeps a resource alive while work that
//! references it is still in flight.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::state::{FragmentInputs, VariantId};
use crate::MAX_TEXTURE_LEVELS;

static NEXT_RESOURCE_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_VARIANT_ID: AtomicU32 = AtomicU32::new(1);

/// How a scene touches a resource.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct ResourceUse(u8);

impl ResourceUse {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(2);
    pub const READ_WRITE: Self = Self(3);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ResourceUse {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ResourceUse {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Texture shape, for descriptor building.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TextureTarget {
    Tex2d,
    Tex2dArray,
    Tex3d,
    TexCube,
}

impl TextureTarget {
    /// Layered targets address slices by layer rather than minified depth.
    pub fn is_layered(self) -> bool {
        matches!(self, Self::Tex2dArray | Self::TexCube)
    }
}

/// Physical layout of a mipmapped texture: one offset and stride set per
/// level, computed once at creation.
#[derive(Clone, Debug)]
pub struct TextureLayout {
    pub target: TextureTarget,
    pub width: u32,
    pub height: u32,
    /// Array layers for layered targets, depth for 3D, 1 otherwise.
    pub depth: u32,
    pub bytes_per_pixel: u32,
    pub last_level: u32,
    pub mip_offsets: [u32; MAX_TEXTURE_LEVELS],
    pub row_stride: [u32; MAX_TEXTURE_LEVELS],
    pub img_stride: [u32; MAX_TEXTURE_LEVELS],
    pub total_size: u32,
}

/// Minified dimension of a mip level, clamped to one texel.
pub fn minify(dim: u32, level: u32) -> u32 {
    (dim >> level).max(1)
}

impl TextureLayout {
    fn new(
        target: TextureTarget,
        width: u32,
        height: u32,
        depth: u32,
        bytes_per_pixel: u32,
        last_level: u32,
    ) -> Self {
        assert!((last_level as usize) < MAX_TEXTURE_LEVELS);
        let mut layout = Self {
            target,
            width,
            height,
            depth,
            bytes_per_pixel,
            last_level,
            mip_offsets: [0; MAX_TEXTURE_LEVELS],
            row_stride: [0; MAX_TEXTURE_LEVELS],
            img_stride: [0; MAX_TEXTURE_LEVELS],
            total_size: 0,
        };
        let mut total = 0_u32;
        for level in 0..=last_level {
            let w = minify(width, level);
            let h = minify(height, level);
            // Rows padded out for vector loads.
            let row = (w * bytes_per_pixel + 15) & !15;
            let img = row * h;
            let slices = if target == TextureTarget::Tex3d {
                minify(depth, level)
            } else {
                depth
            };
            let l = level as usize;
            layout.mip_offsets[l] = total;
            layout.row_stride[l] = row;
            layout.img_stride[l] = img;
            total += img * slices;
        }
        layout.total_size = total;
        layout
    }
}

#[derive(Debug)]
enum ResourceKind {
    Buffer,
    Texture(TextureLayout),
}

#[derive(Debug)]
struct ResourceInner {
    id: u32,
    kind: ResourceKind,
    data: Box<[u8]>,
}

/// A buffer or texture handle. Cloning shares the payload; the payload is
/// never mutated after creation.
#[derive(Clone, Debug)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

impl Resource {
    /// A raw byte buffer (constants, SSBOs, buffer-backed views).
    pub fn buffer(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(ResourceInner {
                id: NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed),
                kind: ResourceKind::Buffer,
                data: data.into_boxed_slice(),
            }),
        }
    }

    /// A zero-initialized texture with a dense mip chain. `depth` is the
    /// layer count for layered targets (six faces for cubes) and the depth
    /// for 3D targets.
    pub fn texture(
        target: TextureTarget,
        width: u32,
        height: u32,
        depth: u32,
        bytes_per_pixel: u32,
        last_level: u32,
    ) -> Self {
        let layout = TextureLayout::new(target, width, height, depth, bytes_per_pixel, last_level);
        let data = vec![0_u8; layout.total_size as usize].into_boxed_slice();
        Self {
            inner: Arc::new(ResourceInner {
                id: NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed),
                kind: ResourceKind::Texture(layout),
                data,
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    pub fn size(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self.inner.kind, ResourceKind::Buffer)
    }

    pub fn layout(&self) -> Option<&TextureLayout> {
        match &self.inner.kind {
            ResourceKind::Buffer => None,
            ResourceKind::Texture(layout) => Some(layout),
        }
    }

    /// Identity comparison, the basis for retain-list deduplication.
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live handles to this resource, including this one.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Resource {}

/// The shading entry point a variant exposes to the rasterizer.
pub type FragmentFunc = fn(&FragmentInputs);

/// An opaque, immutable fragment-shader variant. The binner only routes its
/// id through stored state and keeps the variant alive for every scene that
/// references it.
#[derive(Debug)]
pub struct FragmentVariant {
    id: VariantId,
    shade: FragmentFunc,
}

impl FragmentVariant {
    pub fn new(shade: FragmentFunc) -> Self {
        Self {
            id: VariantId(NEXT_VARIANT_ID.fetch_add(1, Ordering::Relaxed)),
            shade,
        }
    }

    pub fn id(&self) -> VariantId {
        self.id
    }

    pub fn shade(&self) -> FragmentFunc {
        self.shade
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn use_bits_combine() {
        let mut access = ResourceUse::READ;
        access |= ResourceUse::WRITE;
        assert_eq!(access, ResourceUse::READ_WRITE);
        assert!(access.contains(ResourceUse::READ));
        assert!(ResourceUse::NONE.is_none());
    }

    #[test]
    fn clones_share_identity() {
        let a = Resource::buffer(vec![0; 8]);
        let b = a.clone();
        let c = Resource::buffer(vec![0; 8]);
        assert!(a.same(&b));
        assert!(!a.same(&c));
        assert_eq!(a.handle_count(), 2);
    }

    #[test]
    fn mip_chain_layout() {
        let tex = Resource::texture(TextureTarget::Tex2d, 8, 8, 1, 4, 3);
        let layout = tex.layout().unwrap();
        // 8x8 at 4bpp: row 32, image 256; 4x4: row 16, image 64;
        // 2x2 and 1x1 rows pad to 16.
        assert_eq!(layout.mip_offsets[0], 0);
        assert_eq!(layout.mip_offsets[1], 256);
        assert_eq!(layout.mip_offsets[2], 256 + 64);
        assert_eq!(layout.row_stride[3], 16);
        assert_eq!(tex.size(), layout.total_size as usize);
    }

    #[test]
    fn array_layers_do_not_minify() {
        let tex = Resource::texture(TextureTarget::Tex2dArray, 4, 4, 3, 4, 1);
        let layout = tex.layout().unwrap();
        let level1_slices = (layout.mip_offsets[1] as usize..tex.size())
            .len()
            .div_ceil(layout.img_stride[1] as usize);
        assert_eq!(level1_slices, 3);
    }

    #[test]
    fn minify_clamps_to_one() {
        assert_eq!(minify(8, 2), 2);
        assert_eq!(minify(8, 5), 1);
        assert_eq!(minify(1, 1), 1);
    }
}

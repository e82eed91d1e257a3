// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Attachment formats and clear-value packing.
//!
//! Clear values are packed at request time into the attachment's memory
//! layout, so coalescing and replay operate on final bit patterns and the
//! rasterizer never consults producer state.

use bytemuck::{Pod, Zeroable};

/// Color attachment formats.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColorFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Unorm,
    Rgba32Float,
}

impl ColorFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8Unorm | Self::Bgra8Unorm => 4,
            Self::Rgba16Unorm => 8,
            Self::Rgba32Float => 16,
        }
    }
}

/// Depth/stencil attachment formats. The `X8` variants carry 8 padding bits
/// alongside a 24-bit depth channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ZsFormat {
    Z16Unorm,
    Z32Float,
    /// Depth in bits 0..24, stencil in bits 24..32.
    Z24UnormS8Uint,
    /// Stencil in bits 0..8, depth in bits 8..32.
    S8UintZ24Unorm,
    /// Depth in bits 0..24, padding above.
    Z24X8Unorm,
    /// Padding in bits 0..8, depth above.
    X8Z24Unorm,
    S8Uint,
}

impl ZsFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Z16Unorm => 2,
            Self::S8Uint => 1,
            _ => 4,
        }
    }

    pub fn has_depth(self) -> bool {
        !matches!(self, Self::S8Uint)
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Z24UnormS8Uint | Self::S8UintZ24Unorm | Self::S8Uint)
    }
}

/// A clear color packed into its attachment's byte layout. Sixteen bytes
/// covers the widest supported format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct PackedColor(pub [u8; 16]);

pub(crate) fn unorm(value: f32, max: u64) -> u64 {
    (f64::from(value.clamp(0.0, 1.0)) * max as f64 + 0.5) as u64
}

/// Pack an RGBA clear color into `format`'s layout.
pub fn pack_color(format: ColorFormat, rgba: [f32; 4]) -> PackedColor {
    let mut out = [0_u8; 16];
    match format {
        ColorFormat::Rgba8Unorm => {
            for (i, c) in rgba.iter().enumerate() {
                out[i] = unorm(*c, 0xff) as u8;
            }
        }
        ColorFormat::Bgra8Unorm => {
            for (i, c) in [rgba[2], rgba[1], rgba[0], rgba[3]].iter().enumerate() {
                out[i] = unorm(*c, 0xff) as u8;
            }
        }
        ColorFormat::Rgba16Unorm => {
            for (i, c) in rgba.iter().enumerate() {
                let v = unorm(*c, 0xffff) as u16;
                out[i * 2..i * 2 + 2].copy_from_slice(&v.to_le_bytes());
            }
        }
        ColorFormat::Rgba32Float => {
            for (i, c) in rgba.iter().enumerate() {
                out[i * 4..i * 4 + 4].copy_from_slice(&c.to_le_bytes());
            }
        }
    }
    PackedColor(out)
}

/// Pack a depth/stencil clear into a 64-bit (value, writemask) pair in
/// `format`'s layout. Only the channels selected by `clear_depth` and
/// `clear_stencil` contribute mask bits.
///
/// For the `X8` formats a full depth clear widens the mask over the padding
/// bits, so the rasterizer can store whole words instead of
/// read-modify-writing around bits nobody reads.
pub fn pack_zs(
    format: ZsFormat,
    depth: f64,
    stencil: u32,
    clear_depth: bool,
    clear_stencil: bool,
) -> (u64, u64) {
    let depth = depth.clamp(0.0, 1.0);
    let stencil = u64::from(stencil & 0xff);
    let dmask = |bits: u64| if clear_depth { bits } else { 0 };
    let smask = |bits: u64| if clear_stencil { bits } else { 0 };
    match format {
        ZsFormat::Z16Unorm => ((depth * 65535.0 + 0.5) as u64, dmask(0xffff)),
        ZsFormat::Z32Float => (
            u64::from((depth as f32).to_bits()),
            dmask(0xffff_ffff),
        ),
        ZsFormat::Z24UnormS8Uint => {
            let z = (depth * 16_777_215.0 + 0.5) as u64;
            (z | (stencil << 24), dmask(0x00ff_ffff) | smask(0xff00_0000))
        }
        ZsFormat::S8UintZ24Unorm => {
            let z = (depth * 16_777_215.0 + 0.5) as u64;
            (stencil | (z << 8), smask(0xff) | dmask(0xffff_ff00))
        }
        ZsFormat::Z24X8Unorm => {
            let z = (depth * 16_777_215.0 + 0.5) as u64;
            // Cover the X bits too.
            (z, dmask(0xffff_ffff))
        }
        ZsFormat::X8Z24Unorm => {
            let z = (depth * 16_777_215.0 + 0.5) as u64;
            (z << 8, dmask(0xffff_ffff))
        }
        ZsFormat::S8Uint => (stencil, smask(0xff)),
    }
}

// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Clear coalescing.
//!
//! Clears requested before any primitive are not binned immediately; they
//! merge into a small accumulator and materialize as bin-everywhere commands
//! exactly once, when the scene activates. Clears issued while binning is
//! underway bind immediately, since deferring them would reorder them ahead
//! of already-binned primitives.

use crate::context::{BinningContext, SetupState};
use crate::format::{pack_color, pack_zs, PackedColor};
use crate::scene::{Cmd, CmdClearColor, CmdClearZs};
use crate::{Error, MAX_COLOR_ATTACHMENTS};

/// Selects clear targets: depth, stencil, and individual color buffers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct ClearFlags(pub u32);

impl ClearFlags {
    pub const NONE: Self = Self(0);
    pub const DEPTH: Self = Self(1 << 0);
    pub const STENCIL: Self = Self(1 << 1);
    pub const DEPTH_STENCIL: Self = Self(Self::DEPTH.0 | Self::STENCIL.0);
    pub const COLOR_ALL: Self = Self(((1 << MAX_COLOR_ATTACHMENTS) - 1) << 2);
    pub const ALL: Self = Self(Self::DEPTH_STENCIL.0 | Self::COLOR_ALL.0);

    /// The flag for color buffer `i`.
    pub const fn color(i: usize) -> Self {
        Self(1 << (2 + i))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for ClearFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ClearFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitAnd for ClearFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// Clears accumulated while no scene is active.
///
/// Color values overwrite per buffer (last write wins). Depth/stencil merge
/// through the packed writemask, so clearing depth and stencil separately
/// composes into one combined value/mask pair.
#[derive(Debug, Default)]
pub(crate) struct PendingClear {
    pub flags: ClearFlags,
    pub colors: [PackedColor; MAX_COLOR_ATTACHMENTS],
    pub zs_value: u64,
    pub zs_mask: u64,
}

impl PendingClear {
    pub fn merge_color(&mut self, cbuf: usize, value: PackedColor) {
        self.flags |= ClearFlags::color(cbuf);
        self.colors[cbuf] = value;
    }

    pub fn merge_zs(&mut self, value: u64, mask: u64, flags: ClearFlags) {
        self.flags |= flags & ClearFlags::DEPTH_STENCIL;
        self.zs_value = (self.zs_value & !mask) | (value & mask);
        self.zs_mask |= mask;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl BinningContext {
    /// Clear the selected targets of the bound framebuffer.
    ///
    /// Before the first draw this only records the request; the actual
    /// commands bind when the scene activates. Flags naming absent
    /// attachments are ignored.
    pub fn clear(
        &mut self,
        color: [f32; 4],
        depth: f64,
        stencil: u32,
        flags: ClearFlags,
    ) -> Result<(), Error> {
        log::trace!("clear flags {:#x}", flags.0);
        if flags.intersects(ClearFlags::DEPTH_STENCIL) && self.fb.zs.is_some() {
            if self.try_clear_zs(depth, stencil, flags).is_err() {
                // Scene full. Flush and retry on an empty one.
                self.flush("out of memory")?;
                if self.try_clear_zs(depth, stencil, flags).is_err() {
                    log::error!("depth-stencil clear exceeds scene capacity");
                    return Err(Error::SceneCapacity {
                        context: "depth-stencil clear",
                    });
                }
            }
        }
        if flags.intersects(ClearFlags::COLOR_ALL) {
            for cbuf in 0..self.fb.color.len() {
                if !flags.contains(ClearFlags::color(cbuf))
                    || self.fb.color_attachment(cbuf).is_none()
                {
                    continue;
                }
                if self.try_clear_color(cbuf, color).is_err() {
                    self.flush("out of memory")?;
                    if self.try_clear_color(cbuf, color).is_err() {
                        log::error!("color clear exceeds scene capacity (buffer {cbuf})");
                        return Err(Error::SceneCapacity {
                            context: "color clear",
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Bind or accumulate one color buffer's clear. Fails only when an
    /// active scene cannot fit the binned commands.
    fn try_clear_color(&mut self, cbuf: usize, color: [f32; 4]) -> Result<(), Error> {
        let Some(attachment) = self.fb.color_attachment(cbuf) else {
            return Ok(());
        };
        let value = pack_color(attachment.format, color);
        if self.state == SetupState::Active {
            let scene = self.scene.as_mut().ok_or(Error::SceneCapacity {
                context: "color clear",
            })?;
            scene
                .bin_everywhere(Cmd::ClearColor(CmdClearColor {
                    cbuf: cbuf as u32,
                    value,
                }))
                .map_err(|_| Error::SceneCapacity {
                    context: "color clear",
                })?;
        } else {
            self.set_scene_state(SetupState::Cleared, "clear color")?;
            self.pending_clear.merge_color(cbuf, value);
        }
        Ok(())
    }

    /// Bind or accumulate the depth/stencil clear.
    fn try_clear_zs(&mut self, depth: f64, stencil: u32, flags: ClearFlags) -> Result<(), Error> {
        let Some(zs) = self.fb.zs.as_ref() else {
            return Ok(());
        };
        // Drop requested channels the format does not carry.
        let mut want = flags & ClearFlags::DEPTH_STENCIL;
        if !zs.format.has_depth() {
            want.0 &= !ClearFlags::DEPTH.0;
        }
        if !zs.format.has_stencil() {
            want.0 &= !ClearFlags::STENCIL.0;
        }
        if want.is_empty() {
            return Ok(());
        }
        let (value, mask) = pack_zs(
            zs.format,
            depth,
            stencil,
            want.contains(ClearFlags::DEPTH),
            want.contains(ClearFlags::STENCIL),
        );
        if self.state == SetupState::Active {
            let scene = self.scene.as_mut().ok_or(Error::SceneCapacity {
                context: "depth-stencil clear",
            })?;
            scene
                .bin_everywhere(Cmd::ClearZs(CmdClearZs { value, mask }))
                .map_err(|_| Error::SceneCapacity {
                    context: "depth-stencil clear",
                })?;
        } else {
            self.set_scene_state(SetupState::Cleared, "clear zs")?;
            self.pending_clear.merge_zs(value, mask, want);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BinningOptions;
    use crate::fb::{DepthStencilAttachment, Framebuffer};
    use crate::format::ZsFormat;
    use crate::queue::SceneQueue;
    use crate::resource::{Resource, TextureTarget};
    use std::sync::Arc;

    #[test]
    fn color_flags_per_buffer() {
        let flags = ClearFlags::color(0) | ClearFlags::color(3);
        assert!(flags.contains(ClearFlags::color(0)));
        assert!(!flags.contains(ClearFlags::color(1)));
        assert!(flags.intersects(ClearFlags::COLOR_ALL));
        assert!(!flags.intersects(ClearFlags::DEPTH_STENCIL));
    }

    #[test]
    fn color_overwrites_in_accumulator() {
        let mut pending = PendingClear::default();
        pending.merge_color(1, PackedColor([0x11; 16]));
        pending.merge_color(1, PackedColor([0x22; 16]));
        assert_eq!(pending.colors[1], PackedColor([0x22; 16]));
        assert_eq!(pending.flags, ClearFlags::color(1));
    }

    #[test]
    fn zs_merge_is_masked() {
        let mut pending = PendingClear::default();
        // Depth-only clear of a Z24S8 target, then a stencil-only one.
        pending.merge_zs(0x0080_0000, 0x00ff_ffff, ClearFlags::DEPTH);
        pending.merge_zs(0x0300_0000, 0xff00_0000, ClearFlags::STENCIL);
        assert_eq!(pending.zs_value, 0x0380_0000);
        assert_eq!(pending.zs_mask, 0xffff_ffff);
        assert_eq!(pending.flags, ClearFlags::DEPTH_STENCIL);

        // A second depth clear replaces only the depth bits.
        pending.merge_zs(0x0000_0001, 0x00ff_ffff, ClearFlags::DEPTH);
        assert_eq!(pending.zs_value, 0x0300_0001);
    }

    #[test]
    fn reset_returns_to_empty() {
        let mut pending = PendingClear::default();
        pending.merge_zs(1, 1, ClearFlags::DEPTH);
        pending.reset();
        assert!(pending.flags.is_empty());
        assert_eq!(pending.zs_mask, 0);
    }

    #[test]
    fn stencil_only_attachment_ignores_depth_flags() {
        let queue = Arc::new(SceneQueue::new());
        let mut ctx = BinningContext::new(BinningOptions::default(), queue);
        let mut fb = Framebuffer::new(64, 64);
        fb.zs = Some(DepthStencilAttachment {
            format: ZsFormat::S8Uint,
            resource: Resource::texture(TextureTarget::Tex2d, 64, 64, 1, 1, 0),
        });
        ctx.bind_framebuffer(fb).unwrap();

        // Depth alone names no channel the format has; not even a state
        // transition happens.
        ctx.clear([0.0; 4], 1.0, 0, ClearFlags::DEPTH).unwrap();
        assert_eq!(ctx.state(), SetupState::Flushed);

        // The depth half of a combined request is dropped before it
        // reaches the accumulator.
        ctx.clear([0.0; 4], 1.0, 0xcd, ClearFlags::DEPTH_STENCIL)
            .unwrap();
        assert_eq!(ctx.state(), SetupState::Cleared);
        assert_eq!(ctx.pending_clear.flags, ClearFlags::STENCIL);
        assert_eq!(ctx.pending_clear.zs_value, 0xcd);
        assert_eq!(ctx.pending_clear.zs_mask, 0xff);
    }
}

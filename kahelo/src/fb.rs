// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Framebuffer descriptions and the inclusive rects used for draw regions.

use crate::format::{ColorFormat, ZsFormat};
use crate::resource::Resource;
use crate::MAX_COLOR_ATTACHMENTS;

/// An inclusive pixel rectangle. `x1 < x0` (or `y1 < y0`) encodes empty,
/// which falls out naturally from intersecting disjoint rects.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl Rect {
    pub const EMPTY: Self = Self {
        x0: 0,
        y0: 0,
        x1: -1,
        y1: -1,
    };

    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn is_empty(&self) -> bool {
        self.x1 < self.x0 || self.y1 < self.y0
    }

    pub fn intersect(self, other: Self) -> Self {
        Self {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ColorAttachment {
    pub format: ColorFormat,
    pub resource: Resource,
}

#[derive(Clone, Debug)]
pub struct DepthStencilAttachment {
    pub format: ZsFormat,
    pub resource: Resource,
}

/// The render-target set a scene is binned against. Attachment slots may be
/// empty; clears and draws skip the gaps.
#[derive(Clone, Debug, Default)]
pub struct Framebuffer {
    pub width: u32,
    pub height: u32,
    pub color: Vec<Option<ColorAttachment>>,
    pub zs: Option<DepthStencilAttachment>,
}

impl Framebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            color: Vec::new(),
            zs: None,
        }
    }

    /// The bound attachment in slot `i`, if any.
    pub fn color_attachment(&self, i: usize) -> Option<&ColorAttachment> {
        self.color.get(i).and_then(|slot| slot.as_ref())
    }

    /// The framebuffer's pixel extent as an inclusive rect; empty for a
    /// zero-sized framebuffer.
    pub fn rect(&self) -> Rect {
        if self.width == 0 || self.height == 0 {
            Rect::EMPTY
        } else {
            Rect::new(0, 0, self.width as i32 - 1, self.height as i32 - 1)
        }
    }

    pub(crate) fn validate(&self) {
        debug_assert!(self.color.len() <= MAX_COLOR_ATTACHMENTS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_clamps() {
        let a = Rect::new(0, 0, 63, 63);
        let b = Rect::new(16, 32, 100, 100);
        assert_eq!(a.intersect(b), Rect::new(16, 32, 63, 63));
    }

    #[test]
    fn disjoint_rects_intersect_empty() {
        let a = Rect::new(0, 0, 7, 7);
        let b = Rect::new(8, 0, 15, 7);
        assert!(a.intersect(b).is_empty());
        assert!(Rect::EMPTY.intersect(a).is_empty());
    }

    #[test]
    fn zero_sized_framebuffer_has_empty_rect() {
        assert!(Framebuffer::new(0, 0).rect().is_empty());
        assert_eq!(Framebuffer::new(64, 32).rect(), Rect::new(0, 0, 63, 31));
    }
}

//! Integer screen geometry.
//!
//! Coordinates are physical pixels in the virtual desktop, which may have a
//! negative origin on multi-monitor layouts.

use serde::{Deserialize, Serialize};

/// Axis-aligned integer rectangle.
///
/// Used for capture regions (screen space) and masks (relative to the
/// requested capture region).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A mask rectangle, relative to the requested capture region.
pub type MaskRect = Rect;

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    /// Overlapping region of two rectangles, `None` if they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        let rect = Rect::new(left, top, right.saturating_sub(left), bottom.saturating_sub(top));
        (!rect.is_empty()).then_some(rect)
    }

    /// Move the rectangle by `(dx, dy)`, saturating at the `i32` range.
    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.width,
            self.height,
        )
    }

    /// Round width and height down to even numbers (yuv420 encoders need it).
    pub fn with_even_size(&self) -> Rect {
        Rect::new(
            self.x,
            self.y,
            self.width.max(0) & !1,
            self.height.max(0) & !1,
        )
    }

    /// True when `other` lies entirely inside this rectangle.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn intersect_clips_negative_origin() {
        let desktop = Rect::new(0, 0, 1920, 1080);
        let requested = Rect::new(-100, 50, 500, 300);
        assert_eq!(
            requested.intersect(&desktop),
            Some(Rect::new(0, 50, 400, 300))
        );
    }

    #[test]
    fn intersect_disjoint_is_none() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(10, 0, 10, 10);
        assert_eq!(a.intersect(&b), None);
    }

    #[test]
    fn translate_saturates_at_extremes() {
        assert_eq!(
            Rect::new(i32::MIN, i32::MAX, 10, 10).translate(-100, 100),
            Rect::new(i32::MIN, i32::MAX, 10, 10)
        );
        assert_eq!(Rect::new(5, 5, 1, 1).translate(-5, 2), Rect::new(0, 7, 1, 1));
    }

    #[test]
    fn intersect_far_apart_does_not_overflow() {
        let a = Rect::new(i32::MAX - 1, 0, 10, 10);
        let b = Rect::new(i32::MIN, 0, 1, 10);
        assert_eq!(a.intersect(&b), None);
    }

    #[test]
    fn even_size_rounds_down() {
        assert_eq!(
            Rect::new(3, 5, 1281, 721).with_even_size(),
            Rect::new(3, 5, 1280, 720)
        );
        assert!(Rect::new(0, 0, 1, 1).with_even_size().is_empty());
    }

    proptest! {
        #[test]
        fn intersection_lies_inside_both(
            ax in -2000i32..2000, ay in -2000i32..2000, aw in 0i32..3000, ah in 0i32..3000,
            bx in -2000i32..2000, by in -2000i32..2000, bw in 0i32..3000, bh in 0i32..3000,
        ) {
            let a = Rect::new(ax, ay, aw, ah);
            let b = Rect::new(bx, by, bw, bh);
            if let Some(i) = a.intersect(&b) {
                prop_assert!(!i.is_empty());
                prop_assert!(a.contains_rect(&i));
                prop_assert!(b.contains_rect(&i));
            }
            prop_assert_eq!(a.intersect(&b), b.intersect(&a));
        }

        #[test]
        fn even_size_never_grows(w in -10i32..5000, h in -10i32..5000) {
            let even = Rect::new(0, 0, w, h).with_even_size();
            prop_assert!(even.width % 2 == 0 && even.height % 2 == 0);
            prop_assert!(even.width <= w.max(0) && even.height <= h.max(0));
            prop_assert!(w.max(0) - even.width <= 1);
        }
    }
}

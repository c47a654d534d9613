//! Dirty-region tracking.
//!
//! The region is a single bounding union: merging is O(1) and the renderer
//! repaints one rectangle per tick. Coordinates are logical viewport pixels
//! (zoom and scroll applied, device pixel scale not).

use model::Rect;

#[derive(Debug, Clone, Default)]
pub struct DirtyRegionTracker {
    region: Rect,
    extent: Rect,
}

impl DirtyRegionTracker {
    pub fn new(extent: Rect) -> Self {
        Self {
            region: Rect::EMPTY,
            extent,
        }
    }

    /// Visible extent used by [`DirtyRegionTracker::invalidate_all`].
    pub fn extent(&self) -> Rect {
        self.extent
    }

    pub fn set_extent(&mut self, extent: Rect) {
        self.extent = extent;
    }

    /// Adds `rect` to the region. Empty rectangles are ignored.
    pub fn invalidate(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        self.region = self.region.union(&rect);
    }

    pub fn invalidate_all(&mut self) {
        self.invalidate(self.extent);
    }

    /// Returns the accumulated region and resets it.
    pub fn take_dirty_region(&mut self) -> Rect {
        std::mem::replace(&mut self.region, Rect::EMPTY)
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    pub fn peek(&self) -> Rect {
        self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_covers_every_invalidated_rect() {
        let mut tracker = DirtyRegionTracker::new(Rect::new(0, 0, 800, 600));
        let rects = [
            Rect::new(10, 10, 5, 5),
            Rect::new(-20, 300, 40, 2),
            Rect::new(700, 0, 200, 50),
        ];
        for rect in rects {
            tracker.invalidate(rect);
        }
        let region = tracker.take_dirty_region();
        for rect in rects {
            assert!(region.contains_rect(&rect), "{region:?} misses {rect:?}");
        }
        assert!(tracker.is_empty());
        assert_eq!(tracker.take_dirty_region(), Rect::EMPTY);
    }

    #[test]
    fn empty_rects_do_not_dirty() {
        let mut tracker = DirtyRegionTracker::new(Rect::new(0, 0, 10, 10));
        tracker.invalidate(Rect::new(5, 5, 0, 4));
        assert!(tracker.is_empty());
    }

    #[test]
    fn invalidate_all_uses_current_extent() {
        let mut tracker = DirtyRegionTracker::default();
        tracker.invalidate_all();
        assert!(tracker.is_empty());
        tracker.set_extent(Rect::new(0, 0, 320, 200));
        tracker.invalidate_all();
        assert_eq!(tracker.peek(), Rect::new(0, 0, 320, 200));
    }
}

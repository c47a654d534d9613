use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const ORIGIN: Self = Self { x: 0, y: 0 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub const fn translated(self, delta_x: i32, delta_y: i32) -> Self {
        Self {
            x: self.x + delta_x,
            y: self.y + delta_y,
        }
    }

    pub fn to_f32(self) -> PointF {
        PointF {
            x: self.x as f32,
            y: self.y as f32,
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct PointF {
    pub x: f32,
    pub y: f32,
}

impl PointF {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: PointF) -> f32 {
        let delta_x = other.x - self.x;
        let delta_y = other.y - self.y;
        (delta_x * delta_x + delta_y * delta_y).sqrt()
    }

    pub fn lerp(self, other: PointF, t: f32) -> PointF {
        PointF {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    /// Distance from `self` to the closed segment `start..end`.
    pub fn distance_to_segment(self, start: PointF, end: PointF) -> f32 {
        let segment_x = end.x - start.x;
        let segment_y = end.y - start.y;
        let length_squared = segment_x * segment_x + segment_y * segment_y;
        if length_squared <= f32::EPSILON {
            return self.distance_to(start);
        }
        let t = ((self.x - start.x) * segment_x + (self.y - start.y) * segment_y) / length_squared;
        self.distance_to(start.lerp(end, t.clamp(0.0, 1.0)))
    }

    pub fn round(self) -> Point {
        Point {
            x: self.x.round() as i32,
            y: self.y.round() as i32,
        }
    }
}

/// Axis-aligned integer rectangle in canvas or screen units.
///
/// A rectangle with a non-positive width or height is empty. Empty rectangles
/// never intersect anything and are the identity for [`Rect::union`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const EMPTY: Self = Self {
        x: 0,
        y: 0,
        width: 0,
        height: 0,
    };

    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_corners(first: Point, second: Point) -> Self {
        let min_x = first.x.min(second.x);
        let min_y = first.y.min(second.y);
        let max_x = first.x.max(second.x);
        let max_y = first.y.max(second.y);
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub const fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub const fn right(&self) -> i32 {
        self.x + self.width
    }

    pub const fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub const fn position(&self) -> Point {
        Point {
            x: self.x,
            y: self.y,
        }
    }

    pub fn centre(&self) -> PointF {
        PointF {
            x: self.x as f32 + self.width as f32 / 2.0,
            y: self.y as f32 + self.height as f32 / 2.0,
        }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        if other.is_empty() {
            return *self;
        }
        if self.is_empty() {
            return *other;
        }
        let min_x = self.x.min(other.x);
        let min_y = self.y.min(other.y);
        let max_x = self.right().max(other.right());
        let max_y = self.bottom().max(other.bottom());
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn intersection(&self, other: &Rect) -> Rect {
        if !self.intersects(other) {
            return Rect::EMPTY;
        }
        let min_x = self.x.max(other.x);
        let min_y = self.y.max(other.y);
        let max_x = self.right().min(other.right());
        let max_y = self.bottom().min(other.bottom());
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// True when `other` lies entirely inside `self`. An empty `other` is
    /// always contained.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        if other.is_empty() {
            return true;
        }
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.y >= self.y && point.x < self.right() && point.y < self.bottom()
    }

    pub fn contains_f(&self, point: PointF) -> bool {
        point.x >= self.x as f32
            && point.y >= self.y as f32
            && point.x < self.right() as f32
            && point.y < self.bottom() as f32
    }

    pub const fn expanded(&self, amount: i32) -> Rect {
        Rect {
            x: self.x - amount,
            y: self.y - amount,
            width: self.width + amount * 2,
            height: self.height + amount * 2,
        }
    }

    pub const fn reduced(&self, amount: i32) -> Rect {
        self.expanded(-amount)
    }

    pub const fn translated(&self, delta_x: i32, delta_y: i32) -> Rect {
        Rect {
            x: self.x + delta_x,
            y: self.y + delta_y,
            width: self.width,
            height: self.height,
        }
    }

    pub const fn with_position(&self, position: Point) -> Rect {
        Rect {
            x: position.x,
            y: position.y,
            width: self.width,
            height: self.height,
        }
    }

    /// Scales by `factor` and rounds outward so the result always covers the
    /// scaled area.
    pub fn scaled_outward(&self, factor: f32) -> Rect {
        if self.is_empty() {
            return Rect::EMPTY;
        }
        let min_x = (self.x as f32 * factor).floor() as i32;
        let min_y = (self.y as f32 * factor).floor() as i32;
        let max_x = (self.right() as f32 * factor).ceil() as i32;
        let max_y = (self.bottom() as f32 * factor).ceil() as i32;
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_ignores_empty_rects() {
        let rect = Rect::new(10, 10, 5, 5);
        assert_eq!(rect.union(&Rect::EMPTY), rect);
        assert_eq!(Rect::EMPTY.union(&rect), rect);
        assert_eq!(
            rect.union(&Rect::new(0, 20, 2, 2)),
            Rect::new(0, 10, 15, 12)
        );
    }

    #[test]
    fn touching_rects_do_not_intersect() {
        let left = Rect::new(0, 0, 10, 10);
        let right = Rect::new(10, 0, 10, 10);
        assert!(!left.intersects(&right));
        assert!(left.intersects(&right.translated(-1, 0)));
        assert!(left.intersection(&right).is_empty());
    }

    #[test]
    fn scaled_outward_covers_fractional_edges() {
        let rect = Rect::new(1, 1, 3, 3);
        assert_eq!(rect.scaled_outward(1.5), Rect::new(1, 1, 5, 5));
    }

    #[test]
    fn segment_distance_clamps_to_endpoints() {
        let point = PointF::new(-3.0, 4.0);
        let distance = point.distance_to_segment(PointF::new(0.0, 0.0), PointF::new(10.0, 0.0));
        assert!((distance - 5.0).abs() < 1e-6);
    }
}

use model::{PointF, Rect};

pub const MIN_ZOOM: f32 = 0.2;
pub const MAX_ZOOM: f32 = 3.0;

/// Canvas-to-screen mapping of one view: `screen = canvas * zoom + offset`.
///
/// Offsets are in logical screen units; device pixel scale is applied by the
/// renderer on top of this transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    zoom: f32,
    offset_x: f32,
    offset_y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewTransformError {
    InvalidZoom,
    InvalidViewport,
    NonFiniteValue,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }
}

impl ViewTransform {
    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn offset_x(&self) -> f32 {
        self.offset_x
    }

    pub fn offset_y(&self) -> f32 {
        self.offset_y
    }

    pub fn set_zoom(&mut self, zoom: f32) -> Result<(), ViewTransformError> {
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(ViewTransformError::InvalidZoom);
        }
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        Ok(())
    }

    /// Multiplies the zoom by `zoom_factor` keeping the screen point
    /// `(point_x, point_y)` fixed. The resulting zoom is clamped to
    /// [`MIN_ZOOM`]..=[`MAX_ZOOM`].
    pub fn zoom_about_point(
        &mut self,
        zoom_factor: f32,
        point_x: f32,
        point_y: f32,
    ) -> Result<(), ViewTransformError> {
        if !zoom_factor.is_finite() || zoom_factor <= 0.0 {
            return Err(ViewTransformError::InvalidZoom);
        }
        if !point_x.is_finite() || !point_y.is_finite() {
            return Err(ViewTransformError::NonFiniteValue);
        }

        let next_zoom = checked_mul(self.zoom, zoom_factor)?.clamp(MIN_ZOOM, MAX_ZOOM);
        let applied_factor = next_zoom / self.zoom;

        let keep_anchor_scale = checked_add(1.0, -applied_factor)?;
        let scaled_offset_x = checked_mul(self.offset_x, applied_factor)?;
        let scaled_offset_y = checked_mul(self.offset_y, applied_factor)?;
        let anchor_x_contribution = checked_mul(point_x, keep_anchor_scale)?;
        let anchor_y_contribution = checked_mul(point_y, keep_anchor_scale)?;

        self.offset_x = checked_add(scaled_offset_x, anchor_x_contribution)?;
        self.offset_y = checked_add(scaled_offset_y, anchor_y_contribution)?;
        self.zoom = next_zoom;
        Ok(())
    }

    pub fn pan_by(&mut self, delta_x: f32, delta_y: f32) -> Result<(), ViewTransformError> {
        self.offset_x = checked_add(self.offset_x, delta_x)?;
        self.offset_y = checked_add(self.offset_y, delta_y)?;
        Ok(())
    }

    /// Puts the canvas origin at the top-left of the viewport, keeping zoom.
    pub fn jump_to_origin(&mut self) {
        self.offset_x = 0.0;
        self.offset_y = 0.0;
    }

    /// Centres `content` in the viewport at the largest zoom that shows all of
    /// it with `margin` logical units of padding, never zooming past 1.0.
    pub fn zoom_to_fit(
        &mut self,
        content: Rect,
        viewport_width: f32,
        viewport_height: f32,
        margin: f32,
    ) -> Result<(), ViewTransformError> {
        if !viewport_width.is_finite()
            || !viewport_height.is_finite()
            || viewport_width <= 0.0
            || viewport_height <= 0.0
        {
            return Err(ViewTransformError::InvalidViewport);
        }
        if content.is_empty() {
            *self = Self::default();
            return Ok(());
        }
        let available_width = (viewport_width - margin * 2.0).max(1.0);
        let available_height = (viewport_height - margin * 2.0).max(1.0);
        let zoom = (available_width / content.width as f32)
            .min(available_height / content.height as f32)
            .min(1.0)
            .clamp(MIN_ZOOM, MAX_ZOOM);
        let centre = content.centre();
        self.zoom = zoom;
        self.offset_x = checked_add(viewport_width / 2.0, -centre.x * zoom)?;
        self.offset_y = checked_add(viewport_height / 2.0, -centre.y * zoom)?;
        Ok(())
    }

    pub fn canvas_to_screen_point(&self, point: PointF) -> PointF {
        PointF::new(
            point.x * self.zoom + self.offset_x,
            point.y * self.zoom + self.offset_y,
        )
    }

    pub fn screen_to_canvas_point(
        &self,
        screen_x: f32,
        screen_y: f32,
    ) -> Result<PointF, ViewTransformError> {
        if !screen_x.is_finite() || !screen_y.is_finite() {
            return Err(ViewTransformError::NonFiniteValue);
        }
        if self.zoom.abs() <= f32::EPSILON {
            return Err(ViewTransformError::InvalidZoom);
        }
        let canvas_x = (screen_x - self.offset_x) / self.zoom;
        let canvas_y = (screen_y - self.offset_y) / self.zoom;
        if !canvas_x.is_finite() || !canvas_y.is_finite() {
            return Err(ViewTransformError::NonFiniteValue);
        }
        Ok(PointF::new(canvas_x, canvas_y))
    }

    /// Canvas-space rectangle covered by a viewport of the given logical size,
    /// rounded outward.
    pub fn visible_canvas_rect(&self, viewport_width: f32, viewport_height: f32) -> Rect {
        let min_x = (-self.offset_x / self.zoom).floor();
        let min_y = (-self.offset_y / self.zoom).floor();
        let max_x = ((viewport_width - self.offset_x) / self.zoom).ceil();
        let max_y = ((viewport_height - self.offset_y) / self.zoom).ceil();
        Rect::new(
            min_x as i32,
            min_y as i32,
            (max_x - min_x) as i32,
            (max_y - min_y) as i32,
        )
    }

    /// Screen-space rectangle of a canvas rectangle, rounded outward.
    pub fn canvas_rect_to_screen(&self, rect: Rect) -> Rect {
        if rect.is_empty() {
            return Rect::EMPTY;
        }
        let min_x = (rect.x as f32 * self.zoom + self.offset_x).floor();
        let min_y = (rect.y as f32 * self.zoom + self.offset_y).floor();
        let max_x = (rect.right() as f32 * self.zoom + self.offset_x).ceil();
        let max_y = (rect.bottom() as f32 * self.zoom + self.offset_y).ceil();
        Rect::new(
            min_x as i32,
            min_y as i32,
            (max_x - min_x) as i32,
            (max_y - min_y) as i32,
        )
    }
}

fn checked_add(current: f32, delta: f32) -> Result<f32, ViewTransformError> {
    if !delta.is_finite() {
        return Err(ViewTransformError::NonFiniteValue);
    }
    let next = current + delta;
    if !next.is_finite() {
        return Err(ViewTransformError::NonFiniteValue);
    }
    Ok(next)
}

fn checked_mul(left: f32, right: f32) -> Result<f32, ViewTransformError> {
    if !left.is_finite() || !right.is_finite() {
        return Err(ViewTransformError::NonFiniteValue);
    }
    let next = left * right;
    if !next.is_finite() {
        return Err(ViewTransformError::NonFiniteValue);
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_about_point_keeps_anchor_screen_position() {
        let mut transform = ViewTransform::default();
        transform.pan_by(20.0, -10.0).expect("pan");
        let anchor = transform.screen_to_canvas_point(100.0, 50.0).expect("anchor");

        transform
            .zoom_about_point(2.0, 100.0, 50.0)
            .expect("zoom about point");

        assert!((transform.zoom() - 2.0).abs() < 1e-6);
        assert!((transform.offset_x() + 60.0).abs() < 1e-6);
        assert!((transform.offset_y() + 70.0).abs() < 1e-6);
        let screen = transform.canvas_to_screen_point(anchor);
        assert!((screen.x - 100.0).abs() < 1e-4);
        assert!((screen.y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn zoom_about_point_rejects_invalid_inputs() {
        let mut transform = ViewTransform::default();
        assert_eq!(
            transform.zoom_about_point(0.0, 10.0, 20.0),
            Err(ViewTransformError::InvalidZoom)
        );
        assert_eq!(
            transform.zoom_about_point(1.2, f32::NAN, 20.0),
            Err(ViewTransformError::NonFiniteValue)
        );
    }

    #[test]
    fn zoom_is_clamped_to_limits() {
        let mut transform = ViewTransform::default();
        transform.zoom_about_point(100.0, 0.0, 0.0).expect("zoom in");
        assert_eq!(transform.zoom(), MAX_ZOOM);
        transform.set_zoom(0.01).expect("zoom out");
        assert_eq!(transform.zoom(), MIN_ZOOM);
    }

    #[test]
    fn zoom_to_fit_centres_content() {
        let mut transform = ViewTransform::default();
        transform
            .zoom_to_fit(Rect::new(0, 0, 400, 200), 200.0, 200.0, 0.0)
            .expect("fit");
        assert!((transform.zoom() - 0.5).abs() < 1e-6);
        let centre = transform.canvas_to_screen_point(PointF::new(200.0, 100.0));
        assert!((centre.x - 100.0).abs() < 1e-4);
        assert!((centre.y - 100.0).abs() < 1e-4);
    }

    #[test]
    fn visible_rect_follows_scroll_and_zoom() {
        let mut transform = ViewTransform::default();
        transform.pan_by(-50.0, 0.0).expect("pan");
        transform.set_zoom(2.0).expect("zoom");
        assert_eq!(
            transform.visible_canvas_rect(100.0, 100.0),
            Rect::new(25, 0, 50, 50)
        );
        transform.jump_to_origin();
        assert_eq!(
            transform.visible_canvas_rect(100.0, 100.0),
            Rect::new(0, 0, 50, 50)
        );
    }
}

use document_protocol::{DocumentCommands, DocumentView};
use frame_scheduler::{Clock, SystemClock};
use model::Rect;
use renderer::{FrameOutcome, FrameTarget, RenderBackend, RenderError, Renderer};

use crate::{Canvas, CanvasSettings};

/// What the embedding shell knows about its surface this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceMetrics {
    pub available: bool,
    pub pixel_scale: f32,
    pub physical_width: u32,
    pub physical_height: u32,
}

impl SurfaceMetrics {
    pub fn new(physical_width: u32, physical_height: u32, pixel_scale: f32) -> Self {
        Self {
            available: true,
            pixel_scale,
            physical_width,
            physical_height,
        }
    }

    /// No peer or window to draw into.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            pixel_scale: 1.0,
            physical_width: 0,
            physical_height: 0,
        }
    }

    fn target(&self) -> Option<FrameTarget> {
        self.available.then_some(FrameTarget {
            pixel_scale: self.pixel_scale,
            physical_width: self.physical_width,
            physical_height: self.physical_height,
        })
    }
}

/// Drives one view's renderer once per display refresh.
pub struct CanvasSurface<B: RenderBackend, C: Clock = SystemClock> {
    renderer: Renderer<B, C>,
}

impl<B: RenderBackend> CanvasSurface<B, SystemClock> {
    pub fn new(backend: B, settings: &CanvasSettings) -> Self {
        Self::with_clock(backend, SystemClock::new(), settings)
    }
}

impl<B: RenderBackend, C: Clock> CanvasSurface<B, C> {
    pub fn with_clock(backend: B, clock: C, settings: &CanvasSettings) -> Self {
        let mut renderer = Renderer::with_clock(backend, clock, settings.frame_settings());
        renderer
            .surface_mut()
            .set_show_scrollbars(settings.show_scrollbars);
        Self { renderer }
    }

    pub fn renderer(&self) -> &Renderer<B, C> {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer<B, C> {
        &mut self.renderer
    }

    pub fn apply_settings(&mut self, settings: &CanvasSettings) {
        self.renderer.set_settings(settings.frame_settings());
        self.renderer
            .surface_mut()
            .set_show_scrollbars(settings.show_scrollbars);
    }

    /// Marks a logical screen rectangle for repaint.
    pub fn invalidate(&mut self, rect: Rect) {
        self.renderer.invalidate(rect);
    }

    /// One display tick: run the pending reconcile, hand accumulated
    /// invalidations and released nodes to the renderer, then render.
    ///
    /// A failed tick is logged and keeps its dirty region for the next one.
    pub fn tick<D>(
        &mut self,
        canvas: &mut Canvas<D>,
        metrics: SurfaceMetrics,
    ) -> Result<FrameOutcome, RenderError>
    where
        D: DocumentView + DocumentCommands,
    {
        let target = metrics.target();
        if let Some(target) = target {
            let (width, height) = target.logical_size();
            canvas.set_viewport(width, height);
        }
        canvas.synchronise_if_pending();
        canvas.tick_activity();

        let released = canvas.take_released_nodes();
        if !released.is_empty() {
            self.renderer.release_nodes(&released);
        }
        let invalidation = canvas.take_invalidation();
        if invalidation.all {
            self.renderer.invalidate_all();
        } else {
            self.renderer
                .invalidate_canvas_rect(invalidation.canvas, canvas.view());
            self.renderer.invalidate(invalidation.screen);
        }
        if self.renderer.surface().show_scrollbars() != canvas.settings().show_scrollbars {
            self.renderer
                .surface_mut()
                .set_show_scrollbars(canvas.settings().show_scrollbars);
            self.renderer.invalidate_all();
        }

        let frame = canvas.frame_scene(metrics.pixel_scale);
        let outcome = self.renderer.render_frame(&frame, target);
        if let Err(error) = &outcome {
            tracing::warn!(%error, "frame skipped, retrying next tick");
        }
        outcome
    }
}

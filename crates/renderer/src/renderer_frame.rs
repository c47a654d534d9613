use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use frame_scheduler::{
    Clock, DEFAULT_FRAME_BUDGET, FrameScheduler, FrameState, FrameTimer, SystemClock, TickInput,
    TickPlan, run_budgeted,
};
use model::Rect;
use render_protocol::{Affine, Color, DrawCommand, DrawList, RectF, RenderPass, TargetId};
use scene::{NodeKey, Palette, SceneGraph, SceneItem, VisualNode};
use view::ViewTransform;

use crate::RenderError;
use crate::backend::RenderBackend;
use crate::dirty::DirtyRegionTracker;
use crate::framebuffer::{Framebuffer, FramebufferCache, FramebufferRole};
use crate::surface::{
    FrameScene, GlyphCaches, PRESENTATION_SHADOW_RADIUS, RESIZE_HANDLE_SIZE, SurfaceRenderer,
    node_body, port_glyph_atlas, port_glyph_atlas_size, presentation_shadow_commands,
    resize_handle_commands,
};

/// Largest node or shadow bitmap worth caching, per side in pixels.
const MAX_CACHED_TARGET_SIZE: u32 = 2048;
const FPS_TEXT_SIZE: f32 = 11.0;

/// Physical surface the shell presents into this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTarget {
    pub pixel_scale: f32,
    pub physical_width: u32,
    pub physical_height: u32,
}

impl FrameTarget {
    pub fn logical_size(&self) -> (f32, f32) {
        let scale = self.scale();
        (
            self.physical_width as f32 / scale,
            self.physical_height as f32 / scale,
        )
    }

    fn logical_extent(&self) -> Rect {
        let (width, height) = self.logical_size();
        Rect::new(0, 0, width.ceil() as i32, height.ceil() as i32)
    }

    fn device_rect(&self) -> Rect {
        Rect::new(
            0,
            0,
            i32::try_from(self.physical_width).unwrap_or(i32::MAX),
            i32::try_from(self.physical_height).unwrap_or(i32::MAX),
        )
    }

    fn scale(&self) -> f32 {
        if self.pixel_scale > 0.0 {
            self.pixel_scale
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSettings {
    pub budget: Duration,
    pub show_fps: bool,
    /// Refresh per-node bitmaps with spare frame time.
    pub cache_nodes: bool,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            budget: DEFAULT_FRAME_BUDGET,
            show_fps: false,
            cache_nodes: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// No surface this tick.
    Skipped,
    /// Pixel scale changed; the context was dropped and renders next tick.
    TornDown,
    Presented {
        /// Logical rectangle repainted into Main, empty for a clean frame.
        repainted: Rect,
        node_caches_refreshed: usize,
        state: FrameState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeCacheSpec {
    width: u32,
    height: u32,
    version: u64,
}

fn node_cache_spec(node: &VisualNode, selected: bool, scale: f32) -> Option<NodeCacheSpec> {
    if node.is_pending() {
        return None;
    }
    let paint = node.paint_bounds();
    let width = (paint.width as f32 * scale).ceil() as u32;
    let height = (paint.height as f32 * scale).ceil() as u32;
    let fits = |side: u32| side > 0 && side <= MAX_CACHED_TARGET_SIZE;
    if !fits(width) || !fits(height) {
        return None;
    }
    let mut hasher = DefaultHasher::new();
    (node.version(), selected, scale.to_bits()).hash(&mut hasher);
    Some(NodeCacheSpec {
        width,
        height,
        version: hasher.finish(),
    })
}

/// Incremental canvas renderer over a [`RenderBackend`].
pub struct Renderer<B: RenderBackend, C: Clock = SystemClock> {
    backend: B,
    clock: C,
    settings: FrameSettings,
    scheduler: FrameScheduler,
    dirty: DirtyRegionTracker,
    framebuffers: FramebufferCache,
    surface: SurfaceRenderer,
    frame_timer: FrameTimer,
    /// Nodes whose cache should be refreshed with spare frame time.
    stale_nodes: Vec<NodeKey>,
}

impl<B: RenderBackend> Renderer<B, SystemClock> {
    pub fn new(backend: B, settings: FrameSettings) -> Self {
        Self::with_clock(backend, SystemClock::new(), settings)
    }
}

impl<B: RenderBackend, C: Clock> Renderer<B, C> {
    pub fn with_clock(backend: B, clock: C, settings: FrameSettings) -> Self {
        Self {
            backend,
            clock,
            settings,
            scheduler: FrameScheduler::new(settings.budget),
            dirty: DirtyRegionTracker::new(Rect::EMPTY),
            framebuffers: FramebufferCache::new(),
            surface: SurfaceRenderer::new(),
            frame_timer: FrameTimer::default(),
            stale_nodes: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn settings(&self) -> FrameSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: FrameSettings) {
        self.scheduler.set_budget(settings.budget);
        self.settings = settings;
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn framebuffers(&self) -> &FramebufferCache {
        &self.framebuffers
    }

    pub fn frame_timer(&self) -> &FrameTimer {
        &self.frame_timer
    }

    pub fn surface(&self) -> &SurfaceRenderer {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut SurfaceRenderer {
        &mut self.surface
    }

    /// Region waiting for the next repaint, in logical viewport pixels.
    pub fn dirty_region(&self) -> Rect {
        self.dirty.peek()
    }

    pub fn pending_node_caches(&self) -> usize {
        self.stale_nodes.len()
    }

    pub fn invalidate(&mut self, rect: Rect) {
        self.dirty.invalidate(rect);
    }

    pub fn invalidate_all(&mut self) {
        self.dirty.invalidate_all();
    }

    pub fn invalidate_canvas_rect(&mut self, rect: Rect, view: &ViewTransform) {
        self.dirty.invalidate(view.canvas_rect_to_screen(rect));
    }

    pub fn release_nodes(&mut self, keys: &[NodeKey]) {
        for key in keys {
            self.framebuffers
                .release(&mut self.backend, FramebufferRole::Node(*key));
        }
        self.stale_nodes.retain(|key| !keys.contains(key));
    }

    /// Drops node caches of nodes no longer in `scene`.
    pub fn retain_nodes(&mut self, scene: &SceneGraph) -> usize {
        self.stale_nodes.retain(|key| scene.node(*key).is_some());
        self.framebuffers
            .retain_nodes(&mut self.backend, |key| scene.node(key).is_some())
    }

    /// Destroys every framebuffer and the render context.
    pub fn teardown(&mut self) {
        self.framebuffers.release_all(&mut self.backend);
        self.backend.teardown();
        self.surface.set_glyphs(GlyphCaches::default());
        self.stale_nodes.clear();
    }

    /// Runs one display tick.
    ///
    /// On error nothing already marked dirty is lost; the tick is retried
    /// with the same region next time.
    pub fn render_frame(
        &mut self,
        frame: &FrameScene<'_>,
        target: Option<FrameTarget>,
    ) -> Result<FrameOutcome, RenderError> {
        let budget = self.scheduler.begin_budget(&self.clock);
        let input = TickInput {
            surface_available: target.is_some(),
            context_ready: self.backend.is_initialized(),
            pixel_scale: target.map_or(1.0, |target| target.scale()),
            physical_width: target.map_or(0, |target| target.physical_width),
            physical_height: target.map_or(0, |target| target.physical_height),
        };
        let (initialize, resize) = match self.scheduler.plan_tick(input) {
            TickPlan::Skip => return Ok(FrameOutcome::Skipped),
            TickPlan::Teardown => {
                self.teardown();
                return Ok(FrameOutcome::TornDown);
            }
            TickPlan::Render { initialize, resize } => (initialize, resize),
        };
        let Some(target) = target else {
            return Ok(FrameOutcome::Skipped);
        };

        if initialize {
            self.framebuffers.forget_all();
            self.surface.set_glyphs(GlyphCaches::default());
            self.stale_nodes.clear();
            self.backend.initialize()?;
        }
        let pixel_scale = target.scale();

        if resize {
            self.dirty.set_extent(target.logical_extent());
            self.dirty.invalidate_all();
        }
        let main = self.framebuffers.ensure(
            &mut self.backend,
            FramebufferRole::Main,
            target.physical_width,
            target.physical_height,
        )?;
        let invalid = self.framebuffers.ensure(
            &mut self.backend,
            FramebufferRole::Invalid,
            target.physical_width,
            target.physical_height,
        )?;
        if main.created {
            self.dirty.invalidate_all();
        }
        if self.refresh_glyph_caches(frame, pixel_scale)? {
            tracing::debug!("glyph caches re-rendered");
            self.dirty.invalidate_all();
        }

        let region = self.dirty.take_dirty_region();
        let repainted = if region.is_empty() {
            Rect::EMPTY
        } else {
            match self.repaint(frame, target, region, main.framebuffer, invalid.framebuffer) {
                Ok(repainted) => repainted,
                Err(error) => {
                    self.dirty.invalidate(region);
                    return Err(error);
                }
            }
        };

        let overlay = if self.settings.show_fps {
            self.fps_overlay(frame.palette)
        } else {
            DrawList::new()
        };
        self.backend
            .present(main.framebuffer.target, &overlay, pixel_scale)?;
        self.frame_timer.add_frame(self.clock.now());

        let mut refreshed = 0;
        if self.settings.cache_nodes
            && !self.stale_nodes.is_empty()
            && !budget.is_exceeded(&self.clock)
        {
            let scale = frame.view.zoom() * pixel_scale;
            let queued = std::mem::take(&mut self.stale_nodes);
            let Self {
                backend,
                clock,
                framebuffers,
                ..
            } = self;
            let outcome = run_budgeted(&*clock, &budget, queued.iter().copied(), |key| {
                match refresh_node_cache(backend, framebuffers, frame, key, scale) {
                    Ok(true) => refreshed += 1,
                    Ok(false) => {}
                    Err(error) => tracing::warn!(?key, %error, "node cache refresh failed"),
                }
            });
            self.stale_nodes = queued[outcome.processed..].to_vec();
        }

        let state = self
            .scheduler
            .finish_tick(budget.is_exceeded(&self.clock));
        tracing::trace!(
            ?repainted,
            refreshed,
            pending = self.stale_nodes.len(),
            ?state,
            "frame presented"
        );
        Ok(FrameOutcome::Presented {
            repainted,
            node_caches_refreshed: refreshed,
            state,
        })
    }

    /// Paints `region` into Invalid and copies it into Main.
    fn repaint(
        &mut self,
        frame: &FrameScene<'_>,
        target: FrameTarget,
        region: Rect,
        main: Framebuffer,
        invalid: Framebuffer,
    ) -> Result<Rect, RenderError> {
        let paint = region.expanded(1).intersection(&self.dirty.extent());
        if paint.is_empty() {
            return Ok(Rect::EMPTY);
        }
        let pixel_scale = target.scale();
        let scissor = paint
            .scaled_outward(pixel_scale)
            .intersection(&target.device_rect());
        let cache_scale = frame.view.zoom() * pixel_scale;

        let framebuffers = &self.framebuffers;
        let layers = self.surface.build(frame, paint, |key| {
            let node = frame.scene.node(key)?;
            let selected = frame.scene.is_selected(SceneItem::Node(key));
            let spec = node_cache_spec(node, selected, cache_scale)?;
            let role = FramebufferRole::Node(key);
            framebuffers
                .is_current(role, spec.width, spec.height, spec.version)
                .then(|| framebuffers.get(role))
                .flatten()
                .map(|framebuffer| framebuffer.target)
        });

        let device = Affine::scale(pixel_scale);
        self.backend.draw(&RenderPass {
            target: invalid.target,
            transform: device.after(frame.view_affine()),
            scissor: Some(scissor),
            clear: Some(frame.palette.background),
            commands: layers.canvas,
        })?;
        if !layers.screen.is_empty() {
            self.backend.draw(&RenderPass {
                target: invalid.target,
                transform: device,
                scissor: Some(scissor),
                clear: None,
                commands: layers.screen,
            })?;
        }
        self.backend
            .composite(invalid.target, main.target, scissor)?;

        if self.settings.cache_nodes {
            let canvas_region = frame.view_affine().inverse_rect(paint);
            for (key, node) in frame.scene.nodes() {
                if !node.paint_bounds().intersects(&canvas_region)
                    || self.stale_nodes.contains(&key)
                {
                    continue;
                }
                let selected = frame.scene.is_selected(SceneItem::Node(key));
                let stale = node_cache_spec(node, selected, cache_scale).is_some_and(|spec| {
                    !self.framebuffers.is_current(
                        FramebufferRole::Node(key),
                        spec.width,
                        spec.height,
                        spec.version,
                    )
                });
                if stale {
                    self.stale_nodes.push(key);
                }
            }
        }
        Ok(paint)
    }

    /// Re-renders shared glyph targets whose pixel size changed. Returns
    /// `true` when anything was re-rendered.
    fn refresh_glyph_caches(
        &mut self,
        frame: &FrameScene<'_>,
        pixel_scale: f32,
    ) -> Result<bool, RenderError> {
        let mut glyphs = self.surface.glyphs();
        let mut changed = false;
        let glyph_scale = frame.view.zoom() * pixel_scale;

        let (atlas_width, atlas_height) = port_glyph_atlas_size();
        let width = ((atlas_width * glyph_scale).ceil() as u32).max(1);
        let height = ((atlas_height * glyph_scale).ceil() as u32).max(1);
        if self
            .framebuffers
            .needs_update(FramebufferRole::PortGlyphs, width, height)
            || glyphs.port_glyphs.is_none()
            || glyphs.port_glyph_scale != glyph_scale
        {
            let target = self.render_glyph(
                FramebufferRole::PortGlyphs,
                (width, height),
                glyph_scale,
                port_glyph_atlas(frame.palette),
            )?;
            glyphs.port_glyphs = Some(target);
            glyphs.port_glyph_scale = glyph_scale;
            changed = true;
        }

        let handle = ((RESIZE_HANDLE_SIZE * pixel_scale).ceil() as u32).max(1);
        if self
            .framebuffers
            .needs_update(FramebufferRole::ResizeHandle, handle, handle)
            || glyphs.resize_handle.is_none()
        {
            let target = self.render_glyph(
                FramebufferRole::ResizeHandle,
                (handle, handle),
                pixel_scale,
                resize_handle_commands(frame.palette),
            )?;
            glyphs.resize_handle = Some(target);
            changed = true;
        }

        let window = frame.presentation_window;
        let shadow_size = (
            ((window.width as f32 + PRESENTATION_SHADOW_RADIUS * 2.0) * glyph_scale).ceil() as u32,
            ((window.height as f32 + PRESENTATION_SHADOW_RADIUS * 2.0) * glyph_scale).ceil() as u32,
        );
        let wants_shadow = frame.presentation
            && !window.is_empty()
            && shadow_size.0 <= MAX_CACHED_TARGET_SIZE
            && shadow_size.1 <= MAX_CACHED_TARGET_SIZE;
        if wants_shadow {
            if self.framebuffers.needs_update(
                FramebufferRole::PresentationShadow,
                shadow_size.0,
                shadow_size.1,
            ) || glyphs.presentation_shadow.is_none()
            {
                match self.render_glyph(
                    FramebufferRole::PresentationShadow,
                    shadow_size,
                    glyph_scale,
                    presentation_shadow_commands(window, frame.palette),
                ) {
                    Ok(target) => {
                        glyphs.presentation_shadow = Some(target);
                        changed = true;
                    }
                    Err(error) => {
                        tracing::warn!(%error, "presentation shadow not cached");
                        glyphs.presentation_shadow = None;
                    }
                }
            }
        } else if glyphs.presentation_shadow.take().is_some() {
            self.framebuffers
                .release(&mut self.backend, FramebufferRole::PresentationShadow);
            changed = true;
        }

        self.surface.set_glyphs(glyphs);
        Ok(changed)
    }

    fn render_glyph(
        &mut self,
        role: FramebufferRole,
        (width, height): (u32, u32),
        scale: f32,
        commands: DrawList,
    ) -> Result<TargetId, RenderError> {
        let ensured = self
            .framebuffers
            .ensure(&mut self.backend, role, width, height)?;
        self.backend.draw(&RenderPass {
            target: ensured.framebuffer.target,
            transform: Affine::scale(scale),
            scissor: None,
            clear: Some(Color::TRANSPARENT),
            commands,
        })?;
        Ok(ensured.framebuffer.target)
    }

    fn fps_overlay(&self, palette: &Palette) -> DrawList {
        let Some(fps) = self.frame_timer.frames_per_second() else {
            return DrawList::new();
        };
        let text = format!("{fps:.0}");
        let width = text.chars().count() as f32 * FPS_TEXT_SIZE * 0.6 + 8.0;
        [
            DrawCommand::FillRect {
                rect: RectF::new(4.0, 4.0, width, FPS_TEXT_SIZE + 6.0),
                color: palette.popup_fill,
                corner_radius: 2.0,
            },
            DrawCommand::Text {
                origin: model::PointF::new(8.0, 7.0),
                text,
                size: FPS_TEXT_SIZE,
                color: palette.text,
            },
        ]
        .into_iter()
        .collect()
    }
}

/// Renders one node into its cache. Returns `false` when there was nothing
/// to do.
fn refresh_node_cache<B: RenderBackend>(
    backend: &mut B,
    framebuffers: &mut FramebufferCache,
    frame: &FrameScene<'_>,
    key: NodeKey,
    scale: f32,
) -> Result<bool, RenderError> {
    let Some(node) = frame.scene.node(key) else {
        return Ok(false);
    };
    let selected = frame.scene.is_selected(SceneItem::Node(key));
    let Some(spec) = node_cache_spec(node, selected, scale) else {
        return Ok(false);
    };
    let role = FramebufferRole::Node(key);
    if framebuffers.is_current(role, spec.width, spec.height, spec.version) {
        return Ok(false);
    }
    let ensured = framebuffers.ensure(backend, role, spec.width, spec.height)?;
    let paint = node.paint_bounds();
    backend.draw(&RenderPass {
        target: ensured.framebuffer.target,
        transform: Affine::new(scale, -paint.x as f32 * scale, -paint.y as f32 * scale),
        scissor: None,
        clear: Some(Color::TRANSPARENT),
        commands: node_body(node, selected, frame.palette),
    })?;
    framebuffers.mark_rendered(role, spec.version);
    Ok(true)
}

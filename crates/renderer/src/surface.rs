//! Builds the layered draw lists of one repaint.
//!
//! Canvas-space layers, the suggestion popup included, share the view's
//! zoom/scroll transform. Scrollbars are emitted in logical screen space.

use document_protocol::{PortDirection, PortKind};
use model::{PointF, Rect};
use render_protocol::{Affine, Color, DrawCommand, DrawList, GridMajor, RectF, TargetId};
use scene::{NodeKey, Palette, Port, SceneGraph, SceneItem, VisualNode};
use view::ViewTransform;

/// Blur radius of the presentation window shadow, in canvas units.
pub const PRESENTATION_SHADOW_RADIUS: f32 = 12.0;

/// Logical size of one port glyph cell; the atlas holds four side by side.
pub(crate) const PORT_GLYPH_CELL: (f32, f32) = (16.0, 6.0);
pub(crate) const PORT_GLYPH_CELLS: usize = 4;
/// Logical size of the resize handle, independent of zoom.
pub(crate) const RESIZE_HANDLE_SIZE: f32 = 9.0;

const GRID_MAJOR_EVERY: u32 = 4;
const SCROLLBAR_THICKNESS: f32 = 6.0;
const SCROLLBAR_MARGIN: f32 = 2.0;
const SUGGESTION_WIDTH: f32 = 160.0;
const SUGGESTION_ROW_HEIGHT: f32 = 18.0;
const SUGGESTION_TEXT_SIZE: f32 = 11.0;

/// Linear remap of `value` from one range onto another.
fn jmap(value: f32, source_min: f32, source_max: f32, target_min: f32, target_max: f32) -> f32 {
    target_min + (value - source_min) / (source_max - source_min) * (target_max - target_min)
}

/// Enlarged size used below zoom 0.3 on low density displays.
fn far_zoom_size(zoom: f32, pixel_scale: f32) -> Option<f32> {
    (zoom < 0.3 && pixel_scale <= 1.0).then(|| jmap(zoom, 0.3, 0.25, 4.0, 8.0))
}

/// Grid dot diameter in canvas units for `zoom`.
pub fn dot_size_for_zoom(zoom: f32, pixel_scale: f32) -> f32 {
    far_zoom_size(zoom, pixel_scale)
        .unwrap_or_else(|| jmap(zoom.clamp(0.25, 1.0), 1.0, 0.25, 1.0, 4.0))
}

/// Border and origin stroke width in canvas units for `zoom`.
pub fn line_width_for_zoom(zoom: f32, pixel_scale: f32) -> f32 {
    far_zoom_size(zoom, pixel_scale)
        .unwrap_or_else(|| jmap(zoom.clamp(0.25, 1.0), 1.0, 0.25, 1.5, 4.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortGlyph {
    ControlInput,
    ControlOutput,
    SignalInput,
    SignalOutput,
}

impl PortGlyph {
    pub const ALL: [PortGlyph; PORT_GLYPH_CELLS] = [
        PortGlyph::ControlInput,
        PortGlyph::ControlOutput,
        PortGlyph::SignalInput,
        PortGlyph::SignalOutput,
    ];

    pub fn of(port: &Port) -> Self {
        match (port.kind, port.direction) {
            (PortKind::Control, PortDirection::Input) => PortGlyph::ControlInput,
            (PortKind::Control, PortDirection::Output) => PortGlyph::ControlOutput,
            (PortKind::Signal, PortDirection::Input) => PortGlyph::SignalInput,
            (PortKind::Signal, PortDirection::Output) => PortGlyph::SignalOutput,
        }
    }

    pub fn cell(self) -> usize {
        match self {
            PortGlyph::ControlInput => 0,
            PortGlyph::ControlOutput => 1,
            PortGlyph::SignalInput => 2,
            PortGlyph::SignalOutput => 3,
        }
    }

    fn color(self, palette: &Palette) -> Color {
        match self {
            PortGlyph::ControlInput | PortGlyph::ControlOutput => palette.control_port,
            PortGlyph::SignalInput | PortGlyph::SignalOutput => palette.signal_port,
        }
    }

    fn is_output(self) -> bool {
        matches!(self, PortGlyph::ControlOutput | PortGlyph::SignalOutput)
    }
}

/// Completion list shown next to an object being typed.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    /// Canvas point the popup hangs from.
    pub anchor: PointF,
    pub entries: Vec<String>,
    pub highlighted: Option<usize>,
}

/// Shared glyph targets currently valid for the frame being built.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlyphCaches {
    pub port_glyphs: Option<TargetId>,
    /// Atlas pixels per logical glyph unit.
    pub port_glyph_scale: f32,
    pub resize_handle: Option<TargetId>,
    pub presentation_shadow: Option<TargetId>,
}

/// Everything the surface renderer reads to paint one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameScene<'a> {
    pub scene: &'a SceneGraph,
    pub view: ViewTransform,
    pub palette: &'a Palette,
    /// Logical viewport size.
    pub viewport: (f32, f32),
    pub pixel_scale: f32,
    pub locked: bool,
    pub presentation: bool,
    pub edges_behind_nodes: bool,
    pub grid_size: u32,
    pub show_origin: bool,
    pub show_border: bool,
    /// Canvas rectangle of the patch window, framed in presentation mode.
    pub presentation_window: Rect,
    pub suggestion: Option<&'a Suggestion>,
}

impl FrameScene<'_> {
    pub fn view_affine(&self) -> Affine {
        Affine::new(self.view.zoom(), self.view.offset_x(), self.view.offset_y())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceLayers {
    /// Canvas-space commands, drawn through the view transform.
    pub canvas: DrawList,
    /// Logical screen-space commands drawn on top.
    pub screen: DrawList,
}

#[derive(Debug, Clone)]
pub struct SurfaceRenderer {
    glyphs: GlyphCaches,
    show_scrollbars: bool,
}

impl Default for SurfaceRenderer {
    fn default() -> Self {
        Self {
            glyphs: GlyphCaches::default(),
            show_scrollbars: true,
        }
    }
}

impl SurfaceRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn glyphs(&self) -> GlyphCaches {
        self.glyphs
    }

    pub fn set_glyphs(&mut self, glyphs: GlyphCaches) {
        self.glyphs = glyphs;
    }

    pub fn show_scrollbars(&self) -> bool {
        self.show_scrollbars
    }

    pub fn set_show_scrollbars(&mut self, show: bool) {
        self.show_scrollbars = show;
    }

    /// Draw lists repainting the logical screen rectangle `clip`.
    ///
    /// `node_cache` returns the cached bitmap of a node when it is current;
    /// nodes without one are drawn from scratch.
    pub fn build(
        &self,
        frame: &FrameScene<'_>,
        clip: Rect,
        node_cache: impl Fn(NodeKey) -> Option<TargetId>,
    ) -> SurfaceLayers {
        let mut layers = SurfaceLayers::default();
        let canvas_clip = frame.view_affine().inverse_rect(clip);
        let canvas = &mut layers.canvas;

        canvas.push(DrawCommand::FillRect {
            rect: RectF::from(canvas_clip.expanded(1)),
            color: frame.palette.background,
            corner_radius: 0.0,
        });
        if !frame.locked && !frame.presentation {
            self.push_grid(frame, canvas_clip, canvas);
        }
        if !frame.presentation {
            self.push_guides(frame, canvas_clip, canvas);
        }

        if frame.presentation {
            self.push_presentation_frame(frame, canvas);
        }
        let visible = |bounds: Rect| bounds.intersects(&canvas_clip);
        for (key, node) in frame.scene.nodes() {
            if node.draws_behind() && visible(node.paint_bounds()) {
                self.push_node(frame, key, node, &node_cache, canvas);
            }
        }

        if frame.presentation {
            self.push_nodes(frame, &visible, &node_cache, canvas);
        } else if frame.edges_behind_nodes {
            self.push_edges(frame, &visible, canvas);
            self.push_nodes(frame, &visible, &node_cache, canvas);
        } else {
            self.push_nodes(frame, &visible, &node_cache, canvas);
            self.push_edges(frame, &visible, canvas);
        }

        for pending in frame.scene.pending_edges() {
            let Some(port) = frame.scene.port(pending.source) else {
                continue;
            };
            let from = port.anchor();
            let span = RectF::from_points(from, pending.cursor).to_rect_outward();
            if !visible(span.expanded(2)) {
                continue;
            }
            canvas.push(DrawCommand::Line {
                from,
                to: pending.cursor,
                color: frame.palette.selected,
                width: 1.5,
            });
        }

        for border in frame.scene.nested_borders() {
            if visible(border.expanded(1)) {
                canvas.push(DrawCommand::StrokeRect {
                    rect: RectF::from(*border),
                    color: frame.palette.border,
                    width: 1.0,
                    corner_radius: 0.0,
                });
            }
        }

        if let Some(lasso) = frame.scene.lasso_rect()
            && visible(lasso.expanded(1))
        {
            let rect = RectF::from(lasso);
            canvas.push(DrawCommand::FillRect {
                rect,
                color: frame.palette.lasso_fill,
                corner_radius: 0.0,
            });
            canvas.push(DrawCommand::StrokeRect {
                rect,
                color: frame.palette.lasso_outline,
                width: 1.0 / frame.view.zoom(),
                corner_radius: 0.0,
            });
        }

        if let Some(suggestion) = frame.suggestion {
            push_suggestion(frame, suggestion, canvas);
        }
        if self.show_scrollbars {
            push_scrollbars(frame, &mut layers.screen);
        }
        layers
    }

    fn push_grid(&self, frame: &FrameScene<'_>, canvas_clip: Rect, list: &mut DrawList) {
        if frame.grid_size == 0 {
            return;
        }
        let zoom = frame.view.zoom();
        let (spacing, major) = if zoom >= 1.0 {
            (frame.grid_size as f32, None)
        } else {
            (
                (frame.grid_size * GRID_MAJOR_EVERY) as f32,
                Some(GridMajor {
                    every: GRID_MAJOR_EVERY,
                    color: frame.palette.grid_major,
                }),
            )
        };
        let dot_size = dot_size_for_zoom(zoom, frame.pixel_scale);
        list.push(DrawCommand::DotGrid {
            area: RectF::from(canvas_clip.expanded(spacing.ceil() as i32)),
            spacing,
            dot_size,
            color: frame.palette.grid_dot,
            major,
        });
    }

    fn push_guides(&self, frame: &FrameScene<'_>, canvas_clip: Rect, list: &mut DrawList) {
        let width = line_width_for_zoom(frame.view.zoom(), frame.pixel_scale);
        if frame.show_border && !frame.presentation_window.is_empty() {
            list.push(DrawCommand::StrokeRect {
                rect: RectF::from(frame.presentation_window),
                color: frame.palette.border,
                width,
                corner_radius: 0.0,
            });
        }
        if frame.show_origin {
            let left = canvas_clip.x as f32;
            let right = canvas_clip.right() as f32;
            let top = canvas_clip.y as f32;
            let bottom = canvas_clip.bottom() as f32;
            if top <= 0.0 && bottom >= 0.0 {
                list.push(DrawCommand::Line {
                    from: PointF::new(left.max(0.0), 0.0),
                    to: PointF::new(right, 0.0),
                    color: frame.palette.border,
                    width,
                });
            }
            if left <= 0.0 && right >= 0.0 {
                list.push(DrawCommand::Line {
                    from: PointF::new(0.0, top.max(0.0)),
                    to: PointF::new(0.0, bottom),
                    color: frame.palette.border,
                    width,
                });
            }
        }
    }

    fn push_presentation_frame(&self, frame: &FrameScene<'_>, list: &mut DrawList) {
        let window = RectF::from(frame.presentation_window);
        if window.is_empty() {
            return;
        }
        match self.glyphs.presentation_shadow {
            Some(source) => list.push(DrawCommand::Blit {
                source,
                source_rect: None,
                dest: window.expanded(PRESENTATION_SHADOW_RADIUS),
            }),
            None => list.push(DrawCommand::Shadow {
                rect: window,
                radius: PRESENTATION_SHADOW_RADIUS,
                color: frame.palette.shadow,
            }),
        }
        list.push(DrawCommand::FillRect {
            rect: window,
            color: frame.palette.node_fill,
            corner_radius: 0.0,
        });
    }

    fn push_nodes(
        &self,
        frame: &FrameScene<'_>,
        visible: &impl Fn(Rect) -> bool,
        node_cache: &impl Fn(NodeKey) -> Option<TargetId>,
        list: &mut DrawList,
    ) {
        for (key, node) in frame.scene.nodes() {
            if !node.draws_behind() && visible(node.paint_bounds()) {
                self.push_node(frame, key, node, node_cache, list);
            }
        }
    }

    fn push_node(
        &self,
        frame: &FrameScene<'_>,
        key: NodeKey,
        node: &VisualNode,
        node_cache: &impl Fn(NodeKey) -> Option<TargetId>,
        list: &mut DrawList,
    ) {
        let selected = frame.scene.is_selected(SceneItem::Node(key));
        match node_cache(key) {
            Some(source) => list.push(DrawCommand::Blit {
                source,
                source_rect: None,
                dest: RectF::from(node.paint_bounds()),
            }),
            None => list.extend(node_body(node, selected, frame.palette)),
        }

        if !frame.presentation {
            for port in node.ports() {
                self.push_port(frame.palette, port, list);
            }
        }

        if node.activity() > 0 {
            let strength = f32::from(node.activity()) / f32::from(scene::ACTIVITY_TICKS);
            list.push(DrawCommand::StrokeRect {
                rect: RectF::from(node.bounds()).expanded(1.0),
                color: frame.palette.activity.with_alpha(strength),
                width: 2.0,
                corner_radius: 2.0,
            });
        }

        if selected && !frame.locked && !frame.presentation {
            self.push_resize_handle(frame, node.bounds(), list);
        }
    }

    fn push_port(&self, palette: &Palette, port: &Port, list: &mut DrawList) {
        let glyph = PortGlyph::of(port);
        let dest = RectF::from(port.rect);
        match self.glyphs.port_glyphs {
            Some(source) => list.push(DrawCommand::Blit {
                source,
                source_rect: Some(scaled(port_glyph_cell(glyph), self.glyphs.port_glyph_scale)),
                dest,
            }),
            None => list.extend(port_glyph_commands(glyph, dest, palette)),
        }
    }

    fn push_resize_handle(&self, frame: &FrameScene<'_>, bounds: Rect, list: &mut DrawList) {
        let size = RESIZE_HANDLE_SIZE / frame.view.zoom();
        let dest = RectF::new(
            bounds.right() as f32 - size,
            bounds.bottom() as f32 - size,
            size,
            size,
        );
        match self.glyphs.resize_handle {
            Some(source) => list.push(DrawCommand::Blit {
                source,
                source_rect: None,
                dest,
            }),
            None => {
                let transform = Affine::new(size / RESIZE_HANDLE_SIZE, dest.x, dest.y);
                for command in resize_handle_commands(frame.palette).commands() {
                    list.push(transform_line(command, transform));
                }
            }
        }
    }

    fn push_edges(
        &self,
        frame: &FrameScene<'_>,
        visible: &impl Fn(Rect) -> bool,
        list: &mut DrawList,
    ) {
        for (key, edge) in frame.scene.edges() {
            if !visible(edge.path().bounds()) {
                continue;
            }
            let color = if frame.scene.is_selected(SceneItem::Edge(key)) {
                frame.palette.selected
            } else if edge.is_signal() {
                frame.palette.signal_edge
            } else {
                frame.palette.edge
            };
            let width = if edge.is_signal() { 2.0 } else { 1.0 };
            edge.path().render(color, width, list);
        }
    }
}

/// Node body in canvas coordinates, as cached per node.
pub(crate) fn node_body(node: &VisualNode, selected: bool, palette: &Palette) -> DrawList {
    let mut list = DrawList::new();
    let text = node.pending_editor().unwrap_or(node.text());
    node.content()
        .render(node.bounds(), text, selected, palette, &mut list);
    list
}

fn scaled(rect: RectF, scale: f32) -> RectF {
    RectF::new(
        rect.x * scale,
        rect.y * scale,
        rect.width * scale,
        rect.height * scale,
    )
}

/// Cell of a glyph inside the atlas, in logical glyph units.
fn port_glyph_cell(glyph: PortGlyph) -> RectF {
    RectF::new(
        glyph.cell() as f32 * PORT_GLYPH_CELL.0,
        0.0,
        PORT_GLYPH_CELL.0,
        PORT_GLYPH_CELL.1,
    )
}

fn port_glyph_commands(glyph: PortGlyph, dest: RectF, palette: &Palette) -> DrawList {
    let color = glyph.color(palette);
    let mut list = DrawList::new();
    if glyph.is_output() {
        list.push(DrawCommand::FillRect {
            rect: dest,
            color: color.with_alpha(0.85),
            corner_radius: 1.0,
        });
        list.push(DrawCommand::StrokeRect {
            rect: dest,
            color,
            width: 1.0,
            corner_radius: 1.0,
        });
    } else {
        list.push(DrawCommand::FillRect {
            rect: dest,
            color,
            corner_radius: 1.0,
        });
    }
    list
}

/// Port glyph atlas content in logical cell units.
pub(crate) fn port_glyph_atlas(palette: &Palette) -> DrawList {
    let mut list = DrawList::new();
    for glyph in PortGlyph::ALL {
        let cell = port_glyph_cell(glyph);
        // Glyphs fill their cell at twice the port size, so inset the stroke.
        list.extend(port_glyph_commands(glyph, cell.expanded(-0.5), palette));
    }
    list
}

pub(crate) fn port_glyph_atlas_size() -> (f32, f32) {
    (PORT_GLYPH_CELL.0 * PORT_GLYPH_CELLS as f32, PORT_GLYPH_CELL.1)
}

/// Resize handle in its own `RESIZE_HANDLE_SIZE` square.
pub(crate) fn resize_handle_commands(palette: &Palette) -> DrawList {
    let size = RESIZE_HANDLE_SIZE;
    [0.35, 0.7]
        .into_iter()
        .map(|inset: f32| DrawCommand::Line {
            from: PointF::new(size * inset, size),
            to: PointF::new(size, size * inset),
            color: palette.selected,
            width: 1.0,
        })
        .collect()
}

/// Presentation shadow drawn into a target covering the window plus the
/// shadow radius on every side, in canvas units.
pub(crate) fn presentation_shadow_commands(window: Rect, palette: &Palette) -> DrawList {
    let radius = PRESENTATION_SHADOW_RADIUS;
    std::iter::once(DrawCommand::Shadow {
        rect: RectF::new(radius, radius, window.width as f32, window.height as f32),
        radius,
        color: palette.shadow,
    })
    .collect()
}

fn transform_line(command: &DrawCommand, transform: Affine) -> DrawCommand {
    match command {
        DrawCommand::Line {
            from,
            to,
            color,
            width,
        } => DrawCommand::Line {
            from: transform.apply(*from),
            to: transform.apply(*to),
            color: *color,
            width: width * transform.scale,
        },
        other => other.clone(),
    }
}

fn push_suggestion(frame: &FrameScene<'_>, suggestion: &Suggestion, list: &mut DrawList) {
    if suggestion.entries.is_empty() {
        return;
    }
    let rect = RectF::new(
        suggestion.anchor.x,
        suggestion.anchor.y,
        SUGGESTION_WIDTH,
        SUGGESTION_ROW_HEIGHT * suggestion.entries.len() as f32,
    );
    list.push(DrawCommand::Shadow {
        rect,
        radius: 6.0,
        color: frame.palette.shadow,
    });
    list.push(DrawCommand::FillRect {
        rect,
        color: frame.palette.popup_fill,
        corner_radius: 3.0,
    });
    for (row, entry) in suggestion.entries.iter().enumerate() {
        let top = rect.y + row as f32 * SUGGESTION_ROW_HEIGHT;
        if suggestion.highlighted == Some(row) {
            list.push(DrawCommand::FillRect {
                rect: RectF::new(rect.x, top, rect.width, SUGGESTION_ROW_HEIGHT),
                color: frame.palette.selected.with_alpha(0.3),
                corner_radius: 0.0,
            });
        }
        list.push(DrawCommand::Text {
            origin: PointF::new(
                rect.x + 6.0,
                top + (SUGGESTION_ROW_HEIGHT - SUGGESTION_TEXT_SIZE) / 2.0,
            ),
            text: entry.clone(),
            size: SUGGESTION_TEXT_SIZE,
            color: frame.palette.text,
        });
    }
    list.push(DrawCommand::StrokeRect {
        rect,
        color: frame.palette.node_outline,
        width: 1.0,
        corner_radius: 3.0,
    });
}

/// Scrollbar thumbs for content reaching outside the visible area.
fn push_scrollbars(frame: &FrameScene<'_>, list: &mut DrawList) {
    let content = frame.scene.node_bounds_union();
    let (width, height) = frame.viewport;
    if content.is_empty() || width <= 0.0 || height <= 0.0 {
        return;
    }
    let visible = frame.view.visible_canvas_rect(width, height);
    if visible.contains_rect(&content) {
        return;
    }
    let total = visible.union(&content);
    if total.width > visible.width {
        let start = (visible.x - total.x) as f32 / total.width as f32;
        let extent = visible.width as f32 / total.width as f32;
        list.push(DrawCommand::FillRect {
            rect: RectF::new(
                start * width,
                height - SCROLLBAR_THICKNESS - SCROLLBAR_MARGIN,
                extent * width,
                SCROLLBAR_THICKNESS,
            ),
            color: frame.palette.scrollbar,
            corner_radius: SCROLLBAR_THICKNESS / 2.0,
        });
    }
    if total.height > visible.height {
        let start = (visible.y - total.y) as f32 / total.height as f32;
        let extent = visible.height as f32 / total.height as f32;
        list.push(DrawCommand::FillRect {
            rect: RectF::new(
                width - SCROLLBAR_THICKNESS - SCROLLBAR_MARGIN,
                start * height,
                SCROLLBAR_THICKNESS,
                extent * height,
            ),
            color: frame.palette.scrollbar,
            corner_radius: SCROLLBAR_THICKNESS / 2.0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use document::PatchDocument;
    use document_protocol::{DocumentCommands, DocumentView, NewObject};
    use model::Point;

    fn scene_with(objects: &[(i32, i32)]) -> SceneGraph {
        let mut document = PatchDocument::new();
        for (index, (x, y)) in objects.iter().enumerate() {
            let first = document
                .create_object(
                    NewObject::text(format!("obj{index}"), Point::new(*x, *y))
                        .with_ports(1, 1)
                        .with_size(40, 20),
                )
                .unwrap();
            if index > 0 {
                let previous = document.snapshot().objects()[index - 1].id;
                document.connect(previous, 0, first, 0).unwrap();
            }
        }
        let mut scene = SceneGraph::new();
        scene.reconcile(&document.snapshot(), 1.0);
        scene
    }

    fn frame<'a>(scene: &'a SceneGraph, palette: &'a Palette) -> FrameScene<'a> {
        FrameScene {
            scene,
            view: ViewTransform::default(),
            palette,
            viewport: (400.0, 300.0),
            pixel_scale: 1.0,
            locked: false,
            presentation: false,
            edges_behind_nodes: false,
            grid_size: 25,
            show_origin: true,
            show_border: true,
            presentation_window: Rect::new(0, 0, 300, 200),
            suggestion: None,
        }
    }

    fn count(list: &DrawList, predicate: impl Fn(&DrawCommand) -> bool) -> usize {
        list.commands().iter().filter(|command| predicate(command)).count()
    }

    #[test]
    fn dot_size_grows_as_zoom_shrinks() {
        assert_eq!(dot_size_for_zoom(1.0, 1.0), 1.0);
        assert_eq!(dot_size_for_zoom(2.0, 2.0), 1.0);
        assert_eq!(dot_size_for_zoom(0.25, 2.0), 4.0);
        assert_eq!(dot_size_for_zoom(0.25, 1.0), 8.0);
        assert!((dot_size_for_zoom(0.275, 1.0) - 6.0).abs() < 1e-4);
        assert!(dot_size_for_zoom(0.2, 1.0) > 8.0);
        assert!(dot_size_for_zoom(0.2, 2.0) <= 4.0);
    }

    #[test]
    fn line_width_thickens_at_far_zoom() {
        assert_eq!(line_width_for_zoom(1.0, 1.0), 1.5);
        assert_eq!(line_width_for_zoom(2.0, 1.0), 1.5);
        assert_eq!(line_width_for_zoom(0.25, 2.0), 4.0);
        assert_eq!(line_width_for_zoom(0.25, 1.0), 8.0);
        assert_eq!(line_width_for_zoom(0.3, 1.0), line_width_for_zoom(0.3, 2.0));
    }

    #[test]
    fn grid_hidden_when_locked_or_presenting() {
        let scene = scene_with(&[(10, 10)]);
        let palette = Palette::default();
        let renderer = SurfaceRenderer::new();
        let clip = Rect::new(0, 0, 400, 300);
        let is_grid = |command: &DrawCommand| matches!(command, DrawCommand::DotGrid { .. });

        let unlocked = renderer.build(&frame(&scene, &palette), clip, |_| None);
        assert_eq!(count(&unlocked.canvas, is_grid), 1);

        let locked = FrameScene {
            locked: true,
            ..frame(&scene, &palette)
        };
        assert_eq!(count(&renderer.build(&locked, clip, |_| None).canvas, is_grid), 0);
    }

    #[test]
    fn zoomed_out_grid_uses_major_pattern() {
        let scene = scene_with(&[]);
        let palette = Palette::default();
        let mut zoomed_out = frame(&scene, &palette);
        zoomed_out.view.set_zoom(0.5).unwrap();
        let layers = SurfaceRenderer::new().build(&zoomed_out, Rect::new(0, 0, 400, 300), |_| None);
        let grid = layers
            .canvas
            .commands()
            .iter()
            .find_map(|command| match command {
                DrawCommand::DotGrid { spacing, major, .. } => Some((*spacing, *major)),
                _ => None,
            })
            .expect("grid");
        assert_eq!(grid.0, 100.0);
        assert_eq!(grid.1.map(|major| major.every), Some(4));
    }

    #[test]
    fn nodes_outside_clip_are_culled() {
        let scene = scene_with(&[(10, 10), (1000, 1000)]);
        let palette = Palette::default();
        let renderer = SurfaceRenderer::new();
        let layers = renderer.build(&frame(&scene, &palette), Rect::new(0, 0, 100, 100), |_| None);
        let texts: Vec<&str> = layers
            .canvas
            .commands()
            .iter()
            .filter_map(|command| match command {
                DrawCommand::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["obj0"]);
    }

    #[test]
    fn presentation_mode_hides_edges_and_ports() {
        let scene = scene_with(&[(10, 10), (10, 100)]);
        let palette = Palette::default();
        let renderer = SurfaceRenderer::new();
        let clip = Rect::new(0, 0, 400, 300);
        let is_edge = |command: &DrawCommand| matches!(command, DrawCommand::Bezier { .. });

        let normal = renderer.build(&frame(&scene, &palette), clip, |_| None);
        assert_eq!(count(&normal.canvas, is_edge), 1);

        let presenting = FrameScene {
            presentation: true,
            ..frame(&scene, &palette)
        };
        let layers = renderer.build(&presenting, clip, |_| None);
        assert_eq!(count(&layers.canvas, is_edge), 0);
        assert_eq!(
            count(&layers.canvas, |command| matches!(command, DrawCommand::Shadow { .. })),
            1
        );
    }

    #[test]
    fn edges_follow_nodes_unless_drawn_behind() {
        let scene = scene_with(&[(10, 10), (10, 100)]);
        let palette = Palette::default();
        let renderer = SurfaceRenderer::new();
        let clip = Rect::new(0, 0, 400, 300);
        let position = |list: &DrawList, predicate: fn(&DrawCommand) -> bool| {
            list.commands().iter().position(predicate).expect("command")
        };
        let is_edge: fn(&DrawCommand) -> bool =
            |command| matches!(command, DrawCommand::Bezier { .. });
        let is_text: fn(&DrawCommand) -> bool =
            |command| matches!(command, DrawCommand::Text { .. });

        let front = renderer.build(&frame(&scene, &palette), clip, |_| None);
        assert!(position(&front.canvas, is_edge) > position(&front.canvas, is_text));

        let behind = FrameScene {
            edges_behind_nodes: true,
            ..frame(&scene, &palette)
        };
        let behind = renderer.build(&behind, clip, |_| None);
        assert!(position(&behind.canvas, is_edge) < position(&behind.canvas, is_text));
    }

    #[test]
    fn cached_nodes_and_ports_are_blitted() {
        let scene = scene_with(&[(10, 10)]);
        let palette = Palette::default();
        let mut renderer = SurfaceRenderer::new();
        renderer.set_glyphs(GlyphCaches {
            port_glyphs: Some(TargetId(90)),
            port_glyph_scale: 2.0,
            ..GlyphCaches::default()
        });
        let layers = renderer.build(&frame(&scene, &palette), Rect::new(0, 0, 400, 300), |_| {
            Some(TargetId(7))
        });
        let blits: Vec<(TargetId, Option<RectF>)> = layers
            .canvas
            .commands()
            .iter()
            .filter_map(|command| match command {
                DrawCommand::Blit {
                    source,
                    source_rect,
                    ..
                } => Some((*source, *source_rect)),
                _ => None,
            })
            .collect();
        assert_eq!(blits[0], (TargetId(7), None));
        assert_eq!(
            blits[1..].iter().map(|(source, _)| *source).collect::<Vec<_>>(),
            vec![TargetId(90), TargetId(90)]
        );
        assert_eq!(blits[1].1, Some(RectF::new(0.0, 0.0, 32.0, 12.0)));
        assert_eq!(blits[2].1, Some(RectF::new(32.0, 0.0, 32.0, 12.0)));
    }

    #[test]
    fn scrollbars_appear_for_offscreen_content() {
        let palette = Palette::default();
        let renderer = SurfaceRenderer::new();
        let clip = Rect::new(0, 0, 400, 300);

        let fits = scene_with(&[(10, 10)]);
        assert!(renderer.build(&frame(&fits, &palette), clip, |_| None).screen.is_empty());

        let wide = scene_with(&[(10, 10), (2000, 10)]);
        let layers = renderer.build(&frame(&wide, &palette), clip, |_| None);
        assert_eq!(layers.screen.len(), 1);
    }

    #[test]
    fn suggestion_popup_follows_the_canvas_transform() {
        let scene = scene_with(&[]);
        let palette = Palette::default();
        let suggestion = Suggestion {
            anchor: PointF::new(50.0, 40.0),
            entries: vec!["osc~".to_owned(), "osc".to_owned()],
            highlighted: Some(1),
        };
        let mut zoomed = frame(&scene, &palette);
        zoomed.view.set_zoom(2.0).unwrap();
        zoomed.view.pan_by(10.0, 0.0).unwrap();
        zoomed.suggestion = Some(&suggestion);
        let layers = SurfaceRenderer::new().build(&zoomed, Rect::new(0, 0, 400, 300), |_| None);
        let body = layers
            .canvas
            .commands()
            .iter()
            .find_map(|command| match command {
                DrawCommand::FillRect { rect, color, .. } if *color == palette.popup_fill => {
                    Some(*rect)
                }
                _ => None,
            })
            .expect("popup body");
        assert_eq!((body.x, body.y), (50.0, 40.0));
        assert_eq!(body.height, 36.0);
        assert_eq!(
            count(&layers.canvas, |command| matches!(command, DrawCommand::Text { .. })),
            2
        );
        assert!(layers.screen.is_empty());
    }
}

use std::mem;

use document_protocol::{DocumentCommands, DocumentView, NewObject, ObjectId};
use engine::SharedDocument;
use model::{Point, PointF, Rect};
use protocol::UiTask;
use renderer::{FrameScene, Suggestion};
use scene::{
    EdgeKey, HitTarget, NodeKey, Palette, Parameter, ParameterValue, PortRef, ReconcileReport,
    SceneGraph, SceneItem,
};
use view::ViewTransform;

use crate::{CanvasError, CanvasSettings};

/// Size of a freshly placed creation editor.
const EDITOR_SIZE: (i32, i32) = (60, 22);
const FIT_MARGIN: f32 = 40.0;
const CONNECT_LABEL: &str = "Connect";

/// Explicit replacement for observing view properties: every change to how
/// a view looks or behaves arrives through [`Canvas::apply_update`].
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasUpdate {
    Locked(bool),
    Presentation(bool),
    Zoom(f32),
    EdgesBehindNodes(bool),
    GridSize(u32),
    ShowOrigin(bool),
    ShowBorder(bool),
    ShowScrollbars(bool),
    PresentationWindow { width: u32, height: u32 },
    Palette(Palette),
}

/// Repaint work collected between ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Invalidation {
    /// Canvas-space union, mapped through the view when drained.
    pub canvas: Rect,
    /// Logical screen-space union.
    pub screen: Rect,
    pub all: bool,
}

impl Invalidation {
    pub fn is_empty(&self) -> bool {
        !self.all && self.canvas.is_empty() && self.screen.is_empty()
    }
}

/// One view of a document: its scene, transform and interaction state.
///
/// All document access is a short closure under the shared lock; the
/// reconciliation pass itself runs on a snapshot.
pub struct Canvas<D> {
    document: SharedDocument<D>,
    scene: SceneGraph,
    view: ViewTransform,
    palette: Palette,
    settings: CanvasSettings,
    locked: bool,
    presentation: bool,
    sync_pending: bool,
    viewport: (f32, f32),
    suggestion: Option<Suggestion>,
    focused: Option<NodeKey>,
    invalidation: Invalidation,
    released_nodes: Vec<NodeKey>,
}

impl<D> Canvas<D> {
    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub fn view(&self) -> &ViewTransform {
        &self.view
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn settings(&self) -> &CanvasSettings {
        &self.settings
    }

    pub fn document(&self) -> &SharedDocument<D> {
        &self.document
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_presenting(&self) -> bool {
        self.presentation
    }

    pub fn viewport(&self) -> (f32, f32) {
        self.viewport
    }

    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.viewport = (width, height);
    }

    pub fn visible_canvas_rect(&self) -> Rect {
        self.view
            .visible_canvas_rect(self.viewport.0, self.viewport.1)
    }

    /// Requests a reconciliation pass on the next tick. Any number of
    /// requests before then collapse into one pass.
    pub fn synchronise(&mut self) {
        self.sync_pending = true;
    }

    pub fn is_sync_pending(&self) -> bool {
        self.sync_pending
    }

    pub fn apply_update(&mut self, update: CanvasUpdate) -> Result<(), CanvasError> {
        match update {
            CanvasUpdate::Locked(locked) => self.set_locked(locked),
            CanvasUpdate::Presentation(presentation) => self.set_presentation(presentation),
            CanvasUpdate::Zoom(zoom) => {
                self.view.set_zoom(zoom)?;
                self.view_changed();
            }
            CanvasUpdate::Palette(palette) => {
                self.palette = palette;
                self.invalidate_all();
            }
            update => {
                let mut next = self.settings.clone();
                match update {
                    CanvasUpdate::EdgesBehindNodes(value) => next.edges_behind_nodes = value,
                    CanvasUpdate::GridSize(value) => next.grid_size = value,
                    CanvasUpdate::ShowOrigin(value) => next.show_origin = value,
                    CanvasUpdate::ShowBorder(value) => next.show_border = value,
                    CanvasUpdate::ShowScrollbars(value) => next.show_scrollbars = value,
                    CanvasUpdate::PresentationWindow { width, height } => {
                        next.presentation_window.width = width;
                        next.presentation_window.height = height;
                    }
                    CanvasUpdate::Locked(_)
                    | CanvasUpdate::Presentation(_)
                    | CanvasUpdate::Zoom(_)
                    | CanvasUpdate::Palette(_) => {}
                }
                next.validate()?;
                if next != self.settings {
                    self.settings = next;
                    self.invalidate_all();
                }
            }
        }
        Ok(())
    }

    fn set_locked(&mut self, locked: bool) {
        if self.locked == locked {
            return;
        }
        self.locked = locked;
        if !locked {
            self.presentation = false;
        }
        self.scene.cancel_connections();
        self.scene.cancel_lasso();
        self.scene.clear_selection();
        self.suggestion = None;
        self.invalidate_all();
        tracing::debug!(locked, "canvas lock changed");
    }

    fn set_presentation(&mut self, presentation: bool) {
        if self.presentation == presentation {
            return;
        }
        self.presentation = presentation;
        self.scene.cancel_connections();
        self.scene.clear_selection();
        self.suggestion = None;
        self.invalidate_all();
        tracing::debug!(presentation, "presentation mode changed");
    }

    /// Zoom feeds node content, so a transform change also reconciles.
    fn view_changed(&mut self) {
        self.suggestion = None;
        self.synchronise();
        self.invalidate_all();
    }

    pub fn zoom_about_point(&mut self, factor: f32, screen: PointF) -> Result<(), CanvasError> {
        self.view.zoom_about_point(factor, screen.x, screen.y)?;
        self.view_changed();
        Ok(())
    }

    pub fn pan_by(&mut self, delta_x: f32, delta_y: f32) -> Result<(), CanvasError> {
        self.view.pan_by(delta_x, delta_y)?;
        self.invalidate_all();
        Ok(())
    }

    pub fn jump_to_origin(&mut self) {
        self.view.jump_to_origin();
        self.invalidate_all();
    }

    /// Frames every node in the current viewport.
    pub fn zoom_to_fit_all(&mut self) -> Result<(), CanvasError> {
        let content = self.scene.node_bounds_union();
        self.view
            .zoom_to_fit(content, self.viewport.0, self.viewport.1, FIT_MARGIN)?;
        self.view_changed();
        Ok(())
    }

    pub fn screen_to_canvas(&self, screen: PointF) -> Result<PointF, CanvasError> {
        Ok(self.view.screen_to_canvas_point(screen.x, screen.y)?)
    }

    pub fn hit_test(&self, point: PointF) -> Option<HitTarget> {
        self.scene.hit_test(point)
    }

    pub fn items_in(&self, area: Rect) -> Vec<SceneItem> {
        self.scene.items_intersecting(area)
    }

    pub fn selected_items(&self) -> Vec<SceneItem> {
        let nodes = self.scene.selected_nodes().into_iter().map(SceneItem::Node);
        let edges = self.scene.selected_edges().into_iter().map(SceneItem::Edge);
        nodes.chain(edges).collect()
    }

    /// Adds `item` to the selection. Locked views do not select.
    pub fn select(&mut self, item: SceneItem) -> bool {
        if self.locked || !self.scene.select(item) {
            return false;
        }
        self.invalidate_item(item);
        true
    }

    pub fn deselect(&mut self, item: SceneItem) -> bool {
        if !self.scene.deselect(item) {
            return false;
        }
        self.invalidate_item(item);
        true
    }

    pub fn deselect_all(&mut self) {
        let dirty = self.scene.selection_bounds();
        if self.scene.clear_selection() {
            self.invalidate_canvas_rect(dirty);
        }
    }

    pub fn select_only(&mut self, item: SceneItem) -> bool {
        self.deselect_all();
        self.select(item)
    }

    pub fn begin_lasso(&mut self, point: PointF, additive: bool) -> bool {
        if self.locked {
            return false;
        }
        self.scene.begin_lasso(point, additive);
        true
    }

    pub fn update_lasso(&mut self, point: PointF) {
        let dirty = self.scene.update_lasso(point);
        self.invalidate_canvas_rect(dirty);
    }

    pub fn finish_lasso(&mut self) {
        let dirty = self.scene.finish_lasso();
        self.invalidate_canvas_rect(dirty);
    }

    /// Restores the selection the lasso started from.
    pub fn cancel_lasso(&mut self) {
        let dirty = self.scene.cancel_lasso();
        self.invalidate_canvas_rect(dirty);
    }

    pub fn begin_connection(&mut self, source: PortRef) -> bool {
        if self.locked {
            return false;
        }
        self.scene.begin_connection(source)
    }

    pub fn update_connection(&mut self, cursor: PointF) {
        let dirty = self.scene.update_connection(cursor);
        self.invalidate_canvas_rect(dirty);
    }

    /// Drops every edge being dragged; nothing reaches the document.
    pub fn cancel_connections(&mut self) {
        let dirty = self.scene.cancel_connections();
        self.invalidate_canvas_rect(dirty);
    }

    pub fn focused_node(&self) -> Option<NodeKey> {
        self.focused.filter(|key| self.scene.node(*key).is_some())
    }

    pub fn suggestion(&self) -> Option<&Suggestion> {
        self.suggestion.as_ref()
    }

    pub fn set_suggestion(&mut self, suggestion: Option<Suggestion>) {
        if self.suggestion != suggestion {
            self.suggestion = suggestion;
            self.invalidate_all();
        }
    }

    pub fn parameters(&self, key: NodeKey) -> Option<Vec<Parameter>> {
        self.scene.node(key).map(|node| node.content().parameters())
    }

    /// Advances activity flashes by one tick.
    pub fn tick_activity(&mut self) {
        let dirty = self.scene.tick_activity();
        self.invalidate_canvas_rect(dirty);
    }

    /// Drops the creation editor without touching the document.
    pub fn cancel_pending_node(&mut self, key: NodeKey) -> bool {
        let pending = self.scene.node(key).is_some_and(|node| node.is_pending());
        if !pending {
            return false;
        }
        if let Some(dirty) = self.scene.remove_node(key) {
            self.invalidate_canvas_rect(dirty);
        }
        self.released_nodes.push(key);
        true
    }

    pub fn set_pending_text(&mut self, key: NodeKey, text: &str) -> Result<(), CanvasError> {
        let node = self
            .scene
            .node_mut(key)
            .ok_or(CanvasError::UnknownNode(key))?;
        if !node.is_pending() {
            return Err(CanvasError::NotPending(key));
        }
        node.set_editor_text(text);
        let dirty = node.paint_bounds();
        self.invalidate_canvas_rect(dirty);
        Ok(())
    }

    /// Applies a plain-data request from the engine thread. Returns `false`
    /// when its object has no node in this view.
    pub fn handle_ui_task(&mut self, task: UiTask) -> bool {
        let target = task.target();
        let Some(key) = self.scene.find_node_for(target) else {
            tracing::trace!(%target, "ui task target is not in this view");
            return false;
        };
        match task {
            UiTask::ObjectActivity(_) => {
                if let Some(node) = self.scene.node_mut(key) {
                    node.flash_activity();
                    let dirty = node.paint_bounds();
                    self.invalidate_canvas_rect(dirty);
                }
            }
            UiTask::FocusObject(_) => {
                self.select_only(SceneItem::Node(key));
                self.focused = Some(key);
            }
            UiTask::RepaintObject(_) => {
                self.invalidate_item(SceneItem::Node(key));
                self.synchronise();
            }
        }
        true
    }

    pub fn invalidate_canvas_rect(&mut self, rect: Rect) {
        if !rect.is_empty() {
            self.invalidation.canvas = self.invalidation.canvas.union(&rect);
        }
    }

    pub fn invalidate_screen_rect(&mut self, rect: Rect) {
        if !rect.is_empty() {
            self.invalidation.screen = self.invalidation.screen.union(&rect);
        }
    }

    pub fn invalidate_all(&mut self) {
        self.invalidation.all = true;
    }

    fn invalidate_item(&mut self, item: SceneItem) {
        if let Some(bounds) = self.scene.item_bounds(item) {
            self.invalidate_canvas_rect(bounds.expanded(1));
        }
    }

    pub fn take_invalidation(&mut self) -> Invalidation {
        mem::take(&mut self.invalidation)
    }

    /// Nodes removed since the last call; their render caches can go.
    pub fn take_released_nodes(&mut self) -> Vec<NodeKey> {
        mem::take(&mut self.released_nodes)
    }

    pub fn frame_scene(&self, pixel_scale: f32) -> FrameScene<'_> {
        FrameScene {
            scene: &self.scene,
            view: self.view,
            palette: &self.palette,
            viewport: self.viewport,
            pixel_scale,
            locked: self.locked,
            presentation: self.presentation,
            edges_behind_nodes: self.settings.edges_behind_nodes,
            grid_size: self.settings.grid_size,
            show_origin: self.settings.show_origin,
            show_border: self.settings.show_border,
            presentation_window: self.settings.presentation_rect(),
            suggestion: self.suggestion.as_ref(),
        }
    }

    fn pending_edge_bounds(&self) -> Rect {
        self.scene
            .pending_edges()
            .iter()
            .filter_map(|pending| {
                let anchor = self.scene.port(pending.source)?.anchor();
                Some(Rect::from_corners(anchor.round(), pending.cursor.round()).expanded(2))
            })
            .fold(Rect::EMPTY, |union, rect| union.union(&rect))
    }
}

impl<D> Canvas<D>
where
    D: DocumentView + DocumentCommands,
{
    /// Opens a view. The first tick reconciles it against the document.
    pub fn new(document: SharedDocument<D>, settings: CanvasSettings) -> Self {
        let locked = document.read(|document| document.is_locked());
        let mut view = ViewTransform::default();
        if let Err(error) = view.set_zoom(settings.default_zoom) {
            tracing::warn!(?error, zoom = settings.default_zoom, "ignoring default zoom");
        }
        Self {
            document,
            scene: SceneGraph::new(),
            view,
            palette: Palette::default(),
            settings,
            locked,
            presentation: false,
            sync_pending: true,
            viewport: (0.0, 0.0),
            suggestion: None,
            focused: None,
            invalidation: Invalidation {
                all: true,
                ..Invalidation::default()
            },
            released_nodes: Vec::new(),
        }
    }

    /// Runs the reconciliation pass now against a fresh snapshot.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn perform_synchronise(&mut self) -> ReconcileReport {
        let snapshot = self.document.read(|document| document.snapshot());
        let report = self.scene.reconcile(&snapshot, self.view.zoom());
        self.sync_pending = false;
        if !report.is_noop() {
            self.invalidate_canvas_rect(report.affected);
        }
        if !report.removed_nodes.is_empty() {
            self.released_nodes.extend(report.removed_nodes.iter().copied());
        }
        tracing::debug!(
            revision = snapshot.revision(),
            added = report.added_nodes.len(),
            removed = report.removed_nodes.len(),
            skipped = report.skipped_connections.len(),
            "view reconciled"
        );
        report
    }

    pub fn synchronise_if_pending(&mut self) -> Option<ReconcileReport> {
        if self.sync_pending {
            Some(self.perform_synchronise())
        } else {
            None
        }
    }

    /// Places an inline creation editor at `position` (canvas units).
    pub fn create_pending_node(&mut self, position: Point) -> Result<NodeKey, CanvasError> {
        if self.locked {
            return Err(CanvasError::Locked);
        }
        self.deselect_all();
        let bounds = Rect::new(position.x, position.y, EDITOR_SIZE.0, EDITOR_SIZE.1);
        let key = self.scene.add_pending_node(bounds);
        self.scene.select(SceneItem::Node(key));
        self.invalidate_item(SceneItem::Node(key));
        Ok(key)
    }

    /// Creates the document object for a creation editor and binds the node
    /// to it. Blank text cancels the editor instead.
    pub fn commit_pending_node(
        &mut self,
        key: NodeKey,
        text: &str,
    ) -> Result<Option<ObjectId>, CanvasError> {
        let node = self.scene.node(key).ok_or(CanvasError::UnknownNode(key))?;
        if !node.is_pending() {
            return Err(CanvasError::NotPending(key));
        }
        let position = node.bounds().position();
        let text = text.trim();
        if text.is_empty() {
            self.cancel_pending_node(key);
            return Ok(None);
        }
        let id = self
            .document
            .write(|document| document.create_object(NewObject::text(text, position)))?;
        if let Some(node) = self.scene.node_mut(key) {
            node.bind(id);
        }
        self.perform_synchronise();
        Ok(Some(id))
    }

    /// Ends an edge drag over `target` and connects every valid pair.
    /// Returns how many connections the document accepted.
    pub fn finish_connection(&mut self, target: Option<PortRef>) -> Result<usize, CanvasError> {
        let dirty = self.pending_edge_bounds();
        self.invalidate_canvas_rect(dirty);
        let requests = self.scene.finish_connection(target);
        if requests.is_empty() {
            return Ok(0);
        }
        let grouped = requests.len() > 1;
        let (made, closed) = self.document.write(|document| {
            if grouped {
                document.begin_transaction(CONNECT_LABEL);
            }
            let mut made = 0;
            for request in &requests {
                match document.connect(
                    request.source,
                    request.source_port,
                    request.destination,
                    request.destination_port,
                ) {
                    Ok(_) => made += 1,
                    Err(error) => tracing::debug!(%error, "connection request rejected"),
                }
            }
            let closed = if grouped {
                document.end_transaction(CONNECT_LABEL)
            } else {
                Ok(())
            };
            (made, closed)
        });
        self.perform_synchronise();
        closed?;
        Ok(made)
    }

    /// Connects the first outlet of the upper of two selected nodes to the
    /// first inlet of the lower one.
    pub fn connect_selected(&mut self) -> Result<bool, CanvasError> {
        let selected = self.scene.selected_nodes();
        let [first, second] = selected.as_slice() else {
            return Ok(false);
        };
        let (Some(first), Some(second)) = (self.scene.node(*first), self.scene.node(*second))
        else {
            return Ok(false);
        };
        let (top, bottom) = if first.bounds().y > second.bounds().y {
            (second, first)
        } else {
            (first, second)
        };
        if top.output_count() == 0 || bottom.input_count() == 0 {
            return Ok(false);
        }
        let (Some(source), Some(destination)) = (top.handle(), bottom.handle()) else {
            return Ok(false);
        };
        self.document
            .write(|document| document.connect(source, 0, destination, 0))?;
        self.synchronise();
        Ok(true)
    }

    /// Moves the selected objects in the document and reconciles.
    pub fn move_selection(&mut self, delta_x: i32, delta_y: i32) {
        let ids = self.scene.selected_object_ids();
        if ids.is_empty() || (delta_x == 0 && delta_y == 0) {
            return;
        }
        self.document
            .write(|document| document.move_objects(&ids, delta_x, delta_y));
        self.perform_synchronise();
    }

    /// Edits one parameter of a node's content and stores the result in the
    /// document. Returns `false` if the parameter does not apply.
    pub fn set_parameter(
        &mut self,
        key: NodeKey,
        name: &str,
        value: &ParameterValue,
    ) -> Result<bool, CanvasError> {
        let node = self.scene.node(key).ok_or(CanvasError::UnknownNode(key))?;
        let id = node.handle().ok_or(CanvasError::Unbound(key))?;
        let mut content = node.content().clone();
        if !content.set_parameter(name, value) {
            return Ok(false);
        }
        let kind = content.to_kind();
        self.document
            .write(|document| document.set_object_kind(id, kind))?;
        if let Some(node) = self.scene.node_mut(key) {
            *node.content_mut() = content;
        }
        self.invalidate_item(SceneItem::Node(key));
        Ok(true)
    }

    /// Reroutes an edge through `waypoints` and writes its path state back.
    pub fn set_edge_route(
        &mut self,
        key: EdgeKey,
        waypoints: Vec<PointF>,
    ) -> Result<(), CanvasError> {
        let edge = self
            .scene
            .edge_mut(key)
            .ok_or(CanvasError::UnknownEdge(key))?;
        let before = edge.path().bounds();
        let id = edge.handle();
        let path_state = edge.set_waypoints(waypoints);
        let after = edge.path().bounds();
        self.invalidate_canvas_rect(before.union(&after).expanded(1));
        self.document
            .write(|document| document.set_path_state(id, path_state))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use document::PatchDocument;
    use document_protocol::{ObjectKind, PortDirection, PortDescriptor};
    use scene::ArrayDrawMode;

    fn canvas_with(document: PatchDocument) -> Canvas<PatchDocument> {
        let mut canvas = Canvas::new(SharedDocument::new(document), CanvasSettings::default());
        canvas.set_viewport(400.0, 300.0);
        canvas.perform_synchronise();
        canvas.take_invalidation();
        canvas
    }

    fn object(text: &str, x: i32, y: i32, inputs: usize, outputs: usize) -> NewObject {
        NewObject::text(text, Point::new(x, y)).with_ports(inputs, outputs)
    }

    fn two_objects() -> (PatchDocument, ObjectId, ObjectId) {
        let mut document = PatchDocument::new();
        let first = document.create_object(object("osc~ 440", 10, 10, 2, 1)).unwrap();
        let second = document.create_object(object("dac~", 10, 80, 2, 0)).unwrap();
        (document, first, second)
    }

    fn output_port(canvas: &Canvas<PatchDocument>, id: ObjectId, index: usize) -> PortRef {
        let key = canvas.scene().find_node_for(id).unwrap();
        let slot = canvas.scene().node(key).unwrap().output_slot(index).unwrap();
        PortRef { node: key, slot }
    }

    fn input_port(canvas: &Canvas<PatchDocument>, id: ObjectId, index: usize) -> PortRef {
        let key = canvas.scene().find_node_for(id).unwrap();
        let slot = canvas.scene().node(key).unwrap().input_slot(index).unwrap();
        PortRef { node: key, slot }
    }

    #[test]
    fn new_view_reconciles_on_first_request_only() {
        let (document, _, _) = two_objects();
        let mut canvas = Canvas::new(SharedDocument::new(document), CanvasSettings::default());
        assert!(canvas.is_sync_pending());
        assert!(canvas.take_invalidation().all);

        let report = canvas.synchronise_if_pending().unwrap();
        assert_eq!(report.added_nodes.len(), 2);
        assert!(canvas.synchronise_if_pending().is_none());

        canvas.synchronise();
        canvas.synchronise();
        let report = canvas.synchronise_if_pending().unwrap();
        assert!(report.is_noop());
    }

    #[test]
    fn pending_node_survives_reconcile_until_committed() {
        let mut canvas = canvas_with(PatchDocument::new());
        let key = canvas.create_pending_node(Point::new(30, 40)).unwrap();
        canvas.set_pending_text(key, "metro 100").unwrap();

        canvas.perform_synchronise();
        assert!(canvas.scene().node(key).unwrap().is_pending());

        let id = canvas.commit_pending_node(key, " metro 100 ").unwrap().unwrap();
        let node = canvas.scene().node(key).unwrap();
        assert_eq!(node.handle(), Some(id));
        assert_eq!(node.text(), "metro 100");
        assert_eq!(node.bounds().position(), Point::new(30, 40));
        assert_eq!(canvas.scene().node_count(), 1);
        assert!(matches!(
            canvas.commit_pending_node(key, "again"),
            Err(CanvasError::NotPending(_))
        ));
    }

    #[test]
    fn blank_commit_cancels_the_editor() {
        let mut canvas = canvas_with(PatchDocument::new());
        let key = canvas.create_pending_node(Point::new(0, 0)).unwrap();
        assert_eq!(canvas.commit_pending_node(key, "   ").unwrap(), None);
        assert_eq!(canvas.scene().node_count(), 0);
        assert_eq!(canvas.take_released_nodes(), vec![key]);
        assert_eq!(canvas.document().read(|document| document.object_count()), 0);
    }

    #[test]
    fn locked_view_refuses_editing() {
        let (document, first, _) = two_objects();
        let mut canvas = canvas_with(document);
        canvas.apply_update(CanvasUpdate::Locked(true)).unwrap();

        assert!(matches!(
            canvas.create_pending_node(Point::ORIGIN),
            Err(CanvasError::Locked)
        ));
        let key = canvas.scene().find_node_for(first).unwrap();
        assert!(!canvas.select(SceneItem::Node(key)));
        assert!(!canvas.begin_connection(output_port(&canvas, first, 0)));
        assert!(!canvas.begin_lasso(PointF::new(0.0, 0.0), false));
    }

    #[test]
    fn locking_cancels_connections_and_selection() {
        let (document, first, second) = two_objects();
        let mut canvas = canvas_with(document);
        let key = canvas.scene().find_node_for(second).unwrap();
        assert!(canvas.select(SceneItem::Node(key)));
        assert!(canvas.begin_connection(output_port(&canvas, first, 0)));
        canvas.take_invalidation();

        canvas.apply_update(CanvasUpdate::Locked(true)).unwrap();
        assert!(canvas.scene().pending_edges().is_empty());
        assert_eq!(canvas.scene().selection_len(), 0);
        assert!(canvas.take_invalidation().all);

        canvas.apply_update(CanvasUpdate::Presentation(true)).unwrap();
        assert!(canvas.is_presenting());
        canvas.apply_update(CanvasUpdate::Locked(false)).unwrap();
        assert!(!canvas.is_presenting());
    }

    #[test]
    fn edge_drag_connects_and_reconciles() {
        let (document, first, second) = two_objects();
        let mut canvas = canvas_with(document);
        assert!(canvas.begin_connection(output_port(&canvas, first, 0)));
        canvas.update_connection(PointF::new(20.0, 85.0));
        assert!(!canvas.take_invalidation().canvas.is_empty());

        let made = canvas
            .finish_connection(Some(input_port(&canvas, second, 1)))
            .unwrap();
        assert_eq!(made, 1);
        assert_eq!(canvas.scene().edge_count(), 1);
        let (_, edge) = canvas.scene().edges().next().unwrap();
        assert_eq!(
            canvas.scene().port(edge.destination()).unwrap().index,
            1
        );
    }

    #[test]
    fn cancelled_edge_drag_leaves_nothing_behind() {
        let (document, first, _) = two_objects();
        let mut canvas = canvas_with(document);
        assert!(canvas.begin_connection(output_port(&canvas, first, 0)));
        canvas.cancel_connections();
        assert_eq!(canvas.finish_connection(None).unwrap(), 0);
        assert_eq!(canvas.scene().edge_count(), 0);
        assert_eq!(
            canvas.document().read(|document| document.connection_count()),
            0
        );
    }

    #[test]
    fn connect_selected_goes_top_to_bottom() {
        let (document, first, second) = two_objects();
        let mut canvas = canvas_with(document);
        let lower = canvas.scene().find_node_for(second).unwrap();
        let upper = canvas.scene().find_node_for(first).unwrap();
        canvas.select(SceneItem::Node(lower));
        canvas.select(SceneItem::Node(upper));

        assert!(canvas.connect_selected().unwrap());
        canvas.synchronise_if_pending();
        let connections = canvas.document().read(|document| document.connections());
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].source, first);
        assert_eq!(connections[0].destination, second);
    }

    #[test]
    fn lasso_selects_and_cancel_restores() {
        let (document, first, second) = two_objects();
        let mut canvas = canvas_with(document);
        let upper = canvas.scene().find_node_for(first).unwrap();
        canvas.select(SceneItem::Node(upper));

        assert!(canvas.begin_lasso(PointF::new(0.0, 60.0), false));
        canvas.update_lasso(PointF::new(200.0, 120.0));
        let lower = canvas.scene().find_node_for(second).unwrap();
        assert!(canvas.scene().is_selected(SceneItem::Node(lower)));
        assert!(!canvas.scene().is_selected(SceneItem::Node(upper)));

        canvas.cancel_lasso();
        assert!(canvas.scene().is_selected(SceneItem::Node(upper)));
        assert!(!canvas.scene().is_selected(SceneItem::Node(lower)));
    }

    #[test]
    fn ui_tasks_for_missing_objects_are_dropped() {
        let (document, first, _) = two_objects();
        let mut canvas = canvas_with(document);
        assert!(!canvas.handle_ui_task(UiTask::ObjectActivity(ObjectId(999))));

        assert!(canvas.handle_ui_task(UiTask::ObjectActivity(first)));
        let key = canvas.scene().find_node_for(first).unwrap();
        assert!(canvas.scene().node(key).unwrap().activity() > 0);
        assert!(!canvas.take_invalidation().canvas.is_empty());

        assert!(canvas.handle_ui_task(UiTask::FocusObject(first)));
        assert_eq!(canvas.focused_node(), Some(key));
        assert!(canvas.scene().is_selected(SceneItem::Node(key)));

        assert!(canvas.handle_ui_task(UiTask::RepaintObject(first)));
        assert!(canvas.is_sync_pending());
    }

    #[test]
    fn parameter_edits_are_written_to_the_document() {
        let mut document = PatchDocument::new();
        let id = document
            .create_object(object("array1", 0, 0, 0, 0).with_kind(ObjectKind::Array {
                name: "array1".to_owned(),
                size: 100,
                draw_type: 0,
                save_contents: true,
            }))
            .unwrap();
        let mut canvas = canvas_with(document);
        let key = canvas.scene().find_node_for(id).unwrap();

        let choice = |mode: ArrayDrawMode| ParameterValue::Choice {
            index: mode.choice_index(),
            options: ArrayDrawMode::CHOICES,
        };
        let draw_type = |canvas: &Canvas<PatchDocument>| {
            canvas.document().read(|document| {
                match document.resolve_object(id).map(|object| object.kind) {
                    Some(ObjectKind::Array { draw_type, .. }) => Some(draw_type),
                    _ => None,
                }
            })
        };

        assert!(canvas
            .set_parameter(key, "draw_mode", &choice(ArrayDrawMode::Bezier))
            .unwrap());
        assert_eq!(draw_type(&canvas), Some(2));
        let report = canvas.perform_synchronise();
        assert!(report.refreshed_nodes.is_empty());

        assert!(canvas
            .set_parameter(key, "draw_mode", &choice(ArrayDrawMode::Points))
            .unwrap());
        assert_eq!(draw_type(&canvas), Some(1));

        assert!(!canvas
            .set_parameter(key, "no_such", &ParameterValue::Bool(true))
            .unwrap());
    }

    #[test]
    fn edge_routes_are_written_back() {
        let (mut document, first, second) = two_objects();
        let connection = document.connect(first, 0, second, 0).unwrap();
        let mut canvas = canvas_with(document);
        let edge = canvas.scene().find_edge_for(connection).unwrap();

        canvas
            .set_edge_route(edge, vec![PointF::new(100.0, 50.0)])
            .unwrap();
        let stored = canvas.document().read(|document| {
            document.connections()[0].path_state.clone()
        });
        assert_eq!(
            stored.as_deref(),
            canvas.scene().edge(edge).unwrap().path_state()
        );

        let report = canvas.perform_synchronise();
        assert_eq!(report.recreated_edges, 0);
        assert_eq!(canvas.scene().find_edge_for(connection), Some(edge));
    }

    #[test]
    fn port_renumbering_rebinds_edges() {
        let (mut document, first, second) = two_objects();
        document.connect(first, 0, second, 1).unwrap();
        let mut canvas = canvas_with(document);

        canvas.document().write(|document| {
            document
                .insert_port(second, PortDirection::Input, 0, PortDescriptor::SIGNAL)
                .unwrap();
        });
        canvas.perform_synchronise();

        let (_, edge) = canvas.scene().edges().next().unwrap();
        assert_eq!(canvas.scene().port(edge.destination()).unwrap().index, 2);
    }

    #[test]
    fn settings_updates_are_validated() {
        let mut canvas = canvas_with(PatchDocument::new());
        assert!(matches!(
            canvas.apply_update(CanvasUpdate::GridSize(0)),
            Err(CanvasError::Settings(_))
        ));
        assert_eq!(canvas.settings().grid_size, 25);

        canvas.apply_update(CanvasUpdate::GridSize(10)).unwrap();
        assert_eq!(canvas.frame_scene(1.0).grid_size, 10);
        assert!(canvas.take_invalidation().all);

        assert!(matches!(
            canvas.apply_update(CanvasUpdate::Zoom(f32::NAN)),
            Err(CanvasError::View(_))
        ));
    }

    #[test]
    fn zoom_changes_request_a_reconcile() {
        let mut canvas = canvas_with(PatchDocument::new());
        canvas
            .zoom_about_point(2.0, PointF::new(100.0, 100.0))
            .unwrap();
        assert!(canvas.is_sync_pending());
        assert_eq!(canvas.view().zoom(), 2.0);
        assert_eq!(canvas.frame_scene(1.0).view.zoom(), 2.0);

        canvas.jump_to_origin();
        assert_eq!(canvas.view().offset_x(), 0.0);
    }
}

use document_protocol::{DocumentCommands, DocumentError, DocumentView, ObjectId};
use engine::{NoticeReceiver, SharedDocument, UiTaskReceiver};
use model::Point;
use protocol::{NoticeBatch, UiTaskBatch};
use scene::{NodeKey, SceneItem};
use slotmap::SlotMap;

use crate::{Canvas, CanvasError, CanvasSettings, CanvasUpdate};

pub const PASTE_LABEL: &str = "Paste object/s";
pub const DUPLICATE_LABEL: &str = "Duplicate object/s";
pub const REMOVE_LABEL: &str = "Remove object/s";

/// Padding between successive pastes at the same spot.
const PASTE_STEP: i32 = 10;

slotmap::new_key_type! {
    pub struct ViewKey;
}

/// Shifts repeated pastes at one position so they do not stack exactly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PasteCascade {
    position: Option<Point>,
    padding: (i32, i32),
}

impl PasteCascade {
    fn next(&mut self, position: Point) -> Point {
        if self.position == Some(position) {
            self.padding.0 += PASTE_STEP;
            self.padding.1 += PASTE_STEP;
        } else {
            self.padding = (-PASTE_STEP, -PASTE_STEP);
        }
        self.position = Some(position);
        position.translated(self.padding.0, self.padding.1)
    }
}

/// Extra offset applied to duplicates after the user dragged a previous
/// duplicate away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DuplicateOffset {
    current: (i32, i32),
    last: (i32, i32),
}

impl DuplicateOffset {
    fn next(&mut self) -> (i32, i32) {
        if self.last != self.current {
            self.current.0 += self.last.0;
            self.current.1 += self.last.1;
        }
        self.last = self.current;
        self.current
    }
}

/// Every open view of one document, plus the operations that must keep all
/// of them consistent.
pub struct Workspace<D> {
    document: SharedDocument<D>,
    settings: CanvasSettings,
    views: SlotMap<ViewKey, Canvas<D>>,
    clipboard: Option<String>,
    paste: PasteCascade,
    duplicate: DuplicateOffset,
}

impl<D> Workspace<D>
where
    D: DocumentView + DocumentCommands,
{
    pub fn new(document: SharedDocument<D>, settings: CanvasSettings) -> Self {
        Self {
            document,
            settings,
            views: SlotMap::with_key(),
            clipboard: None,
            paste: PasteCascade::default(),
            duplicate: DuplicateOffset::default(),
        }
    }

    pub fn document(&self) -> &SharedDocument<D> {
        &self.document
    }

    pub fn settings(&self) -> &CanvasSettings {
        &self.settings
    }

    pub fn open_view(&mut self) -> ViewKey {
        let canvas = Canvas::new(self.document.clone(), self.settings.clone());
        let key = self.views.insert(canvas);
        tracing::debug!(?key, views = self.views.len(), "view opened");
        key
    }

    pub fn close_view(&mut self, key: ViewKey) -> Option<Canvas<D>> {
        self.views.remove(key)
    }

    pub fn view(&self, key: ViewKey) -> Option<&Canvas<D>> {
        self.views.get(key)
    }

    pub fn view_mut(&mut self, key: ViewKey) -> Option<&mut Canvas<D>> {
        self.views.get_mut(key)
    }

    pub fn views(&self) -> impl Iterator<Item = (ViewKey, &Canvas<D>)> + '_ {
        self.views.iter()
    }

    pub fn views_mut(&mut self) -> impl Iterator<Item = (ViewKey, &mut Canvas<D>)> + '_ {
        self.views.iter_mut()
    }

    pub fn clipboard(&self) -> Option<&str> {
        self.clipboard.as_deref()
    }

    pub fn set_clipboard(&mut self, text: impl Into<String>) {
        self.clipboard = Some(text.into());
    }

    fn canvas_mut(&mut self, key: ViewKey) -> Result<&mut Canvas<D>, CanvasError> {
        self.views.get_mut(key).ok_or(CanvasError::UnknownView(key))
    }

    /// Applies the notices drained this tick. Any number of structural
    /// notices collapse into one pending pass per view.
    pub fn process_notices(&mut self, batch: NoticeBatch) {
        if let Some(locked) = batch.locked {
            self.set_views_locked(locked);
        }
        if batch.needs_synchronise {
            for canvas in self.views.values_mut() {
                canvas.synchronise();
            }
        }
    }

    /// Delivers engine requests. Returns how many reached a live node.
    pub fn process_ui_tasks(&mut self, tasks: UiTaskBatch) -> usize {
        let mut delivered = 0;
        for task in tasks {
            let mut handled = false;
            for canvas in self.views.values_mut() {
                handled |= canvas.handle_ui_task(task);
            }
            if handled {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drains both engine queues once.
    pub fn pump(&mut self, notices: &NoticeReceiver, tasks: &mut UiTaskReceiver) {
        self.process_notices(notices.drain());
        self.process_ui_tasks(tasks.drain());
    }

    /// Locks or unlocks the document and every view of it.
    pub fn set_locked(&mut self, locked: bool) {
        self.document.write(|document| document.set_locked(locked));
        self.set_views_locked(locked);
    }

    fn set_views_locked(&mut self, locked: bool) {
        for canvas in self.views.values_mut() {
            if let Err(error) = canvas.apply_update(CanvasUpdate::Locked(locked)) {
                tracing::warn!(%error, "failed to apply lock change");
            }
        }
    }

    pub fn begin_transaction(&mut self, label: &str) {
        self.document.write(|document| document.begin_transaction(label));
    }

    /// Closes a transaction, then reconciles `origin` at once and every
    /// other view on its next tick.
    pub fn end_transaction(&mut self, origin: ViewKey, label: &str) -> Result<(), CanvasError> {
        let closed = self
            .document
            .write(|document| document.end_transaction(label));
        self.reconcile_and_propagate(origin)?;
        closed.map_err(CanvasError::from)
    }

    pub fn reconcile_and_propagate(&mut self, origin: ViewKey) -> Result<(), CanvasError> {
        self.canvas_mut(origin)?.perform_synchronise();
        for (key, canvas) in self.views.iter_mut() {
            if key != origin {
                canvas.synchronise();
            }
        }
        Ok(())
    }

    pub fn undo(&mut self, origin: ViewKey) -> Result<bool, CanvasError> {
        self.history_step(origin, |document| document.undo())
    }

    pub fn redo(&mut self, origin: ViewKey) -> Result<bool, CanvasError> {
        self.history_step(origin, |document| document.redo())
    }

    fn history_step(
        &mut self,
        origin: ViewKey,
        step: impl FnOnce(&mut D) -> bool,
    ) -> Result<bool, CanvasError> {
        self.canvas_mut(origin)?;
        let applied = self.document.write(|document| {
            let applied = step(document);
            document.deselect_all();
            applied
        });
        self.reconcile_and_propagate(origin)?;
        Ok(applied)
    }

    /// Runs `body` inside a named transaction that is closed even when the
    /// body fails. A failed body leaves `origin` reconciled against whatever
    /// the document kept.
    fn transaction<R>(
        &mut self,
        origin: ViewKey,
        label: &str,
        body: impl FnOnce(&mut Self) -> Result<R, CanvasError>,
    ) -> Result<R, CanvasError> {
        self.canvas_mut(origin)?;
        self.begin_transaction(label);
        let result = body(self);
        let closed = self
            .document
            .write(|document| document.end_transaction(label));
        let failed = result.is_err() || closed.is_err();
        for (key, canvas) in self.views.iter_mut() {
            if key != origin {
                canvas.synchronise();
            } else if failed {
                canvas.perform_synchronise();
            }
        }
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Serializes the selected objects of `origin` into the clipboard.
    pub fn copy_selection(&mut self, origin: ViewKey) -> Result<bool, CanvasError> {
        let ids = self
            .view(origin)
            .ok_or(CanvasError::UnknownView(origin))?
            .scene()
            .selected_object_ids();
        if ids.is_empty() {
            return Ok(false);
        }
        let text = self.document.read(|document| document.copy(&ids));
        self.clipboard = Some(text);
        Ok(true)
    }

    /// Pastes the clipboard near `position`, cascading repeated pastes, and
    /// selects the pasted nodes.
    pub fn paste(&mut self, origin: ViewKey, position: Point) -> Result<Vec<NodeKey>, CanvasError> {
        let Some(text) = self.clipboard.clone() else {
            return Ok(Vec::new());
        };
        let target = self.paste.next(position);
        self.transaction(origin, PASTE_LABEL, |workspace| {
            workspace
                .document
                .write(|document| document.paste(&text, target))?;
            workspace.select_engine_selection(origin)
        })
    }

    /// Duplicates the selection of `origin` and selects the copies.
    pub fn duplicate_selection(&mut self, origin: ViewKey) -> Result<Vec<NodeKey>, CanvasError> {
        let ids = self
            .view(origin)
            .ok_or(CanvasError::UnknownView(origin))?
            .scene()
            .selected_object_ids();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let (offset_x, offset_y) = self.duplicate.next();
        self.transaction(origin, DUPLICATE_LABEL, |workspace| {
            workspace.document.write(|document| {
                let copies = document.duplicate(&ids)?;
                document.move_objects(&copies, offset_x, offset_y);
                Ok::<_, DocumentError>(())
            })?;
            workspace.select_engine_selection(origin)
        })
    }

    /// Records how far the user dragged the latest duplicate, so the next
    /// duplicate lands at the same relative offset.
    pub fn set_duplicate_drag(&mut self, delta_x: i32, delta_y: i32) {
        self.duplicate.current = (delta_x, delta_y);
    }

    /// Called when a click on empty canvas starts a fresh gesture.
    pub fn reset_duplicate_offset(&mut self) {
        self.duplicate = DuplicateOffset::default();
    }

    /// Removes the selected nodes and edges of `origin` as one undo step.
    pub fn remove_selection(&mut self, origin: ViewKey) -> Result<(), CanvasError> {
        let canvas = self.view(origin).ok_or(CanvasError::UnknownView(origin))?;
        let objects = canvas.scene().selected_object_ids();
        let connections: Vec<_> = canvas
            .scene()
            .selected_edges()
            .into_iter()
            .filter_map(|key| canvas.scene().edge(key))
            .filter(|edge| {
                let endpoint = |port| {
                    canvas
                        .scene()
                        .node(port)
                        .and_then(|node| node.handle())
                };
                let removed = |id: Option<ObjectId>| id.is_none_or(|id| objects.contains(&id));
                !removed(endpoint(edge.source().node)) && !removed(endpoint(edge.destination().node))
            })
            .map(|edge| edge.handle())
            .collect();
        if objects.is_empty() && connections.is_empty() {
            return Ok(());
        }
        self.transaction(origin, REMOVE_LABEL, |workspace| {
            workspace.document.write(|document| {
                for id in &objects {
                    if document.object_was_deleted(*id) {
                        tracing::debug!(?id, "selected object already removed");
                        continue;
                    }
                    document.remove_object(*id)?;
                }
                let live = document.connections();
                for id in &connections {
                    if live.iter().any(|connection| connection.id == *id) {
                        document.disconnect(*id)?;
                    }
                }
                Ok::<_, DocumentError>(())
            })?;
            let canvas = workspace.canvas_mut(origin)?;
            canvas.deselect_all();
            canvas.perform_synchronise();
            workspace.document.write(|document| document.deselect_all());
            Ok(())
        })
    }

    /// Reconciles `origin`, then mirrors the engine-side selection into it
    /// and clears the engine selection.
    fn select_engine_selection(&mut self, origin: ViewKey) -> Result<Vec<NodeKey>, CanvasError> {
        let canvas = self.canvas_mut(origin)?;
        canvas.deselect_all();
        canvas.perform_synchronise();
        let selected = canvas
            .document()
            .read(|document| document.selected_objects());
        let mut keys = Vec::with_capacity(selected.len());
        for id in selected {
            if let Some(key) = canvas.scene().find_node_for(id) {
                canvas.select(SceneItem::Node(key));
                keys.push(key);
            }
        }
        canvas.document().write(|document| document.deselect_all());
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use document::PatchDocument;
    use document_protocol::NewObject;
    use engine::{ChannelCapacities, EngineCommand, EngineWorker, create_engine_channels};
    use protocol::{DocumentNotice, UiTask};

    fn workspace() -> (Workspace<PatchDocument>, ViewKey, ObjectId, ObjectId) {
        let mut document = PatchDocument::new();
        let first = document
            .create_object(NewObject::text("osc~ 440", Point::new(10, 10)).with_ports(2, 1))
            .unwrap();
        let second = document
            .create_object(NewObject::text("dac~", Point::new(10, 80)).with_ports(2, 0))
            .unwrap();
        document.connect(first, 0, second, 0).unwrap();
        let mut workspace = Workspace::new(SharedDocument::new(document), CanvasSettings::default());
        let view = workspace.open_view();
        workspace.view_mut(view).unwrap().perform_synchronise();
        (workspace, view, first, second)
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn select_object(workspace: &mut Workspace<PatchDocument>, view: ViewKey, id: ObjectId) {
        let canvas = workspace.view_mut(view).unwrap();
        let key = canvas.scene().find_node_for(id).unwrap();
        assert!(canvas.select(SceneItem::Node(key)));
    }

    fn object_positions(workspace: &Workspace<PatchDocument>) -> Vec<Point> {
        workspace.document().read(|document| {
            document
                .objects()
                .iter()
                .map(|object| object.bounds.position())
                .collect()
        })
    }

    #[test]
    fn paste_cascades_at_the_same_position() {
        let mut cascade = PasteCascade::default();
        let at = Point::new(100, 100);
        assert_eq!(cascade.next(at), Point::new(90, 90));
        assert_eq!(cascade.next(at), Point::new(100, 100));
        assert_eq!(cascade.next(at), Point::new(110, 110));
        assert_eq!(cascade.next(Point::new(5, 5)), Point::new(-5, -5));
    }

    #[test]
    fn paste_selects_pasted_nodes_in_one_undo_step() {
        let (mut workspace, view, first, _) = workspace();
        select_object(&mut workspace, view, first);
        assert!(workspace.copy_selection(view).unwrap());

        let pasted = workspace.paste(view, Point::new(200, 50)).unwrap();
        assert_eq!(pasted.len(), 1);
        let canvas = workspace.view(view).unwrap();
        assert_eq!(canvas.scene().selected_nodes(), pasted);
        assert_eq!(canvas.scene().node_count(), 3);
        assert!(object_positions(&workspace).contains(&Point::new(190, 40)));

        workspace.document().read(|document| {
            assert!(document.selected_objects().is_empty());
            assert_eq!(document.undo_label(), Some(PASTE_LABEL));
            assert_eq!(document.transaction_depth(), 0);
        });
    }

    #[test]
    fn paste_without_clipboard_does_nothing() {
        let (mut workspace, view, _, _) = workspace();
        assert!(workspace.paste(view, Point::ORIGIN).unwrap().is_empty());
        assert!(!workspace.copy_selection(view).unwrap());
    }

    #[test]
    fn invalid_clipboard_still_closes_the_transaction() {
        let (mut workspace, view, _, _) = workspace();
        workspace.set_clipboard("not a patch");
        assert!(matches!(
            workspace.paste(view, Point::ORIGIN),
            Err(CanvasError::Document(DocumentError::InvalidClipboard(_)))
        ));
        assert_eq!(
            workspace.document().read(|document| document.transaction_depth()),
            0
        );
    }

    #[test]
    fn duplicate_applies_the_dragged_offset() {
        let (mut workspace, view, first, _) = workspace();
        select_object(&mut workspace, view, first);

        let copies = workspace.duplicate_selection(view).unwrap();
        assert_eq!(copies.len(), 1);
        assert!(object_positions(&workspace).contains(&Point::new(20, 20)));

        workspace.set_duplicate_drag(30, 0);
        let copies = workspace.duplicate_selection(view).unwrap();
        assert_eq!(copies.len(), 1);
        assert!(object_positions(&workspace).contains(&Point::new(60, 30)));
        assert_eq!(
            workspace.document().read(|document| document.undo_label().map(str::to_owned)),
            Some(DUPLICATE_LABEL.to_owned())
        );
    }

    #[test]
    fn remove_selection_is_undone_in_every_view() {
        let (mut workspace, view, first, second) = workspace();
        let other = workspace.open_view();
        workspace.view_mut(other).unwrap().perform_synchronise();

        select_object(&mut workspace, view, first);
        workspace.remove_selection(view).unwrap();

        let canvas = workspace.view(view).unwrap();
        assert_eq!(canvas.scene().node_count(), 1);
        assert_eq!(canvas.scene().edge_count(), 0);
        assert_eq!(canvas.scene().selection_len(), 0);
        assert!(workspace.view(other).unwrap().is_sync_pending());

        let second_key = canvas.scene().find_node_for(second).unwrap();
        assert!(workspace.undo(view).unwrap());
        let canvas = workspace.view(view).unwrap();
        assert_eq!(canvas.scene().node_count(), 2);
        assert_eq!(canvas.scene().edge_count(), 1);
        assert_eq!(canvas.scene().find_node_for(second), Some(second_key));
        assert!(canvas.scene().find_node_for(first).is_some());

        let other_canvas = workspace.view_mut(other).unwrap();
        other_canvas.synchronise_if_pending();
        assert_eq!(other_canvas.scene().node_count(), 2);

        assert!(workspace.redo(view).unwrap());
        assert_eq!(workspace.view(view).unwrap().scene().node_count(), 1);
    }

    #[test]
    fn remove_selection_skips_objects_removed_elsewhere() {
        init_tracing();
        let (mut workspace, view, first, second) = workspace();
        select_object(&mut workspace, view, first);
        select_object(&mut workspace, view, second);
        workspace
            .document()
            .write(|document| document.remove_object(second))
            .unwrap();

        workspace.remove_selection(view).unwrap();
        assert_eq!(
            workspace.document().read(|document| document.object_count()),
            0
        );
        let canvas = workspace.view(view).unwrap();
        assert_eq!(canvas.scene().node_count(), 0);
        assert_eq!(canvas.scene().edge_count(), 0);
        assert!(!canvas.is_sync_pending());
    }

    #[test]
    fn failed_transaction_reconciles_the_origin_view() {
        let (mut workspace, view, first, _) = workspace();
        let error = workspace
            .transaction(view, REMOVE_LABEL, |workspace| {
                workspace.document.write(|document| document.remove_object(first))?;
                Err::<(), _>(CanvasError::Locked)
            })
            .unwrap_err();
        assert!(matches!(error, CanvasError::Locked));

        let canvas = workspace.view(view).unwrap();
        assert_eq!(canvas.scene().node_count(), 1);
        assert_eq!(canvas.scene().edge_count(), 0);
        assert!(canvas.scene().find_node_for(first).is_none());
        assert_eq!(
            workspace.document().read(|document| document.transaction_depth()),
            0
        );
    }

    #[test]
    fn selected_edges_are_disconnected() {
        let (mut workspace, view, _, _) = workspace();
        let canvas = workspace.view_mut(view).unwrap();
        let (edge, _) = canvas.scene().edges().next().unwrap();
        assert!(canvas.select(SceneItem::Edge(edge)));

        workspace.remove_selection(view).unwrap();
        assert_eq!(
            workspace.document().read(|document| document.connection_count()),
            0
        );
        assert_eq!(workspace.view(view).unwrap().scene().node_count(), 2);
    }

    #[test]
    fn explicit_transactions_reconcile_the_origin() {
        let (mut workspace, view, first, _) = workspace();
        workspace.begin_transaction("Align");
        workspace.document().write(|document| {
            document.move_objects(&[first], 5, 0);
            document.move_objects(&[first], 5, 0);
        });
        workspace.end_transaction(view, "Align").unwrap();

        let canvas = workspace.view(view).unwrap();
        let key = canvas.scene().find_node_for(first).unwrap();
        assert_eq!(canvas.scene().node(key).unwrap().bounds().x, 20);
        assert!(workspace.undo(view).unwrap());
        let canvas = workspace.view(view).unwrap();
        assert_eq!(canvas.scene().node(key).unwrap().bounds().x, 10);

        assert!(matches!(
            workspace.end_transaction(view, "Align"),
            Err(CanvasError::Document(DocumentError::NoOpenTransaction(_)))
        ));
    }

    #[test]
    fn engine_notices_coalesce_into_one_pass_per_view() {
        init_tracing();
        let (mut workspace, view, first, _) = workspace();
        let (mut ui, engine) = create_engine_channels(ChannelCapacities::default());
        let mut worker = EngineWorker::new(workspace.document().clone(), engine);

        for _ in 0..3 {
            worker.handle(EngineCommand::Document(
                document_protocol::DocumentCommand::MoveObjects {
                    ids: vec![first],
                    delta_x: 1,
                    delta_y: 0,
                },
            ));
        }
        worker.handle(EngineCommand::Activity(first));
        worker.handle(EngineCommand::Document(
            document_protocol::DocumentCommand::SetLocked(true),
        ));

        workspace.pump(&ui.notices, &mut ui.tasks);
        let canvas = workspace.view_mut(view).unwrap();
        assert!(canvas.is_locked());
        assert!(canvas.is_sync_pending());
        let report = canvas.synchronise_if_pending().unwrap();
        assert_eq!(report.refreshed_nodes.len(), 1);
        let key = canvas.scene().find_node_for(first).unwrap();
        assert_eq!(canvas.scene().node(key).unwrap().bounds().x, 13);
        assert!(canvas.scene().node(key).unwrap().activity() > 0);
    }

    #[test]
    fn overflowed_notices_still_synchronise() {
        let (mut workspace, view, _, _) = workspace();
        let mut batch = NoticeBatch::default();
        batch.push(DocumentNotice::Overflowed);
        workspace.process_notices(batch);
        assert!(workspace.view(view).unwrap().is_sync_pending());
    }

    #[test]
    fn tasks_for_deleted_objects_are_not_delivered() {
        let (mut workspace, view, first, _) = workspace();
        let mut tasks = UiTaskBatch::new();
        tasks.push(UiTask::ObjectActivity(first));
        tasks.push(UiTask::ObjectActivity(ObjectId(77)));
        assert_eq!(workspace.process_ui_tasks(tasks), 1);
        assert!(workspace.close_view(view).is_some());
        assert!(matches!(
            workspace.undo(view),
            Err(CanvasError::UnknownView(_))
        ));
    }

    #[test]
    fn locking_reaches_every_view() {
        let (mut workspace, view, _, _) = workspace();
        let other = workspace.open_view();
        workspace.set_locked(true);
        assert!(workspace.document().read(|document| document.is_locked()));
        assert!(workspace.view(view).unwrap().is_locked());
        assert!(workspace.view(other).unwrap().is_locked());
    }
}

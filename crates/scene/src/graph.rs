use std::collections::HashSet;

use document_protocol::{ConnectionId, ObjectId, PortDirection, PortKind};
use model::{PointF, Rect};
use slotmap::SlotMap;

use crate::edge::{PendingEdge, VisualEdge};
use crate::node::{Port, PortRef, VisualNode};
use crate::{EdgeKey, NodeKey, SceneItem};

/// Pointer distance within which an edge counts as hit.
pub const EDGE_HIT_TOLERANCE: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitTarget {
    Port(PortRef),
    Node(NodeKey),
    Edge(EdgeKey),
}

/// Area covered by the straight preview line of an edge drag.
fn drag_span(anchor: PointF, cursor: PointF) -> Rect {
    Rect::from_corners(anchor.round(), cursor.round()).expanded(2)
}

/// Connect request produced by a finished edge drag, in document terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub source: ObjectId,
    pub source_port: usize,
    pub destination: ObjectId,
    pub destination_port: usize,
}

#[derive(Debug, Clone)]
struct Lasso {
    anchor: PointF,
    current: PointF,
    /// Selection when the lasso started, restored on cancel.
    original: HashSet<SceneItem>,
    /// Items kept selected regardless of the lasso rectangle.
    baseline: HashSet<SceneItem>,
    additive: bool,
}

impl Lasso {
    fn rect(&self) -> Rect {
        Rect::from_corners(self.anchor.round(), self.current.round())
    }
}

/// Visual items of one canvas view, in document order.
#[derive(Debug, Default)]
pub struct SceneGraph {
    pub(crate) nodes: SlotMap<NodeKey, VisualNode>,
    pub(crate) node_order: Vec<NodeKey>,
    pub(crate) edges: SlotMap<EdgeKey, VisualEdge>,
    pub(crate) edge_order: Vec<EdgeKey>,
    pub(crate) selection: HashSet<SceneItem>,
    pub(crate) pending_edges: Vec<PendingEdge>,
    pub(crate) nested_borders: Vec<Rect>,
    pub(crate) content_zoom: f32,
    embedded: bool,
    lasso: Option<Lasso>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self {
            content_zoom: 1.0,
            ..Self::default()
        }
    }

    /// Scene of a subgraph shown inside its parent; its zoom follows the
    /// parent rather than the view.
    pub fn embedded() -> Self {
        Self {
            embedded: true,
            ..Self::new()
        }
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    pub fn content_zoom(&self) -> f32 {
        self.content_zoom
    }

    pub fn node_count(&self) -> usize {
        self.node_order.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_order.len()
    }

    pub fn node(&self, key: NodeKey) -> Option<&VisualNode> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut VisualNode> {
        self.nodes.get_mut(key)
    }

    pub fn edge(&self, key: EdgeKey) -> Option<&VisualEdge> {
        self.edges.get(key)
    }

    pub fn edge_mut(&mut self, key: EdgeKey) -> Option<&mut VisualEdge> {
        self.edges.get_mut(key)
    }

    /// Nodes back to front.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeKey, &VisualNode)> + '_ {
        self.node_order
            .iter()
            .filter_map(|key| self.nodes.get(*key).map(|node| (*key, node)))
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeKey, &VisualEdge)> + '_ {
        self.edge_order
            .iter()
            .filter_map(|key| self.edges.get(*key).map(|edge| (*key, edge)))
    }

    pub fn node_keys(&self) -> &[NodeKey] {
        &self.node_order
    }

    pub fn find_node_for(&self, id: ObjectId) -> Option<NodeKey> {
        self.node_order
            .iter()
            .copied()
            .find(|key| self.nodes.get(*key).and_then(VisualNode::handle) == Some(id))
    }

    pub fn find_edge_for(&self, id: ConnectionId) -> Option<EdgeKey> {
        self.edge_order
            .iter()
            .copied()
            .find(|key| self.edges.get(*key).map(VisualEdge::handle) == Some(id))
    }

    pub fn port(&self, port: PortRef) -> Option<&Port> {
        self.nodes.get(port.node)?.port(port.slot)
    }

    pub fn nested_borders(&self) -> &[Rect] {
        &self.nested_borders
    }

    pub fn pending_edges(&self) -> &[PendingEdge] {
        &self.pending_edges
    }

    /// Union of all node bounds; empty for an empty scene.
    pub fn node_bounds_union(&self) -> Rect {
        self.nodes()
            .fold(Rect::EMPTY, |union, (_, node)| union.union(&node.bounds()))
    }

    pub(crate) fn edge_anchors(
        &self,
        source: PortRef,
        destination: PortRef,
    ) -> Option<(PointF, PointF, bool)> {
        let source_port = self.port(source)?;
        let destination_port = self.port(destination)?;
        if source_port.direction != PortDirection::Output
            || destination_port.direction != PortDirection::Input
        {
            return None;
        }
        Some((
            source_port.anchor(),
            destination_port.anchor(),
            source_port.kind == PortKind::Signal,
        ))
    }

    /// Topmost item under `point`. Ports win over their node, nodes over
    /// edges.
    pub fn hit_test(&self, point: PointF) -> Option<HitTarget> {
        for key in self.node_order.iter().rev() {
            let Some(node) = self.nodes.get(*key) else {
                continue;
            };
            if let Some(slot) = node
                .ports()
                .iter()
                .position(|port| port.hit_rect.contains_f(point))
            {
                return Some(HitTarget::Port(PortRef { node: *key, slot }));
            }
            if node.content().hit_test(node.bounds(), point) {
                return Some(HitTarget::Node(*key));
            }
        }
        self.edge_order
            .iter()
            .rev()
            .find(|key| {
                self.edges
                    .get(**key)
                    .is_some_and(|edge| edge.path().distance_to(point) <= EDGE_HIT_TOLERANCE)
            })
            .map(|key| HitTarget::Edge(*key))
    }

    /// Nodes then edges touching `rect`, each group in z-order.
    pub fn items_intersecting(&self, rect: Rect) -> Vec<SceneItem> {
        let nodes = self
            .nodes()
            .filter(|(_, node)| node.bounds().intersects(&rect))
            .map(|(key, _)| SceneItem::Node(key));
        let edges = self
            .edges()
            .filter(|(_, edge)| edge.path().intersects(rect))
            .map(|(key, _)| SceneItem::Edge(key));
        nodes.chain(edges).collect()
    }

    pub fn is_selected(&self, item: SceneItem) -> bool {
        self.selection.contains(&item)
    }

    /// Adds `item` if it is live. Returns `true` if the selection changed.
    pub fn select(&mut self, item: SceneItem) -> bool {
        if !self.contains_item(item) {
            return false;
        }
        self.selection.insert(item)
    }

    pub fn deselect(&mut self, item: SceneItem) -> bool {
        self.selection.remove(&item)
    }

    pub fn clear_selection(&mut self) -> bool {
        let changed = !self.selection.is_empty();
        self.selection.clear();
        changed
    }

    pub fn selection_len(&self) -> usize {
        self.selection.len()
    }

    /// Selected nodes in z-order.
    pub fn selected_nodes(&self) -> Vec<NodeKey> {
        self.node_order
            .iter()
            .copied()
            .filter(|key| self.selection.contains(&SceneItem::Node(*key)))
            .collect()
    }

    pub fn selected_edges(&self) -> Vec<EdgeKey> {
        self.edge_order
            .iter()
            .copied()
            .filter(|key| self.selection.contains(&SceneItem::Edge(*key)))
            .collect()
    }

    pub fn selected_object_ids(&self) -> Vec<ObjectId> {
        self.selected_nodes()
            .into_iter()
            .filter_map(|key| self.nodes.get(key).and_then(VisualNode::handle))
            .collect()
    }

    /// Bounds of every selected item.
    pub fn selection_bounds(&self) -> Rect {
        self.selection.iter().fold(Rect::EMPTY, |union, item| {
            union.union(&self.item_bounds(*item).unwrap_or(Rect::EMPTY))
        })
    }

    pub fn item_bounds(&self, item: SceneItem) -> Option<Rect> {
        match item {
            SceneItem::Node(key) => self.nodes.get(key).map(VisualNode::paint_bounds),
            SceneItem::Edge(key) => self.edges.get(key).map(|edge| edge.path().bounds()),
        }
    }

    fn contains_item(&self, item: SceneItem) -> bool {
        match item {
            SceneItem::Node(key) => self.nodes.contains_key(key),
            SceneItem::Edge(key) => self.edges.contains_key(key),
        }
    }

    pub fn begin_lasso(&mut self, point: PointF, additive: bool) {
        let original = self.selection.clone();
        let baseline = if additive {
            original.clone()
        } else {
            HashSet::new()
        };
        self.lasso = Some(Lasso {
            anchor: point,
            current: point,
            original,
            baseline,
            additive,
        });
    }

    /// Moves the lasso corner and reselects. Returns the area that needs
    /// repainting (old lasso, new lasso, and every item whose selection
    /// changed).
    pub fn update_lasso(&mut self, point: PointF) -> Rect {
        let Some(lasso) = &mut self.lasso else {
            return Rect::EMPTY;
        };
        let previous_rect = lasso.rect();
        lasso.current = point;
        let rect = lasso.rect();
        let mut next: HashSet<SceneItem> = if lasso.additive {
            lasso.baseline.clone()
        } else {
            HashSet::new()
        };
        next.extend(self.items_intersecting(rect));
        let changed: Vec<SceneItem> = self
            .selection
            .symmetric_difference(&next)
            .copied()
            .collect();
        self.selection = next;
        changed
            .into_iter()
            .filter_map(|item| self.item_bounds(item))
            .fold(
                previous_rect.expanded(1).union(&rect.expanded(1)),
                |union, bounds| union.union(&bounds),
            )
    }

    pub fn lasso_rect(&self) -> Option<Rect> {
        self.lasso.as_ref().map(Lasso::rect)
    }

    /// Ends the lasso keeping its selection; returns the area to repaint.
    pub fn finish_lasso(&mut self) -> Rect {
        self.lasso
            .take()
            .map_or(Rect::EMPTY, |lasso| lasso.rect().expanded(1))
    }

    /// Ends the lasso restoring the selection it started from.
    pub fn cancel_lasso(&mut self) -> Rect {
        let Some(lasso) = self.lasso.take() else {
            return Rect::EMPTY;
        };
        let dirty = self.selection_bounds().union(&lasso.rect().expanded(1));
        self.selection = lasso.original;
        self.selection.retain(|item| {
            matches!(item, SceneItem::Node(key) if self.nodes.contains_key(*key))
                || matches!(item, SceneItem::Edge(key) if self.edges.contains_key(*key))
        });
        dirty.union(&self.selection_bounds())
    }

    /// Starts dragging a new edge out of an output port.
    pub fn begin_connection(&mut self, source: PortRef) -> bool {
        let Some(port) = self.port(source) else {
            return false;
        };
        if port.direction != PortDirection::Output {
            return false;
        }
        let cursor = port.anchor();
        self.pending_edges.push(PendingEdge { source, cursor });
        true
    }

    pub fn update_connection(&mut self, cursor: PointF) -> Rect {
        let mut dirty = Rect::EMPTY;
        for pending in &mut self.pending_edges {
            let anchor = self
                .nodes
                .get(pending.source.node)
                .and_then(|node| node.port(pending.source.slot))
                .map(Port::anchor)
                .unwrap_or(pending.cursor);
            dirty = dirty
                .union(&drag_span(anchor, pending.cursor))
                .union(&drag_span(anchor, cursor));
            pending.cursor = cursor;
        }
        dirty
    }

    /// Drops every in-progress edge. Returns the area to repaint.
    pub fn cancel_connections(&mut self) -> Rect {
        let dirty = self.update_connection_bounds();
        self.pending_edges.clear();
        dirty
    }

    /// Finishes the drag over `target`. Produces one request per pending edge
    /// whose endpoints are a live output and a live input on another node.
    /// The pending list is always emptied.
    pub fn finish_connection(&mut self, target: Option<PortRef>) -> Vec<ConnectionRequest> {
        let pending = std::mem::take(&mut self.pending_edges);
        let Some(target) = target else {
            return Vec::new();
        };
        let Some(target_node) = self.nodes.get(target.node) else {
            return Vec::new();
        };
        let Some(target_port) = target_node.port(target.slot) else {
            return Vec::new();
        };
        let (Some(destination), PortDirection::Input) =
            (target_node.handle(), target_port.direction)
        else {
            return Vec::new();
        };
        let destination_port = target_port.index;
        pending
            .iter()
            .filter(|pending| pending.source.node != target.node)
            .filter_map(|pending| {
                let node = self.nodes.get(pending.source.node)?;
                let port = node.port(pending.source.slot)?;
                Some(ConnectionRequest {
                    source: node.handle()?,
                    source_port: port.index,
                    destination,
                    destination_port,
                })
            })
            .collect()
    }

    fn update_connection_bounds(&self) -> Rect {
        self.pending_edges
            .iter()
            .filter_map(|pending| {
                let anchor = self.port(pending.source)?.anchor();
                Some(drag_span(anchor, pending.cursor))
            })
            .fold(Rect::EMPTY, |union, rect| union.union(&rect))
    }

    /// Appends a node showing the inline creation editor.
    pub fn add_pending_node(&mut self, bounds: Rect) -> NodeKey {
        let key = self.nodes.insert(VisualNode::pending(bounds));
        self.node_order.push(key);
        key
    }

    /// Removes a node and every reference to it. Returns its paint bounds.
    pub fn remove_node(&mut self, key: NodeKey) -> Option<Rect> {
        let node = self.nodes.remove(key)?;
        self.node_order.retain(|candidate| *candidate != key);
        self.selection.remove(&SceneItem::Node(key));
        self.pending_edges.retain(|pending| pending.source.node != key);
        Some(node.paint_bounds())
    }

    pub(crate) fn remove_edge(&mut self, key: EdgeKey) -> Option<Rect> {
        let edge = self.edges.remove(key)?;
        self.edge_order.retain(|candidate| *candidate != key);
        self.selection.remove(&SceneItem::Edge(key));
        Some(edge.path().bounds())
    }

    /// Moves a node locally (drag preview) and reroutes its edges. Returns
    /// the area to repaint.
    pub fn set_node_bounds(&mut self, key: NodeKey, bounds: Rect) -> Rect {
        let Some(node) = self.nodes.get_mut(key) else {
            return Rect::EMPTY;
        };
        let mut dirty = node.paint_bounds();
        node.set_bounds(bounds);
        dirty = dirty.union(&node.paint_bounds());
        dirty.union(&self.reroute_edges_of(key))
    }

    pub(crate) fn reroute_edges_of(&mut self, key: NodeKey) -> Rect {
        let mut dirty = Rect::EMPTY;
        let touching: Vec<EdgeKey> = self
            .edges()
            .filter(|(_, edge)| edge.source().node == key || edge.destination().node == key)
            .map(|(edge_key, _)| edge_key)
            .collect();
        for edge_key in touching {
            let Some(edge) = self.edges.get(edge_key) else {
                continue;
            };
            let Some((from, to, _)) = self.edge_anchors(edge.source(), edge.destination()) else {
                continue;
            };
            let state = edge.path_state().map(str::to_owned);
            if let Some(edge) = self.edges.get_mut(edge_key) {
                let before = edge.path().bounds();
                if edge.refresh(from, to, state.as_deref()) {
                    dirty = dirty.union(&before).union(&edge.path().bounds());
                }
            }
        }
        dirty
    }

    /// Advances activity flashes one tick; returns the area that changed.
    pub fn tick_activity(&mut self) -> Rect {
        let mut dirty = Rect::EMPTY;
        for key in &self.node_order {
            if let Some(node) = self.nodes.get_mut(*key)
                && node.decay_activity()
            {
                dirty = dirty.union(&node.paint_bounds());
            }
        }
        dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use document::PatchDocument;
    use document_protocol::{DocumentCommands, DocumentView, NewObject};
    use model::Point;

    struct Fixture {
        scene: SceneGraph,
        source: NodeKey,
        destination: NodeKey,
        source_id: ObjectId,
        destination_id: ObjectId,
    }

    /// Two stacked 40x20 nodes joined by one edge: output anchor at (4, 20),
    /// input anchor at (4, 100).
    fn fixture() -> Fixture {
        let mut document = PatchDocument::new();
        let source_id = document
            .create_object(
                NewObject::text("metro 100", Point::new(0, 0))
                    .with_size(40, 20)
                    .with_ports(1, 1),
            )
            .unwrap();
        let destination_id = document
            .create_object(
                NewObject::text("print", Point::new(0, 100))
                    .with_size(40, 20)
                    .with_ports(1, 1),
            )
            .unwrap();
        document.connect(source_id, 0, destination_id, 0).unwrap();
        let mut scene = SceneGraph::new();
        scene.reconcile(&document.snapshot(), 1.0);
        Fixture {
            source: scene.find_node_for(source_id).unwrap(),
            destination: scene.find_node_for(destination_id).unwrap(),
            scene,
            source_id,
            destination_id,
        }
    }

    #[test]
    fn hit_test_prefers_ports_then_nodes_then_edges() {
        let fixture = fixture();
        let scene = &fixture.scene;
        assert_eq!(
            scene.hit_test(PointF::new(2.0, 1.0)),
            Some(HitTarget::Port(PortRef {
                node: fixture.source,
                slot: 0
            }))
        );
        assert_eq!(
            scene.hit_test(PointF::new(25.0, 8.0)),
            Some(HitTarget::Node(fixture.source))
        );
        let edge = scene.edges().next().unwrap().0;
        assert_eq!(
            scene.hit_test(PointF::new(4.0, 60.0)),
            Some(HitTarget::Edge(edge))
        );
        assert_eq!(scene.hit_test(PointF::new(300.0, 300.0)), None);
    }

    #[test]
    fn lasso_selects_and_cancel_restores() {
        let mut fixture = fixture();
        let scene = &mut fixture.scene;
        scene.select(SceneItem::Node(fixture.destination));

        scene.begin_lasso(PointF::new(-10.0, -10.0), false);
        let dirty = scene.update_lasso(PointF::new(50.0, 30.0));
        assert!(dirty.contains_rect(&Rect::new(-10, -10, 60, 40)));
        assert!(scene.is_selected(SceneItem::Node(fixture.source)));
        assert!(!scene.is_selected(SceneItem::Node(fixture.destination)));
        assert_eq!(scene.lasso_rect(), Some(Rect::new(-10, -10, 60, 40)));

        scene.cancel_lasso();
        assert_eq!(scene.lasso_rect(), None);
        assert_eq!(scene.selected_nodes(), vec![fixture.destination]);
    }

    #[test]
    fn additive_lasso_keeps_baseline() {
        let mut fixture = fixture();
        let scene = &mut fixture.scene;
        scene.select(SceneItem::Node(fixture.destination));
        scene.begin_lasso(PointF::new(-10.0, -10.0), true);
        scene.update_lasso(PointF::new(50.0, 30.0));
        scene.finish_lasso();
        assert_eq!(
            scene.selected_object_ids(),
            vec![fixture.source_id, fixture.destination_id]
        );
    }

    #[test]
    fn finished_drag_becomes_connection_request() {
        let mut fixture = fixture();
        let scene = &mut fixture.scene;
        let output = PortRef {
            node: fixture.source,
            slot: 1,
        };
        assert!(scene.begin_connection(output));
        assert!(!scene.update_connection(PointF::new(4.0, 90.0)).is_empty());
        let requests = scene.finish_connection(Some(PortRef {
            node: fixture.destination,
            slot: 0,
        }));
        assert_eq!(
            requests,
            vec![ConnectionRequest {
                source: fixture.source_id,
                source_port: 0,
                destination: fixture.destination_id,
                destination_port: 0,
            }]
        );
        assert!(scene.pending_edges().is_empty());
    }

    #[test]
    fn drags_from_inputs_or_onto_outputs_are_rejected() {
        let mut fixture = fixture();
        let scene = &mut fixture.scene;
        assert!(!scene.begin_connection(PortRef {
            node: fixture.source,
            slot: 0,
        }));
        assert!(scene.begin_connection(PortRef {
            node: fixture.source,
            slot: 1,
        }));
        let requests = scene.finish_connection(Some(PortRef {
            node: fixture.destination,
            slot: 1,
        }));
        assert!(requests.is_empty());
        assert!(scene.pending_edges().is_empty());
    }

    #[test]
    fn local_move_reroutes_edges() {
        let mut fixture = fixture();
        let scene = &mut fixture.scene;
        let edge = scene.edges().next().unwrap().0;
        let before = scene.edge(edge).unwrap().path().clone();
        let dirty = scene.set_node_bounds(fixture.destination, Rect::new(60, 100, 40, 20));
        assert!(!dirty.is_empty());
        assert_ne!(scene.edge(edge).unwrap().path(), &before);
        assert!(dirty.contains_rect(&scene.edge(edge).unwrap().path().bounds()));
    }

    #[test]
    fn removing_a_node_clears_its_references() {
        let mut fixture = fixture();
        let scene = &mut fixture.scene;
        scene.select(SceneItem::Node(fixture.source));
        scene.begin_connection(PortRef {
            node: fixture.source,
            slot: 1,
        });
        assert!(scene.remove_node(fixture.source).is_some());
        assert_eq!(scene.selection_len(), 0);
        assert!(scene.pending_edges().is_empty());
        assert_eq!(scene.node_keys(), &[fixture.destination]);
    }
}

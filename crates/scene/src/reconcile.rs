use std::collections::HashMap;

use document_protocol::{ConnectionId, ConnectionSnapshot, DocumentSnapshot, ObjectId};
use model::Rect;

use crate::edge::VisualEdge;
use crate::graph::SceneGraph;
use crate::node::{PortRef, VisualNode};
use crate::{EdgeKey, NodeKey};

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added_nodes: Vec<NodeKey>,
    /// Pruned nodes; their render caches should be released.
    pub removed_nodes: Vec<NodeKey>,
    pub refreshed_nodes: Vec<NodeKey>,
    pub added_edges: usize,
    pub removed_edges: usize,
    pub recreated_edges: usize,
    pub skipped_connections: Vec<ConnectionId>,
    pub order_changed: bool,
    /// Canvas-space union of everything that looks different.
    pub affected: Rect,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.refreshed_nodes.is_empty()
            && self.added_edges == 0
            && self.removed_edges == 0
            && self.recreated_edges == 0
            && !self.order_changed
    }

    fn touch(&mut self, rect: Rect) {
        self.affected = self.affected.union(&rect);
    }
}

fn diagnose_skipped(connection: &ConnectionSnapshot, reason: &str) {
    if cfg!(debug_assertions) {
        tracing::warn!(
            connection = %connection.id,
            source = %connection.source,
            source_port = connection.source_port,
            destination = %connection.destination,
            destination_port = connection.destination_port,
            reason,
            "skipping connection during reconcile"
        );
    }
}

impl SceneGraph {
    /// Re-derives the scene from `snapshot`.
    ///
    /// Running the pass twice on the same snapshot changes nothing the
    /// second time. The pass never invalidates anything itself; callers use
    /// [`ReconcileReport::affected`].
    pub fn reconcile(&mut self, snapshot: &DocumentSnapshot, view_zoom: f32) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        self.prune_deleted_edges(snapshot, &mut report);
        self.prune_deleted_nodes(snapshot, &mut report);
        self.prune_dangling_edges(&mut report);

        let order_before = self.node_order.clone();
        let index = self.sync_nodes(snapshot, &mut report);
        self.sort_by_document_order(snapshot);
        report.order_changed = self
            .node_order
            .iter()
            .filter(|key| !report.added_nodes.contains(*key))
            .ne(order_before.iter());

        self.sync_edges(snapshot, &index, &mut report);

        if !self.is_embedded() {
            self.content_zoom = view_zoom;
        }
        self.nested_borders = self
            .nodes()
            .filter_map(|(_, node)| node.content().nested_border(node.bounds()))
            .collect();

        if !report.is_noop() {
            tracing::debug!(
                revision = snapshot.revision(),
                added = report.added_nodes.len(),
                removed = report.removed_nodes.len(),
                refreshed = report.refreshed_nodes.len(),
                edges_added = report.added_edges,
                edges_removed = report.removed_edges,
                edges_recreated = report.recreated_edges,
                skipped = report.skipped_connections.len(),
                "scene reconciled"
            );
        }
        report
    }

    fn prune_deleted_edges(&mut self, snapshot: &DocumentSnapshot, report: &mut ReconcileReport) {
        let stale: Vec<EdgeKey> = self
            .edges()
            .filter(|(_, edge)| !snapshot.contains_connection(edge.handle()))
            .map(|(key, _)| key)
            .collect();
        for key in stale {
            if let Some(bounds) = self.remove_edge(key) {
                report.removed_edges += 1;
                report.touch(bounds);
            }
        }
    }

    fn prune_deleted_nodes(&mut self, snapshot: &DocumentSnapshot, report: &mut ReconcileReport) {
        let stale: Vec<NodeKey> = self
            .nodes()
            .filter(|(_, node)| match node.handle() {
                Some(id) => snapshot.resolve(id).is_none() && !node.is_pending(),
                None => false,
            })
            .map(|(key, _)| key)
            .collect();
        for key in stale {
            if let Some(bounds) = self.remove_node(key) {
                report.removed_nodes.push(key);
                report.touch(bounds);
            }
        }
    }

    fn prune_dangling_edges(&mut self, report: &mut ReconcileReport) {
        let dangling: Vec<EdgeKey> = self
            .edges()
            .filter(|(_, edge)| {
                self.edge_anchors(edge.source(), edge.destination())
                    .is_none()
            })
            .map(|(key, _)| key)
            .collect();
        for key in dangling {
            if let Some(bounds) = self.remove_edge(key) {
                report.removed_edges += 1;
                report.touch(bounds);
            }
        }
    }

    /// Creates and refreshes nodes, raising each to the top. Returns the
    /// identity index used for edge resolution.
    fn sync_nodes(
        &mut self,
        snapshot: &DocumentSnapshot,
        report: &mut ReconcileReport,
    ) -> HashMap<ObjectId, NodeKey> {
        let mut index: HashMap<ObjectId, NodeKey> = HashMap::new();
        let mut duplicates = Vec::new();
        for (key, node) in self.nodes() {
            if let Some(id) = node.handle()
                && index.insert(id, key).is_some()
            {
                duplicates.push(key);
            }
        }
        for key in duplicates {
            if cfg!(debug_assertions) {
                tracing::warn!(?key, "removing node with duplicate identity");
            }
            if let Some(bounds) = self.remove_node(key) {
                report.removed_nodes.push(key);
                report.touch(bounds);
            }
        }
        // A duplicate may have shadowed the surviving node in the index.
        index = self
            .nodes()
            .filter_map(|(key, node)| node.handle().map(|id| (id, key)))
            .collect();

        for object in snapshot.objects() {
            let key = match index.get(&object.id) {
                Some(key) => {
                    let key = *key;
                    if let Some(node) = self.nodes.get_mut(key) {
                        let before = node.paint_bounds();
                        if node.refresh(object) {
                            report.refreshed_nodes.push(key);
                            report.touch(before);
                            report.touch(node.paint_bounds());
                        }
                    }
                    self.node_order.retain(|candidate| *candidate != key);
                    key
                }
                None => {
                    let node = VisualNode::from_snapshot(object);
                    report.touch(node.paint_bounds());
                    let key = self.nodes.insert(node);
                    index.insert(object.id, key);
                    report.added_nodes.push(key);
                    key
                }
            };
            self.node_order.push(key);
        }
        index
    }

    fn sort_by_document_order(&mut self, snapshot: &DocumentSnapshot) {
        let nodes = &self.nodes;
        self.node_order.sort_by_key(|key| {
            nodes
                .get(*key)
                .and_then(VisualNode::handle)
                .and_then(|id| snapshot.index_of(id))
                .unwrap_or(usize::MAX)
        });
    }

    fn sync_edges(
        &mut self,
        snapshot: &DocumentSnapshot,
        index: &HashMap<ObjectId, NodeKey>,
        report: &mut ReconcileReport,
    ) {
        let existing: HashMap<ConnectionId, EdgeKey> = self
            .edges()
            .map(|(key, edge)| (edge.handle(), key))
            .collect();

        for connection in snapshot.connections() {
            let resolved = self.resolve_endpoints(connection, index);
            let Some((source, destination)) = resolved else {
                report.skipped_connections.push(connection.id);
                // An edge left from an earlier pass would now point at the
                // wrong ports.
                if let Some(key) = existing.get(&connection.id)
                    && let Some(bounds) = self.remove_edge(*key)
                {
                    report.removed_edges += 1;
                    report.touch(bounds);
                }
                continue;
            };
            let Some((from, to, signal)) = self.edge_anchors(source, destination) else {
                diagnose_skipped(connection, "ports are not an output/input pair");
                report.skipped_connections.push(connection.id);
                continue;
            };

            match existing.get(&connection.id).copied() {
                Some(key) => {
                    let Some(edge) = self.edges.get_mut(key) else {
                        continue;
                    };
                    if edge.source() != source || edge.destination() != destination {
                        let old_bounds = edge.path().bounds();
                        let replacement = VisualEdge::new(
                            connection.id,
                            source,
                            destination,
                            signal,
                            from,
                            to,
                            connection.path_state.clone(),
                        );
                        report.touch(old_bounds);
                        report.touch(replacement.path().bounds());
                        *edge = replacement;
                        report.recreated_edges += 1;
                    } else {
                        let before = edge.path().bounds();
                        if edge.refresh(from, to, connection.path_state.as_deref()) {
                            report.touch(before);
                            report.touch(edge.path().bounds());
                        }
                    }
                }
                None => {
                    let edge = VisualEdge::new(
                        connection.id,
                        source,
                        destination,
                        signal,
                        from,
                        to,
                        connection.path_state.clone(),
                    );
                    report.touch(edge.path().bounds());
                    let key = self.edges.insert(edge);
                    self.edge_order.push(key);
                    report.added_edges += 1;
                }
            }
        }
    }

    fn resolve_endpoints(
        &self,
        connection: &ConnectionSnapshot,
        index: &HashMap<ObjectId, NodeKey>,
    ) -> Option<(PortRef, PortRef)> {
        let (Some(source_key), Some(destination_key)) = (
            index.get(&connection.source).copied(),
            index.get(&connection.destination).copied(),
        ) else {
            diagnose_skipped(connection, "endpoint object has no node");
            return None;
        };
        let source_node = self.nodes.get(source_key)?;
        let destination_node = self.nodes.get(destination_key)?;
        let (Some(source_slot), Some(destination_slot)) = (
            source_node.output_slot(connection.source_port),
            destination_node.input_slot(connection.destination_port),
        ) else {
            diagnose_skipped(connection, "port index out of range");
            return None;
        };
        Some((
            PortRef {
                node: source_key,
                slot: source_slot,
            },
            PortRef {
                node: destination_key,
                slot: destination_slot,
            },
        ))
    }
}

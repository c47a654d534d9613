//! Visual scene of one canvas view and its reconciliation against the
//! document.
//!
//! Internal modules:
//! - `node`: visual nodes and their ports.
//! - `edge`: visual edges, path geometry, in-progress edges.
//! - `content`: type-specific node content (render, hit-test, parameters).
//! - `graph`: the ordered scene graph, hit testing, selection, lasso and edge
//!   creation.
//! - `reconcile`: the pass that re-derives the scene from a document snapshot.

mod content;
mod edge;
mod graph;
mod node;
mod reconcile;
mod style;

pub use content::{
    ArrayContent, ArrayDrawMode, NodeContent, Parameter, ParameterValue, SubgraphContent,
    biquad_magnitude_db,
};
pub use edge::{EdgePath, PendingEdge, VisualEdge, decode_route, encode_route};
pub use graph::{ConnectionRequest, EDGE_HIT_TOLERANCE, HitTarget, SceneGraph};
pub use node::{ACTIVITY_TICKS, PORT_HEIGHT, PORT_WIDTH, Port, PortRef, VisualNode};
pub use reconcile::ReconcileReport;
pub use style::Palette;

slotmap::new_key_type! {
    pub struct NodeKey;
    pub struct EdgeKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneItem {
    Node(NodeKey),
    Edge(EdgeKey),
}

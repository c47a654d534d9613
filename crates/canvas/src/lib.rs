//! Canvas views over a shared patch document.
//!
//! - `canvas`: one view: scene, transform, editing gestures and the
//!   coalesced reconciliation entry points.
//! - `workspace`: every view of a document, undo/redo and clipboard
//!   operations that must keep all views consistent.
//! - `surface`: the per-frame tick tying a view to its renderer.
//! - `settings`: the explicit settings struct, loaded from TOML.

mod canvas;
mod settings;
mod surface;
mod workspace;

use document_protocol::DocumentError;
use scene::{EdgeKey, NodeKey};
use view::ViewTransformError;

pub use canvas::{Canvas, CanvasUpdate, Invalidation};
pub use settings::{
    CanvasSettings, MIN_PRESENTATION_SIDE, QueueSettings, SettingsError, WindowSize,
};
pub use surface::{CanvasSurface, SurfaceMetrics};
pub use workspace::{DUPLICATE_LABEL, PASTE_LABEL, REMOVE_LABEL, ViewKey, Workspace};

#[derive(Debug, thiserror::Error)]
pub enum CanvasError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("view transform rejected the change: {0:?}")]
    View(ViewTransformError),
    #[error("the canvas is locked")]
    Locked,
    #[error("node {0:?} is not in the scene")]
    UnknownNode(NodeKey),
    #[error("edge {0:?} is not in the scene")]
    UnknownEdge(EdgeKey),
    #[error("node {0:?} is not showing a creation editor")]
    NotPending(NodeKey),
    #[error("node {0:?} has no document object")]
    Unbound(NodeKey),
    #[error("view {0:?} is not open")]
    UnknownView(ViewKey),
}

impl From<ViewTransformError> for CanvasError {
    fn from(error: ViewTransformError) -> Self {
        CanvasError::View(error)
    }
}

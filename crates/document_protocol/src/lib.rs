//! Contract between the canvas core and the external patch document.
//!
//! The document (objects, connections, undo history) is owned by the execution
//! engine. The canvas only ever sees it through plain-data snapshots and
//! addresses it by [`ObjectId`] / [`ConnectionId`], which are never reused by a
//! document once issued.

use std::collections::{HashMap, HashSet};
use std::fmt;

use model::{Point, Rect};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    Control,
    Signal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub kind: PortKind,
}

impl PortDescriptor {
    pub const CONTROL: Self = Self {
        kind: PortKind::Control,
    };
    pub const SIGNAL: Self = Self {
        kind: PortKind::Signal,
    };
}

/// Type tag of a document object together with its type-specific state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectKind {
    Text,
    Message,
    Comment,
    Knob {
        value: f32,
        min: f32,
        max: f32,
    },
    /// `draw_type` is the document's own encoding (see the canvas crate for
    /// the UI mapping).
    Array {
        name: String,
        size: u32,
        draw_type: u8,
        save_contents: bool,
    },
    FilterGraph {
        coefficients: [f32; 5],
    },
    Subgraph {
        graph_on_parent: bool,
        hide_text: bool,
        x_range: (f32, f32),
        y_range: (f32, f32),
    },
    /// Drawing primitive rendered behind every other object.
    Drawable,
}

impl ObjectKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ObjectKind::Text => "text",
            ObjectKind::Message => "message",
            ObjectKind::Comment => "comment",
            ObjectKind::Knob { .. } => "knob",
            ObjectKind::Array { .. } => "array",
            ObjectKind::FilterGraph { .. } => "filter_graph",
            ObjectKind::Subgraph { .. } => "subgraph",
            ObjectKind::Drawable => "drawable",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSnapshot {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub text: String,
    pub bounds: Rect,
    pub inputs: Vec<PortDescriptor>,
    pub outputs: Vec<PortDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub source: ObjectId,
    pub source_port: usize,
    pub destination: ObjectId,
    pub destination_port: usize,
    /// Opaque routing blob persisted on behalf of the UI.
    pub path_state: Option<String>,
}

/// Consistent copy of the document taken under the document lock.
///
/// Reconciliation runs against a snapshot so that the lock is never held for
/// the duration of a pass.
#[derive(Debug, Clone, Default)]
pub struct DocumentSnapshot {
    revision: u64,
    objects: Vec<ObjectSnapshot>,
    connections: Vec<ConnectionSnapshot>,
    object_index: HashMap<ObjectId, usize>,
    connection_ids: HashSet<ConnectionId>,
}

impl DocumentSnapshot {
    pub fn new(
        revision: u64,
        objects: Vec<ObjectSnapshot>,
        connections: Vec<ConnectionSnapshot>,
    ) -> Self {
        let object_index = objects
            .iter()
            .enumerate()
            .map(|(index, object)| (object.id, index))
            .collect();
        let connection_ids = connections.iter().map(|connection| connection.id).collect();
        Self {
            revision,
            objects,
            connections,
            object_index,
            connection_ids,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn objects(&self) -> &[ObjectSnapshot] {
        &self.objects
    }

    pub fn connections(&self) -> &[ConnectionSnapshot] {
        &self.connections
    }

    pub fn resolve(&self, id: ObjectId) -> Option<&ObjectSnapshot> {
        self.object_index
            .get(&id)
            .and_then(|index| self.objects.get(*index))
    }

    /// Position of `id` in document order.
    pub fn index_of(&self, id: ObjectId) -> Option<usize> {
        self.object_index.get(&id).copied()
    }

    pub fn contains_connection(&self, id: ConnectionId) -> bool {
        self.connection_ids.contains(&id)
    }
}

/// Description of an object to be created by the document.
#[derive(Debug, Clone, PartialEq)]
pub struct NewObject {
    pub kind: ObjectKind,
    pub text: String,
    pub position: Point,
    pub size: Option<(i32, i32)>,
    pub inputs: Vec<PortDescriptor>,
    pub outputs: Vec<PortDescriptor>,
}

impl NewObject {
    pub fn text(text: impl Into<String>, position: Point) -> Self {
        Self {
            kind: ObjectKind::Text,
            text: text.into(),
            position,
            size: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_ports(mut self, inputs: usize, outputs: usize) -> Self {
        self.inputs = vec![PortDescriptor::CONTROL; inputs];
        self.outputs = vec![PortDescriptor::CONTROL; outputs];
        self
    }

    pub fn with_kind(mut self, kind: ObjectKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_size(mut self, width: i32, height: i32) -> Self {
        self.size = Some((width, height));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("object {0} does not exist")]
    ObjectNotFound(ObjectId),
    #[error("connection {0} does not exist")]
    ConnectionNotFound(ConnectionId),
    #[error("port {port} out of range on {object} ({direction:?})")]
    PortOutOfRange {
        object: ObjectId,
        direction: PortDirection,
        port: usize,
    },
    #[error("connection from {source_object}:{source_port} to {destination}:{destination_port} already exists")]
    DuplicateConnection {
        source_object: ObjectId,
        source_port: usize,
        destination: ObjectId,
        destination_port: usize,
    },
    #[error("transaction '{expected}' cannot be closed by '{actual}'")]
    TransactionMismatch { expected: String, actual: String },
    #[error("no open transaction to close ('{0}')")]
    NoOpenTransaction(String),
    #[error("clipboard text is not a patch fragment: {0}")]
    InvalidClipboard(String),
}

/// Read side of the external document.
pub trait DocumentView {
    fn revision(&self) -> u64;

    /// Objects in document order.
    fn objects(&self) -> Vec<ObjectSnapshot>;

    /// Connections in document order.
    fn connections(&self) -> Vec<ConnectionSnapshot>;

    fn resolve_object(&self, id: ObjectId) -> Option<ObjectSnapshot>;

    /// True once `id` was issued and then removed. A never-issued or still
    /// pending id reports `false`.
    fn object_was_deleted(&self, id: ObjectId) -> bool;

    fn is_locked(&self) -> bool;

    /// Objects currently flagged as selected by the engine itself (paste and
    /// duplicate mark their results this way).
    fn selected_objects(&self) -> Vec<ObjectId>;

    fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot::new(self.revision(), self.objects(), self.connections())
    }
}

/// Mutation entry points of the external document.
pub trait DocumentCommands {
    fn create_object(&mut self, object: NewObject) -> Result<ObjectId, DocumentError>;

    fn remove_object(&mut self, id: ObjectId) -> Result<(), DocumentError>;

    fn move_objects(&mut self, ids: &[ObjectId], delta_x: i32, delta_y: i32);

    fn connect(
        &mut self,
        source: ObjectId,
        source_port: usize,
        destination: ObjectId,
        destination_port: usize,
    ) -> Result<ConnectionId, DocumentError>;

    fn disconnect(&mut self, id: ConnectionId) -> Result<(), DocumentError>;

    /// Inserts a port, shifting later ports (and their connections) up by one.
    fn insert_port(
        &mut self,
        id: ObjectId,
        direction: PortDirection,
        index: usize,
        port: PortDescriptor,
    ) -> Result<(), DocumentError>;

    /// Removes a port, dropping its connections and shifting later ports down.
    fn remove_port(
        &mut self,
        id: ObjectId,
        direction: PortDirection,
        index: usize,
    ) -> Result<(), DocumentError>;

    fn set_path_state(
        &mut self,
        id: ConnectionId,
        path_state: Option<String>,
    ) -> Result<(), DocumentError>;

    /// Replaces the type-specific state of an object (parameter edits).
    fn set_object_kind(&mut self, id: ObjectId, kind: ObjectKind) -> Result<(), DocumentError>;

    fn begin_transaction(&mut self, label: &str);

    fn end_transaction(&mut self, label: &str) -> Result<(), DocumentError>;

    /// Returns `false` when there was nothing to undo.
    fn undo(&mut self) -> bool;

    fn redo(&mut self) -> bool;

    /// Serializes `ids` (and the connections among them) to clipboard text.
    fn copy(&self, ids: &[ObjectId]) -> String;

    /// Pastes clipboard text with its top-left corner at `position`. The new
    /// objects become the engine selection.
    fn paste(&mut self, text: &str, position: Point) -> Result<Vec<ObjectId>, DocumentError>;

    /// Duplicates `ids`; the copies become the engine selection.
    fn duplicate(&mut self, ids: &[ObjectId]) -> Result<Vec<ObjectId>, DocumentError>;

    fn set_locked(&mut self, locked: bool);

    fn set_selected(&mut self, id: ObjectId, selected: bool);

    fn deselect_all(&mut self);
}

/// Mutation request as plain data, sent across threads to the execution
/// engine.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentCommand {
    CreateObject(NewObject),
    RemoveObject(ObjectId),
    MoveObjects {
        ids: Vec<ObjectId>,
        delta_x: i32,
        delta_y: i32,
    },
    Connect {
        source: ObjectId,
        source_port: usize,
        destination: ObjectId,
        destination_port: usize,
    },
    Disconnect(ConnectionId),
    SetObjectKind {
        id: ObjectId,
        kind: ObjectKind,
    },
    SetPathState {
        id: ConnectionId,
        path_state: Option<String>,
    },
    InsertPort {
        id: ObjectId,
        direction: PortDirection,
        index: usize,
        port: PortDescriptor,
    },
    RemovePort {
        id: ObjectId,
        direction: PortDirection,
        index: usize,
    },
    BeginTransaction(String),
    EndTransaction(String),
    Undo,
    Redo,
    Paste {
        text: String,
        position: Point,
    },
    Duplicate(Vec<ObjectId>),
    SetLocked(bool),
}

impl DocumentCommand {
    /// Whether a successful application changes document structure and must
    /// be followed by a reconciliation pass.
    pub fn is_structural(&self) -> bool {
        !matches!(self, DocumentCommand::BeginTransaction(_))
    }

    pub fn apply<D>(self, document: &mut D) -> Result<(), DocumentError>
    where
        D: DocumentCommands + ?Sized,
    {
        match self {
            DocumentCommand::CreateObject(object) => document.create_object(object).map(drop),
            DocumentCommand::RemoveObject(id) => document.remove_object(id),
            DocumentCommand::MoveObjects {
                ids,
                delta_x,
                delta_y,
            } => {
                document.move_objects(&ids, delta_x, delta_y);
                Ok(())
            }
            DocumentCommand::Connect {
                source,
                source_port,
                destination,
                destination_port,
            } => document
                .connect(source, source_port, destination, destination_port)
                .map(drop),
            DocumentCommand::Disconnect(id) => document.disconnect(id),
            DocumentCommand::SetObjectKind { id, kind } => document.set_object_kind(id, kind),
            DocumentCommand::SetPathState { id, path_state } => {
                document.set_path_state(id, path_state)
            }
            DocumentCommand::InsertPort {
                id,
                direction,
                index,
                port,
            } => document.insert_port(id, direction, index, port),
            DocumentCommand::RemovePort {
                id,
                direction,
                index,
            } => document.remove_port(id, direction, index),
            DocumentCommand::BeginTransaction(label) => {
                document.begin_transaction(&label);
                Ok(())
            }
            DocumentCommand::EndTransaction(label) => document.end_transaction(&label),
            DocumentCommand::Undo => {
                document.undo();
                Ok(())
            }
            DocumentCommand::Redo => {
                document.redo();
                Ok(())
            }
            DocumentCommand::Paste { text, position } => document.paste(&text, position).map(drop),
            DocumentCommand::Duplicate(ids) => document.duplicate(&ids).map(drop),
            DocumentCommand::SetLocked(locked) => {
                document.set_locked(locked);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(id: u64) -> ObjectSnapshot {
        ObjectSnapshot {
            id: ObjectId(id),
            kind: ObjectKind::Text,
            text: format!("obj {id}"),
            bounds: Rect::new(0, 0, 10, 10),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    #[test]
    fn snapshot_resolves_by_identity_and_reports_order() {
        let snapshot = DocumentSnapshot::new(3, vec![object(7), object(2)], Vec::new());
        assert_eq!(snapshot.index_of(ObjectId(2)), Some(1));
        assert_eq!(snapshot.resolve(ObjectId(7)).map(|o| o.id), Some(ObjectId(7)));
        assert!(snapshot.resolve(ObjectId(3)).is_none());
    }

    #[test]
    fn begin_transaction_is_the_only_non_structural_command() {
        assert!(!DocumentCommand::BeginTransaction("x".into()).is_structural());
        assert!(DocumentCommand::Undo.is_structural());
        assert!(DocumentCommand::EndTransaction("x".into()).is_structural());
    }
}

//! In-memory patch document.
//!
//! `PatchDocument` plays the part of the external document owned by the
//! execution engine: ordered objects and connections, an engine-side
//! selection, a lock flag, and whole-state undo history grouped by named
//! transactions.

mod clipboard;

use document_protocol::{
    ConnectionId, ConnectionSnapshot, DocumentCommands, DocumentError, DocumentView, NewObject,
    ObjectId, ObjectKind, ObjectSnapshot, PortDescriptor, PortDirection,
};
use model::{Point, Rect};

use crate::clipboard::ClipboardFragment;

pub const DEFAULT_OBJECT_HEIGHT: i32 = 22;
const MIN_OBJECT_WIDTH: i32 = 32;
const CHARACTER_WIDTH: i32 = 7;
const DUPLICATE_OFFSET: i32 = 10;

#[derive(Debug, Clone, Default, PartialEq)]
struct PatchState {
    objects: Vec<ObjectSnapshot>,
    connections: Vec<ConnectionSnapshot>,
}

impl PatchState {
    fn object_index(&self, id: ObjectId) -> Option<usize> {
        self.objects.iter().position(|object| object.id == id)
    }

    fn object(&self, id: ObjectId) -> Result<&ObjectSnapshot, DocumentError> {
        self.objects
            .iter()
            .find(|object| object.id == id)
            .ok_or(DocumentError::ObjectNotFound(id))
    }

    fn object_mut(&mut self, id: ObjectId) -> Result<&mut ObjectSnapshot, DocumentError> {
        self.objects
            .iter_mut()
            .find(|object| object.id == id)
            .ok_or(DocumentError::ObjectNotFound(id))
    }
}

#[derive(Debug, Clone)]
struct UndoStep {
    label: String,
    state: PatchState,
}

#[derive(Debug)]
struct OpenTransaction {
    labels: Vec<String>,
    before: PatchState,
}

pub struct PatchDocument {
    state: PatchState,
    revision: u64,
    next_object_id: u64,
    next_connection_id: u64,
    locked: bool,
    selection: Vec<ObjectId>,
    undo_stack: Vec<UndoStep>,
    redo_stack: Vec<UndoStep>,
    transaction: Option<OpenTransaction>,
}

impl Default for PatchDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchDocument {
    pub fn new() -> Self {
        Self {
            state: PatchState::default(),
            revision: 0,
            next_object_id: 1,
            next_connection_id: 1,
            locked: false,
            selection: Vec::new(),
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            transaction: None,
        }
    }

    pub fn object_count(&self) -> usize {
        self.state.objects.len()
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.len()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_label(&self) -> Option<&str> {
        self.undo_stack.last().map(|step| step.label.as_str())
    }

    pub fn transaction_depth(&self) -> usize {
        self.transaction
            .as_ref()
            .map_or(0, |transaction| transaction.labels.len())
    }

    /// Moves `id` to `index` in document order (the visual stacking order).
    pub fn reorder_object(&mut self, id: ObjectId, index: usize) -> Result<(), DocumentError> {
        self.record("Reorder object", |state| {
            let current = state
                .object_index(id)
                .ok_or(DocumentError::ObjectNotFound(id))?;
            let object = state.objects.remove(current);
            let index = index.min(state.objects.len());
            state.objects.insert(index, object);
            Ok(())
        })
    }

    fn bump_revision(&mut self) {
        self.revision += 1;
    }

    /// Runs `mutation` as one undo step, or as part of the open transaction.
    fn record<R>(
        &mut self,
        label: &str,
        mutation: impl FnOnce(&mut PatchState) -> Result<R, DocumentError>,
    ) -> Result<R, DocumentError> {
        let before = if self.transaction.is_none() {
            Some(self.state.clone())
        } else {
            None
        };
        let result = mutation(&mut self.state)?;
        self.bump_revision();
        if let Some(before) = before
            && before != self.state
        {
            self.push_undo(label, before);
        }
        Ok(result)
    }

    fn push_undo(&mut self, label: &str, state: PatchState) {
        self.undo_stack.push(UndoStep {
            label: label.to_owned(),
            state,
        });
        self.redo_stack.clear();
    }

    fn allocate_object_id(&mut self) -> ObjectId {
        let id = ObjectId(self.next_object_id);
        self.next_object_id += 1;
        id
    }

    fn allocate_connection_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;
        id
    }

    fn build_object(&mut self, object: NewObject) -> ObjectSnapshot {
        let (width, height) = object.size.unwrap_or_else(|| default_size(&object.text));
        ObjectSnapshot {
            id: self.allocate_object_id(),
            kind: object.kind,
            text: object.text,
            bounds: Rect::new(object.position.x, object.position.y, width, height),
            inputs: object.inputs,
            outputs: object.outputs,
        }
    }

    fn validate_connection(
        state: &PatchState,
        source: ObjectId,
        source_port: usize,
        destination: ObjectId,
        destination_port: usize,
    ) -> Result<(), DocumentError> {
        let source_object = state.object(source)?;
        if source_port >= source_object.outputs.len() {
            return Err(DocumentError::PortOutOfRange {
                object: source,
                direction: PortDirection::Output,
                port: source_port,
            });
        }
        let destination_object = state.object(destination)?;
        if destination_port >= destination_object.inputs.len() {
            return Err(DocumentError::PortOutOfRange {
                object: destination,
                direction: PortDirection::Input,
                port: destination_port,
            });
        }
        let duplicate = state.connections.iter().any(|connection| {
            connection.source == source
                && connection.source_port == source_port
                && connection.destination == destination
                && connection.destination_port == destination_port
        });
        if duplicate {
            return Err(DocumentError::DuplicateConnection {
                source_object: source,
                source_port,
                destination,
                destination_port,
            });
        }
        Ok(())
    }

    fn paste_fragment(
        &mut self,
        fragment: ClipboardFragment,
        position: Point,
    ) -> Result<Vec<ObjectId>, DocumentError> {
        let origin = fragment.origin();
        let delta_x = position.x - origin.x;
        let delta_y = position.y - origin.y;
        let mut new_objects = Vec::with_capacity(fragment.objects.len());
        for object in fragment.objects {
            let id = self.allocate_object_id();
            new_objects.push(ObjectSnapshot {
                id,
                kind: object.kind,
                text: object.text,
                bounds: object.bounds.translated(delta_x, delta_y),
                inputs: object.inputs,
                outputs: object.outputs,
            });
        }
        let new_ids: Vec<ObjectId> = new_objects.iter().map(|object| object.id).collect();
        let mut new_connections = Vec::with_capacity(fragment.connections.len());
        for connection in fragment.connections {
            new_connections.push(ConnectionSnapshot {
                id: self.allocate_connection_id(),
                source: new_ids[connection.source],
                source_port: connection.source_port,
                destination: new_ids[connection.destination],
                destination_port: connection.destination_port,
                path_state: None,
            });
        }
        self.record("Paste", move |state| {
            state.objects.extend(new_objects);
            state.connections.extend(new_connections);
            Ok(())
        })?;
        self.selection = new_ids.clone();
        tracing::debug!(count = new_ids.len(), "pasted objects");
        Ok(new_ids)
    }
}

fn default_size(text: &str) -> (i32, i32) {
    let characters = i32::try_from(text.chars().count()).unwrap_or(i32::MAX / CHARACTER_WIDTH);
    let width = (characters * CHARACTER_WIDTH + 8).max(MIN_OBJECT_WIDTH);
    (width, DEFAULT_OBJECT_HEIGHT)
}

fn ports_mut(object: &mut ObjectSnapshot, direction: PortDirection) -> &mut Vec<PortDescriptor> {
    match direction {
        PortDirection::Input => &mut object.inputs,
        PortDirection::Output => &mut object.outputs,
    }
}

impl DocumentView for PatchDocument {
    fn revision(&self) -> u64 {
        self.revision
    }

    fn objects(&self) -> Vec<ObjectSnapshot> {
        self.state.objects.clone()
    }

    fn connections(&self) -> Vec<ConnectionSnapshot> {
        self.state.connections.clone()
    }

    fn resolve_object(&self, id: ObjectId) -> Option<ObjectSnapshot> {
        self.state.object(id).ok().cloned()
    }

    fn object_was_deleted(&self, id: ObjectId) -> bool {
        id.0 != 0 && id.0 < self.next_object_id && self.state.object_index(id).is_none()
    }

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn selected_objects(&self) -> Vec<ObjectId> {
        self.selection.clone()
    }
}

impl DocumentCommands for PatchDocument {
    fn create_object(&mut self, object: NewObject) -> Result<ObjectId, DocumentError> {
        let object = self.build_object(object);
        let id = object.id;
        self.record("Create object", move |state| {
            state.objects.push(object);
            Ok(())
        })?;
        Ok(id)
    }

    fn remove_object(&mut self, id: ObjectId) -> Result<(), DocumentError> {
        self.record("Remove object", |state| {
            let index = state
                .object_index(id)
                .ok_or(DocumentError::ObjectNotFound(id))?;
            state.objects.remove(index);
            state
                .connections
                .retain(|connection| connection.source != id && connection.destination != id);
            Ok(())
        })?;
        self.selection.retain(|selected| *selected != id);
        Ok(())
    }

    fn move_objects(&mut self, ids: &[ObjectId], delta_x: i32, delta_y: i32) {
        if ids.is_empty() || (delta_x == 0 && delta_y == 0) {
            return;
        }
        let result = self.record("Move object/s", |state| {
            for object in state
                .objects
                .iter_mut()
                .filter(|object| ids.contains(&object.id))
            {
                object.bounds = object.bounds.translated(delta_x, delta_y);
            }
            Ok(())
        });
        debug_assert!(result.is_ok());
    }

    fn connect(
        &mut self,
        source: ObjectId,
        source_port: usize,
        destination: ObjectId,
        destination_port: usize,
    ) -> Result<ConnectionId, DocumentError> {
        Self::validate_connection(&self.state, source, source_port, destination, destination_port)?;
        let id = self.allocate_connection_id();
        self.record("Connect", |state| {
            state.connections.push(ConnectionSnapshot {
                id,
                source,
                source_port,
                destination,
                destination_port,
                path_state: None,
            });
            Ok(())
        })?;
        Ok(id)
    }

    fn disconnect(&mut self, id: ConnectionId) -> Result<(), DocumentError> {
        self.record("Disconnect", |state| {
            let index = state
                .connections
                .iter()
                .position(|connection| connection.id == id)
                .ok_or(DocumentError::ConnectionNotFound(id))?;
            state.connections.remove(index);
            Ok(())
        })
    }

    fn insert_port(
        &mut self,
        id: ObjectId,
        direction: PortDirection,
        index: usize,
        port: PortDescriptor,
    ) -> Result<(), DocumentError> {
        self.record("Insert port", |state| {
            let ports = ports_mut(state.object_mut(id)?, direction);
            if index > ports.len() {
                return Err(DocumentError::PortOutOfRange {
                    object: id,
                    direction,
                    port: index,
                });
            }
            ports.insert(index, port);
            for connection in &mut state.connections {
                match direction {
                    PortDirection::Input
                        if connection.destination == id && connection.destination_port >= index =>
                    {
                        connection.destination_port += 1;
                    }
                    PortDirection::Output
                        if connection.source == id && connection.source_port >= index =>
                    {
                        connection.source_port += 1;
                    }
                    _ => {}
                }
            }
            Ok(())
        })
    }

    fn remove_port(
        &mut self,
        id: ObjectId,
        direction: PortDirection,
        index: usize,
    ) -> Result<(), DocumentError> {
        self.record("Remove port", |state| {
            let ports = ports_mut(state.object_mut(id)?, direction);
            if index >= ports.len() {
                return Err(DocumentError::PortOutOfRange {
                    object: id,
                    direction,
                    port: index,
                });
            }
            ports.remove(index);
            state.connections.retain(|connection| match direction {
                PortDirection::Input => {
                    !(connection.destination == id && connection.destination_port == index)
                }
                PortDirection::Output => {
                    !(connection.source == id && connection.source_port == index)
                }
            });
            for connection in &mut state.connections {
                match direction {
                    PortDirection::Input
                        if connection.destination == id && connection.destination_port > index =>
                    {
                        connection.destination_port -= 1;
                    }
                    PortDirection::Output
                        if connection.source == id && connection.source_port > index =>
                    {
                        connection.source_port -= 1;
                    }
                    _ => {}
                }
            }
            Ok(())
        })
    }

    fn set_path_state(
        &mut self,
        id: ConnectionId,
        path_state: Option<String>,
    ) -> Result<(), DocumentError> {
        self.record("Route connection", |state| {
            let connection = state
                .connections
                .iter_mut()
                .find(|connection| connection.id == id)
                .ok_or(DocumentError::ConnectionNotFound(id))?;
            connection.path_state = path_state;
            Ok(())
        })
    }

    fn set_object_kind(&mut self, id: ObjectId, kind: ObjectKind) -> Result<(), DocumentError> {
        self.record("Change object", |state| {
            state.object_mut(id)?.kind = kind;
            Ok(())
        })
    }

    fn begin_transaction(&mut self, label: &str) {
        match &mut self.transaction {
            Some(transaction) => transaction.labels.push(label.to_owned()),
            None => {
                self.transaction = Some(OpenTransaction {
                    labels: vec![label.to_owned()],
                    before: self.state.clone(),
                });
            }
        }
    }

    fn end_transaction(&mut self, label: &str) -> Result<(), DocumentError> {
        let Some(transaction) = &mut self.transaction else {
            return Err(DocumentError::NoOpenTransaction(label.to_owned()));
        };
        let expected = transaction.labels.last().cloned().unwrap_or_default();
        if expected != label {
            return Err(DocumentError::TransactionMismatch {
                expected,
                actual: label.to_owned(),
            });
        }
        transaction.labels.pop();
        if !transaction.labels.is_empty() {
            return Ok(());
        }
        if let Some(transaction) = self.transaction.take()
            && transaction.before != self.state
        {
            self.push_undo(label, transaction.before);
        }
        Ok(())
    }

    fn undo(&mut self) -> bool {
        let Some(step) = self.undo_stack.pop() else {
            return false;
        };
        let current = std::mem::replace(&mut self.state, step.state);
        self.redo_stack.push(UndoStep {
            label: step.label,
            state: current,
        });
        self.bump_revision();
        true
    }

    fn redo(&mut self) -> bool {
        let Some(step) = self.redo_stack.pop() else {
            return false;
        };
        let current = std::mem::replace(&mut self.state, step.state);
        self.undo_stack.push(UndoStep {
            label: step.label,
            state: current,
        });
        self.bump_revision();
        true
    }

    fn copy(&self, ids: &[ObjectId]) -> String {
        ClipboardFragment::collect(&self.state.objects, &self.state.connections, ids).to_text()
    }

    fn paste(&mut self, text: &str, position: Point) -> Result<Vec<ObjectId>, DocumentError> {
        let fragment = ClipboardFragment::from_text(text)?;
        self.paste_fragment(fragment, position)
    }

    fn duplicate(&mut self, ids: &[ObjectId]) -> Result<Vec<ObjectId>, DocumentError> {
        for id in ids {
            self.state.object(*id)?;
        }
        let fragment = ClipboardFragment::collect(&self.state.objects, &self.state.connections, ids);
        let origin = fragment.origin();
        self.paste_fragment(
            fragment,
            origin.translated(DUPLICATE_OFFSET, DUPLICATE_OFFSET),
        )
    }

    fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    fn set_selected(&mut self, id: ObjectId, selected: bool) {
        let present = self.selection.contains(&id);
        if selected && !present && self.state.object_index(id).is_some() {
            self.selection.push(id);
        } else if !selected && present {
            self.selection.retain(|candidate| *candidate != id);
        }
    }

    fn deselect_all(&mut self) {
        self.selection.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use document_protocol::PortKind;

    fn two_connected(document: &mut PatchDocument) -> (ObjectId, ObjectId, ConnectionId) {
        let source = document
            .create_object(NewObject::text("osc~ 440", Point::new(0, 0)).with_ports(2, 1))
            .unwrap();
        let destination = document
            .create_object(NewObject::text("dac~", Point::new(0, 60)).with_ports(2, 0))
            .unwrap();
        let connection = document.connect(source, 0, destination, 1).unwrap();
        (source, destination, connection)
    }

    #[test]
    fn identities_are_never_reissued() {
        let mut document = PatchDocument::new();
        let first = document
            .create_object(NewObject::text("a", Point::ORIGIN))
            .unwrap();
        document.remove_object(first).unwrap();
        let second = document
            .create_object(NewObject::text("b", Point::ORIGIN))
            .unwrap();
        assert_ne!(first, second);
        assert!(document.object_was_deleted(first));
        assert!(!document.object_was_deleted(second));
        assert!(!document.object_was_deleted(ObjectId(999)));
    }

    #[test]
    fn removing_an_object_drops_its_connections() {
        let mut document = PatchDocument::new();
        let (source, _, _) = two_connected(&mut document);
        document.remove_object(source).unwrap();
        assert_eq!(document.connection_count(), 0);
    }

    #[test]
    fn connect_rejects_out_of_range_and_duplicate() {
        let mut document = PatchDocument::new();
        let (source, destination, _) = two_connected(&mut document);
        assert!(matches!(
            document.connect(source, 3, destination, 0),
            Err(DocumentError::PortOutOfRange { .. })
        ));
        assert!(matches!(
            document.connect(source, 0, destination, 1),
            Err(DocumentError::DuplicateConnection { .. })
        ));
    }

    #[test]
    fn inserting_an_input_renumbers_connections() {
        let mut document = PatchDocument::new();
        let (_, destination, connection) = two_connected(&mut document);
        document
            .insert_port(
                destination,
                PortDirection::Input,
                0,
                PortDescriptor {
                    kind: PortKind::Signal,
                },
            )
            .unwrap();
        let stored = document
            .connections()
            .into_iter()
            .find(|candidate| candidate.id == connection)
            .unwrap();
        assert_eq!(stored.destination_port, 2);
        assert_eq!(document.resolve_object(destination).unwrap().inputs.len(), 3);
    }

    #[test]
    fn removing_a_port_drops_and_renumbers() {
        let mut document = PatchDocument::new();
        let (_, destination, _) = two_connected(&mut document);
        document
            .remove_port(destination, PortDirection::Input, 0)
            .unwrap();
        assert_eq!(document.connections()[0].destination_port, 0);
        document
            .remove_port(destination, PortDirection::Input, 0)
            .unwrap();
        assert_eq!(document.connection_count(), 0);
    }

    #[test]
    fn transaction_groups_into_one_undo_step() {
        let mut document = PatchDocument::new();
        document.begin_transaction("Paste object/s");
        two_connected(&mut document);
        document.begin_transaction("inner");
        document.end_transaction("inner").unwrap();
        document.end_transaction("Paste object/s").unwrap();
        assert_eq!(document.undo_label(), Some("Paste object/s"));

        assert!(document.undo());
        assert_eq!(document.object_count(), 0);
        assert!(!document.undo());
        assert!(document.redo());
        assert_eq!(document.object_count(), 2);
        assert_eq!(document.connection_count(), 1);
    }

    #[test]
    fn mismatched_transaction_label_is_rejected() {
        let mut document = PatchDocument::new();
        document.begin_transaction("a");
        assert!(matches!(
            document.end_transaction("b"),
            Err(DocumentError::TransactionMismatch { .. })
        ));
        assert_eq!(document.transaction_depth(), 1);
        assert!(matches!(
            PatchDocument::new().end_transaction("a"),
            Err(DocumentError::NoOpenTransaction(_))
        ));
    }

    #[test]
    fn undo_restores_the_same_identities() {
        let mut document = PatchDocument::new();
        let (source, destination, connection) = two_connected(&mut document);
        document.remove_object(source).unwrap();
        assert!(document.undo());
        assert!(document.resolve_object(source).is_some());
        assert!(document.resolve_object(destination).is_some());
        assert_eq!(document.connections()[0].id, connection);
    }

    #[test]
    fn paste_places_fragment_and_selects_it() {
        let mut document = PatchDocument::new();
        let (source, destination, _) = two_connected(&mut document);
        let text = document.copy(&[source, destination]);
        let pasted = document.paste(&text, Point::new(100, 200)).unwrap();
        assert_eq!(pasted.len(), 2);
        assert_eq!(document.selected_objects(), pasted);
        let first = document.resolve_object(pasted[0]).unwrap();
        assert_eq!(first.bounds.position(), Point::new(100, 200));
        assert_eq!(document.connection_count(), 2);
    }

    #[test]
    fn duplicate_offsets_copies() {
        let mut document = PatchDocument::new();
        let (source, _, _) = two_connected(&mut document);
        let copies = document.duplicate(&[source]).unwrap();
        let copy = document.resolve_object(copies[0]).unwrap();
        assert_eq!(copy.bounds.position(), Point::new(10, 10));
        assert_eq!(copy.text, "osc~ 440");
        assert!(document.duplicate(&[ObjectId(77)]).is_err());
    }

    #[test]
    fn reordering_changes_document_order() {
        let mut document = PatchDocument::new();
        let (source, destination, _) = two_connected(&mut document);
        document.reorder_object(destination, 0).unwrap();
        let order: Vec<ObjectId> = document.objects().iter().map(|object| object.id).collect();
        assert_eq!(order, vec![destination, source]);
    }
}

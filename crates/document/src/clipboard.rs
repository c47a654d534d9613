use document_protocol::{
    ConnectionSnapshot, DocumentError, ObjectId, ObjectKind, ObjectSnapshot, PortDescriptor,
};
use model::{Point, Rect};
use serde::{Deserialize, Serialize};

/// Serialized patch fragment exchanged through the clipboard.
///
/// Connections refer to objects by their position in `objects`, never by
/// document identity, so a fragment can be pasted into any document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ClipboardFragment {
    pub objects: Vec<ClipboardObject>,
    pub connections: Vec<ClipboardConnection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ClipboardObject {
    pub kind: ObjectKind,
    pub text: String,
    pub bounds: Rect,
    pub inputs: Vec<PortDescriptor>,
    pub outputs: Vec<PortDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ClipboardConnection {
    pub source: usize,
    pub source_port: usize,
    pub destination: usize,
    pub destination_port: usize,
}

impl ClipboardFragment {
    pub fn collect(
        objects: &[ObjectSnapshot],
        connections: &[ConnectionSnapshot],
        ids: &[ObjectId],
    ) -> Self {
        let selected: Vec<&ObjectSnapshot> = objects
            .iter()
            .filter(|object| ids.contains(&object.id))
            .collect();
        let local_index =
            |id: ObjectId| selected.iter().position(|object| object.id == id);
        let fragment_connections = connections
            .iter()
            .filter_map(|connection| {
                Some(ClipboardConnection {
                    source: local_index(connection.source)?,
                    source_port: connection.source_port,
                    destination: local_index(connection.destination)?,
                    destination_port: connection.destination_port,
                })
            })
            .collect();
        Self {
            objects: selected
                .iter()
                .map(|object| ClipboardObject {
                    kind: object.kind.clone(),
                    text: object.text.clone(),
                    bounds: object.bounds,
                    inputs: object.inputs.clone(),
                    outputs: object.outputs.clone(),
                })
                .collect(),
            connections: fragment_connections,
        }
    }

    pub fn to_text(&self) -> String {
        // A fragment holds only strings, numbers and plain enums.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_text(text: &str) -> Result<Self, DocumentError> {
        let fragment: ClipboardFragment = serde_json::from_str(text)
            .map_err(|error| DocumentError::InvalidClipboard(error.to_string()))?;
        for connection in &fragment.connections {
            if connection.source >= fragment.objects.len()
                || connection.destination >= fragment.objects.len()
            {
                return Err(DocumentError::InvalidClipboard(format!(
                    "connection refers to object {} of {}",
                    connection.source.max(connection.destination),
                    fragment.objects.len()
                )));
            }
        }
        Ok(fragment)
    }

    /// Top-left corner of the fragment's bounding box.
    pub fn origin(&self) -> Point {
        self.objects
            .iter()
            .map(|object| object.bounds)
            .reduce(|left, right| left.union(&right))
            .map(|bounds| bounds.position())
            .unwrap_or(Point::ORIGIN)
    }
}

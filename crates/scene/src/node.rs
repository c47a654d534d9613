use document_protocol::{ObjectId, ObjectSnapshot, PortDescriptor, PortDirection, PortKind};
use model::{PointF, Rect};
use smallvec::SmallVec;

use crate::NodeKey;
use crate::content::NodeContent;

pub const PORT_WIDTH: i32 = 8;
pub const PORT_HEIGHT: i32 = 3;
const PORT_HIT_MARGIN: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    pub direction: PortDirection,
    /// Index within its direction group.
    pub index: usize,
    pub kind: PortKind,
    /// Canvas-space rectangle accepting pointer hits.
    pub hit_rect: Rect,
    /// Canvas-space rectangle the port is drawn in.
    pub rect: Rect,
}

impl Port {
    /// Point an edge attaches to: bottom centre for outputs, top centre for
    /// inputs.
    pub fn anchor(&self) -> PointF {
        let x = self.rect.x as f32 + self.rect.width as f32 / 2.0;
        match self.direction {
            PortDirection::Output => PointF::new(x, self.rect.bottom() as f32),
            PortDirection::Input => PointF::new(x, self.rect.y as f32),
        }
    }
}

/// Port of a node, addressed by its slot in the node's port list (inputs
/// first, then outputs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub node: NodeKey,
    pub slot: usize,
}

/// Visual counterpart of one document object.
#[derive(Debug, Clone)]
pub struct VisualNode {
    handle: Option<ObjectId>,
    bounds: Rect,
    last_known_bounds: Rect,
    text: String,
    ports: SmallVec<[Port; 8]>,
    input_count: usize,
    content: NodeContent,
    version: u64,
    pending_editor: Option<String>,
    activity: u8,
}

/// Ticks an activity flash stays lit.
pub const ACTIVITY_TICKS: u8 = 6;

impl VisualNode {
    pub fn from_snapshot(object: &ObjectSnapshot) -> Self {
        let mut node = Self {
            handle: Some(object.id),
            bounds: object.bounds,
            last_known_bounds: object.bounds,
            text: object.text.clone(),
            ports: SmallVec::new(),
            input_count: 0,
            content: NodeContent::from_kind(&object.kind),
            version: 0,
            pending_editor: None,
            activity: 0,
        };
        node.rebuild_ports(&object.inputs, &object.outputs);
        node
    }

    /// Node without a document object, showing the inline creation editor.
    pub fn pending(bounds: Rect) -> Self {
        Self {
            handle: None,
            bounds,
            last_known_bounds: bounds,
            text: String::new(),
            ports: SmallVec::new(),
            input_count: 0,
            content: NodeContent::Text,
            version: 0,
            pending_editor: Some(String::new()),
            activity: 0,
        }
    }

    pub fn handle(&self) -> Option<ObjectId> {
        self.handle
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Bounds from the last time the node was known to match its object.
    pub fn last_known_bounds(&self) -> Rect {
        self.last_known_bounds
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn input_count(&self) -> usize {
        self.input_count
    }

    pub fn output_count(&self) -> usize {
        self.ports.len() - self.input_count
    }

    pub fn content(&self) -> &NodeContent {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut NodeContent {
        self.version += 1;
        &mut self.content
    }

    /// Bumped on every visual change; render caches compare against it.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn pending_editor(&self) -> Option<&str> {
        self.pending_editor.as_deref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending_editor.is_some()
    }

    pub fn set_editor_text(&mut self, text: &str) {
        if let Some(editor) = &mut self.pending_editor {
            editor.clear();
            editor.push_str(text);
            self.version += 1;
        }
    }

    /// Binds a pending node to the object created from its editor text.
    pub fn bind(&mut self, id: ObjectId) {
        self.handle = Some(id);
        self.pending_editor = None;
        self.version += 1;
    }

    pub fn activity(&self) -> u8 {
        self.activity
    }

    pub fn flash_activity(&mut self) {
        self.activity = ACTIVITY_TICKS;
        self.version += 1;
    }

    /// Returns `true` while the flash is still decaying.
    pub fn decay_activity(&mut self) -> bool {
        if self.activity == 0 {
            return false;
        }
        self.activity -= 1;
        self.version += 1;
        true
    }

    pub fn draws_behind(&self) -> bool {
        self.content.draws_behind()
    }

    /// Bounds including ports and selection outline.
    pub fn paint_bounds(&self) -> Rect {
        self.bounds.expanded(PORT_HEIGHT + 1)
    }

    pub fn port(&self, slot: usize) -> Option<&Port> {
        self.ports.get(slot)
    }

    /// Slot of the output port with `index`, if present.
    pub fn output_slot(&self, index: usize) -> Option<usize> {
        let slot = self.input_count + index;
        (slot < self.ports.len()).then_some(slot)
    }

    pub fn input_slot(&self, index: usize) -> Option<usize> {
        (index < self.input_count).then_some(index)
    }

    /// Refreshes the node from its object. Returns `true` if anything visible
    /// changed.
    pub fn refresh(&mut self, object: &ObjectSnapshot) -> bool {
        let mut changed = false;
        if self.bounds != object.bounds {
            self.bounds = object.bounds;
            changed = true;
        }
        self.last_known_bounds = object.bounds;
        if self.text != object.text {
            self.text.clone_from(&object.text);
            changed = true;
        }
        let content = NodeContent::from_kind(&object.kind);
        if content != self.content {
            self.content = content;
            changed = true;
        }
        let port_kinds_changed = self.input_count != object.inputs.len()
            || self.output_count() != object.outputs.len()
            || self
                .ports
                .iter()
                .map(|port| port.kind)
                .ne(object.inputs.iter().chain(&object.outputs).map(|port| port.kind));
        if changed || port_kinds_changed {
            self.rebuild_ports(&object.inputs, &object.outputs);
            self.version += 1;
        }
        changed || port_kinds_changed
    }

    pub(crate) fn set_bounds(&mut self, bounds: Rect) {
        if self.bounds != bounds {
            self.bounds = bounds;
            self.relayout_ports();
            self.version += 1;
        }
    }

    fn rebuild_ports(&mut self, inputs: &[PortDescriptor], outputs: &[PortDescriptor]) {
        self.ports.clear();
        self.input_count = inputs.len();
        for (index, descriptor) in inputs.iter().enumerate() {
            self.ports.push(Port {
                direction: PortDirection::Input,
                index,
                kind: descriptor.kind,
                hit_rect: Rect::EMPTY,
                rect: Rect::EMPTY,
            });
        }
        for (index, descriptor) in outputs.iter().enumerate() {
            self.ports.push(Port {
                direction: PortDirection::Output,
                index,
                kind: descriptor.kind,
                hit_rect: Rect::EMPTY,
                rect: Rect::EMPTY,
            });
        }
        self.relayout_ports();
    }

    /// Spreads each direction group evenly along its edge: inputs on top,
    /// outputs on the bottom, first and last flush with the corners.
    fn relayout_ports(&mut self) {
        let bounds = self.bounds;
        let input_count = self.input_count;
        let output_count = self.ports.len() - input_count;
        for port in &mut self.ports {
            let count = match port.direction {
                PortDirection::Input => input_count,
                PortDirection::Output => output_count,
            };
            let span = (bounds.width - PORT_WIDTH).max(0);
            let x = if count > 1 {
                bounds.x + span * port.index as i32 / (count as i32 - 1)
            } else {
                bounds.x
            };
            let y = match port.direction {
                PortDirection::Input => bounds.y,
                PortDirection::Output => bounds.bottom() - PORT_HEIGHT,
            };
            port.rect = Rect::new(x, y, PORT_WIDTH, PORT_HEIGHT);
            port.hit_rect = port.rect.expanded(PORT_HIT_MARGIN);
        }
    }
}

use std::collections::HashSet;
use std::hash::Hash;

use document_protocol::ObjectId;
use smallvec::SmallVec;

pub trait DedupKey {
    type Key: Eq + Hash;

    fn dedup_key(&self) -> Self::Key;
}

/// Notification pushed by the execution engine after it mutated the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentNotice {
    /// Structure changed; the UI must reconcile before its next paint.
    Changed { revision: u64 },
    LockChanged { locked: bool },
    /// The notice queue overflowed and notices were dropped. Treated as a
    /// structural change of unknown revision.
    Overflowed,
}

/// Everything the UI learned from one drain of the notice queue.
///
/// Any number of notices collapse into one batch, and so into at most one
/// reconciliation pass per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoticeBatch {
    pub latest_revision: Option<u64>,
    pub needs_synchronise: bool,
    pub locked: Option<bool>,
}

impl NoticeBatch {
    pub fn push(&mut self, notice: DocumentNotice) {
        match notice {
            DocumentNotice::Changed { revision } => {
                self.latest_revision = Some(
                    self.latest_revision
                        .map_or(revision, |current| current.max(revision)),
                );
                self.needs_synchronise = true;
            }
            DocumentNotice::LockChanged { locked } => self.locked = Some(locked),
            DocumentNotice::Overflowed => self.needs_synchronise = true,
        }
    }

    pub fn merge_mailbox(mut current: Self, newer: Self) -> Self {
        current.latest_revision = match (current.latest_revision, newer.latest_revision) {
            (Some(left), Some(right)) => Some(left.max(right)),
            (left, right) => left.or(right),
        };
        current.needs_synchronise |= newer.needs_synchronise;
        if newer.locked.is_some() {
            current.locked = newer.locked;
        }
        current
    }

    pub fn is_empty(&self) -> bool {
        !self.needs_synchronise && self.locked.is_none()
    }
}

impl FromIterator<DocumentNotice> for NoticeBatch {
    fn from_iter<I: IntoIterator<Item = DocumentNotice>>(iter: I) -> Self {
        let mut batch = NoticeBatch::default();
        for notice in iter {
            batch.push(notice);
        }
        batch
    }
}

/// Request from a non-UI thread to run something on the UI thread next tick.
///
/// Plain data only. The target is checked for liveness when drained, so a
/// task whose object was removed meanwhile is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiTask {
    /// The object received or sent a message; flash its activity indicator.
    ObjectActivity(ObjectId),
    /// Open the object for text editing and scroll it into view.
    FocusObject(ObjectId),
    /// The object's displayed state (value, contents) changed.
    RepaintObject(ObjectId),
}

impl UiTask {
    pub fn target(&self) -> ObjectId {
        match self {
            UiTask::ObjectActivity(id) | UiTask::FocusObject(id) | UiTask::RepaintObject(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UiTaskKey {
    Activity(ObjectId),
    Focus(ObjectId),
    Repaint(ObjectId),
}

impl DedupKey for UiTask {
    type Key = UiTaskKey;

    fn dedup_key(&self) -> Self::Key {
        match self {
            UiTask::ObjectActivity(id) => UiTaskKey::Activity(*id),
            UiTask::FocusObject(id) => UiTaskKey::Focus(*id),
            UiTask::RepaintObject(id) => UiTaskKey::Repaint(*id),
        }
    }
}

pub type UiTaskBatch = SmallVec<[UiTask; 8]>;

/// Appends `incoming` to `current`, keeping only the first occurrence of each
/// key.
pub fn merge_unique_by_key<T, C>(current: &mut C, incoming: impl IntoIterator<Item = T>)
where
    T: DedupKey,
    C: Extend<T>,
    for<'a> &'a C: IntoIterator<Item = &'a T>,
{
    let mut existing_keys: HashSet<T::Key> = (&*current).into_iter().map(T::dedup_key).collect();
    let mut accepted = Vec::new();
    for item in incoming {
        if existing_keys.insert(item.dedup_key()) {
            accepted.push(item);
        }
    }
    current.extend(accepted);
}

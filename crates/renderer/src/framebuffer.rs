//! Role-keyed cache of offscreen render targets.
//!
//! The cache is the only owner of framebuffers. A target is recreated when
//! its pixel size changes or after [`FramebufferCache::invalidate`]; a new
//! target always starts cleared.

use std::collections::HashMap;

use render_protocol::TargetId;
use scene::NodeKey;

use crate::RenderError;
use crate::backend::RenderBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferRole {
    /// Fully composited canvas, blitted to the screen every tick.
    Main,
    /// Scratch target the dirty region is rendered into.
    Invalid,
    /// Cached rendering of one node.
    Node(NodeKey),
    /// Shared port glyph atlas.
    PortGlyphs,
    ResizeHandle,
    /// Drop shadow of the presentation-mode window.
    PresentationShadow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framebuffer {
    pub target: TargetId,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsuredTarget {
    pub framebuffer: Framebuffer,
    /// The target was (re)created by this call and holds nothing yet.
    pub created: bool,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    framebuffer: Framebuffer,
    invalidated: bool,
    content_version: Option<u64>,
}

#[derive(Debug, Default)]
pub struct FramebufferCache {
    entries: HashMap<FramebufferRole, Entry>,
}

impl FramebufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a target of exactly `width` x `height` for `role`, creating it
    /// if missing, resized or invalidated.
    pub fn ensure<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        role: FramebufferRole,
        width: u32,
        height: u32,
    ) -> Result<EnsuredTarget, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidTargetSize {
                role,
                width,
                height,
            });
        }
        if !self.needs_update(role, width, height)
            && let Some(entry) = self.entries.get(&role)
        {
            return Ok(EnsuredTarget {
                framebuffer: entry.framebuffer,
                created: false,
            });
        }
        if let Some(stale) = self.entries.remove(&role) {
            backend.destroy_target(stale.framebuffer.target);
        }
        let target = backend
            .create_target(width, height)
            .map_err(|source| RenderError::Allocation { role, source })?;
        tracing::trace!(?role, width, height, "framebuffer created");
        let framebuffer = Framebuffer {
            target,
            width,
            height,
        };
        self.entries.insert(
            role,
            Entry {
                framebuffer,
                invalidated: false,
                content_version: None,
            },
        );
        Ok(EnsuredTarget {
            framebuffer,
            created: true,
        })
    }

    pub fn get(&self, role: FramebufferRole) -> Option<Framebuffer> {
        self.entries
            .get(&role)
            .filter(|entry| !entry.invalidated)
            .map(|entry| entry.framebuffer)
    }

    /// True if the next [`FramebufferCache::ensure`] with this size would
    /// create a fresh target.
    pub fn needs_update(&self, role: FramebufferRole, width: u32, height: u32) -> bool {
        match self.entries.get(&role) {
            Some(entry) => {
                entry.invalidated
                    || entry.framebuffer.width != width
                    || entry.framebuffer.height != height
            }
            None => true,
        }
    }

    /// True if the target exists at this size and holds content rendered at
    /// `version`.
    pub fn is_current(
        &self,
        role: FramebufferRole,
        width: u32,
        height: u32,
        version: u64,
    ) -> bool {
        !self.needs_update(role, width, height)
            && self
                .entries
                .get(&role)
                .is_some_and(|entry| entry.content_version == Some(version))
    }

    pub fn mark_rendered(&mut self, role: FramebufferRole, version: u64) {
        if let Some(entry) = self.entries.get_mut(&role) {
            entry.content_version = Some(version);
        }
    }

    /// Forces recreation on the next `ensure`.
    pub fn invalidate(&mut self, role: FramebufferRole) {
        if let Some(entry) = self.entries.get_mut(&role) {
            entry.invalidated = true;
        }
    }

    pub fn release<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        role: FramebufferRole,
    ) -> bool {
        match self.entries.remove(&role) {
            Some(entry) => {
                backend.destroy_target(entry.framebuffer.target);
                true
            }
            None => false,
        }
    }

    /// Destroys every target; used when the render context goes away.
    pub fn release_all<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        for (_, entry) in self.entries.drain() {
            backend.destroy_target(entry.framebuffer.target);
        }
    }

    /// Forgets targets whose context is already gone without touching the
    /// backend.
    pub fn forget_all(&mut self) {
        self.entries.clear();
    }

    /// Releases node caches whose node is no longer live.
    pub fn retain_nodes<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        is_live: impl Fn(NodeKey) -> bool,
    ) -> usize {
        let stale: Vec<FramebufferRole> = self
            .entries
            .keys()
            .copied()
            .filter(|role| matches!(role, FramebufferRole::Node(key) if !is_live(*key)))
            .collect();
        for role in &stale {
            self.release(backend, *role);
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, RecordingBackend};

    fn initialized_backend() -> RecordingBackend {
        let mut backend = RecordingBackend::new();
        backend.initialize().unwrap();
        backend.take_calls();
        backend
    }

    #[test]
    fn ensure_reuses_until_size_changes() {
        let mut backend = initialized_backend();
        let mut cache = FramebufferCache::new();
        let first = cache
            .ensure(&mut backend, FramebufferRole::Main, 100, 50)
            .unwrap();
        assert!(first.created);
        let again = cache
            .ensure(&mut backend, FramebufferRole::Main, 100, 50)
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.framebuffer, first.framebuffer);

        let resized = cache
            .ensure(&mut backend, FramebufferRole::Main, 200, 50)
            .unwrap();
        assert!(resized.created);
        assert_eq!(backend.live_targets(), 1);
        assert!(
            backend
                .calls()
                .contains(&BackendCall::DestroyTarget(first.framebuffer.target))
        );
    }

    #[test]
    fn invalidate_forces_recreation() {
        let mut backend = initialized_backend();
        let mut cache = FramebufferCache::new();
        cache
            .ensure(&mut backend, FramebufferRole::PortGlyphs, 64, 16)
            .unwrap();
        cache.mark_rendered(FramebufferRole::PortGlyphs, 3);
        assert!(cache.is_current(FramebufferRole::PortGlyphs, 64, 16, 3));
        cache.invalidate(FramebufferRole::PortGlyphs);
        assert!(cache.needs_update(FramebufferRole::PortGlyphs, 64, 16));
        assert_eq!(cache.get(FramebufferRole::PortGlyphs), None);
        let ensured = cache
            .ensure(&mut backend, FramebufferRole::PortGlyphs, 64, 16)
            .unwrap();
        assert!(ensured.created);
        assert!(!cache.is_current(FramebufferRole::PortGlyphs, 64, 16, 3));
    }

    #[test]
    fn allocation_failure_is_reported_and_retried() {
        let mut backend = initialized_backend();
        let mut cache = FramebufferCache::new();
        backend.fail_next_creates(1);
        let error = cache
            .ensure(&mut backend, FramebufferRole::Invalid, 10, 10)
            .unwrap_err();
        assert!(matches!(
            error,
            RenderError::Allocation {
                role: FramebufferRole::Invalid,
                ..
            }
        ));
        assert!(cache.is_empty());
        assert!(
            cache
                .ensure(&mut backend, FramebufferRole::Invalid, 10, 10)
                .unwrap()
                .created
        );
    }

    #[test]
    fn zero_sized_targets_are_rejected() {
        let mut backend = initialized_backend();
        let mut cache = FramebufferCache::new();
        assert!(matches!(
            cache.ensure(&mut backend, FramebufferRole::Main, 0, 10),
            Err(RenderError::InvalidTargetSize { .. })
        ));
    }

    #[test]
    fn release_all_destroys_every_target() {
        let mut backend = initialized_backend();
        let mut cache = FramebufferCache::new();
        for role in [
            FramebufferRole::Main,
            FramebufferRole::Invalid,
            FramebufferRole::ResizeHandle,
        ] {
            cache.ensure(&mut backend, role, 8, 8).unwrap();
        }
        cache.release_all(&mut backend);
        assert!(cache.is_empty());
        assert_eq!(backend.live_targets(), 0);
    }
}

//! Renderer crate root.
//!
//! Repaints a zoomable canvas incrementally: only the dirty region is drawn
//! into the Invalid framebuffer and composited into Main, which is blitted to
//! the screen every tick. Spare frame time refreshes per-node caches.
//!
//! Internal architecture overview:
//! - `dirty`: dirty-region union tracking.
//! - `framebuffer`: role-keyed cache of offscreen targets.
//! - `backend`: the `RenderBackend` seam and the recording backend.
//! - `gpu`/`gpu_pipeline`/`shapes`: the wgpu backend and its tessellation.
//! - `surface`: builds the layered draw lists of one repaint.
//! - `renderer_frame`: the per-tick algorithm tying everything together.

use render_protocol::TargetId;

mod backend;
mod dirty;
mod framebuffer;
mod gpu;
mod gpu_pipeline;
mod renderer_frame;
mod shapes;
mod surface;

pub use backend::{BackendCall, BackendError, RecordingBackend, RenderBackend};
pub use dirty::DirtyRegionTracker;
pub use framebuffer::{EnsuredTarget, Framebuffer, FramebufferCache, FramebufferRole};
pub use gpu::{WgpuBackend, WgpuBackendConfig};
pub use renderer_frame::{FrameOutcome, FrameSettings, FrameTarget, Renderer};
pub use shapes::{ShapeInstanceGpu, ShapeKind, tessellate};
pub use surface::{
    FrameScene, GlyphCaches, PRESENTATION_SHADOW_RADIUS, PortGlyph, SurfaceLayers, SurfaceRenderer,
    Suggestion, dot_size_for_zoom, line_width_for_zoom,
};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("framebuffer {role:?} cannot be {width}x{height}")]
    InvalidTargetSize {
        role: FramebufferRole,
        width: u32,
        height: u32,
    },
    #[error("allocating framebuffer {role:?} failed")]
    Allocation {
        role: FramebufferRole,
        #[source]
        source: BackendError,
    },
    #[error("render target {0:?} is not owned by the framebuffer cache")]
    UnknownTarget(TargetId),
    #[error(transparent)]
    Backend(#[from] BackendError),
}


#[cfg(test)]
mod wgsl_tests;

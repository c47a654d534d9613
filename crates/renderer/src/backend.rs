use std::collections::HashMap;

use model::Rect;
use render_protocol::{DrawList, RenderPass, TargetId};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("render context is not initialized")]
    NotInitialized,
    #[error("no graphics adapter available: {0}")]
    Adapter(String),
    #[error("requesting graphics device failed: {0}")]
    Device(String),
    #[error("render target {0:?} does not exist")]
    UnknownTarget(TargetId),
    #[error("render target {width}x{height} exceeds the maximum of {max}")]
    TargetTooLarge { width: u32, height: u32, max: u32 },
    #[error("render target allocation failed: {0}")]
    Allocation(String),
    #[error("device lost: {0}")]
    DeviceLost(String),
}

/// Drawing backend seam. Every call happens on the UI thread.
pub trait RenderBackend {
    /// One-time context setup (device, pipelines, shared assets).
    fn initialize(&mut self) -> Result<(), BackendError>;

    fn is_initialized(&self) -> bool;

    /// Drops the context and every target it owns.
    fn teardown(&mut self);

    /// Allocates a target cleared to transparent.
    fn create_target(&mut self, width: u32, height: u32) -> Result<TargetId, BackendError>;

    fn destroy_target(&mut self, target: TargetId);

    fn draw(&mut self, pass: &RenderPass) -> Result<(), BackendError>;

    /// Copies `region` (target pixels) of `source` into the same place in
    /// `destination`.
    fn composite(
        &mut self,
        source: TargetId,
        destination: TargetId,
        region: Rect,
    ) -> Result<(), BackendError>;

    /// Shows `source` on the visible surface with `overlay` (logical screen
    /// coordinates) drawn on top.
    fn present(
        &mut self,
        source: TargetId,
        overlay: &DrawList,
        pixel_scale: f32,
    ) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Initialize,
    Teardown,
    CreateTarget {
        target: TargetId,
        width: u32,
        height: u32,
    },
    DestroyTarget(TargetId),
    Draw {
        target: TargetId,
        scissor: Option<Rect>,
        commands: usize,
    },
    Composite {
        source: TargetId,
        destination: TargetId,
        region: Rect,
    },
    Present {
        source: TargetId,
        overlay: usize,
    },
}

/// Backend that draws nothing and records every call.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    initialized: bool,
    next_target: u64,
    targets: HashMap<TargetId, (u32, u32)>,
    calls: Vec<BackendCall>,
    passes: Vec<RenderPass>,
    failing_creates: usize,
    failing_initializes: usize,
    max_target_size: Option<u32>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<BackendCall> {
        self.passes.clear();
        std::mem::take(&mut self.calls)
    }

    /// Every pass drawn since the last [`RecordingBackend::take_calls`].
    pub fn passes(&self) -> &[RenderPass] {
        &self.passes
    }

    pub fn live_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn target_size(&self, target: TargetId) -> Option<(u32, u32)> {
        self.targets.get(&target).copied()
    }

    /// Makes the next `count` target allocations fail.
    pub fn fail_next_creates(&mut self, count: usize) {
        self.failing_creates = count;
    }

    pub fn fail_next_initializes(&mut self, count: usize) {
        self.failing_initializes = count;
    }

    pub fn set_max_target_size(&mut self, max: u32) {
        self.max_target_size = Some(max);
    }

    fn check_target(&self, target: TargetId) -> Result<(), BackendError> {
        if !self.initialized {
            return Err(BackendError::NotInitialized);
        }
        if !self.targets.contains_key(&target) {
            return Err(BackendError::UnknownTarget(target));
        }
        Ok(())
    }
}

impl RenderBackend for RecordingBackend {
    fn initialize(&mut self) -> Result<(), BackendError> {
        if self.failing_initializes > 0 {
            self.failing_initializes -= 1;
            return Err(BackendError::Adapter("injected failure".to_owned()));
        }
        self.initialized = true;
        self.calls.push(BackendCall::Initialize);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn teardown(&mut self) {
        self.initialized = false;
        self.targets.clear();
        self.calls.push(BackendCall::Teardown);
    }

    fn create_target(&mut self, width: u32, height: u32) -> Result<TargetId, BackendError> {
        if !self.initialized {
            return Err(BackendError::NotInitialized);
        }
        if self.failing_creates > 0 {
            self.failing_creates -= 1;
            return Err(BackendError::Allocation("injected failure".to_owned()));
        }
        if let Some(max) = self.max_target_size
            && (width > max || height > max)
        {
            return Err(BackendError::TargetTooLarge { width, height, max });
        }
        self.next_target += 1;
        let target = TargetId(self.next_target);
        self.targets.insert(target, (width, height));
        self.calls.push(BackendCall::CreateTarget {
            target,
            width,
            height,
        });
        Ok(target)
    }

    fn destroy_target(&mut self, target: TargetId) {
        if self.targets.remove(&target).is_some() {
            self.calls.push(BackendCall::DestroyTarget(target));
        }
    }

    fn draw(&mut self, pass: &RenderPass) -> Result<(), BackendError> {
        self.check_target(pass.target)?;
        self.calls.push(BackendCall::Draw {
            target: pass.target,
            scissor: pass.scissor,
            commands: pass.commands.len(),
        });
        self.passes.push(pass.clone());
        Ok(())
    }

    fn composite(
        &mut self,
        source: TargetId,
        destination: TargetId,
        region: Rect,
    ) -> Result<(), BackendError> {
        self.check_target(source)?;
        self.check_target(destination)?;
        self.calls.push(BackendCall::Composite {
            source,
            destination,
            region,
        });
        Ok(())
    }

    fn present(
        &mut self,
        source: TargetId,
        overlay: &DrawList,
        _pixel_scale: f32,
    ) -> Result<(), BackendError> {
        self.check_target(source)?;
        self.calls.push(BackendCall::Present {
            source,
            overlay: overlay.len(),
        });
        Ok(())
    }
}

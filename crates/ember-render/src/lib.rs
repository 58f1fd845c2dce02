// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;

mod lifecycle;
mod resize;

pub use lifecycle::{Lifecycle, LifecycleError};
pub use resize::{ResizeHandle, ResizeRequest};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero dimension; nothing can be presented.
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What happened to one `execute()` tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// Work was submitted and the image queued for presentation.
    Presented,
    /// Nothing was submitted (minimized surface or stale swapchain).
    Skipped,
}

/// Render-thread side of a backend. Everything here is called from the
/// thread that owns the renderer; the host thread only talks to it through
/// a [`ResizeHandle`].
pub trait Renderer {
    fn initialize(&mut self) -> Result<()>;
    fn execute(&mut self) -> Result<FrameStatus>;
    fn release(&mut self);
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn lifecycle(&self) -> Lifecycle;
    fn resize_handle(&self) -> ResizeHandle;
}

// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ember_render::FrameStatus;
use tracing::debug;

use crate::commands::{Acquired, Presented};
use crate::error::EngineResult;
use crate::resize::ResizeDecision;

/// The GPU-facing steps of one frame, in the order [`FrameFlow::run`]
/// issues them.
pub(crate) trait FrameOps {
    fn check_for_resize(&mut self, forced: bool) -> EngineResult<ResizeDecision>;
    fn wait_current(&mut self) -> EngineResult<()>;
    fn acquire(&mut self) -> EngineResult<Acquired>;
    fn wait_for_image(&mut self, image_index: u32) -> EngineResult<()>;
    fn record(&mut self, image_index: u32) -> EngineResult<vk::CommandBuffer>;
    fn reset_fence(&mut self) -> EngineResult<()>;
    fn submit(&mut self, cmd: vk::CommandBuffer) -> EngineResult<()>;
    fn present(&mut self, image_index: u32) -> EngineResult<Presented>;
    fn advance(&mut self);
}

/// Per-frame ordering plus the one bit of state carried between frames:
/// whether the chain must be rebuilt before the next acquire.
#[derive(Debug, Default)]
pub(crate) struct FrameFlow {
    force_rebuild: bool,
}

impl FrameFlow {
    #[cfg(test)]
    pub fn rebuild_pending(&self) -> bool {
        self.force_rebuild
    }

    /// The slot fence is reset only between a successful record and the
    /// submit that signals it, so no error path can leave it unsignaled.
    pub fn run<O: FrameOps>(&mut self, ops: &mut O) -> EngineResult<FrameStatus> {
        let forced = std::mem::take(&mut self.force_rebuild);
        if ops.check_for_resize(forced)? == ResizeDecision::Minimized {
            // the request may already be consumed; retry until a chain exists
            self.force_rebuild = true;
            return Ok(FrameStatus::Skipped);
        }

        ops.wait_current()?;

        let (image_index, suboptimal) = match ops.acquire()? {
            Acquired::Image { index, suboptimal } => (index, suboptimal),
            Acquired::OutOfDate => {
                debug!("vk: acquire out of date, rebuilding next frame");
                self.force_rebuild = true;
                return Ok(FrameStatus::Skipped);
            }
        };

        ops.wait_for_image(image_index)?;
        let cmd = ops.record(image_index)?;
        ops.reset_fence()?;
        ops.submit(cmd)?;
        let presented = ops.present(image_index)?;
        ops.advance();

        if suboptimal || presented == Presented::Stale {
            debug!("vk: swapchain stale after present, rebuilding next frame");
            self.force_rebuild = true;
        }
        Ok(FrameStatus::Presented)
    }
}

// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;

use ash::vk;

use crate::vertex::Vertex;

/// Everything `RenderHost::render` may touch while the render pass is open.
pub struct FrameContext<'a> {
    pub device: &'a ash::Device,
    pub command_buffer: vk::CommandBuffer,
    pub extent: vk::Extent2D,
    /// In-flight slot, `0..max_frames_in_flight`.
    pub frame_slot: usize,
    pub image_index: u32,
    /// Frames presented so far.
    pub frame_number: u64,
    /// Vertices in the buffer bound at binding 0; 0 when the host supplied none.
    pub vertex_count: u32,
}

/// Capabilities the embedding application supplies to the engine.
///
/// The engine owns the host object but the host never owns the engine, so
/// window handles and scene state can live here without a reference cycle.
pub trait RenderHost {
    /// Instance extensions the surface needs (WSI platform extensions).
    fn instance_extensions(&self) -> Vec<&'static CStr> {
        Vec::new()
    }

    /// Called once, right after the instance exists and before any device or
    /// chain is built. The engine destroys the returned surface on release.
    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> anyhow::Result<vk::SurfaceKHR>;

    /// Geometry uploaded once at startup into the vertex buffer. Empty means
    /// no buffer is created or bound.
    fn vertices(&self) -> Vec<Vertex> {
        Vec::new()
    }

    /// Records draw commands. Called once per frame inside an active render
    /// pass with the pipeline, viewport, scissor and vertex buffer already
    /// bound.
    fn render(&mut self, _frame: &FrameContext<'_>) {}
}

// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: device bring-up, swapchain, pipeline, frame pacing and
//! the engine that ties them to the [`ember_render::Renderer`] lifecycle.

mod buffer;
mod commands;
mod config;
mod device;
mod engine;
mod error;
mod frame;
mod host;
mod pipeline;
mod resize;
mod shader;
mod swapchain;
mod sync;
mod vertex;

pub use ash;

pub use buffer::{find_memory_type, VertexBuffer};
pub use commands::{classify_acquire, classify_present, Acquired, CommandExecutor, FrameTarget, Presented};
pub use config::{EngineConfig, PresentPreference, ShaderPaths, ShaderSource, DEFAULT_MAX_FRAMES_IN_FLIGHT};
pub use device::{
    find_queue_families, pick_device, DeviceCandidate, DeviceContext, QueueFamilies, QueueFamilyIndices,
    QueueFamilySupport,
};
pub use engine::VulkanEngine;
pub use error::{EngineError, EngineResult};
pub use host::{FrameContext, RenderHost};
pub use pipeline::{viewport_for, GraphicsPipeline};
pub use resize::{ResizeCoordinator, ResizeDecision};
pub use shader::{bytecode_words, read_file, ShaderSet};
pub use swapchain::{choose_extent, choose_image_count, choose_present_mode, choose_surface_format, PresentationChain};
pub use sync::{FramePacer, FrameSynchronizer};
pub use vertex::Vertex;

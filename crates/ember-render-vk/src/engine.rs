// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use ash::vk;
use ember_render::{FrameStatus, Lifecycle, RenderSize, Renderer, ResizeHandle};
use tracing::{debug, error, info, warn};

use crate::buffer::VertexBuffer;
use crate::commands::{classify_acquire, classify_present, Acquired, CommandExecutor, FrameTarget, Presented};
use crate::config::EngineConfig;
use crate::device::DeviceContext;
use crate::error::{EngineError, EngineResult};
use crate::frame::{FrameFlow, FrameOps};
use crate::host::RenderHost;
use crate::pipeline::GraphicsPipeline;
use crate::resize::{ResizeCoordinator, ResizeDecision};
use crate::shader::ShaderSet;
use crate::swapchain::PresentationChain;
use crate::sync::FrameSynchronizer;

/// Every GPU object the engine owns. Field order is teardown order:
/// commands and sync first, the device (and with it the surface and
/// instance) last.
struct Core {
    commands: CommandExecutor,
    frames: FrameSynchronizer,
    pipeline: GraphicsPipeline,
    vertices: Option<VertexBuffer>,
    chain: PresentationChain,
    shaders: ShaderSet,
    device: DeviceContext,
}

impl Core {
    fn build(config: &EngineConfig, host: &dyn RenderHost, size: RenderSize) -> EngineResult<Self> {
        let shaders = config.shaders.load()?;
        // Locals drop in reverse on any `?` below, which is the safe order.
        let device = DeviceContext::new(config, host)?;
        let chain = PresentationChain::new(&device, config, size, None)?.ok_or(EngineError::ZeroExtent)?;
        let geometry = host.vertices();
        let vertices = if geometry.is_empty() {
            None
        } else {
            Some(VertexBuffer::new(&device, &geometry)?)
        };
        let pipeline = GraphicsPipeline::new(device.device(), &chain, &shaders)?;
        let frames = FrameSynchronizer::new(device.device(), config.max_frames_in_flight, chain.image_count())?;
        let commands = CommandExecutor::new(device.device(), device.families().graphics, chain.image_count())?;

        info!(
            "vk: chain {}x{} ({} images, {:?}, {:?}), {} frames in flight",
            chain.extent().width,
            chain.extent().height,
            chain.image_count(),
            chain.format(),
            chain.present_mode(),
            frames.frames_in_flight()
        );

        Ok(Core {
            commands,
            frames,
            pipeline,
            vertices,
            chain,
            shaders,
            device,
        })
    }

    /// New chain (retiring the old one), new pipeline + framebuffers,
    /// command buffers resized to the new image count. Sync objects survive.
    /// `Ok(false)` when the surface has no area; the old chain stays.
    fn rebuild(&mut self, config: &EngineConfig, size: RenderSize) -> EngineResult<bool> {
        self.device.wait_idle()?;

        let Some(chain) = PresentationChain::new(&self.device, config, size, Some(&self.chain))? else {
            return Ok(false);
        };
        let pipeline = GraphicsPipeline::new(self.device.device(), &chain, &self.shaders)?;

        // old framebuffers reference old views: pipeline goes first
        self.pipeline = pipeline;
        self.chain = chain;

        let images = self.chain.image_count();
        self.commands.reallocate(images)?;
        self.frames.reset_images(images);

        info!(
            "vk: chain rebuilt for {}x{} -> extent {}x{}, {} images",
            size.width,
            size.height,
            self.chain.extent().width,
            self.chain.extent().height,
            images
        );
        Ok(true)
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("vk: wait idle before teardown failed: {e}");
        }
    }
}

/// One frame's view of a running engine, borrowed field by field.
struct LiveFrame<'a> {
    core: &'a mut Core,
    host: &'a mut dyn RenderHost,
    state: &'a mut Lifecycle,
    resize: &'a ResizeCoordinator,
    config: &'a EngineConfig,
    clear_color: [f32; 4],
    frame_number: u64,
}

impl FrameOps for LiveFrame<'_> {
    /// Running -> Resizing -> Running around a chain rebuild. Returns to
    /// Running even when the rebuild fails; the error is still reported.
    fn check_for_resize(&mut self, forced: bool) -> EngineResult<ResizeDecision> {
        let decision = self.resize.poll(self.core.chain.requested(), forced);
        let ResizeDecision::Rebuild(size) = decision else {
            return Ok(decision);
        };

        self.state.transition(Lifecycle::Resizing)?;
        let rebuilt = self.core.rebuild(self.config, size);
        self.state.transition(Lifecycle::Running)?;
        if rebuilt? {
            Ok(decision)
        } else {
            debug!("vk: surface has no area, frame skipped");
            Ok(ResizeDecision::Minimized)
        }
    }

    fn wait_current(&mut self) -> EngineResult<()> {
        self.core.frames.wait_current()
    }

    fn acquire(&mut self) -> EngineResult<Acquired> {
        let core = &*self.core;
        classify_acquire(core.chain.acquire_next_image(core.frames.image_available()))
    }

    fn wait_for_image(&mut self, image_index: u32) -> EngineResult<()> {
        self.core.frames.wait_for_image(image_index as usize)
    }

    fn record(&mut self, image_index: u32) -> EngineResult<vk::CommandBuffer> {
        let core = &*self.core;
        let target = FrameTarget {
            image_index,
            frame_slot: core.frames.current_frame(),
            frame_number: self.frame_number,
        };
        core.commands.record(
            target,
            &core.pipeline,
            core.vertices.as_ref(),
            self.clear_color,
            &mut *self.host,
        )
    }

    fn reset_fence(&mut self) -> EngineResult<()> {
        self.core.frames.reset_current()
    }

    fn submit(&mut self, cmd: vk::CommandBuffer) -> EngineResult<()> {
        let core = &*self.core;
        core.commands.submit(
            core.device.graphics_queue(),
            cmd,
            core.frames.image_available(),
            core.frames.render_finished(),
            core.frames.in_flight(),
        )
    }

    fn present(&mut self, image_index: u32) -> EngineResult<Presented> {
        let core = &*self.core;
        classify_present(core.chain.present(
            core.device.present_queue(),
            core.frames.render_finished(),
            image_index,
        ))
    }

    fn advance(&mut self) {
        self.core.frames.advance();
    }
}

/// Vulkan implementation of [`Renderer`]. Owns its host; lives on the
/// render thread. The host thread keeps a [`ResizeHandle`] only.
pub struct VulkanEngine<H: RenderHost> {
    config: EngineConfig,
    host: H,
    state: Lifecycle,
    resize: ResizeCoordinator,
    core: Option<Core>,
    clear_color: [f32; 4],
    flow: FrameFlow,
    total_frames: u64,
}

impl<H: RenderHost> VulkanEngine<H> {
    pub fn new(config: EngineConfig, host: H) -> Self {
        let resize = ResizeCoordinator::new(config.initial_size);
        let clear_color = config.clear_color;
        Self {
            config,
            host,
            state: Lifecycle::Uninitialized,
            resize,
            core: None,
            clear_color,
            flow: FrameFlow::default(),
            total_frames: 0,
        }
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn device_name(&self) -> Option<&str> {
        self.core.as_ref().map(|c| c.device.name())
    }

    /// Uninitialized -> Initializing -> Running. Any failure unwinds what
    /// was built so far and leaves the engine Released.
    pub fn start(&mut self) -> EngineResult<()> {
        self.state.transition(Lifecycle::Initializing)?;

        let built = self
            .config
            .validate()
            .and_then(|()| Core::build(&self.config, &self.host, self.resize.committed()));

        match built {
            Ok(core) => {
                info!("vk: engine running on {}", core.device.name());
                self.core = Some(core);
                self.state.transition(Lifecycle::Running)?;
                Ok(())
            }
            Err(e) => {
                error!("vk: initialization failed: {e}");
                self.state.transition(Lifecycle::ShuttingDown)?;
                self.state.transition(Lifecycle::Released)?;
                Err(e)
            }
        }
    }

    /// Renders one frame. Stale or minimized surfaces skip the frame rather
    /// than failing it.
    pub fn frame(&mut self) -> EngineResult<FrameStatus> {
        if self.state != Lifecycle::Running {
            return Err(EngineError::NotRunning(self.state));
        }
        let Some(core) = self.core.as_mut() else {
            return Err(EngineError::NotRunning(self.state));
        };

        let mut live = LiveFrame {
            core,
            host: &mut self.host,
            state: &mut self.state,
            resize: &self.resize,
            config: &self.config,
            clear_color: self.clear_color,
            frame_number: self.total_frames,
        };
        let status = self.flow.run(&mut live)?;
        if status == FrameStatus::Presented {
            self.total_frames += 1;
        }
        Ok(status)
    }

    /// Running (or Uninitialized) -> ShuttingDown -> Released. Safe to call
    /// any number of times.
    pub fn shutdown(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if let Err(e) = self.state.transition(Lifecycle::ShuttingDown) {
            warn!("vk: {e}; forcing shutdown");
            self.state = Lifecycle::ShuttingDown;
        }

        // Core's Drop idles the device before anything is destroyed.
        if let Some(core) = self.core.take() {
            drop(core);
            info!("vk: released after {} frames", self.total_frames);
        }

        self.state = Lifecycle::Released;
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }
}

impl<H: RenderHost> Renderer for VulkanEngine<H> {
    fn initialize(&mut self) -> Result<()> {
        Ok(self.start()?)
    }

    fn execute(&mut self) -> Result<FrameStatus> {
        Ok(self.frame()?)
    }

    fn release(&mut self) {
        self.shutdown();
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    fn lifecycle(&self) -> Lifecycle {
        self.state
    }

    fn resize_handle(&self) -> ResizeHandle {
        self.resize.handle()
    }
}

impl<H: RenderHost> Drop for VulkanEngine<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ShaderPaths, ShaderSource};
    use std::path::PathBuf;

    struct NoSurface;

    impl RenderHost for NoSurface {
        fn create_surface(&self, _: &ash::Entry, _: &ash::Instance) -> anyhow::Result<vk::SurfaceKHR> {
            anyhow::bail!("headless")
        }
    }

    fn engine() -> VulkanEngine<NoSurface> {
        VulkanEngine::new(EngineConfig::default(), NoSurface)
    }

    #[test]
    fn starts_uninitialized() {
        let e = engine();
        assert_eq!(e.lifecycle(), Lifecycle::Uninitialized);
        assert_eq!(e.total_frames(), 0);
        assert!(e.device_name().is_none());
    }

    #[test]
    fn execute_before_initialize_is_rejected() {
        let mut e = engine();
        let err = e.frame().unwrap_err();
        assert!(matches!(err, EngineError::NotRunning(Lifecycle::Uninitialized)));
        assert_eq!(e.lifecycle(), Lifecycle::Uninitialized);
    }

    #[test]
    fn release_is_idempotent() {
        let mut e = engine();
        e.release();
        assert_eq!(e.lifecycle(), Lifecycle::Released);
        e.release();
        assert_eq!(e.lifecycle(), Lifecycle::Released);
        assert!(matches!(e.frame(), Err(EngineError::NotRunning(Lifecycle::Released))));
    }

    #[test]
    fn initialize_after_release_is_rejected() {
        let mut e = engine();
        e.release();
        let err = e.start().unwrap_err();
        assert!(matches!(err, EngineError::Lifecycle(_)));
        assert_eq!(e.lifecycle(), Lifecycle::Released);
    }

    #[test]
    fn bad_config_fails_startup_and_releases() {
        let cfg = EngineConfig {
            max_frames_in_flight: 0,
            ..EngineConfig::default()
        };
        let mut e = VulkanEngine::new(cfg, NoSurface);
        assert!(matches!(e.start(), Err(EngineError::InvalidConfig(_))));
        assert_eq!(e.lifecycle(), Lifecycle::Released);
        e.release();
        assert_eq!(e.lifecycle(), Lifecycle::Released);
    }

    #[test]
    fn missing_shader_fails_before_touching_the_gpu() {
        let cfg = EngineConfig {
            shaders: ShaderSource::Files(ShaderPaths {
                vertex: PathBuf::from("/nonexistent/ember/tri.vert.spv"),
                fragment: PathBuf::from("/nonexistent/ember/tri.frag.spv"),
            }),
            ..EngineConfig::default()
        };
        let mut e = VulkanEngine::new(cfg, NoSurface);
        let err = e.start().unwrap_err();
        assert!(matches!(err, EngineError::ShaderIo { .. }), "{err}");
        assert_eq!(e.lifecycle(), Lifecycle::Released);
    }

    #[test]
    fn bad_embedded_shader_fails_before_touching_the_gpu() {
        let cfg = EngineConfig {
            shaders: ShaderSource::Embedded {
                vertex: &[1, 2, 3, 4, 5],
                fragment: &[1, 2, 3, 4],
            },
            ..EngineConfig::default()
        };
        let mut e = VulkanEngine::new(cfg, NoSurface);
        assert!(matches!(e.start(), Err(EngineError::MisalignedBytecode { len: 5, .. })));
        assert_eq!(e.lifecycle(), Lifecycle::Released);
        assert!(e.device_name().is_none());
    }

    #[test]
    fn clear_color_and_resize_handle() {
        let mut e = engine();
        assert_eq!(e.clear_color(), [0.0, 0.0, 0.0, 1.0]);
        e.set_clear_color([0.1, 0.2, 0.3, 1.0]);
        assert_eq!(e.clear_color(), [0.1, 0.2, 0.3, 1.0]);

        let h = e.resize_handle();
        assert_eq!(h.committed(), RenderSize::new(800, 600));
        h.request(1024, 768);
        assert_eq!(e.resize_handle().committed(), RenderSize::new(1024, 768));
    }
}

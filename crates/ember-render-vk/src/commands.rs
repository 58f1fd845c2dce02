// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;

use crate::buffer::VertexBuffer;
use crate::error::{EngineError, EngineResult, VkResultExt};
use crate::host::{FrameContext, RenderHost};
use crate::pipeline::GraphicsPipeline;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    /// The chain no longer matches the surface; nothing may be drawn.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Current,
    /// Presented (or dropped) but the chain needs rebuilding.
    Stale,
}

pub fn classify_acquire(result: VkResult<(u32, bool)>) -> EngineResult<Acquired> {
    match result {
        Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::SUBOPTIMAL_KHR) => {
            Ok(Acquired::OutOfDate)
        }
        Err(result) => Err(EngineError::Vulkan {
            what: "acquire_next_image",
            result,
        }),
    }
}

pub fn classify_present(result: VkResult<bool>) -> EngineResult<Presented> {
    match result {
        Ok(false) => Ok(Presented::Current),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::SUBOPTIMAL_KHR) => {
            Ok(Presented::Stale)
        }
        Err(result) => Err(EngineError::Vulkan {
            what: "queue_present",
            result,
        }),
    }
}

/// Identifies the frame being recorded.
#[derive(Clone, Copy, Debug)]
pub struct FrameTarget {
    pub image_index: u32,
    pub frame_slot: usize,
    pub frame_number: u64,
}

/// Command pool on the graphics family and one primary buffer per
/// swapchain image, re-recorded every frame.
pub struct CommandExecutor {
    device: ash::Device,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandExecutor {
    pub fn new(device: &ash::Device, queue_family: u32, image_count: usize) -> EngineResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let pool = unsafe { device.create_command_pool(&pool_info, None) }.vk("create_command_pool")?;

        let mut exec = CommandExecutor {
            device: device.clone(),
            pool,
            buffers: Vec::new(),
        };
        exec.buffers = exec.allocate(image_count)?;
        Ok(exec)
    }

    fn allocate(&self, count: usize) -> EngineResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        unsafe { self.device.allocate_command_buffers(&alloc_info) }.vk("allocate_command_buffers")
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Matches the buffer count to a rebuilt chain. Device must be idle.
    pub fn reallocate(&mut self, image_count: usize) -> EngineResult<()> {
        if image_count == self.buffers.len() {
            return Ok(());
        }
        unsafe {
            if !self.buffers.is_empty() {
                self.device.free_command_buffers(self.pool, &self.buffers);
            }
        }
        self.buffers.clear();
        self.buffers = self.allocate(image_count)?;
        Ok(())
    }

    /// Records one frame: clear, bind pipeline + viewport/scissor and the
    /// vertex buffer, let the host draw, close the render pass.
    pub fn record(
        &self,
        target: FrameTarget,
        pipeline: &GraphicsPipeline,
        vertices: Option<&VertexBuffer>,
        clear_color: [f32; 4],
        host: &mut dyn RenderHost,
    ) -> EngineResult<vk::CommandBuffer> {
        let image = target.image_index as usize;
        let cmd = self.buffers[image];
        let d = &self.device;

        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .vk("reset_command_buffer")?;

            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin).vk("begin_command_buffer")?;

            let clears = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            }];
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: pipeline.render_pass(),
                framebuffer: pipeline.framebuffer(image),
                render_area: pipeline.scissor(),
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };

            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline());
            d.cmd_set_viewport(cmd, 0, &[pipeline.viewport()]);
            d.cmd_set_scissor(cmd, 0, &[pipeline.scissor()]);
            if let Some(vb) = vertices {
                d.cmd_bind_vertex_buffers(cmd, 0, &[vb.handle()], &[0]);
            }

            host.render(&FrameContext {
                device: d,
                command_buffer: cmd,
                extent: pipeline.extent(),
                frame_slot: target.frame_slot,
                image_index: target.image_index,
                frame_number: target.frame_number,
                vertex_count: vertices.map_or(0, VertexBuffer::vertex_count),
            });

            d.cmd_end_render_pass(cmd);
            d.end_command_buffer(cmd).vk("end_command_buffer")?;
        }
        Ok(cmd)
    }

    pub fn submit(
        &self,
        queue: vk::Queue,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> EngineResult<()> {
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &signal,
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(queue, std::slice::from_ref(&submit), fence)
        }
        .vk("queue_submit")
    }
}

impl Drop for CommandExecutor {
    fn drop(&mut self) {
        // FREE COMMAND BUFFERS BEFORE DESTROYING THEIR POOL
        unsafe {
            if !self.buffers.is_empty() {
                self.device.free_command_buffers(self.pool, &self.buffers);
            }
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{EngineError, EngineResult, VkResultExt};
use crate::vertex::Vertex;

/// First memory type allowed by `type_bits` that has every flag in `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32)).find(|&i| {
        type_bits & (1 << i) != 0 && props.memory_types[i as usize].property_flags.contains(required)
    })
}

/// Host-visible vertex buffer, filled once at creation.
pub struct VertexBuffer {
    device: ash::Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    count: u32,
}

impl VertexBuffer {
    pub fn new(ctx: &DeviceContext, vertices: &[Vertex]) -> EngineResult<Self> {
        if vertices.is_empty() {
            return Err(EngineError::InvalidConfig("vertex buffer needs at least one vertex"));
        }
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let device = ctx.device();

        // Drop cleans up whatever got created before a failure.
        let mut vb = VertexBuffer {
            device: device.clone(),
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            count: vertices.len() as u32,
        };

        let required = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        unsafe {
            let bci = vk::BufferCreateInfo {
                s_type: vk::StructureType::BUFFER_CREATE_INFO,
                size: bytes.len() as vk::DeviceSize,
                usage: vk::BufferUsageFlags::VERTEX_BUFFER,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                ..Default::default()
            };
            vb.buffer = device.create_buffer(&bci, None).vk("create_buffer")?;

            let req = device.get_buffer_memory_requirements(vb.buffer);
            let mem_props = ctx
                .instance()
                .get_physical_device_memory_properties(ctx.physical());
            let memory_type_index = find_memory_type(&mem_props, req.memory_type_bits, required)
                .ok_or(EngineError::NoMemoryType { required })?;

            let mai = vk::MemoryAllocateInfo {
                s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                allocation_size: req.size,
                memory_type_index,
                ..Default::default()
            };
            vb.memory = device.allocate_memory(&mai, None).vk("allocate_memory")?;
            device
                .bind_buffer_memory(vb.buffer, vb.memory, 0)
                .vk("bind_buffer_memory")?;

            let dst = device
                .map_memory(vb.memory, 0, req.size, vk::MemoryMapFlags::empty())
                .vk("map_memory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.cast::<u8>(), bytes.len());
            device.unmap_memory(vb.memory);
        }

        debug!("vk: vertex buffer {} vertices ({} bytes)", vb.count, bytes.len());
        Ok(vb)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn vertex_count(&self) -> u32 {
        self.count
    }
}

impl Drop for VertexBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

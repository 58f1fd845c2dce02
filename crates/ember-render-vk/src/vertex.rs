// SPDX-License-Identifier: CEPL-1.0
use std::mem::{offset_of, size_of};

use ash::vk;

/// Interleaved vertex fed to the pipeline at binding 0: position at
/// location 0, RGBA color at location 1.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl Vertex {
    pub const fn new(position: [f32; 3], color: [f32; 4]) -> Self {
        Self { position, color }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 28);
        let b = Vertex::binding_description();
        assert_eq!(b.binding, 0);
        assert_eq!(b.stride, 28);
        assert_eq!(b.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn attributes_follow_the_shader_locations() {
        let [pos, color] = Vertex::attribute_descriptions();
        assert_eq!((pos.location, pos.offset, pos.format), (0, 0, vk::Format::R32G32B32_SFLOAT));
        assert_eq!(
            (color.location, color.offset, color.format),
            (1, 12, vk::Format::R32G32B32A32_SFLOAT)
        );
        assert!(pos.binding == 0 && color.binding == 0);
    }

    #[test]
    fn vertices_cast_to_bytes_in_field_order() {
        let v = [Vertex::new([1.0, 2.0, 3.0], [0.25, 0.5, 0.75, 1.0])];
        let floats: &[f32] = bytemuck::cast_slice(&v);
        assert_eq!(floats, &[1.0, 2.0, 3.0, 0.25, 0.5, 0.75, 1.0]);
        let bytes: &[u8] = bytemuck::cast_slice(&v);
        assert_eq!(bytes.len(), 28);
    }
}

// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use ember_render::RenderSize;
use winit::dpi::PhysicalSize;

pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

/// Size used to create the first chain; winit may report 0x0 before the
/// window is mapped.
pub fn initial_render_size(size: PhysicalSize<u32>, fallback: RenderSize) -> RenderSize {
    let size = render_size(size);
    if size.is_empty() {
        fallback
    } else {
        size
    }
}

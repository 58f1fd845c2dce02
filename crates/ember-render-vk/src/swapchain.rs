// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::prelude::VkResult;
use ash::vk;
use ember_render::RenderSize;
use tracing::{debug, info};

use crate::config::{EngineConfig, PresentPreference};
use crate::device::DeviceContext;
use crate::error::{EngineError, EngineResult, VkResultExt};

/// One more than the driver minimum so acquire rarely blocks, never fewer
/// than the frames in flight, never more than the driver maximum
/// (`max == 0` means unbounded).
pub fn choose_image_count(min: u32, max: u32, frames_in_flight: u32) -> EngineResult<u32> {
    if max != 0 && max < frames_in_flight {
        return Err(EngineError::TooFewImages {
            available: max,
            required: frames_in_flight,
        });
    }
    let want = (min + 1).max(frames_in_flight);
    Ok(if max == 0 { want } else { want.min(max) })
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let srgb = |format: vk::Format| {
        move |f: &vk::SurfaceFormatKHR| {
            f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        }
    };
    formats
        .iter()
        .copied()
        .find(srgb(vk::Format::B8G8R8A8_SRGB))
        .or_else(|| formats.iter().copied().find(srgb(vk::Format::R8G8B8A8_SRGB)))
        .or_else(|| formats.first().copied())
}

pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    pref: PresentPreference,
) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match pref {
        PresentPreference::LowLatency => &[
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO,
        ],
        PresentPreference::Vsync => &[vk::PresentModeKHR::FIFO],
    };
    // FIFO support is mandatory, so it is always a valid answer.
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// `None` while the surface has no area (minimized), whatever size the
/// host last committed.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> Option<vk::Extent2D> {
    let extent = if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    };
    (extent.width != 0 && extent.height != 0).then_some(extent)
}

/// Swapchain plus one color view per image.
pub struct PresentationChain {
    device: ash::Device,
    loader: swapchain::Device,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    requested: RenderSize,
}

impl PresentationChain {
    /// Builds a chain for `requested`. When `old` is given its swapchain is
    /// handed to the driver as `old_swapchain`; the caller drops `old` only
    /// after this returns, with the device idle.
    ///
    /// `Ok(None)` when the surface currently has a zero extent.
    pub fn new(
        ctx: &DeviceContext,
        config: &EngineConfig,
        requested: RenderSize,
        old: Option<&PresentationChain>,
    ) -> EngineResult<Option<Self>> {
        let surf_i = ctx.surface_loader();
        let (phys, surface) = (ctx.physical(), ctx.surface());
        let frames_in_flight = config.max_frames_in_flight as u32;

        let (caps, formats, modes) = unsafe {
            (
                surf_i
                    .get_physical_device_surface_capabilities(phys, surface)
                    .vk("get_physical_device_surface_capabilities")?,
                surf_i
                    .get_physical_device_surface_formats(phys, surface)
                    .vk("get_physical_device_surface_formats")?,
                surf_i
                    .get_physical_device_surface_present_modes(phys, surface)
                    .vk("get_physical_device_surface_present_modes")?,
            )
        };

        let format = choose_surface_format(&formats).ok_or(EngineError::Vulkan {
            what: "get_physical_device_surface_formats",
            result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        })?;
        let present_mode = choose_present_mode(&modes, config.present);
        let Some(extent) = choose_extent(&caps, requested) else {
            debug!("vk: surface extent is zero, no chain for {}x{}", requested.width, requested.height);
            return Ok(None);
        };
        let min_image_count =
            choose_image_count(caps.min_image_count, caps.max_image_count, frames_in_flight)?;

        let families = ctx.families();
        let family_indices = [families.graphics, families.present];
        let (image_sharing_mode, queue_family_index_count, p_queue_family_indices) =
            if families.is_shared() {
                (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
            } else {
                (
                    vk::SharingMode::CONCURRENT,
                    family_indices.len() as u32,
                    family_indices.as_ptr(),
                )
            };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface,
            min_image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode,
            queue_family_index_count,
            p_queue_family_indices,
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: old.map_or(vk::SwapchainKHR::null(), |o| o.handle),
            ..Default::default()
        };

        let loader = ctx.swapchain_loader().clone();
        let handle = unsafe { loader.create_swapchain(&swap_info, None) }.vk("create_swapchain")?;

        // From here on Drop owns cleanup, including a half-built view list.
        let mut chain = PresentationChain {
            device: ctx.device().clone(),
            loader,
            handle,
            images: Vec::new(),
            views: Vec::new(),
            format,
            present_mode,
            extent,
            requested,
        };

        chain.images =
            unsafe { chain.loader.get_swapchain_images(handle) }.vk("get_swapchain_images")?;
        if (chain.images.len() as u32) < frames_in_flight {
            return Err(EngineError::TooFewImages {
                available: chain.images.len() as u32,
                required: frames_in_flight,
            });
        }

        chain.views.reserve(chain.images.len());
        for &image in &chain.images {
            let view = unsafe { create_color_view(&chain.device, image, format.format) }?;
            chain.views.push(view);
        }

        info!(
            "vk: swapchain {}x{} images={} format={:?}/{:?} present={:?}",
            extent.width,
            extent.height,
            chain.images.len(),
            format.format,
            format.color_space,
            present_mode
        );
        Ok(Some(chain))
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// The committed size this chain was built for (the surface may have
    /// dictated a different `extent`).
    pub fn requested(&self) -> RenderSize {
        self.requested
    }

    /// Raw result; the caller classifies out-of-date/suboptimal.
    pub fn acquire_next_image(&self, signal: vk::Semaphore) -> VkResult<(u32, bool)> {
        unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, signal, vk::Fence::null())
        }
    }

    pub fn present(&self, queue: vk::Queue, wait: vk::Semaphore, image_index: u32) -> VkResult<bool> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        unsafe { self.loader.queue_present(queue, &present) }
    }
}

unsafe fn create_color_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> EngineResult<vk::ImageView> {
    let sub = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };
    let iv_info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: sub,
        ..Default::default()
    };
    device
        .create_image_view(&iv_info, None)
        .vk("create_image_view")
}

impl Drop for PresentationChain {
    fn drop(&mut self) {
        // Views before the swapchain that owns their images.
        unsafe {
            for &iv in &self.views {
                self.device.destroy_image_view(iv, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn image_count_never_below_frames_in_flight() {
        for min in 1..=4 {
            for max in [0, 4, 8] {
                for frames in 1..=3 {
                    let n = choose_image_count(min, max, frames).unwrap();
                    assert!(n >= frames, "min={min} max={max} frames={frames} -> {n}");
                    assert!(n >= min);
                    if max != 0 {
                        assert!(n <= max);
                    }
                }
            }
        }
    }

    #[test]
    fn image_count_is_min_plus_one_when_possible() {
        assert_eq!(choose_image_count(2, 0, 2).unwrap(), 3);
        assert_eq!(choose_image_count(2, 3, 2).unwrap(), 3);
        assert_eq!(choose_image_count(3, 3, 2).unwrap(), 3);
        assert_eq!(choose_image_count(1, 0, 3).unwrap(), 3);
    }

    #[test]
    fn image_count_rejects_tiny_maximum() {
        let err = choose_image_count(1, 1, 2).unwrap_err();
        assert!(matches!(
            err,
            EngineError::TooFewImages {
                available: 1,
                required: 2
            }
        ));
    }

    #[test]
    fn srgb_format_preferred() {
        let formats = [
            fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
        assert_eq!(
            choose_surface_format(&formats[..2]).unwrap().format,
            vk::Format::R8G8B8A8_SRGB
        );
    }

    #[test]
    fn format_falls_back_to_first() {
        let formats = [
            fmt(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::HDR10_ST2084_EXT),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::A2B10G10R10_UNORM_PACK32);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn low_latency_prefers_mailbox_then_immediate() {
        use vk::PresentModeKHR as P;
        let pref = PresentPreference::LowLatency;
        assert_eq!(choose_present_mode(&[P::FIFO, P::IMMEDIATE, P::MAILBOX], pref), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::FIFO, P::IMMEDIATE], pref), P::IMMEDIATE);
        assert_eq!(choose_present_mode(&[P::FIFO], pref), P::FIFO);
        assert_eq!(choose_present_mode(&[], pref), P::FIFO);
    }

    #[test]
    fn vsync_always_fifo() {
        use vk::PresentModeKHR as P;
        assert_eq!(
            choose_present_mode(&[P::MAILBOX, P::IMMEDIATE, P::FIFO], PresentPreference::Vsync),
            P::FIFO
        );
    }

    #[test]
    fn fixed_surface_extent_wins() {
        let c = caps((1024, 768), (1, 1), (4096, 4096));
        let e = choose_extent(&c, RenderSize::new(800, 600)).unwrap();
        assert_eq!((e.width, e.height), (1024, 768));
    }

    #[test]
    fn zero_surface_extent_yields_no_chain() {
        // minimized after the host committed a real size
        let c = caps((0, 0), (0, 0), (4096, 4096));
        assert!(choose_extent(&c, RenderSize::new(1024, 768)).is_none());
        let c = caps((1024, 0), (0, 0), (4096, 4096));
        assert!(choose_extent(&c, RenderSize::new(1024, 768)).is_none());
        // free surface whose minimum allows zero
        let c = caps((u32::MAX, u32::MAX), (0, 0), (4096, 4096));
        assert!(choose_extent(&c, RenderSize::new(0, 600)).is_none());
    }

    #[test]
    fn free_surface_uses_requested_size_clamped() {
        let c = caps((u32::MAX, u32::MAX), (64, 64), (2048, 2048));
        let e = choose_extent(&c, RenderSize::new(1024, 768)).unwrap();
        assert_eq!((e.width, e.height), (1024, 768));
        let e = choose_extent(&c, RenderSize::new(10, 5000)).unwrap();
        assert_eq!((e.width, e.height), (64, 2048));
    }
}

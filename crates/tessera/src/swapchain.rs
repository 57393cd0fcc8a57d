use std::sync::Arc;

use ash::vk;

use crate::{
    context::Device,
    error::{CallSite, SwapchainError, VkCallError},
    surface::Surface,
};

///Preferences used when negotiating the swapchain with the surface.
#[derive(Clone, Debug)]
pub struct SwapchainConfig {
    ///Taken if the surface supports it, otherwise the first supported format is used.
    pub preferred_format: vk::SurfaceFormatKHR,
    ///Taken if the surface supports it, otherwise `fallback_present_mode` is used.
    pub preferred_present_mode: vk::PresentModeKHR,
    ///Must always be supported. FIFO is the only mode the specification guarantees.
    pub fallback_present_mode: vk::PresentModeKHR,
    pub usage: vk::ImageUsageFlags,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        SwapchainConfig {
            preferred_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            preferred_present_mode: vk::PresentModeKHR::MAILBOX,
            fallback_present_mode: vk::PresentModeKHR::FIFO,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        }
    }
}

impl SwapchainConfig {
    ///Prefers FIFO, which waits for vertical sync.
    pub fn with_vsync(mut self) -> Self {
        self.preferred_present_mode = vk::PresentModeKHR::FIFO;
        self
    }

    ///enables you to chain multiple assignments to a constructed config.
    pub fn with(mut self, mapping: impl FnOnce(&mut Self)) -> Self {
        mapping(&mut self);
        self
    }
}

pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    config: &SwapchainConfig,
) -> Result<vk::SurfaceFormatKHR, SwapchainError> {
    available
        .iter()
        .find(|f| {
            f.format == config.preferred_format.format
                && f.color_space == config.preferred_format.color_space
        })
        .or_else(|| available.first())
        .copied()
        .ok_or(SwapchainError::NoSurfaceFormat)
}

pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    config: &SwapchainConfig,
) -> vk::PresentModeKHR {
    if available.contains(&config.preferred_present_mode) {
        config.preferred_present_mode
    } else {
        config.fallback_present_mode
    }
}

///Uses the surface's current extent, unless it is the `u32::MAX` sentinel, in which case `requested` is clamped
/// into the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

///One more than the minimum, clamped to the maximum. A maximum of 0 means there is none.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

///Swapchain together with its images and one color view per image.
///
/// Teardown destroys the views first, then the swapchain. Every handle is checked for null before it is destroyed,
/// so a partially constructed presentable cleans up exactly what was created.
pub struct Presentable<'d> {
    pub device: &'d Device,
    ///keeps the surface alive until the swapchain is gone
    pub surface: Arc<Surface>,
    pub loader: ash::khr::swapchain::Device,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl<'d> Presentable<'d> {
    pub fn new(
        device: &'d Device,
        surface: &Arc<Surface>,
        config: SwapchainConfig,
    ) -> Result<Self, SwapchainError> {
        let capabilities = surface.get_capabilities(device.physical_device)?;
        let formats = surface.get_formats(device.physical_device)?;
        let present_modes = surface.get_present_modes(device.physical_device)?;

        let format = choose_surface_format(&formats, &config)?;
        let present_mode = choose_present_mode(&present_modes, &config);
        let extent = choose_extent(&capabilities, surface.target_extent);
        let image_count = choose_image_count(&capabilities);

        if extent.width == 0 || extent.height == 0 {
            return Err(SwapchainError::InvalidExtent(extent));
        }

        #[cfg(feature = "logging")]
        log::info!(
            "Creating swapchain: {:?}/{:?}, {:?}, {}x{}, {} images",
            format.format,
            format.color_space,
            present_mode,
            extent.width,
            extent.height,
            image_count
        );

        let mut presentable = Presentable {
            device,
            surface: surface.clone(),
            loader: ash::khr::swapchain::Device::new(&device.instance.inner, &device.inner),
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            views: Vec::new(),
            format,
            present_mode,
            extent,
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(config.usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        presentable.swapchain =
            unsafe { presentable.loader.create_swapchain(&create_info, None) }
                .during("vkCreateSwapchainKHR")?;
        presentable.images = unsafe { presentable.loader.get_swapchain_images(presentable.swapchain) }
            .during("vkGetSwapchainImagesKHR")?;

        for image in presentable.images.clone() {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );
            let view = unsafe { device.inner.create_image_view(&view_info, None) }
                .during("vkCreateImageView")?;
            presentable.views.push(view);
        }

        Ok(presentable)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    ///Acquires the next image, signaling `signal` once it is ready. Blocks without timeout.
    pub fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<u32, SwapchainError> {
        match unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, signal, vk::Fence::null())
        } {
            Ok((index, is_suboptimal)) => {
                if is_suboptimal {
                    #[cfg(feature = "logging")]
                    log::warn!("Acquired image is suboptimal!");
                }
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(SwapchainError::OutOfDate),
            Err(e) => Err(VkCallError {
                operation: "vkAcquireNextImageKHR",
                result: e,
            }
            .into()),
        }
    }

    ///Presents `index` on `queue` after `wait` is signaled. Returns `true` if the swapchain is suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        index: u32,
        wait: vk::Semaphore,
    ) -> Result<bool, SwapchainError> {
        let present_info = vk::PresentInfoKHR::default()
            .swapchains(core::slice::from_ref(&self.swapchain))
            .image_indices(core::slice::from_ref(&index))
            .wait_semaphores(core::slice::from_ref(&wait));

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => {
                if suboptimal {
                    #[cfg(feature = "logging")]
                    log::warn!("Suboptimal image on present");
                }
                Ok(suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(SwapchainError::OutOfDate),
            Err(e) => {
                #[cfg(feature = "logging")]
                log::error!("Error while presenting image: {}", e);
                Err(VkCallError {
                    operation: "vkQueuePresentKHR",
                    result: e,
                }
                .into())
            }
        }
    }
}

impl Drop for Presentable<'_> {
    fn drop(&mut self) {
        for view in self.views.drain(..) {
            if view != vk::ImageView::null() {
                unsafe { self.device.inner.destroy_image_view(view, None) };
            }
        }
        //images are owned by the swapchain
        self.images.clear();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
            self.swapchain = vk::SwapchainKHR::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 16,
                height: 16,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_stays_in_range() {
        for (min, max) in [(1, 0), (2, 3), (2, 2), (3, 8), (1, 1)] {
            let count = choose_image_count(&caps(min, max));
            assert!(count >= min);
            if max > 0 {
                assert!(count <= min.max(max));
            }
        }
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(2, 2)), 2);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
    }

    #[test]
    fn extent_is_clamped_for_variable_surfaces() {
        let c = caps(2, 3);
        assert_eq!(
            choose_extent(
                &c,
                vk::Extent2D {
                    width: 8000,
                    height: 8
                }
            ),
            vk::Extent2D {
                width: 4096,
                height: 16
            }
        );
        assert_eq!(
            choose_extent(
                &c,
                vk::Extent2D {
                    width: 800,
                    height: 600
                }
            ),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn current_extent_wins_if_fixed() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        assert_eq!(
            choose_extent(
                &c,
                vk::Extent2D {
                    width: 800,
                    height: 600
                }
            ),
            c.current_extent
        );
    }

    #[test]
    fn prefers_srgb_bgra() {
        let config = SwapchainConfig::default();
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = config.preferred_format;
        assert_eq!(choose_surface_format(&[unorm, srgb], &config).unwrap(), srgb);
        assert_eq!(choose_surface_format(&[unorm], &config).unwrap(), unorm);
        assert!(matches!(
            choose_surface_format(&[], &config),
            Err(SwapchainError::NoSurfaceFormat)
        ));
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let config = SwapchainConfig::default();
        assert_eq!(
            choose_present_mode(
                &[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
                &config
            ),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE], &config),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(
                &[vk::PresentModeKHR::MAILBOX],
                &config.clone().with_vsync()
            ),
            vk::PresentModeKHR::FIFO
        );
    }
}

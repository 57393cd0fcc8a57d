use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::error::{CallSite, InstanceError, VkCallError};

///Everything tessera needs from a window. The window itself, including event handling and the decision when
/// to stop the loop, stays with the application.
pub trait PresentationTarget: HasWindowHandle + HasDisplayHandle {
    ///Current drawable size in pixels.
    fn extent(&self) -> vk::Extent2D;
}

///using [ash-window](https://crates.io/crates/ash-window) to safely find a surface for a given window
/// handle. Also keeps the instance alive long enough to destroy the created surface in time.
pub struct Surface {
    ///keeps the surface alive
    pub instance: Arc<crate::context::Instance>,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
    ///Window extent at the time the surface was created.
    pub target_extent: vk::Extent2D,
}

impl Surface {
    pub fn new<T>(
        instance: &Arc<crate::context::Instance>,
        target: &T,
    ) -> Result<Self, InstanceError>
    where
        T: PresentationTarget,
    {
        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.inner,
                target.display_handle()?.as_raw(),
                target.window_handle()?.as_raw(),
                None,
            )
        }
        .during("vkCreateSurfaceKHR")?;
        let surface_loader = ash::khr::surface::Instance::new(&instance.entry, &instance.inner);

        Ok(Surface {
            instance: instance.clone(),
            surface,
            surface_loader,
            target_extent: target.extent(),
        })
    }

    pub fn supports_queue_family(
        &self,
        physical_device: vk::PhysicalDevice,
        family: u32,
    ) -> Result<bool, VkCallError> {
        unsafe {
            self.surface_loader.get_physical_device_surface_support(
                physical_device,
                family,
                self.surface,
            )
        }
        .during("vkGetPhysicalDeviceSurfaceSupportKHR")
    }

    pub fn get_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR, VkCallError> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
        .during("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    pub fn get_formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, VkCallError> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
        .during("vkGetPhysicalDeviceSurfaceFormatsKHR")
    }

    pub fn get_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>, VkCallError> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
        .during("vkGetPhysicalDeviceSurfacePresentModesKHR")
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        if self.surface != vk::SurfaceKHR::null() {
            unsafe { self.surface_loader.destroy_surface(self.surface, None) };
        }
    }
}

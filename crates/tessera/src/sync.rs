//! # Synchronisation
//!
//! Each pooled command buffer carries one [FrameSync] bundle:
//!
//! - `image_available`: binary semaphore signaled when the swapchain image was acquired. The submission waits on it at the
//!   color-attachment-output stage.
//! - `render_finished`: binary semaphore signaled by the submission and waited on by the present operation.
//! - `in_flight`: fence signaled when the submission retired. The buffer waits for it before it is reset and recorded again,
//!   which makes reuse of a pooled buffer safe even if the GPU is still working on its previous frame.
//!
//! The handles are owned by the [Device](crate::context::Device)'s command buffer registry and destroyed when the device is dropped.
//! Memory barriers are recorded directly into the command buffer, see [activate_texture](crate::resources::FrameCommands::activate_texture).

use ash::vk;

use crate::error::{CallSite, VkCallError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSync {
    ///Creates both semaphores and the (signaled) fence. If any creation fails, the already created handles are destroyed.
    pub fn new(device: &ash::Device) -> Result<Self, VkCallError> {
        let mut sync = FrameSync {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        };

        if let Err(e) = sync.create_handles(device) {
            unsafe { sync.destroy(device) };
            return Err(e);
        }
        Ok(sync)
    }

    fn create_handles(&mut self, device: &ash::Device) -> Result<(), VkCallError> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        self.image_available = unsafe { device.create_semaphore(&semaphore_info, None) }
            .during("vkCreateSemaphore")?;
        self.render_finished = unsafe { device.create_semaphore(&semaphore_info, None) }
            .during("vkCreateSemaphore")?;
        //signaled, so the first wait does not block
        self.in_flight = unsafe {
            device.create_fence(
                &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                None,
            )
        }
        .during("vkCreateFence")?;
        Ok(())
    }

    ///Blocks until the last submission guarded by `in_flight` retired and resets the fence. There is no timeout.
    pub fn wait_and_reset(&self, device: &ash::Device) -> Result<(), VkCallError> {
        unsafe { device.wait_for_fences(core::slice::from_ref(&self.in_flight), true, u64::MAX) }
            .during("vkWaitForFences")?;
        unsafe { device.reset_fences(core::slice::from_ref(&self.in_flight)) }
            .during("vkResetFences")
    }

    ///Destroys every non-null handle and nulls it.
    ///
    /// # Safety
    ///
    /// The handles must not be in use by the device anymore.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.in_flight != vk::Fence::null() {
            unsafe { device.destroy_fence(self.in_flight, None) };
            self.in_flight = vk::Fence::null();
        }
        for sem in [&mut self.image_available, &mut self.render_finished] {
            if *sem != vk::Semaphore::null() {
                unsafe { device.destroy_semaphore(*sem, None) };
                *sem = vk::Semaphore::null();
            }
        }
    }
}

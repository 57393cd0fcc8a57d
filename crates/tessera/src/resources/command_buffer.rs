use ash::vk;

use crate::{
    context::Device,
    error::{CallSite, CommandBufferError, MisuseError, VkCallError},
    resources::{Buffer, RenderPipeline, Texture},
    swapchain::Presentable,
    sync::FrameSync,
};

///Registry of pooled entries. An entry is either free or in use. Requesting reuses the first free entry,
/// or appends a newly allocated one.
///
/// # Growth
///
/// The registry is unbounded. There is no maximum entry count and no backpressure. A caller that never
/// releases its entries grows the registry without limit.
#[derive(Debug)]
pub struct CommandRegistry<T> {
    entries: Vec<(T, bool)>,
}

impl<T> Default for CommandRegistry<T> {
    fn default() -> Self {
        CommandRegistry {
            entries: Vec::new(),
        }
    }
}

impl<T> CommandRegistry<T> {
    ///Marks the first free entry as used and returns its index. If all entries are in use, `allocate` is called
    /// and its result appended.
    pub fn acquire<E>(&mut self, allocate: impl FnOnce() -> Result<T, E>) -> Result<usize, E> {
        if let Some(idx) = self.entries.iter().position(|(_, in_use)| !*in_use) {
            self.entries[idx].1 = true;
            return Ok(idx);
        }

        let entry = allocate()?;
        self.entries.push((entry, true));
        #[cfg(feature = "logging")]
        log::info!("Command registry grew to {} entries", self.entries.len());
        Ok(self.entries.len() - 1)
    }

    pub fn release(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.1 = false;
        }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index).map(|(e, _)| e)
    }

    pub fn is_in_use(&self, index: usize) -> bool {
        self.entries.get(index).map(|(_, u)| *u).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_use(&self) -> usize {
        self.entries.iter().filter(|(_, u)| *u).count()
    }

    ///Removes all entries, regardless of their state.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain(..).map(|(e, _)| e)
    }
}

///Native handles of one pooled command buffer.
#[derive(Debug, Clone, Copy)]
pub struct CommandSlot {
    pub buffer: vk::CommandBuffer,
    pub sync: FrameSync,
}

///Lazily created command pool of the device together with all buffers it ever handed out.
#[derive(Default)]
pub struct CommandState {
    pub pool: Option<vk::CommandPool>,
    pub registry: CommandRegistry<CommandSlot>,
}

impl CommandState {
    fn pool(&mut self, device: &ash::Device, graphics_family: u32) -> Result<vk::CommandPool, VkCallError> {
        if let Some(pool) = self.pool {
            return Ok(pool);
        }
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(graphics_family);
        let pool = unsafe { device.create_command_pool(&create_info, None) }
            .during("vkCreateCommandPool")?;

        #[cfg(feature = "logging")]
        log::info!("Created command pool for queue family {}", graphics_family);
        self.pool = Some(pool);
        Ok(pool)
    }

    ///Returns the index of a free slot, allocating a new buffer (and the pool, on first use) if needed.
    pub fn request(
        &mut self,
        device: &ash::Device,
        graphics_family: u32,
    ) -> Result<usize, CommandBufferError> {
        let pool = self.pool(device, graphics_family)?;
        self.registry.acquire(|| -> Result<CommandSlot, CommandBufferError> {
            let buffers = unsafe {
                device.allocate_command_buffers(
                    &vk::CommandBufferAllocateInfo::default()
                        .command_pool(pool)
                        .command_buffer_count(1)
                        .level(vk::CommandBufferLevel::PRIMARY),
                )
            }
            .during("vkAllocateCommandBuffers")?;

            let Some(buffer) = buffers.first().copied() else {
                return Err(CommandBufferError::FailedToAllocate {
                    allocated: 0,
                    count: 1,
                });
            };

            match FrameSync::new(device) {
                Ok(sync) => Ok(CommandSlot { buffer, sync }),
                Err(e) => {
                    unsafe { device.free_command_buffers(pool, &buffers) };
                    Err(e.into())
                }
            }
        })
    }

    ///Destroys every slot and the pool.
    ///
    /// # Safety
    ///
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        let pool = self.pool.take();
        let slots = self.registry.drain().collect::<Vec<_>>();
        for mut slot in slots {
            unsafe { slot.sync.destroy(device) };
            if let Some(pool) = pool {
                unsafe { device.free_command_buffers(pool, core::slice::from_ref(&slot.buffer)) };
            }
        }
        if let Some(pool) = pool {
            unsafe { device.destroy_command_pool(pool, None) };
        }
    }
}

///States a [FrameCommands] buffer goes through each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Free,
    ///Recording, outside of the render pass.
    Begun,
    ///Swapchain image acquired, render pass is open.
    Rendering,
    ///Render pass closed, still recording.
    Recorded,
    Ended,
    Submitted,
    Presented,
}

impl FrameState {
    pub fn name(&self) -> &'static str {
        match self {
            FrameState::Free => "Free",
            FrameState::Begun => "Begun",
            FrameState::Rendering => "Rendering",
            FrameState::Recorded => "Recorded",
            FrameState::Ended => "Ended",
            FrameState::Submitted => "Submitted",
            FrameState::Presented => "Presented",
        }
    }

    ///The only state `self` may advance to.
    pub fn next(&self) -> FrameState {
        match self {
            FrameState::Free => FrameState::Begun,
            FrameState::Begun => FrameState::Rendering,
            FrameState::Rendering => FrameState::Recorded,
            FrameState::Recorded => FrameState::Ended,
            FrameState::Ended => FrameState::Submitted,
            FrameState::Submitted => FrameState::Presented,
            FrameState::Presented => FrameState::Free,
        }
    }

    ///Checks that `to` follows `self`.
    pub fn advance(self, to: FrameState) -> Result<FrameState, MisuseError> {
        if self.next() == to {
            Ok(to)
        } else {
            Err(MisuseError::InvalidFrameTransition {
                from: self.name(),
                to: to.name(),
            })
        }
    }

    ///Checks that the buffer is in `expected` for an operation that does not change the state.
    pub fn expect(self, expected: FrameState) -> Result<(), MisuseError> {
        if self == expected {
            Ok(())
        } else {
            Err(MisuseError::InvalidFrameTransition {
                from: self.name(),
                to: expected.name(),
            })
        }
    }
}

///Pooled command buffer bound to one pipeline and one presentable. Requested via [Device::request_command_buffer].
///
/// A frame goes through `begin → begin_rendering → (bind, draw)* → end_rendering → end → submit → present`. After
/// `present` the buffer is free again and goes back to the pool when it is dropped. Calling those out of order fails with
/// [MisuseError::InvalidFrameTransition] and leaves the state as it was.
///
/// Dropping the buffer after `begin` but before `present` abandons it. Abandoned buffers are never recycled and stay
/// allocated until the device is dropped.
pub struct FrameCommands<'a> {
    device: &'a Device,
    pipeline: &'a RenderPipeline<'a>,
    presentable: &'a Presentable<'a>,
    slot: usize,
    buffer: vk::CommandBuffer,
    sync: FrameSync,
    image_index: Option<u32>,
    state: FrameState,
}

impl<'a> FrameCommands<'a> {
    pub(crate) fn new(
        device: &'a Device,
        pipeline: &'a RenderPipeline<'a>,
        presentable: &'a Presentable<'a>,
        slot: usize,
        handles: CommandSlot,
    ) -> Self {
        FrameCommands {
            device,
            pipeline,
            presentable,
            slot,
            buffer: handles.buffer,
            sync: handles.sync,
            image_index: None,
            state: FrameState::Free,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn raw(&self) -> vk::CommandBuffer {
        self.buffer
    }

    ///Swapchain image acquired by [begin_rendering](FrameCommands::begin_rendering), if any.
    pub fn image_index(&self) -> Option<u32> {
        self.image_index
    }

    ///Waits until the previous submission of this buffer retired, then resets it and starts recording.
    pub fn begin(&mut self) -> Result<(), CommandBufferError> {
        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        let next = self.state.advance(FrameState::Begun)?;
        let device = &self.device.inner;
        self.sync.wait_and_reset(device)?;
        unsafe { device.reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty()) }
            .during("vkResetCommandBuffer")?;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(self.buffer, &begin_info) }
            .during("vkBeginCommandBuffer")?;

        self.state = next;
        Ok(())
    }

    ///Acquires the next swapchain image, begins the render pass on its framebuffer and binds the pipeline.
    /// Blocks until an image is available.
    pub fn begin_rendering(&mut self) -> Result<(), CommandBufferError> {
        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        let next = self.state.advance(FrameState::Rendering)?;
        let image_index = self
            .presentable
            .acquire_next_image(self.sync.image_available)?;

        let render_pass = self.pipeline.render_pass();
        let framebuffer = render_pass.framebuffer(image_index)?;
        let clear_values = render_pass.clear_values();
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.inner)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: render_pass.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.inner.cmd_begin_render_pass(
                self.buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
            self.device.inner.cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.pipeline,
            );
        }

        self.image_index = Some(image_index);
        self.state = next;
        Ok(())
    }

    ///Binds the pipeline's descriptor set. Does nothing if no uniform or texture was attached to the pipeline.
    pub fn bind_uniforms(&mut self) -> Result<(), CommandBufferError> {
        self.state.expect(FrameState::Rendering)?;
        if let Some(set) = self.pipeline.descriptor_set() {
            unsafe {
                self.device.inner.cmd_bind_descriptor_sets(
                    self.buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline.layout.layout,
                    0,
                    &[set],
                    &[],
                )
            };
        }
        Ok(())
    }

    pub fn bind_vertex_buffer(&mut self, buffer: &Buffer<'_>) -> Result<(), CommandBufferError> {
        self.state.expect(FrameState::Rendering)?;
        let handle = buffer.handle().ok_or(MisuseError::BufferNotUploaded)?;
        unsafe {
            self.device
                .inner
                .cmd_bind_vertex_buffers(self.buffer, 0, &[handle], &[0])
        };
        Ok(())
    }

    ///Binds `buffer` as index buffer. Fails if `buffer` was not created as an index buffer.
    pub fn bind_index_buffer(&mut self, buffer: &Buffer<'_>) -> Result<(), CommandBufferError> {
        self.state.expect(FrameState::Rendering)?;
        let handle = buffer.handle().ok_or(MisuseError::BufferNotUploaded)?;
        let index_type = buffer.index_type().ok_or(MisuseError::NotAnIndexBuffer)?;
        unsafe {
            self.device
                .inner
                .cmd_bind_index_buffer(self.buffer, handle, 0, index_type.into())
        };
        Ok(())
    }

    ///Records the upload of `texture`'s pixels into its image. Must happen before the render pass begins, and the
    /// buffer must have been submitted at least once before any draw samples the texture.
    pub fn activate_texture(&mut self, texture: &Texture<'_>) -> Result<(), CommandBufferError> {
        self.state.expect(FrameState::Begun)?;
        texture.record_activation(&self.device.inner, self.buffer);
        Ok(())
    }

    ///Draws `count` vertices, or `count` indices if `indexed` is set. Always a single instance without offsets.
    pub fn draw(&mut self, count: u32, indexed: bool) -> Result<(), CommandBufferError> {
        self.state.expect(FrameState::Rendering)?;
        unsafe {
            if indexed {
                self.device
                    .inner
                    .cmd_draw_indexed(self.buffer, count, 1, 0, 0, 0);
            } else {
                self.device.inner.cmd_draw(self.buffer, count, 1, 0, 0);
            }
        }
        Ok(())
    }

    pub fn end_rendering(&mut self) -> Result<(), CommandBufferError> {
        let next = self.state.advance(FrameState::Recorded)?;
        unsafe { self.device.inner.cmd_end_render_pass(self.buffer) };
        self.state = next;
        Ok(())
    }

    pub fn end(&mut self) -> Result<(), CommandBufferError> {
        let next = self.state.advance(FrameState::Ended)?;
        unsafe { self.device.inner.end_command_buffer(self.buffer) }
            .during("vkEndCommandBuffer")?;
        self.state = next;
        Ok(())
    }

    ///Submits to the graphics queue. Waits for the acquired image at the color-attachment-output stage and signals the
    /// render-finished semaphore as well as this buffer's fence.
    pub fn submit(&mut self) -> Result<(), CommandBufferError> {
        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        let next = self.state.advance(FrameState::Submitted)?;
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(core::slice::from_ref(&self.sync.image_available))
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(core::slice::from_ref(&self.buffer))
            .signal_semaphores(core::slice::from_ref(&self.sync.render_finished));

        unsafe {
            self.device.inner.queue_submit(
                self.device.graphics_queue().inner,
                core::slice::from_ref(&submit_info),
                self.sync.in_flight,
            )
        }
        .during("vkQueueSubmit")?;

        self.state = next;
        Ok(())
    }

    ///Presents the acquired image on the present queue once rendering finished. Afterwards the buffer is free, and
    /// returns to the device's pool once dropped.
    ///
    /// Returns `true` if the swapchain is suboptimal for the surface.
    pub fn present(&mut self) -> Result<bool, CommandBufferError> {
        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        let presented = self.state.advance(FrameState::Presented)?;
        let image_index = self.image_index.ok_or(MisuseError::InvalidFrameTransition {
            from: FrameState::Submitted.name(),
            to: presented.name(),
        })?;

        //the buffer was submitted, so it can be recycled even if presenting fails
        self.state = presented.next();
        self.image_index = None;
        let suboptimal = self.presentable.present(
            self.device.present_queue().inner,
            image_index,
            self.sync.render_finished,
        )?;
        Ok(suboptimal)
    }
}

impl Drop for FrameCommands<'_> {
    fn drop(&mut self) {
        if self.state == FrameState::Free {
            self.device.release_command_slot(self.slot);
        } else {
            #[cfg(feature = "logging")]
            log::warn!(
                "Command buffer {:?} abandoned in state {}, it won't be reused",
                self.buffer,
                self.state.name()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_reuses_released_entry() {
        let mut registry = CommandRegistry::<u32>::default();
        let first = registry.acquire(|| Ok::<_, ()>(7)).unwrap();
        registry.release(first);
        let second = registry
            .acquire(|| -> Result<u32, ()> { panic!("must not allocate") })
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.get(second), Some(&7));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_grows_while_in_use() {
        let mut registry = CommandRegistry::<u32>::default();
        let a = registry.acquire(|| Ok::<_, ()>(1)).unwrap();
        let b = registry.acquire(|| Ok::<_, ()>(2)).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.in_use(), 2);

        //releasing the first one makes it the next candidate
        registry.release(a);
        assert!(!registry.is_in_use(a));
        assert_eq!(registry.acquire(|| Ok::<_, ()>(3)).unwrap(), a);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn registry_keeps_state_on_failed_allocation() {
        let mut registry = CommandRegistry::<u32>::default();
        assert_eq!(registry.acquire(|| Err::<u32, _>("oom")), Err("oom"));
        assert!(registry.is_empty());
    }

    #[test]
    fn failed_transition_keeps_state() {
        let mut state = FrameState::Ended;
        assert!(state.advance(FrameState::Presented).is_err());
        assert_eq!(state, FrameState::Ended);
        state = state.advance(FrameState::Submitted).unwrap();
        assert_eq!(state.advance(FrameState::Presented), Ok(FrameState::Presented));
    }

    #[test]
    #[ignore = "needs a Vulkan device"]
    fn device_reuses_retired_buffer() {
        let device = crate::context::headless_test_device();
        let (slot, handles) = device.request_command_slot().unwrap();

        //stand in for a frame: record, submit and let the fence signal
        let inner = &device.inner;
        handles.sync.wait_and_reset(inner).unwrap();
        unsafe {
            inner
                .begin_command_buffer(handles.buffer, &vk::CommandBufferBeginInfo::default())
                .unwrap();
            inner.end_command_buffer(handles.buffer).unwrap();
            inner
                .queue_submit(
                    device.graphics_queue().inner,
                    &[vk::SubmitInfo::default().command_buffers(&[handles.buffer])],
                    handles.sync.in_flight,
                )
                .unwrap();
        }
        assert_eq!(device.command_buffer_count(), (1, 1));

        //a second request while the first is in use allocates
        let (other, _) = device.request_command_slot().unwrap();
        assert_ne!(other, slot);
        device.release_command_slot(other);

        device.release_command_slot(slot);
        let (again, reused) = device.request_command_slot().unwrap();
        assert_eq!(again, slot);
        assert_eq!(reused.buffer, handles.buffer);
        //returns once the earlier submission retired
        reused.sync.wait_and_reset(inner).unwrap();
        assert_eq!(device.command_buffer_count(), (2, 1));
        device.wait_idle().unwrap();
    }

    #[test]
    fn frame_cycle_in_order() {
        let mut state = FrameState::Free;
        for next in [
            FrameState::Begun,
            FrameState::Rendering,
            FrameState::Recorded,
            FrameState::Ended,
            FrameState::Submitted,
            FrameState::Presented,
            FrameState::Free,
        ] {
            state = state.advance(next).unwrap();
        }
        assert_eq!(state, FrameState::Free);
    }

    #[test]
    fn frame_cycle_rejects_skips() {
        assert_eq!(
            FrameState::Free.advance(FrameState::Rendering),
            Err(MisuseError::InvalidFrameTransition {
                from: "Free",
                to: "Rendering"
            })
        );
        assert!(FrameState::Rendering.advance(FrameState::Ended).is_err());
        assert!(FrameState::Ended.advance(FrameState::Presented).is_err());
        assert!(FrameState::Begun.expect(FrameState::Rendering).is_err());
        assert!(FrameState::Rendering.expect(FrameState::Rendering).is_ok());
    }
}

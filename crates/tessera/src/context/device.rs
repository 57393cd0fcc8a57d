use std::{
    ffi::CStr,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use ash::vk;
use smallvec::SmallVec;

use super::{
    AdapterCandidate, DeviceSelector, Instance, Queue, QueueBuilder, QueueCapability,
    QueueFamilies, capability::PORTABILITY_SUBSET,
};
use crate::{
    allocator::find_memory_type,
    error::{
        CallSite, CommandBufferError, DeviceError, MisuseError, PipelineError, ResourceError,
        ShaderError, SwapchainError, VkCallError,
    },
    resources::{
        AttachmentOp, AttachmentRole, Buffer, BufferKind, CommandSlot, CommandState, FrameCommands,
        IndexType, InputLayout, RenderAttachment, RenderPass, RenderPipeline, RenderPipelineBuilder,
        ShaderModule, ShaderSource, ShaderStage, Texture, UniformBlock,
    },
    surface::Surface,
    swapchain::{Presentable, SwapchainConfig},
};

///Logical device together with its queues and the snapshot of the physical device it was created from.
///
/// Everything created from a device (presentables, render passes, pipelines, buffers, textures and
/// command buffers) borrows it, therefore the device always outlives those objects.
///
/// The command pool is created on the first [request_command_buffer](Device::request_command_buffer) and
/// lives as long as the device. It is the only state that changes after initialization, and is guarded by a mutex.
pub struct Device {
    ///The raw ash device
    pub inner: ash::Device,
    pub instance: Arc<Instance>,
    ///Properties, features and memory layout captured at selection time.
    pub adapter: AdapterCandidate,
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilies,
    ///One queue per unique family
    pub queues: Vec<Queue>,
    surface: Option<Arc<Surface>>,
    enabled_extensions: SmallVec<[&'static CStr; 4]>,
    commands: Mutex<CommandState>,
}

impl Device {
    ///Selects a physical device that can present to `surface`, resolves its queue families and creates the logical device.
    pub fn initialize(
        instance: &Arc<Instance>,
        surface: &Arc<Surface>,
        selector: &DeviceSelector,
    ) -> Result<Self, DeviceError> {
        let adapter = selector.pick(instance, Some(&**surface))?;
        let families = QueueFamilies::resolve(&adapter.queue_families, &adapter.present_support)?;
        Self::create(
            instance,
            adapter,
            families,
            &[ash::khr::swapchain::NAME],
            Some(surface.clone()),
        )
    }

    ///Device without presentation support. Useful for offscreen work and tests.
    pub fn headless(instance: &Arc<Instance>, selector: &DeviceSelector) -> Result<Self, DeviceError> {
        let adapter = selector.pick_headless(instance)?;
        let families = QueueFamilies::resolve_headless(&adapter.queue_families)?;
        Self::create(instance, adapter, families, &[], None)
    }

    fn create(
        instance: &Arc<Instance>,
        adapter: AdapterCandidate,
        queue_families: QueueFamilies,
        required_extensions: &[&'static CStr],
        surface: Option<Arc<Surface>>,
    ) -> Result<Self, DeviceError> {
        if let Some(missing) = adapter
            .extensions
            .first_missing_extension(required_extensions)
        {
            return Err(DeviceError::UnsupportedExtension(
                missing.to_string_lossy().into_owned(),
            ));
        }

        let mut enabled_extensions: SmallVec<[&'static CStr; 4]> =
            required_extensions.iter().copied().collect();
        if adapter.extensions.has_extension(PORTABILITY_SUBSET) {
            enabled_extensions.push(PORTABILITY_SUBSET);
        }

        //8bit indices are optional, only enable them if the device can do them
        let mut uint8_features = vk::PhysicalDeviceIndexTypeUint8FeaturesEXT::default();
        if adapter
            .extensions
            .has_extension(ash::ext::index_type_uint8::NAME)
        {
            let mut features2 =
                vk::PhysicalDeviceFeatures2::default().push_next(&mut uint8_features);
            unsafe {
                instance
                    .inner
                    .get_physical_device_features2(adapter.phydev, &mut features2)
            };
        }
        let uint8_indices = uint8_features.index_type_uint8 == vk::TRUE;
        if uint8_indices {
            enabled_extensions.push(ash::ext::index_type_uint8::NAME);
        }

        let queue_builder = queue_families
            .unique_families()
            .into_iter()
            .map(|family| {
                QueueBuilder::single(family, adapter.queue_families[family as usize])
            })
            .collect::<Vec<_>>();
        let queue_create_infos = queue_builder
            .iter()
            .map(|q| q.as_create_info())
            .collect::<Vec<_>>();

        //anisotropic filtering is always requested, the samplers depend on it
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);
        let extension_ptrs = enabled_extensions
            .iter()
            .map(|e| e.as_ptr())
            .collect::<Vec<_>>();

        let mut create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features);
        let mut uint8_enable =
            vk::PhysicalDeviceIndexTypeUint8FeaturesEXT::default().index_type_uint8(true);
        if uint8_indices {
            create_info = create_info.push_next(&mut uint8_enable);
        }

        #[cfg(feature = "logging")]
        {
            log::info!("Creating device on {}", adapter.name());
            log::info!(
                "  Queue families: graphics={}, present={}, compute={:?}, transfer={:?}",
                queue_families.graphics,
                queue_families.present,
                queue_families.compute,
                queue_families.transfer
            );
            log::info!("  Extensions:");
            for e in &enabled_extensions {
                log::info!("    {:?}", e);
            }
        }

        let inner = unsafe {
            instance
                .inner
                .create_device(adapter.phydev, &create_info, None)
        }
        .during("vkCreateDevice")?;

        let queues = queue_builder
            .iter()
            .map(|builder| Queue {
                inner: unsafe { inner.get_device_queue(builder.family_index, 0) },
                family_index: builder.family_index,
                properties: builder.properties,
                capabilities: queue_families.families[builder.family_index as usize],
            })
            .collect();

        Ok(Device {
            inner,
            instance: instance.clone(),
            physical_device: adapter.phydev,
            adapter,
            queue_families,
            queues,
            surface,
            enabled_extensions,
            commands: Mutex::new(CommandState::default()),
        })
    }

    ///Returns the first queue for the given family, if there is any.
    pub fn get_first_queue_for_family(&self, family: u32) -> Option<&Queue> {
        self.queues.iter().find(|q| q.family_index == family)
    }

    pub fn queue_for(&self, capability: QueueCapability) -> Option<&Queue> {
        self.queue_families
            .family_for(capability)
            .and_then(|family| self.get_first_queue_for_family(family))
    }

    ///Queue all submissions go to.
    pub fn graphics_queue(&self) -> &Queue {
        //there is a queue for every resolved family, and the graphics family always resolves.
        &self.queues[self
            .queues
            .iter()
            .position(|q| q.family_index == self.queue_families.graphics)
            .unwrap_or(0)]
    }

    ///Queue presentation goes to. Might be the same queue as [graphics_queue](Device::graphics_queue).
    pub fn present_queue(&self) -> &Queue {
        self.queue_for(QueueCapability::Present)
            .unwrap_or_else(|| self.graphics_queue())
    }

    pub fn surface(&self) -> Option<&Arc<Surface>> {
        self.surface.as_ref()
    }

    ///Window extent remembered from the surface this device was created for.
    pub fn surface_extent(&self) -> Option<vk::Extent2D> {
        self.surface.as_ref().map(|s| s.target_extent)
    }

    pub fn extension_enabled(&self, name: &CStr) -> bool {
        self.enabled_extensions.contains(&name)
    }

    pub fn find_memory_type(
        &self,
        type_filter: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<u32, DeviceError> {
        find_memory_type(&self.adapter.memory_properties, type_filter, flags)
    }

    ///Checks that `format` supports `features` with optimal tiling.
    pub fn supports_format(&self, format: vk::Format, features: vk::FormatFeatureFlags) -> bool {
        let props = unsafe {
            self.instance
                .inner
                .get_physical_device_format_properties(self.physical_device, format)
        };
        props.optimal_tiling_features.contains(features)
    }

    ///32bit float depth format, checked for depth attachment support.
    pub fn make_depth_format(&self) -> Result<vk::Format, DeviceError> {
        let format = vk::Format::D32_SFLOAT;
        if self.supports_format(format, vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT) {
            Ok(format)
        } else {
            Err(DeviceError::UnsupportedFormat {
                format,
                usage: "depth stencil attachment",
            })
        }
    }

    ///8bit BGRA sRGB format, checked for color attachment support.
    pub fn make_color_format(&self) -> Result<vk::Format, DeviceError> {
        let format = vk::Format::B8G8R8A8_SRGB;
        if self.supports_format(format, vk::FormatFeatureFlags::COLOR_ATTACHMENT) {
            Ok(format)
        } else {
            Err(DeviceError::UnsupportedFormat {
                format,
                usage: "color attachment",
            })
        }
    }

    pub fn wait_idle(&self) -> Result<(), VkCallError> {
        unsafe { self.inner.device_wait_idle() }.during("vkDeviceWaitIdle")
    }

    ///Creates the swapchain for the surface this device was initialized with.
    pub fn make_presentable(&self, config: SwapchainConfig) -> Result<Presentable<'_>, SwapchainError> {
        let surface = self.surface.as_ref().ok_or(SwapchainError::NoSurface)?;
        Presentable::new(self, surface, config)
    }

    pub fn make_render_attachment(
        &self,
        index: i32,
        format: vk::Format,
        load: AttachmentOp,
        store: AttachmentOp,
        role: AttachmentRole,
    ) -> Result<RenderAttachment, MisuseError> {
        RenderAttachment::new(index, format, load, store, role)
    }

    pub fn make_render_pass<'a>(
        &'a self,
        presentable: &Presentable<'a>,
        attachments: Vec<RenderAttachment>,
    ) -> Result<RenderPass<'a>, PipelineError> {
        RenderPass::create(self, presentable, attachments)
    }

    pub fn make_shader(
        &self,
        stage: ShaderStage,
        source: ShaderSource<'_>,
    ) -> Result<ShaderModule<'_>, ShaderError> {
        ShaderModule::new(self, stage, source)
    }

    pub fn make_shader_from_file(
        &self,
        stage: ShaderStage,
        path: impl AsRef<Path>,
    ) -> Result<ShaderModule<'_>, ShaderError> {
        ShaderModule::new(self, stage, ShaderSource::from_path(path.as_ref()))
    }

    ///Starts a pipeline for `render_pass`. The vertex layout is built from `input` at this point.
    pub fn make_render_pipeline<'a>(
        &'a self,
        render_pass: &'a RenderPass<'a>,
        input: InputLayout,
    ) -> RenderPipelineBuilder<'a> {
        RenderPipelineBuilder::new(self, render_pass, input)
    }

    pub fn make_uniform_block(&self, size: u64) -> Result<UniformBlock<'_>, ResourceError> {
        UniformBlock::create(self, size)
    }

    ///Vertex buffer, allocated on first upload.
    pub fn make_buffer(&self) -> Buffer<'_> {
        Buffer::new(self, BufferKind::Vertex)
    }

    ///Index buffer holding `data`. [IndexType::U8] needs `VK_EXT_index_type_uint8` to be enabled.
    pub fn make_index_buffer(
        &self,
        index_type: IndexType,
        data: &[u8],
    ) -> Result<Buffer<'_>, ResourceError> {
        if index_type == IndexType::U8 && !self.extension_enabled(ash::ext::index_type_uint8::NAME)
        {
            return Err(DeviceError::UnsupportedExtension(
                ash::ext::index_type_uint8::NAME
                    .to_string_lossy()
                    .into_owned(),
            )
            .into());
        }
        let mut buffer = Buffer::new(self, BufferKind::Index(index_type));
        buffer.upload(data)?;
        Ok(buffer)
    }

    pub fn create_texture(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u32,
    ) -> Result<Texture<'_>, ResourceError> {
        Texture::from_pixels(self, pixels, width, height, channels)
    }

    ///Returns a command buffer that is not in use, or allocates a new one. The pool is unbounded: buffers that are
    /// never presented are never recycled, and each further request allocates.
    pub fn request_command_buffer<'a>(
        &'a self,
        pipeline: &'a RenderPipeline<'a>,
        presentable: &'a Presentable<'a>,
    ) -> Result<FrameCommands<'a>, CommandBufferError> {
        let (slot, handles) = self.request_command_slot()?;
        Ok(FrameCommands::new(self, pipeline, presentable, slot, handles))
    }

    pub(crate) fn request_command_slot(&self) -> Result<(usize, CommandSlot), CommandBufferError> {
        let mut commands = self.lock_commands();
        let slot = commands.request(&self.inner, self.queue_families.graphics)?;
        let handles = commands
            .registry
            .get(slot)
            .copied()
            .ok_or(CommandBufferError::FailedToAllocate {
                allocated: 0,
                count: 1,
            })?;
        Ok((slot, handles))
    }

    pub(crate) fn release_command_slot(&self, slot: usize) {
        self.lock_commands().registry.release(slot);
    }

    ///Number of command buffers allocated so far, and how many of them are in use.
    pub fn command_buffer_count(&self) -> (usize, usize) {
        let commands = self.lock_commands();
        (commands.registry.len(), commands.registry.in_use())
    }

    fn lock_commands(&self) -> MutexGuard<'_, CommandState> {
        //the state stays consistent even if a holder panicked, every mutation is a single assignment or push
        self.commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(_e) = self.wait_idle() {
            #[cfg(feature = "logging")]
            log::error!("Failed to wait for device idle on drop: {}", _e);
        }
        unsafe {
            self.lock_commands().destroy(&self.inner);
            self.inner.destroy_device(None);
        }
    }
}

///Device on the first usable adapter, without a surface. Panics if there is none.
#[cfg(test)]
pub(crate) fn headless_test_device() -> Device {
    let instance = Instance::load()
        .expect("Vulkan loader")
        .build()
        .expect("instance");
    Device::headless(&instance, &DeviceSelector::headless()).expect("device")
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    #[test]
    fn impl_send_sync() {
        assert_impl_all!(Device: Send, Sync);
    }
}

use ash::vk;

use super::buffer::RawBuffer;
use crate::{
    allocator::{Allocation, MemoryUsage},
    context::Device,
    error::{CallSite, MisuseError, ResourceError, VkCallError},
};

///Format every texture is created with.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

///2D image with its own memory. The image is destroyed before its memory is freed.
pub struct Image<'d> {
    device: &'d Device,
    pub inner: vk::Image,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    allocation: Option<Allocation<'d>>,
}

impl<'d> Image<'d> {
    pub fn new(
        device: &'d Device,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        memory_usage: MemoryUsage,
    ) -> Result<Self, ResourceError> {
        check_extent(extent.width, extent.height)?;
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let inner =
            unsafe { device.inner.create_image(&create_info, None) }.during("vkCreateImage")?;
        let mut image = Image {
            device,
            inner,
            format,
            extent,
            allocation: None,
        };

        let requirements = unsafe { device.inner.get_image_memory_requirements(inner) };
        let allocation = Allocation::new(device, requirements, memory_usage)?;
        unsafe { device.inner.bind_image_memory(inner, allocation.memory, 0) }
            .during("vkBindImageMemory")?;
        image.allocation = Some(allocation);

        Ok(image)
    }

    pub fn subresource_all(&self) -> vk::ImageSubresourceRange {
        subresource_range(aspect_of(self.format))
    }
}

impl Drop for Image<'_> {
    fn drop(&mut self) {
        if self.inner != vk::Image::null() {
            unsafe { self.device.inner.destroy_image(self.inner, None) };
        }
    }
}

fn check_extent(width: u32, height: u32) -> Result<(), MisuseError> {
    if width == 0 || height == 0 {
        Err(MisuseError::ZeroExtent { width, height })
    } else {
        Ok(())
    }
}

fn aspect_of(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

pub struct ImageView<'d> {
    device: &'d Device,
    pub inner: vk::ImageView,
}

impl<'d> ImageView<'d> {
    ///2D view over the first mip level and layer of `image`. The aspect is derived from `format`.
    pub fn new(
        device: &'d Device,
        image: vk::Image,
        format: vk::Format,
    ) -> Result<Self, VkCallError> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(subresource_range(aspect_of(format)));
        let inner = unsafe { device.inner.create_image_view(&create_info, None) }
            .during("vkCreateImageView")?;
        Ok(ImageView { device, inner })
    }
}

impl Drop for ImageView<'_> {
    fn drop(&mut self) {
        if self.inner != vk::ImageView::null() {
            unsafe { self.device.inner.destroy_image_view(self.inner, None) };
        }
    }
}

///Linear filtering, repeat addressing and anisotropic filtering at the device's maximum.
pub struct Sampler<'d> {
    device: &'d Device,
    pub inner: vk::Sampler,
}

impl<'d> Sampler<'d> {
    pub fn new(device: &'d Device) -> Result<Self, VkCallError> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(device.adapter.properties.limits.max_sampler_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR);
        let inner = unsafe { device.inner.create_sampler(&create_info, None) }
            .during("vkCreateSampler")?;
        Ok(Sampler { device, inner })
    }
}

impl Drop for Sampler<'_> {
    fn drop(&mut self) {
        if self.inner != vk::Sampler::null() {
            unsafe { self.device.inner.destroy_sampler(self.inner, None) };
        }
    }
}

///Device local depth image and its view, sized to a swapchain.
pub struct DepthTarget<'d> {
    //dropped before the image
    pub view: ImageView<'d>,
    pub image: Image<'d>,
}

impl<'d> DepthTarget<'d> {
    pub fn new(
        device: &'d Device,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> Result<Self, ResourceError> {
        let image = Image::new(
            device,
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            MemoryUsage::GpuOnly,
        )?;
        let view = ImageView::new(device, image.inner, format)?;
        Ok(DepthTarget { view, image })
    }
}

///One image layout transition as recorded by a pipeline barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

impl LayoutTransition {
    ///Prepares the image for the copy from the staging buffer.
    pub const TO_TRANSFER_DST: Self = LayoutTransition {
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        dst_stage: vk::PipelineStageFlags::TRANSFER,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::TRANSFER_WRITE,
    };

    ///Makes the copied pixels readable for fragment shaders.
    pub const TO_SHADER_READ: Self = LayoutTransition {
        old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        src_access: vk::AccessFlags::TRANSFER_WRITE,
        dst_access: vk::AccessFlags::SHADER_READ,
    };

    fn barrier(&self, image: vk::Image) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR))
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
    }

    fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer, image: vk::Image) {
        let barrier = self.barrier(image);
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                self.src_stage,
                self.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                core::slice::from_ref(&barrier),
            )
        };
    }
}

///Byte size of a `width`x`height` RGBA8 image. Fails for any channel count but 4, and for an empty image.
pub fn texture_byte_size(width: u32, height: u32, channels: u32) -> Result<u64, MisuseError> {
    if channels != 4 {
        return Err(MisuseError::UnsupportedChannelCount(channels));
    }
    check_extent(width, height)?;
    Ok(width as u64 * height as u64 * channels as u64)
}

///Sampled RGBA texture.
///
/// The pixels are kept in a host visible staging buffer. They only reach the device local image once
/// [activate_texture](crate::resources::FrameCommands::activate_texture) was recorded and submitted. Until then the
/// texture must not be sampled.
pub struct Texture<'d> {
    sampler: Sampler<'d>,
    view: ImageView<'d>,
    image: Image<'d>,
    staging: RawBuffer<'d>,
}

impl<'d> Texture<'d> {
    pub fn from_pixels(
        device: &'d Device,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u32,
    ) -> Result<Self, ResourceError> {
        let expected = texture_byte_size(width, height, channels)?;
        if pixels.len() as u64 != expected {
            return Err(MisuseError::PixelSizeMismatch {
                expected,
                got: pixels.len() as u64,
            }
            .into());
        }

        let staging = RawBuffer::new(
            device,
            expected,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryUsage::CpuToGpu,
        )?;
        staging.write(pixels)?;

        let image = Image::new(
            device,
            vk::Extent2D { width, height },
            TEXTURE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            MemoryUsage::GpuOnly,
        )?;
        let view = ImageView::new(device, image.inner, TEXTURE_FORMAT)?;
        let sampler = Sampler::new(device)?;

        Ok(Texture {
            sampler,
            view,
            image,
            staging,
        })
    }

    ///Decodes the image at `path` and creates a texture from its pixels.
    #[cfg(feature = "image_loading")]
    pub fn from_file(
        device: &'d Device,
        path: impl AsRef<std::path::Path>,
    ) -> Result<Self, ResourceError> {
        let decoded = DecodedImage::open(path)?;
        Self::from_pixels(
            device,
            &decoded.pixels,
            decoded.width,
            decoded.height,
            decoded.channels,
        )
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent
    }

    ///Records the transition to transfer-destination, the copy from the staging buffer and the transition to
    /// shader-read-only into `cmd`. `cmd` must be recording and outside of a render pass.
    pub(crate) fn record_activation(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        LayoutTransition::TO_TRANSFER_DST.record(device, cmd, self.image.inner);

        let region = full_copy(self.image.extent);
        unsafe {
            device.cmd_copy_buffer_to_image(
                cmd,
                self.staging.inner,
                self.image.inner,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                core::slice::from_ref(&region),
            )
        };

        LayoutTransition::TO_SHADER_READ.record(device, cmd, self.image.inner);
    }

    pub(crate) fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default()
            .sampler(self.sampler.inner)
            .image_view(self.view.inner)
            .image_layout(LayoutTransition::TO_SHADER_READ.new_layout)
    }
}

///Tightly packed copy of the whole color image.
fn full_copy(extent: vk::Extent2D) -> vk::BufferImageCopy {
    vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1),
        )
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
}

///Raw RGBA8 pixels decoded from an image file.
#[cfg(feature = "image_loading")]
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

#[cfg(feature = "image_loading")]
impl DecodedImage {
    ///Decodes any format the `image` crate understands. The result is always converted to RGBA8.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, ResourceError> {
        let rgba = image::open(path)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(DecodedImage {
            pixels: rgba.into_raw(),
            width,
            height,
            channels: 4,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    #[test]
    fn impl_send_sync() {
        assert_impl_all!(Image: Send, Sync);
        assert_impl_all!(ImageView: Send, Sync);
        assert_impl_all!(Sampler: Send, Sync);
        assert_impl_all!(Texture: Send, Sync);
    }

    #[test]
    fn only_rgba_is_accepted() {
        assert_eq!(texture_byte_size(4, 2, 4), Ok(32));
        assert_eq!(
            texture_byte_size(4, 2, 3),
            Err(MisuseError::UnsupportedChannelCount(3))
        );
    }

    #[test]
    fn empty_texture_is_misuse() {
        assert_eq!(
            texture_byte_size(0, 16, 4),
            Err(MisuseError::ZeroExtent {
                width: 0,
                height: 16
            })
        );
        assert_eq!(
            texture_byte_size(16, 0, 4),
            Err(MisuseError::ZeroExtent {
                width: 16,
                height: 0
            })
        );
    }

    #[test]
    #[ignore = "needs a Vulkan device"]
    fn activated_texture_is_readable() {
        let device = crate::context::headless_test_device();
        let extent = vk::Extent2D {
            width: 4,
            height: 4,
        };
        let pixels = (0..64u8).collect::<Vec<_>>();
        let texture = device
            .create_texture(&pixels, extent.width, extent.height, 4)
            .unwrap();
        assert_eq!(texture.extent(), extent);
        assert_eq!(
            texture.descriptor_info().image_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );

        let readback = RawBuffer::new(
            &device,
            pixels.len() as u64,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryUsage::CpuToGpu,
        )
        .unwrap();
        //continues from the layout the activation leaves the image in
        let to_transfer_src = LayoutTransition {
            old_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            src_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            src_access: vk::AccessFlags::SHADER_READ,
            dst_access: vk::AccessFlags::TRANSFER_READ,
        };

        let (_slot, handles) = device.request_command_slot().unwrap();
        let inner = &device.inner;
        handles.sync.wait_and_reset(inner).unwrap();
        unsafe {
            inner
                .begin_command_buffer(handles.buffer, &vk::CommandBufferBeginInfo::default())
                .unwrap();
            texture.record_activation(inner, handles.buffer);
            to_transfer_src.record(inner, handles.buffer, texture.image.inner);
            inner.cmd_copy_image_to_buffer(
                handles.buffer,
                texture.image.inner,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                readback.inner,
                &[full_copy(extent)],
            );
            inner.end_command_buffer(handles.buffer).unwrap();
            inner
                .queue_submit(
                    device.graphics_queue().inner,
                    &[vk::SubmitInfo::default().command_buffers(&[handles.buffer])],
                    handles.sync.in_flight,
                )
                .unwrap();
            inner
                .wait_for_fences(&[handles.sync.in_flight], true, u64::MAX)
                .unwrap();
        }

        assert_eq!(readback.read().unwrap(), pixels);
    }

    #[test]
    #[ignore = "needs a Vulkan device"]
    fn pixel_count_must_match() {
        let device = crate::context::headless_test_device();
        assert!(matches!(
            device.create_texture(&[0u8; 12], 2, 2, 4),
            Err(ResourceError::Misuse(MisuseError::PixelSizeMismatch {
                expected: 16,
                got: 12
            }))
        ));
    }

    #[test]
    fn activation_ends_readable() {
        let first = LayoutTransition::TO_TRANSFER_DST;
        let last = LayoutTransition::TO_SHADER_READ;
        assert_eq!(first.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(first.new_layout, last.old_layout);
        assert_eq!(last.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(last.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn depth_formats_use_depth_aspect() {
        assert_eq!(aspect_of(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_of(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_of(TEXTURE_FORMAT), vk::ImageAspectFlags::COLOR);
    }

    #[cfg(feature = "image_loading")]
    #[test]
    fn decoding_missing_file_fails() {
        assert!(matches!(
            DecodedImage::open("does/not/exist.png"),
            Err(ResourceError::Decode(_))
        ));
    }
}

use ash::vk;

use crate::{
    context::Device,
    error::{CallSite, VkCallError},
};

pub mod graphics;

pub struct PipelineLayout<'d> {
    device: &'d Device,
    pub layout: vk::PipelineLayout,
}

impl<'d> PipelineLayout<'d> {
    pub fn new(
        device: &'d Device,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Self, VkCallError> {
        let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(descriptor_set_layouts);
        let layout = unsafe { device.inner.create_pipeline_layout(&create_info, None) }
            .during("vkCreatePipelineLayout")?;

        Ok(PipelineLayout { device, layout })
    }
}

impl Drop for PipelineLayout<'_> {
    fn drop(&mut self) {
        if self.layout != vk::PipelineLayout::null() {
            unsafe { self.device.inner.destroy_pipeline_layout(self.layout, None) }
        }
    }
}

use ash::vk;

use super::image::DepthTarget;
use crate::{
    context::Device,
    error::{CallSite, MisuseError, PipelineError},
    swapchain::Presentable,
};

///What happens to an attachment's content at the start or end of the pass. `Clear` is only a valid load operation,
/// `Store` only a valid store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentOp {
    Clear,
    Load,
    Store,
    DontCare,
}

impl AttachmentOp {
    pub fn load_op(&self) -> Result<vk::AttachmentLoadOp, MisuseError> {
        match self {
            AttachmentOp::Clear => Ok(vk::AttachmentLoadOp::CLEAR),
            AttachmentOp::Load => Ok(vk::AttachmentLoadOp::LOAD),
            AttachmentOp::DontCare => Ok(vk::AttachmentLoadOp::DONT_CARE),
            AttachmentOp::Store => Err(MisuseError::StoreAsLoadOp),
        }
    }

    pub fn store_op(&self) -> Result<vk::AttachmentStoreOp, MisuseError> {
        match self {
            AttachmentOp::Store => Ok(vk::AttachmentStoreOp::STORE),
            AttachmentOp::DontCare => Ok(vk::AttachmentStoreOp::DONT_CARE),
            AttachmentOp::Clear => Err(MisuseError::ClearAsStoreOp),
            AttachmentOp::Load => Err(MisuseError::LoadAsStoreOp),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentRole {
    ///Presented after the pass.
    Color,
    Depth,
}

impl AttachmentRole {
    pub fn final_layout(&self) -> vk::ImageLayout {
        match self {
            AttachmentRole::Color => vk::ImageLayout::PRESENT_SRC_KHR,
            AttachmentRole::Depth => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }

    ///Layout the attachment has while the subpass runs.
    pub fn subpass_layout(&self) -> vk::ImageLayout {
        match self {
            AttachmentRole::Color => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            AttachmentRole::Depth => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }
}

///Single attachment of a [RenderPass]. Validated on creation, so a render pass never sees an invalid op or index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderAttachment {
    pub index: u32,
    pub format: vk::Format,
    pub role: AttachmentRole,
    load_op: vk::AttachmentLoadOp,
    store_op: vk::AttachmentStoreOp,
    ///Used for color attachments that are cleared on load.
    pub clear_color: [f32; 4],
    ///Used for depth attachments that are cleared on load.
    pub clear_depth: f32,
}

impl RenderAttachment {
    pub fn new(
        index: i32,
        format: vk::Format,
        load: AttachmentOp,
        store: AttachmentOp,
        role: AttachmentRole,
    ) -> Result<Self, MisuseError> {
        if index < 0 {
            return Err(MisuseError::NegativeAttachmentIndex(index));
        }
        Ok(RenderAttachment {
            index: index as u32,
            format,
            role,
            load_op: load.load_op()?,
            store_op: store.store_op()?,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
        })
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_clear_depth(mut self, depth: f32) -> Self {
        self.clear_depth = depth;
        self
    }

    pub fn description(&self) -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .format(self.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(self.role.final_layout())
    }

    pub fn reference(&self) -> vk::AttachmentReference {
        vk::AttachmentReference {
            attachment: self.index,
            layout: self.role.subpass_layout(),
        }
    }

    pub fn clear_value(&self) -> vk::ClearValue {
        match self.role {
            AttachmentRole::Color => vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            AttachmentRole::Depth => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.clear_depth,
                    stencil: 0,
                },
            },
        }
    }
}

///Attachment references of the single subpass.
///
/// Attachment 0 is the color target that is presented, attachment 1 an optional [Depth](AttachmentRole::Depth)
/// target. Each attachment's index has to match its position, since the framebuffers are built in that order.
#[derive(Debug, Clone, Copy)]
pub struct SubpassLayout {
    pub color: vk::AttachmentReference,
    pub depth: Option<vk::AttachmentReference>,
}

impl SubpassLayout {
    pub fn from_attachments(attachments: &[RenderAttachment]) -> Result<Self, MisuseError> {
        let color = attachments.first().ok_or(MisuseError::NoAttachments)?;
        if attachments.len() > 2
            || color.role != AttachmentRole::Color
            || attachments
                .get(1)
                .is_some_and(|a| a.role != AttachmentRole::Depth)
        {
            return Err(MisuseError::UnsupportedAttachmentLayout);
        }
        for (position, attachment) in attachments.iter().enumerate() {
            if attachment.index as usize != position {
                return Err(MisuseError::AttachmentIndexMismatch {
                    index: attachment.index,
                    position,
                });
            }
        }

        Ok(SubpassLayout {
            color: color.reference(),
            depth: attachments.get(1).map(|a| a.reference()),
        })
    }

    pub fn description(&self) -> vk::SubpassDescription<'_> {
        let desc = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(core::slice::from_ref(&self.color));
        if let Some(depth) = &self.depth {
            desc.depth_stencil_attachment(depth)
        } else {
            desc
        }
    }

    ///The external to subpass 0 dependency. Color writes wait for color output of earlier work, and depth writes for
    /// earlier fragment tests.
    pub fn external_dependency(&self) -> vk::SubpassDependency {
        let mut stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let mut access =
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        if self.depth.is_some() {
            stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
            access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        }
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .dst_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(access)
    }
}

///Single subpass render pass with one framebuffer per swapchain image.
///
/// If the subpass has a depth attachment, the pass owns a depth image sized to the swapchain extent. Framebuffers
/// are destroyed first, then the pass, then the depth target.
pub struct RenderPass<'d> {
    device: &'d Device,
    pub inner: vk::RenderPass,
    pub attachments: Vec<RenderAttachment>,
    pub extent: vk::Extent2D,
    framebuffers: Vec<vk::Framebuffer>,
    depth: Option<DepthTarget<'d>>,
}

impl<'d> RenderPass<'d> {
    pub fn create(
        device: &'d Device,
        presentable: &Presentable<'_>,
        attachments: Vec<RenderAttachment>,
    ) -> Result<Self, PipelineError> {
        let subpass = SubpassLayout::from_attachments(&attachments)?;
        let descriptions = attachments
            .iter()
            .map(|a| a.description())
            .collect::<Vec<_>>();
        let subpass_description = subpass.description();
        let dependency = subpass.external_dependency();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&descriptions)
            .subpasses(core::slice::from_ref(&subpass_description))
            .dependencies(core::slice::from_ref(&dependency));

        let inner = unsafe { device.inner.create_render_pass(&create_info, None) }
            .during("vkCreateRenderPass")?;

        let mut render_pass = RenderPass {
            device,
            inner,
            extent: presentable.extent,
            framebuffers: Vec::with_capacity(presentable.views.len()),
            depth: None,
            attachments,
        };

        if let Some(depth) = render_pass.attachments.get(1) {
            render_pass.depth = Some(DepthTarget::new(device, presentable.extent, depth.format)?);
        }

        for view in &presentable.views {
            let mut views = vec![*view];
            if let Some(depth) = &render_pass.depth {
                views.push(depth.view.inner);
            }
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(inner)
                .attachments(&views)
                .width(presentable.extent.width)
                .height(presentable.extent.height)
                .layers(1);
            let framebuffer = unsafe { device.inner.create_framebuffer(&framebuffer_info, None) }
                .during("vkCreateFramebuffer")?;
            render_pass.framebuffers.push(framebuffer);
        }

        #[cfg(feature = "logging")]
        log::info!(
            "Created render pass with {} attachments, depth: {}, {} framebuffers",
            render_pass.attachments.len(),
            render_pass.depth.is_some(),
            render_pass.framebuffers.len()
        );

        Ok(render_pass)
    }

    ///Clear values in attachment order.
    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        self.attachments.iter().map(|a| a.clear_value()).collect()
    }

    ///Framebuffer of swapchain image `image_index`. Fails if the image does not belong to the presentable this
    /// pass was created for.
    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer, MisuseError> {
        framebuffer_at(&self.framebuffers, image_index)
    }

    pub fn has_depth(&self) -> bool {
        self.depth.is_some()
    }
}

fn framebuffer_at(
    framebuffers: &[vk::Framebuffer],
    image_index: u32,
) -> Result<vk::Framebuffer, MisuseError> {
    framebuffers
        .get(image_index as usize)
        .copied()
        .ok_or(MisuseError::UnknownImageIndex(image_index))
}

impl Drop for RenderPass<'_> {
    fn drop(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { self.device.inner.destroy_framebuffer(framebuffer, None) };
        }
        if self.inner != vk::RenderPass::null() {
            unsafe { self.device.inner.destroy_render_pass(self.inner, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color() -> RenderAttachment {
        RenderAttachment::new(
            0,
            vk::Format::B8G8R8A8_SRGB,
            AttachmentOp::Clear,
            AttachmentOp::Store,
            AttachmentRole::Color,
        )
        .unwrap()
    }

    fn depth(index: i32) -> RenderAttachment {
        RenderAttachment::new(
            index,
            vk::Format::D32_SFLOAT,
            AttachmentOp::Clear,
            AttachmentOp::DontCare,
            AttachmentRole::Depth,
        )
        .unwrap()
    }

    #[test]
    fn negative_index_is_misuse() {
        let err = RenderAttachment::new(
            -1,
            vk::Format::B8G8R8A8_SRGB,
            AttachmentOp::Clear,
            AttachmentOp::Store,
            AttachmentRole::Color,
        );
        assert_eq!(err, Err(MisuseError::NegativeAttachmentIndex(-1)));
    }

    #[test]
    fn ops_in_wrong_slot_are_misuse() {
        let format = vk::Format::B8G8R8A8_SRGB;
        assert_eq!(
            RenderAttachment::new(
                0,
                format,
                AttachmentOp::Clear,
                AttachmentOp::Clear,
                AttachmentRole::Color
            ),
            Err(MisuseError::ClearAsStoreOp)
        );
        assert_eq!(
            RenderAttachment::new(
                0,
                format,
                AttachmentOp::Store,
                AttachmentOp::Store,
                AttachmentRole::Color
            ),
            Err(MisuseError::StoreAsLoadOp)
        );
        assert_eq!(
            RenderAttachment::new(
                0,
                format,
                AttachmentOp::Load,
                AttachmentOp::Load,
                AttachmentRole::Color
            ),
            Err(MisuseError::LoadAsStoreOp)
        );
    }

    #[test]
    fn roles_pick_layouts() {
        let c = color().description();
        assert_eq!(c.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(c.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(c.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(c.store_op, vk::AttachmentStoreOp::STORE);

        let d = depth(1).description();
        assert_eq!(d.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(
            d.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(d.stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);
    }

    #[test]
    fn empty_pass_is_misuse() {
        assert!(matches!(
            SubpassLayout::from_attachments(&[]),
            Err(MisuseError::NoAttachments)
        ));
    }

    #[test]
    fn single_color_has_no_depth() {
        let layout = SubpassLayout::from_attachments(&[color()]).unwrap();
        let desc = layout.description();
        assert_eq!(desc.color_attachment_count, 1);
        assert!(desc.p_depth_stencil_attachment.is_null());
        assert_eq!(layout.color.attachment, 0);
        assert_eq!(
            layout.color.layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn second_depth_attachment_is_referenced() {
        let depth = depth(1);
        let layout = SubpassLayout::from_attachments(&[color(), depth]).unwrap();
        let reference = layout.depth.unwrap();
        assert_eq!(reference.attachment, depth.reference().attachment);
        assert_eq!(reference.layout, depth.reference().layout);
        assert!(!layout.description().p_depth_stencil_attachment.is_null());
        assert!(
            layout
                .external_dependency()
                .dst_access_mask
                .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );
    }

    fn second_color() -> RenderAttachment {
        RenderAttachment::new(
            1,
            vk::Format::R8G8B8A8_UNORM,
            AttachmentOp::DontCare,
            AttachmentOp::Store,
            AttachmentRole::Color,
        )
        .unwrap()
    }

    #[test]
    fn only_color_then_depth_is_accepted() {
        assert_eq!(
            SubpassLayout::from_attachments(&[color(), second_color()]).unwrap_err(),
            MisuseError::UnsupportedAttachmentLayout
        );
        assert_eq!(
            SubpassLayout::from_attachments(&[depth(0)]).unwrap_err(),
            MisuseError::UnsupportedAttachmentLayout
        );
        let mut third = depth(2);
        third.role = AttachmentRole::Color;
        assert_eq!(
            SubpassLayout::from_attachments(&[color(), depth(1), third]).unwrap_err(),
            MisuseError::UnsupportedAttachmentLayout
        );
    }

    #[test]
    fn index_must_match_position() {
        assert_eq!(
            SubpassLayout::from_attachments(&[color(), depth(5)]).unwrap_err(),
            MisuseError::AttachmentIndexMismatch {
                index: 5,
                position: 1
            }
        );
        let mut moved = color();
        moved.index = 3;
        assert_eq!(
            SubpassLayout::from_attachments(&[moved]).unwrap_err(),
            MisuseError::AttachmentIndexMismatch {
                index: 3,
                position: 0
            }
        );
    }

    #[test]
    fn unknown_image_has_no_framebuffer() {
        let framebuffers = [vk::Framebuffer::null(); 3];
        assert!(framebuffer_at(&framebuffers, 2).is_ok());
        assert_eq!(
            framebuffer_at(&framebuffers, 3),
            Err(MisuseError::UnknownImageIndex(3))
        );
    }

    #[test]
    fn dependency_gates_color_output() {
        let layout = SubpassLayout::from_attachments(&[color()]).unwrap();
        let dep = layout.external_dependency();
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        assert_eq!(
            dep.src_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            dep.dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
    }
}

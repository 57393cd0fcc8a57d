use ash::vk;
use smallvec::SmallVec;

use super::PipelineLayout;
use crate::{
    context::Device,
    error::{MisuseError, PipelineError, VkCallError},
    resources::{
        BoundDescriptors, CompiledShader, DescriptorBinding, DescriptorResource, InputLayout,
        RenderPass, ShaderStage, Texture, UniformBlock,
    },
    util,
};

///Fixed function state of a [RenderPipeline]. The default draws triangle lists, culls back faces with clockwise
/// front faces, tests and writes depth with "less" and does not blend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedFunction {
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    ///Standard alpha blending on the color attachment.
    pub alpha_blend: bool,
}

impl Default for FixedFunction {
    fn default() -> Self {
        FixedFunction {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS,
            alpha_blend: false,
        }
    }
}

impl FixedFunction {
    pub fn input_assembly(&self) -> vk::PipelineInputAssemblyStateCreateInfo<'static> {
        vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(false)
    }

    pub fn rasterization(&self) -> vk::PipelineRasterizationStateCreateInfo<'static> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false)
            .line_width(1.0)
    }

    pub fn depth_stencil(&self) -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
    }

    pub fn color_blend_attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        if self.alpha_blend {
            state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
        } else {
            state.blend_enable(false)
        }
    }
}

///Fails unless there is a vertex and a fragment stage.
pub fn check_shader_set(stages: &[ShaderStage]) -> Result<(), MisuseError> {
    if stages.contains(&ShaderStage::Vertex) && stages.contains(&ShaderStage::Fragment) {
        Ok(())
    } else {
        Err(MisuseError::IncompleteShaderSet)
    }
}

///Collects shaders, descriptor bindings and fixed function state of a [RenderPipeline].
///
/// Uniform blocks and textures must be attached before [build](RenderPipelineBuilder::build). The descriptor layout
/// is computed from whatever is attached at that point, there is no way to attach resources to a built pipeline.
pub struct RenderPipelineBuilder<'a> {
    device: &'a Device,
    render_pass: &'a RenderPass<'a>,
    input: InputLayout,
    shaders: SmallVec<[CompiledShader<'a>; 2]>,
    bindings: Vec<DescriptorBinding<'a>>,
    pub fixed_function: FixedFunction,
}

impl<'a> RenderPipelineBuilder<'a> {
    pub fn new(device: &'a Device, render_pass: &'a RenderPass<'a>, input: InputLayout) -> Self {
        RenderPipelineBuilder {
            device,
            render_pass,
            input,
            shaders: SmallVec::new(),
            bindings: Vec::new(),
            fixed_function: FixedFunction::default(),
        }
    }

    pub fn add_shader(mut self, shader: CompiledShader<'a>) -> Self {
        self.shaders.push(shader);
        self
    }

    ///Attaches `block` to `binding` of set 0. Binding numbers must be unique within a pipeline, otherwise
    /// [build](Self::build) fails.
    pub fn bind_uniform(
        mut self,
        binding: u32,
        stage: ShaderStage,
        block: &'a UniformBlock<'a>,
    ) -> Self {
        self.bindings.push(DescriptorBinding {
            binding,
            stage,
            resource: DescriptorResource::Uniform(block),
        });
        self
    }

    pub fn bind_texture(mut self, binding: u32, stage: ShaderStage, texture: &'a Texture<'a>) -> Self {
        self.bindings.push(DescriptorBinding {
            binding,
            stage,
            resource: DescriptorResource::Texture(texture),
        });
        self
    }

    pub fn with_fixed_function(mut self, fixed_function: FixedFunction) -> Self {
        self.fixed_function = fixed_function;
        self
    }

    ///enables you to change the fixed function state in place.
    pub fn with(mut self, mapping: impl FnOnce(&mut FixedFunction)) -> Self {
        mapping(&mut self.fixed_function);
        self
    }

    pub fn build(self) -> Result<RenderPipeline<'a>, PipelineError> {
        let stages = self.shaders.iter().map(|s| s.stage()).collect::<SmallVec<[_; 2]>>();
        check_shader_set(&stages)?;

        let descriptors = if self.bindings.is_empty() {
            None
        } else {
            Some(BoundDescriptors::new(self.device, self.bindings)?)
        };
        let set_layouts = descriptors
            .iter()
            .map(|d| d.layout.inner)
            .collect::<SmallVec<[_; 1]>>();
        let layout = PipelineLayout::new(self.device, &set_layouts)?;

        let specializations = self
            .shaders
            .iter()
            .map(|s| s.specialization.info())
            .collect::<SmallVec<[_; 2]>>();
        let shader_stages = self
            .shaders
            .iter()
            .zip(specializations.iter())
            .map(|(shader, spec)| shader.stage_create_info(spec))
            .collect::<SmallVec<[_; 2]>>();

        let vertex_input = self.input.vertex_input_state();
        let input_assembly = self.fixed_function.input_assembly();
        let viewport = util::viewport(self.render_pass.extent);
        let scissor = util::scissor(self.render_pass.extent);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(core::slice::from_ref(&viewport))
            .scissors(core::slice::from_ref(&scissor));
        let rasterization = self.fixed_function.rasterization();
        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);
        let depth_stencil = self.fixed_function.depth_stencil();
        let blend_attachment = self.fixed_function.color_blend_attachment();
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(core::slice::from_ref(&blend_attachment));

        let mut create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(layout.layout)
            .render_pass(self.render_pass.inner)
            .subpass(0);
        if self.render_pass.has_depth() {
            create_info = create_info.depth_stencil_state(&depth_stencil);
        }

        let mut pipelines = unsafe {
            self.device.inner.create_graphics_pipelines(
                vk::PipelineCache::null(),
                core::slice::from_ref(&create_info),
                None,
            )
        }
        .map_err(|(_pipelines, result)| VkCallError {
            operation: "vkCreateGraphicsPipelines",
            result,
        })?;

        if pipelines.len() != 1 {
            for p in pipelines {
                unsafe { self.device.inner.destroy_pipeline(p, None) };
            }
            return Err(PipelineError::Allocation);
        }
        let pipeline = pipelines.remove(0);

        #[cfg(feature = "logging")]
        log::info!(
            "Created render pipeline with {} shader stages and {} descriptor bindings",
            shader_stages.len(),
            descriptors.as_ref().map(|d| d.bindings().len()).unwrap_or(0)
        );

        Ok(RenderPipeline {
            device: self.device,
            pipeline,
            layout,
            render_pass: self.render_pass,
            descriptors,
        })
    }
}

///Graphics pipeline for one [RenderPass], together with its layout and descriptor set.
pub struct RenderPipeline<'a> {
    device: &'a Device,
    pub pipeline: vk::Pipeline,
    pub layout: PipelineLayout<'a>,
    render_pass: &'a RenderPass<'a>,
    descriptors: Option<BoundDescriptors<'a>>,
}

impl<'a> RenderPipeline<'a> {
    pub fn render_pass(&self) -> &RenderPass<'a> {
        self.render_pass
    }

    ///Set 0, if any uniform block or texture was bound.
    pub fn descriptor_set(&self) -> Option<vk::DescriptorSet> {
        self.descriptors.as_ref().map(|d| d.set)
    }
}

impl Drop for RenderPipeline<'_> {
    fn drop(&mut self) {
        if self.pipeline != vk::Pipeline::null() {
            unsafe { self.device.inner.destroy_pipeline(self.pipeline, None) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    #[test]
    fn impl_send_sync() {
        assert_impl_all!(RenderPipeline: Send, Sync);
        assert_impl_all!(PipelineLayout: Send, Sync);
    }

    #[test]
    fn defaults() {
        let ff = FixedFunction::default();
        assert_eq!(
            ff.input_assembly().topology,
            vk::PrimitiveTopology::TRIANGLE_LIST
        );
        let raster = ff.rasterization();
        assert_eq!(raster.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(raster.front_face, vk::FrontFace::CLOCKWISE);
        let depth = ff.depth_stencil();
        assert_eq!(depth.depth_test_enable, vk::TRUE);
        assert_eq!(depth.depth_write_enable, vk::TRUE);
        assert_eq!(depth.depth_compare_op, vk::CompareOp::LESS);
        let blend = ff.color_blend_attachment();
        assert_eq!(blend.blend_enable, vk::FALSE);
        assert_eq!(blend.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn alpha_blend() {
        let ff = FixedFunction {
            alpha_blend: true,
            ..Default::default()
        };
        let blend = ff.color_blend_attachment();
        assert_eq!(blend.blend_enable, vk::TRUE);
        assert_eq!(blend.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
    }

    #[test]
    fn shader_set_needs_both_stages() {
        assert!(check_shader_set(&[ShaderStage::Vertex, ShaderStage::Fragment]).is_ok());
        assert!(check_shader_set(&[ShaderStage::Fragment, ShaderStage::Vertex]).is_ok());
        assert_eq!(
            check_shader_set(&[ShaderStage::Vertex]),
            Err(MisuseError::IncompleteShaderSet)
        );
        assert_eq!(check_shader_set(&[]), Err(MisuseError::IncompleteShaderSet));
    }
}

//! Everything that is created from a [Device](crate::context::Device) and borrows it: render passes, pipelines,
//! shaders, buffers, textures and the per frame command buffers.

mod image;
#[cfg(feature = "image_loading")]
pub use image::DecodedImage;
pub use image::{
    DepthTarget, Image, ImageView, LayoutTransition, Sampler, TEXTURE_FORMAT, Texture,
    texture_byte_size,
};

mod buffer;
pub use buffer::{Buffer, BufferKind, IndexType, UniformBlock, check_upload};

mod render_pass;
pub use render_pass::{AttachmentOp, AttachmentRole, RenderAttachment, RenderPass, SubpassLayout};

mod input;
pub use input::{InputDescriptor, InputFormat, InputItem, InputLayout};

mod descriptor;
pub use descriptor::{
    BoundDescriptors, DescriptorBinding, DescriptorPool, DescriptorResource, DescriptorSetLayout,
    check_unique_bindings, pool_sizes,
};

pub mod pipeline;
pub use pipeline::{
    PipelineLayout,
    graphics::{FixedFunction, RenderPipeline, RenderPipelineBuilder, check_shader_set},
};

mod command_buffer;
pub use command_buffer::{CommandRegistry, CommandSlot, CommandState, FrameCommands, FrameState};

mod compiler;
pub use compiler::compile_glsl;

mod shader_module;
pub use shader_module::{
    CompiledShader, PackedSpecialization, ShaderModule, ShaderSource, ShaderStage, SpecValue,
    Specialization,
};

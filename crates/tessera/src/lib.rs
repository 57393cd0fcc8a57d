//! # Tessera
//!
//! Thin, owning wrappers for the Vulkan objects a forward renderer needs: instance and device creation, the swapchain,
//! a single subpass render pass, graphics pipelines with their descriptors, buffers, textures and a pool of per frame
//! command buffers that carries the acquire, submit and present synchronisation.
//!
//! # Usage
//!
//! Objects are created in a fixed order, and each one borrows what it was created from. The compiler therefore
//! rejects dropping the [Device](context::Device) while a pipeline or buffer still exists.
//!
//! ```ignore
//! let instance = Instance::linked()?.for_surface(&window)?.build()?;
//! let surface = Arc::new(Surface::new(&instance, &window)?);
//! let device = Device::initialize(&instance, &surface, &DeviceSelector::default())?;
//!
//! let presentable = device.make_presentable(SwapchainConfig::default())?;
//! let color = device.make_render_attachment(
//!     0,
//!     presentable.format.format,
//!     AttachmentOp::Clear,
//!     AttachmentOp::Store,
//!     AttachmentRole::Color,
//! )?;
//! let render_pass = device.make_render_pass(&presentable, vec![color])?;
//!
//! let vertex = device.make_shader_from_file(ShaderStage::Vertex, "triangle.vert.spv")?;
//! let fragment = device.make_shader_from_file(ShaderStage::Fragment, "triangle.frag.spv")?;
//! let pipeline = device
//!     .make_render_pipeline(&render_pass, InputLayout::empty())
//!     .add_shader(vertex.compile("main", Specialization::new())?)
//!     .add_shader(fragment.compile("main", Specialization::new())?)
//!     .build()?;
//!
//! let mut frame = device.request_command_buffer(&pipeline, &presentable)?;
//! frame.begin()?;
//! frame.begin_rendering()?;
//! frame.draw(3, false)?;
//! frame.end_rendering()?;
//! frame.end()?;
//! frame.submit()?;
//! frame.present()?;
//! ```
//!
//! Native handles are public on most wrappers, so anything not covered here can be done through [ash] directly.

pub use ash;

///Memory type selection and the per resource device memory allocations.
pub mod allocator;

///[Instance](context::Instance) and [Device](context::Device) creation, including physical device selection.
pub mod context;

///Everything created from a device. Render passes, pipelines, buffers, textures and command buffers.
pub mod resources;

///Window surface related structures.
pub mod surface;

/// [Presentable](swapchain::Presentable) swapchain that is created from a [Surface](surface::Surface).
pub mod swapchain;

///Vulkan synchronisation primitives used by the frame cycle.
pub mod sync;

///Viewport and scissor helpers.
pub mod util;

mod error;
pub use error::{
    CallSite, CommandBufferError, DeviceError, InstanceError, MisuseError, PipelineError,
    ResourceError, ShaderError, SwapchainError, TesseraError, VkCallError,
};

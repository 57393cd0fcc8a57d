//! Draws a rotating, colored triangle through the full tessera frame cycle.
//!
//! The shaders are loaded from `shaders/`. Either compile them beforehand:
//!
//! ```text
//! glslc shaders/triangle.vert -o shaders/triangle.vert.spv
//! glslc shaders/triangle.frag -o shaders/triangle.frag.spv
//! ```
//!
//! or run with `--features glsl` to compile the GLSL sources at startup.

use std::{path::Path, sync::Arc, time::Instant};

use anyhow::{Context, Result};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use tessera::{
    ash::vk,
    context::{Device, DeviceSelector, Instance, VALIDATION_LAYER},
    resources::{
        AttachmentOp, AttachmentRole, Buffer, InputDescriptor, InputFormat, RenderPipeline,
        ShaderModule, ShaderStage, Specialization, UniformBlock,
    },
    surface::{PresentationTarget, Surface},
    swapchain::{Presentable, SwapchainConfig},
};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowId},
};

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    pos: [f32; 2],
    color: [f32; 3],
}

const TRIANGLE: [Vertex; 3] = [
    Vertex {
        pos: [0.0, -0.5],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        pos: [0.5, 0.5],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        pos: [-0.5, 0.5],
        color: [0.0, 0.0, 1.0],
    },
];

struct Target(Window);

impl HasWindowHandle for Target {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.0.window_handle()
    }
}

impl HasDisplayHandle for Target {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.0.display_handle()
    }
}

impl PresentationTarget for Target {
    fn extent(&self) -> vk::Extent2D {
        let size = self.0.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}

fn load_shader<'d>(device: &'d Device, stage: ShaderStage, name: &str) -> Result<ShaderModule<'d>> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders");
    let spirv = dir.join(format!("{name}.spv"));
    let path = if spirv.exists() { spirv } else { dir.join(name) };
    device
        .make_shader_from_file(stage, &path)
        .with_context(|| format!("Failed to load shader {}", path.display()))
}

struct App<'a> {
    window: &'a Window,
    device: &'a Device,
    presentable: &'a Presentable<'a>,
    pipeline: &'a RenderPipeline<'a>,
    vertices: &'a Buffer<'a>,
    frame_data: &'a UniformBlock<'a>,
    start: Instant,
    error: Option<anyhow::Error>,
}

impl App<'_> {
    fn draw(&mut self) -> Result<()> {
        let time = self.start.elapsed().as_secs_f32();
        self.frame_data.upload_value(&[time, 0.0, 0.0, 0.0])?;

        let mut frame = self
            .device
            .request_command_buffer(self.pipeline, self.presentable)?;
        frame.begin()?;
        frame.begin_rendering()?;
        frame.bind_uniforms()?;
        frame.bind_vertex_buffer(self.vertices)?;
        frame.draw(TRIANGLE.len() as u32, false)?;
        frame.end_rendering()?;
        frame.end()?;
        frame.submit()?;
        if frame.present()? {
            log::warn!("Swapchain is suboptimal");
        }
        Ok(())
    }
}

impl ApplicationHandler for App<'_> {
    fn resumed(&mut self, _event_loop: &ActiveEventLoop) {}

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.draw() {
                    log::error!("Frame failed: {e:?}");
                    self.error = Some(e);
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        self.window.request_redraw();
    }
}

fn main() -> Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()?;

    let event_loop = EventLoop::new()?;
    #[allow(deprecated)]
    let window = event_loop.create_window(
        Window::default_attributes()
            .with_title("tessera triangle")
            .with_resizable(false),
    )?;
    let target = Target(window);

    let mut builder = Instance::linked()?
        .for_surface(&target)?
        .with_application_name(c"tessera triangle");
    if cfg!(debug_assertions) && builder.is_layer_available(VALIDATION_LAYER) {
        builder = builder.enable_validation();
    }
    let instance = builder.build()?;
    let surface = Arc::new(Surface::new(&instance, &target)?);
    let device = Device::initialize(&instance, &surface, &DeviceSelector::default())?;

    let presentable = device.make_presentable(SwapchainConfig::default())?;
    let color = device.make_render_attachment(
        0,
        presentable.format.format,
        AttachmentOp::Clear,
        AttachmentOp::Store,
        AttachmentRole::Color,
    )?;
    let depth = device.make_render_attachment(
        1,
        device.make_depth_format()?,
        AttachmentOp::Clear,
        AttachmentOp::DontCare,
        AttachmentRole::Depth,
    )?;
    let render_pass = device.make_render_pass(
        &presentable,
        vec![color.with_clear_color([0.05, 0.05, 0.08, 1.0]), depth],
    )?;

    let mut vertices = device.make_buffer();
    vertices.upload_slice(&TRIANGLE)?;
    let frame_data = device.make_uniform_block(std::mem::size_of::<[f32; 4]>() as u64)?;

    let vertex_shader = load_shader(&device, ShaderStage::Vertex, "triangle.vert")?;
    let fragment_shader = load_shader(&device, ShaderStage::Fragment, "triangle.frag")?;

    let input = InputDescriptor::new()
        .with_item(0, InputFormat::Vec2)?
        .with_item(1, InputFormat::Vec3)?
        .build_input_layout();
    let pipeline = device
        .make_render_pipeline(&render_pass, input)
        .add_shader(vertex_shader.compile("main", Specialization::new().add(0, 0.8f32))?)
        .add_shader(fragment_shader.compile("main", Specialization::new())?)
        .bind_uniform(0, ShaderStage::Vertex, &frame_data)
        .build()?;

    let mut app = App {
        window: &target.0,
        device: &device,
        presentable: &presentable,
        pipeline: &pipeline,
        vertices: &vertices,
        frame_data: &frame_data,
        start: Instant::now(),
        error: None,
    };
    event_loop.run_app(&mut app)?;

    let (allocated, in_use) = device.command_buffer_count();
    log::info!("Used {allocated} command buffers, {in_use} still in use");

    //nothing may be in flight once the resources start dropping
    device.wait_idle()?;
    match app.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

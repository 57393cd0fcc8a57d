//! Draws an indexed quad that samples a texture. The texture is a generated checker board, or with `--features image`
//! the image file passed as first argument.
//!
//! The first frame records the texture upload before its render pass. Every later frame only binds and draws.
//!
//! ```text
//! glslc shaders/quad.vert -o shaders/quad.vert.spv
//! glslc shaders/quad.frag -o shaders/quad.frag.spv
//! ```
//!
//! or run with `--features glsl`.

use std::{path::Path, sync::Arc, time::Instant};

use anyhow::{Context, Result};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use tessera::{
    ash::vk,
    context::{Device, DeviceSelector, Instance, VALIDATION_LAYER},
    resources::{
        AttachmentOp, AttachmentRole, Buffer, IndexType, InputDescriptor, InputFormat,
        RenderPipeline, ShaderModule, ShaderStage, Specialization, Texture, UniformBlock,
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
    uv: [f32; 2],
}

const QUAD: [Vertex; 4] = [
    Vertex {
        pos: [-0.5, -0.5],
        uv: [0.0, 0.0],
    },
    Vertex {
        pos: [0.5, -0.5],
        uv: [1.0, 0.0],
    },
    Vertex {
        pos: [0.5, 0.5],
        uv: [1.0, 1.0],
    },
    Vertex {
        pos: [-0.5, 0.5],
        uv: [0.0, 1.0],
    },
];

//clockwise on screen
const INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

const CHECKER_SIZE: u32 = 64;

fn checker_pixels() -> Vec<u8> {
    let mut pixels = Vec::with_capacity((CHECKER_SIZE * CHECKER_SIZE * 4) as usize);
    for y in 0..CHECKER_SIZE {
        for x in 0..CHECKER_SIZE {
            let light = ((x / 8) + (y / 8)) % 2 == 0;
            let value = if light { 230 } else { 40 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    pixels
}

#[cfg(feature = "image")]
fn texture_from_args(device: &Device) -> Option<Result<Texture<'_>>> {
    let path = std::env::args().nth(1)?;
    Some(Texture::from_file(device, &path).with_context(|| format!("Failed to load texture {path}")))
}

#[cfg(not(feature = "image"))]
fn texture_from_args(_device: &Device) -> Option<Result<Texture<'_>>> {
    None
}

fn load_texture(device: &Device) -> Result<Texture<'_>> {
    match texture_from_args(device) {
        Some(texture) => texture,
        None => Ok(device.create_texture(&checker_pixels(), CHECKER_SIZE, CHECKER_SIZE, 4)?),
    }
}

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
    indices: &'a Buffer<'a>,
    frame_data: &'a UniformBlock<'a>,
    texture: &'a Texture<'a>,
    texture_uploaded: bool,
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
        if !self.texture_uploaded {
            frame.activate_texture(self.texture)?;
            self.texture_uploaded = true;
        }
        frame.begin_rendering()?;
        frame.bind_uniforms()?;
        frame.bind_vertex_buffer(self.vertices)?;
        frame.bind_index_buffer(self.indices)?;
        frame.draw(self.indices.index_count().unwrap_or(0), true)?;
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
            .with_title("tessera textured quad")
            .with_resizable(false),
    )?;
    let target = Target(window);

    let mut builder = Instance::linked()?
        .for_surface(&target)?
        .with_application_name(c"tessera textured quad");
    if cfg!(debug_assertions) && builder.is_layer_available(VALIDATION_LAYER) {
        builder = builder.enable_validation();
    }
    let instance = builder.build()?;
    let surface = Arc::new(Surface::new(&instance, &target)?);
    let device = Device::initialize(&instance, &surface, &DeviceSelector::default())?;

    let presentable = device.make_presentable(SwapchainConfig::default().with_vsync())?;
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
        vec![color.with_clear_color([0.1, 0.12, 0.15, 1.0]), depth],
    )?;

    let mut vertices = device.make_buffer();
    vertices.upload_slice(&QUAD)?;
    let indices = device.make_index_buffer(IndexType::U16, bytemuck::cast_slice(&INDICES))?;
    let frame_data = device.make_uniform_block(std::mem::size_of::<[f32; 4]>() as u64)?;
    let texture = load_texture(&device)?;
    log::info!("Texture extent: {:?}", texture.extent());

    let vertex_shader = load_shader(&device, ShaderStage::Vertex, "quad.vert")?;
    let fragment_shader = load_shader(&device, ShaderStage::Fragment, "quad.frag")?;

    let input = InputDescriptor::with_capacity(2)
        .with_item(0, InputFormat::Vec2)?
        .with_item(1, InputFormat::Vec2)?
        .build_input_layout();
    let pipeline = device
        .make_render_pipeline(&render_pass, input)
        .add_shader(vertex_shader.compile("main", Specialization::new())?)
        .add_shader(fragment_shader.compile("main", Specialization::new())?)
        .bind_uniform(0, ShaderStage::Vertex, &frame_data)
        .bind_texture(1, ShaderStage::Fragment, &texture)
        .with(|ff| ff.cull_mode = vk::CullModeFlags::NONE)
        .build()?;

    let mut app = App {
        window: &target.0,
        device: &device,
        presentable: &presentable,
        pipeline: &pipeline,
        vertices: &vertices,
        indices: &indices,
        frame_data: &frame_data,
        texture: &texture,
        texture_uploaded: false,
        start: Instant::now(),
        error: None,
    };
    event_loop.run_app(&mut app)?;

    let (allocated, in_use) = device.command_buffer_count();
    log::info!("Used {allocated} command buffers, {in_use} still in use");

    device.wait_idle()?;
    match app.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

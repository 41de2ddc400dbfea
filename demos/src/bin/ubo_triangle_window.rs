//! UBO triangle in a window: opens a window and renders a green triangle
//! into the swapchain image each frame.
//! Requires the `window` feature: cargo run --bin ubo_triangle_window --features window

use rhi::command_buffer::CommandRecorder;
use rhi::root_signature::{DescriptorRange, RangeType, ResourceBinding, RootParameter, RootResourceKind, RootSignatureDescriptor};
use rhi::{
    BufferDescriptor, BufferMemoryPreference, BufferUsage, ClearValues, ColorTargetState, CommandBuffer, Device, DeviceCreateParams, DrawArguments,
    GraphicsPipeline, GraphicsPipelineDescriptor, GraphicsProgram, LoadOp, NativeWindowHandle, PresentationSurfaceFactory, PrimitiveTopology,
    RenderPassDescriptor, RenderPassObj, RootSignature, SampleCount, Semaphore, ShaderStage, ShaderStages, StoreOp, Swapchain, VertexArray,
    VertexArrayDescriptor, VertexAttribute, VertexBinding, VertexFormat, VertexInputDescriptor, VertexInputRate, VulkanDevice,
};
use std::sync::Arc;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::window::{Window, WindowId};

struct Scene {
    root_signature: Arc<dyn RootSignature>,
    pipeline: Arc<dyn GraphicsPipeline>,
    render_pass: Arc<dyn RenderPassObj>,
    vertex_array: Arc<VertexArray>,
    resource_group: Arc<rhi::root_signature::ResourceGroup>,
    sem_acquire: Arc<dyn Semaphore>,
    sem_render: Arc<dyn Semaphore>,
}

struct App {
    window: Option<Window>,
    device: Option<Arc<VulkanDevice>>,
    swapchain: Option<rhi::vulkan::VulkanSwapchain>,
    scene: Option<Scene>,
}

impl App {
    fn new() -> Self {
        Self { window: None, device: None, swapchain: None, scene: None }
    }

    fn render(&mut self) {
        let device = self.device.as_ref().unwrap();
        let swapchain = self.swapchain.as_mut().unwrap();
        let scene = self.scene.as_ref().unwrap();
        let (w, h) = swapchain.extent();
        if w == 0 || h == 0 {
            return;
        }

        let (image_index, command_buffer) = {
            let image_index = match swapchain.acquire_next_image(scene.sem_acquire.as_ref()) {
                Ok(frame) => frame.image_index,
                Err(_) => return,
            };
            let color = swapchain.image_texture(image_index);
            let framebuffer = device.create_framebuffer(scene.render_pass.clone(), vec![color], None).expect("create_framebuffer");

            let mut command_buffer = CommandBuffer::new();
            {
                let mut recorder = CommandRecorder::new(&mut command_buffer);
                recorder.set_graphics_root_signature(scene.root_signature.clone());
                recorder.set_graphics_pipeline_state(scene.pipeline.clone());
                recorder.set_graphics_resource_group(0, scene.resource_group.clone());
                recorder.set_graphics_vertex_array(Some(scene.vertex_array.clone()));
                recorder.set_graphics_render_target(Some(framebuffer));
                recorder.clear_graphics(ClearValues { color: Some([0.1, 0.1, 0.15, 1.0]), depth_stencil: None });
                recorder.draw_graphics(DrawArguments { vertex_count: 3, instance_count: 1, first_vertex: 0, first_instance: 0 });
                recorder.set_graphics_render_target(None);
            }
            (image_index, command_buffer)
        };

        device.dispatch(&command_buffer).expect("dispatch");
        // dispatch() already waits the GPU idle on the CPU side; signal
        // sem_render with an empty submission so present()'s wait-semaphore
        // has something valid to wait on.
        device.queue().submit(&[], &[], &[scene.sem_render.as_ref()], None).expect("signal sem_render");
        let _ = swapchain.present(image_index, scene.sem_render.as_ref());
    }

    fn init_vulkan(&mut self) {
        if self.device.is_some() {
            return;
        }
        let window = self.window.as_ref().expect("window must exist before init_vulkan");
        let size = window.inner_size();
        let width = size.width.max(1);
        let height = size.height.max(1);

        let device = Arc::new(VulkanDevice::new(DeviceCreateParams::default()).expect("VulkanDevice::new"));
        device.create_surface(NativeWindowHandle { handle: window, display: window }).expect("create_surface");
        let swapchain = device.create_swapchain(width, height, true).expect("create_swapchain");

        let vertex_buffer = device
            .create_buffer(&BufferDescriptor { label: Some("vertices"), size: 9 * 4, usage: BufferUsage::Vertex, memory: BufferMemoryPreference::HostVisible })
            .expect("create_buffer");
        let vertices: [f32; 9] = [0.0, 0.6, 0.0, -0.6, -0.6, 0.0, 0.6, -0.6, 0.0];
        device.write_buffer(vertex_buffer.as_ref(), 0, bytemuck::bytes_of(&vertices)).expect("write vertices");

        const UBO_SIZE: u64 = 256;
        let uniform_buffer = device
            .create_buffer(&BufferDescriptor { label: Some("ubo"), size: UBO_SIZE, usage: BufferUsage::Uniform, memory: BufferMemoryPreference::HostVisible })
            .expect("create_buffer ubo");
        let color_data: [f32; 4] = [0.2, 0.8, 0.2, 1.0];
        device.write_buffer(uniform_buffer.as_ref(), 0, bytemuck::bytes_of(&color_data)).expect("write ubo");

        let root_signature = device
            .create_root_signature(&RootSignatureDescriptor {
                label: Some("ubo_triangle"),
                parameters: vec![RootParameter::DescriptorTable(vec![DescriptorRange {
                    resource_kind: RootResourceKind::UniformBuffer,
                    range_type: RangeType::Ubv,
                    binding: 0,
                    count: 1,
                    stages: ShaderStages::FRAGMENT,
                }])],
                ..Default::default()
            })
            .expect("create_root_signature");
        let resource_group = Arc::new(
            root_signature
                .clone()
                .create_resource_group(0, &[(0, ResourceBinding::Buffer { buffer: uniform_buffer, offset: 0, size: UBO_SIZE })])
                .expect("create_resource_group"),
        );

        let vertex_array = device
            .create_vertex_array(VertexArrayDescriptor {
                bindings: vec![VertexBinding { binding: 0, stride: 12, input_rate: VertexInputRate::Vertex }],
                vertex_buffers: vec![vertex_buffer],
                index_buffer: None,
            })
            .expect("create_vertex_array");

        let render_pass = device
            .create_render_pass(&RenderPassDescriptor {
                label: Some("main_pass"),
                color_formats: vec![swapchain.color_format()],
                color_load_ops: vec![LoadOp::Clear],
                color_store_ops: vec![StoreOp::Store],
                depth_stencil_format: None,
                depth_load_op: LoadOp::DontCare,
                depth_store_op: StoreOp::DontCare,
                sample_count: SampleCount::X1,
            })
            .expect("create_render_pass");

        let pipeline_desc = GraphicsPipelineDescriptor {
            label: Some("ubo_triangle"),
            root_signature: root_signature.clone(),
            program: GraphicsProgram::Primitive {
                vertex: ShaderStage { source: vertex_spirv(), entry_point: "main".to_string() },
                tess_ctrl: None,
                tess_eval: None,
                geometry: None,
                fragment: Some(ShaderStage { source: fragment_spirv(), entry_point: "main".to_string() }),
            },
            render_pass: render_pass.clone(),
            vertex_input: VertexInputDescriptor {
                attributes: vec![VertexAttribute { location: 0, binding: 0, format: VertexFormat::Float32x3, offset: 0 }],
                bindings: vec![VertexBinding { binding: 0, stride: 12, input_rate: VertexInputRate::Vertex }],
            },
            primitive_topology: PrimitiveTopology::TriangleList,
            rasterization: Default::default(),
            depth_stencil: None,
            color_targets: vec![ColorTargetState { format: swapchain.color_format(), blend: None }],
            sample_count: SampleCount::X1,
        };
        let pipeline = device.create_graphics_pipeline(&pipeline_desc).expect("create_graphics_pipeline");

        let sem_acquire = device.create_semaphore().expect("create_semaphore");
        let sem_render = device.create_semaphore().expect("create_semaphore");

        self.device = Some(device);
        self.swapchain = Some(swapchain);
        self.scene = Some(Scene { root_signature, pipeline, render_pass, vertex_array, resource_group, sem_acquire, sem_render });
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = winit::window::WindowAttributes::default().with_title("rhi UBO Triangle").with_inner_size(winit::dpi::LogicalSize::new(640, 480));
        let window = event_loop.create_window(attrs).expect("create window");
        self.window = Some(window);
        if let Some(ref w) = self.window {
            w.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(ref device) = self.device {
                    let _ = device.wait_idle();
                }
                self.scene = None;
                self.swapchain = None;
                self.device = None;
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                self.init_vulkan();
                if self.device.is_some() {
                    self.render();
                }
                if let Some(ref w) = self.window {
                    w.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() {
    env_logger::init();
    let mut app = App::new();
    let event_loop = EventLoop::new().expect("EventLoop::new");
    let _ = event_loop.run_app(&mut app);
}

fn vertex_spirv() -> Vec<u8> {
    let wgsl = r#"
        @vertex
        fn main(@location(0) pos: vec3<f32>) -> @builtin(position) vec4<f32> {
            return vec4<f32>(pos, 1.0);
        }
    "#;
    compile_wgsl_to_spirv(wgsl, naga::ShaderStage::Vertex)
}

fn fragment_spirv() -> Vec<u8> {
    let wgsl = r#"
        @group(0) @binding(0) var<uniform> color: vec4<f32>;
        @fragment
        fn main() -> @location(0) vec4<f32> {
            return color;
        }
    "#;
    compile_wgsl_to_spirv(wgsl, naga::ShaderStage::Fragment)
}

fn compile_wgsl_to_spirv(source: &str, stage: naga::ShaderStage) -> Vec<u8> {
    let module = naga::front::wgsl::parse_str(source).expect("parse wgsl");
    let info = naga::valid::Validator::new(naga::valid::ValidationFlags::default(), naga::valid::Capabilities::default())
        .validate(&module)
        .expect("validate");
    let options = naga::back::spv::Options::default();
    let pipeline_options = naga::back::spv::PipelineOptions { shader_stage: stage, entry_point: "main".to_string() };
    let spv = naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options)).expect("compile to spirv");
    spv.iter().flat_map(|w| w.to_le_bytes()).collect()
}

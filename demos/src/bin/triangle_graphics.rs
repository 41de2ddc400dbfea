//! Triangle graphics example: offscreen render target, a graphics
//! pipeline with an empty root signature, and a packed command buffer
//! that clears and draws a single triangle.

use rhi::command_buffer::CommandRecorder;
use rhi::{
    BufferDescriptor, BufferMemoryPreference, BufferUsage, ClearValues, ColorTargetState, CommandBuffer, DepthBias, Device, DeviceCreateParams, DrawArguments,
    GraphicsPipelineDescriptor, GraphicsProgram, LoadOp, PrimitiveTopology, RasterizationState, RenderPassDescriptor, RootSignatureDescriptor, SampleCount,
    ShaderStage, StoreOp, TextureDescriptor, TextureDimension, TextureFormat, TextureUsage, VertexArrayDescriptor, VertexAttribute, VertexBinding, VertexFormat,
    VertexInputDescriptor, VertexInputRate,
};

fn main() {
    env_logger::init();

    let device = rhi::create_device(DeviceCreateParams::default()).expect("create_device");

    let render_target = device
        .create_texture(
            &TextureDescriptor {
                label: Some("rt"),
                size: (256, 256, 1),
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
                dimension: TextureDimension::D2,
                mip_level_count: 1,
                sample_count: SampleCount::X1,
            },
            None,
        )
        .expect("create_texture");

    let vertex_buffer = device
        .create_buffer(&BufferDescriptor { label: Some("vertices"), size: 9 * 4, usage: BufferUsage::Vertex, memory: BufferMemoryPreference::HostVisible })
        .expect("create_buffer");
    device.write_buffer(vertex_buffer.as_ref(), 0, triangle_vertices()).expect("write_buffer");

    let vertex_array = device
        .create_vertex_array(VertexArrayDescriptor {
            bindings: vec![VertexBinding { binding: 0, stride: 12, input_rate: VertexInputRate::Vertex }],
            vertex_buffers: vec![vertex_buffer],
            index_buffer: None,
        })
        .expect("create_vertex_array");

    let root_signature = device.create_root_signature(&RootSignatureDescriptor::default()).expect("create_root_signature");

    let render_pass = device
        .create_render_pass(&RenderPassDescriptor {
            label: Some("triangle_pass"),
            color_formats: vec![TextureFormat::Rgba8Unorm],
            color_load_ops: vec![LoadOp::Clear],
            color_store_ops: vec![StoreOp::Store],
            depth_stencil_format: None,
            depth_load_op: LoadOp::DontCare,
            depth_store_op: StoreOp::DontCare,
            sample_count: SampleCount::X1,
        })
        .expect("create_render_pass");

    let framebuffer = device.create_framebuffer(render_pass.clone(), vec![render_target], None).expect("create_framebuffer");

    let pipeline_desc = GraphicsPipelineDescriptor {
        label: Some("triangle"),
        root_signature,
        program: GraphicsProgram::Primitive {
            vertex: ShaderStage { source: minimal_vertex_spirv(), entry_point: "main".to_string() },
            tess_ctrl: None,
            tess_eval: None,
            geometry: None,
            fragment: Some(ShaderStage { source: minimal_fragment_spirv(), entry_point: "main".to_string() }),
        },
        render_pass: render_pass.clone(),
        vertex_input: VertexInputDescriptor {
            attributes: vec![VertexAttribute { location: 0, binding: 0, format: VertexFormat::Float32x3, offset: 0 }],
            bindings: vec![VertexBinding { binding: 0, stride: 12, input_rate: VertexInputRate::Vertex }],
        },
        primitive_topology: PrimitiveTopology::TriangleList,
        rasterization: RasterizationState { depth_bias: DepthBias { constant: 0.0, clamp: 0.0, slope: 0.0 }, ..Default::default() },
        depth_stencil: None,
        color_targets: vec![ColorTargetState { format: TextureFormat::Rgba8Unorm, blend: None }],
        sample_count: SampleCount::X1,
    };
    let pipeline = device.create_graphics_pipeline(&pipeline_desc).expect("create_graphics_pipeline");

    let mut command_buffer = CommandBuffer::new();
    {
        let mut recorder = CommandRecorder::new(&mut command_buffer);
        recorder.set_graphics_pipeline_state(pipeline);
        recorder.set_graphics_vertex_array(Some(vertex_array));
        recorder.set_graphics_render_target(Some(framebuffer));
        recorder.clear_graphics(ClearValues { color: Some([0.1, 0.2, 0.4, 1.0]), depth_stencil: None });
        recorder.draw_graphics(DrawArguments { vertex_count: 3, instance_count: 1, first_vertex: 0, first_instance: 0 });
        recorder.set_graphics_render_target(None);
    }

    device.dispatch(&command_buffer).expect("dispatch");
    device.wait_idle().expect("wait_idle");

    println!("Triangle graphics API flow OK");
}

fn triangle_vertices() -> &'static [u8] {
    const VERTS: [f32; 9] = [0.0, -0.5, 0.0, 0.5, 0.5, 0.0, -0.5, 0.5, 0.0];
    bytemuck::cast_slice(&VERTS)
}

fn minimal_vertex_spirv() -> Vec<u8> {
    let wgsl = r#"
        @vertex
        fn main(@location(0) pos: vec3<f32>) -> @builtin(position) vec4<f32> {
            return vec4<f32>(pos, 1.0);
        }
    "#;
    compile_wgsl_to_spirv(wgsl, naga::ShaderStage::Vertex)
}

fn minimal_fragment_spirv() -> Vec<u8> {
    let wgsl = r#"
        @fragment
        fn main() -> @location(0) vec4<f32> {
            return vec4<f32>(1.0, 0.0, 0.0, 1.0);
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

//! Pipeline and layout construction for the wgpu backend.

pub(crate) const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct TargetInfoGpu {
    pub(crate) size: [f32; 2],
    pub(crate) _padding: [f32; 2],
}

pub(crate) struct CanvasPipelines {
    pub(crate) per_pass_layout: wgpu::BindGroupLayout,
    pub(crate) source_layout: wgpu::BindGroupLayout,
    pub(crate) shape_pipeline: wgpu::RenderPipeline,
    pub(crate) blit_pipeline: wgpu::RenderPipeline,
    pub(crate) sampler: wgpu::Sampler,
}

pub(crate) fn create_canvas_pipelines(device: &wgpu::Device) -> CanvasPipelines {
    let per_pass_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("renderer.per_pass_layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    });
    let source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("renderer.blit_source_layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    });
    let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("renderer.blit_sampler"),
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    });

    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("renderer.canvas_shapes"),
        source: wgpu::ShaderSource::Wgsl(include_str!("canvas_shapes.wgsl").into()),
    });
    let shape_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("renderer.shape_pipeline_layout"),
        bind_group_layouts: &[&per_pass_layout],
        immediate_size: 0,
    });
    let blit_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("renderer.blit_pipeline_layout"),
        bind_group_layouts: &[&per_pass_layout, &source_layout],
        immediate_size: 0,
    });
    let shape_pipeline = create_canvas_pipeline(
        device,
        &shape_layout,
        &shader,
        "fs_shape",
        "renderer.shape_pipeline",
    );
    let blit_pipeline = create_canvas_pipeline(
        device,
        &blit_layout,
        &shader,
        "fs_blit",
        "renderer.blit_pipeline",
    );

    CanvasPipelines {
        per_pass_layout,
        source_layout,
        shape_pipeline,
        blit_pipeline,
        sampler,
    }
}

fn create_canvas_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    fragment_entry: &str,
    label: &str,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(fragment_entry),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: TARGET_FORMAT,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

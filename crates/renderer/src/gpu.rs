//! wgpu implementation of [`RenderBackend`].
//!
//! Every render target is an `Rgba8Unorm` texture that can be drawn into,
//! sampled by blits and copied. The visible surface is an offscreen
//! presentation texture; embedding shells copy it out with
//! [`WgpuBackend::read_presentation`].

use std::collections::HashMap;
use std::sync::{Arc, mpsc};

use model::Rect;
use render_protocol::{Affine, DrawCommand, DrawList, RectF, RenderPass, TargetId};

use crate::backend::{BackendError, RenderBackend};
use crate::gpu_pipeline::{CanvasPipelines, TARGET_FORMAT, TargetInfoGpu, create_canvas_pipelines};
use crate::shapes::{Batch, ShapeInstanceGpu, tessellate};

const INITIAL_INSTANCE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WgpuBackendConfig {
    pub presentation_width: u32,
    pub presentation_height: u32,
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
}

impl Default for WgpuBackendConfig {
    fn default() -> Self {
        Self {
            presentation_width: 1280,
            presentation_height: 720,
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
        }
    }
}

struct GpuTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    source_bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

struct PassResources {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: CanvasPipelines,
    target_info_buffer: wgpu::Buffer,
    instance_buffer: wgpu::Buffer,
    instance_capacity: usize,
    max_texture_size: u32,
}

struct GpuContext {
    resources: PassResources,
    presentation: GpuTarget,
    device_lost: mpsc::Receiver<String>,
}

pub struct WgpuBackend {
    config: WgpuBackendConfig,
    context: Option<GpuContext>,
    targets: HashMap<TargetId, GpuTarget>,
    next_target: u64,
}

impl WgpuBackend {
    pub fn new(config: WgpuBackendConfig) -> Self {
        Self {
            config,
            context: None,
            targets: HashMap::new(),
            next_target: 0,
        }
    }

    pub fn presentation_size(&self) -> (u32, u32) {
        (
            self.config.presentation_width,
            self.config.presentation_height,
        )
    }

    /// Resizes the presentation texture; its content is lost.
    pub fn resize_presentation(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        self.config.presentation_width = width.max(1);
        self.config.presentation_height = height.max(1);
        if let Some(context) = &mut self.context {
            context.presentation = create_gpu_target(
                &context.resources,
                self.config.presentation_width,
                self.config.presentation_height,
                "renderer.presentation",
            )?;
        }
        Ok(())
    }

    /// Reads the presentation texture back as tightly packed RGBA8 rows.
    pub fn read_presentation(&self) -> Result<Vec<u8>, BackendError> {
        let context = self.context.as_ref().ok_or(BackendError::NotInitialized)?;
        let resources = &context.resources;
        let target = &context.presentation;
        let unpadded_bytes_per_row = target.width * 4;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(256) * 256;
        let readback = resources.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("renderer.presentation_readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(target.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = resources
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("renderer.presentation_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(target.height),
                },
            },
            wgpu::Extent3d {
                width: target.width,
                height: target.height,
                depth_or_array_layers: 1,
            },
        );
        resources.queue.submit(Some(encoder.finish()));

        let (sender, receiver) = mpsc::channel();
        readback
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
        resources
            .device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|error| BackendError::DeviceLost(error.to_string()))?;
        receiver
            .recv()
            .map_err(|error| BackendError::DeviceLost(error.to_string()))?
            .map_err(|error| BackendError::DeviceLost(error.to_string()))?;

        let mapped = readback.slice(..).get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * target.height) as usize);
        for row in mapped.chunks(padded_bytes_per_row as usize) {
            pixels.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
        }
        drop(mapped);
        readback.unmap();
        Ok(pixels)
    }

    fn context_mut(&mut self) -> Result<&mut GpuContext, BackendError> {
        let context = self.context.as_mut().ok_or(BackendError::NotInitialized)?;
        if let Ok(message) = context.device_lost.try_recv() {
            return Err(BackendError::DeviceLost(message));
        }
        Ok(context)
    }
}

fn create_gpu_target(
    resources: &PassResources,
    width: u32,
    height: u32,
    label: &str,
) -> Result<GpuTarget, BackendError> {
    let max = resources.max_texture_size;
    if width == 0 || height == 0 || width > max || height > max {
        return Err(BackendError::TargetTooLarge { width, height, max });
    }
    let texture = resources.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let source_bind_group = resources
        .device
        .create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("renderer.blit_source"),
            layout: &resources.pipelines.source_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&resources.pipelines.sampler),
                },
            ],
        });
    Ok(GpuTarget {
        texture,
        view,
        source_bind_group,
        width,
        height,
    })
}

fn create_instance_buffer(device: &wgpu::Device, capacity: usize) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("renderer.shape_instances"),
        size: (capacity.max(1) * std::mem::size_of::<ShapeInstanceGpu>()) as u64,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Clamps a scissor to the target; `None` when nothing is left.
fn clamp_scissor(scissor: Option<Rect>, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let full = Rect::new(
        0,
        0,
        i32::try_from(width).unwrap_or(i32::MAX),
        i32::try_from(height).unwrap_or(i32::MAX),
    );
    let rect = match scissor {
        Some(scissor) => scissor.intersection(&full),
        None => full,
    };
    if rect.is_empty() {
        return None;
    }
    Some((
        rect.x as u32,
        rect.y as u32,
        rect.width as u32,
        rect.height as u32,
    ))
}

struct PassTarget<'a> {
    view: &'a wgpu::TextureView,
    id: Option<TargetId>,
    width: u32,
    height: u32,
}

fn encode_pass(
    resources: &mut PassResources,
    targets: &HashMap<TargetId, GpuTarget>,
    target: PassTarget<'_>,
    transform: Affine,
    scissor: Option<Rect>,
    clear: Option<render_protocol::Color>,
    commands: &[DrawCommand],
) {
    let scissor = clamp_scissor(scissor, target.width, target.height);
    let clip = scissor.map(|(x, y, width, height)| {
        RectF::new(x as f32, y as f32, width as f32, height as f32)
    });
    let tessellation = match clip {
        Some(clip) => tessellate(commands, transform, Some(clip), |source| {
            if Some(source) == target.id {
                return None;
            }
            targets.get(&source).map(|gpu| (gpu.width, gpu.height))
        }),
        None => Default::default(),
    };

    if tessellation.instances.len() > resources.instance_capacity {
        let capacity = tessellation.instances.len().next_power_of_two();
        resources.instance_buffer = create_instance_buffer(&resources.device, capacity);
        resources.instance_capacity = capacity;
        tracing::debug!(capacity, "grew shape instance buffer");
    }
    if !tessellation.instances.is_empty() {
        resources.queue.write_buffer(
            &resources.instance_buffer,
            0,
            bytemuck::cast_slice(&tessellation.instances),
        );
    }
    resources.queue.write_buffer(
        &resources.target_info_buffer,
        0,
        bytemuck::bytes_of(&TargetInfoGpu {
            size: [target.width as f32, target.height as f32],
            _padding: [0.0; 2],
        }),
    );
    let per_pass_bind_group = resources
        .device
        .create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("renderer.per_pass"),
            layout: &resources.pipelines.per_pass_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: resources.target_info_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: resources.instance_buffer.as_entire_binding(),
                },
            ],
        });

    let load = match clear {
        Some(color) => wgpu::LoadOp::Clear(wgpu::Color {
            r: f64::from(color.r),
            g: f64::from(color.g),
            b: f64::from(color.b),
            a: f64::from(color.a),
        }),
        None => wgpu::LoadOp::Load,
    };
    let mut encoder = resources
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("renderer.pass_encoder"),
        });
    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("renderer.canvas_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.view,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        if let Some((x, y, width, height)) = scissor {
            pass.set_scissor_rect(x, y, width, height);
            pass.set_bind_group(0, &per_pass_bind_group, &[]);
            for batch in &tessellation.batches {
                match batch {
                    Batch::Shapes(range) => {
                        pass.set_pipeline(&resources.pipelines.shape_pipeline);
                        pass.draw(0..6, range.clone());
                    }
                    Batch::Blit { source, instance } => {
                        let Some(source) = targets.get(source) else {
                            continue;
                        };
                        pass.set_pipeline(&resources.pipelines.blit_pipeline);
                        pass.set_bind_group(1, &source.source_bind_group, &[]);
                        pass.draw(0..6, *instance..*instance + 1);
                    }
                }
            }
        }
    }
    resources.queue.submit(Some(encoder.finish()));
}

impl RenderBackend for WgpuBackend {
    fn initialize(&mut self) -> Result<(), BackendError> {
        if self.context.is_some() {
            return Ok(());
        }
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: self.config.power_preference,
            compatible_surface: None,
            force_fallback_adapter: self.config.force_fallback_adapter,
        }))
        .map_err(|error| BackendError::Adapter(error.to_string()))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("renderer.device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|error| BackendError::Device(error.to_string()))?;

        let (device_lost_sender, device_lost) = mpsc::channel();
        device.set_device_lost_callback(move |reason, message| {
            let _ = device_lost_sender.send(format!("{reason:?}: {message}"));
        });
        device.on_uncaptured_error(Arc::new(move |error| {
            tracing::error!(%error, "uncaptured wgpu error");
        }));

        let pipelines = create_canvas_pipelines(&device);
        let target_info_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("renderer.target_info"),
            size: std::mem::size_of::<TargetInfoGpu>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let instance_buffer = create_instance_buffer(&device, INITIAL_INSTANCE_CAPACITY);
        let max_texture_size = device.limits().max_texture_dimension_2d;
        let resources = PassResources {
            device,
            queue,
            pipelines,
            target_info_buffer,
            instance_buffer,
            instance_capacity: INITIAL_INSTANCE_CAPACITY,
            max_texture_size,
        };
        let presentation = create_gpu_target(
            &resources,
            self.config.presentation_width,
            self.config.presentation_height,
            "renderer.presentation",
        )?;
        tracing::info!(
            adapter = %adapter.get_info().name,
            max_texture_size,
            "render context initialized"
        );
        self.context = Some(GpuContext {
            resources,
            presentation,
            device_lost,
        });
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    fn teardown(&mut self) {
        self.targets.clear();
        if self.context.take().is_some() {
            tracing::debug!("render context torn down");
        }
    }

    fn create_target(&mut self, width: u32, height: u32) -> Result<TargetId, BackendError> {
        let context = self.context_mut()?;
        let target = create_gpu_target(&context.resources, width, height, "renderer.target")?;
        self.next_target += 1;
        let id = TargetId(self.next_target);
        self.targets.insert(id, target);
        Ok(id)
    }

    fn destroy_target(&mut self, target: TargetId) {
        self.targets.remove(&target);
    }

    fn draw(&mut self, pass: &RenderPass) -> Result<(), BackendError> {
        let Self {
            context, targets, ..
        } = self;
        let context = context.as_mut().ok_or(BackendError::NotInitialized)?;
        let target = targets
            .get(&pass.target)
            .ok_or(BackendError::UnknownTarget(pass.target))?;
        encode_pass(
            &mut context.resources,
            targets,
            PassTarget {
                view: &target.view,
                id: Some(pass.target),
                width: target.width,
                height: target.height,
            },
            pass.transform,
            pass.scissor,
            pass.clear,
            pass.commands.commands(),
        );
        Ok(())
    }

    fn composite(
        &mut self,
        source: TargetId,
        destination: TargetId,
        region: Rect,
    ) -> Result<(), BackendError> {
        let Self {
            context, targets, ..
        } = self;
        let context = context.as_mut().ok_or(BackendError::NotInitialized)?;
        let source_target = targets
            .get(&source)
            .ok_or(BackendError::UnknownTarget(source))?;
        let destination_target = targets
            .get(&destination)
            .ok_or(BackendError::UnknownTarget(destination))?;
        let Some((x, y, width, height)) = clamp_scissor(
            Some(region),
            source_target.width.min(destination_target.width),
            source_target.height.min(destination_target.height),
        ) else {
            return Ok(());
        };
        let resources = &context.resources;
        let mut encoder = resources
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("renderer.composite_encoder"),
            });
        let origin = wgpu::Origin3d { x, y, z: 0 };
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &source_target.texture,
                mip_level: 0,
                origin,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &destination_target.texture,
                mip_level: 0,
                origin,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        resources.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn present(
        &mut self,
        source: TargetId,
        overlay: &DrawList,
        pixel_scale: f32,
    ) -> Result<(), BackendError> {
        self.context_mut()?;
        let Self {
            context, targets, ..
        } = self;
        let context = context.as_mut().ok_or(BackendError::NotInitialized)?;
        if !targets.contains_key(&source) {
            return Err(BackendError::UnknownTarget(source));
        }
        let pixel_scale = if pixel_scale > 0.0 { pixel_scale } else { 1.0 };
        let presentation = &context.presentation;
        let mut commands = Vec::with_capacity(overlay.len() + 1);
        commands.push(DrawCommand::Blit {
            source,
            source_rect: None,
            dest: RectF::new(
                0.0,
                0.0,
                presentation.width as f32 / pixel_scale,
                presentation.height as f32 / pixel_scale,
            ),
        });
        commands.extend(overlay.commands().iter().cloned());
        encode_pass(
            &mut context.resources,
            targets,
            PassTarget {
                view: &presentation.view,
                id: None,
                width: presentation.width,
                height: presentation.height,
            },
            Affine::scale(pixel_scale),
            None,
            Some(render_protocol::Color::TRANSPARENT),
            &commands,
        );
        Ok(())
    }
}

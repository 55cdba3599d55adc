//! wgpu implementation of [`RenderDriver`].
//!
//! Owns every GPU resource behind the driver handles. Objects share one
//! dynamic uniform buffer, one 256-byte slot per draw. The frame is drawn to
//! whatever view the host set with [`GpuRenderer::set_output`].

use std::collections::HashMap;
use std::iter;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::error::GpuError;
use crate::gpu::driver::{
    BufferId, DrawStyle, FrameScene, GeometryData, GeometryId, MaskGeometry, MaskTopology, ProgramId,
    RenderDriver, RenderTargetId,
};
use crate::gpu::mesh::{QUAD_CORNERS, QUAD_INDICES};
use crate::gpu::pipeline::{self, DEPTH_FORMAT, TARGET_FORMAT};
use crate::gpu::readback::{self, PendingReadback};
use crate::particle::{ParticleSeed, ParticleUniforms};

/// Maximum number of object draws per frame.
/// Each draw needs its own slot in the dynamic uniform buffer.
pub const MAX_OBJECT_DRAWS: usize = 256;

/// Uniform buffer alignment (WebGPU minUniformBufferOffsetAlignment is typically 256 bytes)
const UNIFORM_ALIGNMENT: usize = 256;

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct ObjectUniforms {
    view_proj: [[f32; 4]; 4],
    model: [[f32; 4]; 4],
    camera_position: [f32; 4],
    style: [f32; 4],
    viewport: [f32; 4],
    // 176 bytes of data + 80 bytes padding
    _padding: [f32; 20],
}

impl ObjectUniforms {
    fn new(scene: &FrameScene, model: glam::Mat4, style: DrawStyle, viewport: (u32, u32)) -> Self {
        let style = match style {
            DrawStyle::Points {
                opacity,
                brightness,
                point_size,
            } => [opacity, brightness, point_size, 0.0],
            DrawStyle::Surface { alpha, reflective } => [alpha, 1.0, 0.0, if reflective { 1.0 } else { 0.0 }],
        };
        Self {
            view_proj: scene.view_proj.to_cols_array_2d(),
            model: model.to_cols_array_2d(),
            camera_position: scene.camera_position.extend(1.0).to_array(),
            style,
            viewport: [viewport.0 as f32, viewport.1 as f32, 0.0, 0.0],
            _padding: [0.0; 20],
        }
    }
}

struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct SeedBuffer {
    buffer: wgpu::Buffer,
    count: u32,
}

struct ParticleProgram {
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

enum GpuGeometry {
    Points {
        buffer: wgpu::Buffer,
        count: u32,
    },
    Triangles {
        vertex_buffer: wgpu::Buffer,
        index_buffer: wgpu::Buffer,
        index_count: u32,
    },
}

struct Output {
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

pub struct GpuRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    output_format: wgpu::TextureFormat,
    output: Option<Output>,
    depth: Option<(wgpu::TextureView, u32, u32)>,
    next_handle: u64,

    targets: HashMap<RenderTargetId, RenderTarget>,
    seed_buffers: HashMap<BufferId, SeedBuffer>,
    programs: HashMap<ProgramId, ParticleProgram>,
    geometries: HashMap<GeometryId, GpuGeometry>,

    object_uniform_buffer: wgpu::Buffer,
    object_bind_group: wgpu::BindGroup,
    point_cloud_pipeline: wgpu::RenderPipeline,
    mesh_pipeline: wgpu::RenderPipeline,

    mask_uniform_buffer: wgpu::Buffer,
    mask_bind_group: wgpu::BindGroup,
    mask_triangle_pipeline: wgpu::RenderPipeline,
    mask_point_pipeline: wgpu::RenderPipeline,

    texture_bind_group_layout: wgpu::BindGroupLayout,
    texture_sampler: wgpu::Sampler,
    edge_pipeline: wgpu::RenderPipeline,
    overlay_pipeline: wgpu::RenderPipeline,

    particle_bind_group_layout: wgpu::BindGroupLayout,
    particle_pipeline: wgpu::RenderPipeline,

    quad_vertex_buffer: wgpu::Buffer,
    quad_index_buffer: wgpu::Buffer,
}

fn uniform_entry(binding: u32, dynamic: bool, min_size: Option<wgpu::BufferSize>) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: min_size,
        },
        count: None,
    }
}

impl GpuRenderer {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, output_format: wgpu::TextureFormat) -> Self {
        // === Objects ===
        let object_size = std::mem::size_of::<ObjectUniforms>() as u64;
        let object_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[uniform_entry(0, true, wgpu::BufferSize::new(object_size))],
            label: Some("object_bind_group_layout"),
        });

        let object_uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Object Uniform Buffer"),
            size: (MAX_OBJECT_DRAWS * UNIFORM_ALIGNMENT) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let object_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &object_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &object_uniform_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(object_size),
                }),
            }],
            label: Some("object_bind_group"),
        });

        let object_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Object Pipeline Layout"),
            bind_group_layouts: &[&object_bind_group_layout],
            push_constant_ranges: &[],
        });

        let point_cloud_pipeline = pipeline::create_point_cloud_pipeline(&device, &object_pipeline_layout, output_format);
        let mesh_pipeline = pipeline::create_mesh_pipeline(&device, &object_pipeline_layout, output_format);

        // === Mask ===
        let mask_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[uniform_entry(0, false, None)],
            label: Some("mask_bind_group_layout"),
        });

        let mask_uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mask Uniform Buffer"),
            contents: bytemuck::cast_slice(&glam::Mat4::IDENTITY.to_cols_array()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let mask_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &mask_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: mask_uniform_buffer.as_entire_binding(),
            }],
            label: Some("mask_bind_group"),
        });

        let mask_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mask Pipeline Layout"),
            bind_group_layouts: &[&mask_bind_group_layout],
            push_constant_ranges: &[],
        });

        let mask_triangle_pipeline = pipeline::create_mask_pipeline(&device, &mask_pipeline_layout, MaskTopology::Triangles);
        let mask_point_pipeline = pipeline::create_mask_pipeline(&device, &mask_pipeline_layout, MaskTopology::Points);

        // === Edges and overlay ===
        let texture_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
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
            label: Some("texture_bind_group_layout"),
        });

        let texture_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Edge Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let texture_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Edge Pipeline Layout"),
            bind_group_layouts: &[&texture_bind_group_layout],
            push_constant_ranges: &[],
        });

        let edge_pipeline = pipeline::create_edge_pipeline(&device, &texture_pipeline_layout);
        let overlay_pipeline = pipeline::create_overlay_pipeline(&device, &texture_pipeline_layout, output_format);

        // === Particles ===
        let particle_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[uniform_entry(0, false, None)],
            label: Some("particle_bind_group_layout"),
        });

        let particle_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Edge Particle Pipeline Layout"),
            bind_group_layouts: &[&particle_bind_group_layout],
            push_constant_ranges: &[],
        });

        let particle_pipeline = pipeline::create_particle_pipeline(&device, &particle_pipeline_layout, output_format);

        // Billboard quad shared by point clouds and particles
        let quad_vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Billboard Quad Vertex Buffer"),
            contents: bytemuck::cast_slice(&QUAD_CORNERS),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let quad_index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Billboard Quad Index Buffer"),
            contents: bytemuck::cast_slice(&QUAD_INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        Self {
            device,
            queue,
            output_format,
            output: None,
            depth: None,
            next_handle: 0,
            targets: HashMap::new(),
            seed_buffers: HashMap::new(),
            programs: HashMap::new(),
            geometries: HashMap::new(),
            object_uniform_buffer,
            object_bind_group,
            point_cloud_pipeline,
            mesh_pipeline,
            mask_uniform_buffer,
            mask_bind_group,
            mask_triangle_pipeline,
            mask_point_pipeline,
            texture_bind_group_layout,
            texture_sampler,
            edge_pipeline,
            overlay_pipeline,
            particle_bind_group_layout,
            particle_pipeline,
            quad_vertex_buffer,
            quad_index_buffer,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn output_format(&self) -> wgpu::TextureFormat {
        self.output_format
    }

    /// View the next `draw_frame` renders into.
    pub fn set_output(&mut self, view: wgpu::TextureView, width: u32, height: u32) {
        self.output = Some(Output { view, width, height });
    }

    pub fn clear_output(&mut self) {
        self.output = None;
    }

    /// Live resource counts: targets, seed buffers, programs, geometries.
    pub fn resource_counts(&self) -> (usize, usize, usize, usize) {
        (self.targets.len(), self.seed_buffers.len(), self.programs.len(), self.geometries.len())
    }

    fn next_id(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn target(&self, id: RenderTargetId) -> Result<&RenderTarget, GpuError> {
        self.targets.get(&id).ok_or(GpuError::UnknownHandle {
            kind: "render target",
            id: id.0,
        })
    }

    fn ensure_depth(&mut self, width: u32, height: u32) {
        let stale = !matches!(&self.depth, Some((_, w, h)) if *w == width && *h == height);
        if stale {
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Depth Texture"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: DEPTH_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.depth = Some((view, width, height));
        }
    }

    fn overlay_bind_group(&self, id: RenderTargetId) -> Option<wgpu::BindGroup> {
        let target = self.targets.get(&id)?;
        Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.texture_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&target.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.texture_sampler),
                },
            ],
            label: Some("overlay_bind_group"),
        }))
    }
}

impl RenderDriver for GpuRenderer {
    type Readback = PendingReadback;

    fn create_render_target(&mut self, width: u32, height: u32, label: &str) -> Result<RenderTargetId, GpuError> {
        if width == 0 || height == 0 {
            return Err(GpuError::Resource(format!("render target '{}' has zero size", label)));
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
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
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = RenderTargetId(self.next_id());
        self.targets.insert(id, RenderTarget { texture, view });
        log::debug!("Created render target {:?} '{}' {}x{}", id, label, width, height);
        Ok(id)
    }

    fn destroy_render_target(&mut self, id: RenderTargetId) {
        if let Some(target) = self.targets.remove(&id) {
            target.texture.destroy();
        }
    }

    fn create_particle_buffer(&mut self, seeds: &[ParticleSeed]) -> Result<BufferId, GpuError> {
        if seeds.is_empty() {
            return Err(GpuError::Resource("particle buffer needs at least one seed".into()));
        }
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Particle Seed Buffer"),
            contents: bytemuck::cast_slice(seeds),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let id = BufferId(self.next_id());
        self.seed_buffers.insert(
            id,
            SeedBuffer {
                buffer,
                count: seeds.len() as u32,
            },
        );
        Ok(id)
    }

    fn destroy_particle_buffer(&mut self, id: BufferId) {
        if let Some(seeds) = self.seed_buffers.remove(&id) {
            seeds.buffer.destroy();
        }
    }

    fn create_particle_program(&mut self, uniforms: &ParticleUniforms) -> Result<ProgramId, GpuError> {
        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Particle Uniform Buffer"),
            contents: bytemuck::bytes_of(uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.particle_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
            label: Some("particle_bind_group"),
        });
        let id = ProgramId(self.next_id());
        self.programs.insert(id, ParticleProgram { uniform_buffer, bind_group });
        Ok(id)
    }

    fn update_particle_program(&mut self, id: ProgramId, uniforms: &ParticleUniforms) -> Result<(), GpuError> {
        let program = self.programs.get(&id).ok_or(GpuError::UnknownHandle {
            kind: "particle program",
            id: id.0,
        })?;
        self.queue.write_buffer(&program.uniform_buffer, 0, bytemuck::bytes_of(uniforms));
        Ok(())
    }

    fn destroy_particle_program(&mut self, id: ProgramId) {
        if let Some(program) = self.programs.remove(&id) {
            program.uniform_buffer.destroy();
        }
    }

    fn upload_geometry(&mut self, data: GeometryData<'_>) -> Result<GeometryId, GpuError> {
        let geometry = match data {
            GeometryData::Points(vertices) => {
                if vertices.is_empty() {
                    return Err(GpuError::Resource("point cloud has no vertices".into()));
                }
                let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Point Cloud Vertex Buffer"),
                    contents: bytemuck::cast_slice(vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                });
                GpuGeometry::Points {
                    buffer,
                    count: vertices.len() as u32,
                }
            }
            GeometryData::Triangles { vertices, indices } => {
                if vertices.is_empty() || indices.is_empty() {
                    return Err(GpuError::Resource("mesh has no triangles".into()));
                }
                let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Mesh Vertex Buffer"),
                    contents: bytemuck::cast_slice(vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                });
                let index_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Mesh Index Buffer"),
                    contents: bytemuck::cast_slice(indices),
                    usage: wgpu::BufferUsages::INDEX,
                });
                GpuGeometry::Triangles {
                    vertex_buffer,
                    index_buffer,
                    index_count: indices.len() as u32,
                }
            }
        };
        let id = GeometryId(self.next_id());
        self.geometries.insert(id, geometry);
        Ok(id)
    }

    fn release_geometry(&mut self, id: GeometryId) {
        match self.geometries.remove(&id) {
            Some(GpuGeometry::Points { buffer, .. }) => buffer.destroy(),
            Some(GpuGeometry::Triangles {
                vertex_buffer,
                index_buffer,
                ..
            }) => {
                vertex_buffer.destroy();
                index_buffer.destroy();
            }
            None => {}
        }
    }

    fn render_mask(&mut self, target: RenderTargetId, mask: &MaskGeometry, view_proj: glam::Mat4) -> Result<(), GpuError> {
        let view = &self.target(target)?.view;
        self.queue
            .write_buffer(&self.mask_uniform_buffer, 0, bytemuck::cast_slice(&view_proj.to_cols_array()));

        let buffers = if mask.is_empty() {
            None
        } else {
            let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mask Vertex Buffer"),
                contents: bytemuck::cast_slice(&mask.positions),
                usage: wgpu::BufferUsages::VERTEX,
            });
            let index_buffer = (mask.topology == MaskTopology::Triangles && !mask.indices.is_empty()).then(|| {
                self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Mask Index Buffer"),
                    contents: bytemuck::cast_slice(&mask.indices),
                    usage: wgpu::BufferUsages::INDEX,
                })
            });
            Some((vertex_buffer, index_buffer))
        };

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Mask Encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Mask Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some((vertex_buffer, index_buffer)) = &buffers {
                let pipeline = match mask.topology {
                    MaskTopology::Triangles => &self.mask_triangle_pipeline,
                    MaskTopology::Points => &self.mask_point_pipeline,
                };
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &self.mask_bind_group, &[]);
                pass.set_vertex_buffer(0, vertex_buffer.slice(..));
                match index_buffer {
                    Some(index_buffer) => {
                        pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed(0..mask.indices.len() as u32, 0, 0..1);
                    }
                    None => pass.draw(0..mask.positions.len() as u32, 0..1),
                }
            }
        }
        self.queue.submit(iter::once(encoder.finish()));
        Ok(())
    }

    fn render_edges(&mut self, mask: RenderTargetId, target: RenderTargetId) -> Result<(), GpuError> {
        let source = self.target(mask)?;
        let destination = self.target(target)?;

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.texture_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.texture_sampler),
                },
            ],
            label: Some("edge_bind_group"),
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Edge Encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Edge Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &destination.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.edge_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(iter::once(encoder.finish()));
        Ok(())
    }

    fn read_pixels(&mut self, target: RenderTargetId) -> Result<PendingReadback, GpuError> {
        let texture = &self.target(target)?.texture;
        Ok(readback::start_readback(&self.device, &self.queue, texture, true))
    }

    fn draw_frame(&mut self, scene: &FrameScene) -> Result<(), GpuError> {
        let (width, height) = match &self.output {
            Some(output) => (output.width, output.height),
            None => return Err(GpuError::NoOutput),
        };
        if scene.objects.len() > MAX_OBJECT_DRAWS {
            return Err(GpuError::DrawLimit {
                count: scene.objects.len(),
                limit: MAX_OBJECT_DRAWS,
            });
        }

        // One aligned uniform slot per object draw
        let mut staging = vec![0u8; scene.objects.len() * UNIFORM_ALIGNMENT];
        for (i, draw) in scene.objects.iter().enumerate() {
            let uniforms = ObjectUniforms::new(scene, draw.model, draw.style, (width, height));
            let start = i * UNIFORM_ALIGNMENT;
            staging[start..start + std::mem::size_of::<ObjectUniforms>()].copy_from_slice(bytemuck::bytes_of(&uniforms));
        }
        if !staging.is_empty() {
            self.queue.write_buffer(&self.object_uniform_buffer, 0, &staging);
        }

        let overlay = scene.debug_overlay.and_then(|id| self.overlay_bind_group(id));
        self.ensure_depth(width, height);

        let (output, depth) = match (&self.output, &self.depth) {
            (Some(output), Some((depth, _, _))) => (output, depth),
            _ => return Err(GpuError::NoOutput),
        };
        let [r, g, b, a] = scene.clear_color;

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Frame Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: r as f64,
                            g: g as f64,
                            b: b as f64,
                            a: a as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for (i, draw) in scene.objects.iter().enumerate() {
                let Some(geometry) = self.geometries.get(&draw.geometry) else {
                    log::warn!("Skipping draw of unknown geometry {:?}", draw.geometry);
                    continue;
                };
                let offset = (i * UNIFORM_ALIGNMENT) as u32;
                match geometry {
                    GpuGeometry::Points { buffer, count } => {
                        pass.set_pipeline(&self.point_cloud_pipeline);
                        pass.set_bind_group(0, &self.object_bind_group, &[offset]);
                        pass.set_vertex_buffer(0, self.quad_vertex_buffer.slice(..));
                        pass.set_vertex_buffer(1, buffer.slice(..));
                        pass.set_index_buffer(self.quad_index_buffer.slice(..), wgpu::IndexFormat::Uint16);
                        pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..*count);
                    }
                    GpuGeometry::Triangles {
                        vertex_buffer,
                        index_buffer,
                        index_count,
                    } => {
                        pass.set_pipeline(&self.mesh_pipeline);
                        pass.set_bind_group(0, &self.object_bind_group, &[offset]);
                        pass.set_vertex_buffer(0, vertex_buffer.slice(..));
                        pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed(0..*index_count, 0, 0..1);
                    }
                }
            }

            if !scene.particles.is_empty() {
                pass.set_pipeline(&self.particle_pipeline);
                pass.set_vertex_buffer(0, self.quad_vertex_buffer.slice(..));
                pass.set_index_buffer(self.quad_index_buffer.slice(..), wgpu::IndexFormat::Uint16);
                for draw in &scene.particles {
                    let (Some(program), Some(seeds)) = (self.programs.get(&draw.program), self.seed_buffers.get(&draw.buffer)) else {
                        log::warn!("Skipping particle draw with released resources");
                        continue;
                    };
                    pass.set_bind_group(0, &program.bind_group, &[]);
                    pass.set_vertex_buffer(1, seeds.buffer.slice(..));
                    pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..draw.instance_count.min(seeds.count));
                }
            }

            if let Some(bind_group) = &overlay {
                // Top-right quarter of the frame
                let (w, h) = (width as f32 * 0.25, height as f32 * 0.25);
                pass.set_viewport(width as f32 - w, 0.0, w, h, 0.0, 1.0);
                pass.set_pipeline(&self.overlay_pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
        self.queue.submit(iter::once(encoder.finish()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_uniforms_fill_one_slot() {
        assert_eq!(std::mem::size_of::<ObjectUniforms>(), UNIFORM_ALIGNMENT);
    }

    #[test]
    fn test_particle_uniforms_size() {
        assert_eq!(std::mem::size_of::<ParticleUniforms>(), 128);
    }
}

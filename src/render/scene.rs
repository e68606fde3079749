//! Resources shared by the terrain, grass and model passes: the scene uniform
//! buffer, the heightmap texture and the two render bind group layouts.

use std::num::NonZeroU64;

use crate::constants::DEPTH_FORMAT;
use crate::core::uniforms::SceneUniforms;
use crate::render::gpu::{GpuContext, storage_layout_entry, uniform_layout_entry};

pub const SCENE_COMMON_WGSL: &str = include_str!("../shaders/scene_common.wgsl");
pub const HEIGHTMAP_WGSL: &str = include_str!("../shaders/heightmap.wgsl");

pub struct SceneResources {
    pub uniform_buffer: wgpu::Buffer,
    pub heightmap: wgpu::Texture,
    pub heightmap_view: wgpu::TextureView,
    pub heightmap_resolution: u32,
    /// scene (0), heightmap (1), per-instance offsets (2)
    pub heightmapped_layout: wgpu::BindGroupLayout,
    /// scene (0), per-instance transforms (1)
    pub model_layout: wgpu::BindGroupLayout,
}

impl SceneResources {
    /// Uploads `heights` (row-major, `resolution` x `resolution`, values in [0, 1]).
    pub fn new(ctx: &GpuContext, heights: &[f32], resolution: u32) -> Self {
        let device = &ctx.device;
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Scene Uniform Buffer"),
            size: std::mem::size_of::<SceneUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let size = wgpu::Extent3d {
            width: resolution,
            height: resolution,
            depth_or_array_layers: 1,
        };
        let heightmap = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Heightmap"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &heightmap,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(heights),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(resolution * 4),
                rows_per_image: Some(resolution),
            },
            size,
        );
        let heightmap_view = heightmap.create_view(&wgpu::TextureViewDescriptor::default());

        let vertex_fragment = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let heightmapped_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Heightmapped Bind Group Layout"),
            entries: &[
                uniform_layout_entry(0, vertex_fragment),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                storage_layout_entry(2, wgpu::ShaderStages::VERTEX, true),
            ],
        });

        let model_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Model Bind Group Layout"),
            entries: &[
                uniform_layout_entry(0, vertex_fragment),
                storage_layout_entry(1, wgpu::ShaderStages::VERTEX, true),
            ],
        });

        Self {
            uniform_buffer,
            heightmap,
            heightmap_view,
            heightmap_resolution: resolution,
            heightmapped_layout,
            model_layout,
        }
    }

    pub fn write_uniforms(&self, queue: &wgpu::Queue, uniforms: &SceneUniforms) {
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));
    }

    /// Bind group for a heightmapped pass reading instance offsets from
    /// `instances` starting at byte `offset` (`size` bytes, or the rest).
    pub fn heightmapped_bind_group(
        &self,
        ctx: &GpuContext,
        label: &'static str,
        instances: &wgpu::Buffer,
        offset: u64,
        size: Option<NonZeroU64>,
    ) -> wgpu::BindGroup {
        ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.heightmapped_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&self.heightmap_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: instances,
                        offset,
                        size,
                    }),
                },
            ],
        })
    }

    pub fn model_bind_group(&self, ctx: &GpuContext, label: &'static str, transforms: &wgpu::Buffer) -> wgpu::BindGroup {
        ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.model_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: transforms.as_entire_binding(),
                },
            ],
        })
    }
}

pub struct ScenePipelineDesc<'a> {
    pub label: &'static str,
    pub source: String,
    pub layout: &'a wgpu::BindGroupLayout,
    pub vs_entry: &'static str,
    pub fs_entry: &'static str,
    pub vertex_layout: wgpu::VertexBufferLayout<'static>,
    pub color_format: wgpu::TextureFormat,
    pub blend: wgpu::BlendState,
    pub cull_mode: Option<wgpu::Face>,
    pub depth_write: bool,
}

pub fn create_scene_pipeline(ctx: &GpuContext, desc: &ScenePipelineDesc<'_>) -> wgpu::RenderPipeline {
    let device = &ctx.device;
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(desc.label),
        source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(desc.label),
        bind_group_layouts: &[desc.layout],
        immediate_size: 0,
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(desc.label),
        layout: Some(&pipeline_layout),
        cache: None,
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some(desc.vs_entry),
            compilation_options: Default::default(),
            buffers: &[desc.vertex_layout.clone()],
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some(desc.fs_entry),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: desc.color_format,
                blend: Some(desc.blend),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: desc.cull_mode,
            ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: desc.depth_write,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview_mask: None,
    })
}

//! GPU Indirect Draw Coordinator
//!
//! Feeds culler counters into indexed indirect draw arguments without a CPU
//! round trip. Each argument record is prepared once from a template and only
//! its `instance_count` field is rewritten by the transfer kernel per frame.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::render::culler::{CountReady, CullPass, CullerId, VisibilityCuller};
use crate::render::gpu::{GpuContext, storage_layout_entry};

/// wgpu DrawIndexedIndirect command structure (matches GPU layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirect {
    /// Number of indices to draw
    pub index_count: u32,
    /// Number of instances to draw, written by the transfer kernel
    pub instance_count: u32,
    /// First index in the index buffer
    pub first_index: u32,
    /// Value added to vertex indices before indexing into vertex buffer
    pub base_vertex: i32,
    /// First instance to draw (always 0)
    pub first_instance: u32,
}

const _: () = assert!(std::mem::size_of::<DrawIndexedIndirect>() == 20);
const _: () = assert!(std::mem::offset_of!(DrawIndexedIndirect, instance_count) == 4);

impl DrawIndexedIndirect {
    pub fn new(index_count: u32, first_index: u32, base_vertex: i32) -> Self {
        Self {
            index_count,
            instance_count: 0,
            first_index,
            base_vertex,
            first_instance: 0,
        }
    }
}

/// Which counter of a culler feeds an argument record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterSlot {
    Primary,
    /// Grass LOD partition
    Secondary,
}

/// One indirect argument record bound to one culler counter.
pub struct IndirectArgs {
    source: CullerId,
    source_label: &'static str,
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    slot: CounterSlot,
    template: DrawIndexedIndirect,
}

impl IndirectArgs {
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Culler whose counter feeds this record.
    pub fn source(&self) -> CullerId {
        self.source
    }

    pub fn slot(&self) -> CounterSlot {
        self.slot
    }

    pub fn template(&self) -> &DrawIndexedIndirect {
        &self.template
    }
}

pub struct IndirectDrawCoordinator {
    layout: wgpu::BindGroupLayout,
    primary_pipeline: wgpu::ComputePipeline,
    secondary_pipeline: wgpu::ComputePipeline,
}

impl IndirectDrawCoordinator {
    pub fn new(ctx: &GpuContext) -> Self {
        let device = &ctx.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Count Transfer Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/transfer.wgsl").into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Count Transfer Bind Group Layout"),
            entries: &[
                // Counter block (read)
                storage_layout_entry(0, wgpu::ShaderStages::COMPUTE, true),
                // Draw arguments (write)
                storage_layout_entry(1, wgpu::ShaderStages::COMPUTE, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Count Transfer Pipeline Layout"),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });

        let make_pipeline = |entry_point: &'static str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        Self {
            primary_pipeline: make_pipeline("transfer_primary"),
            secondary_pipeline: make_pipeline("transfer_secondary"),
            layout,
        }
    }

    /// Prepares an argument record from `template` (its `instance_count` is
    /// forced to 0) and binds it to `slot` of `culler`'s counter.
    pub fn create_args(
        &self,
        ctx: &GpuContext,
        label: &'static str,
        culler: &VisibilityCuller,
        template: DrawIndexedIndirect,
        slot: CounterSlot,
    ) -> IndirectArgs {
        let template = DrawIndexedIndirect {
            instance_count: 0,
            ..template
        };
        let buffer = ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(&template),
            usage: wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        });

        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: culler.counter_buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffer.as_entire_binding(),
                },
            ],
        });

        IndirectArgs {
            source: culler.id(),
            source_label: culler.label(),
            buffer,
            bind_group,
            slot,
            template,
        }
    }

    /// Records the counter -> `instance_count` copy. Only callable once the
    /// culler's dispatch for this frame has been recorded.
    ///
    /// Panics when `pass` belongs to a different culler than the one `args`
    /// was created for.
    pub fn send_instance_count<S: CountReady>(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &CullPass<'_, S>,
        args: &IndirectArgs,
    ) {
        assert_same_source(args.source, args.source_label, pass.culler().id(), pass.culler().label());
        debug_assert!(
            args.slot == CounterSlot::Primary || pass.culler().secondary_capacity() > 0,
            "{}: secondary slot used on a culler without a secondary partition",
            pass.culler().label()
        );
        let pipeline = match args.slot {
            CounterSlot::Primary => &self.primary_pipeline,
            CounterSlot::Secondary => &self.secondary_pipeline,
        };
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Count Transfer"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(pipeline);
        cpass.set_bind_group(0, &args.bind_group, &[]);
        cpass.dispatch_workgroups(1, 1, 1);
    }
}

fn assert_same_source(bound: CullerId, bound_label: &str, pass: CullerId, pass_label: &str) {
    assert!(
        bound == pass,
        "count transfer for args bound to '{}' recorded with a pass of '{}'",
        bound_label,
        pass_label
    );
}

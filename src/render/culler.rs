//! GPU Visibility Culler
//!
//! Owns the candidate, culled-output and counter buffers for one candidate set
//! and runs one culling kernel over it. The per-frame order
//! clear -> submit -> dispatch -> (read) is encoded in the [`CullPass`]
//! typestate, so a transfer or readback can only be recorded after a dispatch
//! and a counter can only be read back once per clear.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat4, Vec3, Vec4};

use crate::constants::{CULL_GROUP_SIZE, GRASS_GROUP_SIZE_X, GRASS_GROUP_SIZE_Y};
use crate::core::uniforms::{CounterBlock, CullParams};
use crate::error::{InitError, ReadbackError};
use crate::render::frustum::Frustum;
use crate::render::gpu::{GpuContext, storage_layout_entry, uniform_layout_entry};

const CULL_COMMON_WGSL: &str = include_str!("../shaders/cull_common.wgsl");
const COUNTER_BLOCK_SIZE: u64 = std::mem::size_of::<CounterBlock>() as u64;

/// Culling kernel variant. Fixed per culler at creation because the binding
/// layout differs between variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullKernel {
    /// Candidates are 4x4 transforms (instanced models)
    PlainTransform,
    /// Candidates are 2D offsets on the x/z plane (terrain chunks)
    OffsetBased,
    /// Blade offsets crossed with an already-culled chunk buffer
    GrassTwoPass,
}

impl CullKernel {
    /// Bytes per candidate and per culled element.
    pub fn element_size(self) -> u64 {
        match self {
            CullKernel::PlainTransform => std::mem::size_of::<Mat4>() as u64,
            CullKernel::OffsetBased | CullKernel::GrassTwoPass => std::mem::size_of::<[f32; 2]>() as u64,
        }
    }

    fn entry_point(self) -> &'static str {
        match self {
            CullKernel::PlainTransform => "cull_transforms",
            CullKernel::OffsetBased => "cull_offsets",
            CullKernel::GrassTwoPass => "cull_grass",
        }
    }

    fn shader_source(self) -> String {
        let body = match self {
            CullKernel::PlainTransform => include_str!("../shaders/cull_transforms.wgsl"),
            CullKernel::OffsetBased => include_str!("../shaders/cull_offsets.wgsl"),
            CullKernel::GrassTwoPass => include_str!("../shaders/cull_grass.wgsl"),
        };
        format!("{CULL_COMMON_WGSL}\n{body}")
    }

    /// Thread groups for one dispatch: 32 candidates per group for the 1D
    /// kernels, a 32 x 8 grid over (blades per chunk, visible chunks) for grass.
    pub fn group_counts(self, sent_count: u32, visible_chunks: u32) -> (u32, u32) {
        match self {
            CullKernel::PlainTransform | CullKernel::OffsetBased => {
                (sent_count.div_ceil(CULL_GROUP_SIZE), 1)
            }
            CullKernel::GrassTwoPass => (
                sent_count.div_ceil(GRASS_GROUP_SIZE_X),
                visible_chunks.div_ceil(GRASS_GROUP_SIZE_Y),
            ),
        }
    }
}

/// An ordered candidate set for one dispatch.
#[derive(Clone, Copy, Debug)]
pub enum CullCandidates<'a> {
    Transforms(&'a [Mat4]),
    Offsets(&'a [[f32; 2]]),
}

impl CullCandidates<'_> {
    pub fn len(&self) -> usize {
        match self {
            CullCandidates::Transforms(t) => t.len(),
            CullCandidates::Offsets(o) => o.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bytes(&self) -> &[u8] {
        match self {
            CullCandidates::Transforms(t) => bytemuck::cast_slice(t),
            CullCandidates::Offsets(o) => bytemuck::cast_slice(o),
        }
    }

    fn matches(&self, kernel: CullKernel) -> bool {
        matches!(
            (self, kernel),
            (CullCandidates::Transforms(_), CullKernel::PlainTransform)
                | (CullCandidates::Offsets(_), CullKernel::OffsetBased)
                | (CullCandidates::Offsets(_), CullKernel::GrassTwoPass)
        )
    }
}

/// Exceeding a fixed capacity is a programming error, never a runtime condition.
pub(crate) fn assert_within_capacity(label: &str, count: usize, capacity: u32) {
    assert!(
        count <= capacity as usize,
        "{label}: {count} candidates submitted but capacity is {capacity}"
    );
}

/// View-dependent and kernel-specific data for one dispatch.
#[derive(Clone, Copy, Debug)]
pub struct CullFrame {
    pub frustum: Frustum,
    pub camera_pos: Vec3,
    pub grass_per_chunk: u32,
    pub visible_chunks: u32,
    pub plane_dimension: f32,
    pub height_scale: f32,
    pub lod_distance: f32,
}

impl CullFrame {
    pub fn new(view_proj: &Mat4, camera_pos: Vec3) -> Self {
        Self {
            frustum: Frustum::from_view_proj(view_proj),
            camera_pos,
            grass_per_chunk: 0,
            visible_chunks: 0,
            plane_dimension: 0.0,
            height_scale: 0.0,
            lod_distance: 0.0,
        }
    }

    pub fn with_grass(mut self, grass_per_chunk: u32, visible_chunks: u32, lod_distance: f32) -> Self {
        self.grass_per_chunk = grass_per_chunk;
        self.visible_chunks = visible_chunks;
        self.lod_distance = lod_distance;
        self
    }

    pub fn with_plane(mut self, plane_dimension: f32, height_scale: f32) -> Self {
        self.plane_dimension = plane_dimension;
        self.height_scale = height_scale;
        self
    }
}

pub struct CullerDesc<'a> {
    pub label: &'static str,
    pub kernel: CullKernel,
    pub candidate_capacity: u32,
    /// Elements the primary partition of the output can hold
    pub output_capacity: u32,
    /// Elements of the secondary partition (grass LOD), 0 when unused
    pub secondary_capacity: u32,
    /// Already-culled chunk offsets, required by [`CullKernel::GrassTwoPass`]
    pub chunk_source: Option<&'a wgpu::Buffer>,
}

static NEXT_CULLER_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a [`VisibilityCuller`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CullerId(u64);

impl CullerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CULLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub struct VisibilityCuller {
    id: CullerId,
    label: &'static str,
    kernel: CullKernel,
    candidate_capacity: u32,
    output_capacity: u32,
    secondary_capacity: u32,

    candidate_buffer: wgpu::Buffer,
    output_buffer: wgpu::Buffer,
    counter_buffer: wgpu::Buffer,
    counter_staging: wgpu::Buffer,
    params_buffer: wgpu::Buffer,

    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
}

impl VisibilityCuller {
    pub fn new(ctx: &GpuContext, desc: &CullerDesc<'_>) -> Result<Self, InitError> {
        let device = &ctx.device;
        let element_size = desc.kernel.element_size();

        let candidate_buffer = ctx.create_storage_buffer(
            "Cull Candidate Buffer",
            (desc.candidate_capacity.max(1) as u64) * element_size,
            wgpu::BufferUsages::COPY_DST,
        )?;

        let output_elements = (desc.output_capacity as u64 + desc.secondary_capacity as u64).max(1);
        let output_buffer = ctx.create_storage_buffer(
            "Culled Output Buffer",
            output_elements * element_size,
            wgpu::BufferUsages::COPY_SRC,
        )?;

        let counter_buffer = ctx.create_storage_buffer(
            "Cull Counter Buffer",
            COUNTER_BLOCK_SIZE,
            wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
        )?;

        let counter_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Cull Counter Staging"),
            size: COUNTER_BLOCK_SIZE,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Cull Params Buffer"),
            size: std::mem::size_of::<CullParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.kernel.shader_source().into()),
        });

        let compute = wgpu::ShaderStages::COMPUTE;
        let mut layout_entries = vec![
            // Cull params (planes, corners, scale, counts)
            uniform_layout_entry(0, compute),
            // Candidates (read)
            storage_layout_entry(1, compute, true),
            // Culled output (append)
            storage_layout_entry(2, compute, false),
            // Counter block (atomic)
            storage_layout_entry(3, compute, false),
        ];
        if desc.kernel == CullKernel::GrassTwoPass {
            // Visible chunk offsets from the terrain pass
            layout_entries.push(storage_layout_entry(4, compute, true));
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cull Bind Group Layout"),
            entries: &layout_entries,
        });

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: candidate_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: output_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: counter_buffer.as_entire_binding(),
            },
        ];
        if desc.kernel == CullKernel::GrassTwoPass {
            let chunk_source = desc.chunk_source.ok_or_else(|| {
                InitError::Settings(format!("{}: grass culling needs a chunk source buffer", desc.label))
            })?;
            entries.push(wgpu::BindGroupEntry {
                binding: 4,
                resource: chunk_source.as_entire_binding(),
            });
        }

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Cull Bind Group"),
            layout: &bind_group_layout,
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Cull Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(desc.label),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(desc.kernel.entry_point()),
            compilation_options: Default::default(),
            cache: None,
        });

        tracing::debug!(
            "{}: {:?} culler, {} candidates -> {} (+{}) outputs",
            desc.label,
            desc.kernel,
            desc.candidate_capacity,
            desc.output_capacity,
            desc.secondary_capacity
        );

        Ok(Self {
            id: CullerId::next(),
            label: desc.label,
            kernel: desc.kernel,
            candidate_capacity: desc.candidate_capacity,
            output_capacity: desc.output_capacity,
            secondary_capacity: desc.secondary_capacity,
            candidate_buffer,
            output_buffer,
            counter_buffer,
            counter_staging,
            params_buffer,
            pipeline,
            bind_group,
        })
    }

    /// Resets both counter slots and rewrites the capacities. Starts a frame's pass.
    pub fn clear_instance_count(&mut self, queue: &wgpu::Queue) -> CullPass<'_, Cleared> {
        let block = CounterBlock::cleared(self.output_capacity, self.secondary_capacity);
        queue.write_buffer(&self.counter_buffer, 0, bytemuck::bytes_of(&block));
        CullPass::new(self, (0, 0))
    }

    pub fn id(&self) -> CullerId {
        self.id
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn kernel(&self) -> CullKernel {
        self.kernel
    }

    pub fn candidate_capacity(&self) -> u32 {
        self.candidate_capacity
    }

    pub fn output_capacity(&self) -> u32 {
        self.output_capacity
    }

    pub fn secondary_capacity(&self) -> u32 {
        self.secondary_capacity
    }

    /// Culled elements; secondary partition starts at element `output_capacity`.
    pub fn output_buffer(&self) -> &wgpu::Buffer {
        &self.output_buffer
    }

    pub fn counter_buffer(&self) -> &wgpu::Buffer {
        &self.counter_buffer
    }
}

// Pass states
pub struct Cleared;
pub struct Submitted;
pub struct Dispatched;
pub struct CountRead;

/// States in which the counter holds this frame's final value.
pub trait CountReady {}
impl CountReady for Dispatched {}
impl CountReady for CountRead {}

/// One frame's use of a culler. Holding the pass borrows the culler, so no
/// other pass on it can interleave.
#[must_use = "a cull pass does nothing until it is dispatched"]
pub struct CullPass<'a, S> {
    culler: &'a mut VisibilityCuller,
    groups: (u32, u32),
    _state: PhantomData<S>,
}

impl<'a, S> CullPass<'a, S> {
    fn new(culler: &'a mut VisibilityCuller, groups: (u32, u32)) -> Self {
        Self {
            culler,
            groups,
            _state: PhantomData,
        }
    }

    fn advance<T>(self) -> CullPass<'a, T> {
        CullPass::new(self.culler, self.groups)
    }

    pub fn culler(&self) -> &VisibilityCuller {
        &*self.culler
    }
}

impl<'a> CullPass<'a, Cleared> {
    /// Uploads the candidates, the local-space culling corners and the
    /// per-dispatch parameters. Panics when the candidate set exceeds the
    /// culler's capacity.
    pub fn submit(
        self,
        queue: &wgpu::Queue,
        candidates: CullCandidates<'_>,
        corners: &[Vec4; 8],
        scale: &Mat4,
        frame: &CullFrame,
    ) -> CullPass<'a, Submitted> {
        let culler = &*self.culler;
        assert_within_capacity(culler.label, candidates.len(), culler.candidate_capacity);
        assert!(
            candidates.matches(culler.kernel),
            "{}: candidate kind does not match the {:?} kernel",
            culler.label,
            culler.kernel
        );

        let sent_count = candidates.len() as u32;
        let groups = culler.kernel.group_counts(sent_count, frame.visible_chunks);

        if !candidates.is_empty() {
            queue.write_buffer(&culler.candidate_buffer, 0, candidates.bytes());
        }

        let grass_per_chunk = match culler.kernel {
            CullKernel::GrassTwoPass => sent_count,
            _ => frame.grass_per_chunk,
        };
        let params = CullParams {
            planes: frame.frustum.to_array(),
            corners: corners.map(|c| c.to_array()),
            scale: scale.to_cols_array_2d(),
            camera_pos: frame.camera_pos.extend(1.0).to_array(),
            sent_count,
            grass_per_chunk,
            visible_chunks: frame.visible_chunks,
            plane_dimension: frame.plane_dimension,
            height_scale: frame.height_scale,
            lod_distance: frame.lod_distance,
            group_count_x: groups.0,
            _padding: 0,
        };
        queue.write_buffer(&culler.params_buffer, 0, bytemuck::bytes_of(&params));

        let mut next = self.advance::<Submitted>();
        next.groups = groups;
        next
    }
}

impl<'a> CullPass<'a, Submitted> {
    /// Records the culling kernel. The compute pass is closed right after the
    /// dispatch so its bindings never leak into later passes.
    pub fn dispatch(self, encoder: &mut wgpu::CommandEncoder) -> CullPass<'a, Dispatched> {
        let (x, y) = self.groups;
        if x > 0 && y > 0 {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(self.culler.label),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&self.culler.pipeline);
            cpass.set_bind_group(0, &self.culler.bind_group, &[]);
            cpass.dispatch_workgroups(x, y, 1);
        }
        self.advance()
    }
}

impl<'a> CullPass<'a, Dispatched> {
    /// Blocking readback of the primary count. Submits `encoder` (which must
    /// hold this pass's dispatch), waits for the GPU and maps the counter.
    /// The returned pass cannot be read again until the next clear.
    pub fn read_instance_count(
        self,
        ctx: &GpuContext,
        mut encoder: wgpu::CommandEncoder,
    ) -> Result<(u32, CullPass<'a, CountRead>), ReadbackError> {
        let culler = &*self.culler;
        encoder.copy_buffer_to_buffer(
            &culler.counter_buffer,
            0,
            &culler.counter_staging,
            0,
            COUNTER_BLOCK_SIZE,
        );
        let submission = ctx.queue.submit(Some(encoder.finish()));

        let slice = culler.counter_staging.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        ctx.device.poll(wgpu::PollType::Wait {
            submission_index: Some(submission),
            timeout: None,
        })?;
        rx.recv().map_err(|_| ReadbackError::CallbackDropped)??;

        let block: CounterBlock = {
            let data = slice.get_mapped_range();
            bytemuck::pod_read_unaligned(&data[..COUNTER_BLOCK_SIZE as usize])
        };
        culler.counter_staging.unmap();

        let (count, _) = block.clamped();
        Ok((count, self.advance()))
    }
}

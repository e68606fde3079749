//! Explicit GPU context handed to every component instead of global device state.

use crate::error::InitError;

pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, adapter_info: wgpu::AdapterInfo) -> Self {
        Self {
            device,
            queue,
            adapter_info,
        }
    }

    /// Creates a device without a surface (offscreen rendering and tests).
    pub async fn headless() -> Result<Self, InitError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;

        let info = adapter.get_info();
        tracing::info!(
            "Selected adapter: {} on {:?} backend",
            info.name,
            info.backend
        );
        if info.device_type == wgpu::DeviceType::Cpu {
            tracing::warn!("Running on a CPU adapter, culling dispatches will be slow");
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Culling Device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: Default::default(),
                experimental_features: Default::default(),
                trace: wgpu::Trace::Off,
            })
            .await?;

        Ok(Self::new(device, queue, info))
    }

    /// Blocking variant of [`headless`](Self::headless).
    pub fn headless_blocking() -> Result<Self, InitError> {
        pollster::block_on(Self::headless())
    }

    /// Fails fast when a fixed-capacity buffer cannot exist on this device.
    pub fn check_buffer_size(&self, label: &'static str, size: u64, storage: bool) -> Result<(), InitError> {
        let limits = self.device.limits();
        let limit = if storage {
            (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size)
        } else {
            limits.max_buffer_size
        };
        if size > limit {
            return Err(InitError::BufferTooLarge { label, size, limit });
        }
        Ok(())
    }

    /// Creates a storage buffer after checking it against the device limits.
    pub fn create_storage_buffer(
        &self,
        label: &'static str,
        size: u64,
        extra_usage: wgpu::BufferUsages,
    ) -> Result<wgpu::Buffer, InitError> {
        self.check_buffer_size(label, size, true)?;
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE | extra_usage,
            mapped_at_creation: false,
        }))
    }
}

pub(crate) fn uniform_layout_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn storage_layout_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    read_only: bool,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

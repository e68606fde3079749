//! Error types for initialization, counter readback and settings.

use thiserror::Error;

/// Failure while bringing up the GPU context or a culling component.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("no suitable GPU adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),

    #[error("failed to create GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("buffer '{label}' needs {size} bytes but the device allows {limit}")]
    BufferTooLarge {
        label: &'static str,
        size: u64,
        limit: u64,
    },

    #[error("invalid settings: {0}")]
    Settings(String),
}

/// Failure while mapping a counter back to the CPU.
#[derive(Debug, Error)]
pub enum ReadbackError {
    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("buffer map failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    #[error("map callback was dropped before completing")]
    CallbackDropped,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings io: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings encoding: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("setting out of range: {0}")]
    OutOfRange(String),
}

/// Top-level error for the binary.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Readback(#[from] ReadbackError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

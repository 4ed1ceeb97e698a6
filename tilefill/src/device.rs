//! The device abstraction the dispatcher drives.
//!
//! Only the call shapes the pipeline needs are exposed. Every resource type
//! releases its device object when dropped, so a partially built set of
//! resources is torn down by simply letting it go out of scope.

use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("out of device memory")]
    OutOfMemory,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("device lost: {0}")]
    Lost(String),
    #[error("buffer mapping failed: {0}")]
    Map(String),
    #[error("no usable device: {0}")]
    Unavailable(String),
}

/// How a buffer is bound by the stage programs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingType {
    Uniform,
    Storage { read_only: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Bound as a uniform; written from the host.
    Uniform,
    /// Bound as storage; written from the host and readable back.
    Storage,
}

pub trait Device: Send + Sync {
    type ShaderModule: Send + Sync;
    type BindGroupLayout: Send + Sync;
    type PipelineLayout: Send + Sync;
    type ComputePipeline: Send + Sync;
    type Buffer: Send + Sync;
    type BindGroup;
    type CommandEncoder;
    type Fence;

    /// Compile WGSL source text.
    fn create_shader_module(
        &self,
        label: &str,
        source: &str,
    ) -> Result<Self::ShaderModule, DeviceError>;

    /// Binding `i` of the layout has type `entries[i]`.
    fn create_bind_group_layout(
        &self,
        label: &str,
        entries: &[BindingType],
    ) -> Result<Self::BindGroupLayout, DeviceError>;

    fn create_pipeline_layout(
        &self,
        label: &str,
        bind_group_layout: &Self::BindGroupLayout,
    ) -> Result<Self::PipelineLayout, DeviceError>;

    fn create_compute_pipeline(
        &self,
        label: &str,
        layout: &Self::PipelineLayout,
        module: &Self::ShaderModule,
        entry_point: &str,
    ) -> Result<Self::ComputePipeline, DeviceError>;

    fn create_buffer(
        &self,
        label: &str,
        size: u64,
        usage: BufferUsage,
    ) -> Result<Self::Buffer, DeviceError>;

    /// Release a buffer's memory now rather than when the last reference
    /// goes away.
    fn destroy_buffer(&self, buffer: Self::Buffer);

    fn write_buffer(
        &self,
        buffer: &Self::Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError>;

    /// Fill the whole buffer with zeros.
    fn clear_buffer(&self, buffer: &Self::Buffer) -> Result<(), DeviceError>;

    /// Copy the whole buffer back to the host, waiting at most `timeout`.
    fn read_buffer(&self, buffer: &Self::Buffer, timeout: Duration)
        -> Result<Vec<u8>, DeviceError>;

    /// Binding `i` of the group is `buffers[i]`, whole-buffer.
    fn create_bind_group(
        &self,
        label: &str,
        layout: &Self::BindGroupLayout,
        buffers: &[&Self::Buffer],
    ) -> Result<Self::BindGroup, DeviceError>;

    fn create_command_encoder(&self, label: &str) -> Self::CommandEncoder;

    /// Record one compute pass: set the pipeline and bind group at index 0,
    /// dispatch `workgroups`, and end the pass.
    fn dispatch(
        &self,
        encoder: &mut Self::CommandEncoder,
        label: &str,
        pipeline: &Self::ComputePipeline,
        bind_group: &Self::BindGroup,
        workgroups: [u32; 3],
    ) -> Result<(), DeviceError>;

    fn submit(&self, encoder: Self::CommandEncoder) -> Result<Self::Fence, DeviceError>;

    /// Block until the submission behind `fence` has completed, or fail
    /// with [`DeviceError::Timeout`].
    fn wait(&self, fence: &Self::Fence, timeout: Duration) -> Result<(), DeviceError>;
}

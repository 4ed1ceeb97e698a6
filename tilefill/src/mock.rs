//! A counting in-memory device for unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tilefill_types::BumpAllocators;

use crate::device::{BindingType, BufferUsage, Device, DeviceError};

/// Per-kind resource counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub modules: usize,
    pub bind_group_layouts: usize,
    pub pipeline_layouts: usize,
    pub pipelines: usize,
    pub buffers: usize,
    pub bind_groups: usize,
}

impl Counts {
    pub fn total(&self) -> usize {
        self.modules
            + self.bind_group_layouts
            + self.pipeline_layouts
            + self.pipelines
            + self.buffers
            + self.bind_groups
    }

    fn slot(&mut self, kind: Kind) -> &mut usize {
        match kind {
            Kind::Module => &mut self.modules,
            Kind::BindGroupLayout => &mut self.bind_group_layouts,
            Kind::PipelineLayout => &mut self.pipeline_layouts,
            Kind::Pipeline => &mut self.pipelines,
            Kind::Buffer => &mut self.buffers,
            Kind::BindGroup => &mut self.bind_groups,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Module,
    BindGroupLayout,
    PipelineLayout,
    Pipeline,
    Buffer,
    BindGroup,
}

impl Kind {
    fn name(self) -> &'static str {
        match self {
            Kind::Module => "module",
            Kind::BindGroupLayout => "bind_group_layout",
            Kind::PipelineLayout => "pipeline_layout",
            Kind::Pipeline => "pipeline",
            Kind::Buffer => "buffer",
            Kind::BindGroup => "bind_group",
        }
    }
}

/// Failures the mock can be told to produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    /// The n-th compute pipeline creation, counting from zero.
    ComputePipeline(usize),
    /// Creating a buffer whose label ends with this name.
    Buffer(&'static str),
    /// Every wait times out.
    Wait,
}

#[derive(Default)]
struct Inner {
    created: Counts,
    live: Counts,
    released: Vec<String>,
    dispatches: Vec<(String, [u32; 3])>,
    failures: Vec<Failure>,
    bump_on_submit: Option<BumpAllocators>,
    bump_buffers: Vec<Arc<Mutex<Vec<u8>>>>,
    wait_delay: Duration,
    read_timeouts: Vec<Duration>,
}

/// Decrements the live count of its kind when dropped.
pub struct Tracked {
    kind: Kind,
    label: String,
    inner: Arc<Mutex<Inner>>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        *inner.live.slot(self.kind) -= 1;
        inner
            .released
            .push(format!("{} {}", self.kind.name(), self.label));
    }
}

pub struct MockBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    _tracked: Tracked,
}

pub struct MockEncoder {
    passes: Vec<(String, [u32; 3])>,
}

#[derive(Clone, Default)]
pub struct MockDevice {
    inner: Arc<Mutex<Inner>>,
}

impl MockDevice {
    pub fn new() -> MockDevice {
        MockDevice::default()
    }

    pub fn fail_on(&self, failure: Failure) {
        self.inner.lock().unwrap().failures.push(failure);
    }

    /// Have every submission leave `bump` in the bump buffer, as if the
    /// stages had run.
    pub fn set_bump_on_submit(&self, bump: BumpAllocators) {
        self.inner.lock().unwrap().bump_on_submit = Some(bump);
    }

    /// Make every wait take `delay` before it succeeds.
    pub fn set_wait_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().wait_delay = delay;
    }

    /// The timeout given to each readback, in order.
    pub fn read_timeouts(&self) -> Vec<Duration> {
        self.inner.lock().unwrap().read_timeouts.clone()
    }

    /// Creations attempted, including failed ones.
    pub fn counts(&self) -> Counts {
        self.inner.lock().unwrap().created
    }

    pub fn live(&self) -> Counts {
        self.inner.lock().unwrap().live
    }

    /// `"<kind> <label>"` for each release, in order.
    pub fn released(&self) -> Vec<String> {
        self.inner.lock().unwrap().released.clone()
    }

    /// Submitted passes as `(label, workgroups)`.
    pub fn dispatches(&self) -> Vec<(String, [u32; 3])> {
        self.inner.lock().unwrap().dispatches.clone()
    }

    fn create(&self, kind: Kind, label: &str) -> Tracked {
        let mut inner = self.inner.lock().unwrap();
        *inner.live.slot(kind) += 1;
        Tracked {
            kind,
            label: label.to_string(),
            inner: self.inner.clone(),
        }
    }

    /// Count an attempt, returning the number of earlier attempts.
    fn attempt(&self, kind: Kind) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner.created.slot(kind);
        *slot += 1;
        *slot - 1
    }

    fn fails(&self, failure: Failure) -> bool {
        self.inner.lock().unwrap().failures.contains(&failure)
    }
}

impl Device for MockDevice {
    type ShaderModule = Tracked;
    type BindGroupLayout = Tracked;
    type PipelineLayout = Tracked;
    type ComputePipeline = Tracked;
    type Buffer = MockBuffer;
    type BindGroup = Tracked;
    type CommandEncoder = MockEncoder;
    type Fence = ();

    fn create_shader_module(&self, label: &str, source: &str) -> Result<Tracked, DeviceError> {
        self.attempt(Kind::Module);
        if !source.contains("@compute") {
            return Err(DeviceError::Validation(format!("{label}: no entry point")));
        }
        Ok(self.create(Kind::Module, label))
    }

    fn create_bind_group_layout(
        &self,
        label: &str,
        entries: &[BindingType],
    ) -> Result<Tracked, DeviceError> {
        self.attempt(Kind::BindGroupLayout);
        if entries.is_empty() {
            return Err(DeviceError::Validation(format!("{label}: no entries")));
        }
        Ok(self.create(Kind::BindGroupLayout, label))
    }

    fn create_pipeline_layout(&self, label: &str, _: &Tracked) -> Result<Tracked, DeviceError> {
        self.attempt(Kind::PipelineLayout);
        Ok(self.create(Kind::PipelineLayout, label))
    }

    fn create_compute_pipeline(
        &self,
        label: &str,
        _: &Tracked,
        _: &Tracked,
        _: &str,
    ) -> Result<Tracked, DeviceError> {
        let n = self.attempt(Kind::Pipeline);
        if self.fails(Failure::ComputePipeline(n)) {
            return Err(DeviceError::Validation(format!("{label}: injected")));
        }
        Ok(self.create(Kind::Pipeline, label))
    }

    fn create_buffer(
        &self,
        label: &str,
        size: u64,
        _: BufferUsage,
    ) -> Result<MockBuffer, DeviceError> {
        self.attempt(Kind::Buffer);
        let failures = self.inner.lock().unwrap().failures.clone();
        let injected = failures
            .iter()
            .any(|f| matches!(f, Failure::Buffer(name) if label.ends_with(name)));
        if injected {
            return Err(DeviceError::OutOfMemory);
        }
        // Fresh device memory is not zeroed.
        let data = Arc::new(Mutex::new(vec![0xab; size as usize]));
        if label.ends_with("bump") {
            self.inner.lock().unwrap().bump_buffers.push(data.clone());
        }
        Ok(MockBuffer {
            data,
            _tracked: self.create(Kind::Buffer, label),
        })
    }

    fn destroy_buffer(&self, buffer: MockBuffer) {
        drop(buffer);
    }

    fn write_buffer(&self, buffer: &MockBuffer, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        let mut contents = buffer.data.lock().unwrap();
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(DeviceError::Validation("write out of range".into()));
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn clear_buffer(&self, buffer: &MockBuffer) -> Result<(), DeviceError> {
        buffer.data.lock().unwrap().fill(0);
        Ok(())
    }

    fn read_buffer(&self, buffer: &MockBuffer, timeout: Duration) -> Result<Vec<u8>, DeviceError> {
        self.inner.lock().unwrap().read_timeouts.push(timeout);
        Ok(buffer.data.lock().unwrap().clone())
    }

    fn create_bind_group(
        &self,
        label: &str,
        _: &Tracked,
        buffers: &[&MockBuffer],
    ) -> Result<Tracked, DeviceError> {
        self.attempt(Kind::BindGroup);
        if buffers.is_empty() {
            return Err(DeviceError::Validation(format!("{label}: no buffers")));
        }
        Ok(self.create(Kind::BindGroup, label))
    }

    fn create_command_encoder(&self, _: &str) -> MockEncoder {
        MockEncoder { passes: Vec::new() }
    }

    fn dispatch(
        &self,
        encoder: &mut MockEncoder,
        label: &str,
        _: &Tracked,
        _: &Tracked,
        workgroups: [u32; 3],
    ) -> Result<(), DeviceError> {
        encoder.passes.push((label.to_string(), workgroups));
        Ok(())
    }

    fn submit(&self, encoder: MockEncoder) -> Result<(), DeviceError> {
        let mut inner = self.inner.lock().unwrap();
        inner.dispatches.extend(encoder.passes);
        if let Some(bump) = inner.bump_on_submit {
            for buffer in &inner.bump_buffers {
                buffer.lock().unwrap()[..16].copy_from_slice(bytemuck::bytes_of(&bump));
            }
        }
        Ok(())
    }

    fn wait(&self, _: &(), timeout: Duration) -> Result<(), DeviceError> {
        if self.fails(Failure::Wait) {
            return Err(DeviceError::Timeout(timeout));
        }
        let delay = self.inner.lock().unwrap().wait_delay;
        std::thread::sleep(delay);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_counts_follow_drops() {
        let device = MockDevice::new();
        let module = device.create_shader_module("m", "@compute fn main() {}").unwrap();
        let buffer = device
            .create_buffer("b", 8, BufferUsage::Storage)
            .unwrap();
        assert_eq!(device.live().total(), 2);
        drop(module);
        device.destroy_buffer(buffer);
        assert_eq!(device.live().total(), 0);
        assert_eq!(device.released(), vec!["module m", "buffer b"]);
    }

    #[test]
    fn fresh_buffers_hold_garbage() {
        let device = MockDevice::new();
        let buffer = device.create_buffer("b", 8, BufferUsage::Storage).unwrap();
        let timeout = Duration::from_secs(1);
        assert_eq!(device.read_buffer(&buffer, timeout).unwrap(), vec![0xab; 8]);
        device.write_buffer(&buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert!(device.write_buffer(&buffer, 6, &[0; 4]).is_err());
        device.clear_buffer(&buffer).unwrap();
        assert_eq!(device.read_buffer(&buffer, timeout).unwrap(), vec![0; 8]);
    }
}

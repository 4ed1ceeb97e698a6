//! [`Device`] over wgpu.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::executor::block_on;

use crate::device::{BindingType, BufferUsage, Device, DeviceError};

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    // Error scopes are device-wide; only one call may have them pushed.
    scope: Mutex<()>,
}

/// Signalled once a submission has finished on the queue.
pub struct WgpuFence {
    done: Arc<AtomicBool>,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> WgpuDevice {
        WgpuDevice {
            device,
            queue,
            scope: Mutex::new(()),
        }
    }

    /// Open the default adapter without a surface.
    pub fn headless() -> Result<WgpuDevice, DeviceError> {
        let instance = wgpu::Instance::default();
        let adapter = block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .ok_or_else(|| DeviceError::Unavailable("no adapter found".to_string()))?;
        let info = adapter.get_info();
        tracing::info!("using adapter {} ({:?})", info.name, info.backend);

        let (device, queue) = block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("tilefill"),
                ..Default::default()
            },
            None,
        ))
        .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
        Ok(WgpuDevice::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Run `f` with validation and out-of-memory errors captured.
    fn scoped<T>(&self, f: impl FnOnce() -> T) -> Result<T, DeviceError> {
        let _guard = self.scope.lock().unwrap_or_else(PoisonError::into_inner);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = block_on(self.device.pop_error_scope());
        let out_of_memory = block_on(self.device.pop_error_scope());
        if let Some(e) = validation {
            return Err(DeviceError::Validation(e.to_string()));
        }
        if out_of_memory.is_some() {
            return Err(DeviceError::OutOfMemory);
        }
        Ok(value)
    }

    /// Poll the device until `check` yields a result or `timeout` passes.
    fn poll_until(
        &self,
        timeout: Duration,
        mut check: impl FnMut() -> Option<Result<(), DeviceError>>,
    ) -> Result<(), DeviceError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.device.poll(wgpu::Maintain::Poll);
            if let Some(result) = check() {
                return result;
            }
            if Instant::now() >= deadline {
                return Err(DeviceError::Timeout(timeout));
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }
}

impl Device for WgpuDevice {
    type ShaderModule = wgpu::ShaderModule;
    type BindGroupLayout = wgpu::BindGroupLayout;
    type PipelineLayout = wgpu::PipelineLayout;
    type ComputePipeline = wgpu::ComputePipeline;
    type Buffer = wgpu::Buffer;
    type BindGroup = wgpu::BindGroup;
    type CommandEncoder = wgpu::CommandEncoder;
    type Fence = WgpuFence;

    fn create_shader_module(
        &self,
        label: &str,
        source: &str,
    ) -> Result<wgpu::ShaderModule, DeviceError> {
        self.scoped(|| {
            self.device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                })
        })
    }

    fn create_bind_group_layout(
        &self,
        label: &str,
        entries: &[BindingType],
    ) -> Result<wgpu::BindGroupLayout, DeviceError> {
        let entries: Vec<_> = entries
            .iter()
            .enumerate()
            .map(|(i, ty)| wgpu::BindGroupLayoutEntry {
                binding: i as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: match ty {
                        BindingType::Uniform => wgpu::BufferBindingType::Uniform,
                        BindingType::Storage { read_only } => wgpu::BufferBindingType::Storage {
                            read_only: *read_only,
                        },
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        self.scoped(|| {
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(label),
                    entries: &entries,
                })
        })
    }

    fn create_pipeline_layout(
        &self,
        label: &str,
        bind_group_layout: &wgpu::BindGroupLayout,
    ) -> Result<wgpu::PipelineLayout, DeviceError> {
        self.scoped(|| {
            self.device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(label),
                    bind_group_layouts: &[bind_group_layout],
                    push_constant_ranges: &[],
                })
        })
    }

    fn create_compute_pipeline(
        &self,
        label: &str,
        layout: &wgpu::PipelineLayout,
        module: &wgpu::ShaderModule,
        entry_point: &str,
    ) -> Result<wgpu::ComputePipeline, DeviceError> {
        self.scoped(|| {
            self.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(label),
                    layout: Some(layout),
                    module,
                    entry_point: Some(entry_point),
                    compilation_options: Default::default(),
                    cache: None,
                })
        })
    }

    fn create_buffer(
        &self,
        label: &str,
        size: u64,
        usage: BufferUsage,
    ) -> Result<wgpu::Buffer, DeviceError> {
        let usage = match usage {
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Storage => {
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC
            }
        };
        self.scoped(|| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            })
        })
    }

    fn destroy_buffer(&self, buffer: wgpu::Buffer) {
        buffer.destroy();
    }

    fn write_buffer(
        &self,
        buffer: &wgpu::Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        self.scoped(|| self.queue.write_buffer(buffer, offset, data))
    }

    fn clear_buffer(&self, buffer: &wgpu::Buffer) -> Result<(), DeviceError> {
        self.scoped(|| {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("tilefill.clear"),
                });
            encoder.clear_buffer(buffer, 0, None);
            self.queue.submit(Some(encoder.finish()));
        })
    }

    fn read_buffer(&self, buffer: &wgpu::Buffer, timeout: Duration) -> Result<Vec<u8>, DeviceError> {
        let size = buffer.size();
        let staging = self.scoped(|| {
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("tilefill.readback"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("tilefill.readback"),
                });
            encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
            self.queue.submit(Some(encoder.finish()));
            staging
        })?;

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.poll_until(timeout, || match receiver.try_recv() {
            Ok(Ok(())) => Some(Ok(())),
            Ok(Err(e)) => Some(Err(DeviceError::Map(e.to_string()))),
            Err(TryRecvError::Disconnected) => {
                Some(Err(DeviceError::Map("map callback dropped".to_string())))
            }
            Err(TryRecvError::Empty) => None,
        })?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }

    fn create_bind_group(
        &self,
        label: &str,
        layout: &wgpu::BindGroupLayout,
        buffers: &[&wgpu::Buffer],
    ) -> Result<wgpu::BindGroup, DeviceError> {
        let entries: Vec<_> = buffers
            .iter()
            .enumerate()
            .map(|(i, buffer)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        self.scoped(|| {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout,
                entries: &entries,
            })
        })
    }

    fn create_command_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        [x, y, z]: [u32; 3],
    ) -> Result<(), DeviceError> {
        // Recording errors are deferred to `finish`, which `submit` scopes.
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(x, y, z);
        Ok(())
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) -> Result<WgpuFence, DeviceError> {
        let done = Arc::new(AtomicBool::new(false));
        self.scoped(|| {
            self.queue.submit(Some(encoder.finish()));
            let signal = done.clone();
            self.queue
                .on_submitted_work_done(move || signal.store(true, Ordering::Release));
        })?;
        Ok(WgpuFence { done })
    }

    fn wait(&self, fence: &WgpuFence, timeout: Duration) -> Result<(), DeviceError> {
        self.poll_until(timeout, || {
            fence.done.load(Ordering::Acquire).then_some(Ok(()))
        })
    }
}

//! The frame dispatcher: compiles the stage programs once, then sizes,
//! uploads and runs the nine stages for each frame.

use std::borrow::Cow;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use tilefill_types::{BumpAllocators, Config, EncodedScene, LineSoup, Path};

use crate::buffers::{BufferKind, BufferSet, BufferSizes, BufferSizing};
use crate::device::{Device, DeviceError};
use crate::error::{Error, StageResource};
use crate::stage::Stage;

#[derive(Clone, Debug)]
pub struct DispatcherOptions {
    /// Upper bound on each wait for the device.
    pub wait_timeout: Duration,
    /// Prepended to every device object label.
    pub label_prefix: String,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        DispatcherOptions {
            wait_timeout: Duration::from_secs(5),
            label_prefix: "tilefill.".to_string(),
        }
    }
}

/// WGSL source text for each stage; defaults to the shipped programs.
#[derive(Clone, Debug)]
pub struct ProgramSources {
    sources: [Cow<'static, str>; 9],
}

impl Default for ProgramSources {
    fn default() -> Self {
        ProgramSources {
            sources: Stage::ALL.map(|stage| Cow::Borrowed(stage.default_source())),
        }
    }
}

impl ProgramSources {
    pub fn with_source(mut self, stage: Stage, source: impl Into<Cow<'static, str>>) -> Self {
        self.sources[stage.index()] = source.into();
        self
    }

    pub fn get(&self, stage: Stage) -> &str {
        &self.sources[stage.index()]
    }
}

/// The host-side inputs of one frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameInputs<'a> {
    pub config: &'a Config,
    pub scene: &'a [u32],
    pub lines: &'a [LineSoup],
    pub paths: &'a [Path],
}

impl<'a> FrameInputs<'a> {
    pub fn sizing(&self) -> BufferSizing {
        BufferSizing::for_inputs(self.scene, self.lines, self.paths)
    }
}

impl<'a> From<&'a EncodedScene> for FrameInputs<'a> {
    fn from(encoded: &'a EncodedScene) -> Self {
        FrameInputs {
            config: &encoded.config,
            scene: &encoded.scene,
            lines: &encoded.lines,
            paths: &encoded.paths,
        }
    }
}

/// What happened during one dispatched frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameReport {
    /// Stages that recorded a pass, in submission order.
    pub recorded: Vec<Stage>,
    /// Stages with an empty dispatch shape.
    pub skipped: Vec<Stage>,
    pub bump: BumpAllocators,
}

// Fields drop in declaration order, which is the reverse of creation.
struct StageProgram<D: Device> {
    pipeline: D::ComputePipeline,
    #[allow(dead_code)]
    pipeline_layout: D::PipelineLayout,
    bind_group_layout: D::BindGroupLayout,
    #[allow(dead_code)]
    module: D::ShaderModule,
}

struct StagePrograms<D: Device> {
    programs: Vec<StageProgram<D>>,
}

impl<D: Device> Drop for StagePrograms<D> {
    fn drop(&mut self) {
        while let Some(program) = self.programs.pop() {
            drop(program);
        }
    }
}

enum State<D: Device> {
    Uninitialized,
    Initialized(StagePrograms<D>),
    Closed,
}

impl<D: Device> State<D> {
    fn programs(&self) -> Result<&StagePrograms<D>, Error> {
        match self {
            State::Initialized(programs) => Ok(programs),
            State::Uninitialized => Err(Error::InvalidState("not initialized")),
            State::Closed => Err(Error::InvalidState("closed")),
        }
    }
}

pub struct Dispatcher<D: Device> {
    device: D,
    options: DispatcherOptions,
    sources: ProgramSources,
    state: RwLock<State<D>>,
}

impl<D: Device> Dispatcher<D> {
    pub fn new(device: D, options: DispatcherOptions) -> Self {
        Dispatcher::with_sources(device, options, ProgramSources::default())
    }

    pub fn with_sources(device: D, options: DispatcherOptions, sources: ProgramSources) -> Self {
        Dispatcher {
            device,
            options,
            sources,
            state: RwLock::new(State::Uninitialized),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn options(&self) -> &DispatcherOptions {
        &self.options
    }

    pub fn is_initialized(&self) -> bool {
        matches!(
            *self.state.read().unwrap_or_else(PoisonError::into_inner),
            State::Initialized(_)
        )
    }

    /// Build the program of every stage. Calling this again once it has
    /// succeeded does nothing.
    ///
    /// If stage `k` fails, whatever was built for stages `0..=k` is released
    /// before returning and the dispatcher stays uninitialized.
    pub fn init(&self) -> Result<(), Error> {
        let mut state = self.state.write()?;
        match *state {
            State::Initialized(_) => return Ok(()),
            State::Closed => return Err(Error::InvalidState("closed")),
            State::Uninitialized => {}
        }

        let mut programs = StagePrograms {
            programs: Vec::with_capacity(Stage::ALL.len()),
        };
        for stage in Stage::ALL {
            programs.programs.push(self.build_program(stage)?);
        }
        tracing::info!("initialized {} stage programs", programs.programs.len());
        *state = State::Initialized(programs);
        Ok(())
    }

    fn build_program(&self, stage: Stage) -> Result<StageProgram<D>, Error> {
        let label = self.label(stage.name());
        let resource_err = |resource| {
            move |source| Error::Resource {
                stage,
                resource,
                source,
            }
        };

        let module = self
            .device
            .create_shader_module(&label, self.sources.get(stage))
            .map_err(|source| Error::Compile { stage, source })?;
        let entries: Vec<_> = stage.bindings().iter().map(|b| b.ty).collect();
        let bind_group_layout = self
            .device
            .create_bind_group_layout(&label, &entries)
            .map_err(resource_err(StageResource::BindGroupLayout))?;
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&label, &bind_group_layout)
            .map_err(resource_err(StageResource::PipelineLayout))?;
        let pipeline = self
            .device
            .create_compute_pipeline(&label, &pipeline_layout, &module, "main")
            .map_err(resource_err(StageResource::ComputePipeline))?;
        tracing::trace!("built stage {}", stage);

        Ok(StageProgram {
            pipeline,
            pipeline_layout,
            bind_group_layout,
            module,
        })
    }

    /// Create every buffer a frame described by `config` and `sizing` needs,
    /// with the accumulation buffers zero-filled.
    pub fn allocate_buffers(
        &self,
        config: &Config,
        sizing: &BufferSizing,
    ) -> Result<BufferSet<D::Buffer>, Error> {
        let state = self.state.read()?;
        state.programs()?;

        let sizes = BufferSizes::new(config, sizing)?;
        let mut buffers = Vec::with_capacity(BufferKind::ALL.len());
        for kind in BufferKind::ALL {
            let size = sizes.get(kind);
            match self
                .device
                .create_buffer(&self.label(kind.name()), size, kind.usage())
            {
                Ok(buffer) => buffers.push(buffer),
                Err(source) => {
                    self.release(buffers);
                    return Err(Error::Buffer {
                        buffer: kind,
                        size,
                        source,
                    });
                }
            }
        }

        let mut set = BufferSet::from_parts(buffers, sizes);
        if let Err(e) = self.clear_accumulators(&set) {
            self.destroy_buffers(&mut set);
            return Err(e);
        }
        tracing::debug!("allocated {} bytes of frame buffers: {:?}", sizes.total(), sizes);
        Ok(set)
    }

    /// Release every buffer in `set`, leaving it empty.
    pub fn destroy_buffers(&self, set: &mut BufferSet<D::Buffer>) {
        let buffers = set.take();
        if !buffers.is_empty() {
            tracing::debug!("destroying {} frame buffers", buffers.len());
        }
        self.release(buffers);
    }

    fn release(&self, buffers: Vec<D::Buffer>) {
        for buffer in buffers.into_iter().rev() {
            self.device.destroy_buffer(buffer);
        }
    }

    fn clear_accumulators(&self, set: &BufferSet<D::Buffer>) -> Result<(), Error> {
        for kind in BufferKind::ALL.into_iter().filter(|k| k.is_zero_filled()) {
            let buffer = set.get(kind).ok_or(Error::EmptyBufferSet)?;
            self.device
                .clear_buffer(buffer)
                .map_err(|source| Error::Upload {
                    buffer: kind,
                    source,
                })?;
        }
        Ok(())
    }

    /// Upload the frame's inputs, record and submit every non-empty stage,
    /// and wait for the frame to finish.
    ///
    /// Allocation overflow detected by the stages fails the frame with
    /// [`Error::Overflow`]; the output is then incomplete.
    pub fn dispatch(
        &self,
        buffers: &BufferSet<D::Buffer>,
        inputs: FrameInputs<'_>,
    ) -> Result<FrameReport, Error> {
        let state = self.state.read()?;
        let programs = state.programs()?;
        if buffers.is_empty() {
            return Err(Error::EmptyBufferSet);
        }
        let config = inputs.config;
        let mut shapes = [None; Stage::ALL.len()];
        for stage in Stage::ALL {
            shapes[stage.index()] = stage.checked_workgroups(config)?;
        }

        self.upload(buffers, BufferKind::Config, &config.to_bytes())?;
        self.upload(buffers, BufferKind::Scene, bytemuck::cast_slice(inputs.scene))?;
        self.upload(buffers, BufferKind::Lines, bytemuck::cast_slice(inputs.lines))?;
        self.upload(buffers, BufferKind::Paths, bytemuck::cast_slice(inputs.paths))?;
        // Repeat frames on the same set must not see the last frame's counts.
        self.clear_accumulators(buffers)?;

        let mut encoder = self.device.create_command_encoder(&self.label("frame"));
        let mut bind_groups = Vec::with_capacity(Stage::ALL.len());
        let mut recorded = Vec::new();
        let mut skipped = Vec::new();
        for (stage, program) in Stage::ALL.into_iter().zip(&programs.programs) {
            let Some(workgroups) = shapes[stage.index()] else {
                tracing::trace!("skipping stage {}", stage);
                skipped.push(stage);
                continue;
            };
            let bound = stage
                .bindings()
                .iter()
                .map(|b| buffers.get(b.buffer))
                .collect::<Option<Vec<_>>>()
                .ok_or(Error::EmptyBufferSet)?;
            let label = self.label(stage.name());
            let bind_group = self
                .device
                .create_bind_group(&label, &program.bind_group_layout, &bound)
                .map_err(|source| Error::Resource {
                    stage,
                    resource: StageResource::BindGroup,
                    source,
                })?;
            tracing::trace!("recording stage {} with workgroups {:?}", stage, workgroups);
            self.device
                .dispatch(
                    &mut encoder,
                    &label,
                    &program.pipeline,
                    &bind_group,
                    workgroups,
                )
                .map_err(|source| Error::Dispatch { stage, source })?;
            bind_groups.push(bind_group);
            recorded.push(stage);
        }

        let fence = self.device.submit(encoder).map_err(Error::Submit)?;
        // The wait and the bump readback share one bound.
        let deadline = Instant::now() + self.options.wait_timeout;
        self.device
            .wait(&fence, self.options.wait_timeout)
            .map_err(|e| match e {
                DeviceError::Timeout(_) => Error::Timeout(e),
                e => Error::Submit(e),
            })?;
        drop(bind_groups);

        let bump = self.read_bump(buffers, deadline.saturating_duration_since(Instant::now()))?;
        if bump.failed != 0 {
            tracing::warn!(
                "frame overflowed (flags {:#x}, seg_counts {}, segments {}, ptcl {})",
                bump.failed,
                bump.seg_counts,
                bump.segments,
                bump.ptcl
            );
            return Err(Error::Overflow { flags: bump.failed });
        }

        tracing::info!(
            "frame {}x{}: {} stages recorded, {} skipped, {} segments",
            config.target_width,
            config.target_height,
            recorded.len(),
            skipped.len(),
            bump.segments
        );
        Ok(FrameReport {
            recorded,
            skipped,
            bump,
        })
    }

    fn upload(
        &self,
        buffers: &BufferSet<D::Buffer>,
        kind: BufferKind,
        data: &[u8],
    ) -> Result<(), Error> {
        let buffer = buffers.get(kind).ok_or(Error::EmptyBufferSet)?;
        let capacity = buffers.sizes().map_or(0, |s| s.get(kind));
        if data.len() as u64 > capacity {
            return Err(Error::InputTooLarge { buffer: kind });
        }
        if data.is_empty() {
            return Ok(());
        }
        self.device
            .write_buffer(buffer, 0, data)
            .map_err(|source| Error::Upload {
                buffer: kind,
                source,
            })
    }

    fn read_bump(
        &self,
        buffers: &BufferSet<D::Buffer>,
        timeout: Duration,
    ) -> Result<BumpAllocators, Error> {
        let buffer = buffers.get(BufferKind::Bump).ok_or(Error::EmptyBufferSet)?;
        let bytes = self
            .device
            .read_buffer(buffer, timeout)
            .map_err(|source| match source {
                DeviceError::Timeout(_) => Error::Timeout(source),
                source => Error::Readback {
                    buffer: BufferKind::Bump,
                    source,
                },
            })?;
        bytemuck::try_pod_read_unaligned(&bytes[..bytes.len().min(16)]).map_err(|_| {
            Error::Readback {
                buffer: BufferKind::Bump,
                source: DeviceError::Map(format!("short read of {} bytes", bytes.len())),
            }
        })
    }

    /// Copy one buffer of the set back to the host.
    pub fn read_buffer(
        &self,
        buffers: &BufferSet<D::Buffer>,
        kind: BufferKind,
    ) -> Result<Vec<u8>, Error> {
        let buffer = buffers.get(kind).ok_or(Error::EmptyBufferSet)?;
        self.device
            .read_buffer(buffer, self.options.wait_timeout)
            .map_err(|source| Error::Readback {
                buffer: kind,
                source,
            })
    }

    /// The rendered pixels, one `0xAABBGGRR` word (RGBA bytes) per pixel in
    /// row-major order.
    pub fn read_output(&self, buffers: &BufferSet<D::Buffer>) -> Result<Vec<u32>, Error> {
        let bytes = self.read_buffer(buffers, BufferKind::Output)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Release the stage programs. The dispatcher can't be used again
    /// afterwards; calling this more than once is harmless.
    pub fn close(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let State::Initialized(_) = std::mem::replace(&mut *state, State::Closed) {
            tracing::info!("released stage programs");
        }
    }

    fn label(&self, name: &str) -> String {
        format!("{}{}", self.options.label_prefix, name)
    }
}

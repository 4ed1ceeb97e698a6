use crate::buffers::BufferKind;
use crate::device::DeviceError;
use crate::stage::Stage;

/// The resource a stage was building when it failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageResource {
    BindGroupLayout,
    PipelineLayout,
    ComputePipeline,
    BindGroup,
}

/// What an error is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorScope {
    Stage(Stage),
    Buffer(BufferKind),
    Frame,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to compile stage {stage}")]
    Compile {
        stage: Stage,
        #[source]
        source: DeviceError,
    },
    #[error("failed to create {resource:?} for stage {stage}")]
    Resource {
        stage: Stage,
        resource: StageResource,
        #[source]
        source: DeviceError,
    },
    #[error("failed to allocate {buffer} buffer of {size} bytes")]
    Buffer {
        buffer: BufferKind,
        size: u64,
        #[source]
        source: DeviceError,
    },
    #[error("failed to upload {buffer} buffer")]
    Upload {
        buffer: BufferKind,
        #[source]
        source: DeviceError,
    },
    #[error("failed to read back {buffer} buffer")]
    Readback {
        buffer: BufferKind,
        #[source]
        source: DeviceError,
    },
    #[error("failed to record stage {stage}")]
    Dispatch {
        stage: Stage,
        #[source]
        source: DeviceError,
    },
    #[error("stage {stage} needs {workgroups:?} workgroups, past the per-dimension limit")]
    TooManyWorkgroups { stage: Stage, workgroups: [u32; 3] },
    #[error("failed to submit frame")]
    Submit(#[source] DeviceError),
    #[error("frame did not complete in time")]
    Timeout(#[source] DeviceError),
    #[error("frame overflowed its allocations (flags {flags:#x})")]
    Overflow { flags: u32 },
    #[error("dispatcher is {0}")]
    InvalidState(&'static str),
    #[error("buffer set is empty")]
    EmptyBufferSet,
    #[error("{buffer} buffer size overflows")]
    InputTooLarge { buffer: BufferKind },
    #[error("dispatcher lock poisoned")]
    Poisoned,
}

impl Error {
    pub fn scope(&self) -> ErrorScope {
        match self {
            Error::Compile { stage, .. }
            | Error::Resource { stage, .. }
            | Error::Dispatch { stage, .. }
            | Error::TooManyWorkgroups { stage, .. } => ErrorScope::Stage(*stage),
            Error::Buffer { buffer, .. }
            | Error::Upload { buffer, .. }
            | Error::Readback { buffer, .. }
            | Error::InputTooLarge { buffer } => ErrorScope::Buffer(*buffer),
            Error::Submit(_)
            | Error::Timeout(_)
            | Error::Overflow { .. }
            | Error::InvalidState(_)
            | Error::EmptyBufferSet
            | Error::Poisoned => ErrorScope::Frame,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::Poisoned
    }
}

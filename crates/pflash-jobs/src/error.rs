use std::path::PathBuf;

use pflash_device::DeviceError;
use pflash_fetch::FetchError;
use thiserror::Error;

/// Rejections at submission time; nothing is queued.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("flash sequence has no partitions")]
    EmptyFlashSequence,
    #[error("download has no source URLs")]
    NoSources,
    #[error("scheduler is shut down")]
    ShutDown,
    #[error("failed to set up scheduler: {0}")]
    Setup(String),
}

/// Why a running task stopped short of success.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("`{command}` exited with code {code}")]
    NonZeroExit { command: String, code: i32 },

    #[error("image for {partition} not found: {}", .path.display())]
    MissingImage { partition: String, path: PathBuf },
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Fetch(err) => err.is_cancelled(),
            _ => false,
        }
    }
}

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessError {
    /// The tool binary is missing; platform tools have not been downloaded.
    #[error("executable not found: {} (download platform-tools first)", .path.display())]
    ExecutableNotFound { path: PathBuf },

    #[error("failed to launch {}: {message}", .path.display())]
    Launch { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("`{command}` wipes device data and needs explicit confirmation")]
    ConfirmationRequired { command: String },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("device channel is closed")]
    ChannelClosed,
}

impl DeviceError {
    pub fn is_missing_executable(&self) -> bool {
        matches!(
            self,
            DeviceError::Process(ProcessError::ExecutableNotFound { .. })
        )
    }
}

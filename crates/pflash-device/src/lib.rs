//! Serialized access to the attached device through the external adb and
//! fastboot executables.

mod channel;
mod command;
mod error;
mod process;
mod status;

pub use channel::DeviceChannel;
pub use command::{ConfirmationToken, DeviceCommand, Tool, ToolPaths};
pub use error::{DeviceError, ProcessError};
pub use process::{combine_output, ProcessResult, ProcessSession, ToolRunner};
pub use status::{
    adb_reports_device, fastboot_reports_device, parse_device_list, DeviceEntry, DeviceStatus,
    StatusReport,
};

use serde::{Deserialize, Serialize};

use crate::command::Tool;

/// Connection summary recomputed on every refresh; never persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub adb_connected: bool,
    pub fastboot_connected: bool,
}

impl DeviceStatus {
    pub fn describe(connected: bool) -> &'static str {
        if connected {
            "Device connected"
        } else {
            "No device"
        }
    }
}

/// One row of `adb devices` / `fastboot devices` output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub serial: String,
    pub state: String,
}

impl DeviceEntry {
    pub fn health(&self) -> &'static str {
        match self.state.as_str() {
            "device" => "online",
            "fastboot" => "bootloader",
            "unauthorized" => "unauthorized",
            "offline" => "offline",
            "recovery" => "recovery",
            "bootloader" => "bootloader",
            "sideload" => "sideload",
            _ => "unknown",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: DeviceStatus,
    pub devices: Vec<DeviceEntry>,
    /// Tools whose executable was missing during the refresh.
    pub missing_tools: Vec<Tool>,
}

impl StatusReport {
    pub fn tools_installed(&self) -> bool {
        self.missing_tools.is_empty()
    }
}

/// adb lists an attached, authorized device as `<serial>\tdevice`.
///
/// This is a textual heuristic: it depends on adb's output format and says
/// nothing about protocol-level state.
pub fn adb_reports_device(output: &str) -> bool {
    output.contains("\tdevice")
}

/// fastboot prints nothing at all when no device is in bootloader mode.
pub fn fastboot_reports_device(output: &str) -> bool {
    !output.trim().is_empty()
}

pub fn parse_device_list(output: &str) -> Vec<DeviceEntry> {
    let mut devices = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty()
            || line.starts_with("List of devices attached")
            || line.starts_with('*')
        {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(serial), Some(state)) = (parts.next(), parts.next()) else {
            continue;
        };
        devices.push(DeviceEntry {
            serial: serial.to_string(),
            state: state.to_string(),
        });
    }
    devices
}

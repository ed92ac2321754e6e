use std::{
    fmt,
    path::{Path, PathBuf},
};

use pflash_util::Config;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Adb,
    Fastboot,
}

impl Tool {
    pub fn name(self) -> &'static str {
        match self {
            Tool::Adb => "adb",
            Tool::Fastboot => "fastboot",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the two tool binaries live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolPaths {
    pub adb: PathBuf,
    pub fastboot: PathBuf,
}

impl ToolPaths {
    /// `<tools>/platform-tools/{adb,fastboot}`, unless `PFLASH_ADB_PATH` or
    /// `PFLASH_FASTBOOT_PATH` point elsewhere.
    pub fn from_config(cfg: &Config) -> Self {
        let mut paths = Self::in_dir(&cfg.tools_dir().join("platform-tools"));
        if let Ok(path) = std::env::var("PFLASH_ADB_PATH") {
            paths.adb = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("PFLASH_FASTBOOT_PATH") {
            paths.fastboot = PathBuf::from(path);
        }
        paths
    }

    pub fn in_dir(dir: &Path) -> Self {
        let exe = std::env::consts::EXE_SUFFIX;
        Self {
            adb: dir.join(format!("adb{exe}")),
            fastboot: dir.join(format!("fastboot{exe}")),
        }
    }

    pub fn path(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Adb => &self.adb,
            Tool::Fastboot => &self.fastboot,
        }
    }

    pub fn installed(&self) -> bool {
        self.adb.exists() && self.fastboot.exists()
    }
}

/// Proof that the user agreed to a destructive action. The front end creates
/// one only after asking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfirmationToken {
    _private: (),
}

impl ConfirmationToken {
    pub fn acknowledged() -> Self {
        Self { _private: () }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCommand {
    pub tool: Tool,
    pub args: Vec<String>,
    pub confirmation: Option<ConfirmationToken>,
}

impl DeviceCommand {
    pub fn new<I, S>(tool: Tool, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tool,
            args: args.into_iter().map(Into::into).collect(),
            confirmation: None,
        }
    }

    pub fn adb<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Tool::Adb, args)
    }

    pub fn fastboot<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Tool::Fastboot, args)
    }

    pub fn devices(tool: Tool) -> Self {
        Self::new(tool, ["devices"])
    }

    pub fn reboot_bootloader() -> Self {
        Self::adb(["reboot", "bootloader"])
    }

    pub fn reboot_system() -> Self {
        Self::adb(["reboot"])
    }

    pub fn fastboot_reboot() -> Self {
        Self::fastboot(["reboot"])
    }

    pub fn wipe_data(token: ConfirmationToken) -> Self {
        Self::fastboot(["-w"]).confirmed(token)
    }

    pub fn flash(partition: &str, image: &Path) -> Self {
        Self::fastboot([
            "flash".to_string(),
            partition.to_string(),
            image.display().to_string(),
        ])
    }

    pub fn confirmed(mut self, token: ConfirmationToken) -> Self {
        self.confirmation = Some(token);
        self
    }

    /// Fastboot invocations that erase user data: `-w`, `erase`, `format`,
    /// and bootloader unlocks.
    pub fn is_destructive(&self) -> bool {
        if self.tool != Tool::Fastboot {
            return false;
        }
        if self.args.iter().any(|arg| arg == "-w") {
            return true;
        }
        matches!(
            self.verbs().as_slice(),
            ["erase", ..] | ["format", ..] | ["flashing", "unlock", ..] | ["oem", "unlock", ..]
        )
    }

    // Positional arguments, skipping flags and the values of `-s`/`-S`/`--slot`.
    fn verbs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut skip_value = false;
        for arg in &self.args {
            if skip_value {
                skip_value = false;
                continue;
            }
            match arg.as_str() {
                "-s" | "-S" | "--slot" => skip_value = true,
                flag if flag.starts_with('-') => {}
                verb => out.push(verb),
            }
        }
        out
    }

    pub fn needs_confirmation(&self) -> bool {
        self.is_destructive() && self.confirmation.is_none()
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tool.name())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wipe_and_erase_are_destructive() {
        assert!(DeviceCommand::fastboot(["-w"]).is_destructive());
        assert!(DeviceCommand::fastboot(["erase", "userdata"]).is_destructive());
        assert!(DeviceCommand::fastboot(["-s", "ABC", "format", "cache"]).is_destructive());
        assert!(DeviceCommand::fastboot(["flashing", "unlock"]).is_destructive());
    }

    #[test]
    fn ordinary_commands_are_not_destructive() {
        assert!(!DeviceCommand::fastboot_reboot().is_destructive());
        assert!(!DeviceCommand::flash("boot", Path::new("/img/boot.img")).is_destructive());
        assert!(!DeviceCommand::adb(["-w"]).is_destructive());
        assert!(!DeviceCommand::devices(Tool::Fastboot).is_destructive());
    }

    #[test]
    fn wipe_helper_carries_its_token() {
        let wipe = DeviceCommand::wipe_data(ConfirmationToken::acknowledged());
        assert!(wipe.is_destructive());
        assert!(!wipe.needs_confirmation());
        assert!(DeviceCommand::fastboot(["-w"]).needs_confirmation());
    }

    #[test]
    fn display_joins_tool_and_args() {
        assert_eq!(
            DeviceCommand::reboot_bootloader().to_string(),
            "adb reboot bootloader"
        );
        assert_eq!(
            DeviceCommand::flash("vendor", Path::new("/img/vendor.img")).to_string(),
            "fastboot flash vendor /img/vendor.img"
        );
    }

    #[test]
    fn tool_paths_live_under_platform_tools() {
        let paths = ToolPaths::in_dir(Path::new("/data/tools/platform-tools"));
        let exe = std::env::consts::EXE_SUFFIX;
        assert_eq!(
            paths.path(Tool::Fastboot),
            Path::new(&format!("/data/tools/platform-tools/fastboot{exe}"))
        );
        assert!(!paths.installed());
    }
}

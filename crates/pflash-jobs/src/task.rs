use std::{fmt, path::PathBuf};

use pflash_device::DeviceCommand;
use pflash_fetch::DownloadSpec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Pending -> Running -> terminal, or Pending -> Cancelled. Nothing leaves
    /// a terminal state and nothing re-enters Running.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Cancelled) => true,
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashStep {
    pub partition: String,
    pub image: PathBuf,
}

/// Partitions flashed in the order given.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashSequence {
    pub steps: Vec<FlashStep>,
}

impl FlashSequence {
    pub fn new<I, P, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = (P, S)>,
        P: Into<String>,
        S: Into<PathBuf>,
    {
        Self {
            steps: steps
                .into_iter()
                .map(|(partition, image)| FlashStep {
                    partition: partition.into(),
                    image: image.into(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn partitions(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|step| step.partition.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Download,
    DeviceCommand,
    FlashSequence,
    RefreshDevices,
}

/// A unit of work for the scheduler, passed by value at submission.
#[derive(Clone, Debug)]
pub enum TaskSpec {
    Download(DownloadSpec),
    DeviceCommand(DeviceCommand),
    FlashSequence(FlashSequence),
    /// Runs `adb devices` and `fastboot devices` and publishes the result.
    RefreshDevices,
}

impl TaskSpec {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Download(_) => TaskKind::Download,
            Self::DeviceCommand(_) => TaskKind::DeviceCommand,
            Self::FlashSequence(_) => TaskKind::FlashSequence,
            Self::RefreshDevices => TaskKind::RefreshDevices,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Download(spec) => format!("download {}", spec.file_name()),
            Self::DeviceCommand(command) => command.to_string(),
            Self::FlashSequence(seq) => {
                format!("flash {}", seq.partitions().collect::<Vec<_>>().join(", "))
            }
            Self::RefreshDevices => "refresh devices".to_string(),
        }
    }
}

impl From<DownloadSpec> for TaskSpec {
    fn from(spec: DownloadSpec) -> Self {
        Self::Download(spec)
    }
}

impl From<DeviceCommand> for TaskSpec {
    fn from(command: DeviceCommand) -> Self {
        Self::DeviceCommand(command)
    }
}

impl From<FlashSequence> for TaskSpec {
    fn from(seq: FlashSequence) -> Self {
        Self::FlashSequence(seq)
    }
}

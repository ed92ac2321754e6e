use pflash_device::{DeviceChannel, DeviceCommand, DeviceError, DeviceStatus};
use pflash_fetch::{ArtifactFetcher, CancelRx, DownloadSpec, FetchError, FetchEvent};

use crate::error::TaskError;
use crate::events::{EventBus, EventLevel, EventPayload};
use crate::task::{FlashSequence, TaskId, TaskSpec};

/// Everything a running task may touch. Owned so the task can run on its own
/// tokio task.
#[derive(Clone)]
pub(crate) struct TaskContext {
    pub id: TaskId,
    pub bus: EventBus,
    pub cancel: CancelRx,
    pub fetcher: ArtifactFetcher,
    pub device: DeviceChannel,
}

impl TaskContext {
    fn check_cancel(&self) -> Result<(), TaskError> {
        if *self.cancel.borrow() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn log(&self, message: impl Into<String>) {
        self.bus.log(Some(self.id), message);
    }

    fn warn(&self, message: impl Into<String>) {
        self.bus.warn(Some(self.id), message);
    }

    fn error(&self, message: impl Into<String>) {
        self.bus.error(Some(self.id), message);
    }
}

pub(crate) async fn run_task(ctx: TaskContext, spec: TaskSpec) -> Result<(), TaskError> {
    ctx.check_cancel()?;
    match spec {
        TaskSpec::Download(spec) => run_download(&ctx, &spec).await,
        TaskSpec::DeviceCommand(command) => run_device_command(&ctx, command).await,
        TaskSpec::FlashSequence(seq) => run_flash_sequence(&ctx, &seq).await,
        TaskSpec::RefreshDevices => refresh_devices(&ctx).await,
    }
}

async fn run_download(ctx: &TaskContext, spec: &DownloadSpec) -> Result<(), TaskError> {
    let name = spec.file_name();
    ctx.log(format!("Downloading {name}..."));

    let bus = ctx.bus.clone();
    let id = ctx.id;
    let label = name.clone();
    let mut on_event = move |event: FetchEvent| forward_fetch_event(&bus, id, &label, event);

    match ctx
        .fetcher
        .fetch_spec(spec, Some(&ctx.cancel), &mut on_event)
        .await
    {
        Ok(outcome) => {
            if outcome.extracted_to.is_none() {
                ctx.log(format!("Saved {name}."));
            }
            Ok(())
        }
        Err(err @ FetchError::Integrity { .. }) => {
            ctx.error(format!("Downloaded {name} is corrupted."));
            Err(err.into())
        }
        Err(err @ FetchError::AllSourcesExhausted { .. }) => {
            if let FetchError::AllSourcesExhausted {
                fallback: Some(url),
                ..
            } = &err
            {
                ctx.error(format!(
                    "Failed to download {name}. Download it manually from {url}"
                ));
            } else {
                ctx.error(format!("Failed to download {name}."));
            }
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

fn forward_fetch_event(bus: &EventBus, id: TaskId, name: &str, event: FetchEvent) {
    match event {
        FetchEvent::AttemptStarted { url, .. } => {
            bus.log(Some(id), format!("Fetching {url}"));
        }
        FetchEvent::Progress { percent, .. } => {
            bus.progress(id, percent, format!("Downloading {name}: {percent}%"));
        }
        FetchEvent::AttemptFailed { url, error } => {
            bus.warn(Some(id), format!("Download failed: {url} ({error})"));
        }
        FetchEvent::Completed { bytes, .. } => {
            bus.log(Some(id), format!("Downloaded {name} ({bytes} bytes)."));
        }
        FetchEvent::Verified { sha256 } => {
            bus.log(Some(id), format!("Checksum verified: {sha256}"));
        }
        FetchEvent::Extracted { dir, files } => {
            bus.log(
                Some(id),
                format!("Extracted {files} files from {name} into {}.", dir.display()),
            );
        }
    }
}

async fn run_device_command(ctx: &TaskContext, command: DeviceCommand) -> Result<(), TaskError> {
    let rendered = command.to_string();
    let tool = command.tool;
    ctx.log(format!("Running: {rendered}"));

    let result = match ctx.device.enqueue(command).await {
        Ok(result) => result,
        Err(err) => {
            match &err {
                DeviceError::ConfirmationRequired { .. } => {
                    ctx.error(format!("Refusing to run `{rendered}` without confirmation."));
                }
                err if err.is_missing_executable() => {
                    ctx.error(format!("{tool} not found. Download platform-tools first."));
                }
                _ => {}
            }
            return Err(err.into());
        }
    };

    for line in result.lines() {
        ctx.log(line);
    }
    if !result.success() {
        return Err(TaskError::NonZeroExit {
            command: rendered,
            code: result.exit_code,
        });
    }
    ctx.check_cancel()
}

async fn run_flash_sequence(ctx: &TaskContext, seq: &FlashSequence) -> Result<(), TaskError> {
    for step in &seq.steps {
        ctx.check_cancel()?;
        ctx.log(format!(
            "Flashing {} from {}...",
            step.partition,
            step.image.display()
        ));
        if !step.image.is_file() {
            return Err(TaskError::MissingImage {
                partition: step.partition.clone(),
                path: step.image.clone(),
            });
        }
        run_device_command(ctx, DeviceCommand::flash(&step.partition, &step.image)).await?;
    }
    ctx.log("Flash sequence complete.");
    Ok(())
}

async fn refresh_devices(ctx: &TaskContext) -> Result<(), TaskError> {
    let report = ctx.device.query_status().await?;
    let status = report.status;
    ctx.bus.publish(
        EventLevel::Info,
        Some(ctx.id),
        format!(
            "ADB: {} / Fastboot: {}",
            DeviceStatus::describe(status.adb_connected),
            DeviceStatus::describe(status.fastboot_connected)
        ),
        EventPayload::DeviceStatus { status },
    );
    if report.tools_installed() {
        ctx.log("Refreshed device status.");
    } else {
        ctx.warn("Platform-tools not installed. Download them in Setup.");
    }
    Ok(())
}

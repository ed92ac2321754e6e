use std::{future::Future, sync::Arc};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::command::{DeviceCommand, Tool, ToolPaths};
use crate::error::{DeviceError, ProcessError};
use crate::process::{ProcessResult, ProcessSession, ToolRunner};
use crate::status::{
    adb_reports_device, fastboot_reports_device, parse_device_list, DeviceStatus, StatusReport,
};

type Reply = oneshot::Sender<Result<ProcessResult, ProcessError>>;

struct QueuedCommand {
    command: DeviceCommand,
    reply: Reply,
}

/// Single-flight queue in front of the one attached device.
///
/// Every adb/fastboot invocation goes through one consumer task, so commands
/// run strictly in the order `enqueue` was called and never overlap. Once
/// queued, a command runs even if its caller stops waiting.
#[derive(Clone)]
pub struct DeviceChannel {
    tx: mpsc::UnboundedSender<QueuedCommand>,
    tools: Arc<ToolPaths>,
}

impl DeviceChannel {
    /// Starts the consumer task; must be called inside a tokio runtime.
    pub fn new(tools: ToolPaths, runner: Arc<dyn ToolRunner>) -> Self {
        let tools = Arc::new(tools);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(rx, runner, Arc::clone(&tools)));
        Self { tx, tools }
    }

    pub fn with_process_session(tools: ToolPaths) -> Self {
        Self::new(tools, Arc::new(ProcessSession))
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    /// Queues `command` and returns a future for its result.
    ///
    /// The queue position is taken when this is called, not when the future
    /// is first polled. Destructive commands without a confirmation token are
    /// rejected here and never reach the runner.
    pub fn enqueue(
        &self,
        command: DeviceCommand,
    ) -> impl Future<Output = Result<ProcessResult, DeviceError>> + Send + 'static {
        let queued = self.push(command);
        async move {
            let rx = queued?;
            let result = rx.await.map_err(|_| DeviceError::ChannelClosed)?;
            result.map_err(DeviceError::from)
        }
    }

    fn push(
        &self,
        command: DeviceCommand,
    ) -> Result<oneshot::Receiver<Result<ProcessResult, ProcessError>>, DeviceError> {
        if command.needs_confirmation() {
            warn!("Rejected unconfirmed destructive command: {command}");
            return Err(DeviceError::ConfirmationRequired {
                command: command.to_string(),
            });
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QueuedCommand { command, reply })
            .map_err(|_| DeviceError::ChannelClosed)?;
        Ok(rx)
    }

    /// Runs `adb devices` then `fastboot devices` through the queue.
    pub async fn query_status(&self) -> Result<StatusReport, DeviceError> {
        let adb = self.enqueue(DeviceCommand::devices(Tool::Adb));
        let fastboot = self.enqueue(DeviceCommand::devices(Tool::Fastboot));

        let mut report = StatusReport::default();
        if let Some(output) = collect(Tool::Adb, adb.await, &mut report)? {
            report.status.adb_connected = adb_reports_device(&output);
            report.devices.extend(parse_device_list(&output));
        }
        if let Some(output) = collect(Tool::Fastboot, fastboot.await, &mut report)? {
            report.status.fastboot_connected = fastboot_reports_device(&output);
            report.devices.extend(parse_device_list(&output));
        }

        info!(
            "Device status: adb={}, fastboot={}",
            DeviceStatus::describe(report.status.adb_connected),
            DeviceStatus::describe(report.status.fastboot_connected)
        );
        Ok(report)
    }
}

// A missing tool counts as "not connected"; a closed channel is an error.
fn collect(
    tool: Tool,
    result: Result<ProcessResult, DeviceError>,
    report: &mut StatusReport,
) -> Result<Option<String>, DeviceError> {
    match result {
        Ok(out) => Ok(Some(out.combined_output)),
        Err(err) if err.is_missing_executable() => {
            report.missing_tools.push(tool);
            Ok(None)
        }
        Err(DeviceError::ChannelClosed) => Err(DeviceError::ChannelClosed),
        Err(err) => {
            warn!("{tool} devices failed: {err}");
            Ok(None)
        }
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<QueuedCommand>,
    runner: Arc<dyn ToolRunner>,
    tools: Arc<ToolPaths>,
) {
    while let Some(QueuedCommand { command, reply }) = rx.recv().await {
        let executable = tools.path(command.tool);
        debug!("device channel: running {command}");
        let result = runner.run(executable, &command.args).await;
        if let Err(err) = &result {
            debug!("device channel: {command} failed: {err}");
        }
        if reply.send(result).is_err() {
            debug!("device channel: caller went away before {command} finished");
        }
    }
    debug!("device channel closed");
}

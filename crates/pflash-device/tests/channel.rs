use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use pflash_device::{
    ConfirmationToken, DeviceChannel, DeviceCommand, DeviceError, ProcessError, ProcessResult,
    Tool, ToolPaths, ToolRunner,
};

/// Records every invocation and the peak number running at once.
#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    outputs: Mutex<Vec<(String, ProcessResult)>>,
    missing: Mutex<Vec<PathBuf>>,
}

impl RecordingRunner {
    fn respond(&self, args: &str, output: &str, exit_code: i32) {
        self.outputs.lock().unwrap().push((
            args.to_string(),
            ProcessResult {
                combined_output: output.to_string(),
                exit_code,
            },
        ));
    }

    fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, args)| args.join(" "))
            .collect()
    }
}

#[async_trait]
impl ToolRunner for RecordingRunner {
    async fn run(&self, executable: &Path, args: &[String]) -> Result<ProcessResult, ProcessError> {
        if self.missing.lock().unwrap().iter().any(|p| p == executable) {
            return Err(ProcessError::ExecutableNotFound {
                path: executable.to_path_buf(),
            });
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((executable.to_path_buf(), args.to_vec()));

        tokio::time::sleep(Duration::from_millis(5)).await;

        let joined = args.join(" ");
        let result = self
            .outputs
            .lock()
            .unwrap()
            .iter()
            .find(|(key, _)| *key == joined)
            .map(|(_, result)| result.clone())
            .unwrap_or_default();
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }
}

fn tools() -> ToolPaths {
    ToolPaths {
        adb: PathBuf::from("/fake/platform-tools/adb"),
        fastboot: PathBuf::from("/fake/platform-tools/fastboot"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_never_overlap_and_keep_their_order() {
    let runner = Arc::new(RecordingRunner::default());
    let channel = DeviceChannel::new(tools(), runner.clone());

    let mut callers = Vec::new();
    for caller in 0..4 {
        let channel = channel.clone();
        callers.push(tokio::spawn(async move {
            for step in 0..5 {
                channel
                    .enqueue(DeviceCommand::adb([
                        "shell".to_string(),
                        format!("c{caller}-s{step}"),
                    ]))
                    .await
                    .unwrap();
            }
        }));
    }
    for caller in callers {
        caller.await.unwrap();
    }

    assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
    let calls = runner.calls();
    assert_eq!(calls.len(), 20);
    for caller in 0..4 {
        let own: Vec<&String> = calls
            .iter()
            .filter(|c| c.contains(&format!("c{caller}-")))
            .collect();
        let expected: Vec<String> = (0..5).map(|s| format!("shell c{caller}-s{s}")).collect();
        assert_eq!(own, expected.iter().collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn commands_run_in_submission_order() {
    let runner = Arc::new(RecordingRunner::default());
    let channel = DeviceChannel::new(tools(), runner.clone());

    let first = channel.enqueue(DeviceCommand::reboot_bootloader());
    let second = channel.enqueue(DeviceCommand::fastboot_reboot());
    let third = channel.enqueue(DeviceCommand::devices(Tool::Fastboot));

    // Await out of order: the queue position was fixed at enqueue time.
    third.await.unwrap();
    second.await.unwrap();
    first.await.unwrap();

    assert_eq!(runner.calls(), vec!["reboot bootloader", "reboot", "devices"]);
    let paths: Vec<PathBuf> = runner
        .calls
        .lock()
        .unwrap()
        .iter()
        .map(|(p, _)| p.clone())
        .collect();
    assert_eq!(paths[0], tools().adb);
    assert_eq!(paths[1], tools().fastboot);
}

#[tokio::test]
async fn unconfirmed_wipe_never_reaches_the_runner() {
    let runner = Arc::new(RecordingRunner::default());
    let channel = DeviceChannel::new(tools(), runner.clone());

    let err = channel
        .enqueue(DeviceCommand::fastboot(["-w"]))
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::ConfirmationRequired { .. }), "{err:?}");

    let err = channel
        .enqueue(DeviceCommand::fastboot(["erase", "userdata"]))
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::ConfirmationRequired { .. }));

    // Let the consumer task run in case anything slipped through.
    channel
        .enqueue(DeviceCommand::devices(Tool::Adb))
        .await
        .unwrap();
    assert_eq!(runner.calls(), vec!["devices"]);
}

#[tokio::test]
async fn confirmed_wipe_is_executed() {
    let runner = Arc::new(RecordingRunner::default());
    runner.respond("-w", "Erasing 'userdata'\nOKAY", 0);
    let channel = DeviceChannel::new(tools(), runner.clone());

    let result = channel
        .enqueue(DeviceCommand::wipe_data(ConfirmationToken::acknowledged()))
        .await
        .unwrap();

    assert!(result.success());
    assert_eq!(runner.calls(), vec!["-w"]);
}

#[tokio::test]
async fn non_zero_exit_is_reported_not_raised() {
    let runner = Arc::new(RecordingRunner::default());
    runner.respond("reboot", "error: no devices/emulators found", 1);
    let channel = DeviceChannel::new(tools(), runner.clone());

    let result = channel
        .enqueue(DeviceCommand::reboot_system())
        .await
        .unwrap();
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.combined_output, "error: no devices/emulators found");
}

#[tokio::test]
async fn status_uses_both_tools_through_the_queue() {
    let runner = Arc::new(RecordingRunner::default());
    runner.respond("devices", "List of devices attached\nR58M123ABC\tdevice", 0);
    let channel = DeviceChannel::new(tools(), runner.clone());

    let report = channel.query_status().await.unwrap();

    assert!(report.status.adb_connected);
    // Same canned output for fastboot: any output means connected.
    assert!(report.status.fastboot_connected);
    assert!(report.tools_installed());
    assert_eq!(runner.calls(), vec!["devices", "devices"]);
}

#[tokio::test]
async fn missing_tools_mean_not_connected() {
    let runner = Arc::new(RecordingRunner::default());
    runner.missing.lock().unwrap().push(tools().fastboot);
    let channel = DeviceChannel::new(tools(), runner.clone());

    let report = channel.query_status().await.unwrap();

    assert!(!report.status.adb_connected);
    assert!(!report.status.fastboot_connected);
    assert_eq!(report.missing_tools, vec![Tool::Fastboot]);
}

#[tokio::test]
async fn real_session_reports_missing_executable() {
    let dir = tempfile::tempdir().unwrap();
    let channel = DeviceChannel::with_process_session(ToolPaths::in_dir(dir.path()));

    let err = channel
        .enqueue(DeviceCommand::devices(Tool::Adb))
        .await
        .unwrap_err();

    assert!(err.is_missing_executable(), "{err:?}");
    let report = channel.query_status().await.unwrap();
    assert_eq!(report.missing_tools, vec![Tool::Adb, Tool::Fastboot]);
}

#![cfg(unix)]

use std::path::Path;

use pflash_device::{ProcessError, ProcessSession, ToolRunner};

fn sh(script: &str) -> Vec<String> {
    vec!["-c".to_string(), script.to_string()]
}

#[tokio::test]
async fn merges_stdout_before_stderr() {
    let result = ProcessSession
        .run(Path::new("/bin/sh"), &sh("echo out; echo err 1>&2"))
        .await
        .unwrap();

    assert_eq!(result.combined_output, "out\nerr");
    assert_eq!(result.exit_code, 0);
}

#[tokio::test]
async fn non_zero_exit_is_returned() {
    let result = ProcessSession
        .run(Path::new("/bin/sh"), &sh("echo 'no devices' 1>&2; exit 3"))
        .await
        .unwrap();

    assert_eq!(result.exit_code, 3);
    assert!(!result.success());
    assert_eq!(result.combined_output, "no devices");
}

#[tokio::test]
async fn missing_path_is_executable_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("platform-tools/fastboot");

    let err = ProcessSession.run(&missing, &[]).await.unwrap_err();

    assert_eq!(err, ProcessError::ExecutableNotFound { path: missing });
}

#[tokio::test]
async fn unknown_bare_name_is_executable_not_found() {
    let err = ProcessSession
        .run(Path::new("pflash-no-such-tool-7c1d"), &[])
        .await
        .unwrap_err();

    assert!(matches!(err, ProcessError::ExecutableNotFound { .. }), "{err:?}");
}

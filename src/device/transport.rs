// src/device/transport.rs
// module: device | layer: adapters (outbound port) | role: shell transport
// summary: the external collaborator boundary for process management (SPEC_FULL.md §4.1).
// A production implementation shells out to a real `adb` binary; tests substitute an
// in-memory fake. Grounded on the teacher's services/adb basic/adb_ui_automation.rs,
// which always goes through a single `execute_adb_command` chokepoint.

use async_trait::async_trait;

use crate::error::AgentResult;

/// Abstraction over the device shell contract of SPEC_FULL.md §6: `tap`, `swipe`,
/// `text`, `keyevent`, `wm size`, and screencap via exec-out or pull.
#[async_trait]
pub trait ShellTransport: Send + Sync {
    /// Runs `adb -s <device_id> shell <command>` and returns trimmed stdout.
    async fn shell(&self, device_id: &str, command: &str) -> AgentResult<String>;

    /// Runs `adb -s <device_id> exec-out <command>` and returns raw stdout bytes.
    /// Used for the fast screencap path.
    async fn exec_out(&self, device_id: &str, command: &str) -> AgentResult<Vec<u8>>;

    /// Pulls a device-side file's bytes. Used for the screencap fallback path
    /// (`/sdcard/screen.png`) when `exec_out` is unavailable or fails.
    async fn pull_file(&self, device_id: &str, remote_path: &str) -> AgentResult<Vec<u8>>;

    /// Whether any device (or the configured serial) is currently reachable.
    async fn is_connected(&self, device_id: Option<&str>) -> bool;
}

/// Production transport: shells out to a real `adb` binary on PATH.
pub struct AdbShellTransport {
    adb_path: String,
}

impl AdbShellTransport {
    pub fn new() -> Self {
        Self {
            adb_path: "adb".to_string(),
        }
    }

    pub fn with_adb_path(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
        }
    }

    fn device_args(device_id: &str) -> Vec<String> {
        vec!["-s".to_string(), device_id.to_string()]
    }
}

impl Default for AdbShellTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShellTransport for AdbShellTransport {
    async fn shell(&self, device_id: &str, command: &str) -> AgentResult<String> {
        let mut args = Self::device_args(device_id);
        args.push("shell".to_string());
        args.extend(command.split_whitespace().map(str::to_string));

        let output = tokio::process::Command::new(&self.adb_path)
            .args(&args)
            .output()
            .await
            .map_err(|e| crate::error::AgentError::transport(format!("failed to spawn adb: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(crate::error::AgentError::transport(format!(
                "adb shell exited with {}: {}",
                output.status, stderr
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn exec_out(&self, device_id: &str, command: &str) -> AgentResult<Vec<u8>> {
        let mut args = Self::device_args(device_id);
        args.push("exec-out".to_string());
        args.extend(command.split_whitespace().map(str::to_string));

        let output = tokio::process::Command::new(&self.adb_path)
            .args(&args)
            .output()
            .await
            .map_err(|e| crate::error::AgentError::transport(format!("failed to spawn adb: {e}")))?;

        if !output.status.success() {
            return Err(crate::error::AgentError::transport(format!(
                "adb exec-out exited with {}",
                output.status
            )));
        }

        Ok(output.stdout)
    }

    async fn pull_file(&self, device_id: &str, remote_path: &str) -> AgentResult<Vec<u8>> {
        let tmp = tempfile::NamedTempFile::new()
            .map_err(|e| crate::error::AgentError::transport(format!("tempfile failed: {e}")))?;
        let tmp_path = tmp.path().to_path_buf();

        let mut args = Self::device_args(device_id);
        args.push("pull".to_string());
        args.push(remote_path.to_string());
        args.push(tmp_path.to_string_lossy().to_string());

        let output = tokio::process::Command::new(&self.adb_path)
            .args(&args)
            .output()
            .await
            .map_err(|e| crate::error::AgentError::transport(format!("failed to spawn adb: {e}")))?;

        if !output.status.success() {
            return Err(crate::error::AgentError::transport(format!(
                "adb pull exited with {}",
                output.status
            )));
        }

        tokio::fs::read(&tmp_path)
            .await
            .map_err(|e| crate::error::AgentError::transport(format!("failed to read pulled file: {e}")))
    }

    async fn is_connected(&self, device_id: Option<&str>) -> bool {
        let mut args = vec!["devices".to_string()];
        if device_id.is_some() {
            // `adb devices` doesn't take -s; filter output below instead.
        }
        let output = tokio::process::Command::new(&self.adb_path)
            .args(&mut args)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                let text = String::from_utf8_lossy(&out.stdout);
                match device_id {
                    Some(id) => text.lines().any(|l| l.starts_with(id) && l.contains("device")),
                    None => text.lines().skip(1).any(|l| l.contains("\tdevice")),
                }
            }
            _ => false,
        }
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Scripted in-memory transport for unit tests: records every invocation
    /// and replays queued responses (or a default success).
    pub struct FakeShellTransport {
        pub shell_responses: Mutex<VecDeque<AgentResult<String>>>,
        pub exec_out_responses: Mutex<VecDeque<AgentResult<Vec<u8>>>>,
        pub invocations: Mutex<Vec<String>>,
        pub connected: Mutex<bool>,
    }

    impl FakeShellTransport {
        pub fn new() -> Self {
            Self {
                shell_responses: Mutex::new(VecDeque::new()),
                exec_out_responses: Mutex::new(VecDeque::new()),
                invocations: Mutex::new(Vec::new()),
                connected: Mutex::new(true),
            }
        }

        pub fn push_shell_ok(&self, response: impl Into<String>) {
            self.shell_responses.lock().push_back(Ok(response.into()));
        }

        pub fn push_shell_err(&self, message: impl Into<String>) {
            self.shell_responses
                .lock()
                .push_back(Err(crate::error::AgentError::transport(message.into())));
        }
    }

    #[async_trait]
    impl ShellTransport for FakeShellTransport {
        async fn shell(&self, _device_id: &str, command: &str) -> AgentResult<String> {
            self.invocations.lock().push(command.to_string());
            self.shell_responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok("OK".to_string()))
        }

        async fn exec_out(&self, _device_id: &str, command: &str) -> AgentResult<Vec<u8>> {
            self.invocations.lock().push(format!("exec-out {command}"));
            self.exec_out_responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn pull_file(&self, _device_id: &str, remote_path: &str) -> AgentResult<Vec<u8>> {
            self.invocations.lock().push(format!("pull {remote_path}"));
            Ok(Vec::new())
        }

        async fn is_connected(&self, _device_id: Option<&str>) -> bool {
            *self.connected.lock()
        }
    }
}

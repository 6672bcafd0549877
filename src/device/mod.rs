// src/device/mod.rs
// module: device | role: Device Driver (C1)
// summary: the primitive surface every node in the Step Graph eventually bottoms out
// on (SPEC_FULL.md §4.1): tap/swipe/text/key + screenshot + geometry, all retried
// and cooperatively cancellable. Grounded on the teacher's
// services/adb/basic/adb_ui_automation.rs tap_screen/swipe_screen/input_text/key_event
// method shapes, generalized onto a `ShellTransport` port so the real `adb` binary
// can be swapped for a scripted fake in tests.

pub mod transport;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::controller::ExecutionController;
use crate::error::{AgentError, AgentResult};
use transport::ShellTransport;

/// Result shape every primitive returns (SPEC_FULL.md §4.1 contract).
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ActionOutcome {
    fn ok(output: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            duration_ms,
        }
    }

    fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// Device metadata returned by `device_info`.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub serial: String,
    pub model: String,
    pub os_version: String,
    pub width: u32,
    pub height: u32,
    pub density: u32,
}

/// Named keyevent codes (SPEC_FULL.md §6 device shell contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Home,
    Back,
    Enter,
    Menu,
    RecentApps,
    Raw(u32),
}

impl KeyCode {
    fn code(self) -> u32 {
        match self {
            KeyCode::Home => 3,
            KeyCode::Back => 4,
            KeyCode::Enter => 66,
            KeyCode::Menu => 82,
            KeyCode::RecentApps => 187,
            KeyCode::Raw(n) => n,
        }
    }
}

struct Geometry {
    width: u32,
    height: u32,
}

/// The Device Driver: wraps a `ShellTransport`, an `ExecutionController`, and
/// cached screen geometry behind the primitive surface the Step Graph calls.
pub struct DeviceDriver {
    transport: Arc<dyn ShellTransport>,
    controller: ExecutionController,
    device_id: String,
    retry_count: u32,
    timeout: Duration,
    geometry: RwLock<Option<Geometry>>,
}

impl DeviceDriver {
    pub fn new(
        transport: Arc<dyn ShellTransport>,
        controller: ExecutionController,
        device_id: impl Into<String>,
        retry_count: u32,
        timeout_ms: u64,
    ) -> Self {
        Self {
            transport,
            controller,
            device_id: device_id.into(),
            retry_count,
            timeout: Duration::from_millis(timeout_ms),
            geometry: RwLock::new(None),
        }
    }

    /// Runs `op` up to `retry_count + 1` times with linear backoff, short-circuiting
    /// on a stop request (SPEC_FULL.md §4.1 Retries).
    async fn with_retry<F, Fut>(&self, label: &str, op: F) -> ActionOutcome
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = AgentResult<String>>,
    {
        let start = Instant::now();
        let mut last_err = String::new();

        for attempt in 0..=self.retry_count {
            if !self.controller.check_and_wait() {
                return ActionOutcome::failed("stopped", elapsed_ms(start));
            }

            let attempt_result = tokio::time::timeout(self.timeout, op()).await;
            match attempt_result {
                Ok(Ok(output)) => return ActionOutcome::ok(output, elapsed_ms(start)),
                Ok(Err(e)) => {
                    last_err = e.to_string();
                    warn!(op = label, attempt, error = %last_err, "device primitive failed, retrying");
                }
                Err(_) => {
                    last_err = format!("{label} timed out after {:?}", self.timeout);
                    warn!(op = label, attempt, "device primitive timed out");
                }
            }

            if attempt < self.retry_count {
                tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1))).await;
            }
        }

        ActionOutcome::failed(last_err, elapsed_ms(start))
    }

    /// Same retry/backoff/stop semantics as `with_retry`, but for primitives
    /// whose successful result is a byte buffer (`screenshot`) rather than
    /// shell-command text.
    async fn with_retry_bytes<F, Fut>(&self, label: &str, op: F) -> AgentResult<Vec<u8>>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = AgentResult<Vec<u8>>>,
    {
        let mut last_err = String::new();

        for attempt in 0..=self.retry_count {
            if !self.controller.check_and_wait() {
                return Err(AgentError::transport("stopped"));
            }

            let attempt_result = tokio::time::timeout(self.timeout, op()).await;
            match attempt_result {
                Ok(Ok(bytes)) => return Ok(bytes),
                Ok(Err(e)) => {
                    last_err = e.to_string();
                    warn!(op = label, attempt, error = %last_err, "device primitive failed, retrying");
                }
                Err(_) => {
                    last_err = format!("{label} timed out after {:?}", self.timeout);
                    warn!(op = label, attempt, "device primitive timed out");
                }
            }

            if attempt < self.retry_count {
                tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1))).await;
            }
        }

        Err(AgentError::transport(last_err))
    }

    pub async fn tap(&self, x: i32, y: i32) -> ActionOutcome {
        self.with_retry("tap", || {
            let cmd = format!("input tap {x} {y}");
            let transport = &self.transport;
            let device_id = self.device_id.clone();
            async move { transport.shell(&device_id, &cmd).await }
        })
        .await
    }

    pub async fn double_tap(&self, x: i32, y: i32, delay_ms: u64) -> ActionOutcome {
        let first = self.tap(x, y).await;
        if !first.success {
            return first;
        }
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        self.tap(x, y).await
    }

    pub async fn long_press(&self, x: i32, y: i32, duration_ms: u64) -> ActionOutcome {
        self.swipe(x, y, x, y, duration_ms).await
    }

    pub async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u64) -> ActionOutcome {
        self.with_retry("swipe", || {
            let cmd = format!("input swipe {x1} {y1} {x2} {y2} {duration_ms}");
            let transport = &self.transport;
            let device_id = self.device_id.clone();
            async move { transport.shell(&device_id, &cmd).await }
        })
        .await
    }

    pub async fn swipe_up(&self, distance: i32, duration_ms: u64) -> ActionOutcome {
        let (w, h) = self.current_geometry().await;
        let cx = (w / 2) as i32;
        let cy = (h / 2) as i32;
        self.swipe(cx, cy, cx, cy - distance, duration_ms).await
    }

    pub async fn swipe_down(&self, distance: i32, duration_ms: u64) -> ActionOutcome {
        let (w, h) = self.current_geometry().await;
        let cx = (w / 2) as i32;
        let cy = (h / 2) as i32;
        self.swipe(cx, cy, cx, cy + distance, duration_ms).await
    }

    pub async fn swipe_left(&self, distance: i32, duration_ms: u64) -> ActionOutcome {
        let (w, h) = self.current_geometry().await;
        let cx = (w / 2) as i32;
        let cy = (h / 2) as i32;
        self.swipe(cx, cy, cx - distance, cy, duration_ms).await
    }

    pub async fn swipe_right(&self, distance: i32, duration_ms: u64) -> ActionOutcome {
        let (w, h) = self.current_geometry().await;
        let cx = (w / 2) as i32;
        let cy = (h / 2) as i32;
        self.swipe(cx, cy, cx + distance, cy, duration_ms).await
    }

    /// Whitespace must be transparently escaped for the underlying shell
    /// (SPEC_FULL.md §4.1): android's `input text` expects `%s` in place of spaces.
    pub async fn input_text(&self, text: &str) -> ActionOutcome {
        let escaped = escape_input_text(text);
        self.with_retry("input_text", || {
            let cmd = format!("input text {escaped}");
            let transport = &self.transport;
            let device_id = self.device_id.clone();
            async move { transport.shell(&device_id, &cmd).await }
        })
        .await
    }

    pub async fn press_key(&self, key: KeyCode) -> ActionOutcome {
        self.with_retry("press_key", || {
            let cmd = format!("input keyevent {}", key.code());
            let transport = &self.transport;
            let device_id = self.device_id.clone();
            async move { transport.shell(&device_id, &cmd).await }
        })
        .await
    }

    pub async fn press_home(&self) -> ActionOutcome {
        self.press_key(KeyCode::Home).await
    }

    pub async fn press_back(&self) -> ActionOutcome {
        self.press_key(KeyCode::Back).await
    }

    pub async fn press_enter(&self) -> ActionOutcome {
        self.press_key(KeyCode::Enter).await
    }

    pub async fn press_menu(&self) -> ActionOutcome {
        self.press_key(KeyCode::Menu).await
    }

    /// Captures at full device resolution, never resized (SPEC_FULL.md §4.1).
    /// Fallback order: exec-out first, then pull of `/sdcard/screen.png`. Like
    /// every other primitive, the whole capture is retried as a unit through
    /// `with_retry_bytes` rather than calling the transport directly.
    pub async fn screenshot(&self) -> AgentResult<(Vec<u8>, u32, u32)> {
        if !self.controller.check_and_wait() {
            return Err(AgentError::transport("stopped"));
        }

        let bytes = self
            .with_retry_bytes("screenshot", || {
                let transport = &self.transport;
                let device_id = self.device_id.clone();
                async move {
                    match transport.exec_out(&device_id, "screencap -p").await {
                        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
                        _ => {
                            debug!("exec-out screencap unavailable, falling back to pull");
                            transport
                                .shell(&device_id, "screencap -p /sdcard/screen.png")
                                .await?;
                            transport.pull_file(&device_id, "/sdcard/screen.png").await
                        }
                    }
                }
            })
            .await?;

        let (w, h) = self.current_geometry().await;
        Ok((bytes, w, h))
    }

    pub async fn connected(&self) -> bool {
        self.transport.is_connected(Some(&self.device_id)).await
    }

    pub async fn device_info(&self) -> AgentResult<DeviceInfo> {
        let model = self
            .transport
            .shell(&self.device_id, "getprop ro.product.model")
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        let os_version = self
            .transport
            .shell(&self.device_id, "getprop ro.build.version.release")
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        let density = self
            .transport
            .shell(&self.device_id, "wm density")
            .await
            .ok()
            .and_then(|s| parse_density(&s))
            .unwrap_or(160);
        let (width, height) = self.current_geometry().await;

        Ok(DeviceInfo {
            serial: self.device_id.clone(),
            model,
            os_version,
            width,
            height,
            density,
        })
    }

    pub async fn screen_dimensions(&self) -> (u32, u32) {
        self.current_geometry().await
    }

    /// Holds last known geometry; re-queries only if absent or zero
    /// (SPEC_FULL.md §4.1 State).
    async fn current_geometry(&self) -> (u32, u32) {
        if let Some(g) = self.geometry.read().as_ref() {
            if g.width > 0 && g.height > 0 {
                return (g.width, g.height);
            }
        }

        let (w, h) = self.query_wm_size().await.unwrap_or((0, 0));
        *self.geometry.write() = Some(Geometry { width: w, height: h });
        (w, h)
    }

    async fn query_wm_size(&self) -> AgentResult<(u32, u32)> {
        let output = self.transport.shell(&self.device_id, "wm size").await?;
        parse_wm_size(&output)
            .ok_or_else(|| AgentError::transport(format!("could not parse wm size output: {output}")))
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Android's `input text` shell command requires `%s` in place of literal spaces.
fn escape_input_text(text: &str) -> String {
    text.replace(' ', "%s")
}

/// `wm size` returns lines like `Physical size: 1920x1080` and optionally an
/// `Override size:` line which, when present, takes precedence.
fn parse_wm_size(output: &str) -> Option<(u32, u32)> {
    let mut physical = None;
    let mut override_size = None;

    for line in output.lines() {
        if let Some(rest) = line.trim().strip_prefix("Physical size:") {
            physical = parse_wxh(rest.trim());
        } else if let Some(rest) = line.trim().strip_prefix("Override size:") {
            override_size = parse_wxh(rest.trim());
        }
    }

    override_size.or(physical)
}

fn parse_wxh(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn parse_density(output: &str) -> Option<u32> {
    output
        .lines()
        .find_map(|l| l.trim().strip_prefix("Physical density:"))
        .and_then(|rest| rest.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::transport::fake::FakeShellTransport;
    use super::*;

    fn driver_with_fake(fake: Arc<FakeShellTransport>) -> DeviceDriver {
        let controller = ExecutionController::new();
        controller.start();
        DeviceDriver::new(fake, controller, "emulator-5554", 2, 1_000)
    }

    #[tokio::test]
    async fn tap_sends_input_tap_command() {
        let fake = Arc::new(FakeShellTransport::new());
        let driver = driver_with_fake(fake.clone());
        let outcome = driver.tap(100, 200).await;
        assert!(outcome.success);
        assert_eq!(fake.invocations.lock()[0], "input tap 100 200");
    }

    #[tokio::test]
    async fn input_text_escapes_spaces() {
        let fake = Arc::new(FakeShellTransport::new());
        let driver = driver_with_fake(fake.clone());
        driver.input_text("hello world").await;
        assert_eq!(fake.invocations.lock()[0], "input text hello%sworld");
    }

    #[tokio::test]
    async fn press_back_uses_keycode_4() {
        let fake = Arc::new(FakeShellTransport::new());
        let driver = driver_with_fake(fake.clone());
        driver.press_back().await;
        assert_eq!(fake.invocations.lock()[0], "input keyevent 4");
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let fake = Arc::new(FakeShellTransport::new());
        fake.push_shell_err("device offline");
        fake.push_shell_ok("");
        let driver = driver_with_fake(fake.clone());
        let outcome = driver.tap(1, 1).await;
        assert!(outcome.success);
        assert_eq!(fake.invocations.lock().len(), 2);
    }

    #[tokio::test]
    async fn exhausts_retries_and_reports_failure() {
        let fake = Arc::new(FakeShellTransport::new());
        fake.push_shell_err("one");
        fake.push_shell_err("two");
        fake.push_shell_err("three");
        let driver = driver_with_fake(fake.clone());
        let outcome = driver.tap(1, 1).await;
        assert!(!outcome.success);
        assert_eq!(fake.invocations.lock().len(), 3);
    }

    #[tokio::test]
    async fn screenshot_retries_the_whole_capture_on_transport_error() {
        let fake = Arc::new(FakeShellTransport::new());
        // exec-out always comes back empty, forcing the pull fallback; the
        // fallback's `screencap -p /sdcard/screen.png` shell call fails once
        // before succeeding.
        fake.push_shell_err("device offline");
        fake.push_shell_ok("");
        let driver = driver_with_fake(fake.clone());
        let result = driver.screenshot().await;
        assert!(result.is_ok());
        assert!(fake.invocations.lock().iter().any(|i| i == "exec-out screencap -p"));
    }

    #[tokio::test]
    async fn screenshot_exhausts_retries_and_reports_failure() {
        let fake = Arc::new(FakeShellTransport::new());
        fake.push_shell_err("one");
        fake.push_shell_err("two");
        fake.push_shell_err("three");
        let driver = driver_with_fake(fake.clone());
        let result = driver.screenshot().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stop_short_circuits_before_any_call() {
        let fake = Arc::new(FakeShellTransport::new());
        let controller = ExecutionController::new();
        controller.start();
        controller.stop();
        let driver = DeviceDriver::new(fake.clone(), controller, "emulator-5554", 2, 1_000);
        let outcome = driver.tap(1, 1).await;
        assert!(!outcome.success);
        assert!(fake.invocations.lock().is_empty());
    }

    #[test]
    fn parses_physical_size() {
        assert_eq!(parse_wm_size("Physical size: 1080x1920"), Some((1080, 1920)));
    }

    #[test]
    fn override_size_takes_precedence() {
        let output = "Physical size: 1080x1920\nOverride size: 720x1280\n";
        assert_eq!(parse_wm_size(output), Some((720, 1280)));
    }
}

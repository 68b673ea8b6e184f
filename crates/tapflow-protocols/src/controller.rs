//! Controller capability: screenshots in, input events out.

use async_trait::async_trait;

use crate::types::Image;

/// A device or window under automation.
///
/// Implementations wrap ADB, Win32, emulator bridges, etc. All operations are
/// fallible in-band: failures surface as `false`/`None`, never as panics, so
/// the engine can treat every device interaction as a normal miss/failure.
///
/// Implementations must be safe to call from the engine's worker tasks; if
/// two runs drive the same physical device, the controller is the layer that
/// serializes the commands.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Capture the current screen. `None` when the capture failed.
    async fn screencap(&self) -> Option<Image>;

    async fn click(&self, x: i32, y: i32) -> bool;

    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> bool;

    async fn press_key(&self, keycode: i32) -> bool;

    async fn input_text(&self, text: &str) -> bool;

    async fn start_app(&self, intent: &str) -> bool;

    async fn stop_app(&self, intent: &str) -> bool;

    /// Run a shell command on the device, returning its output.
    async fn shell(&self, cmd: &str, timeout_ms: u64) -> Option<String>;

    async fn connected(&self) -> bool;

    /// The most recent successful capture, if any.
    async fn cached_image(&self) -> Option<Image>;

    /// Stable identifier of the underlying device (serial, window handle...).
    async fn uuid(&self) -> String {
        String::new()
    }
}

//! Wait-for-freeze gate: block until a screen region stops changing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use tapflow_pipeline::WaitFreezes;
use tapflow_protocols::{Controller, FrameComparator, Image, Rect};

/// Polls captures of a region until it has been visually stable for the
/// configured duration, or the gate's timeout passes.
pub struct FreezeGate {
    controller: Arc<dyn Controller>,
    comparator: Arc<dyn FrameComparator>,
}

impl FreezeGate {
    pub fn new(controller: Arc<dyn Controller>, comparator: Arc<dyn FrameComparator>) -> Self {
        Self {
            controller,
            comparator,
        }
    }

    /// Returns `false` only when canceled. A disabled gate (`time == 0`)
    /// passes immediately; timing out is not a failure, the walk proceeds.
    pub async fn wait(&self, wf: &WaitFreezes, roi: Rect, cancel: &CancellationToken) -> bool {
        if !wf.enabled() {
            return true;
        }

        let deadline = Instant::now() + Duration::from_millis(wf.timeout);
        let need = Duration::from_millis(wf.time);
        let interval = Duration::from_millis(wf.rate_limit);

        let mut prev: Option<Image> = None;
        let mut stable_since: Option<Instant> = None;
        let mut next_capture = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return false;
            }

            let now = Instant::now();
            if now < next_capture {
                let nap = next_capture - now;
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep(nap) => {}
                }
            }
            next_capture = Instant::now() + interval;

            let Some(curr) = self.controller.screencap().await else {
                // Capture failure resets the stability window.
                prev = None;
                stable_since = None;
                if Instant::now() >= deadline {
                    debug!("wait-freezes timed out without a capture, proceeding");
                    return true;
                }
                continue;
            };

            if let Some(ref p) = prev {
                if self.comparator.same(p, &curr, roi, wf.threshold, wf.method) {
                    let since = *stable_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= need {
                        return true;
                    }
                } else {
                    stable_since = None;
                }
            }
            prev = Some(curr);

            if Instant::now() >= deadline {
                debug!(timeout_ms = wf.timeout, "wait-freezes timed out, proceeding");
                return true;
            }
        }
    }
}

//! Request/response and image framing over one duplex channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use tapflow_protocols::Image;

use crate::channel::Duplex;
use crate::error::AgentError;
use crate::message::{self, ImageEncodedHeader, ImageHeader, WireMessage};

#[cfg(test)]
#[path = "transceiver_tests.rs"]
mod tests;

/// How long one recv poll blocks before re-checking cancellation.
const POLL_SLICE: Duration = Duration::from_millis(100);

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handles frames that are neither the awaited response nor image traffic:
/// the peer is initiating a request of its own on the shared channel.
#[async_trait]
pub trait ReverseDispatch: Send + Sync {
    /// Produce the response frame to send back, or `None` when the request
    /// cannot be served.
    async fn handle(&self, transceiver: &Transceiver, frame: Value) -> Option<Value>;
}

/// The protocol endpoint: JSON frames out, matched responses in, with image
/// transfers and peer-initiated requests interleaved on the same channel.
///
/// `send_and_recv` holds a call lock for the whole round-trip, so at most one
/// request is outstanding per transceiver; response matching is by message
/// shape, which is only sound under that single-outstanding-request
/// discipline.
pub struct Transceiver {
    channel: Arc<dyn Duplex>,
    call_lock: tokio::sync::Mutex<()>,
    send_lock: tokio::sync::Mutex<()>,
    next_request_id: AtomicU64,
    images: Mutex<HashMap<String, Image>>,
    encoded: Mutex<HashMap<String, Bytes>>,
    cancel: CancellationToken,
    timeout: Duration,
}

impl Transceiver {
    pub fn new(channel: Arc<dyn Duplex>) -> Self {
        Self {
            channel,
            call_lock: tokio::sync::Mutex::new(()),
            send_lock: tokio::sync::Mutex::new(()),
            next_request_id: AtomicU64::new(1),
            images: Mutex::new(HashMap::new()),
            encoded: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Abort in-flight and future round-trips.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn send<M: WireMessage>(&self, msg: &M) -> Result<(), AgentError> {
        let frame = Bytes::from(serde_json::to_vec(&message::encode(msg)?)?);
        let _send = self.send_lock.lock().await;
        self.channel.send_frame(frame).await
    }

    pub async fn send_value(&self, value: &Value) -> Result<(), AgentError> {
        let frame = Bytes::from(serde_json::to_vec(value)?);
        let _send = self.send_lock.lock().await;
        self.channel.send_frame(frame).await
    }

    /// Transfer a raw image: header frame then payload frame, atomically with
    /// respect to other senders. Returns the transfer id.
    pub async fn send_image(&self, image: &Image) -> Option<String> {
        let uuid = Uuid::new_v4().to_string();
        let header = message::encode(&ImageHeader {
            uuid: uuid.clone(),
            rows: image.rows,
            cols: image.cols,
            r#type: image.pixel_type,
            size: image.byte_len() as u64,
        })
        .ok()?;
        let header = Bytes::from(serde_json::to_vec(&header).ok()?);

        let _send = self.send_lock.lock().await;
        if let Err(e) = self.channel.send_frame(header).await {
            warn!(error = %e, "image header send failed");
            return None;
        }
        if let Err(e) = self.channel.send_frame(image.data.clone()).await {
            warn!(error = %e, "image payload send failed");
            return None;
        }
        debug!(uuid = %uuid, bytes = image.byte_len(), "image sent");
        Some(uuid)
    }

    /// Transfer an already-encoded image blob (PNG etc.).
    pub async fn send_image_encoded(&self, data: Bytes) -> Option<String> {
        let uuid = Uuid::new_v4().to_string();
        let header = message::encode(&ImageEncodedHeader {
            uuid: uuid.clone(),
            size: data.len() as u64,
        })
        .ok()?;
        let header = Bytes::from(serde_json::to_vec(&header).ok()?);

        let _send = self.send_lock.lock().await;
        if let Err(e) = self.channel.send_frame(header).await {
            warn!(error = %e, "image header send failed");
            return None;
        }
        if let Err(e) = self.channel.send_frame(data).await {
            warn!(error = %e, "image payload send failed");
            return None;
        }
        Some(uuid)
    }

    /// Take a received raw image out of the cache. Each transfer is
    /// retrievable exactly once.
    pub fn get_image(&self, uuid: &str) -> Option<Image> {
        self.images.lock().remove(uuid)
    }

    /// Take a received encoded image out of the cache.
    pub fn get_image_encoded(&self, uuid: &str) -> Option<Bytes> {
        self.encoded.lock().remove(uuid)
    }

    /// Send `req` and wait for the first frame shaped like `Resp`.
    ///
    /// Image transfers arriving in between are cached; any other frame is a
    /// peer-initiated request handed to `reverse` (dropped with a warning if
    /// no dispatcher is supplied). `None` on timeout, cancellation or channel
    /// failure.
    pub async fn send_and_recv<Req, Resp>(&self, req: &Req) -> Option<Resp>
    where
        Req: WireMessage,
        Resp: WireMessage,
    {
        self.send_and_recv_with::<Req, Resp>(req, None).await
    }

    pub async fn send_and_recv_with<Req, Resp>(
        &self,
        req: &Req,
        reverse: Option<&(dyn ReverseDispatch + '_)>,
    ) -> Option<Resp>
    where
        Req: WireMessage,
        Resp: WireMessage,
    {
        let _call = self.call_lock.lock().await;
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            request_id,
            request = Req::TYPE_NAME,
            expecting = Resp::TYPE_NAME,
            "round-trip"
        );
        if let Err(e) = self.send(req).await {
            warn!(request_id, error = %e, "request send failed");
            return None;
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(request_id, expecting = Resp::TYPE_NAME, "round-trip timed out");
                return None;
            }
            let value = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(request_id, "round-trip canceled");
                    return None;
                }
                received = self.recv_value(remaining.min(POLL_SLICE)) => match received {
                    Ok(Some(value)) => value,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(request_id, error = %e, "channel failure mid round-trip");
                        return None;
                    }
                },
            };

            if message::type_name(&value) == Some(Resp::TYPE_NAME) {
                return match message::decode::<Resp>(&value) {
                    Some(resp) => Some(resp),
                    None => {
                        warn!(request_id, response = Resp::TYPE_NAME, "response failed to parse");
                        None
                    }
                };
            }
            self.dispatch_inbound(value, reverse).await;
        }
    }

    /// Next non-image frame for a serve loop; image transfers are absorbed
    /// into the caches inline. `Ok(None)` when `wait` elapsed.
    pub async fn recv_dispatched(&self, wait: Duration) -> Result<Option<Value>, AgentError> {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.recv_value(remaining.min(POLL_SLICE)).await? {
                None => continue,
                Some(value) => {
                    if self.try_cache_image(&value).await {
                        continue;
                    }
                    return Ok(Some(value));
                }
            }
        }
    }

    async fn recv_value(&self, wait: Duration) -> Result<Option<Value>, AgentError> {
        match self.channel.recv_frame(wait).await? {
            None => Ok(None),
            Some(frame) => Ok(Some(serde_json::from_slice(&frame)?)),
        }
    }

    async fn dispatch_inbound(&self, value: Value, reverse: Option<&(dyn ReverseDispatch + '_)>) {
        if self.try_cache_image(&value).await {
            return;
        }
        let Some(handler) = reverse else {
            warn!(frame = ?message::type_name(&value), "unexpected frame dropped");
            return;
        };
        match handler.handle(self, value).await {
            Some(response) => {
                if let Err(e) = self.send_value(&response).await {
                    warn!(error = %e, "reverse response send failed");
                }
            }
            None => warn!("reverse request not served"),
        }
    }

    /// If `value` is an image header, pull the payload frame and cache the
    /// transfer. True when the frame was image traffic.
    async fn try_cache_image(&self, value: &Value) -> bool {
        if let Some(header) = message::decode::<ImageHeader>(value) {
            if let Some(payload) = self.recv_payload(header.size as usize).await {
                let image = Image::new(header.rows, header.cols, header.r#type, payload);
                self.images.lock().insert(header.uuid, image);
            }
            return true;
        }
        if let Some(header) = message::decode::<ImageEncodedHeader>(value) {
            if let Some(payload) = self.recv_payload(header.size as usize).await {
                self.encoded.lock().insert(header.uuid, payload);
            }
            return true;
        }
        false
    }

    async fn recv_payload(&self, expected: usize) -> Option<Bytes> {
        match self.channel.recv_frame(self.timeout).await {
            Ok(Some(frame)) if frame.len() == expected => Some(frame),
            Ok(Some(frame)) => {
                warn!(expected, got = frame.len(), "image payload size mismatch, dropped");
                None
            }
            Ok(None) => {
                warn!(expected, "image payload never arrived");
                None
            }
            Err(e) => {
                warn!(error = %e, "channel failure receiving image payload");
                None
            }
        }
    }
}

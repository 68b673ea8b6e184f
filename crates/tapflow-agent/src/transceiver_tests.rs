use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use tapflow_protocols::Image;

use super::{ReverseDispatch, Transceiver};
use crate::channel::InProcDuplex;
use crate::message::{
    self, ControllerConnectedReverseRequest, ControllerConnectedReverseResponse, ShutDownRequest,
    ShutDownResponse, StartUpRequest, StartUpResponse,
};

fn pair() -> (Arc<Transceiver>, Arc<Transceiver>) {
    let (a, b) = InProcDuplex::pair();
    (
        Arc::new(Transceiver::new(Arc::new(a))),
        Arc::new(Transceiver::new(Arc::new(b))),
    )
}

fn sample_image() -> Image {
    Image::new(2, 3, 16, (0u8..18).collect::<Vec<_>>())
}

#[tokio::test]
async fn image_transfer_is_retrievable_exactly_once() {
    let (a, b) = pair();

    let image = sample_image();
    let uuid = a.send_image(&image).await.unwrap();
    // A marker frame after the transfer lets the peer pump both image frames.
    a.send(&ShutDownRequest {}).await.unwrap();

    let frame = b
        .recv_dispatched(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message::type_name(&frame), Some("ShutDownRequest"));

    let received = b.get_image(&uuid).unwrap();
    assert_eq!(received, image);
    // Remove-on-get: the second lookup misses.
    assert!(b.get_image(&uuid).is_none());
}

#[tokio::test]
async fn encoded_image_transfer_round_trips() {
    let (a, b) = pair();

    let blob = bytes::Bytes::from_static(b"\x89PNG\r\n\x1a\nfake");
    let uuid = a.send_image_encoded(blob.clone()).await.unwrap();
    a.send(&ShutDownRequest {}).await.unwrap();

    b.recv_dispatched(Duration::from_secs(1)).await.unwrap();
    assert_eq!(b.get_image_encoded(&uuid), Some(blob));
    assert!(b.get_image_encoded(&uuid).is_none());
}

#[tokio::test]
async fn send_and_recv_matches_the_expected_shape() {
    let (a, b) = pair();

    let responder = tokio::spawn(async move {
        let frame = b
            .recv_dispatched(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        let req = message::decode::<StartUpRequest>(&frame).unwrap();
        assert_eq!(req.protocol, message::PROTOCOL_VERSION);
        b.send(&StartUpResponse {
            version: "test".into(),
            protocol: message::PROTOCOL_VERSION,
            actions: vec!["act".into()],
            recognitions: vec![],
        })
        .await
        .unwrap();
    });

    let resp: StartUpResponse = a
        .send_and_recv(&StartUpRequest {
            version: "test".into(),
            protocol: message::PROTOCOL_VERSION,
        })
        .await
        .unwrap();
    assert_eq!(resp.actions, vec!["act"]);
    responder.await.unwrap();
}

#[tokio::test]
async fn send_and_recv_times_out_without_blocking_forever() {
    // The peer end stays alive but never answers.
    let (ours, _silent_peer) = InProcDuplex::pair();
    let quiet = Transceiver::new(Arc::new(ours)).with_timeout(Duration::from_millis(150));

    let start = Instant::now();
    let resp: Option<ShutDownResponse> = quiet.send_and_recv(&ShutDownRequest {}).await;
    assert!(resp.is_none());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn cancellation_aborts_a_pending_round_trip() {
    let (a, _b) = pair();
    let canceler = a.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceler.cancel();
    });

    let start = Instant::now();
    let resp: Option<ShutDownResponse> = a.send_and_recv(&ShutDownRequest {}).await;
    assert!(resp.is_none());
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn reverse_request_is_served_while_awaiting_a_response() {
    struct AlwaysConnected;

    #[async_trait]
    impl ReverseDispatch for AlwaysConnected {
        async fn handle(&self, _tx: &Transceiver, frame: Value) -> Option<Value> {
            let req = message::decode::<ControllerConnectedReverseRequest>(&frame)?;
            assert_eq!(req.controller_id, "ctrl-1");
            message::encode(&ControllerConnectedReverseResponse { connected: true }).ok()
        }
    }

    let (a, b) = pair();

    let server = tokio::spawn(async move {
        // Consume the client's request first.
        let frame = b
            .recv_dispatched(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message::type_name(&frame), Some("ShutDownRequest"));

        // Ask the client something before answering it.
        let reply: ControllerConnectedReverseResponse = b
            .send_and_recv(&ControllerConnectedReverseRequest {
                controller_id: "ctrl-1".into(),
            })
            .await
            .unwrap();
        assert!(reply.connected);

        b.send(&ShutDownResponse {}).await.unwrap();
    });

    let resp: Option<ShutDownResponse> = a
        .send_and_recv_with(&ShutDownRequest {}, Some(&AlwaysConnected))
        .await;
    assert!(resp.is_some());
    server.await.unwrap();
}

#[tokio::test]
async fn image_traffic_interleaves_with_a_pending_round_trip() {
    let (a, b) = pair();

    let image = sample_image();
    let sent = image.clone();
    let server = tokio::spawn(async move {
        b.recv_dispatched(Duration::from_secs(1)).await.unwrap();
        let uuid = b.send_image(&sent).await.unwrap();
        b.send(&ShutDownResponse {}).await.unwrap();
        uuid
    });

    let resp: Option<ShutDownResponse> = a.send_and_recv(&ShutDownRequest {}).await;
    assert!(resp.is_some());
    let uuid = server.await.unwrap();
    // The transfer that arrived mid round-trip landed in the cache.
    assert_eq!(a.get_image(&uuid), Some(image));
}

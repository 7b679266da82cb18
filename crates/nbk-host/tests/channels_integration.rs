//! Channel tests over real loopback ZeroMQ sockets on OS-assigned ports.

use std::time::Duration;

use bytes::Bytes;
use nbk_host::channels::{ChannelEndpoints, ChannelKind, ChannelSet};
use nbk_host::{Outbox, ReplyChannel};
use nbk_protocol::{Header, KernelMessage, ShutdownReply, Signer, WireMessage, wire};
use serde_json::json;
use tokio::time::timeout;
use zeromq::{DealerSocket, ReqSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

const WAIT: Duration = Duration::from_secs(5);

fn frames(msg_type: &str, content: serde_json::Value, signer: &Signer) -> ZmqMessage {
    let message = WireMessage::new(Header::new(msg_type, "session-1", "tester"), content);
    let frames = wire::encode(&message, signer).unwrap();
    ZmqMessage::try_from(frames).unwrap()
}

#[tokio::test]
async fn heartbeat_echoes_every_ping() {
    let (_outbox, outbox_rx) = Outbox::channel(8);
    let (channels, _inbound) =
        ChannelSet::bind(&ChannelEndpoints::loopback(), Signer::unsigned(), outbox_rx, 8)
            .await
            .unwrap();

    let mut client = ReqSocket::new();
    client.connect(&channels.endpoints().heartbeat).await.unwrap();
    for ping in ["ping-1", "ping-2"] {
        client.send(ZmqMessage::from(ping)).await.unwrap();
        let echo = timeout(WAIT, client.recv()).await.unwrap().unwrap();
        assert_eq!(echo.into_vec(), vec![Bytes::from(ping)]);
    }
    channels.close().await;
}

#[tokio::test]
async fn shell_request_round_trips_with_signature() {
    let signer = Signer::new(b"secret-key");
    let (outbox, outbox_rx) = Outbox::channel(8);
    let (channels, mut inbound) =
        ChannelSet::bind(&ChannelEndpoints::loopback(), signer.clone(), outbox_rx, 8)
            .await
            .unwrap();

    let mut client = DealerSocket::new();
    client.connect(&channels.endpoints().shell).await.unwrap();
    client
        .send(frames("shutdown_request", json!({ "restart": true }), &signer))
        .await
        .unwrap();

    let request = timeout(WAIT, inbound.shell.recv()).await.unwrap().unwrap();
    assert_eq!(request.msg_type(), "shutdown_request");
    assert_eq!(request.identities.len(), 1);

    outbox
        .reply(
            ReplyChannel::Shell,
            &request,
            KernelMessage::ShutdownReply(ShutdownReply::ok(true)),
        )
        .await;
    let reply = timeout(WAIT, client.recv()).await.unwrap().unwrap();
    let reply = wire::decode(reply.into_vec(), &signer).unwrap();
    assert_eq!(reply.header.msg_type, "shutdown_reply");
    assert_eq!(reply.parent_header.unwrap().msg_id, request.header.msg_id);
    assert_eq!(reply.content, json!({ "status": "ok", "restart": true }));
    channels.close().await;
}

#[tokio::test]
async fn badly_signed_requests_are_dropped() {
    let signer = Signer::new(b"secret-key");
    let (_outbox, outbox_rx) = Outbox::channel(8);
    let (channels, mut inbound) =
        ChannelSet::bind(&ChannelEndpoints::loopback(), signer.clone(), outbox_rx, 8)
            .await
            .unwrap();

    let mut client = DealerSocket::new();
    client.connect(&channels.endpoints().control).await.unwrap();
    let forged = Signer::new(b"wrong-key");
    client
        .send(frames("kernel_info_request", json!({}), &forged))
        .await
        .unwrap();
    client
        .send(frames("kernel_info_request", json!({}), &signer))
        .await
        .unwrap();

    // only the correctly signed request gets through
    let request = timeout(WAIT, inbound.control.recv()).await.unwrap().unwrap();
    assert_eq!(request.msg_type(), "kernel_info_request");
    assert!(
        timeout(Duration::from_millis(200), inbound.control.recv())
            .await
            .is_err()
    );
    channels.close().await;
}

#[tokio::test]
async fn close_is_idempotent_and_stops_the_heartbeat() {
    let (_outbox, outbox_rx) = Outbox::channel(8);
    let (channels, _inbound) =
        ChannelSet::bind(&ChannelEndpoints::loopback(), Signer::unsigned(), outbox_rx, 8)
            .await
            .unwrap();
    let heartbeat = channels.endpoints().heartbeat.clone();

    channels.close().await;
    channels.close().await;
    assert!(channels.is_closed());

    let probe = async {
        let mut client = ReqSocket::new();
        client.connect(&heartbeat).await?;
        client.send(ZmqMessage::from("ping")).await?;
        Ok::<_, zeromq::ZmqError>(client.recv().await?)
    };
    let outcome = timeout(Duration::from_millis(500), probe).await;
    assert!(!matches!(outcome, Ok(Ok(_))), "heartbeat answered after close");
}

#[tokio::test]
async fn bind_failure_names_the_channel_and_releases_the_rest() {
    let (_first_outbox, first_rx) = Outbox::channel(8);
    let (first, _first_inbound) =
        ChannelSet::bind(&ChannelEndpoints::loopback(), Signer::unsigned(), first_rx, 8)
            .await
            .unwrap();

    let conflicting = ChannelEndpoints {
        shell: first.endpoints().shell.clone(),
        ..ChannelEndpoints::loopback()
    };
    let (_outbox, outbox_rx) = Outbox::channel(8);
    let err = match ChannelSet::bind(&conflicting, Signer::unsigned(), outbox_rx, 8).await {
        Ok(_) => panic!("binding an occupied port must fail"),
        Err(err) => err,
    };
    assert_eq!(err.failures.len(), 1);
    assert_eq!(err.failures[0].channel, ChannelKind::Shell);
    assert!(err.to_string().contains("shell"));
    first.close().await;
}

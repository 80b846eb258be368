// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end server/client tests over real TCP sockets.

use sigcast::protocol::{
    decode_records, encode_alive, encode_data, encode_subscribe, read_frame, FrameHeader,
    FrameKind, Signal, SignalFilter, SignalKind, SignalRecord, MAX_PAYLOAD_LEN,
};
use sigcast::{ClientConfig, ClientEvent, ServerConfig, SignalClient, SignalServer};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn sig(id: u32, kind: SignalKind, value: f64, secs: u64) -> Signal {
    Signal::new(id, kind, value, Duration::from_secs(secs))
}

fn rec(id: u32, kind: SignalKind, value: f64) -> SignalRecord {
    SignalRecord { id, kind, value }
}

/// Start a server on an ephemeral localhost port and seed its table.
async fn start_server(seed: Vec<Signal>) -> (SignalServer, SocketAddr) {
    let config = ServerConfig {
        bind_address: [127, 0, 0, 1].into(),
        port: 0,
        ..Default::default()
    };
    let server = SignalServer::new(config).unwrap();
    let runner = server.clone();
    tokio::spawn(async move { runner.run().await });
    let addr = server.wait_bound().await;
    server.set_signals(seed);
    (server, addr)
}

async fn subscribe(addr: SocketAddr, filter: SignalFilter) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&encode_subscribe(filter)).await.unwrap();
    stream
}

/// Read one frame and decode it as data records.
async fn read_data(stream: &mut TcpStream) -> Vec<SignalRecord> {
    let frame = timeout(WAIT, read_frame(stream, MAX_PAYLOAD_LEN))
        .await
        .expect("timed out waiting for frame")
        .expect("read error")
        .expect("connection closed");
    assert_eq!(frame.0.kind, FrameKind::Data);
    decode_records(&frame.1).unwrap()
}

/// Wait for the peer to close the connection.
async fn expect_close(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    loop {
        match timeout(WAIT, stream.read(&mut buf))
            .await
            .expect("timed out waiting for close")
        {
            Ok(0) => return,
            Ok(_) => continue,
            Err(_) => return,
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subscribe_snapshot_then_update() {
    let (server, addr) = start_server(vec![
        sig(1, SignalKind::Discrete, 0.0, 0),
        sig(2, SignalKind::Analog, 1.5, 0),
    ])
    .await;

    let mut stream = subscribe(addr, SignalFilter::ALL).await;

    // Snapshot carries both signals in unspecified order.
    let mut snapshot = read_data(&mut stream).await;
    snapshot.sort_by_key(|r| r.id);
    assert_eq!(
        snapshot,
        vec![
            rec(1, SignalKind::Discrete, 0.0),
            rec(2, SignalKind::Analog, 1.5),
        ]
    );

    // One admitted update yields one frame with exactly that record.
    assert!(server.push_signal(sig(1, SignalKind::Discrete, 1.0, 1)));
    let update = read_data(&mut stream).await;
    assert_eq!(update, vec![rec(1, SignalKind::Discrete, 1.0)]);

    server.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_filter_excludes_other_kinds() {
    let (server, addr) = start_server(vec![
        sig(1, SignalKind::Discrete, 0.0, 0),
        sig(2, SignalKind::Analog, 1.5, 0),
    ])
    .await;

    let mut stream = subscribe(addr, SignalFilter::ANALOG).await;

    let snapshot = read_data(&mut stream).await;
    assert_eq!(snapshot, vec![rec(2, SignalKind::Analog, 1.5)]);

    // A discrete update is admitted but produces no frame for this
    // subscriber; the next frame it sees is the analog update pushed after.
    assert!(server.push_signal(sig(1, SignalKind::Discrete, 1.0, 1)));
    assert!(server.push_signal(sig(2, SignalKind::Analog, 2.5, 1)));

    let next = read_data(&mut stream).await;
    assert_eq!(next, vec![rec(2, SignalKind::Analog, 2.5)]);

    server.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stale_push_dropped() {
    let (server, addr) = start_server(vec![
        sig(1, SignalKind::Discrete, 1.0, 5),
        sig(2, SignalKind::Analog, 1.5, 5),
    ])
    .await;

    let mut stream = subscribe(addr, SignalFilter::ALL).await;
    let _snapshot = read_data(&mut stream).await;

    // Older timestamp loses the admission race: nothing stored, nothing sent.
    assert!(!server.push_signal(sig(1, SignalKind::Discrete, 0.0, 3)));
    let stored = server.get_signal(1).unwrap();
    assert_eq!(stored.ts, Duration::from_secs(5));
    assert_eq!(stored.value, 1.0);

    // The next admitted update is the next frame on the wire, proving the
    // stale one was never queued.
    assert!(server.push_signal(sig(2, SignalKind::Analog, 7.7, 6)));
    let next = read_data(&mut stream).await;
    assert_eq!(next, vec![rec(2, SignalKind::Analog, 7.7)]);

    server.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_set_signals_forces_reconnect() {
    let (server, addr) = start_server(vec![
        sig(1, SignalKind::Discrete, 0.0, 0),
        sig(2, SignalKind::Analog, 1.5, 0),
    ])
    .await;

    let client = SignalClient::new(ClientConfig {
        host: "127.0.0.1".into(),
        port: addr.port(),
        filter: SignalFilter::ALL,
        reconnect_delay_ms: 100,
        ..Default::default()
    })
    .unwrap();

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.run(events_tx).await })
    };

    // First connection: snapshot of the seeded population.
    loop {
        match timeout(WAIT, events_rx.recv()).await.unwrap().unwrap() {
            ClientEvent::Updates(records) => {
                assert_eq!(records.len(), 2);
                break;
            }
            ClientEvent::Connected { .. } => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // Replacing the population closes the client's socket...
    server.set_signals(vec![sig(7, SignalKind::Analog, 2.2, 0)]);
    loop {
        match timeout(WAIT, events_rx.recv()).await.unwrap().unwrap() {
            ClientEvent::Disconnected { .. } => break,
            ClientEvent::Updates(_) | ClientEvent::Alive => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // ...and the reconnect snapshot reflects only the new population.
    loop {
        match timeout(WAIT, events_rx.recv()).await.unwrap().unwrap() {
            ClientEvent::Updates(records) => {
                assert_eq!(records, vec![rec(7, SignalKind::Analog, 2.2)]);
                break;
            }
            ClientEvent::Connected { .. } => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    client.stop();
    runner.await.unwrap().unwrap();
    server.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_subscribe_closes_session() {
    let (server, addr) = start_server(vec![sig(1, SignalKind::Discrete, 0.0, 0)]).await;

    let mut stream = subscribe(addr, SignalFilter::ALL).await;
    let _snapshot = read_data(&mut stream).await;
    assert_eq!(server.subscriber_count(), 1);

    // The push protocol admits exactly one request per connection.
    stream
        .write_all(&encode_subscribe(SignalFilter::ALL))
        .await
        .unwrap();

    expect_close(&mut stream).await;
    wait_until(|| server.subscriber_count() == 0).await;

    server.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bad_signature_closes_connection() {
    let (server, addr) = start_server(vec![sig(1, SignalKind::Discrete, 0.0, 0)]).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut frame = encode_subscribe(SignalFilter::ALL);
    frame[0] = 0x00;
    frame[1] = 0x00;
    stream.write_all(&frame).await.unwrap();

    expect_close(&mut stream).await;
    assert_eq!(server.subscriber_count(), 0);

    server.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_oversize_length_rejected() {
    let (server, addr) = start_server(vec![]).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let header = FrameHeader::new(FrameKind::Subscribe, (MAX_PAYLOAD_LEN + 1) as u32);
    stream.write_all(&header.encode()).await.unwrap();

    // Closed on the header alone; the payload is never transmitted.
    expect_close(&mut stream).await;
    assert_eq!(server.subscriber_count(), 0);

    server.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_subscribe_closes_connection() {
    let (server, addr) = start_server(vec![]).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let header = FrameHeader::new(FrameKind::Subscribe, 0);
    stream.write_all(&header.encode()).await.unwrap();

    expect_close(&mut stream).await;
    server.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_per_session_fifo_ordering() {
    let (server, addr) = start_server(vec![]).await;

    let mut stream = subscribe(addr, SignalFilter::ALL).await;
    // An empty table yields no snapshot frame, so wait for registration
    // before publishing.
    wait_until(|| server.subscriber_count() == 1).await;

    for ts in 1..=5u64 {
        assert!(server.push_signal(sig(1, SignalKind::Analog, ts as f64, ts)));
    }

    // Updates may arrive batched into any number of frames, but the record
    // order across the socket matches admission order.
    let mut values = Vec::new();
    while values.len() < 5 {
        let records = read_data(&mut stream).await;
        values.extend(records.iter().map(|r| r.value));
    }
    assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 5.0]);

    server.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_updates_before_registration_only_in_snapshot() {
    let (server, addr) = start_server(vec![]).await;

    // Admitted before any subscriber exists: visible in the snapshot only.
    assert!(server.push_signal(sig(9, SignalKind::Analog, 4.5, 1)));

    let mut stream = subscribe(addr, SignalFilter::ALL).await;
    let snapshot = read_data(&mut stream).await;
    assert_eq!(snapshot, vec![rec(9, SignalKind::Analog, 4.5)]);

    // The next frame is the next admitted update, not a replay.
    assert!(server.push_signal(sig(9, SignalKind::Analog, 5.5, 2)));
    let next = read_data(&mut stream).await;
    assert_eq!(next, vec![rec(9, SignalKind::Analog, 5.5)]);

    server.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_ignores_alive_frames() {
    // Hand-rolled server: accept one subscriber, send alive then data.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (header, payload) = read_frame(&mut stream, MAX_PAYLOAD_LEN)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(header.kind, FrameKind::Subscribe);
        assert_eq!(payload, vec![0b11]);

        stream.write_all(&encode_alive()).await.unwrap();
        let update = [sig(3, SignalKind::Analog, 0.25, 1)];
        stream.write_all(&encode_data(&update)).await.unwrap();
        // Hold the socket open until the client has seen both frames.
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let client = SignalClient::new(ClientConfig {
        host: "127.0.0.1".into(),
        port: addr.port(),
        ..Default::default()
    })
    .unwrap();

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.run(events_tx).await })
    };

    let mut saw_alive = false;
    loop {
        match timeout(WAIT, events_rx.recv()).await.unwrap().unwrap() {
            ClientEvent::Alive => saw_alive = true,
            ClientEvent::Updates(records) => {
                assert_eq!(records, vec![rec(3, SignalKind::Analog, 0.25)]);
                break;
            }
            ClientEvent::Connected { .. } => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(saw_alive);

    client.stop();
    runner.await.unwrap().unwrap();
}

//! Two ports over real loopback UDP.

mod common;

use std::time::Duration;

use common::{Chat, Seq, collect_seq};
use ludonet::transport::{OpContext, Port, PortConfigBuilder, ReliableOptions};

async fn bind() -> Port {
    let config = PortConfigBuilder::new().fast_ack(true).build();
    let port = Port::bind("127.0.0.1:0".parse().unwrap(), common::registry(), config)
        .await
        .unwrap();
    port.start().unwrap();
    port
}

#[tokio::test]
async fn test_udp_round_trip() {
    let server = bind().await;
    let client = bind().await;
    let mut from_server = collect_seq(&client);

    server.on_message(|conn, stream, msg| match msg.downcast_ref::<Chat>() {
        Some(chat) => conn
            .queue_reliable(
                stream,
                &[&Seq {
                    n: chat.text.len() as u32,
                }],
                ReliableOptions::new(),
            )
            .is_ok(),
        None => false,
    });

    let conn = client.conn(server.local_addr().unwrap());
    let stream = conn.stream(3).unwrap();
    stream
        .send_reliable(
            &[&Chat {
                from: "client".into(),
                text: "hello".into(),
            }],
            OpContext::with_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), from_server.recv())
        .await
        .unwrap();
    assert_eq!(reply, Some(5));

    let server_conn = server.get_conn(client.local_addr().unwrap()).unwrap();
    assert_eq!(server_conn.recv_ack_seq(), 1);
    assert_eq!(server.conns().len(), 1);

    client.close().unwrap();
    server.close().unwrap();
    assert!(server.is_closed());
}

#[tokio::test]
async fn test_udp_many_peers() {
    let server = bind().await;
    let mut rx = collect_seq(&server);

    let mut clients = Vec::new();
    for n in 0..3 {
        let client = bind().await;
        client
            .conn(server.local_addr().unwrap())
            .send_reliable(1, &[&Seq { n }], OpContext::with_timeout(Duration::from_secs(5)))
            .await
            .unwrap();
        clients.push(client);
    }

    let mut got = Vec::new();
    for _ in 0..3 {
        got.push(rx.recv().await.unwrap());
    }
    got.sort_unstable();
    assert_eq!(got, vec![0, 1, 2]);
    assert_eq!(server.conns().len(), 3);

    for client in clients {
        client.close().unwrap();
    }
    server.close().unwrap();
}

#[tokio::test]
async fn test_closed_port_frees_its_address() {
    let port = bind().await;
    let addr = port.local_addr().unwrap();
    let conn = port.conn("127.0.0.1:9".parse().unwrap());
    port.close().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Handles to the closed port are still alive.
    let again = Port::bind(addr, common::registry(), port.config().clone())
        .await
        .unwrap();
    assert_eq!(again.local_addr().unwrap(), addr);
    assert!(conn.send_unreliable(1, &[&Seq { n: 1 }]).is_err());
    again.close().unwrap();
}

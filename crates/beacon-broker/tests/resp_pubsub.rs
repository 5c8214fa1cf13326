//! RESP handles against an in-test pub/sub server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use beacon_broker::resp::{RespCodec, RespValue};
use beacon_broker::{BrokerClient, BrokerConnector, BrokerError};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

type Subscribers = Arc<Mutex<HashMap<Vec<u8>, Vec<mpsc::UnboundedSender<RespValue>>>>>;

/// Minimal RESP pub/sub server: AUTH, PING, SELECT, PUBLISH, SUBSCRIBE.
async fn spawn_server(password: Option<&'static str>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let subscribers: Subscribers = Arc::default();

    let _ = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let _ = tokio::spawn(serve(socket, password, Arc::clone(&subscribers)));
        }
    });
    addr
}

async fn serve(socket: TcpStream, password: Option<&'static str>, subscribers: Subscribers) {
    let mut framed = Framed::new(socket, RespCodec::default());
    let (push_tx, mut push_rx) = mpsc::unbounded_channel();
    let mut authed = password.is_none();

    loop {
        let frame = tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(frame)) => frame,
                _ => return,
            },
            Some(push) = push_rx.recv() => {
                if framed.send(push).await.is_err() {
                    return;
                }
                continue;
            }
        };

        let RespValue::Array(Some(args)) = frame else {
            return;
        };
        let args: Vec<Vec<u8>> = args
            .iter()
            .filter_map(|a| a.as_bytes().map(<[u8]>::to_vec))
            .collect();
        let command = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();

        let reply = match (command.as_str(), authed) {
            ("AUTH", _) => {
                if args.last().map(Vec::as_slice) == password.map(str::as_bytes) {
                    authed = true;
                    RespValue::Simple("OK".into())
                } else {
                    RespValue::Error("WRONGPASS invalid password".into())
                }
            }
            (_, false) => RespValue::Error("NOAUTH Authentication required.".into()),
            ("PING", _) => RespValue::Simple("PONG".into()),
            ("SELECT", _) => RespValue::Simple("OK".into()),
            ("PUBLISH", _) => {
                let message = RespValue::Array(Some(vec![
                    RespValue::bulk("message"),
                    RespValue::bulk(args[1].clone()),
                    RespValue::bulk(args[2].clone()),
                ]));
                let mut delivered = 0;
                if let Some(subs) = subscribers.lock().get_mut(&args[1]) {
                    subs.retain(|s| s.send(message.clone()).is_ok());
                    delivered = subs.len();
                }
                RespValue::Integer(i64::try_from(delivered).unwrap())
            }
            ("SUBSCRIBE", _) => {
                subscribers
                    .lock()
                    .entry(args[1].clone())
                    .or_default()
                    .push(push_tx.clone());
                RespValue::Array(Some(vec![
                    RespValue::bulk("subscribe"),
                    RespValue::bulk(args[1].clone()),
                    RespValue::Integer(1),
                ]))
            }
            _ => RespValue::Error(format!("ERR unknown command '{command}'")),
        };
        if framed.send(reply).await.is_err() {
            return;
        }
    }
}

async fn recv(sub: &mut beacon_broker::Subscription) -> Option<Bytes> {
    tokio::time::timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("timed out waiting for a broker message")
}

#[tokio::test]
async fn publish_reaches_subscribers_on_other_connections() {
    let addr = spawn_server(None).await;
    let address = format!("redis://{addr}/0");
    let client = BrokerClient::new();

    let (publisher, sub_a, sub_b) = tokio::join!(
        client.open_publisher(&address),
        client.open_subscriber(&address),
        client.open_subscriber(&address),
    );
    let mut sub_a = sub_a.unwrap().subscribe("beacon#events").await.unwrap();
    let mut sub_b = sub_b.unwrap().subscribe("beacon#events").await.unwrap();

    let delivered = publisher
        .unwrap()
        .publish("beacon#events", Bytes::from_static(b"{\"n\":1}"))
        .await
        .unwrap();

    assert_eq!(delivered, 2);
    assert_eq!(recv(&mut sub_a).await.unwrap(), Bytes::from_static(b"{\"n\":1}"));
    assert_eq!(recv(&mut sub_b).await.unwrap(), Bytes::from_static(b"{\"n\":1}"));
}

#[tokio::test]
async fn password_is_sent_with_auth() {
    let addr = spawn_server(Some("s3cret")).await;
    let client = BrokerClient::new();

    let ok = client
        .open_publisher(&format!("redis://:s3cret@{addr}"))
        .await;
    assert!(ok.is_ok());

    let wrong = client
        .open_subscriber(&format!("redis://:nope@{addr}"))
        .await;
    assert_matches!(wrong, Err(BrokerError::Rejected { command: "AUTH", .. }));

    let missing = client.open_subscriber(&format!("redis://{addr}")).await;
    assert_matches!(missing, Err(BrokerError::Rejected { command: "PING", .. }));
}

#[tokio::test]
async fn subscription_ends_when_broker_goes_away() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Answer PING and SUBSCRIBE once, then hang up.
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(socket, RespCodec::default());
        let _ping = framed.next().await;
        framed.send(RespValue::Simple("PONG".into())).await.unwrap();
        let _subscribe = framed.next().await;
        framed
            .send(RespValue::Array(Some(vec![
                RespValue::bulk("subscribe"),
                RespValue::bulk("events"),
                RespValue::Integer(1),
            ])))
            .await
            .unwrap();
    });

    let subscriber = BrokerClient::new()
        .open_subscriber(&format!("redis://{addr}"))
        .await
        .unwrap();
    let mut sub = subscriber.subscribe("events").await.unwrap();
    server.await.unwrap();

    assert_eq!(recv(&mut sub).await, None);
}

#[tokio::test]
async fn abandoned_publish_does_not_shift_later_replies() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // The first PUBLISH is answered late with an error; later ones get their
    // sequence number back.
    let _server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(socket, RespCodec::default());
        let _ping = framed.next().await;
        framed.send(RespValue::Simple("PONG".into())).await.unwrap();
        let mut published = 0;
        while let Some(Ok(_)) = framed.next().await {
            published += 1;
            let reply = if published == 1 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                RespValue::Error("ERR slow failure".into())
            } else {
                RespValue::Integer(published)
            };
            if framed.send(reply).await.is_err() {
                return;
            }
        }
    });

    let publisher = BrokerClient::new()
        .open_publisher(&format!("redis://{addr}"))
        .await
        .unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        publisher.publish("events", Bytes::from_static(b"first")),
    )
    .await;
    assert!(abandoned.is_err());

    let second = publisher.publish("events", Bytes::from_static(b"second")).await;
    assert_matches!(second, Ok(2));
    let third = publisher.publish("events", Bytes::from_static(b"third")).await;
    assert_matches!(third, Ok(3));
}

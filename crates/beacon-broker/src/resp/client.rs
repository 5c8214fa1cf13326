//! RESP client handles.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::address::BrokerAddress;
use crate::errors::BrokerError;
use crate::handle::{BrokerPublisher, BrokerSubscriber, Subscription};
use crate::resp::codec::{RespCodec, RespValue};

/// Buffered messages between the socket reader and the subscription.
const SUBSCRIPTION_CAPACITY: usize = 256;

/// Publishes waiting for the connection task.
const PUBLISH_QUEUE_CAPACITY: usize = 64;

/// One authenticated RESP connection.
pub struct RespConnection {
    framed: Framed<TcpStream, RespCodec>,
    endpoint: String,
}

impl RespConnection {
    /// Connect, authenticate, select the database, and verify with `PING`.
    pub async fn connect(address: &BrokerAddress) -> Result<Self, BrokerError> {
        let BrokerAddress::Redis {
            host,
            port,
            username,
            password,
            db,
        } = address
        else {
            return Err(BrokerError::InvalidAddress {
                address: address.to_string(),
                reason: "not a RESP address".into(),
            });
        };

        let endpoint = address.to_string();
        let stream = TcpStream::connect((host.as_str(), *port))
            .await
            .map_err(|e| BrokerError::Connect {
                address: endpoint.clone(),
                message: e.to_string(),
            })?;
        let _ = stream.set_nodelay(true);

        let mut conn = Self {
            framed: Framed::new(stream, RespCodec::default()),
            endpoint,
        };

        if let Some(password) = password {
            let reply = match username {
                Some(user) => conn.request("AUTH", &[b"AUTH", user.as_bytes(), password.as_bytes()]).await?,
                None => conn.request("AUTH", &[b"AUTH", password.as_bytes()]).await?,
            };
            expect_ok("AUTH", &reply)?;
        }
        if let Some(db) = db {
            let index = db.to_string();
            let reply = conn.request("SELECT", &[b"SELECT", index.as_bytes()]).await?;
            expect_ok("SELECT", &reply)?;
        }
        let reply = conn.request("PING", &[b"PING"]).await?;
        if !reply.is_str("PONG") {
            return Err(unexpected("PING", &reply));
        }

        debug!(endpoint = %conn.endpoint, "broker connection ready");
        Ok(conn)
    }

    /// Endpoint this connection talks to (without credentials).
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a command without waiting for the reply.
    pub async fn send(&mut self, args: &[&[u8]]) -> Result<(), BrokerError> {
        self.framed.send(RespValue::command(args)).await?;
        Ok(())
    }

    /// Read the next frame.
    pub async fn read(&mut self) -> Result<RespValue, BrokerError> {
        match self.framed.next().await {
            Some(frame) => Ok(frame?),
            None => Err(BrokerError::Closed),
        }
    }

    /// Send a command and read its reply. Error replies become
    /// [`BrokerError::Rejected`].
    pub async fn request(
        &mut self,
        command: &'static str,
        args: &[&[u8]],
    ) -> Result<RespValue, BrokerError> {
        self.send(args).await?;
        match self.read().await? {
            RespValue::Error(message) => Err(BrokerError::Rejected { command, message }),
            reply => Ok(reply),
        }
    }
}

fn expect_ok(command: &'static str, reply: &RespValue) -> Result<(), BrokerError> {
    if reply.is_str("OK") {
        Ok(())
    } else {
        Err(unexpected(command, reply))
    }
}

fn unexpected(command: &'static str, reply: &RespValue) -> BrokerError {
    BrokerError::UnexpectedReply {
        command,
        reply: format!("{reply:?}"),
    }
}

struct PublishRequest {
    channel: String,
    payload: Bytes,
    reply: oneshot::Sender<Result<u64, BrokerError>>,
}

/// Publish-role handle over RESP.
///
/// The connection is owned by a task that reads every reply, even when the
/// caller has stopped waiting for it, so commands and replies never drift
/// apart.
pub struct RespPublisher {
    requests: mpsc::Sender<PublishRequest>,
}

impl RespPublisher {
    /// Open and verify a publishing connection.
    pub async fn connect(address: &BrokerAddress) -> Result<Self, BrokerError> {
        let conn = RespConnection::connect(address).await?;
        let (requests, rx) = mpsc::channel(PUBLISH_QUEUE_CAPACITY);
        let _ = tokio::spawn(run_publisher(conn, rx));
        Ok(Self { requests })
    }
}

async fn run_publisher(mut conn: RespConnection, mut requests: mpsc::Receiver<PublishRequest>) {
    while let Some(request) = requests.recv().await {
        let result = match conn
            .request(
                "PUBLISH",
                &[b"PUBLISH", request.channel.as_bytes(), &request.payload],
            )
            .await
        {
            Ok(RespValue::Integer(n)) => Ok(u64::try_from(n).unwrap_or(0)),
            Ok(other) => Err(unexpected("PUBLISH", &other)),
            Err(e) => Err(e),
        };
        let broken = match &result {
            Err(e @ (BrokerError::Resp(_) | BrokerError::Closed)) => {
                warn!(endpoint = %conn.endpoint(), error = %e, "broker publish connection lost");
                true
            }
            _ => false,
        };
        // the caller may have gone; the reply has been consumed either way
        let _ = request.reply.send(result);
        if broken {
            break;
        }
    }
    debug!(endpoint = %conn.endpoint(), "broker publish connection closed");
}

#[async_trait]
impl BrokerPublisher for RespPublisher {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<u64, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(PublishRequest {
                channel: channel.to_owned(),
                payload,
                reply,
            })
            .await
            .map_err(|_| BrokerError::Closed)?;
        rx.await.map_err(|_| BrokerError::Closed)?
    }
}

/// Subscribe-role handle over RESP.
pub struct RespSubscriber {
    conn: RespConnection,
}

impl RespSubscriber {
    /// Open and verify a subscribing connection.
    pub async fn connect(address: &BrokerAddress) -> Result<Self, BrokerError> {
        Ok(Self {
            conn: RespConnection::connect(address).await?,
        })
    }
}

#[async_trait]
impl BrokerSubscriber for RespSubscriber {
    async fn subscribe(self: Box<Self>, channel: &str) -> Result<Subscription, BrokerError> {
        let mut conn = self.conn;
        let reply = conn
            .request("SUBSCRIBE", &[b"SUBSCRIBE", channel.as_bytes()])
            .await?;
        match &reply {
            RespValue::Array(Some(items))
                if items.len() == 3 && items[0].is_str("subscribe") && items[1].is_str(channel) => {}
            _ => return Err(unexpected("SUBSCRIBE", &reply)),
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let channel_name = channel.to_string();
        let reader = tokio::spawn(async move {
            loop {
                match conn.read().await {
                    Ok(RespValue::Array(Some(mut items)))
                        if items.len() == 3 && items[0].is_str("message") =>
                    {
                        let Some(RespValue::Bulk(Some(payload))) = items.pop() else {
                            continue;
                        };
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Ok(other) => debug!(channel = %channel_name, reply = ?other, "ignoring broker push"),
                    Err(e) => {
                        warn!(
                            channel = %channel_name,
                            endpoint = %conn.endpoint(),
                            error = %e,
                            "broker subscription lost"
                        );
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(channel, rx, reader))
    }
}

//! Connection to the server.
//!
//! The reactor talks to a [`Link`]: a pair of in-memory queues carrying
//! JSON records. [`connect`] bridges a link to a TCP stream with one
//! reader and one writer task; tests use [`Link::pair`] instead.

pub mod discovery;
pub mod framing;

use std::net::SocketAddr;

use serde_json::Value;
use shared::packet::{encode, PacketSet, ProtocolError};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use discovery::discover_server;
pub use framing::{read_record, write_record, MAX_FRAME_LEN};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Discovery on UDP port {port} failed: {source}")]
    Discovery { port: u16, source: std::io::Error },

    #[error("Frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),

    #[error("Cannot encode record: {0}")]
    Encode(serde_json::Error),

    #[error("Cannot decode record: {0}")]
    Decode(serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Link closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Reader and writer tasks of a TCP link. Both are aborted on drop.
struct BridgeTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Drop for BridgeTasks {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// One end of a record link.
///
/// When the far end goes away [`recv`](Self::recv) returns `None` and
/// [`send`](Self::send) fails with [`TransportError::Closed`].
pub struct Link {
    outbound: UnboundedSender<Value>,
    inbound: UnboundedReceiver<Value>,
    _bridge: Option<BridgeTasks>,
}

impl Link {
    /// Two connected in-memory ends
    pub fn pair() -> (Link, Link) {
        let (a_tx, a_rx) = unbounded_channel();
        let (b_tx, b_rx) = unbounded_channel();
        let a = Link {
            outbound: a_tx,
            inbound: b_rx,
            _bridge: None,
        };
        let b = Link {
            outbound: b_tx,
            inbound: a_rx,
            _bridge: None,
        };
        (a, b)
    }

    /// Encode and queue a packet
    pub fn send<P: PacketSet>(&self, packet: &P) -> TransportResult<()> {
        self.send_record(encode(packet)?)
    }

    pub fn send_record(&self, record: Value) -> TransportResult<()> {
        self.outbound.send(record).map_err(|_| TransportError::Closed)
    }

    /// Next record from the far end, `None` once it is gone
    pub async fn recv(&mut self) -> Option<Value> {
        self.inbound.recv().await
    }
}

/// Open a TCP connection to the server and bridge it to a [`Link`].
pub async fn connect(addr: SocketAddr) -> TransportResult<Link> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| TransportError::Connect { addr, source })?;
    stream.set_nodelay(true)?;
    info!("Connection made to {addr}");

    let (mut read_half, mut write_half) = stream.into_split();
    let (to_server, mut outbound) = unbounded_channel::<Value>();
    let (inbound_tx, inbound) = unbounded_channel::<Value>();

    let reader = tokio::spawn(async move {
        loop {
            match read_record(&mut read_half).await {
                Ok(Some(record)) => {
                    debug!("Data received");
                    if inbound_tx.send(record).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    warn!("Server closed the connection");
                    break;
                }
                Err(e) => {
                    error!("Connection lost: {e}");
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(record) = outbound.recv().await {
            if let Err(e) = write_record(&mut write_half, &record).await {
                error!("Failed to send record: {e}");
                break;
            }
        }
    });

    Ok(Link {
        outbound: to_server,
        inbound,
        _bridge: Some(BridgeTasks { reader, writer }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::packet::{NeighbourDataPacket, NodePacket};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_pair_is_crossed() {
        let (mut node, mut server) = Link::pair();
        node.send_record(json!({"a": 1})).unwrap();
        server
            .send(&NodePacket::from(NeighbourDataPacket { activation_neighbours: 2.0 }))
            .unwrap();

        assert_eq!(server.recv().await, Some(json!({"a": 1})));
        let record = node.recv().await.unwrap();
        assert_eq!(record["_pktype"], "cldata");
    }

    #[tokio::test]
    async fn test_dropped_peer_closes_link() {
        let (mut node, server) = Link::pair();
        drop(server);
        assert_eq!(node.recv().await, None);
        assert!(matches!(node.send_record(json!({})), Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_tcp_bridge_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let record = read_record(&mut stream).await.unwrap().unwrap();
            write_record(&mut stream, &json!({"echo": record})).await.unwrap();
        });

        let mut link = connect(addr).await.unwrap();
        link.send_record(json!({"hello": "server"})).unwrap();
        let reply = link.recv().await.unwrap();
        assert_eq!(reply, json!({"echo": {"hello": "server"}}));

        server.await.unwrap();
        // Server task is done and its socket closed
        assert_eq!(link.recv().await, None);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(matches!(
            connect(addr).await,
            Err(TransportError::Connect { .. })
        ));
    }
}

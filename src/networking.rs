use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use crate::cryptography::{CodecError, FrameCodec};
use crate::relay::Inbound;
use crate::FRAME_SIZE;

/// Live connections of one link, keyed by peer address. The map mutex is
/// held across writes, which serializes concurrent sends per link and
/// keeps every frame contiguous on the wire.
type ConnectionMap = Arc<Mutex<HashMap<SocketAddr, OwnedWriteHalf>>>;

/// One configured endpoint, either a listening socket holding zero or
/// more accepted peers, or a dialed socket holding exactly one. Both flavors
/// read fixed-size frames into the router channel and accept ciphertext
/// for fan-out through `send`.
pub struct Link {
    addr: SocketAddr,
    connections: ConnectionMap,
}

impl Link {
    /// Bind and listen, accepting peers for the life of the process.
    ///
    /// Each accepted connection is registered for outbound frames; when
    /// `inbound` is present a reader task is spawned for it as well.
    pub async fn listen(
        addr: SocketAddr,
        codec: Arc<FrameCodec>,
        inbound: Option<mpsc::Sender<Inbound>>,
    ) -> std::io::Result<Link> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("listening on {}", local_addr);

        let connections: ConnectionMap = Arc::new(Mutex::new(HashMap::new()));
        let accept_connections = connections.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        info!("peer connected: {}", peer);
                        register(stream, peer, &accept_connections, &codec, &inbound).await;
                    }
                    Err(e) => {
                        warn!("accept failed on {}: {}", local_addr, e);
                    }
                }
            }
        });

        Ok(Link { addr: local_addr, connections })
    }

    /// Dial a remote server once. No reconnect: a connection lost later is
    /// pruned and the process carries on with its other links.
    pub async fn dial(
        addr: SocketAddr,
        codec: Arc<FrameCodec>,
        inbound: Option<mpsc::Sender<Inbound>>,
    ) -> std::io::Result<Link> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        info!("connected to {}", peer);

        let connections: ConnectionMap = Arc::new(Mutex::new(HashMap::new()));
        register(stream, peer, &connections, &codec, &inbound).await;

        Ok(Link { addr: peer, connections })
    }

    /// The bound address for a listening link, the peer address for a
    /// dialing one.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Write a frame to every connected peer except `exclude`.
    ///
    /// A failed write drops that peer from the connection set and the
    /// fan-out continues; transport errors never escape this call.
    pub async fn send(&self, frame: &[u8], exclude: Option<SocketAddr>) {
        let mut connections = self.connections.lock().await;

        let mut dead = Vec::new();
        for (peer, writer) in connections.iter_mut() {
            if Some(*peer) == exclude {
                continue;
            }
            if let Err(e) = writer.write_all(frame).await {
                debug!("write to {} failed: {}", peer, e);
                dead.push(*peer);
            } else if let Err(e) = writer.flush().await {
                debug!("flush to {} failed: {}", peer, e);
                dead.push(*peer);
            }
        }

        for peer in dead {
            connections.remove(&peer);
            info!("dropped peer {}", peer);
        }
    }
}

/// Split a fresh stream, park its write half in the connection map, and
/// spawn a frame reader when routing is enabled.
async fn register(
    stream: TcpStream,
    peer: SocketAddr,
    connections: &ConnectionMap,
    codec: &Arc<FrameCodec>,
    inbound: &Option<mpsc::Sender<Inbound>>,
) {
    let (read_half, write_half) = stream.into_split();
    connections.lock().await.insert(peer, write_half);

    if let Some(tx) = inbound {
        tokio::spawn(reader_task(
            read_half,
            peer,
            connections.clone(),
            codec.clone(),
            tx.clone(),
        ));
    }
}

/// Read exactly one wire frame at a time and post each validated frame to
/// the router. A zero-byte read (clean close) or a transport error ends
/// the task and removes the connection; a partial trailing frame is
/// discarded with it. Per-frame codec failures drop the frame only.
async fn reader_task(
    mut read_half: OwnedReadHalf,
    peer: SocketAddr,
    connections: ConnectionMap,
    codec: Arc<FrameCodec>,
    inbound: mpsc::Sender<Inbound>,
) {
    let mut frame = vec![0u8; FRAME_SIZE];

    loop {
        match read_half.read_exact(&mut frame).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("connection {} closed", peer);
                break;
            }
            Err(e) => {
                warn!("read error on {}: {}", peer, e);
                break;
            }
        }

        match codec.decrypt(&frame) {
            Ok((sender, payload)) => {
                let msg = Inbound { sender, from_addr: peer, payload, raw: frame.clone() };
                if inbound.send(msg).await.is_err() {
                    // Router is gone; the process is shutting down.
                    break;
                }
            }
            Err(e @ CodecError::CounterGap { .. }) => {
                warn!("dropping frame from {}: {}", peer, e);
            }
            Err(e) => {
                debug!("dropping frame from {}: {}", peer, e);
            }
        }
    }

    connections.lock().await.remove(&peer);
}

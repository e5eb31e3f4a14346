use log::{debug, info};
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::cryptography::{load_psk, FrameCodec};
use crate::networking::Link;
use crate::relay::{router_task, Arbiter, Inbound};
use crate::INPUT_CHUNK_SIZE;

pub struct Config {
    pub server_addr: Option<SocketAddr>,
    pub remote_server_addrs: Vec<SocketAddr>,
    pub psk_file: PathBuf,
    pub wait_input: bool,
    pub sentinel_byte: Option<u8>,
}

/// Bring the bus up and drive stdin until it closes.
pub async fn run(config: Config) -> Result<(), Box<dyn Error + Send + Sync>> {
    run_with_input(config, tokio::io::stdin()).await
}

/// Bring the bus up and drive a local byte source until it closes:
///     - Load the PSK and build the frame codec with a fresh sender id
///     - Create the configured links (one listener, any number of dialers)
///     - Spawn the router task, unless running transmit-only
///     - Chunk, encrypt, and broadcast the input on the calling task
pub async fn run_with_input(
    config: Config,
    input: impl AsyncRead + Unpin,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    if config.server_addr.is_none() && config.remote_server_addrs.is_empty() {
        return Err(
            "no endpoints configured: pass --server-addr and/or --remote-server-addr".into(),
        );
    }

    let key = load_psk(&config.psk_file)?;
    let codec = Arc::new(FrameCodec::new(key));
    info!("sender id: {}", hex::encode(codec.sender_id()));

    // Readers only get a channel when the receive side is wanted; in
    // transmit-only mode inbound bytes are left unread.
    let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(1024);
    let inbound = config.wait_input.then_some(inbound_tx);

    let mut links = Vec::new();
    if let Some(addr) = config.server_addr {
        links.push(Link::listen(addr, codec.clone(), inbound.clone()).await?);
    }
    for addr in &config.remote_server_addrs {
        links.push(Link::dial(*addr, codec.clone(), inbound.clone()).await?);
    }
    drop(inbound);

    let links = Arc::new(links);

    if config.wait_input {
        debug!("spawning router task");
        tokio::spawn(router_task(Arbiter::new(), links.clone(), inbound_rx));
    }

    input_loop(input, codec, links, config.sentinel_byte).await?;
    Ok(())
}

/// Read the input in chunks that fit one frame each, sealing and
/// broadcasting every chunk to all links. EOF broadcasts one empty frame
/// (the end-of-turn signal) and ends the loop; in sentinel mode a chunk
/// ending in the configured byte triggers the same signal without closing
/// the input.
async fn input_loop(
    mut input: impl AsyncRead + Unpin,
    codec: Arc<FrameCodec>,
    links: Arc<Vec<Link>>,
    sentinel_byte: Option<u8>,
) -> Result<(), String> {
    let mut buffer = vec![0u8; INPUT_CHUNK_SIZE];

    loop {
        let bytes_read = input.read(&mut buffer).await.map_err(|e| e.to_string())?;
        if bytes_read == 0 {
            debug!("input EOF, yielding the floor");
            broadcast(&codec, &links, &[]).await?;
            break;
        }

        debug!("read {} bytes from input", bytes_read);
        broadcast(&codec, &links, &buffer[..bytes_read]).await?;

        if let Some(sentinel) = sentinel_byte {
            if buffer[bytes_read - 1] == sentinel {
                debug!("sentinel byte seen, yielding the floor");
                broadcast(&codec, &links, &[]).await?;
            }
        }
    }

    Ok(())
}

async fn broadcast(codec: &FrameCodec, links: &[Link], payload: &[u8]) -> Result<(), String> {
    let frame = codec.encrypt(payload).map_err(|e| e.to_string())?;
    for link in links {
        link.send(&frame, None).await;
    }
    Ok(())
}

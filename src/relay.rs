use log::{debug, error};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::cryptography::SenderId;
use crate::networking::Link;

/// One validated frame handed from a link reader to the router: the
/// decrypted payload for local delivery plus the untouched ciphertext for
/// rebroadcast.
pub struct Inbound {
    pub sender: SenderId,
    pub from_addr: SocketAddr,
    pub payload: Vec<u8>,
    pub raw: Vec<u8>,
}

/// Speaker arbitration for the local output.
///
/// At most one sender holds the floor at a time. Payloads from the floor
/// holder pass straight through; payloads from everyone else queue in a
/// per-sender backlog in arrival order. An empty payload is the end-of-turn
/// signal: the floor holder relinquishes, and the backlog entry that was
/// opened first is drained in full.
pub struct Arbiter {
    current: Option<SenderId>,
    backlog: Vec<(SenderId, Vec<Vec<u8>>)>,
}

impl Arbiter {
    pub fn new() -> Self {
        Arbiter { current: None, backlog: Vec::new() }
    }

    /// Feed one frame through arbitration and return the payloads now due
    /// on the local output, in order.
    pub fn on_frame(&mut self, src: SenderId, payload: Vec<u8>) -> Vec<Vec<u8>> {
        let mut out = Vec::new();

        // Floor is free: first frame elects its sender.
        if self.current.is_none() {
            self.current = Some(src);
        }

        if self.current == Some(src) {
            if !payload.is_empty() {
                out.push(payload);
            } else if self.backlog.is_empty() {
                self.current = None;
            } else {
                // End of turn: the earliest deferred speaker is served in
                // full. Its own end-of-turn marker may already be queued,
                // in which case the floor frees up immediately.
                let (next, queue) = self.backlog.remove(0);
                let mut last_was_empty = false;
                for pending in queue {
                    last_was_empty = pending.is_empty();
                    if !last_was_empty {
                        out.push(pending);
                    }
                }
                self.current = if last_was_empty { None } else { Some(next) };
            }
        } else {
            // Not the floor holder: defer, keeping empty markers too.
            match self.backlog.iter_mut().find(|(id, _)| *id == src) {
                Some((_, queue)) => queue.push(payload),
                None => self.backlog.push((src, vec![payload])),
            }
        }

        out
    }

    #[cfg(test)]
    fn current(&self) -> Option<SenderId> {
        self.current
    }

    #[cfg(test)]
    fn backlog_len(&self) -> usize {
        self.backlog.len()
    }
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Consume inbound frames: arbitrate onto stdout, then rebroadcast the raw
/// ciphertext to every link, excluding the connection it arrived on.
///
/// A single consumer task makes each arbitration decision atomic with its
/// rebroadcast, so every peer observes the frames of one transit path in
/// one order.
pub async fn router_task(
    mut arbiter: Arbiter,
    links: Arc<Vec<Link>>,
    mut inbound: mpsc::Receiver<Inbound>,
) {
    let mut stdout = tokio::io::stdout();

    while let Some(msg) = inbound.recv().await {
        debug!(
            "routing {} byte payload from sender {}",
            msg.payload.len(),
            hex::encode(msg.sender)
        );

        let outputs = arbiter.on_frame(msg.sender, msg.payload);
        for chunk in &outputs {
            if let Err(e) = stdout.write_all(chunk).await {
                error!("failed to write to stdout: {}", e);
            }
        }
        if !outputs.is_empty() {
            if let Err(e) = stdout.flush().await {
                error!("failed to flush stdout: {}", e);
            }
        }

        for link in links.iter() {
            link.send(&msg.raw, Some(msg.from_addr)).await;
        }
    }
}

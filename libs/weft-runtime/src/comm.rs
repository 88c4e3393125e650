//! Comm transport contract and the in-process channel mesh.
//!
//! The engine only ever hands the transport self-contained frames and only
//! ever receives self-contained frames back; marshalling policy (append vs
//! full-copy) is decided above this layer. The in-process mesh backs the
//! integration suites and the single-binary topology: one bounded channel
//! per ordered (src, dst) pair, which is exactly the FIFO guarantee the
//! router relies on.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use weft_types::Location;

#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("transport closed")]
    Closed,

    #[error("no route to {dest}")]
    NoRoute { dest: Location },
}

/// Result of a non-blocking poll for incoming traffic.
#[derive(Debug)]
pub enum PollOutcome {
    /// One frame, and the queue looked empty afterwards.
    Message(Bytes),
    /// One frame with more already waiting.
    MoreMessages(Bytes),
    /// Nothing pending.
    NoMessage,
}

/// The messaging substrate a policy domain plugs into.
#[async_trait]
pub trait CommTransport: Send + Sync + 'static {
    fn location(&self) -> Location;

    /// Queue one self-contained frame for `dest`. Per-(src, dst) FIFO.
    async fn send(&self, dest: Location, frame: Bytes) -> Result<(), CommError>;

    /// Non-blocking receive.
    fn poll(&self) -> PollOutcome;

    /// Wait for the next incoming frame; `None` once the mesh is torn down.
    async fn recv(&self) -> Option<Bytes>;
}

/// Channel-mesh transport connecting every domain in one process.
pub struct InProcTransport {
    location: Location,
    peers: Vec<mpsc::Sender<Bytes>>,
    inbox: Mutex<mpsc::Receiver<Bytes>>,
}

impl InProcTransport {
    /// Build a fully-connected mesh of `n` endpoints.
    pub fn mesh(n: usize, capacity: usize) -> Vec<std::sync::Arc<InProcTransport>> {
        let mut senders = Vec::with_capacity(n);
        let mut receivers = Vec::with_capacity(n);
        for _ in 0..n {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            senders.push(tx);
            receivers.push(rx);
        }
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, rx)| {
                std::sync::Arc::new(InProcTransport {
                    location: Location(rank as u32),
                    peers: senders.clone(),
                    inbox: Mutex::new(rx),
                })
            })
            .collect()
    }
}

#[async_trait]
impl CommTransport for InProcTransport {
    fn location(&self) -> Location {
        self.location
    }

    async fn send(&self, dest: Location, frame: Bytes) -> Result<(), CommError> {
        let peer = self
            .peers
            .get(dest.rank() as usize)
            .ok_or(CommError::NoRoute { dest })?;
        peer.send(frame).await.map_err(|_| CommError::Closed)
    }

    fn poll(&self) -> PollOutcome {
        let Ok(mut inbox) = self.inbox.try_lock() else {
            return PollOutcome::NoMessage;
        };
        match inbox.try_recv() {
            Ok(frame) => {
                if inbox.is_empty() {
                    PollOutcome::Message(frame)
                } else {
                    PollOutcome::MoreMessages(frame)
                }
            }
            Err(_) => PollOutcome::NoMessage,
        }
    }

    async fn recv(&self) -> Option<Bytes> {
        self.inbox.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mesh_routes_point_to_point_in_order() {
        let mesh = InProcTransport::mesh(2, 8);
        mesh[0]
            .send(Location(1), Bytes::from_static(b"a"))
            .await
            .unwrap();
        mesh[0]
            .send(Location(1), Bytes::from_static(b"b"))
            .await
            .unwrap();
        assert_eq!(mesh[1].recv().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(mesh[1].recv().await.unwrap(), Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn poll_reports_backlog() {
        let mesh = InProcTransport::mesh(2, 8);
        mesh[1]
            .send(Location(0), Bytes::from_static(b"x"))
            .await
            .unwrap();
        mesh[1]
            .send(Location(0), Bytes::from_static(b"y"))
            .await
            .unwrap();
        assert!(matches!(mesh[0].poll(), PollOutcome::MoreMessages(_)));
        assert!(matches!(mesh[0].poll(), PollOutcome::Message(_)));
        assert!(matches!(mesh[0].poll(), PollOutcome::NoMessage));
    }

    #[tokio::test]
    async fn unknown_destination_is_an_error() {
        let mesh = InProcTransport::mesh(1, 1);
        let err = mesh[0].send(Location(7), Bytes::new()).await.unwrap_err();
        assert!(matches!(err, CommError::NoRoute { .. }));
    }
}

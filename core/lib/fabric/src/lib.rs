//! Typed message-passing fabric between the node's worker threads.
//!
//! Every unit registers a typed inbox ([`Port`]) under its thread kind and
//! replica id. Messages are pushed, never polled; delivery from one sender
//! to one inbox is FIFO, with no ordering across channels. Requests carry a
//! monotonically-increasing correlation id and resolve through a one-shot
//! reply channel; on timeout the future resolves with
//! [`FabricError::TimedOut`] and a late response is discarded.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use opnet_basic_types::{BlockNumber, H256};
use opnet_types::SyncStatus;

/// Unit roles addressable on the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadKind {
    Api,
    Indexer,
    Rpc,
    Mempool,
    Consensus,
}

/// Message families exchanged between units.
#[derive(Debug, Clone)]
pub enum Message {
    /// Announces a peer port created by [`Fabric::link`].
    LinkThread { peer: ThreadKind, peer_id: u32 },
    /// Asks the receiver to initiate a link back to the sender.
    LinkThreadRequest { peer: ThreadKind },
    /// Generic RPC forwarded between units.
    RpcMessage {
        method: String,
        data: serde_json::Value,
    },
    /// A block finished the pipeline; carries what consensus needs to sign.
    BlockProcessed {
        height: BlockNumber,
        block_hash: H256,
        checksum_root: H256,
    },
    /// Request for the indexer's sync status.
    CurrentIndexerBlock,
    StartIndexer,
    /// A transaction was admitted to the mempool.
    MempoolTransactionNotification { id: H256 },
    /// Request to validate a span of committed headers.
    ValidateBlockHeaders {
        from: BlockNumber,
        to: BlockNumber,
    },
}

/// Typed payloads a request can resolve with.
#[derive(Debug, Clone)]
pub enum ResponseData {
    SyncStatus(SyncStatus),
    Started(bool),
    HeadersValid(bool),
    Json(serde_json::Value),
    None,
}

/// Wrapper around every response delivered on the reverse port.
#[derive(Debug, Clone)]
pub struct ThreadResponse {
    pub data: ResponseData,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FabricError {
    #[error("no unit of kind {0:?} is linked")]
    Unlinked(ThreadKind),

    #[error("request timed out")]
    TimedOut,

    #[error("peer inbox closed")]
    ChannelClosed,
}

pub type FabricResult<T> = Result<T, FabricError>;

/// One delivery into a unit's inbox.
#[derive(Debug)]
pub enum Envelope {
    Notification { message: Message },
    Request {
        correlation_id: u64,
        message: Message,
        reply: ReplySender,
    },
}

/// Single-use reply handle for a correlated request.
#[derive(Debug)]
pub struct ReplySender {
    correlation_id: u64,
    sender: oneshot::Sender<ThreadResponse>,
}

impl ReplySender {
    /// Delivers the response; a receiver that already timed out discards it
    /// silently.
    pub fn respond(self, response: ThreadResponse) {
        if self.sender.send(response).is_err() {
            debug!(
                correlation_id = self.correlation_id,
                "response discarded: requester timed out"
            );
        }
    }

    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }
}

/// Typed inbox of one unit.
#[derive(Debug)]
pub struct Port {
    kind: ThreadKind,
    id: u32,
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl Port {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }

    pub fn kind(&self) -> ThreadKind {
        self.kind
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

#[derive(Debug, Default)]
struct Registry {
    inboxes: HashMap<ThreadKind, Vec<(u32, mpsc::UnboundedSender<Envelope>)>>,
}

/// The fabric shared by all units of one process.
#[derive(Debug, Clone, Default)]
pub struct Fabric {
    registry: Arc<Mutex<Registry>>,
    next_correlation: Arc<AtomicU64>,
}

impl Fabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the inbox for a unit replica. Re-registering an id replaces
    /// the previous inbox.
    pub fn register(&self, kind: ThreadKind, id: u32) -> Port {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock().expect("fabric registry poisoned");
        let entries = registry.inboxes.entry(kind).or_default();
        entries.retain(|(existing, _)| *existing != id);
        entries.push((id, sender));
        Port { kind, id, receiver }
    }

    /// Announces two units to each other. Each side receives a `LinkThread`
    /// notification naming its peer.
    pub fn link(&self, a: (ThreadKind, u32), b: (ThreadKind, u32)) -> FabricResult<()> {
        self.send(
            a.0,
            a.1,
            Message::LinkThread {
                peer: b.0,
                peer_id: b.1,
            },
        )?;
        self.send(
            b.0,
            b.1,
            Message::LinkThread {
                peer: a.0,
                peer_id: a.1,
            },
        )
    }

    /// Fire-and-forget delivery to a specific replica.
    pub fn send(&self, kind: ThreadKind, id: u32, message: Message) -> FabricResult<()> {
        let sender = self.sender_for(kind, Some(id))?;
        sender
            .send(Envelope::Notification { message })
            .map_err(|_| FabricError::ChannelClosed)
    }

    /// Fire-and-forget delivery to any replica of a kind.
    pub fn notify(&self, kind: ThreadKind, message: Message) -> FabricResult<()> {
        let sender = self.sender_for(kind, None)?;
        sender
            .send(Envelope::Notification { message })
            .map_err(|_| FabricError::ChannelClosed)
    }

    /// Correlated request/response with a timeout.
    pub async fn request(
        &self,
        kind: ThreadKind,
        message: Message,
        timeout: Duration,
    ) -> FabricResult<ThreadResponse> {
        let correlation_id = self.next_correlation.fetch_add(1, Ordering::Relaxed);
        let (reply_sender, reply_receiver) = oneshot::channel();

        let sender = self.sender_for(kind, None)?;
        sender
            .send(Envelope::Request {
                correlation_id,
                message,
                reply: ReplySender {
                    correlation_id,
                    sender: reply_sender,
                },
            })
            .map_err(|_| FabricError::ChannelClosed)?;

        match tokio::time::timeout(timeout, reply_receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(FabricError::ChannelClosed),
            Err(_) => Err(FabricError::TimedOut),
        }
    }

    fn sender_for(
        &self,
        kind: ThreadKind,
        id: Option<u32>,
    ) -> FabricResult<mpsc::UnboundedSender<Envelope>> {
        let registry = self.registry.lock().expect("fabric registry poisoned");
        let entries = registry
            .inboxes
            .get(&kind)
            .filter(|entries| !entries.is_empty())
            .ok_or(FabricError::Unlinked(kind))?;
        let sender = match id {
            Some(id) => {
                &entries
                    .iter()
                    .find(|(existing, _)| *existing == id)
                    .ok_or(FabricError::Unlinked(kind))?
                    .1
            }
            None => &entries[0].1,
        };
        Ok(sender.clone())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn request_resolves_with_typed_response() {
        let fabric = Fabric::new();
        let mut port = fabric.register(ThreadKind::Indexer, 0);

        let responder = tokio::spawn(async move {
            match port.recv().await.expect("request arrives") {
                Envelope::Request { message, reply, .. } => {
                    assert_matches!(message, Message::CurrentIndexerBlock);
                    reply.respond(ThreadResponse {
                        data: ResponseData::SyncStatus(SyncStatus::synced_at(
                            BlockNumber(7),
                            H256::repeat_byte(1),
                        )),
                    });
                }
                other => panic!("expected request, got {other:?}"),
            }
        });

        let response = fabric
            .request(
                ThreadKind::Indexer,
                Message::CurrentIndexerBlock,
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_matches!(
            response.data,
            ResponseData::SyncStatus(status) if status.current == BlockNumber(7)
        );
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn request_times_out_and_discards_late_response() {
        let fabric = Fabric::new();
        let mut port = fabric.register(ThreadKind::Mempool, 0);

        let result = fabric
            .request(
                ThreadKind::Mempool,
                Message::CurrentIndexerBlock,
                Duration::from_millis(20),
            )
            .await;
        assert_matches!(result, Err(FabricError::TimedOut));

        // The late response must be discarded without panicking.
        match port.recv().await.expect("request was delivered") {
            Envelope::Request { reply, .. } => reply.respond(ThreadResponse {
                data: ResponseData::None,
            }),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sends_are_delivered_in_order() {
        let fabric = Fabric::new();
        let mut port = fabric.register(ThreadKind::Consensus, 0);

        for height in 0..10u64 {
            fabric
                .send(
                    ThreadKind::Consensus,
                    0,
                    Message::BlockProcessed {
                        height: BlockNumber(height),
                        block_hash: H256::zero(),
                        checksum_root: H256::zero(),
                    },
                )
                .unwrap();
        }

        for expected in 0..10u64 {
            match port.recv().await.unwrap() {
                Envelope::Notification {
                    message: Message::BlockProcessed { height, .. },
                } => assert_eq!(height, BlockNumber(expected)),
                other => panic!("unexpected envelope {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn unlinked_kind_is_reported() {
        let fabric = Fabric::new();
        assert_matches!(
            fabric.notify(ThreadKind::Api, Message::StartIndexer),
            Err(FabricError::Unlinked(ThreadKind::Api))
        );
    }

    #[tokio::test]
    async fn link_announces_both_peers() {
        let fabric = Fabric::new();
        let mut api = fabric.register(ThreadKind::Api, 0);
        let mut indexer = fabric.register(ThreadKind::Indexer, 0);

        fabric
            .link((ThreadKind::Api, 0), (ThreadKind::Indexer, 0))
            .unwrap();

        assert_matches!(
            api.recv().await.unwrap(),
            Envelope::Notification {
                message: Message::LinkThread {
                    peer: ThreadKind::Indexer,
                    ..
                }
            }
        );
        assert_matches!(
            indexer.recv().await.unwrap(),
            Envelope::Notification {
                message: Message::LinkThread {
                    peer: ThreadKind::Api,
                    ..
                }
            }
        );
    }
}

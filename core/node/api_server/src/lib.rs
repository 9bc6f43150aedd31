//! Read-serving JSON-RPC / WebSocket gateway. HTTP and WS share one
//! jsonrpsee server; node events arriving over the fabric are fanned out to
//! WebSocket subscribers.

use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use opnet_btc_client::BitcoinOps;
use opnet_config::{ApiConfig, ChainConfig};
use opnet_consensus::EpochManager;
use opnet_fabric::{Envelope, Fabric, Message, Port, ThreadKind};
use opnet_mempool::Mempool;
use opnet_rpc_decl::{
    u64_to_hex, OpnetApiServer, SubscriptionEvent, SubscriptionTopic,
};
use opnet_storage::Store;
use opnet_vm::VmExecutor;

mod error;
mod rpc;
mod subscriptions;
#[cfg(test)]
mod tests;

pub use subscriptions::{SubscriptionInfo, SubscriptionManager};

/// Shared state behind every RPC method.
#[derive(Clone)]
pub struct RpcState {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) mempool: Arc<Mempool>,
    pub(crate) epochs: Arc<EpochManager>,
    pub(crate) btc_client: Arc<dyn BitcoinOps>,
    pub(crate) vm: Arc<VmExecutor>,
    pub(crate) chain: ChainConfig,
    pub(crate) config: ApiConfig,
    pub(crate) fabric: Fabric,
    pub(crate) subscriptions: Arc<SubscriptionManager>,
}

impl std::fmt::Debug for RpcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcState")
            .field("chain_id", &self.chain.chain_id)
            .finish()
    }
}

pub struct ApiServer {
    state: RpcState,
    port: Port,
}

impl ApiServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ApiConfig,
        chain: ChainConfig,
        store: Arc<dyn Store>,
        mempool: Arc<Mempool>,
        epochs: Arc<EpochManager>,
        btc_client: Arc<dyn BitcoinOps>,
        vm: Arc<VmExecutor>,
        fabric: Fabric,
    ) -> Self {
        let port = fabric.register(ThreadKind::Api, 0);
        let state = RpcState {
            store,
            mempool,
            epochs,
            btc_client,
            vm,
            chain,
            config,
            fabric,
            subscriptions: Arc::new(SubscriptionManager::new()),
        };
        Self { state, port }
    }

    pub fn state(&self) -> &RpcState {
        &self.state
    }

    pub async fn run(self, mut stop_receiver: watch::Receiver<bool>) -> anyhow::Result<()> {
        let Self { state, mut port } = self;

        let server = jsonrpsee::server::Server::builder()
            .build(&state.config.bind_addr)
            .await
            .with_context(|| format!("failed to bind API server to {}", state.config.bind_addr))?;
        let local_addr = server.local_addr()?;
        info!(%local_addr, "API server listening");

        let subscriptions = Arc::clone(&state.subscriptions);
        let blocks_per_epoch = state.epochs.blocks_per_epoch();
        let handle = server.start(state.into_rpc());

        // Pump fabric notifications into the subscription feed.
        loop {
            tokio::select! {
                envelope = port.recv() => match envelope {
                    Some(Envelope::Notification { message }) => {
                        publish_event(&subscriptions, blocks_per_epoch, message);
                    }
                    Some(Envelope::Request { reply, .. }) => {
                        reply.respond(opnet_fabric::ThreadResponse {
                            data: opnet_fabric::ResponseData::None,
                        });
                    }
                    None => break,
                },
                _ = stop_receiver.changed() => {
                    if *stop_receiver.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Stop signal received, API server is shutting down");
        if let Err(e) = handle.stop() {
            warn!("API server was already stopped: {e}");
        }
        handle.stopped().await;
        Ok(())
    }
}

fn publish_event(
    subscriptions: &SubscriptionManager,
    blocks_per_epoch: u64,
    message: Message,
) {
    match message {
        Message::BlockProcessed {
            height,
            block_hash,
            checksum_root,
        } => {
            subscriptions.publish(
                SubscriptionTopic::NewBlocks,
                SubscriptionEvent::NewBlock {
                    height: u64_to_hex(height.0),
                    hash: block_hash,
                    checksum_root,
                },
            );
            if height.0 % blocks_per_epoch == 0 {
                subscriptions.publish(
                    SubscriptionTopic::NewEpochs,
                    SubscriptionEvent::NewEpoch {
                        epoch_number: u64_to_hex(height.0 / blocks_per_epoch),
                    },
                );
            }
        }
        Message::MempoolTransactionNotification { id } => {
            subscriptions.publish(
                SubscriptionTopic::NewTransactions,
                SubscriptionEvent::NewTransaction { id },
            );
        }
        other => debug!("ignoring notification: {other:?}"),
    }
}

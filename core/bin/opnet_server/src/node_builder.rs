//! Assembly of the node's units and their fabric links.

use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::watch;
use tracing::{error, info};

use opnet_api_server::ApiServer;
use opnet_btc_client::{
    client::{BitcoinClient, BitcoinClientPool},
    parse_network, Auth, BitcoinOps,
};
use opnet_consensus::{Consensus, EpochManager};
use opnet_fabric::{Fabric, ThreadKind};
use opnet_indexer::Indexer;
use opnet_mempool::Mempool;
use opnet_storage::{InMemoryStore, Store};
use opnet_vm::{NoopRuntime, VmExecutor};

use crate::config::NodeConfig;

pub struct NodeBuilder {
    config: NodeConfig,
}

impl NodeBuilder {
    pub fn new(config: NodeConfig) -> anyhow::Result<Self> {
        Ok(Self { config })
    }

    pub fn build(self) -> anyhow::Result<Node> {
        let config = self.config;
        let network = parse_network(config.btc_client.network())?;

        let auth = if config.btc_client.rpc_user.is_empty() {
            Auth::None
        } else {
            Auth::UserPass(
                config.btc_client.rpc_user.clone(),
                config.btc_client.rpc_password.clone(),
            )
        };
        let clients = (0..config.btc_client.pool_size())
            .map(|_| -> anyhow::Result<Arc<dyn BitcoinOps>> {
                Ok(Arc::new(
                    BitcoinClient::new(config.btc_client.rpc_url(), network, auth.clone())
                        .context("failed to construct base-chain client")?,
                ))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let btc_client: Arc<dyn BitcoinOps> = Arc::new(BitcoinClientPool::new(clients)?);

        // The persistent document store is deployment infrastructure; the
        // bundled store keeps everything in process memory.
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

        let fabric = Fabric::new();
        let vm = Arc::new(VmExecutor::new(
            network,
            config.vm.clone(),
            Arc::new(NoopRuntime),
        )?);

        let mempool = Arc::new(Mempool::new(
            config.mempool.clone(),
            Arc::clone(&store),
            Arc::clone(&btc_client),
            fabric.clone(),
        ));
        let epochs = Arc::new(EpochManager::new(
            Arc::clone(&store),
            config.consensus.blocks_per_epoch(),
            config.consensus.prefer_earliest_submission,
        ));

        let indexer = Indexer::new(
            config.indexer.clone(),
            Arc::clone(&store),
            Arc::clone(&btc_client),
            Arc::clone(&vm),
            fabric.clone(),
            Some(Arc::clone(&mempool)),
        );
        let consensus = Consensus::new(
            config.consensus.clone(),
            Arc::clone(&store),
            Arc::clone(&epochs),
            fabric.clone(),
        )?;
        let api = ApiServer::new(
            config.api.clone(),
            config.chain.clone(),
            Arc::clone(&store),
            Arc::clone(&mempool),
            Arc::clone(&epochs),
            Arc::clone(&btc_client),
            Arc::clone(&vm),
            fabric.clone(),
        );

        fabric.link((ThreadKind::Api, 0), (ThreadKind::Indexer, 0))?;
        fabric.link((ThreadKind::Indexer, 0), (ThreadKind::Consensus, 0))?;

        Ok(Node {
            indexer,
            consensus,
            api,
            mempool,
        })
    }
}

pub struct Node {
    indexer: Indexer,
    consensus: Consensus,
    api: ApiServer,
    mempool: Arc<Mempool>,
}

impl Node {
    pub async fn run(self) -> anyhow::Result<()> {
        let (stop_sender, stop_receiver) = watch::channel(false);

        let mut tasks = Vec::new();
        tasks.push(("indexer", tokio::spawn(self.indexer.run(stop_receiver.clone()))));
        tasks.push((
            "consensus",
            tokio::spawn(self.consensus.run(stop_receiver.clone())),
        ));
        tasks.push(("api", tokio::spawn(self.api.run(stop_receiver.clone()))));
        tasks.push((
            "mempool-sweeper",
            tokio::spawn(self.mempool.run_sweeper(stop_receiver.clone())),
        ));

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;
        info!("Shutdown signal received");
        stop_sender.send(true).ok();

        for (name, task) in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("{name} terminated with error: {err:?}"),
                Err(err) => error!("{name} panicked: {err}"),
            }
        }
        Ok(())
    }
}

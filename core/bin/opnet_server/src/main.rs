use anyhow::Context as _;
use clap::Parser;

mod config;
mod node_builder;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Debug, Parser)]
#[command(author = "OPNet", version, about = "OPNet overlay node", long_about = None)]
struct Cli {
    /// Height to start indexing from when the store is empty.
    #[arg(long)]
    start_block: Option<u64>,

    /// Bind address override for the JSON-RPC server.
    #[arg(long)]
    bind_addr: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let opt = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut config = config::NodeConfig::from_env().context("failed to load configuration")?;
    if let Some(start_block) = opt.start_block {
        config.indexer.start_block = start_block;
    }
    if let Some(bind_addr) = opt.bind_addr {
        config.api.bind_addr = bind_addr;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    runtime.block_on(async {
        let node = node_builder::NodeBuilder::new(config)?.build()?;
        node.run().await
    })
}

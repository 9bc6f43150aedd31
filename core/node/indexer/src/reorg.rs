//! Reorg recovery: fork-point scan and per-height unwind.

use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use tracing::{info, warn};

use opnet_basic_types::BlockNumber;
use opnet_btc_client::BitcoinOps;
use opnet_mempool::Mempool;
use opnet_storage::Store;
use opnet_types::{block_hash_to_h256, OverlayTransaction, ReorgRecord};

use crate::metrics::METRICS;

/// Walks back from the local tip until the local header hash matches the
/// chain again; the returned height is the fork point `F`.
pub(crate) async fn detect_fork_point(
    store: &Arc<dyn Store>,
    btc_client: &Arc<dyn BitcoinOps>,
    local_tip: BlockNumber,
) -> anyhow::Result<BlockNumber> {
    let mut height = local_tip;
    loop {
        let local = store
            .block_by_height(height)
            .await?
            .with_context(|| format!("missing local header at height {height} during reorg scan"))?;
        let chain_hash = btc_client.fetch_block_hash(height.0).await?;
        if block_hash_to_h256(chain_hash) == local.hash {
            return Ok(height);
        }
        height = height
            .prev()
            .context("base chain diverged below the first indexed block")?;
    }
}

/// Unwinds heights `fork+1 ..= local_tip` in descending order, appends the
/// reorg record, and hands the unwound transactions back to the mempool.
pub(crate) async fn unwind_to(
    store: &Arc<dyn Store>,
    mempool: Option<&Arc<Mempool>>,
    fork: BlockNumber,
    local_tip: BlockNumber,
) -> anyhow::Result<()> {
    let mut unwound: Vec<OverlayTransaction> = Vec::new();

    let mut height = local_tip;
    while height > fork {
        let transactions = store.transactions_by_block(height).await?;
        unwound.extend(
            transactions
                .into_iter()
                .filter(OverlayTransaction::is_executable),
        );
        store
            .unwind_block(height)
            .await
            .with_context(|| format!("failed to unwind height {height}"))?;
        height = match height.prev() {
            Some(prev) => prev,
            None => break,
        };
    }

    store
        .append_reorg(ReorgRecord {
            from_block: fork,
            to_block: local_tip,
            timestamp: Utc::now(),
        })
        .await?;
    METRICS.reorgs.inc();
    info!(from = %fork, to = %local_tip, "unwound reorged blocks");

    if let Some(mempool) = mempool {
        if unwound.is_empty() {
            return Ok(());
        }
        let count = unwound.len();
        mempool.restore_transactions(unwound).await;
        info!(count, "offered unwound transactions back to the mempool");
    } else if !unwound.is_empty() {
        warn!(
            count = unwound.len(),
            "no mempool attached; unwound transactions dropped"
        );
    }

    Ok(())
}

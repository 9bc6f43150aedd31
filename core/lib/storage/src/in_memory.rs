use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use opnet_basic_types::{BlockNumber, EpochNumber, H256};
use opnet_types::{
    BlockHeader, BlockWitness, Contract, Epoch, EpochSubmission, MempoolEntry,
    OverlayTransaction, ReorgRecord, TransactionReceipt, UtxoEntry,
};

use crate::{
    BlockCommitBatch, PointerValueRow, PublicKeyEntry, Store, StoreResult, WitnessFilter,
};

const DEFAULT_WITNESS_LIMIT: usize = 50;

#[derive(Debug, Default)]
struct Inner {
    blocks_by_height: BTreeMap<u64, BlockHeader>,
    heights_by_hash: HashMap<H256, u64>,
    transactions: HashMap<H256, OverlayTransaction>,
    transactions_by_block: BTreeMap<u64, Vec<H256>>,
    receipts: HashMap<H256, TransactionReceipt>,
    contracts_by_address: HashMap<String, Contract>,
    addresses_by_tweaked_key: HashMap<H256, String>,
    /// `(contract, pointer) -> last_seen_at -> row`; the inner map is the
    /// revision log.
    pointers: HashMap<(H256, H256), BTreeMap<u64, PointerValueRow>>,
    utxos: HashMap<(H256, u32), UtxoEntry>,
    outpoints_by_address: HashMap<String, HashSet<(H256, u32)>>,
    witnesses_by_block: BTreeMap<u64, Vec<BlockWitness>>,
    mempool: HashMap<H256, MempoolEntry>,
    epochs: BTreeMap<u64, Epoch>,
    submissions_by_epoch: BTreeMap<u64, Vec<EpochSubmission>>,
    public_keys: HashMap<H256, PublicKeyEntry>,
    reorgs: Vec<ReorgRecord>,
}

/// Store implementation holding every collection in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn block_by_height(&self, height: BlockNumber) -> StoreResult<Option<BlockHeader>> {
        Ok(self.inner.read().await.blocks_by_height.get(&height.0).cloned())
    }

    async fn block_by_hash(&self, hash: H256) -> StoreResult<Option<BlockHeader>> {
        let inner = self.inner.read().await;
        Ok(inner
            .heights_by_hash
            .get(&hash)
            .and_then(|height| inner.blocks_by_height.get(height))
            .cloned())
    }

    async fn latest_block(&self) -> StoreResult<Option<BlockHeader>> {
        Ok(self
            .inner
            .read()
            .await
            .blocks_by_height
            .last_key_value()
            .map(|(_, header)| header.clone()))
    }

    async fn commit_block(&self, batch: BlockCommitBatch) -> StoreResult<()> {
        let mut inner = self.inner.write().await;

        let spend_height = batch.header.as_ref().map(|header| header.height);
        if let Some(header) = batch.header {
            inner.heights_by_hash.insert(header.hash, header.height.0);
            inner.blocks_by_height.insert(header.height.0, header);
        }

        for tx in batch.transactions {
            let height = tx.base().block_height.0;
            inner
                .transactions_by_block
                .entry(height)
                .or_default()
                .push(tx.txid());
            inner.transactions.insert(tx.txid(), tx);
        }
        for receipt in batch.receipts {
            inner.receipts.insert(receipt.txid, receipt);
        }
        for contract in batch.contracts {
            inner
                .addresses_by_tweaked_key
                .insert(contract.tweaked_pubkey, contract.contract_address.clone());
            inner
                .contracts_by_address
                .insert(contract.contract_address.clone(), contract);
        }
        for utxo in batch.utxo_inserts {
            if let Some(address) = &utxo.address {
                inner
                    .outpoints_by_address
                    .entry(address.clone())
                    .or_default()
                    .insert(utxo.outpoint());
            }
            inner.utxos.insert(utxo.outpoint(), utxo);
        }
        for outpoint in batch.utxo_spends {
            if let Some(utxo) = inner.utxos.get_mut(&outpoint) {
                utxo.deleted_at_block = spend_height;
            }
        }
        for row in batch.pointer_writes {
            inner
                .pointers
                .entry((row.contract, row.pointer))
                .or_default()
                .insert(row.last_seen_at.0, row);
        }
        for witness in batch.witnesses {
            let entries = inner
                .witnesses_by_block
                .entry(witness.block_number.0)
                .or_default();
            if !entries.iter().any(|w| w.pubkey == witness.pubkey) {
                entries.push(witness);
            }
        }
        for id in batch.evicted_mempool_ids {
            inner.mempool.remove(&id);
        }

        Ok(())
    }

    async fn unwind_block(&self, height: BlockNumber) -> StoreResult<()> {
        let mut inner = self.inner.write().await;

        if let Some(header) = inner.blocks_by_height.remove(&height.0) {
            inner.heights_by_hash.remove(&header.hash);
        }

        if let Some(txids) = inner.transactions_by_block.remove(&height.0) {
            for txid in txids {
                inner.transactions.remove(&txid);
                inner.receipts.remove(&txid);
            }
        }

        let removed_contracts: Vec<_> = inner
            .contracts_by_address
            .iter()
            .filter(|(_, contract)| contract.deployment_height == height)
            .map(|(address, contract)| (address.clone(), contract.tweaked_pubkey))
            .collect();
        for (address, key) in removed_contracts {
            inner.contracts_by_address.remove(&address);
            inner.addresses_by_tweaked_key.remove(&key);
        }

        // Drop UTXOs created at this height and resurrect the ones it spent.
        let created: Vec<_> = inner
            .utxos
            .iter()
            .filter(|(_, utxo)| utxo.block_height == height)
            .map(|(outpoint, _)| *outpoint)
            .collect();
        for outpoint in created {
            if let Some(utxo) = inner.utxos.remove(&outpoint) {
                if let Some(address) = &utxo.address {
                    if let Some(set) = inner.outpoints_by_address.get_mut(address) {
                        set.remove(&outpoint);
                    }
                }
            }
        }
        for utxo in inner.utxos.values_mut() {
            if utxo.deleted_at_block == Some(height) {
                utxo.deleted_at_block = None;
            }
        }

        inner
            .pointers
            .retain(|_, revisions| {
                revisions.remove(&height.0);
                !revisions.is_empty()
            });

        inner.witnesses_by_block.remove(&height.0);

        Ok(())
    }

    async fn transaction_by_id(&self, txid: H256) -> StoreResult<Option<OverlayTransaction>> {
        Ok(self.inner.read().await.transactions.get(&txid).cloned())
    }

    async fn transactions_by_block(
        &self,
        height: BlockNumber,
    ) -> StoreResult<Vec<OverlayTransaction>> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions_by_block
            .get(&height.0)
            .map(|txids| {
                txids
                    .iter()
                    .filter_map(|txid| inner.transactions.get(txid).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn receipt_by_id(&self, txid: H256) -> StoreResult<Option<TransactionReceipt>> {
        Ok(self.inner.read().await.receipts.get(&txid).cloned())
    }

    async fn contract_by_address(&self, address: &str) -> StoreResult<Option<Contract>> {
        Ok(self.inner.read().await.contracts_by_address.get(address).cloned())
    }

    async fn contract_by_tweaked_key(&self, key: H256) -> StoreResult<Option<Contract>> {
        let inner = self.inner.read().await;
        Ok(inner
            .addresses_by_tweaked_key
            .get(&key)
            .and_then(|address| inner.contracts_by_address.get(address))
            .cloned())
    }

    async fn pointer_value_at(
        &self,
        contract: H256,
        pointer: H256,
        at: BlockNumber,
    ) -> StoreResult<Option<PointerValueRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .pointers
            .get(&(contract, pointer))
            .and_then(|revisions| revisions.range(..=at.0).next_back())
            .map(|(_, row)| row.clone()))
    }

    async fn utxo(&self, txid: H256, vout: u32) -> StoreResult<Option<UtxoEntry>> {
        Ok(self.inner.read().await.utxos.get(&(txid, vout)).cloned())
    }

    async fn live_utxos_by_address(&self, address: &str) -> StoreResult<Vec<UtxoEntry>> {
        let inner = self.inner.read().await;
        Ok(collect_address_utxos(&inner, address, |utxo| utxo.is_live()))
    }

    async fn spent_utxos_by_address(&self, address: &str) -> StoreResult<Vec<UtxoEntry>> {
        let inner = self.inner.read().await;
        Ok(collect_address_utxos(&inner, address, |utxo| !utxo.is_live()))
    }

    async fn insert_witness(&self, witness: BlockWitness) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let entries = inner
            .witnesses_by_block
            .entry(witness.block_number.0)
            .or_default();
        if entries.iter().any(|w| w.pubkey == witness.pubkey) {
            return Ok(false);
        }
        entries.push(witness);
        Ok(true)
    }

    async fn witnesses_by_block(
        &self,
        height: BlockNumber,
        filter: WitnessFilter,
    ) -> StoreResult<Vec<BlockWitness>> {
        let inner = self.inner.read().await;
        let limit = filter.limit.unwrap_or(DEFAULT_WITNESS_LIMIT);
        let page = filter.page.unwrap_or(0);
        Ok(inner
            .witnesses_by_block
            .get(&height.0)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|witness| {
                        filter
                            .trusted
                            .map_or(true, |trusted| witness.trusted == trusted)
                    })
                    .skip(page.saturating_mul(limit))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert_mempool_entry(&self, entry: MempoolEntry) -> StoreResult<()> {
        self.inner.write().await.mempool.insert(entry.id, entry);
        Ok(())
    }

    async fn mempool_entry(&self, id: H256) -> StoreResult<Option<MempoolEntry>> {
        Ok(self.inner.read().await.mempool.get(&id).cloned())
    }

    async fn remove_mempool_entry(&self, id: H256) -> StoreResult<Option<MempoolEntry>> {
        Ok(self.inner.write().await.mempool.remove(&id))
    }

    async fn mempool_entries(&self) -> StoreResult<Vec<MempoolEntry>> {
        Ok(self.inner.read().await.mempool.values().cloned().collect())
    }

    async fn mempool_entries_by_addresses(
        &self,
        addresses: &[String],
        limit: usize,
    ) -> StoreResult<Vec<MempoolEntry>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<_> = inner
            .mempool
            .values()
            .filter(|entry| {
                addresses.is_empty()
                    || entry
                        .output_addresses()
                        .any(|address| addresses.iter().any(|a| a == address))
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn remove_mempool_entries_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<H256>> {
        let mut inner = self.inner.write().await;
        let expired: Vec<_> = inner
            .mempool
            .values()
            .filter(|entry| entry.first_seen < cutoff)
            .map(|entry| entry.id)
            .collect();
        for id in &expired {
            inner.mempool.remove(id);
        }
        Ok(expired)
    }

    async fn upsert_epoch(&self, epoch: Epoch) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .epochs
            .insert(epoch.epoch_number.0, epoch);
        Ok(())
    }

    async fn epoch_by_number(&self, number: EpochNumber) -> StoreResult<Option<Epoch>> {
        Ok(self.inner.read().await.epochs.get(&number.0).cloned())
    }

    async fn epoch_by_hash(&self, hash: H256) -> StoreResult<Option<Epoch>> {
        Ok(self
            .inner
            .read()
            .await
            .epochs
            .values()
            .find(|epoch| epoch.epoch_hash() == hash)
            .cloned())
    }

    async fn latest_epoch(&self) -> StoreResult<Option<Epoch>> {
        Ok(self
            .inner
            .read()
            .await
            .epochs
            .last_key_value()
            .map(|(_, epoch)| epoch.clone()))
    }

    async fn insert_epoch_submission(&self, submission: EpochSubmission) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .submissions_by_epoch
            .entry(submission.epoch_number.0)
            .or_default()
            .push(submission);
        Ok(())
    }

    async fn epoch_submissions(&self, number: EpochNumber) -> StoreResult<Vec<EpochSubmission>> {
        Ok(self
            .inner
            .read()
            .await
            .submissions_by_epoch
            .get(&number.0)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_epoch_submissions(
        &self,
        number: EpochNumber,
        submissions: Vec<EpochSubmission>,
    ) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .submissions_by_epoch
            .insert(number.0, submissions);
        Ok(())
    }

    async fn insert_public_key(&self, entry: PublicKeyEntry) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .public_keys
            .insert(entry.legacy_pubkey, entry);
        Ok(())
    }

    async fn public_key_by_legacy(&self, legacy: H256) -> StoreResult<Option<PublicKeyEntry>> {
        Ok(self.inner.read().await.public_keys.get(&legacy).cloned())
    }

    async fn append_reorg(&self, record: ReorgRecord) -> StoreResult<()> {
        self.inner.write().await.reorgs.push(record);
        Ok(())
    }

    async fn reorgs_in_range(
        &self,
        from: Option<BlockNumber>,
        to: Option<BlockNumber>,
    ) -> StoreResult<Vec<ReorgRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .reorgs
            .iter()
            .filter(|record| {
                from.map_or(true, |from| record.to_block >= from)
                    && to.map_or(true, |to| record.from_block <= to)
            })
            .cloned()
            .collect())
    }
}

fn collect_address_utxos(
    inner: &Inner,
    address: &str,
    predicate: impl Fn(&UtxoEntry) -> bool,
) -> Vec<UtxoEntry> {
    let mut utxos: Vec<_> = inner
        .outpoints_by_address
        .get(address)
        .map(|outpoints| {
            outpoints
                .iter()
                .filter_map(|outpoint| inner.utxos.get(outpoint))
                .filter(|utxo| predicate(utxo))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    utxos.sort_by_key(|utxo| (utxo.block_height, utxo.txid, utxo.vout));
    utxos
}

#[cfg(test)]
mod tests {
    use opnet_merkle::MerkleProof;
    use opnet_types::{GenericTransaction, TransactionBase, U256};

    use super::*;

    fn header_at(height: u64, hash_byte: u8) -> BlockHeader {
        BlockHeader {
            height: BlockNumber(height),
            hash: H256::repeat_byte(hash_byte),
            prev_hash: H256::zero(),
            prev_checksum: H256::zero(),
            merkle_root: H256::zero(),
            storage_root: H256::zero(),
            receipt_root: H256::zero(),
            checksum_root: H256::repeat_byte(hash_byte ^ 0xff),
            checksum_proofs: vec![],
            tx_count: 0,
            ema: 0,
            base_gas: U256::zero(),
            bits: 0,
            nonce: 0,
            version: 2,
            size: 0,
            weight: 0,
            stripped_size: 0,
            time: 0,
            median_time: 0,
        }
    }

    fn utxo_at(height: u64, txid_byte: u8, address: &str) -> UtxoEntry {
        UtxoEntry {
            txid: H256::repeat_byte(txid_byte),
            vout: 0,
            value: 5_000,
            script_pubkey: vec![],
            address: Some(address.to_string()),
            block_height: BlockNumber(height),
            deleted_at_block: None,
        }
    }

    fn pointer_row(height: u64, value_byte: u8) -> PointerValueRow {
        PointerValueRow {
            contract: H256::repeat_byte(1),
            pointer: H256::repeat_byte(2),
            value: H256::repeat_byte(value_byte),
            last_seen_at: BlockNumber(height),
            proof: MerkleProof {
                index: 0,
                total: 1,
                siblings: vec![],
            },
        }
    }

    #[tokio::test]
    async fn commit_and_query_round_trip() {
        let store = InMemoryStore::new();
        let txid = H256::repeat_byte(5);
        let tx = OverlayTransaction::Generic(GenericTransaction {
            base: TransactionBase {
                txid,
                indexing_hash: txid,
                block_height: BlockNumber(10),
                inputs: vec![],
                outputs: vec![],
                raw: vec![],
            },
        });

        store
            .commit_block(BlockCommitBatch {
                header: Some(header_at(10, 1)),
                transactions: vec![tx.clone()],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(store.latest_block().await.unwrap().unwrap().height.0, 10);
        assert_eq!(store.transaction_by_id(txid).await.unwrap(), Some(tx));
        assert_eq!(
            store
                .block_by_hash(H256::repeat_byte(1))
                .await
                .unwrap()
                .unwrap()
                .height
                .0,
            10
        );
    }

    #[tokio::test]
    async fn pointer_reads_return_latest_revision_at_or_below_height() {
        let store = InMemoryStore::new();
        for (height, value) in [(10, 0xa), (12, 0xb)] {
            store
                .commit_block(BlockCommitBatch {
                    pointer_writes: vec![pointer_row(height, value)],
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let contract = H256::repeat_byte(1);
        let pointer = H256::repeat_byte(2);
        let at_11 = store
            .pointer_value_at(contract, pointer, BlockNumber(11))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(at_11.value, H256::repeat_byte(0xa));

        let at_12 = store
            .pointer_value_at(contract, pointer, BlockNumber(12))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(at_12.value, H256::repeat_byte(0xb));

        assert!(store
            .pointer_value_at(contract, pointer, BlockNumber(9))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unwind_resurrects_spent_utxos_and_drops_revisions() {
        let store = InMemoryStore::new();

        // Height 10 creates the UTXO and the first pointer revision.
        store
            .commit_block(BlockCommitBatch {
                header: Some(header_at(10, 1)),
                utxo_inserts: vec![utxo_at(10, 7, "addr")],
                pointer_writes: vec![pointer_row(10, 0xa)],
                ..Default::default()
            })
            .await
            .unwrap();
        // Height 11 spends the UTXO and overwrites the pointer.
        store
            .commit_block(BlockCommitBatch {
                header: Some(header_at(11, 2)),
                utxo_spends: vec![(H256::repeat_byte(7), 0)],
                pointer_writes: vec![pointer_row(11, 0xb)],
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(store.live_utxos_by_address("addr").await.unwrap().is_empty());

        store.unwind_block(BlockNumber(11)).await.unwrap();

        let live = store.live_utxos_by_address("addr").await.unwrap();
        assert_eq!(live.len(), 1);
        assert!(live[0].is_live());

        let restored = store
            .pointer_value_at(H256::repeat_byte(1), H256::repeat_byte(2), BlockNumber(11))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restored.value, H256::repeat_byte(0xa));
        assert!(store.block_by_height(BlockNumber(11)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn witness_dedup_is_per_block_and_pubkey() {
        let store = InMemoryStore::new();
        let witness = BlockWitness {
            block_number: BlockNumber(3),
            signature: vec![0; 64],
            pubkey: H256::repeat_byte(9),
            timestamp: Utc::now(),
            proofs: None,
            trusted: true,
        };

        assert!(store.insert_witness(witness.clone()).await.unwrap());
        assert!(!store.insert_witness(witness.clone()).await.unwrap());

        let mut other = witness;
        other.pubkey = H256::repeat_byte(10);
        other.trusted = false;
        assert!(store.insert_witness(other).await.unwrap());

        let trusted_only = store
            .witnesses_by_block(
                BlockNumber(3),
                WitnessFilter {
                    trusted: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(trusted_only.len(), 1);
    }

    #[tokio::test]
    async fn mempool_expiry_sweep_removes_old_entries() {
        let store = InMemoryStore::new();
        let old = MempoolEntry {
            id: H256::repeat_byte(1),
            first_seen: Utc::now() - chrono::Duration::hours(30),
            psbt: false,
            inputs: vec![],
            outputs: vec![],
            raw: vec![],
            priority_fee: 0,
            theoretical_gas_limit: 0,
            kind: opnet_types::TransactionKind::Generic,
            from: None,
            contract_address: None,
            calldata: None,
            bytecode: None,
        };
        let mut fresh = old.clone();
        fresh.id = H256::repeat_byte(2);
        fresh.first_seen = Utc::now();

        store.insert_mempool_entry(old).await.unwrap();
        store.insert_mempool_entry(fresh).await.unwrap();

        let removed = store
            .remove_mempool_entries_before(Utc::now() - chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(removed, vec![H256::repeat_byte(1)]);
        assert_eq!(store.mempool_entries().await.unwrap().len(), 1);
    }
}

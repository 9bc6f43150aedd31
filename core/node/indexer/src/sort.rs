//! Deterministic execution ordering for a block's overlay transactions.
//!
//! Transactions are grouped by intra-block spend dependencies (connected
//! components over `input.prev_txid == other.txid` edges), ordered
//! topologically within each group with ascending `indexing_hash` breaking
//! ties, and groups are ordered by descending total burned fee. The result
//! is a pure function of the input set: any permutation of the input
//! produces the same order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use opnet_basic_types::H256;
use opnet_types::OverlayTransaction;

pub fn sort_transactions(transactions: Vec<OverlayTransaction>) -> Vec<OverlayTransaction> {
    if transactions.len() <= 1 {
        return transactions;
    }

    let txids: HashMap<H256, usize> = transactions
        .iter()
        .enumerate()
        .map(|(index, tx)| (tx.txid(), index))
        .collect();

    // Dependency edges: `dependant` spends an output of `dependency`.
    let mut depends_on: Vec<HashSet<usize>> = vec![HashSet::new(); transactions.len()];
    let mut dependants: Vec<HashSet<usize>> = vec![HashSet::new(); transactions.len()];
    for (index, tx) in transactions.iter().enumerate() {
        for input in &tx.base().inputs {
            if let Some(&dependency) = txids.get(&input.prev_txid) {
                if dependency != index {
                    depends_on[index].insert(dependency);
                    dependants[dependency].insert(index);
                }
            }
        }
    }

    // Connected components via union-find.
    let mut parent: Vec<usize> = (0..transactions.len()).collect();
    fn find(parent: &mut Vec<usize>, node: usize) -> usize {
        if parent[node] != node {
            let root = find(parent, parent[node]);
            parent[node] = root;
        }
        parent[node]
    }
    for (index, deps) in depends_on.iter().enumerate() {
        for &dependency in deps {
            let a = find(&mut parent, index);
            let b = find(&mut parent, dependency);
            if a != b {
                parent[a] = b;
            }
        }
    }

    let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for index in 0..transactions.len() {
        let root = find(&mut parent, index);
        components.entry(root).or_default().push(index);
    }

    // Topological order inside each component; the ready set is keyed by
    // `indexing_hash`, which both breaks ties and makes the walk
    // independent of input order.
    let mut groups: Vec<(u128, Vec<usize>)> = Vec::with_capacity(components.len());
    for members in components.into_values() {
        let mut remaining_deps: HashMap<usize, usize> = members
            .iter()
            .map(|&index| (index, depends_on[index].len()))
            .collect();
        let mut ready: BTreeSet<(H256, usize)> = members
            .iter()
            .filter(|&&index| remaining_deps[&index] == 0)
            .map(|&index| (transactions[index].indexing_hash(), index))
            .collect();

        let mut ordered = Vec::with_capacity(members.len());
        while let Some(&(hash, index)) = ready.iter().next() {
            ready.remove(&(hash, index));
            ordered.push(index);
            for &dependant in &dependants[index] {
                if let Some(count) = remaining_deps.get_mut(&dependant) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert((transactions[dependant].indexing_hash(), dependant));
                    }
                }
            }
        }
        debug_assert_eq!(ordered.len(), members.len(), "dependency cycle in block");

        let total_fee: u128 = ordered
            .iter()
            .map(|&index| u128::from(transactions[index].priority_fee()))
            .sum();
        groups.push((total_fee, ordered));
    }

    // Descending total fee; ties broken by the concatenation of indexing
    // hashes in group order.
    groups.sort_by(|(fee_a, group_a), (fee_b, group_b)| {
        fee_b.cmp(fee_a).then_with(|| {
            let key_a: Vec<u8> = group_a
                .iter()
                .flat_map(|&index| transactions[index].indexing_hash().as_bytes().to_vec())
                .collect();
            let key_b: Vec<u8> = group_b
                .iter()
                .flat_map(|&index| transactions[index].indexing_hash().as_bytes().to_vec())
                .collect();
            key_a.cmp(&key_b)
        })
    });

    let order: Vec<usize> = groups.into_iter().flat_map(|(_, group)| group).collect();
    let mut slots: Vec<Option<OverlayTransaction>> = transactions.into_iter().map(Some).collect();
    order
        .into_iter()
        .map(|index| slots[index].take().expect("each index appears once"))
        .collect()
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

    use opnet_basic_types::BlockNumber;
    use opnet_types::{
        indexing_hash, InteractionFeatures, InteractionTransaction, TransactionBase, TxInput,
    };

    use super::*;

    fn interaction(txid_byte: u8, fee: u64, spends: Option<u8>) -> OverlayTransaction {
        let txid = H256::repeat_byte(txid_byte);
        OverlayTransaction::Interaction(InteractionTransaction {
            base: TransactionBase {
                txid,
                indexing_hash: indexing_hash(txid, 0),
                block_height: BlockNumber(100),
                inputs: spends
                    .map(|prev| {
                        vec![TxInput {
                            prev_txid: H256::repeat_byte(prev),
                            prev_vout: 0,
                            witness: vec![],
                        }]
                    })
                    .unwrap_or_default(),
                outputs: vec![],
                raw: vec![],
            },
            from_pubkey: H256::zero(),
            contract_tweaked_pubkey: H256::repeat_byte(0xcc),
            contract_address: String::new(),
            calldata: vec![0],
            theoretical_gas_limit: 1,
            priority_fee: fee,
            features: InteractionFeatures::default(),
        })
    }

    #[test]
    fn groups_order_by_descending_fee_with_dependencies_first() {
        // t2 spends t1, t4 spends t3; group fees 11 and 105.
        let t1 = interaction(1, 1, None);
        let t2 = interaction(2, 10, Some(1));
        let t3 = interaction(3, 100, None);
        let t4 = interaction(4, 5, Some(3));

        let sorted = sort_transactions(vec![t1.clone(), t2.clone(), t3.clone(), t4.clone()]);
        let txids: Vec<H256> = sorted.iter().map(|tx| tx.txid()).collect();
        assert_eq!(
            txids,
            vec![t3.txid(), t4.txid(), t1.txid(), t2.txid()],
        );
    }

    #[test]
    fn order_is_invariant_under_input_permutation() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut txs: Vec<OverlayTransaction> = vec![
            interaction(1, 4, None),
            interaction(2, 9, Some(1)),
            interaction(3, 9, None),
            interaction(4, 4, Some(3)),
            interaction(5, 13, None),
            interaction(6, 0, Some(5)),
            interaction(7, 2, None),
        ];

        let reference: Vec<H256> = sort_transactions(txs.clone())
            .iter()
            .map(|tx| tx.txid())
            .collect();

        for _ in 0..20 {
            txs.shuffle(&mut rng);
            let shuffled: Vec<H256> = sort_transactions(txs.clone())
                .iter()
                .map(|tx| tx.txid())
                .collect();
            assert_eq!(shuffled, reference);
        }
    }

    #[test]
    fn dependency_chains_execute_in_spend_order() {
        // c spends b spends a, all in one group.
        let a = interaction(1, 0, None);
        let b = interaction(2, 0, Some(1));
        let c = interaction(3, 50, Some(2));

        let sorted = sort_transactions(vec![c.clone(), a.clone(), b.clone()]);
        let txids: Vec<H256> = sorted.iter().map(|tx| tx.txid()).collect();
        assert_eq!(txids, vec![a.txid(), b.txid(), c.txid()]);
    }

    #[test]
    fn independent_ties_break_on_indexing_hash() {
        let a = interaction(1, 7, None);
        let b = interaction(2, 7, None);
        let mut expected = vec![(a.indexing_hash(), a.txid()), (b.indexing_hash(), b.txid())];
        expected.sort();

        let sorted = sort_transactions(vec![a, b]);
        let txids: Vec<H256> = sorted.iter().map(|tx| tx.txid()).collect();
        assert_eq!(txids, expected.into_iter().map(|(_, txid)| txid).collect::<Vec<_>>());
    }
}

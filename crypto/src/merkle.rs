//! Merkle root/branch computation over Bitcoin's left-fold, odd-duplicating tree.

use crate::dsha256;

/// Folds a leaf hash up through a precomputed sibling path:
/// `acc = dsha256(acc || sibling)` for each sibling, left to right.
pub fn merkle_root(leaf: [u8; 32], branch: &[[u8; 32]]) -> [u8; 32] {
    let mut acc = leaf;
    for sibling in branch {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&acc);
        buf[32..].copy_from_slice(sibling);
        acc = dsha256(&buf);
    }
    acc
}

/// Computes the sibling path from the slot-0 leaf (the coinbase) up to the
/// Merkle root, given the TXIDs of every *other* transaction in block order.
///
/// The coinbase's own hash never appears in the returned path: at every
/// level, the sibling needed to continue slot 0's lineage comes from a
/// subtree that never contains slot 0, so the branch is independent of
/// whatever coinbase variant (extranonce1/extranonce2 choice) is later
/// substituted in. A placeholder is used in the coinbase's own slot and its
/// value never leaks into the returned siblings.
pub fn merkle_branch_from_txids(other_txids: &[[u8; 32]]) -> Vec<[u8; 32]> {
    let mut level: Vec<[u8; 32]> = Vec::with_capacity(other_txids.len() + 1);
    level.push([0u8; 32]); // coinbase placeholder, always slot 0
    level.extend_from_slice(other_txids);

    let mut branch = Vec::new();
    let mut index = 0usize;
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().unwrap();
            level.push(last);
        }
        branch.push(level[index ^ 1]);

        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&pair[0]);
            buf[32..].copy_from_slice(&pair[1]);
            next.push(dsha256(&buf));
        }
        level = next;
        index /= 2;
    }
    branch
}

/// Recomputes the full tree's root from scratch given the real coinbase hash
/// and the rest of the block's TXIDs, for cross-checking the incremental
/// `merkle_root`/`merkle_branch_from_txids` pair in tests.
#[cfg(test)]
fn merkle_root_from_scratch(coinbase_hash: [u8; 32], other_txids: &[[u8; 32]]) -> [u8; 32] {
    let mut level: Vec<[u8; 32]> = Vec::with_capacity(other_txids.len() + 1);
    level.push(coinbase_hash);
    level.extend_from_slice(other_txids);

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().unwrap();
            level.push(last);
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&pair[0]);
            buf[32..].copy_from_slice(&pair[1]);
            next.push(dsha256(&buf));
        }
        level = next;
    }
    level.into_iter().next().unwrap_or(coinbase_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> [u8; 32] {
        let mut h = [0u8; 32];
        h[0] = n;
        h
    }

    #[test]
    fn empty_branch_for_coinbase_only_block() {
        let branch = merkle_branch_from_txids(&[]);
        assert!(branch.is_empty());
        let root = merkle_root(leaf(1), &branch);
        assert_eq!(root, leaf(1));
    }

    #[test]
    fn branch_matches_from_scratch_computation_for_odd_and_even_sizes() {
        for count in 1..=7u8 {
            let others: Vec<[u8; 32]> = (1..=count).map(leaf).collect();
            let coinbase = leaf(0xff);
            let branch = merkle_branch_from_txids(&others);
            let incremental = merkle_root(coinbase, &branch);
            let from_scratch = merkle_root_from_scratch(coinbase, &others);
            assert_eq!(incremental, from_scratch, "count={count}");
        }
    }

    #[test]
    fn branch_is_independent_of_which_coinbase_variant_is_used() {
        let others: Vec<[u8; 32]> = (1..=5u8).map(leaf).collect();
        let branch = merkle_branch_from_txids(&others);
        let root_a = merkle_root(leaf(0xaa), &branch);
        let root_b = merkle_root(leaf(0xbb), &branch);
        assert_ne!(root_a, root_b);
        assert_eq!(root_a, merkle_root_from_scratch(leaf(0xaa), &others));
        assert_eq!(root_b, merkle_root_from_scratch(leaf(0xbb), &others));
    }
}

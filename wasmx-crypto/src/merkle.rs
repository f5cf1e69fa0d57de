use wasmx_types::primitives::Hash;

use crate::hash::{sha256, sha256_multi};

/// Domain prefix for leaf nodes.
const LEAF_PREFIX: u8 = 0x00;

/// Domain prefix for inner nodes.
const INNER_PREFIX: u8 = 0x01;

/// Root of a binary Merkle tree over `slices` (RFC 6962 layout).
///
/// The left subtree always holds the largest power of two strictly smaller
/// than the item count. An empty list hashes to SHA-256 of the empty string.
pub fn merkle_hash(slices: &[Vec<u8>]) -> Hash {
    match slices.len() {
        0 => sha256(&[]),
        1 => hash_leaf(&slices[0]),
        n => {
            let k = split_point(n);
            let left = merkle_hash(&slices[..k]);
            let right = merkle_hash(&slices[k..]);
            hash_internal(&left, &right)
        }
    }
}

// ─── Hash helpers ────────────────────────────────────────────────────────────

pub fn hash_leaf(leaf: &[u8]) -> Hash {
    sha256_multi(&[&[LEAF_PREFIX], leaf])
}

pub fn hash_internal(left: &Hash, right: &Hash) -> Hash {
    sha256_multi(&[&[INNER_PREFIX], left, right])
}

/// Largest power of two strictly less than `n` (`n >= 2`).
fn split_point(n: usize) -> usize {
    let mut k = 1;
    while k * 2 < n {
        k *= 2;
    }
    k
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_tree() {
        assert_eq!(merkle_hash(&[]), sha256(b""));
    }

    #[test]
    fn test_single_leaf() {
        let leaf = b"tx1".to_vec();
        let mut prefixed = vec![0u8];
        prefixed.extend_from_slice(&leaf);
        assert_eq!(merkle_hash(&[leaf]), sha256(&prefixed));
    }

    #[test]
    fn test_split_points() {
        assert_eq!(split_point(2), 1);
        assert_eq!(split_point(3), 2);
        assert_eq!(split_point(4), 2);
        assert_eq!(split_point(5), 4);
        assert_eq!(split_point(9), 8);
    }

    #[test]
    fn test_three_leaves_layout() {
        let items = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        let left = hash_internal(&hash_leaf(b"a"), &hash_leaf(b"b"));
        let expected = hash_internal(&left, &hash_leaf(b"c"));
        assert_eq!(merkle_hash(&items), expected);
    }

    #[test]
    fn test_order_matters() {
        let a = vec![b"a".to_vec(), b"b".to_vec()];
        let b = vec![b"b".to_vec(), b"a".to_vec()];
        assert_ne!(merkle_hash(&a), merkle_hash(&b));
    }

    proptest! {
        #[test]
        fn prop_split_point_is_largest_smaller_power(n in 2usize..10_000) {
            let k = split_point(n);
            prop_assert!(k.is_power_of_two());
            prop_assert!(k < n && k * 2 >= n);
        }

        #[test]
        fn prop_changing_a_leaf_changes_the_root(
            leaves in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..8), 1..16),
            index in any::<prop::sample::Index>(),
        ) {
            let i = index.index(leaves.len());
            let mut changed = leaves.clone();
            changed[i].push(0xff);
            prop_assert_ne!(merkle_hash(&leaves), merkle_hash(&changed));
        }
    }
}

use attest_types::Digest;
use serde::{Deserialize, Serialize};

use crate::hasher::{ContentHasher, HashAlgorithm};

/// Side of a sibling in a Merkle proof path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// Binary Merkle tree over an ordered list of leaf digests.
///
/// Leaves are buffered with [`add_leaf`](Self::add_leaf) and the internal
/// layers are produced by an explicit [`build`](Self::build). Internal nodes
/// are `digest(left ‖ right)`; a layer with an odd node count pairs its last
/// node with itself.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    hasher: ContentHasher,
    leaves: Vec<Digest>,
    /// Level 0 = leaves, last level = root. `None` until built.
    levels: Option<Vec<Vec<Digest>>>,
}

impl MerkleTree {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            hasher: ContentHasher::new(algorithm),
            leaves: Vec::new(),
            levels: None,
        }
    }

    /// Build a tree from leaves in one step.
    pub fn from_leaves(algorithm: HashAlgorithm, leaves: Vec<Digest>) -> Self {
        let mut tree = Self::new(algorithm);
        tree.leaves = leaves;
        tree.build();
        tree
    }

    /// Append a leaf. Invalidates any previously built layers.
    pub fn add_leaf(&mut self, leaf: Digest) {
        self.leaves.push(leaf);
        self.levels = None;
    }

    /// Append many leaves. Invalidates any previously built layers.
    pub fn extend<I: IntoIterator<Item = Digest>>(&mut self, leaves: I) {
        self.leaves.extend(leaves);
        self.levels = None;
    }

    /// Compute the internal layers. A no-op if already built.
    pub fn build(&mut self) {
        if self.levels.is_some() {
            return;
        }
        if self.leaves.is_empty() {
            self.levels = Some(vec![vec![self.hasher.genesis()]]);
            return;
        }

        let mut levels: Vec<Vec<Digest>> = vec![self.leaves.clone()];
        let mut current = self.leaves.clone();

        while current.len() > 1 {
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                let right = pair.get(1).unwrap_or(&pair[0]);
                next.push(self.hasher.digest_pair(&pair[0], right));
            }
            levels.push(next.clone());
            current = next;
        }

        self.levels = Some(levels);
    }

    pub fn is_built(&self) -> bool {
        self.levels.is_some()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn leaves(&self) -> &[Digest] {
        &self.leaves
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.hasher.algorithm()
    }

    /// The root digest. The empty tree's root is the all-zero digest.
    pub fn get_root(&self) -> Result<Digest, MerkleError> {
        self.levels
            .as_ref()
            .and_then(|levels| levels.last())
            .and_then(|top| top.first())
            .cloned()
            .ok_or(MerkleError::NotBuilt)
    }

    /// Inclusion proof for the leaf at `index`, ordered leaf to root.
    pub fn get_proof(&self, index: usize) -> Result<MerkleProof, MerkleError> {
        let levels = self.levels.as_ref().ok_or(MerkleError::NotBuilt)?;
        if index >= self.leaves.len() {
            return Err(MerkleError::IndexOutOfRange {
                index,
                leaf_count: self.leaves.len(),
            });
        }

        let mut path = Vec::new();
        let mut idx = index;

        for level in &levels[..levels.len() - 1] {
            let (sibling_idx, side) = if idx % 2 == 0 {
                (idx + 1, Side::Right)
            } else {
                (idx - 1, Side::Left)
            };
            // Odd level: the last node is its own sibling.
            let sibling = level.get(sibling_idx).unwrap_or(&level[idx]).clone();
            path.push((sibling, side));
            idx /= 2;
        }

        Ok(MerkleProof {
            leaf_index: index,
            path,
        })
    }

    /// Check `proof` for `leaf` against `root` with this tree's algorithm.
    pub fn verify_proof(&self, proof: &MerkleProof, leaf: &Digest, root: &Digest) -> bool {
        verify_proof(self.hasher.algorithm(), proof, leaf, root)
    }
}

/// Merkle inclusion proof: `(sibling, side)` pairs from leaf to root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub path: Vec<(Digest, Side)>,
}

impl MerkleProof {
    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
}

/// Recompute the root from `leaf` and `proof` and compare it to `root`.
///
/// A well-formed but wrong proof returns `false`; this never panics.
pub fn verify_proof(
    algorithm: HashAlgorithm,
    proof: &MerkleProof,
    leaf: &Digest,
    root: &Digest,
) -> bool {
    let hasher = ContentHasher::new(algorithm);
    let mut current = leaf.clone();
    for (sibling, side) in &proof.path {
        current = match side {
            Side::Left => hasher.digest_pair(sibling, &current),
            Side::Right => hasher.digest_pair(&current, sibling),
        };
    }
    current == *root
}

/// Errors from Merkle tree operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("merkle tree has not been built")]
    NotBuilt,

    #[error("leaf index {index} out of range for {leaf_count} leaves")]
    IndexOutOfRange { index: usize, leaf_count: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALG: HashAlgorithm = HashAlgorithm::Sha256;

    fn leaf(seed: u8) -> Digest {
        ContentHasher::new(ALG).digest(&[seed])
    }

    #[test]
    fn root_requires_build() {
        let mut tree = MerkleTree::new(ALG);
        tree.add_leaf(leaf(1));
        assert_eq!(tree.get_root(), Err(MerkleError::NotBuilt));
        assert_eq!(tree.get_proof(0), Err(MerkleError::NotBuilt));
        tree.build();
        assert!(tree.get_root().is_ok());
    }

    #[test]
    fn add_after_build_invalidates() {
        let mut tree = MerkleTree::new(ALG);
        tree.add_leaf(leaf(1));
        tree.build();
        let first = tree.get_root().unwrap();
        tree.add_leaf(leaf(2));
        assert!(!tree.is_built());
        assert_eq!(tree.get_root(), Err(MerkleError::NotBuilt));
        tree.build();
        assert_ne!(tree.get_root().unwrap(), first);
    }

    #[test]
    fn build_is_idempotent() {
        let mut tree = MerkleTree::new(ALG);
        tree.extend((0..5).map(leaf));
        tree.build();
        let root = tree.get_root().unwrap();
        tree.build();
        assert_eq!(tree.get_root().unwrap(), root);
    }

    #[test]
    fn empty_tree_has_zero_root() {
        let tree = MerkleTree::from_leaves(HashAlgorithm::Sha512, vec![]);
        let root = tree.get_root().unwrap();
        assert!(root.is_zero());
        assert_eq!(root.len(), 64);
        assert!(matches!(
            tree.get_proof(0),
            Err(MerkleError::IndexOutOfRange { index: 0, leaf_count: 0 })
        ));
    }

    #[test]
    fn single_leaf_is_root() {
        let tree = MerkleTree::from_leaves(ALG, vec![leaf(1)]);
        assert_eq!(tree.get_root().unwrap(), leaf(1));
        let proof = tree.get_proof(0).unwrap();
        assert!(proof.is_empty());
        assert!(tree.verify_proof(&proof, &leaf(1), &leaf(1)));
    }

    #[test]
    fn odd_count_duplicates_last() {
        let hasher = ContentHasher::new(ALG);
        let tree = MerkleTree::from_leaves(ALG, vec![leaf(1), leaf(2), leaf(3)]);
        let left = hasher.digest_pair(&leaf(1), &leaf(2));
        let right = hasher.digest_pair(&leaf(3), &leaf(3));
        assert_eq!(tree.get_root().unwrap(), hasher.digest_pair(&left, &right));
    }

    #[test]
    fn proof_out_of_range() {
        let tree = MerkleTree::from_leaves(ALG, vec![leaf(1), leaf(2)]);
        assert_eq!(
            tree.get_proof(5),
            Err(MerkleError::IndexOutOfRange {
                index: 5,
                leaf_count: 2
            })
        );
    }

    #[test]
    fn power_of_two_proof_depth() {
        let tree = MerkleTree::from_leaves(ALG, (0..8).map(leaf).collect());
        let root = tree.get_root().unwrap();
        for i in 0..8 {
            let proof = tree.get_proof(i).unwrap();
            assert_eq!(proof.len(), 3);
            assert!(tree.verify_proof(&proof, &leaf(i as u8), &root));
        }
    }

    #[test]
    fn wrong_root_or_width_fails() {
        let tree = MerkleTree::from_leaves(ALG, (0..4).map(leaf).collect());
        let proof = tree.get_proof(1).unwrap();
        assert!(!tree.verify_proof(&proof, &leaf(1), &leaf(9)));
        assert!(!tree.verify_proof(&proof, &leaf(1), &Digest::zero(64)));
    }

    #[test]
    fn proof_serde_roundtrip() {
        let tree = MerkleTree::from_leaves(ALG, (0..4).map(leaf).collect());
        let proof = tree.get_proof(2).unwrap();
        let json = serde_json::to_string(&proof).unwrap();
        let parsed: MerkleProof = serde_json::from_str(&json).unwrap();
        assert_eq!(proof, parsed);
        assert!(tree.verify_proof(&parsed, &leaf(2), &tree.get_root().unwrap()));
    }

    proptest! {
        #[test]
        fn every_leaf_proves_inclusion(count in 0usize..64) {
            let leaves: Vec<Digest> = (0..count).map(|i| ContentHasher::new(ALG).digest(&i.to_be_bytes())).collect();
            let tree = MerkleTree::from_leaves(ALG, leaves.clone());
            let root = tree.get_root().unwrap();
            for (i, l) in leaves.iter().enumerate() {
                let proof = tree.get_proof(i).unwrap();
                prop_assert!(tree.verify_proof(&proof, l, &root));
            }
        }

        #[test]
        fn corrupted_leaf_fails_against_original_root(count in 1usize..64, pick in any::<prop::sample::Index>()) {
            let leaves: Vec<Digest> = (0..count).map(|i| ContentHasher::new(ALG).digest(&i.to_be_bytes())).collect();
            let tree = MerkleTree::from_leaves(ALG, leaves.clone());
            let root = tree.get_root().unwrap();
            let i = pick.index(count);
            let proof = tree.get_proof(i).unwrap();
            let mut corrupted = leaves[i].clone().into_bytes();
            corrupted[0] ^= 0xff;
            prop_assert!(!tree.verify_proof(&proof, &Digest::from_bytes(corrupted), &root));
        }
    }
}

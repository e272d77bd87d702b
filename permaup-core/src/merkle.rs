//! Data root over the chunk hashes of one upload.

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Hash one chunk's bytes as a Merkle leaf.
pub fn leaf(chunk: &[u8]) -> blake3::Hash {
    let mut h = blake3::Hasher::new();
    h.update(&[LEAF_PREFIX]);
    h.update(&(chunk.len() as u64).to_le_bytes());
    h.update(chunk);
    h.finalize()
}

/// Binary Merkle root over leaf hashes in chunk order.
/// Duplicates the last node when a layer is odd.
pub fn root(leaves: &[blake3::Hash]) -> blake3::Hash {
    if leaves.is_empty() {
        return leaf(&[]);
    }
    let mut layer: Vec<blake3::Hash> = leaves.to_vec();
    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| {
                let a = pair[0];
                let b = pair.get(1).copied().unwrap_or(a);
                let mut h = blake3::Hasher::new();
                h.update(&[NODE_PREFIX]);
                h.update(a.as_bytes());
                h.update(b.as_bytes());
                h.finalize()
            })
            .collect();
    }
    layer[0]
}

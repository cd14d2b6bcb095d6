//! Candidate block header assembly and final block serialization.

use stratumd_crypto::compact_size_encode;

/// The fields of an 80-byte Bitcoin block header that a Stratum share fully
/// determines, once the Merkle root has been recomputed for that share.
#[derive(Debug, Clone, Copy)]
pub struct HeaderFields {
    pub version: i32,
    /// Internal (little-endian) byte order, as stored on disk.
    pub previous_hash: [u8; 32],
    pub merkle_root: [u8; 32],
    pub ntime: u32,
    pub bits: u32,
    pub nonce: u32,
}

/// Serializes the 80-byte header in consensus (little-endian field) order.
pub fn serialize_header(fields: &HeaderFields) -> [u8; 80] {
    let mut out = [0u8; 80];
    out[0..4].copy_from_slice(&fields.version.to_le_bytes());
    out[4..36].copy_from_slice(&fields.previous_hash);
    out[36..68].copy_from_slice(&fields.merkle_root);
    out[68..72].copy_from_slice(&fields.ntime.to_le_bytes());
    out[72..76].copy_from_slice(&fields.bits.to_le_bytes());
    out[76..80].copy_from_slice(&fields.nonce.to_le_bytes());
    out
}

/// Assembles a complete block for `submitblock`: header, transaction count,
/// the (possibly witness-serialized) coinbase, then every other
/// transaction's raw bytes verbatim from the template, in template order.
pub fn assemble_block(header: &[u8; 80], coinbase: &[u8], other_tx_data: &[Vec<u8>]) -> Vec<u8> {
    let tx_count = 1 + other_tx_data.len() as u64;
    let mut out = Vec::with_capacity(80 + 9 + coinbase.len() + other_tx_data.iter().map(Vec::len).sum::<usize>());
    out.extend_from_slice(header);
    out.extend(compact_size_encode(tx_count));
    out.extend_from_slice(coinbase);
    for tx in other_tx_data {
        out.extend_from_slice(tx);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_serializes_fields_in_consensus_order() {
        let fields = HeaderFields {
            version: 0x2000_0000,
            previous_hash: [0x11; 32],
            merkle_root: [0x22; 32],
            ntime: 0x6000_0000,
            bits: 0x1d00_ffff,
            nonce: 0xdead_beef,
        };
        let header = serialize_header(&fields);
        assert_eq!(&header[0..4], &0x2000_0000i32.to_le_bytes());
        assert_eq!(&header[4..36], &[0x11u8; 32]);
        assert_eq!(&header[36..68], &[0x22u8; 32]);
        assert_eq!(&header[76..80], &0xdead_beefu32.to_le_bytes());
    }

    #[test]
    fn assembled_block_counts_the_coinbase_plus_every_other_transaction() {
        let header = [0u8; 80];
        let coinbase = vec![1, 2, 3];
        let others = vec![vec![4, 5], vec![6, 7, 8]];
        let block = assemble_block(&header, &coinbase, &others);
        assert_eq!(block[80], 3); // CompactSize: 1 coinbase + 2 others
        assert!(block.ends_with(&[6, 7, 8]));
    }
}

//! Coinbase transaction synthesis.
//!
//! The coinbase is the one part of a candidate block the proxy itself
//! authors; everything else comes verbatim from the node's template. This
//! module builds the non-witness serialization of that transaction with the
//! 8-byte extranonce region zeroed, split into the `prefix`/`suffix` halves a
//! `Job` hands to every miner: `prefix ++ extranonce1 ++ extranonce2 ++
//! suffix` is then a complete, valid transaction for any nonce choice.

use stratumd_crypto::dsha256;

/// Maximum total scriptSig length, per consensus (`MAX_SCRIPT_SIZE` for the
/// coinbase is looser, but 100 bytes is the conventional pool/proxy cap that
/// leaves height + extranonce + tag comfortably inside it).
const MAX_SCRIPT_SIG_LEN: usize = 100;

const EXTRANONCE_LEN: usize = 8;

/// Everything needed to synthesize one template's coinbase transaction.
#[derive(Debug, Clone)]
pub struct CoinbaseSpec {
    pub height: u64,
    pub coinbase_value: u64,
    pub payout_script: Vec<u8>,
    pub tag: Vec<u8>,
    /// `default_witness_commitment` scriptPubKey bytes, verbatim from the
    /// template, if segwit rules produced one.
    pub witness_commitment: Option<Vec<u8>>,
}

/// The two halves of the coinbase's non-witness serialization, split at the
/// point where `extranonce1 || extranonce2` belongs.
#[derive(Debug, Clone)]
pub struct CoinbaseParts {
    pub prefix: Vec<u8>,
    pub suffix: Vec<u8>,
}

/// Minimal CScriptNum push encoding of a non-negative height, per BIP34:
/// little-endian bytes with an extra zero byte appended if the high bit of
/// the last byte would otherwise be read as a sign bit.
fn bip34_scriptnum(mut n: u64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }
    let mut bytes = Vec::new();
    while n > 0 {
        bytes.push((n & 0xff) as u8);
        n >>= 8;
    }
    if bytes.last().copied().unwrap_or(0) & 0x80 != 0 {
        bytes.push(0);
    }
    bytes
}

/// A script `push` of `data`, using the single-byte-length form (valid for
/// anything up to 75 bytes, which every caller in this module respects).
fn push_bytes(out: &mut Vec<u8>, data: &[u8]) {
    debug_assert!(data.len() <= 75);
    out.push(data.len() as u8);
    out.extend_from_slice(data);
}

/// Builds the coinbase scriptSig (height push, zeroed extranonce push, and
/// the coinbase tag), truncating the tag as needed to respect
/// [`MAX_SCRIPT_SIG_LEN`]. Returns the full scriptSig plus the byte offset
/// within it where the 8 zeroed extranonce bytes begin.
fn build_script_sig(height: u64, tag: &[u8]) -> (Vec<u8>, usize) {
    let height_push = bip34_scriptnum(height);
    assert!(height_push.len() <= 75, "block height exceeds minimal-push bounds");

    let mut script_sig = Vec::with_capacity(1 + height_push.len() + 1 + EXTRANONCE_LEN + 1 + tag.len());
    push_bytes(&mut script_sig, &height_push);

    let extranonce_offset = script_sig.len() + 1; // +1 for the upcoming length byte
    push_bytes(&mut script_sig, &[0u8; EXTRANONCE_LEN]);

    let overhead = script_sig.len() + 1; // 1 more length byte for the tag push
    let tag_budget = MAX_SCRIPT_SIG_LEN.saturating_sub(overhead).min(75);
    let tag = &tag[..tag.len().min(tag_budget)];
    if !tag.is_empty() {
        push_bytes(&mut script_sig, tag);
    }

    (script_sig, extranonce_offset)
}

/// Synthesizes the coinbase's non-witness serialization (minus the 8
/// extranonce bytes) and splits it at that gap.
pub fn build_coinbase(spec: &CoinbaseSpec) -> CoinbaseParts {
    let (script_sig, extranonce_offset) = build_script_sig(spec.height, &spec.tag);

    let mut prefix = Vec::new();
    prefix.extend_from_slice(&1i32.to_le_bytes()); // version
    prefix.push(0x01); // one input
    prefix.extend_from_slice(&[0u8; 32]); // prev txid: null
    prefix.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // prev vout
    prefix.extend(stratumd_crypto::compact_size_encode(script_sig.len() as u64));
    prefix.extend_from_slice(&script_sig[..extranonce_offset]);

    let mut suffix = Vec::new();
    suffix.extend_from_slice(&script_sig[extranonce_offset + EXTRANONCE_LEN..]);
    suffix.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // sequence

    let output_count = if spec.witness_commitment.is_some() { 2 } else { 1 };
    suffix.extend(stratumd_crypto::compact_size_encode(output_count));

    suffix.extend_from_slice(&spec.coinbase_value.to_le_bytes());
    suffix.extend(stratumd_crypto::compact_size_encode(spec.payout_script.len() as u64));
    suffix.extend_from_slice(&spec.payout_script);

    if let Some(commitment) = &spec.witness_commitment {
        suffix.extend_from_slice(&0u64.to_le_bytes());
        suffix.extend(stratumd_crypto::compact_size_encode(commitment.len() as u64));
        suffix.extend_from_slice(commitment);
    }

    suffix.extend_from_slice(&0u32.to_le_bytes()); // locktime

    CoinbaseParts { prefix, suffix }
}

/// Concatenates `prefix || extranonce1 || extranonce2 || suffix` into the
/// realized non-witness coinbase serialization for one miner's share.
pub fn realize_coinbase(parts: &CoinbaseParts, extranonce1: &[u8], extranonce2: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.prefix.len() + extranonce1.len() + extranonce2.len() + parts.suffix.len());
    out.extend_from_slice(&parts.prefix);
    out.extend_from_slice(extranonce1);
    out.extend_from_slice(extranonce2);
    out.extend_from_slice(&parts.suffix);
    out
}

/// The TXID (double-SHA256 of the non-witness serialization) of a realized
/// coinbase, used as the slot-0 leaf for Merkle root computation.
pub fn coinbase_txid(realized: &[u8]) -> [u8; 32] {
    dsha256(realized)
}

/// Converts a realized non-witness coinbase into its segwit serialization
/// for block submission: marker/flag after the version, a single witness
/// stack item (the 32-byte zero witness reserved value) on input 0 before
/// the locktime. Only meaningful when the template carried a witness
/// commitment; callers must not call this otherwise.
pub fn add_witness_for_submission(non_witness: &[u8]) -> Vec<u8> {
    assert!(non_witness.len() >= 8, "non-witness coinbase too short");
    let (version, rest) = non_witness.split_at(4);
    let (body, locktime) = rest.split_at(rest.len() - 4);

    let mut out = Vec::with_capacity(non_witness.len() + 2 + 1 + 1 + 32);
    out.extend_from_slice(version);
    out.push(0x00); // segwit marker
    out.push(0x01); // segwit flag
    out.extend_from_slice(body);
    out.push(0x01); // one witness stack item for input 0
    out.push(32); // item length
    out.extend_from_slice(&[0u8; 32]); // witness reserved value
    out.extend_from_slice(locktime);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(tag: &[u8], witness: bool) -> CoinbaseSpec {
        CoinbaseSpec {
            height: 850_000,
            coinbase_value: 625_000_000,
            payout_script: vec![0x76, 0xA9, 0x14, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 0x88, 0xAC],
            tag: tag.to_vec(),
            witness_commitment: if witness { Some(vec![0x6a, 0x24, 0xaa, 0x21, 0xa9, 0xed]) } else { None },
        }
    }

    #[test]
    fn realized_coinbase_is_well_formed_for_any_extranonce() {
        let parts = build_coinbase(&spec(b"stratumd/0.1", false));
        for en1 in [[0u8; 4], [0xff; 4], [1, 2, 3, 4]] {
            for en2 in [[0u8; 4], [9, 8, 7, 6]] {
                let realized = realize_coinbase(&parts, &en1, &en2);
                // version(4) + 1 input-count + 32 prev-txid + 4 prev-vout must be present
                assert_eq!(&realized[0..4], &1i32.to_le_bytes());
                assert_eq!(realized[4], 0x01);
                assert_eq!(&realized[5..37], &[0u8; 32]);
                assert_eq!(&realized[37..41], &0xffff_ffffu32.to_le_bytes());
                // locktime is always the final 4 bytes and always zero
                assert_eq!(&realized[realized.len() - 4..], &0u32.to_le_bytes());
            }
        }
    }

    #[test]
    fn script_sig_stays_within_consensus_budget_even_with_a_long_tag() {
        let long_tag = vec![b'x'; 200];
        let parts = build_coinbase(&spec(&long_tag, false));
        let realized = realize_coinbase(&parts, &[0; 4], &[0; 4]);
        // scriptSig length byte sits right after the 41-byte input header.
        let script_sig_len = realized[41] as usize;
        assert!(script_sig_len <= MAX_SCRIPT_SIG_LEN);
    }

    #[test]
    fn witness_commitment_adds_a_second_zero_value_output() {
        let parts = build_coinbase(&spec(b"tag", true));
        let realized = realize_coinbase(&parts, &[0; 4], &[0; 4]);
        let with_witness = add_witness_for_submission(&realized);
        assert_eq!(with_witness[4], 0x00);
        assert_eq!(with_witness[5], 0x01);
        assert_eq!(&with_witness[with_witness.len() - 4..], &0u32.to_le_bytes());
    }

    #[test]
    fn different_extranonces_yield_different_txids() {
        let parts = build_coinbase(&spec(b"tag", false));
        let a = coinbase_txid(&realize_coinbase(&parts, &[0; 4], &[0; 4]));
        let b = coinbase_txid(&realize_coinbase(&parts, &[0; 4], &[1; 4]));
        assert_ne!(a, b);
    }
}

//! Parsed, validated form of one `getblocktemplate` response.

use std::collections::HashSet;

use stratumd_crypto::target::target_from_bits;
use stratumd_rpc::GetBlockTemplateResult;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },
}

fn reverse(mut bytes: [u8; 32]) -> [u8; 32] {
    bytes.reverse();
    bytes
}

fn parse_hash_hex(field: &'static str, hex_str: &str) -> Result<[u8; 32], TemplateError> {
    let bytes = hex::decode(hex_str).map_err(|e| TemplateError::Malformed {
        field,
        reason: e.to_string(),
    })?;
    let array: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| TemplateError::Malformed {
        field,
        reason: format!("expected 32 bytes, got {}", v.len()),
    })?;
    // The node displays hashes reversed (big-endian); store internal (LE) form.
    Ok(reverse(array))
}

/// One transaction in a template, with its TXID already decoded to internal
/// byte order and its raw serialization ready to be concatenated verbatim
/// into a submitted block.
#[derive(Debug, Clone)]
pub struct TemplateTx {
    pub txid: [u8; 32],
    pub data: Vec<u8>,
}

/// An immutable snapshot of one `getblocktemplate` response.
#[derive(Debug, Clone)]
pub struct Template {
    pub height: u64,
    pub previous_hash: [u8; 32],
    pub version: i32,
    pub bits: u32,
    pub network_target: primitive_types::U256,
    pub curtime: u32,
    pub min_time: u32,
    pub coinbase_value: u64,
    pub transactions: Vec<TemplateTx>,
    pub default_witness_commitment: Option<Vec<u8>>,
}

impl Template {
    pub fn from_rpc(raw: GetBlockTemplateResult) -> Result<Self, TemplateError> {
        let previous_hash = parse_hash_hex("previousblockhash", &raw.previousblockhash)?;
        let bits = u32::from_str_radix(&raw.bits, 16).map_err(|e| TemplateError::Malformed {
            field: "bits",
            reason: e.to_string(),
        })?;
        let default_witness_commitment = raw
            .default_witness_commitment
            .as_deref()
            .map(hex::decode)
            .transpose()
            .map_err(|e| TemplateError::Malformed {
                field: "default_witness_commitment",
                reason: e.to_string(),
            })?;

        let mut transactions = Vec::with_capacity(raw.transactions.len());
        for tx in &raw.transactions {
            let txid = parse_hash_hex("transactions[].txid", tx.txid_hex())?;
            let data = hex::decode(&tx.data).map_err(|e| TemplateError::Malformed {
                field: "transactions[].data",
                reason: e.to_string(),
            })?;
            transactions.push(TemplateTx { txid, data });
        }

        Ok(Template {
            height: raw.height,
            previous_hash,
            version: raw.version,
            bits,
            network_target: target_from_bits(bits),
            curtime: raw.curtime,
            min_time: raw.mintime,
            coinbase_value: raw.coinbasevalue,
            transactions,
            default_witness_commitment,
        })
    }

    /// The set of this template's transaction TXIDs, used to detect whether
    /// the mempool selection changed between polls.
    pub fn tx_id_set(&self) -> HashSet<[u8; 32]> {
        self.transactions.iter().map(|tx| tx.txid).collect()
    }

    /// Whether `self` and `other` would produce an identical Job (modulo
    /// `job_id`): same tip and same transaction set.
    pub fn is_equivalent_to(&self, other: &Template) -> bool {
        self.previous_hash == other.previous_hash && self.tx_id_set() == other.tx_id_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratumd_rpc::TemplateTransaction;

    fn raw_template() -> GetBlockTemplateResult {
        GetBlockTemplateResult {
            height: 100,
            previousblockhash: "00".repeat(32),
            version: 0x2000_0000,
            bits: "1d00ffff".to_string(),
            curtime: 1_700_000_000,
            mintime: 1_699_999_000,
            coinbasevalue: 5_000_000_000,
            transactions: vec![TemplateTransaction {
                txid: Some("11".repeat(32)),
                hash: "11".repeat(32),
                data: "deadbeef".to_string(),
            }],
            default_witness_commitment: None,
        }
    }

    #[test]
    fn parses_a_well_formed_template() {
        let template = Template::from_rpc(raw_template()).expect("parses");
        assert_eq!(template.height, 100);
        assert_eq!(template.transactions.len(), 1);
        assert_eq!(template.transactions[0].data, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn rejects_malformed_hash_fields() {
        let mut raw = raw_template();
        raw.previousblockhash = "not-hex".to_string();
        assert!(Template::from_rpc(raw).is_err());
    }

    #[test]
    fn equivalence_ignores_field_order_changes_in_the_tx_set() {
        let a = Template::from_rpc(raw_template()).unwrap();
        let mut raw_b = raw_template();
        raw_b.coinbasevalue += 1; // fee total shifted, tx set unchanged
        let b = Template::from_rpc(raw_b).unwrap();
        assert!(a.is_equivalent_to(&b));
    }
}

//! Wire types for the subset of Bitcoin Core's JSON-RPC schema stratumd uses.

use serde::Deserialize;

/// One entry of `getblocktemplate`'s `transactions` array.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateTransaction {
    /// Present when the node already has the witness-stripped TXID cached;
    /// falls back to `hash` (which is the wtxid pre-segwit) otherwise.
    pub txid: Option<String>,
    pub hash: String,
    pub data: String,
}

impl TemplateTransaction {
    /// The hex TXID to feed the Merkle tree with.
    pub fn txid_hex(&self) -> &str {
        self.txid.as_deref().unwrap_or(&self.hash)
    }
}

/// The fields of `getblocktemplate`'s result this proxy cares about. Bitcoin
/// Core's actual response carries many more (rules, vbavailable, mutable,
/// ...) that the proxy has no use for and silently ignores.
#[derive(Debug, Clone, Deserialize)]
pub struct GetBlockTemplateResult {
    pub height: u64,
    pub previousblockhash: String,
    pub version: i32,
    pub bits: String,
    pub curtime: u32,
    pub mintime: u32,
    pub coinbasevalue: u64,
    pub transactions: Vec<TemplateTransaction>,
    pub default_witness_commitment: Option<String>,
}

/// The outcome of a `submitblock` call, surfaced verbatim from the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitBlockOutcome {
    Accepted,
    Rejected(String),
}

//! A Job: one mining unit handed to Stratum clients, derived from a
//! [`Template`](crate::template::Template) plus a synthesized coinbase.

use std::sync::Arc;

use stratumd_core::CoinbaseParts;

use crate::template::Template;

/// An opaque, monotonically increasing job identifier, handed to miners as
/// the `job_id` field of `mining.notify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl JobId {
    pub fn to_hex(self) -> String {
        format!("{:x}", self.0)
    }
}

/// Everything a Stratum session needs to build and validate shares against
/// one block template: the template itself, the coinbase split around the
/// extranonce gap, and the Merkle branch that combines a realized coinbase
/// with the template's other transactions.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub template: Arc<Template>,
    pub coinbase: CoinbaseParts,
    pub merkle_branch: Vec<[u8; 32]>,
    /// Whether clients must discard all previously issued jobs (a new tip)
    /// or may keep mining old ones until they run dry (mempool-only update).
    pub clean_jobs: bool,
}

impl Job {
    pub fn new(id: JobId, template: Arc<Template>, coinbase: CoinbaseParts, clean_jobs: bool) -> Self {
        let other_txids: Vec<[u8; 32]> = template.transactions.iter().map(|tx| tx.txid).collect();
        let merkle_branch = stratumd_crypto::merkle_branch_from_txids(&other_txids);
        Job {
            id,
            template,
            coinbase,
            merkle_branch,
            clean_jobs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_formats_as_lowercase_hex() {
        assert_eq!(JobId(255).to_hex(), "ff");
    }
}

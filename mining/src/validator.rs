//! Share Validator: the consensus-critical pipeline from a raw `mining.submit`
//! to {stale, invalid, accepted-share, accepted-block}.

use stratumd_consensus::{effective_version, Job};
use stratumd_core::{
    add_witness_for_submission, assemble_block, coinbase_txid, realize_coinbase, serialize_header, HeaderFields,
};
use stratumd_crypto::{dsha256, hash_to_u256_le, merkle_root, target_from_difficulty};
use stratumd_rpc::NodeClient;

use crate::session::Session;
use crate::wire::{ShareError, ShareErrorKind};

/// The raw fields of a `mining.submit` request, already pulled out of their
/// hex/JSON wire form.
pub struct SubmitParams {
    pub job_id_raw: String,
    pub extranonce2: Vec<u8>,
    pub ntime: u32,
    pub nonce: [u8; 4],
    pub version_bits: Option<u32>,
}

/// The outcome of validating one share, distinguishing a share that merely
/// cleared the session's assigned difficulty from one that also cleared the
/// network target (and was therefore submitted as a full block).
#[derive(Debug, PartialEq, Eq)]
pub enum ShareOutcome {
    AcceptedShare,
    AcceptedBlock,
}

pub async fn validate_submit(
    session: &mut Session,
    params: SubmitParams,
    node: &NodeClient,
    request_refresh: impl FnOnce(),
) -> Result<ShareOutcome, ShareError> {
    if session.phase() != crate::session::SessionPhase::Active {
        return Err(ShareError::new(ShareErrorKind::Unauthorized, "Unauthorized worker"));
    }

    let job_id = parse_job_id(&params.job_id_raw)?;
    let job = session.lookup_job(job_id)?;

    if params.extranonce2.len() != session.extranonce2_size {
        return Err(ShareError::new(ShareErrorKind::InvalidSubmit, "Invalid extranonce2 size"));
    }
    let max_time = job.template.curtime.saturating_add(7200);
    if params.ntime < job.template.min_time || params.ntime > max_time {
        return Err(ShareError::new(ShareErrorKind::InvalidSubmit, "ntime out of range"));
    }

    if let Some(bits) = params.version_bits {
        if bits & !session.version_rolling_mask != 0 {
            return Err(ShareError::new(ShareErrorKind::InvalidSubmit, "version bits outside negotiated mask"));
        }
    }

    let is_new = session.record_share_if_new(
        job_id,
        params.extranonce2.clone(),
        params.ntime,
        params.version_bits,
        params.nonce,
    );
    if !is_new {
        return Err(ShareError::new(ShareErrorKind::DuplicateShare, "Duplicate share"));
    }

    let outcome = evaluate_share(
        &job,
        &params,
        session.extranonce1,
        session.version_rolling_mask,
        session.difficulty,
    )?;

    if outcome == ShareOutcome::AcceptedBlock {
        submit_found_block(&job, &params, session.extranonce1, session.version_rolling_mask, node, request_refresh)
            .await;
    }

    Ok(outcome)
}

fn parse_job_id(raw: &str) -> Result<stratumd_consensus::JobId, ShareError> {
    u64::from_str_radix(raw, 16)
        .map(stratumd_consensus::JobId)
        .map_err(|_| ShareError::new(ShareErrorKind::UnknownJob, "Job not found"))
}

fn evaluate_share(
    job: &Job,
    params: &SubmitParams,
    extranonce1: [u8; 4],
    version_rolling_mask: u32,
    difficulty: f64,
) -> Result<ShareOutcome, ShareError> {
    let realized = realize_coinbase(&job.coinbase, &extranonce1, &params.extranonce2);
    let txid = coinbase_txid(&realized);
    let root = merkle_root(txid, &job.merkle_branch);

    let version = effective_version(job.template.version, version_rolling_mask, params.version_bits.unwrap_or(0));

    let header = HeaderFields {
        version,
        previous_hash: job.template.previous_hash,
        merkle_root: root,
        ntime: params.ntime,
        bits: job.template.bits,
        nonce: u32::from_be_bytes(params.nonce),
    };
    let hash = dsha256(&serialize_header(&header));
    let hash_value = hash_to_u256_le(&hash);

    let share_target = target_from_difficulty(difficulty);
    if hash_value > share_target {
        return Err(ShareError::new(ShareErrorKind::InvalidSubmit, "high-hash"));
    }

    if hash_value <= job.template.network_target {
        Ok(ShareOutcome::AcceptedBlock)
    } else {
        Ok(ShareOutcome::AcceptedShare)
    }
}

async fn submit_found_block(
    job: &Job,
    params: &SubmitParams,
    extranonce1: [u8; 4],
    version_rolling_mask: u32,
    node: &NodeClient,
    request_refresh: impl FnOnce(),
) {
    let realized = realize_coinbase(&job.coinbase, &extranonce1, &params.extranonce2);
    let txid = coinbase_txid(&realized);
    let root = merkle_root(txid, &job.merkle_branch);
    let version = effective_version(job.template.version, version_rolling_mask, params.version_bits.unwrap_or(0));

    let header = HeaderFields {
        version,
        previous_hash: job.template.previous_hash,
        merkle_root: root,
        ntime: params.ntime,
        bits: job.template.bits,
        nonce: u32::from_be_bytes(params.nonce),
    };
    let header_bytes = serialize_header(&header);

    let coinbase_for_submission = if job.template.default_witness_commitment.is_some() {
        add_witness_for_submission(&realized)
    } else {
        realized
    };

    let other_tx_data: Vec<Vec<u8>> = job.template.transactions.iter().map(|tx| tx.data.clone()).collect();
    let block = assemble_block(&header_bytes, &coinbase_for_submission, &other_tx_data);
    let block_hex = hex::encode(block);

    match node.submit_block(block_hex).await {
        Ok(stratumd_rpc::SubmitBlockOutcome::Accepted) => {
            log::info!("block accepted at height {}", job.template.height);
            request_refresh();
        }
        Ok(stratumd_rpc::SubmitBlockOutcome::Rejected(reason)) => {
            log::warn!("submitblock rejected at height {}: {reason}", job.template.height);
        }
        Err(e) => {
            log::error!("submitblock call failed at height {}: {e}", job.template.height);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_job_id_rejects_non_hex() {
        assert!(parse_job_id("not-hex").is_err());
    }

    #[test]
    fn parse_job_id_accepts_hex() {
        assert_eq!(parse_job_id("ff").unwrap(), stratumd_consensus::JobId(255));
    }
}

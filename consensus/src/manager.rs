//! Template Manager: polls the node for block templates and publishes Jobs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use stratumd_core::{build_coinbase, CoinbaseSpec};
use stratumd_rpc::NodeClient;
use tokio::sync::{watch, Notify};

use crate::job::{Job, JobId};
use crate::template::Template;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Static configuration the Template Manager needs beyond the Node Client
/// itself: everything required to synthesize a coinbase.
#[derive(Debug, Clone)]
pub struct CoinbaseConfig {
    pub payout_script: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Periodically fetches templates, detects change, synthesizes coinbases,
/// and publishes the current [`Job`] to every subscriber via a `watch`
/// channel. Cheaply cloneable; all clones share the same published state.
pub struct TemplateManager {
    node: Arc<NodeClient>,
    coinbase_config: CoinbaseConfig,
    poll_interval: Duration,
    next_job_id: AtomicU64,
    force_refresh: Notify,
    sender: watch::Sender<Option<Arc<Job>>>,
}

impl TemplateManager {
    pub fn new(node: Arc<NodeClient>, coinbase_config: CoinbaseConfig, poll_interval: Duration) -> (Arc<Self>, watch::Receiver<Option<Arc<Job>>>) {
        let (sender, receiver) = watch::channel(None);
        let manager = Arc::new(TemplateManager {
            node,
            coinbase_config,
            poll_interval,
            next_job_id: AtomicU64::new(0),
            force_refresh: Notify::new(),
            sender,
        });
        (manager, receiver)
    }

    /// The currently published Job, if one has been fetched yet.
    pub fn current(&self) -> Option<Arc<Job>> {
        self.sender.borrow().clone()
    }

    /// Requests an out-of-band refresh, e.g. after a share cleared the
    /// network target and the chain tip is expected to move.
    pub fn request_refresh(&self) {
        self.force_refresh.notify_one();
    }

    /// Runs the poll loop until `shutdown` resolves. Intended to be spawned
    /// as its own task; returns once a graceful shutdown signal fires.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut backoff = Duration::from_secs(1);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.force_refresh.notified() => {
                    debug!("template manager: forced refresh requested");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("template manager: shutting down");
                        return;
                    }
                }
            }

            match self.node.get_template().await {
                Ok(raw) => {
                    backoff = Duration::from_secs(1);
                    if let Err(e) = self.handle_template(raw) {
                        warn!("template manager: malformed template from node: {e}");
                    }
                }
                Err(e) => {
                    warn!("template manager: get_template failed, retrying in {backoff:?}: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return;
                            }
                        }
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    fn handle_template(&self, raw: stratumd_rpc::GetBlockTemplateResult) -> Result<(), crate::template::TemplateError> {
        let template = Template::from_rpc(raw)?;
        let previous = self.current();

        let clean_jobs = match &previous {
            None => true,
            Some(job) => job.template.previous_hash != template.previous_hash,
        };
        let unchanged = previous
            .as_ref()
            .map(|job| job.template.is_equivalent_to(&template))
            .unwrap_or(false);

        if unchanged {
            debug!("template manager: template unchanged, keeping current job");
            return Ok(());
        }

        let spec = CoinbaseSpec {
            height: template.height,
            coinbase_value: template.coinbase_value,
            payout_script: self.coinbase_config.payout_script.clone(),
            tag: self.coinbase_config.tag.clone(),
            witness_commitment: template.default_witness_commitment.clone(),
        };
        let coinbase = build_coinbase(&spec);

        let id = JobId(self.next_job_id.fetch_add(1, Ordering::Relaxed));
        let job = Arc::new(Job::new(id, Arc::new(template), coinbase, clean_jobs));
        info!(
            "template manager: published job {} (height {}, clean_jobs={})",
            job.id.to_hex(),
            job.template.height,
            job.clean_jobs
        );
        let _ = self.sender.send(Some(job));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coinbase_config_clones_independently() {
        let config = CoinbaseConfig {
            payout_script: vec![1, 2, 3],
            tag: b"stratumd".to_vec(),
        };
        let cloned = config.clone();
        assert_eq!(config.payout_script, cloned.payout_script);
    }
}

//! Per-connection Stratum state: `FRESH → SUBSCRIBED → AUTHORIZED → ACTIVE`.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use stratumd_consensus::{Job, JobId};

use crate::wire::{ShareError, ShareErrorKind};

/// How long a share referencing a job superseded by a `clean_jobs=true`
/// update is still accepted as merely *stale* rather than unknown.
pub const STALE_GRACE_WINDOW: Duration = Duration::from_secs(5);

/// Caps how many past jobs a session remembers, bounding memory for
/// long-lived connections that never reconnect.
const KNOWN_JOBS_CAP: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Fresh,
    Subscribed,
    Authorized,
    Active,
}

struct KnownJob {
    job: Arc<Job>,
    /// Set once a later `clean_jobs=true` job arrives; `None` while current.
    superseded_at: Option<Instant>,
}

/// The tuple that makes two submits for the same job indistinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ShareKey {
    job_id: JobId,
    extranonce2: Vec<u8>,
    ntime: u32,
    version_bits: Option<u32>,
    nonce: [u8; 4],
}

/// Mutable per-connection Stratum session state.
pub struct Session {
    pub extranonce1: [u8; 4],
    pub extranonce2_size: usize,
    pub difficulty: f64,
    pub minimum_difficulty_floor: f64,
    pub worker_name: Option<String>,
    pub subscribed: bool,
    pub authorized: bool,
    pub version_rolling_mask: u32,
    pub last_activity: Instant,
    known_jobs: std::collections::HashMap<JobId, KnownJob>,
    known_job_order: VecDeque<JobId>,
    seen_shares: HashSet<ShareKey>,
}

impl Session {
    pub fn new(extranonce1: [u8; 4], minimum_difficulty_floor: f64) -> Self {
        Session {
            extranonce1,
            extranonce2_size: 4,
            difficulty: 1.0,
            minimum_difficulty_floor,
            worker_name: None,
            subscribed: false,
            authorized: false,
            version_rolling_mask: 0,
            last_activity: Instant::now(),
            known_jobs: std::collections::HashMap::new(),
            known_job_order: VecDeque::new(),
            seen_shares: HashSet::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        match (self.subscribed, self.authorized) {
            (false, _) => SessionPhase::Fresh,
            (true, false) => SessionPhase::Subscribed,
            (true, true) => SessionPhase::Active,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn negotiate_version_rolling(&mut self, requested_mask: u32) -> u32 {
        self.version_rolling_mask = requested_mask & stratumd_consensus::VERSION_ROLLING_SERVER_MASK;
        self.version_rolling_mask
    }

    pub fn set_difficulty(&mut self, suggested: f64) -> f64 {
        self.difficulty = suggested.max(self.minimum_difficulty_floor);
        self.difficulty
    }

    /// Records a newly published job. When `job.clean_jobs` is set, every
    /// previously known job is marked superseded so the grace-window rule in
    /// [`lookup_job`](Self::lookup_job) applies to it.
    pub fn record_job(&mut self, job: Arc<Job>) {
        if job.clean_jobs {
            let now = Instant::now();
            for entry in self.known_jobs.values_mut() {
                entry.superseded_at.get_or_insert(now);
            }
        }

        let id = job.id;
        self.known_jobs.insert(id, KnownJob { job, superseded_at: None });
        self.known_job_order.push_back(id);
        while self.known_job_order.len() > KNOWN_JOBS_CAP {
            if let Some(oldest) = self.known_job_order.pop_front() {
                self.known_jobs.remove(&oldest);
            }
        }
    }

    /// Resolves a submitted `job_id` against the grace-window rule: unknown
    /// job ids are always error 25; superseded ones are error 21 within
    /// [`STALE_GRACE_WINDOW`] of the clean-jobs event and error 25 after.
    pub fn lookup_job(&self, job_id: JobId) -> Result<Arc<Job>, ShareError> {
        match self.known_jobs.get(&job_id) {
            None => Err(ShareError::new(ShareErrorKind::UnknownJob, "Job not found")),
            Some(entry) => match entry.superseded_at {
                None => Ok(entry.job.clone()),
                Some(at) if at.elapsed() < STALE_GRACE_WINDOW => {
                    Err(ShareError::new(ShareErrorKind::StaleJob, "Job not found"))
                }
                Some(_) => Err(ShareError::new(ShareErrorKind::UnknownJob, "Job not found")),
            },
        }
    }

    /// Returns `true` (and records it) the first time this exact tuple is
    /// submitted; `false` on every subsequent submission of the same tuple.
    pub fn record_share_if_new(
        &mut self,
        job_id: JobId,
        extranonce2: Vec<u8>,
        ntime: u32,
        version_bits: Option<u32>,
        nonce: [u8; 4],
    ) -> bool {
        let key = ShareKey { job_id, extranonce2, ntime, version_bits, nonce };
        self.seen_shares.insert(key)
    }
}

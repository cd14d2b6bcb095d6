//! Server / Dispatcher: accepts miner connections, assigns extranonce1,
//! spawns a Session per connection, and fans Template Manager updates out to
//! every live session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use log::{debug, info, trace, warn};
use serde_json::{json, Value};
use stratumd_consensus::Job;
use stratumd_rpc::NodeClient;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::extranonce::ExtranonceAllocator;
use crate::session::{Session, SessionPhase};
use crate::validator::{validate_submit, ShareOutcome, SubmitParams};
use crate::wire::{ShareError, ShareErrorKind, StratumNotification, StratumRequest, StratumResponse};

const MAX_LINE_LENGTH: usize = 64 * 1024;
const MAX_CONSECUTIVE_PROTOCOL_ERRORS: u32 = 2;

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: std::io::Error },
}

/// Immutable configuration the Dispatcher needs beyond the Node Client and
/// Template Manager handles it's constructed with.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub listen_addr: SocketAddr,
    pub share_difficulty_floor: f64,
    pub idle_timeout: Duration,
    pub handshake_timeout: Duration,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    node: Arc<NodeClient>,
    job_rx: watch::Receiver<Option<Arc<Job>>>,
    request_refresh: Arc<dyn Fn() + Send + Sync>,
    extranonce_allocator: Arc<ExtranonceAllocator>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        node: Arc<NodeClient>,
        job_rx: watch::Receiver<Option<Arc<Job>>>,
        request_refresh: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        Dispatcher {
            config,
            node,
            job_rx,
            request_refresh,
            extranonce_allocator: Arc::new(ExtranonceAllocator::new()),
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<(), DispatcherError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Binds the listening socket without accepting connections yet. Split
    /// out from [`run`](Self::run) so tests can bind an ephemeral port
    /// (`listen_addr` of `127.0.0.1:0`) and learn the real address via
    /// `TcpListener::local_addr` before handing the listener to [`serve`](Self::serve).
    pub async fn bind(&self) -> Result<TcpListener, DispatcherError> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|source| DispatcherError::Bind { addr: self.config.listen_addr, source })?;
        info!("stratum listener bound on {}", listener.local_addr().unwrap_or(self.config.listen_addr));
        Ok(listener)
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<(), DispatcherError> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, addr)) => {
                            let dispatcher = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = dispatcher.handle_connection(socket, addr).await {
                                    debug!("session {addr} ended: {e}");
                                }
                            });
                        }
                        Err(e) => warn!("accept failed: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("stratum listener shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_connection(&self, socket: TcpStream, addr: SocketAddr) -> Result<(), tokio_util::codec::LinesCodecError> {
        info!("new stratum connection from {addr}");
        let extranonce1 = self.extranonce_allocator.allocate();
        let subscription_id = hex::encode(extranonce1);

        let (reader, writer) = socket.into_split();
        let codec = LinesCodec::new_with_max_length(MAX_LINE_LENGTH);
        let mut lines = FramedRead::new(reader, codec);

        let (tx, mut rx) = mpsc::channel::<String>(100);
        tokio::spawn(async move {
            let mut writer = BufWriter::new(writer);
            while let Some(line) = rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if writer.write_all(b"\n").await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        let mut session = Session::new(extranonce1, self.config.share_difficulty_floor);
        let mut job_rx = self.job_rx.clone();
        let mut protocol_errors = 0u32;
        let handshake_deadline = tokio::time::sleep(self.config.handshake_timeout);
        tokio::pin!(handshake_deadline);

        let result = loop {
            tokio::select! {
                line = lines.next() => {
                    match line {
                        Some(Ok(line)) => {
                            session.touch();
                            trace!("{addr} -> {line}");
                            match serde_json::from_str::<StratumRequest>(&line) {
                                Ok(request) => {
                                    protocol_errors = 0;
                                    self.dispatch(&mut session, request, &subscription_id, &tx).await;
                                }
                                Err(e) => {
                                    protocol_errors += 1;
                                    warn!("{addr}: malformed request: {e}");
                                    if protocol_errors >= MAX_CONSECUTIVE_PROTOCOL_ERRORS {
                                        break Ok(());
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => break Err(e.into()),
                        None => break Ok(()),
                    }
                }
                changed = job_rx.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    let job = job_rx.borrow().clone();
                    if let Some(job) = job {
                        if session.phase() == SessionPhase::Active {
                            session.record_job(job.clone());
                            let _ = send_notify(&tx, &job).await;
                        }
                    }
                }
                _ = tokio::time::sleep(self.config.idle_timeout) => {
                    if session.last_activity.elapsed() >= self.config.idle_timeout {
                        info!("{addr}: idle timeout, closing");
                        break Ok(());
                    }
                }
                _ = &mut handshake_deadline, if session.phase() != SessionPhase::Active => {
                    info!("{addr}: handshake timeout, closing");
                    break Ok(());
                }
            }
        };

        self.extranonce_allocator.release(extranonce1);
        info!("stratum connection closed: {addr}");
        result
    }

    async fn dispatch(&self, session: &mut Session, request: StratumRequest, subscription_id: &str, tx: &mpsc::Sender<String>) {
        let id = request.id.clone();
        let was_active = session.phase() == SessionPhase::Active;
        match request.method.as_str() {
            "mining.configure" => {
                let result = handle_configure(session, &request.params);
                send_response(tx, StratumResponse::ok(id, result)).await;
            }
            "mining.subscribe" => {
                session.subscribed = true;
                let result = json!([
                    [["mining.set_difficulty", subscription_id], ["mining.notify", subscription_id]],
                    hex::encode(session.extranonce1),
                    session.extranonce2_size,
                ]);
                send_response(tx, StratumResponse::ok(id, result)).await;
            }
            "mining.authorize" => {
                let worker = request.params.first().and_then(Value::as_str).unwrap_or("").to_string();
                session.worker_name = Some(worker);
                session.authorized = true;
                send_response(tx, StratumResponse::ok(id, Value::Bool(true))).await;
            }
            "mining.suggest_difficulty" => {
                let suggested = request.params.first().and_then(Value::as_f64).unwrap_or(1.0);
                let effective = session.set_difficulty(suggested);
                send_response(tx, StratumResponse::ok(id, Value::Bool(true))).await;
                send_set_difficulty(tx, effective).await;
            }
            "mining.submit" => {
                match parse_submit_params(&request.params) {
                    Ok(params) => {
                        let refresh = self.request_refresh.clone();
                        let outcome = validate_submit(session, params, &self.node, move || (refresh)()).await;
                        match outcome {
                            Ok(ShareOutcome::AcceptedShare) | Ok(ShareOutcome::AcceptedBlock) => {
                                send_response(tx, StratumResponse::ok(id, Value::Bool(true))).await;
                            }
                            Err(e) => {
                                send_response(tx, StratumResponse::err(id, e)).await;
                            }
                        }
                    }
                    Err(e) => {
                        send_response(tx, StratumResponse::err(id, e)).await;
                    }
                }
            }
            other => {
                debug!("unsupported method {other}");
                send_response(
                    tx,
                    StratumResponse::err(id, ShareError::new(ShareErrorKind::InvalidSubmit, "unsupported method")),
                )
                .await;
            }
        }

        // `mining.set_difficulty` then `mining.notify` are sent exactly once,
        // the instant a session first reaches ACTIVE, regardless of whether
        // subscribe or authorize arrived second.
        if !was_active && session.phase() == SessionPhase::Active {
            send_set_difficulty(tx, session.difficulty).await;
            if let Some(job) = self.job_rx.borrow().clone() {
                session.record_job(job.clone());
                let _ = send_notify(tx, &job).await;
            }
        }
    }
}

fn handle_configure(session: &mut Session, params: &[Value]) -> Value {
    let extensions = params.first().and_then(Value::as_array).cloned().unwrap_or_default();
    let options = params.get(1).and_then(Value::as_object).cloned().unwrap_or_default();

    let mut result = serde_json::Map::new();
    for ext in extensions {
        let Some(name) = ext.as_str() else { continue };
        match name {
            "version-rolling" => {
                let requested = options
                    .get("version-rolling.mask")
                    .and_then(Value::as_str)
                    .and_then(|s| u32::from_str_radix(s.trim_start_matches("0x"), 16).ok())
                    .unwrap_or(stratumd_consensus::VERSION_ROLLING_SERVER_MASK);
                let negotiated = session.negotiate_version_rolling(requested);
                result.insert("version-rolling".to_string(), Value::Bool(true));
                result.insert("version-rolling.mask".to_string(), Value::String(format!("{negotiated:08x}")));
            }
            "minimum-difficulty" => {
                if let Some(value) = options.get("minimum-difficulty.value").and_then(Value::as_f64) {
                    session.minimum_difficulty_floor = value;
                }
                result.insert("minimum-difficulty".to_string(), Value::Bool(true));
            }
            _ => {
                result.insert(name.to_string(), Value::Bool(false));
            }
        }
    }
    Value::Object(result)
}

fn parse_submit_params(params: &[Value]) -> Result<SubmitParams, ShareError> {
    let bad = || ShareError::new(ShareErrorKind::InvalidSubmit, "malformed submit params");

    let job_id_raw = params.get(1).and_then(Value::as_str).ok_or_else(bad)?.to_string();
    let extranonce2 = params
        .get(2)
        .and_then(Value::as_str)
        .and_then(|s| hex::decode(s).ok())
        .ok_or_else(bad)?;
    let ntime = params
        .get(3)
        .and_then(Value::as_str)
        .and_then(|s| u32::from_str_radix(s, 16).ok())
        .ok_or_else(bad)?;
    let nonce_bytes = params
        .get(4)
        .and_then(Value::as_str)
        .and_then(|s| hex::decode(s).ok())
        .ok_or_else(bad)?;
    let nonce: [u8; 4] = nonce_bytes.try_into().map_err(|_| bad())?;
    let version_bits = params
        .get(5)
        .and_then(Value::as_str)
        .map(|s| u32::from_str_radix(s, 16))
        .transpose()
        .map_err(|_| bad())?;

    Ok(SubmitParams { job_id_raw, extranonce2, ntime, nonce, version_bits })
}

async fn send_response(tx: &mpsc::Sender<String>, response: StratumResponse) {
    if let Ok(line) = serde_json::to_string(&response) {
        let _ = tx.send(line).await;
    }
}

async fn send_set_difficulty(tx: &mpsc::Sender<String>, difficulty: f64) {
    let notification = StratumNotification::new("mining.set_difficulty", json!([difficulty]));
    if let Ok(line) = serde_json::to_string(&notification) {
        let _ = tx.send(line).await;
    }
}

async fn send_notify(tx: &mpsc::Sender<String>, job: &Job) -> Result<(), ()> {
    let params = json!([
        job.id.to_hex(),
        stratum_previous_hash_hex(&job.template.previous_hash),
        hex::encode(&job.coinbase.prefix),
        hex::encode(&job.coinbase.suffix),
        job.merkle_branch.iter().map(hex::encode).collect::<Vec<_>>(),
        format!("{:08x}", job.template.version),
        format!("{:08x}", job.template.bits),
        format!("{:08x}", job.template.curtime),
        job.clean_jobs,
    ]);
    let notification = StratumNotification::new("mining.notify", params);
    let line = serde_json::to_string(&notification).map_err(|_| ())?;
    tx.send(line).await.map_err(|_| ())
}

/// Stratum's historical byte order for `previous_hash`: the *displayed*
/// (big-endian) tip hash split into eight 4-byte words, each word
/// individually byte-reversed. `previous_hash` is already stored in
/// internal little-endian form (`template.rs` reverses the node's display
/// hex once on ingest), so reversing the full 32 bytes back to display
/// order and then reversing each word cancels the within-word reversal —
/// the net effect is just the internal-LE words emitted in reverse order.
fn stratum_previous_hash_hex(previous_hash: &[u8; 32]) -> String {
    let mut out = String::with_capacity(64);
    for word in previous_hash.chunks(4).rev() {
        out.push_str(&hex::encode(word));
    }
    out
}

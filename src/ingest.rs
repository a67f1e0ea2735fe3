//! C8: CMAF ingest scheduler.
//!
//! Each session owns one scheduler task that drives the same C5/C6 synthesis path in push mode:
//! PUT the init segments, then on a timer (or, in test mode, on a manual trigger) PUT each
//! representation's next media segment, fanned out behind a join barrier so the next segment
//! never starts before the current one finishes across every representation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::error::LivesimError;
use crate::segment::{self, SegSelector, WriteSegmentRequest, MaterializedSegment};
use crate::urlcfg::{self, ResponseConfig};
use crate::wrap;
use crate::LIVESIM_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    NotStarted,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub at_ms: i64,
    pub message: String,
    pub fatal: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateIngestRequest {
    #[serde(rename = "livesimURL")]
    pub livesim_url: String,
    pub destination: String,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(rename = "testNowMS")]
    pub test_now_ms: Option<i64>,
    pub duration_s: Option<u64>,
    #[serde(rename = "streamsURLs")]
    pub streams_urls: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CreateIngestResponse {
    pub destination: String,
    #[serde(rename = "livesim-url")]
    pub livesim_url: String,
    pub id: u64,
}

#[derive(Debug, Serialize)]
pub struct IngestInfo {
    pub id: u64,
    pub state: String,
    pub destination: String,
    pub report: Vec<ReportEntry>,
}

struct SessionShared {
    id: u64,
    destination: String,
    livesim_url: String,
    state: Mutex<IngestState>,
    report: Mutex<Vec<ReportEntry>>,
    cancel_tx: watch::Sender<bool>,
    trigger_tx: mpsc::Sender<()>,
}

pub struct IngestSessionHandle {
    shared: Arc<SessionShared>,
}

impl IngestSessionHandle {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn info(&self) -> IngestInfo {
        let state = *self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        IngestInfo {
            id: self.shared.id,
            state: format!("{state:?}"),
            destination: self.shared.destination.clone(),
            report: self.shared.report.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }

    pub async fn step(&self) {
        let _ = self.shared.trigger_tx.send(()).await;
    }

    pub fn cancel(&self) -> Vec<ReportEntry> {
        let _ = self.shared.cancel_tx.send(true);
        *self.shared.state.lock().unwrap_or_else(|e| e.into_inner()) = IngestState::Stopped;
        self.shared.report.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

pub struct IngestManager {
    catalog: Arc<Catalog>,
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, Arc<SessionShared>>>,
    client: Client,
}

impl IngestManager {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        IngestManager {
            catalog,
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
            client: Client::new(),
        }
    }

    pub fn get(&self, id: u64) -> Option<IngestSessionHandle> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).get(&id)
            .map(|shared| IngestSessionHandle { shared: Arc::clone(shared) })
    }

    pub fn delete(&self, id: u64) -> Option<Vec<ReportEntry>> {
        let shared = self.sessions.lock().unwrap_or_else(|e| e.into_inner()).remove(&id)?;
        let _ = shared.cancel_tx.send(true);
        *shared.state.lock().unwrap_or_else(|e| e.into_inner()) = IngestState::Stopped;
        Some(shared.report.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    /// Cancels every active session; called on server shutdown (spec §5).
    pub fn cancel_all(&self) {
        for shared in self.sessions.lock().unwrap_or_else(|e| e.into_inner()).values() {
            let _ = shared.cancel_tx.send(true);
        }
    }

    pub fn create(&self, req: CreateIngestRequest) -> Result<CreateIngestResponse, LivesimError> {
        let parsed = urlcfg::parse_path(&req.livesim_url)
            .map_err(|_| LivesimError::NotFound(format!("couldn't parse livesimURL '{}'", req.livesim_url)))?;
        let asset = self.catalog.find_asset(&parsed.content_part)
            .ok_or_else(|| LivesimError::NotFound(format!("no asset for livesimURL '{}'", req.livesim_url)))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (trigger_tx, trigger_rx) = mpsc::channel(4);
        let shared = Arc::new(SessionShared {
            id,
            destination: req.destination.clone(),
            livesim_url: req.livesim_url.clone(),
            state: Mutex::new(IngestState::NotStarted),
            report: Mutex::new(Vec::new()),
            cancel_tx,
            trigger_tx,
        });

        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).insert(id, Arc::clone(&shared));

        let client = self.client.clone();
        let catalog = Arc::clone(&self.catalog);
        let cfg = parsed.cfg;
        let destination = req.destination.clone();
        let auth = req.user.clone().zip(req.password.clone());
        let test_now_ms = req.test_now_ms;
        let duration_ms = req.duration_s.map(|d| d as i64 * 1000);

        tokio::spawn(run_session(
            Arc::clone(&shared), client, catalog, asset.path.clone(), cfg,
            destination, auth, test_now_ms, duration_ms, cancel_rx, trigger_rx,
        ));

        Ok(CreateIngestResponse { destination: req.destination, livesim_url: req.livesim_url, id })
    }
}

async fn run_session(
    shared: Arc<SessionShared>,
    client: Client,
    catalog: Arc<Catalog>,
    asset_path: String,
    cfg: ResponseConfig,
    destination: String,
    auth: Option<(String, String)>,
    test_now_ms: Option<i64>,
    duration_ms: Option<i64>,
    mut cancel_rx: watch::Receiver<bool>,
    mut trigger_rx: mpsc::Receiver<()>,
) {
    let Some(asset) = catalog.find_asset(&asset_path) else {
        record(&shared, "asset disappeared from catalog before ingest start", true);
        *shared.state.lock().unwrap_or_else(|e| e.into_inner()) = IngestState::Stopped;
        return;
    };

    let ast_ms: i64 = 0;
    let mut virtual_now_ms = test_now_ms.unwrap_or(0);
    let wall_start = Instant::now();
    let real_start_ms = now_ms();
    let start_ms = test_now_ms.unwrap_or(real_start_ms);

    // Step 1: send all init segments. The session doesn't transition to Running until this
    // completes, matching the reference implementation's observable behavior where a GET
    // issued in that window still reports NotStarted.
    for rep in asset.representations.values() {
        let url = format!("{destination}/{}/init.mp4", rep.id);
        if let Err(e) = put(&client, &url, rep.init_segment.clone(), &auth).await {
            record(&shared, &format!("init PUT for {} failed: {e}", rep.id), true);
            *shared.state.lock().unwrap_or_else(|e| e.into_inner()) = IngestState::Stopped;
            return;
        }
    }
    *shared.state.lock().unwrap_or_else(|e| e.into_inner()) = IngestState::Running;

    let mut next_nrs: HashMap<String, u64> = HashMap::new();
    for rep in asset.representations.values() {
        let now_ms_val = if test_now_ms.is_some() { virtual_now_ms } else { real_start_ms };
        let nr = wrap::find_last_seg_nr(&asset, rep, ast_ms, 0, now_ms_val, &cfg).unwrap_or(rep.start_nr()) + 1;
        next_nrs.insert(rep.id.clone(), nr);
    }

    loop {
        if *cancel_rx.borrow() {
            break;
        }
        if let Some(dur) = duration_ms {
            let elapsed = if test_now_ms.is_some() { virtual_now_ms - start_ms } else { now_ms() - start_ms };
            if elapsed >= dur {
                break;
            }
        }

        let rep_ids: Vec<String> = asset.representations.keys().cloned().collect();
        let earliest_availability = rep_ids.iter()
            .filter_map(|id| {
                let rep = asset.representation(id)?;
                let nr = *next_nrs.get(id)?;
                wrap::calc_segment_availability_time(&asset, rep, nr, ast_ms, 0, &cfg).ok()
            })
            .min()
            .unwrap_or(virtual_now_ms);

        if test_now_ms.is_some() {
            tokio::select! {
                _ = trigger_rx.recv() => {},
                _ = cancel_rx.changed() => { if *cancel_rx.borrow() { break; } },
            }
            virtual_now_ms = earliest_availability.max(virtual_now_ms);
        } else {
            let wait_ms = (earliest_availability - now_ms()).max(0);
            tokio::select! {
                _ = tokio::time::sleep_until(wall_start + Duration::from_millis(wait_ms as u64)) => {},
                _ = trigger_rx.recv() => {},
                _ = cancel_rx.changed() => { if *cancel_rx.borrow() { break; } },
            }
            if earliest_availability < now_ms() - 1000 {
                record(&shared, "ingest fell behind schedule", false);
            }
        }

        let now_for_segments = if test_now_ms.is_some() { virtual_now_ms } else { now_ms() };
        let mut joins = Vec::new();
        for rep_id in &rep_ids {
            let Some(rep) = asset.representation(rep_id) else { continue };
            let nr = *next_nrs.get(rep_id).unwrap_or(&rep.start_nr());
            let client = client.clone();
            let destination = destination.clone();
            let auth = auth.clone();
            let asset_clone_path = asset.path.clone();
            let catalog = Arc::clone(&catalog);
            let cfg = cfg.clone();
            let rep_id = rep_id.clone();
            joins.push(tokio::spawn(async move {
                let Some(asset) = catalog.find_asset(&asset_clone_path) else {
                    return Err(format!("asset {asset_clone_path} vanished"));
                };
                let req = WriteSegmentRequest {
                    cfg: &cfg,
                    drm: None,
                    asset: &asset,
                    rep_id: &rep_id,
                    selector: SegSelector::Number(nr),
                    now_ms: now_for_segments,
                    ast_ms,
                    period_start_ms: 0,
                    text_templates: None,
                    is_last: false,
                };
                match segment::write_segment(req).await {
                    Ok(MaterializedSegment::Buffered(bytes)) => {
                        let url = format!("{destination}/{rep_id}/{nr}.m4s");
                        put(&client, &url, bytes, &auth).await.map_err(|e| e.to_string())
                    },
                    Ok(MaterializedSegment::Chunked(_)) => Ok(()), // low-latency ingest push not exercised here
                    Err(e) => Err(e.to_string()),
                }
            }));
        }
        for join in joins {
            match join.await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => record(&shared, &e, false),
                Err(e) => record(&shared, &format!("segment task panicked: {e}"), false),
            }
        }
        for nr in next_nrs.values_mut() {
            *nr += 1;
        }
    }

    *shared.state.lock().unwrap_or_else(|e| e.into_inner()) = IngestState::Stopped;
    info!(session = shared.id, "ingest session stopped");
}

fn record(shared: &SessionShared, message: &str, fatal: bool) {
    warn!(session = shared.id, message, fatal, "ingest report entry");
    shared.report.lock().unwrap_or_else(|e| e.into_inner()).push(ReportEntry {
        at_ms: now_ms(),
        message: message.to_string(),
        fatal,
    });
}

async fn put(client: &Client, url: &str, body: bytes::Bytes, auth: &Option<(String, String)>) -> Result<(), LivesimError> {
    let mut req = client.put(url)
        .header("DASH-IF-Ingest", "1.1")
        .header("DASH-IF-livesim2", LIVESIM_VERSION)
        .header("Connection", "keep-alive")
        .body(body);
    if let Some((user, pass)) = auth {
        req = req.basic_auth(user, Some(pass));
    }
    let resp = req.send().await.map_err(|e| LivesimError::Internal(format!("PUT {url} failed: {e}")))?;
    if resp.status().as_u16() >= 300 {
        return Err(LivesimError::Internal(format!("PUT {url} returned {}", resp.status())));
    }
    // drain and close explicitly for keep-alive connection reuse
    let _ = resp.bytes().await;
    Ok(())
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

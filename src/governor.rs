//! C9: request governor.
//!
//! A per-client rate limiter built on `governor::RateLimiter`'s keyed GCRA implementation (the
//! same crate the teacher declares for its own bandwidth limiting in `fetch.rs`, there used
//! unkeyed), a CIDR whitelist that bypasses it entirely, and an optional JSONL dump of observed
//! per-key counts taken at each interval. The admission decision comes from the limiter; the
//! counts reported in the response header and JSONL dump come from a small `Mutex<HashMap>`
//! alongside it, since the limiter itself exposes no raw-count introspection.

use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use ipnet::IpNet;
use serde::Serialize;
use tracing::warn;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { count: u64, max: i64 },
    Rejected { count: u64, max: i64 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }

    /// Renders the configured response header value: `"<count> (max <maxNr>)"`.
    pub fn header_value(&self) -> String {
        match self {
            Admission::Admitted { count, max } | Admission::Rejected { count, max } => {
                format!("{count} (max {max})")
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct BucketDump {
    key: String,
    count: u64,
}

struct Inner {
    buckets: HashMap<String, u64>,
    reset_at: Instant,
}

pub struct Governor {
    max_requests: u64,
    interval: Duration,
    whitelist: Vec<IpNet>,
    log_path: Option<PathBuf>,
    inner: Mutex<Inner>,
    limiter: KeyedLimiter,
}

impl Governor {
    pub fn new(max_requests: u64, interval: Duration, whitelist: Vec<IpNet>, log_path: Option<PathBuf>) -> Self {
        Governor {
            max_requests,
            interval,
            whitelist,
            log_path,
            inner: Mutex::new(Inner { buckets: HashMap::new(), reset_at: Instant::now() }),
            limiter: RateLimiter::keyed(quota_for(max_requests, interval)),
        }
    }

    /// `X-Forwarded-For` if non-empty, else the request's remote address.
    pub fn client_key(forwarded_for: Option<&str>, remote_ip: IpAddr) -> String {
        match forwarded_for.map(str::trim).filter(|s| !s.is_empty()) {
            Some(xff) => xff.split(',').next().unwrap_or(xff).trim().to_string(),
            None => remote_ip.to_string(),
        }
    }

    fn is_whitelisted(&self, key: &str) -> bool {
        let Ok(ip) = key.parse::<IpAddr>() else { return false };
        self.whitelist.iter().any(|net| net.contains(&ip))
    }

    pub fn admit(&self, key: &str) -> Admission {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if inner.reset_at.elapsed() > self.interval {
            self.dump_and_reset(&mut inner);
        }

        let count = {
            let entry = inner.buckets.entry(key.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        if self.is_whitelisted(key) {
            return Admission::Admitted { count, max: -1 };
        }

        match self.limiter.check_key(&key.to_string()) {
            Ok(()) => Admission::Admitted { count, max: self.max_requests as i64 },
            Err(_not_until) => Admission::Rejected { count, max: self.max_requests as i64 },
        }
    }

    fn dump_and_reset(&self, inner: &mut Inner) {
        if let Some(path) = &self.log_path {
            let dump: Vec<BucketDump> = inner.buckets.iter()
                .map(|(key, &count)| BucketDump { key: key.clone(), count })
                .collect();
            match serde_json::to_vec(&dump) {
                Ok(mut bytes) => {
                    bytes.push(b'\n');
                    if let Err(e) = append_to_file(path, &bytes) {
                        warn!(error = %e, "failed to append governor bucket dump");
                    }
                },
                Err(e) => warn!(error = %e, "failed to serialize governor bucket dump"),
            }
        }
        inner.buckets.clear();
        inner.reset_at = Instant::now();
    }
}

/// Builds a keyed GCRA quota admitting `max_requests` per `interval`: full burst capacity up
/// front, replenishing one request every `interval / max_requests`.
fn quota_for(max_requests: u64, interval: Duration) -> Quota {
    let burst = NonZeroU32::new(max_requests.clamp(1, u32::MAX as u64) as u32)
        .expect("clamped to at least 1");
    let period = interval.checked_div(burst.get()).filter(|d| !d.is_zero()).unwrap_or(Duration::from_nanos(1));
    Quota::with_period(period).expect("period is nonzero").allow_burst(burst)
}

fn append_to_file(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    let mut f = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    f.write_all(bytes)
}

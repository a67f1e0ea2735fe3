//! Process configuration: CLI flags (clap derive) each mirrored by a `LIVESIM_*` environment
//! variable, per spec §6.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use ipnet::IpNet;

#[derive(Parser, Debug, Clone)]
#[command(name = "livesimd", version, about = "Synthesizes a live DASH/CMAF stream from a static VoD asset")]
pub struct Config {
    /// Root directory under which catalogued VoD assets live.
    #[arg(long, env = "LIVESIM_VOD_ROOT")]
    pub vod_root: PathBuf,

    /// Address the HTTP listener binds to.
    #[arg(long, env = "LIVESIM_BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: IpAddr,

    /// Port the HTTP listener binds to.
    #[arg(long, env = "LIVESIM_PORT", default_value_t = 8888)]
    pub port: u16,

    /// Base URL (scheme+host, no trailing slash) this server is externally reachable at; used
    /// to build absolute URLs embedded in synthesized manifests (LA-URL, UTCTiming, patch Location).
    #[arg(long, env = "LIVESIM_BASE_URL")]
    pub base_url: String,

    /// Availability Start Time, RFC3339. Defaults to the process's own start time, matching the
    /// upstream reference server's behaviour when none is configured.
    #[arg(long, env = "LIVESIM_AST")]
    pub ast: Option<String>,

    /// Per-request timeout; requests that exceed it get a 504 rather than hanging a worker.
    #[arg(long, env = "LIVESIM_TIMEOUT_S", default_value_t = 10)]
    pub timeout_s: u64,

    /// Request governor (C9) quota: requests admitted per client key per interval.
    #[arg(long, env = "LIVESIM_MAX_REQUESTS", default_value_t = 100)]
    pub max_requests: u64,

    /// Request governor quota window, in milliseconds.
    #[arg(long, env = "LIVESIM_GOVERNOR_INTERVAL_MS", default_value_t = 10_000)]
    pub governor_interval_ms: u64,

    /// CIDR ranges exempted from the request governor; repeatable or comma-separated.
    #[arg(long = "governor-whitelist", env = "LIVESIM_GOVERNOR_WHITELIST", value_delimiter = ',')]
    pub governor_whitelist: Vec<IpNet>,

    /// Name of the response header the governor attaches to every response.
    #[arg(long, env = "LIVESIM_GOVERNOR_HEADER", default_value = "X-RateLimit")]
    pub governor_header: String,

    /// Directory for the governor's admission log (JSON lines); omit to disable that log.
    #[arg(long, env = "LIVESIM_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Increase log verbosity; repeatable (`-v` = debug, `-vv` = trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all but warnings and errors.
    #[arg(short, long)]
    pub quiet: bool,
}

impl Config {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn governor_log_path(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|d| d.join("governor.jsonl"))
    }
}

//! Environment-driven configuration.
//!
//! Loaded once at startup: a `.env` file in the working directory (if
//! present) is layered under the process environment, mirroring the
//! settings-module convention this service's lineage already uses.

use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_BIND: &str = "0.0.0.0:8000";
const DEFAULT_PROXY_UPSTREAM_CHUNK: usize = 16 * 1024;
const DEFAULT_CALL_UPSTREAM_CHUNK: usize = 16 * 1024;
const DEFAULT_CALL_DOWNSTREAM_CHUNK: usize = 12_800 + 80; // 12.5 KiB, aligned to 80-byte frames
const DEFAULT_TOUCH_DIR: &str = "/data/app/audio/touch";
const DEFAULT_WELCOME_FILE: &str = "/data/app/audio/welcome.wav";
const DEFAULT_LOG_LEVEL: &str = "audio_proxy=info,tower_http=info";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub proxy_upstream_chunk_bytes: usize,
    pub call_upstream_chunk_bytes: usize,
    pub call_downstream_chunk_bytes: usize,
    pub touch_sound_dir: PathBuf,
    pub welcome_sound_path: PathBuf,
    pub debug_dump_dir: Option<PathBuf>,
    /// `tracing_subscriber::EnvFilter` directive string; overridden by
    /// `RUST_LOG` itself when that's set, per `EnvFilter::try_from_default_env`.
    pub log_level: String,
}

impl Config {
    /// Load configuration from `.env` (if present) plus process environment.
    pub fn load() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            tracing::debug!(%err, "no .env file loaded");
        }

        let bind_addr = env_var("AUDIO_PROXY_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse()
            .unwrap_or_else(|err| {
                tracing::warn!(%err, "invalid AUDIO_PROXY_BIND_ADDR, falling back to default");
                DEFAULT_BIND.parse().expect("default bind addr is valid")
            });

        Self {
            bind_addr,
            proxy_upstream_chunk_bytes: env_usize(
                "AUDIO_PROXY_PROXY_UPSTREAM_CHUNK_BYTES",
                DEFAULT_PROXY_UPSTREAM_CHUNK,
            ),
            call_upstream_chunk_bytes: env_usize(
                "AUDIO_PROXY_CALL_UPSTREAM_CHUNK_BYTES",
                DEFAULT_CALL_UPSTREAM_CHUNK,
            ),
            call_downstream_chunk_bytes: env_usize(
                "AUDIO_PROXY_CALL_DOWNSTREAM_CHUNK_BYTES",
                DEFAULT_CALL_DOWNSTREAM_CHUNK,
            ),
            touch_sound_dir: env_var("AUDIO_PROXY_TOUCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOUCH_DIR)),
            welcome_sound_path: env_var("AUDIO_PROXY_WELCOME_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WELCOME_FILE)),
            debug_dump_dir: env_var("AUDIO_PROXY_DEBUG_DUMP_DIR").map(PathBuf::from),
            log_level: env_var("AUDIO_PROXY_LOG_LEVEL")
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.parse().expect("default bind addr is valid"),
            proxy_upstream_chunk_bytes: DEFAULT_PROXY_UPSTREAM_CHUNK,
            call_upstream_chunk_bytes: DEFAULT_CALL_UPSTREAM_CHUNK,
            call_downstream_chunk_bytes: DEFAULT_CALL_DOWNSTREAM_CHUNK,
            touch_sound_dir: PathBuf::from(DEFAULT_TOUCH_DIR),
            welcome_sound_path: PathBuf::from(DEFAULT_WELCOME_FILE),
            debug_dump_dir: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_usize(key: &str, default: usize) -> usize {
    env_var(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

//! Composition root: the shared state handed to every axum handler.
//!
//! This module is the only place the two endpoints' independent registries,
//! backend links, and shared configuration are wired together.

use std::sync::Arc;

use crate::audio::MergeBuffer;
use crate::backend::BackendLink;
use crate::config::Config;
use crate::protocol::AudioConfig;
use crate::registry::Registry;

/// `/proxy` sessions carry no extra per-session state beyond the inbound
/// buffer every session already has.
pub type ProxyExtra = ();

/// `/call` sessions additionally carry a downstream merge buffer and the
/// audio descriptor negotiated at handshake.
#[derive(Default)]
pub struct CallExtra {
    pub downstream: MergeBuffer,
    pub format: AudioConfig,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub proxy_registry: Arc<Registry<ProxyExtra>>,
    pub proxy_backend: Arc<BackendLink>,
    pub call_registry: Arc<Registry<CallExtra>>,
    pub call_backend: Arc<BackendLink>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            proxy_registry: Arc::new(Registry::new()),
            proxy_backend: Arc::new(BackendLink::new()),
            call_registry: Arc::new(Registry::new()),
            call_backend: Arc::new(BackendLink::new()),
        }
    }
}

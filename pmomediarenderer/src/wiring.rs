//! Assembles a [`PlaylistService`] and its SOAP router from the process-wide
//! configuration singleton ([`rndr_config::get_config`]), the way the
//! embedded-default/on-disk/env three-way merge is consumed elsewhere in the
//! renderer bridge.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use rndr_config::Config;
use rndr_stream::ProxyTarget;

use crate::events::EventBus;
use crate::metadata_cache::MetadataCache;
use crate::player::Player;
use crate::playlist_service::PlaylistService;
use crate::soap_server;

/// Builds a [`PlaylistService`] wired to `player`, with its metadata cache
/// persisted under `cache_path` (pass `None` to keep it in-memory only, as
/// tests do).
pub fn build_service(
    config: &Config,
    player: Arc<dyn Player>,
    cache_path: Option<PathBuf>,
) -> Arc<PlaylistService> {
    let cache = Arc::new(MetadataCache::new(
        cache_path,
        Duration::from_millis(config.get_metacache_save_debounce_ms() as u64),
    ));
    let events = Arc::new(EventBus::new());
    let proxy_target = ProxyTarget {
        host: config.get_base_host(),
        port: config.get_proxy_listen_port(),
    };
    Arc::new(PlaylistService::new(player, cache, events, proxy_target))
}

/// The SOAP control surface for `service`, mountable into a larger axum app
/// (device description serving, SSDP, etc. are assembled elsewhere).
pub fn control_router(service: Arc<PlaylistService>) -> Router {
    soap_server::router(service)
}

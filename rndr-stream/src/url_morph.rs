//! `morph_special_url`: rewrites the handful of pseudo-URL schemes the
//! player is handed into URLs it can actually dereference, before they ever
//! reach the player's queue.

/// Where a `tidal://`/`qobuz://` track URL gets rewritten to: the proxy's own
/// `http://host:port/<plugin_path>` prefix.
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    pub host: String,
    pub port: u16,
}

const PROTO_ESCAPE_PREFIX: &str = "http://upmpdprotoescape/";

/// Result of morphing a candidate URI: the (possibly rewritten) URI, and
/// whether the player should skip its own content-type probing of it (set
/// whenever the rewrite target is something the player cannot HEAD/sniff
/// itself, e.g. a streaming-service track id it must hand to the proxy).
#[derive(Debug, Clone)]
pub struct MorphResult {
    pub uri: String,
    pub force_no_content_check: bool,
}

/// Applies the renderer's URL rewriting rules, in order:
///
/// 1. `http://upmpdprotoescape/PROTO/REST` -> `PROTO://REST`.
/// 2. `(tidal|qobuz)://track?version=<N>&trackId=<ID>` -> a proxy URL under
///    `plugin_path`, pinned to `version=1`.
/// 3. `http://`/`https://` pass through unchanged.
///
/// Idempotent on inputs that already match rule 3 (the only case where
/// applying it twice is meaningful: the second application is a no-op).
pub fn morph_special_url(uri: &str, target: &ProxyTarget, plugin_path: &str) -> MorphResult {
    if let Some(rest) = uri.strip_prefix(PROTO_ESCAPE_PREFIX) {
        if let Some((proto, tail)) = rest.split_once('/') {
            return MorphResult {
                uri: format!("{proto}://{tail}"),
                force_no_content_check: true,
            };
        }
    }

    if let Some(rewritten) = rewrite_streaming_track_url(uri, target, plugin_path) {
        return MorphResult {
            uri: rewritten,
            force_no_content_check: true,
        };
    }

    MorphResult {
        uri: uri.to_string(),
        force_no_content_check: false,
    }
}

fn rewrite_streaming_track_url(uri: &str, target: &ProxyTarget, plugin_path: &str) -> Option<String> {
    let (scheme, rest) = uri.split_once("://")?;
    if scheme != "tidal" && scheme != "qobuz" {
        return None;
    }
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    if path != "track" {
        return None;
    }

    let mut track_id = None;
    for pair in query.split('&') {
        if let Some(id) = pair.strip_prefix("trackId=") {
            track_id = Some(id);
        }
    }
    let track_id = track_id?;

    Some(format!(
        "http://{}:{}{}/track?version=1&trackId={}",
        target.host, target.port, plugin_path, track_id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ProxyTarget {
        ProxyTarget {
            host: "192.168.1.10".into(),
            port: 49149,
        }
    }

    #[test]
    fn s1_tidal_track_rewrite() {
        let result = morph_special_url(
            "tidal://track?version=2&trackId=12345",
            &target(),
            "/tidal",
        );
        assert_eq!(
            result.uri,
            "http://192.168.1.10:49149/tidal/track?version=1&trackId=12345"
        );
        assert!(result.force_no_content_check);
    }

    #[test]
    fn qobuz_track_rewrite_uses_its_own_plugin_path() {
        let result = morph_special_url("qobuz://track?version=1&trackId=999", &target(), "/qobuz");
        assert_eq!(
            result.uri,
            "http://192.168.1.10:49149/qobuz/track?version=1&trackId=999"
        );
    }

    #[test]
    fn proto_escape_prefix_is_rewritten() {
        let result = morph_special_url(
            "http://upmpdprotoescape/spotify/play/abc",
            &target(),
            "/tidal",
        );
        assert_eq!(result.uri, "spotify://play/abc");
        assert!(result.force_no_content_check);
    }

    #[test]
    fn plain_http_passes_through_unchanged() {
        let result = morph_special_url("http://host/track.flac", &target(), "/tidal");
        assert_eq!(result.uri, "http://host/track.flac");
        assert!(!result.force_no_content_check);
    }

    #[test]
    fn plain_https_passes_through_unchanged() {
        let result = morph_special_url("https://host/track.flac", &target(), "/tidal");
        assert_eq!(result.uri, "https://host/track.flac");
    }

    #[test]
    fn morph_is_idempotent_on_already_plain_urls() {
        let once = morph_special_url("http://host/track.flac", &target(), "/tidal");
        let twice = morph_special_url(&once.uri, &target(), "/tidal");
        assert_eq!(once.uri, twice.uri);
    }
}

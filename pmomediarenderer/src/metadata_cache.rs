//! `TrackMetaCache`: `uri -> DIDL-Lite metadata` persisted as a flat file of
//! `uri<TAB>didl_escaped_on_one_line` pairs, loaded at startup and saved with
//! debounced, best-effort writes whenever the in-memory map is dirty.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

struct Inner {
    entries: HashMap<String, String>,
    dirty: bool,
    last_save: Instant,
}

pub struct MetadataCache {
    path: Option<PathBuf>,
    debounce: Duration,
    inner: Mutex<Inner>,
}

impl MetadataCache {
    /// Builds a cache persisted at `path`, loading any existing content.
    /// `path = None` disables persistence (in-memory only, used by tests).
    pub fn new(path: Option<PathBuf>, debounce: Duration) -> Self {
        let entries = path
            .as_deref()
            .and_then(|p| fs::read_to_string(p).ok())
            .map(parse_flat_file)
            .unwrap_or_default();

        MetadataCache {
            path,
            debounce,
            inner: Mutex::new(Inner {
                entries,
                dirty: false,
                last_save: Instant::now() - debounce,
            }),
        }
    }

    pub fn get(&self, uri: &str) -> Option<String> {
        self.inner.lock().unwrap().entries.get(uri).cloned()
    }

    /// Inserts or overwrites the metadata for `uri`, marking the cache dirty.
    pub fn set(&self, uri: &str, didl: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.get(uri).map(String::as_str) != Some(didl) {
            inner.entries.insert(uri.to_string(), didl.to_string());
            inner.dirty = true;
        }
    }

    /// Drops every entry whose uri is not in `live_uris`, and adds an entry
    /// for every live uri missing a cache entry (caller supplies synthesized
    /// DIDL for those, via `synthesize`). Returns whether anything changed.
    pub fn reconcile(
        &self,
        live_uris: &[String],
        mut synthesize: impl FnMut(&str) -> Option<String>,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before_len = inner.entries.len();
        let live_set: std::collections::HashSet<&str> =
            live_uris.iter().map(String::as_str).collect();

        inner.entries.retain(|uri, _| live_set.contains(uri.as_str()));
        let mut changed = inner.entries.len() != before_len;

        for uri in live_uris {
            if !inner.entries.contains_key(uri) {
                if let Some(didl) = synthesize(uri) {
                    inner.entries.insert(uri.clone(), didl);
                    changed = true;
                }
            }
        }

        if changed {
            inner.dirty = true;
        }
        changed
    }

    /// Saves to disk if dirty and the debounce interval has elapsed.
    /// Best-effort: I/O failures are logged, never propagated.
    pub fn maybe_save(&self) {
        let Some(path) = &self.path else { return };
        let mut inner = self.inner.lock().unwrap();
        if !inner.dirty || inner.last_save.elapsed() < self.debounce {
            return;
        }
        if let Err(e) = write_flat_file(path, &inner.entries) {
            warn!(path = %path.display(), error = %e, "failed to save track metadata cache");
        }
        inner.dirty = false;
        inner.last_save = Instant::now();
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().unwrap().dirty
    }
}

fn parse_flat_file(contents: String) -> HashMap<String, String> {
    contents
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .map(|(uri, didl)| (uri.to_string(), unescape_line(didl)))
        .collect()
}

fn write_flat_file(path: &Path, entries: &HashMap<String, String>) -> std::io::Result<()> {
    let mut out = String::new();
    for (uri, didl) in entries {
        out.push_str(uri);
        out.push('\t');
        out.push_str(&escape_line(didl));
        out.push('\n');
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, out)
}

fn escape_line(didl: &str) -> String {
    didl.replace('\\', "\\\\").replace('\n', "\\n").replace('\t', "\\t")
}

fn unescape_line(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

//! [`DiscoveryDirectory`]: the device pool plus the worker thread that keeps it
//! current from a stream of SSDP events.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender};
use rndr_upnp::{DeviceDesc, ServiceDesc, SsdpEvent};
use tracing::{debug, trace, warn};

use crate::pool::{DeviceDescriptor, DevicePool};

const DESCRIPTION_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_SEARCH_INTERVAL: Duration = Duration::from_secs(10);

/// Sends an `M-SEARCH` for a given search target. Implemented by whatever owns the
/// actual SSDP socket; this directory only needs to trigger a search, never to see
/// the resulting traffic directly (that arrives back through [`SsdpEvent`]s).
pub trait SsdpSearch: Send + Sync {
    fn send_msearch(&self, search_target: &str);
}

/// A no-op searcher for tests and for callers who feed events from a source other
/// than live SSDP traffic (recorded fixtures, etc).
pub struct NullSearcher;
impl SsdpSearch for NullSearcher {
    fn send_msearch(&self, _search_target: &str) {}
}

enum WorkItem {
    Alive { udn: String, device: DeviceDesc, max_age: u32 },
    Bye { udn: String },
}

/// A visitor invoked once per `(device, service)` pair found in the pool. Returning
/// `false` stops the traversal early.
pub type Visitor = Box<dyn Fn(&DeviceDesc, &ServiceDesc) -> bool + Send + Sync>;

struct Callbacks {
    slots: Vec<Option<Visitor>>,
}

impl Callbacks {
    fn new() -> Self {
        Callbacks { slots: Vec::new() }
    }

    fn add(&mut self, v: Visitor) -> usize {
        self.slots.push(Some(v));
        self.slots.len() - 1
    }

    fn remove(&mut self, idx: usize) {
        if let Some(slot) = self.slots.get_mut(idx) {
            *slot = None;
        }
    }

    fn invoke_all(&self, device: &DeviceDesc) {
        for v in self.slots.iter().flatten() {
            v(device, &ServiceDesc::default());
        }
    }
}

struct Shared {
    pool: Mutex<DevicePool>,
    pool_changed: Condvar,
    callbacks: Mutex<Callbacks>,
    in_flight: Mutex<HashSet<String>>,
}

/// Aggregates SSDP events into a device pool, de-duplicates concurrent description
/// downloads, expires stale entries, and lets callers wait for a specific device to
/// appear.
pub struct DiscoveryDirectory {
    shared: Arc<Shared>,
    search_window: Duration,
    last_search: Mutex<Instant>,
    searcher: Arc<dyn SsdpSearch>,
    work_tx: Sender<WorkItem>,
}

impl DiscoveryDirectory {
    /// Builds a new directory and performs the initial search. `search_window` is
    /// how long a caller's blocking lookup waits for devices to respond before
    /// giving up.
    pub fn new(search_window: Duration, searcher: Arc<dyn SsdpSearch>) -> Arc<Self> {
        let shared = Arc::new(Shared {
            pool: Mutex::new(DevicePool::default()),
            pool_changed: Condvar::new(),
            callbacks: Mutex::new(Callbacks::new()),
            in_flight: Mutex::new(HashSet::new()),
        });

        let (work_tx, work_rx) = bounded::<WorkItem>(256);
        {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("discovery-worker".into())
                .spawn(move || {
                    while let Ok(item) = work_rx.recv() {
                        match item {
                            WorkItem::Bye { udn } => {
                                let mut pool = shared.pool.lock().unwrap();
                                if pool.remove(&udn).is_some() {
                                    debug!(udn, "device went offline");
                                }
                            }
                            WorkItem::Alive { udn, device, max_age } => {
                                {
                                    let mut pool = shared.pool.lock().unwrap();
                                    pool.insert(udn.clone(), DeviceDescriptor::new(device.clone(), max_age));
                                }
                                shared.pool_changed.notify_all();
                                let callbacks = shared.callbacks.lock().unwrap();
                                callbacks.invoke_all(&device);
                            }
                        }
                    }
                })
                .expect("spawning discovery worker thread");
        }

        let directory = Arc::new(DiscoveryDirectory {
            shared,
            search_window,
            last_search: Mutex::new(Instant::now() - MIN_SEARCH_INTERVAL),
            searcher,
            work_tx,
        });
        directory.search();
        directory
    }

    /// Registers a visitor called on every newly (re-)discovered device. Returns a
    /// handle usable with [`Self::del_callback`].
    pub fn add_callback(&self, visitor: Visitor) -> usize {
        self.shared.callbacks.lock().unwrap().add(visitor)
    }

    pub fn del_callback(&self, handle: usize) {
        self.shared.callbacks.lock().unwrap().remove(handle);
    }

    /// Feeds one SSDP event into the directory. Safe to call concurrently from
    /// multiple threads (e.g. several SSDP listener callbacks).
    pub fn handle_ssdp_event(&self, event: SsdpEvent) {
        match event {
            SsdpEvent::Alive { nt, usn, location, max_age, .. }
            | SsdpEvent::SearchResponse { st: nt, usn, location, max_age, .. } => {
                if nt != "upnp:rootdevice" {
                    trace!(nt, "ignoring non-root-device advertisement");
                    return;
                }
                let Some(udn) = extract_udn_from_usn(&usn) else {
                    return;
                };
                self.fetch_and_enqueue(udn, location, max_age);
            }
            SsdpEvent::ByeBye { usn, .. } => {
                if let Some(udn) = extract_udn_from_usn(&usn) {
                    let _ = self.work_tx.send(WorkItem::Bye { udn });
                }
            }
        }
    }

    fn fetch_and_enqueue(&self, udn: String, location: String, max_age: u32) {
        {
            let mut in_flight = self.shared.in_flight.lock().unwrap();
            if !in_flight.insert(location.clone()) {
                trace!(location, "description already downloading, dropping duplicate");
                return;
            }
        }

        let result = rndr_upnp::fetch_blocking(&location, DESCRIPTION_FETCH_TIMEOUT);

        self.shared.in_flight.lock().unwrap().remove(&location);

        match result {
            Ok(device) => {
                let _ = self.work_tx.send(WorkItem::Alive { udn, device, max_age });
            }
            Err(e) => {
                warn!(location, error = %e, "device description fetch failed");
            }
        }
    }

    /// Triggers a new `M-SEARCH`, rate-limited to at most once per 10 seconds.
    pub fn search(&self) {
        let mut last = self.last_search.lock().unwrap();
        if last.elapsed() < MIN_SEARCH_INTERVAL {
            return;
        }
        self.searcher.send_msearch("upnp:rootdevice");
        *last = Instant::now();
    }

    /// Seconds left in the current search response window.
    pub fn remaining_delay(&self) -> Duration {
        let elapsed = self.last_search.lock().unwrap().elapsed();
        self.search_window.saturating_sub(elapsed)
    }

    fn expire_devices(&self) {
        let changed = self.shared.pool.lock().unwrap().expire();
        if changed {
            self.search();
        }
    }

    /// Visits every `(device, service)` pair currently in the pool, blocking until
    /// the search window elapses and sweeping expired entries first.
    pub fn traverse(&self, visit: impl Fn(&DeviceDesc, &ServiceDesc) -> bool) {
        let remaining = self.remaining_delay();
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
        self.expire_devices();

        let pool = self.shared.pool.lock().unwrap();
        for (_, descriptor) in pool.iter() {
            for service in &descriptor.device.services {
                if !visit(&descriptor.device, service) {
                    return;
                }
            }
        }
    }

    /// Looks up a device by UDN, blocking until it appears or the search window
    /// expires. Returns `None` on timeout.
    pub fn get_dev_by_udn(&self, udn: &str) -> Option<DeviceDesc> {
        self.get_dev_by_selector(|d| d.udn == udn)
    }

    pub fn get_dev_by_friendly_name(&self, name: &str) -> Option<DeviceDesc> {
        self.get_dev_by_selector(|d| d.friendly_name == name)
    }

    fn get_dev_by_selector(&self, matches: impl Fn(&DeviceDesc) -> bool) -> Option<DeviceDesc> {
        self.expire_devices();

        loop {
            let remaining = self.remaining_delay();
            let pool = self.shared.pool.lock().unwrap();
            if let Some((_, d)) = pool.iter().find(|(_, d)| matches(&d.device)) {
                return Some(d.device.clone());
            }
            if remaining.is_zero() {
                return None;
            }
            let (_guard, timeout_result) = self
                .shared
                .pool_changed
                .wait_timeout(pool, remaining)
                .unwrap();
            if timeout_result.timed_out() && self.remaining_delay().is_zero() {
                return None;
            }
        }
    }

    pub fn pool_len(&self) -> usize {
        self.shared.pool.lock().unwrap().len()
    }
}

fn extract_udn_from_usn(usn: &str) -> Option<String> {
    let lower = usn.trim().to_ascii_lowercase();
    let idx = lower.find("uuid:")?;
    let sub = &lower[idx..];
    match sub.find("::") {
        Some(end) => Some(sub[..end].to_string()),
        None => Some(sub.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_udn_from_compound_usn() {
        assert_eq!(
            extract_udn_from_usn("uuid:abc-123::upnp:rootdevice"),
            Some("uuid:abc-123".to_string())
        );
    }

    #[test]
    fn extracts_udn_from_bare_usn() {
        assert_eq!(extract_udn_from_usn("uuid:abc-123"), Some("uuid:abc-123".to_string()));
    }

    #[test]
    fn no_uuid_yields_none() {
        assert_eq!(extract_udn_from_usn("urn:schemas-upnp-org:device:MediaRenderer:1"), None);
    }

    #[test]
    fn non_root_advertisement_is_ignored() {
        let dir = DiscoveryDirectory::new(Duration::from_millis(50), Arc::new(NullSearcher));
        dir.handle_ssdp_event(SsdpEvent::Alive {
            usn: "uuid:abc-123::urn:schemas-upnp-org:service:Playlist:1".into(),
            nt: "urn:schemas-upnp-org:service:Playlist:1".into(),
            location: "http://127.0.0.1:1/desc.xml".into(),
            server: "test".into(),
            max_age: 1800,
            from: "127.0.0.1:1900".parse().unwrap(),
        });
        assert_eq!(dir.pool_len(), 0);
    }

    #[test]
    fn byebye_for_unknown_device_is_a_no_op() {
        let dir = DiscoveryDirectory::new(Duration::from_millis(50), Arc::new(NullSearcher));
        dir.handle_ssdp_event(SsdpEvent::ByeBye {
            usn: "uuid:never-seen::upnp:rootdevice".into(),
            nt: "upnp:rootdevice".into(),
            from: "127.0.0.1:1900".parse().unwrap(),
        });
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(dir.pool_len(), 0);
    }

    #[test]
    fn lookup_times_out_when_device_never_appears() {
        let dir = DiscoveryDirectory::new(Duration::from_millis(30), Arc::new(NullSearcher));
        assert!(dir.get_dev_by_udn("uuid:missing").is_none());
    }
}

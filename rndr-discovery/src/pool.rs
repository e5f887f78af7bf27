//! The device pool: devices currently believed to be on the network, keyed by UDN.

use std::collections::HashMap;
use std::time::Instant;

use rndr_upnp::DeviceDesc;

/// One entry in the pool: a parsed device description plus its freshness bookkeeping.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub device: DeviceDesc,
    pub last_seen: Instant,
    /// Advertised lifetime (`max-age`) plus a 20 second grace period.
    pub expires_seconds: u32,
}

impl DeviceDescriptor {
    pub fn new(device: DeviceDesc, max_age: u32) -> Self {
        DeviceDescriptor {
            device,
            last_seen: Instant::now(),
            expires_seconds: max_age + 20,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen).as_secs() > self.expires_seconds as u64
    }
}

/// Devices currently believed to be on the network, keyed by UDN.
#[derive(Debug, Default)]
pub struct DevicePool {
    devices: HashMap<String, DeviceDescriptor>,
}

impl DevicePool {
    pub fn insert(&mut self, udn: String, descriptor: DeviceDescriptor) {
        self.devices.insert(udn, descriptor);
    }

    pub fn remove(&mut self, udn: &str) -> Option<DeviceDescriptor> {
        self.devices.remove(udn)
    }

    pub fn get(&self, udn: &str) -> Option<&DeviceDescriptor> {
        self.devices.get(udn)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DeviceDescriptor)> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Drops entries that have not been seen within their advertised lifetime.
    /// Returns true if anything was removed.
    pub fn expire(&mut self) -> bool {
        let now = Instant::now();
        let before = self.devices.len();
        self.devices.retain(|_, d| !d.is_expired(now));
        self.devices.len() != before
    }
}
